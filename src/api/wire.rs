//! Translation tables between domain enums and MEXC wire strings.
//!
//! Lookups go through the tables in both directions; a value without an
//! entry is reported as a typed error instead of being guessed.

use crate::api::ExchangeError;
use crate::models::{CandleInterval, OrderSide, OrderStatus, OrderType};

const SIDES: &[(OrderSide, &str)] = &[(OrderSide::Buy, "BUY"), (OrderSide::Sell, "SELL")];

const ORDER_TYPES: &[(OrderType, &str)] = &[
    (OrderType::Limit, "LIMIT"),
    (OrderType::Market, "MARKET"),
    (OrderType::LimitMarket, "LIMIT_MARKET"),
    (OrderType::ImmediateOrCancel, "IMMEDIATE_OR_CANCEL"),
    (OrderType::FillOrKill, "FILL_OR_KILL"),
];

const STATUSES: &[(OrderStatus, &str)] = &[
    (OrderStatus::New, "NEW"),
    (OrderStatus::PartiallyFilled, "PARTIALLY_FILLED"),
    (OrderStatus::Filled, "FILLED"),
    (OrderStatus::Canceled, "CANCELED"),
    (OrderStatus::PartiallyCanceled, "PARTIALLY_CANCELED"),
];

const INTERVALS: &[(CandleInterval, &str)] = &[
    (CandleInterval::OneMinute, "1m"),
    (CandleInterval::FiveMinutes, "5m"),
    (CandleInterval::FifteenMinutes, "15m"),
    (CandleInterval::ThirtyMinutes, "30m"),
    (CandleInterval::OneHour, "60m"),
    (CandleInterval::FourHours, "4h"),
    (CandleInterval::OneDay, "1d"),
    (CandleInterval::OneWeek, "1W"),
    (CandleInterval::OneMonth, "1M"),
];

fn encode<T: PartialEq + Copy>(table: &[(T, &'static str)], value: T) -> Option<&'static str> {
    table.iter().find(|(v, _)| *v == value).map(|(_, wire)| *wire)
}

fn decode<T: Copy>(table: &[(T, &'static str)], wire: &str) -> Option<T> {
    table.iter().find(|(_, w)| *w == wire).map(|(v, _)| *v)
}

pub fn side_to_wire(side: OrderSide) -> Result<&'static str, ExchangeError> {
    encode(SIDES, side).ok_or_else(|| ExchangeError::UnknownSide(format!("{side:?}")))
}

pub fn side_from_wire(wire: &str) -> Result<OrderSide, ExchangeError> {
    decode(SIDES, wire).ok_or_else(|| ExchangeError::UnknownSide(wire.to_string()))
}

pub fn type_to_wire(order_type: OrderType) -> Result<&'static str, ExchangeError> {
    encode(ORDER_TYPES, order_type)
        .ok_or_else(|| ExchangeError::UnknownType(format!("{order_type:?}")))
}

pub fn type_from_wire(wire: &str) -> Result<OrderType, ExchangeError> {
    decode(ORDER_TYPES, wire).ok_or_else(|| ExchangeError::UnknownType(wire.to_string()))
}

pub fn status_from_wire(wire: &str) -> Result<OrderStatus, ExchangeError> {
    decode(STATUSES, wire).ok_or_else(|| ExchangeError::UnknownStatus(wire.to_string()))
}

pub fn interval_to_wire(interval: CandleInterval) -> Result<&'static str, ExchangeError> {
    encode(INTERVALS, interval)
        .ok_or_else(|| ExchangeError::UnknownInterval(format!("{interval:?}")))
}

pub fn interval_from_wire(wire: &str) -> Result<CandleInterval, ExchangeError> {
    decode(INTERVALS, wire).ok_or_else(|| ExchangeError::UnknownInterval(wire.to_string()))
}
