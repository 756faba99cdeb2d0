use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::api::ExchangeError;

/// A traded pair, e.g. `XYZ` quoted in `USDT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub asset: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(asset: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            asset: asset.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Exchange symbol (`XYZUSDT`)
    pub fn symbol(&self) -> String {
        format!("{}{}", self.asset, self.quote)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.asset, self.quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Long / buy
    Buy,
    /// Short / sell
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    LimitMarket,
    ImmediateOrCancel,
    FillOrKill,
}

impl OrderType {
    const NAMES: &'static [(OrderType, &'static str)] = &[
        (OrderType::Limit, "limit"),
        (OrderType::Market, "market"),
        (OrderType::LimitMarket, "limit_market"),
        (OrderType::ImmediateOrCancel, "immediate_or_cancel"),
        (OrderType::FillOrKill, "fill_or_kill"),
    ];
}

impl FromStr for OrderType {
    type Err = ExchangeError;

    /// Parse the configuration name of an order type (`limit`, `market`, ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(order_type, _)| *order_type)
            .ok_or_else(|| ExchangeError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PartiallyCanceled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::PartiallyCanceled
        )
    }
}

pub type OrderId = String;

/// Order parameters before the exchange has seen them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl OrderRequest {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Order as acknowledged by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub pair: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
}

impl Order {
    pub fn from_request(id: OrderId, request: &OrderRequest) -> Self {
        Self {
            id,
            pair: request.pair.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            status: OrderStatus::New,
        }
    }

    /// Apply a status reported by the exchange.
    ///
    /// Returns false (and leaves the order untouched) once the order is
    /// filled or canceled.
    pub fn apply_status(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
    OneMonth,
}

/// OHLCV candlestick snapshot, never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub asset_volume: f64,
    pub interval: CandleInterval,
}

impl Candle {
    /// Whether `at` falls inside this candle (both ends inclusive)
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.open_time <= at && at <= self.close_time
    }
}

/// Free amount of one currency on the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub currency: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Symbol announcement handed over by the signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub observed_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(symbol: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            observed_at,
        }
    }
}
