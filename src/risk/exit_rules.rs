use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MonitorConfig;
use crate::models::Candle;

/// Why a session left the monitoring phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Wall clock moved past the minute the session started in
    MinuteRolled,
    /// Too close to the end of the start minute
    CutoffReached,
    /// No candle covers the session start
    CandleMissing,
    /// Current price could not be fetched
    PriceUnavailable,
    /// Price fell below the candle high by more than allowed
    PriceDeclined,
    /// Price multiple over the buy price hit the cap
    ProfitCapReached,
    IterationLimit,
    Cancelled,
    /// An earlier phase failed; exit runs as cleanup
    SessionFailed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitReason::MinuteRolled => "minute rolled over",
            ExitReason::CutoffReached => "second cutoff reached",
            ExitReason::CandleMissing => "no candle covers session start",
            ExitReason::PriceUnavailable => "price unavailable",
            ExitReason::PriceDeclined => "price declined from candle high",
            ExitReason::ProfitCapReached => "profit cap reached",
            ExitReason::IterationLimit => "monitor iteration limit",
            ExitReason::Cancelled => "cancelled",
            ExitReason::SessionFailed => "session failed",
        };
        f.write_str(text)
    }
}

/// Exit conditions evaluated on each monitor iteration
///
/// The monitor runs the checks in a fixed order (time, candle, decline,
/// profit cap) and the first one that holds decides.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRules {
    pub cutoff_second: u32,
    pub decline_threshold: f64,
    pub profit_cap: Option<f64>,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            cutoff_second: 42,
            decline_threshold: 1.0,
            profit_cap: Some(5.0),
        }
    }
}

impl From<&MonitorConfig> for ExitRules {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            cutoff_second: config.cutoff_second,
            decline_threshold: config.decline_threshold,
            profit_cap: config.profit_cap,
        }
    }
}

fn epoch_minute(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

impl ExitRules {
    pub fn check_time(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ExitReason> {
        if epoch_minute(now) != epoch_minute(started_at) {
            return Some(ExitReason::MinuteRolled);
        }
        if now.second() > self.cutoff_second {
            return Some(ExitReason::CutoffReached);
        }
        None
    }

    /// Candle whose open/close bracket `started_at`
    pub fn matching_candle(candles: &[Candle], started_at: DateTime<Utc>) -> Option<&Candle> {
        candles.iter().rev().find(|c| c.contains(started_at))
    }

    pub fn check_price(
        &self,
        price: Decimal,
        candle_high: f64,
        buy_price: Decimal,
    ) -> Option<ExitReason> {
        if candle_high <= 0.0 || !candle_high.is_finite() {
            return Some(ExitReason::CandleMissing);
        }
        let price_f = price.to_f64().unwrap_or_default();
        if price_f / candle_high < self.decline_threshold {
            return Some(ExitReason::PriceDeclined);
        }

        if let Some(cap) = self.profit_cap.and_then(Decimal::from_f64) {
            if buy_price > Decimal::ZERO && price / buy_price > cap {
                return Some(ExitReason::ProfitCapReached);
            }
        }
        None
    }
}
