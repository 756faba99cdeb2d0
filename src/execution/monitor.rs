use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::session::TradeSession;
use crate::api::Exchange;
use crate::clock::WallClock;
use crate::config::MonitorConfig;
use crate::models::CandleInterval;
use crate::risk::{ExitReason, ExitRules};

type PollLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Fixed-cadence pacing for polling loops; a zero interval means no pacing
pub(crate) struct Pacer {
    limiter: Option<PollLimiter>,
}

impl Pacer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(interval).map(RateLimiter::direct),
        }
    }

    pub(crate) async fn tick(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Polls market data for an open session until an exit condition holds
pub struct MonitorLoop {
    rules: ExitRules,
    clock: Arc<dyn WallClock>,
    poll_interval: Duration,
    max_iterations: u32,
}

impl MonitorLoop {
    pub fn new(config: &MonitorConfig, clock: Arc<dyn WallClock>) -> Self {
        Self {
            rules: ExitRules::from(config),
            clock,
            poll_interval: config.poll_interval(),
            max_iterations: config.max_iterations,
        }
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Run until the first exit condition; never fails, a data error is an exit
    pub async fn run<E: Exchange + ?Sized>(
        &self,
        exchange: &E,
        ctx: &CancellationToken,
        session: &TradeSession,
    ) -> ExitReason {
        let pacer = Pacer::new(self.poll_interval);
        let buy_price = session.entry_price.unwrap_or(Decimal::ZERO);

        for iteration in 0..self.max_iterations {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return ExitReason::Cancelled,
                _ = pacer.tick() => {}
            }

            let now = self.clock.now_utc();
            if let Some(reason) = self.rules.check_time(session.started_at, now) {
                return reason;
            }

            let candles = match exchange
                .get_candles(ctx, &session.pair, CandleInterval::OneMinute)
                .await
            {
                Ok(candles) => candles,
                Err(_) if ctx.is_cancelled() => return ExitReason::Cancelled,
                Err(e) => {
                    tracing::warn!(symbol = %session.pair, error = %e, "Candle fetch failed");
                    return ExitReason::CandleMissing;
                }
            };
            let Some(candle) = ExitRules::matching_candle(&candles, session.started_at) else {
                return ExitReason::CandleMissing;
            };

            let price = match exchange.get_price(ctx, &session.pair).await {
                Ok(price) => price,
                Err(_) if ctx.is_cancelled() => return ExitReason::Cancelled,
                Err(e) => {
                    tracing::warn!(symbol = %session.pair, error = %e, "Price fetch failed");
                    return ExitReason::PriceUnavailable;
                }
            };

            if let Some(reason) = self.rules.check_price(price, candle.high, buy_price) {
                return reason;
            }

            tracing::debug!(
                symbol = %session.pair,
                iteration,
                price = %price,
                candle_high = candle.high,
                "Holding position"
            );
        }

        ExitReason::IterationLimit
    }
}
