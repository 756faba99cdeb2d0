use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::TradeEngine;
use super::events::SessionEvent;
use crate::api::Exchange;
use crate::clock::WallClock;
use crate::models::{CurrencyPair, Signal};

/// Counters of one processor run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorSummary {
    pub sessions: usize,
    pub dropped: usize,
    pub unmanaged: usize,
}

/// Turns incoming signals into trade sessions, one at a time
///
/// Signals that arrive while a session runs wait in the channel and are
/// checked for age when their turn comes.
pub struct SignalProcessor<E: ?Sized> {
    engine: TradeEngine<E>,
    quote_currency: String,
    max_signal_age: Duration,
    clock: Arc<dyn WallClock>,
}

impl<E: Exchange + ?Sized + 'static> SignalProcessor<E> {
    pub fn new(
        engine: TradeEngine<E>,
        quote_currency: &str,
        max_signal_age: Duration,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            engine,
            quote_currency: quote_currency.to_uppercase(),
            max_signal_age,
            clock,
        }
    }

    /// Pair to trade for `signal`, or `None` if it is unusable or stale
    pub fn accept(&self, signal: &Signal) -> Option<CurrencyPair> {
        if signal.symbol.is_empty() {
            tracing::warn!("Ignoring signal without symbol");
            return None;
        }

        let age = self.clock.now_utc() - signal.observed_at;
        let too_old = age
            .to_std()
            .map(|age| age > self.max_signal_age)
            .unwrap_or(false);
        if too_old {
            tracing::warn!(
                symbol = %signal.symbol,
                age_ms = age.num_milliseconds(),
                "⏰ Too late for the pump, dropping signal"
            );
            self.engine.events().emit(SessionEvent::SignalDropped {
                symbol: signal.symbol.clone(),
                age_ms: age.num_milliseconds(),
            });
            return None;
        }

        self.engine.events().emit(SessionEvent::SignalAccepted {
            symbol: signal.symbol.clone(),
            observed_at: signal.observed_at,
        });
        Some(CurrencyPair::new(signal.symbol.as_str(), self.quote_currency.as_str()))
    }

    /// Consume signals until the channel closes or `ctx` fires
    pub async fn run(
        &self,
        mut signals: mpsc::Receiver<Signal>,
        ctx: &CancellationToken,
    ) -> ProcessorSummary {
        let mut summary = ProcessorSummary::default();

        loop {
            let signal = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = signals.recv() => match next {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let Some(pair) = self.accept(&signal) else {
                summary.dropped += 1;
                continue;
            };

            tracing::info!(symbol = %pair, "🔔 Signal accepted");
            let report = self.engine.run_session(pair, ctx).await;
            summary.sessions += 1;
            if report.position_unmanaged() {
                summary.unmanaged += 1;
            }
        }

        tracing::info!(
            sessions = summary.sessions,
            dropped = summary.dropped,
            unmanaged = summary.unmanaged,
            "Signal processor stopped"
        );
        summary
    }
}
