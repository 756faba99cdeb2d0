use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::ladder::LadderError;
use crate::api::ExchangeError;
use crate::models::{CurrencyPair, Order};
use crate::risk::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    AwaitingBuyFill,
    ExitLadderPlaced,
    Monitoring,
    Exiting,
    Done,
}

impl SessionPhase {
    /// Forward steps of the lifecycle, plus the jump to `Exiting` from any
    /// phase before it when the session fails early
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Idle, AwaitingBuyFill)
            | (AwaitingBuyFill, ExitLadderPlaced)
            | (ExitLadderPlaced, Monitoring)
            | (Exiting, Done) => true,
            (Idle | AwaitingBuyFill | ExitLadderPlaced | Monitoring, Exiting) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{stage} failed: {source}")]
    Exchange {
        stage: &'static str,
        #[source]
        source: ExchangeError,
    },
    #[error("invalid order ladder: {0}")]
    Ladder(#[from] LadderError),
    #[error("buy not confirmed within {0:?}")]
    FillTimeout(Duration),
    #[error("no buy order was placed")]
    NoBuyPlaced,
    #[error("session cancelled")]
    Cancelled,
    #[error("session task panicked")]
    Panicked,
    #[error("illegal phase change {from:?} -> {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

impl SessionError {
    pub fn exchange(stage: &'static str) -> impl FnOnce(ExchangeError) -> Self {
        move |source| SessionError::Exchange { stage, source }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Exchange { source, .. } if source.is_retryable())
    }
}

/// State of the single active trade
#[derive(Debug, Clone)]
pub struct TradeSession {
    pub id: Uuid,
    pub pair: CurrencyPair,
    /// Quantity-weighted price of the placed buys
    pub entry_price: Option<Decimal>,
    pub quantity_bought: Decimal,
    pub started_at: DateTime<Utc>,
    pub orders: Vec<Order>,
    phase: SessionPhase,
}

impl TradeSession {
    pub fn new(pair: CurrencyPair, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair,
            entry_price: None,
            quantity_bought: Decimal::ZERO,
            started_at,
            orders: Vec::new(),
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn advance(&mut self, next: SessionPhase) -> Result<(), SessionError> {
        if !self.phase.can_advance_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(session = %self.id, from = ?self.phase, to = ?next, "Session phase change");
        self.phase = next;
        Ok(())
    }

    /// Record placed buys; entry price becomes their weighted average
    pub fn record_buys(&mut self, buys: &[Order]) {
        let quantity: Decimal = buys.iter().map(|o| o.quantity).sum();
        let cost: Decimal = buys.iter().map(|o| o.price * o.quantity).sum();
        self.entry_price = match buys.first() {
            // single price: keep it exact instead of dividing back
            Some(first) if buys.iter().all(|o| o.price == first.price) => Some(first.price),
            Some(_) if quantity > Decimal::ZERO => Some(cost / quantity),
            _ => None,
        };
        self.quantity_bought = quantity;
        self.orders.extend_from_slice(buys);
    }
}

/// Outcome of one session, handed back once the exit has run
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub pair: CurrencyPair,
    pub entry_price: Option<Decimal>,
    pub quantity_bought: Decimal,
    pub exit_reason: ExitReason,
    pub canceled_orders: usize,
    /// Final liquidation, if anything was left to sell
    pub exit_order: Option<Order>,
    /// Failure that ended the session before a regular exit
    pub error: Option<SessionError>,
    /// Failure of the exit itself; the position is unmanaged when set
    pub exit_error: Option<SessionError>,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.exit_error.is_none()
    }

    pub fn position_unmanaged(&self) -> bool {
        self.exit_error.is_some()
    }
}
