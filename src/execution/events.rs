use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::session::SessionPhase;
use crate::models::Order;
use crate::risk::ExitReason;

/// Audit record of what the engine did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SignalAccepted {
        symbol: String,
        observed_at: DateTime<Utc>,
    },
    SignalDropped {
        symbol: String,
        age_ms: i64,
    },
    PhaseChanged {
        session_id: Uuid,
        phase: SessionPhase,
    },
    OrderPlaced {
        session_id: Uuid,
        order: Order,
    },
    ExitTriggered {
        session_id: Uuid,
        reason: ExitReason,
    },
    SessionClosed {
        session_id: Uuid,
        sold_quantity: Decimal,
        clean: bool,
    },
}

/// Optional receiver of [`SessionEvent`]s; a closed receiver is ignored
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::debug!("Audit event receiver dropped");
            }
        }
    }
}
