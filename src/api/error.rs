use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors raised by exchange adapters
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("unknown order side: {0}")]
    UnknownSide(String),

    #[error("unknown order type: {0}")]
    UnknownType(String),

    #[error("unknown candle interval: {0}")]
    UnknownInterval(String),

    #[error("unknown order status: {0}")]
    UnknownStatus(String),

    /// The account holds no entry for the currency; an expected outcome
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("exchange rejected request (HTTP {status}, code {code:?}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("{context}: malformed response: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot parse {field} from {value:?}")]
    Parse { field: &'static str, value: String },

    #[error("failed to sign request: {0}")]
    Signing(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ExchangeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExchangeError::AssetNotFound(_))
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Mapping errors and exchange rejections are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Transport(_) => true,
            ExchangeError::Http { status, .. } => *status >= 500 || *status == 429,
            ExchangeError::Gateway(GatewayError::DeadlineExceeded(_)) => true,
            _ => false,
        }
    }

    pub(crate) fn decode(context: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| ExchangeError::Decode { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(ExchangeError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!ExchangeError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!ExchangeError::UnknownSide("UP".into()).is_retryable());
        assert!(ExchangeError::Gateway(GatewayError::DeadlineExceeded(Duration::from_secs(1)))
            .is_retryable());
        assert!(!ExchangeError::Gateway(GatewayError::Cancelled).is_retryable());
    }

    #[test]
    fn test_not_found_is_distinguished() {
        assert!(ExchangeError::AssetNotFound("XYZ".into()).is_not_found());
        assert!(!ExchangeError::Parse { field: "free", value: "x".into() }.is_not_found());
    }
}
