use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::api::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// Signs authenticated query strings with HMAC-SHA256
#[derive(Clone)]
pub struct RequestSigner {
    secret: Arc<[u8]>,
}

impl RequestSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    /// Canonical query string: keys sorted, values form-encoded
    pub fn canonical_query(params: &[(String, String)]) -> Result<String, ExchangeError> {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        serde_urlencoded::to_string(&sorted).map_err(|e| ExchangeError::Signing(e.to_string()))
    }

    pub fn signature(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Attach `timestamp` and `signature` to the params and return the query string
    pub fn sign(
        &self,
        mut params: Vec<(String, String)>,
        timestamp_ms: i64,
    ) -> Result<String, ExchangeError> {
        params.push(("timestamp".to_string(), timestamp_ms.to_string()));
        let query = Self::canonical_query(&params)?;
        let signature = self.signature(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }
}
