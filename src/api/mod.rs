pub mod error;
pub mod mexc;
pub mod paper;
pub mod signer;
pub mod wire;

pub use error::ExchangeError;
pub use mexc::MexcClient;
pub use paper::PaperExchange;
pub use signer::RequestSigner;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::models::{Candle, CandleInterval, CurrencyPair, Order, OrderRequest};

/// Domain operations the trade engine needs from an exchange account
///
/// Every call takes the session's cancellation token; implementations must
/// stop waiting once it fires.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn create_order(
        &self,
        ctx: &CancellationToken,
        request: &OrderRequest,
    ) -> Result<Order, ExchangeError>;

    /// Place several orders for one pair in a single request
    async fn create_batch_orders(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        requests: &[OrderRequest],
    ) -> Result<Vec<Order>, ExchangeError>;

    /// Cancel every open order on the pair, returning what was canceled
    async fn cancel_all_orders(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Vec<Order>, ExchangeError>;

    async fn get_price(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Decimal, ExchangeError>;

    /// Most recent candles, oldest first
    async fn get_candles(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Free amount of `currency`; [`ExchangeError::AssetNotFound`] if the
    /// account has no entry for it
    async fn get_balance(
        &self,
        ctx: &CancellationToken,
        currency: &str,
    ) -> Result<Decimal, ExchangeError>;
}

/// Balance lookup where a missing asset simply means nothing is held
pub async fn balance_or_zero<E: Exchange + ?Sized>(
    exchange: &E,
    ctx: &CancellationToken,
    currency: &str,
) -> Result<Decimal, ExchangeError> {
    match exchange.get_balance(ctx, currency).await {
        Err(e) if e.is_not_found() => Ok(Decimal::ZERO),
        other => other,
    }
}
