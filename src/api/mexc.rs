use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{wire, Exchange, ExchangeError, RequestSigner};
use crate::config::ExchangeConfig;
use crate::gateway::RequestGateway;
use crate::models::{
    AssetBalance, Candle, CandleInterval, CurrencyPair, Order, OrderRequest, OrderStatus,
    OrderType,
};

// MEXC Spot API v3
// Docs: https://mexcdevelop.github.io/apidocs/spot_v3_en/
const API_KEY_HEADER: &str = "X-MEXC-APIKEY";
const WIRE_DECIMALS: u32 = 6;

/// MEXC spot client; every call goes through the [`RequestGateway`]
#[derive(Clone)]
pub struct MexcClient {
    http: Client,
    base_url: String,
    api_key: String,
    signer: RequestSigner,
    gateway: RequestGateway,
    request_timeout: Duration,
    candle_limit: u32,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    #[serde(deserialize_with = "string_or_number")]
    order_id: String,
    price: Option<String>,
    orig_qty: Option<String>,
    #[serde(rename = "type")]
    order_type: Option<String>,
    side: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchEntry {
    Placed(OrderAck),
    Failed { code: i64, msg: String },
}

#[derive(Debug, Deserialize)]
struct ApiFailure {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct WireBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<WireBalance>,
}

impl MexcClient {
    pub fn new(config: &ExchangeConfig, gateway: RequestGateway) -> Result<Self, ExchangeError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            signer: RequestSigner::new(&config.api_secret),
            gateway,
            request_timeout: config.request_timeout(),
            candle_limit: config.candle_limit,
        })
    }

    /// Run one HTTP call on the gateway and return the raw body.
    ///
    /// Signed calls get their timestamp when a worker dispatches them, not
    /// when they are queued.
    async fn send(
        &self,
        ctx: &CancellationToken,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        signed: bool,
    ) -> Result<String, ExchangeError> {
        let http = self.http.clone();
        let url = format!("{}{}", self.base_url, path);
        let api_key = self.api_key.clone();
        let signer = self.signer.clone();

        let outcome = self
            .gateway
            .submit(ctx, Some(self.request_timeout), move || async move {
                let query = if signed {
                    signer.sign(params, Utc::now().timestamp_millis())?
                } else {
                    RequestSigner::canonical_query(&params)?
                };
                let url = if query.is_empty() { url } else { format!("{url}?{query}") };

                let mut request = http
                    .request(method, &url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json");
                if signed {
                    request = request.header(API_KEY_HEADER, api_key);
                }

                let response = request.send().await?;
                let status = response.status();
                let body = response.text().await?;

                if !status.is_success() {
                    return Err(rejection(status.as_u16(), body));
                }
                Ok(body)
            })
            .await?;

        outcome
    }

    /// Full balance sheet of the account
    pub async fn get_balances(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Vec<AssetBalance>, ExchangeError> {
        let body = self
            .send(ctx, Method::GET, "/api/v3/account", Vec::new(), true)
            .await?;
        let account: Account =
            serde_json::from_str(&body).map_err(ExchangeError::decode("MexcClient::get_balances"))?;

        account
            .balances
            .into_iter()
            .map(|b| -> Result<AssetBalance, ExchangeError> {
                Ok(AssetBalance {
                    free: parse_decimal("free", &b.free)?,
                    locked: parse_decimal("locked", &b.locked)?,
                    currency: b.asset,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Exchange for MexcClient {
    async fn create_order(
        &self,
        ctx: &CancellationToken,
        request: &OrderRequest,
    ) -> Result<Order, ExchangeError> {
        let params = order_params(request)?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let body = self
            .send(ctx, Method::POST, "/api/v3/order", params, true)
            .await?;
        let ack: OrderAck =
            serde_json::from_str(&body).map_err(ExchangeError::decode("MexcClient::create_order"))?;

        let order = ack.into_order(&request.pair, Some(request))?;
        tracing::info!(
            symbol = %order.pair,
            order_id = %order.id,
            side = ?order.side,
            price = %order.price,
            quantity = %order.quantity,
            "Order created"
        );
        Ok(order)
    }

    async fn create_batch_orders(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        requests: &[OrderRequest],
    ) -> Result<Vec<Order>, ExchangeError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let entries = requests
            .iter()
            .map(|r| {
                order_params(r).map(|fields| {
                    fields
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                        .collect::<serde_json::Map<_, _>>()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let batch = serde_json::to_string(&entries)
            .map_err(ExchangeError::decode("MexcClient::create_batch_orders"))?;

        let body = self
            .send(
                ctx,
                Method::POST,
                "/api/v3/batchOrders",
                vec![("batchOrders".to_string(), batch)],
                true,
            )
            .await?;
        let results: Vec<BatchEntry> = serde_json::from_str(&body)
            .map_err(ExchangeError::decode("MexcClient::create_batch_orders"))?;

        let mut placed = Vec::with_capacity(results.len());
        let mut first_failure = None;
        for (entry, request) in results.into_iter().zip(requests) {
            match entry {
                BatchEntry::Placed(ack) => placed.push(ack.into_order(pair, Some(request))?),
                BatchEntry::Failed { code, msg } => {
                    tracing::warn!(symbol = %pair, code, "Batch order entry rejected: {}", msg);
                    first_failure.get_or_insert(ExchangeError::Rejected {
                        status: 200,
                        code: Some(code),
                        message: msg,
                    });
                }
            }
        }

        match first_failure {
            Some(e) => {
                tracing::warn!(
                    symbol = %pair,
                    placed = placed.len(),
                    requested = requests.len(),
                    "Batch only partially placed"
                );
                Err(e)
            }
            None => Ok(placed),
        }
    }

    async fn cancel_all_orders(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Vec<Order>, ExchangeError> {
        let body = self
            .send(
                ctx,
                Method::DELETE,
                "/api/v3/openOrders",
                vec![("symbol".to_string(), pair.symbol())],
                true,
            )
            .await?;
        let acks: Vec<OrderAck> = serde_json::from_str(&body)
            .map_err(ExchangeError::decode("MexcClient::cancel_all_orders"))?;

        acks.into_iter().map(|ack| ack.into_order(pair, None)).collect()
    }

    async fn get_price(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Decimal, ExchangeError> {
        let body = self
            .send(
                ctx,
                Method::GET,
                "/api/v3/ticker/price",
                vec![("symbol".to_string(), pair.symbol())],
                false,
            )
            .await?;
        let ticker: TickerPrice =
            serde_json::from_str(&body).map_err(ExchangeError::decode("MexcClient::get_price"))?;

        parse_decimal("price", &ticker.price)
    }

    async fn get_candles(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), pair.symbol()),
            ("interval".to_string(), wire::interval_to_wire(interval)?.to_string()),
            ("limit".to_string(), self.candle_limit.to_string()),
        ];
        let body = self
            .send(ctx, Method::GET, "/api/v3/klines", params, false)
            .await?;
        let rows: Vec<Vec<serde_json::Value>> =
            serde_json::from_str(&body).map_err(ExchangeError::decode("MexcClient::get_candles"))?;

        let mut candles = rows
            .iter()
            .map(|row| parse_candle(row, interval))
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn get_balance(
        &self,
        ctx: &CancellationToken,
        currency: &str,
    ) -> Result<Decimal, ExchangeError> {
        self.get_balances(ctx)
            .await?
            .into_iter()
            .find(|b| b.currency.eq_ignore_ascii_case(currency))
            .map(|b| b.free)
            .ok_or_else(|| ExchangeError::AssetNotFound(currency.to_string()))
    }
}

impl OrderAck {
    /// Build the domain order, falling back to the request for fields the
    /// acknowledgment leaves out
    fn into_order(
        self,
        pair: &CurrencyPair,
        request: Option<&OrderRequest>,
    ) -> Result<Order, ExchangeError> {
        let side = match (&self.side, request) {
            (Some(side), _) => wire::side_from_wire(side)?,
            (None, Some(r)) => r.side,
            (None, None) => return Err(ExchangeError::UnknownSide(String::new())),
        };
        let order_type = match (&self.order_type, request) {
            (Some(t), _) => wire::type_from_wire(t)?,
            (None, Some(r)) => r.order_type,
            (None, None) => return Err(ExchangeError::UnknownType(String::new())),
        };
        let price = match (&self.price, request) {
            (Some(p), _) => parse_decimal("price", p)?,
            (None, Some(r)) => r.price,
            (None, None) => Decimal::ZERO,
        };
        let quantity = match (&self.orig_qty, request) {
            (Some(q), _) => parse_decimal("origQty", q)?,
            (None, Some(r)) => r.quantity,
            (None, None) => Decimal::ZERO,
        };

        let mut order = Order {
            id: self.order_id,
            pair: pair.clone(),
            side,
            order_type,
            price,
            quantity,
            status: OrderStatus::New,
        };
        if let Some(status) = &self.status {
            order.apply_status(wire::status_from_wire(status)?);
        }
        Ok(order)
    }
}

/// Order fields in wire form, amounts as 6-decimal strings; market orders
/// carry no price
fn order_params(request: &OrderRequest) -> Result<Vec<(&'static str, String)>, ExchangeError> {
    let mut params = vec![
        ("symbol", request.pair.symbol()),
        ("side", wire::side_to_wire(request.side)?.to_string()),
        ("type", wire::type_to_wire(request.order_type)?.to_string()),
        ("quantity", format_quantity(request.quantity)),
    ];
    if request.order_type != OrderType::Market {
        params.push(("price", format_price(request.price)));
    }
    Ok(params)
}

/// Quantities are cut, never rounded up past what the account holds
pub fn format_quantity(value: Decimal) -> String {
    let cut = value.round_dp_with_strategy(WIRE_DECIMALS, RoundingStrategy::ToZero);
    format!("{:.6}", cut)
}

pub fn format_price(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(WIRE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.6}", rounded)
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(value.trim()).map_err(|_| ExchangeError::Parse {
        field,
        value: value.to_string(),
    })
}

fn value_to_f64(field: &'static str, value: &serde_json::Value) -> Result<f64, ExchangeError> {
    let parsed = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Parse {
        field,
        value: value.to_string(),
    })
}

fn value_to_time(field: &'static str, value: &serde_json::Value) -> Result<DateTime<Utc>, ExchangeError> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ExchangeError::Parse {
            field,
            value: value.to_string(),
        })
}

/// `[openTime, open, high, low, close, volume, closeTime, assetVolume, ...]`
fn parse_candle(row: &[serde_json::Value], interval: CandleInterval) -> Result<Candle, ExchangeError> {
    if row.len() < 8 {
        return Err(ExchangeError::Parse {
            field: "kline",
            value: serde_json::Value::Array(row.to_vec()).to_string(),
        });
    }

    Ok(Candle {
        open_time: value_to_time("openTime", &row[0])?,
        open: value_to_f64("open", &row[1])?,
        high: value_to_f64("high", &row[2])?,
        low: value_to_f64("low", &row[3])?,
        close: value_to_f64("close", &row[4])?,
        volume: value_to_f64("volume", &row[5])?,
        close_time: value_to_time("closeTime", &row[6])?,
        asset_volume: value_to_f64("assetVolume", &row[7])?,
        interval,
    })
}

fn rejection(status: u16, body: String) -> ExchangeError {
    let client_error = (400..500).contains(&status) && status != 429;
    match serde_json::from_str::<ApiFailure>(&body) {
        Ok(failure) if client_error => ExchangeError::Rejected {
            status,
            code: Some(failure.code),
            message: failure.msg,
        },
        _ => ExchangeError::Http { status, body },
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::balance_or_zero;
    use crate::gateway::QuotaTracker;
    use crate::models::OrderSide;
    use mockito::Matcher;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn client(base_url: &str) -> MexcClient {
        let config = ExchangeConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            request_timeout_ms: 2_000,
            ..Default::default()
        };
        let quota = Arc::new(QuotaTracker::new(
            Duration::from_secs(10),
            100,
            Duration::from_millis(10),
        ));
        MexcClient::new(&config, RequestGateway::with_quota(2, 8, quota)).unwrap()
    }

    fn pair() -> CurrencyPair {
        CurrencyPair::new("XYZ", "USDT")
    }

    #[test]
    fn test_wire_amounts_have_six_decimals() {
        assert_eq!(format_price(dec!(10.5)), "10.500000");
        assert_eq!(format_price(dec!(0.0000005)), "0.000001");
        assert_eq!(format_quantity(dec!(1.2) / dec!(10.5)), "0.114285");
        assert_eq!(format_quantity(dec!(3)), "3.000000");
    }

    #[test]
    fn test_market_order_omits_price() {
        let mut request = OrderRequest {
            pair: pair(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            price: dec!(9.5),
            quantity: dec!(0.114285),
        };
        let market = order_params(&request).unwrap();
        assert!(market.iter().all(|(key, _)| *key != "price"));
        assert!(market.contains(&("type", "MARKET".to_string())));

        request.order_type = OrderType::Limit;
        let limit = order_params(&request).unwrap();
        assert!(limit.contains(&("price", "9.500000".to_string())));
    }

    #[test]
    fn test_parse_candle_row() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1700000040000,"1.0","1.5","0.9","1.2","1000",1700000099999,"1200"]"#,
        )
        .unwrap();

        let candle = parse_candle(&row, CandleInterval::OneMinute).unwrap();
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_000_040_000);
        assert_eq!(candle.close_time.timestamp_millis(), 1_700_000_099_999);
        assert_eq!(candle.high, 1.5);
        assert_eq!(candle.asset_volume, 1200.0);

        let short: Vec<serde_json::Value> = serde_json::from_str("[1,2,3]").unwrap();
        assert!(matches!(
            parse_candle(&short, CandleInterval::OneMinute),
            Err(ExchangeError::Parse { field: "kline", .. })
        ));
    }

    #[tokio::test]
    async fn test_get_price_is_public() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "XYZUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"XYZUSDT","price":"10.25"}"#)
            .create_async()
            .await;

        let price = client(&server.url())
            .get_price(&CancellationToken::new(), &pair())
            .await
            .unwrap();

        assert_eq!(price, dec!(10.25));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_order_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "XYZUSDT".into()),
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("type".into(), "LIMIT".into()),
                Matcher::UrlEncoded("price".into(), "10.500000".into()),
                Matcher::UrlEncoded("quantity".into(), "0.114285".into()),
                Matcher::Regex(r"timestamp=\d{13}".into()),
                Matcher::Regex(r"signature=[0-9a-f]{64}$".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"symbol":"XYZUSDT","orderId":"C02__1","price":"10.5","origQty":"0.114285","type":"LIMIT","side":"BUY","transactTime":1700000000000}"#,
            )
            .create_async()
            .await;

        let request = OrderRequest {
            pair: pair(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(10.5),
            quantity: dec!(1.2) / dec!(10.5),
        };
        let order = client(&server.url())
            .create_order(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(order.id, "C02__1");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.quantity, dec!(0.114285));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_balance_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"balances":[{"asset":"USDT","free":"12.5","locked":"0"},{"asset":"XYZ","free":"3.25","locked":"1"}]}"#,
            )
            .expect_at_least(1)
            .create_async()
            .await;

        let client = client(&server.url());
        let ctx = CancellationToken::new();

        assert_eq!(client.get_balance(&ctx, "XYZ").await.unwrap(), dec!(3.25));
        let missing = client.get_balance(&ctx, "ABC").await.unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(balance_or_zero(&client, &ctx, "ABC").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_candles_come_back_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("interval".into(), "1m".into()),
                Matcher::UrlEncoded("limit".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[[1700000100000,"2","3","1","2.5","10",1700000159999,"25"],
                    [1700000040000,"1","2","1","1.5","10",1700000099999,"15"]]"#,
            )
            .create_async()
            .await;

        let candles = client(&server.url())
            .get_candles(&CancellationToken::new(), &pair(), CandleInterval::OneMinute)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[1].high, 3.0);
    }

    #[tokio::test]
    async fn test_error_statuses_are_mapped() {
        let mut server = mockito::Server::new_async().await;
        let _rejected = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":30004,"msg":"Insufficient position"}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = client(&server.url());
        let ctx = CancellationToken::new();
        let request = OrderRequest {
            pair: pair(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            price: dec!(1),
            quantity: dec!(1),
        };

        let err = client.create_order(&ctx, &request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { status: 400, code: Some(30004), .. }));
        assert!(!err.is_retryable());

        let err = client.get_price(&ctx, &pair()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Http { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_carries_context() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .get_price(&CancellationToken::new(), &pair())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("MexcClient::get_price"));
    }

    #[tokio::test]
    async fn test_batch_orders_report_rejected_entries() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v3/batchOrders")
            .match_query(Matcher::Regex("batchOrders=".into()))
            .with_status(200)
            .with_body(r#"[{"orderId":"1","price":"21","origQty":"1","type":"LIMIT","side":"SELL"},{"code":30005,"msg":"Oversold"}]"#)
            .create_async()
            .await;

        let rung = |price| OrderRequest {
            pair: pair(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            price,
            quantity: dec!(1),
        };
        let err = client(&server.url())
            .create_batch_orders(&CancellationToken::new(), &pair(), &[rung(dec!(21)), rung(dec!(22))])
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::Rejected { code: Some(30005), .. }));
    }

    #[tokio::test]
    async fn test_cancel_all_returns_canceled_orders() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/api/v3/openOrders")
            .match_query(Matcher::UrlEncoded("symbol".into(), "XYZUSDT".into()))
            .with_status(200)
            .with_body(r#"[{"symbol":"XYZUSDT","orderId":"7","price":"21","origQty":"1","type":"LIMIT","side":"SELL","status":"CANCELED"}]"#)
            .create_async()
            .await;

        let canceled = client(&server.url())
            .cancel_all_orders(&CancellationToken::new(), &pair())
            .await
            .unwrap();

        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].status, OrderStatus::Canceled);
        assert_eq!(canceled[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_waiting() {
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = client("http://127.0.0.1:9")
            .get_price(&ctx, &pair())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Gateway(crate::gateway::GatewayError::Cancelled)
        ));
    }
}
