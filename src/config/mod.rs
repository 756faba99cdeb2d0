use anyhow::{ensure, Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::models::OrderType;

pub const DEFAULT_CONFIG_FILE: &str = "pumpbot.toml";
const ENV_PREFIX: &str = "PUMPBOT";

/// Full application configuration
///
/// Layered as: defaults, then the optional TOML file, then `PUMPBOT__*`
/// environment variables (`PUMPBOT__STRATEGY__SELL_SKEW=0.9`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub gateway: GatewayConfig,
    pub strategy: StrategyConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout_ms: u64,
    /// Candles fetched per poll; only the latest few are ever needed
    pub candle_limit: u32,
    pub quote_currency: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mexc.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            request_timeout_ms: 10_000,
            candle_limit: 10,
            quote_currency: "USDT".to_string(),
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub window_ms: u64,
    pub max_requests: usize,
    pub cooldown_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            window_ms: 10_000,
            max_requests: 500,
            cooldown_ms: 50,
        }
    }
}

impl GatewayConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Strategy knobs; every number here is tunable, none is a protocol constant
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Quote currency spent on the entry
    pub spend_budget: f64,
    /// One buy per skew; more than one places them concurrently
    pub buy_skews: Vec<f64>,
    pub buy_timeout_ms: u64,
    pub sell_skew: f64,
    /// Profit multiples of the ladder rungs (1.0 = +100%)
    pub ladder_coefficients: Vec<f64>,
    /// Decimal places of a ladder rung quantity
    pub quantity_precision: u32,
    pub fill_poll_interval_ms: u64,
    pub fill_timeout_ms: u64,
    pub exit_order_type: String,
    pub exit_timeout_ms: u64,
    pub max_signal_age_ms: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            spend_budget: 1.2,
            buy_skews: vec![1.05],
            buy_timeout_ms: 10_000,
            sell_skew: 0.95,
            ladder_coefficients: vec![1.0, 1.1, 1.2],
            quantity_precision: 2,
            fill_poll_interval_ms: 400,
            fill_timeout_ms: 30_000,
            exit_order_type: "limit".to_string(),
            exit_timeout_ms: 15_000,
            max_signal_age_ms: 10_000,
        }
    }
}

impl StrategyConfig {
    pub fn spend_budget(&self) -> Decimal {
        to_decimal(self.spend_budget)
    }

    pub fn buy_skews(&self) -> Vec<Decimal> {
        self.buy_skews.iter().copied().map(to_decimal).collect()
    }

    pub fn sell_skew(&self) -> Decimal {
        to_decimal(self.sell_skew)
    }

    pub fn ladder_coefficients(&self) -> Vec<Decimal> {
        self.ladder_coefficients.iter().copied().map(to_decimal).collect()
    }

    pub fn exit_order_type(&self) -> Result<OrderType> {
        self.exit_order_type
            .parse()
            .with_context(|| format!("invalid strategy.exit_order_type {:?}", self.exit_order_type))
    }

    pub fn buy_timeout(&self) -> Duration {
        Duration::from_millis(self.buy_timeout_ms)
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn max_signal_age(&self) -> Duration {
        Duration::from_millis(self.max_signal_age_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub max_iterations: u32,
    /// Second of the minute after which the position is closed
    pub cutoff_second: u32,
    /// Exit when price / candle high drops below this
    pub decline_threshold: f64,
    /// Exit when price / buy price exceeds this
    pub profit_cap: Option<f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_iterations: 10_000,
            cutoff_second: 42,
            decline_threshold: 1.0,
            profit_cap: Some(5.0),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

impl AppConfig {
    /// Load from `path` (optional file) and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::with_name(path.unwrap_or(DEFAULT_CONFIG_FILE))
                    .required(path.is_some()),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("strategy.buy_skews")
                    .with_list_parse_key("strategy.ladder_coefficients"),
            )
            .build()
            .context("Failed to read configuration")?;

        let mut app: AppConfig = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        // Credential names shared with the rest of the tooling
        if app.exchange.api_key.is_empty() {
            app.exchange.api_key = std::env::var("MEXC_API_KEY").unwrap_or_default();
        }
        if app.exchange.api_secret.is_empty() {
            app.exchange.api_secret = std::env::var("MEXC_API_SECRET").unwrap_or_default();
        }

        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        ensure!(
            s.spend_budget.is_finite() && s.spend_budget > 0.0,
            "strategy.spend_budget must be positive"
        );
        ensure!(!s.buy_skews.is_empty(), "strategy.buy_skews needs at least one entry");
        ensure!(
            s.buy_skews.iter().all(|k| k.is_finite() && *k > 0.0),
            "strategy.buy_skews must be positive"
        );
        ensure!(
            s.sell_skew.is_finite() && s.sell_skew > 0.0,
            "strategy.sell_skew must be positive"
        );
        ensure!(
            !s.ladder_coefficients.is_empty(),
            "strategy.ladder_coefficients needs at least one rung"
        );
        ensure!(
            s.ladder_coefficients.iter().all(|c| c.is_finite() && *c > -1.0),
            "strategy.ladder_coefficients must keep rung prices positive"
        );
        ensure!(s.quantity_precision <= 12, "strategy.quantity_precision is too large");
        s.exit_order_type()?;

        let m = &self.monitor;
        ensure!(m.cutoff_second < 60, "monitor.cutoff_second must be below 60");
        ensure!(
            m.decline_threshold.is_finite() && m.decline_threshold > 0.0,
            "monitor.decline_threshold must be positive"
        );
        if let Some(cap) = m.profit_cap {
            ensure!(cap.is_finite() && cap > 0.0, "monitor.profit_cap must be positive");
        }

        let g = &self.gateway;
        ensure!(g.workers > 0, "gateway.workers must be positive");
        ensure!(g.max_requests > 0, "gateway.max_requests must be positive");
        ensure!(g.window_ms > 0, "gateway.window_ms must be positive");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exchange.base_url, "https://api.mexc.com");
        assert_eq!(config.strategy.buy_skews(), vec![dec!(1.05)]);
        assert_eq!(
            config.strategy.ladder_coefficients(),
            vec![dec!(1.0), dec!(1.1), dec!(1.2)]
        );
        assert_eq!(config.strategy.sell_skew(), dec!(0.95));
        assert_eq!(config.strategy.exit_order_type().unwrap(), OrderType::Limit);
        assert_eq!(config.monitor.cutoff_second, 42);
    }

    #[test]
    fn test_rejects_bad_strategy_values() {
        let mut config = AppConfig::default();
        config.strategy.buy_skews.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.monitor.cutoff_second = 60;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.exit_order_type = "stop".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.spend_budget = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("pumpbot-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pumpbot.toml");
        std::fs::write(
            &path,
            r#"
[strategy]
spend_budget = 5.0
buy_skews = [1.05, 1.15, 1.25]
exit_order_type = "market"

[monitor]
cutoff_second = 50
profit_cap = 3.0
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.strategy.spend_budget(), dec!(5));
        assert_eq!(config.strategy.buy_skews.len(), 3);
        assert_eq!(config.strategy.exit_order_type().unwrap(), OrderType::Market);
        assert_eq!(config.monitor.cutoff_second, 50);
        assert_eq!(config.monitor.profit_cap, Some(3.0));
        // untouched sections keep their defaults
        assert_eq!(config.gateway.max_requests, 500);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
