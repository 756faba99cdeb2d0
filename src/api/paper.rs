use async_trait::async_trait;
use chrono::{DurationRound, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::{Exchange, ExchangeError};
use crate::gateway::GatewayError;
use crate::models::{
    Candle, CandleInterval, CurrencyPair, Order, OrderRequest, OrderSide, OrderStatus, OrderType,
};

/// Simulated spot account for dry runs and tests
///
/// Marketable orders fill at their limit price, other orders rest and lock
/// funds until they are crossed or canceled. Bought amounts become visible
/// in balances only after `fill_delay_polls` balance lookups.
///
/// Prices come from a script per pair, or from a live exchange when one is
/// attached with [`PaperExchange::with_market_data`].
pub struct PaperExchange {
    state: Mutex<PaperState>,
    market: Option<Arc<dyn Exchange>>,
}

#[derive(Default)]
struct Holding {
    free: Decimal,
    locked: Decimal,
}

#[derive(Default)]
struct PaperState {
    prices: HashMap<String, VecDeque<Decimal>>,
    last_price: HashMap<String, Decimal>,
    minute_high: HashMap<String, (i64, Decimal)>,
    candles: HashMap<String, Vec<Candle>>,
    holdings: HashMap<String, Holding>,
    open_orders: Vec<Order>,
    history: Vec<Order>,
    pending_fills: Vec<(String, Decimal, u32)>,
    fill_delay_polls: u32,
    next_id: u64,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            market: None,
        }
    }

    /// Read prices and candles from `market` instead of the script
    pub fn with_market_data(mut self, market: Arc<dyn Exchange>) -> Self {
        self.market = Some(market);
        self
    }

    pub fn with_balance(self, currency: &str, amount: Decimal) -> Self {
        self.lock()
            .holdings
            .entry(currency.to_uppercase())
            .or_default()
            .free += amount;
        self
    }

    /// Delay before bought amounts show up in balance lookups
    pub fn with_fill_delay(self, polls: u32) -> Self {
        self.lock().fill_delay_polls = polls;
        self
    }

    /// Script the prices returned for `pair`; the last one repeats
    pub fn set_prices(&self, pair: &CurrencyPair, prices: impl IntoIterator<Item = Decimal>) {
        self.lock()
            .prices
            .insert(pair.symbol(), prices.into_iter().collect());
    }

    /// Fix the candles returned for `pair` instead of synthesizing them
    pub fn set_candles(&self, pair: &CurrencyPair, candles: Vec<Candle>) {
        self.lock().candles.insert(pair.symbol(), candles);
    }

    /// Every order placed so far, in placement order
    pub fn orders(&self) -> Vec<Order> {
        self.lock().history.clone()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.lock().open_orders.clone()
    }

    /// Free amount, ignoring fill delay
    pub fn free_balance(&self, currency: &str) -> Decimal {
        self.lock()
            .holdings
            .get(&currency.to_uppercase())
            .map(|h| h.free)
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_live(ctx: &CancellationToken) -> Result<(), ExchangeError> {
    if ctx.is_cancelled() {
        return Err(ExchangeError::Gateway(GatewayError::Cancelled));
    }
    Ok(())
}

fn rejected(message: &str) -> ExchangeError {
    ExchangeError::Rejected {
        status: 400,
        code: None,
        message: message.to_string(),
    }
}

impl PaperState {
    /// Last price handed out, or the first scripted one before any lookup
    fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.last_price
            .get(symbol)
            .copied()
            .or_else(|| self.prices.get(symbol).and_then(|s| s.front().copied()))
            .ok_or_else(|| rejected("Invalid symbol"))
    }

    fn next_price(&mut self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let script = self
            .prices
            .get_mut(symbol)
            .ok_or_else(|| rejected("Invalid symbol"))?;
        let price = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        }
        .ok_or_else(|| rejected("Invalid symbol"))?;
        self.observe(symbol, price);
        Ok(price)
    }

    fn observe(&mut self, symbol: &str, price: Decimal) {
        self.last_price.insert(symbol.to_string(), price);
        let minute = Utc::now().timestamp() / 60;
        let entry = self
            .minute_high
            .entry(symbol.to_string())
            .or_insert((minute, price));
        if entry.0 != minute {
            *entry = (minute, price);
        } else if price > entry.1 {
            entry.1 = price;
        }
    }

    fn holding(&mut self, currency: &str) -> &mut Holding {
        self.holdings.entry(currency.to_string()).or_default()
    }

    fn place(&mut self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        if request.quantity <= Decimal::ZERO || request.price <= Decimal::ZERO {
            return Err(rejected("Invalid quantity or price"));
        }

        let symbol = request.pair.symbol();
        let market = self.current_price(&symbol)?;
        self.next_id += 1;
        let mut order = Order::from_request(format!("paper-{}", self.next_id), request);
        let is_market = request.order_type == OrderType::Market;

        match request.side {
            OrderSide::Buy => {
                let cost = request.notional();
                let quote = self.holding(&request.pair.quote);
                if quote.free < cost {
                    return Err(rejected("Insufficient balance"));
                }
                quote.free -= cost;

                if is_market || request.price >= market {
                    let delay = self.fill_delay_polls;
                    self.pending_fills
                        .push((request.pair.asset.clone(), request.quantity, delay));
                    order.apply_status(OrderStatus::Filled);
                } else {
                    self.holding(&request.pair.quote).locked += cost;
                    self.open_orders.push(order.clone());
                }
            }
            OrderSide::Sell => {
                let asset = self.holding(&request.pair.asset);
                if asset.free < request.quantity {
                    return Err(rejected("Insufficient position"));
                }
                asset.free -= request.quantity;

                if is_market || request.price <= market {
                    self.holding(&request.pair.quote).free += request.notional();
                    order.apply_status(OrderStatus::Filled);
                } else {
                    self.holding(&request.pair.asset).locked += request.quantity;
                    self.open_orders.push(order.clone());
                }
            }
        }

        self.history.push(order.clone());
        Ok(order)
    }

    /// Fill resting orders crossed by `price`
    fn cross_resting(&mut self, pair_symbol: &str, price: Decimal) {
        let (crossed, resting): (Vec<Order>, Vec<Order>) =
            std::mem::take(&mut self.open_orders)
                .into_iter()
                .partition(|o| {
                    o.pair.symbol() == pair_symbol
                        && match o.side {
                            OrderSide::Sell => o.price <= price,
                            OrderSide::Buy => o.price >= price,
                        }
                });
        self.open_orders = resting;

        for mut order in crossed {
            let notional = order.price * order.quantity;
            match order.side {
                OrderSide::Sell => {
                    self.holding(&order.pair.asset).locked -= order.quantity;
                    self.holding(&order.pair.quote).free += notional;
                }
                OrderSide::Buy => {
                    self.holding(&order.pair.quote).locked -= notional;
                    self.holding(&order.pair.asset).free += order.quantity;
                }
            }
            order.apply_status(OrderStatus::Filled);
            tracing::debug!(order_id = %order.id, price = %order.price, "Paper order filled");
        }
    }

    fn settle_pending(&mut self) {
        let mut still_pending = Vec::new();
        for (currency, quantity, polls_left) in std::mem::take(&mut self.pending_fills) {
            if polls_left == 0 {
                self.holding(&currency).free += quantity;
            } else {
                still_pending.push((currency, quantity, polls_left - 1));
            }
        }
        self.pending_fills = still_pending;
    }

    fn synthesized_candle(&self, symbol: &str) -> Vec<Candle> {
        let now = Utc::now();
        let Ok(open_time) = now.duration_trunc(TimeDelta::minutes(1)) else {
            return Vec::new();
        };
        let minute = now.timestamp() / 60;
        let high = match self.minute_high.get(symbol) {
            Some((m, high)) if *m == minute => *high,
            _ => match self.current_price(symbol) {
                Ok(price) => price,
                Err(_) => return Vec::new(),
            },
        };
        let high = high.to_f64().unwrap_or_default();

        vec![Candle {
            open_time,
            close_time: open_time + TimeDelta::milliseconds(59_999),
            open: high,
            high,
            low: high,
            close: high,
            volume: 0.0,
            asset_volume: 0.0,
            interval: CandleInterval::OneMinute,
        }]
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn create_order(
        &self,
        ctx: &CancellationToken,
        request: &OrderRequest,
    ) -> Result<Order, ExchangeError> {
        ensure_live(ctx)?;
        let order = self.lock().place(request)?;
        tracing::info!(
            symbol = %order.pair,
            order_id = %order.id,
            side = ?order.side,
            price = %order.price,
            quantity = %order.quantity,
            status = ?order.status,
            "Paper order placed"
        );
        Ok(order)
    }

    async fn create_batch_orders(
        &self,
        ctx: &CancellationToken,
        _pair: &CurrencyPair,
        requests: &[OrderRequest],
    ) -> Result<Vec<Order>, ExchangeError> {
        ensure_live(ctx)?;
        let mut state = self.lock();
        requests.iter().map(|r| state.place(r)).collect()
    }

    async fn cancel_all_orders(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Vec<Order>, ExchangeError> {
        ensure_live(ctx)?;
        let mut state = self.lock();
        let symbol = pair.symbol();
        let (mut canceled, resting): (Vec<Order>, Vec<Order>) =
            std::mem::take(&mut state.open_orders)
                .into_iter()
                .partition(|o| o.pair.symbol() == symbol);
        state.open_orders = resting;

        for order in &mut canceled {
            match order.side {
                OrderSide::Sell => {
                    let asset = state.holding(&order.pair.asset);
                    asset.locked -= order.quantity;
                    asset.free += order.quantity;
                }
                OrderSide::Buy => {
                    let notional = order.price * order.quantity;
                    let quote = state.holding(&order.pair.quote);
                    quote.locked -= notional;
                    quote.free += notional;
                }
            }
            order.apply_status(OrderStatus::Canceled);
        }
        Ok(canceled)
    }

    async fn get_price(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Decimal, ExchangeError> {
        ensure_live(ctx)?;
        let symbol = pair.symbol();
        let live = match &self.market {
            Some(market) => Some(market.get_price(ctx, pair).await?),
            None => None,
        };

        let mut state = self.lock();
        let price = match live {
            Some(price) => {
                state.observe(&symbol, price);
                price
            }
            None => state.next_price(&symbol)?,
        };
        state.cross_resting(&symbol, price);
        Ok(price)
    }

    async fn get_candles(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>, ExchangeError> {
        ensure_live(ctx)?;
        if let Some(market) = &self.market {
            return market.get_candles(ctx, pair, interval).await;
        }
        if interval != CandleInterval::OneMinute {
            return Err(ExchangeError::UnknownInterval(format!("{interval:?}")));
        }
        let state = self.lock();
        let symbol = pair.symbol();
        Ok(match state.candles.get(&symbol) {
            Some(candles) => candles.clone(),
            None => state.synthesized_candle(&symbol),
        })
    }

    async fn get_balance(
        &self,
        ctx: &CancellationToken,
        currency: &str,
    ) -> Result<Decimal, ExchangeError> {
        ensure_live(ctx)?;
        let mut state = self.lock();
        state.settle_pending();
        state
            .holdings
            .get(&currency.to_uppercase())
            .map(|h| h.free)
            .ok_or_else(|| ExchangeError::AssetNotFound(currency.to_string()))
    }
}
