use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, SessionEvent};
use super::ladder::{self, LadderError};
use super::monitor::{MonitorLoop, Pacer};
use super::session::{SessionError, SessionPhase, SessionReport, TradeSession};
use crate::api::{balance_or_zero, Exchange};
use crate::clock::WallClock;
use crate::config::{AppConfig, StrategyConfig};
use crate::models::{CurrencyPair, Order, OrderType};
use crate::risk::ExitReason;

/// Attempts of the whole liquidation when a step fails transiently
const EXIT_ATTEMPTS: u32 = 3;
const EXIT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Strategy numbers in the form the engine trades with
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub spend_budget: Decimal,
    pub buy_skews: Vec<Decimal>,
    pub buy_timeout: Duration,
    pub sell_skew: Decimal,
    pub ladder_coefficients: Vec<Decimal>,
    pub quantity_precision: u32,
    pub fill_poll_interval: Duration,
    pub fill_timeout: Duration,
    pub exit_order_type: OrderType,
    pub exit_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(strategy: &StrategyConfig) -> Result<Self> {
        let settings = Self {
            spend_budget: strategy.spend_budget(),
            buy_skews: strategy.buy_skews(),
            buy_timeout: strategy.buy_timeout(),
            sell_skew: strategy.sell_skew(),
            ladder_coefficients: strategy.ladder_coefficients(),
            quantity_precision: strategy.quantity_precision,
            fill_poll_interval: strategy.fill_poll_interval(),
            fill_timeout: strategy.fill_timeout(),
            exit_order_type: strategy.exit_order_type()?,
            exit_timeout: strategy.exit_timeout(),
        };
        ensure!(
            settings.spend_budget > Decimal::ZERO,
            "spend budget does not convert to a positive decimal"
        );
        ensure!(!settings.buy_skews.is_empty(), "no buy skews configured");
        Ok(settings)
    }
}

/// What the exit managed to do
#[derive(Debug, Default)]
struct Liquidation {
    canceled: usize,
    order: Option<Order>,
}

/// Runs trade sessions against one exchange account
///
/// Each session buys, waits for the fill, places the sell ladder and
/// monitors the position. Whatever happens on the way, including a panic,
/// the exit runs afterwards: cancel everything on the pair and sell what
/// is left.
pub struct TradeEngine<E: ?Sized> {
    exchange: Arc<E>,
    settings: Arc<EngineSettings>,
    monitor: Arc<MonitorLoop>,
    clock: Arc<dyn WallClock>,
    events: EventSink,
}

impl<E: ?Sized> Clone for TradeEngine<E> {
    fn clone(&self) -> Self {
        Self {
            exchange: self.exchange.clone(),
            settings: self.settings.clone(),
            monitor: self.monitor.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
        }
    }
}

impl<E: Exchange + ?Sized + 'static> TradeEngine<E> {
    pub fn new(
        exchange: Arc<E>,
        settings: EngineSettings,
        monitor: MonitorLoop,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            exchange,
            settings: Arc::new(settings),
            monitor: Arc::new(monitor),
            clock,
            events: EventSink::disabled(),
        }
    }

    pub fn from_config(
        exchange: Arc<E>,
        config: &AppConfig,
        clock: Arc<dyn WallClock>,
    ) -> Result<Self> {
        let settings = EngineSettings::from_config(&config.strategy)?;
        let monitor = MonitorLoop::new(&config.monitor, clock.clone());
        Ok(Self::new(exchange, settings, monitor, clock))
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one full session for `pair`.
    ///
    /// Never fails as a whole: errors end up in the report. Cancelling `ctx`
    /// stops the trading phases, the exit still runs on its own token. The
    /// session lives in its own task, so dropping this future before it
    /// completes leaves the session running through its exit.
    pub async fn run_session(&self, pair: CurrencyPair, ctx: &CancellationToken) -> SessionReport {
        let session = TradeSession::new(pair, self.clock.now_utc());
        let (id, pair) = (session.id, session.pair.clone());
        tracing::info!(session = %id, symbol = %pair, "🚀 Session started");

        let supervisor = tokio::spawn(self.clone().supervise(session, ctx.clone()));
        match supervisor.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(
                    session = %id,
                    symbol = %pair,
                    error = %e,
                    "🚨 Session supervisor panicked, position is UNMANAGED"
                );
                SessionReport {
                    id,
                    pair,
                    entry_price: None,
                    quantity_bought: Decimal::ZERO,
                    exit_reason: ExitReason::SessionFailed,
                    canceled_orders: 0,
                    exit_order: None,
                    error: Some(SessionError::Panicked),
                    exit_error: Some(SessionError::Panicked),
                }
            }
        }
    }

    /// Trading phases in a child task, then the exit no matter how they ended
    async fn supervise(self, session: TradeSession, ctx: CancellationToken) -> SessionReport {
        let (id, pair, started_at) = (session.id, session.pair.clone(), session.started_at);

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut session = session;
            let outcome = engine.trade(&mut session, &ctx).await;
            (session, outcome)
        });

        let (mut session, outcome) = match handle.await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(session = %id, symbol = %pair, error = %e, "Session task panicked");
                let mut fallback = TradeSession::new(pair.clone(), started_at);
                fallback.id = id;
                (fallback, Err(SessionError::Panicked))
            }
        };

        let (exit_reason, error) = match outcome {
            Ok(reason) => (reason, None),
            Err(SessionError::Cancelled) => (ExitReason::Cancelled, Some(SessionError::Cancelled)),
            Err(e) => {
                tracing::error!(session = %id, symbol = %pair, error = %e, "Session failed");
                (ExitReason::SessionFailed, Some(e))
            }
        };

        if let Err(e) = self.advance(&mut session, SessionPhase::Exiting) {
            tracing::warn!(session = %id, error = %e, "Unexpected phase before exit");
        }
        tracing::info!(session = %id, symbol = %pair, reason = %exit_reason, "Exiting position");
        self.events.emit(SessionEvent::ExitTriggered {
            session_id: id,
            reason: exit_reason,
        });

        let (liquidation, exit_error) = match self.guaranteed_exit(&pair).await {
            Ok(liquidation) => (liquidation, None),
            Err(e) => {
                tracing::error!(
                    session = %id,
                    symbol = %pair,
                    error = %e,
                    "🚨 Exit failed, position is UNMANAGED"
                );
                (Liquidation::default(), Some(e))
            }
        };

        if let Err(e) = self.advance(&mut session, SessionPhase::Done) {
            tracing::warn!(session = %id, error = %e, "Unexpected phase after exit");
        }
        let sold_quantity = liquidation
            .order
            .as_ref()
            .map(|o| o.quantity)
            .unwrap_or_default();
        self.events.emit(SessionEvent::SessionClosed {
            session_id: id,
            sold_quantity,
            clean: error.is_none() && exit_error.is_none(),
        });
        tracing::info!(
            session = %id,
            symbol = %pair,
            sold = %sold_quantity,
            canceled = liquidation.canceled,
            "✅ Session closed"
        );

        SessionReport {
            id,
            pair,
            entry_price: session.entry_price,
            quantity_bought: session.quantity_bought,
            exit_reason,
            canceled_orders: liquidation.canceled,
            exit_order: liquidation.order,
            error,
            exit_error,
        }
    }

    fn advance(&self, session: &mut TradeSession, phase: SessionPhase) -> Result<(), SessionError> {
        session.advance(phase)?;
        self.events.emit(SessionEvent::PhaseChanged {
            session_id: session.id,
            phase,
        });
        Ok(())
    }

    fn record_orders(&self, session: &TradeSession, orders: &[Order]) {
        for order in orders {
            self.events.emit(SessionEvent::OrderPlaced {
                session_id: session.id,
                order: order.clone(),
            });
        }
    }

    /// Buy, confirm, ladder, monitor
    async fn trade(
        &self,
        session: &mut TradeSession,
        ctx: &CancellationToken,
    ) -> Result<ExitReason, SessionError> {
        let pair = session.pair.clone();
        self.advance(session, SessionPhase::AwaitingBuyFill)?;

        let reference = self
            .exchange
            .get_price(ctx, &pair)
            .await
            .map_err(|e| cancelled_or(ctx, e, "fetch reference price"))?;

        let buys = self.place_buys(ctx, &pair, reference).await?;
        self.record_orders(session, &buys);
        session.record_buys(&buys);
        let entry_price = session
            .entry_price
            .ok_or(SessionError::Ladder(LadderError::NonPositivePrice(Decimal::ZERO)))?;
        tracing::info!(
            symbol = %pair,
            reference = %reference,
            entry = %entry_price,
            quantity = %session.quantity_bought,
            "💰 Buy placed"
        );

        let held = self.await_fill(ctx, &pair, session.quantity_bought).await?;
        self.advance(session, SessionPhase::ExitLadderPlaced)?;

        let rungs = ladder::sell_ladder(
            &pair,
            entry_price,
            held,
            &self.settings.ladder_coefficients,
            self.settings.quantity_precision,
        )?;
        let placed = self
            .exchange
            .create_batch_orders(ctx, &pair, &rungs)
            .await
            .map_err(|e| cancelled_or(ctx, e, "place sell ladder"))?;
        self.record_orders(session, &placed);
        session.orders.extend(placed);
        tracing::info!(symbol = %pair, held = %held, rungs = rungs.len(), "📈 Sell ladder placed");

        self.advance(session, SessionPhase::Monitoring)?;
        let reason = self.monitor.run(&*self.exchange, ctx, session).await;
        tracing::info!(symbol = %pair, reason = %reason, "Monitor exit condition");
        Ok(reason)
    }

    /// One limit buy per configured skew, placed concurrently with the
    /// budget split evenly. Failed or timed-out placements are dropped.
    async fn place_buys(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        reference: Decimal,
    ) -> Result<Vec<Order>, SessionError> {
        let skews = &self.settings.buy_skews;
        let share = self.settings.spend_budget / Decimal::from(skews.len().max(1));

        let mut pending = JoinSet::new();
        for skew in skews {
            let request = ladder::buy_order(pair, reference, *skew, share)?;
            let exchange = self.exchange.clone();
            let ctx = ctx.clone();
            let timeout = self.settings.buy_timeout;
            pending.spawn(async move {
                let placed = tokio::time::timeout(timeout, exchange.create_order(&ctx, &request)).await;
                (request, placed)
            });
        }

        let mut orders = Vec::new();
        let mut last_error = None;
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(Ok(order)))) => orders.push(order),
                Ok((request, Ok(Err(e)))) => {
                    tracing::warn!(symbol = %pair, price = %request.price, error = %e, "Buy placement failed");
                    last_error = Some(e);
                }
                Ok((request, Err(_))) => {
                    tracing::warn!(
                        symbol = %pair,
                        price = %request.price,
                        timeout_ms = self.settings.buy_timeout.as_millis() as u64,
                        "Buy placement timed out"
                    );
                }
                Err(e) => tracing::warn!(symbol = %pair, error = %e, "Buy placement task failed"),
            }
        }

        if ctx.is_cancelled() && orders.is_empty() {
            return Err(SessionError::Cancelled);
        }
        match (orders.is_empty(), last_error) {
            (false, _) => Ok(orders),
            (true, Some(e)) => Err(SessionError::Exchange {
                stage: "place buy",
                source: e,
            }),
            (true, None) => Err(SessionError::NoBuyPlaced),
        }
    }

    /// Poll the asset balance until it covers `target` (compared after
    /// rounding both up to whole units)
    async fn await_fill(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
        target: Decimal,
    ) -> Result<Decimal, SessionError> {
        let pacer = Pacer::new(self.settings.fill_poll_interval);
        let poll = async {
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(SessionError::Cancelled),
                    _ = pacer.tick() => {}
                }

                let held = balance_or_zero(&*self.exchange, ctx, &pair.asset)
                    .await
                    .map_err(|e| cancelled_or(ctx, e, "confirm fill"))?;
                if held > Decimal::ZERO && held.ceil() >= target.ceil() {
                    tracing::info!(symbol = %pair, held = %held, target = %target, "Buy filled");
                    return Ok(held);
                }
                tracing::debug!(symbol = %pair, held = %held, target = %target, "Waiting for fill");
            }
        };

        tokio::time::timeout(self.settings.fill_timeout, poll)
            .await
            .unwrap_or(Err(SessionError::FillTimeout(self.settings.fill_timeout)))
    }

    /// Exit on a fresh token, bounded by the exit timeout, run as its own
    /// task so a panic in it is still reported
    async fn guaranteed_exit(&self, pair: &CurrencyPair) -> Result<Liquidation, SessionError> {
        let exit_ctx = CancellationToken::new();
        let engine = self.clone();
        let task_ctx = exit_ctx.clone();
        let task_pair = pair.clone();
        let timeout = self.settings.exit_timeout;

        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, engine.liquidate(&task_ctx, &task_pair)).await
        });

        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                exit_ctx.cancel();
                Err(SessionError::Exchange {
                    stage: "exit",
                    source: crate::gateway::GatewayError::DeadlineExceeded(timeout).into(),
                })
            }
            Err(e) => {
                tracing::error!(symbol = %pair, error = %e, "Exit task panicked");
                Err(SessionError::Panicked)
            }
        }
    }

    async fn liquidate(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Liquidation, SessionError> {
        let mut attempt = 1;
        loop {
            match self.liquidate_once(ctx, pair).await {
                Err(e) if e.is_retryable() && attempt < EXIT_ATTEMPTS => {
                    tracing::warn!(symbol = %pair, attempt, error = %e, "Exit attempt failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(EXIT_RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    /// Cancel all, re-read the balance, sell whatever is held
    async fn liquidate_once(
        &self,
        ctx: &CancellationToken,
        pair: &CurrencyPair,
    ) -> Result<Liquidation, SessionError> {
        let canceled = match self.exchange.cancel_all_orders(ctx, pair).await {
            Ok(orders) => orders.len(),
            Err(e) => {
                tracing::warn!(symbol = %pair, error = %e, "Cancel all failed, continuing exit");
                0
            }
        };

        let held = balance_or_zero(&*self.exchange, ctx, &pair.asset)
            .await
            .map_err(SessionError::exchange("exit balance"))?;
        if held <= Decimal::ZERO {
            tracing::info!(symbol = %pair, "Nothing to sell");
            return Ok(Liquidation {
                canceled,
                order: None,
            });
        }

        let price = self
            .exchange
            .get_price(ctx, pair)
            .await
            .map_err(SessionError::exchange("exit price"))?;
        let Some(request) = ladder::exit_order(
            pair,
            price,
            self.settings.sell_skew,
            held,
            self.settings.exit_order_type,
        ) else {
            return Ok(Liquidation {
                canceled,
                order: None,
            });
        };

        let order = self
            .exchange
            .create_order(ctx, &request)
            .await
            .map_err(SessionError::exchange("exit sell"))?;
        tracing::info!(
            symbol = %pair,
            price = %order.price,
            quantity = %order.quantity,
            "💸 Exit sell placed"
        );
        Ok(Liquidation {
            canceled,
            order: Some(order),
        })
    }
}

fn cancelled_or(
    ctx: &CancellationToken,
    error: crate::api::ExchangeError,
    stage: &'static str,
) -> SessionError {
    if ctx.is_cancelled() {
        SessionError::Cancelled
    } else {
        SessionError::Exchange {
            stage,
            source: error,
        }
    }
}
