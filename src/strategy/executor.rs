use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::decision::{
    is_paused, net_profit, pick_best_exit_cycle, should_dca, should_exit_by_profit_lock,
    total_exposure, update_circuit_breaker, update_profit_lock, DecisionParams,
};
use super::idempotency::IdempotencyManager;
use super::report::{
    BuyFill, BuyKind, ExecutionReport, ExitTarget, ExitTrigger, Outcome, SellFill, SkipReason,
};
use crate::config::{AppConfig, ExitMode};
use crate::domain::{
    ClaimOutcome, Cycle, Directive, IdempotencyStatus, Leg, MarketOrder, Position, ResultSummary,
    ValidatedRequest,
};
use crate::error::{ExecutorError, Result};
use crate::exchange::{floor_quantity, parse_fill, ExchangeGateway, OrderAck, SymbolAssets};
use crate::persistence::{PositionStore, Stores};

/// Millisecond wall clock, injectable for tests
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A failed run, and whether money already moved when it failed
#[derive(Debug)]
struct RunFailure {
    error: ExecutorError,
    money_moved: bool,
}

impl RunFailure {
    fn before_fill(error: ExecutorError) -> Self {
        Self {
            error,
            money_moved: false,
        }
    }
}

type RunResult = std::result::Result<ExecutionReport, RunFailure>;

/// Per-request values shared by the directive handlers
struct RunContext<'a> {
    rid: &'a str,
    request: &'a ValidatedRequest,
    key: &'a str,
    now_ms: i64,
    price: Decimal,
    paused: bool,
}

/// Webhook executor: claims the request, decides, trades and records the result
pub struct Executor {
    config: Arc<AppConfig>,
    params: DecisionParams,
    positions: Arc<dyn PositionStore>,
    idempotency: IdempotencyManager,
    gateway: Arc<dyn ExchangeGateway>,
    clock: Arc<dyn Clock>,
}

impl Executor {
    pub fn new(config: Arc<AppConfig>, stores: Stores, gateway: Arc<dyn ExchangeGateway>) -> Self {
        let params = config.decision_params();
        let idempotency =
            IdempotencyManager::new(stores.idempotency, config.store.idempotency_ttl_ms);
        Self {
            config,
            params,
            positions: stores.positions,
            idempotency,
            gateway,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn idempotency(&self) -> &IdempotencyManager {
        &self.idempotency
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Delete idempotency records whose TTL elapsed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now_ms = self.clock.now_ms();
        self.store_call(
            "idempotency cleanup",
            self.idempotency.cleanup_expired(now_ms),
        )
        .await
    }

    /// Sweep expired idempotency records every `every` until the task is aborted.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = executor.cleanup_expired().await {
                    warn!(error = %e, "idempotency cleanup failed");
                }
            }
        })
    }

    /// Execute a validated request exactly once per idempotency key.
    pub async fn execute(&self, rid: &str, request: &ValidatedRequest) -> Result<ExecutionReport> {
        let now_ms = self.clock.now_ms();
        let key = IdempotencyManager::generate_key(request, now_ms);

        let claim = self
            .store_call(
                "idempotency claim",
                self.idempotency.claim(&key, request, rid, now_ms),
            )
            .await?;

        match claim {
            ClaimOutcome::InProgress { key } => {
                return Err(ExecutorError::DuplicateInFlight { key });
            }
            ClaimOutcome::Succeeded { key, summary } => {
                return Ok(ExecutionReport::replayed(rid, request, &key, summary));
            }
            ClaimOutcome::Claimed { .. } => {}
        }

        let result = self.run(rid, request, &key).await;

        let (status, summary) = match &result {
            Ok(report) => (IdempotencyStatus::Succeeded, report.summary()),
            Err(failure) => {
                let summary = ResultSummary::new(
                    false,
                    failure.error.to_string(),
                    failure.error.http_status(),
                );
                if failure.money_moved {
                    // The order filled; a retry must not trade again
                    (IdempotencyStatus::Succeeded, summary)
                } else {
                    (IdempotencyStatus::Failed, summary)
                }
            }
        };

        let finalized_at = self.clock.now_ms();
        if let Err(e) = self
            .store_call(
                "idempotency finalize",
                self.idempotency
                    .finalize(&key, status, &summary, rid, finalized_at),
            )
            .await
        {
            error!(rid, key = %key, status = status.as_str(), error = %e, "idempotency finalize failed");
        }

        result.map_err(|failure| failure.error)
    }

    async fn run(&self, rid: &str, request: &ValidatedRequest, key: &str) -> RunResult {
        let now_ms = self.clock.now_ms();
        let mut position = self
            .store_call(
                "position load",
                self.positions.load(request.venue, &request.symbol),
            )
            .await
            .map_err(RunFailure::before_fill)?;

        let (price, cached) = self
            .resolve_price(&position, request, now_ms)
            .await
            .map_err(RunFailure::before_fill)?;

        // A cached price is not a new observation
        if !cached && update_circuit_breaker(&mut position, price, now_ms, &self.params) {
            warn!(
                rid,
                symbol = %request.symbol,
                price = %price,
                paused_until_ms = position.paused_until_ms,
                "circuit breaker tripped"
            );
        }
        let paused = is_paused(&position, now_ms);

        update_profit_lock(&mut position.core, price, &self.params);
        for cycle in position.cycles.iter_mut().filter(|c| c.is_open()) {
            update_profit_lock(&mut cycle.leg, price, &self.params);
        }

        let ctx = RunContext {
            rid,
            request,
            key,
            now_ms,
            price,
            paused,
        };

        match request.directive {
            Directive::Tick => self.on_tick(&ctx, position).await,
            Directive::Sell => self.on_sell(&ctx, position).await,
            Directive::Buy => self.on_buy(&ctx, position).await,
        }
    }

    async fn resolve_price(
        &self,
        position: &Position,
        request: &ValidatedRequest,
        now_ms: i64,
    ) -> Result<(Decimal, bool)> {
        let cache_ms = self.config.strategy.price_cache_ms;
        if cache_ms > 0
            && position.last_seen_price > Decimal::ZERO
            && position.last_seen_price_at_ms > 0
            && now_ms - position.last_seen_price_at_ms <= cache_ms
        {
            return Ok((position.last_seen_price, true));
        }

        let price = self
            .exchange_call(
                "price fetch",
                self.gateway.current_price(request.venue, &request.symbol),
            )
            .await
            .map_err(|e| match e {
                ExecutorError::UpstreamTimeout(_) | ExecutorError::Upstream(_) => e,
                other => ExecutorError::Upstream(format!("price fetch failed: {}", other)),
            })?;
        Ok((price, false))
    }

    // ───────────────────────── TICK / SELL ─────────────────────────

    async fn on_tick(&self, ctx: &RunContext<'_>, position: Position) -> RunResult {
        if self.config.strategy.exit_mode == ExitMode::MarketOnSellSignal {
            return self
                .finish_skip(ctx, position, SkipReason::SellSignalOnly)
                .await;
        }
        self.try_exit(ctx, position, ExitTrigger::ProfitLock).await
    }

    async fn on_sell(&self, ctx: &RunContext<'_>, position: Position) -> RunResult {
        self.try_exit(ctx, position, ExitTrigger::SellSignal).await
    }

    fn exit_fires(&self, leg: &Leg, price: Decimal, trigger: ExitTrigger) -> bool {
        match trigger {
            ExitTrigger::ProfitLock => should_exit_by_profit_lock(leg, price, &self.params),
            ExitTrigger::SellSignal => {
                !leg.is_empty()
                    && net_profit(leg, price, self.params.fee_rate) >= self.params.profit_lock_net
            }
        }
    }

    /// Sell the best open cycle if it qualifies, otherwise the core leg.
    async fn try_exit(
        &self,
        ctx: &RunContext<'_>,
        position: Position,
        trigger: ExitTrigger,
    ) -> RunResult {
        if ctx.paused && self.config.circuit_breaker.block_exits {
            let paused_until_ms = position.paused_until_ms;
            return self
                .finish_skip(ctx, position, SkipReason::ExitsPaused { paused_until_ms })
                .await;
        }

        let best = pick_best_exit_cycle(&position.cycles, ctx.price, self.params.fee_rate);
        if let Some(idx) = best {
            let cycle = &position.cycles[idx];
            if self.exit_fires(&cycle.leg, ctx.price, trigger) {
                let target = ExitTarget::Cycle {
                    id: cycle.id.clone(),
                };
                return self.exit_leg(ctx, position, target, trigger).await;
            }
        }

        if self.exit_fires(&position.core, ctx.price, trigger) {
            return self
                .exit_leg(ctx, position, ExitTarget::Core, trigger)
                .await;
        }

        let reason = match trigger {
            ExitTrigger::ProfitLock => SkipReason::NoExit,
            ExitTrigger::SellSignal => SkipReason::BelowTarget,
        };
        self.finish_skip(ctx, position, reason).await
    }

    async fn exit_leg(
        &self,
        ctx: &RunContext<'_>,
        mut position: Position,
        target: ExitTarget,
        trigger: ExitTrigger,
    ) -> RunResult {
        let leg = match &target {
            ExitTarget::Core => position.core.clone(),
            ExitTarget::Cycle { id } => match position.cycles.iter().find(|c| &c.id == id) {
                Some(cycle) => cycle.leg.clone(),
                None => {
                    return Err(RunFailure::before_fill(ExecutorError::Internal(format!(
                        "cycle {} disappeared",
                        id
                    ))))
                }
            },
        };

        let quantity = floor_quantity(leg.quantity, self.config.strategy.qty_decimals);
        if quantity.is_zero() {
            return self
                .finish_skip(ctx, position, SkipReason::QtyTooSmall)
                .await;
        }

        let order = MarketOrder::sell_quantity(&ctx.request.symbol, quantity)
            .with_client_order_id(ctx.request.client_order_id.clone());
        let ack = match self.submit(ctx, &order).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.fail_after_bookkeeping(ctx, &position, e).await),
        };

        let fill = parse_fill(
            &ack.body,
            ctx.price,
            &SymbolAssets::from_symbol(&ctx.request.symbol),
        );
        // The validate-only endpoint reports no execution
        let executed = if fill.executed_qty > Decimal::ZERO {
            fill.executed_qty
        } else {
            quantity
        };
        let avg_fill_price = if fill.avg_fill_price > Decimal::ZERO {
            fill.avg_fill_price
        } else {
            ctx.price
        };
        let proceeds = if fill.quote_qty > Decimal::ZERO {
            fill.quote_qty
        } else {
            executed * avg_fill_price
        };
        let sell_fee = if fill.fee_quote > Decimal::ZERO {
            fill.fee_quote
        } else {
            proceeds * self.params.fee_rate
        };

        let net_target = self.params.profit_lock_net;
        let realized_net =
            proceeds - leg.cost_basis_quote - leg.cumulative_fees_quote - sell_fee;
        let below_target = realized_net < net_target;
        if below_target {
            let shortfall = net_target - realized_net;
            if shortfall > self.config.strategy.max_realized_shortfall {
                error!(
                    rid = ctx.rid,
                    symbol = %ctx.request.symbol,
                    target = %target,
                    realized_net = %realized_net,
                    net_target = %net_target,
                    "realized sell far below target"
                );
            } else {
                warn!(
                    rid = ctx.rid,
                    symbol = %ctx.request.symbol,
                    target = %target,
                    realized_net = %realized_net,
                    net_target = %net_target,
                    "realized sell below target"
                );
            }
        }

        match &target {
            ExitTarget::Core => position.core = Leg::default(),
            ExitTarget::Cycle { id } => {
                if let Some(cycle) = position.cycle_mut(id) {
                    cycle.close_after_sell(sell_fee);
                }
            }
        }
        position.last_action_at_ms = ctx.now_ms;

        let revision = self.persist(ctx, &position, true).await?;
        info!(
            rid = ctx.rid,
            symbol = %ctx.request.symbol,
            trigger = %trigger,
            target = %target,
            quantity = %quantity,
            proceeds = %proceeds,
            realized_net = %realized_net,
            "position exited"
        );

        let sold = SellFill {
            target,
            trigger,
            quantity: executed,
            proceeds_quote: proceeds,
            sell_fee_quote: sell_fee,
            avg_fill_price,
            realized_net,
            net_target,
            below_target,
        };
        Ok(self.report(ctx, &position, revision, Some(ack), Outcome::Sold(sold)))
    }

    // ───────────────────────── BUY ─────────────────────────

    async fn on_buy(&self, ctx: &RunContext<'_>, position: Position) -> RunResult {
        let s = &self.config.strategy;
        let now_ms = ctx.now_ms;

        if position.last_action_at_ms > 0 && now_ms - position.last_action_at_ms < s.cooldown_ms {
            let wait_ms = s.cooldown_ms - (now_ms - position.last_action_at_ms);
            return self
                .finish_skip(ctx, position, SkipReason::Cooldown { wait_ms })
                .await;
        }
        if ctx.paused {
            let paused_until_ms = position.paused_until_ms;
            return self
                .finish_skip(ctx, position, SkipReason::Paused { paused_until_ms })
                .await;
        }

        let exposure = total_exposure(&position);

        if position.core.is_empty() {
            return self.buy_leg(ctx, position, BuyKind::Core, None, exposure).await;
        }
        if should_dca(&position.core, ctx.price, now_ms, &self.params) {
            return self
                .buy_leg(ctx, position, BuyKind::CoreDca, None, exposure)
                .await;
        }

        if !ctx.request.strategy.allows_scalp() {
            return self.finish_skip(ctx, position, SkipReason::CoreHolding).await;
        }
        if !s.allow_scalp {
            return self.finish_skip(ctx, position, SkipReason::ScalpDisabled).await;
        }

        // Most recent underwater cycle first
        let underwater = position
            .cycles
            .iter()
            .rev()
            .find(|c| c.is_open() && should_dca(&c.leg, ctx.price, now_ms, &self.params))
            .map(|c| c.id.clone());
        if let Some(id) = underwater {
            return self
                .buy_leg(ctx, position, BuyKind::ScalpDca, Some(id), exposure)
                .await;
        }

        if !s.allow_rebuy {
            return self.finish_skip(ctx, position, SkipReason::RebuyDisabled).await;
        }
        let open = position.open_cycle_count();
        if open >= s.scalp_max_open {
            let max = s.scalp_max_open;
            return self
                .finish_skip(ctx, position, SkipReason::ScalpMaxOpen { open, max })
                .await;
        }

        let id = new_cycle_id(now_ms);
        self.buy_leg(ctx, position, BuyKind::ScalpNew, Some(id), exposure)
            .await
    }

    async fn buy_leg(
        &self,
        ctx: &RunContext<'_>,
        mut position: Position,
        kind: BuyKind,
        cycle_id: Option<String>,
        exposure: Decimal,
    ) -> RunResult {
        let s = &self.config.strategy;
        let fallback = match kind {
            BuyKind::Core | BuyKind::CoreDca => s.base_order_notional,
            BuyKind::ScalpDca | BuyKind::ScalpNew => s.scalp_order_notional,
        };
        let notional = s.clamp_notional(ctx.request.notional, fallback);

        if exposure + notional > s.max_total_exposure {
            let reason = SkipReason::MaxExposure {
                kind,
                exposure,
                requested: notional,
                max: s.max_total_exposure,
            };
            return self.finish_skip(ctx, position, reason).await;
        }

        let order = MarketOrder::buy_notional(&ctx.request.symbol, notional)
            .with_client_order_id(ctx.request.client_order_id.clone());
        let ack = match self.submit(ctx, &order).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.fail_after_bookkeeping(ctx, &position, e).await),
        };

        let fill = parse_fill(
            &ack.body,
            ctx.price,
            &SymbolAssets::from_symbol(&ctx.request.symbol),
        );
        let gross = if fill.executed_qty > Decimal::ZERO {
            fill.executed_qty
        } else {
            notional / ctx.price
        };
        let spent = if fill.quote_qty > Decimal::ZERO {
            fill.quote_qty
        } else {
            notional
        };
        let quantity_net = (gross - fill.fee_base).max(Decimal::ZERO);
        let fee = if fill.fee_quote > Decimal::ZERO {
            fill.fee_quote
        } else {
            spent * self.params.fee_rate
        };

        let leg = match kind {
            BuyKind::Core | BuyKind::CoreDca => &mut position.core,
            BuyKind::ScalpDca | BuyKind::ScalpNew => {
                let id = cycle_id.clone().unwrap_or_default();
                if kind == BuyKind::ScalpNew {
                    position.cycles.push(Cycle::open(id.clone()));
                }
                match position.cycles.iter_mut().find(|c| c.id == id) {
                    Some(cycle) => &mut cycle.leg,
                    None => {
                        let err = ExecutorError::Internal(format!("cycle {} disappeared", id));
                        return Err(RunFailure {
                            error: err,
                            money_moved: true,
                        });
                    }
                }
            }
        };
        leg.apply_buy(quantity_net, spent, fee);
        if matches!(kind, BuyKind::CoreDca | BuyKind::ScalpDca) {
            leg.record_dca(ctx.now_ms);
        }
        let snapshot = leg.snapshot();
        position.last_action_at_ms = ctx.now_ms;

        let revision = self.persist(ctx, &position, true).await?;
        info!(
            rid = ctx.rid,
            symbol = %ctx.request.symbol,
            opened = kind.as_str(),
            cycle_id = cycle_id.as_deref().unwrap_or(""),
            notional = %notional,
            quantity = %quantity_net,
            spent = %spent,
            "buy filled"
        );

        let bought = BuyFill {
            kind,
            cycle_id,
            notional,
            executed_qty: gross,
            quantity_net,
            spent_quote: spent,
            fee_quote: fee,
            avg_fill_price: if fill.avg_fill_price > Decimal::ZERO {
                fill.avg_fill_price
            } else {
                ctx.price
            },
            leg: snapshot,
        };
        Ok(self.report(ctx, &position, revision, Some(ack), Outcome::Bought(bought)))
    }

    // ───────────────────────── plumbing ─────────────────────────

    /// Place the order and turn a non-2xx answer into `ExchangeRejected`.
    async fn submit(&self, ctx: &RunContext<'_>, order: &MarketOrder) -> Result<OrderAck> {
        let ack = self
            .exchange_call(
                "order submission",
                self.gateway
                    .place_market_order(ctx.request.venue, ctx.request.mode, order),
            )
            .await?;
        if !ack.http_ok {
            warn!(
                rid = ctx.rid,
                symbol = %ctx.request.symbol,
                side = %order.side,
                status = ack.status,
                endpoint = %ack.endpoint,
                "exchange rejected order"
            );
            return Err(ExecutorError::ExchangeRejected {
                status: ack.status,
                body: ack.body,
            });
        }
        Ok(ack)
    }

    /// Persist observation bookkeeping after an order error, then surface the error.
    async fn fail_after_bookkeeping(
        &self,
        ctx: &RunContext<'_>,
        position: &Position,
        error: ExecutorError,
    ) -> RunFailure {
        if let Err(persist) = self.persist(ctx, position, false).await {
            warn!(rid = ctx.rid, error = %persist.error, "bookkeeping write failed after order error");
        }
        RunFailure::before_fill(error)
    }

    async fn finish_skip(
        &self,
        ctx: &RunContext<'_>,
        position: Position,
        reason: SkipReason,
    ) -> RunResult {
        let revision = self.persist(ctx, &position, false).await?;
        debug!(rid = ctx.rid, symbol = %ctx.request.symbol, skipped = %reason.message(), "no order");
        Ok(self.report(ctx, &position, revision, None, Outcome::Skipped(reason)))
    }

    /// Write the position unless this is an unpersisted paper run.
    async fn persist(
        &self,
        ctx: &RunContext<'_>,
        position: &Position,
        filled: bool,
    ) -> std::result::Result<Option<i64>, RunFailure> {
        if ctx.request.mode.is_paper() && !self.config.store.persist_paper_state {
            info!(
                rid = ctx.rid,
                venue = %ctx.request.venue,
                symbol = %ctx.request.symbol,
                mode = %ctx.request.mode,
                phase = "state_write_skipped",
                "paper mode"
            );
            return Ok(None);
        }

        match self
            .store_call("position save", self.positions.save(position))
            .await
        {
            Ok(saved) => Ok(Some(saved.revision)),
            Err(e) => {
                if filled {
                    error!(
                        rid = ctx.rid,
                        key = ctx.key,
                        doc_id = %position.doc_id(),
                        error = %e,
                        "order filled but position write failed"
                    );
                }
                Err(RunFailure {
                    error: e,
                    money_moved: filled,
                })
            }
        }
    }

    fn report(
        &self,
        ctx: &RunContext<'_>,
        position: &Position,
        revision: Option<i64>,
        order: Option<OrderAck>,
        outcome: Outcome,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::new(ctx.rid, ctx.request, ctx.key, outcome);
        report.price = Some(ctx.price);
        report.paused = is_paused(position, ctx.now_ms);
        report.revision = revision;
        report.order = order;
        report
    }

    async fn store_call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_millis(self.config.store.timeout_ms);
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Internal(format!("{} timed out", what))),
        }
    }

    async fn exchange_call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_millis(self.config.exchange.request_timeout_ms);
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::UpstreamTimeout(what.to_string())),
        }
    }
}

/// `c_<ms>_<6 hex>`
fn new_cycle_id(now_ms: i64) -> String {
    format!("c_{}_{:06x}", now_ms, rand::random::<u32>() & 0x00ff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryIdempotencyStore, MemoryPositionStore};
    use crate::domain::{
        ExecutionMode, NewIdempotencyRecord, StrategyMode, Venue,
    };
    use crate::exchange::MockExchangeGateway;
    use crate::persistence::IdempotencyStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicI64, Ordering};

    const T0: i64 = 1_700_000_000_000;

    struct FixedClock(AtomicI64);

    impl FixedClock {
        fn at(ms: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(ms)))
        }

        fn advance(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Loads empty positions and refuses every write
    struct RejectingPositionStore;

    #[async_trait]
    impl PositionStore for RejectingPositionStore {
        async fn load(&self, venue: Venue, symbol: &str) -> Result<Position> {
            Ok(Position::new(venue, symbol))
        }

        async fn save(&self, position: &Position) -> Result<Position> {
            Err(ExecutorError::RevisionConflict {
                doc_id: position.doc_id(),
                expected: position.revision,
                found: position.revision + 1,
            })
        }

        async fn delete(&self, _venue: Venue, _symbol: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct Harness {
        executor: Executor,
        positions: Arc<MemoryPositionStore>,
        idempotency: Arc<MemoryIdempotencyStore>,
        clock: Arc<FixedClock>,
    }

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.strategy.taker_fee_bps = Decimal::ZERO;
        cfg.strategy.price_cache_ms = 0;
        cfg
    }

    fn harness(cfg: AppConfig, gateway: MockExchangeGateway) -> Harness {
        let positions = Arc::new(MemoryPositionStore::new());
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let clock = FixedClock::at(T0);
        let stores = Stores {
            positions: positions.clone(),
            idempotency: idempotency.clone(),
        };
        let executor = Executor::new(Arc::new(cfg), stores, Arc::new(gateway))
            .with_clock(clock.clone());
        Harness {
            executor,
            positions,
            idempotency,
            clock,
        }
    }

    fn request(directive: Directive, cid: Option<&str>) -> ValidatedRequest {
        ValidatedRequest {
            venue: Venue::Testnet,
            mode: ExecutionMode::Live,
            symbol: "BTCUSDT".to_string(),
            directive,
            notional: None,
            client_order_id: cid.map(str::to_string),
            strategy: StrategyMode::Core,
            ts: None,
        }
    }

    fn filled(body: Value) -> OrderAck {
        OrderAck {
            http_ok: true,
            status: 200,
            endpoint: "/api/v3/order".to_string(),
            base_url: "https://testnet.binance.vision".to_string(),
            body,
        }
    }

    fn gateway_at(price: Decimal) -> MockExchangeGateway {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_current_price()
            .returning(move |_, _| Ok(price));
        gateway
    }

    async fn seed(positions: &MemoryPositionStore, position: Position) {
        positions.save(&position).await.unwrap();
    }

    #[tokio::test]
    async fn test_buy_opens_core_from_fill() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "250" })))
            });
        let h = harness(test_config(), gateway);

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, Some("tv-1")))
            .await
            .unwrap();

        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        assert_eq!(fill.kind, BuyKind::Core);
        assert_eq!(fill.notional, dec!(250));
        assert_eq!(report.revision, Some(1));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.core.quantity, dec!(2.5));
        assert_eq!(position.core.cost_basis_quote, dec!(250));
        assert_eq!(position.core.avg_price, dec!(100));
        assert_eq!(position.core.cumulative_fees_quote, Decimal::ZERO);
        assert_eq!(position.last_action_at_ms, T0);

        let record = h
            .idempotency
            .get(&report.dedupe_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, IdempotencyStatus::Succeeded);
        assert_eq!(record.summary, Some(ResultSummary::new(true, "opened core", 200)));
    }

    #[tokio::test]
    async fn test_duplicate_is_replayed_without_trading() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "250" })))
            });
        let h = harness(test_config(), gateway);
        let req = request(Directive::Buy, Some("tv-dup"));

        h.executor.execute("r1", &req).await.unwrap();
        h.clock.advance(5_000);
        let replay = h.executor.execute("r2", &req).await.unwrap();

        assert_eq!(
            replay.outcome,
            Outcome::Replayed {
                cached: Some(ResultSummary::new(true, "opened core", 200))
            }
        );
        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.revision, 1);
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_conflicts() {
        let mut gateway = gateway_at(dec!(100));
        gateway.expect_place_market_order().times(0);
        let h = harness(test_config(), gateway);
        let req = request(Directive::Buy, Some("tv-busy"));
        let key = IdempotencyManager::generate_key(&req, T0);

        h.idempotency
            .claim(NewIdempotencyRecord {
                key: key.clone(),
                venue: "testnet".into(),
                mode: "live".into(),
                symbol: "BTCUSDT".into(),
                side: "BUY".into(),
                client_order_id: Some("tv-busy".into()),
                rid: "other".into(),
                now_ms: T0,
                expires_at_ms: T0 + 60_000,
            })
            .await
            .unwrap();

        let err = h.executor.execute("r1", &req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::DuplicateInFlight { key: ref k } if *k == key));
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn test_buy_inside_cooldown_is_skipped() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "250" })))
            });
        let h = harness(test_config(), gateway);

        h.executor
            .execute("r1", &request(Directive::Buy, Some("a")))
            .await
            .unwrap();
        h.clock.advance(1_000);
        let report = h
            .executor
            .execute("r2", &request(Directive::Buy, Some("b")))
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            Outcome::Skipped(SkipReason::Cooldown { wait_ms: 14_000 })
        );
        assert_eq!(report.summary(), ResultSummary::new(true, "cooldown", 200));
    }

    #[tokio::test]
    async fn test_exchange_rejection_fails_claim_and_allows_retry() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(2)
            .returning(|_, _, _| {
                Ok(OrderAck {
                    http_ok: false,
                    status: 400,
                    endpoint: "/api/v3/order".to_string(),
                    base_url: "https://testnet.binance.vision".to_string(),
                    body: json!({ "code": -2010, "msg": "Account has insufficient balance" }),
                })
            });
        let h = harness(test_config(), gateway);
        let req = request(Directive::Buy, Some("tv-reject"));

        let err = h.executor.execute("r1", &req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExchangeRejected { status: 400, .. }));
        assert_eq!(err.http_status(), 502);

        let key = IdempotencyManager::generate_key(&req, T0);
        let record = h.idempotency.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::Failed);

        // Bookkeeping still recorded the observed price
        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert!(position.core.is_empty());
        assert_eq!(position.last_seen_price, dec!(100));

        h.clock.advance(1_000);
        let err = h.executor.execute("r2", &req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExchangeRejected { .. }));
    }

    #[tokio::test]
    async fn test_tick_sells_best_cycle_before_core() {
        let mut gateway = gateway_at(dec!(106));
        gateway
            .expect_place_market_order()
            .times(1)
            .withf(|_, _, order| {
                order.symbol == "BTCUSDT"
                    && order.size == crate::domain::OrderSize::BaseQuantity(dec!(1))
            })
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "1", "cummulativeQuoteQty": "106" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(104), Decimal::ZERO);
        position.core.armed = true;
        position.core.peak_price = dec!(107);
        let mut cycle = Cycle::open("c_1_aaaaaa");
        cycle.leg.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        cycle.leg.armed = true;
        cycle.leg.peak_price = dec!(107);
        position.cycles.push(cycle);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Tick, None))
            .await
            .unwrap();

        let Outcome::Sold(sold) = &report.outcome else {
            panic!("expected a sell, got {:?}", report.outcome);
        };
        assert_eq!(
            sold.target,
            ExitTarget::Cycle {
                id: "c_1_aaaaaa".to_string()
            }
        );
        assert_eq!(sold.realized_net, dec!(6));
        assert!(!sold.below_target);

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert!(!position.cycles[0].is_open());
        assert!(position.cycles[0].leg.is_empty());
        assert_eq!(position.core.quantity, dec!(1));
        assert_eq!(position.revision, 2);
    }

    #[tokio::test]
    async fn test_sell_signal_below_target_does_nothing() {
        let mut gateway = gateway_at(dec!(100.5));
        gateway.expect_place_market_order().times(0);
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Sell, None))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::BelowTarget));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.core.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_paper_mode_skips_state_write() {
        let mut gateway = gateway_at(dec!(125));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| Ok(filled(json!({}))));
        let h = harness(test_config(), gateway);

        let mut req = request(Directive::Buy, Some("paper-1"));
        req.mode = ExecutionMode::Paper;
        let report = h.executor.execute("r1", &req).await.unwrap();

        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        // No executedQty from the validate-only endpoint
        assert_eq!(fill.quantity_net, dec!(2));
        assert_eq!(report.revision, None);
        assert!(h.positions.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_after_fill_is_not_retryable() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "250" })))
            });
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let stores = Stores {
            positions: Arc::new(RejectingPositionStore),
            idempotency: idempotency.clone(),
        };
        let executor = Executor::new(Arc::new(test_config()), stores, Arc::new(gateway))
            .with_clock(FixedClock::at(T0));
        let req = request(Directive::Buy, Some("tv-lost"));

        let err = executor.execute("r1", &req).await.unwrap_err();
        assert_eq!(err.http_status(), 500);

        let key = IdempotencyManager::generate_key(&req, T0);
        let record = idempotency.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::Succeeded);
        let summary = record.summary.unwrap();
        assert!(!summary.ok);
        assert_eq!(summary.http_status, 500);

        let replay = executor.execute("r2", &req).await.unwrap();
        assert!(matches!(replay.outcome, Outcome::Replayed { .. }));
    }

    #[tokio::test]
    async fn test_exposure_cap_blocks_new_core() {
        let mut gateway = gateway_at(dec!(100));
        gateway.expect_place_market_order().times(0);
        let mut cfg = test_config();
        cfg.strategy.max_total_exposure = dec!(100);
        let h = harness(cfg, gateway);

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();
        assert!(matches!(
            report.outcome,
            Outcome::Skipped(SkipReason::MaxExposure {
                kind: BuyKind::Core,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_price_drop_pauses_buys() {
        let mut gateway = gateway_at(dec!(96));
        gateway.expect_place_market_order().times(0);
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.last_seen_price = dec!(100);
        position.last_seen_price_at_ms = T0 - 10_000;
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            Outcome::Skipped(SkipReason::Paused {
                paused_until_ms: T0 + 600_000
            })
        );
        assert!(report.paused);
    }

    #[tokio::test]
    async fn test_auto_strategy_opens_scalp_cycle_when_core_holds() {
        let mut gateway = gateway_at(dec!(100));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "1.2", "cummulativeQuoteQty": "120" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        seed(&h.positions, position).await;

        let mut req = request(Directive::Buy, None);
        req.strategy = StrategyMode::Auto;
        req.notional = Some(dec!(120));
        let report = h.executor.execute("r1", &req).await.unwrap();

        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        assert_eq!(fill.kind, BuyKind::ScalpNew);
        assert!(fill.cycle_id.as_deref().unwrap_or_default().starts_with("c_"));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.open_cycle_count(), 1);
        assert_eq!(position.cycles[0].leg.quantity, dec!(1.2));
        assert_eq!(position.core.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_core_strategy_holds_without_dca_trigger() {
        let mut gateway = gateway_at(dec!(100));
        gateway.expect_place_market_order().times(0);
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::CoreHolding));
        assert_eq!(report.reason(), "core: no dca trigger (holding)");
    }

    /// Answers prices at once but takes `delay` to acknowledge an order
    struct SlowGateway {
        delay: Duration,
    }

    #[async_trait]
    impl ExchangeGateway for SlowGateway {
        async fn current_price(&self, _venue: Venue, _symbol: &str) -> Result<Decimal> {
            Ok(dec!(100))
        }

        async fn place_market_order(
            &self,
            _venue: Venue,
            _mode: ExecutionMode,
            _order: &MarketOrder,
        ) -> Result<OrderAck> {
            tokio::time::sleep(self.delay).await;
            Ok(filled(json!({})))
        }
    }

    fn record(key: &str, now_ms: i64, expires_at_ms: i64) -> NewIdempotencyRecord {
        NewIdempotencyRecord {
            key: key.to_string(),
            venue: "testnet".into(),
            mode: "live".into(),
            symbol: "BTCUSDT".into(),
            side: "BUY".into(),
            client_order_id: None,
            rid: "seed".into(),
            now_ms,
            expires_at_ms,
        }
    }

    /// Core 1 @ 100, armed with a 107 peak
    fn armed_core() -> Position {
        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        position.core.armed = true;
        position.core.peak_price = dec!(107);
        position
    }

    #[tokio::test]
    async fn test_buy_below_step_averages_core_down() {
        let mut gateway = gateway_at(dec!(99));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "247.5" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();

        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        assert_eq!(fill.kind, BuyKind::CoreDca);
        assert_eq!(fill.leg.dca_count, 1);

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.core.quantity, dec!(3.5));
        assert_eq!(position.core.cost_basis_quote, dec!(347.5));
        assert_eq!(position.core.dca_count, 1);
        assert_eq!(position.core.last_dca_at_ms, T0);
    }

    #[tokio::test]
    async fn test_scalp_dca_picks_most_recent_underwater_cycle() {
        let mut gateway = gateway_at(dec!(99));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "2.5", "cummulativeQuoteQty": "247.5" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        // Core already used every DCA step
        position.core.dca_count = 5;
        for id in ["c_1_aaaaaa", "c_2_bbbbbb"] {
            let mut cycle = Cycle::open(id);
            cycle.leg.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
            position.cycles.push(cycle);
        }
        seed(&h.positions, position).await;

        let mut req = request(Directive::Buy, None);
        req.strategy = StrategyMode::Auto;
        let report = h.executor.execute("r1", &req).await.unwrap();

        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        assert_eq!(fill.kind, BuyKind::ScalpDca);
        assert_eq!(fill.cycle_id.as_deref(), Some("c_2_bbbbbb"));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.cycles[0].leg.quantity, dec!(1));
        assert_eq!(position.cycles[0].leg.dca_count, 0);
        assert_eq!(position.cycles[1].leg.quantity, dec!(3.5));
        assert_eq!(position.cycles[1].leg.dca_count, 1);
        assert_eq!(position.cycles[1].leg.last_dca_at_ms, T0);
        assert_eq!(position.core.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_tick_exits_core_when_no_cycle_qualifies() {
        let mut gateway = gateway_at(dec!(106));
        gateway
            .expect_place_market_order()
            .times(1)
            .withf(|_, _, order| order.size == crate::domain::OrderSize::BaseQuantity(dec!(1)))
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "1", "cummulativeQuoteQty": "106" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = armed_core();
        // Nets 0.5 at 106: open but below target and never armed
        let mut cycle = Cycle::open("c_1_aaaaaa");
        cycle.leg.apply_buy(dec!(1), dec!(105.5), Decimal::ZERO);
        position.cycles.push(cycle);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Tick, None))
            .await
            .unwrap();

        let Outcome::Sold(sold) = &report.outcome else {
            panic!("expected a sell, got {:?}", report.outcome);
        };
        assert_eq!(sold.target, ExitTarget::Core);
        assert_eq!(sold.trigger, ExitTrigger::ProfitLock);
        assert_eq!(sold.realized_net, dec!(6));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert!(position.core.is_empty());
        assert!(position.cycles[0].is_open());
        assert_eq!(position.cycles[0].leg.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_tick_never_sells_when_exits_wait_for_sell_signal() {
        let mut gateway = gateway_at(dec!(106));
        gateway.expect_place_market_order().times(0);
        let mut cfg = test_config();
        cfg.strategy.exit_mode = ExitMode::MarketOnSellSignal;
        let h = harness(cfg, gateway);
        seed(&h.positions, armed_core()).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Tick, None))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::SellSignalOnly));

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.core.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_sell_filled_below_target_still_closes_core() {
        let mut gateway = gateway_at(dec!(102));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| {
                Ok(filled(json!({ "executedQty": "1", "cummulativeQuoteQty": "100.6" })))
            });
        let h = harness(test_config(), gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.core.apply_buy(dec!(1), dec!(100), Decimal::ZERO);
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Sell, None))
            .await
            .unwrap();

        let Outcome::Sold(sold) = &report.outcome else {
            panic!("expected a sell, got {:?}", report.outcome);
        };
        assert_eq!(sold.trigger, ExitTrigger::SellSignal);
        assert_eq!(sold.realized_net, dec!(0.6));
        assert_eq!(sold.net_target, dec!(1.0));
        assert!(sold.below_target);
        assert!(report.summary().ok);

        let position = h.positions.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert!(position.core.is_empty());
        assert_eq!(position.revision, 2);
    }

    #[tokio::test]
    async fn test_slow_exchange_times_out_and_fails_claim() {
        let mut cfg = test_config();
        cfg.exchange.request_timeout_ms = 20;
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let stores = Stores {
            positions: Arc::new(MemoryPositionStore::new()),
            idempotency: idempotency.clone(),
        };
        let gateway = SlowGateway {
            delay: Duration::from_millis(500),
        };
        let executor = Executor::new(Arc::new(cfg), stores, Arc::new(gateway))
            .with_clock(FixedClock::at(T0));
        let req = request(Directive::Buy, Some("tv-slow"));

        let err = executor.execute("r1", &req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UpstreamTimeout(_)));
        assert_eq!(err.http_status(), 502);

        let key = IdempotencyManager::generate_key(&req, T0);
        let record = idempotency.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::Failed);
        let summary = record.summary.unwrap();
        assert!(!summary.ok);
        assert_eq!(summary.http_status, 502);
    }

    #[tokio::test]
    async fn test_paused_breaker_blocks_exits_when_configured() {
        let mut gateway = gateway_at(dec!(106));
        gateway.expect_place_market_order().times(0);
        let mut cfg = test_config();
        cfg.circuit_breaker.block_exits = true;
        let h = harness(cfg, gateway);

        let mut position = armed_core();
        position.paused_until_ms = T0 + 60_000;
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Tick, None))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            Outcome::Skipped(SkipReason::ExitsPaused {
                paused_until_ms: T0 + 60_000
            })
        );
        assert!(report.paused);
    }

    #[tokio::test]
    async fn test_zero_cache_window_always_fetches_price() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_current_price()
            .times(1)
            .returning(|_, _| Ok(dec!(100)));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| Ok(filled(json!({}))));
        let h = harness(test_config(), gateway);

        // Observed this very millisecond, but caching is off
        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.last_seen_price = dec!(50);
        position.last_seen_price_at_ms = T0;
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();
        assert_eq!(report.price, Some(dec!(100)));
        let Outcome::Bought(fill) = &report.outcome else {
            panic!("expected a buy, got {:?}", report.outcome);
        };
        assert_eq!(fill.quantity_net, dec!(2.5));
    }

    #[tokio::test]
    async fn test_recent_price_is_served_from_cache() {
        let mut gateway = MockExchangeGateway::new();
        gateway.expect_current_price().times(0);
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _| Ok(filled(json!({}))));
        let mut cfg = test_config();
        cfg.strategy.price_cache_ms = 2_000;
        let h = harness(cfg, gateway);

        let mut position = Position::new(Venue::Testnet, "BTCUSDT");
        position.last_seen_price = dec!(100);
        position.last_seen_price_at_ms = T0 - 1_000;
        seed(&h.positions, position).await;

        let report = h
            .executor
            .execute("r1", &request(Directive::Buy, None))
            .await
            .unwrap();
        assert_eq!(report.price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_records() {
        let h = harness(test_config(), MockExchangeGateway::new());
        h.idempotency
            .claim(record("hash:old", T0 - 100_000, T0 - 1))
            .await
            .unwrap();
        h.idempotency
            .claim(record("hash:live", T0, T0 + 60_000))
            .await
            .unwrap();

        assert_eq!(h.executor.cleanup_expired().await.unwrap(), 1);
        assert!(h.idempotency.get("hash:old").await.unwrap().is_none());
        assert!(h.idempotency.get("hash:live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_in_background() {
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let stores = Stores {
            positions: Arc::new(MemoryPositionStore::new()),
            idempotency: idempotency.clone(),
        };
        let executor = Arc::new(
            Executor::new(
                Arc::new(test_config()),
                stores,
                Arc::new(MockExchangeGateway::new()),
            )
            .with_clock(FixedClock::at(T0)),
        );
        idempotency
            .claim(record("hash:old", T0 - 100_000, T0 - 1))
            .await
            .unwrap();

        let task = executor.spawn_cleanup_task(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert!(idempotency.is_empty());
    }
}
