// =============================================================================
// Trading Engine — the cooperative top-level cycle loop
// =============================================================================
//
// One cycle, strictly ordered:
//
//   health probe -> account refresh -> reconcile -> adopt -> indicators ->
//   strategies -> selection -> risk -> order -> exits -> metrics ->
//   snapshot -> db flush
//
// At most one cycle runs at a time. A cycle that exceeds twice the poll
// interval logs an overshoot and shortens the next sleep, never overlapping.
// Errors never cross the cycle boundary: each subsystem failure is logged,
// counted, and the dependent steps of this cycle are skipped.
//
// Degraded mode: after K consecutive failed health probes no new orders are
// placed; exit logic keeps running on last-known prices while they are
// inside the freshness window.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::adoption::{AdoptionOutcome, TradeAdoption};
use crate::bridge::{Broker, OrderRequest, SymbolInfo};
use crate::config::EngineConfig;
use crate::context::{pip_size, MarketContext, PositionContext};
use crate::db::{OrderRow, SignalRow, TradeDb, TradeRow};
use crate::error::BrokerError;
use crate::exit::{ExitAction, ExitCoordinator, ExitDecision, ExitEnv};
use crate::health::HealthHandle;
use crate::indicators::{compute_snapshot, IndicatorSnapshot};
use crate::lifecycle::PositionLifecycle;
use crate::metrics::{MetricsCollector, MetricsQueue};
use crate::risk::{RiskEvaluator, RiskInputs, RiskState};
use crate::snapshot::{DecisionRecord, ErrorRecord, StateSnapshot};
use crate::strategy::selector::DynamicSelector;
use crate::strategy::StrategyRegistry;
use crate::tracker::PositionTracker;
use crate::types::{Account, AccountPhase, Bar, Position, Timeframe};
use crate::watchdog::Watchdog;

/// Rolling error log depth.
const MAX_RECENT_ERRORS: usize = 50;

/// Rolling decision audit trail depth.
const MAX_RECENT_DECISIONS: usize = 100;

/// Granularity of the inter-cycle sleep, so shutdown reacts promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

pub struct TradingEngine {
    cfg: EngineConfig,
    timeframe: Timeframe,
    broker: Arc<dyn Broker>,
    tracker: PositionTracker,
    registry: StrategyRegistry,
    selector: DynamicSelector,
    risk: RiskEvaluator,
    risk_state: RiskState,
    lifecycle: PositionLifecycle,
    adoption: TradeAdoption,
    coordinator: ExitCoordinator,
    metrics: MetricsCollector,
    metrics_queue: MetricsQueue,
    db: TradeDb,
    health: HealthHandle,
    watchdog: Watchdog,

    cycle_count: u64,
    consecutive_health_failures: u32,
    degraded: bool,
    last_account: Option<Account>,
    last_data_at: Option<DateTime<Utc>>,
    recent_errors: VecDeque<ErrorRecord>,
    recent_decisions: VecDeque<DecisionRecord>,
}

impl TradingEngine {
    /// Wire up all subsystems from a validated configuration.
    pub fn bootstrap(
        cfg: EngineConfig,
        broker: Arc<dyn Broker>,
        db: TradeDb,
        health: HealthHandle,
        watchdog: Watchdog,
    ) -> anyhow::Result<Self> {
        let timeframe = cfg.parsed_timeframe()?;
        let now = Utc::now();
        let mut risk_state = RiskState::new(0.0, now);

        // Restore daily counters after a same-day restart.
        if let Some(snapshot) = StateSnapshot::load(&cfg.snapshot_path) {
            snapshot.restore_risk(&mut risk_state, now);
        }

        let registry = StrategyRegistry::from_config(&cfg);
        let coordinator = ExitCoordinator::from_config(&cfg.exit);
        info!(
            strategies = registry.len(),
            exits = coordinator.len(),
            symbol = %cfg.symbol,
            timeframe = %timeframe,
            dry_run = cfg.dry_run,
            "engine assembled"
        );

        Ok(Self {
            lifecycle: PositionLifecycle::new(broker.clone(), cfg.dry_run),
            adoption: TradeAdoption::new(broker.clone(), cfg.adoption.clone(), cfg.dry_run),
            risk: RiskEvaluator::new(cfg.risk.clone()),
            tracker: PositionTracker::new(cfg.magic_number),
            selector: DynamicSelector::default(),
            metrics: MetricsCollector::new(),
            metrics_queue: MetricsQueue::new(),
            registry,
            coordinator,
            timeframe,
            broker,
            db,
            health,
            watchdog,
            risk_state,
            cfg,
            cycle_count: 0,
            consecutive_health_failures: 0,
            degraded: false,
            last_account: None,
            last_data_at: None,
            recent_errors: VecDeque::new(),
            recent_decisions: VecDeque::new(),
        })
    }

    /// Receiver end of the metrics queue, for the writer worker.
    pub fn metrics_receiver(&self) -> crossbeam::channel::Receiver<crate::metrics::MetricsRecord> {
        self.metrics_queue.receiver()
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    /// Run until shutdown is requested. Never panics out of a cycle.
    pub async fn run(&mut self) {
        let interval = Duration::from_secs(self.cfg.poll_interval_seconds);
        info!(
            poll_interval_secs = interval.as_secs(),
            "trading loop started"
        );

        while !self.health.shutdown_requested() {
            let started = Instant::now();

            if let Err(e) = self.cycle().await {
                // Internal invariant violations stop the current cycle only.
                error!(error = %e, "cycle aborted");
                self.metrics.error("internal");
                self.push_error("internal", format!("cycle aborted: {e}"));
            }

            self.cycle_count += 1;
            self.watchdog.pet();

            let elapsed = started.elapsed();
            let overshoot = elapsed > interval * 2;
            if overshoot {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = (interval * 2).as_millis() as u64,
                    "cycle overshoot — shortening next sleep"
                );
            }
            self.metrics
                .cycle_finished(elapsed.as_secs_f64() * 1000.0, overshoot);
            self.health.update_cycle(
                self.cycle_count,
                self.degraded,
                self.tracker.len(),
                self.recent_errors.iter().cloned().collect(),
                self.recent_decisions.iter().cloned().collect(),
            );

            self.sleep_until_next(interval.saturating_sub(elapsed)).await;
        }

        info!("shutdown flag observed — leaving trading loop");
    }

    /// Sleep in slices so a shutdown request interrupts promptly.
    async fn sleep_until_next(&self, mut remaining: Duration) {
        while remaining > Duration::ZERO && !self.health.shutdown_requested() {
            let slice = remaining.min(SLEEP_SLICE);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    pub(crate) async fn cycle(&mut self) -> anyhow::Result<()> {
        let now = Utc::now();
        self.risk_state.maybe_reset_daily(now);

        // ── 1. Health probe ─────────────────────────────────────────────
        self.probe_health().await;

        // ── 2. Account refresh ──────────────────────────────────────────
        let account_result = self.broker.account_info().await;
        let account = match account_result {
            Ok(account) => {
                self.risk_state.update_equity(account.equity);
                self.last_account = Some(account.clone());
                account
            }
            Err(e) => {
                self.note_broker_error("account_info", &e);
                match &self.last_account {
                    Some(account) if self.data_fresh(now) => account.clone(),
                    _ => {
                        // Nothing to act on this cycle.
                        self.persist_cycle(now, None)?;
                        return Ok(());
                    }
                }
            }
        };

        // ── 3. Symbol metadata ──────────────────────────────────────────
        let symbol_result = self.broker.symbol_info(&self.cfg.symbol).await;
        let symbol_info = match symbol_result {
            Ok(info) => info,
            Err(e) => {
                self.note_broker_error("symbol_info", &e);
                self.persist_cycle(now, Some(&account))?;
                return Ok(());
            }
        };

        // ── 4. Reconcile + close events ─────────────────────────────────
        let positions_result = self.broker.open_positions(None).await;
        match positions_result {
            Ok(broker_positions) => {
                let outcome = self.tracker.reconcile(&broker_positions, now);
                for event in outcome.closed {
                    self.on_position_closed(
                        &event.position,
                        event.realized_pnl,
                        event.position.current_price,
                        "broker_reported",
                        event.closed_at,
                    );
                }

                // ── 5. Adoption of unknowns ─────────────────────────
                if !self.degraded {
                    for unknown in &outcome.unknown {
                        let result = self
                            .adoption
                            .adopt(unknown, &symbol_info, &mut self.tracker, now)
                            .await;
                        match result {
                            AdoptionOutcome::Failed(e) => {
                                self.note_broker_error("adoption", &e)
                            }
                            AdoptionOutcome::Refused(reason) => {
                                debug!(ticket = unknown.ticket, reason = %reason, "adoption refused")
                            }
                            _ => {}
                        }
                    }
                }
            }
            Err(e) => self.note_broker_error("open_positions", &e),
        }

        // ── 6. Market data + indicators ─────────────────────────────────
        let rates_result = self
            .broker
            .rates(&self.cfg.symbol, self.timeframe, self.cfg.warmup_bars + 2)
            .await;
        let bars = match rates_result {
            Ok(bars) if bars.len() >= 2 => {
                self.last_data_at = Some(now);
                bars
            }
            Ok(_) => {
                debug!("insufficient bars this cycle");
                self.persist_cycle(now, Some(&account))?;
                return Ok(());
            }
            Err(e) => {
                self.note_broker_error("rates", &e);
                self.persist_cycle(now, Some(&account))?;
                return Ok(());
            }
        };

        let indicators = compute_snapshot(&bars, &self.cfg.indicators);
        let market = MarketContext::build(&bars, &indicators, &symbol_info, now);

        // ── 7+8. Entry pipeline ─────────────────────────────────────────
        if bars.len() >= self.cfg.warmup_bars {
            self.entry_pipeline(&bars, &indicators, &market, &account, &symbol_info)
                .await;
        } else {
            debug!(
                have = bars.len(),
                need = self.cfg.warmup_bars,
                "warmup not satisfied — no entries"
            );
        }

        // ── 9. Exit evaluation ──────────────────────────────────────────
        self.exit_pass(&bars, &indicators, &market, &account, &symbol_info, now)
            .await;

        // ── 10-12. Metrics, snapshot, db ────────────────────────────────
        self.persist_cycle(now, Some(&account))?;
        Ok(())
    }

    async fn probe_health(&mut self) {
        let healthy = match self.broker.health().await {
            Ok(status) if status.ok => true,
            Ok(_) | Err(_) => false,
        };

        if healthy {
            if self.degraded {
                info!("bridge recovered — leaving degraded mode");
            }
            self.consecutive_health_failures = 0;
            self.degraded = false;
        } else {
            self.consecutive_health_failures += 1;
            self.metrics.health_failure();
            if self.consecutive_health_failures >= self.cfg.mt5.degraded_after_failures
                && !self.degraded
            {
                warn!(
                    failures = self.consecutive_health_failures,
                    "bridge degraded — suspending new orders"
                );
                self.degraded = true;
            }
        }
    }

    /// Whether last-known data is still inside the freshness window.
    fn data_fresh(&self, now: DateTime<Utc>) -> bool {
        self.last_data_at.is_some_and(|t| {
            (now - t).num_seconds() <= self.cfg.mt5.price_freshness_seconds as i64
        })
    }

    // -------------------------------------------------------------------------
    // Entry pipeline
    // -------------------------------------------------------------------------

    pub(crate) async fn entry_pipeline(
        &mut self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        market: &MarketContext,
        account: &Account,
        symbol_info: &SymbolInfo,
    ) {
        let candidates = self
            .registry
            .evaluate_all(bars, indicators, market, &self.cfg);
        for signal in &candidates {
            self.metrics.signal_generated(&signal.strategy_id);
        }
        if candidates.is_empty() {
            return;
        }

        let outcome = self
            .selector
            .select(candidates, market, &self.cfg.strategy);

        for rejected in &outcome.rejected {
            self.db.record_signal(SignalRow::new(
                &rejected.signal.symbol,
                &rejected.signal.side.to_string(),
                rejected.signal.confidence,
                &rejected.signal.strategy_id,
                false,
            ));
            self.push_decision(DecisionRecord {
                symbol: rejected.signal.symbol.clone(),
                side: rejected.signal.side.to_string(),
                strategy: rejected.signal.strategy_id.clone(),
                approved: false,
                gate: "selection".to_string(),
                reason: rejected.reason.clone(),
                ticket: None,
                at: Utc::now(),
            });
            debug!(
                strategy = %rejected.signal.strategy_id,
                reason = %rejected.reason,
                "signal not selected"
            );
        }

        for signal in outcome.selected {
            self.metrics.signal_selected();

            let verdict = self.risk.evaluate(&RiskInputs {
                signal: &signal,
                account,
                state: &self.risk_state,
                open_positions: &self.tracker.open_positions(),
                market,
                symbol_info,
                bars,
            });

            let signal_id = self.db.record_signal(SignalRow::new(
                &signal.symbol,
                &signal.side.to_string(),
                signal.confidence,
                &signal.strategy_id,
                verdict.approved,
            ));

            if !verdict.approved {
                self.metrics.risk_rejected();
                info!(
                    strategy = %signal.strategy_id,
                    side = %signal.side,
                    reason = %verdict.reason,
                    "signal rejected by risk"
                );
                self.push_decision(DecisionRecord {
                    symbol: signal.symbol.clone(),
                    side: signal.side.to_string(),
                    strategy: signal.strategy_id.clone(),
                    approved: false,
                    gate: verdict.reason.clone(),
                    reason: signal.reason.clone(),
                    ticket: None,
                    at: Utc::now(),
                });
                continue;
            }
            self.metrics.risk_approved();

            if self.degraded {
                info!(strategy = %signal.strategy_id, "degraded mode — order suppressed");
                self.push_decision(DecisionRecord {
                    symbol: signal.symbol.clone(),
                    side: signal.side.to_string(),
                    strategy: signal.strategy_id.clone(),
                    approved: false,
                    gate: "bridge_degraded".to_string(),
                    reason: signal.reason.clone(),
                    ticket: None,
                    at: Utc::now(),
                });
                continue;
            }

            let ticket = self
                .place_order(&signal, &verdict, bars, Some(signal_id))
                .await;
            self.push_decision(DecisionRecord {
                symbol: signal.symbol.clone(),
                side: signal.side.to_string(),
                strategy: signal.strategy_id.clone(),
                approved: true,
                gate: "approved".to_string(),
                reason: signal.reason.clone(),
                ticket,
                at: Utc::now(),
            });
        }
    }

    /// Send (or log, in dry-run) the order. Returns the broker ticket on a
    /// live fill.
    async fn place_order(
        &mut self,
        signal: &crate::types::Signal,
        verdict: &crate::risk::RiskVerdict,
        bars: &[Bar],
        signal_id: Option<String>,
    ) -> Option<u64> {
        let request_price = bars.last().map(|b| b.close).unwrap_or(0.0);
        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            side: signal.side,
            lot: verdict.lot,
            sl: Some(verdict.sl),
            tp: Some(verdict.tp),
            magic: self.cfg.magic_number,
            comment: format!("cthulu:{}", signal.strategy_id),
        };
        let ts_request = Utc::now();

        if self.cfg.dry_run {
            info!(
                symbol = %request.symbol,
                side = %request.side,
                lot = request.lot,
                sl = verdict.sl,
                tp = verdict.tp,
                "dry-run: order intent"
            );
            self.db.record_order(OrderRow {
                id: uuid::Uuid::new_v4().to_string(),
                signal_id,
                ts_request,
                ts_ack: None,
                request_price,
                execution_price: None,
                lot: request.lot,
                status: "dry_run".into(),
                latency_ms: None,
                slippage: None,
            });
            return None;
        }

        let order_result = self.broker.place_order(&request).await;
        match order_result {
            Ok(ack) => {
                info!(
                    ticket = ack.ticket,
                    symbol = %request.symbol,
                    side = %request.side,
                    lot = request.lot,
                    fill = ack.price,
                    slippage = ack.slippage,
                    latency_ms = ack.latency_ms,
                    "order filled"
                );
                self.metrics.order_placed(ack.latency_ms as f64, ack.slippage);
                self.db.record_order(OrderRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    signal_id,
                    ts_request,
                    ts_ack: Some(Utc::now()),
                    request_price,
                    execution_price: Some(ack.price),
                    lot: request.lot,
                    status: "filled".into(),
                    latency_ms: Some(ack.latency_ms),
                    slippage: Some(ack.slippage),
                });
                // Visible to reconciliation next cycle at the earliest.
                Some(ack.ticket)
            }
            Err(e) => {
                self.metrics.order_failed();
                self.note_broker_error("place_order", &e);
                self.db.record_order(OrderRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    signal_id,
                    ts_request,
                    ts_ack: None,
                    request_price,
                    execution_price: None,
                    lot: request.lot,
                    status: format!("failed:{}", e.kind()),
                    latency_ms: None,
                    slippage: None,
                });
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Exit pass
    // -------------------------------------------------------------------------

    async fn exit_pass(
        &mut self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        market: &MarketContext,
        account: &Account,
        symbol_info: &SymbolInfo,
        now: DateTime<Utc>,
    ) {
        if self.degraded && !self.data_fresh(now) {
            warn!("degraded with stale prices — skipping exit evaluation");
            return;
        }

        let phase = AccountPhase::derive(
            account.balance,
            self.risk_state.current_drawdown_pct,
            self.cfg.risk.recovery_drawdown_pct,
        );
        let pip = pip_size(symbol_info);

        let positions = self.tracker.open_positions();
        for position in positions {
            let pctx = PositionContext::build(&position, now);
            let decision = {
                let env = ExitEnv {
                    position: &position,
                    pctx: &pctx,
                    mctx: market,
                    bars,
                    indicators,
                    account,
                    phase,
                    drawdown_pct: self.risk_state.current_drawdown_pct,
                    cfg: &self.cfg.exit,
                    pip,
                };
                self.coordinator.evaluate_position(&env)
            };

            if let Some(decision) = decision {
                self.apply_exit(&position, decision, symbol_info, now).await;
            }
        }
    }

    async fn apply_exit(
        &mut self,
        position: &Position,
        decision: ExitDecision,
        symbol_info: &SymbolInfo,
        now: DateTime<Utc>,
    ) {
        info!(
            ticket = decision.ticket,
            strategy = decision.strategy_id,
            priority = decision.priority,
            reason = %decision.reason,
            "applying exit decision"
        );

        match decision.action {
            ExitAction::CloseFull => {
                let close_result = self.lifecycle.full_close(position).await;
                match close_result {
                    Ok(ack) => {
                        self.tracker.remove(position.ticket);
                        self.on_position_closed(
                            position,
                            ack.pnl,
                            ack.price,
                            decision.strategy_id,
                            now,
                        );
                    }
                    Err(e) => self.note_broker_error("full_close", &e),
                }
            }
            ExitAction::ClosePartial(fraction) => {
                let close_result = self
                    .lifecycle
                    .partial_close(position, symbol_info, fraction)
                    .await;
                match close_result {
                    Ok(ack) => {
                        let closed_lot = symbol_info.snap_lot(position.lot * fraction);
                        if closed_lot > 0.0 && closed_lot < position.lot {
                            self.tracker.apply_partial_close(position.ticket, closed_lot);
                        } else {
                            self.tracker.remove(position.ticket);
                            self.on_position_closed(
                                position,
                                ack.pnl,
                                ack.price,
                                decision.strategy_id,
                                now,
                            );
                        }
                        self.risk_state.record_trade(ack.pnl);
                    }
                    Err(e) => self.note_broker_error("partial_close", &e),
                }
            }
            ExitAction::Modify { sl, tp } => {
                let modify_result =
                    self.lifecycle.set_stops(position, symbol_info, sl, tp).await;
                match modify_result {
                    Ok(()) => self.tracker.apply_stops(position.ticket, sl, tp),
                    Err(e @ BrokerError::StopsTooClose { .. }) => {
                        // Non-fatal: record and move on.
                        self.coordinator.record_modify_rejection();
                        self.metrics.error("stops_too_close");
                        debug!(ticket = position.ticket, error = %e, "modify skipped");
                    }
                    Err(e) => self.note_broker_error("set_stops", &e),
                }
            }
        }
    }

    /// Book-keeping shared by broker-reported and engine-initiated closes.
    fn on_position_closed(
        &mut self,
        position: &Position,
        pnl: f64,
        exit_price: f64,
        exit_strategy: &str,
        now: DateTime<Utc>,
    ) {
        self.risk_state.record_trade(pnl);
        self.metrics.trade_closed(pnl);
        self.db.record_trade(TradeRow {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: None,
            entry_ts: position.entry_time,
            exit_ts: now,
            entry_price: position.entry_price,
            exit_price,
            lot: position.lot,
            pnl,
            mae: position.mae(),
            mfe: position.mfe(),
            exit_strategy: exit_strategy.to_string(),
        });
    }

    // -------------------------------------------------------------------------
    // Persistence at the cycle boundary
    // -------------------------------------------------------------------------

    fn persist_cycle(
        &mut self,
        now: DateTime<Utc>,
        account: Option<&Account>,
    ) -> anyhow::Result<()> {
        let fallback = Account {
            balance: 0.0,
            equity: 0.0,
            margin: 0.0,
            free_margin: 0.0,
            currency: "USD".into(),
            trade_allowed: false,
        };
        let account_for_metrics = account
            .cloned()
            .or_else(|| self.last_account.clone())
            .unwrap_or(fallback);

        let record = self.metrics.build_record(
            now.timestamp_millis(),
            &account_for_metrics,
            &self.risk_state,
            &self.tracker.open_positions(),
            self.coordinator.stats(),
            self.degraded,
            self.metrics_queue.dropped,
        );
        self.metrics_queue.push(record);

        let snapshot = StateSnapshot {
            saved_at: now,
            cycle: self.cycle_count,
            account: account.cloned().or_else(|| self.last_account.clone()),
            positions: self.tracker.open_positions(),
            risk: self.risk_state.clone(),
            recent_errors: self.recent_errors.iter().cloned().collect(),
            recent_decisions: self.recent_decisions.iter().cloned().collect(),
            degraded: self.degraded,
        };
        if let Err(e) = snapshot.save(&self.cfg.snapshot_path) {
            warn!(error = %e, "snapshot save failed");
        }

        self.db.flush()?;
        Ok(())
    }

    fn note_broker_error(&mut self, operation: &str, error: &BrokerError) {
        warn!(operation, error = %error, "broker call failed");
        self.metrics.error(error.kind());
        self.push_error(error.kind(), format!("{operation}: {error}"));
    }

    fn push_error(&mut self, kind: &str, message: String) {
        self.recent_errors.push_back(ErrorRecord {
            message,
            kind: kind.to_string(),
            at: Utc::now(),
        });
        while self.recent_errors.len() > MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
    }

    fn push_decision(&mut self, decision: DecisionRecord) {
        self.recent_decisions.push_back(decision);
        while self.recent_decisions.len() > MAX_RECENT_DECISIONS {
            self.recent_decisions.pop_front();
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Graceful tear-down: optionally flatten engine-owned positions, persist
    /// the final snapshot, flush the trade db, drain metrics, release the
    /// broker. The broker's close() runs exactly once, last.
    pub async fn shutdown(mut self, close_positions: bool) {
        info!(close_positions, "engine shutdown started");

        if close_positions {
            let positions = self.tracker.open_positions();
            for position in positions {
                if position.opened_by == crate::types::OpenedBy::External {
                    continue;
                }
                let close_result = self.lifecycle.full_close(&position).await;
                match close_result {
                    Ok(ack) => {
                        self.tracker.remove(position.ticket);
                        self.on_position_closed(
                            &position,
                            ack.pnl,
                            ack.price,
                            "shutdown",
                            Utc::now(),
                        );
                    }
                    Err(e) => warn!(ticket = position.ticket, error = %e, "close-on-exit failed"),
                }
            }
        }

        if let Err(e) = self.persist_cycle(Utc::now(), None) {
            warn!(error = %e, "final persistence failed");
        }

        // Dropping the queue disconnects the writer; it drains and exits.
        drop(self.metrics_queue);

        self.broker.close().await;
        info!("engine shutdown complete");
    }
}
