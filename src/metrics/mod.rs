// =============================================================================
// Metrics Collector — fixed-schema time series for CSV and Prometheus
// =============================================================================
//
// The collector lives inside the engine cycle and only does arithmetic; all
// file I/O happens in the isolated writer worker (`writer.rs`), fed through a
// bounded drop-oldest queue so the engine never blocks on metrics.
//
// The schema is explicit and stable: every record carries the same field
// list in the same order, so the CSV stays machine-readable across restarts.
// =============================================================================

pub mod writer;

use std::collections::HashMap;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use sysinfo::System;
use tracing::{debug, warn};

use crate::exit::ExitStats;
use crate::risk::RiskState;
use crate::types::{Account, AccountPhase, DrawdownTier, Position};

/// Strategy ids with dedicated funnel counters in the schema.
pub const TRACKED_STRATEGIES: [&str; 7] = [
    "sma_cross",
    "ema_cross",
    "momentum_breakout",
    "scalping",
    "trend_follow",
    "mean_reversion",
    "rsi_reversal",
];

/// Maximum trade returns kept for the Sharpe estimate.
const MAX_RETURNS: usize = 512;

/// Queue depth between the engine and the writer worker.
const QUEUE_DEPTH: usize = 64;

// =============================================================================
// Record
// =============================================================================

/// One fully-populated metrics row.
#[derive(Debug, Clone)]
pub struct MetricsRecord {
    pub fields: Vec<(&'static str, f64)>,
}

impl MetricsRecord {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Bounded metrics queue with drop-oldest semantics: when the writer falls
/// behind, the stalest record is discarded rather than blocking the engine.
pub struct MetricsQueue {
    tx: Sender<MetricsRecord>,
    rx: Receiver<MetricsRecord>,
    pub dropped: u64,
}

impl MetricsQueue {
    pub fn new() -> Self {
        let (tx, rx) = bounded(QUEUE_DEPTH);
        Self { tx, rx, dropped: 0 }
    }

    pub fn receiver(&self) -> Receiver<MetricsRecord> {
        self.rx.clone()
    }

    /// Non-blocking push.
    pub fn push(&mut self, record: MetricsRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                // Drop the oldest queued record to make room.
                let _ = self.rx.try_recv();
                self.dropped += 1;
                if self.tx.try_send(record).is_err() {
                    warn!("metrics queue still saturated — record dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("metrics writer gone — record dropped");
            }
        }
    }
}

impl Default for MetricsQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Session-long aggregates plus per-cycle instrumentation.
pub struct MetricsCollector {
    start: std::time::Instant,
    system: System,

    // Funnel counters.
    signals_generated: u64,
    signals_selected: u64,
    signals_risk_approved: u64,
    signals_risk_rejected: u64,
    signals_executed: u64,
    signals_by_strategy: HashMap<&'static str, u64>,

    // Trade aggregates.
    trades_total: u64,
    wins: u64,
    losses: u64,
    gross_profit: f64,
    gross_loss: f64,
    largest_win: f64,
    largest_loss: f64,
    session_realized_pnl: f64,
    returns: Vec<f64>,

    // Execution quality.
    orders_placed: u64,
    orders_failed: u64,
    last_latency_ms: f64,
    latency_sum_ms: f64,
    last_slippage: f64,
    slippage_sum: f64,

    // Cycle health.
    cycle_count: u64,
    last_cycle_ms: f64,
    cycle_overshoots: u64,
    broker_health_failures: u64,

    // Errors by kind.
    errors: HashMap<&'static str, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
            system: System::new(),
            signals_generated: 0,
            signals_selected: 0,
            signals_risk_approved: 0,
            signals_risk_rejected: 0,
            signals_executed: 0,
            signals_by_strategy: HashMap::new(),
            trades_total: 0,
            wins: 0,
            losses: 0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            session_realized_pnl: 0.0,
            returns: Vec::new(),
            orders_placed: 0,
            orders_failed: 0,
            last_latency_ms: 0.0,
            latency_sum_ms: 0.0,
            last_slippage: 0.0,
            slippage_sum: 0.0,
            cycle_count: 0,
            last_cycle_ms: 0.0,
            cycle_overshoots: 0,
            broker_health_failures: 0,
            errors: HashMap::new(),
        }
    }

    // ── Funnel ──────────────────────────────────────────────────────────

    pub fn signal_generated(&mut self, strategy_id: &str) {
        self.signals_generated += 1;
        if let Some(key) = TRACKED_STRATEGIES.iter().find(|s| **s == strategy_id) {
            *self.signals_by_strategy.entry(key).or_insert(0) += 1;
        }
    }

    pub fn signal_selected(&mut self) {
        self.signals_selected += 1;
    }

    pub fn risk_approved(&mut self) {
        self.signals_risk_approved += 1;
    }

    pub fn risk_rejected(&mut self) {
        self.signals_risk_rejected += 1;
    }

    pub fn order_placed(&mut self, latency_ms: f64, slippage: f64) {
        self.signals_executed += 1;
        self.orders_placed += 1;
        self.last_latency_ms = latency_ms;
        self.latency_sum_ms += latency_ms;
        self.last_slippage = slippage;
        self.slippage_sum += slippage;
    }

    pub fn order_failed(&mut self) {
        self.orders_failed += 1;
    }

    // ── Trades ──────────────────────────────────────────────────────────

    pub fn trade_closed(&mut self, pnl: f64) {
        self.trades_total += 1;
        self.session_realized_pnl += pnl;
        if pnl >= 0.0 {
            self.wins += 1;
            self.gross_profit += pnl;
            self.largest_win = self.largest_win.max(pnl);
        } else {
            self.losses += 1;
            self.gross_loss += pnl.abs();
            self.largest_loss = self.largest_loss.min(pnl);
        }
        if self.returns.len() == MAX_RETURNS {
            self.returns.remove(0);
        }
        self.returns.push(pnl);
    }

    // ── Cycle health ────────────────────────────────────────────────────

    pub fn cycle_finished(&mut self, duration_ms: f64, overshoot: bool) {
        self.cycle_count += 1;
        self.last_cycle_ms = duration_ms;
        if overshoot {
            self.cycle_overshoots += 1;
        }
    }

    pub fn health_failure(&mut self) {
        self.broker_health_failures += 1;
    }

    pub fn error(&mut self, kind: &'static str) {
        *self.errors.entry(kind).or_insert(0) += 1;
    }

    pub fn errors_total(&self) -> u64 {
        self.errors.values().sum()
    }

    // ── Derived statistics ──────────────────────────────────────────────

    fn win_rate(&self) -> f64 {
        if self.trades_total > 0 {
            self.wins as f64 / self.trades_total as f64
        } else {
            0.0
        }
    }

    fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    fn sharpe(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        let variance = self
            .returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        let sd = variance.sqrt();
        if sd > 0.0 {
            mean / sd * (n as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Build the full fixed-schema record for this cycle.
    pub fn build_record(
        &mut self,
        now_epoch_ms: i64,
        account: &Account,
        risk: &RiskState,
        open_positions: &[Position],
        exit_stats: &ExitStats,
        degraded: bool,
        queue_dropped: u64,
    ) -> MetricsRecord {
        self.system.refresh_all();
        let (cpu_pct, mem_mb) = current_process_usage(&self.system);

        let open_lots: f64 = open_positions.iter().map(|p| p.lot).sum();
        let unrealized: f64 = open_positions.iter().map(|p| p.unrealized_pnl).sum();
        let adopted = open_positions
            .iter()
            .filter(|p| p.opened_by == crate::types::OpenedBy::Adopted)
            .count() as f64;

        let phase = AccountPhase::derive(account.balance, risk.current_drawdown_pct, 15.0);
        let margin_level = if account.margin > 0.0 {
            account.equity / account.margin * 100.0
        } else {
            0.0
        };

        let mut fields: Vec<(&'static str, f64)> = vec![
            ("ts_epoch_ms", now_epoch_ms as f64),
            // Account.
            ("account_balance", account.balance),
            ("account_equity", account.equity),
            ("account_margin", account.margin),
            ("account_free_margin", account.free_margin),
            ("account_margin_level_pct", margin_level),
            ("account_trade_allowed", account.trade_allowed as u8 as f64),
            ("account_phase", phase_code(phase)),
            // PnL.
            ("pnl_daily_realized", risk.daily_realized_pnl),
            ("pnl_session_realized", self.session_realized_pnl),
            ("pnl_unrealized_total", unrealized),
            ("pnl_gross_profit", self.gross_profit),
            ("pnl_gross_loss", self.gross_loss),
            ("pnl_largest_win", self.largest_win),
            ("pnl_largest_loss", self.largest_loss),
            // Performance.
            ("trades_total", self.trades_total as f64),
            ("trades_wins", self.wins as f64),
            ("trades_losses", self.losses as f64),
            ("win_rate", self.win_rate()),
            ("profit_factor", finite_or_zero(self.profit_factor())),
            ("sharpe_ratio", self.sharpe()),
            // Drawdown.
            ("peak_equity", risk.peak_equity),
            ("drawdown_pct", risk.current_drawdown_pct),
            ("drawdown_tier", tier_code(risk.drawdown_tier())),
            ("daily_trade_count", risk.daily_trade_count as f64),
            // Execution quality.
            ("orders_placed", self.orders_placed as f64),
            ("orders_failed", self.orders_failed as f64),
            ("order_latency_last_ms", self.last_latency_ms),
            (
                "order_latency_avg_ms",
                if self.orders_placed > 0 {
                    self.latency_sum_ms / self.orders_placed as f64
                } else {
                    0.0
                },
            ),
            ("order_slippage_last_points", self.last_slippage),
            (
                "order_slippage_avg_points",
                if self.orders_placed > 0 {
                    self.slippage_sum / self.orders_placed as f64
                } else {
                    0.0
                },
            ),
            // Signal funnel.
            ("signals_generated", self.signals_generated as f64),
            ("signals_selected", self.signals_selected as f64),
            ("signals_risk_approved", self.signals_risk_approved as f64),
            ("signals_risk_rejected", self.signals_risk_rejected as f64),
            ("signals_executed", self.signals_executed as f64),
        ];

        for strategy in TRACKED_STRATEGIES {
            let count = self
                .signals_by_strategy
                .get(strategy)
                .copied()
                .unwrap_or(0) as f64;
            fields.push((strategy_field_name(strategy), count));
        }

        fields.extend_from_slice(&[
            // Exits.
            ("exit_evaluations", exit_stats.evaluations as f64),
            (
                "exit_decisions",
                exit_stats.decisions_by_strategy.values().sum::<u64>() as f64,
            ),
            (
                "exit_modify_rejections",
                exit_stats.modify_rejections as f64,
            ),
            // Exposure.
            ("open_positions", open_positions.len() as f64),
            ("open_lots", open_lots),
            ("adopted_positions", adopted),
            // Cycle health.
            ("cycle_count", self.cycle_count as f64),
            ("cycle_duration_last_ms", self.last_cycle_ms),
            ("cycle_overshoots", self.cycle_overshoots as f64),
            ("bridge_degraded", degraded as u8 as f64),
            (
                "bridge_health_failures",
                self.broker_health_failures as f64,
            ),
            ("metrics_queue_dropped", queue_dropped as f64),
            // Errors.
            ("errors_total", self.errors_total() as f64),
            (
                "errors_broker_transient",
                self.errors.get("broker_transient").copied().unwrap_or(0) as f64,
            ),
            (
                "errors_broker_permanent",
                self.errors.get("broker_permanent").copied().unwrap_or(0) as f64,
            ),
            (
                "errors_stops_too_close",
                self.errors.get("stops_too_close").copied().unwrap_or(0) as f64,
            ),
            (
                "errors_internal",
                self.errors.get("internal").copied().unwrap_or(0) as f64,
            ),
            // System.
            ("process_cpu_pct", cpu_pct),
            ("process_memory_mb", mem_mb),
            ("uptime_seconds", self.start.elapsed().as_secs_f64()),
        ]);

        MetricsRecord { fields }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn phase_code(phase: AccountPhase) -> f64 {
    match phase {
        AccountPhase::Micro => 0.0,
        AccountPhase::Seed => 1.0,
        AccountPhase::Growth => 2.0,
        AccountPhase::Established => 3.0,
        AccountPhase::Mature => 4.0,
        AccountPhase::Recovery => 5.0,
    }
}

fn tier_code(tier: DrawdownTier) -> f64 {
    match tier {
        DrawdownTier::Normal => 0.0,
        DrawdownTier::Warning => 1.0,
        DrawdownTier::Severe => 2.0,
        DrawdownTier::Critical => 3.0,
        DrawdownTier::Emergency => 4.0,
    }
}

fn strategy_field_name(strategy: &str) -> &'static str {
    match strategy {
        "sma_cross" => "signals_sma_cross",
        "ema_cross" => "signals_ema_cross",
        "momentum_breakout" => "signals_momentum_breakout",
        "scalping" => "signals_scalping",
        "trend_follow" => "signals_trend_follow",
        "mean_reversion" => "signals_mean_reversion",
        _ => "signals_rsi_reversal",
    }
}

fn current_process_usage(system: &System) -> (f64, f64) {
    let pid = sysinfo::Pid::from_u32(std::process::id());
    match system.process(pid) {
        Some(process) => (
            process.cpu_usage() as f64,
            process.memory() as f64 / (1024.0 * 1024.0),
        ),
        None => (0.0, 0.0),
    }
}
