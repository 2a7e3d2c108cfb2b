// =============================================================================
// Exit Coordinator — one decision per position per cycle
// =============================================================================
//
// Holds the ordered registry of exit strategies, each a pure function of the
// exit environment with a base priority in [0, 100]. Every cycle the
// coordinator runs all strategies against each open position, applies the
// dynamic priority adjustments (independently computed, then summed), and
// applies only the highest-priority decision. Ties go to registry order.
//
// A modify rejected by the broker with StopsTooClose is recorded and skipped;
// the loop moves on.
// =============================================================================

pub mod strategies;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::config::ExitConfig;
use crate::context::{MarketContext, PositionContext};
use crate::indicators::IndicatorSnapshot;
use crate::types::{Account, AccountPhase, Bar, Position};

/// What an exit wants done with the position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExitAction {
    CloseFull,
    /// Close this fraction (0, 1) of the position.
    ClosePartial(f64),
    Modify {
        sl: Option<f64>,
        tp: Option<f64>,
    },
}

/// The winning decision for one position this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ExitDecision {
    pub ticket: u64,
    pub action: ExitAction,
    pub strategy_id: &'static str,
    /// Adjusted priority the decision won with.
    pub priority: f64,
    pub reason: String,
}

/// An exit strategy's raw proposal, before priority adjustment.
#[derive(Debug, Clone)]
pub struct ExitProposal {
    pub action: ExitAction,
    pub reason: String,
}

/// Everything an exit strategy may look at. Strategies receive read access
/// only; the lifecycle write capability stays with the engine.
pub struct ExitEnv<'a> {
    pub position: &'a Position,
    pub pctx: &'a PositionContext,
    pub mctx: &'a MarketContext,
    pub bars: &'a [Bar],
    pub indicators: &'a IndicatorSnapshot,
    pub account: &'a Account,
    pub phase: AccountPhase,
    pub drawdown_pct: f64,
    pub cfg: &'a ExitConfig,
    /// Pip size in price units for the traded symbol.
    pub pip: f64,
}

impl ExitEnv<'_> {
    /// Initial risk (R) in price units: the distance from entry to the stop,
    /// provided the stop still sits on the losing side. After a break-even
    /// move this reads None and R-based exits stand down.
    pub fn initial_risk(&self) -> Option<f64> {
        let sl = self.position.sl?;
        let d = self.position.side.sign() * (self.position.entry_price - sl);
        (d > 0.0).then_some(d)
    }

    /// Distance from entry to the take profit, if one is set.
    pub fn target_distance(&self) -> Option<f64> {
        let tp = self.position.tp?;
        let d = self.position.side.sign() * (tp - self.position.entry_price);
        (d > 0.0).then_some(d)
    }
}

/// A registered exit strategy.
pub trait ExitStrategy: Send + Sync {
    fn id(&self) -> &'static str;
    fn base_priority(&self) -> f64;
    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal>;
}

/// Counters exposed in metrics and the health snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExitStats {
    pub evaluations: u64,
    pub decisions_by_strategy: HashMap<String, u64>,
    pub modify_rejections: u64,
}

pub struct ExitCoordinator {
    /// (strategy, effective base priority) in registry order.
    strategies: Vec<(Box<dyn ExitStrategy>, f64)>,
    stats: ExitStats,
}

impl ExitCoordinator {
    /// Build the coordinator from the configured strategy list, applying any
    /// per-strategy base priority overrides.
    pub fn from_config(cfg: &ExitConfig) -> Self {
        let mut registered: Vec<(Box<dyn ExitStrategy>, f64)> = Vec::new();
        for name in &cfg.strategies {
            if let Some(strategy) = strategies::instantiate(name) {
                let base = cfg
                    .priorities
                    .get(name)
                    .copied()
                    .unwrap_or_else(|| strategy.base_priority())
                    .clamp(0.0, 100.0);
                registered.push((strategy, base));
            }
        }
        Self {
            strategies: registered,
            stats: ExitStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn stats(&self) -> &ExitStats {
        &self.stats
    }

    /// Count a broker StopsTooClose rejection of an applied decision.
    pub fn record_modify_rejection(&mut self) {
        self.stats.modify_rejections += 1;
    }

    /// Evaluate all strategies for one position and return the single
    /// highest-priority decision, if any strategy fired.
    pub fn evaluate_position(&mut self, env: &ExitEnv<'_>) -> Option<ExitDecision> {
        let mut best: Option<ExitDecision> = None;

        for (strategy, base) in &self.strategies {
            self.stats.evaluations += 1;
            let Some(proposal) = strategy.evaluate(env) else {
                continue;
            };

            let adjusted = base + priority_adjustment(strategy.id(), env);
            debug!(
                ticket = env.position.ticket,
                strategy = strategy.id(),
                base,
                adjusted,
                reason = %proposal.reason,
                "exit proposal"
            );

            // Strict > keeps registry order as the tie-break.
            let wins = best.as_ref().map_or(true, |b| adjusted > b.priority);
            if wins {
                best = Some(ExitDecision {
                    ticket: env.position.ticket,
                    action: proposal.action,
                    strategy_id: strategy.id(),
                    priority: adjusted,
                    reason: proposal.reason,
                });
            }
        }

        if let Some(decision) = &best {
            *self
                .stats
                .decisions_by_strategy
                .entry(decision.strategy_id.to_string())
                .or_insert(0) += 1;
        }
        best
    }
}

/// Context-dependent priority adjustment for one strategy. Each clause is
/// applied independently; the results sum.
fn priority_adjustment(strategy_id: &str, env: &ExitEnv<'_>) -> f64 {
    let mut delta = 0.0;

    if env.mctx.volatility_level.is_elevated()
        && matches!(strategy_id, "stop_loss" | "adverse_movement")
    {
        delta += 10.0;
    }

    if env.mctx.spread_pips > 3.0 {
        // Wide spread: prefer holding over paying for a bad fill.
        delta -= 5.0;
    }

    if env.mctx.near_news_event {
        delta += 15.0;
    }

    if env.mctx.near_market_close && matches!(strategy_id, "time_based" | "session_close") {
        delta += 20.0;
    }

    if matches!(strategy_id, "profit_target" | "take_profit") {
        if let Some(risk) = env.initial_risk() {
            let target = env.cfg.profit_target_r * risk;
            if target > 0.0 && env.pctx.mfe >= 0.8 * target {
                delta += 15.0;
            }
        }
    }

    if strategy_id == "time_based" && env.pctx.holding_minutes >= 240 {
        delta += 10.0;
    }

    if strategy_id == "stop_loss" && env.pctx.unrealized_pct <= -2.0 {
        delta += 20.0;
    }

    delta
}


#[cfg(test)]
mod tests {
    use super::test_env::EnvFixture;
    use super::*;

    #[test]
    fn coordinator_registers_all_configured_exits() {
        let cfg = ExitConfig::default();
        let coordinator = ExitCoordinator::from_config(&cfg);
        assert_eq!(coordinator.len(), cfg.strategies.len());
    }

    #[test]
    fn at_most_one_decision_per_position() {
        // Price below SL and holding beyond the time limit: two exits fire,
        // one decision comes back.
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 29_400.0);
        fixture.position.entry_time = chrono::Utc::now() - chrono::Duration::hours(20);
        fixture.refresh();

        let mut coordinator = ExitCoordinator::from_config(&fixture.cfg);
        let decision = coordinator.evaluate_position(&fixture.env());
        let decision = decision.expect("a decision must fire");
        // StopLoss (90, +20 for the deep loss) outranks TimeBased.
        assert_eq!(decision.strategy_id, "stop_loss");
        assert_eq!(decision.action, ExitAction::CloseFull);
    }

    #[test]
    fn deep_loss_boosts_stop_loss_priority() {
        let mut fixture = EnvFixture::long(30_000.0, 29_000.0, 31_000.0, 28_900.0);
        fixture.refresh();
        let mut coordinator = ExitCoordinator::from_config(&fixture.cfg);
        let decision = coordinator.evaluate_position(&fixture.env()).unwrap();
        assert_eq!(decision.strategy_id, "stop_loss");
        // 90 base + 20 deep-loss + 10 volatility? volatility normal here, so 110.
        assert!(decision.priority >= 110.0);
    }

    #[test]
    fn no_decision_when_nothing_fires() {
        let fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 30_050.0);
        let mut coordinator = ExitCoordinator::from_config(&fixture.cfg);
        assert!(coordinator.evaluate_position(&fixture.env()).is_none());
    }

    #[test]
    fn stats_count_decisions() {
        let fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 29_400.0);
        let mut coordinator = ExitCoordinator::from_config(&fixture.cfg);
        coordinator.evaluate_position(&fixture.env());
        assert_eq!(
            coordinator.stats().decisions_by_strategy.get("stop_loss"),
            Some(&1)
        );
        assert!(coordinator.stats().evaluations >= 11);
    }

    #[test]
    fn wide_spread_lowers_priorities() {
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 29_400.0);
        fixture.mctx.spread_pips = 5.0;
        let mut coordinator = ExitCoordinator::from_config(&fixture.cfg);
        let decision = coordinator.evaluate_position(&fixture.env()).unwrap();
        // 90 + 20 (deep loss) - 5 (spread) = 105.
        assert!((decision.priority - 105.0).abs() < 1e-9);
    }
}
