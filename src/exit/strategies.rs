// =============================================================================
// Built-in Exit Strategies
// =============================================================================
//
// Base priorities:
//
//   survival_mode     100   margin starvation or emergency drawdown
//   micro_protection   95   micro/seed phase banks small profits
//   stop_loss          90   price breached the SL
//   adverse_movement   80   rapid move against within a few bars
//   trailing_stop      80   ratchets the SL behind the MFE
//   session_close      70   near the market close window
//   profit_target      70   MFE reached the R-multiple target
//   take_profit        70   price breached the TP
//   confluence_exit    65   several indicators agree on reversal
//   time_based         60   held too long
//   break_even         50   at half target, SL moves to entry
//
// All are stateless; idempotence comes from the position's own SL/TP state
// (a break-even move disarms break_even on the next cycle because the SL no
// longer sits on the losing side).
// =============================================================================

use crate::exit::{ExitAction, ExitEnv, ExitProposal, ExitStrategy};
use crate::types::AccountPhase;

/// Build a registered exit strategy by config name.
pub fn instantiate(name: &str) -> Option<Box<dyn ExitStrategy>> {
    match name {
        "survival_mode" => Some(Box::new(SurvivalMode)),
        "micro_protection" => Some(Box::new(MicroProtection)),
        "stop_loss" => Some(Box::new(StopLoss)),
        "adverse_movement" => Some(Box::new(AdverseMovement)),
        "trailing_stop" => Some(Box::new(TrailingStop)),
        "session_close" => Some(Box::new(SessionClose)),
        "profit_target" => Some(Box::new(ProfitTarget)),
        "take_profit" => Some(Box::new(TakeProfit)),
        "confluence_exit" => Some(Box::new(ConfluenceExit)),
        "time_based" => Some(Box::new(TimeBased)),
        "break_even" => Some(Box::new(BreakEven)),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// SurvivalMode
// -----------------------------------------------------------------------------

pub struct SurvivalMode;

impl ExitStrategy for SurvivalMode {
    fn id(&self) -> &'static str {
        "survival_mode"
    }

    fn base_priority(&self) -> f64 {
        100.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let margin_starved = env.account.margin > 0.0
            && (env.account.equity / env.account.margin) * 100.0
                < env.cfg.survival_margin_level_pct;
        let emergency_drawdown = env.drawdown_pct >= 20.0;

        if margin_starved || emergency_drawdown {
            return Some(ExitProposal {
                action: ExitAction::CloseFull,
                reason: if margin_starved {
                    format!(
                        "margin level below {:.0}%",
                        env.cfg.survival_margin_level_pct
                    )
                } else {
                    format!("emergency drawdown {:.1}%", env.drawdown_pct)
                },
            });
        }
        None
    }
}

// -----------------------------------------------------------------------------
// MicroProtection
// -----------------------------------------------------------------------------

pub struct MicroProtection;

impl ExitStrategy for MicroProtection {
    fn id(&self) -> &'static str {
        "micro_protection"
    }

    fn base_priority(&self) -> f64 {
        95.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        if !matches!(env.phase, AccountPhase::Micro | AccountPhase::Seed) {
            return None;
        }
        if env.pctx.holding_minutes < env.cfg.micro_min_hold_minutes {
            return None;
        }

        let signed_move = env.position.side.sign()
            * (env.position.current_price - env.position.entry_price);
        let profit_pips = signed_move / env.pip.max(f64::MIN_POSITIVE);

        if profit_pips >= env.cfg.micro_profit_pips {
            return Some(ExitProposal {
                action: ExitAction::CloseFull,
                reason: format!(
                    "micro account banks {:.1} pips after {} minutes",
                    profit_pips, env.pctx.holding_minutes
                ),
            });
        }
        None
    }
}

// -----------------------------------------------------------------------------
// StopLoss
// -----------------------------------------------------------------------------

pub struct StopLoss;

impl ExitStrategy for StopLoss {
    fn id(&self) -> &'static str {
        "stop_loss"
    }

    fn base_priority(&self) -> f64 {
        90.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let sl = env.position.sl?;
        let breached =
            env.position.side.sign() * (env.position.current_price - sl) <= 0.0;
        breached.then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!(
                "price {:.5} breached SL {:.5}",
                env.position.current_price, sl
            ),
        })
    }
}

// -----------------------------------------------------------------------------
// AdverseMovement
// -----------------------------------------------------------------------------

pub struct AdverseMovement;

impl ExitStrategy for AdverseMovement {
    fn id(&self) -> &'static str {
        "adverse_movement"
    }

    fn base_priority(&self) -> f64 {
        80.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let window = env.cfg.adverse_window_bars;
        if window == 0 || env.bars.len() < window + 1 || env.mctx.atr <= 0.0 {
            return None;
        }

        let reference = env.bars[env.bars.len() - 1 - window].close;
        let last = env.bars[env.bars.len() - 1].close;
        let adverse_move = env.position.side.sign() * (reference - last);
        let threshold = env.cfg.adverse_atr_mult * env.mctx.atr;

        (adverse_move >= threshold).then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!(
                "adverse move {:.5} over {} bars exceeds {:.2}x ATR",
                adverse_move, window, env.cfg.adverse_atr_mult
            ),
        })
    }
}

// -----------------------------------------------------------------------------
// TrailingStop
// -----------------------------------------------------------------------------

pub struct TrailingStop;

impl ExitStrategy for TrailingStop {
    fn id(&self) -> &'static str {
        "trailing_stop"
    }

    fn base_priority(&self) -> f64 {
        80.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let risk = env.initial_risk()?;
        if env.pctx.mfe < env.cfg.trailing_activation_r * risk {
            return None;
        }

        let sign = env.position.side.sign();
        let trail_distance = env.cfg.trailing_distance_r * risk;
        let new_sl = env.position.entry_price + sign * (env.pctx.mfe - trail_distance);

        // Only ever ratchet toward profit.
        if let Some(current_sl) = env.position.sl {
            if sign * (new_sl - current_sl) <= 0.0 {
                return None;
            }
        }

        Some(ExitProposal {
            action: ExitAction::Modify {
                sl: Some(new_sl),
                tp: None,
            },
            reason: format!("trailing SL to {:.5} behind MFE {:.5}", new_sl, env.pctx.mfe),
        })
    }
}

// -----------------------------------------------------------------------------
// SessionClose
// -----------------------------------------------------------------------------

pub struct SessionClose;

impl ExitStrategy for SessionClose {
    fn id(&self) -> &'static str {
        "session_close"
    }

    fn base_priority(&self) -> f64 {
        70.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        env.mctx.near_market_close.then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: "flattening ahead of market close".to_string(),
        })
    }
}

// -----------------------------------------------------------------------------
// ProfitTarget
// -----------------------------------------------------------------------------

pub struct ProfitTarget;

impl ExitStrategy for ProfitTarget {
    fn id(&self) -> &'static str {
        "profit_target"
    }

    fn base_priority(&self) -> f64 {
        70.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let risk = env.initial_risk()?;
        let target = env.cfg.profit_target_r * risk;
        (target > 0.0 && env.pctx.mfe >= target).then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!(
                "MFE {:.5} reached {:.1}R target",
                env.pctx.mfe, env.cfg.profit_target_r
            ),
        })
    }
}

// -----------------------------------------------------------------------------
// TakeProfit
// -----------------------------------------------------------------------------

pub struct TakeProfit;

impl ExitStrategy for TakeProfit {
    fn id(&self) -> &'static str {
        "take_profit"
    }

    fn base_priority(&self) -> f64 {
        70.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let tp = env.position.tp?;
        let breached =
            env.position.side.sign() * (env.position.current_price - tp) >= 0.0;
        breached.then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!(
                "price {:.5} breached TP {:.5}",
                env.position.current_price, tp
            ),
        })
    }
}

// -----------------------------------------------------------------------------
// ConfluenceExit
// -----------------------------------------------------------------------------

pub struct ConfluenceExit;

impl ExitStrategy for ConfluenceExit {
    fn id(&self) -> &'static str {
        "confluence_exit"
    }

    fn base_priority(&self) -> f64 {
        65.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        // Count indicators voting for a reversal against the position. The
        // voter set and the agreement threshold are deliberately
        // parameterized; three agreeing voters is the default.
        let sign = env.position.side.sign();
        let ind = env.indicators;
        let mut votes: Vec<&str> = Vec::new();

        if let Some(rsi) = ind.keyed("rsi", "value") {
            let extreme = if sign > 0.0 { rsi >= 70.0 } else { rsi <= 30.0 };
            if extreme {
                votes.push("rsi");
            }
        }
        if let Some(hist) = ind.keyed("macd", "hist") {
            if sign * hist < 0.0 {
                votes.push("macd");
            }
        }
        if let Some(direction) = ind.keyed("supertrend", "direction") {
            if sign * direction < 0.0 {
                votes.push("supertrend");
            }
        }
        if let Some(k) = ind.keyed("stochastic", "k") {
            let extreme = if sign > 0.0 { k >= 80.0 } else { k <= 20.0 };
            if extreme {
                votes.push("stochastic");
            }
        }
        if let (Some(fast), Some(last)) = (
            ind.keyed("ema", "fast"),
            env.bars.last().map(|b| b.close),
        ) {
            if sign * (last - fast) < 0.0 {
                votes.push("ema");
            }
        }

        (votes.len() >= env.cfg.confluence_min_agreeing).then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!("reversal confluence: {}", votes.join("+")),
        })
    }
}

// -----------------------------------------------------------------------------
// TimeBased
// -----------------------------------------------------------------------------

pub struct TimeBased;

impl ExitStrategy for TimeBased {
    fn id(&self) -> &'static str {
        "time_based"
    }

    fn base_priority(&self) -> f64 {
        60.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        (env.pctx.holding_minutes >= env.cfg.max_hold_minutes).then(|| ExitProposal {
            action: ExitAction::CloseFull,
            reason: format!(
                "held {} minutes, limit {}",
                env.pctx.holding_minutes, env.cfg.max_hold_minutes
            ),
        })
    }
}

// -----------------------------------------------------------------------------
// BreakEven
// -----------------------------------------------------------------------------

pub struct BreakEven;

impl ExitStrategy for BreakEven {
    fn id(&self) -> &'static str {
        "break_even"
    }

    fn base_priority(&self) -> f64 {
        50.0
    }

    fn evaluate(&self, env: &ExitEnv<'_>) -> Option<ExitProposal> {
        let target = env.target_distance()?;
        let sign = env.position.side.sign();
        let signed_move = sign * (env.position.current_price - env.position.entry_price);
        if signed_move < 0.5 * target {
            return None;
        }

        // Already at or beyond entry: nothing to do. This is what makes the
        // move fire exactly once.
        if let Some(sl) = env.position.sl {
            if sign * (env.position.entry_price - sl) <= 0.0 {
                return None;
            }
        }

        Some(ExitProposal {
            action: ExitAction::Modify {
                sl: Some(env.position.entry_price),
                tp: None,
            },
            reason: format!(
                "half target reached, SL to entry {:.5}",
                env.position.entry_price
            ),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::test_env::EnvFixture;
    use crate::exit::ExitAction;

    #[test]
    fn stop_loss_fires_on_breach_only() {
        let fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 29_400.0);
        assert!(StopLoss.evaluate(&fixture.env()).is_some());

        let fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 29_600.0);
        assert!(StopLoss.evaluate(&fixture.env()).is_none());
    }

    #[test]
    fn take_profit_fires_on_breach() {
        let fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 31_050.0);
        assert!(TakeProfit.evaluate(&fixture.env()).is_some());
    }

    #[test]
    fn break_even_moves_sl_to_entry_exactly_once() {
        // Long at 30000, TP 30600, current 30300 — exactly half the target.
        let mut fixture = EnvFixture::long(30_000.0, 29_400.0, 30_600.0, 30_300.0);
        let proposal = BreakEven
            .evaluate(&fixture.env())
            .expect("break-even must fire at half target");
        match proposal.action {
            ExitAction::Modify { sl, tp } => {
                assert_eq!(sl, Some(30_000.0), "SL must be entry exactly");
                assert_eq!(tp, None);
            }
            other => panic!("expected modify, got {other:?}"),
        }

        // Apply the move; subsequent cycles must not re-fire.
        fixture.position.sl = Some(30_000.0);
        fixture.refresh();
        assert!(BreakEven.evaluate(&fixture.env()).is_none());
    }

    #[test]
    fn break_even_requires_half_target() {
        let fixture = EnvFixture::long(30_000.0, 29_400.0, 30_600.0, 30_299.0);
        assert!(BreakEven.evaluate(&fixture.env()).is_none());
    }

    #[test]
    fn trailing_stop_activates_and_ratchets() {
        // Risk = 500; MFE must reach 1R = 500 to activate.
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 32_000.0, 30_600.0);
        fixture.position.peak_favorable_price = 30_600.0;
        fixture.refresh();

        let proposal = TrailingStop
            .evaluate(&fixture.env())
            .expect("trailing stop should activate at 1R");
        match proposal.action {
            ExitAction::Modify { sl: Some(sl), .. } => {
                // entry + (600 - 0.5 * 500) = 30350
                assert!((sl - 30_350.0).abs() < 1e-6, "sl was {sl}");
            }
            other => panic!("expected SL modify, got {other:?}"),
        }

        // With the SL already at 30350, the same MFE proposes nothing new.
        fixture.position.sl = Some(30_350.0);
        fixture.refresh();
        assert!(TrailingStop.evaluate(&fixture.env()).is_none());
    }

    #[test]
    fn profit_target_fires_at_r_multiple() {
        // Risk 500, target 2R = 1000. MFE 1000 fires.
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 32_000.0, 31_000.0);
        fixture.position.peak_favorable_price = 31_000.0;
        fixture.refresh();
        assert!(ProfitTarget.evaluate(&fixture.env()).is_some());
    }

    #[test]
    fn profit_target_stands_down_after_break_even() {
        // SL at entry: initial risk reads None, so no R-based target exists.
        let mut fixture = EnvFixture::long(30_000.0, 30_000.0, 32_000.0, 31_000.0);
        fixture.position.peak_favorable_price = 31_000.0;
        fixture.refresh();
        assert!(ProfitTarget.evaluate(&fixture.env()).is_none());
    }

    #[test]
    fn time_based_fires_after_limit() {
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 30_100.0);
        fixture.position.entry_time = chrono::Utc::now() - chrono::Duration::hours(9);
        fixture.refresh();
        assert!(TimeBased.evaluate(&fixture.env()).is_some());
    }

    #[test]
    fn session_close_follows_market_context() {
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 30_100.0);
        assert!(SessionClose.evaluate(&fixture.env()).is_none());
        fixture.mctx.near_market_close = true;
        assert!(SessionClose.evaluate(&fixture.env()).is_some());
    }

    #[test]
    fn survival_mode_on_margin_starvation() {
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 30_100.0);
        fixture.account.margin = 9_000.0;
        fixture.account.equity = 9_500.0; // margin level ~105% < 150%
        assert!(SurvivalMode.evaluate(&fixture.env()).is_some());
    }

    #[test]
    fn micro_protection_banks_small_profit() {
        let mut fixture = EnvFixture::long(30_000.0, 29_500.0, 31_000.0, 30_001.0);
        fixture.refresh();
        let mut env_phase_test = fixture.env();
        env_phase_test.phase = AccountPhase::Micro;
        // 1.0 price move / 0.01 pip = 100 pips, held 30 min >= 10 min.
        assert!(MicroProtection.evaluate(&env_phase_test).is_some());

        // Mature accounts are not micro-protected.
        let env_mature = fixture.env();
        assert!(MicroProtection.evaluate(&env_mature).is_none());
    }

    #[test]
    fn adverse_movement_detects_fast_drop() {
        let mut fixture = EnvFixture::long(30_000.0, 28_000.0, 32_000.0, 29_000.0);
        // Rewrite the bar tail: a 1000-point drop over the last 3 bars with
        // ATR around 50.
        let n = fixture.bars.len();
        for (i, bar) in fixture.bars.iter_mut().enumerate().skip(n - 4) {
            let px = 30_000.0 - (i as f64 - (n - 4) as f64) * 333.0;
            bar.open = px;
            bar.high = px + 25.0;
            bar.low = px - 25.0;
            bar.close = px;
        }
        fixture.mctx.atr = 50.0;
        assert!(AdverseMovement.evaluate(&fixture.env()).is_some());
    }
}
