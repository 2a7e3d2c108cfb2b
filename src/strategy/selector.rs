// =============================================================================
// Dynamic Selector — reduces candidate signals to one per (symbol, side)
// =============================================================================
//
// Pipeline:
//   1. Discard signals below `min_confidence`.
//   2. Optionally reshape confidence through the advisor (treated as an
//      affine transform, clamped back into [0, 1]).
//   3. Weight each survivor by its per-strategy weight times a regime
//      affinity derived from trend strength.
//   4. Keep the highest weighted confidence per (symbol, side); ties break
//      alphabetically on strategy id so selection is deterministic.
//
// Every signal that was evaluated but not selected is reported back so the
// signal funnel can be persisted with accepted = false.
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use crate::config::StrategyConfig;
use crate::context::MarketContext;
use crate::types::{Side, Signal};

/// ADX at or above this is a strong trend for affinity purposes.
const STRONG_TREND_ADX: f64 = 25.0;

/// ADX below this is a ranging market.
const RANGING_ADX: f64 = 20.0;

/// Optional confidence advisor. The engine treats it as an affine transform
/// on confidence and clamps the result; plug in an external scorer here.
pub trait ConfidenceAdvisor: Send + Sync {
    fn reshape(&self, signal: &Signal) -> f64;
}

/// Advisor that leaves confidence untouched.
pub struct IdentityAdvisor;

impl ConfidenceAdvisor for IdentityAdvisor {
    fn reshape(&self, signal: &Signal) -> f64 {
        signal.confidence
    }
}

/// A signal that did not survive selection, with the reason it was dropped.
#[derive(Debug, Clone)]
pub struct RejectedSignal {
    pub signal: Signal,
    pub reason: String,
}

/// Result of one selection pass.
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub selected: Vec<Signal>,
    pub rejected: Vec<RejectedSignal>,
}

pub struct DynamicSelector {
    advisor: Box<dyn ConfidenceAdvisor>,
}

impl Default for DynamicSelector {
    fn default() -> Self {
        Self {
            advisor: Box::new(IdentityAdvisor),
        }
    }
}

impl DynamicSelector {
    pub fn with_advisor(advisor: Box<dyn ConfidenceAdvisor>) -> Self {
        Self { advisor }
    }

    /// Reduce `signals` to at most one per (symbol, side).
    pub fn select(
        &self,
        signals: Vec<Signal>,
        market: &MarketContext,
        cfg: &StrategyConfig,
    ) -> SelectionOutcome {
        let mut outcome = SelectionOutcome::default();
        // Winner per (symbol, side): (weighted confidence, signal).
        let mut winners: HashMap<(String, Side), (f64, Signal)> = HashMap::new();

        for mut signal in signals {
            signal.confidence = self.advisor.reshape(&signal).clamp(0.0, 1.0);

            if signal.confidence < cfg.min_confidence {
                outcome.rejected.push(RejectedSignal {
                    reason: format!(
                        "confidence {:.2} below minimum {:.2}",
                        signal.confidence, cfg.min_confidence
                    ),
                    signal,
                });
                continue;
            }

            let weight = cfg.weights.get(&signal.strategy_id).copied().unwrap_or(1.0)
                * regime_affinity(&signal.strategy_id, market);

            if weight <= 0.0 {
                outcome.rejected.push(RejectedSignal {
                    reason: "zero regime affinity".to_string(),
                    signal,
                });
                continue;
            }

            let weighted = signal.confidence * weight;
            let key = (signal.symbol.clone(), signal.side);

            match winners.get_mut(&key) {
                None => {
                    winners.insert(key, (weighted, signal));
                }
                Some((best_score, best_signal)) => {
                    let replaces = weighted > *best_score
                        || (weighted == *best_score
                            && signal.strategy_id < best_signal.strategy_id);
                    if replaces {
                        let loser = std::mem::replace(best_signal, signal);
                        *best_score = weighted;
                        outcome.rejected.push(RejectedSignal {
                            signal: loser,
                            reason: "outweighed by a stronger signal".to_string(),
                        });
                    } else {
                        outcome.rejected.push(RejectedSignal {
                            reason: format!(
                                "outweighed by {} ({:.3} <= {:.3})",
                                best_signal.strategy_id, weighted, best_score
                            ),
                            signal,
                        });
                    }
                }
            }
        }

        outcome.selected = winners.into_values().map(|(_, s)| s).collect();
        // Deterministic output order for tests and logs.
        outcome
            .selected
            .sort_by(|a, b| (a.symbol.clone(), a.strategy_id.clone()).cmp(&(b.symbol.clone(), b.strategy_id.clone())));

        debug!(
            selected = outcome.selected.len(),
            rejected = outcome.rejected.len(),
            "signal selection complete"
        );
        outcome
    }
}

/// Regime affinity multiplier for a strategy given current trend strength.
fn regime_affinity(strategy_id: &str, market: &MarketContext) -> f64 {
    let adx = market.trend_strength;

    if adx >= STRONG_TREND_ADX {
        match strategy_id {
            "trend_follow" => 1.5,
            "momentum_breakout" => 1.25,
            // Fading a strong trend is how mean reversion dies.
            "mean_reversion" => 0.0,
            "rsi_reversal" => 0.75,
            _ => 1.0,
        }
    } else if adx < RANGING_ADX {
        match strategy_id {
            "mean_reversion" => 1.25,
            "rsi_reversal" => 1.2,
            "scalping" => 1.1,
            "trend_follow" => 0.5,
            _ => 1.0,
        }
    } else {
        1.0
    }
}
