// =============================================================================
// Strategy Registry — configured entry strategies behind one seam
// =============================================================================
//
// Each strategy is a pure function of (bars, indicators, market context,
// config) returning an optional signal. Strategies hold no state; the
// registry owns them for the lifetime of the engine and the loop passes
// read-only handles in.
// =============================================================================

pub mod ema_cross;
pub mod mean_reversion;
pub mod momentum;
pub mod rsi_reversal;
pub mod scalping;
pub mod selector;
pub mod sma_cross;
pub mod trend_follow;

use tracing::debug;

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::types::{Bar, Signal};

/// An entry strategy. Implementations must be pure: same inputs, same output,
/// no retained state between cycles.
pub trait Strategy: Send + Sync {
    /// Stable identifier used in config, weights, and the signals table.
    fn id(&self) -> &'static str;

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal>;
}

/// Owns the configured strategies.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Build the registry from the configured strategy names. Unknown names
    /// were already rejected by config validation; they are skipped here as a
    /// second line of defence.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let names: Vec<String> = match cfg.strategy.mode.as_str() {
            // "single" runs only the first configured strategy.
            "single" => cfg.strategy.strategies.iter().take(1).cloned().collect(),
            _ => cfg.strategy.strategies.clone(),
        };

        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        for name in &names {
            match Self::instantiate(name) {
                Some(s) => strategies.push(s),
                None => debug!(strategy = %name, "unknown strategy name skipped"),
            }
        }

        Self { strategies }
    }

    fn instantiate(name: &str) -> Option<Box<dyn Strategy>> {
        match name {
            "sma_cross" => Some(Box::new(sma_cross::SmaCross)),
            "ema_cross" => Some(Box::new(ema_cross::EmaCross)),
            "momentum_breakout" => Some(Box::new(momentum::MomentumBreakout)),
            "scalping" => Some(Box::new(scalping::Scalping)),
            "trend_follow" => Some(Box::new(trend_follow::TrendFollow)),
            "mean_reversion" => Some(Box::new(mean_reversion::MeanReversion)),
            "rsi_reversal" => Some(Box::new(rsi_reversal::RsiReversal)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run every configured strategy and collect the candidate signals.
    pub fn evaluate_all(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        for strategy in &self.strategies {
            if let Some(signal) = strategy.evaluate(bars, indicators, market, cfg) {
                debug!(
                    strategy = strategy.id(),
                    side = %signal.side,
                    confidence = signal.confidence,
                    "candidate signal"
                );
                signals.push(signal);
            }
        }
        signals
    }
}

/// Confidence from the gap between two crossing averages, scaled by ATR:
/// 0.5 + 0.5 * min(1, |gap| / atr). A wide cross in calm markets reads as
/// high conviction.
pub(crate) fn cross_confidence(gap: f64, atr: f64) -> f64 {
    if atr > 0.0 {
        0.5 + 0.5 * (gap.abs() / atr).min(1.0)
    } else {
        0.5
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::EngineConfig;
    use crate::context::{MarketContext, Session, VolatilityLevel};
    use crate::indicators::{compute_snapshot, IndicatorSnapshot};
    use crate::types::Bar;

    pub fn market() -> MarketContext {
        MarketContext {
            volatility_level: VolatilityLevel::Normal,
            spread_pips: 1.0,
            trend_strength: 20.0,
            session: Session::London,
            near_news_event: false,
            near_market_close: false,
            atr: 1.0,
        }
    }

    pub fn snapshot(bars: &[Bar]) -> IndicatorSnapshot {
        compute_snapshot(bars, &EngineConfig::default().indicators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_all_known_strategies() {
        let cfg = EngineConfig::default();
        let registry = StrategyRegistry::from_config(&cfg);
        assert_eq!(registry.len(), cfg.strategy.strategies.len());
    }

    #[test]
    fn single_mode_keeps_only_first() {
        let mut cfg = EngineConfig::default();
        cfg.strategy.mode = "single".into();
        let registry = StrategyRegistry::from_config(&cfg);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cross_confidence_bounds() {
        assert_eq!(cross_confidence(0.0, 1.0), 0.5);
        assert_eq!(cross_confidence(5.0, 1.0), 1.0);
        assert!((cross_confidence(0.5, 1.0) - 0.75).abs() < 1e-12);
        // Zero ATR degrades to the baseline instead of dividing by zero.
        assert_eq!(cross_confidence(1.0, 0.0), 0.5);
    }
}
