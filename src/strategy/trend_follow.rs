// =============================================================================
// Trend Follow — ADX-gated entries in the supertrend direction
// =============================================================================
//
// Only fires when ADX reads a real trend (>= 25) and the supertrend agrees
// with the proposed side. Conviction scales with ADX.
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::Strategy;
use crate::types::{Bar, Side, Signal};

/// Minimum ADX for a tradeable trend.
const ADX_FLOOR: f64 = 25.0;

pub struct TrendFollow;

impl Strategy for TrendFollow {
    fn id(&self) -> &'static str {
        "trend_follow"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        _market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        let adx = indicators.scalar("adx")?;
        if adx < ADX_FLOOR {
            return None;
        }

        let direction = indicators.keyed("supertrend", "direction")?;
        let line = indicators.keyed("supertrend", "line")?;
        let price = bars.last()?.close;

        let side = if direction > 0.0 {
            Side::Long
        } else {
            Side::Short
        };

        // Price must still be on the right side of the trailing line.
        if side.sign() * (price - line) <= 0.0 {
            return None;
        }

        let confidence = (adx / 50.0).clamp(0.0, 1.0);
        Some(Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!("adx {:.1}, supertrend {}", adx, side),
        ))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;
    use crate::strategy::test_support;

    #[test]
    fn long_in_strong_uptrend() {
        let bars = test_bars::build(120, |i| {
            let base = 100.0 + i as f64 * 2.0;
            (base, base + 1.0, base - 1.0, base + 0.8, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        let sig = TrendFollow
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .expect("strong trend should fire");
        assert_eq!(sig.side, Side::Long);
        assert!(sig.confidence > 0.5);
    }

    #[test]
    fn silent_in_chop() {
        let bars = test_bars::build(120, |i| {
            let base = 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 };
            (base, base + 1.5, base - 1.5, base, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        assert!(TrendFollow
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .is_none());
    }

    #[test]
    fn short_in_strong_downtrend() {
        let bars = test_bars::build(120, |i| {
            let base = 400.0 - i as f64 * 2.0;
            (base, base + 1.0, base - 1.0, base - 0.8, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        let sig = TrendFollow
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .expect("strong downtrend should fire");
        assert_eq!(sig.side, Side::Short);
    }
}
