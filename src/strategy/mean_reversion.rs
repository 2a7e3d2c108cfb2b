// =============================================================================
// Mean Reversion — fade closes stretched outside the Bollinger bands
// =============================================================================
//
// Enters counter-trend when the close lands beyond the band by a sigma
// margin AND the RSI confirms the extreme. Fighting a real trend is the
// classic way this style loses, so the selector also zeroes its weight when
// ADX reads strong.
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::Strategy;
use crate::types::{Bar, Side, Signal};

/// RSI confirming an oversold stretch.
const RSI_OVERSOLD: f64 = 30.0;

/// RSI confirming an overbought stretch.
const RSI_OVERBOUGHT: f64 = 70.0;

pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn id(&self) -> &'static str {
        "mean_reversion"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        _market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        let upper = indicators.keyed("bollinger", "upper")?;
        let lower = indicators.keyed("bollinger", "lower")?;
        let stddev = indicators.keyed("bollinger", "stddev")?;
        let rsi = indicators.keyed("rsi", "value")?;
        let close = bars.last()?.close;

        if stddev <= 0.0 {
            return None;
        }

        let (side, stretch_sigma) = if close <= lower && rsi <= RSI_OVERSOLD {
            (Side::Long, (lower - close) / stddev)
        } else if close >= upper && rsi >= RSI_OVERBOUGHT {
            (Side::Short, (close - upper) / stddev)
        } else {
            return None;
        };

        let confidence = (0.5 + 0.25 * stretch_sigma).clamp(0.0, 1.0);
        Some(Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!(
                "close {:.5} stretched {:.2} sigma outside band, rsi {:.1}",
                close, stretch_sigma, rsi
            ),
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
    fn long_on_oversold_stretch() {
        // A long gentle drift keeps RSI pinned low, then a short waterfall
        // drops the close through the lower band faster than the band can
        // widen.
        let bars = test_bars::build(80, |i| {
            let base = if i < 75 {
                100.0 - i as f64 * 0.05
            } else {
                96.3 - (i as f64 - 74.0) * 2.0
            };
            (base, base + 0.3, base - 0.3, base, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        let sig = MeanReversion
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .expect("waterfall should trigger a fade");
        assert_eq!(sig.side, Side::Long);
    }

    #[test]
    fn silent_inside_bands() {
        let bars = test_bars::build(80, |i| {
            let base = 100.0 + (i as f64 * 0.3).sin();
            (base, base + 0.5, base - 0.5, base, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        assert!(MeanReversion
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .is_none());
    }

    #[test]
    fn band_touch_without_rsi_extreme_is_ignored() {
        // A single-bar dip to the band with RSI still mid-range.
        let bars = test_bars::build(80, |i| {
            let base = if i == 79 { 98.8 } else { 100.0 + (i as f64 * 0.5).sin() * 0.4 };
            (base, base + 0.2, base - 0.2, base, 1000.0)
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        // RSI after one down-bar stays well above 30, so no signal.
        assert!(MeanReversion
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .is_none());
    }
}
