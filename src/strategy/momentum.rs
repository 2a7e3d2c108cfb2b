// =============================================================================
// Momentum Breakout — close through the prior N-bar extreme on volume
// =============================================================================
//
// Long when the close crosses above the highest high of the previous
// `breakout_lookback` bars, short through the lowest low, and only when the
// breakout bar's volume is at least `VOLUME_MULT` times the lookback average.
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::Strategy;
use crate::types::{Bar, Side, Signal};

/// Breakout volume must exceed this multiple of the lookback average.
const VOLUME_MULT: f64 = 1.5;

pub struct MomentumBreakout;

impl Strategy for MomentumBreakout {
    fn id(&self) -> &'static str {
        "momentum_breakout"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        _market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        let lookback = cfg.indicators.breakout_lookback;
        if lookback == 0 || bars.len() < lookback + 2 {
            return None;
        }

        let last = bars.last()?;
        // Window excludes the breakout bar itself.
        let window = &bars[bars.len() - 1 - lookback..bars.len() - 1];
        let prior_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let prior_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / lookback as f64;

        if avg_volume > 0.0 && last.volume < VOLUME_MULT * avg_volume {
            return None;
        }

        let atr = indicators.scalar("atr")?;
        let (side, margin) = if last.close > prior_high {
            (Side::Long, last.close - prior_high)
        } else if last.close < prior_low {
            (Side::Short, prior_low - last.close)
        } else {
            return None;
        };

        let confidence = if atr > 0.0 {
            (0.5 + 0.5 * (margin / atr).min(1.0)).clamp(0.0, 1.0)
        } else {
            0.5
        };

        Some(Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!(
                "close {:.5} broke {}-bar {} on {:.0}x volume",
                last.close,
                lookback,
                if side == Side::Long { "high" } else { "low" },
                if avg_volume > 0.0 {
                    last.volume / avg_volume
                } else {
                    0.0
                }
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

    fn range_then_breakout(volume_spike: f64) -> Vec<Bar> {
        test_bars::build(60, |i| {
            if i < 59 {
                (100.0, 101.0, 99.0, 100.0, 1000.0)
            } else {
                // Breakout bar closes well above the 101.0 range high.
                (101.0, 104.0, 100.5, 103.5, volume_spike)
            }
        })
    }

    #[test]
    fn long_on_high_break_with_volume() {
        let bars = range_then_breakout(2000.0);
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        let sig = MomentumBreakout
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .expect("breakout should fire");
        assert_eq!(sig.side, Side::Long);
        assert!(sig.confidence > 0.5);
    }

    #[test]
    fn vetoed_without_volume() {
        let bars = range_then_breakout(900.0);
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        assert!(MomentumBreakout
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .is_none());
    }

    #[test]
    fn short_on_low_break() {
        let bars = test_bars::build(60, |i| {
            if i < 59 {
                (100.0, 101.0, 99.0, 100.0, 1000.0)
            } else {
                (99.0, 99.5, 96.0, 96.5, 2500.0)
            }
        });
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        let sig = MomentumBreakout
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .expect("breakdown should fire");
        assert_eq!(sig.side, Side::Short);
    }

    #[test]
    fn no_signal_inside_range() {
        let bars = test_bars::build(60, |_| (100.0, 101.0, 99.0, 100.0, 1000.0));
        let cfg = EngineConfig::default();
        let snap = test_support::snapshot(&bars);
        assert!(MomentumBreakout
            .evaluate(&bars, &snap, &test_support::market(), &cfg)
            .is_none());
    }
}
