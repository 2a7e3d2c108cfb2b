// =============================================================================
// Scalping — RSI inner-band crosses with a spread ceiling and tight stops
// =============================================================================
//
// Long when RSI crosses up through the short band (default 35), short when it
// crosses down through the long band (default 65). Entries are refused when
// the spread exceeds the configured ceiling — scalps cannot pay a wide
// spread. SL/TP are suggested tight, scaled to ATR.
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::Strategy;
use crate::types::{Bar, Side, Signal};

/// RSI band a long entry must cross up through.
const SHORT_MIN_BAND: f64 = 35.0;

/// RSI band a short entry must cross down through.
const LONG_MAX_BAND: f64 = 65.0;

/// SL distance in ATR multiples — tight by design of the style.
const SL_ATR: f64 = 1.0;

/// TP distance in ATR multiples.
const TP_ATR: f64 = 1.5;

pub struct Scalping;

impl Strategy for Scalping {
    fn id(&self) -> &'static str {
        "scalping"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        if market.spread_pips > cfg.risk.max_spread_threshold_pips {
            return None;
        }

        let rsi = indicators.keyed("rsi", "value")?;
        let rsi_prev = indicators.keyed("rsi", "prev")?;
        let atr = indicators.scalar("atr")?;
        let price = bars.last()?.close;

        let crossed_up = rsi_prev <= SHORT_MIN_BAND && rsi > SHORT_MIN_BAND;
        let crossed_down = rsi_prev >= LONG_MAX_BAND && rsi < LONG_MAX_BAND;

        let side = if crossed_up {
            Side::Long
        } else if crossed_down {
            Side::Short
        } else {
            return None;
        };

        // Distance from the band scales conviction.
        let band = if side == Side::Long {
            SHORT_MIN_BAND
        } else {
            LONG_MAX_BAND
        };
        let confidence = (0.5 + (rsi - band).abs() / 30.0).clamp(0.0, 1.0);

        let mut signal = Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!("rsi {:.1} crossed band {:.0}", rsi, band),
        );
        signal.suggested_sl = Some(price - side.sign() * SL_ATR * atr);
        signal.suggested_tp = Some(price + side.sign() * TP_ATR * atr);
        Some(signal)
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

    /// Falling prices, then a pop on the final bars so RSI recovers up
    /// through the 35 band.
    fn rsi_recovery() -> Vec<Bar> {
        test_bars::build(60, |i| {
            let base = if i < 55 {
                200.0 - i as f64 * 1.5
            } else {
                117.5 + (i as f64 - 55.0) * 2.5
            };
            (base, base + 0.5, base - 0.5, base, 1000.0)
        })
    }

    #[test]
    fn long_on_band_recovery() {
        let bars = rsi_recovery();
        let cfg = EngineConfig::default();
        let market = test_support::market();

        let mut found = None;
        for end in 30..=bars.len() {
            let window = &bars[..end];
            let snap = test_support::snapshot(window);
            if let Some(sig) = Scalping.evaluate(window, &snap, &market, &cfg) {
                found = Some(sig);
                break;
            }
        }
        let sig = found.expect("expected a scalp entry on the RSI recovery");
        assert_eq!(sig.side, Side::Long);
        assert!(sig.suggested_sl.is_some());
        assert!(sig.suggested_tp.is_some());
    }

    #[test]
    fn wide_spread_vetoes_entry() {
        let bars = rsi_recovery();
        let cfg = EngineConfig::default();
        let mut market = test_support::market();
        market.spread_pips = cfg.risk.max_spread_threshold_pips + 1.0;

        for end in 30..=bars.len() {
            let window = &bars[..end];
            let snap = test_support::snapshot(window);
            assert!(Scalping.evaluate(window, &snap, &market, &cfg).is_none());
        }
    }

    #[test]
    fn stops_are_tight_and_directional() {
        let bars = rsi_recovery();
        let cfg = EngineConfig::default();
        let market = test_support::market();
        for end in 30..=bars.len() {
            let window = &bars[..end];
            let snap = test_support::snapshot(window);
            if let Some(sig) = Scalping.evaluate(window, &snap, &market, &cfg) {
                let price = window.last().unwrap().close;
                let sl = sig.suggested_sl.unwrap();
                let tp = sig.suggested_tp.unwrap();
                assert!(sl < price, "long scalp SL must sit below price");
                assert!(tp > price, "long scalp TP must sit above price");
                return;
            }
        }
        panic!("no scalp signal produced");
    }
}
