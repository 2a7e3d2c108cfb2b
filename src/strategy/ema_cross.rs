// =============================================================================
// EMA Cross — fast exponential average crossing the slow one
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::{cross_confidence, Strategy};
use crate::types::{Bar, Side, Signal};

pub struct EmaCross;

impl Strategy for EmaCross {
    fn id(&self) -> &'static str {
        "ema_cross"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        _market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        let fast = indicators.keyed("ema", "fast")?;
        let slow = indicators.keyed("ema", "slow")?;
        let fast_prev = indicators.keyed("ema", "fast_prev")?;
        let slow_prev = indicators.keyed("ema", "slow_prev")?;
        let atr = indicators.scalar("atr")?;
        bars.last()?;

        let crossed_up = fast_prev <= slow_prev && fast > slow;
        let crossed_down = fast_prev >= slow_prev && fast < slow;

        let side = if crossed_up {
            Side::Long
        } else if crossed_down {
            Side::Short
        } else {
            return None;
        };

        let confidence = cross_confidence(fast - slow, atr);
        Some(Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!("ema {:.5} crossed {:.5}", fast, slow),
        ))
    }
}
