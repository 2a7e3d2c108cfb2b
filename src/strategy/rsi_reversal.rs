// =============================================================================
// RSI Reversal — cross back from an overbought / oversold extreme
// =============================================================================
//
// Short when RSI falls back through 70 from above; long when it recovers up
// through 30. The cross-back (not the extreme itself) is the trigger.
// =============================================================================

use crate::config::EngineConfig;
use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::strategy::Strategy;
use crate::types::{Bar, Side, Signal};

const OVERBOUGHT: f64 = 70.0;
const OVERSOLD: f64 = 30.0;

pub struct RsiReversal;

impl Strategy for RsiReversal {
    fn id(&self) -> &'static str {
        "rsi_reversal"
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        _market: &MarketContext,
        cfg: &EngineConfig,
    ) -> Option<Signal> {
        let rsi = indicators.keyed("rsi", "value")?;
        let rsi_prev = indicators.keyed("rsi", "prev")?;
        bars.last()?;

        let (side, depth) = if rsi_prev >= OVERBOUGHT && rsi < OVERBOUGHT {
            (Side::Short, rsi_prev - OVERBOUGHT)
        } else if rsi_prev <= OVERSOLD && rsi > OVERSOLD {
            (Side::Long, OVERSOLD - rsi_prev)
        } else {
            return None;
        };

        // Deeper extremes revert harder.
        let confidence = (0.5 + depth / 40.0).clamp(0.0, 1.0);
        Some(Signal::new(
            cfg.symbol.clone(),
            side,
            confidence,
            self.id(),
            format!("rsi crossed back from extreme: {:.1} -> {:.1}", rsi_prev, rsi),
        ))
    }
}
