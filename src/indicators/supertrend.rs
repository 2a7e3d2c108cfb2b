// =============================================================================
// Supertrend — ATR trailing band that flips on a close through the
// opposite band
// =============================================================================
//
//   hl2         = (high + low) / 2
//   upper_basic = hl2 + multiplier * ATR
//   lower_basic = hl2 - multiplier * ATR
//
// Final bands ratchet: the upper band only moves down while price closes
// below it, the lower band only moves up while price closes above it. The
// trend is down (line = upper band) until a close above the upper band flips
// it, and vice versa.
// =============================================================================

use crate::indicators::atr::atr;
use crate::types::Bar;

/// Supertrend output: the trailing line and the direction series
/// (+1 uptrend, -1 downtrend), both aligned 1:1 with the bars.
#[derive(Debug, Clone)]
pub struct SupertrendSeries {
    pub line: Vec<f64>,
    pub direction: Vec<f64>,
}

pub fn supertrend(bars: &[Bar], period: usize, multiplier: f64) -> SupertrendSeries {
    let n = bars.len();
    let mut line = vec![f64::NAN; n];
    let mut direction = vec![f64::NAN; n];

    let atr_series = atr(bars, period);
    if period == 0 || n < period + 1 {
        return SupertrendSeries { line, direction };
    }

    let mut final_upper = f64::NAN;
    let mut final_lower = f64::NAN;
    let mut trend_up = true;

    for i in 0..n {
        let a = atr_series[i];
        if !a.is_finite() {
            continue;
        }
        let hl2 = (bars[i].high + bars[i].low) / 2.0;
        let basic_upper = hl2 + multiplier * a;
        let basic_lower = hl2 - multiplier * a;

        let prev_close = if i > 0 { bars[i - 1].close } else { bars[i].close };

        final_upper = if final_upper.is_finite()
            && (basic_upper > final_upper && prev_close <= final_upper)
        {
            final_upper
        } else {
            basic_upper
        };
        final_lower = if final_lower.is_finite()
            && (basic_lower < final_lower && prev_close >= final_lower)
        {
            final_lower
        } else {
            basic_lower
        };

        // Flip on a close through the opposite band.
        if trend_up && bars[i].close < final_lower {
            trend_up = false;
        } else if !trend_up && bars[i].close > final_upper {
            trend_up = true;
        }

        line[i] = if trend_up { final_lower } else { final_upper };
        direction[i] = if trend_up { 1.0 } else { -1.0 };
    }

    SupertrendSeries { line, direction }
}
