// =============================================================================
// Average Directional Index (ADX) — Standard Wilder Formulation
// =============================================================================
//
//   +DM = high_t - high_{t-1}  when it exceeds the down-move, else 0
//   -DM = low_{t-1} - low_t    when it exceeds the up-move, else 0
//   Smoothed +DM / -DM / TR use Wilder's smoothing over `period`.
//   +DI = 100 * smoothed(+DM) / smoothed(TR)
//   -DI = 100 * smoothed(-DM) / smoothed(TR)
//   DX  = 100 * |+DI - -DI| / (+DI + -DI)
//   ADX = Wilder-smoothed DX over `period`
// =============================================================================

use crate::types::Bar;

/// Compute the ADX series aligned 1:1 with `bars`. The first `2 * period - 1`
/// entries are NaN (warmup of the smoothed DMs plus the ADX seed).
pub fn adx(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < 2 * period {
        return out;
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut tr = Vec::with_capacity(n - 1);

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let range = (bars[i].high - bars[i].low)
            .max((bars[i].high - bars[i - 1].close).abs())
            .max((bars[i].low - bars[i - 1].close).abs());
        tr.push(range);
    }

    // Wilder smoothing: seed with the plain sum of the first `period` values,
    // then smoothed_t = smoothed_{t-1} - smoothed_{t-1}/period + value_t.
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();
    let mut sm_tr: f64 = tr[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(n - period);
    let period_f = period as f64;

    for i in period - 1..plus_dm.len() {
        if i >= period {
            sm_plus = sm_plus - sm_plus / period_f + plus_dm[i];
            sm_minus = sm_minus - sm_minus / period_f + minus_dm[i];
            sm_tr = sm_tr - sm_tr / period_f + tr[i];
        }

        let (plus_di, minus_di) = if sm_tr > 0.0 {
            (100.0 * sm_plus / sm_tr, 100.0 * sm_minus / sm_tr)
        } else {
            (0.0, 0.0)
        };

        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };
        dx_values.push(dx);
    }

    // ADX: Wilder average of DX, seeded with the SMA of the first `period` DXs.
    if dx_values.len() < period {
        return out;
    }
    let mut adx_value: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    // First ADX lands at bar index (2 * period - 1).
    out[2 * period - 1] = adx_value;
    for (offset, &dx) in dx_values.iter().enumerate().skip(period) {
        adx_value = (adx_value * (period_f - 1.0) + dx) / period_f;
        let bar_index = period + offset;
        if bar_index < n {
            out[bar_index] = adx_value;
        }
    }

    out
}

/// Most recent ADX value, or None inside warmup.
pub fn latest(bars: &[Bar], period: usize) -> Option<f64> {
    adx(bars, period).last().copied().filter(|v| v.is_finite())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    #[test]
    fn adx_short_series_is_nan() {
        let bars = test_bars::drifting(20);
        assert!(adx(&bars, 14).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn adx_bounded_0_100() {
        let bars = test_bars::build(120, |i| {
            let base = 100.0 + (i as f64 * 0.4).sin() * 8.0;
            (base, base + 2.0, base - 2.0, base + 1.0, 1000.0)
        });
        for &v in adx(&bars, 14).iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(&v), "ADX {v} out of range");
        }
    }

    #[test]
    fn adx_high_in_strong_trend() {
        let bars = test_bars::build(120, |i| {
            let base = 100.0 + i as f64 * 2.0;
            (base, base + 1.0, base - 1.0, base + 0.8, 1000.0)
        });
        let value = latest(&bars, 14).unwrap();
        assert!(value > 25.0, "strong trend should read ADX > 25, got {value}");
    }

    #[test]
    fn adx_low_in_choppy_market() {
        let bars = test_bars::build(120, |i| {
            let base = 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 };
            (base, base + 1.5, base - 1.5, base, 1000.0)
        });
        let value = latest(&bars, 14).unwrap();
        assert!(value < 25.0, "choppy market should read ADX < 25, got {value}");
    }
}
