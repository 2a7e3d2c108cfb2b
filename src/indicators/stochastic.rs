// =============================================================================
// Stochastic Oscillator — %K / %D
// =============================================================================
//
//   %K = 100 * (close - min_low) / (max_high - min_low) over `k_period`
//   %D = SMA(%K) over `d_period`
//
// A flat window (max_high == min_low) reads as a neutral 50.
// =============================================================================

use crate::indicators::ma::sma;
use crate::types::Bar;

/// Stochastic oscillator series aligned 1:1 with the input bars.
#[derive(Debug, Clone)]
pub struct StochasticSeries {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticSeries {
    let n = bars.len();
    let mut k = vec![f64::NAN; n];

    if k_period == 0 || n < k_period {
        return StochasticSeries {
            d: vec![f64::NAN; n],
            k,
        };
    }

    for i in (k_period - 1)..n {
        let window = &bars[i + 1 - k_period..=i];
        let max_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let min_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = max_high - min_low;
        k[i] = if range > 0.0 {
            (100.0 * (bars[i].close - min_low) / range).clamp(0.0, 100.0)
        } else {
            50.0
        };
    }

    // %D: SMA over the valid tail of %K, re-aligned.
    let mut d = vec![f64::NAN; n];
    let start = k_period - 1;
    let tail: Vec<f64> = k[start..].to_vec();
    for (offset, v) in sma(&tail, d_period).into_iter().enumerate() {
        d[start + offset] = v;
    }

    StochasticSeries { k, d }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    #[test]
    fn stochastic_short_series_is_nan() {
        let bars = test_bars::drifting(5);
        let s = stochastic(&bars, 14, 3);
        assert!(s.k.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn stochastic_close_at_high_reads_100() {
        let bars = test_bars::build(20, |i| {
            let base = 100.0 + i as f64;
            (base, base + 1.0, base - 1.0, base + 1.0, 1000.0)
        });
        let s = stochastic(&bars, 14, 3);
        let last = *s.k.last().unwrap();
        assert!(last > 95.0, "close at window high should be ~100, got {last}");
    }

    #[test]
    fn stochastic_close_at_low_reads_0() {
        let bars = test_bars::build(20, |i| {
            let base = 100.0 - i as f64;
            (base, base + 1.0, base - 1.0, base - 1.0, 1000.0)
        });
        let s = stochastic(&bars, 14, 3);
        let last = *s.k.last().unwrap();
        assert!(last < 5.0, "close at window low should be ~0, got {last}");
    }

    #[test]
    fn stochastic_flat_window_is_neutral() {
        let bars = test_bars::build(20, |_| (100.0, 100.0, 100.0, 100.0, 1000.0));
        let s = stochastic(&bars, 14, 3);
        assert_eq!(*s.k.last().unwrap(), 50.0);
    }

    #[test]
    fn stochastic_d_smooths_k() {
        let bars = test_bars::build(40, |i| {
            let base = 100.0 + (i as f64 * 0.9).sin() * 5.0;
            (base, base + 1.0, base - 1.0, base, 1000.0)
        });
        let s = stochastic(&bars, 14, 3);
        assert!(s.d.last().unwrap().is_finite());
        assert!((0.0..=100.0).contains(s.d.last().unwrap()));
    }
}
