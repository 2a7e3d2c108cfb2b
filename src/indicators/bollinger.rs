// =============================================================================
// Bollinger Bands — SMA ± k * population standard deviation
// =============================================================================

use crate::indicators::ma::sma;

/// Bollinger band series, each aligned 1:1 with the input closes.
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    pub stddev: Vec<f64>,
}

/// Compute Bollinger bands over `period` with band width `k` (default 2.0).
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> BollingerSeries {
    let n = closes.len();
    let middle = sma(closes, period);
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut stddev = vec![f64::NAN; n];

    if period == 0 || n < period {
        return BollingerSeries {
            upper,
            middle,
            lower,
            stddev,
        };
    }

    for i in (period - 1)..n {
        let window = &closes[i + 1 - period..=i];
        let mean = middle[i];
        if !mean.is_finite() {
            continue;
        }
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = variance.sqrt();
        stddev[i] = sd;
        upper[i] = mean + k * sd;
        lower[i] = mean - k * sd;
    }

    BollingerSeries {
        upper,
        middle,
        lower,
        stddev,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_short_series_is_nan() {
        let b = bollinger(&[1.0, 2.0], 20, 2.0);
        assert!(b.upper.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn bollinger_flat_market_collapses() {
        let closes = vec![100.0; 30];
        let b = bollinger(&closes, 20, 2.0);
        let i = closes.len() - 1;
        assert!((b.upper[i] - 100.0).abs() < 1e-9);
        assert!((b.lower[i] - 100.0).abs() < 1e-9);
        assert!(b.stddev[i].abs() < 1e-9);
    }

    #[test]
    fn bands_bracket_the_middle() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.5).sin() * 3.0).collect();
        let b = bollinger(&closes, 20, 2.0);
        for i in 19..closes.len() {
            assert!(b.upper[i] >= b.middle[i]);
            assert!(b.lower[i] <= b.middle[i]);
        }
    }

    #[test]
    fn wider_k_widens_bands() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin() * 2.0).collect();
        let narrow = bollinger(&closes, 20, 1.0);
        let wide = bollinger(&closes, 20, 3.0);
        let i = closes.len() - 1;
        assert!(wide.upper[i] > narrow.upper[i]);
        assert!(wide.lower[i] < narrow.lower[i]);
    }
}
