// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   MACD line = EMA(fast) - EMA(slow)
//   Signal    = EMA of the MACD line over `signal_period`
//   Histogram = MACD - Signal
// =============================================================================

use crate::indicators::ma::ema;

/// The three MACD series, each aligned 1:1 with the input closes.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

/// Compute MACD with the given periods (standard defaults 12/26/9).
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = closes.len();
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let mut line = vec![f64::NAN; n];
    for i in 0..n {
        if fast_ema[i].is_finite() && slow_ema[i].is_finite() {
            line[i] = fast_ema[i] - slow_ema[i];
        }
    }

    // Signal: EMA over the valid tail of the MACD line, re-aligned to the
    // original index space.
    let first_valid = line.iter().position(|v| v.is_finite());
    let mut signal = vec![f64::NAN; n];
    if let Some(start) = first_valid {
        let tail: Vec<f64> = line[start..].to_vec();
        let tail_signal = ema(&tail, signal_period);
        for (offset, v) in tail_signal.into_iter().enumerate() {
            signal[start + offset] = v;
        }
    }

    let mut hist = vec![f64::NAN; n];
    for i in 0..n {
        if line[i].is_finite() && signal[i].is_finite() {
            hist[i] = line[i] - signal[i];
        }
    }

    MacdSeries { line, signal, hist }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_short_series_is_nan() {
        let closes = vec![1.0; 10];
        let m = macd(&closes, 12, 26, 9);
        assert!(m.line.iter().all(|v| v.is_nan()));
        assert!(m.signal.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn macd_flat_market_is_zero() {
        let closes = vec![100.0; 60];
        let m = macd(&closes, 12, 26, 9);
        let line = m.line.last().unwrap();
        let hist = m.hist.last().unwrap();
        assert!(line.abs() < 1e-9);
        assert!(hist.abs() < 1e-9);
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let m = macd(&closes, 12, 26, 9);
        assert!(*m.line.last().unwrap() > 0.0);
        assert!(*m.signal.last().unwrap() > 0.0);
    }

    #[test]
    fn histogram_is_line_minus_signal() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let m = macd(&closes, 12, 26, 9);
        for i in 0..closes.len() {
            if m.hist[i].is_finite() {
                assert!((m.hist[i] - (m.line[i] - m.signal[i])).abs() < 1e-12);
            }
        }
    }
}
