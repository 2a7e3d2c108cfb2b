// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Compute price deltas from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first
//          `period` gains / losses.
// Step 3 — Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// One-sided markets (all gains or all losses) are neutralized with a small
// epsilon on the zero side, so RSI lands at 100-eps / 0+eps instead of
// dividing by zero.
// =============================================================================

/// Epsilon substituted for a zero average gain/loss.
const ONE_SIDED_EPS: f64 = 1e-10;

/// Compute the RSI series for `closes` with Wilder smoothing.
///
/// The output is aligned 1:1 with the input; indices `0..period` are NaN
/// (warmup). Out of warmup, values are bounded to [0, 100].
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for (i, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        out[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

/// Convert average gain / loss into an RSI value in [0, 100], substituting
/// an epsilon for a zero side.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let gain = avg_gain.max(ONE_SIDED_EPS);
    let loss = avg_loss.max(ONE_SIDED_EPS);
    let rs = gain / loss;
    let value = 100.0 - 100.0 / (1.0 + rs);
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        f64::NAN
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty_input() {
        assert!(rsi(&[], 14).is_empty());
    }

    #[test]
    fn rsi_warmup_is_nan() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let series = rsi(&closes, 14);
        assert_eq!(series.len(), closes.len());
        for &v in &series[..14] {
            assert!(v.is_nan());
        }
        assert!(series[14].is_finite());
    }

    #[test]
    fn rsi_all_gains_near_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let series = rsi(&closes, 14);
        for &v in &series[14..] {
            assert!((v - 100.0).abs() < 1e-6, "expected ~100, got {v}");
        }
    }

    #[test]
    fn rsi_all_losses_near_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let series = rsi(&closes, 14);
        for &v in &series[14..] {
            assert!(v.abs() < 1e-6, "expected ~0, got {v}");
        }
    }

    #[test]
    fn rsi_flat_market_is_neutral() {
        let closes = vec![100.0; 30];
        let series = rsi(&closes, 14);
        for &v in &series[14..] {
            assert!((v - 50.0).abs() < 1e-9, "expected 50, got {v}");
        }
    }

    #[test]
    fn rsi_bounded_out_of_warmup() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for &v in rsi(&closes, 14).iter().skip(14) {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn rsi_is_pure() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let a = rsi(&closes, 14);
        let b = rsi(&closes, 14);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!(x.is_nan() && y.is_nan() || x == y);
        }
    }
}
