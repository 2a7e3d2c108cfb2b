// =============================================================================
// Volume Weighted Average Price (VWAP) — session cumulative
// =============================================================================
//
//   typical_price = (high + low + close) / 3
//   VWAP_t = cum(typical_price * volume) / cum(volume)
//
// Accumulators reset at each UTC day boundary (session start). Zero-volume
// sessions fall back to the typical price itself.
// =============================================================================

use chrono::Datelike;

use crate::types::Bar;

/// Compute the session VWAP series aligned 1:1 with `bars`.
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;
    let mut session_day: Option<(i32, u32)> = None;

    for (i, bar) in bars.iter().enumerate() {
        let day = (bar.time.year(), bar.time.ordinal());
        if session_day != Some(day) {
            session_day = Some(day);
            cum_pv = 0.0;
            cum_vol = 0.0;
        }

        let typical = (bar.high + bar.low + bar.close) / 3.0;
        cum_pv += typical * bar.volume;
        cum_vol += bar.volume;

        out[i] = if cum_vol > 0.0 { cum_pv / cum_vol } else { typical };
    }

    out
}
