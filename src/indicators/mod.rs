// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// trading engine. Nothing in here caches across calls; the loop recomputes
// on the bar tail every cycle.
//
// Series convention: every function returns a Vec aligned 1:1 with its input
// bars. Values inside the warmup window are NaN (ATR is the exception — its
// leading gap is backward-filled so volatility reads are always available).

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod stochastic;
pub mod supertrend;
pub mod vwap;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::IndicatorConfig;
use crate::types::Bar;

/// A computed indicator value: either a plain scalar or a keyed sub-mapping
/// (e.g. macd -> {line, signal, hist}).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Scalar(f64),
    Keyed(BTreeMap<String, f64>),
}

/// Snapshot of all configured indicators at the last closed bar. A pure
/// function of the bar series and the indicator config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSnapshot {
    values: BTreeMap<String, IndicatorValue>,
}

impl IndicatorSnapshot {
    /// Fetch a scalar indicator; NaN values read as None.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(IndicatorValue::Scalar(v)) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Fetch one key of a keyed indicator; NaN values read as None.
    pub fn keyed(&self, name: &str, key: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(IndicatorValue::Keyed(map)) => {
                map.get(key).copied().filter(|v| v.is_finite())
            }
            _ => None,
        }
    }

    fn put_scalar(&mut self, name: &str, value: f64) {
        self.values
            .insert(name.to_string(), IndicatorValue::Scalar(value));
    }

    fn put_keyed(&mut self, name: &str, entries: &[(&str, f64)]) {
        let map = entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>();
        self.values
            .insert(name.to_string(), IndicatorValue::Keyed(map));
    }
}

/// Last element of a series, NaN when empty.
fn last(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(f64::NAN)
}

/// Second-to-last element of a series, NaN when too short.
fn prev(series: &[f64]) -> f64 {
    if series.len() >= 2 {
        series[series.len() - 2]
    } else {
        f64::NAN
    }
}

/// Compute a full snapshot over the tail of `bars`.
pub fn compute_snapshot(bars: &[Bar], cfg: &IndicatorConfig) -> IndicatorSnapshot {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let mut snap = IndicatorSnapshot::default();

    let rsi = rsi::rsi(&closes, cfg.rsi_period);
    snap.put_keyed("rsi", &[("value", last(&rsi)), ("prev", prev(&rsi))]);

    let atr = atr::atr(bars, cfg.atr_period);
    snap.put_scalar("atr", last(&atr));

    let sma_fast = ma::sma(&closes, cfg.sma_fast);
    let sma_slow = ma::sma(&closes, cfg.sma_slow);
    snap.put_keyed(
        "sma",
        &[
            ("fast", last(&sma_fast)),
            ("slow", last(&sma_slow)),
            ("fast_prev", prev(&sma_fast)),
            ("slow_prev", prev(&sma_slow)),
        ],
    );

    let ema_fast = ma::ema(&closes, cfg.ema_fast);
    let ema_slow = ma::ema(&closes, cfg.ema_slow);
    snap.put_keyed(
        "ema",
        &[
            ("fast", last(&ema_fast)),
            ("slow", last(&ema_slow)),
            ("fast_prev", prev(&ema_fast)),
            ("slow_prev", prev(&ema_slow)),
        ],
    );

    let macd = macd::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
    snap.put_keyed(
        "macd",
        &[
            ("line", last(&macd.line)),
            ("signal", last(&macd.signal)),
            ("hist", last(&macd.hist)),
        ],
    );

    let bb = bollinger::bollinger(&closes, cfg.bollinger_period, cfg.bollinger_k);
    snap.put_keyed(
        "bollinger",
        &[
            ("upper", last(&bb.upper)),
            ("middle", last(&bb.middle)),
            ("lower", last(&bb.lower)),
            ("stddev", last(&bb.stddev)),
        ],
    );

    let stoch = stochastic::stochastic(bars, cfg.stochastic_k, cfg.stochastic_d);
    snap.put_keyed(
        "stochastic",
        &[
            ("k", last(&stoch.k)),
            ("d", last(&stoch.d)),
            ("k_prev", prev(&stoch.k)),
        ],
    );

    let adx = adx::adx(bars, cfg.adx_period);
    snap.put_scalar("adx", last(&adx));

    let st = supertrend::supertrend(bars, cfg.supertrend_period, cfg.supertrend_multiplier);
    snap.put_keyed(
        "supertrend",
        &[("line", last(&st.line)), ("direction", last(&st.direction))],
    );

    let vwap = vwap::vwap(bars);
    snap.put_scalar("vwap", last(&vwap));

    snap
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod test_bars {
    use chrono::{Duration, TimeZone, Utc};

    use crate::types::Bar;

    /// Build `n` bars spaced one hour apart from a closure producing
    /// (open, high, low, close, volume).
    pub fn build(n: usize, f: impl Fn(usize) -> (f64, f64, f64, f64, f64)) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let (open, high, low, close, volume) = f(i);
                Bar {
                    time: start + Duration::hours(i as i64),
                    open,
                    high,
                    low,
                    close,
                    volume,
                }
            })
            .collect()
    }

    /// Flat-range drifting bars, handy for ATR/ADX tests.
    pub fn drifting(n: usize) -> Vec<Bar> {
        build(n, |i| {
            let base = 100.0 + i as f64 * 0.1;
            (base, base + 5.0, base - 5.0, base, 1000.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    #[test]
    fn snapshot_is_deterministic() {
        let bars = test_bars::drifting(120);
        let cfg = IndicatorConfig::default();
        let a = compute_snapshot(&bars, &cfg);
        let b = compute_snapshot(&bars, &cfg);
        assert_eq!(a.scalar("atr"), b.scalar("atr"));
        assert_eq!(a.keyed("rsi", "value"), b.keyed("rsi", "value"));
        assert_eq!(a.keyed("macd", "hist"), b.keyed("macd", "hist"));
        assert_eq!(a.scalar("adx"), b.scalar("adx"));
    }

    #[test]
    fn snapshot_handles_short_series() {
        let bars = test_bars::drifting(5);
        let cfg = IndicatorConfig::default();
        let snap = compute_snapshot(&bars, &cfg);
        // Within warmup everything except ATR reads as None.
        assert!(snap.keyed("rsi", "value").is_none());
        assert!(snap.keyed("macd", "line").is_none());
    }

    #[test]
    fn scalar_accessor_filters_nan() {
        let mut snap = IndicatorSnapshot::default();
        snap.put_scalar("adx", f64::NAN);
        assert!(snap.scalar("adx").is_none());
        snap.put_scalar("adx", 27.5);
        assert_eq!(snap.scalar("adx"), Some(27.5));
    }
}
