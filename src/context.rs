// =============================================================================
// Market & Position Context — per-cycle snapshots feeding exits and risk
// =============================================================================
//
// MarketContext describes the symbol's micro-conditions for this cycle;
// PositionContext describes one open position against the current price.
// Both are cheap value types rebuilt every cycle, never cached.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::bridge::SymbolInfo;
use crate::indicators::IndicatorSnapshot;
use crate::types::{Bar, Position};

/// Bucketed volatility regime derived from ATR relative to price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityLevel {
    /// Bucket an ATR expressed as a percentage of price.
    pub fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct < 0.05 {
            Self::Low
        } else if atr_pct < 0.25 {
            Self::Normal
        } else if atr_pct < 0.60 {
            Self::High
        } else {
            Self::Extreme
        }
    }

    /// Whether volatility is elevated beyond roughly twice normal.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Extreme)
    }
}

/// Trading session derived from the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Asian,
    London,
    Overlap,
    NewYork,
}

impl Session {
    pub fn from_utc(now: DateTime<Utc>) -> Self {
        match now.hour() {
            0..=6 => Self::Asian,
            7..=11 => Self::London,
            12..=15 => Self::Overlap,
            _ => Self::NewYork,
        }
    }
}

/// Per-symbol market micro-conditions for the current cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MarketContext {
    pub volatility_level: VolatilityLevel,
    pub spread_pips: f64,
    /// ADX reading; >= 25 is treated as a strong trend.
    pub trend_strength: f64,
    pub session: Session,
    /// A scheduled high-impact event is imminent. The calendar feed is an
    /// external collaborator; without one this stays false.
    pub near_news_event: bool,
    pub near_market_close: bool,
    /// Current ATR in price units, for exits that scale with volatility.
    pub atr: f64,
}

impl MarketContext {
    /// Build the context for this cycle from bars, indicators, and symbol
    /// metadata.
    pub fn build(
        bars: &[Bar],
        indicators: &IndicatorSnapshot,
        symbol_info: &SymbolInfo,
        now: DateTime<Utc>,
    ) -> Self {
        let price = bars.last().map(|b| b.close).unwrap_or(0.0);
        let atr = indicators.scalar("atr").unwrap_or(0.0);
        let atr_pct = if price > 0.0 { atr / price * 100.0 } else { 0.0 };

        Self {
            volatility_level: VolatilityLevel::from_atr_pct(atr_pct),
            spread_pips: spread_in_pips(symbol_info),
            trend_strength: indicators.scalar("adx").unwrap_or(0.0),
            session: Session::from_utc(now),
            near_news_event: false,
            near_market_close: near_fx_week_close(now),
            atr,
        }
    }
}

/// Convert the broker's spread (points) into pips. Five-digit FX quotes use
/// 10 points per pip; coarser instruments treat a point as a pip.
pub fn spread_in_pips(symbol_info: &SymbolInfo) -> f64 {
    let factor = if symbol_info.point > 0.0 && symbol_info.point < 0.001 {
        10.0
    } else {
        1.0
    };
    symbol_info.spread / factor
}

/// Pip size in price units for the symbol.
pub fn pip_size(symbol_info: &SymbolInfo) -> f64 {
    if symbol_info.point > 0.0 && symbol_info.point < 0.001 {
        symbol_info.point * 10.0
    } else {
        symbol_info.point
    }
}

/// FX weekly close: the last hour of Friday trading.
fn near_fx_week_close(now: DateTime<Utc>) -> bool {
    now.weekday() == Weekday::Fri && now.hour() >= 20
}

/// One open position measured against the current price.
#[derive(Debug, Clone, Serialize)]
pub struct PositionContext {
    pub unrealized_pnl: f64,
    /// Signed price move from entry, percent of entry.
    pub unrealized_pct: f64,
    pub holding_minutes: i64,
    /// Maximum favorable excursion in price units.
    pub mfe: f64,
    /// Maximum adverse excursion in price units.
    pub mae: f64,
    pub is_profitable: bool,
}

impl PositionContext {
    pub fn build(position: &Position, now: DateTime<Utc>) -> Self {
        let signed_move = position.side.sign() * (position.current_price - position.entry_price);
        let unrealized_pct = if position.entry_price > 0.0 {
            signed_move / position.entry_price * 100.0
        } else {
            0.0
        };

        Self {
            unrealized_pnl: position.unrealized_pnl,
            unrealized_pct,
            holding_minutes: (now - position.entry_time).num_minutes(),
            mfe: position.mfe(),
            mae: position.mae(),
            is_profitable: signed_move > 0.0,
        }
    }
}
