// =============================================================================
// Shared types used across the Cthulu trading engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Immutable once produced by the bridge; bar series are
/// ordered strictly ascending by `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time of the bar, UTC. Naive broker timestamps are coerced to UTC
    /// at ingest.
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short. Folds both directions into a single
    /// arithmetic path for PnL and stop placement.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Chart timeframe understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
        }
    }

    /// Parse from the strings accepted in the config file.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "M1" | "1M" => Some(Self::M1),
            "M5" | "5M" => Some(Self::M5),
            "M15" | "15M" => Some(Self::M15),
            "M30" | "30M" => Some(Self::M30),
            "H1" | "1H" => Some(Self::H1),
            "H4" | "4H" => Some(Self::H4),
            "D1" | "1D" => Some(Self::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entry signal produced by a strategy.
///
/// Invariants: `confidence` is clamped to [0, 1]; `suggested_lot`, when
/// present, is non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub confidence: f64,
    /// Stable identifier of the producing strategy, e.g. "ema_cross".
    pub strategy_id: String,
    #[serde(default)]
    pub suggested_lot: Option<f64>,
    #[serde(default)]
    pub suggested_sl: Option<f64>,
    #[serde(default)]
    pub suggested_tp: Option<f64>,
    pub reason: String,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        confidence: f64,
        strategy_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            confidence: confidence.clamp(0.0, 1.0),
            strategy_id: strategy_id.into(),
            suggested_lot: None,
            suggested_sl: None,
            suggested_tp: None,
            reason: reason.into(),
        }
    }
}

/// How a tracked position came under engine management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenedBy {
    /// Placed by this engine (matching magic number).
    Engine,
    /// Seen at the broker but not yet claimed.
    External,
    /// External position claimed by trade adoption.
    Adopted,
}

impl std::fmt::Display for OpenedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::External => write!(f, "external"),
            Self::Adopted => write!(f, "adopted"),
        }
    }
}

/// A tracked open position. Owned exclusively by the position tracker;
/// mutated only by reconciliation against broker truth and by lifecycle
/// actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Broker ticket id — the primary key across the whole engine.
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub lot: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    /// Best price seen on the favorable side since open. Monotonic.
    #[serde(default)]
    pub peak_favorable_price: f64,
    /// Worst price seen on the adverse side since open. Monotonic.
    #[serde(default)]
    pub peak_adverse_price: f64,
    pub opened_by: OpenedBy,
    pub magic: i64,
}

impl Position {
    /// Maximum favorable excursion in price units (always >= 0).
    pub fn mfe(&self) -> f64 {
        (self.side.sign() * (self.peak_favorable_price - self.entry_price)).max(0.0)
    }

    /// Maximum adverse excursion in price units (always >= 0).
    pub fn mae(&self) -> f64 {
        (self.side.sign() * (self.entry_price - self.peak_adverse_price)).max(0.0)
    }
}

/// Account snapshot as refreshed from the bridge each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
    pub equity: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub free_margin: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub trade_allowed: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Balance-tiered account phase driving risk scaling. Recovery overrides the
/// balance tier whenever drawdown exceeds the recovery threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPhase {
    Micro,
    Seed,
    Growth,
    Established,
    Mature,
    Recovery,
}

impl AccountPhase {
    /// Derive the phase from balance tiers and current drawdown.
    pub fn derive(balance: f64, drawdown_pct: f64, recovery_threshold_pct: f64) -> Self {
        if drawdown_pct >= recovery_threshold_pct {
            return Self::Recovery;
        }
        if balance <= 25.0 {
            Self::Micro
        } else if balance <= 100.0 {
            Self::Seed
        } else if balance <= 500.0 {
            Self::Growth
        } else if balance <= 2000.0 {
            Self::Established
        } else {
            Self::Mature
        }
    }

    /// Maximum risk per trade for this phase, as a fraction of balance.
    pub fn max_risk_pct(&self) -> f64 {
        match self {
            Self::Micro => 0.05,
            Self::Seed => 0.04,
            Self::Growth => 0.03,
            Self::Established => 0.02,
            Self::Mature => 0.015,
            Self::Recovery => 0.01,
        }
    }

    /// Daily trade cap for this phase.
    pub fn max_trades_per_day(&self) -> u32 {
        match self {
            Self::Micro => 10,
            Self::Seed => 12,
            Self::Growth => 15,
            Self::Established => 20,
            Self::Mature => 25,
            Self::Recovery => 5,
        }
    }
}

impl std::fmt::Display for AccountPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Micro => write!(f, "micro"),
            Self::Seed => write!(f, "seed"),
            Self::Growth => write!(f, "growth"),
            Self::Established => write!(f, "established"),
            Self::Mature => write!(f, "mature"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// Bucketed drawdown tier driving risk multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawdownTier {
    Normal,
    Warning,
    Severe,
    Critical,
    Emergency,
}

impl DrawdownTier {
    /// Bucket a drawdown percentage (0.0 .. 100.0).
    pub fn from_drawdown_pct(dd: f64) -> Self {
        if dd < 5.0 {
            Self::Normal
        } else if dd < 10.0 {
            Self::Warning
        } else if dd < 15.0 {
            Self::Severe
        } else if dd < 20.0 {
            Self::Critical
        } else {
            Self::Emergency
        }
    }

    /// Risk multiplier applied to position sizing.
    pub fn risk_multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Warning => 0.75,
            Self::Severe => 0.5,
            Self::Critical => 0.25,
            Self::Emergency => 0.0,
        }
    }
}

impl std::fmt::Display for DrawdownTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Severe => write!(f, "severe"),
            Self::Critical => write!(f, "critical"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}
