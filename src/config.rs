// =============================================================================
// Engine Configuration — validated at bootstrap, JSON on disk
// =============================================================================
//
// Every tunable parameter lives here. All fields carry `#[serde(default)]`
// so that adding new fields never breaks loading an older config file.
//
// Two load-time transforms run before deserialization:
//   1. `FROM_ENV` markers: a string value of exactly "FROM_ENV" resolves
//      from `CTHULU_<UPPER_SNAKE_PATH>`; "FROM_ENV:NAME" resolves from the
//      named variable.
//   2. Mindset presets: the `mindset` field overlays absolute values onto
//      the risk and selection parameters (applied once, idempotent).
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_timeframe() -> String {
    "M5".to_string()
}

fn default_poll_interval() -> u64 {
    15
}

fn default_magic() -> i64 {
    773_311
}

fn default_warmup_bars() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_call_timeout() -> u64 {
    5
}

fn default_degraded_after() -> u32 {
    3
}

fn default_price_freshness() -> u64 {
    120
}

fn default_min_confidence() -> f64 {
    0.55
}

fn default_strategies() -> Vec<String> {
    vec![
        "sma_cross".to_string(),
        "ema_cross".to_string(),
        "momentum_breakout".to_string(),
        "trend_follow".to_string(),
        "mean_reversion".to_string(),
        "rsi_reversal".to_string(),
    ]
}

fn default_strategy_type() -> String {
    "dynamic".to_string()
}

fn default_max_daily_loss() -> f64 {
    500.0
}

fn default_max_position_size() -> f64 {
    1.0
}

fn default_max_positions_per_symbol() -> u32 {
    2
}

fn default_max_total_positions() -> u32 {
    5
}

fn default_base_risk_pct() -> f64 {
    0.01
}

fn default_emergency_stop_loss_pct() -> f64 {
    20.0
}

fn default_recovery_drawdown_pct() -> f64 {
    15.0
}

fn default_drawdown_levels() -> Vec<f64> {
    vec![5.0, 10.0, 15.0, 20.0]
}

fn default_drawdown_multipliers() -> Vec<f64> {
    vec![1.0, 0.75, 0.5, 0.25, 0.0]
}

fn default_sl_balance_thresholds() -> Vec<f64> {
    vec![1_000.0, 5_000.0, 20_000.0]
}

fn default_sl_balance_fractions() -> Vec<f64> {
    vec![0.01, 0.02, 0.05, 0.05]
}

fn default_max_spread_pips() -> f64 {
    3.0
}

fn default_min_volume() -> f64 {
    1.0
}

fn default_max_gap_pips() -> f64 {
    10.0
}

fn default_sl_atr_mult() -> f64 {
    2.0
}

fn default_tp_atr_mult() -> f64 {
    4.0
}

fn default_adopt_sl_atr_mult() -> f64 {
    2.0
}

fn default_adopt_tp_atr_mult() -> f64 {
    4.0
}

fn default_adopt_sl_points() -> f64 {
    500.0
}

fn default_max_adopt_age_minutes() -> i64 {
    7 * 24 * 60
}

fn default_exit_strategies() -> Vec<String> {
    vec![
        "survival_mode".to_string(),
        "micro_protection".to_string(),
        "stop_loss".to_string(),
        "adverse_movement".to_string(),
        "trailing_stop".to_string(),
        "session_close".to_string(),
        "profit_target".to_string(),
        "take_profit".to_string(),
        "confluence_exit".to_string(),
        "time_based".to_string(),
        "break_even".to_string(),
    ]
}

fn default_max_hold_minutes() -> i64 {
    480
}

fn default_profit_target_r() -> f64 {
    2.0
}

fn default_trailing_activation_r() -> f64 {
    1.0
}

fn default_trailing_distance_r() -> f64 {
    0.5
}

fn default_adverse_atr_mult() -> f64 {
    1.5
}

fn default_adverse_window_bars() -> usize {
    3
}

fn default_micro_profit_pips() -> f64 {
    5.0
}

fn default_micro_min_hold_minutes() -> i64 {
    10
}

fn default_confluence_min_agreeing() -> usize {
    3
}

fn default_survival_margin_level() -> f64 {
    150.0
}

fn default_watchdog_timeout() -> u64 {
    120
}

fn default_metrics_interval() -> u64 {
    1
}

fn default_csv_path() -> String {
    "observability/comprehensive_metrics.csv".to_string()
}

fn default_prom_path() -> String {
    "observability/metrics.prom".to_string()
}

fn default_db_path() -> String {
    "cthulu.db".to_string()
}

fn default_snapshot_path() -> String {
    "state/snapshot.json".to_string()
}

fn default_log_path() -> String {
    "logs/cthulu.log".to_string()
}

fn default_lock_path() -> String {
    "cthulu.lock".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// Connection parameters for the MT5 broker bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mt5Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub server: String,
    /// Optional bearer token sent with every bridge request.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    /// Maximum retry attempts per call per cycle for transient failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Consecutive failed health probes before the loop enters degraded mode.
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,
    /// How long last-known prices stay usable for exit logic while degraded.
    #[serde(default = "default_price_freshness")]
    pub price_freshness_seconds: u64,
}

impl Default for Mt5Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            login: String::new(),
            password: String::new(),
            server: String::new(),
            token: None,
            call_timeout_seconds: default_call_timeout(),
            retry_attempts: default_retry_attempts(),
            degraded_after_failures: default_degraded_after(),
            price_freshness_seconds: default_price_freshness(),
        }
    }
}

impl Mt5Config {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Risk preset overlaying risk & strategy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mindset {
    Conservative,
    Balanced,
    Aggressive,
    UltraAggressive,
}

impl Default for Mindset {
    fn default() -> Self {
        Self::Balanced
    }
}

impl std::fmt::Display for Mindset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Balanced => write!(f, "balanced"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::UltraAggressive => write!(f, "ultra_aggressive"),
        }
    }
}

/// Strategy selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// "single" runs only the first listed strategy; "dynamic" runs all and
    /// lets the selector pick.
    #[serde(default = "default_strategy_type", rename = "type")]
    pub mode: String,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    /// Signals below this confidence are discarded before weighting.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Per-strategy weight overrides; strategies not listed weigh 1.0.
    #[serde(default)]
    pub weights: std::collections::HashMap<String, f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: default_strategy_type(),
            strategies: default_strategies(),
            min_confidence: default_min_confidence(),
            weights: Default::default(),
        }
    }
}

/// Indicator periods. One struct instead of a free-form list so the schema
/// stays stable and typo-proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "d14")]
    pub rsi_period: usize,
    #[serde(default = "d14")]
    pub atr_period: usize,
    #[serde(default = "d9")]
    pub ema_fast: usize,
    #[serde(default = "d21")]
    pub ema_slow: usize,
    #[serde(default = "d10")]
    pub sma_fast: usize,
    #[serde(default = "d30")]
    pub sma_slow: usize,
    #[serde(default = "d12")]
    pub macd_fast: usize,
    #[serde(default = "d26")]
    pub macd_slow: usize,
    #[serde(default = "d9")]
    pub macd_signal: usize,
    #[serde(default = "d20")]
    pub bollinger_period: usize,
    #[serde(default = "d2f")]
    pub bollinger_k: f64,
    #[serde(default = "d14")]
    pub stochastic_k: usize,
    #[serde(default = "d3")]
    pub stochastic_d: usize,
    #[serde(default = "d14")]
    pub adx_period: usize,
    #[serde(default = "d10")]
    pub supertrend_period: usize,
    #[serde(default = "d3f")]
    pub supertrend_multiplier: f64,
    #[serde(default = "d20")]
    pub breakout_lookback: usize,
}

fn d2f() -> f64 {
    2.0
}
fn d3f() -> f64 {
    3.0
}
fn d3() -> usize {
    3
}
fn d9() -> usize {
    9
}
fn d10() -> usize {
    10
}
fn d12() -> usize {
    12
}
fn d14() -> usize {
    14
}
fn d20() -> usize {
    20
}
fn d21() -> usize {
    21
}
fn d26() -> usize {
    26
}
fn d30() -> usize {
    30
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

/// Risk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum daily realized loss in account currency.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    /// Hard cap on a single position's lot size.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_positions_per_symbol")]
    pub max_positions_per_symbol: u32,
    #[serde(default = "default_max_total_positions")]
    pub max_total_positions: u32,
    /// Base risk per trade as a fraction of balance, before phase and
    /// drawdown scaling.
    #[serde(default = "default_base_risk_pct")]
    pub base_risk_pct: f64,
    /// Equity drawdown percentage at which the engine refuses all entries.
    #[serde(default = "default_emergency_stop_loss_pct")]
    pub emergency_stop_loss_pct: f64,
    /// Drawdown percentage that forces the account into the recovery phase.
    #[serde(default = "default_recovery_drawdown_pct")]
    pub recovery_drawdown_pct: f64,
    /// Drawdown tier boundaries in percent (4 boundaries -> 5 tiers).
    #[serde(default = "default_drawdown_levels")]
    pub adaptive_drawdown_levels: Vec<f64>,
    /// Risk multipliers per drawdown tier (5 entries).
    #[serde(default = "default_drawdown_multipliers")]
    pub adaptive_drawdown_multipliers: Vec<f64>,
    /// Balance tier boundaries for the max-SL fraction rule.
    #[serde(default = "default_sl_balance_thresholds")]
    pub sl_balance_thresholds: Vec<f64>,
    /// Max SL value as a fraction of balance per tier (thresholds.len()+1).
    #[serde(default = "default_sl_balance_fractions")]
    pub sl_balance_fractions: Vec<f64>,
    /// Per-phase daily trade cap override (6 entries, micro..recovery).
    /// Empty means use the built-in phase defaults.
    #[serde(default)]
    pub adaptive_trades_per_day: Vec<u32>,
    // --- Liquidity-trap veto -------------------------------------------------
    #[serde(default = "default_max_spread_pips")]
    pub max_spread_threshold_pips: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume_threshold: f64,
    #[serde(default = "default_max_gap_pips")]
    pub max_gap_threshold_pips: f64,
    // --- Synthetic stops when a signal carries none --------------------------
    #[serde(default = "default_sl_atr_mult")]
    pub sl_atr_multiplier: f64,
    #[serde(default = "default_tp_atr_mult")]
    pub tp_atr_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

/// Trade adoption policy for externally opened positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptionConfig {
    #[serde(default = "default_true")]
    pub use_atr_based_sltp: bool,
    #[serde(default = "default_adopt_sl_atr_mult")]
    pub emergency_sl_atr_mult: f64,
    #[serde(default = "default_adopt_tp_atr_mult")]
    pub emergency_tp_atr_mult: f64,
    /// Fixed-distance fallback in points when ATR is not computable.
    #[serde(default = "default_adopt_sl_points")]
    pub emergency_sl_points: f64,
    /// Positions older than this are refused adoption.
    #[serde(default = "default_max_adopt_age_minutes")]
    pub max_adopt_age_minutes: i64,
}

impl Default for AdoptionConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

/// Exit system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Registered exit strategies, in registry order. Unknown names are
    /// rejected at bootstrap.
    #[serde(default = "default_exit_strategies")]
    pub strategies: Vec<String>,
    /// Per-strategy base priority overrides (0..100).
    #[serde(default)]
    pub priorities: std::collections::HashMap<String, f64>,
    #[serde(default = "default_max_hold_minutes")]
    pub max_hold_minutes: i64,
    /// Profit target in R-multiples of the initial risk.
    #[serde(default = "default_profit_target_r")]
    pub profit_target_r: f64,
    /// MFE in R-multiples at which the trailing stop activates.
    #[serde(default = "default_trailing_activation_r")]
    pub trailing_activation_r: f64,
    /// Trail distance in R-multiples behind the MFE.
    #[serde(default = "default_trailing_distance_r")]
    pub trailing_distance_r: f64,
    /// Adverse move in ATR multiples within the window that forces an exit.
    #[serde(default = "default_adverse_atr_mult")]
    pub adverse_atr_mult: f64,
    #[serde(default = "default_adverse_window_bars")]
    pub adverse_window_bars: usize,
    /// Micro/seed protection: take any profit >= this many pips...
    #[serde(default = "default_micro_profit_pips")]
    pub micro_profit_pips: f64,
    /// ...once the position has been held at least this long.
    #[serde(default = "default_micro_min_hold_minutes")]
    pub micro_min_hold_minutes: i64,
    /// Indicators that must agree on reversal for the confluence exit.
    #[serde(default = "default_confluence_min_agreeing")]
    pub confluence_min_agreeing: usize,
    /// Margin level (equity/margin, percent) below which survival mode fires.
    #[serde(default = "default_survival_margin_level")]
    pub survival_margin_level_pct: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

/// Metrics output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: String,
    #[serde(default = "default_prom_path")]
    pub prometheus_path: String,
    #[serde(default = "default_metrics_interval")]
    pub interval_seconds: u64,
    /// Loopback port for the minimal health endpoint; None disables it.
    #[serde(default)]
    pub http_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mt5: Mt5Config,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Primary bar cadence, e.g. "M5".
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Identifies engine-placed orders at the broker.
    #[serde(default = "default_magic")]
    pub magic_number: i64,
    #[serde(default)]
    pub mindset: Mindset,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub adoption: AdoptionConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Bars required before indicator values are trusted.
    #[serde(default = "default_warmup_bars")]
    pub warmup_bars: usize,
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_seconds: u64,
    /// Log intents instead of sending orders.
    #[serde(default)]
    pub dry_run: bool,
    /// Offer to close engine-owned positions on shutdown.
    #[serde(default)]
    pub close_positions_on_exit: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty object deserializes via defaults")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, resolving `FROM_ENV` markers and
    /// applying the mindset preset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        resolve_env_markers(&mut raw, "CTHULU")?;

        let mut config: Self =
            serde_json::from_value(raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        config.apply_mindset();
        config.validate()?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            mindset = %config.mindset,
            dry_run = config.dry_run,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Parsed primary timeframe.
    pub fn parsed_timeframe(&self) -> Result<Timeframe, ConfigError> {
        Timeframe::parse(&self.timeframe)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown timeframe '{}'", self.timeframe)))
    }

    /// Overlay the mindset preset onto risk and selection parameters. The
    /// preset writes absolute values, so applying it twice is a no-op.
    pub fn apply_mindset(&mut self) {
        let (base_risk, min_conf, max_total, profit_r) = match self.mindset {
            Mindset::Conservative => (0.005, 0.70, 3, 1.5),
            Mindset::Balanced => (0.01, 0.55, 5, 2.0),
            Mindset::Aggressive => (0.02, 0.45, 8, 2.5),
            Mindset::UltraAggressive => (0.03, 0.35, 12, 3.0),
        };
        self.risk.base_risk_pct = base_risk;
        self.strategy.min_confidence = min_conf;
        self.risk.max_total_positions = max_total;
        self.exit.profit_target_r = profit_r;
    }

    /// Fail fast on configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        self.parsed_timeframe()?;
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_seconds must be >= 1".into(),
            ));
        }
        if self.magic_number == 0 {
            return Err(ConfigError::Invalid(
                "magic_number must be non-zero to distinguish engine orders".into(),
            ));
        }
        if self.risk.max_daily_loss <= 0.0 {
            return Err(ConfigError::Invalid("risk.max_daily_loss must be > 0".into()));
        }
        if self.risk.adaptive_drawdown_multipliers.len() != 5 {
            return Err(ConfigError::Invalid(
                "risk.adaptive_drawdown_multipliers must have exactly 5 entries".into(),
            ));
        }
        if self.risk.sl_balance_fractions.len() != self.risk.sl_balance_thresholds.len() + 1 {
            return Err(ConfigError::Invalid(
                "risk.sl_balance_fractions must have thresholds.len()+1 entries".into(),
            ));
        }
        if self.warmup_bars < 30 {
            return Err(ConfigError::Invalid(
                "warmup_bars must be >= 30 for indicator validity".into(),
            ));
        }
        let known_exits = default_exit_strategies();
        for name in &self.exit.strategies {
            if !known_exits.contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "unknown exit strategy '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// Walk the raw JSON tree, replacing `FROM_ENV` string markers with values
/// from the environment. The variable name for a bare `FROM_ENV` is derived
/// from the JSON path, e.g. `mt5.password` -> `CTHULU_MT5_PASSWORD`.
fn resolve_env_markers(value: &mut serde_json::Value, path: &str) -> Result<(), ConfigError> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_path = format!("{}_{}", path, key.to_uppercase());
                resolve_env_markers(child, &child_path)?;
            }
        }
        serde_json::Value::Array(items) => {
            for (i, child) in items.iter_mut().enumerate() {
                let child_path = format!("{path}_{i}");
                resolve_env_markers(child, &child_path)?;
            }
        }
        serde_json::Value::String(s) => {
            let var = if s == "FROM_ENV" {
                Some(path.to_string())
            } else {
                s.strip_prefix("FROM_ENV:").map(|name| name.to_string())
            };
            if let Some(var) = var {
                let resolved =
                    std::env::var(&var).map_err(|_| ConfigError::MissingEnv {
                        field: path.to_lowercase(),
                        var: var.clone(),
                    })?;
                *s = resolved;
            }
        }
        _ => {}
    }
    Ok(())
}
