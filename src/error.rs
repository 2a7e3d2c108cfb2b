// =============================================================================
// Error taxonomy — tagged result types at every subsystem boundary
// =============================================================================
//
// The cycle loop never propagates an error past the cycle boundary: each
// subsystem catches its own domain errors, bumps a counter, and returns a
// sentinel. The variants here exist so callers can branch on *kind* instead
// of string-matching messages.
// =============================================================================

use thiserror::Error;

/// Errors surfaced by the broker bridge.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network hiccups, timeouts, 5xx responses. Retried with exponential
    /// backoff, capped per cycle; on exhaustion the bridge is marked degraded.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Auth failures, unknown symbols, invalid volume. Never retried; the
    /// affected signal or position is skipped.
    #[error("permanent broker error: {0}")]
    Permanent(String),

    /// A modify request violated the broker's minimum stop distance. The
    /// caller decides whether to widen or skip.
    #[error("stops too close: requested {requested:.5}, minimum distance {min_distance:.5}")]
    StopsTooClose { requested: f64, min_distance: f64 },
}

impl BrokerError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable label used in `errors_total{kind=...}` counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "broker_transient",
            Self::Permanent(_) => "broker_permanent",
            Self::StopsTooClose { .. } => "stops_too_close",
        }
    }
}

/// Configuration problems. Fail fast at bootstrap with an actionable message;
/// the process exits with code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("environment variable {var} referenced by {field} is not set")]
    MissingEnv { field: String, var: String },
}
