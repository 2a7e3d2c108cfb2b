// =============================================================================
// State Snapshot — last-known engine state, rewritten every cycle
// =============================================================================
//
// JSON file used to bootstrap after a restart: daily risk counters survive a
// crash as long as the UTC date has not rolled. Writes are atomic
// (tmp + rename) so a kill mid-write never corrupts the file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::risk::RiskState;
use crate::types::{Account, Position};

/// Rolling error entry surfaced in the snapshot and health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub kind: String,
    pub at: DateTime<Utc>,
}

/// Auditable record of one signal decision: which gate settled it and why.
/// Kept in a capped ring buffer and surfaced in the snapshot and the health
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub symbol: String,
    pub side: String,
    pub strategy: String,
    pub approved: bool,
    /// The gate that settled the decision, e.g. "daily_loss_cap",
    /// "selection", or "approved".
    pub gate: String,
    pub reason: String,
    /// Broker ticket once an order filled; None for rejected signals.
    #[serde(default)]
    pub ticket: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub saved_at: DateTime<Utc>,
    pub cycle: u64,
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub positions: Vec<Position>,
    pub risk: RiskState,
    #[serde(default)]
    pub recent_errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub recent_decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub degraded: bool,
}

impl StateSnapshot {
    /// Atomically write the snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating snapshot dir {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("writing snapshot tmp {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming snapshot into {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot if one exists. A missing file is a clean start, a
    /// corrupt file is logged and ignored.
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Self>(&content) {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    saved_at = %snapshot.saved_at,
                    cycle = snapshot.cycle,
                    "state snapshot loaded"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "snapshot unreadable — starting clean");
                None
            }
        }
    }

    /// Restore daily risk counters into `state` when the snapshot is from
    /// today (UTC). Stale snapshots only contribute the equity peak.
    pub fn restore_risk(&self, state: &mut RiskState, now: DateTime<Utc>) {
        if self.risk.last_reset_date == now.date_naive() {
            state.daily_realized_pnl = self.risk.daily_realized_pnl;
            state.daily_trade_count = self.risk.daily_trade_count;
            state.last_reset_date = self.risk.last_reset_date;
            info!(
                daily_pnl = state.daily_realized_pnl,
                daily_trades = state.daily_trade_count,
                "daily risk counters restored from snapshot"
            );
        }
        if self.risk.peak_equity > state.peak_equity {
            state.peak_equity = self.risk.peak_equity;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(now: DateTime<Utc>) -> StateSnapshot {
        let mut risk = RiskState::new(1000.0, now);
        risk.daily_realized_pnl = -120.0;
        risk.daily_trade_count = 4;
        risk.peak_equity = 1500.0;
        StateSnapshot {
            saved_at: now,
            cycle: 99,
            account: None,
            positions: vec![],
            risk,
            recent_errors: vec![],
            recent_decisions: vec![],
            degraded: false,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/snapshot.json");
        let now = Utc::now();
        snapshot(now).save(&path).unwrap();

        let loaded = StateSnapshot::load(&path).unwrap();
        assert_eq!(loaded.cycle, 99);
        assert_eq!(loaded.risk.daily_trade_count, 4);
    }

    #[test]
    fn missing_file_is_none() {
        assert!(StateSnapshot::load("/nonexistent/snapshot.json").is_none());
    }

    #[test]
    fn same_day_restore_keeps_daily_counters() {
        let now = Utc::now();
        let snap = snapshot(now);
        let mut state = RiskState::new(1000.0, now);
        snap.restore_risk(&mut state, now);
        assert_eq!(state.daily_realized_pnl, -120.0);
        assert_eq!(state.daily_trade_count, 4);
        assert_eq!(state.peak_equity, 1500.0);
    }

    #[test]
    fn stale_snapshot_only_restores_peak() {
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let snap = snapshot(yesterday);
        let now = Utc::now();
        let mut state = RiskState::new(1000.0, now);
        snap.restore_risk(&mut state, now);
        assert_eq!(state.daily_realized_pnl, 0.0);
        assert_eq!(state.daily_trade_count, 0);
        assert_eq!(state.peak_equity, 1500.0);
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(StateSnapshot::load(&path).is_none());
    }
}
