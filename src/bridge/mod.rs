// =============================================================================
// Broker Bridge — capability seam between the engine and MT5
// =============================================================================
//
// The engine only ever talks to the `Broker` trait. The HTTP client in
// `client.rs` is the production implementation; tests substitute mocks.
// =============================================================================

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::types::{Account, Bar, Side, Timeframe};

/// Result of a health probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Static trading metadata for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Smallest price increment expressed as a price delta (e.g. 0.00001).
    pub point: f64,
    #[serde(default)]
    pub tick_size: f64,
    pub lot_step: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    pub contract_size: f64,
    #[serde(default = "crate::bridge::default_trade_allowed")]
    pub trade_allowed: bool,
    /// Current spread in points.
    #[serde(default)]
    pub spread: f64,
    /// Broker minimum SL/TP distance from price, in points.
    #[serde(default)]
    pub stops_level: f64,
}

fn default_trade_allowed() -> bool {
    true
}

impl SymbolInfo {
    /// Snap a lot size down to the broker's step and clamp into
    /// [min_lot, max_lot]. Returns 0.0 when the snapped lot would fall below
    /// the minimum.
    pub fn snap_lot(&self, lot: f64) -> f64 {
        if lot <= 0.0 || self.lot_step <= 0.0 {
            return 0.0;
        }
        let snapped = (lot / self.lot_step).floor() * self.lot_step;
        if snapped < self.min_lot {
            0.0
        } else {
            snapped.min(self.max_lot)
        }
    }
}

/// A position as the broker reports it. Engine-only fields (peaks, opened_by)
/// are filled in by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
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
    #[serde(default)]
    pub magic: i64,
}

/// Parameters for a new market order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub lot: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp: Option<f64>,
    pub magic: i64,
    pub comment: String,
}

/// Broker acknowledgement of a filled order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub ticket: u64,
    /// Actual fill price.
    pub price: f64,
    #[serde(default)]
    pub slippage: f64,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Broker acknowledgement of a (partial) close.
#[derive(Debug, Clone, Deserialize)]
pub struct CloseAck {
    pub pnl: f64,
    pub price: f64,
}

/// Operations the engine needs from the broker bridge. All fallible calls
/// surface the transient/permanent/stops-too-close taxonomy so callers can
/// branch on kind.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn health(&self) -> Result<HealthStatus, BrokerError>;

    async fn account_info(&self) -> Result<Account, BrokerError>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;

    /// Last `count` closed bars for `(symbol, timeframe)`, ascending by time.
    async fn rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Open positions, optionally filtered by magic number.
    async fn open_positions(&self, magic: Option<i64>)
        -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError>;

    async fn modify_position(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> Result<(), BrokerError>;

    /// Close a position fully, or partially when `lot` is given.
    async fn close_position(&self, ticket: u64, lot: Option<f64>)
        -> Result<CloseAck, BrokerError>;

    /// Release the connection. Must be called exactly once at shutdown; no
    /// other call may follow it.
    async fn close(&self);
}

// =============================================================================
// Test mock
// =============================================================================
#[cfg(test)]
pub mod test_mock {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Scripted broker for engine and subsystem tests. Counters record wire
    /// traffic; the scripted state plays the broker's role.
    #[derive(Default)]
    pub struct MockBroker {
        pub healthy: Mutex<bool>,
        pub account: Mutex<Option<Account>>,
        pub symbol: Mutex<Option<SymbolInfo>>,
        pub bars: Mutex<Vec<Bar>>,
        pub positions: Mutex<Vec<BrokerPosition>>,
        next_ticket: AtomicU64,
        modify_count: AtomicUsize,
        close_count: AtomicUsize,
        order_count: AtomicUsize,
        last_modify: Mutex<Option<(u64, Option<f64>, Option<f64>)>>,
        last_close_lot: Mutex<Option<Option<f64>>>,
        pub fail_modify_with_stops: Mutex<bool>,
    }

    impl MockBroker {
        pub fn healthy_with(bars: Vec<Bar>, positions: Vec<BrokerPosition>) -> Self {
            let mock = Self {
                healthy: Mutex::new(true),
                next_ticket: AtomicU64::new(1000),
                ..Default::default()
            };
            *mock.bars.lock() = bars;
            *mock.positions.lock() = positions;
            mock
        }

        pub fn modify_calls(&self) -> usize {
            self.modify_count.load(Ordering::SeqCst)
        }

        pub fn close_calls(&self) -> usize {
            self.close_count.load(Ordering::SeqCst)
        }

        pub fn order_calls(&self) -> usize {
            self.order_count.load(Ordering::SeqCst)
        }

        pub fn last_modify(&self) -> Option<(u64, Option<f64>, Option<f64>)> {
            *self.last_modify.lock()
        }

        pub fn last_close_lot(&self) -> Option<f64> {
            self.last_close_lot.lock().clone().flatten()
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn health(&self) -> Result<HealthStatus, BrokerError> {
            Ok(HealthStatus {
                ok: *self.healthy.lock(),
                latency_ms: 1,
            })
        }

        async fn account_info(&self) -> Result<Account, BrokerError> {
            self.account
                .lock()
                .clone()
                .ok_or_else(|| BrokerError::Transient("no account scripted".into()))
        }

        async fn symbol_info(&self, _symbol: &str) -> Result<SymbolInfo, BrokerError> {
            self.symbol
                .lock()
                .clone()
                .ok_or_else(|| BrokerError::Permanent("no symbol scripted".into()))
        }

        async fn rates(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            count: usize,
        ) -> Result<Vec<Bar>, BrokerError> {
            let bars = self.bars.lock();
            let take = count.min(bars.len());
            Ok(bars[bars.len() - take..].to_vec())
        }

        async fn open_positions(
            &self,
            magic: Option<i64>,
        ) -> Result<Vec<BrokerPosition>, BrokerError> {
            let positions = self.positions.lock();
            Ok(positions
                .iter()
                .filter(|p| magic.map_or(true, |m| p.magic == m))
                .cloned()
                .collect())
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<OrderAck, BrokerError> {
            self.order_count.fetch_add(1, Ordering::SeqCst);
            let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                ticket,
                price: 1.0,
                slippage: 0.0,
                latency_ms: 1,
            })
        }

        async fn modify_position(
            &self,
            ticket: u64,
            sl: Option<f64>,
            tp: Option<f64>,
        ) -> Result<(), BrokerError> {
            if *self.fail_modify_with_stops.lock() {
                return Err(BrokerError::StopsTooClose {
                    requested: sl.unwrap_or(0.0),
                    min_distance: 0.001,
                });
            }
            self.modify_count.fetch_add(1, Ordering::SeqCst);
            *self.last_modify.lock() = Some((ticket, sl, tp));
            // Reflect the change in the scripted positions like MT5 would.
            let mut positions = self.positions.lock();
            if let Some(p) = positions.iter_mut().find(|p| p.ticket == ticket) {
                if sl.is_some() {
                    p.sl = sl;
                }
                if tp.is_some() {
                    p.tp = tp;
                }
            }
            Ok(())
        }

        async fn close_position(
            &self,
            ticket: u64,
            lot: Option<f64>,
        ) -> Result<CloseAck, BrokerError> {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            *self.last_close_lot.lock() = Some(lot);
            let mut positions = self.positions.lock();
            let price = positions
                .iter()
                .find(|p| p.ticket == ticket)
                .map(|p| p.current_price)
                .unwrap_or(0.0);
            if lot.is_none() {
                positions.retain(|p| p.ticket != ticket);
            }
            Ok(CloseAck { pnl: 0.0, price })
        }

        async fn close(&self) {}
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SymbolInfo {
        SymbolInfo {
            point: 0.00001,
            tick_size: 0.00001,
            lot_step: 0.01,
            min_lot: 0.01,
            max_lot: 100.0,
            contract_size: 100_000.0,
            trade_allowed: true,
            spread: 10.0,
            stops_level: 20.0,
        }
    }

    #[test]
    fn snap_lot_rounds_down_to_step() {
        let si = info();
        assert!((si.snap_lot(0.117) - 0.11).abs() < 1e-9);
    }

    #[test]
    fn snap_lot_below_min_is_zero() {
        let si = info();
        assert_eq!(si.snap_lot(0.004), 0.0);
        assert_eq!(si.snap_lot(0.0), 0.0);
        assert_eq!(si.snap_lot(-1.0), 0.0);
    }

    #[test]
    fn snap_lot_clamps_to_max() {
        let si = info();
        assert!((si.snap_lot(250.0) - 100.0).abs() < 1e-9);
    }
}
