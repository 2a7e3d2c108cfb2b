// =============================================================================
// Position Tracker — authoritative in-memory map of open positions
// =============================================================================
//
// Keyed by broker ticket id and reconciled against broker truth every cycle:
//
//   1. Broker positions already tracked      -> update price, PnL, peaks.
//   2. Broker positions with our magic, new  -> track as engine-owned
//                                              (orders from the previous
//                                              cycle becoming visible).
//   3. Broker positions with a foreign magic -> reported as unknown and
//                                              handed to trade adoption.
//   4. Tracked positions gone at the broker  -> emitted as close events and
//                                              evicted.
//
// Invariants: no duplicate tickets; the favorable peak only ever improves,
// the adverse peak only ever worsens.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::bridge::BrokerPosition;
use crate::types::{OpenedBy, Position};

/// A position that disappeared from the broker this cycle.
#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub position: Position,
    /// PnL from the last broker snapshot before the position vanished.
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Broker positions without engine management, candidates for adoption.
    pub unknown: Vec<BrokerPosition>,
    pub closed: Vec<CloseEvent>,
    pub updated: usize,
    pub newly_tracked: usize,
}

pub struct PositionTracker {
    positions: HashMap<u64, Position>,
    magic: i64,
}

impl PositionTracker {
    pub fn new(magic: i64) -> Self {
        Self {
            positions: HashMap::new(),
            magic,
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Reconcile against the full set of broker positions for this account.
    pub fn reconcile(
        &mut self,
        broker_positions: &[BrokerPosition],
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut seen: HashSet<u64> = HashSet::new();

        for bp in broker_positions {
            if !seen.insert(bp.ticket) {
                error!(
                    ticket = bp.ticket,
                    "duplicate ticket in broker snapshot — skipping"
                );
                continue;
            }

            if let Some(pos) = self.positions.get_mut(&bp.ticket) {
                Self::update_from_broker(pos, bp);
                outcome.updated += 1;
            } else if bp.magic == self.magic {
                // An engine order from the previous cycle became visible.
                self.positions.insert(bp.ticket, Self::track(bp, OpenedBy::Engine));
                outcome.newly_tracked += 1;
                info!(ticket = bp.ticket, symbol = %bp.symbol, "engine position now tracked");
            } else {
                outcome.unknown.push(bp.clone());
            }
        }

        // Anything we track that the broker no longer reports has closed.
        let gone: Vec<u64> = self
            .positions
            .keys()
            .copied()
            .filter(|t| !seen.contains(t))
            .collect();
        for ticket in gone {
            if let Some(position) = self.positions.remove(&ticket) {
                info!(
                    ticket,
                    symbol = %position.symbol,
                    pnl = position.unrealized_pnl,
                    "position closed at broker"
                );
                outcome.closed.push(CloseEvent {
                    realized_pnl: position.unrealized_pnl,
                    closed_at: now,
                    position,
                });
            }
        }

        outcome
    }

    fn track(bp: &BrokerPosition, opened_by: OpenedBy) -> Position {
        let start_price = if bp.current_price > 0.0 {
            bp.current_price
        } else {
            bp.entry_price
        };
        Position {
            ticket: bp.ticket,
            symbol: bp.symbol.clone(),
            side: bp.side,
            lot: bp.lot,
            entry_price: bp.entry_price,
            entry_time: bp.entry_time,
            sl: bp.sl,
            tp: bp.tp,
            current_price: start_price,
            unrealized_pnl: bp.unrealized_pnl,
            peak_favorable_price: start_price,
            peak_adverse_price: start_price,
            opened_by,
            magic: bp.magic,
        }
    }

    fn update_from_broker(pos: &mut Position, bp: &BrokerPosition) {
        pos.lot = bp.lot;
        pos.sl = bp.sl;
        pos.tp = bp.tp;
        pos.unrealized_pnl = bp.unrealized_pnl;
        if bp.current_price > 0.0 {
            pos.current_price = bp.current_price;
            let sign = pos.side.sign();
            // Peaks are monotonic on their respective sides.
            if sign * (bp.current_price - pos.peak_favorable_price) > 0.0 {
                pos.peak_favorable_price = bp.current_price;
            }
            if sign * (bp.current_price - pos.peak_adverse_price) < 0.0 {
                pos.peak_adverse_price = bp.current_price;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Adoption claim
    // -------------------------------------------------------------------------

    /// Claim an external position under engine management after adoption
    /// applied its emergency stops. The tracked entry carries the engine's
    /// magic, not the broker's original one, so later reconciliations can
    /// never re-classify the ticket as an unmanaged orphan.
    pub fn claim_adopted(&mut self, bp: &BrokerPosition, sl: Option<f64>, tp: Option<f64>) {
        if self.positions.contains_key(&bp.ticket) {
            warn!(ticket = bp.ticket, "claim for an already-tracked ticket ignored");
            return;
        }
        let mut pos = Self::track(bp, OpenedBy::Adopted);
        pos.sl = sl;
        pos.tp = tp;
        pos.magic = self.magic;
        info!(
            ticket = bp.ticket,
            symbol = %bp.symbol,
            sl = ?sl,
            tp = ?tp,
            "external position adopted"
        );
        self.positions.insert(bp.ticket, pos);
    }

    // -------------------------------------------------------------------------
    // Lifecycle mutations
    // -------------------------------------------------------------------------

    /// Record a successful SL/TP modification.
    pub fn apply_stops(&mut self, ticket: u64, sl: Option<f64>, tp: Option<f64>) {
        if let Some(pos) = self.positions.get_mut(&ticket) {
            if sl.is_some() {
                pos.sl = sl;
            }
            if tp.is_some() {
                pos.tp = tp;
            }
        }
    }

    /// Record a successful partial close.
    pub fn apply_partial_close(&mut self, ticket: u64, closed_lot: f64) {
        if let Some(pos) = self.positions.get_mut(&ticket) {
            pos.lot = (pos.lot - closed_lot).max(0.0);
        }
    }

    /// Evict a fully closed position, returning it for persistence.
    pub fn remove(&mut self, ticket: u64) -> Option<Position> {
        self.positions.remove(&ticket)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, ticket: u64) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn tickets(&self) -> Vec<u64> {
        let mut t: Vec<u64> = self.positions.keys().copied().collect();
        t.sort_unstable();
        t
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    const MAGIC: i64 = 773_311;

    fn broker_pos(ticket: u64, magic: i64, price: f64) -> BrokerPosition {
        BrokerPosition {
            ticket,
            symbol: "EURUSD".into(),
            side: Side::Long,
            lot: 0.10,
            entry_price: 1.1000,
            entry_time: Utc::now(),
            sl: Some(1.0950),
            tp: Some(1.1100),
            current_price: price,
            unrealized_pnl: (price - 1.1000) * 10_000.0,
            magic,
        }
    }

    #[test]
    fn engine_positions_become_tracked() {
        let mut tracker = PositionTracker::new(MAGIC);
        let outcome = tracker.reconcile(&[broker_pos(1, MAGIC, 1.1010)], Utc::now());
        assert_eq!(outcome.newly_tracked, 1);
        assert!(outcome.unknown.is_empty());
        assert_eq!(tracker.tickets(), vec![1]);
        assert_eq!(tracker.get(1).unwrap().opened_by, OpenedBy::Engine);
    }

    #[test]
    fn foreign_magic_is_reported_unknown() {
        let mut tracker = PositionTracker::new(MAGIC);
        let outcome = tracker.reconcile(&[broker_pos(2, 999, 1.1010)], Utc::now());
        assert_eq!(outcome.unknown.len(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn tracked_set_matches_broker_after_reconcile() {
        let mut tracker = PositionTracker::new(MAGIC);
        tracker.reconcile(
            &[broker_pos(1, MAGIC, 1.1010), broker_pos(2, MAGIC, 1.1020)],
            Utc::now(),
        );
        // Next cycle ticket 1 is gone and ticket 3 appears.
        let outcome = tracker.reconcile(
            &[broker_pos(2, MAGIC, 1.1025), broker_pos(3, MAGIC, 1.1000)],
            Utc::now(),
        );
        assert_eq!(tracker.tickets(), vec![2, 3]);
        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.closed[0].position.ticket, 1);
    }

    #[test]
    fn close_event_carries_last_known_pnl() {
        let mut tracker = PositionTracker::new(MAGIC);
        tracker.reconcile(&[broker_pos(1, MAGIC, 1.1050)], Utc::now());
        let outcome = tracker.reconcile(&[], Utc::now());
        let event = &outcome.closed[0];
        assert!((event.realized_pnl - 50.0).abs() < 1e-6);
    }

    #[test]
    fn peaks_are_monotonic() {
        let mut tracker = PositionTracker::new(MAGIC);
        tracker.reconcile(&[broker_pos(1, MAGIC, 1.1010)], Utc::now());
        tracker.reconcile(&[broker_pos(1, MAGIC, 1.1050)], Utc::now());
        tracker.reconcile(&[broker_pos(1, MAGIC, 1.1030)], Utc::now());

        let pos = tracker.get(1).unwrap();
        assert!((pos.peak_favorable_price - 1.1050).abs() < 1e-9);

        tracker.reconcile(&[broker_pos(1, MAGIC, 1.0990)], Utc::now());
        let pos = tracker.get(1).unwrap();
        assert!((pos.peak_favorable_price - 1.1050).abs() < 1e-9);
        assert!((pos.peak_adverse_price - 1.0990).abs() < 1e-9);
    }

    #[test]
    fn duplicate_tickets_are_skipped() {
        let mut tracker = PositionTracker::new(MAGIC);
        let outcome = tracker.reconcile(
            &[broker_pos(1, MAGIC, 1.1010), broker_pos(1, MAGIC, 1.2000)],
            Utc::now(),
        );
        assert_eq!(tracker.len(), 1);
        assert_eq!(outcome.newly_tracked, 1);
        // The first snapshot wins; the duplicate was dropped.
        assert!((tracker.get(1).unwrap().current_price - 1.1010).abs() < 1e-9);
    }

    #[test]
    fn claim_adopted_sets_ownership_and_stops() {
        let mut tracker = PositionTracker::new(MAGIC);
        let external = broker_pos(9, 0, 1.1000);
        tracker.claim_adopted(&external, Some(1.0980), Some(1.1040));
        let pos = tracker.get(9).unwrap();
        assert_eq!(pos.opened_by, OpenedBy::Adopted);
        assert_eq!(pos.sl, Some(1.0980));
        assert_eq!(pos.tp, Some(1.1040));
        assert_eq!(pos.magic, MAGIC, "claim stamps the engine magic");
    }

    #[test]
    fn reconcile_never_reorphans_an_adopted_ticket() {
        let mut tracker = PositionTracker::new(MAGIC);
        let external = broker_pos(9, 0, 1.1000);

        let outcome = tracker.reconcile(&[external.clone()], Utc::now());
        assert_eq!(outcome.unknown.len(), 1);
        tracker.claim_adopted(&external, Some(1.0980), Some(1.1040));

        // The broker keeps reporting the original foreign magic, but the
        // ticket is tracked now: no repeat hand-off to adoption.
        for _ in 0..3 {
            let outcome = tracker.reconcile(&[broker_pos(9, 0, 1.1005)], Utc::now());
            assert!(outcome.unknown.is_empty());
            assert_eq!(outcome.updated, 1);
        }
        let pos = tracker.get(9).unwrap();
        assert_eq!(pos.opened_by, OpenedBy::Adopted);
        assert_eq!(pos.magic, MAGIC);
    }

    #[test]
    fn partial_close_reduces_lot() {
        let mut tracker = PositionTracker::new(MAGIC);
        tracker.reconcile(&[broker_pos(1, MAGIC, 1.1010)], Utc::now());
        tracker.apply_partial_close(1, 0.04);
        assert!((tracker.get(1).unwrap().lot - 0.06).abs() < 1e-9);
    }
}
