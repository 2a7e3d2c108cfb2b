// =============================================================================
// Trade Adoption — claiming externally opened positions
// =============================================================================
//
// A position found at the broker without engine management gets emergency
// stops synthesized from volatility and is claimed under engine control:
//
//   1. Pull the last 100 bars on a stable timeframe (H1).
//   2. Compute ATR(14).
//   3. ATR valid   -> sl = entry -/+ sl_mult * ATR, tp = entry +/- tp_mult * ATR.
//      ATR missing -> fixed-points fallback, logged as degraded adoption.
//   4. Issue modify_position; on success the tracker claims the ticket with
//      opened_by = adopted.
//
// Positions older than `max_adopt_age_minutes` are refused. Positions that
// already carry both stops are claimed as-is, so running adoption twice
// never issues a second modify.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::bridge::{Broker, BrokerPosition, SymbolInfo};
use crate::config::AdoptionConfig;
use crate::error::BrokerError;
use crate::indicators::atr;
use crate::tracker::PositionTracker;
use crate::types::Timeframe;

/// Bars fetched for the emergency ATR.
const ADOPTION_BARS: usize = 100;

/// ATR period for emergency stops.
const ADOPTION_ATR_PERIOD: usize = 14;

/// Stable timeframe used regardless of the engine's trading timeframe.
const ADOPTION_TIMEFRAME: Timeframe = Timeframe::H1;

/// Result of one adoption attempt.
#[derive(Debug)]
pub enum AdoptionOutcome {
    /// Stops applied (or found present) and the ticket claimed.
    Adopted { sl: f64, tp: f64, degraded: bool },
    /// The tracker already manages this ticket.
    AlreadyManaged,
    /// Refused by policy (too old); left unmanaged.
    Refused(String),
    /// The broker rejected the modify.
    Failed(BrokerError),
}

pub struct TradeAdoption {
    broker: Arc<dyn Broker>,
    cfg: AdoptionConfig,
    dry_run: bool,
}

impl TradeAdoption {
    pub fn new(broker: Arc<dyn Broker>, cfg: AdoptionConfig, dry_run: bool) -> Self {
        Self {
            broker,
            cfg,
            dry_run,
        }
    }

    /// Attempt to claim `bp` under engine management.
    pub async fn adopt(
        &self,
        bp: &BrokerPosition,
        symbol_info: &SymbolInfo,
        tracker: &mut PositionTracker,
        now: DateTime<Utc>,
    ) -> AdoptionOutcome {
        if tracker.get(bp.ticket).is_some() {
            return AdoptionOutcome::AlreadyManaged;
        }

        // Broker times arrive UTC-coerced at ingest, so this comparison is
        // always zone-consistent.
        let age_minutes = (now - bp.entry_time).num_minutes();
        if age_minutes > self.cfg.max_adopt_age_minutes {
            let reason = format!(
                "position {} is {age_minutes} minutes old, adoption limit is {}",
                bp.ticket, self.cfg.max_adopt_age_minutes
            );
            warn!(ticket = bp.ticket, age_minutes, "adoption refused: too old");
            return AdoptionOutcome::Refused(reason);
        }

        // Already protected — claim without touching the broker.
        if let (Some(sl), Some(tp)) = (bp.sl, bp.tp) {
            tracker.claim_adopted(bp, Some(sl), Some(tp));
            return AdoptionOutcome::Adopted {
                sl,
                tp,
                degraded: false,
            };
        }

        let (sl, tp, degraded) = match self.emergency_levels(bp, symbol_info).await {
            Some(levels) => levels,
            None => {
                return AdoptionOutcome::Failed(BrokerError::Transient(
                    "could not fetch bars for emergency stops".into(),
                ))
            }
        };

        if self.dry_run {
            info!(ticket = bp.ticket, sl, tp, "dry-run: would adopt with stops");
            tracker.claim_adopted(bp, Some(sl), Some(tp));
            return AdoptionOutcome::Adopted { sl, tp, degraded };
        }

        match self.broker.modify_position(bp.ticket, Some(sl), Some(tp)).await {
            Ok(()) => {
                tracker.claim_adopted(bp, Some(sl), Some(tp));
                info!(
                    ticket = bp.ticket,
                    symbol = %bp.symbol,
                    sl,
                    tp,
                    degraded,
                    "external position adopted with emergency stops"
                );
                AdoptionOutcome::Adopted { sl, tp, degraded }
            }
            Err(e) => {
                warn!(ticket = bp.ticket, error = %e, "adoption modify failed");
                AdoptionOutcome::Failed(e)
            }
        }
    }

    /// Compute emergency SL/TP. Returns `(sl, tp, degraded)` where degraded
    /// marks the fixed-points fallback, or None when bars are unavailable.
    async fn emergency_levels(
        &self,
        bp: &BrokerPosition,
        symbol_info: &SymbolInfo,
    ) -> Option<(f64, f64, bool)> {
        let sign = bp.side.sign();

        if self.cfg.use_atr_based_sltp {
            let bars = self
                .broker
                .rates(&bp.symbol, ADOPTION_TIMEFRAME, ADOPTION_BARS)
                .await
                .ok()?;
            if let Some(atr_value) = atr::latest(&bars, ADOPTION_ATR_PERIOD) {
                if atr_value > 0.0 {
                    let sl = bp.entry_price - sign * self.cfg.emergency_sl_atr_mult * atr_value;
                    let tp = bp.entry_price + sign * self.cfg.emergency_tp_atr_mult * atr_value;
                    return Some((sl, tp, false));
                }
            }
            warn!(
                ticket = bp.ticket,
                symbol = %bp.symbol,
                "ATR unavailable — degraded adoption with fixed-points stops"
            );
        }

        let distance = self.cfg.emergency_sl_points * symbol_info.point;
        let sl = bp.entry_price - sign * distance;
        let tp = bp.entry_price + sign * 2.0 * distance;
        Some((sl, tp, true))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::bridge::test_mock::MockBroker;
    use crate::indicators::test_bars;
    use crate::types::{Bar, Side};

    const MAGIC: i64 = 42;

    /// 100 H1 bars with a constant true range of 0.00097 and no gaps, so
    /// ATR(14) converges to exactly 0.00097.
    fn flat_atr_bars() -> Vec<Bar> {
        test_bars::build(100, |_| {
            (1.10000, 1.10097, 1.10000, 1.10000, 500.0)
        })
    }

    fn external_buy(entry_time: DateTime<Utc>) -> BrokerPosition {
        BrokerPosition {
            ticket: 501,
            symbol: "EURUSD".into(),
            side: Side::Long,
            lot: 0.10,
            entry_price: 1.10000,
            entry_time,
            sl: None,
            tp: None,
            current_price: 1.10000,
            unrealized_pnl: 0.0,
            magic: 0,
        }
    }

    fn symbol_info() -> SymbolInfo {
        SymbolInfo {
            point: 0.00001,
            tick_size: 0.00001,
            lot_step: 0.01,
            min_lot: 0.01,
            max_lot: 100.0,
            contract_size: 100_000.0,
            trade_allowed: true,
            spread: 10.0,
            stops_level: 0.0,
        }
    }

    #[tokio::test]
    async fn atr_based_stops_match_expectation() {
        let broker = Arc::new(MockBroker::healthy_with(flat_atr_bars(), vec![]));
        let adoption = TradeAdoption::new(broker.clone(), AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();

        let outcome = adoption
            .adopt(&external_buy(now), &symbol_info(), &mut tracker, now)
            .await;

        match outcome {
            AdoptionOutcome::Adopted { sl, tp, degraded } => {
                // sl = 1.10000 - 2 * 0.00097, tp = 1.10000 + 4 * 0.00097,
                // within one point.
                assert!((sl - 1.09806).abs() < 0.00001, "sl was {sl}");
                assert!((tp - 1.10388).abs() < 0.00001, "tp was {tp}");
                assert!(!degraded);
            }
            other => panic!("expected adoption, got {other:?}"),
        }
        assert_eq!(broker.modify_calls(), 1);
        assert_eq!(tracker.tickets(), vec![501]);
    }

    #[tokio::test]
    async fn adoption_is_idempotent() {
        let broker = Arc::new(MockBroker::healthy_with(flat_atr_bars(), vec![]));
        let adoption = TradeAdoption::new(broker.clone(), AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();
        let bp = external_buy(now);

        let first = adoption.adopt(&bp, &symbol_info(), &mut tracker, now).await;
        let (sl1, tp1) = match first {
            AdoptionOutcome::Adopted { sl, tp, .. } => (sl, tp),
            other => panic!("expected adoption, got {other:?}"),
        };

        let second = adoption.adopt(&bp, &symbol_info(), &mut tracker, now).await;
        assert!(matches!(second, AdoptionOutcome::AlreadyManaged));
        assert_eq!(broker.modify_calls(), 1, "second pass must not modify");

        let pos = tracker.get(501).unwrap();
        assert_eq!(pos.sl, Some(sl1));
        assert_eq!(pos.tp, Some(tp1));
    }

    #[tokio::test]
    async fn short_side_mirrors_stops() {
        let broker = Arc::new(MockBroker::healthy_with(flat_atr_bars(), vec![]));
        let adoption = TradeAdoption::new(broker, AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();
        let mut bp = external_buy(now);
        bp.side = Side::Short;

        match adoption.adopt(&bp, &symbol_info(), &mut tracker, now).await {
            AdoptionOutcome::Adopted { sl, tp, .. } => {
                assert!(sl > bp.entry_price, "short SL sits above entry");
                assert!(tp < bp.entry_price, "short TP sits below entry");
            }
            other => panic!("expected adoption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn old_positions_are_refused() {
        let broker = Arc::new(MockBroker::healthy_with(flat_atr_bars(), vec![]));
        let adoption = TradeAdoption::new(broker.clone(), AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();
        let old = external_buy(now - Duration::days(30));

        let outcome = adoption.adopt(&old, &symbol_info(), &mut tracker, now).await;
        assert!(matches!(outcome, AdoptionOutcome::Refused(_)));
        assert!(tracker.is_empty());
        assert_eq!(broker.modify_calls(), 0);
    }

    #[tokio::test]
    async fn missing_atr_falls_back_to_fixed_points() {
        // Too few bars for ATR(14).
        let broker = Arc::new(MockBroker::healthy_with(
            test_bars::build(5, |_| (1.1, 1.101, 1.1, 1.1, 100.0)),
            vec![],
        ));
        let adoption = TradeAdoption::new(broker, AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();

        match adoption
            .adopt(&external_buy(now), &symbol_info(), &mut tracker, now)
            .await
        {
            AdoptionOutcome::Adopted { sl, tp, degraded } => {
                assert!(degraded);
                // 500 points * 0.00001 = 0.005 below entry.
                assert!((sl - 1.09500).abs() < 1e-9, "sl was {sl}");
                assert!((tp - 1.11000).abs() < 1e-9, "tp was {tp}");
            }
            other => panic!("expected degraded adoption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_protected_positions_claim_without_modify() {
        let broker = Arc::new(MockBroker::healthy_with(flat_atr_bars(), vec![]));
        let adoption = TradeAdoption::new(broker.clone(), AdoptionConfig::default(), false);
        let mut tracker = PositionTracker::new(MAGIC);
        let now = Utc::now();
        let mut bp = external_buy(now);
        bp.sl = Some(1.0900);
        bp.tp = Some(1.1200);

        match adoption.adopt(&bp, &symbol_info(), &mut tracker, now).await {
            AdoptionOutcome::Adopted { sl, tp, .. } => {
                assert_eq!(sl, 1.0900);
                assert_eq!(tp, 1.1200);
            }
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(broker.modify_calls(), 0);
    }
}
