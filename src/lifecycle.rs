// =============================================================================
// Position Lifecycle — SL/TP modification, partial close, full close
// =============================================================================
//
// The only write path to broker positions. Stop modifications are validated
// against the broker's `stops_level` *before* the wire call; a violation
// returns `StopsTooClose` and the caller (the exit coordinator) decides
// whether to widen or skip.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::{Broker, CloseAck, SymbolInfo};
use crate::error::BrokerError;
use crate::types::Position;

pub struct PositionLifecycle {
    broker: Arc<dyn Broker>,
    /// Dry-run logs intents without touching the broker.
    dry_run: bool,
}

impl PositionLifecycle {
    pub fn new(broker: Arc<dyn Broker>, dry_run: bool) -> Self {
        Self { broker, dry_run }
    }

    // -------------------------------------------------------------------------
    // Stops
    // -------------------------------------------------------------------------

    /// Apply new stops to a position after validating the broker's minimum
    /// stop distance.
    pub async fn set_stops(
        &self,
        position: &Position,
        symbol_info: &SymbolInfo,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> Result<(), BrokerError> {
        let min_distance = symbol_info.stops_level * symbol_info.point;
        let price = position.current_price;

        for (label, level) in [("sl", sl), ("tp", tp)] {
            if let Some(level) = level {
                let distance = (price - level).abs();
                if min_distance > 0.0 && distance < min_distance {
                    debug!(
                        ticket = position.ticket,
                        level,
                        distance,
                        min_distance,
                        which = label,
                        "stop rejected before wire call"
                    );
                    return Err(BrokerError::StopsTooClose {
                        requested: level,
                        min_distance,
                    });
                }
            }
        }

        if self.dry_run {
            info!(
                ticket = position.ticket,
                sl = ?sl,
                tp = ?tp,
                "dry-run: would modify stops"
            );
            return Ok(());
        }

        self.broker.modify_position(position.ticket, sl, tp).await?;
        info!(ticket = position.ticket, sl = ?sl, tp = ?tp, "stops modified");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Closes
    // -------------------------------------------------------------------------

    /// Close `fraction` (0, 1] of the position. The closed lot is snapped to
    /// the broker's lot step; a fraction too small to reach one step falls
    /// back to a full close.
    pub async fn partial_close(
        &self,
        position: &Position,
        symbol_info: &SymbolInfo,
        fraction: f64,
    ) -> Result<CloseAck, BrokerError> {
        let fraction = fraction.clamp(0.0, 1.0);
        let lot = symbol_info.snap_lot(position.lot * fraction);

        if lot <= 0.0 || lot >= position.lot {
            warn!(
                ticket = position.ticket,
                fraction,
                "partial close below lot step — closing fully instead"
            );
            return self.full_close(position).await;
        }

        if self.dry_run {
            info!(
                ticket = position.ticket,
                lot,
                "dry-run: would partially close"
            );
            return Ok(CloseAck {
                pnl: 0.0,
                price: position.current_price,
            });
        }

        let ack = self.broker.close_position(position.ticket, Some(lot)).await?;
        info!(
            ticket = position.ticket,
            lot,
            pnl = ack.pnl,
            price = ack.price,
            "partial close executed"
        );
        Ok(ack)
    }

    /// Close the whole position.
    pub async fn full_close(&self, position: &Position) -> Result<CloseAck, BrokerError> {
        if self.dry_run {
            info!(ticket = position.ticket, "dry-run: would close position");
            return Ok(CloseAck {
                pnl: position.unrealized_pnl,
                price: position.current_price,
            });
        }

        let ack = self.broker.close_position(position.ticket, None).await?;
        info!(
            ticket = position.ticket,
            pnl = ack.pnl,
            price = ack.price,
            "position closed"
        );
        Ok(ack)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_mock::MockBroker;
    use crate::types::{OpenedBy, Side};
    use chrono::Utc;

    fn position() -> Position {
        Position {
            ticket: 11,
            symbol: "EURUSD".into(),
            side: Side::Long,
            lot: 0.10,
            entry_price: 1.1000,
            entry_time: Utc::now(),
            sl: None,
            tp: None,
            current_price: 1.1000,
            unrealized_pnl: 0.0,
            peak_favorable_price: 1.1000,
            peak_adverse_price: 1.1000,
            opened_by: OpenedBy::Engine,
            magic: 1,
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
            stops_level: 100.0, // 10 pips
        }
    }

    #[tokio::test]
    async fn stops_inside_min_distance_are_rejected_locally() {
        let broker = Arc::new(MockBroker::default());
        let lifecycle = PositionLifecycle::new(broker.clone(), false);
        // 5 points away, min distance is 100 points.
        let err = lifecycle
            .set_stops(&position(), &symbol_info(), Some(1.09995), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::StopsTooClose { .. }));
        assert_eq!(broker.modify_calls(), 0, "no wire call on local rejection");
    }

    #[tokio::test]
    async fn valid_stops_reach_the_broker() {
        let broker = Arc::new(MockBroker::default());
        let lifecycle = PositionLifecycle::new(broker.clone(), false);
        lifecycle
            .set_stops(&position(), &symbol_info(), Some(1.0950), Some(1.1100))
            .await
            .unwrap();
        assert_eq!(broker.modify_calls(), 1);
    }

    #[tokio::test]
    async fn dry_run_never_calls_the_broker() {
        let broker = Arc::new(MockBroker::default());
        let lifecycle = PositionLifecycle::new(broker.clone(), true);
        lifecycle
            .set_stops(&position(), &symbol_info(), Some(1.0950), None)
            .await
            .unwrap();
        lifecycle.full_close(&position()).await.unwrap();
        assert_eq!(broker.modify_calls(), 0);
        assert_eq!(broker.close_calls(), 0);
    }

    #[tokio::test]
    async fn tiny_partial_close_falls_back_to_full() {
        let broker = Arc::new(MockBroker::default());
        let lifecycle = PositionLifecycle::new(broker.clone(), false);
        // 1% of 0.10 lot = 0.001, below the 0.01 step.
        lifecycle
            .partial_close(&position(), &symbol_info(), 0.01)
            .await
            .unwrap();
        assert_eq!(broker.close_calls(), 1);
        assert_eq!(broker.last_close_lot(), None, "fallback closes fully");
    }

    #[tokio::test]
    async fn partial_close_snaps_lot() {
        let broker = Arc::new(MockBroker::default());
        let lifecycle = PositionLifecycle::new(broker.clone(), false);
        lifecycle
            .partial_close(&position(), &symbol_info(), 0.5)
            .await
            .unwrap();
        assert_eq!(broker.last_close_lot(), Some(0.05));
    }
}
