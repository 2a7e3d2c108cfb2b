// =============================================================================
// Trade Database — append-only SQLite tables (signals / orders / trades)
// =============================================================================
//
// Single writer: the engine cycle. Rows are buffered in memory during the
// cycle and flushed in one transaction at the cycle boundary, so a crash
// mid-cycle never leaves a half-written funnel.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};
use uuid::Uuid;

/// One row of the signal funnel.
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub confidence: f64,
    pub strategy: String,
    pub accepted: bool,
}

impl SignalRow {
    pub fn new(
        symbol: &str,
        side: &str,
        confidence: f64,
        strategy: &str,
        accepted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            confidence,
            strategy: strategy.to_string(),
            accepted,
        }
    }
}

/// One order attempt, filled or failed.
#[derive(Debug, Clone)]
pub struct OrderRow {
    pub id: String,
    pub signal_id: Option<String>,
    pub ts_request: DateTime<Utc>,
    pub ts_ack: Option<DateTime<Utc>>,
    pub request_price: f64,
    pub execution_price: Option<f64>,
    pub lot: f64,
    pub status: String,
    pub latency_ms: Option<u64>,
    pub slippage: Option<f64>,
}

/// One completed round trip.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub id: String,
    pub order_id: Option<String>,
    pub entry_ts: DateTime<Utc>,
    pub exit_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub lot: f64,
    pub pnl: f64,
    pub mae: f64,
    pub mfe: f64,
    pub exit_strategy: String,
}

pub struct TradeDb {
    conn: Connection,
    pending_signals: Vec<SignalRow>,
    pending_orders: Vec<OrderRow>,
    pending_trades: Vec<TradeRow>,
}

impl TradeDb {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating db directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening trade db at {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signals (
                id         TEXT PRIMARY KEY,
                ts         TEXT NOT NULL,
                symbol     TEXT NOT NULL,
                side       TEXT NOT NULL,
                confidence REAL NOT NULL,
                strategy   TEXT NOT NULL,
                accepted   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS orders (
                id              TEXT PRIMARY KEY,
                signal_id       TEXT,
                ts_request      TEXT NOT NULL,
                ts_ack          TEXT,
                request_price   REAL NOT NULL,
                execution_price REAL,
                lot             REAL NOT NULL,
                status          TEXT NOT NULL,
                latency_ms      INTEGER,
                slippage        REAL
            );
            CREATE TABLE IF NOT EXISTS trades (
                id            TEXT PRIMARY KEY,
                order_id      TEXT,
                entry_ts      TEXT NOT NULL,
                exit_ts       TEXT NOT NULL,
                entry_price   REAL NOT NULL,
                exit_price    REAL NOT NULL,
                lot           REAL NOT NULL,
                pnl           REAL NOT NULL,
                mae           REAL NOT NULL,
                mfe           REAL NOT NULL,
                exit_strategy TEXT NOT NULL
            );",
        )
        .context("creating trade db schema")?;

        info!("trade database ready");
        Ok(Self {
            conn,
            pending_signals: Vec::new(),
            pending_orders: Vec::new(),
            pending_trades: Vec::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Buffered writes
    // -------------------------------------------------------------------------

    pub fn record_signal(&mut self, row: SignalRow) -> String {
        let id = row.id.clone();
        self.pending_signals.push(row);
        id
    }

    pub fn record_order(&mut self, row: OrderRow) -> String {
        let id = row.id.clone();
        self.pending_orders.push(row);
        id
    }

    pub fn record_trade(&mut self, row: TradeRow) {
        self.pending_trades.push(row);
    }

    /// Flush all buffered rows in one transaction. Called once per cycle.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending_signals.is_empty()
            && self.pending_orders.is_empty()
            && self.pending_trades.is_empty()
        {
            return Ok(());
        }

        let tx = self.conn.transaction()?;

        for row in self.pending_signals.drain(..) {
            tx.execute(
                "INSERT INTO signals (id, ts, symbol, side, confidence, strategy, accepted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.ts.to_rfc3339(),
                    row.symbol,
                    row.side,
                    row.confidence,
                    row.strategy,
                    row.accepted as i64,
                ],
            )?;
        }

        for row in self.pending_orders.drain(..) {
            tx.execute(
                "INSERT INTO orders (id, signal_id, ts_request, ts_ack, request_price,
                                     execution_price, lot, status, latency_ms, slippage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.id,
                    row.signal_id,
                    row.ts_request.to_rfc3339(),
                    row.ts_ack.map(|t| t.to_rfc3339()),
                    row.request_price,
                    row.execution_price,
                    row.lot,
                    row.status,
                    row.latency_ms.map(|v| v as i64),
                    row.slippage,
                ],
            )?;
        }

        for row in self.pending_trades.drain(..) {
            tx.execute(
                "INSERT INTO trades (id, order_id, entry_ts, exit_ts, entry_price,
                                     exit_price, lot, pnl, mae, mfe, exit_strategy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id,
                    row.order_id,
                    row.entry_ts.to_rfc3339(),
                    row.exit_ts.to_rfc3339(),
                    row.entry_price,
                    row.exit_price,
                    row.lot,
                    row.pnl,
                    row.mae,
                    row.mfe,
                    row.exit_strategy,
                ],
            )?;
        }

        tx.commit()?;
        debug!("trade db cycle flush committed");
        Ok(())
    }

    /// Row count for a table. Test/diagnostic helper.
    pub fn count(&self, table: &str) -> Result<i64> {
        // Table names cannot be bound; restrict to the known schema.
        let table = match table {
            "signals" | "orders" | "trades" => table,
            other => anyhow::bail!("unknown table {other}"),
        };
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_commits_all_buffered_rows() {
        let mut db = TradeDb::open_in_memory().unwrap();
        let signal_id = db.record_signal(SignalRow::new("EURUSD", "long", 0.8, "ema_cross", true));
        db.record_signal(SignalRow::new("EURUSD", "long", 0.6, "sma_cross", false));
        db.record_order(OrderRow {
            id: Uuid::new_v4().to_string(),
            signal_id: Some(signal_id),
            ts_request: Utc::now(),
            ts_ack: Some(Utc::now()),
            request_price: 1.1000,
            execution_price: Some(1.10005),
            lot: 0.05,
            status: "filled".into(),
            latency_ms: Some(42),
            slippage: Some(0.5),
        });
        db.flush().unwrap();

        assert_eq!(db.count("signals").unwrap(), 2);
        assert_eq!(db.count("orders").unwrap(), 1);
        assert_eq!(db.count("trades").unwrap(), 0);
    }

    #[test]
    fn rejected_signals_are_recorded_not_accepted() {
        let mut db = TradeDb::open_in_memory().unwrap();
        db.record_signal(SignalRow::new("EURUSD", "long", 0.6, "sma_cross", false));
        db.flush().unwrap();
        let accepted: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM signals WHERE accepted = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(accepted, 0);
    }

    #[test]
    fn empty_flush_is_a_noop() {
        let mut db = TradeDb::open_in_memory().unwrap();
        db.flush().unwrap();
        assert_eq!(db.count("signals").unwrap(), 0);
    }

    #[test]
    fn trade_round_trip_persists() {
        let mut db = TradeDb::open_in_memory().unwrap();
        db.record_trade(TradeRow {
            id: Uuid::new_v4().to_string(),
            order_id: None,
            entry_ts: Utc::now(),
            exit_ts: Utc::now(),
            entry_price: 1.1000,
            exit_price: 1.1050,
            lot: 0.10,
            pnl: 50.0,
            mae: 0.0010,
            mfe: 0.0060,
            exit_strategy: "take_profit".into(),
        });
        db.flush().unwrap();
        assert_eq!(db.count("trades").unwrap(), 1);
    }

    #[test]
    fn unknown_table_is_rejected() {
        let db = TradeDb::open_in_memory().unwrap();
        assert!(db.count("signals; DROP TABLE signals").is_err());
    }
}
