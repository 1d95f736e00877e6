// SQLite snapshot store
//
// Keeps the latest ledger document in a single-row table plus an
// append-only `trades` audit table, with an optional JSON backup of the
// document next to the database.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::snapshot::{decode, LedgerSnapshot, SnapshotError, SnapshotStore};

pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
    json_backup_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, db_path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self, SnapshotError> {
        Self::with_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    /// Also write the document as pretty JSON to `path` after every save
    pub fn with_json_backup(mut self, path: impl AsRef<Path>) -> Self {
        self.json_backup_path = Some(path.as_ref().to_path_buf());
        self
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> Result<Self, SnapshotError> {
        let store = Self {
            conn,
            db_path,
            json_backup_path: None,
        };
        store.create_tables()?;
        info!("SQLite ledger store initialized at {}", store.db_path.display());
        Ok(store)
    }

    fn create_tables(&self) -> Result<(), SnapshotError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                strategy_case INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                close_price REAL NOT NULL,
                quantity REAL NOT NULL,
                margin REAL NOT NULL,
                pnl REAL NOT NULL,
                commission REAL NOT NULL,
                net_pnl REAL NOT NULL,
                reason TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Rows in the trade audit table
    pub fn trade_count(&self) -> Result<usize, SnapshotError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn export_json(&self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        let Some(path) = &self.json_backup_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(snapshot).map_err(SnapshotError::Encode)?;
        std::fs::write(path, json).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Ledger exported to: {}", path.display());
        Ok(())
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError> {
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM ledger_snapshot WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(doc) => decode(&doc, &self.describe()).map(Some),
            None => {
                debug!("No ledger snapshot found");
                Ok(None)
            }
        }
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        let document = serde_json::to_string(snapshot).map_err(SnapshotError::Encode)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO ledger_snapshot (id, document, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document,
                                           updated_at = excluded.updated_at",
            params![document, snapshot.last_updated.to_rfc3339()],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO trades
                 (order_id, symbol, side, strategy_case, entry_price, close_price,
                  quantity, margin, pnl, commission, net_pnl, reason, opened_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for trade in &snapshot.history {
                stmt.execute(params![
                    trade.order_id.as_str(),
                    trade.symbol.as_str(),
                    trade.side.to_string(),
                    trade.strategy_case.as_u8(),
                    trade.entry_price,
                    trade.close_price,
                    trade.quantity,
                    trade.margin,
                    trade.pnl,
                    trade.commission,
                    trade.net_pnl,
                    trade.reason.to_string(),
                    trade.opened_at.to_rfc3339(),
                    trade.closed_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        self.export_json(snapshot)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CloseReason, OrderId, TradeRecord};
    use crate::{Case, Side, Symbol};
    use chrono::{TimeZone, Utc};

    fn trade(id: &str) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        TradeRecord {
            order_id: OrderId::from(id),
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Short,
            entry_price: 100.0,
            close_price: 90.0,
            quantity: 1.0,
            margin: 10.0,
            pnl: 10.0,
            commission: 0.1,
            net_pnl: 9.9,
            min_pnl: -1.0,
            max_pnl: 10.0,
            strategy_case: Case::Four,
            reason: CloseReason::TakeProfit,
            swing_high: 110.0,
            swing_low: 50.0,
            stop_loss: Some(113.0),
            take_profit: 90.0,
            executions: vec![],
            opened_at: t,
            closed_at: t,
        }
    }

    #[test]
    fn test_empty_database_loads_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_and_audit_trail() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        let mut snapshot = LedgerSnapshot::fresh(30.0, 10.0, now);
        snapshot.history.push(trade("ORD-1-1"));
        store.save(&snapshot).unwrap();

        snapshot.history.push(trade("ORD-1-2"));
        snapshot.balance = 49.8;
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.balance, 49.8);
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(store.trade_count().unwrap(), 2);
    }

    #[test]
    fn test_corrupted_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO ledger_snapshot (id, document, updated_at) VALUES (1, '{', 'x')",
                [],
            )
            .unwrap();
        assert!(matches!(store.load(), Err(SnapshotError::Corrupted { .. })));
    }
}
