//! Full-state ledger snapshots
//!
//! The whole ledger is re-serialized after every mutation. There is no
//! write-ahead log: updates are tick-bounded, and a snapshot is a single
//! self-contained document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::{Book, CancelRecord, EquityPoint, LedgerStats, Order, Position, TradeRecord};

/// Persisted ledger document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balance: f64,
    pub initial_balance: f64,
    pub leverage: f64,
    pub open_positions: Book<Position>,
    pub pending_orders: Book<Order>,
    pub history: Vec<TradeRecord>,
    #[serde(default)]
    pub cancelled_history: Vec<CancelRecord>,
    #[serde(default)]
    pub equity_history: Vec<EquityPoint>,
    #[serde(default)]
    pub stats: LedgerStats,
    #[serde(default)]
    pub next_sequence: u64,
    pub last_updated: DateTime<Utc>,
}

impl LedgerSnapshot {
    pub fn fresh(initial_balance: f64, leverage: f64, now: DateTime<Utc>) -> Self {
        LedgerSnapshot {
            balance: initial_balance,
            initial_balance,
            leverage,
            open_positions: Book::default(),
            pending_orders: Book::default(),
            history: Vec::new(),
            cancelled_history: Vec::new(),
            equity_history: Vec::new(),
            stats: LedgerStats::default(),
            next_sequence: 1,
            last_updated: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fatal at startup: never replaced by an empty ledger implicitly
    #[error("snapshot {location} is corrupted: {source}")]
    Corrupted {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("snapshot database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Where ledger snapshots live
pub trait SnapshotStore: Send {
    /// `Ok(None)` when nothing has been stored yet
    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError>;

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError>;

    fn describe(&self) -> String;
}

/// Pretty-printed JSON document, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonFileStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        decode(&contents, &self.path.display().to_string()).map(Some)
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(snapshot).map_err(SnapshotError::Encode)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// In-process store; clones share the same slot
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a raw document, e.g. to exercise corrupt-snapshot handling
    pub fn with_document(document: impl Into<String>) -> Self {
        MemoryStore {
            slot: Arc::new(Mutex::new(Some(document.into()))),
        }
    }

    pub fn document(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError> {
        match self.document() {
            Some(doc) => decode(&doc, "memory").map(Some),
            None => Ok(None),
        }
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        let json = serde_json::to_string(snapshot).map_err(SnapshotError::Encode)?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(json);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

pub(crate) fn decode(document: &str, location: &str) -> Result<LedgerSnapshot, SnapshotError> {
    serde_json::from_str(document).map_err(|source| SnapshotError::Corrupted {
        location: location.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fib-short-trader-{}-{}-{}.json",
            name,
            std::process::id(),
            now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn test_missing_file_loads_none() {
        let store = JsonFileStore::new(temp_path("missing"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let path = temp_path("roundtrip");
        let mut store = JsonFileStore::new(&path);
        let mut snapshot = LedgerSnapshot::fresh(30.0, 10.0, now());
        snapshot.balance = 31.5;
        snapshot.stats.wins = 2;

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for key in [
            "balance",
            "initial_balance",
            "open_positions",
            "pending_orders",
            "history",
            "cancelled_history",
            "equity_history",
            "stats",
        ] {
            assert!(raw.get(key).is_some(), "missing key {}", key);
        }
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ \"balance\": 30.0, ").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(SnapshotError::Corrupted { .. })));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_memory_store_shares_slot() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer
            .save(&LedgerSnapshot::fresh(100.0, 5.0, now()))
            .unwrap();
        assert_eq!(store.load().unwrap().unwrap().initial_balance, 100.0);
    }
}
