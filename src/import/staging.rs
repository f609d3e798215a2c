use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::fields::NormalizedRow;

/// A previewed row together with the spreadsheet row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub row_number: usize,
    pub values: NormalizedRow,
}

/// Rows produced by one preview, keyed by table.
pub type StagedTables = BTreeMap<String, Vec<StagedRow>>;

#[derive(Debug, Clone)]
pub struct StagedPreview {
    pub tables: StagedTables,
    staged_at: Instant,
}

impl StagedPreview {
    pub fn new(tables: StagedTables) -> Self {
        Self {
            tables,
            staged_at: Instant::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Previews waiting for import, one slot per session key.
#[derive(Debug)]
pub struct StagingStore {
    entries: Mutex<HashMap<String, StagedPreview>>,
    ttl: Duration,
}

impl StagingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Replaces whatever was staged under `key`. Expired entries are pruned first.
    pub fn stage(&self, key: &str, preview: StagedPreview) {
        let rows = preview.row_count();
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        let ttl = self.ttl;
        guard.retain(|_, entry| entry.staged_at.elapsed() <= ttl);
        let pruned = before - guard.len();
        if pruned > 0 {
            debug!(target: "fourloki", event = "staging_pruned", pruned);
        }
        let replaced = guard.insert(key.to_string(), preview).is_some();
        info!(
            target: "fourloki",
            event = "staging_stored",
            session = key,
            rows,
            replaced
        );
    }

    /// Removes and returns the preview staged under `key`, unless it has expired.
    pub fn take(&self, key: &str) -> Option<StagedPreview> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let preview = guard.remove(key)?;
        if preview.staged_at.elapsed() > self.ttl {
            debug!(target: "fourloki", event = "staging_expired", session = key);
            return None;
        }
        Some(preview)
    }

    pub fn clear(&self, key: &str) {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
