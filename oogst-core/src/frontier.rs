use crate::extract::MetadataRecord;
use chrono::{DateTime, Utc};
use oogst_scanner::capture::CaptureBundle;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FrontierError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL not in frontier: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrontierError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Discovered,
    Processed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Discovered => "discovered",
            EntryState::Processed => "processed",
        }
    }

    fn from_column(value: &str) -> Self {
        match value {
            "processed" => EntryState::Processed,
            _ => EntryState::Discovered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub state: EntryState,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub raw_capture: Option<CaptureBundle>,
    pub metadata: Option<MetadataRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl FrontierEntry {
    pub fn is_processed(&self) -> bool {
        self.state == EntryState::Processed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub recently_processed: u64,
}

/// Columns as stored, before the JSON ones are decoded.
struct StoredEntry {
    url: String,
    state: String,
    discovered_at: i64,
    processed_at: Option<i64>,
    raw_capture: Option<String>,
    metadata: Option<String>,
    lease_expires_at: Option<i64>,
}

const ENTRY_COLUMNS: &str =
    "url, state, discovered_at, processed_at, raw_capture, metadata, lease_expires_at";

impl StoredEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            state: row.get(1)?,
            discovered_at: row.get(2)?,
            processed_at: row.get(3)?,
            raw_capture: row.get(4)?,
            metadata: row.get(5)?,
            lease_expires_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<FrontierEntry> {
        let raw_capture = self
            .raw_capture
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(FrontierEntry {
            url: self.url,
            state: EntryState::from_column(&self.state),
            discovered_at: from_millis(self.discovered_at),
            processed_at: self.processed_at.map(from_millis),
            raw_capture,
            metadata,
            lease_expires_at: self.lease_expires_at.map(from_millis),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Persisted set of known detail URLs and their processing state.
///
/// Backed by one SQLite file in WAL mode so a discover run and one or more
/// process runs can share it. Entries only ever move Discovered -> Processed.
pub struct Frontier {
    conn: Mutex<Connection>,
    owner: String,
}

impl Frontier {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened frontier at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Discover and process may run as separate processes on one file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let frontier = Frontier {
            conn: Mutex::new(conn),
            owner: uuid::Uuid::new_v4().to_string(),
        };
        frontier.init_schema()?;
        Ok(frontier)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS frontier (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL DEFAULT 'discovered' CHECK(state IN ('discovered', 'processed')),
                discovered_at INTEGER NOT NULL,
                processed_at INTEGER,

                raw_capture TEXT,         -- JSON capture bundle
                metadata TEXT,            -- JSON metadata record

                -- Process worker claims
                lease_expires_at INTEGER,
                claimed_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_frontier_state ON frontier(state, id);
            CREATE INDEX IF NOT EXISTS idx_frontier_processed_at ON frontier(processed_at);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record unknown URLs as Discovered; known URLs are left untouched.
    /// Returns how many were new.
    pub fn insert<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO frontier (url, state, discovered_at) VALUES (?1, 'discovered', ?2)
                 ON CONFLICT(url) DO NOTHING",
            )?;
            for url in urls {
                created += stmt.execute(params![url.as_ref(), now])?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} new URLs into frontier", created);
        Ok(created)
    }

    /// Discovered entries in discovery order. Leases are ignored.
    pub fn next_batch(&self, limit: Option<usize>) -> Result<Vec<FrontierEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM frontier WHERE state = 'discovered' ORDER BY id LIMIT ?1",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit_param(limit)], StoredEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredEntry::decode).collect()
    }

    /// Lease up to `limit` Discovered entries nobody else holds a live lease on.
    ///
    /// Runs as one `BEGIN IMMEDIATE` transaction, so concurrent claimers never
    /// receive the same entry while its lease lasts.
    pub fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<FrontierEntry>> {
        let now = Utc::now().timestamp_millis();
        let expires = now.saturating_add(duration_millis(lease));

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let urls: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT url FROM frontier
                 WHERE state = 'discovered'
                   AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
                 ORDER BY id LIMIT ?2",
            )?;
            stmt.query_map(params![now, limit_param(Some(limit))], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut claimed = Vec::with_capacity(urls.len());
        {
            let mut update = tx.prepare(
                "UPDATE frontier SET lease_expires_at = ?1, claimed_by = ?2 WHERE url = ?3",
            )?;
            let mut select = tx.prepare(&format!(
                "SELECT {} FROM frontier WHERE url = ?1",
                ENTRY_COLUMNS
            ))?;
            for url in &urls {
                update.execute(params![expires, &self.owner, url])?;
                claimed.push(select.query_row(params![url], StoredEntry::from_row)?);
            }
        }
        tx.commit()?;

        debug!("Claimed {} entries for {}", claimed.len(), self.owner);
        claimed.into_iter().map(StoredEntry::decode).collect()
    }

    /// Drop this handle's leases on `urls` so other workers can claim them now.
    ///
    /// Leases held by other handles are left alone. Returns how many were released.
    pub fn release_claims<S: AsRef<str>>(&self, urls: &[S]) -> Result<usize> {
        if urls.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut released = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE frontier SET lease_expires_at = NULL, claimed_by = NULL
                 WHERE url = ?1 AND claimed_by = ?2 AND state = 'discovered'",
            )?;
            for url in urls {
                released += stmt.execute(params![url.as_ref(), &self.owner])?;
            }
        }
        tx.commit()?;

        debug!("Released {} claims for {}", released, self.owner);
        Ok(released)
    }

    /// Store the result of processing `url` and mark it Processed.
    ///
    /// Marking an already Processed entry overwrites its capture and metadata
    /// and refreshes `processed_at`.
    pub fn mark_processed(
        &self,
        url: &str,
        bundle: &CaptureBundle,
        metadata: &MetadataRecord,
    ) -> Result<()> {
        let raw_capture = serde_json::to_string(bundle)?;
        let metadata = serde_json::to_string(metadata)?;
        let now = Utc::now().timestamp_millis();

        let updated = self.conn().execute(
            "UPDATE frontier
             SET state = 'processed', processed_at = ?1, raw_capture = ?2, metadata = ?3,
                 lease_expires_at = NULL, claimed_by = NULL
             WHERE url = ?4",
            params![now, raw_capture, metadata, url],
        )?;

        if updated == 0 {
            return Err(FrontierError::NotFound(url.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, url: &str) -> Result<Option<FrontierEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM frontier WHERE url = ?1",
            ENTRY_COLUMNS
        ))?;
        let stored = stmt
            .query_row(params![url], StoredEntry::from_row)
            .optional()?;
        stored.map(StoredEntry::decode).transpose()
    }

    /// Counts, with `recently_processed` covering the last `window`.
    pub fn stats(&self, window: Duration) -> Result<FrontierStats> {
        self.stats_at(window, Utc::now())
    }

    /// As [`Frontier::stats`], measuring the window back from `now`.
    pub fn stats_at(&self, window: Duration, now: DateTime<Utc>) -> Result<FrontierStats> {
        let since = now.timestamp_millis().saturating_sub(duration_millis(window));
        let conn = self.conn();
        let (total, processed, recent): (i64, i64, i64) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN state = 'processed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'processed' AND processed_at >= ?1 THEN 1 ELSE 0 END), 0)
             FROM frontier",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let total = total.max(0) as u64;
        let processed = processed.max(0) as u64;
        Ok(FrontierStats {
            total,
            processed,
            unprocessed: total.saturating_sub(processed),
            recently_processed: recent.max(0) as u64,
        })
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn limit_param(limit: Option<usize>) -> i64 {
    limit
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_param() {
        assert_eq!(limit_param(None), -1);
        assert_eq!(limit_param(Some(0)), 0);
        assert_eq!(limit_param(Some(25)), 25);
    }

    #[test]
    fn test_entry_state_column_names() {
        assert_eq!(EntryState::Discovered.as_str(), "discovered");
        assert_eq!(EntryState::from_column("processed"), EntryState::Processed);
        assert_eq!(EntryState::from_column("discovered"), EntryState::Discovered);
    }

    #[test]
    fn test_in_memory_frontier_starts_empty() {
        let frontier = Frontier::open_in_memory().unwrap();
        let stats = frontier.stats(Duration::from_secs(600)).unwrap();
        assert_eq!(stats, FrontierStats::default());
    }
}
