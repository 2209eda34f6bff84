//! SQLite-backed capsule store.
//!
//! Every operation is a single statement executed under the connection mutex,
//! so writes are atomic per capsule and `update_state` / `delete` on the same
//! row are serialized.

use capsule_core::error::{CapsuleError, Result};
use capsule_core::types::{AttachmentRef, Capsule, DeliveryState, NewCapsule};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "SELECT id, recipient, subject, body, due_at, attachment_path, \
     attachment_filename, state, last_error, created_at FROM capsules";

/// Recorded when a failure arrives without any detail.
const UNKNOWN_FAILURE: &str = "unknown delivery failure";

/// `PRAGMA user_version` once timestamps are stored as unix nanoseconds.
const SCHEMA_VERSION: i64 = 1;

/// Durable record of scheduled deliveries.
pub struct CapsuleStore {
    conn: Mutex<Connection>,
}

/// Number of capsules per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
}

impl CapsuleStore {
    /// Open or create the capsule database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            CapsuleError::StoreUnavailable(format!("DB open {}: {e}", path.display()))
        })?;

        // WAL lets the gateway read while the scheduler writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CapsuleError::StoreUnavailable(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations. Safe to run on every start.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS capsules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                due_at INTEGER NOT NULL,          -- unix nanos, UTC
                attachment_path TEXT,
                attachment_filename TEXT,
                state TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL       -- unix nanos, UTC
            );
            CREATE INDEX IF NOT EXISTS idx_capsules_due ON capsules(state, due_at);
            ",
        )
        .map_err(|e| CapsuleError::StoreUnavailable(format!("Migration: {e}")))?;

        // Databases created before failure tracking lack last_error
        let has_last_error: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('capsules') WHERE name='last_error'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        if !has_last_error {
            conn.execute_batch("ALTER TABLE capsules ADD COLUMN last_error TEXT;")
                .map_err(|e| {
                    CapsuleError::StoreUnavailable(format!("Migration add last_error: {e}"))
                })?;
            tracing::info!("Added 'last_error' column to capsules table");
        }

        // Version 0 databases hold unix millis
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Migration version: {e}")))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(&format!(
                "BEGIN;
                 UPDATE capsules SET due_at = due_at * 1000000, created_at = created_at * 1000000;
                 PRAGMA user_version = {SCHEMA_VERSION};
                 COMMIT;"
            ))
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Migration to nanos: {e}")))?;
            tracing::info!("Migrated capsule timestamps to nanosecond precision");
        }

        Ok(())
    }

    /// Drop the table so every later query fails.
    #[cfg(test)]
    pub(crate) fn break_for_test(&self) {
        if let Ok(conn) = self.lock() {
            conn.execute_batch("DROP TABLE capsules;").ok();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Lock: {e}")))
    }

    /// Persist a new capsule in state `pending`. Returns its id.
    pub fn create(&self, capsule: &NewCapsule) -> Result<i64> {
        capsule.validate()?;
        let due_at = to_nanos(capsule.due_at).ok_or_else(|| {
            CapsuleError::Validation(format!(
                "due time {} is outside the supported range",
                capsule.due_at.to_rfc3339()
            ))
        })?;
        let created_at = to_nanos(Utc::now())
            .ok_or_else(|| CapsuleError::StoreUnavailable("clock out of range".into()))?;

        let (attachment_path, attachment_filename) = match &capsule.attachment {
            Some(a) => (
                Some(a.path.to_string_lossy().into_owned()),
                Some(a.filename.clone()),
            ),
            None => (None, None),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO capsules
             (recipient, subject, body, due_at, attachment_path, attachment_filename,
              state, last_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', NULL, ?7)",
            params![
                capsule.recipient.trim(),
                capsule.subject,
                capsule.body,
                due_at,
                attachment_path,
                attachment_filename,
                created_at,
            ],
        )
        .map_err(|e| CapsuleError::StoreUnavailable(format!("Create capsule: {e}")))?;
        let id = conn.last_insert_rowid();

        tracing::info!(
            "📅 Capsule {id} scheduled for {} (due {})",
            capsule.recipient.trim(),
            capsule.due_at.to_rfc3339()
        );
        Ok(id)
    }

    /// All capsules in insertion order.
    pub fn list(&self) -> Result<Vec<Capsule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .map_err(|e| CapsuleError::StoreUnavailable(format!("List capsules: {e}")))?;
        let rows = stmt
            .query_map([], row_to_capsule)
            .map_err(|e| CapsuleError::StoreUnavailable(format!("List capsules: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CapsuleError::StoreUnavailable(format!("List capsules: {e}")))
    }

    pub fn get(&self, id: i64) -> Result<Capsule> {
        let conn = self.lock()?;
        Self::get_locked(&conn, id)?.ok_or(CapsuleError::NotFound(id))
    }

    fn get_locked(conn: &Connection, id: i64) -> Result<Option<Capsule>> {
        conn.query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_capsule)
            .optional()
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Get capsule {id}: {e}")))
    }

    /// Remove a capsule and return it, so the caller can release its
    /// attachment content.
    pub fn delete(&self, id: i64) -> Result<Capsule> {
        let conn = self.lock()?;
        let capsule = Self::get_locked(&conn, id)?.ok_or(CapsuleError::NotFound(id))?;
        conn.execute("DELETE FROM capsules WHERE id = ?1", [id])
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Delete capsule {id}: {e}")))?;
        tracing::info!("🗑️ Capsule {id} deleted");
        Ok(capsule)
    }

    /// Capsules in `pending` or `failed` whose due time is at or before `now`,
    /// oldest due first.
    pub fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Capsule>> {
        let cutoff = to_nanos(now).unwrap_or(if now.timestamp() > 0 {
            i64::MAX
        } else {
            i64::MIN
        });
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE state IN ('pending', 'failed') AND due_at <= ?1 \
                 ORDER BY due_at, id"
            ))
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Find due: {e}")))?;
        let rows = stmt
            .query_map([cutoff], row_to_capsule)
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Find due: {e}")))?;
        let mut due = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Find due: {e}")))?;
        due.retain(|c| c.is_due(now));
        Ok(due)
    }

    /// Write `state` and `last_error` for one capsule in a single statement.
    ///
    /// `last_error` is stored only for `failed` (an empty detail is replaced by
    /// a generic message) and cleared otherwise. Returns `false` without error
    /// when the capsule no longer exists or has already been sent.
    pub fn update_state(
        &self,
        id: i64,
        state: DeliveryState,
        error: Option<&str>,
    ) -> Result<bool> {
        let error = match state {
            DeliveryState::Failed => Some(
                error
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .unwrap_or(UNKNOWN_FAILURE),
            ),
            DeliveryState::Pending | DeliveryState::Sent => None,
        };

        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE capsules SET state = ?1, last_error = ?2 WHERE id = ?3 AND state != 'sent'",
                params![state.as_str(), error, id],
            )
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Update capsule {id}: {e}")))?;
        Ok(changed > 0)
    }

    pub fn count_by_state(&self) -> Result<StateCounts> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM capsules GROUP BY state")
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Count: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| CapsuleError::StoreUnavailable(format!("Count: {e}")))?;

        let mut counts = StateCounts::default();
        for row in rows {
            let (state, n) =
                row.map_err(|e| CapsuleError::StoreUnavailable(format!("Count: {e}")))?;
            match state.as_str() {
                "pending" => counts.pending = n as usize,
                "sent" => counts.sent = n as usize,
                "failed" => counts.failed = n as usize,
                other => tracing::warn!("⚠️ Unknown capsule state in store: {other}"),
            }
        }
        Ok(counts)
    }
}

/// Unix nanoseconds; `None` outside 1677..2262.
fn to_nanos(at: DateTime<Utc>) -> Option<i64> {
    at.timestamp_nanos_opt()
}

fn nanos_to_utc(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

fn row_to_capsule(row: &Row<'_>) -> rusqlite::Result<Capsule> {
    let state_str: String = row.get(7)?;
    let state = state_str
        .parse::<DeliveryState>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    let attachment_path: Option<String> = row.get(5)?;
    let attachment_filename: Option<String> = row.get(6)?;
    let attachment = attachment_path.map(|path| AttachmentRef {
        path: PathBuf::from(path),
        filename: attachment_filename.unwrap_or_default(),
    });

    Ok(Capsule {
        id: row.get(0)?,
        recipient: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        due_at: nanos_to_utc(row.get(4)?),
        attachment,
        state,
        last_error: row.get(8)?,
        created_at: nanos_to_utc(row.get(9)?),
    })
}
