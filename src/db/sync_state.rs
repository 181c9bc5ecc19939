//! Per-collection sync bookkeeping
//!
//! Writers never notify readers. A reader that wants to know whether a sync
//! happened after some point captures a `SyncState` and compares timestamps.

use super::{Database, DbResult};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Freshness record for one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub collection: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Empty when the last attempt has not failed
    pub last_error: String,
}

impl SyncState {
    pub fn has_error(&self) -> bool {
        !self.last_error.is_empty()
    }
}

impl Database {
    // =========================================================================
    // SYNC STATE
    // =========================================================================

    /// Get the sync state row for a collection
    pub fn get_sync_state(&self, collection: &str) -> DbResult<Option<SyncState>> {
        let conn = self.get_conn()?;
        let result = conn.query_row(
            r#"
            SELECT collection, last_success_at, last_attempt_at, last_error
            FROM sync_state
            WHERE collection = ?1
            "#,
            [collection],
            |row| {
                Ok(SyncState {
                    collection: row.get(0)?,
                    last_success_at: row.get(1)?,
                    last_attempt_at: row.get(2)?,
                    last_error: row.get(3)?,
                })
            },
        );

        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark the start of an attempt; clears any previous error
    pub fn record_sync_attempt(&self, collection: &str, at: DateTime<Utc>) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_state (collection, last_attempt_at, last_error)
            VALUES (?1, ?2, '')
            ON CONFLICT(collection) DO UPDATE SET
                last_attempt_at = ?2,
                last_error = ''
            "#,
            params![collection, at],
        )?;
        Ok(())
    }

    /// Mark a successful attempt
    ///
    /// Callers pass a monotonically increasing `at` per collection, so the
    /// value is written unconditionally.
    pub fn record_sync_success(&self, collection: &str, at: DateTime<Utc>) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_state (collection, last_success_at, last_error)
            VALUES (?1, ?2, '')
            ON CONFLICT(collection) DO UPDATE SET
                last_success_at = ?2,
                last_error = ''
            "#,
            params![collection, at],
        )?;
        Ok(())
    }

    /// Mark a failed attempt; `last_success_at` is left alone
    pub fn record_sync_error(
        &self,
        collection: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_state (collection, last_attempt_at, last_error)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(collection) DO UPDATE SET
                last_attempt_at = ?2,
                last_error = ?3
            "#,
            params![collection, at, error],
        )?;
        Ok(())
    }
}
