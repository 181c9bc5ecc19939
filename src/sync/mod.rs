//! Sync Module - Cache refresh for the mirrored collections
//!
//! Provides:
//! - A bounded fetch pool for per-id detail requests
//! - Collection syncers (accounts: full snapshot, transactions: incremental pages)
//! - The sync engine: one active view, polling, manual refresh and backoff
//! - Sync-and-wait for callers that need a result before continuing
//!
//! Architecture:
//! - Remote is the source of truth, the local database is a cache
//! - Freshness lives in the `sync_state` table, one row per collection
//! - Cancellation is a `CancellationToken` threaded engine → syncer → pool

pub mod accounts;
pub mod backoff;
pub mod engine;
pub mod mapping;
pub mod pool;
pub mod transactions;
pub mod wait;

#[cfg(test)]
mod testing;

use crate::api::ApiError;
use crate::db::{Database, DbError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use accounts::AccountsSyncer;
pub use backoff::Backoff;
pub use engine::{EngineConfig, EngineError, SyncEngine, SyncEvent, SyncEventKind, SyncObserver};
pub use mapping::MappingError;
pub use pool::{fetch_all, PoolAbort};
pub use transactions::TransactionsSyncer;
pub use wait::{sync_and_wait, ACCOUNTS_WAIT_TIMEOUT, TRANSACTIONS_WAIT_TIMEOUT};

/// Collection name for the accounts syncer
pub const ACCOUNTS: &str = "accounts";
/// Collection name for the transactions syncer
pub const TRANSACTIONS: &str = "transactions";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Fetch worker panicked: {0}")]
    WorkerPanicked(String),
}

impl From<PoolAbort> for SyncError {
    fn from(abort: PoolAbort) -> Self {
        match abort {
            PoolAbort::Cancelled => SyncError::Cancelled,
            PoolAbort::WorkerPanicked(message) => SyncError::WorkerPanicked(message),
        }
    }
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// Outcome of one successful sync attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows written to the local store
    pub records_written: usize,
    /// List pages requested from the remote
    pub pages_fetched: usize,
    /// Whether an incremental walk stopped before running out of pages
    pub stopped_early: bool,
}

// ============================================================================
// Syncer trait
// ============================================================================

/// One mirrored collection
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Name the engine registers this syncer under
    fn collection(&self) -> &str;

    /// Whether the local store holds any data for this collection
    fn has_cached_data(&self) -> Result<bool, SyncError>;

    /// Time of the last successful sync, if any
    fn last_success_at(&self) -> Result<Option<DateTime<Utc>>, SyncError>;

    /// Pull remote changes into the local store
    ///
    /// Records the attempt and its outcome in the sync state table.
    async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Read `last_success_at` for a collection
pub(crate) fn last_success(db: &Database, collection: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
    Ok(db
        .get_sync_state(collection)?
        .and_then(|state| state.last_success_at))
}

/// Record the outcome of an attempt and pass the result through
///
/// A cancelled attempt is neither a success nor a failure and is not recorded.
/// A failure to write bookkeeping is logged; it never replaces the sync result.
pub(crate) fn finish_attempt(
    db: &Database,
    collection: &str,
    result: Result<SyncReport, SyncError>,
) -> Result<SyncReport, SyncError> {
    let now = Utc::now();
    let recorded = match &result {
        Ok(_) => db.record_sync_success(collection, now),
        Err(e) if e.is_cancelled() => {
            log::debug!("Sync of {} cancelled", collection);
            Ok(())
        }
        Err(e) => db.record_sync_error(collection, now, &e.to_string()),
    };

    if let Err(e) = recorded {
        log::error!("Failed to record sync outcome for {}: {}", collection, e);
    }

    result
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => result,
    }
}
