//! Sync-and-wait for callers that need fresh data before continuing
//!
//! Bookkeeping has no wake-up notification, so the outcome is detected by
//! polling the collection's sync state row against a snapshot taken before
//! the sync was requested.

use super::engine::{EngineError, SyncEngine};
use crate::db::{Database, SyncState};
use std::time::Duration;

/// Deadline for an accounts sync-and-wait
pub const ACCOUNTS_WAIT_TIMEOUT: Duration = Duration::from_secs(20);
/// Deadline for a transactions sync-and-wait
pub const TRANSACTIONS_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const POLL_EVERY: Duration = Duration::from_millis(250);

/// Make `collection` the active view and wait for it to be fresh
///
/// Returns at once when the cache is fresh and `force` is false. Otherwise
/// waits until a sync newer than the call succeeds or fails, or until
/// `timeout` passes. The engine's own retry schedule keeps running either way.
pub async fn sync_and_wait(
    engine: &SyncEngine,
    db: &Database,
    collection: &str,
    timeout: Duration,
    force: bool,
) -> Result<(), EngineError> {
    let before = db.get_sync_state(collection)?.unwrap_or_default();
    let already_active = engine.active_collection().as_deref() == Some(collection);
    let stale = engine.needs_sync(collection)?;

    if !already_active {
        engine.enter_view(collection)?;
    }
    if !stale && !force {
        return Ok(());
    }

    // A view entered just now syncs on its own when stale
    if already_active || !stale {
        engine.manual_refresh(collection)?;
    }

    log::debug!("Waiting up to {:?} for {} to sync", timeout, collection);
    match tokio::time::timeout(timeout, wait_for_outcome(db, collection, &before)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            collection: collection.to_string(),
            timeout,
        }),
    }
}

async fn wait_for_outcome(db: &Database, collection: &str, before: &SyncState) -> Result<(), EngineError> {
    loop {
        if let Some(state) = db.get_sync_state(collection)? {
            if state.last_success_at > before.last_success_at {
                return Ok(());
            }
            if state.has_error() && state.last_attempt_at > before.last_attempt_at {
                return Err(EngineError::SyncFailed {
                    collection: collection.to_string(),
                    message: state.last_error,
                });
            }
        }
        tokio::time::sleep(POLL_EVERY).await;
    }
}
