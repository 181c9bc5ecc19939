//! Sync engine - owns the active view and its background loop
//!
//! At most one collection is "active" at a time. Entering a view spawns a
//! loop that syncs immediately when the cache is stale, then reacts to
//! (in priority order) cancellation, manual refresh requests, the poll
//! ticker and the backoff retry timer.
//!
//! Lifecycle events are pushed to an optional observer callback; the loop's
//! internal state is never exposed otherwise.

use super::backoff::{Backoff, DEFAULT_BACKOFF};
use super::{SyncError, Syncer};
use crate::db::DbError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STALE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

// ============================================================================
// Configuration
// ============================================================================

/// Engine timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cache age after which entering a view triggers an immediate sync
    pub stale_ttl: Duration,
    /// Interval between background syncs of the active view
    pub poll_interval: Duration,
    /// Retry delays after consecutive failures
    pub backoff: Vec<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_ttl: DEFAULT_STALE_TTL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Replace zero or empty values with the defaults
    pub fn normalized(mut self) -> Self {
        if self.stale_ttl.is_zero() {
            self.stale_ttl = DEFAULT_STALE_TTL;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }
        if self.backoff.is_empty() {
            self.backoff = DEFAULT_BACKOFF.to_vec();
        }
        self
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    Started,
    Ok,
    Failed,
}

impl SyncEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::Started => "sync_started",
            SyncEventKind::Ok => "sync_ok",
            SyncEventKind::Failed => "sync_failed",
        }
    }
}

/// Lifecycle notification for one sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub collection: String,
    pub at: DateTime<Utc>,
    /// Set on `Failed`
    pub error: Option<String>,
    /// Set on `Failed`: delay before the automatic retry
    pub next_retry: Option<Duration>,
}

impl SyncEvent {
    fn new(kind: SyncEventKind, collection: &str) -> Self {
        Self {
            kind,
            collection: collection.to_string(),
            at: Utc::now(),
            error: None,
            next_retry: None,
        }
    }

    fn failed(collection: &str, error: String, next_retry: Duration) -> Self {
        Self {
            error: Some(error),
            next_retry: Some(next_retry),
            ..Self::new(SyncEventKind::Failed, collection)
        }
    }
}

pub type SyncObserver = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No syncers registered")]
    NoSyncers,

    #[error("Syncer registered with an empty collection name")]
    EmptyCollection,

    #[error("Collection registered twice: {0}")]
    DuplicateCollection(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Collection is not the active view: {0}")]
    NotActive(String),

    #[error("No active view")]
    NoActiveView,

    #[error("No tokio runtime available to run the sync loop")]
    NoRuntime,

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Timed out after {timeout:?} waiting for {collection} to sync")]
    Timeout {
        collection: String,
        timeout: Duration,
    },

    #[error("Sync of {collection} failed: {message}")]
    SyncFailed { collection: String, message: String },
}

// ============================================================================
// Engine
// ============================================================================

struct ActiveRun {
    collection: String,
    cancel: CancellationToken,
    manual: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Orchestrates background syncing for the active view
pub struct SyncEngine {
    syncers: HashMap<String, Arc<dyn Syncer>>,
    config: EngineConfig,
    observer: Option<SyncObserver>,
    active: Mutex<Option<ActiveRun>>,
    /// Parent of every run's token; cancelled when the engine is dropped
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Create an engine over `syncers`, keyed by their collection names
    pub fn new(syncers: Vec<Arc<dyn Syncer>>, config: EngineConfig) -> Result<Self, EngineError> {
        if syncers.is_empty() {
            return Err(EngineError::NoSyncers);
        }

        let mut by_collection = HashMap::with_capacity(syncers.len());
        for syncer in syncers {
            let name = syncer.collection().to_string();
            if name.is_empty() {
                return Err(EngineError::EmptyCollection);
            }
            if by_collection.contains_key(&name) {
                return Err(EngineError::DuplicateCollection(name));
            }
            by_collection.insert(name, syncer);
        }

        Ok(Self {
            syncers: by_collection,
            config: config.normalized(),
            observer: None,
            active: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// The collection whose loop is currently running
    pub fn active_collection(&self) -> Option<String> {
        self.lock_active().as_ref().map(|run| run.collection.clone())
    }

    /// Whether entering `collection` now would trigger an immediate sync
    pub fn needs_sync(&self, collection: &str) -> Result<bool, EngineError> {
        let syncer = self.syncer(collection)?;
        Ok(is_stale(
            syncer.has_cached_data()?,
            syncer.last_success_at()?,
            Utc::now(),
            self.config.stale_ttl,
        ))
    }

    /// Make `collection` the active view and start its loop
    ///
    /// A different active view is cancelled without waiting for it to exit.
    /// Entering the view that is already running is a no-op.
    pub fn enter_view(&self, collection: &str) -> Result<(), EngineError> {
        let syncer = self.syncer(collection)?;
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut active = self.lock_active();
        if let Some(run) = active.as_ref() {
            if run.collection == collection && !run.handle.is_finished() {
                log::debug!("View {} already active", collection);
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            log::info!("Leaving view {} for {}", previous.collection, collection);
            previous.cancel.cancel();
        }

        let cancel = self.shutdown.child_token();
        let (manual_tx, manual_rx) = mpsc::channel(1);
        let run_loop = RunLoop {
            syncer,
            config: self.config.clone(),
            observer: self.observer.clone(),
            cancel: cancel.clone(),
            manual: manual_rx,
        };
        let handle = runtime.spawn(run_loop.run());

        *active = Some(ActiveRun {
            collection: collection.to_string(),
            cancel,
            manual: manual_tx,
            handle,
        });

        log::info!("Entered view {}", collection);
        Ok(())
    }

    /// Stop the active view and wait for its loop to exit
    pub async fn leave_view(&self) -> Result<(), EngineError> {
        let run = self.lock_active().take().ok_or(EngineError::NoActiveView)?;

        run.cancel.cancel();
        if let Err(e) = run.handle.await {
            log::warn!("Sync loop for {} ended abnormally: {}", run.collection, e);
        }

        log::info!("Left view {}", run.collection);
        Ok(())
    }

    /// Ask the active loop for `collection` to sync now
    ///
    /// At most one request is pending at a time; extra requests are dropped.
    pub fn manual_refresh(&self, collection: &str) -> Result<(), EngineError> {
        let active = self.lock_active();
        let run = active
            .as_ref()
            .filter(|run| run.collection == collection)
            .ok_or_else(|| EngineError::NotActive(collection.to_string()))?;

        match run.manual.try_send(()) {
            Ok(()) => {
                log::debug!("Manual refresh requested for {}", collection);
                Ok(())
            }
            Err(TrySendError::Full(())) => {
                log::debug!("Manual refresh for {} already pending, dropped", collection);
                Ok(())
            }
            Err(TrySendError::Closed(())) => Err(EngineError::NotActive(collection.to_string())),
        }
    }

    fn syncer(&self, collection: &str) -> Result<Arc<dyn Syncer>, EngineError> {
        self.syncers
            .get(collection)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Staleness rule used when a view is entered
///
/// Stale when nothing is cached, when no sync ever succeeded, or when the
/// last success is more than `ttl` before `now`.
pub fn is_stale(
    has_cached_data: bool,
    last_success_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> bool {
    if !has_cached_data {
        return true;
    }
    match last_success_at {
        None => true,
        Some(at) => chrono::Duration::from_std(ttl)
            .map(|ttl| now - at > ttl)
            .unwrap_or(false),
    }
}

// ============================================================================
// Run loop
// ============================================================================

enum Attempt {
    Succeeded,
    Failed(Duration),
    Cancelled,
}

struct RunLoop {
    syncer: Arc<dyn Syncer>,
    config: EngineConfig,
    observer: Option<SyncObserver>,
    cancel: CancellationToken,
    manual: mpsc::Receiver<()>,
}

impl RunLoop {
    async fn run(mut self) {
        let collection = self.syncer.collection().to_string();
        let mut backoff = Backoff::new(self.config.backoff.clone());

        let retry = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(retry);
        let mut retry_pending = false;

        if self.initial_sync_needed(&collection) {
            match self.attempt(&collection, &mut backoff).await {
                Attempt::Succeeded => {}
                Attempt::Failed(delay) => {
                    retry.as_mut().reset(Instant::now() + delay);
                    retry_pending = true;
                }
                Attempt::Cancelled => return,
            }
        } else {
            log::debug!("Cache for {} is fresh, skipping initial sync", collection);
        }

        let poll = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = self.manual.recv() => {
                    if request.is_none() {
                        break;
                    }
                    self.attempt(&collection, &mut backoff).await
                }
                _ = ticker.tick() => {
                    if retry_pending {
                        log::debug!("Poll tick for {} skipped, retry pending", collection);
                        continue;
                    }
                    self.attempt(&collection, &mut backoff).await
                }
                _ = &mut retry, if retry_pending => {
                    self.attempt(&collection, &mut backoff).await
                }
            };

            match outcome {
                Attempt::Succeeded => retry_pending = false,
                Attempt::Failed(delay) => {
                    retry.as_mut().reset(Instant::now() + delay);
                    retry_pending = true;
                }
                Attempt::Cancelled => break,
            }
        }

        log::info!("Sync loop for {} stopped", collection);
    }

    fn initial_sync_needed(&self, collection: &str) -> bool {
        let cached = self.syncer.has_cached_data();
        let last_success = self.syncer.last_success_at();
        match (cached, last_success) {
            (Ok(cached), Ok(last_success)) => {
                is_stale(cached, last_success, Utc::now(), self.config.stale_ttl)
            }
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Could not read freshness of {}, syncing: {}", collection, e);
                true
            }
        }
    }

    async fn attempt(&self, collection: &str, backoff: &mut Backoff) -> Attempt {
        if self.cancel.is_cancelled() {
            return Attempt::Cancelled;
        }

        self.emit(SyncEvent::new(SyncEventKind::Started, collection));

        match self.syncer.sync(&self.cancel).await {
            Ok(_) if self.cancel.is_cancelled() => Attempt::Cancelled,
            Ok(_) => {
                backoff.reset();
                self.emit(SyncEvent::new(SyncEventKind::Ok, collection));
                Attempt::Succeeded
            }
            Err(e) if e.is_cancelled() || self.cancel.is_cancelled() => Attempt::Cancelled,
            Err(e) => {
                let delay = backoff.next_delay();
                log::warn!("Sync of {} failed, retrying in {:?}: {}", collection, delay, e);
                self.emit(SyncEvent::failed(collection, e.to_string(), delay));
                Attempt::Failed(delay)
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // A superseded loop must not report anything further
        if self.cancel.is_cancelled() {
            return;
        }
        log::debug!("{} {}", event.kind.as_str(), event.collection);
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}
