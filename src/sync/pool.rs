//! Bounded fetch pool
//!
//! Fans a list of ids out over a fixed number of workers and collects the
//! results. The first failure wins: it cancels every other worker and is
//! returned on its own, with no partial results. Output order is unspecified.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why the pool stopped without a fetch error of its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAbort {
    /// The caller's cancellation token fired
    Cancelled,
    /// A worker task panicked
    WorkerPanicked(String),
}

/// Fetch every id in `ids` using at most `workers` concurrent calls to `fetch`
///
/// `workers` is clamped to `1..=ids.len()`. An empty `ids` returns at once.
pub async fn fetch_all<T, E, F, Fut>(
    cancel: &CancellationToken,
    ids: Vec<String>,
    workers: usize,
    fetch: F,
) -> Result<Vec<T>, E>
where
    T: Send + 'static,
    E: From<PoolAbort> + Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(PoolAbort::Cancelled.into());
    }

    let workers = workers.clamp(1, ids.len());
    let total = ids.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(ids)));
    let first_error: Arc<Mutex<Option<E>>> = Arc::new(Mutex::new(None));
    let stop = cancel.child_token();
    let fetch = Arc::new(fetch);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(worker(
            Arc::clone(&queue),
            Arc::clone(&first_error),
            stop.clone(),
            Arc::clone(&fetch),
        ));
    }

    let mut results = Vec::with_capacity(total);
    let mut panicked = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(items) => results.extend(items),
            Err(e) => {
                stop.cancel();
                panicked.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let error = first_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(error) = error {
        return Err(error);
    }
    if let Some(message) = panicked {
        return Err(PoolAbort::WorkerPanicked(message).into());
    }
    if cancel.is_cancelled() {
        return Err(PoolAbort::Cancelled.into());
    }

    log::debug!("Fetched {} items with {} workers", results.len(), workers);
    Ok(results)
}

async fn worker<T, E, F, Fut>(
    queue: Arc<Mutex<VecDeque<String>>>,
    first_error: Arc<Mutex<Option<E>>>,
    stop: CancellationToken,
    fetch: Arc<F>,
) -> Vec<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut fetched = Vec::new();

    loop {
        if stop.is_cancelled() {
            break;
        }
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(id) = next else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = fetch(id) => result,
        };

        match result {
            Ok(item) => fetched.push(item),
            Err(e) => {
                {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
                stop.cancel();
                break;
            }
        }
    }

    fetched
}
