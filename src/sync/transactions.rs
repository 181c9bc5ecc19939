//! Transactions syncer - incremental newest-first paging
//!
//! Remote transactions are only appended or settled, so an incremental walk
//! stops as soon as it runs into history it already has: two known records
//! in a row (counted across page boundaries) end the walk after the current
//! page. A first-ever sync walks every page.
//!
//! Each page is written as one batch and committed immediately, so a failure
//! on a later page keeps the earlier pages.

use super::mapping::map_transaction;
use super::{cancellable, finish_attempt, last_success, SyncError, SyncReport, Syncer, TRANSACTIONS};
use crate::api::{Page, TransactionResource, UpApi};
use crate::db::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Page cap for incremental walks
pub const DEFAULT_MAX_PAGES: usize = 20;

/// Consecutive known records that end an incremental walk
const EARLY_STOP_STREAK: usize = 2;

pub struct TransactionsSyncer {
    api: Arc<dyn UpApi>,
    db: Arc<Database>,
    max_pages: usize,
}

impl TransactionsSyncer {
    pub fn new(api: Arc<dyn UpApi>, db: Arc<Database>) -> Self {
        Self {
            api,
            db,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Page cap for incremental walks; 0 means the default
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = if max_pages == 0 {
            DEFAULT_MAX_PAGES
        } else {
            max_pages
        };
        self
    }

    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        cursor: Option<&str>,
    ) -> Result<Page<TransactionResource>, SyncError> {
        cancellable(cancel, async {
            let page = match cursor {
                None => self.api.list_transactions().await?,
                Some(cursor) => self.api.list_transactions_page(cursor).await?,
            };
            Ok::<_, SyncError>(page)
        })
        .await
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        // Decided once: a fresh pull processes everything, uncapped
        let incremental = self.db.has_any_transactions()?;

        let mut report = SyncReport::default();
        let mut streak = 0usize;
        let mut cursor: Option<String> = None;

        loop {
            if incremental && report.pages_fetched >= self.max_pages {
                log::info!(
                    "Transaction walk reached the {} page cap, resuming on next sync",
                    self.max_pages
                );
                break;
            }

            let page = self.fetch_page(cancel, cursor.as_deref()).await?;
            report.pages_fetched += 1;

            if page.data.is_empty() {
                break;
            }

            let known = if incremental {
                let ids: Vec<String> = page.data.iter().filter_map(|t| t.id.clone()).collect();
                self.db.known_transaction_ids(&ids)?
            } else {
                HashSet::new()
            };

            let mut batch = Vec::with_capacity(page.data.len());
            let mut stop = false;
            for resource in &page.data {
                let is_known = resource
                    .id
                    .as_deref()
                    .map(|id| known.contains(id))
                    .unwrap_or(false);

                if is_known {
                    streak += 1;
                    if streak >= EARLY_STOP_STREAK {
                        stop = true;
                    }
                    continue;
                }

                streak = 0;
                batch.push(map_transaction(resource)?);
            }

            // In-flight batches are allowed to finish after cancellation
            report.records_written += self.db.upsert_transaction_batch(&batch, Utc::now())?;

            if stop {
                report.stopped_early = true;
                log::debug!("Reached known transactions after {} pages", report.pages_fetched);
                break;
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Syncer for TransactionsSyncer {
    fn collection(&self) -> &str {
        TRANSACTIONS
    }

    fn has_cached_data(&self) -> Result<bool, SyncError> {
        Ok(self.db.has_any_transactions()?)
    }

    fn last_success_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        last_success(&self.db, TRANSACTIONS)
    }

    async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        self.db.record_sync_attempt(TRANSACTIONS, Utc::now())?;

        let result = self.run(cancel).await;
        match &result {
            Ok(report) => log::info!(
                "Transactions sync complete: {} new or updated over {} pages in {:?}",
                report.records_written,
                report.pages_fetched,
                started.elapsed()
            ),
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::warn!("Transactions sync failed after {:?}: {}", started.elapsed(), e),
        }

        finish_attempt(&self.db, TRANSACTIONS, result)
    }
}
