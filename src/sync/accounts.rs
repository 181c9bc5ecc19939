//! Accounts syncer - full snapshot replace
//!
//! Every sync lists the remote accounts, fetches each one's detail through
//! the bounded pool and replaces the local snapshot in one transaction.
//! Nothing is written unless every account fetched and mapped cleanly.

use super::mapping::map_account;
use super::pool::fetch_all;
use super::{
    cancellable, finish_attempt, last_success, MappingError, SyncError, SyncReport, Syncer, ACCOUNTS,
};
use crate::api::{ApiError, UpApi};
use crate::db::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ACCOUNT_WORKERS: usize = 4;

/// Upper bound on account list pages followed in one sync
const MAX_ACCOUNT_LIST_PAGES: usize = 50;

pub struct AccountsSyncer {
    api: Arc<dyn UpApi>,
    db: Arc<Database>,
    workers: usize,
}

impl AccountsSyncer {
    pub fn new(api: Arc<dyn UpApi>, db: Arc<Database>) -> Self {
        Self {
            api,
            db,
            workers: DEFAULT_ACCOUNT_WORKERS,
        }
    }

    /// Number of concurrent detail requests; 0 means the default
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            DEFAULT_ACCOUNT_WORKERS
        } else {
            workers
        };
        self
    }

    /// Collect account ids across every list page, in listing order
    async fn list_account_ids(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, usize), SyncError> {
        let mut page = cancellable(cancel, async {
            self.api.list_accounts().await.map_err(SyncError::from)
        })
        .await?;
        let mut pages = 1;
        let mut seen = HashSet::new();
        let mut followed = HashSet::new();
        let mut ids = Vec::new();

        loop {
            for resource in &page.data {
                let id = resource
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or(MappingError::MissingId { resource: "account" })?;
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            let Some(next) = page.next.take() else {
                break;
            };
            if !followed.insert(next.clone()) {
                return Err(ApiError::InvalidCursor(next).into());
            }
            if pages >= MAX_ACCOUNT_LIST_PAGES {
                return Err(ApiError::InvalidResponse(format!(
                    "account listing exceeded {} pages",
                    MAX_ACCOUNT_LIST_PAGES
                ))
                .into());
            }
            page = cancellable(cancel, async {
                self.api.list_accounts_page(&next).await.map_err(SyncError::from)
            })
            .await?;
            pages += 1;
        }

        Ok((ids, pages))
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let (ids, pages_fetched) = self.list_account_ids(cancel).await?;
        log::debug!("Listed {} remote accounts over {} pages", ids.len(), pages_fetched);

        let api = Arc::clone(&self.api);
        let accounts = fetch_all(cancel, ids, self.workers, move |id| {
            let api = Arc::clone(&api);
            async move {
                let resource = api.get_account(&id).await?;
                Ok::<_, SyncError>(map_account(&resource)?)
            }
        })
        .await?;

        // Nothing is written once the run has been cancelled
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.db.replace_account_snapshot(&accounts, Utc::now())?;

        Ok(SyncReport {
            records_written: accounts.len(),
            pages_fetched,
            stopped_early: false,
        })
    }
}

#[async_trait]
impl Syncer for AccountsSyncer {
    fn collection(&self) -> &str {
        ACCOUNTS
    }

    fn has_cached_data(&self) -> Result<bool, SyncError> {
        Ok(self.db.has_active_accounts()?)
    }

    fn last_success_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        last_success(&self.db, ACCOUNTS)
    }

    async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        self.db.record_sync_attempt(ACCOUNTS, Utc::now())?;

        let result = self.run(cancel).await;
        match &result {
            Ok(report) => log::info!(
                "Accounts sync complete: {} accounts in {:?}",
                report.records_written,
                started.elapsed()
            ),
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::warn!("Accounts sync failed after {:?}: {}", started.elapsed(), e),
        }

        finish_attempt(&self.db, ACCOUNTS, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{account, FakeApi};
    use std::time::Duration;

    fn syncer(api: FakeApi) -> (AccountsSyncer, Arc<Database>, Arc<FakeApi>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let api = Arc::new(api);
        let syncer = AccountsSyncer::new(api.clone(), db.clone()).with_workers(2);
        (syncer, db, api)
    }

    #[tokio::test]
    async fn test_snapshot_written_and_success_recorded() {
        let (syncer, db, api) = syncer(FakeApi::new().with_account_pages(vec![
            vec![account("a1", "Spending", 1000), account("a2", "Bills", 50)],
        ]));

        let report = syncer.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.records_written, 2);
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(api.account_detail_calls(), 2);
        assert_eq!(db.count_active_accounts().unwrap(), 2);

        let state = db.get_sync_state(ACCOUNTS).unwrap().unwrap();
        assert!(state.last_success_at.is_some());
        assert!(state.last_attempt_at.is_some());
        assert!(!state.has_error());
    }

    #[tokio::test]
    async fn test_duplicate_ids_fetched_once() {
        let (syncer, db, api) = syncer(FakeApi::new().with_account_pages(vec![
            vec![account("a1", "Spending", 1000)],
            vec![account("a1", "Spending", 1000), account("a2", "Bills", 50)],
        ]));

        syncer.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(api.account_detail_calls(), 2);
        assert_eq!(db.count_active_accounts().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_repeated_list_cursor_fails_attempt() {
        let (syncer, db, api) = syncer(
            FakeApi::new()
                .with_account_pages(vec![vec![account("a1", "Spending", 1000)]])
                .with_repeated_account_cursor("accounts:0"),
        );

        let result = tokio::time::timeout(Duration::from_secs(2), syncer.sync(&CancellationToken::new()))
            .await
            .expect("listing a cycle of links must finish");

        assert!(matches!(result, Err(SyncError::Api(ApiError::InvalidCursor(_)))));
        assert_eq!(api.account_list_requests(), 2);
        assert_eq!(api.account_detail_calls(), 0);
        assert_eq!(db.count_active_accounts().unwrap(), 0);
        assert!(db.get_sync_state(ACCOUNTS).unwrap().unwrap().has_error());
    }

    #[tokio::test]
    async fn test_endless_listing_stops_at_page_cap() {
        let (syncer, db, api) = syncer(
            FakeApi::new()
                .with_account_pages(vec![vec![account("a1", "Spending", 1000)]])
                .with_endless_account_list(),
        );

        let result = syncer.sync(&CancellationToken::new()).await;

        assert!(matches!(result, Err(SyncError::Api(ApiError::InvalidResponse(_)))));
        assert_eq!(api.account_list_requests(), MAX_ACCOUNT_LIST_PAGES);
        assert_eq!(db.count_active_accounts().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_detail_failure_leaves_snapshot_untouched() {
        let (first, db, _) = syncer(FakeApi::new().with_account_pages(vec![vec![account(
            "old", "Old", 10,
        )]]));
        first.sync(&CancellationToken::new()).await.unwrap();
        let before = db.get_sync_state(ACCOUNTS).unwrap().unwrap();

        let api = Arc::new(
            FakeApi::new()
                .with_account_pages(vec![vec![account("a1", "New", 1), account("a2", "Newer", 2)]])
                .failing_account("a2"),
        );
        let second = AccountsSyncer::new(api, db.clone());
        let result = second.sync(&CancellationToken::new()).await;

        assert!(matches!(result, Err(SyncError::Api(_))));
        let active: Vec<String> = db
            .get_active_accounts()
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(active, vec!["old"]);

        let after = db.get_sync_state(ACCOUNTS).unwrap().unwrap();
        assert_eq!(after.last_success_at, before.last_success_at);
        assert!(after.has_error());
    }

    #[tokio::test]
    async fn test_mapping_failure_fails_whole_attempt() {
        let mut broken = account("a2", "Broken", 0);
        broken.attributes.as_mut().unwrap().display_name = None;

        let (syncer, db, _) = syncer(FakeApi::new().with_account_pages(vec![vec![
            account("a1", "Spending", 1000),
            broken,
        ]]));

        let result = syncer.sync(&CancellationToken::new()).await;

        assert!(matches!(result, Err(SyncError::Mapping(_))));
        assert_eq!(db.count_active_accounts().unwrap(), 0);
        assert!(db.get_sync_state(ACCOUNTS).unwrap().unwrap().last_error.contains("displayName"));
    }

    #[tokio::test]
    async fn test_empty_listing_deactivates_everything() {
        let (first, db, _) = syncer(FakeApi::new().with_account_pages(vec![vec![account(
            "a1", "Spending", 1,
        )]]));
        first.sync(&CancellationToken::new()).await.unwrap();
        assert!(first.has_cached_data().unwrap());

        let second = AccountsSyncer::new(Arc::new(FakeApi::new()), db.clone());
        let report = second.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.records_written, 0);
        assert!(!second.has_cached_data().unwrap());
        assert!(second.last_success_at().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_sync_is_not_recorded_as_failure() {
        let (syncer, db, _) = syncer(FakeApi::new().with_account_pages(vec![vec![account(
            "a1", "Spending", 1,
        )]]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = syncer.sync(&cancel).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        let state = db.get_sync_state(ACCOUNTS).unwrap().unwrap();
        assert!(!state.has_error());
        assert!(state.last_success_at.is_none());
        assert_eq!(db.count_active_accounts().unwrap(), 0);
    }
}
