//! In-memory fakes for syncer and engine tests

use super::{SyncError, SyncReport, Syncer};
use crate::api::{AccountResource, ApiError, Page, TransactionResource, UpApi};
use crate::db::{MoneyAmount, NewTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixtures
// ============================================================================

pub fn account(id: &str, name: &str, base_units: i64) -> AccountResource {
    serde_json::from_value(json!({
        "type": "accounts",
        "id": id,
        "attributes": {
            "displayName": name,
            "accountType": "TRANSACTIONAL",
            "ownershipType": "INDIVIDUAL",
            "balance": {
                "currencyCode": "AUD",
                "value": format!("{:.2}", base_units as f64 / 100.0),
                "valueInBaseUnits": base_units
            },
            "createdAt": "2024-01-01T00:00:00Z"
        }
    }))
    .unwrap()
}

pub fn transaction(id: &str) -> TransactionResource {
    serde_json::from_value(json!({
        "type": "transactions",
        "id": id,
        "attributes": {
            "status": "SETTLED",
            "rawText": null,
            "description": format!("Purchase {}", id),
            "message": null,
            "isCategorizable": true,
            "holdInfo": null,
            "roundUp": null,
            "cashback": null,
            "amount": { "currencyCode": "AUD", "value": "-1.00", "valueInBaseUnits": -100 },
            "foreignAmount": null,
            "cardPurchaseMethod": null,
            "settledAt": null,
            "createdAt": "2024-03-01T10:00:00Z"
        },
        "relationships": {
            "account": { "data": { "type": "accounts", "id": "a1" } },
            "tags": { "data": [] }
        }
    }))
    .unwrap()
}

/// A stored transaction, for seeding the local table directly
pub fn new_transaction(id: &str) -> NewTransaction {
    NewTransaction {
        id: id.to_string(),
        account_id: "a1".to_string(),
        status: "SETTLED".to_string(),
        raw_text: None,
        description: format!("Purchase {}", id),
        message: None,
        is_categorizable: true,
        amount: MoneyAmount {
            currency_code: "AUD".to_string(),
            value: "-1.00".to_string(),
            base_units: -100,
        },
        hold_info: None,
        round_up: None,
        cashback: None,
        foreign_amount: None,
        card_purchase: None,
        transfer_account_id: None,
        category_id: None,
        parent_category_id: None,
        attachment_id: None,
        tags: Vec::new(),
        settled_at: None,
        created_at: Utc::now(),
    }
}

// ============================================================================
// Fake remote API
// ============================================================================

/// Serves fixed pages; cursors are `"<collection>:<page index>"`
#[derive(Default)]
pub struct FakeApi {
    account_pages: Vec<Vec<AccountResource>>,
    transaction_pages: Vec<Vec<TransactionResource>>,
    failing_accounts: HashSet<String>,
    failing_transaction_page: Option<usize>,
    repeated_account_cursor: Option<String>,
    endless_account_list: bool,
    delay: Option<Duration>,
    account_list_requests: AtomicUsize,
    account_detail_calls: AtomicUsize,
    transaction_page_requests: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_pages(mut self, pages: Vec<Vec<AccountResource>>) -> Self {
        self.account_pages = pages;
        self
    }

    pub fn with_transaction_pages(mut self, pages: Vec<Vec<TransactionResource>>) -> Self {
        self.transaction_pages = pages;
        self
    }

    pub fn failing_account(mut self, id: &str) -> Self {
        self.failing_accounts.insert(id.to_string());
        self
    }

    pub fn failing_transaction_page(mut self, index: usize) -> Self {
        self.failing_transaction_page = Some(index);
        self
    }

    /// Every accounts page links to `cursor` as its next page
    pub fn with_repeated_account_cursor(mut self, cursor: &str) -> Self {
        self.repeated_account_cursor = Some(cursor.to_string());
        self
    }

    /// Every accounts page links to a new, never-ending next page
    pub fn with_endless_account_list(mut self) -> Self {
        self.endless_account_list = true;
        self
    }

    /// Every request sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn account_list_requests(&self) -> usize {
        self.account_list_requests.load(Ordering::SeqCst)
    }

    pub fn account_detail_calls(&self) -> usize {
        self.account_detail_calls.load(Ordering::SeqCst)
    }

    pub fn transaction_page_requests(&self) -> usize {
        self.transaction_page_requests.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn page<T: Clone>(pages: &[Vec<T>], prefix: &str, index: usize) -> Page<T> {
        let data = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| format!("{}:{}", prefix, index + 1));
        Page { data, next }
    }

    fn cursor_index(cursor: &str, prefix: &str) -> Result<usize, ApiError> {
        cursor
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|index| index.parse().ok())
            .ok_or_else(|| ApiError::InvalidCursor(cursor.to_string()))
    }

    fn accounts_page(&self, index: usize) -> Page<AccountResource> {
        self.account_list_requests.fetch_add(1, Ordering::SeqCst);
        let mut page = Self::page(&self.account_pages, "accounts", index);
        if let Some(cursor) = &self.repeated_account_cursor {
            page.next = Some(cursor.clone());
        } else if self.endless_account_list {
            page.next = Some(format!("accounts:{}", index + 1));
        }
        page
    }

    fn transactions_page(&self, index: usize) -> Result<Page<TransactionResource>, ApiError> {
        self.transaction_page_requests.fetch_add(1, Ordering::SeqCst);
        if self.failing_transaction_page == Some(index) {
            return Err(ApiError::ServerError("503 Service Unavailable".to_string()));
        }
        Ok(Self::page(&self.transaction_pages, "transactions", index))
    }
}

#[async_trait]
impl UpApi for FakeApi {
    async fn list_accounts(&self) -> Result<Page<AccountResource>, ApiError> {
        self.pause().await;
        Ok(self.accounts_page(0))
    }

    async fn list_accounts_page(&self, cursor: &str) -> Result<Page<AccountResource>, ApiError> {
        self.pause().await;
        let index = Self::cursor_index(cursor, "accounts")?;
        Ok(self.accounts_page(index))
    }

    async fn get_account(&self, id: &str) -> Result<AccountResource, ApiError> {
        self.account_detail_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.failing_accounts.contains(id) {
            return Err(ApiError::ServerError(format!("account {} unavailable", id)));
        }
        self.account_pages
            .iter()
            .flatten()
            .find(|a| a.id.as_deref() == Some(id))
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                body: format!("no account {}", id),
            })
    }

    async fn list_transactions(&self) -> Result<Page<TransactionResource>, ApiError> {
        self.pause().await;
        self.transactions_page(0)
    }

    async fn list_transactions_page(
        &self,
        cursor: &str,
    ) -> Result<Page<TransactionResource>, ApiError> {
        self.pause().await;
        let index = Self::cursor_index(cursor, "transactions")?;
        self.transactions_page(index)
    }
}

// ============================================================================
// Fake syncer
// ============================================================================

/// Scripted syncer for engine tests
///
/// Each `sync` pops the next scripted outcome (success once the script runs
/// out), optionally after a delay that honours cancellation.
pub struct FakeSyncer {
    collection: String,
    cached: AtomicBool,
    last_success: Mutex<Option<DateTime<Utc>>>,
    script: Mutex<VecDeque<Result<(), String>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeSyncer {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            cached: AtomicBool::new(false),
            last_success: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Start with cached data last synced at `at`
    pub fn fresh_at(self, at: DateTime<Utc>) -> Self {
        self.cached.store(true, Ordering::SeqCst);
        *self.last_success.lock().unwrap() = Some(at);
        self
    }

    /// Queue outcomes: `Err(message)` fails that attempt
    pub fn with_script(self, outcomes: Vec<Result<(), &str>>) -> Self {
        *self.script.lock().unwrap() = outcomes
            .into_iter()
            .map(|o| o.map_err(|e| e.to_string()))
            .collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Syncer for FakeSyncer {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn has_cached_data(&self) -> Result<bool, SyncError> {
        Ok(self.cached.load(Ordering::SeqCst))
    }

    fn last_success_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(*self.last_success.lock().unwrap())
    }

    async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match outcome {
            Ok(()) => {
                self.cached.store(true, Ordering::SeqCst);
                *self.last_success.lock().unwrap() = Some(Utc::now());
                Ok(SyncReport::default())
            }
            Err(message) => Err(SyncError::Api(ApiError::ServerError(message))),
        }
    }
}
