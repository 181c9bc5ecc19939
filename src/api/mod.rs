//! Remote API - typed access to the banking API being mirrored
//!
//! Syncers depend on the [`UpApi`] trait only; [`UpClient`] is the HTTP
//! implementation used by the application.

pub mod client;
pub mod models;

use async_trait::async_trait;

pub use client::{ApiError, UpClient, DEFAULT_BASE_URL};
pub use models::{AccountResource, TransactionResource};

/// One page of a cursor-paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Opaque link to the next (older) page; `None` at the end of the list
    pub next: Option<String>,
}

/// Request/response contract the syncers consume
#[async_trait]
pub trait UpApi: Send + Sync {
    /// First page of accounts
    async fn list_accounts(&self) -> Result<Page<AccountResource>, ApiError>;

    /// Follow a `next` link from a previous accounts page
    async fn list_accounts_page(&self, cursor: &str) -> Result<Page<AccountResource>, ApiError>;

    /// Full detail for one account
    async fn get_account(&self, id: &str) -> Result<AccountResource, ApiError>;

    /// First (newest) page of transactions
    async fn list_transactions(&self) -> Result<Page<TransactionResource>, ApiError>;

    /// Follow a `next` link from a previous transactions page
    async fn list_transactions_page(
        &self,
        cursor: &str,
    ) -> Result<Page<TransactionResource>, ApiError>;
}
