//! # Pennywise
//!
//! A local-first personal finance client. Accounts and transactions are
//! mirrored from the remote banking API into a local SQLite cache by a
//! background sync engine; the UI reads only from the cache.

pub mod api;
pub mod config;
pub mod db;
pub mod sync;

use api::{UpApi, UpClient};
use config::{AppConfig, SyncSettings};
use db::Database;
use std::sync::Arc;
use sync::{
    sync_and_wait, AccountsSyncer, EngineError, SyncEngine, SyncEvent, SyncEventKind, Syncer,
    TransactionsSyncer, ACCOUNTS, ACCOUNTS_WAIT_TIMEOUT, TRANSACTIONS, TRANSACTIONS_WAIT_TIMEOUT,
};

// ============================================================================
// Application State
// ============================================================================

/// Shared state: the local cache and the engine keeping it fresh
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: SyncEngine,
}

impl AppState {
    pub fn new(db: Arc<Database>, api: Arc<dyn UpApi>, settings: &SyncSettings) -> Result<Self, EngineError> {
        let syncers: Vec<Arc<dyn Syncer>> = vec![
            Arc::new(
                AccountsSyncer::new(api.clone(), db.clone()).with_workers(settings.account_workers),
            ),
            Arc::new(
                TransactionsSyncer::new(api, db.clone())
                    .with_max_pages(settings.max_transaction_pages),
            ),
        ];

        let engine = SyncEngine::new(syncers, settings.engine_config())?.with_observer(log_event);

        Ok(Self { db, engine })
    }

    /// Bring a collection up to date, waiting for the outcome
    pub async fn refresh(&self, collection: &str, force: bool) -> Result<(), EngineError> {
        let timeout = if collection == TRANSACTIONS {
            TRANSACTIONS_WAIT_TIMEOUT
        } else {
            ACCOUNTS_WAIT_TIMEOUT
        };
        sync_and_wait(&self.engine, &self.db, collection, timeout, force).await
    }
}

/// Observer that reports sync lifecycle events to the log
fn log_event(event: &SyncEvent) {
    match event.kind {
        SyncEventKind::Started => log::debug!("[{}] {}", event.collection, event.kind.as_str()),
        SyncEventKind::Ok => log::info!("[{}] {}", event.collection, event.kind.as_str()),
        SyncEventKind::Failed => log::warn!(
            "[{}] {}: {} (retry in {:?})",
            event.collection,
            event.kind.as_str(),
            event.error.as_deref().unwrap_or("unknown error"),
            event.next_retry.unwrap_or_default()
        ),
    }
}

// ============================================================================
// Application Entry Point
// ============================================================================

/// Headless run: refresh accounts then transactions and print a summary
pub fn run() {
    // Load .env file for the API token
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(data_dir) = config.db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            log::error!("Failed to create data directory: {}", e);
            eprintln!("FATAL: Failed to create data directory at {:?}: {}", data_dir, e);
            std::process::exit(1);
        }
    }
    log::info!("Database path: {:?}", config.db_path);

    let db = match Database::new(config.db_path.clone()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("Failed to initialize database: {}", e);
            eprintln!("FATAL: Database initialization failed: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Database initialized successfully");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("FATAL: Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(refresh_all(&config, db)) {
        log::error!("Sync failed: {}", e);
        eprintln!("FATAL: {}", e);
        std::process::exit(1);
    }
}

async fn refresh_all(config: &AppConfig, db: Arc<Database>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = SyncSettings::load(&db)?;

    let client = UpClient::new(&config.api_url, config.api_token.clone())?;
    client.ping().await?;
    log::info!("API token accepted by {}", client.base_url());

    let state = AppState::new(db, Arc::new(client), &settings)?;

    let result = match state.refresh(ACCOUNTS, false).await {
        Ok(()) => state.refresh(TRANSACTIONS, false).await,
        Err(e) => Err(e),
    };

    // Stop the background loop whether or not the refresh worked
    if let Err(e) = state.engine.leave_view().await {
        log::debug!("No view to leave: {}", e);
    }
    result?;

    let accounts = state.db.get_active_accounts()?;
    for account in &accounts {
        log::info!(
            "{:<24} {:>12} {}",
            account.display_name,
            account.balance.value,
            account.balance.currency_code
        );
    }
    log::info!(
        "{} active accounts, {} transactions cached",
        accounts.len(),
        state.db.count_transactions()?
    );

    Ok(())
}
