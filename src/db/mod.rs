//! Database module for Pennywise
//!
//! Provides SQLite storage for the local mirror of accounts and transactions,
//! per-collection sync bookkeeping, and settings.
//! Every mutating operation runs inside a SQLite transaction so readers never
//! observe half-written batches.

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

mod accounts;
mod sync_state;
mod transactions;

pub use accounts::{Account, NewAccount};
pub use sync_state::SyncState;
pub use transactions::{
    CardPurchase, Cashback, HoldInfo, NewTransaction, RoundUp, TransactionSummary,
};

/// Maximum rows returned by a single listing query
const MAX_PAGE_SIZE: i32 = 200;

/// SQLite host parameter limit is 999 on older builds; stay well below it
const MAX_SQL_PARAMS: usize = 500;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// A monetary amount as reported by the remote API.
///
/// `value` keeps the display string (e.g. `"-12.50"`), `base_units` the exact
/// integer amount in the currency's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub currency_code: String,
    pub value: String,
    pub base_units: i64,
}

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) a file-backed database and bring its schema up to date
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                "#,
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(2))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        Self::init_schema(&conn)?;
        drop(conn);

        log::info!("Database opened at {:?}", db_path);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Every pooled connection to `:memory:` would see its own empty database,
    /// so the pool holds exactly one connection.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let conn = pool.get()?;
        Self::init_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(conn: &Connection) -> DbResult<()> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Self::run_migrations(conn)
    }

    // =========================================================================
    // MIGRATIONS
    // =========================================================================

    /// Run migrations for existing databases
    fn run_migrations(conn: &Connection) -> DbResult<()> {
        // Migration 1: Add local-only savings goal column to accounts
        let has_goal: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('accounts') WHERE name = 'goal_base_units'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_goal {
            log::info!("Running migration: Adding goal_base_units column to accounts");
            conn.execute("ALTER TABLE accounts ADD COLUMN goal_base_units INTEGER", [])?;
        }

        // Migration 2: Index for tag lookups by tag
        let has_tag_index: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'index' AND name = 'idx_transaction_tags_tag'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_tag_index {
            log::info!("Running migration: Creating idx_transaction_tags_tag");
            conn.execute(
                "CREATE INDEX idx_transaction_tags_tag ON transaction_tags(tag_id)",
                [],
            )?;
        }

        Ok(())
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Get a setting value
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let conn = self.get_conn()?;
        let result: Result<String, _> = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(json) => {
                let value: T = serde_json::from_str(&json)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a setting value
    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let conn = self.get_conn()?;
        let json = serde_json::to_string(value)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, json],
        )?;

        Ok(())
    }
}

/// Build `?,?,?` for an `IN (...)` clause
fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Read three nullable columns (currency, value, base units) as one amount
fn money_columns(
    row: &rusqlite::Row<'_>,
    currency: usize,
    value: usize,
    base_units: usize,
) -> rusqlite::Result<Option<MoneyAmount>> {
    let currency_code: Option<String> = row.get(currency)?;
    let value: Option<String> = row.get(value)?;
    let base_units: Option<i64> = row.get(base_units)?;

    Ok(match (currency_code, value, base_units) {
        (Some(currency_code), Some(value), Some(base_units)) => Some(MoneyAmount {
            currency_code,
            value,
            base_units,
        }),
        _ => None,
    })
}
