//! Account snapshot storage

use super::{money_columns, placeholders, Database, DbError, DbResult, MoneyAmount, MAX_SQL_PARAMS};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};

/// Account as fetched from the remote API, ready to be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub id: String,
    pub display_name: String,
    pub account_type: String,
    pub ownership_type: String,
    pub balance: MoneyAmount,
    pub created_at: Option<DateTime<Utc>>,
}

/// Account as stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub account_type: String,
    pub ownership_type: String,
    pub balance: MoneyAmount,
    pub created_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// User-entered savings goal; never touched by sync
    pub goal_base_units: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

impl Account {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let balance = money_columns(row, 4, 5, 6)?.unwrap_or(MoneyAmount {
            currency_code: String::new(),
            value: String::new(),
            base_units: 0,
        });

        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            account_type: row.get(2)?,
            ownership_type: row.get(3)?,
            balance,
            created_at: row.get(7)?,
            is_active: row.get(8)?,
            goal_base_units: row.get(9)?,
            fetched_at: row.get(10)?,
        })
    }
}

const ACCOUNT_COLUMNS: &str = r#"
    id, display_name, account_type, ownership_type,
    balance_currency, balance_value, balance_base_units,
    created_at, is_active, goal_base_units, fetched_at
"#;

impl Database {
    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// Whether any account is currently active (i.e. the snapshot is non-empty)
    pub fn has_active_accounts(&self) -> DbResult<bool> {
        let conn = self.get_conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE is_active = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Replace the active account snapshot with `accounts`
    ///
    /// Every fetched account is upserted and marked active; every previously
    /// active account missing from `accounts` is deactivated. Rows are never
    /// deleted. The whole replacement is one transaction.
    pub fn replace_account_snapshot(
        &self,
        accounts: &[NewAccount],
        fetched_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO accounts (
                    id, display_name, account_type, ownership_type,
                    balance_currency, balance_value, balance_base_units,
                    created_at, is_active, fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    account_type = excluded.account_type,
                    ownership_type = excluded.ownership_type,
                    balance_currency = excluded.balance_currency,
                    balance_value = excluded.balance_value,
                    balance_base_units = excluded.balance_base_units,
                    created_at = excluded.created_at,
                    is_active = 1,
                    fetched_at = excluded.fetched_at
                "#,
            )?;

            for account in accounts {
                stmt.execute(params![
                    account.id,
                    account.display_name,
                    account.account_type,
                    account.ownership_type,
                    account.balance.currency_code,
                    account.balance.value,
                    account.balance.base_units,
                    account.created_at,
                    fetched_at,
                ])?;
            }
        }

        // Collect the ids that should stay active, then deactivate the rest
        let keep: std::collections::HashSet<&str> =
            accounts.iter().map(|a| a.id.as_str()).collect();
        let active: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM accounts WHERE is_active = 1")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let stale: Vec<&String> = active.iter().filter(|id| !keep.contains(id.as_str())).collect();
        for chunk in stale.chunks(MAX_SQL_PARAMS) {
            let sql = format!(
                "UPDATE accounts SET is_active = 0 WHERE id IN ({})",
                placeholders(chunk.len())
            );
            tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }

        tx.commit()?;

        if !stale.is_empty() {
            log::info!("Deactivated {} accounts missing from remote snapshot", stale.len());
        }

        Ok(())
    }

    /// List active accounts ordered by display name
    pub fn get_active_accounts(&self) -> DbResult<Vec<Account>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE is_active = 1 ORDER BY display_name COLLATE NOCASE",
            ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], Account::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Get a single account, active or not
    pub fn get_account(&self, id: &str) -> DbResult<Account> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        conn.query_row(&sql, [id], Account::from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("account {}", id)),
                other => other.into(),
            })
    }

    pub fn count_active_accounts(&self) -> DbResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?)
    }

    /// Set or clear the user's savings goal for an account
    pub fn set_account_goal(&self, id: &str, goal_base_units: Option<i64>) -> DbResult<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE accounts SET goal_base_units = ?2 WHERE id = ?1",
            params![id, goal_base_units],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, name: &str, cents: i64) -> NewAccount {
        NewAccount {
            id: id.to_string(),
            display_name: name.to_string(),
            account_type: "TRANSACTIONAL".to_string(),
            ownership_type: "INDIVIDUAL".to_string(),
            balance: MoneyAmount {
                currency_code: "AUD".to_string(),
                value: format!("{}.{:02}", cents / 100, cents % 100),
                base_units: cents,
            },
            created_at: Some(Utc::now()),
        }
    }

    fn active_ids(db: &Database) -> Vec<String> {
        let mut ids: Vec<String> = db
            .get_active_accounts()
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_replace_snapshot_inserts_and_deactivates() {
        let db = Database::in_memory().unwrap();
        assert!(!db.has_active_accounts().unwrap());

        db.replace_account_snapshot(
            &[account("a1", "Spending", 1000), account("a2", "Savings", 5000)],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(active_ids(&db), vec!["a1", "a2"]);

        db.replace_account_snapshot(&[account("a2", "Savings", 5100)], Utc::now())
            .unwrap();
        assert_eq!(active_ids(&db), vec!["a2"]);

        // Deactivated, not deleted
        let a1 = db.get_account("a1").unwrap();
        assert!(!a1.is_active);
        assert_eq!(db.get_account("a2").unwrap().balance.base_units, 5100);
    }

    #[test]
    fn test_replace_snapshot_empty_deactivates_all() {
        let db = Database::in_memory().unwrap();
        db.replace_account_snapshot(&[account("a1", "Spending", 1000)], Utc::now())
            .unwrap();

        db.replace_account_snapshot(&[], Utc::now()).unwrap();

        assert!(!db.has_active_accounts().unwrap());
        assert_eq!(db.count_active_accounts().unwrap(), 0);
        assert!(db.get_account("a1").is_ok());
    }

    #[test]
    fn test_replace_snapshot_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let snapshot = vec![account("a1", "Spending", 1000), account("a2", "Savings", 5000)];
        let fetched_at = Utc::now();

        db.replace_account_snapshot(&snapshot, fetched_at).unwrap();
        let first = db.get_active_accounts().unwrap();

        db.replace_account_snapshot(&snapshot, fetched_at).unwrap();
        let second = db.get_active_accounts().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_reactivates_returning_account() {
        let db = Database::in_memory().unwrap();
        db.replace_account_snapshot(&[account("a1", "Spending", 1000)], Utc::now())
            .unwrap();
        db.replace_account_snapshot(&[], Utc::now()).unwrap();
        db.replace_account_snapshot(&[account("a1", "Spending", 1200)], Utc::now())
            .unwrap();

        let a1 = db.get_account("a1").unwrap();
        assert!(a1.is_active);
        assert_eq!(a1.balance.value, "12.00");
    }

    #[test]
    fn test_goal_survives_snapshot() {
        let db = Database::in_memory().unwrap();
        db.replace_account_snapshot(&[account("a2", "Savings", 5000)], Utc::now())
            .unwrap();
        db.set_account_goal("a2", Some(100_000)).unwrap();

        db.replace_account_snapshot(&[account("a2", "Holiday", 6000)], Utc::now())
            .unwrap();

        let a2 = db.get_account("a2").unwrap();
        assert_eq!(a2.display_name, "Holiday");
        assert_eq!(a2.goal_base_units, Some(100_000));
    }

    #[test]
    fn test_missing_account() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(db.get_account("nope"), Err(DbError::NotFound(_))));
        assert!(matches!(
            db.set_account_goal("nope", Some(1)),
            Err(DbError::NotFound(_))
        ));
    }
}
