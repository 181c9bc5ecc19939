//! Transaction storage
//!
//! Transactions are append/upsert-only, keyed by remote id. The upsert only
//! names remote-sourced columns, so local annotations (`user_note`) survive.

use super::{money_columns, placeholders, Database, DbError, DbResult, MoneyAmount, MAX_PAGE_SIZE, MAX_SQL_PARAMS};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldInfo {
    pub amount: MoneyAmount,
    pub foreign_amount: Option<MoneyAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundUp {
    pub amount: MoneyAmount,
    pub boost_portion: Option<MoneyAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cashback {
    pub description: String,
    pub amount: MoneyAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPurchase {
    pub method: String,
    pub card_number_suffix: Option<String>,
}

/// Transaction mapped from the remote API, ready to be upserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub id: String,
    pub account_id: String,
    pub status: String,
    pub raw_text: Option<String>,
    pub description: String,
    pub message: Option<String>,
    pub is_categorizable: bool,
    pub amount: MoneyAmount,
    pub hold_info: Option<HoldInfo>,
    pub round_up: Option<RoundUp>,
    pub cashback: Option<Cashback>,
    pub foreign_amount: Option<MoneyAmount>,
    pub card_purchase: Option<CardPurchase>,
    pub transfer_account_id: Option<String>,
    pub category_id: Option<String>,
    pub parent_category_id: Option<String>,
    pub attachment_id: Option<String>,
    pub tags: Vec<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Transaction row as shown in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: String,
    pub account_id: String,
    pub status: String,
    pub description: String,
    pub amount: MoneyAmount,
    pub category_id: Option<String>,
    pub tags: Vec<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub user_note: Option<String>,
}

/// Split an optional amount into its three nullable columns
fn money_params(amount: Option<&MoneyAmount>) -> (Option<&str>, Option<&str>, Option<i64>) {
    match amount {
        Some(m) => (Some(m.currency_code.as_str()), Some(m.value.as_str()), Some(m.base_units)),
        None => (None, None, None),
    }
}

impl Database {
    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Whether any transaction has ever been stored
    pub fn has_any_transactions(&self) -> DbResult<bool> {
        let conn = self.get_conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions)",
            [],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Return the subset of `ids` already stored locally
    pub fn known_transaction_ids(&self, ids: &[String]) -> DbResult<HashSet<String>> {
        let mut known = HashSet::new();
        if ids.is_empty() {
            return Ok(known);
        }

        let conn = self.get_conn()?;
        for chunk in ids.chunks(MAX_SQL_PARAMS) {
            let sql = format!(
                "SELECT id FROM transactions WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
            for id in rows {
                known.insert(id?);
            }
        }

        Ok(known)
    }

    /// Upsert one page of transactions in a single SQLite transaction
    ///
    /// Tags are replaced per transaction. Returns the number of rows written.
    pub fn upsert_transaction_batch(
        &self,
        batch: &[NewTransaction],
        fetched_at: DateTime<Utc>,
    ) -> DbResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO transactions (
                    id, account_id, status, raw_text, description, message, is_categorizable,
                    amount_currency, amount_value, amount_base_units,
                    hold_currency, hold_value, hold_base_units,
                    hold_foreign_currency, hold_foreign_value, hold_foreign_base_units,
                    round_up_currency, round_up_value, round_up_base_units,
                    round_up_boost_currency, round_up_boost_value, round_up_boost_base_units,
                    cashback_description, cashback_currency, cashback_value, cashback_base_units,
                    foreign_currency, foreign_value, foreign_base_units,
                    card_purchase_method, card_number_suffix,
                    transfer_account_id, category_id, parent_category_id, attachment_id,
                    settled_at, created_at, fetched_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                    ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                    ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38
                )
                ON CONFLICT(id) DO UPDATE SET
                    account_id = excluded.account_id,
                    status = excluded.status,
                    raw_text = excluded.raw_text,
                    description = excluded.description,
                    message = excluded.message,
                    is_categorizable = excluded.is_categorizable,
                    amount_currency = excluded.amount_currency,
                    amount_value = excluded.amount_value,
                    amount_base_units = excluded.amount_base_units,
                    hold_currency = excluded.hold_currency,
                    hold_value = excluded.hold_value,
                    hold_base_units = excluded.hold_base_units,
                    hold_foreign_currency = excluded.hold_foreign_currency,
                    hold_foreign_value = excluded.hold_foreign_value,
                    hold_foreign_base_units = excluded.hold_foreign_base_units,
                    round_up_currency = excluded.round_up_currency,
                    round_up_value = excluded.round_up_value,
                    round_up_base_units = excluded.round_up_base_units,
                    round_up_boost_currency = excluded.round_up_boost_currency,
                    round_up_boost_value = excluded.round_up_boost_value,
                    round_up_boost_base_units = excluded.round_up_boost_base_units,
                    cashback_description = excluded.cashback_description,
                    cashback_currency = excluded.cashback_currency,
                    cashback_value = excluded.cashback_value,
                    cashback_base_units = excluded.cashback_base_units,
                    foreign_currency = excluded.foreign_currency,
                    foreign_value = excluded.foreign_value,
                    foreign_base_units = excluded.foreign_base_units,
                    card_purchase_method = excluded.card_purchase_method,
                    card_number_suffix = excluded.card_number_suffix,
                    transfer_account_id = excluded.transfer_account_id,
                    category_id = excluded.category_id,
                    parent_category_id = excluded.parent_category_id,
                    attachment_id = excluded.attachment_id,
                    settled_at = excluded.settled_at,
                    created_at = excluded.created_at,
                    fetched_at = excluded.fetched_at
                "#,
            )?;
            let mut clear_tags = tx.prepare("DELETE FROM transaction_tags WHERE transaction_id = ?1")?;
            let mut insert_tag = tx.prepare(
                "INSERT OR IGNORE INTO transaction_tags (transaction_id, tag_id) VALUES (?1, ?2)",
            )?;

            for t in batch {
                let hold = t.hold_info.as_ref();
                let (hold_currency, hold_value, hold_units) = money_params(hold.map(|h| &h.amount));
                let (hold_fx_currency, hold_fx_value, hold_fx_units) =
                    money_params(hold.and_then(|h| h.foreign_amount.as_ref()));
                let round_up = t.round_up.as_ref();
                let (ru_currency, ru_value, ru_units) = money_params(round_up.map(|r| &r.amount));
                let (boost_currency, boost_value, boost_units) =
                    money_params(round_up.and_then(|r| r.boost_portion.as_ref()));
                let (cb_currency, cb_value, cb_units) =
                    money_params(t.cashback.as_ref().map(|c| &c.amount));
                let (fx_currency, fx_value, fx_units) = money_params(t.foreign_amount.as_ref());

                upsert.execute(params![
                    t.id,
                    t.account_id,
                    t.status,
                    t.raw_text,
                    t.description,
                    t.message,
                    t.is_categorizable,
                    t.amount.currency_code,
                    t.amount.value,
                    t.amount.base_units,
                    hold_currency,
                    hold_value,
                    hold_units,
                    hold_fx_currency,
                    hold_fx_value,
                    hold_fx_units,
                    ru_currency,
                    ru_value,
                    ru_units,
                    boost_currency,
                    boost_value,
                    boost_units,
                    t.cashback.as_ref().map(|c| c.description.as_str()),
                    cb_currency,
                    cb_value,
                    cb_units,
                    fx_currency,
                    fx_value,
                    fx_units,
                    t.card_purchase.as_ref().map(|c| c.method.as_str()),
                    t.card_purchase.as_ref().and_then(|c| c.card_number_suffix.as_deref()),
                    t.transfer_account_id,
                    t.category_id,
                    t.parent_category_id,
                    t.attachment_id,
                    t.settled_at,
                    t.created_at,
                    fetched_at,
                ])?;

                clear_tags.execute([&t.id])?;
                for tag in &t.tags {
                    insert_tag.execute(params![t.id, tag])?;
                }
            }
        }

        tx.commit()?;
        Ok(batch.len())
    }

    /// Newest transactions first, at most `limit` (capped at `MAX_PAGE_SIZE`)
    pub fn get_recent_transactions(&self, limit: i32) -> DbResult<Vec<TransactionSummary>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.account_id, t.status, t.description,
                   t.amount_currency, t.amount_value, t.amount_base_units,
                   t.category_id, t.settled_at, t.created_at, t.user_note,
                   (SELECT group_concat(tag_id, char(31)) FROM transaction_tags WHERE transaction_id = t.id)
            FROM transactions t
            ORDER BY t.created_at DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map([limit], |row| {
                let amount = money_columns(row, 4, 5, 6)?.unwrap_or(MoneyAmount {
                    currency_code: String::new(),
                    value: String::new(),
                    base_units: 0,
                });
                let tags: Option<String> = row.get(11)?;
                let mut tags: Vec<String> = tags
                    .map(|s| s.split('\u{1f}').map(str::to_string).collect())
                    .unwrap_or_default();
                tags.sort();

                Ok(TransactionSummary {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    status: row.get(2)?,
                    description: row.get(3)?,
                    amount,
                    category_id: row.get(7)?,
                    tags,
                    settled_at: row.get(8)?,
                    created_at: row.get(9)?,
                    user_note: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn count_transactions(&self) -> DbResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
    }

    /// Attach a local note to a transaction
    pub fn set_transaction_note(&self, id: &str, note: Option<&str>) -> DbResult<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE transactions SET user_note = ?2 WHERE id = ?1",
            params![id, note],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("transaction {}", id)));
        }
        Ok(())
    }
}
