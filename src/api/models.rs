//! Wire models for the remote banking API
//!
//! Resources follow the JSON:API layout (`data`, `attributes`,
//! `relationships`, `links`). Attribute fields are optional here so that a
//! missing field surfaces as a mapping error naming the field, rather than as
//! an opaque decode failure for the whole page.

use chrono::{DateTime, Utc};
use serde::Deserialize;

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    pub next: Option<String>,
}

// ============================================================================
// Shared objects
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyObject {
    pub currency_code: Option<String>,
    pub value: Option<String>,
    /// Kept as a raw number so fractional values can be rejected explicitly
    pub value_in_base_units: Option<serde_json::Number>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceIdentifier {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationship {
    pub data: Option<ResourceIdentifier>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipMany {
    #[serde(default)]
    pub data: Vec<ResourceIdentifier>,
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResource {
    pub id: Option<String>,
    pub attributes: Option<AccountAttributes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAttributes {
    pub display_name: Option<String>,
    pub account_type: Option<String>,
    pub ownership_type: Option<String>,
    pub balance: Option<MoneyObject>,
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResource {
    pub id: Option<String>,
    pub attributes: Option<TransactionAttributes>,
    #[serde(default)]
    pub relationships: TransactionRelationships,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttributes {
    pub status: Option<String>,
    pub raw_text: Option<String>,
    pub description: Option<String>,
    pub message: Option<String>,
    pub is_categorizable: Option<bool>,
    pub hold_info: Option<HoldInfoObject>,
    pub round_up: Option<RoundUpObject>,
    pub cashback: Option<CashbackObject>,
    pub amount: Option<MoneyObject>,
    pub foreign_amount: Option<MoneyObject>,
    pub card_purchase_method: Option<CardPurchaseMethodObject>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldInfoObject {
    pub amount: Option<MoneyObject>,
    pub foreign_amount: Option<MoneyObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundUpObject {
    pub amount: Option<MoneyObject>,
    pub boost_portion: Option<MoneyObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashbackObject {
    pub description: Option<String>,
    pub amount: Option<MoneyObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPurchaseMethodObject {
    pub method: Option<String>,
    pub card_number_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRelationships {
    #[serde(default)]
    pub account: Relationship,
    #[serde(default)]
    pub transfer_account: Relationship,
    #[serde(default)]
    pub category: Relationship,
    #[serde(default)]
    pub parent_category: Relationship,
    #[serde(default)]
    pub tags: RelationshipMany,
    #[serde(default)]
    pub attachment: Relationship,
}
