//! Remote resource → local record mapping
//!
//! Required attributes that are missing, and money amounts whose base-unit
//! value is not an integer, are reported as `MappingError`s naming the field.

use crate::api::models::{AccountResource, MoneyObject, Relationship, TransactionResource};
use crate::db::{CardPurchase, Cashback, HoldInfo, MoneyAmount, NewAccount, NewTransaction, RoundUp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("{resource} record is missing its id")]
    MissingId { resource: &'static str },

    #[error("{resource} {id}: missing required attribute `{field}`")]
    MissingField {
        resource: &'static str,
        id: String,
        field: String,
    },

    #[error("{resource} {id}: `{field}` must be an integer, got {value}")]
    NonIntegerBaseUnits {
        resource: &'static str,
        id: String,
        field: String,
        value: String,
    },
}

/// Context for error messages: which record is being mapped
struct Ctx<'a> {
    resource: &'static str,
    id: &'a str,
}

impl Ctx<'_> {
    fn missing(&self, field: impl Into<String>) -> MappingError {
        MappingError::MissingField {
            resource: self.resource,
            id: self.id.to_string(),
            field: field.into(),
        }
    }

    fn required<T>(&self, value: Option<T>, field: &str) -> Result<T, MappingError> {
        value.ok_or_else(|| self.missing(field))
    }

    /// Map a money object that must be present and complete
    fn money(&self, money: Option<&MoneyObject>, field: &str) -> Result<MoneyAmount, MappingError> {
        let money = money.ok_or_else(|| self.missing(field))?;

        let currency_code = money
            .currency_code
            .clone()
            .ok_or_else(|| self.missing(format!("{}.currencyCode", field)))?;
        let value = money
            .value
            .clone()
            .ok_or_else(|| self.missing(format!("{}.value", field)))?;
        let raw = money
            .value_in_base_units
            .as_ref()
            .ok_or_else(|| self.missing(format!("{}.valueInBaseUnits", field)))?;
        let base_units = raw.as_i64().ok_or_else(|| MappingError::NonIntegerBaseUnits {
            resource: self.resource,
            id: self.id.to_string(),
            field: format!("{}.valueInBaseUnits", field),
            value: raw.to_string(),
        })?;

        Ok(MoneyAmount {
            currency_code,
            value,
            base_units,
        })
    }

    /// Map a money object that may be absent, but must be complete if present
    fn optional_money(
        &self,
        money: Option<&MoneyObject>,
        field: &str,
    ) -> Result<Option<MoneyAmount>, MappingError> {
        money.map(|m| self.money(Some(m), field)).transpose()
    }
}

fn related_id(relationship: &Relationship) -> Option<String> {
    relationship.data.as_ref().map(|data| data.id.clone())
}

/// Map an account detail resource into the local account shape
pub fn map_account(resource: &AccountResource) -> Result<NewAccount, MappingError> {
    let id = resource
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(MappingError::MissingId { resource: "account" })?;
    let ctx = Ctx {
        resource: "account",
        id,
    };
    let attrs = ctx.required(resource.attributes.as_ref(), "attributes")?;

    Ok(NewAccount {
        id: id.to_string(),
        display_name: ctx.required(attrs.display_name.clone(), "displayName")?,
        account_type: attrs.account_type.clone().unwrap_or_default(),
        ownership_type: attrs.ownership_type.clone().unwrap_or_default(),
        balance: ctx.money(attrs.balance.as_ref(), "balance")?,
        created_at: attrs.created_at,
    })
}

/// Map a transaction resource into the local transaction shape
pub fn map_transaction(resource: &TransactionResource) -> Result<NewTransaction, MappingError> {
    let id = resource
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(MappingError::MissingId {
            resource: "transaction",
        })?;
    let ctx = Ctx {
        resource: "transaction",
        id,
    };
    let attrs = ctx.required(resource.attributes.as_ref(), "attributes")?;
    let rel = &resource.relationships;

    let hold_info = match &attrs.hold_info {
        Some(hold) => Some(HoldInfo {
            amount: ctx.money(hold.amount.as_ref(), "holdInfo.amount")?,
            foreign_amount: ctx.optional_money(hold.foreign_amount.as_ref(), "holdInfo.foreignAmount")?,
        }),
        None => None,
    };

    let round_up = match &attrs.round_up {
        Some(round_up) => Some(RoundUp {
            amount: ctx.money(round_up.amount.as_ref(), "roundUp.amount")?,
            boost_portion: ctx.optional_money(round_up.boost_portion.as_ref(), "roundUp.boostPortion")?,
        }),
        None => None,
    };

    let cashback = match &attrs.cashback {
        Some(cashback) => Some(Cashback {
            description: cashback.description.clone().unwrap_or_default(),
            amount: ctx.money(cashback.amount.as_ref(), "cashback.amount")?,
        }),
        None => None,
    };

    let card_purchase = match &attrs.card_purchase_method {
        Some(card) => Some(CardPurchase {
            method: ctx.required(card.method.clone(), "cardPurchaseMethod.method")?,
            card_number_suffix: card.card_number_suffix.clone(),
        }),
        None => None,
    };

    let account_id = ctx.required(related_id(&rel.account), "relationships.account")?;

    Ok(NewTransaction {
        id: id.to_string(),
        account_id,
        status: ctx.required(attrs.status.clone(), "status")?,
        raw_text: attrs.raw_text.clone(),
        description: ctx.required(attrs.description.clone(), "description")?,
        message: attrs.message.clone(),
        is_categorizable: attrs.is_categorizable.unwrap_or(false),
        amount: ctx.money(attrs.amount.as_ref(), "amount")?,
        hold_info,
        round_up,
        cashback,
        foreign_amount: ctx.optional_money(attrs.foreign_amount.as_ref(), "foreignAmount")?,
        card_purchase,
        transfer_account_id: related_id(&rel.transfer_account),
        category_id: related_id(&rel.category),
        parent_category_id: related_id(&rel.parent_category),
        attachment_id: related_id(&rel.attachment),
        tags: rel.tags.data.iter().map(|tag| tag.id.clone()).collect(),
        settled_at: attrs.settled_at,
        created_at: ctx.required(attrs.created_at, "createdAt")?,
    })
}
