//! Account domain model

use serde::{Deserialize, Serialize};

/// What an account represents on our side of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountKind {
    Bank,
    CreditCard,
    /// Merchant/expense counterparty accounts
    Expense,
}

impl AccountKind {
    /// Ledger account type used when creating an account of this kind
    pub fn default_ledger_type(&self) -> &'static str {
        match self {
            AccountKind::Bank => "asset",
            AccountKind::CreditCard => "liability",
            AccountKind::Expense => "expense",
        }
    }
}

/// An account known to the ledger. The ledger owns `id`; we identify accounts by number or name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(deserialize_with = "super::source::deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    pub kind: AccountKind,
    /// Freeform ledger type, e.g. "asset", "liability", "expense"
    #[serde(rename = "type")]
    pub account_type: String,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account_number: None,
            kind,
            account_type: kind.default_ledger_type().to_string(),
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.account_number = Some(number.into());
        self
    }

    pub fn is_credit_card(&self) -> bool {
        self.kind == AccountKind::CreditCard
    }

    /// Last four digits of the account number, if it has at least four characters
    pub fn number_suffix(&self) -> Option<&str> {
        self.account_number.as_deref().and_then(last_four)
    }

    /// True if `key` names this account by full number, last-4 suffix or name
    pub fn matches_key(&self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        if let Some(number) = self.account_number.as_deref() {
            if number == key || (key.len() == 4 && last_four(number) == Some(key)) {
                return true;
            }
        }
        self.name.eq_ignore_ascii_case(key)
    }
}

/// Request body for creating an account in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    pub kind: AccountKind,
    #[serde(rename = "type")]
    pub account_type: String,
    pub currency_code: String,
}

impl AccountSpec {
    pub fn new(name: impl Into<String>, kind: AccountKind, currency_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_number: None,
            kind,
            account_type: kind.default_ledger_type().to_string(),
            currency_code: currency_code.into(),
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.account_number = Some(number.into());
        self
    }
}

pub(crate) fn last_four(number: &str) -> Option<&str> {
    let number = number.trim();
    if number.len() < 4 || !number.is_char_boundary(number.len() - 4) {
        return None;
    }
    Some(&number[number.len() - 4..])
}
