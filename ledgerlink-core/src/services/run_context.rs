//! Per-run caches and the ledger account directory

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::result::Result;
use crate::domain::{Account, AccountKind, AccountSpec};
use crate::ports::Ledger;
use crate::services::normalize::settlement_tag;

/// How far before a billing date tagged charges are searched
pub const SETTLEMENT_LOOKBACK_DAYS: u64 = 120;

/// Prefix of account ids handed out instead of creating accounts in dry-run mode
pub const PLACEHOLDER_PREFIX: &str = "dry-run:";

/// State shared by the stages of a single sync run
///
/// Owned by the run and dropped when it ends; nothing here outlives one call.
#[derive(Debug)]
pub struct RunContext {
    accounts: Vec<Account>,
    dry_run: bool,
    default_currency: String,
    merchants: HashMap<String, String>,
    settlement_nets: HashMap<String, Option<Decimal>>,
}

impl RunContext {
    pub fn new(accounts: Vec<Account>, dry_run: bool, default_currency: impl Into<String>) -> Self {
        Self {
            accounts,
            dry_run,
            default_currency: default_currency.into(),
            merchants: HashMap::new(),
            settlement_nets: HashMap::new(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn default_currency(&self) -> &str {
        &self.default_currency
    }

    pub fn account_by_id(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }

    /// First account matching `key` by number, last-4 suffix or name
    pub fn find_account(&self, key: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.matches_key(key))
    }

    /// Find the account described by `spec`, creating it if the ledger has none
    ///
    /// Lookup goes by account number first, then by name. In dry-run mode nothing is
    /// created; a placeholder account is registered for the rest of the run instead.
    pub async fn resolve_or_create(&mut self, ledger: &dyn Ledger, spec: AccountSpec) -> Result<Account> {
        let existing = spec
            .account_number
            .as_deref()
            .and_then(|number| self.find_account(number))
            .or_else(|| self.find_account(&spec.name));
        if let Some(account) = existing {
            return Ok(account.clone());
        }

        let account = if self.dry_run {
            debug!(name = %spec.name, "Dry run: using placeholder account");
            Account {
                id: format!("{}{}", PLACEHOLDER_PREFIX, spec.name),
                name: spec.name.clone(),
                account_number: spec.account_number.clone(),
                kind: spec.kind,
                account_type: spec.account_type.clone(),
            }
        } else {
            let created = ledger.create_account(&spec).await?;
            info!(id = %created.id, name = %created.name, "Created ledger account");
            created
        };

        self.accounts.push(account.clone());
        Ok(account)
    }

    /// Expense account id for a merchant name, cached for the run
    pub async fn merchant_account(&mut self, ledger: &dyn Ledger, merchant: &str) -> Result<String> {
        let key = merchant.trim().to_lowercase();
        if let Some(id) = self.merchants.get(&key) {
            return Ok(id.clone());
        }

        let spec = AccountSpec::new(merchant.trim(), AccountKind::Expense, self.default_currency.clone());
        let account = self.resolve_or_create(ledger, spec).await?;
        self.merchants.insert(key, account.id.clone());
        Ok(account.id)
    }

    /// Net of the ledger entries tagged with `account_id`'s billing cycle for `billing_date`
    ///
    /// Deposits count positive, everything else negative. When nothing carries the
    /// tag for that day the previous day's tag is tried. `None` means no tagged
    /// entries exist at all. Results are cached for the run.
    pub async fn settlement_net(
        &mut self,
        ledger: &dyn Ledger,
        account_id: &str,
        billing_date: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let tag = settlement_tag(account_id, billing_date);
        if let Some(net) = self.settlement_nets.get(&tag) {
            return Ok(*net);
        }

        let since = billing_date
            .checked_sub_days(Days::new(SETTLEMENT_LOOKBACK_DAYS))
            .unwrap_or(billing_date);

        let mut entries = ledger.search_transactions(since, Some(&tag)).await?;
        if entries.is_empty() {
            if let Some(previous) = billing_date.pred_opt() {
                let fallback = settlement_tag(account_id, previous);
                debug!(tag = %tag, fallback = %fallback, "No tagged entries, trying previous day");
                entries = ledger.search_transactions(since, Some(&fallback)).await?;
            }
        }

        let net = if entries.is_empty() {
            None
        } else {
            Some(entries.iter().map(|entry| entry.signed_amount()).sum())
        };
        self.settlement_nets.insert(tag, net);
        Ok(net)
    }
}
