//! Credit card settlement matcher
//!
//! Bank withdrawals that pay off a credit card are really transfers into the card
//! account. Three passes try to recognise them, each handing what it could not
//! classify to the next:
//!
//! 1. reference: the bank line carries the card number (or its last four digits)
//! 2. billing cycle: the amount equals one card's net charges for the cycle
//! 3. static rules: a configured description/account/day-of-month mapping

use std::collections::{BTreeSet, HashMap};

use chrono::Datelike;
use tracing::{debug, info, warn};

use crate::config::{description_matches, BillingCycleRule, SettlementRule, StaticRule};
use crate::domain::result::Result;
use crate::domain::{last_four, Account, AccountKind, AccountSpec, TransactionRecord};
use crate::ports::Ledger;
use crate::services::run_context::RunContext;

/// Records classified as settlements plus everything a pass left alone
#[derive(Debug, Clone, Default)]
pub struct SettlementOutcome {
    pub transfers: Vec<TransactionRecord>,
    pub remaining: Vec<TransactionRecord>,
}

impl SettlementOutcome {
    /// Records to hand to the next stage, transfers first
    pub fn into_records(self) -> Vec<TransactionRecord> {
        let mut records = self.transfers;
        records.extend(self.remaining);
        records
    }
}

/// Credit-card accounts indexed by full number and last-4 suffix
#[derive(Debug, Default)]
pub struct CreditCardPool {
    by_number: HashMap<String, BTreeSet<String>>,
    by_suffix: HashMap<String, BTreeSet<String>>,
}

impl CreditCardPool {
    pub fn from_accounts<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> Self {
        let mut pool = Self::default();
        for account in accounts.into_iter().filter(|a| a.is_credit_card()) {
            let Some(number) = account.account_number.as_deref().map(str::trim) else {
                continue;
            };
            pool.by_number
                .entry(number.to_string())
                .or_default()
                .insert(account.id.clone());
            if let Some(suffix) = last_four(number) {
                pool.by_suffix
                    .entry(suffix.to_string())
                    .or_default()
                    .insert(account.id.clone());
            }
        }
        pool
    }

    /// Card account id for `reference`, only if exactly one card matches
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        let reference = reference.trim();
        let candidates = self
            .by_number
            .get(reference)
            .or_else(|| last_four(reference).and_then(|suffix| self.by_suffix.get(suffix)))?;
        if candidates.len() == 1 {
            candidates.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

/// Runs the settlement passes configured for a run
#[derive(Debug, Clone, Default)]
pub struct SettlementMatcher {
    billing_cycle_rules: Vec<BillingCycleRule>,
    static_rules: Vec<StaticRule>,
}

impl SettlementMatcher {
    pub fn new(rules: &[SettlementRule]) -> Self {
        let mut matcher = Self::default();
        for rule in rules {
            match rule {
                SettlementRule::BillingCycle(r) => matcher.billing_cycle_rules.push(r.clone()),
                SettlementRule::Static(r) => matcher.static_rules.push(r.clone()),
            }
        }
        matcher
    }

    /// All three passes chained, each fed the previous pass's remainder
    pub async fn run(
        &self,
        records: Vec<TransactionRecord>,
        ctx: &mut RunContext,
        ledger: &dyn Ledger,
    ) -> SettlementOutcome {
        let pool = CreditCardPool::from_accounts(ctx.accounts());

        let by_reference = self.match_by_reference(records, &pool);
        let by_cycle = self
            .match_by_billing_cycle(by_reference.remaining, ctx, ledger)
            .await;
        let by_rule = self.match_by_static_rules(by_cycle.remaining, ctx, ledger).await;

        let mut transfers = by_reference.transfers;
        transfers.extend(by_cycle.transfers);
        transfers.extend(by_rule.transfers);

        info!(
            settlements = transfers.len(),
            remaining = by_rule.remaining.len(),
            "Credit card settlement matching complete"
        );

        SettlementOutcome {
            transfers,
            remaining: by_rule.remaining,
        }
    }

    /// Reference pass: the withdrawal's reference names the card
    pub fn match_by_reference(
        &self,
        records: Vec<TransactionRecord>,
        pool: &CreditCardPool,
    ) -> SettlementOutcome {
        let mut outcome = SettlementOutcome::default();

        for record in records {
            let Some((source, reference)) = settlement_candidate(&record).and_then(|source| {
                record
                    .internal_reference
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(|r| (source, r.to_string()))
            }) else {
                outcome.remaining.push(record);
                continue;
            };

            match pool.resolve(&reference) {
                Some(card) if card != source => {
                    debug!(
                        external_id = %record.external_id,
                        reference = %reference,
                        card = %card,
                        "Settlement matched by reference"
                    );
                    let card = card.to_string();
                    let mut transfer = record.into_transfer(source, card);
                    transfer.append_note(&format!(
                        "Auto-detected credit card settlement (reference {})",
                        reference
                    ));
                    outcome.transfers.push(transfer);
                }
                _ => outcome.remaining.push(record),
            }
        }

        outcome
    }

    /// Billing-cycle pass: pick the card whose cycle net equals the payment
    pub async fn match_by_billing_cycle(
        &self,
        records: Vec<TransactionRecord>,
        ctx: &mut RunContext,
        ledger: &dyn Ledger,
    ) -> SettlementOutcome {
        let mut outcome = SettlementOutcome::default();

        for record in records {
            let rule = settlement_candidate(&record).and_then(|_| {
                self.billing_cycle_rules
                    .iter()
                    .find(|rule| description_matches(&rule.description, &record.description))
            });
            let Some(rule) = rule else {
                outcome.remaining.push(record);
                continue;
            };

            match select_billing_cycle_card(&record, rule, ctx, ledger).await {
                Ok(Some(card)) => {
                    let Some(source) = record.source_account_id.clone() else {
                        outcome.remaining.push(record);
                        continue;
                    };
                    let note = format!(
                        "Auto-detected credit card settlement (billing cycle {})",
                        record.billing_date().format("%Y-%m-%d")
                    );
                    let mut transfer = record.into_transfer(source, card);
                    transfer.append_note(&note);
                    outcome.transfers.push(transfer);
                }
                Ok(None) => outcome.remaining.push(record),
                Err(e) => {
                    warn!(
                        external_id = %record.external_id,
                        error = %e,
                        "Billing-cycle lookup failed, leaving withdrawal unclassified"
                    );
                    outcome.remaining.push(record);
                }
            }
        }

        outcome
    }

    /// Static pass: first rule whose description, source account and day range fit
    pub async fn match_by_static_rules(
        &self,
        records: Vec<TransactionRecord>,
        ctx: &mut RunContext,
        ledger: &dyn Ledger,
    ) -> SettlementOutcome {
        let mut outcome = SettlementOutcome::default();

        for record in records {
            let Some(source) = settlement_candidate(&record) else {
                outcome.remaining.push(record);
                continue;
            };
            let Some(rule) = self.static_rule_for(&record, &source, ctx) else {
                outcome.remaining.push(record);
                continue;
            };

            let spec = card_spec(&rule.credit_card, &record, ctx.default_currency());
            match ctx.resolve_or_create(ledger, spec).await {
                Ok(card) if card.id != source => {
                    debug!(
                        external_id = %record.external_id,
                        rule = %rule.description,
                        card = %card.id,
                        "Settlement matched by static rule"
                    );
                    let mut transfer = record.into_transfer(source, card.id);
                    transfer.append_note(&format!(
                        "Auto-detected credit card settlement (rule '{}')",
                        rule.description
                    ));
                    outcome.transfers.push(transfer);
                }
                Ok(_) => outcome.remaining.push(record),
                Err(e) => {
                    warn!(
                        external_id = %record.external_id,
                        card = %rule.credit_card,
                        error = %e,
                        "Could not resolve settlement card account"
                    );
                    outcome.remaining.push(record);
                }
            }
        }

        outcome
    }

    fn static_rule_for(
        &self,
        record: &TransactionRecord,
        source: &str,
        ctx: &RunContext,
    ) -> Option<&StaticRule> {
        let source_account = ctx.account_by_id(source)?;
        let day = record.date.day();
        self.static_rules.iter().find(|rule| {
            description_matches(&rule.description, &record.description)
                && source_account.matches_key(&rule.source_account)
                && rule.day_range.map_or(true, |range| range.contains(day))
        })
    }
}

/// Source account of a well-formed withdrawal, the only records settlement applies to
fn settlement_candidate(record: &TransactionRecord) -> Option<String> {
    if !record.is_withdrawal() || record.validate().is_err() {
        return None;
    }
    record.source_account_id.clone()
}

async fn select_billing_cycle_card(
    record: &TransactionRecord,
    rule: &BillingCycleRule,
    ctx: &mut RunContext,
    ledger: &dyn Ledger,
) -> Result<Option<String>> {
    let mut candidates: Vec<String> = Vec::new();
    for key in &rule.credit_cards {
        match ctx.find_account(key) {
            Some(account) if Some(&account.id) != record.source_account_id.as_ref() => {
                if !candidates.contains(&account.id) {
                    candidates.push(account.id.clone());
                }
            }
            Some(_) => {}
            None => debug!(card = %key, "Billing-cycle card not found in ledger"),
        }
    }

    let billing_date = record.billing_date();

    match candidates.as_slice() {
        [] => {
            warn!(
                external_id = %record.external_id,
                rule = %rule.description,
                "No configured card for billing-cycle rule exists in the ledger"
            );
            Ok(None)
        }
        [card] => {
            let net = ctx.settlement_net(ledger, card, billing_date).await?;
            if net.is_some_and(|n| n.is_zero()) {
                debug!(
                    external_id = %record.external_id,
                    card = %card,
                    "Card has no net charges for this cycle, not a settlement"
                );
                Ok(None)
            } else {
                Ok(Some(card.clone()))
            }
        }
        cards => {
            let expected = (-record.amount).round_dp(2);
            for card in cards {
                let net = ctx.settlement_net(ledger, card, billing_date).await?;
                if net.map(|n| n.round_dp(2)) == Some(expected) {
                    return Ok(Some(card.clone()));
                }
            }
            info!(
                external_id = %record.external_id,
                amount = %record.amount,
                candidates = cards.len(),
                "No card's billing-cycle net matches the payment"
            );
            Ok(None)
        }
    }
}

fn card_spec(card: &str, record: &TransactionRecord, default_currency: &str) -> AccountSpec {
    let card = card.trim();
    let currency = if record.currency_code.is_empty() {
        default_currency
    } else {
        record.currency_code.as_str()
    };
    let spec = AccountSpec::new(card, AccountKind::CreditCard, currency);
    if !card.is_empty() && card.chars().all(|c| c.is_ascii_digit()) {
        spec.with_number(card)
    } else {
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedger;
    use crate::config::DayRange;
    use crate::domain::TransactionType;
    use crate::services::run_context::PLACEHOLDER_PREFIX;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn accounts() -> Vec<Account> {
        vec![
            Account::new("bank", "Leumi", AccountKind::Bank).with_number("12345678"),
            Account::new("visa", "Visa", AccountKind::CreditCard).with_number("4580000000006943"),
            Account::new("max", "Max", AccountKind::CreditCard).with_number("5326000000001234"),
        ]
    }

    fn payment(id: &str, amount: i64, description: &str) -> TransactionRecord {
        TransactionRecord::withdrawal(id, date(2, 2), Decimal::new(amount, 2), "bank")
            .with_description(description)
    }

    fn tagged_charge(ledger: &InMemoryLedger, id: &str, card: &str, amount: i64) {
        let mut charge = TransactionRecord::withdrawal(id, date(1, 10), Decimal::new(amount, 2), card);
        charge.tags.insert(format!("{}_2024-02-02", card));
        ledger.insert_record(&charge);
    }

    #[test]
    fn test_pool_resolves_full_number_and_suffix() {
        let accounts = accounts();
        let pool = CreditCardPool::from_accounts(&accounts);
        assert_eq!(pool.resolve("4580000000006943"), Some("visa"));
        assert_eq!(pool.resolve("6943"), Some("visa"));
        assert_eq!(pool.resolve("99996943"), Some("visa"));
        assert_eq!(pool.resolve("0000"), None);
        // Bank accounts are not in the pool
        assert_eq!(pool.resolve("5678"), None);
    }

    #[test]
    fn test_pool_ambiguous_suffix() {
        let mut accounts = accounts();
        accounts.push(Account::new("amex", "Amex", AccountKind::CreditCard).with_number("3700006943"));
        let pool = CreditCardPool::from_accounts(&accounts);
        assert_eq!(pool.resolve("6943"), None);
        assert_eq!(pool.resolve("3700006943"), Some("amex"));
    }

    #[test]
    fn test_reference_match() {
        let accounts = accounts();
        let pool = CreditCardPool::from_accounts(&accounts);
        let matcher = SettlementMatcher::default();

        let records = vec![
            payment("w1", 120000, "VISA CAL").with_reference("6943"),
            payment("w2", 5000, "GROCERY"),
            payment("w3", 7000, "UNKNOWN CARD").with_reference("0000"),
        ];
        let outcome = matcher.match_by_reference(records, &pool);

        assert_eq!(outcome.transfers.len(), 1);
        let transfer = &outcome.transfers[0];
        assert_eq!(transfer.transaction_type, TransactionType::Transfer);
        assert_eq!(transfer.source_account_id.as_deref(), Some("bank"));
        assert_eq!(transfer.destination_account_id.as_deref(), Some("visa"));
        assert!(transfer.notes.contains("reference 6943"));
        assert_eq!(outcome.remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_billing_cycle_single_candidate() {
        let ledger = InMemoryLedger::new();
        let matcher = SettlementMatcher::new(&[SettlementRule::BillingCycle(BillingCycleRule {
            description: "visa".to_string(),
            credit_cards: vec!["6943".to_string()],
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        // No tagged entries at all: accepted
        let outcome = matcher
            .match_by_billing_cycle(vec![payment("w1", 50000, "VISA CAL")], &mut ctx, &ledger)
            .await;
        assert_eq!(outcome.transfers.len(), 1);
        assert_eq!(outcome.transfers[0].destination_account_id.as_deref(), Some("visa"));
    }

    #[tokio::test]
    async fn test_billing_cycle_single_candidate_rejected_on_zero_net() {
        let ledger = InMemoryLedger::new();
        tagged_charge(&ledger, "c1", "visa", 10000);
        let mut refund = TransactionRecord::deposit("c2", date(1, 11), Decimal::new(10000, 2), "visa");
        refund.tags.insert("visa_2024-02-02".to_string());
        ledger.insert_record(&refund);

        let matcher = SettlementMatcher::new(&[SettlementRule::BillingCycle(BillingCycleRule {
            description: "visa".to_string(),
            credit_cards: vec!["Visa".to_string()],
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");
        let outcome = matcher
            .match_by_billing_cycle(vec![payment("w1", 50000, "VISA CAL")], &mut ctx, &ledger)
            .await;
        assert!(outcome.transfers.is_empty());
        assert_eq!(outcome.remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_billing_cycle_multiple_candidates_picks_matching_net() {
        let ledger = InMemoryLedger::new();
        tagged_charge(&ledger, "c1", "visa", 30000);
        tagged_charge(&ledger, "c2", "max", 45050);

        let matcher = SettlementMatcher::new(&[SettlementRule::BillingCycle(BillingCycleRule {
            description: "CARDS".to_string(),
            credit_cards: vec!["6943".to_string(), "1234".to_string()],
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        let outcome = matcher
            .match_by_billing_cycle(
                vec![payment("w1", 45050, "cards payment"), payment("w2", 99900, "cards payment")],
                &mut ctx,
                &ledger,
            )
            .await;

        assert_eq!(outcome.transfers.len(), 1);
        assert_eq!(outcome.transfers[0].external_id, "w1");
        assert_eq!(outcome.transfers[0].destination_account_id.as_deref(), Some("max"));
        assert_eq!(outcome.remaining.len(), 1);
        assert_eq!(outcome.remaining[0].external_id, "w2");
    }

    #[tokio::test]
    async fn test_billing_cycle_lookup_failure_leaves_record_unclassified() {
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable(true);
        let matcher = SettlementMatcher::new(&[SettlementRule::BillingCycle(BillingCycleRule {
            description: "CARDS".to_string(),
            credit_cards: vec!["6943".to_string(), "1234".to_string()],
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        let outcome = matcher
            .match_by_billing_cycle(
                vec![payment("w1", 45050, "cards payment"), payment("w2", 5000, "GROCERY")],
                &mut ctx,
                &ledger,
            )
            .await;

        assert!(outcome.transfers.is_empty());
        let remaining: Vec<_> = outcome.remaining.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(remaining, vec!["w1", "w2"]);
        assert_eq!(outcome.remaining[0].transaction_type, TransactionType::Withdrawal);
    }

    #[tokio::test]
    async fn test_static_rule_day_ranges() {
        let ledger = InMemoryLedger::new();
        let matcher = SettlementMatcher::new(&[
            SettlementRule::Static(StaticRule {
                description: "AMEX".to_string(),
                source_account: "12345678".to_string(),
                credit_card: "Amex Early".to_string(),
                day_range: Some(DayRange { from: 1, to: 10 }),
            }),
            SettlementRule::Static(StaticRule {
                description: "AMEX".to_string(),
                source_account: "5678".to_string(),
                credit_card: "Amex Late".to_string(),
                day_range: None,
            }),
        ]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        let mut late = payment("w2", 1000, "AMEX PAYMENT");
        late.date = date(2, 20);
        let outcome = matcher
            .match_by_static_rules(vec![payment("w1", 1000, "AMEX PAYMENT"), late], &mut ctx, &ledger)
            .await;

        assert_eq!(outcome.transfers.len(), 2);
        let created = ledger.accounts();
        assert_eq!(created.len(), 2);
        let early = created.iter().find(|a| a.name == "Amex Early").unwrap();
        let late = created.iter().find(|a| a.name == "Amex Late").unwrap();
        assert_eq!(outcome.transfers[0].destination_account_id.as_ref(), Some(&early.id));
        assert_eq!(outcome.transfers[1].destination_account_id.as_ref(), Some(&late.id));
    }

    #[tokio::test]
    async fn test_static_rule_card_creation_failure_leaves_record_unclassified() {
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable(true);
        let matcher = SettlementMatcher::new(&[SettlementRule::Static(StaticRule {
            description: "DINERS".to_string(),
            source_account: "Leumi".to_string(),
            credit_card: "Diners".to_string(),
            day_range: None,
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        let outcome = matcher
            .match_by_static_rules(
                vec![payment("w1", 1000, "diners club"), payment("w2", 2000, "DINERS")],
                &mut ctx,
                &ledger,
            )
            .await;

        assert!(outcome.transfers.is_empty());
        assert_eq!(outcome.remaining.len(), 2);
        assert!(outcome.remaining.iter().all(|r| r.destination_account_id.is_none()));
        assert!(ctx.find_account("Diners").is_none());

        ledger.set_unreachable(false);
        assert!(ledger.accounts().is_empty());
    }

    #[tokio::test]
    async fn test_static_rule_dry_run_does_not_create_accounts() {
        let ledger = InMemoryLedger::new();
        let matcher = SettlementMatcher::new(&[SettlementRule::Static(StaticRule {
            description: "DINERS".to_string(),
            source_account: "Leumi".to_string(),
            credit_card: "Diners".to_string(),
            day_range: None,
        })]);
        let mut ctx = RunContext::new(accounts(), true, "ILS");

        let outcome = matcher
            .match_by_static_rules(vec![payment("w1", 1000, "diners club")], &mut ctx, &ledger)
            .await;
        assert_eq!(outcome.transfers.len(), 1);
        let destination = outcome.transfers[0].destination_account_id.clone().unwrap();
        assert!(destination.starts_with(PLACEHOLDER_PREFIX));
        assert!(ledger.accounts().is_empty());
    }

    #[tokio::test]
    async fn test_run_chains_passes() {
        let ledger = InMemoryLedger::new();
        let matcher = SettlementMatcher::new(&[SettlementRule::Static(StaticRule {
            description: "VISA".to_string(),
            source_account: "Leumi".to_string(),
            credit_card: "Visa".to_string(),
            day_range: None,
        })]);
        let mut ctx = RunContext::new(accounts(), false, "ILS");

        let outcome = matcher
            .run(
                vec![
                    payment("w1", 1000, "VISA").with_reference("6943"),
                    payment("w2", 2000, "VISA"),
                    TransactionRecord::deposit("d1", date(2, 2), Decimal::ONE, "bank"),
                ],
                &mut ctx,
                &ledger,
            )
            .await;

        assert_eq!(outcome.transfers.len(), 2);
        assert!(outcome.transfers[0].notes.contains("reference"));
        assert!(outcome.transfers[1].notes.contains("rule 'VISA'"));
        assert_eq!(outcome.remaining.len(), 1);
        assert!(ledger.accounts().is_empty());
    }
}
