//! Ledger replay and supply conservation.
//!
//! The journal is the system of record. [`Reconciler::run`] takes one
//! consistent snapshot and checks that every stored balance can be rebuilt
//! from it:
//!
//! 1. The journal hash chain is intact
//! 2. Each wallet balance equals the sum of its owner's wallet effects
//! 3. Each card's allocated / spent and each pocket's balance equals the
//!    sum of the entries that touched it
//! 4. Supply is conserved:
//!    ```text
//!    Σ wallets + Σ budget headroom + Σ pockets
//!        == Σ topup - Σ (card_payment + budget_expense + subscription_payment)
//!    ```
//! 5. Per-entity invariants hold (no negative balance, spent <= allocated,
//!    repaid <= amount, repaid status only when fully repaid)
//!
//! Any finding fails the whole run with `InvariantViolation`.

use std::collections::HashMap;
use std::sync::Arc;

use campusledger_store::{Snapshot, Store};
use campusledger_types::{
    CardId, CardPurpose, EntryLink, EntryType, LedgerError, LoanId, LoanStatus, Money, PocketId,
    Result, UserId,
};
use serde::{Deserialize, Serialize};

/// Tracks per-currency money entering and leaving the system and checks
/// that what is held matches.
#[derive(Debug, Clone, Default)]
pub struct SupplyConservation {
    /// Top-ups since genesis.
    inflows: HashMap<String, Money>,
    /// Money spent out of the system since genesis.
    outflows: HashMap<String, Money>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inflow(&mut self, currency: &str, amount: Money) {
        *self.inflows.entry(currency.to_string()).or_default() += amount;
    }

    pub fn record_outflow(&mut self, currency: &str, amount: Money) {
        *self.outflows.entry(currency.to_string()).or_default() += amount;
    }

    #[must_use]
    pub fn total_inflows(&self, currency: &str) -> Money {
        self.inflows.get(currency).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_outflows(&self, currency: &str) -> Money {
        self.outflows.get(currency).copied().unwrap_or_default()
    }

    /// Inflows minus outflows.
    #[must_use]
    pub fn expected_supply(&self, currency: &str) -> Money {
        self.total_inflows(currency) - self.total_outflows(currency)
    }

    /// # Errors
    /// [`LedgerError::InvariantViolation`] if `held` differs from the
    /// expected supply.
    pub fn verify(&self, currency: &str, held: Money) -> Result<()> {
        let expected = self.expected_supply(currency);
        if held != expected {
            return Err(LedgerError::InvariantViolation {
                reason: format!(
                    "{currency}: held {held} != expected {expected} (inflows={}, outflows={})",
                    self.total_inflows(currency),
                    self.total_outflows(currency),
                ),
            });
        }
        Ok(())
    }

    /// Currencies seen so far, sorted.
    #[must_use]
    pub fn tracked_currencies(&self) -> Vec<String> {
        let mut currencies: Vec<String> = self
            .inflows
            .keys()
            .chain(self.outflows.keys())
            .cloned()
            .collect();
        currencies.sort();
        currencies.dedup();
        currencies
    }
}

/// Summary of a clean reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub entries: usize,
    pub wallets: usize,
    pub cards: usize,
    pub pockets: usize,
    pub loans: usize,
    pub head_digest: String,
    pub currency: String,
    pub inflows: Money,
    pub outflows: Money,
    /// Money currently held in wallets, budget headroom and pockets.
    pub held: Money,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<Store>,
}

/// Journal totals for one card.
#[derive(Debug, Default)]
struct CardReplay {
    allocated: Money,
    spent: Money,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Replay the journal against a snapshot of every balance.
    ///
    /// # Errors
    /// [`LedgerError::InvariantViolation`] listing every finding.
    pub fn run(&self) -> Result<AuditReport> {
        let snapshot = self.store.snapshot()?;
        let currency = self.store.config().currency.clone();
        let mut findings = Vec::new();

        if let Err(err) = &snapshot.chain {
            findings.push(err.to_string());
        }
        Self::check_wallets(&snapshot, &mut findings);
        Self::check_cards(&snapshot, &mut findings);
        Self::check_pockets(&snapshot, &mut findings);
        Self::check_loans(&snapshot, &mut findings);

        let supply = Self::replay_supply(&snapshot);
        let held = Self::held(&snapshot, &currency, &mut findings);
        for tracked in supply.tracked_currencies() {
            let held = if tracked == currency { held } else { Money::ZERO };
            if let Err(err) = supply.verify(&tracked, held) {
                findings.push(err.to_string());
            }
        }
        if supply.tracked_currencies().is_empty() && !held.is_zero() {
            findings.push(format!("{currency}: held {held} with no recorded inflows"));
        }

        if !findings.is_empty() {
            tracing::error!(findings = findings.len(), head = %snapshot.head_digest, "Ledger reconciliation failed");
            return Err(LedgerError::InvariantViolation {
                reason: findings.join("; "),
            });
        }

        let report = AuditReport {
            entries: snapshot.journal.len(),
            wallets: snapshot.wallets.len(),
            cards: snapshot.cards.len(),
            pockets: snapshot.pockets.len(),
            loans: snapshot.loans.len(),
            head_digest: snapshot.head_digest,
            inflows: supply.total_inflows(&currency),
            outflows: supply.total_outflows(&currency),
            currency,
            held,
        };
        tracing::info!(
            entries = report.entries,
            wallets = report.wallets,
            held = %report.held,
            head = %report.head_digest,
            "Ledger reconciled"
        );
        Ok(report)
    }

    fn check_wallets(snapshot: &Snapshot, findings: &mut Vec<String>) {
        let mut replayed: HashMap<UserId, Money> = HashMap::new();
        for entry in &snapshot.journal {
            *replayed.entry(entry.owner).or_default() += entry.wallet_delta();
        }
        for wallet in &snapshot.wallets {
            let expected = replayed.remove(&wallet.owner).unwrap_or_default();
            if wallet.balance != expected {
                findings.push(format!(
                    "wallet {}: balance {} != replayed {expected}",
                    wallet.owner, wallet.balance
                ));
            }
            if wallet.balance.is_negative() {
                findings.push(format!("wallet {}: negative balance {}", wallet.owner, wallet.balance));
            }
        }
        for (owner, delta) in replayed {
            if !delta.is_zero() {
                findings.push(format!("entries move {delta} for {owner}, who has no wallet"));
            }
        }
    }

    fn check_cards(snapshot: &Snapshot, findings: &mut Vec<String>) {
        let mut replayed: HashMap<CardId, CardReplay> = HashMap::new();
        for entry in &snapshot.journal {
            let Some(card) = entry.card_id else { continue };
            let totals = replayed.entry(card).or_default();
            match entry.entry_type {
                EntryType::BudgetAllocation => totals.allocated += entry.amount,
                EntryType::BudgetWithdrawal => totals.allocated -= entry.amount,
                EntryType::BudgetExpense | EntryType::CardPayment => totals.spent += entry.amount,
                _ => {}
            }
        }
        for card in &snapshot.cards {
            let totals = replayed.remove(&card.id).unwrap_or_default();
            match card.purpose {
                CardPurpose::Budget => {
                    if card.allocated != totals.allocated || card.spent != totals.spent {
                        findings.push(format!(
                            "card {}: allocated/spent {}/{} != replayed {}/{}",
                            card.id, card.allocated, card.spent, totals.allocated, totals.spent
                        ));
                    }
                    if card.spent > card.allocated {
                        findings.push(format!(
                            "card {}: spent {} exceeds allocated {}",
                            card.id, card.spent, card.allocated
                        ));
                    }
                    if card.monthly_limit.is_some_and(|limit| card.spent > limit) {
                        findings.push(format!("card {}: spent past its monthly limit", card.id));
                    }
                }
                CardPurpose::Payment => {
                    if card.spent != totals.spent {
                        findings.push(format!(
                            "card {}: spent {} != replayed {}",
                            card.id, card.spent, totals.spent
                        ));
                    }
                }
                CardPurpose::Subscription => {}
            }
        }
    }

    fn check_pockets(snapshot: &Snapshot, findings: &mut Vec<String>) {
        let mut replayed: HashMap<PocketId, Money> = HashMap::new();
        for entry in &snapshot.journal {
            let Some(EntryLink::Pocket { pocket }) = entry.link else { continue };
            let balance = replayed.entry(pocket).or_default();
            match entry.entry_type {
                EntryType::SavingsDeposit => *balance += entry.amount,
                EntryType::SavingsWithdrawal => *balance -= entry.amount,
                _ => {}
            }
        }
        for pocket in &snapshot.pockets {
            let expected = replayed.remove(&pocket.id).unwrap_or_default();
            if pocket.balance != expected {
                findings.push(format!(
                    "pocket {}: balance {} != replayed {expected}",
                    pocket.id, pocket.balance
                ));
            }
        }
    }

    fn check_loans(snapshot: &Snapshot, findings: &mut Vec<String>) {
        let mut repaid: HashMap<LoanId, Money> = HashMap::new();
        for repayment in &snapshot.repayments {
            *repaid.entry(repayment.loan_id).or_default() += repayment.amount;
        }
        for loan in &snapshot.loans {
            let recorded = repaid.get(&loan.id).copied().unwrap_or_default();
            if loan.amount_repaid != recorded {
                findings.push(format!(
                    "loan {}: amount_repaid {} != repayment history {recorded}",
                    loan.id, loan.amount_repaid
                ));
            }
            if loan.amount_repaid > loan.amount {
                findings.push(format!(
                    "loan {}: repaid {} exceeds amount {}",
                    loan.id, loan.amount_repaid, loan.amount
                ));
            }
            if loan.status == LoanStatus::Repaid && loan.amount_repaid != loan.amount {
                findings.push(format!("loan {}: repaid status with balance outstanding", loan.id));
            }
        }
    }

    fn replay_supply(snapshot: &Snapshot) -> SupplyConservation {
        let mut supply = SupplyConservation::new();
        for entry in &snapshot.journal {
            match entry.entry_type {
                EntryType::Topup => supply.record_inflow(&entry.currency, entry.amount),
                EntryType::CardPayment
                | EntryType::BudgetExpense
                | EntryType::SubscriptionPayment => {
                    supply.record_outflow(&entry.currency, entry.amount);
                }
                _ => {}
            }
        }
        supply
    }

    fn held(snapshot: &Snapshot, currency: &str, findings: &mut Vec<String>) -> Money {
        let mut held = Money::ZERO;
        for wallet in &snapshot.wallets {
            if wallet.currency == currency {
                held += wallet.balance;
            } else {
                findings.push(format!(
                    "wallet {}: currency {} differs from ledger currency {currency}",
                    wallet.owner, wallet.currency
                ));
            }
        }
        held += snapshot
            .cards
            .iter()
            .filter(|c| c.purpose == CardPurpose::Budget)
            .map(campusledger_types::BudgetCard::remaining)
            .sum::<Money>();
        held += snapshot.pockets.iter().map(|p| p.balance).sum::<Money>();
        held
    }
}
