//! Unit of work: the explicit transaction scope of one operation.
//!
//! Flow of every money-moving operation:
//! 1. `Store::begin(keys)` takes the row locks in global order
//! 2. typed accessors load locked rows into staged copies
//! 3. the operation re-validates under lock and mutates the copies
//! 4. ledger entries, new rows and scheduled entries are staged alongside
//! 5. [`UnitOfWork::commit`] validates and writes everything at once
//!
//! Nothing staged is visible to anyone until step 5. Dropping the unit of
//! work instead is the rollback: staged copies are discarded and the locks
//! released. A row whose key is not in the lock set cannot be loaded.

use std::collections::BTreeMap;

use campusledger_types::{
    BudgetCard, CardId, EntryId, EntryStatus, LedgerEntry, LedgerError, Listing, ListingId, Loan,
    LoanId, LoanRepayment, MarketplaceOrder, PocketId, RequestId, Result, SavingsPocket,
    Subscription, SubscriptionId, UserId, Wallet,
};

use crate::lock::{EntityKey, LockSet};
use crate::registry::{ChangeSet, Row, Store};

/// What a successful commit wrote to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Completed entries, in the order they were staged.
    pub entries: Vec<LedgerEntry>,
    pub scheduled: Vec<LedgerEntry>,
    pub unscheduled: Vec<EntryId>,
}

pub struct UnitOfWork<'s> {
    store: &'s Store,
    locks: LockSet<'s>,
    staged: BTreeMap<EntityKey, Row>,
    changes: ChangeSet,
}

macro_rules! row_accessor {
    ($(#[$doc:meta])* $fn_name:ident, $id:ty, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $fn_name(&mut self, id: $id) -> Result<&mut $ty> {
            match self.stage(EntityKey::$variant(id))? {
                Row::$variant(row) => Ok(row),
                other => Err(LedgerError::Internal(format!(
                    "staged row {} has the wrong table",
                    other.key()
                ))),
            }
        }
    };
}

impl<'s> UnitOfWork<'s> {
    pub(crate) fn new(store: &'s Store, locks: LockSet<'s>) -> Self {
        Self {
            store,
            locks,
            staged: BTreeMap::new(),
            changes: ChangeSet::default(),
        }
    }

    /// Ledger currency, for building entries.
    pub fn currency(&self) -> &str {
        &self.store.config().currency
    }

    /// Keys locked by this unit of work.
    pub fn locked_keys(&self) -> &[EntityKey] {
        self.locks.keys()
    }

    fn stage(&mut self, key: EntityKey) -> Result<&mut Row> {
        if !self.staged.contains_key(&key) {
            if !self.locks.covers(&key) {
                return Err(LedgerError::Internal(format!(
                    "{key} accessed without holding its lock"
                )));
            }
            let row = self.store.load_row(key)?;
            self.staged.insert(key, row);
        }
        self.staged
            .get_mut(&key)
            .ok_or_else(|| LedgerError::Internal(format!("{key} vanished from staging")))
    }

    row_accessor! {
        /// The locked wallet of `owner`.
        wallet, UserId, Wallet, Wallet
    }
    row_accessor!(card, CardId, Card, BudgetCard);
    row_accessor!(loan, LoanId, Loan, Loan);
    row_accessor!(listing, ListingId, Listing, Listing);
    row_accessor!(subscription, SubscriptionId, Subscription, Subscription);
    row_accessor!(pocket, PocketId, Pocket, SavingsPocket);

    /// Stage a brand-new row. Commit fails with `Conflict` if it exists.
    pub fn insert(&mut self, row: Row) {
        self.changes.inserted.push(row);
    }

    pub fn record_order(&mut self, order: MarketplaceOrder) {
        self.changes.orders.push(order);
    }

    pub fn record_repayment(&mut self, repayment: LoanRepayment) {
        self.changes.repayments.push(repayment);
    }

    /// Stage a completed ledger entry.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<()> {
        if entry.status != EntryStatus::Completed {
            return Err(LedgerError::Internal(format!(
                "entry {} staged for append with status {}",
                entry.id, entry.status
            )));
        }
        self.changes.appended.push(entry);
        Ok(())
    }

    /// Stage a scheduled ledger entry.
    pub fn schedule(&mut self, entry: LedgerEntry) -> Result<()> {
        if entry.status != EntryStatus::Scheduled {
            return Err(LedgerError::Internal(format!(
                "entry {} staged for scheduling with status {}",
                entry.id, entry.status
            )));
        }
        self.changes.scheduled.push(entry);
        Ok(())
    }

    /// Stage removal of a scheduled entry.
    pub fn unschedule(&mut self, id: EntryId) {
        self.changes.unscheduled.push(id);
    }

    /// Tie this unit of work to a caller request id. A second commit with
    /// the same id fails with `Conflict`.
    pub fn claim_request(&mut self, request: Option<RequestId>) {
        self.changes.request = request;
    }

    /// Completed entries staged so far.
    pub fn staged_entries(&self) -> &[LedgerEntry] {
        &self.changes.appended
    }

    /// Write every staged row and entry atomically, then release the locks.
    ///
    /// # Errors
    /// `Conflict` for duplicate inserts or a reused request id, `NotFound`
    /// for a scheduled entry that is already gone. On error nothing is
    /// written.
    pub fn commit(mut self) -> Result<CommitReceipt> {
        let mut changes = std::mem::take(&mut self.changes);
        changes.updated = std::mem::take(&mut self.staged).into_values().collect();
        let receipt = CommitReceipt {
            entries: changes.appended.clone(),
            scheduled: changes.scheduled.clone(),
            unscheduled: changes.unscheduled.clone(),
        };
        let rows = changes.updated.len() + changes.inserted.len();
        self.store.commit_changes(changes)?;
        tracing::debug!(
            rows,
            entries = receipt.entries.len(),
            scheduled = receipt.scheduled.len(),
            locks = self.locks.keys().len(),
            "Unit of work committed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use campusledger_types::{CardPurpose, EngineConfig, EntryType, Money};

    use super::*;

    fn store_with_wallets(balances: &[(UserId, i64)]) -> Store {
        let store = Store::new(EngineConfig::default()).unwrap();
        let mut uow = store.begin([]).unwrap();
        for &(owner, cents) in balances {
            uow.insert(Row::Wallet(Wallet::dummy_funded(owner, Money::from_cents(cents))));
        }
        uow.commit().unwrap();
        store
    }

    #[test]
    fn commit_publishes_rows_and_entries_together() {
        let (a, b) = (UserId::new(), UserId::new());
        let store = store_with_wallets(&[(a, 10_000), (b, 0)]);
        let amount = Money::from_cents(3_000);

        let mut uow = store
            .begin([EntityKey::Wallet(a), EntityKey::Wallet(b)])
            .unwrap();
        uow.wallet(a).unwrap().debit(amount).unwrap();
        uow.wallet(b).unwrap().credit(amount);
        uow.append(LedgerEntry::completed(a, EntryType::TransferSent, amount, "USD"))
            .unwrap();
        uow.append(LedgerEntry::completed(b, EntryType::TransferReceived, amount, "USD"))
            .unwrap();

        // Not visible before commit.
        assert_eq!(store.wallet(a).unwrap().balance, Money::from_cents(10_000));

        let receipt = uow.commit().unwrap();
        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(store.wallet(a).unwrap().balance, Money::from_cents(7_000));
        assert_eq!(store.wallet(b).unwrap().balance, Money::from_cents(3_000));
        assert_eq!(store.snapshot().unwrap().journal.len(), 2);
        assert_eq!(store.locks().held_count(), 0);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let a = UserId::new();
        let store = store_with_wallets(&[(a, 10_000)]);
        {
            let mut uow = store.begin([EntityKey::Wallet(a)]).unwrap();
            uow.wallet(a).unwrap().debit(Money::from_cents(5_000)).unwrap();
            uow.append(LedgerEntry::completed(
                a,
                EntryType::CardPayment,
                Money::from_cents(5_000),
                "USD",
            ))
            .unwrap();
        }
        assert_eq!(store.wallet(a).unwrap().balance, Money::from_cents(10_000));
        assert!(store.snapshot().unwrap().journal.is_empty());
        assert_eq!(store.locks().held_count(), 0);
    }

    #[test]
    fn unlocked_row_cannot_be_loaded() {
        let a = UserId::new();
        let store = store_with_wallets(&[(a, 100)]);
        let mut uow = store.begin([]).unwrap();
        assert!(matches!(uow.wallet(a), Err(LedgerError::Internal(_))));
    }

    #[test]
    fn missing_locked_row_is_not_found() {
        let store = store_with_wallets(&[]);
        let ghost = CardId::new();
        let mut uow = store.begin([EntityKey::Card(ghost)]).unwrap();
        assert!(matches!(
            uow.card(ghost),
            Err(LedgerError::NotFound { entity: "card", .. })
        ));
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let a = UserId::new();
        let store = store_with_wallets(&[(a, 10_000)]);
        let mut uow = store.begin([EntityKey::Wallet(a)]).unwrap();
        uow.wallet(a).unwrap().debit(Money::from_cents(1_000)).unwrap();
        // Duplicate wallet insert makes the whole commit fail.
        uow.insert(Row::Wallet(Wallet::new(a, "USD")));
        uow.insert(Row::Card(BudgetCard::new(a, "x", CardPurpose::Budget)));
        assert!(matches!(uow.commit(), Err(LedgerError::Conflict { .. })));
        assert_eq!(store.wallet(a).unwrap().balance, Money::from_cents(10_000));
        assert!(store.cards_of(a).unwrap().is_empty());
    }

    #[test]
    fn request_id_commits_once() {
        let a = UserId::new();
        let store = store_with_wallets(&[(a, 10_000)]);
        let request = RequestId::new();
        for attempt in 0..2 {
            let mut uow = store.begin([EntityKey::Wallet(a)]).unwrap();
            uow.claim_request(Some(request));
            uow.wallet(a).unwrap().credit(Money::from_cents(100));
            let result = uow.commit();
            assert_eq!(result.is_ok(), attempt == 0);
        }
        assert_eq!(store.wallet(a).unwrap().balance, Money::from_cents(10_100));
    }

    #[test]
    fn append_rejects_scheduled_entries() {
        let store = store_with_wallets(&[]);
        let mut uow = store.begin([]).unwrap();
        let entry = LedgerEntry::scheduled(
            UserId::new(),
            EntryType::ExpectedPayment,
            Money::from_cents(1),
            "USD",
            chrono::NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
        );
        assert!(uow.append(entry.clone()).is_err());
        uow.schedule(entry).unwrap();
        let receipt = uow.commit().unwrap();
        assert_eq!(receipt.scheduled.len(), 1);
    }
}
