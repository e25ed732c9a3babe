//! Account registry and repositories.
//!
//! [`Store`] owns every table behind one `RwLock` and hands out typed,
//! cloned rows by id. Business logic never navigates from one row to
//! another implicitly; it asks the store for exactly what it needs. All
//! writes go through a [`UnitOfWork`] obtained from [`Store::begin`].

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use campusledger_types::{
    BudgetCard, CardId, EngineConfig, EntryId, LedgerEntry, LedgerError, Listing, ListingId, Loan,
    LoanId, LoanRepayment, MarketplaceOrder, OrderId, PocketId, RequestId, Result, SavingsPocket,
    Subscription, SubscriptionId, SubscriptionStatus, UserId, Wallet,
};

use crate::idempotency::RequestGuard;
use crate::ledger::{LedgerQuery, LedgerStore};
use crate::lock::{EntityKey, LockCoordinator};
use crate::unit_of_work::UnitOfWork;

/// One lockable row, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Wallet(Wallet),
    Card(BudgetCard),
    Loan(Loan),
    Listing(Listing),
    Subscription(Subscription),
    Pocket(SavingsPocket),
}

impl Row {
    #[must_use]
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Wallet(w) => EntityKey::Wallet(w.owner),
            Self::Card(c) => EntityKey::Card(c.id),
            Self::Loan(l) => EntityKey::Loan(l.id),
            Self::Listing(l) => EntityKey::Listing(l.id),
            Self::Subscription(s) => EntityKey::Subscription(s.id),
            Self::Pocket(p) => EntityKey::Pocket(p.id),
        }
    }
}

/// Everything one commit writes. Built by [`UnitOfWork`].
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub updated: Vec<Row>,
    pub inserted: Vec<Row>,
    pub orders: Vec<MarketplaceOrder>,
    pub repayments: Vec<LoanRepayment>,
    pub appended: Vec<LedgerEntry>,
    pub scheduled: Vec<LedgerEntry>,
    pub unscheduled: Vec<EntryId>,
    pub request: Option<RequestId>,
}

pub(crate) struct Tables {
    wallets: HashMap<UserId, Wallet>,
    cards: HashMap<CardId, BudgetCard>,
    loans: HashMap<LoanId, Loan>,
    repayments: Vec<LoanRepayment>,
    listings: HashMap<ListingId, Listing>,
    orders: HashMap<OrderId, MarketplaceOrder>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    pockets: HashMap<PocketId, SavingsPocket>,
    ledger: LedgerStore,
    requests: RequestGuard,
}

impl Tables {
    fn new(idempotency_cache_size: usize) -> Self {
        Self {
            wallets: HashMap::new(),
            cards: HashMap::new(),
            loans: HashMap::new(),
            repayments: Vec::new(),
            listings: HashMap::new(),
            orders: HashMap::new(),
            subscriptions: HashMap::new(),
            pockets: HashMap::new(),
            ledger: LedgerStore::new(),
            requests: RequestGuard::new(idempotency_cache_size),
        }
    }

    fn row(&self, key: EntityKey) -> Option<Row> {
        match key {
            EntityKey::Wallet(id) => self.wallets.get(&id).cloned().map(Row::Wallet),
            EntityKey::Card(id) => self.cards.get(&id).cloned().map(Row::Card),
            EntityKey::Loan(id) => self.loans.get(&id).cloned().map(Row::Loan),
            EntityKey::Listing(id) => self.listings.get(&id).cloned().map(Row::Listing),
            EntityKey::Subscription(id) => {
                self.subscriptions.get(&id).cloned().map(Row::Subscription)
            }
            EntityKey::Pocket(id) => self.pockets.get(&id).cloned().map(Row::Pocket),
        }
    }

    fn exists(&self, key: EntityKey) -> bool {
        match key {
            EntityKey::Wallet(id) => self.wallets.contains_key(&id),
            EntityKey::Card(id) => self.cards.contains_key(&id),
            EntityKey::Loan(id) => self.loans.contains_key(&id),
            EntityKey::Listing(id) => self.listings.contains_key(&id),
            EntityKey::Subscription(id) => self.subscriptions.contains_key(&id),
            EntityKey::Pocket(id) => self.pockets.contains_key(&id),
        }
    }

    fn put(&mut self, row: Row) {
        match row {
            Row::Wallet(w) => {
                self.wallets.insert(w.owner, w);
            }
            Row::Card(c) => {
                self.cards.insert(c.id, c);
            }
            Row::Loan(l) => {
                self.loans.insert(l.id, l);
            }
            Row::Listing(l) => {
                self.listings.insert(l.id, l);
            }
            Row::Subscription(s) => {
                self.subscriptions.insert(s.id, s);
            }
            Row::Pocket(p) => {
                self.pockets.insert(p.id, p);
            }
        }
    }

    fn has_active_subscription(&self, candidate: &Subscription) -> bool {
        self.subscriptions.values().any(|s| {
            s.id != candidate.id
                && s.owner == candidate.owner
                && s.status == SubscriptionStatus::Active
                && s.service_name.eq_ignore_ascii_case(&candidate.service_name)
        })
    }

    fn ensure_unique_active(&self, sub: &Subscription) -> Result<()> {
        if sub.status == SubscriptionStatus::Active && self.has_active_subscription(sub) {
            return Err(LedgerError::conflict(format!(
                "an active subscription to {} already exists",
                sub.service_name
            )));
        }
        Ok(())
    }

    /// Check everything that can fail before the first write.
    fn validate(&self, changes: &ChangeSet) -> Result<()> {
        if let Some(request) = changes.request {
            self.requests.check(request)?;
        }
        for row in &changes.inserted {
            let key = row.key();
            if self.exists(key) {
                return Err(LedgerError::conflict(format!("{key} already exists")));
            }
            if let Row::Subscription(sub) = row {
                self.ensure_unique_active(sub)?;
            }
        }
        for row in &changes.updated {
            if !self.exists(row.key()) {
                return Err(LedgerError::Internal(format!(
                    "{} disappeared while locked",
                    row.key()
                )));
            }
            // Resuming a paused subscription must not create a second active one.
            if let Row::Subscription(sub) = row {
                self.ensure_unique_active(sub)?;
            }
        }
        for id in &changes.unscheduled {
            if !self.ledger.is_scheduled(id) {
                return Err(LedgerError::not_found("scheduled entry", id));
            }
        }
        for entry in changes.appended.iter().chain(&changes.scheduled) {
            if self.ledger.contains(&entry.id) {
                return Err(LedgerError::conflict(format!(
                    "ledger entry {} already exists",
                    entry.id
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<()> {
        if let Some(request) = changes.request {
            self.requests.claim(request)?;
        }
        for row in changes.inserted.into_iter().chain(changes.updated) {
            self.put(row);
        }
        for order in changes.orders {
            self.orders.insert(order.id, order);
        }
        self.repayments.extend(changes.repayments);
        for id in &changes.unscheduled {
            self.ledger.unschedule(id)?;
        }
        for entry in changes.appended {
            self.ledger.append(entry)?;
        }
        for entry in changes.scheduled {
            self.ledger.schedule(entry)?;
        }
        Ok(())
    }
}

/// Consistent copy of the balance-bearing tables and the journal, taken
/// under one read lock. Input to reconciliation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub wallets: Vec<Wallet>,
    pub cards: Vec<BudgetCard>,
    pub pockets: Vec<SavingsPocket>,
    pub loans: Vec<Loan>,
    pub repayments: Vec<LoanRepayment>,
    pub journal: Vec<LedgerEntry>,
    pub head_digest: String,
    /// Result of re-verifying the journal's hash chain.
    pub chain: std::result::Result<(), LedgerError>,
}

/// The registry: all tables, the lock coordinator, and the configuration.
pub struct Store {
    config: EngineConfig,
    locks: LockCoordinator,
    tables: RwLock<Tables>,
}

impl Store {
    /// # Errors
    /// [`LedgerError::Configuration`] if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let tables = Tables::new(config.idempotency_cache_size);
        Ok(Self {
            config,
            locks: LockCoordinator::new(),
            tables: RwLock::new(tables),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    /// Lock `keys` in global order and open a unit of work over them.
    ///
    /// # Errors
    /// [`LedgerError::Busy`] if the locks cannot be taken in time.
    pub fn begin(&self, keys: impl IntoIterator<Item = EntityKey>) -> Result<UnitOfWork<'_>> {
        let locks = self.locks.acquire(keys, self.config.lock_timeout())?;
        Ok(UnitOfWork::new(self, locks))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::Internal("store tables poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Internal("store tables poisoned".into()))
    }

    pub(crate) fn load_row(&self, key: EntityKey) -> Result<Row> {
        self.read()?.row(key).ok_or_else(|| key.not_found())
    }

    /// Validate then apply one change set, all under a single write lock.
    pub(crate) fn commit_changes(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.write()?;
        tables.validate(&changes)?;
        tables.apply(changes)
    }

    // -----------------------------------------------------------------
    // Typed reads
    // -----------------------------------------------------------------

    pub fn wallet(&self, owner: UserId) -> Result<Wallet> {
        self.read()?
            .wallets
            .get(&owner)
            .cloned()
            .ok_or_else(|| EntityKey::Wallet(owner).not_found())
    }

    pub fn card(&self, id: CardId) -> Result<BudgetCard> {
        self.read()?
            .cards
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityKey::Card(id).not_found())
    }

    /// Cards of `owner`, oldest first.
    pub fn cards_of(&self, owner: UserId) -> Result<Vec<BudgetCard>> {
        let mut cards: Vec<BudgetCard> = self
            .read()?
            .cards
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.id);
        Ok(cards)
    }

    pub fn loan(&self, id: LoanId) -> Result<Loan> {
        self.read()?
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityKey::Loan(id).not_found())
    }

    /// Loans where `user` is lender or borrower, oldest first.
    pub fn loans_of(&self, user: UserId) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .read()?
            .loans
            .values()
            .filter(|l| l.lender == user || l.borrower == user)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.id);
        Ok(loans)
    }

    /// Repayments of one loan in the order they were made.
    pub fn repayments(&self, loan: LoanId) -> Result<Vec<LoanRepayment>> {
        Ok(self
            .read()?
            .repayments
            .iter()
            .filter(|r| r.loan_id == loan)
            .cloned()
            .collect())
    }

    pub fn listing(&self, id: ListingId) -> Result<Listing> {
        self.read()?
            .listings
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityKey::Listing(id).not_found())
    }

    /// Listings still open for purchase, oldest first.
    pub fn open_listings(&self) -> Result<Vec<Listing>> {
        let mut listings: Vec<Listing> = self
            .read()?
            .listings
            .values()
            .filter(|l| l.available && !l.sold)
            .cloned()
            .collect();
        listings.sort_by_key(|l| l.id);
        Ok(listings)
    }

    pub fn order(&self, id: OrderId) -> Result<MarketplaceOrder> {
        self.read()?
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("order", id))
    }

    /// Orders where `user` is buyer or seller, oldest first.
    pub fn orders_of(&self, user: UserId) -> Result<Vec<MarketplaceOrder>> {
        let mut orders: Vec<MarketplaceOrder> = self
            .read()?
            .orders
            .values()
            .filter(|o| o.buyer == user || o.seller == user)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.read()?
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityKey::Subscription(id).not_found())
    }

    pub fn subscriptions_of(&self, owner: UserId) -> Result<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .read()?
            .subscriptions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    /// Every subscription, for schedulers scanning for due bills.
    pub fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut subs: Vec<Subscription> =
            self.read()?.subscriptions.values().cloned().collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    pub fn pocket(&self, id: PocketId) -> Result<SavingsPocket> {
        self.read()?
            .pockets
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityKey::Pocket(id).not_found())
    }

    pub fn pockets_of(&self, owner: UserId) -> Result<Vec<SavingsPocket>> {
        let mut pockets: Vec<SavingsPocket> = self
            .read()?
            .pockets
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect();
        pockets.sort_by_key(|p| p.id);
        Ok(pockets)
    }

    /// One ledger entry, completed or scheduled.
    pub fn entry(&self, id: EntryId) -> Result<LedgerEntry> {
        self.read()?
            .ledger
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("ledger entry", id))
    }

    pub fn entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.ledger.query(query))
    }

    pub fn head_digest(&self) -> Result<String> {
        Ok(self.read()?.ledger.head_digest())
    }

    pub fn verify_chain(&self) -> Result<()> {
        self.read()?.ledger.verify_chain()
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let tables = self.read()?;
        Ok(Snapshot {
            wallets: tables.wallets.values().cloned().collect(),
            cards: tables.cards.values().cloned().collect(),
            pockets: tables.pockets.values().cloned().collect(),
            loans: tables.loans.values().cloned().collect(),
            repayments: tables.repayments.clone(),
            journal: tables.ledger.completed().to_vec(),
            head_digest: tables.ledger.head_digest(),
            chain: tables.ledger.verify_chain(),
        })
    }
}

#[cfg(test)]
mod tests {
    use campusledger_types::{BillingCycle, CardPurpose, EntryType, Money};
    use chrono::NaiveDate;

    use super::*;

    fn store() -> Store {
        Store::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let config = EngineConfig {
            lock_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Store::new(config),
            Err(LedgerError::Configuration(_))
        ));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let store = store();
        let err = store.wallet(UserId::new()).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "wallet", .. }));
        assert!(store.loan(LoanId::new()).is_err());
        assert!(store.entry(EntryId::new()).is_err());
    }

    #[test]
    fn inserted_rows_are_readable() {
        let store = store();
        let owner = UserId::new();
        let card = BudgetCard::new(owner, "Food", CardPurpose::Budget);
        let card_id = card.id;
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Wallet(Wallet::new(owner, "USD")));
        uow.insert(Row::Card(card));
        uow.commit().unwrap();

        assert_eq!(store.wallet(owner).unwrap().balance, Money::ZERO);
        assert_eq!(store.cards_of(owner).unwrap()[0].id, card_id);
    }

    #[test]
    fn duplicate_wallet_conflicts() {
        let store = store();
        let owner = UserId::new();
        for expect_ok in [true, false] {
            let mut uow = store.begin([]).unwrap();
            uow.insert(Row::Wallet(Wallet::new(owner, "USD")));
            assert_eq!(uow.commit().is_ok(), expect_ok);
        }
    }

    #[test]
    fn duplicate_active_subscription_conflicts() {
        let store = store();
        let owner = UserId::new();
        let next = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let make = |name: &str| {
            Subscription::new(owner, name, Money::from_cents(999), BillingCycle::Monthly, next)
                .unwrap()
        };
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Subscription(make("Spotify")));
        uow.commit().unwrap();

        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Subscription(make("spotify")));
        assert!(matches!(uow.commit(), Err(LedgerError::Conflict { .. })));
        assert_eq!(store.subscriptions_of(owner).unwrap().len(), 1);
    }

    #[test]
    fn reads_are_repeatable() {
        let store = store();
        let owner = UserId::new();
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Wallet(Wallet::new(owner, "USD")));
        uow.commit().unwrap();
        assert_eq!(store.wallet(owner).unwrap(), store.wallet(owner).unwrap());
    }

    #[test]
    fn snapshot_carries_chain_state() {
        let store = store();
        let owner = UserId::new();
        let mut uow = store.begin([EntityKey::Wallet(owner)]).unwrap();
        uow.insert(Row::Wallet(Wallet::new(owner, "USD")));
        uow.append(LedgerEntry::completed(owner, EntryType::Topup, Money::from_cents(1), "USD"))
            .unwrap();
        uow.commit().unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.journal.len(), 1);
        assert!(snapshot.chain.is_ok());
        assert_eq!(snapshot.head_digest, store.head_digest().unwrap());
    }
}
