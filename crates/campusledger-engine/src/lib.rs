//! # campusledger-engine
//!
//! The money-movement engines, all built on one shared
//! [`campusledger_store::Store`]:
//!
//! - [`Accounts`]: wallet opening, top-ups, wallet freeze
//! - [`TransferEngine`]: wallet-to-wallet moves (transfer, escrow settlement,
//!   loan disbursement / repayment / reversal)
//! - [`Marketplace`]: listings and purchases on top of escrow settlement
//! - [`BudgetEngine`]: budget-card allocate / spend / withdraw, payment cards
//! - [`LoanBook`]: the loan state machine, driving the transfer engine
//! - [`SubscriptionBilling`] and [`ExpectedPayments`]: scheduled entries and
//!   explicit charges
//! - [`SavingsEngine`]: savings pockets
//! - [`Reconciler`]: replays the ledger and checks every balance against it
//!
//! [`Ledger`] wires them together. Every operation takes the actor, the
//! entity ids, an amount where relevant, and an [`OpContext`]; it returns
//! the updated entities and the ledger entries it created, or a typed
//! [`campusledger_types::LedgerError`].

pub mod accounts;
pub mod audit;
pub mod budget;
pub mod context;
pub mod expected;
pub mod loans;
pub mod marketplace;
pub mod savings;
pub mod subscriptions;
pub mod transfer;

use std::sync::Arc;

use campusledger_store::Store;
use campusledger_types::{EngineConfig, Result};

pub use accounts::Accounts;
pub use audit::{AuditReport, Reconciler, SupplyConservation};
pub use budget::{BudgetEngine, BudgetSummary, DefaultCards};
pub use context::{OpContext, Outcome};
pub use expected::{ExpectedPayment, ExpectedPayments};
pub use loans::{LoanBook, LoanSummary};
pub use marketplace::Marketplace;
pub use savings::{Emergency, SavingsEngine};
pub use subscriptions::{NewSubscription, SubscriptionBilling, SubscriptionStats};
pub use transfer::{Repaid, TransferEngine};

/// All engines over one shared store.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    /// # Errors
    /// `Configuration` if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Store::new(config)?),
        })
    }

    #[must_use]
    pub fn from_store(store: Arc<Store>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn accounts(&self) -> Accounts {
        Accounts::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn transfers(&self) -> TransferEngine {
        TransferEngine::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn marketplace(&self) -> Marketplace {
        Marketplace::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn budgets(&self) -> BudgetEngine {
        BudgetEngine::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn loans(&self) -> LoanBook {
        LoanBook::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionBilling {
        SubscriptionBilling::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn expected_payments(&self) -> ExpectedPayments {
        ExpectedPayments::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn savings(&self) -> SavingsEngine {
        SavingsEngine::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.store))
    }
}
