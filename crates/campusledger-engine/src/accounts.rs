//! Wallet accounts: opening, top-ups, freezing, history.
//!
//! A top-up is the only way money enters the system; everything else moves
//! money between holders or out through payments.

use std::sync::Arc;

use campusledger_store::{EntityKey, LedgerQuery, Row, Store};
use campusledger_types::{EntryType, LedgerEntry, Money, Result, UserId, Wallet};

use crate::context::{OpContext, Outcome, finish, validate_amount};

#[derive(Clone)]
pub struct Accounts {
    store: Arc<Store>,
}

impl Accounts {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create the wallet of a new user.
    ///
    /// # Errors
    /// `Conflict` if the user already has a wallet.
    pub fn open_wallet(&self, owner: UserId) -> Result<Wallet> {
        finish("open_wallet", self.open_wallet_inner(owner))
    }

    fn open_wallet_inner(&self, owner: UserId) -> Result<Wallet> {
        let wallet = Wallet::new(owner, self.store.config().currency.clone());
        let mut uow = self.store.begin([EntityKey::Wallet(owner)])?;
        uow.insert(Row::Wallet(wallet.clone()));
        uow.commit()?;
        tracing::info!(owner = %owner, "Wallet opened");
        Ok(wallet)
    }

    pub fn wallet(&self, owner: UserId) -> Result<Wallet> {
        self.store.wallet(owner)
    }

    /// Credit `amount` from an external funding source (`card`, `bank`, ...).
    pub fn top_up(
        &self,
        owner: UserId,
        amount: Money,
        method: &str,
        ctx: &OpContext,
    ) -> Result<Outcome<Wallet>> {
        finish("top_up", self.top_up_inner(owner, amount, method, ctx))
    }

    fn top_up_inner(
        &self,
        owner: UserId,
        amount: Money,
        method: &str,
        ctx: &OpContext,
    ) -> Result<Outcome<Wallet>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.store.begin([EntityKey::Wallet(owner)])?;
        uow.claim_request(ctx.request_id);

        let wallet = uow.wallet(owner)?;
        wallet.credit(amount);
        let wallet = wallet.clone();

        let entry = LedgerEntry::completed(owner, EntryType::Topup, amount, uow.currency())
            .described(format!("Wallet top-up via {method}"))
            .with_meta("method", method);
        uow.append(ctx.decorate(entry))?;
        let receipt = uow.commit()?;

        tracing::info!(owner = %owner, amount = %amount, method, "Wallet topped up");
        Ok(Outcome::new(wallet.clone(), vec![wallet], receipt))
    }

    pub fn freeze_wallet(&self, owner: UserId) -> Result<Wallet> {
        finish("freeze_wallet", self.set_frozen(owner, true))
    }

    pub fn unfreeze_wallet(&self, owner: UserId) -> Result<Wallet> {
        finish("unfreeze_wallet", self.set_frozen(owner, false))
    }

    fn set_frozen(&self, owner: UserId, frozen: bool) -> Result<Wallet> {
        let mut uow = self.store.begin([EntityKey::Wallet(owner)])?;
        let wallet = uow.wallet(owner)?;
        wallet.frozen = frozen;
        let wallet = wallet.clone();
        uow.commit()?;
        tracing::info!(owner = %owner, frozen, "Wallet freeze state changed");
        Ok(wallet)
    }

    /// Most recent `limit` ledger entries of `owner`, completed and scheduled.
    pub fn history(&self, owner: UserId, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.store
            .entries(&LedgerQuery::for_owner(owner).limit(limit))
    }
}
