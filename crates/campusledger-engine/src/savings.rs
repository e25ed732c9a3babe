//! Savings pockets funded from the owner's wallet.
//!
//! Pockets hold real money. Deposits and withdrawals lock the pocket first,
//! then the wallet.

use std::sync::Arc;

use campusledger_store::{EntityKey, Row, Store, UnitOfWork};
use campusledger_types::constants::DEFAULT_POCKET_GOAL_CENTS;
use campusledger_types::{
    EntryLink, EntryType, LedgerEntry, Money, PocketId, Result, SavingsPocket, UserId,
};
use serde::{Deserialize, Serialize};

use crate::context::{OpContext, Outcome, ensure_owner, finish, validate_amount};

/// Why money left a pocket early. Recorded in the entry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emergency {
    pub category: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct SavingsEngine {
    store: Arc<Store>,
}

impl SavingsEngine {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Open an empty pocket. `goal` defaults to 5,000.00.
    pub fn open_pocket(
        &self,
        owner: UserId,
        name: &str,
        goal: Option<Money>,
    ) -> Result<SavingsPocket> {
        finish("open_pocket", self.open_pocket_inner(owner, name, goal))
    }

    fn open_pocket_inner(
        &self,
        owner: UserId,
        name: &str,
        goal: Option<Money>,
    ) -> Result<SavingsPocket> {
        let goal = goal.unwrap_or(Money::from_cents(DEFAULT_POCKET_GOAL_CENTS));
        validate_amount(goal, self.store.config())?;
        self.store.wallet(owner)?;

        let pocket = SavingsPocket::new(owner, name.trim(), goal);
        let mut uow = self.store.begin([EntityKey::Pocket(pocket.id)])?;
        uow.insert(Row::Pocket(pocket.clone()));
        uow.commit()?;

        tracing::info!(pocket = %pocket.id, owner = %owner, goal = %goal, "Savings pocket opened");
        Ok(pocket)
    }

    /// Wallet to pocket.
    pub fn deposit(
        &self,
        actor: UserId,
        pocket: PocketId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<SavingsPocket>> {
        finish("savings_deposit", self.deposit_inner(actor, pocket, amount, ctx))
    }

    fn deposit_inner(
        &self,
        actor: UserId,
        pocket_id: PocketId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<SavingsPocket>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.lock(actor, pocket_id)?;
        uow.claim_request(ctx.request_id);

        uow.wallet(actor)?.debit(amount)?;
        let pocket = uow.pocket(pocket_id)?;
        pocket.deposit(amount);
        let name = pocket.name.clone();
        let entry = LedgerEntry::completed(actor, EntryType::SavingsDeposit, amount, uow.currency())
            .linked(EntryLink::Pocket { pocket: pocket_id })
            .described(format!("Saved to {name}"));
        uow.append(ctx.decorate(entry))?;

        let pocket = uow.pocket(pocket_id)?.clone();
        let wallet = uow.wallet(actor)?.clone();
        let receipt = uow.commit()?;
        tracing::info!(pocket = %pocket_id, amount = %amount, balance = %pocket.balance, "Savings deposited");
        Ok(Outcome::new(pocket, vec![wallet], receipt))
    }

    /// Pocket to wallet.
    ///
    /// # Errors
    /// `Forbidden` while the pocket is locked, `InsufficientFunds` when the
    /// pocket holds less than `amount`.
    pub fn withdraw(
        &self,
        actor: UserId,
        pocket: PocketId,
        amount: Money,
        emergency: Option<Emergency>,
        ctx: &OpContext,
    ) -> Result<Outcome<SavingsPocket>> {
        finish(
            "savings_withdraw",
            self.withdraw_inner(actor, pocket, amount, emergency, ctx),
        )
    }

    fn withdraw_inner(
        &self,
        actor: UserId,
        pocket_id: PocketId,
        amount: Money,
        emergency: Option<Emergency>,
        ctx: &OpContext,
    ) -> Result<Outcome<SavingsPocket>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.lock(actor, pocket_id)?;
        uow.claim_request(ctx.request_id);

        let pocket = uow.pocket(pocket_id)?;
        pocket.withdraw(amount)?;
        let name = pocket.name.clone();
        uow.wallet(actor)?.credit(amount);

        let mut entry =
            LedgerEntry::completed(actor, EntryType::SavingsWithdrawal, amount, uow.currency())
                .linked(EntryLink::Pocket { pocket: pocket_id })
                .described(format!("Withdrawn from {name}"));
        if let Some(emergency) = &emergency {
            entry = entry
                .with_meta("emergency", true)
                .with_meta("emergency_category", emergency.category.as_str())
                .with_meta("emergency_reason", emergency.reason.as_str());
        }
        uow.append(ctx.decorate(entry))?;

        let pocket = uow.pocket(pocket_id)?.clone();
        let wallet = uow.wallet(actor)?.clone();
        let receipt = uow.commit()?;
        tracing::info!(
            pocket = %pocket_id,
            amount = %amount,
            emergency = emergency.is_some(),
            "Savings withdrawn"
        );
        Ok(Outcome::new(pocket, vec![wallet], receipt))
    }

    pub fn lock_pocket(&self, actor: UserId, pocket: PocketId) -> Result<SavingsPocket> {
        finish("lock_pocket", self.set_locked(actor, pocket, true))
    }

    pub fn unlock_pocket(&self, actor: UserId, pocket: PocketId) -> Result<SavingsPocket> {
        finish("unlock_pocket", self.set_locked(actor, pocket, false))
    }

    fn set_locked(&self, actor: UserId, pocket_id: PocketId, locked: bool) -> Result<SavingsPocket> {
        let mut uow = self.store.begin([EntityKey::Pocket(pocket_id)])?;
        let pocket = uow.pocket(pocket_id)?;
        ensure_owner(actor, pocket.owner, "savings pocket")?;
        pocket.locked = locked;
        pocket.updated_at = chrono::Utc::now();
        let pocket = pocket.clone();
        uow.commit()?;
        tracing::info!(pocket = %pocket_id, locked, "Savings pocket lock toggled");
        Ok(pocket)
    }

    pub fn pocket(&self, id: PocketId) -> Result<SavingsPocket> {
        self.store.pocket(id)
    }

    pub fn pockets_of(&self, owner: UserId) -> Result<Vec<SavingsPocket>> {
        self.store.pockets_of(owner)
    }

    /// Total held across the owner's pockets.
    pub fn total_saved(&self, owner: UserId) -> Result<Money> {
        Ok(self.store.pockets_of(owner)?.iter().map(|p| p.balance).sum())
    }

    fn lock(&self, actor: UserId, pocket_id: PocketId) -> Result<UnitOfWork<'_>> {
        ensure_owner(actor, self.store.pocket(pocket_id)?.owner, "savings pocket")?;
        self.store
            .begin([EntityKey::Pocket(pocket_id), EntityKey::Wallet(actor)])
    }
}

#[cfg(test)]
mod tests {
    use campusledger_types::{EngineConfig, LedgerError, Wallet};

    use super::*;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn savings(owner: UserId, balance: i64) -> (Arc<Store>, SavingsEngine) {
        let store = Arc::new(Store::new(EngineConfig::default()).unwrap());
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Wallet(Wallet::dummy_funded(owner, cents(balance))));
        uow.commit().unwrap();
        (Arc::clone(&store), SavingsEngine::new(store))
    }

    #[test]
    fn deposit_then_emergency_withdrawal() {
        let owner = UserId::new();
        let (store, savings) = savings(owner, 10_000);
        let pocket = savings.open_pocket(owner, "Laptop", None).unwrap();
        assert_eq!(pocket.goal, cents(500_000));
        let ctx = OpContext::new();

        savings.deposit(owner, pocket.id, cents(6_000), &ctx).unwrap();
        assert_eq!(store.wallet(owner).unwrap().balance, cents(4_000));

        let emergency = Emergency {
            category: "medical".into(),
            reason: "dentist".into(),
        };
        let outcome = savings
            .withdraw(owner, pocket.id, cents(1_000), Some(emergency), &ctx)
            .unwrap();
        assert_eq!(outcome.value.balance, cents(5_000));
        assert_eq!(outcome.entries[0].metadata["emergency_reason"], "dentist");
        assert_eq!(store.wallet(owner).unwrap().balance, cents(5_000));
        assert_eq!(savings.total_saved(owner).unwrap(), cents(5_000));
    }

    #[test]
    fn locked_pocket_refuses_withdrawals() {
        let owner = UserId::new();
        let (store, savings) = savings(owner, 10_000);
        let pocket = savings.open_pocket(owner, "Trip", Some(cents(50_000))).unwrap();
        let ctx = OpContext::new();
        savings.deposit(owner, pocket.id, cents(2_000), &ctx).unwrap();
        savings.lock_pocket(owner, pocket.id).unwrap();

        assert!(matches!(
            savings.withdraw(owner, pocket.id, cents(100), None, &ctx),
            Err(LedgerError::Forbidden { .. })
        ));
        // Deposits still work while locked.
        savings.deposit(owner, pocket.id, cents(100), &ctx).unwrap();
        savings.unlock_pocket(owner, pocket.id).unwrap();
        assert!(matches!(
            savings.withdraw(owner, pocket.id, cents(5_000), None, &ctx),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(store.pocket(pocket.id).unwrap().balance, cents(2_100));
    }

    #[test]
    fn pockets_are_owner_only() {
        let (owner, other) = (UserId::new(), UserId::new());
        let (_, savings) = savings(owner, 10_000);
        let pocket = savings.open_pocket(owner, "Car", None).unwrap();
        assert!(matches!(
            savings.deposit(other, pocket.id, cents(100), &OpContext::new()),
            Err(LedgerError::Forbidden { .. })
        ));
        assert!(matches!(
            savings.lock_pocket(other, pocket.id),
            Err(LedgerError::Forbidden { .. })
        ));
    }
}
