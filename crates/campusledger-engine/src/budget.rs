//! Budget card engine.
//!
//! Budget cards hold money carved out of the owner's wallet; payment cards
//! debit the wallet directly. Locking is always card first, then wallet,
//! which is what `EntityKey` ordering yields.
//!
//! Flows:
//! 1. `allocate`  wallet -> card allocation       (`budget_allocation`)
//! 2. `spend`     card allocation -> merchant     (`budget_expense`, card lock only)
//! 3. `withdraw`  card allocation -> wallet       (`budget_withdrawal`)
//! 4. `pay`       wallet -> merchant via card     (`card_payment`)

use std::sync::Arc;

use campusledger_store::{EntityKey, Row, Store, UnitOfWork};
use campusledger_types::constants::{
    BUDGET_CATEGORIES, ONE_TIME_CARD_NAME, STANDARD_CARD_NAME, SUBSCRIPTION_CARD_NAME,
};
use campusledger_types::{
    BudgetCard, CardId, CardKind, CardPurpose, EntryType, LedgerEntry, LedgerError, Money,
    Result, UserId, Wallet,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::{OpContext, Outcome, ensure_owner, finish, validate_amount};

/// Totals over a user's budget-purpose cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub cards: usize,
    pub total_allocated: Money,
    pub total_spent: Money,
    pub total_remaining: Money,
    /// Share of the allocation already spent, in percent with two decimals.
    pub spent_percentage: Decimal,
}

/// The cards every user gets on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultCards {
    pub standard: BudgetCard,
    pub one_time: BudgetCard,
    pub subscriptions: BudgetCard,
}

#[derive(Clone)]
pub struct BudgetEngine {
    store: Arc<Store>,
}

impl BudgetEngine {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Card lifecycle
    // =========================================================================

    /// Create a budget card for one of the fixed spending categories.
    pub fn create_budget_card(
        &self,
        owner: UserId,
        name: &str,
        category: &str,
        monthly_limit: Option<Money>,
    ) -> Result<BudgetCard> {
        finish(
            "create_budget_card",
            self.create_budget_card_inner(owner, name, category, monthly_limit),
        )
    }

    fn create_budget_card_inner(
        &self,
        owner: UserId,
        name: &str,
        category: &str,
        monthly_limit: Option<Money>,
    ) -> Result<BudgetCard> {
        let category = category.trim().to_lowercase();
        if !BUDGET_CATEGORIES.contains(&category.as_str()) {
            return Err(LedgerError::invalid_input(format!(
                "unknown budget category {category:?}"
            )));
        }
        if let Some(limit) = monthly_limit {
            validate_amount(limit, self.store.config())?;
        }
        let mut card = BudgetCard::new(owner, name.trim(), CardPurpose::Budget);
        card.category = Some(category);
        card.monthly_limit = monthly_limit;
        self.insert_card(card)
    }

    pub fn create_payment_card(
        &self,
        owner: UserId,
        name: &str,
        kind: CardKind,
        spending_limit: Option<Money>,
    ) -> Result<BudgetCard> {
        finish(
            "create_payment_card",
            self.create_payment_card_inner(owner, name, kind, spending_limit),
        )
    }

    fn create_payment_card_inner(
        &self,
        owner: UserId,
        name: &str,
        kind: CardKind,
        spending_limit: Option<Money>,
    ) -> Result<BudgetCard> {
        if let Some(limit) = spending_limit {
            validate_amount(limit, self.store.config())?;
        }
        let mut card = BudgetCard::new(owner, name.trim(), CardPurpose::Payment);
        card.kind = kind;
        card.spending_limit = spending_limit;
        self.insert_card(card)
    }

    /// Provision the standard, one-time and subscription cards, reusing any
    /// the owner already has (matched by name and purpose).
    pub fn ensure_default_cards(&self, owner: UserId) -> Result<DefaultCards> {
        finish(
            "ensure_default_cards",
            self.ensure_default_cards_inner(owner),
        )
    }

    fn ensure_default_cards_inner(&self, owner: UserId) -> Result<DefaultCards> {
        self.store.wallet(owner)?;
        // The owner's wallet lock serializes provisioning; the card list is
        // only read once it is held.
        let mut uow = self.store.begin([EntityKey::Wallet(owner)])?;
        let existing = self.store.cards_of(owner)?;
        let find_or_new = |name: &str, purpose: CardPurpose, kind: CardKind| {
            existing
                .iter()
                .find(|c| c.name == name && c.purpose == purpose)
                .cloned()
                .map_or_else(
                    || {
                        let mut card = BudgetCard::new(owner, name, purpose);
                        card.kind = kind;
                        (card, true)
                    },
                    |card| (card, false),
                )
        };
        let (standard, new_standard) =
            find_or_new(STANDARD_CARD_NAME, CardPurpose::Payment, CardKind::Standard);
        let (one_time, new_one_time) =
            find_or_new(ONE_TIME_CARD_NAME, CardPurpose::Payment, CardKind::OneTime);
        let (subscriptions, new_subscriptions) = find_or_new(
            SUBSCRIPTION_CARD_NAME,
            CardPurpose::Subscription,
            CardKind::Standard,
        );

        let mut created = 0;
        for (card, fresh) in [
            (&standard, new_standard),
            (&one_time, new_one_time),
            (&subscriptions, new_subscriptions),
        ] {
            if fresh {
                uow.insert(Row::Card(card.clone()));
                created += 1;
            }
        }
        if created > 0 {
            uow.commit()?;
            tracing::info!(owner = %owner, created, "Default cards provisioned");
        }

        Ok(DefaultCards {
            standard,
            one_time,
            subscriptions,
        })
    }

    pub fn freeze_card(&self, actor: UserId, card: CardId) -> Result<BudgetCard> {
        finish("freeze_card", self.set_frozen(actor, card, true))
    }

    pub fn unfreeze_card(&self, actor: UserId, card: CardId) -> Result<BudgetCard> {
        finish("unfreeze_card", self.set_frozen(actor, card, false))
    }

    fn set_frozen(&self, actor: UserId, card_id: CardId, frozen: bool) -> Result<BudgetCard> {
        let mut uow = self.store.begin([EntityKey::Card(card_id)])?;
        let card = uow.card(card_id)?;
        ensure_owner(actor, card.owner, "card")?;
        card.set_frozen(frozen);
        let card = card.clone();
        uow.commit()?;
        tracing::info!(card = %card_id, frozen, "Card freeze toggled");
        Ok(card)
    }

    // =========================================================================
    // Money movements
    // =========================================================================

    /// Move `amount` from the owner's wallet into a budget card.
    ///
    /// # Errors
    /// `InvalidState` for a non-budget card, `InsufficientFunds` when the
    /// wallet is short, `Forbidden` for someone else's card.
    pub fn allocate(
        &self,
        actor: UserId,
        card: CardId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        finish("allocate", self.allocate_inner(actor, card, amount, ctx))
    }

    fn allocate_inner(
        &self,
        actor: UserId,
        card_id: CardId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.lock_card_and_wallet(actor, card_id)?;
        uow.claim_request(ctx.request_id);

        uow.card(card_id)?.allocate(amount)?;
        uow.wallet(actor)?.debit(amount)?;
        let entry = Self::card_entry(&uow, actor, card_id, EntryType::BudgetAllocation, amount);
        uow.append(ctx.decorate(entry.described("Budget allocation")))?;

        let (card, wallet) = Self::staged(&mut uow, actor, card_id)?;
        let receipt = uow.commit()?;
        tracing::info!(card = %card_id, amount = %amount, allocated = %card.allocated, "Budget allocated");
        Ok(Outcome::new(card, vec![wallet], receipt))
    }

    /// Spend from a budget card's allocation. No wallet is involved.
    ///
    /// # Errors
    /// `InsufficientBudget` / `LimitExceeded` carrying the available headroom,
    /// `Forbidden` if the card is frozen.
    pub fn spend(
        &self,
        actor: UserId,
        card: CardId,
        amount: Money,
        merchant: Option<&str>,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        finish(
            "spend",
            self.spend_inner(actor, card, amount, merchant, ctx),
        )
    }

    fn spend_inner(
        &self,
        actor: UserId,
        card_id: CardId,
        amount: Money,
        merchant: Option<&str>,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.store.begin([EntityKey::Card(card_id)])?;
        uow.claim_request(ctx.request_id);

        let card = uow.card(card_id)?;
        ensure_owner(actor, card.owner, "card")?;
        if card.frozen {
            return Err(LedgerError::forbidden(format!("card {card_id} is frozen")));
        }
        card.spend(amount)?;
        let card = card.clone();

        let mut entry = Self::card_entry(&uow, actor, card_id, EntryType::BudgetExpense, amount);
        if let Some(merchant) = merchant {
            entry = entry.described(format!("Purchase at {merchant}")).with_meta("merchant", merchant);
        }
        uow.append(ctx.decorate(entry))?;
        let receipt = uow.commit()?;

        tracing::info!(card = %card_id, amount = %amount, remaining = %card.remaining(), "Budget spent");
        Ok(Outcome::new(card, Vec::new(), receipt))
    }

    /// Return unspent allocation to the owner's wallet.
    pub fn withdraw(
        &self,
        actor: UserId,
        card: CardId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        finish("withdraw", self.withdraw_inner(actor, card, amount, ctx))
    }

    fn withdraw_inner(
        &self,
        actor: UserId,
        card_id: CardId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.lock_card_and_wallet(actor, card_id)?;
        uow.claim_request(ctx.request_id);

        uow.card(card_id)?.withdraw(amount)?;
        uow.wallet(actor)?.credit(amount);
        let entry = Self::card_entry(&uow, actor, card_id, EntryType::BudgetWithdrawal, amount);
        uow.append(ctx.decorate(entry.described("Budget withdrawal")))?;

        let (card, wallet) = Self::staged(&mut uow, actor, card_id)?;
        let receipt = uow.commit()?;
        tracing::info!(card = %card_id, amount = %amount, allocated = %card.allocated, "Budget withdrawn");
        Ok(Outcome::new(card, vec![wallet], receipt))
    }

    /// Pay a merchant from the wallet through a payment card.
    ///
    /// Checks run in this order: card purpose and frozen flag, wallet
    /// balance, then the card's spending limit.
    pub fn pay(
        &self,
        actor: UserId,
        card: CardId,
        amount: Money,
        merchant: &str,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        finish("pay", self.pay_inner(actor, card, amount, merchant, ctx))
    }

    fn pay_inner(
        &self,
        actor: UserId,
        card_id: CardId,
        amount: Money,
        merchant: &str,
        ctx: &OpContext,
    ) -> Result<Outcome<BudgetCard>> {
        validate_amount(amount, self.store.config())?;
        let mut uow = self.lock_card_and_wallet(actor, card_id)?;
        uow.claim_request(ctx.request_id);

        uow.card(card_id)?.ensure_can_pay()?;
        uow.wallet(actor)?.debit(amount)?;
        uow.card(card_id)?.record_payment(amount)?;
        let entry = Self::card_entry(&uow, actor, card_id, EntryType::CardPayment, amount)
            .described(format!("Payment to {merchant}"))
            .with_meta("merchant", merchant);
        uow.append(ctx.decorate(entry))?;

        let (card, wallet) = Self::staged(&mut uow, actor, card_id)?;
        let receipt = uow.commit()?;
        tracing::info!(card = %card_id, amount = %amount, merchant, "Card payment settled");
        Ok(Outcome::new(card, vec![wallet], receipt))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn card(&self, id: CardId) -> Result<BudgetCard> {
        self.store.card(id)
    }

    pub fn cards_of(&self, owner: UserId) -> Result<Vec<BudgetCard>> {
        self.store.cards_of(owner)
    }

    pub fn summary(&self, owner: UserId) -> Result<BudgetSummary> {
        let budgets: Vec<BudgetCard> = self
            .store
            .cards_of(owner)?
            .into_iter()
            .filter(|c| c.purpose == CardPurpose::Budget)
            .collect();
        let total_allocated: Money = budgets.iter().map(|c| c.allocated).sum();
        let total_spent: Money = budgets.iter().map(|c| c.spent).sum();
        let spent_percentage = if total_allocated.is_zero() {
            Decimal::ZERO
        } else {
            (total_spent.as_decimal() / total_allocated.as_decimal() * Decimal::ONE_HUNDRED)
                .round_dp(2)
        };
        Ok(BudgetSummary {
            cards: budgets.len(),
            total_allocated,
            total_spent,
            total_remaining: total_allocated - total_spent,
            spent_percentage,
        })
    }

    // -------------------------------------------------------------------------

    fn insert_card(&self, card: BudgetCard) -> Result<BudgetCard> {
        self.store.wallet(card.owner)?;
        let mut uow = self.store.begin([EntityKey::Card(card.id)])?;
        uow.insert(Row::Card(card.clone()));
        uow.commit()?;
        tracing::info!(card = %card.id, owner = %card.owner, purpose = %card.purpose, "Card created");
        Ok(card)
    }

    /// The card's owner never changes, so ownership is checked before locking.
    fn lock_card_and_wallet(&self, actor: UserId, card_id: CardId) -> Result<UnitOfWork<'_>> {
        let card = self.store.card(card_id)?;
        ensure_owner(actor, card.owner, "card")?;
        self.store
            .begin([EntityKey::Card(card_id), EntityKey::Wallet(card.owner)])
    }

    fn card_entry(
        uow: &UnitOfWork<'_>,
        owner: UserId,
        card: CardId,
        entry_type: EntryType,
        amount: Money,
    ) -> LedgerEntry {
        LedgerEntry::completed(owner, entry_type, amount, uow.currency()).on_card(card)
    }

    fn staged(
        uow: &mut UnitOfWork<'_>,
        owner: UserId,
        card: CardId,
    ) -> Result<(BudgetCard, Wallet)> {
        let card = uow.card(card)?.clone();
        let wallet = uow.wallet(owner)?.clone();
        Ok((card, wallet))
    }
}
