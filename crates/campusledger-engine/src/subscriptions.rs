//! Subscription billing.
//!
//! An active subscription always owns exactly one `scheduled` ledger entry,
//! dated at its next billing date:
//!
//! 1. `subscribe` / `resume` write the scheduled entry
//! 2. `pause` / `cancel` remove it
//! 3. `charge` removes it, appends the completed `subscription_payment`,
//!    advances the billing date and schedules the next one
//!
//! Charging never retries on its own. A failed charge leaves the
//! subscription and its scheduled entry exactly as they were.

use std::sync::Arc;

use campusledger_store::{EntityKey, Row, Store};
use campusledger_types::{
    BillingCycle, CardId, EntryLink, EntryType, LedgerEntry, Money, Result, Subscription,
    SubscriptionId, SubscriptionStatus, UserId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::context::{OpContext, Outcome, ensure_owner, finish, validate_amount};

/// Parameters of a new subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub service_name: String,
    pub category: Option<String>,
    /// Charged once per cycle.
    pub amount: Money,
    /// Falls back to the configured default cycle.
    pub billing_cycle: Option<BillingCycle>,
    pub next_billing_date: NaiveDate,
    pub card_id: Option<CardId>,
}

impl NewSubscription {
    #[must_use]
    pub fn new(service_name: impl Into<String>, amount: Money, next_billing_date: NaiveDate) -> Self {
        Self {
            service_name: service_name.into(),
            category: None,
            amount,
            billing_cycle: None,
            next_billing_date,
            card_id: None,
        }
    }

    #[must_use]
    pub fn every(mut self, cycle: BillingCycle) -> Self {
        self.billing_cycle = Some(cycle);
        self
    }

    #[must_use]
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn on_card(mut self, card: CardId) -> Self {
        self.card_id = Some(card);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub active: usize,
    pub paused: usize,
    /// Sum of active subscriptions normalized to a month.
    pub total_monthly_cost: Money,
    pub total_paid: Money,
    /// The active subscription billed soonest.
    pub next_bill: Option<Subscription>,
}

#[derive(Clone)]
pub struct SubscriptionBilling {
    store: Arc<Store>,
}

impl SubscriptionBilling {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Start a subscription and schedule its first bill.
    ///
    /// # Errors
    /// `Conflict` when the owner already has an active subscription to the
    /// same service (case-insensitive), `Forbidden` for a card of another
    /// user.
    pub fn subscribe(
        &self,
        owner: UserId,
        new: NewSubscription,
        ctx: &OpContext,
    ) -> Result<Outcome<Subscription>> {
        finish("subscribe", self.subscribe_inner(owner, new, ctx))
    }

    fn subscribe_inner(
        &self,
        owner: UserId,
        new: NewSubscription,
        ctx: &OpContext,
    ) -> Result<Outcome<Subscription>> {
        validate_amount(new.amount, self.store.config())?;
        self.store.wallet(owner)?;
        if let Some(card) = new.card_id {
            ensure_owner(owner, self.store.card(card)?.owner, "card")?;
        }
        let cycle = new
            .billing_cycle
            .unwrap_or(self.store.config().default_billing_cycle);
        let mut sub = Subscription::new(
            owner,
            new.service_name.trim(),
            new.amount,
            cycle,
            new.next_billing_date,
        )?;
        sub.category = new.category;
        sub.card_id = new.card_id;

        let mut uow = self.store.begin([EntityKey::Subscription(sub.id)])?;
        uow.claim_request(ctx.request_id);
        let entry = ctx.decorate(scheduled_bill(&sub, uow.currency()));
        sub.scheduled_entry = Some(entry.id);
        uow.schedule(entry)?;
        uow.insert(Row::Subscription(sub.clone()));
        let receipt = uow.commit()?;

        tracing::info!(
            subscription = %sub.id,
            owner = %owner,
            service = %sub.service_name,
            amount = %sub.amount,
            cycle = %cycle,
            "Subscription started"
        );
        Ok(Outcome::new(sub, Vec::new(), receipt))
    }

    pub fn pause(&self, actor: UserId, id: SubscriptionId) -> Result<Outcome<Subscription>> {
        finish(
            "pause_subscription",
            self.stop(actor, id, SubscriptionStatus::Paused, "pause"),
        )
    }

    /// Terminal: a cancelled subscription cannot be resumed.
    pub fn cancel(&self, actor: UserId, id: SubscriptionId) -> Result<Outcome<Subscription>> {
        finish(
            "cancel_subscription",
            self.stop(actor, id, SubscriptionStatus::Cancelled, "cancel"),
        )
    }

    fn stop(
        &self,
        actor: UserId,
        id: SubscriptionId,
        target: SubscriptionStatus,
        attempted: &str,
    ) -> Result<Outcome<Subscription>> {
        let mut uow = self.store.begin([EntityKey::Subscription(id)])?;
        let sub = uow.subscription(id)?;
        ensure_owner(actor, sub.owner, "subscription")?;
        sub.transition(target, attempted)?;
        let pending = sub.scheduled_entry.take();
        let sub = sub.clone();
        if let Some(entry) = pending {
            uow.unschedule(entry);
        }
        let receipt = uow.commit()?;

        tracing::info!(subscription = %id, status = %sub.status, "Subscription stopped");
        Ok(Outcome::new(sub, Vec::new(), receipt))
    }

    /// Reactivate a paused subscription and schedule its next bill.
    pub fn resume(&self, actor: UserId, id: SubscriptionId) -> Result<Outcome<Subscription>> {
        finish("resume_subscription", self.resume_inner(actor, id))
    }

    fn resume_inner(&self, actor: UserId, id: SubscriptionId) -> Result<Outcome<Subscription>> {
        let mut uow = self.store.begin([EntityKey::Subscription(id)])?;
        let currency = uow.currency().to_string();
        let sub = uow.subscription(id)?;
        ensure_owner(actor, sub.owner, "subscription")?;
        sub.transition(SubscriptionStatus::Active, "resume")?;
        let entry = scheduled_bill(sub, &currency);
        sub.scheduled_entry = Some(entry.id);
        let sub = sub.clone();
        uow.schedule(entry)?;
        let receipt = uow.commit()?;

        tracing::info!(subscription = %id, next = %sub.next_billing_date, "Subscription resumed");
        Ok(Outcome::new(sub, Vec::new(), receipt))
    }

    /// Bill one cycle from the owner's wallet.
    ///
    /// # Errors
    /// `InvalidState` unless active, `InsufficientFunds` when the wallet is
    /// short (the subscription stays active and unchanged).
    pub fn charge(&self, id: SubscriptionId, ctx: &OpContext) -> Result<Outcome<Subscription>> {
        finish("charge_subscription", self.charge_inner(id, ctx))
    }

    fn charge_inner(&self, id: SubscriptionId, ctx: &OpContext) -> Result<Outcome<Subscription>> {
        let owner = self.store.subscription(id)?.owner;
        let mut uow = self
            .store
            .begin([EntityKey::Subscription(id), EntityKey::Wallet(owner)])?;
        uow.claim_request(ctx.request_id);
        let currency = uow.currency().to_string();

        let sub = uow.subscription(id)?;
        let billed = sub.next_billing_date;
        sub.record_charge()?;
        let previous = sub.scheduled_entry.take();
        let next = scheduled_bill(sub, &currency);
        sub.scheduled_entry = Some(next.id);
        let sub = sub.clone();

        uow.wallet(owner)?.debit(sub.amount)?;
        if let Some(entry) = previous {
            uow.unschedule(entry);
        }
        let mut payment = LedgerEntry::completed(owner, EntryType::SubscriptionPayment, sub.amount, &currency)
            .linked(EntryLink::Subscription { subscription: id })
            .described(format!("{} subscription", sub.service_name))
            .with_meta("billed_date", billed.to_string());
        if let Some(card) = sub.card_id {
            payment = payment.on_card(card);
        }
        uow.append(ctx.decorate(payment))?;
        uow.schedule(next)?;

        let wallet = uow.wallet(owner)?.clone();
        let receipt = uow.commit()?;
        tracing::info!(
            subscription = %id,
            amount = %sub.amount,
            billed = %billed,
            next = %sub.next_billing_date,
            "Subscription charged"
        );
        Ok(Outcome::new(sub, vec![wallet], receipt))
    }

    pub fn subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.store.subscription(id)
    }

    pub fn subscriptions_of(&self, owner: UserId) -> Result<Vec<Subscription>> {
        self.store.subscriptions_of(owner)
    }

    /// Active subscriptions billed on or before `as_of`, oldest bill first.
    pub fn due(&self, as_of: NaiveDate) -> Result<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .store
            .all_subscriptions()?
            .into_iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.next_billing_date <= as_of)
            .collect();
        due.sort_by_key(|s| (s.next_billing_date, s.id));
        Ok(due)
    }

    pub fn stats(&self, owner: UserId) -> Result<SubscriptionStats> {
        let subs = self.store.subscriptions_of(owner)?;
        let active = || subs.iter().filter(|s| s.status == SubscriptionStatus::Active);
        Ok(SubscriptionStats {
            active: active().count(),
            paused: subs
                .iter()
                .filter(|s| s.status == SubscriptionStatus::Paused)
                .count(),
            total_monthly_cost: active().map(Subscription::monthly_cost).sum(),
            total_paid: subs.iter().map(|s| s.total_paid).sum(),
            next_bill: active()
                .min_by_key(|s| (s.next_billing_date, s.id))
                .cloned(),
        })
    }
}

fn scheduled_bill(sub: &Subscription, currency: &str) -> LedgerEntry {
    let mut entry = LedgerEntry::scheduled(
        sub.owner,
        EntryType::SubscriptionPayment,
        sub.amount,
        currency,
        sub.next_billing_date,
    )
    .linked(EntryLink::Subscription {
        subscription: sub.id,
    })
    .described(format!("{} subscription", sub.service_name))
    .with_meta("billing_cycle", sub.billing_cycle.to_string());
    if let Some(card) = sub.card_id {
        entry = entry.on_card(card);
    }
    entry
}
