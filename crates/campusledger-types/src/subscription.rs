//! Recurring subscriptions and their billing cycle.
//!
//! While a subscription is `active`, exactly one `scheduled` ledger entry
//! dated at `next_billing_date` exists for it, referenced by
//! `scheduled_entry`. Pausing or cancelling removes that entry; resuming
//! writes a fresh one.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CardId, EntryId, LedgerError, Money, Result, SubscriptionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    /// Terminal.
    Cancelled,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Paused | Self::Cancelled)
                | (Self::Paused, Self::Active | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How often a subscription bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// The billing date following `date`. Calendar months clamp to the last
    /// day of shorter months (Jan 31 -> Feb 28).
    #[must_use]
    pub fn next_after(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Weekly => date.checked_add_days(Days::new(7)),
            Self::Monthly => date.checked_add_months(Months::new(1)),
            Self::Yearly => date.checked_add_months(Months::new(12)),
        }
    }

    /// Normalize a per-cycle `amount` to a monthly figure.
    #[must_use]
    pub fn monthly_equivalent(self, amount: Money) -> Money {
        let value = amount.as_decimal();
        match self {
            Self::Weekly => Money::from_decimal_rounded(value * Decimal::from(52) / Decimal::from(12)),
            Self::Monthly => amount,
            Self::Yearly => Money::from_decimal_rounded(value / Decimal::from(12)),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: UserId,
    /// Card the subscription is filed under, if any.
    pub card_id: Option<CardId>,
    pub service_name: String,
    pub category: Option<String>,
    /// Charged once per billing cycle.
    pub amount: Money,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: NaiveDate,
    pub last_billing_date: Option<NaiveDate>,
    pub total_paid: Money,
    pub status: SubscriptionStatus,
    /// The pending `scheduled` ledger entry for `next_billing_date`.
    pub scheduled_entry: Option<EntryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(
        owner: UserId,
        service_name: impl Into<String>,
        amount: Money,
        billing_cycle: BillingCycle,
        next_billing_date: NaiveDate,
    ) -> Result<Self> {
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(format!(
                "subscription cost must be positive, got {amount}"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: SubscriptionId::new(),
            owner,
            card_id: None,
            service_name: service_name.into(),
            category: None,
            amount,
            billing_cycle,
            next_billing_date,
            last_billing_date: None,
            total_paid: Money::ZERO,
            status: SubscriptionStatus::Active,
            scheduled_entry: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        })
    }

    pub fn transition(&mut self, target: SubscriptionStatus, attempted: &str) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LedgerError::invalid_state(
                "subscription",
                self.status,
                attempted,
            ));
        }
        self.status = target;
        self.updated_at = Utc::now();
        if target == SubscriptionStatus::Cancelled {
            self.cancelled_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Book one successful charge: bump totals and advance the billing date.
    pub fn record_charge(&mut self) -> Result<()> {
        if self.status != SubscriptionStatus::Active {
            return Err(LedgerError::invalid_state(
                "subscription",
                self.status,
                "charge",
            ));
        }
        let billed = self.next_billing_date;
        self.next_billing_date = self.billing_cycle.next_after(billed).ok_or_else(|| {
            LedgerError::Internal(format!("billing date overflow after {billed}"))
        })?;
        self.last_billing_date = Some(billed);
        self.total_paid += self.amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn monthly_cost(&self) -> Money {
        self.billing_cycle.monthly_equivalent(self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn cycles_advance() {
        assert_eq!(BillingCycle::Weekly.next_after(date(2026, 1, 1)), Some(date(2026, 1, 8)));
        assert_eq!(BillingCycle::Monthly.next_after(date(2026, 1, 31)), Some(date(2026, 2, 28)));
        assert_eq!(BillingCycle::Yearly.next_after(date(2026, 5, 4)), Some(date(2027, 5, 4)));
    }

    #[test]
    fn monthly_equivalents() {
        assert_eq!(
            BillingCycle::Yearly.monthly_equivalent(Money::from_cents(12_000)),
            Money::from_cents(1_000)
        );
        // 3.00 * 52 / 12 = 13.00
        assert_eq!(
            BillingCycle::Weekly.monthly_equivalent(Money::from_cents(300)),
            Money::from_cents(1_300)
        );
    }

    #[test]
    fn lifecycle_transitions() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn charge_advances_and_accumulates() {
        let mut sub = Subscription::new(
            UserId::new(),
            "Spotify",
            Money::from_cents(999),
            BillingCycle::Monthly,
            date(2026, 3, 15),
        )
        .unwrap();
        sub.record_charge().unwrap();
        sub.record_charge().unwrap();
        assert_eq!(sub.total_paid, Money::from_cents(1_998));
        assert_eq!(sub.last_billing_date, Some(date(2026, 4, 15)));
        assert_eq!(sub.next_billing_date, date(2026, 5, 15));
    }

    #[test]
    fn paused_subscription_cannot_be_charged() {
        let mut sub = Subscription::new(
            UserId::new(),
            "Netflix",
            Money::from_cents(1_549),
            BillingCycle::Monthly,
            date(2026, 3, 1),
        )
        .unwrap();
        sub.transition(SubscriptionStatus::Paused, "pause").unwrap();
        let err = sub.record_charge().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));
        assert_eq!(sub.total_paid, Money::ZERO);
    }
}
