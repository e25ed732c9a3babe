//! User-declared expected payments (rent, tuition, phone bill).
//!
//! These are `scheduled` ledger entries of type `expected_payment`. They have
//! no balance effect; they only feed the upcoming-payments view. Operations
//! on one owner's expected payments serialize on that owner's wallet lock.

use std::sync::Arc;

use campusledger_store::{EntityKey, LedgerQuery, Store};
use campusledger_types::constants::{MAX_RECURRENCE_MONTHS, UPCOMING_WINDOW_DAYS};
use campusledger_types::{
    EntryId, EntryLink, EntryStatus, EntryType, Frequency, LedgerEntry, LedgerError, Money,
    Result, UserId,
};
use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::context::{ensure_owner, finish, validate_amount};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPayment {
    pub title: String,
    pub amount: Money,
    pub date: NaiveDate,
    pub category: Option<String>,
    pub frequency: Frequency,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct ExpectedPayments {
    store: Arc<Store>,
}

impl ExpectedPayments {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn schedule(&self, owner: UserId, payment: ExpectedPayment) -> Result<LedgerEntry> {
        finish("schedule_expected_payment", self.schedule_inner(owner, payment))
    }

    fn schedule_inner(&self, owner: UserId, payment: ExpectedPayment) -> Result<LedgerEntry> {
        validate_amount(payment.amount, self.store.config())?;
        let mut uow = self.store.begin([EntityKey::Wallet(owner)])?;
        uow.wallet(owner)?;

        let mut entry = LedgerEntry::scheduled(
            owner,
            EntryType::ExpectedPayment,
            payment.amount,
            uow.currency(),
            payment.date,
        )
        .recurring(payment.frequency)
        .described(payment.title.trim());
        if let Some(category) = payment.category {
            entry = entry.with_meta("category", category);
        }
        if let Some(notes) = payment.notes {
            entry = entry.with_meta("notes", notes);
        }
        uow.schedule(entry.clone())?;
        uow.commit()?;

        tracing::info!(entry = %entry.id, owner = %owner, due = %payment.date, "Expected payment scheduled");
        Ok(entry)
    }

    /// Delete a scheduled expected payment.
    ///
    /// # Errors
    /// `NotFound` for an unknown or already removed entry, `Forbidden` for
    /// another user's entry, for completed entries and for subscription
    /// bills (those follow their subscription).
    pub fn remove(&self, actor: UserId, id: EntryId) -> Result<LedgerEntry> {
        finish("remove_expected_payment", self.remove_inner(actor, id))
    }

    fn remove_inner(&self, actor: UserId, id: EntryId) -> Result<LedgerEntry> {
        let entry = self.expected_entry(actor, id)?;
        let mut uow = self.store.begin([EntityKey::Wallet(actor)])?;
        uow.unschedule(id);
        uow.commit()?;

        tracing::info!(entry = %id, owner = %actor, "Expected payment removed");
        Ok(entry)
    }

    /// Materialize the next `months` worth of occurrences of a recurring
    /// expected payment. Dates that already carry an entry with the same
    /// description are skipped, so calling this twice adds nothing new.
    /// One-time payments produce nothing.
    ///
    /// # Errors
    /// `InvalidInput` when `months` exceeds the generation horizon.
    pub fn generate_recurring(
        &self,
        actor: UserId,
        template: EntryId,
        months: u32,
    ) -> Result<Vec<LedgerEntry>> {
        finish(
            "generate_recurring",
            self.generate_recurring_inner(actor, template, months),
        )
    }

    fn generate_recurring_inner(
        &self,
        actor: UserId,
        template_id: EntryId,
        months: u32,
    ) -> Result<Vec<LedgerEntry>> {
        if months > MAX_RECURRENCE_MONTHS {
            return Err(LedgerError::invalid_input(format!(
                "cannot generate more than {MAX_RECURRENCE_MONTHS} months ahead, got {months}"
            )));
        }
        let template = self.expected_entry(actor, template_id)?;
        let base = template
            .due_date()
            .ok_or_else(|| LedgerError::Internal(format!("scheduled entry {template_id} has no due date")))?;
        let dates = occurrences(template.frequency.unwrap_or(Frequency::OneTime), base, months);
        if dates.is_empty() {
            return Ok(Vec::new());
        }

        let mut uow = self.store.begin([EntityKey::Wallet(actor)])?;
        let taken: Vec<NaiveDate> = self
            .store
            .entries(
                &LedgerQuery::for_owner(actor)
                    .of_type(EntryType::ExpectedPayment)
                    .with_status(EntryStatus::Scheduled),
            )?
            .into_iter()
            .filter(|e| e.description == template.description)
            .filter_map(|e| e.due_date())
            .collect();

        let mut created = Vec::new();
        for date in dates.into_iter().filter(|d| !taken.contains(d)) {
            let mut entry = LedgerEntry::scheduled(
                actor,
                EntryType::ExpectedPayment,
                template.amount,
                &template.currency,
                date,
            )
            .linked(EntryLink::Recurrence {
                template: template_id,
            })
            .with_metadata(&template.metadata);
            entry.frequency = template.frequency;
            entry.description.clone_from(&template.description);
            uow.schedule(entry.clone())?;
            created.push(entry);
        }
        uow.commit()?;

        tracing::info!(template = %template_id, months, created = created.len(), "Recurring payments generated");
        Ok(created)
    }

    /// Every scheduled entry of `owner` (expected payments and subscription
    /// bills) due within the upcoming window starting at `today`.
    pub fn upcoming(&self, owner: UserId, today: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let until = today
            .checked_add_days(Days::new(UPCOMING_WINDOW_DAYS.unsigned_abs()))
            .unwrap_or(NaiveDate::MAX);
        Ok(self
            .store
            .entries(&LedgerQuery::for_owner(owner).with_status(EntryStatus::Scheduled))?
            .into_iter()
            .filter(|e| e.due_date().is_some_and(|due| today <= due && due <= until))
            .collect())
    }

    fn expected_entry(&self, actor: UserId, id: EntryId) -> Result<LedgerEntry> {
        let entry = self.store.entry(id)?;
        ensure_owner(actor, entry.owner, "ledger entry")?;
        if entry.status == EntryStatus::Completed {
            return Err(LedgerError::forbidden(format!(
                "entry {id} is completed and cannot change"
            )));
        }
        if entry.entry_type != EntryType::ExpectedPayment {
            return Err(LedgerError::forbidden(format!(
                "entry {id} is a {} and follows its subscription",
                entry.entry_type
            )));
        }
        Ok(entry)
    }
}

/// Dates after `base` covered by `months` months of `frequency`.
fn occurrences(frequency: Frequency, base: NaiveDate, months: u32) -> Vec<NaiveDate> {
    match frequency {
        Frequency::OneTime => Vec::new(),
        Frequency::Monthly => (1..=months)
            .filter_map(|i| base.checked_add_months(Months::new(i)))
            .collect(),
        Frequency::Weekly => {
            let Some(end) = base.checked_add_months(Months::new(months)) else {
                return Vec::new();
            };
            std::iter::successors(base.checked_add_days(Days::new(7)), |d| {
                d.checked_add_days(Days::new(7))
            })
            .take_while(|d| *d <= end)
            .collect()
        }
    }
}
