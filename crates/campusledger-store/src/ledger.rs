//! Ledger entry store.
//!
//! Completed entries go into an append-only journal. Each one extends a
//! SHA-256 chain:
//!
//! ```text
//! digest[n] = SHA256(digest[n-1] || canonical_json(entry[n]))     digest[-1] = 0^32
//! ```
//!
//! so rewriting or dropping any past entry is detectable by
//! [`LedgerStore::verify_chain`]. There is no API to modify or remove a
//! completed entry.
//!
//! Scheduled entries live beside the journal. They can be withdrawn (a
//! paused subscription, a removed bill) but never turned into completed
//! entries in place: a charge appends a new completed entry instead.

use std::collections::{BTreeMap, HashMap};

use campusledger_types::{
    CardId, EntryId, EntryLink, EntryStatus, EntryType, LedgerEntry, LedgerError, Result, UserId,
};
use sha2::{Digest, Sha256};

const GENESIS_DIGEST: [u8; 32] = [0u8; 32];

/// Filter for ledger reads. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerQuery {
    pub owner: Option<UserId>,
    pub entry_type: Option<EntryType>,
    pub status: Option<EntryStatus>,
    pub card: Option<CardId>,
    pub link: Option<EntryLink>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl LedgerQuery {
    #[must_use]
    pub fn for_owner(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn of_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn on_card(mut self, card: CardId) -> Self {
        self.card = Some(card);
        self
    }

    #[must_use]
    pub fn linked_to(mut self, link: EntryLink) -> Self {
        self.link = Some(link);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.owner.is_none_or(|owner| entry.owner == owner)
            && self.entry_type.is_none_or(|t| entry.entry_type == t)
            && self.status.is_none_or(|s| entry.status == s)
            && self.card.is_none_or(|card| entry.card_id == Some(card))
            && self.link.is_none_or(|link| entry.link == Some(link))
    }
}

/// Journal of completed entries plus the pending scheduled ones.
#[derive(Debug, Default)]
pub struct LedgerStore {
    journal: Vec<LedgerEntry>,
    digests: Vec<[u8; 32]>,
    positions: HashMap<EntryId, usize>,
    scheduled: BTreeMap<EntryId, LedgerEntry>,
}

impl LedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry with this id exists, completed or scheduled.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.positions.contains_key(id) || self.scheduled.contains_key(id)
    }

    /// Append a completed entry to the journal and extend the chain.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<()> {
        if entry.status != EntryStatus::Completed {
            return Err(LedgerError::Internal(format!(
                "entry {} appended to the journal with status {}",
                entry.id, entry.status
            )));
        }
        if self.contains(&entry.id) {
            return Err(LedgerError::conflict(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        let prev = self.digests.last().copied().unwrap_or(GENESIS_DIGEST);
        let digest = chain_digest(&prev, &entry)?;
        self.positions.insert(entry.id, self.journal.len());
        self.journal.push(entry);
        self.digests.push(digest);
        Ok(())
    }

    /// Record a future-dated entry.
    pub fn schedule(&mut self, entry: LedgerEntry) -> Result<()> {
        if entry.status != EntryStatus::Scheduled {
            return Err(LedgerError::Internal(format!(
                "entry {} scheduled with status {}",
                entry.id, entry.status
            )));
        }
        if self.contains(&entry.id) {
            return Err(LedgerError::conflict(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        self.scheduled.insert(entry.id, entry);
        Ok(())
    }

    /// Withdraw a scheduled entry. Completed entries cannot be withdrawn.
    pub fn unschedule(&mut self, id: &EntryId) -> Result<LedgerEntry> {
        if self.positions.contains_key(id) {
            return Err(LedgerError::forbidden(format!(
                "ledger entry {id} is completed and immutable"
            )));
        }
        self.scheduled
            .remove(id)
            .ok_or_else(|| LedgerError::not_found("scheduled entry", id))
    }

    pub fn get(&self, id: &EntryId) -> Option<&LedgerEntry> {
        self.positions
            .get(id)
            .map(|&pos| &self.journal[pos])
            .or_else(|| self.scheduled.get(id))
    }

    pub fn is_scheduled(&self, id: &EntryId) -> bool {
        self.scheduled.contains_key(id)
    }

    /// Completed entries in append order.
    pub fn completed(&self) -> &[LedgerEntry] {
        &self.journal
    }

    /// Scheduled entries, earliest due first.
    pub fn scheduled(&self) -> Vec<&LedgerEntry> {
        let mut pending: Vec<&LedgerEntry> = self.scheduled.values().collect();
        pending.sort_by_key(|e| (e.due_at, e.id));
        pending
    }

    /// Matching entries: completed ones in append order, then scheduled ones
    /// by due date.
    pub fn query(&self, query: &LedgerQuery) -> Vec<LedgerEntry> {
        let mut found: Vec<LedgerEntry> = self
            .journal
            .iter()
            .chain(self.scheduled())
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            if found.len() > limit {
                found.drain(..found.len() - limit);
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    /// Hex digest of the newest journal entry (all zeros when empty).
    pub fn head_digest(&self) -> String {
        hex::encode(self.digests.last().copied().unwrap_or(GENESIS_DIGEST))
    }

    /// Recompute the whole chain and compare with the stored digests.
    ///
    /// # Errors
    /// [`LedgerError::InvariantViolation`] naming the first entry whose
    /// digest does not match.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev = GENESIS_DIGEST;
        for (entry, stored) in self.journal.iter().zip(&self.digests) {
            let digest = chain_digest(&prev, entry)?;
            if &digest != stored {
                return Err(LedgerError::InvariantViolation {
                    reason: format!(
                        "ledger chain broken at entry {}: stored {}, computed {}",
                        entry.id,
                        hex::encode(stored),
                        hex::encode(digest)
                    ),
                });
            }
            prev = digest;
        }
        if self.journal.len() != self.digests.len() {
            return Err(LedgerError::InvariantViolation {
                reason: format!(
                    "ledger has {} entries but {} digests",
                    self.journal.len(),
                    self.digests.len()
                ),
            });
        }
        Ok(())
    }
}

fn chain_digest(prev: &[u8; 32], entry: &LedgerEntry) -> Result<[u8; 32]> {
    let canonical = serde_json::to_vec(entry)
        .map_err(|err| LedgerError::Internal(format!("entry {} not serializable: {err}", entry.id)))?;
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(&canonical);
    Ok(hasher.finalize().into())
}
