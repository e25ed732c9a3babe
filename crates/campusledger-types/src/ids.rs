//! Globally unique identifiers used throughout CampusLedger.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting. The
//! total order on IDs is what the lock coordinator sorts by, so every ID
//! type derives `Ord`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Build an ID from a small integer. Handy for fixtures where the
            /// relative order of IDs matters.
            #[must_use]
            pub fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Account holders
// ---------------------------------------------------------------------------

entity_id! {
    /// Unique identifier for a user account. A user owns exactly one wallet,
    /// so wallets are keyed by `UserId` as well.
    UserId
}

entity_id! {
    /// Identifier of a payment, budget or subscription card.
    CardId
}

entity_id! {
    /// Identifier of a savings pocket.
    PocketId
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

entity_id! {
    /// Identifier of a peer loan.
    LoanId
}

entity_id! {
    /// Identifier of one repayment event on a loan.
    RepaymentId
}

// ---------------------------------------------------------------------------
// Marketplace
// ---------------------------------------------------------------------------

entity_id! {
    /// Identifier of a marketplace listing.
    ListingId
}

entity_id! {
    /// Identifier of a settled marketplace order.
    OrderId
}

// ---------------------------------------------------------------------------
// Subscriptions, ledger, requests
// ---------------------------------------------------------------------------

entity_id! {
    /// Identifier of a recurring subscription.
    SubscriptionId
}

entity_id! {
    /// Identifier of a ledger entry (completed or scheduled).
    EntryId
}

entity_id! {
    /// Caller-supplied request key. A request key commits at most once.
    RequestId
}
