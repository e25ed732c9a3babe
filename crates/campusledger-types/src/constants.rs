//! System-wide constants for the CampusLedger engine.

/// Fractional digits carried by every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Default ledger currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Default ceiling for a single operation amount, in cents (99,999,999.99).
pub const DEFAULT_MAX_AMOUNT_CENTS: i64 = 9_999_999_999;

/// Default bounded wait for a row lock before the operation fails with `Busy`.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Request-key idempotency cache size (number of request ids to remember).
pub const DEFAULT_IDEMPOTENCY_CACHE_SIZE: usize = 100_000;

/// Default savings goal for a new pocket, in cents.
pub const DEFAULT_POCKET_GOAL_CENTS: i64 = 500_000;

/// Name of the auto-provisioned reusable payment card.
pub const STANDARD_CARD_NAME: &str = "Standard Digital Card";

/// Name of the auto-provisioned single-use payment card.
pub const ONE_TIME_CARD_NAME: &str = "One-Time Card";

/// Name of the auto-provisioned subscription card.
pub const SUBSCRIPTION_CARD_NAME: &str = "My Subscriptions";

/// Budget card categories offered to students.
pub const BUDGET_CATEGORIES: &[&str] = &[
    "food",
    "groceries",
    "transport",
    "entertainment",
    "shopping",
    "education",
    "rent",
    "utilities",
    "health",
    "other",
];

/// Days of look-ahead used when listing upcoming scheduled payments.
pub const UPCOMING_WINDOW_DAYS: i64 = 30;

/// Longest horizon, in months, that recurring expected payments are generated for.
pub const MAX_RECURRENCE_MONTHS: u32 = 120;
