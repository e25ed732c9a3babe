//! Marketplace listings and the orders that settle them.
//!
//! Settlement is single-phase: the buyer's funds are released to the seller
//! at purchase time, so an order is created already `completed` with
//! `escrow_released` set, and is immutable from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, ListingId, Money, OrderId, Result, UserId};

/// An item offered for sale by a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: UserId,
    pub title: String,
    pub category: Option<String>,
    pub price: Money,
    /// Cleared when the seller withdraws the listing.
    pub available: bool,
    pub sold: bool,
    pub created_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(
        seller: UserId,
        title: impl Into<String>,
        category: Option<String>,
        price: Money,
    ) -> Result<Self> {
        if !price.is_positive() {
            return Err(LedgerError::invalid_amount(format!(
                "listing price must be positive, got {price}"
            )));
        }
        Ok(Self {
            id: ListingId::new(),
            seller,
            title: title.into(),
            category,
            price,
            available: true,
            sold: false,
            created_at: Utc::now(),
            sold_at: None,
        })
    }

    /// Check that `buyer` may buy this listing right now.
    ///
    /// # Errors
    /// [`LedgerError::SelfReference`] for the seller's own listing,
    /// [`LedgerError::Conflict`] once sold or withdrawn.
    pub fn ensure_purchasable(&self, buyer: UserId) -> Result<()> {
        if buyer == self.seller {
            return Err(LedgerError::SelfReference {
                reason: "cannot buy your own listing".into(),
            });
        }
        if self.sold || !self.available {
            return Err(LedgerError::conflict(format!(
                "listing {} is no longer available",
                self.id
            )));
        }
        Ok(())
    }

    pub fn mark_sold(&mut self) {
        self.sold = true;
        self.available = false;
        self.sold_at = Some(Utc::now());
    }
}

/// Settlement status of a marketplace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid and released to the seller in one step.
    Completed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A settled purchase of one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceOrder {
    pub id: OrderId,
    pub listing_id: ListingId,
    pub buyer: UserId,
    pub seller: UserId,
    pub amount: Money,
    pub status: OrderStatus,
    pub escrow_released: bool,
    pub created_at: DateTime<Utc>,
}

impl MarketplaceOrder {
    /// Record the settled purchase of `listing` by `buyer`.
    #[must_use]
    pub fn settled(listing: &Listing, buyer: UserId) -> Self {
        Self {
            id: OrderId::new(),
            listing_id: listing.id,
            buyer,
            seller: listing.seller,
            amount: listing.price,
            status: OrderStatus::Completed,
            escrow_released: true,
            created_at: Utc::now(),
        }
    }
}
