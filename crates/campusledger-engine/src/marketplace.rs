//! Marketplace: listings and purchases.
//!
//! A purchase resolves seller and price from the listing, then hands off to
//! [`TransferEngine::settle_escrow`], which re-checks both under the listing
//! lock before any money moves.

use std::sync::Arc;

use campusledger_store::{EntityKey, Row, Store};
use campusledger_types::{
    LedgerError, Listing, ListingId, MarketplaceOrder, Money, Result, UserId,
};

use crate::context::{OpContext, Outcome, ensure_owner, finish, validate_amount};
use crate::transfer::TransferEngine;

#[derive(Clone)]
pub struct Marketplace {
    store: Arc<Store>,
    transfers: TransferEngine,
}

impl Marketplace {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        let transfers = TransferEngine::new(Arc::clone(&store));
        Self { store, transfers }
    }

    pub fn create_listing(
        &self,
        seller: UserId,
        title: &str,
        category: Option<String>,
        price: Money,
    ) -> Result<Listing> {
        finish(
            "create_listing",
            self.create_listing_inner(seller, title, category, price),
        )
    }

    fn create_listing_inner(
        &self,
        seller: UserId,
        title: &str,
        category: Option<String>,
        price: Money,
    ) -> Result<Listing> {
        validate_amount(price, self.store.config())?;
        // Sellers must be able to receive the sale.
        self.store.wallet(seller)?;

        let listing = Listing::new(seller, title.trim(), category, price)?;
        let mut uow = self.store.begin([EntityKey::Listing(listing.id)])?;
        uow.insert(Row::Listing(listing.clone()));
        uow.commit()?;

        tracing::info!(listing = %listing.id, seller = %seller, price = %price, "Listing created");
        Ok(listing)
    }

    /// Take an unsold listing off the market. Seller only.
    ///
    /// # Errors
    /// `Forbidden` for anyone but the seller, `Conflict` once sold or
    /// already withdrawn.
    pub fn withdraw_listing(&self, seller: UserId, listing_id: ListingId) -> Result<Listing> {
        finish(
            "withdraw_listing",
            self.withdraw_listing_inner(seller, listing_id),
        )
    }

    fn withdraw_listing_inner(&self, seller: UserId, listing_id: ListingId) -> Result<Listing> {
        let mut uow = self.store.begin([EntityKey::Listing(listing_id)])?;
        let listing = uow.listing(listing_id)?;
        ensure_owner(seller, listing.seller, "listing")?;
        if listing.sold || !listing.available {
            return Err(LedgerError::conflict(format!(
                "listing {listing_id} is no longer available"
            )));
        }
        listing.available = false;
        let listing = listing.clone();
        uow.commit()?;

        tracing::info!(listing = %listing_id, "Listing withdrawn");
        Ok(listing)
    }

    /// Buy a listing at its current price.
    pub fn purchase(
        &self,
        buyer: UserId,
        listing_id: ListingId,
        ctx: &OpContext,
    ) -> Result<Outcome<MarketplaceOrder>> {
        let listing = finish("purchase", self.store.listing(listing_id))?;
        if buyer == listing.seller {
            return finish(
                "purchase",
                Err(LedgerError::SelfReference {
                    reason: "cannot buy your own listing".into(),
                }),
            );
        }
        self.transfers
            .settle_escrow(buyer, listing.seller, listing_id, listing.price, ctx)
    }

    pub fn listing(&self, id: ListingId) -> Result<Listing> {
        self.store.listing(id)
    }

    /// Available, unsold listings.
    pub fn open_listings(&self) -> Result<Vec<Listing>> {
        self.store.open_listings()
    }

    /// Orders where `user` is buyer or seller.
    pub fn orders_of(&self, user: UserId) -> Result<Vec<MarketplaceOrder>> {
        self.store.orders_of(user)
    }
}
