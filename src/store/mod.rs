//! Storage capabilities the engine is written against, plus the in-process
//! implementation used by the sweeper binary and the tests.

mod cache;
mod memory;
mod wal;

pub use cache::CachedItemStore;
pub use memory::InMemoryStore;
pub use wal::{StoreRecord, Wal};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::booking::Booking;
use crate::model::{BookingId, DateRange, RentalItemId};
use crate::rental_item::RentalItem;

/// Opaque persistence failure. The engine never interprets these, it only propagates.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(String),
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            StoreError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Each call is atomic for the booking(s) it touches; nothing spans aggregates.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// Every booking of the item whose range overlaps `range`, in any status.
    async fn find_overlapping(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn find_by_rental_item(&self, rental_item_id: RentalItemId) -> Result<Vec<Booking>, StoreError>;

    /// RESERVED bookings whose `expires_at` is strictly before `as_of`.
    async fn find_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    async fn save(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn save_many(&self, bookings: &[Booking]) -> Result<(), StoreError> {
        for booking in bookings {
            self.save(booking).await?;
        }
        Ok(())
    }

    /// Returns false if nothing was stored under `id`.
    async fn delete(&self, id: BookingId) -> Result<bool, StoreError>;

    async fn delete_many(&self, ids: &[BookingId]) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(*id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
pub trait RentalItemStore: Send + Sync {
    async fn find_by_id(&self, id: RentalItemId) -> Result<Option<RentalItem>, StoreError>;

    async fn find_by_product_ref(
        &self,
        shop_id: &str,
        product_ref: &str,
    ) -> Result<Option<RentalItem>, StoreError>;

    async fn save(&self, item: &RentalItem) -> Result<(), StoreError>;

    async fn delete(&self, id: RentalItemId) -> Result<bool, StoreError>;
}

/// Lets a shared store sit under a `CachedItemStore`.
#[async_trait]
impl<T: RentalItemStore + ?Sized> RentalItemStore for Arc<T> {
    async fn find_by_id(&self, id: RentalItemId) -> Result<Option<RentalItem>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_product_ref(
        &self,
        shop_id: &str,
        product_ref: &str,
    ) -> Result<Option<RentalItem>, StoreError> {
        (**self).find_by_product_ref(shop_id, product_ref).await
    }

    async fn save(&self, item: &RentalItem) -> Result<(), StoreError> {
        (**self).save(item).await
    }

    async fn delete(&self, id: RentalItemId) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }
}
