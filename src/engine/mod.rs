mod availability;
mod mutations;
mod queries;

pub use availability::{check_availability, daily_usage, AvailabilityResult, DayUsage};
pub use mutations::{Amendment, ConfirmOutcome, DirectBooking, PaidOrderLine, ReservationRequest};
pub use queries::{Calendar, ItemQuote};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::booking::Booking;
use crate::clock::Clock;
use crate::error::RentalError;
use crate::limits::DEFAULT_HOLD_TTL_MINUTES;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::rental_item::RentalItem;
use crate::store::{BookingStore, RentalItemStore};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a cart hold.
    pub hold_ttl: Duration,
    /// Purge expired holds before availability reads.
    pub sweep_before_read: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(DEFAULT_HOLD_TTL_MINUTES),
            sweep_before_read: false,
        }
    }
}

/// Booking lifecycle orchestration over injected stores.
///
/// Booking writes for one rental item are serialised through an in-process
/// async mutex. Nothing here coordinates across processes.
pub struct Engine {
    pub(super) bookings: Arc<dyn BookingStore>,
    pub(super) items: Arc<dyn RentalItemStore>,
    clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    config: EngineConfig,
    item_locks: DashMap<RentalItemId, Arc<Mutex<()>>>,
    product_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        items: Arc<dyn RentalItemStore>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            bookings,
            items,
            clock,
            notify,
            config,
            item_locks: DashMap::new(),
            product_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Acquire the write lock for one rental item and its bookings.
    pub(super) async fn lock_item(&self, id: RentalItemId) -> OwnedMutexGuard<()> {
        let lock = self
            .item_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Serialises creation of the configuration for one (shop, product).
    pub(super) async fn lock_product(&self, shop_id: &str, product_ref: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .product_locks
            .entry((shop_id.to_string(), product_ref.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub(super) fn forget_item_lock(&self, id: &RentalItemId) {
        self.item_locks.remove(id);
    }

    pub(super) async fn load_item(&self, id: RentalItemId) -> Result<RentalItem, RentalError> {
        self.items
            .find_by_id(id)
            .await?
            .ok_or_else(|| RentalError::not_found("rental item", id))
    }

    pub(super) async fn load_booking(&self, id: BookingId) -> Result<Booking, RentalError> {
        self.bookings
            .find_by_id(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))
    }

    /// Save, then publish whatever the booking buffered. Events of a failed save are dropped.
    pub(super) async fn persist(&self, booking: &mut Booking) -> Result<(), RentalError> {
        let events = booking.take_events();
        self.bookings.save(booking).await?;
        self.notify.publish(&events);
        Ok(())
    }

    pub(super) async fn persist_many(&self, bookings: &mut [Booking]) -> Result<(), RentalError> {
        if bookings.is_empty() {
            return Ok(());
        }
        let events: Vec<_> = bookings.iter_mut().flat_map(Booking::take_events).collect();
        self.bookings.save_many(bookings).await?;
        self.notify.publish(&events);
        Ok(())
    }
}
