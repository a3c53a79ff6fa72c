use tracing::warn;

use crate::booking::{validate_units, Booking};
use crate::error::RentalError;
use crate::model::*;
use crate::money::Money;
use crate::pricing::PriceQuote;
use crate::rental_item::RentalItem;

use super::availability::{check_availability, daily_usage, AvailabilityResult, DayUsage};
use super::Engine;

/// Active bookings and per-day usage of one item over a window.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub rental_item_id: RentalItemId,
    pub window: DateRange,
    pub quantity: u32,
    /// Ordered by start date.
    pub bookings: Vec<Booking>,
    pub days: Vec<DayUsage>,
}

/// Price for `units` of an item over a range.
#[derive(Debug, Clone)]
pub struct ItemQuote {
    pub per_unit: PriceQuote,
    pub units: u32,
    pub total: Money,
}

impl Engine {
    pub async fn booking(&self, id: BookingId) -> Result<Booking, RentalError> {
        self.load_booking(id).await
    }

    pub async fn bookings_for_order(&self, order_id: &str) -> Result<Vec<Booking>, RentalError> {
        Ok(self.bookings.find_by_order_id(order_id).await?)
    }

    pub async fn item(&self, id: RentalItemId) -> Result<RentalItem, RentalError> {
        self.load_item(id).await
    }

    pub async fn item_by_product(&self, shop_id: &str, product_ref: &str) -> Result<RentalItem, RentalError> {
        self.items
            .find_by_product_ref(shop_id, product_ref)
            .await?
            .ok_or_else(|| RentalError::not_found("rental item", format!("{shop_id}/{product_ref}")))
    }

    /// Evaluate a request against the stored bookings. With `sweep_before_read`
    /// set, expired holds are purged first; a failed sweep is logged and the
    /// check still runs since lapsed holds never block.
    pub async fn check_item_availability(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
        units: u32,
    ) -> Result<AvailabilityResult, RentalError> {
        validate_units(units)?;
        self.sweep_if_configured().await;
        let item = self.load_item(rental_item_id).await?;
        let candidates = self.bookings.find_overlapping(rental_item_id, range).await?;
        let result = check_availability(item.quantity(), range, units, &candidates, self.now());
        let label = if result.available { "available" } else { "unavailable" };
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL, "result" => label).increment(1);
        Ok(result)
    }

    pub async fn calendar(&self, rental_item_id: RentalItemId, window: &DateRange) -> Result<Calendar, RentalError> {
        self.sweep_if_configured().await;
        let item = self.load_item(rental_item_id).await?;
        let now = self.now();
        let mut bookings: Vec<Booking> = self
            .bookings
            .find_overlapping(rental_item_id, window)
            .await?
            .into_iter()
            .filter(|b| b.blocks(window, now))
            .collect();
        bookings.sort_by_key(|b| (b.range().start(), b.created_at(), b.id()));
        let days = daily_usage(item.quantity(), window, &bookings, now);
        Ok(Calendar {
            rental_item_id,
            window: *window,
            quantity: item.quantity(),
            bookings,
            days,
        })
    }

    pub async fn quote(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
        units: u32,
    ) -> Result<ItemQuote, RentalError> {
        validate_units(units)?;
        let item = self.load_item(rental_item_id).await?;
        let per_unit = item.quote(range)?;
        let total = per_unit.for_units(units)?;
        Ok(ItemQuote { per_unit, units, total })
    }

    async fn sweep_if_configured(&self) {
        if !self.config().sweep_before_read {
            return;
        }
        if let Err(e) = self.cleanup_expired_reservations().await {
            warn!("expired-hold sweep before read failed: {e}");
        }
    }
}
