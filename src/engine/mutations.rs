use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::booking::{validate_ref, validate_units, Booking, NewBooking};
use crate::error::RentalError;
use crate::model::*;
use crate::money::Money;
use crate::pricing::RateTier;
use crate::rental_item::{NewRentalItem, RentalItem};

use super::availability::check_availability;
use super::Engine;

/// A cart asking to hold units of an item.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub rental_item_id: RentalItemId,
    pub range: DateRange,
    pub units: u32,
    pub cart_token: Option<String>,
    pub fulfillment: FulfillmentMethod,
}

/// Changes the paid order makes to a hold at confirmation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Amendment {
    pub units: Option<u32>,
    pub fulfillment: Option<FulfillmentMethod>,
}

/// A booking created straight into CONFIRMED for an already-paid order.
#[derive(Debug, Clone)]
pub struct DirectBooking {
    pub rental_item_id: RentalItemId,
    pub range: DateRange,
    pub units: u32,
    pub order_id: String,
    pub fulfillment: FulfillmentMethod,
}

/// One rental line of a paid-order notification.
#[derive(Debug, Clone)]
pub struct PaidOrderLine {
    pub order_id: String,
    pub rental_item_id: RentalItemId,
    pub range: DateRange,
    pub units: u32,
    pub fulfillment: FulfillmentMethod,
    /// Booking id carried through checkout, when it survived.
    pub booking_ref: Option<BookingId>,
}

/// Which path settled a paid-order line.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// A booking for this order, item and window already exists; nothing was written.
    AlreadyProcessed(Booking),
    ByReference(Booking),
    DateMatch(Booking),
    Direct(Booking),
}

impl ConfirmOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            ConfirmOutcome::AlreadyProcessed(b)
            | ConfirmOutcome::ByReference(b)
            | ConfirmOutcome::DateMatch(b)
            | ConfirmOutcome::Direct(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            ConfirmOutcome::AlreadyProcessed(b)
            | ConfirmOutcome::ByReference(b)
            | ConfirmOutcome::DateMatch(b)
            | ConfirmOutcome::Direct(b) => b,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmOutcome::AlreadyProcessed(_) => "already_processed",
            ConfirmOutcome::ByReference(_) => "by_reference",
            ConfirmOutcome::DateMatch(_) => "date_match",
            ConfirmOutcome::Direct(_) => "direct",
        }
    }
}

impl Engine {
    // ── Reservations ─────────────────────────────────────────

    /// Place a cart hold after re-checking availability under the item lock.
    pub async fn create_reservation(&self, req: ReservationRequest) -> Result<Booking, RentalError> {
        if let Err(e) = validate_units(req.units) {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "invalid").increment(1);
            return Err(e.into());
        }
        let _guard = self.lock_item(req.rental_item_id).await;
        let item = self.load_item(req.rental_item_id).await?;
        let now = self.now();

        let candidates = self.bookings.find_overlapping(item.id(), &req.range).await?;
        let check = check_availability(item.quantity(), &req.range, req.units, &candidates, now);
        if !check.available {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "capacity_exceeded")
                .increment(1);
            debug!(
                "hold refused on item {}: {} requested, {} free over {}",
                item.id(),
                req.units,
                check.available_units,
                req.range
            );
            return Err(RentalError::CapacityExceeded {
                range: req.range,
                requested: req.units,
                available: check.available_units,
            });
        }

        let mut booking = Booking::reserve(
            snapshot(&item, req.range, req.units, req.fulfillment),
            req.cart_token.as_deref(),
            self.config().hold_ttl,
            now,
        )?;
        self.persist(&mut booking).await?;
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "created").increment(1);
        info!(
            "hold {} placed on item {} for {} unit(s) over {}",
            booking.id(),
            item.id(),
            booking.units(),
            booking.range()
        );
        Ok(booking)
    }

    // ── Confirmation ─────────────────────────────────────────

    /// Confirm the hold a paid order points back to.
    ///
    /// Confirming a booking that is already CONFIRMED for the same order is a
    /// no-op returning `AlreadyProcessed`. Any other non-RESERVED state is a
    /// `StateConflict`.
    pub async fn confirm_by_reference(
        &self,
        booking_id: BookingId,
        order_id: &str,
        amendment: Amendment,
    ) -> Result<ConfirmOutcome, RentalError> {
        validate_ref("order_id", order_id)?;
        let item_id = self.load_booking(booking_id).await?.rental_item_id();
        let _guard = self.lock_item(item_id).await;
        self.confirm_by_reference_locked(booking_id, order_id, amendment).await
    }

    async fn confirm_by_reference_locked(
        &self,
        booking_id: BookingId,
        order_id: &str,
        amendment: Amendment,
    ) -> Result<ConfirmOutcome, RentalError> {
        let mut booking = self.load_booking(booking_id).await?;
        // Once confirmed for this order, later transitions don't make a redelivery new work.
        if booking.status() != BookingStatus::Reserved && booking.order_id() == Some(order_id) {
            return Ok(ConfirmOutcome::AlreadyProcessed(booking));
        }
        let now = self.now();
        booking.amend(amendment.units, amendment.fulfillment, now)?;
        booking.confirm(order_id, now)?;
        self.persist(&mut booking).await?;
        info!("booking {booking_id} confirmed for order {order_id}");
        Ok(ConfirmOutcome::ByReference(booking))
    }

    /// Confirm a RESERVED booking of the item with exactly this window.
    /// `Ok(None)` means there was nothing to promote.
    pub async fn promote_by_date_match(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
        order_id: &str,
        amendment: Amendment,
    ) -> Result<Option<Booking>, RentalError> {
        validate_ref("order_id", order_id)?;
        let _guard = self.lock_item(rental_item_id).await;
        self.promote_by_date_match_locked(rental_item_id, range, order_id, amendment)
            .await
    }

    async fn promote_by_date_match_locked(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
        order_id: &str,
        amendment: Amendment,
    ) -> Result<Option<Booking>, RentalError> {
        let now = self.now();
        let mut matches: Vec<Booking> = self
            .bookings
            .find_overlapping(rental_item_id, range)
            .await?
            .into_iter()
            .filter(|b| b.status() == BookingStatus::Reserved && b.range() == *range)
            .collect();
        // live holds first, oldest first
        matches.sort_by_key(|b| (b.is_expired(now), b.created_at(), b.id()));
        let Some(mut booking) = matches.into_iter().next() else {
            return Ok(None);
        };
        booking.amend(amendment.units, amendment.fulfillment, now)?;
        booking.confirm(order_id, now)?;
        self.persist(&mut booking).await?;
        info!(
            "booking {} promoted by date match for order {order_id}",
            booking.id()
        );
        Ok(Some(booking))
    }

    /// Record an already-paid booking. Availability is not gating here; an
    /// overbooked item is logged and the booking is still written.
    pub async fn create_confirmed(&self, req: DirectBooking) -> Result<Booking, RentalError> {
        let _guard = self.lock_item(req.rental_item_id).await;
        self.create_confirmed_locked(req).await
    }

    async fn create_confirmed_locked(&self, req: DirectBooking) -> Result<Booking, RentalError> {
        let item = self.load_item(req.rental_item_id).await?;
        let now = self.now();
        let mut booking = Booking::confirmed(
            snapshot(&item, req.range, req.units, req.fulfillment),
            &req.order_id,
            now,
        )?;

        let candidates = self.bookings.find_overlapping(item.id(), &req.range).await?;
        let check = check_availability(item.quantity(), &req.range, req.units, &candidates, now);
        if !check.available {
            warn!(
                "item {} overbooked by order {}: {} requested, {} free over {}",
                item.id(),
                req.order_id,
                req.units,
                check.available_units,
                req.range
            );
        }

        self.persist(&mut booking).await?;
        info!(
            "booking {} created confirmed for order {}",
            booking.id(),
            req.order_id
        );
        Ok(booking)
    }

    /// Settle one paid-order line, safe under webhook redelivery.
    ///
    /// Order of attempts: an existing booking for the same order, item and window
    /// (in any status) short-circuits; then the carried booking reference; then a
    /// RESERVED hold with the same window; finally a direct CONFIRMED booking.
    pub async fn process_paid_order(&self, line: PaidOrderLine) -> Result<ConfirmOutcome, RentalError> {
        validate_ref("order_id", &line.order_id)?;
        validate_units(line.units)?;
        let _guard = self.lock_item(line.rental_item_id).await;

        let outcome = self.settle_paid_line(line).await?;
        metrics::counter!(crate::observability::CONFIRMATIONS_TOTAL, "path" => outcome.label()).increment(1);
        Ok(outcome)
    }

    async fn settle_paid_line(&self, line: PaidOrderLine) -> Result<ConfirmOutcome, RentalError> {
        let existing = self
            .bookings
            .find_by_order_id(&line.order_id)
            .await?
            .into_iter()
            .find(|b| b.rental_item_id() == line.rental_item_id && b.range() == line.range);
        if let Some(booking) = existing {
            debug!(
                "order {} already settled by booking {} ({})",
                line.order_id,
                booking.id(),
                booking.status()
            );
            return Ok(ConfirmOutcome::AlreadyProcessed(booking));
        }

        // an unknown fulfillment on the order keeps whatever the hold recorded
        let amendment = Amendment {
            units: Some(line.units),
            fulfillment: (line.fulfillment != FulfillmentMethod::Unknown).then_some(line.fulfillment),
        };

        if let Some(booking_id) = line.booking_ref {
            match self.bookings.find_by_id(booking_id).await? {
                Some(b) if b.rental_item_id() == line.rental_item_id => {
                    match self
                        .confirm_by_reference_locked(booking_id, &line.order_id, amendment)
                        .await
                    {
                        Ok(outcome) => return Ok(outcome),
                        Err(RentalError::StateConflict { status, .. }) => {
                            debug!("referenced booking {booking_id} is {status}, falling back");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(_) => debug!("referenced booking {booking_id} belongs to another item, falling back"),
                None => debug!("referenced booking {booking_id} not found, falling back"),
            }
        }

        if let Some(booking) = self
            .promote_by_date_match_locked(line.rental_item_id, &line.range, &line.order_id, amendment)
            .await?
        {
            return Ok(ConfirmOutcome::DateMatch(booking));
        }

        let booking = self
            .create_confirmed_locked(DirectBooking {
                rental_item_id: line.rental_item_id,
                range: line.range,
                units: line.units,
                order_id: line.order_id,
                fulfillment: line.fulfillment,
            })
            .await?;
        Ok(ConfirmOutcome::Direct(booking))
    }

    // ── Cancellation & return ────────────────────────────────

    /// Cancel every booking of an order. Bookings already CANCELLED or RETURNED
    /// are skipped; only the ones that changed are returned.
    pub async fn cancel_by_order_id(
        &self,
        order_id: &str,
        reason: Option<&str>,
    ) -> Result<Vec<Booking>, RentalError> {
        validate_ref("order_id", order_id)?;
        let mut by_item: BTreeMap<RentalItemId, Vec<BookingId>> = BTreeMap::new();
        for b in self.bookings.find_by_order_id(order_id).await? {
            by_item.entry(b.rental_item_id()).or_default().push(b.id());
        }

        let mut cancelled = Vec::new();
        for (item_id, ids) in by_item {
            let _guard = self.lock_item(item_id).await;
            let mut changed = Vec::new();
            for id in ids {
                let Some(mut booking) = self.bookings.find_by_id(id).await? else {
                    continue;
                };
                match booking.cancel(reason, self.now()) {
                    Ok(()) => changed.push(booking),
                    Err(RentalError::StateConflict { status, .. }) => {
                        debug!("skip cancel of booking {id}: already {status}");
                    }
                    Err(e) => return Err(e),
                }
            }
            self.persist_many(&mut changed).await?;
            cancelled.append(&mut changed);
        }

        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "trigger" => "order")
            .increment(cancelled.len() as u64);
        info!("order {order_id}: cancelled {} booking(s)", cancelled.len());
        Ok(cancelled)
    }

    /// Cancel the item's RESERVED holds, leaving CONFIRMED bookings for the merchant.
    pub async fn cancel_reserved_for_item(
        &self,
        rental_item_id: RentalItemId,
        reason: Option<&str>,
    ) -> Result<Vec<Booking>, RentalError> {
        let _guard = self.lock_item(rental_item_id).await;
        self.cancel_reserved_locked(rental_item_id, reason).await
    }

    async fn cancel_reserved_locked(
        &self,
        rental_item_id: RentalItemId,
        reason: Option<&str>,
    ) -> Result<Vec<Booking>, RentalError> {
        let now = self.now();
        let mut cancelled = Vec::new();
        for mut booking in self.bookings.find_by_rental_item(rental_item_id).await? {
            if booking.status() != BookingStatus::Reserved {
                continue;
            }
            booking.cancel(reason, now)?;
            cancelled.push(booking);
        }
        self.persist_many(&mut cancelled).await?;
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "trigger" => "item_removed")
            .increment(cancelled.len() as u64);
        info!(
            "item {rental_item_id}: cancelled {} reserved booking(s)",
            cancelled.len()
        );
        Ok(cancelled)
    }

    pub async fn mark_returned(&self, booking_id: BookingId) -> Result<Booking, RentalError> {
        let item_id = self.load_booking(booking_id).await?.rental_item_id();
        let _guard = self.lock_item(item_id).await;
        let mut booking = self.load_booking(booking_id).await?;
        booking.mark_returned(self.now())?;
        self.persist(&mut booking).await?;
        metrics::counter!(crate::observability::RETURNS_TOTAL).increment(1);
        info!("booking {booking_id} returned");
        Ok(booking)
    }

    // ── Expiry sweep ─────────────────────────────────────────

    /// Hard-delete RESERVED holds whose expiry has passed. Returns how many went.
    pub async fn cleanup_expired_reservations(&self) -> Result<usize, RentalError> {
        let start = std::time::Instant::now();
        let now = self.now();
        let mut by_item: BTreeMap<RentalItemId, Vec<BookingId>> = BTreeMap::new();
        for b in self.bookings.find_expired(now).await? {
            by_item.entry(b.rental_item_id()).or_default().push(b.id());
        }

        let mut purged = 0;
        for (item_id, ids) in by_item {
            let _guard = self.lock_item(item_id).await;
            // re-read under the lock; a hold may have been confirmed meanwhile
            let mut doomed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(b) = self.bookings.find_by_id(id).await?
                    && b.status() == BookingStatus::Reserved
                    && b.is_expired(now)
                {
                    doomed.push(id);
                }
            }
            purged += self.bookings.delete_many(&doomed).await?;
        }

        metrics::counter!(crate::observability::EXPIRED_PURGED_TOTAL).increment(purged as u64);
        metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        if purged > 0 {
            info!("purged {purged} expired hold(s)");
        }
        Ok(purged)
    }

    // ── Rental item configuration ────────────────────────────

    /// Create the configuration for a product. One per (shop, product).
    pub async fn configure_item(&self, new: NewRentalItem) -> Result<RentalItem, RentalError> {
        let _guard = self.lock_product(&new.shop_id, &new.product_ref).await;
        if self
            .items
            .find_by_product_ref(&new.shop_id, &new.product_ref)
            .await?
            .is_some()
        {
            return Err(RentalError::AlreadyExists {
                entity: "rental item",
                key: format!("{}/{}", new.shop_id, new.product_ref),
            });
        }
        let item = RentalItem::new(new, self.now())?;
        self.items.save(&item).await?;
        info!(
            "configured rental item {} for {}/{}",
            item.id(),
            item.shop_id(),
            item.product_ref()
        );
        Ok(item)
    }

    pub async fn update_item_pricing(
        &self,
        id: RentalItemId,
        base_price_per_day: Money,
        algorithm: PricingAlgorithm,
        tiers: Vec<RateTier>,
    ) -> Result<RentalItem, RentalError> {
        let _guard = self.lock_item(id).await;
        let mut item = self.load_item(id).await?;
        item.update_pricing(base_price_per_day, algorithm, tiers, self.now())?;
        self.items.save(&item).await?;
        Ok(item)
    }

    /// Change the unit count. Existing bookings are untouched even if that
    /// leaves the item overbooked.
    pub async fn set_item_quantity(&self, id: RentalItemId, quantity: i64) -> Result<RentalItem, RentalError> {
        let _guard = self.lock_item(id).await;
        let mut item = self.load_item(id).await?;
        item.set_quantity(quantity, self.now())?;
        self.items.save(&item).await?;
        info!("item {id} quantity set to {}", item.quantity());
        Ok(item)
    }

    pub async fn rename_item(
        &self,
        id: RentalItemId,
        name: Option<String>,
        image_url: Option<String>,
    ) -> Result<RentalItem, RentalError> {
        let _guard = self.lock_item(id).await;
        let mut item = self.load_item(id).await?;
        item.rename(name, image_url, self.now())?;
        self.items.save(&item).await?;
        Ok(item)
    }

    /// The product was deleted upstream: cancel its holds and drop its configuration.
    /// CONFIRMED bookings stay for the merchant to resolve.
    pub async fn remove_item(&self, id: RentalItemId) -> Result<Vec<Booking>, RentalError> {
        let guard = self.lock_item(id).await;
        self.load_item(id).await?;
        let cancelled = self
            .cancel_reserved_locked(id, Some("rental item removed"))
            .await?;
        self.items.delete(id).await?;
        drop(guard);
        self.forget_item_lock(&id);
        self.notify.remove(&id);
        info!("removed rental item {id}");
        Ok(cancelled)
    }
}

/// Booking fields copied from the item at creation time.
fn snapshot(item: &RentalItem, range: DateRange, units: u32, fulfillment: FulfillmentMethod) -> NewBooking {
    NewBooking {
        rental_item_id: item.id(),
        shop_id: item.shop_id().to_string(),
        product_ref: item.product_ref().to_string(),
        range,
        units,
        fulfillment,
    }
}
