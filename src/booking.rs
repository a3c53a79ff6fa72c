use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{RentalError, ValidationError};
use crate::limits::*;
use crate::model::*;

/// Lifecycle notifications. Flat, one variant per transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Created {
        booking_id: BookingId,
        rental_item_id: RentalItemId,
        status: BookingStatus,
        range: DateRange,
        units: u32,
        at: DateTime<Utc>,
    },
    Confirmed {
        booking_id: BookingId,
        rental_item_id: RentalItemId,
        order_id: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        booking_id: BookingId,
        rental_item_id: RentalItemId,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    Returned {
        booking_id: BookingId,
        rental_item_id: RentalItemId,
        at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> BookingId {
        match self {
            BookingEvent::Created { booking_id, .. }
            | BookingEvent::Confirmed { booking_id, .. }
            | BookingEvent::Cancelled { booking_id, .. }
            | BookingEvent::Returned { booking_id, .. } => *booking_id,
        }
    }

    pub fn rental_item_id(&self) -> RentalItemId {
        match self {
            BookingEvent::Created { rental_item_id, .. }
            | BookingEvent::Confirmed { rental_item_id, .. }
            | BookingEvent::Cancelled { rental_item_id, .. }
            | BookingEvent::Returned { rental_item_id, .. } => *rental_item_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingEvent::Created { .. } => "created",
            BookingEvent::Confirmed { .. } => "confirmed",
            BookingEvent::Cancelled { .. } => "cancelled",
            BookingEvent::Returned { .. } => "returned",
        }
    }
}

/// What a caller supplies to open a booking; item fields are snapshotted so the
/// booking outlives its rental item's configuration.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub rental_item_id: RentalItemId,
    pub shop_id: String,
    pub product_ref: String,
    pub range: DateRange,
    pub units: u32,
    pub fulfillment: FulfillmentMethod,
}

/// A reservation of `units` of one rental item over `range`.
///
/// Invariant: `expires_at` is `Some` only while `status == Reserved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    rental_item_id: RentalItemId,
    shop_id: String,
    product_ref: String,
    order_id: Option<String>,
    range: DateRange,
    units: u32,
    status: BookingStatus,
    fulfillment: FulfillmentMethod,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<BookingEvent>,
}

pub fn cart_order_id(token: &str) -> String {
    format!("{CART_ORDER_PREFIX}{token}")
}

impl Booking {
    /// Temporary hold that lapses after `ttl`.
    pub fn reserve(
        new: NewBooking,
        cart_token: Option<&str>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let order_id = match cart_token {
            Some(token) => {
                validate_ref("cart token", token)?;
                Some(cart_order_id(token))
            }
            None => None,
        };
        let expires_at = now.checked_add_signed(ttl).ok_or(ValidationError::Overflow)?;
        Self::open(new, order_id, BookingStatus::Reserved, Some(expires_at), now)
    }

    /// Server-authoritative booking for an order that is already paid.
    pub fn confirmed(new: NewBooking, order_id: &str, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        validate_ref("order_id", order_id)?;
        Self::open(new, Some(order_id.to_string()), BookingStatus::Confirmed, None, now)
    }

    fn open(
        new: NewBooking,
        order_id: Option<String>,
        status: BookingStatus,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_units(new.units)?;
        validate_ref("shop_id", &new.shop_id)?;
        validate_ref("product_ref", &new.product_ref)?;

        let mut booking = Self {
            id: Ulid::new(),
            rental_item_id: new.rental_item_id,
            shop_id: new.shop_id,
            product_ref: new.product_ref,
            order_id,
            range: new.range,
            units: new.units,
            status,
            fulfillment: new.fulfillment,
            expires_at,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        booking.events.push(BookingEvent::Created {
            booking_id: booking.id,
            rental_item_id: booking.rental_item_id,
            status,
            range: booking.range,
            units: booking.units,
            at: now,
        });
        Ok(booking)
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn id(&self) -> BookingId {
        self.id
    }

    pub fn rental_item_id(&self) -> RentalItemId {
        self.rental_item_id
    }

    pub fn shop_id(&self) -> &str {
        &self.shop_id
    }

    pub fn product_ref(&self) -> &str {
        &self.product_ref
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn units(&self) -> u32 {
        self.units
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn fulfillment(&self) -> FulfillmentMethod {
        self.fulfillment
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_cart_hold(&self) -> bool {
        self.order_id
            .as_deref()
            .is_some_and(|o| o.starts_with(CART_ORDER_PREFIX))
    }

    // ── Predicates ───────────────────────────────────────────

    /// Strictly after `expires_at`; a hold is still live at its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    /// Whether this booking currently holds inventory.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            BookingStatus::Confirmed => true,
            BookingStatus::Reserved => !self.is_expired(now),
            BookingStatus::Cancelled | BookingStatus::Returned => false,
        }
    }

    pub fn blocks(&self, range: &DateRange, now: DateTime<Utc>) -> bool {
        self.is_active(now) && self.range.overlaps(range)
    }

    // ── Transitions ──────────────────────────────────────────

    pub fn confirm(&mut self, order_id: &str, now: DateTime<Utc>) -> Result<(), RentalError> {
        if self.status != BookingStatus::Reserved {
            return Err(self.conflict("confirm"));
        }
        validate_ref("order_id", order_id)?;
        self.status = BookingStatus::Confirmed;
        self.order_id = Some(order_id.to_string());
        self.expires_at = None;
        self.updated_at = now;
        self.events.push(BookingEvent::Confirmed {
            booking_id: self.id,
            rental_item_id: self.rental_item_id,
            order_id: order_id.to_string(),
            at: now,
        });
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<&str>, now: DateTime<Utc>) -> Result<(), RentalError> {
        if self.status.is_terminal() {
            return Err(self.conflict("cancel"));
        }
        if reason.is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(ValidationError::TooLong("cancellation reason").into());
        }
        self.status = BookingStatus::Cancelled;
        self.expires_at = None;
        self.updated_at = now;
        self.events.push(BookingEvent::Cancelled {
            booking_id: self.id,
            rental_item_id: self.rental_item_id,
            reason: reason.map(str::to_string),
            at: now,
        });
        Ok(())
    }

    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> Result<(), RentalError> {
        if self.status != BookingStatus::Confirmed {
            return Err(self.conflict("return"));
        }
        self.status = BookingStatus::Returned;
        self.updated_at = now;
        self.events.push(BookingEvent::Returned {
            booking_id: self.id,
            rental_item_id: self.rental_item_id,
            at: now,
        });
        Ok(())
    }

    /// Adjust units and/or fulfillment to match the final order. Status is untouched.
    pub fn amend(
        &mut self,
        units: Option<u32>,
        fulfillment: Option<FulfillmentMethod>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if let Some(u) = units {
            validate_units(u)?;
        }
        if units.is_none() && fulfillment.is_none() {
            return Ok(());
        }
        if let Some(u) = units {
            self.units = u;
        }
        if let Some(f) = fulfillment {
            self.fulfillment = f;
        }
        self.updated_at = now;
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────

    pub fn pending_events(&self) -> &[BookingEvent] {
        &self.events
    }

    /// Drain buffered events. Call after the booking has been persisted.
    pub fn take_events(&mut self) -> Vec<BookingEvent> {
        std::mem::take(&mut self.events)
    }

    fn conflict(&self, action: &'static str) -> RentalError {
        RentalError::StateConflict {
            booking_id: self.id,
            status: self.status,
            action,
        }
    }
}

pub(crate) fn validate_units(units: u32) -> Result<(), ValidationError> {
    if units == 0 || units > MAX_UNITS_PER_BOOKING {
        return Err(ValidationError::InvalidUnits(units));
    }
    Ok(())
}

pub(crate) fn validate_ref(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.len() > MAX_REF_LEN {
        return Err(ValidationError::TooLong(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 20, 12, 0, 0).unwrap()
    }

    fn new_booking(units: u32) -> NewBooking {
        NewBooking {
            rental_item_id: Ulid::new(),
            shop_id: "shop-1".into(),
            product_ref: "gid://product/1".into(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            )
            .unwrap(),
            units,
            fulfillment: FulfillmentMethod::Unknown,
        }
    }

    fn hold() -> Booking {
        Booking::reserve(new_booking(2), Some("tok"), Duration::minutes(45), t0()).unwrap()
    }

    #[test]
    fn reserve_sets_expiry_and_cart_order() {
        let b = hold();
        assert_eq!(b.status(), BookingStatus::Reserved);
        assert_eq!(b.order_id(), Some("cart:tok"));
        assert!(b.is_cart_hold());
        assert_eq!(b.expires_at(), Some(t0() + Duration::minutes(45)));
        assert_eq!(b.pending_events().len(), 1);
        assert!(matches!(b.pending_events()[0], BookingEvent::Created { .. }));
    }

    #[test]
    fn direct_confirmed_has_no_expiry() {
        let b = Booking::confirmed(new_booking(1), "order-9", t0()).unwrap();
        assert_eq!(b.status(), BookingStatus::Confirmed);
        assert_eq!(b.expires_at(), None);
        assert!(!b.is_cart_hold());
    }

    #[test]
    fn zero_units_rejected() {
        let err = Booking::reserve(new_booking(0), None, Duration::minutes(45), t0()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidUnits(0));
    }

    #[test]
    fn hold_expiry_past_calendar_end_rejected() {
        let ttl = Duration::days(365 * 1_000_000);
        let err = Booking::reserve(new_booking(1), Some("tok"), ttl, t0()).unwrap_err();
        assert_eq!(err, ValidationError::Overflow);
    }

    #[test]
    fn empty_cart_token_rejected() {
        let err = Booking::reserve(new_booking(1), Some("  "), Duration::minutes(45), t0()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyField("cart token"));
    }

    #[test]
    fn confirm_clears_expiry_and_sets_order() {
        let mut b = hold();
        b.take_events();
        b.confirm("order-1", t0()).unwrap();
        assert_eq!(b.status(), BookingStatus::Confirmed);
        assert_eq!(b.expires_at(), None);
        assert_eq!(b.order_id(), Some("order-1"));
        let events = b.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BookingEvent::Confirmed { order_id, .. } if order_id == "order-1"));
    }

    #[test]
    fn confirm_twice_is_state_conflict() {
        let mut b = hold();
        b.confirm("order-1", t0()).unwrap();
        let err = b.confirm("order-1", t0()).unwrap_err();
        assert!(matches!(
            err,
            RentalError::StateConflict {
                status: BookingStatus::Confirmed,
                action: "confirm",
                ..
            }
        ));
    }

    #[test]
    fn confirm_with_empty_order_rejected_without_mutation() {
        let mut b = hold();
        let err = b.confirm("", t0()).unwrap_err();
        assert!(matches!(err, RentalError::Validation(ValidationError::EmptyField(_))));
        assert_eq!(b.status(), BookingStatus::Reserved);
        assert!(b.expires_at().is_some());
    }

    #[test]
    fn cancel_reserved_emits_event() {
        let mut b = hold();
        b.take_events();
        b.cancel(Some("customer changed mind"), t0()).unwrap();
        assert_eq!(b.status(), BookingStatus::Cancelled);
        assert_eq!(b.expires_at(), None);
        let events = b.take_events();
        assert!(matches!(&events[0], BookingEvent::Cancelled { reason: Some(r), .. } if r == "customer changed mind"));
    }

    #[test]
    fn cancel_returned_fails() {
        let mut b = Booking::confirmed(new_booking(1), "o", t0()).unwrap();
        b.mark_returned(t0()).unwrap();
        assert!(matches!(
            b.cancel(None, t0()).unwrap_err(),
            RentalError::StateConflict { action: "cancel", .. }
        ));
    }

    #[test]
    fn return_requires_confirmed() {
        let mut b = hold();
        assert!(matches!(
            b.mark_returned(t0()).unwrap_err(),
            RentalError::StateConflict { action: "return", .. }
        ));
        b.confirm("o", t0()).unwrap();
        b.mark_returned(t0()).unwrap();
        assert_eq!(b.status(), BookingStatus::Returned);
    }

    #[test]
    fn terminal_states_are_closed() {
        let mut cancelled = hold();
        cancelled.cancel(None, t0()).unwrap();
        let mut returned = Booking::confirmed(new_booking(1), "o", t0()).unwrap();
        returned.mark_returned(t0()).unwrap();

        for b in [&mut cancelled, &mut returned] {
            let before = b.status();
            for _ in 0..2 {
                assert!(matches!(b.confirm("x", t0()), Err(RentalError::StateConflict { .. })));
                assert!(matches!(b.cancel(None, t0()), Err(RentalError::StateConflict { .. })));
                assert!(matches!(b.mark_returned(t0()), Err(RentalError::StateConflict { .. })));
            }
            assert_eq!(b.status(), before);
        }
    }

    #[test]
    fn expiry_is_strictly_after() {
        let b = hold();
        let exp = b.expires_at().unwrap();
        assert!(!b.is_expired(exp));
        assert!(b.is_active(exp));
        assert!(b.is_expired(exp + Duration::seconds(1)));
        assert!(!b.is_active(exp + Duration::seconds(1)));
    }

    #[test]
    fn confirmed_is_always_active() {
        let b = Booking::confirmed(new_booking(1), "o", t0()).unwrap();
        assert!(b.is_active(t0() + Duration::days(365)));
    }

    #[test]
    fn amend_validates_units() {
        let mut b = hold();
        b.amend(Some(3), Some(FulfillmentMethod::Pickup), t0()).unwrap();
        assert_eq!(b.units(), 3);
        assert_eq!(b.fulfillment(), FulfillmentMethod::Pickup);
        assert_eq!(b.status(), BookingStatus::Reserved);
        assert_eq!(b.amend(Some(0), None, t0()).unwrap_err(), ValidationError::InvalidUnits(0));
        assert_eq!(b.units(), 3);
    }

    #[test]
    fn events_not_persisted() {
        let b = hold();
        let bytes = bincode::serialize(&b).unwrap();
        let decoded: Booking = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.id(), b.id());
        assert_eq!(decoded.expires_at(), b.expires_at());
        assert!(decoded.pending_events().is_empty());
    }
}
