use chrono::{DateTime, NaiveDate, Utc};

use crate::booking::Booking;
use crate::model::DateRange;

/// Outcome of evaluating a request against an item's bookings.
#[derive(Debug, Clone)]
pub struct AvailabilityResult {
    pub available: bool,
    /// `quantity - used`, clamped at zero even when overbooked.
    pub available_units: u32,
    pub used_units: u32,
    /// The blocking bookings that consumed `used_units`.
    pub conflicting: Vec<Booking>,
}

/// Units in use on a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayUsage {
    pub date: NaiveDate,
    pub used_units: u32,
    pub available_units: u32,
}

/// Pure availability check over a caller-supplied candidate set.
///
/// Every active booking overlapping `range` counts against the item's quantity,
/// whether or not those bookings overlap each other. `candidates` must be a
/// superset of the bookings that truly overlap; extra entries are filtered out.
/// `now` decides whether a RESERVED hold has lapsed.
pub fn check_availability(
    item_quantity: u32,
    range: &DateRange,
    requested_units: u32,
    candidates: &[Booking],
    now: DateTime<Utc>,
) -> AvailabilityResult {
    let conflicting: Vec<Booking> = candidates
        .iter()
        .filter(|b| b.blocks(range, now))
        .cloned()
        .collect();
    let used_units = saturating_sum(conflicting.iter().map(Booking::units));
    let available_units = item_quantity.saturating_sub(used_units);
    AvailabilityResult {
        available: available_units >= requested_units,
        available_units,
        used_units,
        conflicting,
    }
}

/// Per-day breakdown of the active bookings in `window`, for calendar display.
pub fn daily_usage(
    item_quantity: u32,
    window: &DateRange,
    candidates: &[Booking],
    now: DateTime<Utc>,
) -> Vec<DayUsage> {
    let active: Vec<&Booking> = candidates.iter().filter(|b| b.blocks(window, now)).collect();
    window
        .days()
        .map(|date| {
            let used_units = saturating_sum(
                active
                    .iter()
                    .filter(|b| b.range().contains(date))
                    .map(|b| b.units()),
            );
            DayUsage {
                date,
                used_units,
                available_units: item_quantity.saturating_sub(used_units),
            }
        })
        .collect()
}

fn saturating_sum(units: impl Iterator<Item = u32>) -> u32 {
    units.fold(0u32, |acc, u| acc.saturating_add(u))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::NewBooking;
    use crate::model::FulfillmentMethod;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 20, 12, 0, 0).unwrap()
    }

    fn march(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 3, start).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, end).unwrap(),
        )
        .unwrap()
    }

    fn new_booking(range: DateRange, units: u32) -> NewBooking {
        NewBooking {
            rental_item_id: Ulid::new(),
            shop_id: "shop".into(),
            product_ref: "p".into(),
            range,
            units,
            fulfillment: FulfillmentMethod::Unknown,
        }
    }

    fn confirmed(range: DateRange, units: u32) -> Booking {
        Booking::confirmed(new_booking(range, units), "order-1", now()).unwrap()
    }

    fn hold(range: DateRange, units: u32, placed_at: DateTime<Utc>) -> Booking {
        Booking::reserve(new_booking(range, units), Some("cart"), Duration::minutes(45), placed_at).unwrap()
    }

    #[test]
    fn empty_item_is_fully_available() {
        let r = check_availability(5, &march(1, 5), 2, &[], now());
        assert!(r.available);
        assert_eq!(r.available_units, 5);
        assert_eq!(r.used_units, 0);
        assert!(r.conflicting.is_empty());
    }

    #[test]
    fn confirmed_booking_consumes_units() {
        let existing = confirmed(march(1, 5), 3);
        let r = check_availability(5, &march(3, 7), 3, &[existing.clone()], now());
        assert!(!r.available);
        assert_eq!(r.used_units, 3);
        assert_eq!(r.available_units, 2);
        assert_eq!(r.conflicting.len(), 1);
        assert_eq!(r.conflicting[0].id(), existing.id());
    }

    #[test]
    fn expired_hold_is_ignored() {
        let stale = hold(march(1, 5), 3, now() - Duration::hours(2));
        let r = check_availability(5, &march(1, 5), 5, &[stale], now());
        assert!(r.available);
        assert_eq!(r.used_units, 0);
    }

    #[test]
    fn live_hold_blocks() {
        let live = hold(march(1, 5), 4, now());
        let r = check_availability(5, &march(5, 9), 2, &[live], now());
        assert!(!r.available);
        assert_eq!(r.available_units, 1);
    }

    #[test]
    fn terminal_bookings_never_block() {
        let mut cancelled = confirmed(march(1, 5), 2);
        cancelled.cancel(None, now()).unwrap();
        let mut returned = confirmed(march(1, 5), 2);
        returned.mark_returned(now()).unwrap();
        let r = check_availability(2, &march(1, 5), 2, &[cancelled, returned], now());
        assert!(r.available);
        assert_eq!(r.used_units, 0);
    }

    #[test]
    fn non_overlapping_candidates_filtered() {
        let before = confirmed(march(1, 2), 5);
        let r = check_availability(5, &march(3, 4), 5, &[before], now());
        assert!(r.available);
    }

    #[test]
    fn overbooking_clamps_to_zero() {
        let a = confirmed(march(1, 5), 4);
        let b = confirmed(march(1, 5), 4);
        let r = check_availability(5, &march(1, 5), 1, &[a, b], now());
        assert_eq!(r.used_units, 8);
        assert_eq!(r.available_units, 0);
        assert!(!r.available);
    }

    #[test]
    fn zero_quantity_item_has_nothing() {
        let r = check_availability(0, &march(1, 1), 1, &[], now());
        assert!(!r.available);
        assert_eq!(r.available_units, 0);
    }

    #[test]
    fn daily_usage_counts_per_day() {
        let a = confirmed(march(1, 3), 2);
        let b = hold(march(3, 4), 1, now());
        let days = daily_usage(5, &march(1, 5), &[a, b], now());
        let used: Vec<u32> = days.iter().map(|d| d.used_units).collect();
        assert_eq!(used, vec![2, 2, 3, 1, 0]);
        assert_eq!(days[2].available_units, 2);
        assert_eq!(days.len(), 5);
    }
}
