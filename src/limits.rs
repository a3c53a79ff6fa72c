/// Upper bound on units a single booking may claim.
pub const MAX_UNITS_PER_BOOKING: u32 = 10_000;

/// Longest rental window accepted, in days (inclusive count).
pub const MAX_RENTAL_DAYS: i64 = 3_660;

/// Rate tiers per rental item.
pub const MAX_RATE_TIERS: usize = 32;

/// Display name length for rental items.
pub const MAX_NAME_LEN: usize = 512;

/// Order ids, cart tokens, shop ids and product refs.
pub const MAX_REF_LEN: usize = 256;

/// Cancellation reasons attached to events.
pub const MAX_REASON_LEN: usize = 1_024;

/// Default lifetime of a cart hold.
pub const DEFAULT_HOLD_TTL_MINUTES: i64 = 45;

/// Longest configurable cart hold: one week.
pub const MAX_HOLD_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Prefix marking a not-yet-paid cart hold in `Booking::order_id`.
pub const CART_ORDER_PREFIX: &str = "cart:";
