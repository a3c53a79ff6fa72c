use ulid::Ulid;

use crate::model::{BookingStatus, DateRange};
use crate::store::StoreError;

/// Malformed input. Always detected before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidDate(String),
    InvalidRange { start: String, end: String },
    RangeTooLong(i64),
    NotWholeCents,
    Negative(i64),
    NegativeFactor,
    Overflow,
    Underflow,
    InvalidCurrency(String),
    CurrencyMismatch { left: String, right: String },
    InvalidUnits(u32),
    InvalidQuantity(i64),
    InvalidTier(&'static str),
    EmptyField(&'static str),
    TooLong(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidDate(raw) => write!(f, "invalid date: {raw:?}"),
            ValidationError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} is after end {end}")
            }
            ValidationError::RangeTooLong(days) => write!(f, "range of {days} days is too long"),
            ValidationError::NotWholeCents => write!(f, "amount is not a whole number of cents"),
            ValidationError::Negative(cents) => write!(f, "amount must not be negative: {cents}"),
            ValidationError::NegativeFactor => write!(f, "multiplier must not be negative"),
            ValidationError::Overflow => write!(f, "amount overflow"),
            ValidationError::Underflow => write!(f, "subtraction would go below zero"),
            ValidationError::InvalidCurrency(code) => write!(f, "invalid currency code: {code:?}"),
            ValidationError::CurrencyMismatch { left, right } => {
                write!(f, "currency mismatch: {left} vs {right}")
            }
            ValidationError::InvalidUnits(units) => write!(f, "invalid unit count: {units}"),
            ValidationError::InvalidQuantity(q) => write!(f, "invalid quantity: {q}"),
            ValidationError::InvalidTier(msg) => write!(f, "invalid rate tier: {msg}"),
            ValidationError::EmptyField(field) => write!(f, "{field} must not be empty"),
            ValidationError::TooLong(field) => write!(f, "{field} too long"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Every failure a core operation can report.
#[derive(Debug)]
pub enum RentalError {
    Validation(ValidationError),
    /// Illegal lifecycle transition.
    StateConflict {
        booking_id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    NotFound {
        entity: &'static str,
        key: String,
    },
    CapacityExceeded {
        range: DateRange,
        requested: u32,
        available: u32,
    },
    AlreadyExists {
        entity: &'static str,
        key: String,
    },
    Store(StoreError),
}

impl RentalError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        RentalError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Short tag for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RentalError::Validation(_) => "validation",
            RentalError::StateConflict { .. } => "state_conflict",
            RentalError::NotFound { .. } => "not_found",
            RentalError::CapacityExceeded { .. } => "capacity_exceeded",
            RentalError::AlreadyExists { .. } => "already_exists",
            RentalError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for RentalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RentalError::Validation(e) => write!(f, "validation error: {e}"),
            RentalError::StateConflict {
                booking_id,
                status,
                action,
            } => write!(f, "cannot {action} booking {booking_id}: status is {status}"),
            RentalError::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            RentalError::CapacityExceeded {
                range,
                requested,
                available,
            } => write!(
                f,
                "capacity exceeded for {range}: requested {requested}, available {available}"
            ),
            RentalError::AlreadyExists { entity, key } => write!(f, "{entity} already exists: {key}"),
            RentalError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for RentalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RentalError::Validation(e) => Some(e),
            RentalError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for RentalError {
    fn from(e: ValidationError) -> Self {
        RentalError::Validation(e)
    }
}

impl From<StoreError> for RentalError {
    fn from(e: StoreError) -> Self {
        RentalError::Store(e)
    }
}
