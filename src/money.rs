use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// ISO-4217 style code: three ASCII letters, stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Currency::new(&code)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-negative integer-cent amount tagged with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    cents: u64,
    currency: Currency,
}

impl Money {
    pub fn from_cents(cents: i64, currency: Currency) -> Result<Self, ValidationError> {
        let cents = u64::try_from(cents).map_err(|_| ValidationError::Negative(cents))?;
        Ok(Self { cents, currency })
    }

    /// Rounds to the nearest cent, half away from zero.
    pub fn from_dollars(dollars: f64, currency: Currency) -> Result<Self, ValidationError> {
        let cents = (dollars * 100.0).round();
        if !cents.is_finite() {
            return Err(ValidationError::NotWholeCents);
        }
        if cents >= i64::MAX as f64 || cents <= i64::MIN as f64 {
            return Err(ValidationError::Overflow);
        }
        Self::from_cents(cents as i64, currency)
    }

    pub fn zero(currency: Currency) -> Self {
        Self { cents: 0, currency }
    }

    pub fn cents(&self) -> u64 {
        self.cents
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn add(&self, other: &Money) -> Result<Money, ValidationError> {
        self.same_currency(other)?;
        let cents = self
            .cents
            .checked_add(other.cents)
            .ok_or(ValidationError::Overflow)?;
        Ok(Money {
            cents,
            currency: self.currency.clone(),
        })
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, ValidationError> {
        self.same_currency(other)?;
        let cents = self
            .cents
            .checked_sub(other.cents)
            .ok_or(ValidationError::Underflow)?;
        Ok(Money {
            cents,
            currency: self.currency.clone(),
        })
    }

    /// Scale by a non-negative factor, rounding the product to the nearest cent.
    pub fn multiply(&self, factor: f64) -> Result<Money, ValidationError> {
        if factor.is_nan() || factor < 0.0 {
            return Err(ValidationError::NegativeFactor);
        }
        let product = (self.cents as f64 * factor).round();
        if !product.is_finite() || product > u64::MAX as f64 {
            return Err(ValidationError::Overflow);
        }
        Ok(Money {
            cents: product as u64,
            currency: self.currency.clone(),
        })
    }

    /// Exact integer scaling.
    pub fn times(&self, n: u64) -> Result<Money, ValidationError> {
        let cents = self.cents.checked_mul(n).ok_or(ValidationError::Overflow)?;
        Ok(Money {
            cents,
            currency: self.currency.clone(),
        })
    }

    fn same_currency(&self, other: &Money) -> Result<(), ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02} {}", self.cents / 100, self.cents % 100, self.currency)
    }
}
