use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::PricingAlgorithm;
use crate::money::Money;

/// Volume discount: applies once a rental lasts at least `min_days`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateTier {
    pub min_days: u32,
    pub price_per_day: Money,
}

impl RateTier {
    pub fn new(min_days: u32, price_per_day: Money) -> Result<Self, ValidationError> {
        if min_days == 0 {
            return Err(ValidationError::InvalidTier("min_days must be at least 1"));
        }
        Ok(Self {
            min_days,
            price_per_day,
        })
    }
}

/// Single-unit price for a rental window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub price_per_day: Money,
    pub total: Money,
    pub applied_tier: Option<RateTier>,
    pub duration_days: u32,
}

impl PriceQuote {
    pub fn total_cents(&self) -> u64 {
        self.total.cents()
    }

    /// Scale the single-unit total by a unit count.
    pub fn for_units(&self, units: u32) -> Result<Money, ValidationError> {
        self.total.times(u64::from(units))
    }
}

/// Pick the tier with the largest `min_days <= duration_days`. Order of `tiers` is irrelevant.
pub fn applicable_tier(tiers: &[RateTier], duration_days: u32) -> Option<&RateTier> {
    tiers
        .iter()
        .filter(|t| t.min_days <= duration_days)
        .max_by_key(|t| t.min_days)
}

pub fn calculate(
    base_price_per_day: &Money,
    algorithm: PricingAlgorithm,
    tiers: &[RateTier],
    duration_days: u32,
) -> Result<PriceQuote, ValidationError> {
    let applied_tier = match algorithm {
        PricingAlgorithm::Flat => None,
        PricingAlgorithm::Tiered => applicable_tier(tiers, duration_days).cloned(),
    };
    let price_per_day = match &applied_tier {
        Some(tier) => {
            if tier.price_per_day.currency() != base_price_per_day.currency() {
                return Err(ValidationError::CurrencyMismatch {
                    left: base_price_per_day.currency().to_string(),
                    right: tier.price_per_day.currency().to_string(),
                });
            }
            tier.price_per_day.clone()
        }
        None => base_price_per_day.clone(),
    };
    let total = price_per_day.times(u64::from(duration_days))?;
    Ok(PriceQuote {
        price_per_day,
        total,
        applied_tier,
        duration_days,
    })
}
