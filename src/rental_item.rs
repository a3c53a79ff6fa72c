use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::booking::validate_ref;
use crate::error::ValidationError;
use crate::limits::*;
use crate::model::*;
use crate::money::{Currency, Money};
use crate::pricing::{self, PriceQuote, RateTier};

#[derive(Debug, Clone)]
pub struct NewRentalItem {
    pub shop_id: String,
    pub product_ref: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub base_price_per_day: Money,
    pub algorithm: PricingAlgorithm,
    pub quantity: i64,
    pub rate_tiers: Vec<RateTier>,
}

/// Rentable product configuration. One per (shop, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalItem {
    id: RentalItemId,
    shop_id: String,
    product_ref: String,
    name: Option<String>,
    image_url: Option<String>,
    currency: Currency,
    base_price_per_day: Money,
    algorithm: PricingAlgorithm,
    /// Total units that can be out concurrently.
    quantity: u32,
    /// Sorted ascending by `min_days`, thresholds unique.
    rate_tiers: Vec<RateTier>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RentalItem {
    pub fn new(new: NewRentalItem, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        validate_ref("shop_id", &new.shop_id)?;
        validate_ref("product_ref", &new.product_ref)?;
        validate_name(new.name.as_deref())?;
        let quantity = validate_quantity(new.quantity)?;
        let currency = new.base_price_per_day.currency().clone();
        let rate_tiers = normalize_tiers(new.rate_tiers, &currency)?;
        Ok(Self {
            id: Ulid::new(),
            shop_id: new.shop_id,
            product_ref: new.product_ref,
            name: new.name,
            image_url: new.image_url,
            currency,
            base_price_per_day: new.base_price_per_day,
            algorithm: new.algorithm,
            quantity,
            rate_tiers,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> RentalItemId {
        self.id
    }

    pub fn shop_id(&self) -> &str {
        &self.shop_id
    }

    pub fn product_ref(&self) -> &str {
        &self.product_ref
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn base_price_per_day(&self) -> &Money {
        &self.base_price_per_day
    }

    pub fn algorithm(&self) -> PricingAlgorithm {
        self.algorithm
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn rate_tiers(&self) -> &[RateTier] {
        &self.rate_tiers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace the whole pricing configuration. The item's currency follows `base`;
    /// every tier must use it.
    pub fn update_pricing(
        &mut self,
        base: Money,
        algorithm: PricingAlgorithm,
        tiers: Vec<RateTier>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let currency = base.currency().clone();
        let tiers = normalize_tiers(tiers, &currency)?;
        self.currency = currency;
        self.base_price_per_day = base;
        self.algorithm = algorithm;
        self.rate_tiers = tiers;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_quantity(&mut self, quantity: i64, now: DateTime<Utc>) -> Result<(), ValidationError> {
        self.quantity = validate_quantity(quantity)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn rename(
        &mut self,
        name: Option<String>,
        image_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        validate_name(name.as_deref())?;
        self.name = name;
        self.image_url = image_url;
        self.updated_at = now;
        Ok(())
    }

    /// Single-unit price for `range`.
    pub fn quote(&self, range: &DateRange) -> Result<PriceQuote, ValidationError> {
        let days = u32::try_from(range.duration_days())
            .map_err(|_| ValidationError::RangeTooLong(range.duration_days()))?;
        pricing::calculate(&self.base_price_per_day, self.algorithm, &self.rate_tiers, days)
    }
}

fn validate_name(name: Option<&str>) -> Result<(), ValidationError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(ValidationError::TooLong("name"));
    }
    Ok(())
}

fn validate_quantity(quantity: i64) -> Result<u32, ValidationError> {
    u32::try_from(quantity).map_err(|_| ValidationError::InvalidQuantity(quantity))
}

fn normalize_tiers(mut tiers: Vec<RateTier>, currency: &Currency) -> Result<Vec<RateTier>, ValidationError> {
    if tiers.len() > MAX_RATE_TIERS {
        return Err(ValidationError::InvalidTier("too many tiers"));
    }
    for tier in &tiers {
        if tier.min_days == 0 {
            return Err(ValidationError::InvalidTier("min_days must be at least 1"));
        }
        if tier.price_per_day.currency() != currency {
            return Err(ValidationError::CurrencyMismatch {
                left: currency.to_string(),
                right: tier.price_per_day.currency().to_string(),
            });
        }
    }
    tiers.sort_by_key(|t| t.min_days);
    if tiers.windows(2).any(|w| w[0].min_days == w[1].min_days) {
        return Err(ValidationError::InvalidTier("duplicate min_days"));
    }
    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn usd(cents: i64) -> Money {
        Money::from_cents(cents, Currency::new("USD").unwrap()).unwrap()
    }

    fn new_item(quantity: i64, tiers: Vec<RateTier>) -> NewRentalItem {
        NewRentalItem {
            shop_id: "shop-1".into(),
            product_ref: "gid://product/42".into(),
            name: Some("Camping tent".into()),
            image_url: None,
            base_price_per_day: usd(1000),
            algorithm: PricingAlgorithm::Tiered,
            quantity,
            rate_tiers: tiers,
        }
    }

    #[test]
    fn tiers_sorted_on_create() {
        let item = RentalItem::new(
            new_item(5, vec![RateTier::new(7, usd(600)).unwrap(), RateTier::new(3, usd(800)).unwrap()]),
            now(),
        )
        .unwrap();
        let mins: Vec<u32> = item.rate_tiers().iter().map(|t| t.min_days).collect();
        assert_eq!(mins, vec![3, 7]);
        assert_eq!(item.currency().as_str(), "USD");
    }

    #[test]
    fn duplicate_thresholds_rejected() {
        let err = RentalItem::new(
            new_item(5, vec![RateTier::new(3, usd(800)).unwrap(), RateTier::new(3, usd(700)).unwrap()]),
            now(),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::InvalidTier("duplicate min_days"));
    }

    #[test]
    fn negative_quantity_rejected() {
        let err = RentalItem::new(new_item(-1, vec![]), now()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidQuantity(-1));
    }

    #[test]
    fn zero_quantity_allowed() {
        let item = RentalItem::new(new_item(0, vec![]), now()).unwrap();
        assert_eq!(item.quantity(), 0);
    }

    #[test]
    fn blank_product_ref_rejected() {
        let mut n = new_item(1, vec![]);
        n.product_ref = String::new();
        assert_eq!(
            RentalItem::new(n, now()).unwrap_err(),
            ValidationError::EmptyField("product_ref")
        );
    }

    #[test]
    fn update_pricing_is_all_or_nothing() {
        let mut item = RentalItem::new(new_item(5, vec![]), now()).unwrap();
        let eur = Money::from_cents(500, Currency::new("EUR").unwrap()).unwrap();
        let err = item
            .update_pricing(usd(900), PricingAlgorithm::Tiered, vec![RateTier::new(2, eur).unwrap()], now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::CurrencyMismatch { .. }));
        assert_eq!(item.base_price_per_day().cents(), 1000);

        item.update_pricing(usd(900), PricingAlgorithm::Flat, vec![], now()).unwrap();
        assert_eq!(item.base_price_per_day().cents(), 900);
        assert_eq!(item.algorithm(), PricingAlgorithm::Flat);
    }

    #[test]
    fn set_quantity_touches_updated_at() {
        let mut item = RentalItem::new(new_item(5, vec![]), now()).unwrap();
        let later = now() + chrono::Duration::hours(1);
        item.set_quantity(8, later).unwrap();
        assert_eq!(item.quantity(), 8);
        assert_eq!(item.updated_at(), later);
        assert!(item.set_quantity(-3, later).is_err());
        assert_eq!(item.quantity(), 8);
    }

    #[test]
    fn quote_uses_inclusive_duration() {
        let item = RentalItem::new(
            new_item(
                5,
                vec![
                    RateTier::new(3, usd(800)).unwrap(),
                    RateTier::new(7, usd(600)).unwrap(),
                    RateTier::new(14, usd(500)).unwrap(),
                ],
            ),
            now(),
        )
        .unwrap();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        )
        .unwrap();
        let q = item.quote(&range).unwrap();
        assert_eq!(q.duration_days, 10);
        assert_eq!(q.price_per_day.cents(), 600);
        assert_eq!(q.total_cents(), 6000);
    }
}
