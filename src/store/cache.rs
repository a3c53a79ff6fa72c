use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::model::RentalItemId;
use crate::rental_item::RentalItem;

use super::{RentalItemStore, StoreError};

struct Cached {
    item: RentalItem,
    loaded_at: DateTime<Utc>,
}

/// Cache-aside TTL layer in front of a `RentalItemStore`. Writes go straight
/// through and evict the cached copy.
pub struct CachedItemStore<S> {
    inner: S,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    by_id: DashMap<RentalItemId, Cached>,
    by_product: DashMap<(String, String), RentalItemId>,
}

impl<S: RentalItemStore> CachedItemStore<S> {
    pub fn new(inner: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            ttl,
            clock,
            by_id: DashMap::new(),
            by_product: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.by_id.len()
    }

    fn fresh(&self, id: &RentalItemId) -> Option<RentalItem> {
        let now = self.clock.now();
        let hit = self
            .by_id
            .get(id)
            .filter(|c| now - c.loaded_at < self.ttl)
            .map(|c| c.item.clone());
        if hit.is_none() {
            self.by_id.remove(id);
        }
        hit
    }

    fn remember(&self, item: &RentalItem) {
        self.by_product.insert(
            (item.shop_id().to_string(), item.product_ref().to_string()),
            item.id(),
        );
        self.by_id.insert(
            item.id(),
            Cached {
                item: item.clone(),
                loaded_at: self.clock.now(),
            },
        );
    }

    fn evict(&self, id: &RentalItemId) {
        if let Some((_, cached)) = self.by_id.remove(id) {
            self.by_product.remove(&(
                cached.item.shop_id().to_string(),
                cached.item.product_ref().to_string(),
            ));
        }
    }
}

#[async_trait]
impl<S: RentalItemStore> RentalItemStore for CachedItemStore<S> {
    async fn find_by_id(&self, id: RentalItemId) -> Result<Option<RentalItem>, StoreError> {
        if let Some(item) = self.fresh(&id) {
            metrics::counter!(crate::observability::ITEM_CACHE_TOTAL, "result" => "hit").increment(1);
            return Ok(Some(item));
        }
        metrics::counter!(crate::observability::ITEM_CACHE_TOTAL, "result" => "miss").increment(1);
        let loaded = self.inner.find_by_id(id).await?;
        if let Some(item) = &loaded {
            self.remember(item);
        }
        Ok(loaded)
    }

    async fn find_by_product_ref(
        &self,
        shop_id: &str,
        product_ref: &str,
    ) -> Result<Option<RentalItem>, StoreError> {
        let key = (shop_id.to_string(), product_ref.to_string());
        let cached_id = self.by_product.get(&key).map(|e| *e.value());
        if let Some(id) = cached_id
            && let Some(item) = self.fresh(&id)
        {
            return Ok(Some(item));
        }
        let loaded = self.inner.find_by_product_ref(shop_id, product_ref).await?;
        if let Some(item) = &loaded {
            self.remember(item);
        }
        Ok(loaded)
    }

    async fn save(&self, item: &RentalItem) -> Result<(), StoreError> {
        self.inner.save(item).await?;
        self.evict(&item.id());
        Ok(())
    }

    async fn delete(&self, id: RentalItemId) -> Result<bool, StoreError> {
        let deleted = self.inner.delete(id).await?;
        self.evict(&id);
        Ok(deleted)
    }
}
