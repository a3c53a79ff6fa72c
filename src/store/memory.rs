use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::booking::Booking;
use crate::model::*;
use crate::rental_item::RentalItem;

use super::wal::{StoreRecord, Wal};
use super::{BookingStore, RentalItemStore, StoreError};

/// DashMap-backed store for bookings and rental items, optionally made durable
/// by a write-ahead log that is replayed on open.
pub struct InMemoryStore {
    bookings: DashMap<BookingId, Booking>,
    by_item: DashMap<RentalItemId, Vec<BookingId>>,
    by_order: DashMap<String, Vec<BookingId>>,
    items: DashMap<RentalItemId, RentalItem>,
    item_by_product: DashMap<(String, String), RentalItemId>,
    /// Serialises writes; holds the log when durable.
    writer: Mutex<Option<Wal>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store. State is lost when dropped.
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_item: DashMap::new(),
            by_order: DashMap::new(),
            items: DashMap::new(),
            item_by_product: DashMap::new(),
            writer: Mutex::new(None),
        }
    }

    /// Durable store backed by the log at `path`, replaying whatever it holds.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, records) = Wal::recover(path)?;
        let mut store = Self::new();
        for record in &records {
            store.apply(record);
        }
        tracing::info!(
            "store {}: replayed {} records ({} bookings, {} items)",
            path.display(),
            records.len(),
            store.booking_count(),
            store.item_count()
        );
        store.writer = Mutex::new(Some(wal));
        Ok(store)
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Records appended since the last compaction; 0 for a volatile store.
    pub async fn appends_since_compact(&self) -> u64 {
        self.writer
            .lock()
            .await
            .as_ref()
            .map_or(0, Wal::appends_since_compact)
    }

    /// Rewrite the log with just the live state. No-op for a volatile store.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut guard = self.writer.lock().await;
        let Some(wal) = guard.as_mut() else {
            return Ok(());
        };
        let mut records: Vec<StoreRecord> = self
            .items
            .iter()
            .map(|e| StoreRecord::ItemSaved(e.value().clone()))
            .collect();
        records.extend(
            self.bookings
                .iter()
                .map(|e| StoreRecord::BookingSaved(e.value().clone())),
        );
        wal.compact(&records)?;
        tracing::info!("store {}: compacted to {} records", wal.path().display(), records.len());
        Ok(())
    }

    /// Log (when durable) then apply, under the write lock.
    async fn persist_and_apply(&self, records: &[StoreRecord]) -> Result<(), StoreError> {
        let mut guard = self.writer.lock().await;
        if let Some(wal) = guard.as_mut() {
            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(records.len() as f64);
            let flush_start = std::time::Instant::now();
            wal.append(records)?;
            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                .record(flush_start.elapsed().as_secs_f64());
        }
        for record in records {
            self.apply(record);
        }
        Ok(())
    }

    fn apply(&self, record: &StoreRecord) {
        match record {
            StoreRecord::BookingSaved(booking) => {
                let mut stored = booking.clone();
                stored.take_events();
                let id = stored.id();
                let new_order = stored.order_id().map(str::to_string);
                let previous = self.bookings.insert(id, stored);
                match previous {
                    None => {
                        self.by_item.entry(booking.rental_item_id()).or_default().push(id);
                        if let Some(order) = new_order {
                            self.by_order.entry(order).or_default().push(id);
                        }
                    }
                    Some(prev) => {
                        let old_order = prev.order_id().map(str::to_string);
                        if old_order != new_order {
                            if let Some(old) = old_order {
                                self.unindex_order(&old, &id);
                            }
                            if let Some(order) = new_order {
                                self.by_order.entry(order).or_default().push(id);
                            }
                        }
                    }
                }
            }
            StoreRecord::BookingDeleted(id) => {
                if let Some((_, prev)) = self.bookings.remove(id) {
                    if let Some(mut ids) = self.by_item.get_mut(&prev.rental_item_id()) {
                        ids.retain(|b| b != id);
                    }
                    if let Some(order) = prev.order_id() {
                        self.unindex_order(order, id);
                    }
                }
            }
            StoreRecord::ItemSaved(item) => {
                self.item_by_product.insert(
                    (item.shop_id().to_string(), item.product_ref().to_string()),
                    item.id(),
                );
                self.items.insert(item.id(), item.clone());
            }
            StoreRecord::ItemDeleted(id) => {
                if let Some((_, prev)) = self.items.remove(id) {
                    self.item_by_product.remove_if(
                        &(prev.shop_id().to_string(), prev.product_ref().to_string()),
                        |_, mapped| mapped == id,
                    );
                }
            }
        }
    }

    fn unindex_order(&self, order: &str, id: &BookingId) {
        let now_empty = match self.by_order.get_mut(order) {
            Some(mut ids) => {
                ids.retain(|b| b != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_order.remove_if(order, |_, ids| ids.is_empty());
        }
    }

    fn collect(&self, ids: &[BookingId], keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        ids.iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .filter(|b| keep(b))
            .collect()
    }

    fn item_booking_ids(&self, rental_item_id: &RentalItemId) -> Vec<BookingId> {
        self.by_item
            .get(rental_item_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .by_order
            .get(order_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(self.collect(&ids, |b| b.order_id() == Some(order_id)))
    }

    async fn find_overlapping(
        &self,
        rental_item_id: RentalItemId,
        range: &DateRange,
    ) -> Result<Vec<Booking>, StoreError> {
        let ids = self.item_booking_ids(&rental_item_id);
        Ok(self.collect(&ids, |b| b.range().overlaps(range)))
    }

    async fn find_by_rental_item(&self, rental_item_id: RentalItemId) -> Result<Vec<Booking>, StoreError> {
        let ids = self.item_booking_ids(&rental_item_id);
        Ok(self.collect(&ids, |_| true))
    }

    async fn find_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .iter()
            .filter(|e| e.value().status() == BookingStatus::Reserved && e.value().is_expired(as_of))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn save(&self, booking: &Booking) -> Result<(), StoreError> {
        self.persist_and_apply(&[StoreRecord::BookingSaved(booking.clone())])
            .await
    }

    async fn save_many(&self, bookings: &[Booking]) -> Result<(), StoreError> {
        if bookings.is_empty() {
            return Ok(());
        }
        let records: Vec<_> = bookings
            .iter()
            .map(|b| StoreRecord::BookingSaved(b.clone()))
            .collect();
        self.persist_and_apply(&records).await
    }

    async fn delete(&self, id: BookingId) -> Result<bool, StoreError> {
        if !self.bookings.contains_key(&id) {
            return Ok(false);
        }
        self.persist_and_apply(&[StoreRecord::BookingDeleted(id)]).await?;
        Ok(true)
    }

    async fn delete_many(&self, ids: &[BookingId]) -> Result<usize, StoreError> {
        let present: Vec<StoreRecord> = ids
            .iter()
            .filter(|id| self.bookings.contains_key(id))
            .map(|id| StoreRecord::BookingDeleted(*id))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }
        self.persist_and_apply(&present).await?;
        Ok(present.len())
    }
}

#[async_trait]
impl RentalItemStore for InMemoryStore {
    async fn find_by_id(&self, id: RentalItemId) -> Result<Option<RentalItem>, StoreError> {
        Ok(self.items.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_product_ref(
        &self,
        shop_id: &str,
        product_ref: &str,
    ) -> Result<Option<RentalItem>, StoreError> {
        let id = self
            .item_by_product
            .get(&(shop_id.to_string(), product_ref.to_string()))
            .map(|e| *e.value());
        Ok(id.and_then(|id| self.items.get(&id).map(|e| e.value().clone())))
    }

    async fn save(&self, item: &RentalItem) -> Result<(), StoreError> {
        self.persist_and_apply(&[StoreRecord::ItemSaved(item.clone())])
            .await
    }

    async fn delete(&self, id: RentalItemId) -> Result<bool, StoreError> {
        if !self.items.contains_key(&id) {
            return Ok(false);
        }
        self.persist_and_apply(&[StoreRecord::ItemDeleted(id)]).await?;
        Ok(true)
    }
}
