use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::booking::BookingEvent;
use crate::model::RentalItemId;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking lifecycle events, one channel per rental item.
pub struct NotifyHub {
    channels: DashMap<RentalItemId, broadcast::Sender<BookingEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a rental item. Creates the channel if needed.
    pub fn subscribe(&self, rental_item_id: RentalItemId) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(rental_item_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Route each event to its item's channel. No-op for items nobody listens to.
    pub fn publish(&self, events: &[BookingEvent]) {
        for event in events {
            if let Some(sender) = self.channels.get(&event.rental_item_id()) {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Drop the channel once the item is gone; receivers see `Closed`.
    pub fn remove(&self, rental_item_id: &RentalItemId) {
        self.channels.remove(rental_item_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    fn returned(item: RentalItemId) -> BookingEvent {
        BookingEvent::Returned {
            booking_id: Ulid::new(),
            rental_item_id: item,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let item = Ulid::new();
        let mut rx = hub.subscribe(item);

        let event = returned(item);
        hub.publish(std::slice::from_ref(&event));

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn events_route_by_item() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);

        hub.publish(&[returned(b), returned(a)]);

        assert_eq!(rx_a.recv().await.unwrap().rental_item_id(), a);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(&[returned(Ulid::new())]);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn remove_closes_receivers() {
        let hub = NotifyHub::new();
        let item = Ulid::new();
        let mut rx = hub.subscribe(item);
        hub.remove(&item);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
