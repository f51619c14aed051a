//! In-process typed publish/subscribe bus shared by every runtime-core
//! subsystem: the RCON manager and log watcher publish, the plugin manager
//! subscribes on behalf of loaded plugin instances.

mod bus;
mod error;
mod event;
mod types;

pub use bus::{BusStats, EventBus, EventFilter, Subscription, SubscriptionId, SubscriptionStats};
pub use error::EventBusError;
pub use event::{Event, Producer};
pub use types::{monotonic_millis, EventId, LogLevel, ServerId};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_event(server_id: ServerId, type_tag: &str, seq: u32) -> Event {
        Event::new(
            server_id,
            Producer::Rcon,
            type_tag,
            serde_json::json!({ "seq": seq }),
        )
    }

    #[tokio::test]
    async fn delivers_events_matching_filter_in_order() {
        let bus = EventBus::new();
        let server_id = ServerId::new();
        let sub = bus.subscribe(EventFilter::for_server(server_id).with_type("chat"));

        bus.publish(sample_event(server_id, "chat", 1));
        bus.publish(sample_event(server_id, "kick", 99));
        bus.publish(sample_event(server_id, "chat", 2));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.payload["seq"], 1);
        assert_eq!(second.payload["seq"], 2);
    }

    #[tokio::test]
    async fn unrelated_server_id_is_not_delivered() {
        let bus = EventBus::new();
        let server_a = ServerId::new();
        let server_b = ServerId::new();
        let sub = bus.subscribe(EventFilter::for_server(server_a));

        bus.publish(sample_event(server_b, "chat", 1));
        bus.publish(sample_event(server_a, "chat", 2));

        let ev = sub.recv().await.unwrap();
        assert_eq!(ev.server_id, server_a);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let bus = EventBus::new();
        let server_id = ServerId::new();
        let sub = bus.subscribe_with_capacity(EventFilter::all(), 2);

        for i in 0..5 {
            bus.publish(sample_event(server_id, "chat", i));
        }

        let stats = sub.stats();
        assert_eq!(stats.dropped_total, 3);
        assert_eq!(stats.queue_len, 2);

        // Survivors are the two most recent publishes.
        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.payload["seq"], 3);
        assert_eq!(second.payload["seq"], 4);
    }

    #[tokio::test]
    async fn cancel_drains_then_returns_none() {
        let bus = EventBus::new();
        let server_id = ServerId::new();
        let sub = bus.subscribe(EventFilter::all());

        bus.publish(sample_event(server_id, "chat", 1));
        sub.cancel();
        bus.publish(sample_event(server_id, "chat", 2));

        // Pre-cancel event still drains out.
        let ev = sub.recv().await.unwrap();
        assert_eq!(ev.payload["seq"], 1);
        // Nothing enqueued after cancel.
        assert_eq!(sub.recv().await.is_none(), true);
    }

    #[tokio::test]
    async fn two_subscribers_receive_independent_copies() {
        let bus = EventBus::new();
        let server_id = ServerId::new();
        let slow = bus.subscribe_with_capacity(EventFilter::all(), 1);
        let fast = bus.subscribe(EventFilter::all());

        bus.publish(sample_event(server_id, "chat", 1));
        bus.publish(sample_event(server_id, "chat", 2));

        // Slow subscriber with capacity 1 only has the latest event; fast
        // subscriber still has both in order.
        assert_eq!(slow.stats().dropped_total, 1);
        let fast_first = tokio::time::timeout(Duration::from_millis(50), fast.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fast_first.payload["seq"], 1);
    }
}
