//! Tenant-scoped event bus.
//!
//! One logical channel per tenant, keyed `{prefix}:{tenant}:events`.
//! `publish` fans the event out to every live subscriber's bounded
//! queue and returns once each queue has accepted it; a subscriber that
//! cannot accept within [`PUBLISH_DEADLINE`] is treated as dead and
//! dropped. Subscriptions unregister deterministically on drop. Missed
//! events are not replayed here — replay is served from the event
//! repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ms_domain::event::Event;

const SUBSCRIBER_QUEUE: usize = 256;
const PUBLISH_DEADLINE: Duration = Duration::from_secs(5);

struct Slot {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct Inner {
    prefix: String,
    channels: Mutex<HashMap<String, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn channel_key(&self, tenant_id: &str) -> String {
        format!("{}:{tenant_id}:events", self.prefix)
    }

    fn unsubscribe(&self, channel: &str, id: u64) {
        let mut channels = self.channels.lock();
        if let Some(slots) = channels.get_mut(channel) {
            slots.retain(|s| s.id != id);
            if slots.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                prefix: prefix.into(),
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver `event` to every current subscriber of the tenant
    /// channel, in registration order. Returns the number of
    /// subscribers that accepted the event.
    pub async fn publish(&self, tenant_id: &str, event: &Event) -> usize {
        let channel = self.inner.channel_key(tenant_id);
        let targets: Vec<(u64, mpsc::Sender<Event>)> = {
            let channels = self.inner.channels.lock();
            match channels.get(&channel) {
                Some(slots) => slots.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            match tokio::time::timeout(PUBLISH_DEADLINE, tx.send(event.clone())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => dead.push(id),
                Err(_) => {
                    tracing::warn!(
                        channel = %channel,
                        subscriber = id,
                        "bus subscriber stalled past publish deadline, dropping"
                    );
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.inner.unsubscribe(&channel, id);
        }
        delivered
    }

    /// Open a subscription on the tenant channel. Events published
    /// after this call are delivered until the subscription is dropped.
    pub fn subscribe(&self, tenant_id: &str) -> Subscription {
        let channel = self.inner.channel_key(tenant_id);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.inner
            .channels
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(Slot { id, tx });
        Subscription {
            inner: self.inner.clone(),
            channel,
            id,
            rx,
        }
    }

    /// Number of live subscribers on the tenant channel.
    pub fn subscriber_count(&self, tenant_id: &str) -> usize {
        let channel = self.inner.channel_key(tenant_id);
        self.inner
            .channels
            .lock()
            .get(&channel)
            .map_or(0, |s| s.len())
    }
}

/// A live bus subscription. Dropping it unregisters the subscriber.
pub struct Subscription {
    inner: Arc<Inner>,
    channel: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.unsubscribe(&self.channel, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::event::EventType;

    fn event(n: u64) -> Event {
        let mut ev = Event::new(EventType::Ping, "t1", "s1", "test", "tr");
        ev.tick = n;
        ev
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers_in_order() {
        let bus = EventBus::new("maestro");
        let mut a = bus.subscribe("t1");
        let mut b = bus.subscribe("t1");

        for n in 1..=3 {
            bus.publish("t1", &event(n)).await;
        }
        for sub in [&mut a, &mut b] {
            for n in 1..=3u64 {
                assert_eq!(sub.recv().await.unwrap().tick, n);
            }
        }
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let bus = EventBus::new("maestro");
        let mut other = bus.subscribe("t2");
        assert_eq!(bus.publish("t1", &event(1)).await, 0);
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = EventBus::new("maestro");
        let sub = bus.subscribe("t1");
        assert_eq!(bus.subscriber_count("t1"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("t1"), 0);
        // Publishing to an empty channel is a no-op.
        assert_eq!(bus.publish("t1", &event(1)).await, 0);
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let bus = EventBus::new("maestro");
        {
            let _early = bus.subscribe("t1");
            bus.publish("t1", &event(1)).await;
        }
        let mut late = bus.subscribe("t1");
        assert!(late.try_recv().is_none());
        bus.publish("t1", &event(2)).await;
        assert_eq!(late.recv().await.unwrap().tick, 2);
    }
}
