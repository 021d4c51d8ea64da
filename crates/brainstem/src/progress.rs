use futures::channel::mpsc;
use rusty_dreams_core::protocol::{ProgressEvent, ProgressPhase};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Handler = dyn Fn(&ProgressEvent) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous broadcast of progress events.
///
/// Each publish goes to the subscribers registered at that moment, in
/// registration order. Handlers may subscribe or unsubscribe from inside a
/// delivery; the change applies from the next publish.
pub struct ProgressBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<Handler>)>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<Handler>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        id
    }

    /// Subscribe with a channel instead of a callback. Events published
    /// after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded();
        let id = self.subscribe(move |event| {
            let _ = tx.unbounded_send(event.clone());
        });
        (id, rx)
    }

    /// Returns false if `id` was not subscribed. Never fails.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub(crate) fn publish(&self, event: &ProgressEvent) {
        let snapshot: Vec<Arc<Handler>> =
            self.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

#[derive(Default)]
struct Seen {
    highest: HashMap<ProgressPhase, u8>,
    last_phase: Option<ProgressPhase>,
}

/// Per-operation bookkeeping that keeps percent non-decreasing within a phase.
#[derive(Default)]
pub(crate) struct ProgressTracker {
    seen: Mutex<Seen>,
}

impl ProgressTracker {
    pub(crate) fn admit(&self, mut event: ProgressEvent) -> ProgressEvent {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let highest = seen.highest.entry(event.phase).or_insert(0);
        event.percent = event.percent.min(100).max(*highest);
        *highest = event.percent;
        seen.last_phase = Some(event.phase);
        event
    }

    pub(crate) fn last_phase(&self) -> Option<ProgressPhase> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event(percent: u8) -> ProgressEvent {
        ProgressEvent::new(ProgressPhase::Loading, percent, "loading")
    }

    #[test]
    fn publish_reaches_every_subscriber_in_order() {
        let bus = ProgressBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            bus.subscribe(move |e| seen.lock().unwrap().push((tag, e.percent)));
        }

        bus.publish(&event(10));
        bus.publish(&event(20));

        assert_eq!(
            *seen.lock().unwrap(),
            [("a", 10), ("b", 10), ("a", 20), ("b", 20)]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery_only_for_that_handler() {
        let bus = ProgressBus::new();
        let kept = Arc::new(Mutex::new(0));
        let dropped = Arc::new(Mutex::new(0));

        let k = kept.clone();
        bus.subscribe(move |_| *k.lock().unwrap() += 1);
        let d = dropped.clone();
        let id = bus.subscribe(move |_| *d.lock().unwrap() += 1);

        bus.publish(&event(1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&event(2));

        assert_eq!(*kept.lock().unwrap(), 2);
        assert_eq!(*dropped.lock().unwrap(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_delivery() {
        let bus = Arc::new(ProgressBus::new());
        let calls = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let (b, c, o) = (bus.clone(), calls.clone(), own_id.clone());
        let id = bus.subscribe(move |_| {
            *c.lock().unwrap() += 1;
            if let Some(id) = *o.lock().unwrap() {
                b.unsubscribe(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        bus.publish(&event(1));
        bus.publish(&event(2));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[async_std::test]
    async fn channel_subscription_receives_events() {
        let bus = ProgressBus::new();
        let (id, mut rx) = bus.subscribe_channel();
        bus.publish(&event(5));
        bus.unsubscribe(id);
        bus.publish(&event(6));
        drop(bus);

        assert_eq!(rx.next().await.map(|e| e.percent), Some(5));
        assert_eq!(rx.next().await, None);
    }

    #[test]
    fn tracker_clamps_regressions_per_phase() {
        let tracker = ProgressTracker::default();
        assert_eq!(tracker.admit(event(40)).percent, 40);
        assert_eq!(tracker.admit(event(30)).percent, 40);
        let generating = ProgressEvent::new(ProgressPhase::Generating, 5, "step");
        assert_eq!(tracker.admit(generating).percent, 5);
        assert_eq!(tracker.last_phase(), Some(ProgressPhase::Generating));
    }
}
