//! In-process event bus between the engine and its observers.
//!
//! Delivery is synchronous. Each topic has a queue and at most one caller
//! draining it at a time: `publish` enqueues, and if nobody is delivering on
//! that topic it drains the queue itself before returning. A publish made
//! while the topic is already being delivered (from a handler, or from
//! another thread) is handed to the running drain. Per-topic order is the
//! enqueue order, and handlers may publish on any topic, their own included.
//! Late subscribers miss earlier events and the bus does not deduplicate
//! anything.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geo::{Coordinate, Eta};
use crate::model::{Dispatch, DispatchId, DispatchStatus, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewDispatch,
    StatusUpdate,
    LocationUpdate,
    PathUpdate,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::NewDispatch,
        Topic::StatusUpdate,
        Topic::LocationUpdate,
        Topic::PathUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::NewDispatch => "new_dispatch",
            Topic::StatusUpdate => "status_update",
            Topic::LocationUpdate => "location_update",
            Topic::PathUpdate => "path_update",
        }
    }

    fn index(self) -> usize {
        match self {
            Topic::NewDispatch => 0,
            Topic::StatusUpdate => 1,
            Topic::LocationUpdate => 2,
            Topic::PathUpdate => 3,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route leg of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Pickup,
    Hospital,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Pickup => f.write_str("pickup"),
            Leg::Hospital => f.write_str("hospital"),
        }
    }
}

/// Extra context attached to a status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusNote {
    /// The dispatch was closed as `COMPLETED` because routing failed.
    RoutingFailed { leg: Leg, reason: String },
}

/// Immutable payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum DispatchEvent {
    NewDispatch(Dispatch),
    StatusUpdate {
        dispatch_id: DispatchId,
        status: DispatchStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<StatusNote>,
    },
    LocationUpdate {
        dispatch_id: DispatchId,
        unit_id: UnitId,
        location: Coordinate,
        eta: Option<Eta>,
    },
    /// An empty path means "nothing to draw".
    PathUpdate {
        dispatch_id: DispatchId,
        path: Vec<Coordinate>,
    },
}

impl DispatchEvent {
    pub fn status(dispatch_id: &DispatchId, status: DispatchStatus) -> Self {
        DispatchEvent::StatusUpdate {
            dispatch_id: dispatch_id.clone(),
            status,
            note: None,
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            DispatchEvent::NewDispatch(_) => Topic::NewDispatch,
            DispatchEvent::StatusUpdate { .. } => Topic::StatusUpdate,
            DispatchEvent::LocationUpdate { .. } => Topic::LocationUpdate,
            DispatchEvent::PathUpdate { .. } => Topic::PathUpdate,
        }
    }

    /// Status carried by a `new_dispatch` or `status_update` event.
    pub fn reported_status(&self) -> Option<DispatchStatus> {
        match self {
            DispatchEvent::NewDispatch(dispatch) => Some(dispatch.status),
            DispatchEvent::StatusUpdate { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn dispatch_id(&self) -> &DispatchId {
        match self {
            DispatchEvent::NewDispatch(dispatch) => &dispatch.id,
            DispatchEvent::StatusUpdate { dispatch_id, .. }
            | DispatchEvent::LocationUpdate { dispatch_id, .. }
            | DispatchEvent::PathUpdate { dispatch_id, .. } => dispatch_id,
        }
    }
}

type Handler = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

#[derive(Default)]
struct Delivery {
    queue: VecDeque<DispatchEvent>,
    draining: bool,
}

#[derive(Default)]
struct TopicChannel {
    handlers: Mutex<Vec<(u64, Handler)>>,
    delivery: Mutex<Delivery>,
}

impl TopicChannel {
    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> Vec<Handler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect()
    }

    /// Next queued event, or `None` after giving up the drain.
    fn next_queued(&self) -> Option<DispatchEvent> {
        let mut delivery = self.delivery();
        let next = delivery.queue.pop_front();
        if next.is_none() {
            delivery.draining = false;
        }
        next
    }
}

/// Hands the drain back if a handler panics, so the topic keeps working.
struct DrainGuard<'a> {
    channel: &'a TopicChannel,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.channel.delivery().draining = false;
        }
    }
}

#[derive(Default)]
struct BusInner {
    channels: [TopicChannel; 4],
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, topic: Topic, id: u64) {
        self.channels[topic.index()]
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(&str, usize)> = Topic::ALL
            .iter()
            .map(|topic| (topic.as_str(), self.subscriber_count(*topic)))
            .collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Delivery stops when the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.channels[topic.index()]
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            topic,
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Same handler on every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<Subscription>
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        Topic::ALL
            .iter()
            .map(|topic| {
                let handler = handler.clone();
                self.subscribe(*topic, move |event| handler(event))
            })
            .collect()
    }

    /// Deliver `event` to every handler on its topic, in subscription order.
    ///
    /// Returns once the event has been delivered, or once it is queued behind
    /// a delivery already running on the topic.
    pub fn publish(&self, event: DispatchEvent) {
        let channel = &self.inner.channels[event.topic().index()];
        {
            let mut delivery = channel.delivery();
            delivery.queue.push_back(event);
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        let _guard = DrainGuard { channel };
        while let Some(event) = channel.next_queued() {
            let handlers = channel.handlers();
            trace!(
                topic = %event.topic(),
                dispatch_id = %event.dispatch_id(),
                subscribers = handlers.len(),
                "publish"
            );
            for handler in handlers {
                handler(&event);
            }
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner.channels[topic.index()]
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle for one registered handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    topic: Topic,
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> DispatchId {
        DispatchId(raw.to_string())
    }

    fn collect(bus: &EventBus, topic: Topic) -> (Arc<Mutex<Vec<DispatchEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(topic, move |event| {
            sink.lock().expect("lock").push(event.clone());
        });
        (seen, sub)
    }

    #[test]
    fn delivers_only_to_matching_topic_in_order() {
        let bus = EventBus::new();
        let (statuses, _s1) = collect(&bus, Topic::StatusUpdate);
        let (paths, _s2) = collect(&bus, Topic::PathUpdate);

        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::EnRoute));
        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::Arrived));

        let statuses = statuses.lock().expect("lock");
        assert_eq!(statuses.len(), 2);
        assert_eq!(
            statuses[0],
            DispatchEvent::status(&id("D1"), DispatchStatus::EnRoute)
        );
        assert_eq!(
            statuses[1],
            DispatchEvent::status(&id("D1"), DispatchStatus::Arrived)
        );
        assert!(paths.lock().expect("lock").is_empty());
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let bus = EventBus::new();
        let (seen, sub) = collect(&bus, Topic::StatusUpdate);
        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::EnRoute));
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(Topic::StatusUpdate), 0);
        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::Arrived));
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::EnRoute));
        let (seen, _sub) = collect(&bus, Topic::StatusUpdate);
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn subscribe_all_covers_every_topic() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subs = bus.subscribe_all(move |event| sink.lock().expect("lock").push(event.topic()));

        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::EnRoute));
        bus.publish(DispatchEvent::PathUpdate {
            dispatch_id: id("D1"),
            path: Vec::new(),
        });
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![Topic::StatusUpdate, Topic::PathUpdate]
        );
    }

    #[test]
    fn handler_can_publish_on_its_own_topic() {
        let bus = EventBus::new();
        let (seen, _recorder) = collect(&bus, Topic::StatusUpdate);
        let echo_bus = bus.clone();
        let _echo = bus.subscribe(Topic::StatusUpdate, move |event| {
            if event.reported_status() == Some(DispatchStatus::Completed) {
                echo_bus.publish(DispatchEvent::status(&id("D2"), DispatchStatus::Assigned));
            }
        });

        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::Completed));
        bus.publish(DispatchEvent::status(&id("D1"), DispatchStatus::Cancelled));

        let seen = seen.lock().expect("lock");
        assert_eq!(
            *seen,
            vec![
                DispatchEvent::status(&id("D1"), DispatchStatus::Completed),
                DispatchEvent::status(&id("D2"), DispatchStatus::Assigned),
                DispatchEvent::status(&id("D1"), DispatchStatus::Cancelled),
            ]
        );
    }

    #[test]
    fn panicking_handler_does_not_stall_the_topic() {
        let bus = EventBus::new();
        let panicky = bus.subscribe(Topic::PathUpdate, |_| panic!("handler failure"));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bus.publish(DispatchEvent::PathUpdate {
                dispatch_id: id("D1"),
                path: Vec::new(),
            });
        }));
        assert!(outcome.is_err());
        drop(panicky);

        let (seen, _sub) = collect(&bus, Topic::PathUpdate);
        bus.publish(DispatchEvent::PathUpdate {
            dispatch_id: id("D1"),
            path: Vec::new(),
        });
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn status_event_serializes_with_topic_tag() {
        let json = serde_json::to_value(DispatchEvent::status(&id("D1"), DispatchStatus::Completed))
            .expect("serialize");
        assert_eq!(json["topic"], "status_update");
        assert_eq!(json["status"], "COMPLETED");
        assert!(json.get("note").is_none());
    }
}
