//! Test helpers for common test setup and utilities.
//!
//! Route provider stubs, an event recorder and small fleet fixtures shared by
//! unit tests, integration tests and benches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::DispatchConfig;
use crate::error::RoutingError;
use crate::events::{DispatchEvent, EventBus, Subscription, Topic};
use crate::geo::Coordinate;
use crate::model::{DispatchId, DispatchRequest, DispatchStatus, Facility, Requester, Unit};
use crate::routing::{Route, RouteProvider};

/// Requester used by fixtures.
pub fn test_requester() -> Requester {
    Requester::new("John Doe", "+91 9876543210")
}

pub fn request_at(lat: f64, lng: f64) -> DispatchRequest {
    DispatchRequest::new(Coordinate::new(lat, lng), test_requester())
}

/// The two-unit fleet: `AMB-01` at (0, 0) and `AMB-02` at (1, 1).
pub fn two_unit_fleet() -> Vec<Unit> {
    vec![
        Unit::new("AMB-01", "Ambulance 1", Coordinate::new(0.0, 0.0)),
        Unit::new("AMB-02", "Ambulance 2", Coordinate::new(1.0, 1.0)),
    ]
}

/// One facility at (0.2, 0.2), close to the two-unit fleet.
pub fn test_facilities() -> Vec<Facility> {
    vec![Facility::new("Test General", Coordinate::new(0.2, 0.2))]
}

/// Short timings so a whole lifecycle fits in a few virtual seconds:
/// 16 ms frames, 4 frames per segment, 1 s dwell.
pub fn fast_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_frame_interval_ms(16)
        .with_segment_duration_ms(64)
        .with_loading_dwell_secs(1)
}

/// Straight route with `segments` pieces; fails nothing.
#[derive(Debug, Default)]
pub struct ScriptedRouteProvider {
    segments: usize,
    calls: AtomicUsize,
}

impl ScriptedRouteProvider {
    pub fn new(segments: usize) -> Self {
        Self {
            segments: segments.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for ScriptedRouteProvider {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let segments = self.segments.max(1);
        Route::new(
            (0..=segments)
                .map(|i| origin.lerp(&destination, i as f64 / segments as f64))
                .collect(),
        )
    }
}

/// Answers from a queue of scripted results, then fails with `NoRoute`.
#[derive(Debug, Default)]
pub struct QueuedRouteProvider {
    results: Mutex<VecDeque<Result<Route, RoutingError>>>,
}

impl QueuedRouteProvider {
    pub fn new(results: impl IntoIterator<Item = Result<Route, RoutingError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RouteProvider for QueuedRouteProvider {
    async fn route(
        &self,
        _origin: Coordinate,
        _destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(RoutingError::NoRoute("script exhausted".to_string())))
    }
}

/// Always fails with the given error.
#[derive(Debug, Clone)]
pub struct FailingRouteProvider {
    error: RoutingError,
}

impl FailingRouteProvider {
    pub fn new(error: RoutingError) -> Self {
        Self { error }
    }
}

impl Default for FailingRouteProvider {
    fn default() -> Self {
        Self::new(RoutingError::Unreachable("routing service down".to_string()))
    }
}

#[async_trait]
impl RouteProvider for FailingRouteProvider {
    async fn route(
        &self,
        _origin: Coordinate,
        _destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        Err(self.error.clone())
    }
}

/// Holds every request until [`GatedRouteProvider::open`] is called, then
/// answers with a two-point route.
#[derive(Debug, Default)]
pub struct GatedRouteProvider {
    gate: Notify,
    waiting: AtomicUsize,
}

impl GatedRouteProvider {
    pub fn open(&self) {
        self.gate.notify_waiters();
    }

    /// Requests currently held at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for GatedRouteProvider {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        let notified = self.gate.notified();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        notified.await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        Route::new(vec![origin, destination])
    }
}

/// Records every event published on a bus, in delivery order.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<DispatchEvent>>>,
    _subscriptions: Vec<Subscription>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscriptions = bus.subscribe_all(move |event| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        });
        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn on_topic(&self, topic: Topic) -> Vec<DispatchEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.topic() == topic)
            .collect()
    }

    /// Status sequence published for `id`.
    pub fn statuses(&self, id: &DispatchId) -> Vec<DispatchStatus> {
        self.events()
            .iter()
            .filter(|event| event.dispatch_id() == id)
            .filter_map(DispatchEvent::reported_status)
            .collect()
    }

    /// Unit positions broadcast for `id`.
    pub fn locations(&self, id: &DispatchId) -> Vec<Coordinate> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DispatchEvent::LocationUpdate {
                    dispatch_id,
                    location,
                    ..
                } if &dispatch_id == id => Some(location),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
