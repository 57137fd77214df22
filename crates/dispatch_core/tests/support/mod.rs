#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::DispatchConfig;
use dispatch_core::events::EventBus;
use dispatch_core::fleet::FleetRegistry;
use dispatch_core::model::{Availability, DispatchId, DispatchStatus, Facility, Unit, UnitId};
use dispatch_core::routing::RouteProvider;
use dispatch_core::service::DispatchService;
use dispatch_core::test_helpers::{fast_config, test_facilities, two_unit_fleet, EventRecorder};

/// Service wired to a fresh bus with an event recorder attached first, so it
/// sees every event.
pub struct Harness {
    pub service: DispatchService,
    pub recorder: EventRecorder,
}

impl Harness {
    pub fn new(provider: Arc<dyn RouteProvider>) -> Self {
        Self::with_fleet(two_unit_fleet(), test_facilities(), provider, fast_config())
    }

    pub fn with_fleet(
        units: Vec<Unit>,
        facilities: Vec<Facility>,
        provider: Arc<dyn RouteProvider>,
        config: DispatchConfig,
    ) -> Self {
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus);
        let fleet = Arc::new(FleetRegistry::new(units, facilities));
        let service = DispatchService::new(fleet, bus, provider, config);
        Self { service, recorder }
    }

    pub fn fleet(&self) -> &FleetRegistry {
        self.service.fleet()
    }

    pub fn availability(&self, unit: &str) -> Availability {
        self.fleet()
            .unit(&UnitId(unit.to_string()))
            .map(|unit| unit.availability)
            .expect("unit registered")
    }

    pub fn statuses(&self, id: &DispatchId) -> Vec<DispatchStatus> {
        self.recorder.statuses(id)
    }

    pub fn count_status(&self, id: &DispatchId, status: DispatchStatus) -> usize {
        self.statuses(id)
            .into_iter()
            .filter(|seen| *seen == status)
            .count()
    }
}

/// Advance virtual time (tests run with the clock paused).
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Let spawned tasks run until they block, without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn assert_strictly_ordered(statuses: &[DispatchStatus]) {
    for pair in statuses.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal transition {} -> {} in {:?}",
            pair[0],
            pair[1],
            statuses
        );
    }
}
