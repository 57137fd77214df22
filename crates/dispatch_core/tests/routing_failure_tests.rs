mod support;

use std::sync::Arc;

use dispatch_core::error::RoutingError;
use dispatch_core::events::{DispatchEvent, Leg, StatusNote, Topic};
use dispatch_core::geo::Coordinate;
use dispatch_core::model::{Availability, DispatchStatus};
use dispatch_core::orchestrator::DispatchEnd;
use dispatch_core::routing::Route;
use dispatch_core::test_helpers::{
    fast_config, request_at, two_unit_fleet, FailingRouteProvider, QueuedRouteProvider,
    ScriptedRouteProvider,
};
use support::Harness;

fn last_note(harness: &Harness) -> Option<StatusNote> {
    harness
        .recorder
        .on_topic(Topic::StatusUpdate)
        .into_iter()
        .filter_map(|event| match event {
            DispatchEvent::StatusUpdate { note, .. } => note,
            _ => None,
        })
        .last()
}

#[tokio::test(start_paused = true)]
async fn pickup_routing_failure_completes_and_frees_the_unit() {
    let harness = Harness::new(Arc::new(FailingRouteProvider::default()));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));
    assert_eq!(harness.availability("AMB-01"), Availability::Busy);

    let outcome = harness.service.wait(&dispatch.id).await.expect("task must not fail");
    assert_eq!(
        outcome.end,
        DispatchEnd::RoutingFailed {
            leg: Leg::Pickup,
            error: RoutingError::Unreachable("routing service down".to_string()),
        }
    );
    assert_eq!(
        harness.statuses(&dispatch.id),
        vec![DispatchStatus::Assigned, DispatchStatus::Completed]
    );
    assert!(matches!(
        last_note(&harness),
        Some(StatusNote::RoutingFailed { leg: Leg::Pickup, .. })
    ));
    assert_eq!(harness.availability("AMB-01"), Availability::Available);
    assert!(harness.recorder.locations(&dispatch.id).is_empty());
    assert!(harness.recorder.on_topic(Topic::PathUpdate).is_empty());
}

#[tokio::test(start_paused = true)]
async fn hospital_routing_failure_completes_after_loading() {
    let pickup = Route::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.1, 0.1)])
        .expect("route");
    let provider = QueuedRouteProvider::new([
        Ok(pickup),
        Err(RoutingError::NoRoute("no road to hospital".to_string())),
    ]);
    let harness = Harness::new(Arc::new(provider));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));

    let outcome = harness.service.wait(&dispatch.id).await.expect("outcome");
    assert!(matches!(
        outcome.end,
        DispatchEnd::RoutingFailed { leg: Leg::Hospital, .. }
    ));
    assert_eq!(
        harness.statuses(&dispatch.id),
        vec![
            DispatchStatus::Assigned,
            DispatchStatus::EnRoute,
            DispatchStatus::Arrived,
            DispatchStatus::LoadingPatient,
            DispatchStatus::Completed,
        ]
    );
    assert_eq!(harness.availability("AMB-01"), Availability::Available);
    // The unit stays where it picked the patient up.
    let unit = harness.fleet().snapshot().remove(0);
    assert!(unit.location.approx_eq(&Coordinate::new(0.1, 0.1), 1e-9));
}

#[tokio::test(start_paused = true)]
async fn no_registered_facility_is_a_hospital_leg_failure() {
    let harness = Harness::with_fleet(
        two_unit_fleet(),
        Vec::new(),
        Arc::new(ScriptedRouteProvider::new(1)),
        fast_config(),
    );
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));

    let outcome = harness.service.wait(&dispatch.id).await.expect("outcome");
    assert!(matches!(
        outcome.end,
        DispatchEnd::RoutingFailed { leg: Leg::Hospital, .. }
    ));
    assert_eq!(outcome.dispatch.status, DispatchStatus::Completed);
    assert_eq!(harness.availability("AMB-01"), Availability::Available);
}

#[tokio::test(start_paused = true)]
async fn freed_unit_can_take_the_next_request() {
    let harness = Harness::new(Arc::new(FailingRouteProvider::default()));
    let first = harness.service.request_dispatch(request_at(0.1, 0.1));
    harness.service.wait(&first.id).await.expect("outcome");

    let second = harness.service.request_dispatch(request_at(0.1, 0.1));
    assert_eq!(second.status, DispatchStatus::Assigned);
    assert_eq!(second.unit, first.unit);
}
