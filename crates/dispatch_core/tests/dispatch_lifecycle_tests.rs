mod support;

use std::sync::{Arc, Mutex};

use dispatch_core::events::{DispatchEvent, Topic};
use dispatch_core::geo::{Coordinate, Eta};
use dispatch_core::model::{Availability, DispatchStatus, UnitId};
use dispatch_core::orchestrator::DispatchEnd;
use dispatch_core::test_helpers::{request_at, ScriptedRouteProvider};
use support::{assert_strictly_ordered, Harness};

#[tokio::test(start_paused = true)]
async fn nearest_unit_is_assigned_then_en_route() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));

    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));
    assert_eq!(dispatch.status, DispatchStatus::Assigned);
    assert_eq!(dispatch.unit, Some(UnitId("AMB-01".to_string())));
    assert_eq!(harness.availability("AMB-01"), Availability::Busy);
    assert_eq!(harness.availability("AMB-02"), Availability::Available);

    support::advance(1).await;
    assert_eq!(
        harness.statuses(&dispatch.id),
        vec![DispatchStatus::Assigned, DispatchStatus::EnRoute]
    );
}

#[tokio::test(start_paused = true)]
async fn full_lifecycle_runs_in_order_and_frees_the_unit() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));

    let outcome = harness.service.wait(&dispatch.id).await.expect("outcome");
    assert_eq!(outcome.end, DispatchEnd::Completed);
    assert_eq!(outcome.dispatch.status, DispatchStatus::Completed);

    let statuses = harness.statuses(&dispatch.id);
    assert_eq!(
        statuses,
        vec![
            DispatchStatus::Assigned,
            DispatchStatus::EnRoute,
            DispatchStatus::Arrived,
            DispatchStatus::LoadingPatient,
            DispatchStatus::EnRouteToHospital,
            DispatchStatus::Completed,
        ]
    );
    assert_strictly_ordered(&statuses);

    assert_eq!(harness.availability("AMB-01"), Availability::Available);
    let unit = harness
        .fleet()
        .unit(&UnitId("AMB-01".to_string()))
        .expect("unit");
    assert!(unit.location.approx_eq(&Coordinate::new(0.2, 0.2), 1e-9));
    assert_eq!(unit.dispatch, None);
}

#[tokio::test(start_paused = true)]
async fn each_leg_emits_frames_per_segment_and_ends_on_target() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));
    harness.service.wait(&dispatch.id).await.expect("outcome");

    // 2 segments x 4 frames on each of the two legs.
    let locations = harness.recorder.locations(&dispatch.id);
    assert_eq!(locations.len(), 16);
    assert!(locations[0].approx_eq(&Coordinate::new(0.0, 0.0), 1e-9));
    assert!(locations[7].approx_eq(&Coordinate::new(0.1, 0.1), 1e-9));
    assert!(locations[8].approx_eq(&Coordinate::new(0.1, 0.1), 1e-9));
    assert!(locations[15].approx_eq(&Coordinate::new(0.2, 0.2), 1e-9));
}

#[tokio::test(start_paused = true)]
async fn eta_counts_down_to_under_a_minute_on_each_leg() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));
    assert_eq!(dispatch.eta, Some(Eta::Minutes(38)));
    harness.service.wait(&dispatch.id).await.expect("outcome");

    let etas: Vec<Eta> = harness
        .recorder
        .on_topic(Topic::LocationUpdate)
        .into_iter()
        .filter_map(|event| match event {
            DispatchEvent::LocationUpdate { eta, .. } => eta,
            _ => None,
        })
        .collect();
    assert_eq!(etas.len(), 16);
    for leg in etas.chunks(8) {
        for pair in leg.windows(2) {
            assert!(pair[1] <= pair[0], "eta went up: {:?}", leg);
        }
        assert_eq!(leg[7], Eta::UnderOneMinute);
    }
    assert_eq!(etas[0], Eta::Minutes(38));
}

#[tokio::test(start_paused = true)]
async fn path_is_drawn_per_leg_and_cleared() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));
    let dispatch = harness.service.request_dispatch(request_at(0.1, 0.1));
    harness.service.wait(&dispatch.id).await.expect("outcome");

    let paths: Vec<usize> = harness
        .recorder
        .on_topic(Topic::PathUpdate)
        .into_iter()
        .map(|event| match event {
            DispatchEvent::PathUpdate { path, .. } => path.len(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(paths, vec![3, 0, 3, 0]);
}

#[tokio::test(start_paused = true)]
async fn busy_units_always_carry_their_dispatch() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(3)));
    let fleet = harness.service.fleet().clone();
    let violations = Arc::new(Mutex::new(Vec::new()));
    let sink = violations.clone();
    let _subs = harness.service.bus().subscribe_all(move |event| {
        for unit in fleet.snapshot() {
            let busy = unit.availability == Availability::Busy;
            if busy != unit.dispatch.is_some() {
                sink.lock().expect("lock").push(unit.id.clone());
            }
        }
        if let DispatchEvent::StatusUpdate { status, .. } = event {
            if status.is_terminal() && fleet.holdings().iter().any(|(_, d)| d == event.dispatch_id()) {
                sink.lock().expect("lock").push(UnitId("terminal-but-held".to_string()));
            }
        }
    });

    let first = harness.service.request_dispatch(request_at(0.1, 0.1));
    let second = harness.service.request_dispatch(request_at(0.9, 0.9));
    assert_ne!(first.unit, second.unit);
    assert_eq!(harness.fleet().available_count(), 0);

    for outcome in harness.service.wait_all().await {
        assert_eq!(outcome.expect("outcome").end, DispatchEnd::Completed);
    }
    assert!(violations.lock().expect("lock").is_empty());
    assert_eq!(harness.fleet().available_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_dispatches_keep_their_own_order() {
    let harness = Harness::new(Arc::new(ScriptedRouteProvider::new(2)));
    let first = harness.service.request_dispatch(request_at(0.1, 0.1));
    support::advance(50).await;
    let second = harness.service.request_dispatch(request_at(0.8, 0.8));

    harness.service.wait_all().await;
    for id in [&first.id, &second.id] {
        let statuses = harness.statuses(id);
        assert_eq!(statuses.last(), Some(&DispatchStatus::Completed));
        assert_strictly_ordered(&statuses);
    }
}
