//! Dispatch assignment: turn a request into a dispatch and, when a unit is
//! free, claim the nearest one for it in the same registry transaction.

use tracing::info;

use crate::config::DispatchConfig;
use crate::events::{DispatchEvent, EventBus};
use crate::fleet::FleetRegistry;
use crate::geo::eta_at_speed;
use crate::matching::MatchingAlgorithm;
use crate::model::{Dispatch, DispatchRequest, DispatchStatus, Unit};

/// Result of [`assign`]: the new dispatch plus a copy of the claimed unit as
/// it was at claim time. `unit == None` means the dispatch is `Pending`.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub dispatch: Dispatch,
    pub unit: Option<Unit>,
}

impl Assignment {
    pub fn is_assigned(&self) -> bool {
        self.unit.is_some()
    }
}

/// Create a dispatch for `request` and try to match it.
///
/// Publishes `new_dispatch` exactly once, after the claim (if any) is done,
/// so observers never see a `Busy` unit without its dispatch.
pub fn assign(
    request: DispatchRequest,
    fleet: &FleetRegistry,
    matcher: &dyn MatchingAlgorithm,
    config: &DispatchConfig,
    bus: &EventBus,
) -> Assignment {
    let mut dispatch = Dispatch::from_request(request);
    let unit = claim_unit(&mut dispatch, fleet, matcher, config);
    match &unit {
        Some(unit) => info!(
            dispatch_id = %dispatch.id,
            unit_id = %unit.id,
            eta = ?dispatch.eta.map(|eta| eta.to_string()),
            "dispatch assigned"
        ),
        None => info!(dispatch_id = %dispatch.id, "no unit available, dispatch pending"),
    }
    bus.publish(DispatchEvent::NewDispatch(dispatch.clone()));
    Assignment { dispatch, unit }
}

/// Re-match an existing `Pending` dispatch. On success the dispatch moves to
/// `Assigned` and a status update is published; otherwise nothing changes.
pub fn try_assign(
    dispatch: &mut Dispatch,
    fleet: &FleetRegistry,
    matcher: &dyn MatchingAlgorithm,
    config: &DispatchConfig,
    bus: &EventBus,
) -> Option<Unit> {
    if dispatch.status != DispatchStatus::Pending {
        return None;
    }
    let unit = claim_unit(dispatch, fleet, matcher, config)?;
    info!(dispatch_id = %dispatch.id, unit_id = %unit.id, "pending dispatch re-matched");
    bus.publish(DispatchEvent::status(&dispatch.id, dispatch.status));
    Some(unit)
}

fn claim_unit(
    dispatch: &mut Dispatch,
    fleet: &FleetRegistry,
    matcher: &dyn MatchingAlgorithm,
    config: &DispatchConfig,
) -> Option<Unit> {
    let request = dispatch.location;
    let unit = fleet.claim_with(&dispatch.id, |available| matcher.select(request, available))?;
    dispatch.unit = Some(unit.id.clone());
    dispatch.status = DispatchStatus::Assigned;
    dispatch.eta = Some(eta_at_speed(
        unit.location,
        request,
        config.average_speed_km_per_min,
    ));
    Some(unit)
}
