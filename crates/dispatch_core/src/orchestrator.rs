//! Dispatch orchestrator: drives one assigned dispatch through its lifecycle.
//!
//! Every dispatch gets its own tokio task. The task only suspends while
//! fetching a route, waiting for a movement frame, or holding the loading
//! dwell, and it checks the cancel signal at each of those points:
//!
//! ```text
//! ASSIGNED -> EN_ROUTE -> ARRIVED -> LOADING_PATIENT -> EN_ROUTE_TO_HOSPITAL -> COMPLETED
//!     \__________\___________\______________\___________________\______-> CANCELLED
//! ```
//!
//! A routing failure on either leg ends the dispatch as `COMPLETED` with a
//! [`StatusNote::RoutingFailed`] note. It is never retried, so a unit cannot
//! stay `BUSY` behind a dead routing service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, RoutingError};
use crate::events::{DispatchEvent, EventBus, Leg, StatusNote};
use crate::fleet::FleetRegistry;
use crate::geo::{eta_at_speed, eta_target, nearest_of, Coordinate, Located};
use crate::model::{Dispatch, DispatchId, DispatchStatus, UnitId};
use crate::movement::MovementSimulator;
use crate::routing::{Route, RouteProvider};

/// How a dispatch task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEnd {
    Completed,
    Cancelled,
    /// Published to observers as `COMPLETED`.
    RoutingFailed { leg: Leg, error: RoutingError },
}

/// Final record handed back by a finished dispatch task.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub dispatch: Dispatch,
    pub end: DispatchEnd,
}

/// Cancel side of a running dispatch task. Cheap to clone; stays usable
/// while someone else awaits the task.
#[derive(Debug, Clone)]
pub struct DispatchCanceller {
    signal: Arc<watch::Sender<bool>>,
}

impl DispatchCanceller {
    /// Ask the task to stop. Returns false if it has already finished, in
    /// which case its outcome stands.
    pub fn cancel(&self) -> bool {
        self.signal.send_replace(true);
        !self.is_finished()
    }

    /// The task drops its receiver when it ends.
    pub fn is_finished(&self) -> bool {
        self.signal.is_closed()
    }
}

/// Owner's side of a running dispatch task.
#[derive(Debug)]
pub struct DispatchHandle {
    id: DispatchId,
    canceller: DispatchCanceller,
    task: JoinHandle<DispatchOutcome>,
}

impl DispatchHandle {
    pub fn id(&self) -> &DispatchId {
        &self.id
    }

    pub fn canceller(&self) -> DispatchCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<DispatchOutcome, DispatchError> {
        self.task
            .await
            .map_err(|err| DispatchError::TaskFailed(err.to_string()))
    }
}

/// Spawns and configures dispatch tasks. Cheap to clone.
#[derive(Clone)]
pub struct DispatchOrchestrator {
    fleet: Arc<FleetRegistry>,
    bus: EventBus,
    routes: Arc<dyn RouteProvider>,
    movement: MovementSimulator,
    dwell: Duration,
    speed_km_per_min: f64,
}

impl DispatchOrchestrator {
    pub fn new(
        fleet: Arc<FleetRegistry>,
        bus: EventBus,
        routes: Arc<dyn RouteProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            fleet,
            bus,
            routes,
            movement: MovementSimulator::from_config(config),
            dwell: config.loading_dwell(),
            speed_km_per_min: config.average_speed_km_per_min,
        }
    }

    /// Spawn the lifecycle task for an `ASSIGNED` dispatch holding `unit`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, mut dispatch: Dispatch, unit: UnitId) -> DispatchHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = dispatch.id.clone();
        dispatch.unit = Some(unit.clone());
        let run = DispatchRun::new(self.clone(), dispatch, unit, cancel_rx);
        let task = tokio::spawn(run.run());
        DispatchHandle {
            id,
            canceller: DispatchCanceller {
                signal: Arc::new(cancel_tx),
            },
            task,
        }
    }
}

enum Stop {
    Cancelled,
    Routing { leg: Leg, error: RoutingError },
}

async fn cancelled(signal: &mut watch::Receiver<bool>) {
    // With every canceller dropped nothing can cancel; wait forever then.
    let closed = signal.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

struct DispatchRun {
    ctx: DispatchOrchestrator,
    dispatch: Dispatch,
    unit_id: UnitId,
    position: Coordinate,
    cancel: watch::Receiver<bool>,
    path_drawn: bool,
}

impl DispatchRun {
    fn new(
        ctx: DispatchOrchestrator,
        dispatch: Dispatch,
        unit_id: UnitId,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let position = ctx
            .fleet
            .unit(&unit_id)
            .map(|unit| unit.location)
            .unwrap_or(dispatch.location);
        Self {
            ctx,
            dispatch,
            unit_id,
            position,
            cancel,
            path_drawn: false,
        }
    }

    async fn run(mut self) -> DispatchOutcome {
        let end = match self.lifecycle().await {
            Ok(()) => DispatchEnd::Completed,
            Err(Stop::Cancelled) => DispatchEnd::Cancelled,
            Err(Stop::Routing { leg, error }) => {
                warn!(
                    dispatch_id = %self.dispatch.id,
                    %leg,
                    error = %error,
                    "routing failed, closing dispatch as completed"
                );
                DispatchEnd::RoutingFailed { leg, error }
            }
        };
        self.finish(end)
    }

    async fn lifecycle(&mut self) -> Result<(), Stop> {
        debug!(dispatch_id = %self.dispatch.id, unit_id = %self.unit_id, "dispatch task started");

        // Pickup leg.
        let route = self
            .fetch_route(Leg::Pickup, self.position, self.dispatch.location)
            .await?;
        self.advance(DispatchStatus::EnRoute);
        self.publish_path(&route);
        self.drive(route).await?;
        self.advance(DispatchStatus::Arrived);
        self.clear_path();

        // On scene.
        self.advance(DispatchStatus::LoadingPatient);
        self.dwell().await?;

        // Hospital leg.
        let facility = nearest_of(self.dispatch.location, self.ctx.fleet.facilities())
            .map(|facility| facility.location())
            .map_err(|_| Stop::Routing {
                leg: Leg::Hospital,
                error: RoutingError::NoRoute("no facility registered".to_string()),
            })?;
        let route = self
            .fetch_route(Leg::Hospital, self.position, facility)
            .await?;
        self.advance(DispatchStatus::EnRouteToHospital);
        self.publish_path(&route);
        self.drive(route).await?;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), Stop> {
        if *self.cancel.borrow() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A fetch already in flight is allowed to finish; its result is dropped
    /// if the dispatch was cancelled meanwhile.
    async fn fetch_route(
        &mut self,
        leg: Leg,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, Stop> {
        self.check_cancelled()?;
        let result = self.ctx.routes.route(origin, destination).await;
        self.check_cancelled()?;
        let route = result.map_err(|error| Stop::Routing { leg, error })?;
        debug!(
            dispatch_id = %self.dispatch.id,
            %leg,
            waypoints = route.len(),
            "route received"
        );
        Ok(route)
    }

    async fn drive(&mut self, route: Route) -> Result<(), Stop> {
        let mut drive = self.ctx.movement.drive(route);
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Err(Stop::Cancelled),
                frame = drive.next_frame() => frame,
            };
            match frame {
                Some(position) => self.on_frame(position),
                None => return Ok(()),
            }
        }
    }

    async fn dwell(&mut self) -> Result<(), Stop> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Err(Stop::Cancelled),
            _ = tokio::time::sleep(self.ctx.dwell) => Ok(()),
        }
    }

    fn on_frame(&mut self, position: Coordinate) {
        self.position = position;
        self.ctx
            .fleet
            .update_position(&self.unit_id, &self.dispatch.id, position);

        let eta = eta_target(
            self.dispatch.status,
            position,
            self.dispatch.location,
            self.ctx.fleet.facilities(),
        )
        .map(|target| eta_at_speed(position, target, self.ctx.speed_km_per_min));
        self.dispatch.eta = eta;

        trace!(dispatch_id = %self.dispatch.id, %position, "frame");
        self.ctx.bus.publish(DispatchEvent::LocationUpdate {
            dispatch_id: self.dispatch.id.clone(),
            unit_id: self.unit_id.clone(),
            location: position,
            eta,
        });
    }

    fn advance(&mut self, next: DispatchStatus) {
        debug_assert!(
            self.dispatch.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.dispatch.status,
            next
        );
        self.dispatch.status = next;
        debug!(dispatch_id = %self.dispatch.id, status = %next, "status changed");
        self.ctx
            .bus
            .publish(DispatchEvent::status(&self.dispatch.id, next));
    }

    fn publish_path(&mut self, route: &Route) {
        self.path_drawn = !route.is_empty();
        self.ctx.bus.publish(DispatchEvent::PathUpdate {
            dispatch_id: self.dispatch.id.clone(),
            path: route.waypoints().to_vec(),
        });
    }

    fn clear_path(&mut self) {
        self.path_drawn = false;
        self.ctx.bus.publish(DispatchEvent::PathUpdate {
            dispatch_id: self.dispatch.id.clone(),
            path: Vec::new(),
        });
    }

    /// Release the unit, clear any drawn path, then publish the terminal
    /// status exactly once.
    fn finish(mut self, end: DispatchEnd) -> DispatchOutcome {
        self.ctx.fleet.release(&self.unit_id, &self.dispatch.id);
        if self.path_drawn {
            self.clear_path();
        }

        let (status, note) = match &end {
            DispatchEnd::Completed => (DispatchStatus::Completed, None),
            DispatchEnd::Cancelled => (DispatchStatus::Cancelled, None),
            DispatchEnd::RoutingFailed { leg, error } => (
                DispatchStatus::Completed,
                Some(StatusNote::RoutingFailed {
                    leg: *leg,
                    reason: error.to_string(),
                }),
            ),
        };
        self.dispatch.status = status;
        self.dispatch.eta = None;
        self.ctx.bus.publish(DispatchEvent::StatusUpdate {
            dispatch_id: self.dispatch.id.clone(),
            status,
            note,
        });
        info!(
            dispatch_id = %self.dispatch.id,
            unit_id = %self.unit_id,
            %status,
            "dispatch finished"
        );

        DispatchOutcome {
            dispatch: self.dispatch,
            end,
        }
    }
}
