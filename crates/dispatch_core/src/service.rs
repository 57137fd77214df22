//! Dispatch service: the per-session object that accepts requests.
//!
//! It owns the handles of running dispatch tasks and the list of dispatches
//! still waiting for a unit. Created once at startup and shared by reference.
//!
//! Join handles and cancel signals are kept apart: taking a handle to wait on
//! it leaves the dispatch cancellable until its task ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::assignment::{assign, try_assign};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventBus};
use crate::fleet::FleetRegistry;
use crate::matching::{MatchingAlgorithm, NearestUnitMatching};
use crate::model::{Dispatch, DispatchId, DispatchRequest, DispatchStatus};
use crate::orchestrator::{
    DispatchCanceller, DispatchHandle, DispatchOrchestrator, DispatchOutcome,
};
use crate::routing::RouteProvider;

#[derive(Default)]
struct ServiceState {
    /// Join handles not yet taken by `wait`.
    running: HashMap<DispatchId, DispatchHandle>,
    cancellers: HashMap<DispatchId, DispatchCanceller>,
    /// Unmatched dispatches, oldest first.
    pending: Vec<Dispatch>,
}

impl ServiceState {
    fn track(&mut self, handle: DispatchHandle) {
        self.cancellers.insert(handle.id().clone(), handle.canceller());
        self.running.insert(handle.id().clone(), handle);
    }

    /// Forget tasks that have ended.
    fn reap(&mut self) {
        self.running.retain(|_, handle| !handle.is_finished());
        self.cancellers.retain(|_, canceller| !canceller.is_finished());
    }
}

pub struct DispatchService {
    fleet: Arc<FleetRegistry>,
    bus: EventBus,
    config: DispatchConfig,
    matcher: Box<dyn MatchingAlgorithm>,
    orchestrator: DispatchOrchestrator,
    state: Mutex<ServiceState>,
}

impl DispatchService {
    pub fn new(
        fleet: Arc<FleetRegistry>,
        bus: EventBus,
        routes: Arc<dyn RouteProvider>,
        config: DispatchConfig,
    ) -> Self {
        let orchestrator = DispatchOrchestrator::new(fleet.clone(), bus.clone(), routes, &config);
        Self {
            fleet,
            bus,
            config,
            matcher: Box::new(NearestUnitMatching),
            orchestrator,
            state: Mutex::new(ServiceState::default()),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn MatchingAlgorithm>) -> Self {
        self.matcher = matcher;
        self
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fleet(&self) -> &Arc<FleetRegistry> {
        &self.fleet
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Inbound `request_dispatch` action. Returns the dispatch as created:
    /// `ASSIGNED` with a running lifecycle task, or `PENDING`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_dispatch(&self, request: DispatchRequest) -> Dispatch {
        let assignment = assign(
            request,
            &self.fleet,
            self.matcher.as_ref(),
            &self.config,
            &self.bus,
        );
        let dispatch = assignment.dispatch;
        let mut state = self.state();
        state.reap();
        match assignment.unit {
            Some(unit) => {
                let handle = self.orchestrator.start(dispatch.clone(), unit.id);
                state.track(handle);
            }
            None => state.pending.push(dispatch.clone()),
        }
        dispatch
    }

    /// Cancel a dispatch that has not reached a terminal status.
    ///
    /// Running dispatches are signalled and publish `CANCELLED` from their
    /// own task; pending ones are closed here.
    pub fn cancel(&self, id: &DispatchId) -> Result<(), DispatchError> {
        let mut state = self.state();
        if let Some(canceller) = state.cancellers.get(id) {
            if canceller.cancel() {
                info!(dispatch_id = %id, "cancellation requested");
                return Ok(());
            }
            return Err(DispatchError::UnknownDispatch(id.clone()));
        }
        let index = state
            .pending
            .iter()
            .position(|dispatch| &dispatch.id == id)
            .ok_or_else(|| DispatchError::UnknownDispatch(id.clone()))?;
        state.pending.remove(index);
        drop(state);

        info!(dispatch_id = %id, "pending dispatch cancelled");
        self.bus
            .publish(DispatchEvent::status(id, DispatchStatus::Cancelled));
        Ok(())
    }

    /// Manual re-match of a pending dispatch. Returns the dispatch as it now
    /// stands; it stays pending if no unit is free.
    pub fn rematch_pending(&self, id: &DispatchId) -> Result<Dispatch, DispatchError> {
        let mut state = self.state();
        if state.cancellers.contains_key(id) {
            return Err(DispatchError::NotPending(id.clone()));
        }
        let index = state
            .pending
            .iter()
            .position(|dispatch| &dispatch.id == id)
            .ok_or_else(|| DispatchError::UnknownDispatch(id.clone()))?;

        // Taken out while matching so subscribers never run under the state lock.
        let mut dispatch = state.pending.remove(index);
        drop(state);

        let claimed = try_assign(
            &mut dispatch,
            &self.fleet,
            self.matcher.as_ref(),
            &self.config,
            &self.bus,
        );
        let mut state = self.state();
        match claimed {
            Some(unit) => {
                let handle = self.orchestrator.start(dispatch.clone(), unit.id);
                state.track(handle);
            }
            None => {
                let index = index.min(state.pending.len());
                state.pending.insert(index, dispatch.clone());
            }
        }
        Ok(dispatch)
    }

    pub fn pending(&self) -> Vec<Dispatch> {
        self.state().pending.clone()
    }

    /// Ids of dispatches whose lifecycle task has not finished yet.
    pub fn running(&self) -> Vec<DispatchId> {
        self.state()
            .cancellers
            .iter()
            .filter(|(_, canceller)| !canceller.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Wait for a dispatch task to finish and take its outcome. Finished
    /// tasks are dropped on the next `request_dispatch`, so their outcomes
    /// must be taken before that. The dispatch can still be cancelled while
    /// this waits.
    pub async fn wait(&self, id: &DispatchId) -> Result<DispatchOutcome, DispatchError> {
        let handle = self
            .state()
            .running
            .remove(id)
            .ok_or_else(|| DispatchError::UnknownDispatch(id.clone()))?;
        handle.join().await
    }

    /// Wait for every running dispatch task.
    pub async fn wait_all(&self) -> Vec<Result<DispatchOutcome, DispatchError>> {
        let handles: Vec<DispatchHandle> = self.state().running.drain().map(|(_, h)| h).collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.join().await);
        }
        outcomes
    }
}
