//! Telemetry / KPIs: counts dispatch events and records finished dispatches.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::events::{DispatchEvent, EventBus, Leg, StatusNote, Subscription};
use crate::model::{DispatchId, DispatchStatus};

/// One dispatch that reached a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedDispatchRecord {
    pub dispatch_id: DispatchId,
    pub status: DispatchStatus,
    /// Set when the dispatch was closed because routing failed.
    pub routing_failed: Option<Leg>,
    pub requested_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl CompletedDispatchRecord {
    /// Wall-clock time from request to terminal status, if the request was seen.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.requested_at.map(|at| self.finished_at - at)
    }
}

/// Aggregated counts at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub created: usize,
    /// Dispatches created without a unit that are still waiting for one.
    pub pending: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub routing_failures: usize,
    pub location_frames: usize,
    pub paths_drawn: usize,
}

#[derive(Debug, Default)]
struct TelemetryState {
    counts: DispatchCounts,
    requested_at: HashMap<DispatchId, DateTime<Utc>>,
    waiting: HashSet<DispatchId>,
    finished: Vec<CompletedDispatchRecord>,
}

impl TelemetryState {
    fn record(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::NewDispatch(dispatch) => {
                self.counts.created += 1;
                if dispatch.status == DispatchStatus::Pending
                    && self.waiting.insert(dispatch.id.clone())
                {
                    self.counts.pending += 1;
                }
                self.requested_at
                    .insert(dispatch.id.clone(), dispatch.created_at);
            }
            DispatchEvent::StatusUpdate {
                dispatch_id,
                status,
                note,
            } => {
                // Any later status means the dispatch left the queue.
                if self.waiting.remove(dispatch_id) {
                    self.counts.pending -= 1;
                }
                match status {
                    DispatchStatus::Completed => self.counts.completed += 1,
                    DispatchStatus::Cancelled => self.counts.cancelled += 1,
                    _ => return,
                }
                let routing_failed = match note {
                    Some(StatusNote::RoutingFailed { leg, .. }) => {
                        self.counts.routing_failures += 1;
                        Some(*leg)
                    }
                    None => None,
                };
                self.finished.push(CompletedDispatchRecord {
                    dispatch_id: dispatch_id.clone(),
                    status: *status,
                    routing_failed,
                    requested_at: self.requested_at.remove(dispatch_id),
                    finished_at: Utc::now(),
                });
            }
            DispatchEvent::LocationUpdate { .. } => self.counts.location_frames += 1,
            DispatchEvent::PathUpdate { path, .. } => {
                if !path.is_empty() {
                    self.counts.paths_drawn += 1;
                }
            }
        }
    }
}

/// Collects dispatch telemetry for as long as it is alive.
pub struct DispatchTelemetry {
    state: Arc<Mutex<TelemetryState>>,
    _subscriptions: Vec<Subscription>,
}

fn lock(state: &Mutex<TelemetryState>) -> MutexGuard<'_, TelemetryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatchTelemetry {
    pub fn attach(bus: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(TelemetryState::default()));
        let sink = state.clone();
        let subscriptions = bus.subscribe_all(move |event| lock(&sink).record(event));
        Self {
            state,
            _subscriptions: subscriptions,
        }
    }

    pub fn counts(&self) -> DispatchCounts {
        lock(&self.state).counts.clone()
    }

    pub fn finished(&self) -> Vec<CompletedDispatchRecord> {
        lock(&self.state).finished.clone()
    }
}
