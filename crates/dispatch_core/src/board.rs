//! Dispatch board: observer-side cache of dispatches built only from bus
//! events.
//!
//! This is what a requester screen or a unit console holds. A `new_dispatch`
//! for an id the board already knows is ignored; updates for unknown ids are
//! dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::events::{DispatchEvent, EventBus, StatusNote, Subscription};
use crate::geo::Coordinate;
use crate::model::{Dispatch, DispatchId, UnitId};

#[derive(Debug, Clone)]
pub struct BoardEntry {
    pub dispatch: Dispatch,
    pub unit_location: Option<Coordinate>,
    pub path: Vec<Coordinate>,
    pub note: Option<StatusNote>,
}

#[derive(Debug, Default)]
struct BoardState {
    entries: HashMap<DispatchId, BoardEntry>,
    /// Arrival order of dispatch ids.
    order: Vec<DispatchId>,
}

impl BoardState {
    fn apply(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::NewDispatch(dispatch) => {
                if self.entries.contains_key(&dispatch.id) {
                    trace!(dispatch_id = %dispatch.id, "duplicate new_dispatch ignored");
                    return;
                }
                self.order.push(dispatch.id.clone());
                self.entries.insert(
                    dispatch.id.clone(),
                    BoardEntry {
                        dispatch: dispatch.clone(),
                        unit_location: None,
                        path: Vec::new(),
                        note: None,
                    },
                );
            }
            DispatchEvent::StatusUpdate {
                dispatch_id,
                status,
                note,
            } => {
                if let Some(entry) = self.entries.get_mut(dispatch_id) {
                    entry.dispatch.status = *status;
                    if status.is_terminal() {
                        entry.dispatch.eta = None;
                    }
                    if note.is_some() {
                        entry.note = note.clone();
                    }
                }
            }
            DispatchEvent::LocationUpdate {
                dispatch_id,
                unit_id,
                location,
                eta,
            } => {
                if let Some(entry) = self.entries.get_mut(dispatch_id) {
                    entry.unit_location = Some(*location);
                    entry.dispatch.eta = *eta;
                    if entry.dispatch.unit.is_none() {
                        entry.dispatch.unit = Some(unit_id.clone());
                    }
                }
            }
            DispatchEvent::PathUpdate { dispatch_id, path } => {
                if let Some(entry) = self.entries.get_mut(dispatch_id) {
                    entry.path = path.clone();
                }
            }
        }
    }
}

/// Keeps its bus subscriptions alive for as long as it exists.
pub struct DispatchBoard {
    state: Arc<Mutex<BoardState>>,
    _subscriptions: Vec<Subscription>,
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatchBoard {
    pub fn attach(bus: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(BoardState::default()));
        let sink = state.clone();
        let subscriptions = bus.subscribe_all(move |event| lock(&sink).apply(event));
        Self {
            state,
            _subscriptions: subscriptions,
        }
    }

    pub fn get(&self, id: &DispatchId) -> Option<Dispatch> {
        lock(&self.state)
            .entries
            .get(id)
            .map(|entry| entry.dispatch.clone())
    }

    pub fn entry(&self, id: &DispatchId) -> Option<BoardEntry> {
        lock(&self.state).entries.get(id).cloned()
    }

    /// Every dispatch seen so far, in arrival order.
    pub fn all(&self) -> Vec<Dispatch> {
        let state = lock(&self.state);
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|entry| entry.dispatch.clone())
            .collect()
    }

    /// Non-terminal dispatches, in arrival order.
    pub fn active(&self) -> Vec<Dispatch> {
        self.all()
            .into_iter()
            .filter(Dispatch::is_active)
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last broadcast position of the unit serving `id`.
    pub fn unit_location(&self, id: &DispatchId) -> Option<Coordinate> {
        lock(&self.state)
            .entries
            .get(id)
            .and_then(|entry| entry.unit_location)
    }

    /// Current route polyline; empty when nothing is drawn.
    pub fn path(&self, id: &DispatchId) -> Vec<Coordinate> {
        lock(&self.state)
            .entries
            .get(id)
            .map(|entry| entry.path.clone())
            .unwrap_or_default()
    }

    /// Dispatch the unit console for `unit` would show.
    pub fn assigned_to(&self, unit: &UnitId) -> Option<Dispatch> {
        self.active()
            .into_iter()
            .find(|dispatch| dispatch.unit.as_ref() == Some(unit))
    }
}
