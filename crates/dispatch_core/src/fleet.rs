//! Fleet registry: the single owner of unit records.
//!
//! Every availability flip goes through one mutex, so a unit is held by at
//! most one dispatch at a time and `Busy` never exists without the dispatch
//! reference that explains it. The lock is never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::geo::Coordinate;
use crate::model::{Availability, DispatchId, Facility, Unit, UnitId};

#[derive(Debug, Default)]
pub struct FleetRegistry {
    units: Mutex<Vec<Unit>>,
    facilities: Vec<Facility>,
}

impl FleetRegistry {
    /// Units are taken as seeded: any `Busy` flag without a dispatch is reset
    /// to `Available` so the registry starts consistent.
    pub fn new(units: Vec<Unit>, facilities: Vec<Facility>) -> Self {
        let units = units
            .into_iter()
            .map(|mut unit| {
                if unit.availability == Availability::Busy || unit.dispatch.is_some() {
                    unit.availability = Availability::Available;
                    unit.dispatch = None;
                }
                unit
            })
            .collect();
        Self {
            units: Mutex::new(units),
            facilities,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Unit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn facilities(&self) -> &[Facility] {
        &self.facilities
    }

    /// Copy of every unit, in registration order.
    pub fn snapshot(&self) -> Vec<Unit> {
        self.lock().clone()
    }

    pub fn unit(&self, id: &UnitId) -> Option<Unit> {
        self.lock().iter().find(|unit| &unit.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.lock().iter().filter(|unit| unit.is_available()).count()
    }

    /// (unit, dispatch) pairs for every unit currently held.
    pub fn holdings(&self) -> Vec<(UnitId, DispatchId)> {
        self.lock()
            .iter()
            .filter_map(|unit| unit.dispatch.clone().map(|d| (unit.id.clone(), d)))
            .collect()
    }

    /// Atomically pick and claim a unit for `dispatch_id`.
    ///
    /// `select` sees the available units (registration order) and names one;
    /// the registry flips it to `Busy` before the lock is released and returns
    /// a copy of the claimed record. `None` leaves the fleet untouched.
    pub fn claim_with<F>(&self, dispatch_id: &DispatchId, select: F) -> Option<Unit>
    where
        F: FnOnce(&[&Unit]) -> Option<UnitId>,
    {
        let mut units = self.lock();
        let chosen = {
            let available: Vec<&Unit> = units.iter().filter(|unit| unit.is_available()).collect();
            select(&available)?
        };
        let unit = units
            .iter_mut()
            .find(|unit| unit.id == chosen && unit.is_available())?;
        unit.availability = Availability::Busy;
        unit.dispatch = Some(dispatch_id.clone());
        debug!(unit_id = %unit.id, dispatch_id = %dispatch_id, "unit claimed");
        Some(unit.clone())
    }

    /// Move a held unit. Ignored unless `dispatch_id` holds it.
    pub fn update_position(
        &self,
        unit_id: &UnitId,
        dispatch_id: &DispatchId,
        location: Coordinate,
    ) -> bool {
        let mut units = self.lock();
        match units
            .iter_mut()
            .find(|unit| &unit.id == unit_id && unit.dispatch.as_ref() == Some(dispatch_id))
        {
            Some(unit) => {
                unit.location = location;
                true
            }
            None => false,
        }
    }

    /// Hand a unit back to `Available`. Ignored unless `dispatch_id` holds it,
    /// so a second release for the same dispatch is a no-op.
    pub fn release(&self, unit_id: &UnitId, dispatch_id: &DispatchId) -> bool {
        let mut units = self.lock();
        match units
            .iter_mut()
            .find(|unit| &unit.id == unit_id && unit.dispatch.as_ref() == Some(dispatch_id))
        {
            Some(unit) => {
                unit.availability = Availability::Available;
                unit.dispatch = None;
                debug!(unit_id = %unit_id, dispatch_id = %dispatch_id, "unit released");
                true
            }
            None => false,
        }
    }

    /// Take an idle unit out of rotation. Held units cannot go offline.
    pub fn set_offline(&self, unit_id: &UnitId) -> bool {
        self.set_idle_availability(unit_id, Availability::Available, Availability::Offline)
    }

    pub fn set_online(&self, unit_id: &UnitId) -> bool {
        self.set_idle_availability(unit_id, Availability::Offline, Availability::Available)
    }

    fn set_idle_availability(&self, unit_id: &UnitId, from: Availability, to: Availability) -> bool {
        let mut units = self.lock();
        match units
            .iter_mut()
            .find(|unit| &unit.id == unit_id && unit.availability == from)
        {
            Some(unit) => {
                unit.availability = to;
                true
            }
            None => false,
        }
    }
}
