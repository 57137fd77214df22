//! Domain records: units, facilities, dispatches and the dispatch status
//! machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{Coordinate, Eta, Located};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchId(pub String);

impl DispatchId {
    /// Fresh `DISP-xxxxxxxxx` identifier.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("DISP-{}", &raw[..9]))
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Busy,
    Offline,
}

/// A responder vehicle.
///
/// `availability == Busy` and `dispatch.is_some()` always change together;
/// only [`FleetRegistry`](crate::fleet::FleetRegistry) flips them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub phone: String,
    pub location: Coordinate,
    pub availability: Availability,
    /// Dispatch currently holding this unit.
    pub dispatch: Option<DispatchId>,
}

impl Unit {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: Coordinate) -> Self {
        Self {
            id: UnitId(id.into()),
            name: name.into(),
            phone: String::new(),
            location,
            availability: Availability::Available,
            dispatch: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn offline(mut self) -> Self {
        self.availability = Availability::Offline;
        self
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

impl Located for Unit {
    fn location(&self) -> Coordinate {
        self.location
    }
}

/// Static destination candidate for the hospital leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub name: String,
    pub location: Coordinate,
}

impl Facility {
    pub fn new(name: impl Into<String>, location: Coordinate) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

impl Located for Facility {
    fn location(&self) -> Coordinate {
        self.location
    }
}

/// Lifecycle of a dispatch. Variants are declared in lifecycle order, so the
/// derived `Ord` is the state-machine order (`Cancelled` sorts last but is
/// only reachable through [`DispatchStatus::can_transition_to`]'s cancel edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Pending,
    Assigned,
    EnRoute,
    Arrived,
    LoadingPatient,
    EnRouteToHospital,
    Completed,
    Cancelled,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchStatus::Completed | DispatchStatus::Cancelled)
    }

    /// Forward moves only, plus cancel from any non-terminal state.
    /// `Completed` is reachable from any later-than-pending state because a
    /// routing failure short-circuits the remaining phases.
    pub fn can_transition_to(self, next: DispatchStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DispatchStatus::Cancelled => true,
            DispatchStatus::Completed => self != DispatchStatus::Pending,
            _ => next > self,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Pending => "PENDING",
            DispatchStatus::Assigned => "ASSIGNED",
            DispatchStatus::EnRoute => "EN_ROUTE",
            DispatchStatus::Arrived => "ARRIVED",
            DispatchStatus::LoadingPatient => "LOADING_PATIENT",
            DispatchStatus::EnRouteToHospital => "EN_ROUTE_TO_HOSPITAL",
            DispatchStatus::Completed => "COMPLETED",
            DispatchStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    pub phone: String,
}

impl Requester {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }
}

/// Inbound `request_dispatch` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub location: Coordinate,
    pub requester: Requester,
}

impl DispatchRequest {
    pub fn new(location: Coordinate, requester: Requester) -> Self {
        Self {
            location,
            requester,
        }
    }
}

/// One emergency request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: DispatchId,
    pub requester: Requester,
    /// Request site; fixed for the life of the dispatch.
    pub location: Coordinate,
    pub status: DispatchStatus,
    pub unit: Option<UnitId>,
    pub eta: Option<Eta>,
    pub created_at: DateTime<Utc>,
}

impl Dispatch {
    /// New unassigned dispatch in `Pending`.
    pub fn from_request(request: DispatchRequest) -> Self {
        Self {
            id: DispatchId::generate(),
            requester: request.requester,
            location: request.location,
            status: DispatchStatus::Pending,
            unit: None,
            eta: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
