//! Geometry helpers: planar distances, ETA estimates and nearest lookup.
//!
//! The dispatch area is a single city, so distances use a flat-earth
//! approximation: Euclidean distance in degrees scaled by a fixed
//! degrees-to-kilometres factor. This is what matching, ETA display and
//! nearest-facility lookup all share.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DispatchStatus;

/// Kilometres per degree used by the planar approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Assumed average unit speed in km per minute (about 25 km/h in city traffic).
pub const DEFAULT_AVERAGE_SPEED_KM_PER_MIN: f64 = 0.42;

/// Default tolerance (degrees) for comparing coordinates in tests and guards.
pub const COORDINATE_EPSILON: f64 = 1e-9;

/// A (latitude, longitude) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Geometric equality within `tolerance` degrees on both axes.
    pub fn approx_eq(&self, other: &Coordinate, tolerance: f64) -> bool {
        (self.lat - other.lat).abs() <= tolerance && (self.lng - other.lng).abs() <= tolerance
    }

    /// Linear interpolation in coordinate space; `progress` 0 is `self`, 1 is `to`.
    pub fn lerp(&self, to: &Coordinate, progress: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + (to.lat - self.lat) * progress,
            lng: self.lng + (to.lng - self.lng) * progress,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Anything with a position that can take part in a nearest lookup.
pub trait Located {
    fn location(&self) -> Coordinate;
}

impl Located for Coordinate {
    fn location(&self) -> Coordinate {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("nearest lookup over an empty candidate set")]
    EmptyCandidateSet,
}

/// Planar distance in degrees.
pub fn planar_distance_deg(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = a.lat - b.lat;
    let dlng = a.lng - b.lng;
    (dlat * dlat + dlng * dlng).sqrt()
}

/// Planar distance in kilometres.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    planar_distance_deg(a, b) * KM_PER_DEGREE
}

/// Displayed travel time estimate.
///
/// Anything that rounds up to one minute or less is shown as "Under 1 min";
/// there is no zero or negative estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Eta {
    UnderOneMinute,
    Minutes(u32),
}

impl Eta {
    /// Whole minutes, with `UnderOneMinute` counted as one.
    pub fn minutes(&self) -> u32 {
        match self {
            Eta::UnderOneMinute => 1,
            Eta::Minutes(mins) => *mins,
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::UnderOneMinute => f.write_str("Under 1 min"),
            Eta::Minutes(mins) => write!(f, "{mins} mins"),
        }
    }
}

/// ETA at the default average speed.
pub fn eta(from: Coordinate, to: Coordinate) -> Eta {
    eta_at_speed(from, to, DEFAULT_AVERAGE_SPEED_KM_PER_MIN)
}

/// ETA at `speed_km_per_min`; non-positive speeds are clamped to a crawl.
pub fn eta_at_speed(from: Coordinate, to: Coordinate, speed_km_per_min: f64) -> Eta {
    let speed = speed_km_per_min.max(f64::EPSILON);
    let mins = (distance_km(from, to) / speed).ceil();
    if mins <= 1.0 {
        Eta::UnderOneMinute
    } else if mins >= u32::MAX as f64 {
        Eta::Minutes(u32::MAX)
    } else {
        Eta::Minutes(mins as u32)
    }
}

/// Candidate closest to `point`; ties go to the first one encountered.
pub fn nearest_of<'a, T, I>(point: Coordinate, candidates: I) -> Result<&'a T, GeoError>
where
    T: Located + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut best: Option<(&'a T, f64)> = None;
    for candidate in candidates {
        let dist = planar_distance_deg(point, candidate.location());
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((candidate, dist)),
        }
    }
    best.map(|(candidate, _)| candidate)
        .ok_or(GeoError::EmptyCandidateSet)
}

/// Where the ETA of a dispatch points to, given its status and the unit's
/// current position.
///
/// Before pickup the target is the request site. On the hospital leg it is
/// the facility nearest to the unit right now, re-evaluated on every call.
/// Other statuses have no target.
pub fn eta_target<F: Located>(
    status: DispatchStatus,
    position: Coordinate,
    request: Coordinate,
    facilities: &[F],
) -> Option<Coordinate> {
    match status {
        DispatchStatus::Assigned | DispatchStatus::EnRoute | DispatchStatus::Arrived => {
            Some(request)
        }
        DispatchStatus::EnRouteToHospital => nearest_of(position, facilities)
            .ok()
            .map(|facility| facility.location()),
        _ => None,
    }
}
