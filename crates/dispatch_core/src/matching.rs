use crate::geo::{nearest_of, Coordinate};
use crate::model::{Unit, UnitId};

/// Trait for matching algorithms that pick a unit for a request.
///
/// The fleet registry calls the algorithm while it holds its lock, so
/// implementations must be quick and must not block.
pub trait MatchingAlgorithm: Send + Sync {
    /// Choose one of `available` (all `Available`, registration order) for a
    /// request at `request`, or `None` to leave the request pending.
    fn select(&self, request: Coordinate, available: &[&Unit]) -> Option<UnitId>;
}

/// Nearest available unit by planar distance; ties go to the unit registered
/// first.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestUnitMatching;

impl MatchingAlgorithm for NearestUnitMatching {
    fn select(&self, request: Coordinate, available: &[&Unit]) -> Option<UnitId> {
        nearest_of(request, available.iter().copied())
            .ok()
            .map(|unit| unit.id.clone())
    }
}
