//! Error types shared across the engine.
//!
//! There is no "no unit available" error: an unmatched request becomes a
//! `Pending` dispatch.

use thiserror::Error;

use crate::geo::GeoError;
use crate::model::DispatchId;

/// Failure of the external routing provider for one leg.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no route found: {0}")]
    NoRoute(String),
    #[error("routing provider unreachable: {0}")]
    Unreachable(String),
    #[error("invalid routing response: {0}")]
    InvalidResponse(String),
    #[error("routing provider returned an empty route")]
    EmptyRoute,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown or finished dispatch {0}")]
    UnknownDispatch(DispatchId),
    #[error("dispatch {0} already has a unit")]
    NotPending(DispatchId),
    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
    #[error(transparent)]
    Geo(#[from] GeoError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
