pub mod assignment;
pub mod board;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod geo;
pub mod matching;
pub mod model;
pub mod movement;
pub mod orchestrator;
pub mod routing;
pub mod seeding;
pub mod service;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
