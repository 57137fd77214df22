use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geo::DEFAULT_AVERAGE_SPEED_KM_PER_MIN;
use crate::routing::RouteProviderKind;

/// Default frame cadence: ~60 fps.
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// Default time to cross one route segment.
const DEFAULT_SEGMENT_DURATION_MS: u64 = 300;

/// Default on-scene loading time.
const DEFAULT_LOADING_DWELL_SECS: u64 = 10;

const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 1024;

/// Engine tuning. All fields have defaults, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Wall-clock time between two location frames.
    pub frame_interval_ms: u64,
    /// Wall-clock time to cross one route segment; divided by the frame
    /// interval to get frames per segment.
    pub segment_duration_ms: u64,
    /// How long a unit stays in `LOADING_PATIENT` before leaving for the facility.
    pub loading_dwell_secs: u64,
    /// Average speed used for every ETA estimate.
    pub average_speed_km_per_min: f64,
    pub route_provider: RouteProviderKind,
    pub route_cache_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            segment_duration_ms: DEFAULT_SEGMENT_DURATION_MS,
            loading_dwell_secs: DEFAULT_LOADING_DWELL_SECS,
            average_speed_km_per_min: DEFAULT_AVERAGE_SPEED_KM_PER_MIN,
            route_provider: RouteProviderKind::default(),
            route_cache_capacity: DEFAULT_ROUTE_CACHE_CAPACITY,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: DispatchConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(self.average_speed_km_per_min.is_finite() && self.average_speed_km_per_min > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "average_speed_km_per_min must be a positive number, got {}",
                self.average_speed_km_per_min
            )));
        }
        if let RouteProviderKind::StraightLine { segments: 0 } = self.route_provider {
            return Err(ConfigError::Invalid(
                "straight_line route provider needs at least one segment".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn loading_dwell(&self) -> Duration {
        Duration::from_secs(self.loading_dwell_secs)
    }

    /// Frames emitted per route segment; at least one.
    pub fn frames_per_segment(&self) -> usize {
        let frames = self.segment_duration_ms / self.frame_interval_ms.max(1);
        (frames as usize).max(1)
    }

    pub fn with_frame_interval_ms(mut self, ms: u64) -> Self {
        self.frame_interval_ms = ms;
        self
    }

    pub fn with_segment_duration_ms(mut self, ms: u64) -> Self {
        self.segment_duration_ms = ms;
        self
    }

    pub fn with_loading_dwell_secs(mut self, secs: u64) -> Self {
        self.loading_dwell_secs = secs;
        self
    }

    pub fn with_average_speed_km_per_min(mut self, speed: f64) -> Self {
        self.average_speed_km_per_min = speed;
        self
    }

    pub fn with_route_provider(mut self, kind: RouteProviderKind) -> Self {
        self.route_provider = kind;
        self
    }

    pub fn with_route_cache_capacity(mut self, capacity: usize) -> Self {
        self.route_cache_capacity = capacity;
        self
    }
}
