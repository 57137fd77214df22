//! Fleet seeding: synthetic units around a city centre plus the default
//! facility list.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geo::Coordinate;
use crate::model::{Facility, Unit};

/// Bengaluru city centre.
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    lat: 12.9716,
    lng: 77.5946,
};

const DEFAULT_UNIT_COUNT: usize = 10;
const DEFAULT_SPREAD_DEG: f64 = 0.12;

#[derive(Debug, Clone, PartialEq)]
pub struct FleetSeedParams {
    pub unit_count: usize,
    pub center: Coordinate,
    /// Side of the square seeding box, in degrees.
    pub spread_deg: f64,
    /// Random seed for reproducibility (optional; if None, uses entropy).
    pub seed: Option<u64>,
}

impl Default for FleetSeedParams {
    fn default() -> Self {
        Self {
            unit_count: DEFAULT_UNIT_COUNT,
            center: DEFAULT_CENTER,
            spread_deg: DEFAULT_SPREAD_DEG,
            seed: None,
        }
    }
}

impl FleetSeedParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_unit_count(mut self, count: usize) -> Self {
        self.unit_count = count;
        self
    }

    pub fn with_center(mut self, center: Coordinate) -> Self {
        self.center = center;
        self
    }

    pub fn with_spread_deg(mut self, spread: f64) -> Self {
        self.spread_deg = spread;
        self
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Uniform point within `± spread/2` degrees of `center`.
pub fn random_site<R: Rng>(rng: &mut R, center: Coordinate, spread_deg: f64) -> Coordinate {
    let half = spread_deg.abs() / 2.0;
    if half == 0.0 {
        return center;
    }
    Coordinate::new(
        center.lat + rng.gen_range(-half..=half),
        center.lng + rng.gen_range(-half..=half),
    )
}

fn random_phone<R: Rng>(rng: &mut R) -> String {
    format!("+91 {}", rng.gen_range(6_000_000_000u64..10_000_000_000))
}

/// `AMB-01`, `AMB-02`, ... all `Available`.
pub fn seed_units<R: Rng>(rng: &mut R, params: &FleetSeedParams) -> Vec<Unit> {
    (1..=params.unit_count)
        .map(|n| {
            let location = random_site(rng, params.center, params.spread_deg);
            Unit::new(format!("AMB-{n:02}"), format!("Ambulance {n}"), location)
                .with_phone(random_phone(rng))
        })
        .collect()
}

/// Request sites for a demo run, drawn from the same box as the fleet.
pub fn random_request_sites<R: Rng>(
    rng: &mut R,
    params: &FleetSeedParams,
    count: usize,
) -> Vec<Coordinate> {
    (0..count)
        .map(|_| random_site(rng, params.center, params.spread_deg))
        .collect()
}

const DEFAULT_FACILITIES: [(&str, f64, f64); 14] = [
    ("LifeLink Central Hospital", 12.9716, 77.5946),
    ("St. Mary's Medical Center", 13.0108, 77.5550),
    ("City Trauma Center", 12.9279, 77.6271),
    ("East Side General", 12.9800, 77.7000),
    ("West Gate Health", 12.9600, 77.5300),
    ("Apollo Specialty Jayanagar", 12.9400, 77.5800),
    ("Jayadeva Institute of Cardiology", 12.9204, 77.5930),
    ("Fortis Hospital Bannerghatta", 12.8950, 77.5980),
    ("Narayana Health City", 12.8123, 77.6945),
    ("Sakra World Hospital", 12.9262, 77.6787),
    ("Aster RV Hospital", 12.9134, 77.5824),
    ("Rainbow Children's Hospital", 12.8980, 77.6150),
    ("Manipal Hospital Sarjapur", 12.9155, 77.6655),
    ("St. John's Medical College", 12.9325, 77.6225),
];

pub fn default_facilities() -> Vec<Facility> {
    DEFAULT_FACILITIES
        .iter()
        .map(|&(name, lat, lng)| Facility::new(name, Coordinate::new(lat, lng)))
        .collect()
}
