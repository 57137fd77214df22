//! Pluggable route providers: trait abstraction for routing backends.
//!
//! Implementations, selectable via [`RouteProviderKind`]:
//!
//! - **`StraightLineRouteProvider`**: straight polyline between the two points. Zero dependencies.
//! - **`OsrmRouteProvider`** (feature `osrm`): calls a local/remote OSRM HTTP endpoint.
//!
//! Network-backed providers are wrapped in a [`CachedRouteProvider`]. The
//! orchestrator holds the provider as an `Arc<dyn RouteProvider>`.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
#[cfg(feature = "osrm")]
use tracing::warn;

use crate::error::RoutingError;
use crate::geo::Coordinate;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Ordered, non-empty polyline for one directed leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    waypoints: Vec<Coordinate>,
}

impl Route {
    pub fn new(waypoints: Vec<Coordinate>) -> Result<Self, RoutingError> {
        if waypoints.is_empty() {
            return Err(RoutingError::EmptyRoute);
        }
        Ok(Self { waypoints })
    }

    pub fn waypoints(&self) -> &[Coordinate] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Always false for a constructed route; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn into_waypoints(self) -> Vec<Coordinate> {
        self.waypoints
    }
}

/// Which routing backend to use. Stored in [`DispatchConfig`](crate::config::DispatchConfig).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteProviderKind {
    /// Straight polyline split into `segments` equal pieces.
    StraightLine { segments: usize },
    /// OSRM HTTP endpoint (e.g. `"https://router.project-osrm.org"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

impl Default for RouteProviderKind {
    fn default() -> Self {
        RouteProviderKind::StraightLine { segments: 8 }
    }
}

/// Routing backend. Must be `Send + Sync` so one provider can serve every
/// dispatch task.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Route from `origin` to `destination`.
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RoutingError>;
}

// ---------------------------------------------------------------------------
// Straight-line provider (always available)
// ---------------------------------------------------------------------------

/// Straight polyline with `segments + 1` evenly spaced waypoints.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouteProvider {
    pub segments: usize,
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        Self { segments: 8 }
    }
}

#[async_trait]
impl RouteProvider for StraightLineRouteProvider {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        let segments = self.segments.max(1);
        let waypoints = (0..=segments)
            .map(|i| origin.lerp(&destination, i as f64 / segments as f64))
            .collect();
        Route::new(waypoints)
    }
}

// ---------------------------------------------------------------------------
// OSRM provider (behind `osrm` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "osrm")]
pub mod osrm {
    use super::*;
    use reqwest::Client;
    use std::time::Duration;

    /// Routes via an OSRM HTTP endpoint.
    pub struct OsrmRouteProvider {
        client: Client,
        endpoint: String,
    }

    impl OsrmRouteProvider {
        pub fn new(endpoint: &str) -> Result<Self, RoutingError> {
            let client = Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(|err| RoutingError::Unreachable(err.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    /// Minimal OSRM JSON response structures.
    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        geometry: OsrmGeometry,
    }

    #[derive(Deserialize)]
    struct OsrmGeometry {
        coordinates: Vec<Vec<f64>>, // [lng, lat]
    }

    #[async_trait]
    impl RouteProvider for OsrmRouteProvider {
        async fn route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
        ) -> Result<Route, RoutingError> {
            let url = format!(
                "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
                self.endpoint, origin.lng, origin.lat, destination.lng, destination.lat,
            );

            let resp: OsrmResponse = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| RoutingError::Unreachable(err.to_string()))?
                .json()
                .await
                .map_err(|err| RoutingError::InvalidResponse(err.to_string()))?;

            if resp.code != "Ok" {
                return Err(RoutingError::NoRoute(resp.code));
            }

            let route = resp
                .routes
                .and_then(|routes| routes.into_iter().next())
                .ok_or_else(|| RoutingError::NoRoute("no routes in response".to_string()))?;

            // OSRM returns [lng, lat], we store (lat, lng)
            let waypoints = route
                .geometry
                .coordinates
                .iter()
                .filter(|c| c.len() >= 2)
                .map(|c| Coordinate::new(c[1], c[0]))
                .collect();

            Route::new(waypoints)
        }
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

type RouteKey = (u64, u64, u64, u64);

fn route_key(origin: Coordinate, destination: Coordinate) -> RouteKey {
    (
        origin.lat.to_bits(),
        origin.lng.to_bits(),
        destination.lat.to_bits(),
        destination.lng.to_bits(),
    )
}

/// LRU-cached wrapper around any [`RouteProvider`].
///
/// Cache key is the directed (origin, destination) pair. Failures are not
/// cached, so the next request for the same pair asks the inner provider again.
pub struct CachedRouteProvider {
    inner: Arc<dyn RouteProvider>,
    cache: Mutex<LruCache<RouteKey, Route>>,
}

impl CachedRouteProvider {
    pub fn new(inner: Arc<dyn RouteProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_routes(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl RouteProvider for CachedRouteProvider {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Route, RoutingError> {
        let key = route_key(origin, destination);

        // Fast path: cache hit
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }

        // Slow path: query inner provider, lock released across the await
        let route = self.inner.route(origin, destination).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, route.clone());
        Ok(route)
    }
}

// ---------------------------------------------------------------------------
// Factory: build a provider from RouteProviderKind
// ---------------------------------------------------------------------------

/// Construct a shared [`RouteProvider`] from a [`RouteProviderKind`] descriptor.
///
/// - `StraightLine` is returned without caching (it is pure arithmetic).
/// - `Osrm` is wrapped in a [`CachedRouteProvider`]; if the HTTP client cannot
///   be built the straight-line provider is used instead.
#[cfg_attr(not(feature = "osrm"), allow(unused_variables))]
pub fn build_route_provider(kind: &RouteProviderKind, cache_capacity: usize) -> Arc<dyn RouteProvider> {
    match kind {
        RouteProviderKind::StraightLine { segments } => Arc::new(StraightLineRouteProvider {
            segments: *segments,
        }),

        #[cfg(feature = "osrm")]
        RouteProviderKind::Osrm { endpoint } => match osrm::OsrmRouteProvider::new(endpoint) {
            Ok(provider) => Arc::new(CachedRouteProvider::new(Arc::new(provider), cache_capacity)),
            Err(err) => {
                warn!(%endpoint, error = %err, "OSRM provider unavailable, falling back to straight-line routes");
                Arc::new(StraightLineRouteProvider::default())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RouteProvider for CountingProvider {
        async fn route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
        ) -> Result<Route, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RoutingError::Unreachable("offline".to_string()))
            } else {
                Route::new(vec![origin, destination])
            }
        }
    }

    #[test]
    fn empty_route_is_rejected() {
        assert_eq!(Route::new(Vec::new()), Err(RoutingError::EmptyRoute));
    }

    #[tokio::test]
    async fn straight_line_has_segments_plus_one_waypoints() {
        let provider = StraightLineRouteProvider { segments: 4 };
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(1.0, 2.0);
        let route = provider.route(a, b).await.expect("route");
        assert_eq!(route.len(), 5);
        assert!(route.waypoints()[0].approx_eq(&a, 1e-12));
        assert!(route.waypoints()[4].approx_eq(&b, 1e-12));
        assert!(route.waypoints()[2].approx_eq(&Coordinate::new(0.5, 1.0), 1e-12));
    }

    #[tokio::test]
    async fn cache_serves_repeat_requests() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedRouteProvider::new(inner.clone(), 16);
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(1.0, 1.0);

        cached.route(a, b).await.expect("first");
        cached.route(a, b).await.expect("second");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // Directed: the reverse leg is a different key.
        cached.route(b, a).await.expect("reverse");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_routes(), 2);
    }

    #[tokio::test]
    async fn cache_does_not_store_failures() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cached = CachedRouteProvider::new(inner.clone(), 16);
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(1.0, 1.0);

        assert!(cached.route(a, b).await.is_err());
        assert!(cached.route(a, b).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_routes(), 0);
    }

    #[test]
    fn default_kind_is_straight_line() {
        assert_eq!(
            RouteProviderKind::default(),
            RouteProviderKind::StraightLine { segments: 8 }
        );
    }
}
