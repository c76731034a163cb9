//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the fetch/calibration logic
//! and the external services it drives.

use crate::batch::{BatchRow, FetchedRow};
use crate::factors::FactorSet;
use crate::ids::CityId;
use crate::record::CacheRecord;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use geo::{MultiPolygon, Point, Rect};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent isochrone cache.
#[async_trait]
pub trait IsochroneCache: Send + Sync {
    /// Join `rows` against the cache, in input order, with geometry where cached.
    async fn lookup(&self, city_id: &CityId, rows: Vec<BatchRow>) -> Result<Vec<FetchedRow>>;

    /// Cached flag per row, in input order. Never decodes geometry.
    async fn availability(&self, city_id: &CityId, rows: &[BatchRow]) -> Result<Vec<bool>>;

    /// Insert a new record. Fails with `CacheConstraint` if the uid exists.
    async fn insert(&self, record: &CacheRecord) -> Result<()>;
}

/// One isochrone request against the local routing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneQuery {
    pub point: Point<f64>,
    pub profile: &'static str,
    pub minutes: u32,
    /// Departure, only sent for transit profiles.
    pub departure: Option<DateTime<Utc>>,
    /// Access/egress profile for transit.
    pub access_profile: Option<&'static str>,
}

impl IsochroneQuery {
    pub fn from_row(row: &BatchRow) -> Self {
        let transit = row.mode.is_transit();
        Self {
            point: row.origin,
            profile: row.mode.engine_profile(),
            minutes: row.minutes,
            departure: transit.then(|| row.departure.with_timezone(&Utc)),
            access_profile: row.mode.access_profile(),
        }
    }
}

/// Travel time and distance of a single route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub duration_s: f64,
    pub distance_m: f64,
}

impl RouteSummary {
    /// Whole minutes, rounded down.
    pub fn whole_minutes(&self) -> f64 {
        (self.duration_s / 60.0).floor()
    }
}

/// The locally hosted routing engine's query API.
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    /// Snap a point onto the road network. Returns the input if it cannot be snapped.
    async fn nearest(&self, point: Point<f64>) -> Result<Point<f64>>;

    /// Isochrone polygons, one per feature. `None` when the response carries no polygons.
    async fn isochrone(&self, query: &IsochroneQuery) -> Result<Option<Vec<MultiPolygon<f64>>>>;

    /// Car route under a custom speed model. `None` when no path exists.
    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        factors: &FactorSet,
    ) -> Result<Option<RouteSummary>>;
}

/// Reference routing source used to calibrate the engine.
#[async_trait]
pub trait ReferenceRouter: Send + Sync {
    /// Driving route departing at `departure`. `None` when the source returns no route.
    async fn route(
        &self,
        from: Point<f64>,
        to: Point<f64>,
        departure: DateTime<Utc>,
    ) -> Result<Option<RouteSummary>>;
}

/// External asynchronous isochrone API.
#[async_trait]
pub trait IsochroneApi: Send + Sync {
    /// Submit a request. Returns the callback URL, or `None` if rejected.
    async fn submit(&self, row: &BatchRow) -> Result<Option<String>>;

    /// Poll a callback. Returns the result URL once the job has finished.
    async fn poll(&self, callback_url: &str) -> Result<Option<String>>;

    /// Download a finished result. `None` when it contains no polygons.
    async fn fetch_result(&self, result_url: &str) -> Result<Option<MultiPolygon<f64>>>;
}

/// Produces the population grid of a city.
#[async_trait]
pub trait PopulationSource: Send + Sync {
    /// Path of a GeoJSON grid covering the city plus `buffer_m`. Idempotent.
    async fn population_grid(&self, city_id: &CityId, buffer_m: u32) -> Result<PathBuf>;
}

/// Cuts a regional map extract.
#[async_trait]
pub trait MapExtractor: Send + Sync {
    async fn extract(
        &self,
        source: &Path,
        target: &Path,
        bbox: Rect<f64>,
        buffer_m: u32,
        force: bool,
    ) -> Result<PathBuf>;
}

/// Locates transit feeds valid for a city.
#[async_trait]
pub trait TransitFeedSource: Send + Sync {
    async fn feeds(
        &self,
        city_id: &CityId,
        area: Rect<f64>,
        dates: &[NaiveDate],
    ) -> Result<Vec<PathBuf>>;
}
