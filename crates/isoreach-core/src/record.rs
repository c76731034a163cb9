//! Persisted isochrone records.

use crate::batch::BatchRow;
use crate::ids::{CityId, RequestUid};
use crate::mode::{Source, TravelMode};
use chrono::{DateTime, FixedOffset};
use geo::MultiPolygon;

/// One cached isochrone. Written once, never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub uid: RequestUid,
    pub city_id: CityId,
    pub pid: usize,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub minutes: u32,
    pub departure: DateTime<FixedOffset>,
    pub mode: TravelMode,
    pub source: Source,
    /// May be empty: the request resolved as unreachable.
    pub geometry: MultiPolygon<f64>,
}

impl CacheRecord {
    pub fn from_row(row: &BatchRow, geometry: MultiPolygon<f64>) -> Self {
        Self {
            uid: row.uid.clone(),
            city_id: row.city_id.clone(),
            pid: row.pid,
            origin_lat: row.origin.y(),
            origin_lon: row.origin.x(),
            minutes: row.minutes,
            departure: row.departure.fixed_offset(),
            mode: row.mode,
            source: row.source,
            geometry,
        }
    }

    /// Explicit empty result for a request that could not be resolved.
    pub fn unreachable(row: &BatchRow) -> Self {
        Self::from_row(row, MultiPolygon::new(vec![]))
    }
}
