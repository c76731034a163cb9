//! Per-row reach and per-city result files.

use crate::grid::{PopulationGrid, Reach};
use chrono::{DateTime, FixedOffset};
use geo::MultiPolygon;
use isoreach_core::{FetchedRow, RequestUid, Result, Source, TravelMode};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wkt::ToWkt;

/// One cached isochrone with the population it reaches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachRow {
    pub uid: RequestUid,
    pub pid: usize,
    pub mode: TravelMode,
    pub minutes: u32,
    pub source: Source,
    pub departure: DateTime<FixedOffset>,
    #[serde(serialize_with = "as_wkt")]
    pub isochrone: MultiPolygon<f64>,
    pub reach_n: usize,
    pub reach_km2: f64,
    pub reach_pop: f64,
    #[serde(serialize_with = "as_wkt")]
    pub reach_geometry: MultiPolygon<f64>,
}

impl ReachRow {
    fn new(row: &FetchedRow, isochrone: MultiPolygon<f64>, reach: Reach) -> Self {
        Self {
            uid: row.row.uid.clone(),
            pid: row.row.pid,
            mode: row.row.mode,
            minutes: row.row.minutes,
            source: row.row.source,
            departure: row.row.departure.fixed_offset(),
            isochrone,
            reach_n: reach.cells,
            reach_km2: reach.area_km2,
            reach_pop: reach.population,
            reach_geometry: reach.geometry,
        }
    }
}

/// Per-city summary written next to the rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CityResultHeader {
    rows: usize,
    total_population: f64,
}

#[derive(Serialize)]
struct CityResult<'a> {
    #[serde(flatten)]
    header: CityResultHeader,
    isochrones: &'a [ReachRow],
}

/// WKT text; empty geometries as `MULTIPOLYGON EMPTY`.
pub fn to_wkt(geometry: &MultiPolygon<f64>) -> String {
    if geometry.0.is_empty() {
        return "MULTIPOLYGON EMPTY".to_string();
    }
    geometry.wkt_string()
}

fn as_wkt<S: Serializer>(geometry: &MultiPolygon<f64>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&to_wkt(geometry))
}

/// Reach of every cached row. Uncached rows are skipped.
pub fn aggregate(rows: &[FetchedRow], grid: &PopulationGrid) -> Vec<ReachRow> {
    let mut out = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for row in rows {
        if !row.cached {
            skipped += 1;
            continue;
        }
        let isochrone = row.geometry.clone().unwrap_or_else(|| MultiPolygon::new(vec![]));
        let reach = grid.reach(Some(&isochrone));
        out.push(ReachRow::new(row, isochrone, reach));
    }
    if skipped > 0 {
        warn!(skipped, "Rows without a cached isochrone left out of the reach");
    }
    out
}

/// `{dir}/{city_id}.reach.json`
pub fn result_path(dir: &Path, city_id: &str) -> PathBuf {
    dir.join(format!("{}.reach.json", city_id))
}

pub async fn write_city_result(path: &Path, rows: &[ReachRow], grid: &PopulationGrid) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let result = CityResult {
        header: CityResultHeader {
            rows: rows.len(),
            total_population: grid.total_population(),
        },
        isochrones: rows,
    };
    let json = serde_json::to_vec_pretty(&result)?;
    tokio::fs::write(path, json).await?;
    info!(path = %path.display(), rows = rows.len(), "Wrote city reach");
    Ok(())
}
