//! Isochrone request batches.

use crate::ids::{CityId, RequestUid};
use crate::mode::{Source, TravelMode};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// Shortest and longest supported time budget in minutes.
pub const MIN_MINUTES: u32 = 1;
pub const MAX_MINUTES: u32 = 120;

/// One configured request family: a mode, its time budgets, a departure and a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochroneSpec {
    pub mode: TravelMode,
    pub durations: Vec<u32>,
    /// Local wall-clock departure; localised per batch.
    pub departure: NaiveDateTime,
    pub source: Source,
}

impl IsochroneSpec {
    pub fn new(
        mode: TravelMode,
        durations: Vec<u32>,
        departure: NaiveDateTime,
        source: Source,
    ) -> Self {
        Self {
            mode,
            durations,
            departure,
            source,
        }
    }

    /// Reject specs that no backend can answer.
    pub fn validate(&self) -> Result<()> {
        if self.source == Source::Here {
            return Err(Error::UnsupportedSource(self.source.to_string()));
        }
        if self.source == Source::Bing && self.mode.external_mode().is_none() {
            return Err(Error::InvalidRequest(format!(
                "mode {} is not available from source {}",
                self.mode, self.source
            )));
        }
        if self.durations.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "no durations configured for {}",
                self.mode
            )));
        }
        if let Some(bad) = self
            .durations
            .iter()
            .find(|m| !(MIN_MINUTES..=MAX_MINUTES).contains(*m))
        {
            return Err(Error::InvalidRequest(format!(
                "duration {} outside {}..={} minutes",
                bad, MIN_MINUTES, MAX_MINUTES
            )));
        }
        Ok(())
    }
}

/// An origin point with its index in the city's point list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub pid: usize,
    pub point: Point<f64>,
}

impl Origin {
    pub fn new(pid: usize, point: Point<f64>) -> Self {
        Self { pid, point }
    }

    /// Enumerate points as origins.
    pub fn enumerate(points: impl IntoIterator<Item = Point<f64>>) -> Vec<Origin> {
        points
            .into_iter()
            .enumerate()
            .map(|(pid, point)| Origin::new(pid, point))
            .collect()
    }
}

/// A single concrete request: one origin, mode, duration, departure and source.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub uid: RequestUid,
    pub city_id: CityId,
    pub pid: usize,
    pub origin: Point<f64>,
    pub mode: TravelMode,
    pub minutes: u32,
    pub departure: DateTime<Tz>,
    pub source: Source,
}

/// Expand origins x specs into one row per duration, localised to `tz`.
pub fn expand_batch(
    city_id: &CityId,
    origins: &[Origin],
    specs: &[IsochroneSpec],
    tz: Tz,
) -> Result<Vec<BatchRow>> {
    for spec in specs {
        spec.validate()?;
    }

    let mut rows = Vec::with_capacity(origins.len() * specs.iter().map(|s| s.durations.len()).sum::<usize>());
    for origin in origins {
        for spec in specs {
            let departure = localize(tz, spec.departure)?;
            for &minutes in &spec.durations {
                rows.push(BatchRow {
                    uid: RequestUid::new(city_id, origin.pid, spec.mode, minutes, spec.source),
                    city_id: city_id.clone(),
                    pid: origin.pid,
                    origin: origin.point,
                    mode: spec.mode,
                    minutes,
                    departure,
                    source: spec.source,
                });
            }
        }
    }
    Ok(rows)
}

/// Attach a timezone to a naive local time.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
        Error::Timezone(format!("{} does not exist in {}", naive, tz.name()))
    })
}

/// A batch row joined against the cache.
#[derive(Debug, Clone)]
pub struct FetchedRow {
    pub row: BatchRow,
    /// Whether the cache holds a record for this uid.
    pub cached: bool,
    /// Stored geometry; `None` when uncached or when only availability was queried.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl FetchedRow {
    pub fn missing(row: BatchRow) -> Self {
        Self {
            row,
            cached: false,
            geometry: None,
        }
    }

    /// Cached with an empty geometry: resolved as unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.cached && self.geometry.as_ref().is_some_and(|g| g.0.is_empty())
    }
}

/// Completeness of a batch: cached rows over all rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
    pub total: usize,
    pub done: usize,
    pub fraction: f64,
}

impl Completeness {
    pub fn from_flags(flags: impl IntoIterator<Item = bool>) -> Self {
        let (total, done) = flags
            .into_iter()
            .fold((0usize, 0usize), |(t, d), cached| (t + 1, d + cached as usize));
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        Self {
            total,
            done,
            fraction,
        }
    }

    pub fn of_rows(rows: &[FetchedRow]) -> Self {
        Self::from_flags(rows.iter().map(|r| r.cached))
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}
