//! Engine-versus-reference route comparison.

use crate::reference::ReferenceMemo;
use chrono::DateTime;
use chrono_tz::Tz;
use geo::Point;
use isoreach_core::ports::{ReferenceRouter, RouteSummary, RoutingEngine};
use isoreach_core::{CityId, FactorSet, Period, Result};
use tracing::{debug, info, warn};

/// One origin pair routed by both sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairComparison {
    pub from: usize,
    pub to: usize,
    pub reference: RouteSummary,
    pub engine: RouteSummary,
}

impl PairComparison {
    /// Absolute difference in whole minutes.
    pub fn minute_error(&self) -> f64 {
        (self.reference.whole_minutes() - self.engine.whole_minutes()).abs()
    }

    pub fn distance_error(&self) -> f64 {
        (self.reference.distance_m - self.engine.distance_m).abs()
    }

    /// Squared minute error plus the square root of the distance error.
    pub fn score(&self) -> f64 {
        self.minute_error().powi(2) + self.distance_error().sqrt()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonSet {
    pub pairs: Vec<PairComparison>,
    /// Reference routes fetched online rather than read from the memo.
    pub fetched: usize,
    pub skipped: usize,
}

impl ComparisonSet {
    pub fn total_score(&self) -> f64 {
        self.pairs.iter().map(PairComparison::score).sum()
    }

    pub fn mean_error(&self) -> f64 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        self.pairs.iter().map(PairComparison::minute_error).sum::<f64>() / self.pairs.len() as f64
    }

    pub fn mean_squared_error(&self) -> f64 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        self.pairs
            .iter()
            .map(|p| p.minute_error().powi(2))
            .sum::<f64>()
            / self.pairs.len() as f64
    }
}

/// Routes every pair of sample points through the engine and the reference.
pub struct Comparator<'a> {
    pub city_id: &'a CityId,
    pub points: &'a [Point<f64>],
    pub engine: &'a dyn RoutingEngine,
    pub reference: &'a dyn ReferenceRouter,
    pub memo: &'a ReferenceMemo,
}

impl Comparator<'_> {
    /// All `(i, j)` with `i < j`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.points.len();
        (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
    }

    async fn reference_route(
        &self,
        pair: (usize, usize),
        period: Period,
        departure: &DateTime<Tz>,
        fetched: &mut usize,
    ) -> Result<Option<RouteSummary>> {
        let path = self.memo.path(self.city_id, pair, period, departure);
        if let Some(route) = self.memo.get(&path).await {
            return Ok(Some(route));
        }

        let route = self
            .reference
            .route(
                self.points[pair.0],
                self.points[pair.1],
                departure.with_timezone(&chrono::Utc),
            )
            .await?;
        *fetched += 1;
        self.memo.put(&path, route).await?;
        debug!(from = pair.0, to = pair.1, period = %period, "Fetched reference route");
        Ok(route)
    }

    pub async fn compare(
        &self,
        factors: &FactorSet,
        period: Period,
        departure: &DateTime<Tz>,
    ) -> Result<ComparisonSet> {
        let mut set = ComparisonSet::default();

        for (from, to) in self.pairs() {
            let Some(reference) = self
                .reference_route((from, to), period, departure, &mut set.fetched)
                .await?
            else {
                warn!(from, to, period = %period, "No reference route for pair, skipping");
                set.skipped += 1;
                continue;
            };

            let Some(engine) = self
                .engine
                .route(self.points[from], self.points[to], factors)
                .await?
            else {
                warn!(from, to, "No engine route for pair, skipping");
                set.skipped += 1;
                continue;
            };

            set.pairs.push(PairComparison {
                from,
                to,
                reference,
                engine,
            });
        }

        if set.fetched > 0 {
            info!(fetched = set.fetched, "Fetched uncached reference routes");
        }
        info!(
            mean_error = set.mean_error(),
            mse = set.mean_squared_error(),
            factors = %factors,
            "Compared engine routes"
        );
        Ok(set)
    }
}
