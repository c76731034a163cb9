//! Cache-checked isochrone fetching.
//!
//! A batch is expanded from origins and specs, joined against the cache,
//! and only the misses are sent to their source. Results, including empty
//! ones, are written to the cache; the batch is then re-read from the cache
//! so callers only ever see persisted data.

use geo::{MultiPolygon, Point};
use isoreach_core::batch::expand_batch;
use isoreach_core::ports::{IsochroneApi, IsochroneCache, IsochroneQuery, RoutingEngine};
use isoreach_core::projection::buffer_meters;
use isoreach_core::{
    BatchRow, CacheRecord, CityId, Completeness, Error, FetchedRow, IsochroneSpec, Origin, Result,
    Source, TimezoneFinder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Bing requests submitted before polling.
    pub bing_group_size: usize,
    /// Wait between submitting a group and polling it.
    #[serde(with = "isoreach_core::retry::duration_secs")]
    pub bing_poll_delay: Duration,
    /// Padding added around engine isochrones.
    pub engine_buffer_m: f64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            bing_group_size: 50,
            bing_poll_delay: Duration::from_secs(4),
            engine_buffer_m: 10.0,
        }
    }
}

/// Rows of a batch with their completeness.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub rows: Vec<FetchedRow>,
    pub completeness: Completeness,
}

pub struct IsochroneFetcher {
    cache: Arc<dyn IsochroneCache>,
    engine: Arc<dyn RoutingEngine>,
    bing: Option<Arc<dyn IsochroneApi>>,
    timezones: Arc<TimezoneFinder>,
    settings: FetchSettings,
}

impl IsochroneFetcher {
    pub fn new(
        cache: Arc<dyn IsochroneCache>,
        engine: Arc<dyn RoutingEngine>,
        timezones: Arc<TimezoneFinder>,
    ) -> Self {
        Self {
            cache,
            engine,
            bing: None,
            timezones,
            settings: FetchSettings::default(),
        }
    }

    pub fn with_bing(mut self, bing: Arc<dyn IsochroneApi>) -> Self {
        self.bing = Some(bing);
        self
    }

    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Expand the batch, localised to the timezone at the origins' centroid.
    pub fn expand(
        &self,
        city_id: &CityId,
        origins: &[Origin],
        specs: &[IsochroneSpec],
    ) -> Result<Vec<BatchRow>> {
        for spec in specs {
            spec.validate()?;
        }
        if origins.is_empty() {
            return Ok(Vec::new());
        }
        let points: Vec<Point<f64>> = origins.iter().map(|o| o.point).collect();
        let tz = self.timezones.timezone_of(&points)?;
        debug!(city = %city_id, timezone = %tz.name(), "Localising departures");
        let batch = expand_batch(city_id, origins, specs, tz)?;

        let duplicate = {
            let mut seen = HashSet::with_capacity(batch.len());
            batch
                .iter()
                .find(|row| !seen.insert(&row.uid))
                .map(|row| row.uid.clone())
        };
        if let Some(uid) = duplicate {
            return Err(Error::InvalidRequest(format!(
                "request {} appears more than once in the batch",
                uid
            )));
        }
        Ok(batch)
    }

    /// Fetch every uncached isochrone of the batch. With `dry_run`, only report what is cached.
    pub async fn get_isochrones(
        &self,
        city_id: &CityId,
        origins: &[Origin],
        specs: &[IsochroneSpec],
        dry_run: bool,
    ) -> Result<FetchOutcome> {
        let batch = self.expand(city_id, origins, specs)?;

        if dry_run {
            let flags = self.cache.availability(city_id, &batch).await?;
            let completeness = Completeness::from_flags(flags.iter().copied());
            let rows = batch
                .into_iter()
                .zip(flags)
                .map(|(row, cached)| FetchedRow {
                    row,
                    cached,
                    geometry: None,
                })
                .collect();
            info!(
                city = %city_id,
                done = completeness.done,
                total = completeness.total,
                "Dry run, nothing fetched"
            );
            return Ok(FetchOutcome { rows, completeness });
        }

        let fetched = self.cache.lookup(city_id, batch.clone()).await?;
        let (mut engine_rows, mut bing_rows) = (Vec::new(), Vec::new());
        for f in fetched.into_iter().filter(|f| !f.cached) {
            match f.row.source {
                Source::GraphHopper => engine_rows.push(f.row),
                Source::Bing => bing_rows.push(f.row),
                Source::Here => return Err(Error::UnsupportedSource(f.row.source.to_string())),
            }
        }

        let missing = engine_rows.len() + bing_rows.len();
        info!(
            city = %city_id,
            total = batch.len(),
            cached_pct = cached_percentage(batch.len(), missing),
            "Checked isochrone cache"
        );

        if !engine_rows.is_empty() {
            self.fetch_from_engine(&engine_rows).await?;
        }
        if !bing_rows.is_empty() {
            let bing = self.bing.as_ref().ok_or_else(|| {
                Error::InvalidRequest("Bing isochrones requested but no Bing API key is configured".to_string())
            })?;
            self.fetch_from_bing(bing.as_ref(), &bing_rows).await?;
        }

        let rows = self.cache.lookup(city_id, batch).await?;
        let completeness = Completeness::of_rows(&rows);
        info!(
            city = %city_id,
            done = completeness.done,
            total = completeness.total,
            "Isochrone batch finished"
        );
        Ok(FetchOutcome { rows, completeness })
    }

    async fn fetch_from_engine(&self, rows: &[BatchRow]) -> Result<()> {
        info!(rows = rows.len(), "Fetching isochrones from the routing engine");
        for (i, row) in rows.iter().enumerate() {
            let geometry = self.engine_isochrone(row).await?;
            self.cache.insert(&CacheRecord::from_row(row, geometry)).await?;
            if (i + 1) % 100 == 0 {
                info!(done = i + 1, total = rows.len(), "Engine isochrones fetched");
            }
        }
        Ok(())
    }

    /// Buffered engine isochrone; empty when the response is unusable.
    async fn engine_isochrone(&self, row: &BatchRow) -> Result<MultiPolygon<f64>> {
        let query = IsochroneQuery::from_row(row);
        match self.engine.isochrone(&query).await {
            Ok(Some(mut polygons)) if polygons.len() == 1 => {
                let polygon = polygons.remove(0);
                Ok(buffer_meters(&polygon, self.settings.engine_buffer_m))
            }
            Ok(Some(polygons)) => {
                warn!(uid = %row.uid, features = polygons.len(), "Expected exactly one isochrone feature, storing empty");
                Ok(MultiPolygon::new(vec![]))
            }
            Ok(None) => {
                warn!(uid = %row.uid, "No isochrone polygons, storing empty");
                Ok(MultiPolygon::new(vec![]))
            }
            Err(Error::MalformedResponse(message)) => {
                warn!(uid = %row.uid, message = %message, "Malformed isochrone response, storing empty");
                Ok(MultiPolygon::new(vec![]))
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_from_bing(&self, bing: &dyn IsochroneApi, rows: &[BatchRow]) -> Result<()> {
        let group_size = self.settings.bing_group_size.max(1);
        info!(rows = rows.len(), group_size, "Fetching isochrones from Bing");

        for group in rows.chunks(group_size) {
            let mut callbacks = Vec::with_capacity(group.len());
            for row in group {
                callbacks.push(bing.submit(row).await?);
            }

            tokio::time::sleep(self.settings.bing_poll_delay).await;

            for (row, callback) in group.iter().zip(callbacks) {
                let Some(callback) = callback else {
                    warn!(uid = %row.uid, "Bing request not accepted, leaving it for the next run");
                    continue;
                };
                let result_url = match bing.poll(&callback).await {
                    Ok(Some(result_url)) => result_url,
                    Ok(None) => {
                        warn!(uid = %row.uid, "Bing result not ready, leaving it for the next run");
                        continue;
                    }
                    Err(Error::MalformedResponse(message)) => {
                        warn!(uid = %row.uid, message = %message, "Malformed Bing status response, storing empty");
                        self.cache
                            .insert(&CacheRecord::from_row(row, MultiPolygon::new(vec![])))
                            .await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let geometry = match bing.fetch_result(&result_url).await {
                    Ok(Some(geometry)) => geometry,
                    Ok(None) => {
                        warn!(uid = %row.uid, "No polygons in Bing result, storing empty");
                        MultiPolygon::new(vec![])
                    }
                    Err(Error::MalformedResponse(message)) => {
                        warn!(uid = %row.uid, message = %message, "Malformed Bing result, storing empty");
                        MultiPolygon::new(vec![])
                    }
                    Err(e) => return Err(e),
                };
                self.cache.insert(&CacheRecord::from_row(row, geometry)).await?;
                debug!(uid = %row.uid, "Stored Bing isochrone");
            }
        }
        Ok(())
    }
}

fn cached_percentage(total: usize, missing: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 - missing as f64 / total as f64 * 100.0
}
