//! Per-city batch pipeline.
//!
//! For each city: load the origin grid, check what the cache already
//! holds, and only when local engine rows are missing bring up the engine,
//! calibrate it, snap the origins, fetch the rest and stop it again.
//! Completed cities get a reach result file.

use crate::collaborators::{LocalFeedDirectory, OsmiumExtractor, PrebuiltPopulation};
use crate::config::{CitySettings, Settings};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use geo::{BoundingRect, MultiPolygon, Rect};
use isoreach_cache::Database;
use isoreach_calibrate::{CalibrationOutcome, Calibrator, GoogleRoutesClient, ReferenceMemo, sample_points};
use isoreach_core::ports::{
    IsochroneApi, IsochroneCache, MapExtractor, PopulationSource, ReferenceRouter, RoutingEngine,
    TransitFeedSource,
};
use isoreach_core::{CityId, Completeness, IsochroneSpec, Origin, Source, TimezoneFinder};
use isoreach_engine::{ContainerRuntime, DockerRuntime, EngineLayout, EngineManager, GraphHopperClient};
use isoreach_fetch::{BingClient, IsochroneFetcher};
use isoreach_reach::{PopulationGrid, aggregate, result_path, write_city_result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External services the pipeline drives.
pub struct Services {
    pub cache: Arc<dyn IsochroneCache>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub engine: Arc<dyn RoutingEngine>,
    pub timezones: Arc<TimezoneFinder>,
    pub maps: Arc<dyn MapExtractor>,
    pub population: Arc<dyn PopulationSource>,
    pub feeds: Arc<dyn TransitFeedSource>,
    pub bing: Option<Arc<dyn IsochroneApi>>,
    pub reference: Option<Arc<dyn ReferenceRouter>>,
}

impl Services {
    /// Production services for `settings`.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let db = Database::connect(&settings.cache_path)
            .await
            .with_context(|| format!("opening cache {}", settings.cache_path.display()))?;
        let runtime = DockerRuntime::connect().context("connecting to docker")?;
        let engine = GraphHopperClient::new(&settings.engine.url).with_retry(settings.engine.retry.clone());

        let bing = settings
            .bing_api_key
            .as_ref()
            .map(|key| Arc::new(BingClient::new(key.clone())) as Arc<dyn IsochroneApi>);
        let reference = settings
            .google_key
            .as_ref()
            .map(|key| Arc::new(GoogleRoutesClient::new(key.clone())) as Arc<dyn ReferenceRouter>);

        Ok(Self {
            cache: Arc::new(db.isochrones()),
            runtime: Arc::new(runtime),
            engine: Arc::new(engine),
            timezones: Arc::new(TimezoneFinder::new()),
            maps: Arc::new(OsmiumExtractor::new(settings.osm.binary.clone())),
            population: Arc::new(PrebuiltPopulation::new(settings.population.dir.clone())),
            feeds: Arc::new(LocalFeedDirectory::new(settings.transit.feeds_dir.clone())),
            bing,
            reference,
        })
    }
}

/// What one city run ended with.
#[derive(Debug, Clone)]
pub struct CityReport {
    pub city_id: CityId,
    pub completeness: Completeness,
    pub engine_started: bool,
    pub result: Option<PathBuf>,
}

pub struct Pipeline {
    settings: Settings,
    services: Services,
}

impl Pipeline {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self { settings, services }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn fetcher(&self) -> IsochroneFetcher {
        let fetcher = IsochroneFetcher::new(
            self.services.cache.clone(),
            self.services.engine.clone(),
            self.services.timezones.clone(),
        )
        .with_settings(self.settings.fetch.clone());
        match &self.services.bing {
            Some(bing) => fetcher.with_bing(bing.clone()),
            None => fetcher,
        }
    }

    async fn load_grid(&self, city_id: &CityId, buffer_m: u32) -> Result<PopulationGrid> {
        let path = self
            .services
            .population
            .population_grid(city_id, buffer_m)
            .await
            .with_context(|| format!("population grid for {} at {}m", city_id, buffer_m))?;
        let grid = PopulationGrid::from_geojson(&path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        Ok(grid)
    }

    async fn origins(&self, city_id: &CityId) -> Result<(PopulationGrid, Vec<Origin>)> {
        let grid = self.load_grid(city_id, self.settings.population.origin_buffer_m).await?;
        let origins = Origin::enumerate(grid.origins());
        if origins.is_empty() {
            bail!("population grid for {} has no cells", city_id);
        }
        Ok((grid, origins))
    }

    /// Run every selected city. A failing city is logged and skipped.
    pub async fn run(&self, city: Option<&str>, force_calibration: bool) -> Vec<CityReport> {
        let mut reports = Vec::new();
        for city in self.settings.cities(city) {
            match self.run_city(&city, force_calibration).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(city = %city.id, error = ?e, "City failed, continuing with the next"),
            }
        }
        reports
    }

    pub async fn run_city(&self, city: &CitySettings, force_calibration: bool) -> Result<CityReport> {
        let city_id = CityId::new(city.id.clone());
        info!(city = %city_id, name = city.name.as_deref().unwrap_or(""), "Processing city");

        let specs = self.settings.isochrone_specs();
        let (grid, origins) = self.origins(&city_id).await?;
        let fetcher = self.fetcher();

        let status = fetcher.get_isochrones(&city_id, &origins, &specs, true).await?;
        let needs_engine = status
            .rows
            .iter()
            .any(|r| !r.cached && r.row.source == Source::GraphHopper);
        let (completeness, engine_started) = if status.completeness.is_complete() {
            info!(city = %city_id, total = status.completeness.total, "Every isochrone cached, engine not needed");
            (status.completeness, false)
        } else if needs_engine {
            let completeness = self
                .with_engine(&city_id, &grid, &origins, &specs, force_calibration)
                .await?;
            (completeness, true)
        } else {
            info!(city = %city_id, "Only external isochrones missing, engine not needed");
            let outcome = fetcher
                .get_isochrones(&city_id, &origins, &specs, false)
                .await
                .context("fetching isochrones")?;
            (outcome.completeness, false)
        };

        let result = if completeness.is_complete() {
            self.reach_city(&city_id, false).await?
        } else {
            warn!(
                city = %city_id,
                done = completeness.done,
                total = completeness.total,
                "Batch incomplete, reach not computed"
            );
            None
        };

        Ok(CityReport {
            city_id,
            completeness,
            engine_started,
            result,
        })
    }

    /// Bring up the engine, calibrate, fetch, and stop it whatever happened.
    async fn with_engine(
        &self,
        city_id: &CityId,
        grid: &PopulationGrid,
        origins: &[Origin],
        specs: &[IsochroneSpec],
        force_calibration: bool,
    ) -> Result<Completeness> {
        let layout = EngineLayout::under(&self.settings.data_root);
        let mut manager = EngineManager::open(
            city_id.clone(),
            self.services.runtime.clone(),
            self.settings.engine.to_settings(),
            layout,
        )
        .await
        .context("opening engine")?;

        let result = self
            .drive_engine(&mut manager, grid, origins, specs, force_calibration)
            .await;
        if let Err(e) = manager.stop().await {
            warn!(city = %city_id, error = %e, "Failed to stop engine");
        }
        result
    }

    async fn drive_engine(
        &self,
        manager: &mut EngineManager,
        grid: &PopulationGrid,
        origins: &[Origin],
        specs: &[IsochroneSpec],
        force_calibration: bool,
    ) -> Result<Completeness> {
        let city_id = manager.city_id().clone();
        let area = grid_bounds(grid).with_context(|| format!("{} has an empty grid", city_id))?;

        let map_target = self
            .settings
            .data_root
            .join("osm")
            .join(format!("{}.osm.pbf", city_id));
        let map = self
            .services
            .maps
            .extract(&self.settings.osm.source, &map_target, area, self.settings.osm.buffer_m, false)
            .await
            .context("extracting map data")?;
        manager.set_map_data(map);

        let feeds = self
            .services
            .feeds
            .feeds(&city_id, area, &transit_dates(specs))
            .await
            .context("locating transit feeds")?;
        manager.set_transit_feeds(feeds);

        manager.build(false).await.context("building engine")?;

        if let Some(reference) = &self.services.reference {
            let calibration = &self.settings.calibration;
            let mut options = calibration.options.clone();
            options.force |= force_calibration;

            let points = sample_points(&grid.origins(), calibration.sample_size, calibration.seed);
            let calibrator = Calibrator::new(
                self.services.engine.clone(),
                reference.clone(),
                self.services.timezones.clone(),
                ReferenceMemo::in_engine_dir(manager.layout().engine_dir()),
            );
            let outcome = calibrator
                .calibrate(manager, &points, self.settings.peak, self.settings.off_peak, &options)
                .await
                .context("calibrating engine")?;
            if let CalibrationOutcome::Calibrated { .. } = outcome {
                info!(city = %city_id, "Engine calibrated");
            }
        } else {
            warn!(city = %city_id, "GOOGLE_KEY not set, using uncalibrated speed models");
        }

        let origins = self.snap_origins(origins).await?;
        let outcome = self
            .fetcher()
            .get_isochrones(&city_id, &origins, specs, false)
            .await
            .context("fetching isochrones")?;
        Ok(outcome.completeness)
    }

    /// Origins moved onto the road network. Pids are kept, so uids do not change.
    async fn snap_origins(&self, origins: &[Origin]) -> Result<Vec<Origin>> {
        let mut snapped = Vec::with_capacity(origins.len());
        for origin in origins {
            let point = self
                .services
                .engine
                .nearest(origin.point)
                .await
                .with_context(|| format!("snapping origin {}", origin.pid))?;
            snapped.push(Origin::new(origin.pid, point));
        }
        debug!(origins = snapped.len(), "Snapped origins to the road network");
        Ok(snapped)
    }

    /// Cached completeness of a city's batch without fetching anything.
    pub async fn status_city(&self, city: &CitySettings) -> Result<Completeness> {
        let city_id = CityId::new(city.id.clone());
        let (_, origins) = self.origins(&city_id).await?;
        let outcome = self
            .fetcher()
            .get_isochrones(&city_id, &origins, &self.settings.isochrone_specs(), true)
            .await?;
        Ok(outcome.completeness)
    }

    /// Aggregate reach of a completed city into its result file.
    ///
    /// Returns `None` when the batch is incomplete, or when the file
    /// exists and `overwrite` is off.
    pub async fn reach_city(&self, city_id: &CityId, overwrite: bool) -> Result<Option<PathBuf>> {
        let path = result_path(&self.settings.results_dir, city_id.as_str());
        if !overwrite && tokio::fs::try_exists(&path).await? {
            info!(city = %city_id, path = %path.display(), "Reach result exists, skipping");
            return Ok(None);
        }

        let (_, origins) = self.origins(city_id).await?;
        let batch = self
            .fetcher()
            .expand(city_id, &origins, &self.settings.isochrone_specs())?;
        let rows = self.services.cache.lookup(city_id, batch).await?;
        let completeness = Completeness::of_rows(&rows);
        if !completeness.is_complete() {
            warn!(
                city = %city_id,
                done = completeness.done,
                total = completeness.total,
                "Batch incomplete, reach not computed"
            );
            return Ok(None);
        }

        let grid = self
            .load_grid(city_id, self.settings.population.reach_buffer_m)
            .await?;
        let reach_rows = aggregate(&rows, &grid);
        write_city_result(&path, &reach_rows, &grid).await?;
        Ok(Some(path))
    }
}

fn grid_bounds(grid: &PopulationGrid) -> Option<Rect<f64>> {
    let polygons = grid.cells().iter().map(|c| c.geometry.clone()).collect();
    MultiPolygon::new(polygons).bounding_rect()
}

/// Distinct departure dates of the transit specs.
fn transit_dates(specs: &[IsochroneSpec]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = specs
        .iter()
        .filter(|s| s.mode.is_transit())
        .map(|s| s.departure.date())
        .collect();
    dates.sort();
    dates.dedup();
    dates
}
