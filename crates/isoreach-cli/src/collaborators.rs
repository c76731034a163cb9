//! Adapters for the external data tools the pipeline depends on.

use async_trait::async_trait;
use chrono::NaiveDate;
use geo::{Rect, coord};
use isoreach_core::ports::{MapExtractor, PopulationSource, TransitFeedSource};
use isoreach_core::{CityId, Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const METERS_PER_DEGREE: f64 = 111_320.0;

/// `rect` grown by `meters` on every side.
pub fn buffer_rect(rect: Rect<f64>, meters: u32) -> Rect<f64> {
    let center_lat = rect.center().y.to_radians();
    let dy = meters as f64 / METERS_PER_DEGREE;
    let dx = meters as f64 / (METERS_PER_DEGREE * center_lat.cos().max(0.01));
    Rect::new(
        coord! { x: rect.min().x - dx, y: rect.min().y - dy },
        coord! { x: rect.max().x + dx, y: rect.max().y + dy },
    )
}

/// Cuts map extracts with the `osmium` command-line tool.
pub struct OsmiumExtractor {
    binary: String,
}

impl OsmiumExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Where an extract is written before it is moved onto `target`.
///
/// Keeps the file suffix, which osmium reads the output format from.
pub fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!("partial-{}", name))
}

/// `osmium extract` arguments for one bounding box.
pub fn osmium_args(source: &Path, target: &Path, bbox: Rect<f64>) -> Vec<String> {
    vec![
        "extract".to_string(),
        "--bbox".to_string(),
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            bbox.min().x,
            bbox.min().y,
            bbox.max().x,
            bbox.max().y
        ),
        "-o".to_string(),
        target.display().to_string(),
        source.display().to_string(),
        "--overwrite".to_string(),
    ]
}

#[async_trait]
impl MapExtractor for OsmiumExtractor {
    async fn extract(
        &self,
        source: &Path,
        target: &Path,
        bbox: Rect<f64>,
        buffer_m: u32,
        force: bool,
    ) -> Result<PathBuf> {
        if !force && tokio::fs::try_exists(target).await? {
            debug!(path = %target.display(), "Map extract exists, reusing");
            return Ok(target.to_path_buf());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(target);
        let args = osmium_args(source, &partial, buffer_rect(bbox, buffer_m));
        info!(source = %source.display(), target = %target.display(), "Extracting map data");
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Internal(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!(path = %partial.display(), error = %e, "No partial extract to remove");
            }
            return Err(Error::Internal(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tokio::fs::rename(&partial, target).await?;
        Ok(target.to_path_buf())
    }
}

/// Population grids prepared ahead of time as `{dir}/{city}-{buffer}.geojson`.
pub struct PrebuiltPopulation {
    dir: PathBuf,
}

impl PrebuiltPopulation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, city_id: &CityId, buffer_m: u32) -> PathBuf {
        self.dir.join(format!("{}-{}.geojson", city_id, buffer_m))
    }
}

#[async_trait]
impl PopulationSource for PrebuiltPopulation {
    async fn population_grid(&self, city_id: &CityId, buffer_m: u32) -> Result<PathBuf> {
        let path = self.path(city_id, buffer_m);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("population grid {} not found", path.display()),
            )));
        }
        Ok(path)
    }
}

/// Transit feeds downloaded ahead of time as `{dir}/{city}-*.zip`.
pub struct LocalFeedDirectory {
    dir: PathBuf,
}

impl LocalFeedDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TransitFeedSource for LocalFeedDirectory {
    async fn feeds(
        &self,
        city_id: &CityId,
        _area: Rect<f64>,
        dates: &[NaiveDate],
    ) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}-", city_id);
        let mut feeds = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(feeds),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".zip") {
                feeds.push(entry.path());
            }
        }
        feeds.sort();

        debug!(city = %city_id, feeds = feeds.len(), dates = dates.len(), "Found transit feeds");
        Ok(feeds)
    }
}
