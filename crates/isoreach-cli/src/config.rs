//! Pipeline settings.
//!
//! Read from a YAML file; secrets and machine-specific overrides come from
//! the environment (optionally via `.env`).

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use isoreach_calibrate::CalibrationOptions;
use isoreach_core::{IsochroneSpec, RetryPolicy, Source, TravelMode};
use isoreach_engine::EngineSettings;
use isoreach_fetch::FetchSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "isoreach.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitySettings {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub url: String,
    pub image: String,
    pub memory_gb: u32,
    pub port: u16,
    pub jar: String,
    pub max_wait_minutes: u64,
    pub retry: RetryPolicy,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            url: "http://localhost:8989".to_string(),
            image: defaults.image,
            memory_gb: defaults.memory_gb,
            port: defaults.port,
            jar: defaults.jar,
            max_wait_minutes: defaults.max_wait.as_secs() / 60,
            retry: defaults.retry,
        }
    }
}

impl EngineSection {
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            image: self.image.clone(),
            memory_gb: self.memory_gb,
            port: self.port,
            jar: self.jar.clone(),
            max_wait: Duration::from_secs(self.max_wait_minutes * 60),
            retry: self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    /// Sample points drawn from the city's origins.
    pub sample_size: usize,
    pub seed: u64,
    #[serde(flatten)]
    pub options: CalibrationOptions,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            sample_size: 10,
            seed: 42,
            options: CalibrationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsmSection {
    /// Regional or planet extract the city extracts are cut from.
    pub source: PathBuf,
    pub buffer_m: u32,
    pub binary: String,
}

impl Default for OsmSection {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/osm/planet.osm.pbf"),
            buffer_m: 5000,
            binary: "osmium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationSection {
    pub dir: PathBuf,
    /// Buffer of the grid whose cells are the origins.
    pub origin_buffer_m: u32,
    /// Buffer of the grid reach is counted on.
    pub reach_buffer_m: u32,
}

impl Default for PopulationSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/population"),
            origin_buffer_m: 0,
            reach_buffer_m: 15000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitSection {
    pub feeds_dir: PathBuf,
}

impl Default for TransitSection {
    fn default() -> Self {
        Self {
            feeds_dir: PathBuf::from("data/gtfs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cities: Vec<CitySettings>,
    #[serde(default = "default_peak")]
    pub peak: NaiveDateTime,
    #[serde(default = "default_off_peak")]
    pub off_peak: NaiveDateTime,
    /// Defaults to every mode from the local engine.
    #[serde(default)]
    pub isochrones: Option<Vec<IsochroneSpec>>,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub calibration: CalibrationSection,
    #[serde(default)]
    pub osm: OsmSection,
    #[serde(default)]
    pub population: PopulationSection,
    #[serde(default)]
    pub transit: TransitSection,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(skip)]
    pub bing_api_key: Option<String>,
    #[serde(skip)]
    pub google_key: Option<String>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache.db")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 6, 13)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}

fn default_peak() -> NaiveDateTime {
    at(8, 30)
}

fn default_off_peak() -> NaiveDateTime {
    at(13, 30)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            cache_path: default_cache_path(),
            results_dir: default_results_dir(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            cities: Vec::new(),
            peak: default_peak(),
            off_peak: default_off_peak(),
            isochrones: None,
            engine: EngineSection::default(),
            calibration: CalibrationSection::default(),
            osm: OsmSection::default(),
            population: PopulationSection::default(),
            transit: TransitSection::default(),
            fetch: FetchSettings::default(),
            bing_api_key: None,
            google_key: None,
        }
    }
}

impl Settings {
    /// Load from `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// `BING_API_KEY`, `GOOGLE_KEY`, `MEMORY` and `DOCKER_IMG`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        self.bing_api_key = var("BING_API_KEY").filter(|k| !k.is_empty());
        self.google_key = var("GOOGLE_KEY").filter(|k| !k.is_empty());
        if let Some(memory) = var("MEMORY") {
            self.engine.memory_gb = memory
                .trim()
                .parse()
                .with_context(|| format!("MEMORY must be a whole number of GB, got '{}'", memory))?;
        }
        if let Some(image) = var("DOCKER_IMG").filter(|i| !i.is_empty()) {
            self.engine.image = image;
        }
        Ok(())
    }

    /// Configured specs, or every mode from the local engine.
    pub fn isochrone_specs(&self) -> Vec<IsochroneSpec> {
        if let Some(specs) = &self.isochrones {
            return specs.clone();
        }
        let (peak, off) = (self.peak, self.off_peak);
        vec![
            IsochroneSpec::new(TravelMode::TransitOff, vec![15, 30], off, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::TransitPeak, vec![15, 30], peak, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::TransitBikeOff, vec![15, 30], off, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::TransitBikePeak, vec![15, 30], peak, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::DrivingOff, vec![10, 25], off, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::DrivingPeak, vec![10, 25], peak, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::Cycling, vec![15, 30], peak, Source::GraphHopper),
            IsochroneSpec::new(TravelMode::Walking, vec![15, 30], peak, Source::GraphHopper),
        ]
    }

    /// Configured cities, or only `id` when given.
    pub fn cities(&self, id: Option<&str>) -> Vec<CitySettings> {
        match id {
            None => self.cities.clone(),
            Some(id) => {
                let city = self
                    .cities
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .unwrap_or_else(|| CitySettings {
                        id: id.to_string(),
                        name: None,
                    });
                vec![city]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.engine.memory_gb, 8);
        assert_eq!(settings.engine.max_wait_minutes, 15);
        assert_eq!(settings.calibration.options.max_evaluations, 40);
        assert_eq!(settings.isochrone_specs().len(), 8);
        assert_eq!(settings.fetch.bing_group_size, 50);
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
data_root: /srv/isoreach
cities:
  - id: "2973"
    name: Stockholm
peak: 2023-08-22T08:00:00
isochrones:
  - mode: walking
    durations: [15]
    departure: 2023-08-22T08:00:00
    source: b
engine:
  memory_gb: 32
calibration:
  sample_size: 5
  force: true
fetch:
  bing_poll_delay: 1.5
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.data_root, PathBuf::from("/srv/isoreach"));
        assert_eq!(settings.cities[0].name.as_deref(), Some("Stockholm"));
        assert_eq!(settings.engine.memory_gb, 32);
        assert_eq!(settings.engine.port, 8989);
        assert_eq!(settings.calibration.sample_size, 5);
        assert!(settings.calibration.options.force);
        assert_eq!(settings.fetch.bing_poll_delay, Duration::from_millis(1500));

        let specs = settings.isochrone_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].source, Source::Bing);
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("BING_API_KEY", "bing-key"),
            ("MEMORY", "24"),
            ("DOCKER_IMG", "graphhopper:9"),
            ("GOOGLE_KEY", ""),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.bing_api_key.as_deref(), Some("bing-key"));
        assert!(settings.google_key.is_none());
        assert_eq!(settings.engine.memory_gb, 24);
        assert_eq!(settings.engine.image, "graphhopper:9");

        let bad = HashMap::from([("MEMORY", "lots")]);
        assert!(settings.apply_env(|k| bad.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_unknown_city_is_still_selected() {
        let settings = Settings::default();
        let cities = settings.cities(Some("1234"));
        assert_eq!(cities[0].id, "1234");
    }
}
