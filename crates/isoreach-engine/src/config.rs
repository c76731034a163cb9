//! Engine configuration and YAML rendering.

use crate::layout::EngineLayout;
use isoreach_core::{Error, FactorSet, Period, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Speed multiplier applied on ferries in every custom model.
pub const FERRY_MULTIPLIER: &str = "0.1";

/// Desired state of the engine. Two equal configs build the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub map_data: Option<PathBuf>,
    pub transit_feeds: Vec<PathBuf>,
    /// Profile name to speed factors.
    pub speed_models: BTreeMap<String, FactorSet>,
    /// SHA-256 of the source template.
    pub template_digest: String,
}

impl EngineConfig {
    pub fn new(template_digest: impl Into<String>) -> Self {
        Self {
            map_data: None,
            transit_feeds: Vec::new(),
            speed_models: BTreeMap::new(),
            template_digest: template_digest.into(),
        }
    }

    pub fn set_factors(&mut self, period: Period, factors: FactorSet) {
        self.speed_models.insert(period.profile().to_string(), factors);
    }

    pub fn factors(&self, period: Period) -> Option<FactorSet> {
        self.speed_models.get(period.profile()).copied()
    }
}

/// One `if`/`multiply_by` rule of a custom speed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRule {
    #[serde(rename = "if")]
    pub condition: String,
    pub multiply_by: String,
}

/// Ferry penalty followed by one rule per road class.
pub fn speed_rules(factors: &FactorSet) -> Vec<SpeedRule> {
    std::iter::once(SpeedRule {
        condition: "road_environment == FERRY".to_string(),
        multiply_by: FERRY_MULTIPLIER.to_string(),
    })
    .chain(factors.by_road_class().map(|(class, factor)| SpeedRule {
        condition: format!("road_class == {}", class),
        multiply_by: factor.to_string(),
    }))
    .collect()
}

/// The engine's source YAML template.
#[derive(Debug, Clone)]
pub struct EngineTemplate {
    value: Value,
    digest: String,
}

impl EngineTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid engine template: {}", e)))?;
        if value.get("graphhopper").and_then(Value::as_mapping).is_none() {
            return Err(Error::Config(
                "engine template has no 'graphhopper' section".to_string(),
            ));
        }

        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        Ok(Self { value, digest })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read template {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Merge `config` into the template and serialise it.
    pub fn render(&self, config: &EngineConfig, layout: &EngineLayout) -> Result<String> {
        let mut value = self.value.clone();
        let section = value
            .get_mut("graphhopper")
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| Error::Config("missing 'graphhopper' section".to_string()))?;

        let map_data = config
            .map_data
            .as_deref()
            .ok_or_else(|| Error::Config("no map data configured".to_string()))?;
        section.insert(
            "datareader.file".into(),
            layout.to_container(map_data)?.into(),
        );

        if config.transit_feeds.is_empty() {
            section.remove("gtfs.file");
        } else {
            let feeds = config
                .transit_feeds
                .iter()
                .map(|p| layout.to_container(p))
                .collect::<Result<Vec<_>>>()?;
            section.insert("gtfs.file".into(), feeds.join(",").into());
        }

        section.insert(
            "graph.location".into(),
            layout.to_container(&layout.graph_cache_dir())?.into(),
        );

        for (profile, factors) in &config.speed_models {
            set_custom_model(section, profile, factors)?;
        }

        serde_yaml::to_string(&value)
            .map_err(|e| Error::Serialization(format!("engine config: {}", e)))
    }
}

fn set_custom_model(section: &mut Mapping, profile: &str, factors: &FactorSet) -> Result<()> {
    let entry = section
        .get_mut("profiles")
        .and_then(Value::as_sequence_mut)
        .and_then(|profiles| {
            profiles
                .iter_mut()
                .find(|p| p.get("name").and_then(Value::as_str) == Some(profile))
        })
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::Config(format!("template has no profile '{}'", profile)))?;

    let mut model = Mapping::new();
    model.insert(
        "speed".into(),
        serde_yaml::to_value(speed_rules(factors))
            .map_err(|e| Error::Serialization(e.to_string()))?,
    );
    entry.insert("custom_model".into(), Value::Mapping(model));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
graphhopper:
  datareader.file: ""
  gtfs.file: example.zip
  profiles:
    - name: car_cbr_peak
      vehicle: car
    - name: car_cbr_off
      vehicle: car
    - name: foot
      vehicle: foot
server:
  application_connectors:
    - type: http
      port: 8989
"#;

    fn layout() -> EngineLayout {
        EngineLayout::under("/srv/data")
    }

    fn config(template: &EngineTemplate) -> EngineConfig {
        let mut config = EngineConfig::new(template.digest());
        config.map_data = Some(PathBuf::from("/srv/data/osm/2973.osm.pbf"));
        config
    }

    #[test]
    fn test_digest_tracks_template_text() {
        let a = EngineTemplate::parse(TEMPLATE).unwrap();
        let b = EngineTemplate::parse(&format!("{}\n# edited\n", TEMPLATE)).unwrap();
        assert_eq!(a.digest().len(), 64);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_render_sets_paths() {
        let template = EngineTemplate::parse(TEMPLATE).unwrap();
        let mut config = config(&template);
        config.transit_feeds = vec![
            PathBuf::from("/srv/data/gtfs/2973-a.zip"),
            PathBuf::from("/srv/data/gtfs/2973-b.zip"),
        ];

        let rendered: Value = serde_yaml::from_str(&template.render(&config, &layout()).unwrap()).unwrap();
        let gh = &rendered["graphhopper"];
        assert_eq!(gh["datareader.file"].as_str(), Some("/data/osm/2973.osm.pbf"));
        assert_eq!(
            gh["gtfs.file"].as_str(),
            Some("/data/gtfs/2973-a.zip,/data/gtfs/2973-b.zip")
        );
        assert_eq!(gh["graph.location"].as_str(), Some("/data/engine/graph-cache"));
        assert_eq!(rendered["server"]["application_connectors"][0]["port"].as_u64(), Some(8989));
    }

    #[test]
    fn test_render_without_feeds_drops_gtfs() {
        let template = EngineTemplate::parse(TEMPLATE).unwrap();
        let rendered: Value =
            serde_yaml::from_str(&template.render(&config(&template), &layout()).unwrap()).unwrap();
        assert!(rendered["graphhopper"].get("gtfs.file").is_none());
    }

    #[test]
    fn test_render_custom_model() {
        let template = EngineTemplate::parse(TEMPLATE).unwrap();
        let mut config = config(&template);
        config.set_factors(Period::Peak, FactorSet([0.9, 0.8, 0.7, 0.6, 0.5]));

        let rendered: Value = serde_yaml::from_str(&template.render(&config, &layout()).unwrap()).unwrap();
        let speed = &rendered["graphhopper"]["profiles"][0]["custom_model"]["speed"];
        assert_eq!(speed[0]["multiply_by"].as_str(), Some("0.1"));
        assert_eq!(speed[1]["if"].as_str(), Some("road_class == MOTORWAY"));
        assert_eq!(speed[1]["multiply_by"].as_str(), Some("0.9"));
        assert_eq!(speed[5]["multiply_by"].as_str(), Some("0.5"));
        assert!(rendered["graphhopper"]["profiles"][1].get("custom_model").is_none());
    }

    #[test]
    fn test_render_errors() {
        let template = EngineTemplate::parse(TEMPLATE).unwrap();
        let empty = EngineConfig::new(template.digest());
        assert!(matches!(template.render(&empty, &layout()), Err(Error::Config(_))));

        let mut unknown = config(&template);
        unknown
            .speed_models
            .insert("car_fast".to_string(), FactorSet::uniform(1.0));
        assert!(template.render(&unknown, &layout()).is_err());

        assert!(EngineTemplate::parse("server: {}").is_err());
    }

    #[test]
    fn test_config_equality_is_structural() {
        let template = EngineTemplate::parse(TEMPLATE).unwrap();
        let a = config(&template);
        let mut b = config(&template);
        assert_eq!(a, b);
        b.set_factors(Period::OffPeak, FactorSet::uniform(0.8));
        assert_ne!(a, b);
    }
}
