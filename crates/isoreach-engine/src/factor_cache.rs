//! Persistent cache of calibrated speed factors.

use isoreach_core::{CityId, Error, FactorSet, Period, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

type Entries = BTreeMap<String, BTreeMap<String, FactorSet>>;

/// `{city_id: {profile: [f64; 5]}}` JSON file.
#[derive(Debug, Clone)]
pub struct FactorCache {
    path: PathBuf,
    entries: Entries,
}

impl FactorCache {
    /// Load the cache; a missing file is an empty cache.
    pub async fn load(path: &Path) -> Result<Self> {
        let entries = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Serialization(format!("factor cache {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn get(&self, city_id: &CityId, period: Period) -> Option<FactorSet> {
        self.entries
            .get(city_id.as_str())
            .and_then(|profiles| profiles.get(period.profile()))
            .copied()
    }

    /// Factors for both periods, if both are cached.
    pub fn both(&self, city_id: &CityId) -> Option<(FactorSet, FactorSet)> {
        Some((
            self.get(city_id, Period::Peak)?,
            self.get(city_id, Period::OffPeak)?,
        ))
    }

    /// Record factors and write the file.
    pub async fn set(&mut self, city_id: &CityId, period: Period, factors: FactorSet) -> Result<()> {
        self.entries
            .entry(city_id.to_string())
            .or_default()
            .insert(period.profile().to_string(), factors);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec(&self.entries)?).await?;
        debug!(city = %city_id, profile = period.profile(), "Saved factors");
        Ok(())
    }
}
