//! Identifiers for cities and isochrone requests.

use crate::mode::{Source, TravelMode};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CityId(String);

impl CityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Deterministic fingerprint of one logical isochrone request.
///
/// Formatted as `{city}-{pid}-{mode}-{minutes}m-{source}`; it is the cache
/// primary key, so the format must never change for existing stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestUid(String);

impl RequestUid {
    pub fn new(
        city_id: &CityId,
        pid: usize,
        mode: TravelMode,
        minutes: u32,
        source: Source,
    ) -> Self {
        Self(format!(
            "{}-{}-{}-{}m-{}",
            city_id, pid, mode, minutes, source
        ))
    }

    /// Wrap a uid read back from storage.
    pub fn from_stored(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
