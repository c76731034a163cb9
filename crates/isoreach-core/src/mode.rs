//! Travel modes and fetch sources.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Travel mode of an isochrone request.
///
/// Peak and off-peak variants differ in departure time and, for driving,
/// in the calibrated speed profile the engine routes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    DrivingOff,
    DrivingPeak,
    TransitOff,
    TransitPeak,
    TransitBikeOff,
    TransitBikePeak,
    Walking,
    Cycling,
}

impl TravelMode {
    pub const ALL: [TravelMode; 8] = [
        TravelMode::DrivingOff,
        TravelMode::DrivingPeak,
        TravelMode::TransitOff,
        TravelMode::TransitPeak,
        TravelMode::TransitBikeOff,
        TravelMode::TransitBikePeak,
        TravelMode::Walking,
        TravelMode::Cycling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::DrivingOff => "driving_off",
            TravelMode::DrivingPeak => "driving_peak",
            TravelMode::TransitOff => "transit_off",
            TravelMode::TransitPeak => "transit_peak",
            TravelMode::TransitBikeOff => "transit_bike_off",
            TravelMode::TransitBikePeak => "transit_bike_peak",
            TravelMode::Walking => "walking",
            TravelMode::Cycling => "cycling",
        }
    }

    pub fn is_transit(&self) -> bool {
        matches!(
            self,
            TravelMode::TransitOff
                | TravelMode::TransitPeak
                | TravelMode::TransitBikeOff
                | TravelMode::TransitBikePeak
        )
    }

    pub fn is_driving(&self) -> bool {
        matches!(self, TravelMode::DrivingOff | TravelMode::DrivingPeak)
    }

    /// Routing engine profile used for this mode.
    pub fn engine_profile(&self) -> &'static str {
        match self {
            TravelMode::DrivingOff => "car_cbr_off",
            TravelMode::DrivingPeak => "car_cbr_peak",
            TravelMode::Walking => "foot",
            TravelMode::Cycling => "bike",
            _ => "pt",
        }
    }

    /// Street profile for reaching and leaving transit stops.
    pub fn access_profile(&self) -> Option<&'static str> {
        match self {
            TravelMode::TransitOff | TravelMode::TransitPeak => Some("foot"),
            TravelMode::TransitBikeOff | TravelMode::TransitBikePeak => Some("bike"),
            _ => None,
        }
    }

    /// Travel mode name understood by the external isochrone API, if supported.
    pub fn external_mode(&self) -> Option<&'static str> {
        match self {
            TravelMode::DrivingOff | TravelMode::DrivingPeak => Some("driving"),
            TravelMode::TransitOff | TravelMode::TransitPeak => Some("transit"),
            TravelMode::Walking => Some("walking"),
            _ => None,
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TravelMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::InvalidMode(s.to_string()))
    }
}

/// Backend that resolves an isochrone request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Local GraphHopper engine.
    #[serde(rename = "g")]
    GraphHopper,
    /// Bing Maps async isochrone API.
    #[serde(rename = "b")]
    Bing,
    /// HERE; kept for schema compatibility, there is no fetch backend.
    #[serde(rename = "h")]
    Here,
}

impl Source {
    pub fn code(&self) -> &'static str {
        match self {
            Source::GraphHopper => "g",
            Source::Bing => "b",
            Source::Here => "h",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "g" => Ok(Source::GraphHopper),
            "b" => Ok(Source::Bing),
            "h" => Ok(Source::Here),
            other => Err(Error::InvalidSource(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_display() {
        for mode in TravelMode::ALL {
            let parsed: TravelMode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!(matches!(
            "driving".parse::<TravelMode>(),
            Err(Error::InvalidMode(_))
        ));
    }

    #[test]
    fn test_engine_profiles() {
        assert_eq!(TravelMode::DrivingPeak.engine_profile(), "car_cbr_peak");
        assert_eq!(TravelMode::TransitBikeOff.engine_profile(), "pt");
        assert_eq!(TravelMode::TransitBikeOff.access_profile(), Some("bike"));
        assert_eq!(TravelMode::Walking.access_profile(), None);
    }

    #[test]
    fn test_source_serde_codes() {
        let json = serde_json::to_string(&Source::Bing).unwrap();
        assert_eq!(json, "\"b\"");
        let parsed: Source = serde_json::from_str("\"g\"").unwrap();
        assert_eq!(parsed, Source::GraphHopper);
        assert!("x".parse::<Source>().is_err());
    }
}
