//! Speed-model calibration factors.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Road classes with a calibrated speed multiplier, in factor order.
pub const ROAD_CLASSES: [&str; 5] = ["MOTORWAY", "PRIMARY", "SECONDARY", "TERTIARY", "RESIDENTIAL"];

/// Calibration period; each has its own driving profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Peak,
    OffPeak,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Peak, Period::OffPeak];

    /// Engine profile carrying this period's speed model.
    pub fn profile(&self) -> &'static str {
        match self {
            Period::Peak => "car_cbr_peak",
            Period::OffPeak => "car_cbr_off",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Peak => "peak",
            Period::OffPeak => "off",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five speed multipliers, one per entry of [`ROAD_CLASSES`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorSet(pub [f64; 5]);

impl FactorSet {
    pub fn uniform(value: f64) -> Self {
        Self([value; 5])
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let arr: [f64; 5] = values.try_into().map_err(|_| {
            Error::Calibration(format!("expected 5 factors, got {}", values.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// `(road_class, multiplier)` pairs in factor order.
    pub fn by_road_class(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        ROAD_CLASSES.iter().copied().zip(self.0.iter().copied())
    }

    pub fn within(&self, bounds: FactorBounds) -> bool {
        self.0.iter().all(|f| bounds.contains(*f))
    }
}

impl fmt::Display for FactorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| format!("{:.3}", v)).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Inclusive bounds applied to every factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for FactorBounds {
    fn default() -> Self {
        Self { min: 0.5, max: 1.0 }
    }
}

impl FactorBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_set_from_slice() {
        let set = FactorSet::from_slice(&[0.9, 0.8, 0.7, 0.6, 0.5]).unwrap();
        assert_eq!(set.0[4], 0.5);
        assert!(FactorSet::from_slice(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_by_road_class_order() {
        let set = FactorSet([0.9, 0.8, 0.7, 0.6, 0.5]);
        let pairs: Vec<_> = set.by_road_class().collect();
        assert_eq!(pairs[0], ("MOTORWAY", 0.9));
        assert_eq!(pairs[4], ("RESIDENTIAL", 0.5));
    }

    #[test]
    fn test_bounds() {
        let bounds = FactorBounds::default();
        assert!(FactorSet::uniform(0.8).within(bounds));
        assert!(!FactorSet::uniform(1.2).within(bounds));
        assert_eq!(bounds.clamp(0.1), 0.5);
    }
}
