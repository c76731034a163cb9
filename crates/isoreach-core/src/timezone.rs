//! Timezone lookup by coordinate.

use crate::{Error, Result};
use chrono_tz::Tz;
use geo::{Centroid, MultiPoint, Point};
use tzf_rs::DefaultFinder;

/// Offline coordinate-to-timezone lookup. Loading is costly; build once and share.
pub struct TimezoneFinder {
    finder: DefaultFinder,
}

impl Default for TimezoneFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneFinder {
    pub fn new() -> Self {
        Self {
            finder: DefaultFinder::new(),
        }
    }

    pub fn timezone_at(&self, point: Point<f64>) -> Result<Tz> {
        let name = self.finder.get_tz_name(point.x(), point.y());
        if name.is_empty() {
            return Err(Error::Timezone(format!(
                "no timezone at {},{}",
                point.y(),
                point.x()
            )));
        }
        name.parse::<Tz>()
            .map_err(|e| Error::Timezone(format!("unknown timezone '{}': {}", name, e)))
    }

    /// Timezone at the centroid of `points`.
    pub fn timezone_of(&self, points: &[Point<f64>]) -> Result<Tz> {
        let centroid = MultiPoint::new(points.to_vec())
            .centroid()
            .ok_or_else(|| Error::Timezone("no points to locate".to_string()))?;
        self.timezone_at(centroid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_cities() {
        let finder = TimezoneFinder::new();
        assert_eq!(
            finder.timezone_at(Point::new(4.9041, 52.3676)).unwrap(),
            chrono_tz::Europe::Amsterdam
        );
        assert_eq!(
            finder.timezone_at(Point::new(18.0686, 59.3293)).unwrap(),
            chrono_tz::Europe::Stockholm
        );
    }

    #[test]
    fn test_centroid_lookup() {
        let finder = TimezoneFinder::new();
        let points = [Point::new(4.88, 52.36), Point::new(4.92, 52.38)];
        assert_eq!(finder.timezone_of(&points).unwrap(), chrono_tz::Europe::Amsterdam);
        assert!(finder.timezone_of(&[]).is_err());
    }
}
