//! Local metric projection and polygon helpers for WGS84 geometries.
//!
//! Buffering and simplification are specified in metres. Geometries are
//! projected onto an equirectangular plane centred on the geometry, which
//! is accurate to well under a percent at city scale.

use crate::{Error, Result};
use geo::{Buffer, Centroid, Coord, Geometry, MapCoords, MultiPolygon, Point, Simplify};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    lon0: f64,
    lat0: f64,
    cos_lat0: f64,
}

impl LocalProjection {
    pub fn around(center: Point<f64>) -> Self {
        Self {
            lon0: center.x(),
            lat0: center.y(),
            cos_lat0: center.y().to_radians().cos(),
        }
    }

    /// Projection centred on the centroid of `geometry`, if it has one.
    pub fn for_geometry(geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry.centroid().map(Self::around)
    }

    /// Degrees to metres.
    pub fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.lon0).to_radians() * EARTH_RADIUS_M * self.cos_lat0,
            y: (c.y - self.lat0).to_radians() * EARTH_RADIUS_M,
        }
    }

    /// Metres to degrees.
    pub fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.lon0 + (c.x / (EARTH_RADIUS_M * self.cos_lat0)).to_degrees(),
            y: self.lat0 + (c.y / EARTH_RADIUS_M).to_degrees(),
        }
    }

    pub fn project(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry.map_coords(|c| self.forward(c))
    }

    pub fn unproject(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry.map_coords(|c| self.inverse(c))
    }
}

/// Buffer by `meters` in a local projection. Empty input stays empty.
pub fn buffer_meters(geometry: &MultiPolygon<f64>, meters: f64) -> MultiPolygon<f64> {
    match LocalProjection::for_geometry(geometry) {
        Some(proj) => proj.unproject(&proj.project(geometry).buffer(meters)),
        None => geometry.clone(),
    }
}

/// Ramer-Douglas-Peucker simplification with a tolerance in metres.
pub fn simplify_meters(geometry: &MultiPolygon<f64>, tolerance: f64) -> Result<MultiPolygon<f64>> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(Error::Geometry(format!("invalid tolerance {}", tolerance)));
    }
    Ok(match LocalProjection::for_geometry(geometry) {
        Some(proj) => proj.unproject(&proj.project(geometry).simplify(tolerance)),
        None => geometry.clone(),
    })
}

/// Polygonal part of a geometry; `None` for points and lines.
pub fn into_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        _ => None,
    }
}
