//! WKT geometry codec.

use geo::{Area, Geometry, MultiPolygon};
use isoreach_core::projection::simplify_meters;
use isoreach_core::{Error, Result};
use wkt::{ToWkt, TryFromWkt};

/// Planar area in square degrees above which geometries are simplified.
pub const SIMPLIFY_AREA_THRESHOLD: f64 = 0.0001;

/// Simplification tolerance in metres.
pub const SIMPLIFY_TOLERANCE_M: f64 = 100.0;

const EMPTY: &str = "MULTIPOLYGON EMPTY";

/// Encode a geometry for storage, simplifying large ones.
pub fn encode(geometry: &MultiPolygon<f64>) -> Result<String> {
    if geometry.0.is_empty() {
        return Ok(EMPTY.to_string());
    }
    if geometry.unsigned_area() > SIMPLIFY_AREA_THRESHOLD {
        let simplified = simplify_meters(geometry, SIMPLIFY_TOLERANCE_M)?;
        if !simplified.0.is_empty() {
            return Ok(simplified.wkt_string());
        }
    }
    Ok(geometry.wkt_string())
}

/// Decode stored WKT. Accepts polygons and multipolygons, including their empty forms.
pub fn decode(text: &str) -> Result<MultiPolygon<f64>> {
    let trimmed = text.trim();
    if is_empty_polygonal(trimmed) {
        return Ok(MultiPolygon::new(vec![]));
    }
    let geometry = Geometry::<f64>::try_from_wkt_str(trimmed)
        .map_err(|e| Error::Geometry(format!("invalid WKT: {}", e)))?;
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        other => Err(Error::Geometry(format!(
            "expected a polygonal geometry, got {}",
            kind(&other)
        ))),
    }
}

fn kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        _ => "non-polygonal geometry",
    }
}

fn is_empty_polygonal(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    let mut words = upper.split_whitespace();
    matches!(
        (words.next(), words.next(), words.next()),
        (Some("POLYGON" | "MULTIPOLYGON"), Some("EMPTY"), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord, LineString, Polygon};

    fn small_square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 4.90, y: 52.37),
            (x: 4.901, y: 52.37),
            (x: 4.901, y: 52.371),
            (x: 4.90, y: 52.371),
            (x: 4.90, y: 52.37),
        ]])
    }

    /// A large polygon with many near-collinear vertices along its southern edge.
    fn noisy_large_polygon() -> MultiPolygon<f64> {
        let mut coords: Vec<Coord<f64>> = (0..=200)
            .map(|i| Coord {
                x: 4.8 + i as f64 * 0.001,
                y: 52.3 + if i % 2 == 0 { 0.0 } else { 0.00001 },
            })
            .collect();
        coords.push(Coord { x: 5.0, y: 52.5 });
        coords.push(Coord { x: 4.8, y: 52.5 });
        coords.push(Coord { x: 4.8, y: 52.3 });
        MultiPolygon::new(vec![Polygon::new(LineString::new(coords), vec![])])
    }

    #[test]
    fn test_empty_round_trip() {
        let text = encode(&MultiPolygon::new(vec![])).unwrap();
        assert_eq!(text, "MULTIPOLYGON EMPTY");
        assert!(decode(&text).unwrap().0.is_empty());
        assert!(decode("POLYGON EMPTY").unwrap().0.is_empty());
    }

    #[test]
    fn test_small_geometry_not_simplified() {
        let geom = small_square();
        let decoded = decode(&encode(&geom).unwrap()).unwrap();
        assert_eq!(decoded.0[0].exterior().0.len(), geom.0[0].exterior().0.len());
    }

    #[test]
    fn test_large_geometry_simplified() {
        let geom = noisy_large_polygon();
        assert!(geom.unsigned_area() > SIMPLIFY_AREA_THRESHOLD);
        let decoded = decode(&encode(&geom).unwrap()).unwrap();
        assert!(decoded.0[0].exterior().0.len() < geom.0[0].exterior().0.len());
    }

    #[test]
    fn test_decode_polygon_as_multipolygon() {
        let decoded = decode("POLYGON((0 0,1 0,1 1,0 1,0 0))").unwrap();
        assert_eq!(decoded.0.len(), 1);
    }

    #[test]
    fn test_decode_rejects_points() {
        assert!(matches!(decode("POINT(1 2)"), Err(Error::Geometry(_))));
        assert!(decode("not wkt").is_err());
    }
}
