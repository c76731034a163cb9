//! Population grid with a spatial index over its cells.

use geo::{
    BoundingRect, Centroid, ChamberlainDuquetteArea, Intersects, MultiPolygon, Point, Polygon,
    unary_union,
};
use geojson::GeoJson;
use isoreach_core::projection::into_multipolygon;
use isoreach_core::{Error, Result};
use rstar::{AABB, RTree, RTreeObject};
use std::path::Path;
use tracing::{debug, warn};

/// Feature property holding a cell's population.
pub const POPULATION_PROPERTY: &str = "cell_pop";

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationCell {
    pub population: f64,
    pub area_km2: f64,
    pub geometry: Polygon<f64>,
}

impl PopulationCell {
    /// Cell with its geodesic area. Negative populations count as zero.
    pub fn new(population: f64, geometry: Polygon<f64>) -> Self {
        let area_km2 = geometry.chamberlain_duquette_unsigned_area() / 1_000_000.0;
        Self {
            population: population.max(0.0),
            area_km2,
            geometry,
        }
    }
}

/// Population reachable within one isochrone.
#[derive(Debug, Clone, PartialEq)]
pub struct Reach {
    pub cells: usize,
    pub area_km2: f64,
    pub population: f64,
    pub geometry: MultiPolygon<f64>,
}

impl Default for Reach {
    fn default() -> Self {
        Self {
            cells: 0,
            area_km2: 0.0,
            population: 0.0,
            geometry: MultiPolygon::new(vec![]),
        }
    }
}

/// Cell bounds in the R-tree.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CellBounds {
    envelope: AABB<[f64; 2]>,
    index: usize,
}

impl RTreeObject for CellBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn aabb(rect: geo::Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

pub struct PopulationGrid {
    cells: Vec<PopulationCell>,
    tree: RTree<CellBounds>,
}

impl PopulationGrid {
    pub fn from_cells(cells: Vec<PopulationCell>) -> Self {
        let bounds = cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| {
                let rect = cell.geometry.bounding_rect()?;
                Some(CellBounds {
                    envelope: aabb(rect),
                    index,
                })
            })
            .collect();
        Self {
            cells,
            tree: RTree::bulk_load(bounds),
        }
    }

    /// Parse a GeoJSON FeatureCollection of polygon cells with a numeric `cell_pop`.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let geojson = text
            .parse::<GeoJson>()
            .map_err(|e| Error::Geometry(format!("population grid: {}", e)))?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(Error::Geometry(
                "population grid is not a FeatureCollection".to_string(),
            ));
        };

        let mut cells = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let population = feature
                .property(POPULATION_PROPERTY)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    Error::Geometry(format!("cell {} has no numeric '{}'", i, POPULATION_PROPERTY))
                })?;
            let Some(geometry) = feature.geometry else {
                warn!(cell = i, "Population cell without geometry, skipping");
                continue;
            };
            let geometry = geo::Geometry::<f64>::try_from(geometry.value)
                .map_err(|e| Error::Geometry(format!("cell {}: {}", i, e)))?;
            let polygons = into_multipolygon(geometry)
                .ok_or_else(|| Error::Geometry(format!("cell {} is not a polygon", i)))?;

            // Split population evenly over the parts of a multi-part cell.
            let parts = polygons.0.len().max(1) as f64;
            for polygon in polygons {
                cells.push(PopulationCell::new(population / parts, polygon));
            }
        }

        debug!(cells = cells.len(), "Loaded population grid");
        Ok(Self::from_cells(cells))
    }

    pub async fn from_geojson(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_geojson_str(&text)
    }

    pub fn cells(&self) -> &[PopulationCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total_population(&self) -> f64 {
        self.cells.iter().map(|c| c.population).sum()
    }

    /// Cell centroids in cell order.
    pub fn origins(&self) -> Vec<Point<f64>> {
        self.cells
            .iter()
            .filter_map(|c| c.geometry.centroid())
            .collect()
    }

    /// Cells intersecting `isochrone`, in cell order.
    fn intersecting(&self, isochrone: &MultiPolygon<f64>) -> Vec<&PopulationCell> {
        let Some(rect) = isochrone.bounding_rect() else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&aabb(rect))
            .map(|b| b.index)
            .filter(|&i| self.cells[i].geometry.intersects(isochrone))
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.cells[i]).collect()
    }

    pub fn reach(&self, isochrone: Option<&MultiPolygon<f64>>) -> Reach {
        let Some(isochrone) = isochrone.filter(|mp| !mp.0.is_empty()) else {
            return Reach::default();
        };

        let cells = self.intersecting(isochrone);
        if cells.is_empty() {
            return Reach::default();
        }
        Reach {
            cells: cells.len(),
            area_km2: cells.iter().map(|c| c.area_km2).sum(),
            population: cells.iter().map(|c| c.population).sum(),
            geometry: unary_union(cells.iter().map(|c| &c.geometry)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};

    /// 0.01 degree cells in a 3x3 block near Stockholm, population = index + 1.
    fn block() -> PopulationGrid {
        let mut cells = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                let x = 18.0 + col as f64 * 0.01;
                let y = 59.3 + row as f64 * 0.01;
                let rect = Rect::new(coord! { x: x, y: y }, coord! { x: x + 0.01, y: y + 0.01 });
                cells.push(PopulationCell::new((row * 3 + col + 1) as f64, rect.to_polygon()));
            }
        }
        PopulationGrid::from_cells(cells)
    }

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        let rect = Rect::new(coord! { x: x, y: y }, coord! { x: x + size, y: y + size });
        MultiPolygon::new(vec![rect.to_polygon()])
    }

    #[test]
    fn test_cell_area_is_geodesic() {
        let grid = block();
        let area = grid.cells()[0].area_km2;
        // 0.01 x 0.01 degrees at 59.3N: about 1.11 km x 0.57 km.
        assert!((area - 0.63).abs() < 0.03, "area {}", area);
    }

    #[test]
    fn test_reach_counts_intersecting_cells() {
        let grid = block();
        // Inside the centre cell only.
        let reach = grid.reach(Some(&square(18.012, 59.312, 0.005)));
        assert_eq!(reach.cells, 1);
        assert_eq!(reach.population, 5.0);
        assert!(!reach.geometry.0.is_empty());

        // Across the bottom-left 2x2 corner.
        let reach = grid.reach(Some(&square(18.005, 59.305, 0.01)));
        assert_eq!(reach.cells, 4);
        assert_eq!(reach.population, 1.0 + 2.0 + 4.0 + 5.0);
        assert!((reach.area_km2 - 4.0 * grid.cells()[0].area_km2).abs() < 0.01);
    }

    #[test]
    fn test_empty_isochrone_has_zero_reach() {
        let grid = block();
        assert_eq!(grid.reach(None), Reach::default());
        assert_eq!(grid.reach(Some(&MultiPolygon::new(vec![]))), Reach::default());
        assert_eq!(grid.reach(Some(&square(10.0, 10.0, 0.1))), Reach::default());
    }

    #[test]
    fn test_origins_in_cell_order() {
        let origins = block().origins();
        assert_eq!(origins.len(), 9);
        assert!((origins[0].x() - 18.005).abs() < 1e-9);
        assert!((origins[1].x() - 18.015).abs() < 1e-9);
        assert!((origins[3].y() - 59.315).abs() < 1e-9);
    }

    #[test]
    fn test_from_geojson() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"cell_pop": 120.5},
                    "geometry": {"type": "Polygon", "coordinates": [[[18.0, 59.3], [18.01, 59.3], [18.01, 59.31], [18.0, 59.31], [18.0, 59.3]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"cell_pop": -3},
                    "geometry": {"type": "Polygon", "coordinates": [[[18.01, 59.3], [18.02, 59.3], [18.02, 59.31], [18.01, 59.31], [18.01, 59.3]]]}
                }
            ]
        }"#;
        let grid = PopulationGrid::from_geojson_str(text).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.total_population(), 120.5);
    }

    #[test]
    fn test_from_geojson_requires_population() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Polygon", "coordinates": [[[18.0, 59.3], [18.01, 59.3], [18.01, 59.31], [18.0, 59.3]]]}
            }]
        }"#;
        assert!(PopulationGrid::from_geojson_str(text).is_err());
    }
}
