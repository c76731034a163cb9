//! Reachable population of isochrones.
//!
//! Loads a city's population grid, intersects each cached isochrone with its
//! cells and writes the per-city result.

pub mod aggregate;
pub mod grid;

pub use aggregate::{ReachRow, aggregate, result_path, write_city_result};
pub use grid::{PopulationCell, PopulationGrid, Reach};
