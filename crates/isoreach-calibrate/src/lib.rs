//! Speed-model calibration for isoreach.
//!
//! Compares engine car routes with a reference router between sample
//! points and fits the engine's per-road-class speed factors with a bounded
//! Nelder-Mead search.

pub mod calibrator;
pub mod comparison;
pub mod reference;
pub mod sampling;
pub mod simplex;

pub use calibrator::{CalibrationOptions, CalibrationOutcome, Calibrator, EngineControl};
pub use comparison::{ComparisonSet, PairComparison};
pub use reference::{GoogleRoutesClient, ReferenceMemo};
pub use sampling::sample_points;
pub use simplex::{Minimum, NelderMead, Objective};
