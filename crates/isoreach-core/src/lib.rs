//! isoreach core
//!
//! Domain types, port traits and error handling shared by the isoreach
//! crates: request fingerprints, travel modes, isochrone batches, cache
//! records, speed-model factors and the retry policy.

pub mod batch;
pub mod error;
pub mod factors;
pub mod ids;
pub mod mode;
pub mod ports;
pub mod projection;
pub mod record;
pub mod retry;
pub mod timezone;

pub use batch::{BatchRow, Completeness, FetchedRow, IsochroneSpec, Origin};
pub use error::{Error, Result};
pub use factors::{FactorBounds, FactorSet, Period};
pub use ids::*;
pub use mode::{Source, TravelMode};
pub use record::CacheRecord;
pub use retry::RetryPolicy;
pub use timezone::TimezoneFinder;
