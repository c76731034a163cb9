//! Isochrone fetching for isoreach.

pub mod bing;
pub mod orchestrator;

pub use bing::BingClient;
pub use orchestrator::{FetchOutcome, FetchSettings, IsochroneFetcher};
