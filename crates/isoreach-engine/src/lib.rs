//! Routing engine lifecycle for isoreach.
//!
//! Runs GraphHopper in a container, renders its configuration, reuses the
//! prebuilt graph when nothing changed, and queries it over HTTP.

pub mod client;
pub mod config;
pub mod docker;
pub mod factor_cache;
pub mod layout;
pub mod manager;
pub mod runtime;

pub use client::GraphHopperClient;
pub use config::{EngineConfig, EngineTemplate};
pub use docker::DockerRuntime;
pub use factor_cache::FactorCache;
pub use layout::EngineLayout;
pub use manager::{EngineManager, EngineSettings, EngineState, RebuildReason};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, LogStream};
