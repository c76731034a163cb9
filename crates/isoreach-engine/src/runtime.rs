//! Container runtime port.

use async_trait::async_trait;
use futures::Stream;
use isoreach_core::Result;
use std::collections::HashMap;
use std::pin::Pin;

/// Label key marking engine containers.
pub const ENGINE_LABEL: &str = "isoreach.engine";

/// Stream of log lines from a running container. Ends when the process exits.
pub type LogStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Everything needed to start one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
    /// TCP port published on the same host port.
    pub port: u16,
    pub memory_bytes: Option<i64>,
    pub init: bool,
}

/// `key=value` label filter matching engine containers.
pub fn engine_tag_filter() -> String {
    format!("{}=yes", ENGINE_LABEL)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Starts, observes and removes containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container, detached.
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Follow the container's combined stdout/stderr, line by line.
    fn logs<'a>(&'a self, handle: &'a ContainerHandle) -> LogStream<'a>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<()>;

    /// All containers, running or not, carrying the `key=value` label.
    async fn list_tagged(&self, label: &str) -> Result<Vec<ContainerHandle>>;

    async fn force_remove(&self, handle: &ContainerHandle) -> Result<()>;
}
