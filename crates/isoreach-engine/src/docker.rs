//! Docker implementation of ContainerRuntime.

use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, LogStream};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use isoreach_core::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Docker-backed container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let port_key = format!("{}/tcp", spec.port);
        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.port.to_string()),
            }]),
        )]);

        Config {
            image: Some(spec.image.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                port_bindings: Some(port_bindings),
                memory: spec.memory_bytes,
                init: Some(spec.init),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Splits log chunks into lines, holding back a trailing partial line
/// until the chunk that completes it arrives.
#[derive(Debug, Default)]
struct LineCarry {
    partial: String,
}

impl LineCarry {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        let Some(end) = self.partial.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete.lines().map(|line| line.trim_end().to_string()).collect()
    }

    /// Whatever is left once the stream ends.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        let rest = rest.trim_end();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(create_options), Self::container_config(spec))
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        info!(container = %spec.name, image = %spec.image, "Started container");
        Ok(ContainerHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    fn logs<'a>(&'a self, handle: &'a ContainerHandle) -> LogStream<'a> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let chunks = Box::pin(self.docker.logs(&handle.id, Some(options)));
        let lines = futures::stream::unfold(
            Some((chunks, LineCarry::default())),
            |state| async move {
                let (mut chunks, mut carry) = state?;
                let (items, more): (Vec<Result<String>>, bool) = match chunks.next().await {
                    Some(Ok(output)) => (carry.push(&output.into_bytes()).into_iter().map(Ok).collect(), true),
                    Some(Err(e)) => (
                        vec![Err(Error::Container(format!("Error reading container logs: {}", e)))],
                        true,
                    ),
                    None => (carry.finish().map(Ok).into_iter().collect(), false),
                };
                Some((futures::stream::iter(items), more.then_some((chunks, carry))))
            },
        )
        .flatten();

        Box::pin(lines)
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .stop_container(&handle.id, None::<StopContainerOptions>)
            .await
            .map_err(|e| Error::Container(format!("Failed to stop container: {}", e)))?;
        debug!(container = %handle.name, "Stopped container");
        Ok(())
    }

    async fn list_tagged(&self, label: &str) -> Result<Vec<ContainerHandle>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![label.to_string()])]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::Container(format!("Failed to list containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ContainerHandle { id, name })
            })
            .collect())
    }

    async fn force_remove(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(|e| Error::Container(format!("Failed to remove container: {}", e)))?;
        debug!(container = %handle.name, "Removed container");
        Ok(())
    }
}
