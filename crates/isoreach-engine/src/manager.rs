//! Routing engine lifecycle.
//!
//! The manager owns the desired [`EngineConfig`] for one city, decides
//! whether the prebuilt graph can be reused, and drives the engine
//! container through a bounded number of build attempts until it reports
//! ready.

use crate::config::{EngineConfig, EngineTemplate};
use crate::factor_cache::FactorCache;
use crate::layout::EngineLayout;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ENGINE_LABEL, LogStream, engine_tag_filter,
};
use futures::StreamExt;
use isoreach_core::{CityId, Error, FactorSet, Period, Result, RetryPolicy};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Log line printed once the engine serves requests.
pub const READY_MARKER: &str = "org.eclipse.jetty.server.Server - Started";
/// Log line printed when the prebuilt graph was built with other profiles.
pub const PROFILE_MISMATCH_MARKER: &str = "Profiles do not match";
/// Log line printed when a speed factor exceeds a profile's maximum speed.
pub const MAX_SPEED_MARKER: &str = "custom speed <= maxSpeed";

const GIB: i64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub image: String,
    /// JVM heap in GiB; the container gets one more.
    pub memory_gb: u32,
    pub port: u16,
    /// Engine jar, relative to the image's parent working directory.
    pub jar: String,
    pub max_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            image: "graphhopper/graphhopper:latest".to_string(),
            memory_gb: 8,
            port: 8989,
            jar: "./graphhopper/*.jar".to_string(),
            max_wait: Duration::from_secs(15 * 60),
            retry: RetryPolicy::fixed(5, Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unbuilt,
    Building,
    Ready,
    Stopped,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Unbuilt => "unbuilt",
            EngineState::Building => "building",
            EngineState::Ready => "ready",
            EngineState::Stopped => "stopped",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a build discards the prebuilt graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    ConfigChanged,
    StaleLock,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebuildReason::Forced => "forced",
            RebuildReason::ConfigChanged => "engine config changed",
            RebuildReason::StaleLock => "stale lock from an unclean shutdown",
        };
        f.write_str(s)
    }
}

/// Lifecycle manager for one city's routing engine.
pub struct EngineManager {
    city_id: CityId,
    runtime: Arc<dyn ContainerRuntime>,
    settings: EngineSettings,
    layout: EngineLayout,
    template: EngineTemplate,
    desired: EngineConfig,
    factor_cache: FactorCache,
    calibrated: bool,
    state: EngineState,
    container: Option<ContainerHandle>,
}

impl EngineManager {
    /// Load the template and factor cache from `layout`.
    pub async fn open(
        city_id: CityId,
        runtime: Arc<dyn ContainerRuntime>,
        settings: EngineSettings,
        layout: EngineLayout,
    ) -> Result<Self> {
        let template = EngineTemplate::load(&layout.template_path()).await?;
        let factor_cache = FactorCache::load(&layout.factor_cache_path()).await?;
        let desired = EngineConfig::new(template.digest());

        Ok(Self {
            city_id,
            runtime,
            settings,
            layout,
            template,
            desired,
            factor_cache,
            calibrated: false,
            state: EngineState::Unbuilt,
            container: None,
        })
    }

    pub fn city_id(&self) -> &CityId {
        &self.city_id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.desired
    }

    pub fn layout(&self) -> &EngineLayout {
        &self.layout
    }

    /// Whether the current speed models came from the factor cache.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Whether the factor cache holds both periods for this city.
    pub fn has_cached_factors(&self) -> bool {
        self.factor_cache.both(&self.city_id).is_some()
    }

    pub fn set_map_data(&mut self, path: impl Into<PathBuf>) {
        self.desired.map_data = Some(path.into());
    }

    pub fn set_transit_feeds(&mut self, paths: Vec<PathBuf>) {
        self.desired.transit_feeds = paths;
    }

    /// Set a period's speed model and record it in the factor cache.
    pub async fn set_factors(&mut self, period: Period, factors: FactorSet) -> Result<()> {
        self.factor_cache.set(&self.city_id, period, factors).await?;
        self.desired.set_factors(period, factors);
        info!(city = %self.city_id, profile = period.profile(), factors = %factors, "Set speed factors");
        Ok(())
    }

    fn apply_cached_factors(&mut self) {
        if let Some((peak, off)) = self.factor_cache.both(&self.city_id) {
            info!(city = %self.city_id, "Using previously calibrated speed factors");
            self.desired.set_factors(Period::Peak, peak);
            self.desired.set_factors(Period::OffPeak, off);
            self.calibrated = true;
        }
    }

    /// Decide whether the prebuilt graph must be discarded.
    pub async fn rebuild_reason(&self, force: bool) -> Result<Option<RebuildReason>> {
        if force {
            return Ok(Some(RebuildReason::Forced));
        }
        if self.read_applied().await?.as_ref() != Some(&self.desired) {
            return Ok(Some(RebuildReason::ConfigChanged));
        }
        if tokio::fs::try_exists(self.layout.lock_path()).await? {
            return Ok(Some(RebuildReason::StaleLock));
        }
        Ok(None)
    }

    /// Build (or reuse) the graph and start the engine until it reports ready.
    pub async fn build(&mut self, force: bool) -> Result<()> {
        if !force {
            self.apply_cached_factors();
        }

        let mut wipe_graph = match self.rebuild_reason(force).await? {
            Some(reason) => {
                info!(city = %self.city_id, reason = %reason, "Rebuilding graph cache");
                remove_file_if_exists(&self.layout.lock_path()).await?;
                true
            }
            None => {
                info!(city = %self.city_id, "Graph cache up to date, not rebuilding");
                false
            }
        };

        self.write_config().await?;
        self.remove_tagged().await?;
        self.state = EngineState::Building;

        let max_attempts = self.settings.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if wipe_graph {
                self.wipe_graph_cache().await?;
                wipe_graph = false;
            }
            self.write_lock(attempt).await?;

            info!(
                city = %self.city_id,
                attempt,
                max_attempts,
                memory_gb = self.settings.memory_gb,
                "Starting engine build"
            );

            match self.run_attempt(&mut wipe_graph).await {
                Ok(handle) => {
                    info!(city = %self.city_id, container = %handle.name, attempt, "Engine ready");
                    self.container = Some(handle);
                    self.state = EngineState::Ready;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(city = %self.city_id, attempt, error = %e, "Engine build attempt failed");
                    if let Err(cleanup) = self.remove_tagged().await {
                        warn!(error = %cleanup, "Failed to clean up engine containers");
                    }
                    if self.settings.retry.has_attempts_after(attempt) {
                        tokio::time::sleep(self.settings.retry.delay_after(attempt)).await;
                    }
                }
                Err(e) => {
                    error!(city = %self.city_id, attempt, error = %e, "Engine build aborted");
                    if let Err(cleanup) = self.remove_tagged().await {
                        warn!(error = %cleanup, "Failed to clean up engine containers");
                    }
                    self.state = EngineState::Failed;
                    return Err(e);
                }
            }
        }

        self.remove_tagged().await?;
        self.state = EngineState::Failed;
        Err(Error::EngineBuildFailed {
            attempts: max_attempts,
        })
    }

    /// Stop the engine and release the lock.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.container.take() {
            if let Err(e) = self.runtime.stop(&handle).await {
                warn!(container = %handle.name, error = %e, "Failed to stop engine container");
            }
        }
        self.remove_tagged().await?;
        remove_file_if_exists(&self.layout.lock_path()).await?;
        self.state = EngineState::Stopped;
        info!(city = %self.city_id, "Engine stopped");
        Ok(())
    }

    async fn run_attempt(&self, wipe_next: &mut bool) -> Result<ContainerHandle> {
        let spec = self.container_spec()?;
        let handle = self.runtime.start(&spec).await?;

        let waited = {
            let logs = self.runtime.logs(&handle);
            tokio::time::timeout(self.settings.max_wait, wait_until_ready(logs, wipe_next)).await
        };

        match waited {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::EngineTimeout {
                minutes: self.settings.max_wait.as_secs() / 60,
            }),
        }
    }

    /// Container spec for one build attempt.
    pub fn container_spec(&self) -> Result<ContainerSpec> {
        let mem = self.settings.memory_gb;
        let config = self.layout.to_container(&self.layout.config_path())?;

        Ok(ContainerSpec {
            name: format!("isoreach-engine-{}", uuid::Uuid::new_v4().simple()),
            image: self.settings.image.clone(),
            entrypoint: vec!["/bin/bash".to_string(), "-c".to_string()],
            cmd: vec![format!(
                "cd .. && java -Xmx{mem}g -Xms{mem}g -jar {} server {}",
                self.settings.jar, config
            )],
            env: vec![format!("JAVA_OPTS=-Xmx{mem}g -Xms{mem}g")],
            labels: HashMap::from([(ENGINE_LABEL.to_string(), "yes".to_string())]),
            binds: vec![self.layout.bind()],
            port: self.settings.port,
            memory_bytes: Some((mem as i64 + 1) * GIB),
            init: true,
        })
    }

    async fn write_config(&self) -> Result<()> {
        let rendered = self.template.render(&self.desired, &self.layout)?;
        tokio::fs::create_dir_all(self.layout.engine_dir()).await?;
        tokio::fs::write(self.layout.config_path(), rendered).await?;
        tokio::fs::write(
            self.layout.applied_config_path(),
            serde_json::to_vec_pretty(&self.desired)?,
        )
        .await?;
        debug!(path = %self.layout.config_path().display(), "Wrote engine config");
        Ok(())
    }

    async fn read_applied(&self) -> Result<Option<EngineConfig>> {
        let path = self.layout.applied_config_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => Ok(Some(config)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable applied config, rebuilding");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_lock(&self, attempt: u32) -> Result<()> {
        let lock = serde_json::json!({
            "city_id": self.city_id.as_str(),
            "attempt": attempt,
            "started_at": chrono::Utc::now().to_rfc3339(),
        });
        tokio::fs::write(self.layout.lock_path(), serde_json::to_vec(&lock)?).await?;
        Ok(())
    }

    async fn wipe_graph_cache(&self) -> Result<()> {
        let dir = self.layout.graph_cache_dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(path = %dir.display(), "Wiped graph cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "No graph cache to wipe");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_tagged(&self) -> Result<()> {
        remove_tagged_containers(self.runtime.as_ref()).await
    }
}

/// Forcibly remove every engine container.
pub async fn remove_tagged_containers(runtime: &dyn ContainerRuntime) -> Result<()> {
    for handle in runtime.list_tagged(&engine_tag_filter()).await? {
        info!(container = %handle.name, "Removing engine container");
        runtime.force_remove(&handle).await?;
    }
    Ok(())
}

async fn wait_until_ready(mut logs: LogStream<'_>, wipe_next: &mut bool) -> Result<()> {
    while let Some(line) = logs.next().await {
        let line = line?;
        if line.contains(READY_MARKER) {
            return Ok(());
        }
        if line.contains(MAX_SPEED_MARKER) {
            error!(line = %line, "Speed factor above the profile's maximum speed");
        }
        if line.contains(PROFILE_MISMATCH_MARKER) {
            warn!("Graph cache profiles do not match, wiping before the next attempt");
            *wipe_next = true;
        }
        trace!(line = %line, "engine");
    }
    Err(Error::EngineExited)
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
