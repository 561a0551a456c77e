//! Declarative lifecycle management for one named container.
//!
//! A [`ContainerLifecycleManager`] owns exactly one [`ContainerConfig`] for its
//! whole lifetime. Every operation re-reads live state from the runtime by
//! container name, so the manager holds no identity cache and can be recreated
//! at any time without losing track of its container.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dockhand_orchestrator::{
//!     container::ContainerConfig,
//!     manager::{ContainerLifecycleManager, ManagerOptions},
//!     runtime::DockerRuntime,
//! };
//!
//! let config = ContainerConfig::builder("cache-1", "redis:7-alpine")
//!     .network("custom-net")
//!     .volume("redis-data", "/data")
//!     .build();
//!
//! let manager = ContainerLifecycleManager::new(
//!     config,
//!     Arc::new(DockerRuntime::new()),
//!     ManagerOptions::default(),
//! )?;
//!
//! manager.start().await?;
//! let output = manager.exec(&["redis-cli".into(), "PING".into()]).await?;
//! manager.delete(true, true).await?;
//! ```

mod delete;

pub use delete::{BackupRecord, DeleteOutcome, BACKUP_TIMESTAMP_FORMAT};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::container::{ContainerConfig, ContainerState, VolumeMap};
use crate::error::{OrchestratorError, Result};
use crate::provision::{ImageProvisioner, NetworkProvisioner};
use crate::runtime::{ExecOutput, LogStream, SharedRuntime};

/// Default grace period for stop and restart.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// What `start` does with a container the runtime reports as dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadContainerPolicy {
    /// Remove the dead container and create a fresh one.
    #[default]
    Recreate,
    /// Try to start it like any other existing container.
    Keep,
}

/// Per-manager settings shared by every managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Directory receiving backup tarballs.
    pub backup_dir: PathBuf,

    /// Grace period for `restart` and the stop phase of `delete`.
    pub stop_timeout: Duration,

    /// Handling of dead containers on `start`.
    pub dead_containers: DeadContainerPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            dead_containers: DeadContainerPolicy::default(),
        }
    }
}

/// Result of a successful [`ContainerLifecycleManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOutcome {
    /// No container existed; one was created and started.
    Created,
    /// The existing container was started (or was already running).
    Started,
}

/// Drives one named container towards its declared configuration.
pub struct ContainerLifecycleManager {
    config: ContainerConfig,
    volumes: VolumeMap,
    runtime: SharedRuntime,
    images: ImageProvisioner,
    networks: NetworkProvisioner,
    options: ManagerOptions,
    /// Serializes `delete` calls on this manager. Not re-entrant.
    delete_lock: Mutex<()>,
}

impl std::fmt::Debug for ContainerLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerLifecycleManager")
            .field("name", &self.config.name)
            .field("image", &self.config.image.reference())
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl ContainerLifecycleManager {
    /// Adopts a configuration.
    ///
    /// The configuration is validated and its volumes normalized here, before
    /// any runtime call.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] or
    /// [`OrchestratorError::VolumeSpec`] for an invalid configuration.
    pub fn new(config: ContainerConfig, runtime: SharedRuntime, options: ManagerOptions) -> Result<Self> {
        config.validate()?;
        let volumes = config.normalized_volumes()?;

        Ok(Self {
            images: ImageProvisioner::new(runtime.clone()),
            networks: NetworkProvisioner::new(runtime.clone()),
            config,
            volumes,
            runtime,
            options,
            delete_lock: Mutex::new(()),
        })
    }

    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the adopted configuration.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Returns the normalized volume map.
    pub fn volumes(&self) -> &VolumeMap {
        &self.volumes
    }

    /// Returns the manager options.
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Brings the container to the running state.
    ///
    /// Starts the existing container or creates it from the configuration.
    /// Never creates a second container under the same name. A start that
    /// fails because the configured network vanished is repaired and retried
    /// exactly once.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::ImagePull`] / [`OrchestratorError::ImageNotFound`]
    ///   if the image cannot be made available.
    /// - [`OrchestratorError::Network`] if the retry after repairing the
    ///   network fails too.
    pub async fn start(&self) -> Result<StartOutcome> {
        let name = self.name();
        let existing = self.runtime.inspect_container(name).await?;

        if let Err(e) = self.networks.ensure_network(self.config.network.as_deref()).await {
            warn!(container = %name, error = %e, "Network provisioning failed, continuing");
        }

        match existing {
            Some(info) if info.state.is_dead() && self.options.dead_containers == DeadContainerPolicy::Recreate => {
                warn!(container = %name, id = %info.short_id(), "Removing dead container before recreating");
                match self.runtime.remove_container(name, true).await {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => {}
                }
                self.create().await
            }
            Some(info) => {
                debug!(container = %name, state = %info.state, "Starting existing container");
                self.with_network_repair(|| self.runtime.start_container(name)).await?;
                info!(container = %name, "Container started");
                Ok(StartOutcome::Started)
            }
            None => self.create().await,
        }
    }

    async fn create(&self) -> Result<StartOutcome> {
        self.images.ensure_image(&self.config).await?;
        self.with_network_repair(|| self.run_or_start()).await?;
        info!(container = %self.name(), image = %self.config.image, "Container created");
        Ok(StartOutcome::Created)
    }

    /// Runs the container, or starts it if an earlier attempt already created
    /// it before failing.
    async fn run_or_start(&self) -> Result<()> {
        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_some() {
            return self.runtime.start_container(name).await;
        }
        let id = self.runtime.run_container(&self.config, &self.volumes).await?;
        debug!(container = %name, id = %id, "Container running");
        Ok(())
    }

    /// Runs `op`; if it fails with a missing network, re-provisions the
    /// network and runs `op` once more.
    async fn with_network_repair<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let err = match op().await {
            Err(e) if e.is_missing_network() => e,
            other => return other,
        };

        let network = self.config.network.clone().unwrap_or_default();
        warn!(container = %self.name(), network = %network, error = %err, "Network missing, repairing and retrying once");

        self.networks
            .ensure_network(Some(&network))
            .await
            .map_err(|e| OrchestratorError::network(&network, format!("repair failed: {e}")))?;

        op().await.map_err(|e| {
            OrchestratorError::network(&network, format!("start still failing after repair: {e}"))
        })
    }

    /// Stops the container, waiting up to `timeout` for it to exit.
    ///
    /// An absent or already stopped container is not an error.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_none() {
            warn!(container = %name, "Stop requested but container does not exist");
            return Ok(());
        }

        match self.runtime.stop_container(name, timeout).await {
            Ok(()) => {
                info!(container = %name, timeout_secs = timeout.as_secs(), "Container stopped");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(container = %name, "Container vanished before stop");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Restarts the container using the configured stop timeout.
    ///
    /// An absent container is not an error.
    pub async fn restart(&self) -> Result<()> {
        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_none() {
            warn!(container = %name, "Restart requested but container does not exist");
            return Ok(());
        }

        match self
            .runtime
            .restart_container(name, self.options.stop_timeout)
            .await
        {
            Ok(()) => {
                info!(container = %name, "Container restarted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(container = %name, "Container vanished before restart");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the container's stdout and stderr, or an empty string if the
    /// container does not exist.
    pub async fn logs(&self, follow: bool) -> Result<String> {
        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_none() {
            warn!(container = %name, "Logs requested but container does not exist");
            return Ok(String::new());
        }

        match self.runtime.container_logs(name, follow).await {
            Err(e) if e.is_not_found() => Ok(String::new()),
            other => other,
        }
    }

    /// Streams the container's logs as they are produced. An absent container
    /// yields an empty stream.
    pub async fn stream_logs(&self, follow: bool) -> Result<LogStream> {
        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_none() {
            warn!(container = %name, "Logs requested but container does not exist");
            return Ok(futures::stream::empty().boxed());
        }

        match self.runtime.stream_logs(name, follow).await {
            Err(e) if e.is_not_found() => Ok(futures::stream::empty().boxed()),
            other => other,
        }
    }

    /// Executes a command in the running container.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Validation`] for an empty command.
    /// - [`OrchestratorError::ContainerNotFound`] if the container is absent.
    pub async fn exec(&self, cmd: &[String]) -> Result<ExecOutput> {
        if cmd.is_empty() || cmd.iter().all(|arg| arg.trim().is_empty()) {
            return Err(OrchestratorError::validation("exec command must not be empty"));
        }

        let name = self.name();
        if self.runtime.inspect_container(name).await?.is_none() {
            return Err(OrchestratorError::container_not_found(name));
        }

        let output = self.runtime.exec(name, cmd).await?;
        debug!(container = %name, cmd = ?cmd, exit_code = output.exit_code, "Executed command");
        Ok(output)
    }

    /// Returns the live container state, or `None` if it does not exist.
    pub async fn status(&self) -> Result<Option<ContainerState>> {
        Ok(self
            .runtime
            .inspect_container(self.name())
            .await?
            .map(|info| info.state))
    }
}
