//! Name-keyed access to lifecycle managers.
//!
//! The registry is the surface external callers (CLI, workflow engines) use:
//! every operation except `start` addresses a container by name only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::container::{ContainerConfig, ContainerState};
use crate::error::{OrchestratorError, Result};
use crate::manager::{ContainerLifecycleManager, DeleteOutcome, ManagerOptions, StartOutcome};
use crate::runtime::{ExecOutput, LogStream, SharedRuntime};

/// One manager per container name within this process.
pub struct ManagerRegistry {
    runtime: SharedRuntime,
    options: ManagerOptions,
    managers: RwLock<HashMap<String, Arc<ContainerLifecycleManager>>>,
}

impl ManagerRegistry {
    /// Creates an empty registry sharing one runtime.
    pub fn new(runtime: SharedRuntime, options: ManagerOptions) -> Self {
        Self {
            runtime,
            options,
            managers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a configuration and returns its manager.
    ///
    /// Registering an identical configuration again returns the existing
    /// manager.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Config`] / [`OrchestratorError::VolumeSpec`] for
    ///   an invalid configuration.
    /// - [`OrchestratorError::AlreadyManaged`] if the name is registered with a
    ///   different configuration.
    pub async fn register(&self, config: ContainerConfig) -> Result<Arc<ContainerLifecycleManager>> {
        let mut managers = self.managers.write().await;

        if let Some(existing) = managers.get(&config.name) {
            if existing.config() == &config {
                return Ok(existing.clone());
            }
            return Err(OrchestratorError::AlreadyManaged(config.name));
        }

        let name = config.name.clone();
        let manager = Arc::new(ContainerLifecycleManager::new(
            config,
            self.runtime.clone(),
            self.options.clone(),
        )?);
        managers.insert(name.clone(), manager.clone());
        debug!(container = %name, "Registered manager");
        Ok(manager)
    }

    /// Returns the manager for `name`.
    pub async fn get(&self, name: &str) -> Result<Arc<ContainerLifecycleManager>> {
        self.managers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotManaged(name.to_string()))
    }

    /// Returns the registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registers `config` if needed and starts its container.
    pub async fn start(&self, config: ContainerConfig) -> Result<StartOutcome> {
        self.register(config).await?.start().await
    }

    /// Stops the named container.
    pub async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        self.get(name).await?.stop(timeout).await
    }

    /// Restarts the named container.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.get(name).await?.restart().await
    }

    /// Deletes the named container. A successful delete also unregisters the
    /// manager; a partial one keeps it so the delete can be retried.
    pub async fn delete(&self, name: &str, force: bool, backup: bool) -> Result<DeleteOutcome> {
        let manager = self.get(name).await?;
        let outcome = manager.delete(force, backup).await?;
        self.managers.write().await.remove(name);
        debug!(container = %name, "Unregistered manager");
        Ok(outcome)
    }

    /// Returns the logs of the named container.
    pub async fn logs(&self, name: &str, follow: bool) -> Result<String> {
        self.get(name).await?.logs(follow).await
    }

    /// Streams the logs of the named container.
    pub async fn stream_logs(&self, name: &str, follow: bool) -> Result<LogStream> {
        self.get(name).await?.stream_logs(follow).await
    }

    /// Executes a command in the named container.
    pub async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.get(name).await?.exec(cmd).await
    }

    /// Returns the live state of the named container.
    pub async fn status(&self, name: &str) -> Result<Option<ContainerState>> {
        self.get(name).await?.status().await
    }
}
