//! Declarative container configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::container::spec::{
    ContainerImage, HealthCheck, ImagePullPolicy, PortMapping, ResourceLimits, RestartPolicy,
};
use crate::container::volume::{self, RawVolumes, VolumeMap};
use crate::error::{OrchestratorError, Result};

/// Networks that exist in every Docker daemon and are never created or removed.
pub const BUILTIN_NETWORKS: [&str; 4] = ["bridge", "host", "none", "default"];

/// Returns true if `name` refers to a built-in network (or no network at all).
pub fn is_builtin_network(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || BUILTIN_NETWORKS.contains(&name)
}

/// Image pull settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullSettings {
    /// When to pull.
    pub policy: ImagePullPolicy,

    /// Per-attempt pull timeout in milliseconds (None = unbounded).
    pub timeout_ms: Option<u64>,

    /// Number of pull attempts.
    pub retry_attempts: u32,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            policy: ImagePullPolicy::IfNotPresent,
            timeout_ms: None,
            retry_attempts: 3,
        }
    }
}

impl PullSettings {
    /// Returns the per-attempt timeout as a Duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Everything needed to run one named container.
///
/// A configuration is handed to exactly one
/// [`ContainerLifecycleManager`](crate::manager::ContainerLifecycleManager),
/// which validates it once and never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name; the identity key of the live container.
    #[serde(default)]
    pub name: String,

    /// Image to run.
    pub image: ContainerImage,

    /// Port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,

    /// Volume bindings, in any accepted shape.
    #[serde(default)]
    pub volumes: RawVolumes,

    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Additional labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Resource limits.
    #[serde(default)]
    pub resources: ResourceLimits,

    /// Restart policy.
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Network to attach to; None or a built-in name means the default bridge.
    #[serde(default)]
    pub network: Option<String>,

    /// Health check.
    #[serde(default)]
    pub health_check: Option<HealthCheck>,

    /// Command (overrides the image default).
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Entrypoint (overrides the image default).
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,

    /// Desired replica count.
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Image pull settings.
    #[serde(default)]
    pub pull: PullSettings,
}

fn default_replicas() -> u32 {
    1
}

impl ContainerConfig {
    /// Creates a new configuration builder.
    pub fn builder(name: impl Into<String>, image: impl Into<ContainerImage>) -> ContainerConfigBuilder {
        ContainerConfigBuilder::new(name, image)
    }

    /// Validates the configuration without touching the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if the image or name is empty, or
    /// if `replicas` is below one.
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(OrchestratorError::config("image must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::config("name must not be empty"));
        }
        if self.replicas < 1 {
            return Err(OrchestratorError::config(format!(
                "replicas must be at least 1, got {}",
                self.replicas
            )));
        }
        Ok(())
    }

    /// Returns the normalized volume map.
    pub fn normalized_volumes(&self) -> Result<VolumeMap> {
        volume::normalize(&self.volumes)
    }

    /// Returns the custom network name, or None for built-in networks.
    pub fn custom_network(&self) -> Option<&str> {
        self.network
            .as_deref()
            .map(str::trim)
            .filter(|n| !is_builtin_network(n))
    }
}

/// Builder for `ContainerConfig`.
#[derive(Debug)]
pub struct ContainerConfigBuilder {
    config: ContainerConfig,
}

impl ContainerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new(name: impl Into<String>, image: impl Into<ContainerImage>) -> Self {
        Self {
            config: ContainerConfig {
                name: name.into(),
                image: image.into(),
                ports: Vec::new(),
                volumes: RawVolumes::new(),
                environment: BTreeMap::new(),
                labels: BTreeMap::new(),
                resources: ResourceLimits::default(),
                restart_policy: RestartPolicy::default(),
                network: None,
                health_check: None,
                command: None,
                entrypoint: None,
                replicas: 1,
                pull: PullSettings::default(),
            },
        }
    }

    /// Adds a port mapping.
    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.config.ports.push(mapping);
        self
    }

    /// Adds a volume entry in any accepted shape.
    pub fn volume(mut self, host_ref: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.volumes.insert(host_ref.into(), value.into());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment.insert(key.into(), value.into());
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the resource limits.
    pub fn resources(mut self, resources: ResourceLimits) -> Self {
        self.config.resources = resources;
        self
    }

    /// Sets the restart policy.
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.config.restart_policy = policy;
        self
    }

    /// Sets the network.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = Some(network.into());
        self
    }

    /// Sets the health check.
    pub fn health_check(mut self, check: HealthCheck) -> Self {
        self.config.health_check = Some(check);
        self
    }

    /// Sets the command.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.config.command = Some(cmd);
        self
    }

    /// Sets the entrypoint.
    pub fn entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.config.entrypoint = Some(entrypoint);
        self
    }

    /// Sets the replica count.
    pub fn replicas(mut self, replicas: u32) -> Self {
        self.config.replicas = replicas;
        self
    }

    /// Sets the pull policy.
    pub fn pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.config.pull.policy = policy;
        self
    }

    /// Sets the per-attempt pull timeout, rounded up to whole milliseconds.
    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.config.pull.timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Sets the number of pull attempts.
    pub fn pull_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.pull.retry_attempts = attempts;
        self
    }

    /// Builds the configuration. Validation happens when a manager adopts it.
    pub fn build(self) -> ContainerConfig {
        self.config
    }
}
