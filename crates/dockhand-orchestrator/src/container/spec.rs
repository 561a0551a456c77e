//! Container specification types.
//!
//! This module provides the building blocks of a [`ContainerConfig`]:
//! image references, resource limits, port mappings, health checks and
//! restart policies.
//!
//! [`ContainerConfig`]: crate::container::ContainerConfig

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Container image reference.
///
/// Represents a Docker image with optional registry, tag, and digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContainerImage {
    /// Full image reference (registry/repository:tag@digest).
    reference: String,
}

impl ContainerImage {
    /// Creates a new container image from a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use dockhand_orchestrator::container::ContainerImage;
    ///
    /// let image = ContainerImage::new("redis:7-alpine");
    /// assert_eq!(image.reference(), "redis:7-alpine");
    /// assert_eq!(image.tag(), Some("7-alpine"));
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into().trim().to_string(),
        }
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns true if the reference is empty.
    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Returns the reference without digest, split into repository and
    /// optional tag. A colon only starts a tag after the last `/`, so
    /// registry ports are kept in the repository.
    fn split_tag(&self) -> (&str, Option<&str>) {
        let without_digest = self
            .reference
            .split('@')
            .next()
            .unwrap_or(&self.reference);
        let last_slash = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
        match without_digest[last_slash..].rfind(':') {
            Some(i) => {
                let colon = last_slash + i;
                (&without_digest[..colon], Some(&without_digest[colon + 1..]))
            }
            None => (without_digest, None),
        }
    }

    /// Returns the image name (without tag or digest).
    pub fn name(&self) -> &str {
        self.split_tag().0
    }

    /// Returns the image tag if present.
    pub fn tag(&self) -> Option<&str> {
        self.split_tag().1.filter(|t| !t.is_empty())
    }

    /// Returns the image digest if present.
    pub fn digest(&self) -> Option<&str> {
        self.reference.split_once('@').map(|(_, digest)| digest)
    }

    /// Returns the registry if specified.
    pub fn registry(&self) -> Option<&str> {
        let (first, _) = self.name().split_once('/')?;
        // A registry host contains a dot or a port, or is localhost
        if first.contains('.') || first.contains(':') || first == "localhost" {
            Some(first)
        } else {
            None
        }
    }

    /// Returns the reference to pull. Untagged references resolve to
    /// `:latest` so a pull never fetches every tag of a repository.
    pub fn pull_reference(&self) -> String {
        if self.digest().is_some() || self.tag().is_some() {
            self.reference.clone()
        } else {
            format!("{}:latest", self.name())
        }
    }
}

impl std::fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference)
    }
}

impl From<&str> for ContainerImage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerImage {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<ContainerImage> for String {
    fn from(image: ContainerImage) -> Self {
        image.reference
    }
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagePullPolicy {
    /// Always pull the image.
    Always,

    /// Pull if not present locally.
    #[default]
    IfNotPresent,

    /// Never pull (image must be present).
    Never,
}

/// Resource limits for a container.
///
/// Defines CPU and memory constraints passed straight to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU limit in millicores (1000 = 1 CPU).
    pub cpu_millicores: Option<u32>,

    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,

    /// Memory reservation (soft limit) in bytes.
    pub memory_reservation_bytes: Option<u64>,

    /// CPU shares (relative weight).
    pub cpu_shares: Option<u32>,

    /// CPU quota in microseconds per period.
    pub cpu_quota: Option<i64>,

    /// CPU period in microseconds.
    pub cpu_period: Option<u64>,

    /// Process limit (pids).
    pub pids_limit: Option<i64>,
}

impl ResourceLimits {
    /// Creates a new resource limits builder.
    pub fn builder() -> ResourceLimitsBuilder {
        ResourceLimitsBuilder::default()
    }

    /// Returns true if no limit is set.
    pub fn is_unlimited(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the memory limit in megabytes.
    pub fn memory_mb(&self) -> Option<u64> {
        self.memory_bytes.map(|b| b / (1024 * 1024))
    }

    /// Returns the NanoCPUs value for Docker API.
    pub fn nano_cpus(&self) -> Option<i64> {
        self.cpu_millicores.map(|m| (m as i64) * 1_000_000)
    }
}

/// Builder for `ResourceLimits`.
#[derive(Debug, Default)]
pub struct ResourceLimitsBuilder {
    limits: ResourceLimits,
}

impl ResourceLimitsBuilder {
    /// Sets the CPU limit as a fraction (e.g., 0.5 for half a CPU).
    pub fn cpu(mut self, cpus: f64) -> Self {
        self.limits.cpu_millicores = Some((cpus * 1000.0) as u32);
        self
    }

    /// Sets the memory limit in megabytes.
    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.limits.memory_bytes = Some(mb * 1024 * 1024);
        self
    }

    /// Sets the memory reservation in megabytes.
    pub fn memory_reservation_mb(mut self, mb: u64) -> Self {
        self.limits.memory_reservation_bytes = Some(mb * 1024 * 1024);
        self
    }

    /// Sets the CPU shares.
    pub fn cpu_shares(mut self, shares: u32) -> Self {
        self.limits.cpu_shares = Some(shares);
        self
    }

    /// Sets the CPU quota and period in microseconds.
    pub fn cpu_quota(mut self, quota: i64, period: u64) -> Self {
        self.limits.cpu_quota = Some(quota);
        self.limits.cpu_period = Some(period);
        self
    }

    /// Sets the process limit.
    pub fn pids_limit(mut self, limit: i64) -> Self {
        self.limits.pids_limit = Some(limit);
        self
    }

    /// Builds the resource limits.
    pub fn build(self) -> ResourceLimits {
        self.limits
    }
}

/// Port mapping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container port.
    pub container_port: u16,

    /// Host port (if None, Docker assigns one).
    #[serde(default)]
    pub host_port: Option<u16>,

    /// Protocol (tcp/udp).
    #[serde(default)]
    pub protocol: PortProtocol,

    /// Host IP to bind to.
    #[serde(default)]
    pub host_ip: Option<IpAddr>,
}

impl PortMapping {
    /// Creates a new TCP port mapping.
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            protocol: PortProtocol::Tcp,
            host_ip: None,
        }
    }

    /// Creates a new UDP port mapping.
    pub fn udp(container_port: u16) -> Self {
        Self {
            protocol: PortProtocol::Udp,
            ..Self::tcp(container_port)
        }
    }

    /// Sets the host port.
    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    /// Sets the host IP to bind to.
    pub fn host_ip(mut self, ip: IpAddr) -> Self {
        self.host_ip = Some(ip);
        self
    }

    /// Returns the container-side port key, e.g. `6379/tcp`.
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol.as_str())
    }
}

/// Port protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
}

impl PortProtocol {
    /// Returns the protocol suffix used by Docker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    /// Command to run for health check.
    pub test: Vec<String>,

    /// Time to wait between checks.
    pub interval_secs: u32,

    /// Time to wait for a check to complete.
    pub timeout_secs: u32,

    /// Number of consecutive failures for unhealthy status.
    pub retries: u32,

    /// Time to wait before starting health checks.
    pub start_period_secs: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), "exit 0".to_string()],
            interval_secs: 30,
            timeout_secs: 30,
            retries: 3,
            start_period_secs: 0,
        }
    }
}

impl HealthCheck {
    /// Creates a health check running a shell snippet.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), script.into()],
            ..Default::default()
        }
    }

    /// Creates a custom command health check.
    pub fn cmd(command: Vec<String>) -> Self {
        let mut test = vec!["CMD".to_string()];
        test.extend(command);
        Self {
            test,
            ..Default::default()
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    No,

    /// Restart on failure.
    OnFailure {
        /// Maximum number of retries.
        max_retries: Option<u32>,
    },

    /// Always restart.
    Always,

    /// Restart unless explicitly stopped.
    UnlessStopped,
}

impl RestartPolicy {
    /// Returns the Docker restart policy name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::No => "no",
            Self::OnFailure { .. } => "on-failure",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}
