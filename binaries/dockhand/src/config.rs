//! CLI configuration.
//!
//! This module provides configuration types for the dockhand CLI,
//! supporting loading from files and CLI argument overrides.

use anyhow::Context;
use dockhand_orchestrator::manager::DEFAULT_STOP_TIMEOUT;
use dockhand_orchestrator::{ContainerConfig, DeadContainerPolicy, DockerConnection, ManagerOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockhandConfig {
    /// Docker daemon connection.
    pub docker: DockerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Manager settings shared by every service.
    pub manager: ManagerConfig,

    /// Managed services, keyed by service name.
    pub services: BTreeMap<String, ContainerConfig>,
}

/// Docker daemon connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// If not specified, `DOCKER_HOST` or the platform default is used.
    pub host: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout_secs: 120,
        }
    }
}

impl DockerConfig {
    /// Returns the connection settings for the runtime.
    pub fn connection(&self) -> DockerConnection {
        DockerConnection::from_host(self.host.as_deref(), self.timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory receiving backup tarballs.
    pub backup_dir: PathBuf,

    /// Grace period for stop and restart, in seconds.
    pub stop_timeout_secs: u64,

    /// What `start` does with a dead container.
    pub dead_containers: DeadContainerPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT.as_secs(),
            dead_containers: DeadContainerPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Returns the stop timeout as a Duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Returns the options handed to every manager.
    pub fn options(&self) -> ManagerOptions {
        ManagerOptions {
            backup_dir: self.backup_dir.clone(),
            stop_timeout: self.stop_timeout(),
            dead_containers: self.dead_containers,
        }
    }
}

impl DockhandConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.fill_service_names();
        Ok(config)
    }

    /// Uses the table key as container name for services that omit `name`.
    fn fill_service_names(&mut self) {
        for (key, service) in self.services.iter_mut() {
            if service.name.trim().is_empty() {
                service.name = key.clone();
            }
        }
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        // Override log level if specified
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        // Override backup directory if specified
        if let Some(ref dir) = args.backup_dir {
            self.manager.backup_dir = dir.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        // Validate log format
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        let mut names = HashSet::new();
        for (key, service) in &self.services {
            service
                .validate()
                .and_then(|()| service.normalized_volumes().map(|_| ()))
                .with_context(|| format!("Invalid service '{key}'"))?;
            if !names.insert(service.name.as_str()) {
                anyhow::bail!("Container name '{}' is used by more than one service", service.name);
            }
        }

        Ok(())
    }

    /// Looks up a service by table key, then by container name.
    pub fn service(&self, name: &str) -> Option<&ContainerConfig> {
        self.services
            .get(name)
            .or_else(|| self.services.values().find(|s| s.name == name))
    }
}
