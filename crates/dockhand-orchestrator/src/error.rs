//! Error types for the orchestrator crate.
//!
//! This module provides the error taxonomy for container lifecycle
//! operations. Validation and backup failures are always surfaced; benign
//! not-found conditions are classified with [`OrchestratorError::is_not_found`]
//! so callers can absorb them.

use std::fmt;

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid container configuration, raised before any runtime call.
    #[error("configuration error: {0}")]
    Config(String),

    /// A volume entry has a shape that cannot be normalized.
    #[error("invalid volume spec for '{key}': {reason}")]
    VolumeSpec {
        /// The offending volume key.
        key: String,
        /// Why the entry was rejected.
        reason: String,
    },

    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Image not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Network not found.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// Volume not found.
    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    /// Image pull failed after exhausting every attempt.
    #[error("failed to pull image {image} after {attempts} attempt(s): {source}")]
    ImagePull {
        /// The image that failed to pull.
        image: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Network could not be provisioned or self-healing failed.
    #[error("network error for {name}: {reason}")]
    Network {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Backup before delete failed; nothing was removed.
    #[error("backup of container {container} failed: {reason}")]
    Backup {
        /// The container name.
        container: String,
        /// The reason for the failure.
        reason: String,
    },

    /// One or more best-effort teardown phases failed.
    #[error("delete of container {container} incomplete: {}", format_failures(.failures))]
    DeleteIncomplete {
        /// The container name.
        container: String,
        /// Every phase failure, in phase order.
        failures: Vec<PhaseFailure>,
    },

    /// Error response returned by the container runtime.
    #[error("runtime error ({status}): {message}")]
    Runtime {
        /// HTTP status code reported by the daemon.
        status: u16,
        /// Message reported by the daemon.
        message: String,
    },

    /// Timeout waiting for condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// Docker API transport error.
    #[error("Docker API error: {0}")]
    DockerApi(#[source] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Validation error for an operation argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// No manager is registered for the container name.
    #[error("container {0} is not managed")]
    NotManaged(String),

    /// A manager with a different configuration already owns the name.
    #[error("container {0} is already managed with a different configuration")]
    AlreadyManaged(String),
}

/// The teardown phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePhase {
    /// Stopping and removing the container.
    Container,
    /// Removing the image.
    Image,
    /// Removing managed volumes.
    Volume,
    /// Removing the network.
    Network,
}

impl fmt::Display for DeletePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Volume => "volume",
            Self::Network => "network",
        };
        f.write_str(name)
    }
}

/// A single failed teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    /// Phase the failure occurred in.
    pub phase: DeletePhase,
    /// Resource the phase acted on.
    pub resource: String,
    /// Error text.
    pub reason: String,
}

impl PhaseFailure {
    /// Creates a phase failure from an error.
    pub fn new(phase: DeletePhase, resource: impl Into<String>, err: &OrchestratorError) -> Self {
        Self {
            phase,
            resource: resource.into(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.phase, self.resource, self.reason)
    }
}

fn format_failures(failures: &[PhaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Creates a volume spec error.
    pub fn volume_spec(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VolumeSpec {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container not found error.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound(name.into())
    }

    /// Creates an image not found error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound(image.into())
    }

    /// Creates a network not found error.
    pub fn network_not_found(name: impl Into<String>) -> Self {
        Self::NetworkNotFound(name.into())
    }

    /// Creates a volume not found error.
    pub fn volume_not_found(name: impl Into<String>) -> Self {
        Self::VolumeNotFound(name.into())
    }

    /// Creates an image pull error wrapping the last attempt's error.
    pub fn image_pull(image: impl Into<String>, attempts: u32, last: OrchestratorError) -> Self {
        Self::ImagePull {
            image: image.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Creates a network error.
    pub fn network(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a backup error.
    pub fn backup(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backup {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates a runtime error from a daemon response.
    pub fn runtime(status: u16, message: impl Into<String>) -> Self {
        Self::Runtime {
            status,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ContainerNotFound(_)
            | Self::ImageNotFound(_)
            | Self::NetworkNotFound(_)
            | Self::VolumeNotFound(_) => true,
            Self::Runtime { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Returns true if the runtime rejected the call because the resource
    /// already exists.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Runtime { status, message } => {
                *status == 409 || message.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }

    /// Returns true if the failure reports a missing network, the one
    /// condition `start` knows how to repair.
    pub fn is_missing_network(&self) -> bool {
        match self {
            Self::NetworkNotFound(_) => true,
            Self::Runtime { message, .. } => mentions_missing_network(message),
            Self::DockerApi(e) => mentions_missing_network(&e.to_string()),
            _ => false,
        }
    }
}

fn mentions_missing_network(message: &str) -> bool {
    let message = message.to_lowercase();
    match message.find("network") {
        Some(idx) => message[idx..].contains("not found"),
        None => false,
    }
}

impl From<bollard::errors::Error> for OrchestratorError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => Self::Runtime {
                status: status_code,
                message,
            },
            other => Self::DockerApi(other),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
