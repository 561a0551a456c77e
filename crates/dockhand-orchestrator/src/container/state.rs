//! Live container state as reported by the runtime.
//!
//! Nothing here is persisted; every value is derived from a fresh inspect.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container has been created but not started.
    Created,

    /// Container is running.
    Running,

    /// Container is paused.
    Paused,

    /// Container is being restarted.
    Restarting,

    /// Container has exited.
    Exited {
        /// Exit code.
        exit_code: i64,
    },

    /// Container crashed irrecoverably.
    Dead,

    /// Any state the runtime reports that is not listed above.
    Unknown,
}

impl ContainerState {
    /// Maps a Docker status string (`running`, `exited`, ...) to a state.
    pub fn from_status(status: &str, exit_code: Option<i64>) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited {
                exit_code: exit_code.unwrap_or(0),
            },
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the container processes are alive and must be
    /// stopped before a consistent snapshot can be taken.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Restarting)
    }

    /// Returns true if the container is dead.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// Returns the lowercase state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited { .. } => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { exit_code } => write!(f, "exited ({exit_code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot of a container returned by an inspect call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID assigned by the runtime.
    pub id: String,

    /// Container name (without leading slash).
    pub name: String,

    /// Image the container was created from.
    pub image: Option<String>,

    /// Current state.
    pub state: ContainerState,
}

impl ContainerInfo {
    /// Returns the short container ID (first 12 characters).
    pub fn short_id(&self) -> &str {
        if self.id.len() > 12 {
            &self.id[..12]
        } else {
            &self.id
        }
    }
}
