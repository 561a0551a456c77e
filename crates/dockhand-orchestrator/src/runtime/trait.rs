//! Container runtime trait definition.
//!
//! This module defines the narrow set of runtime operations the lifecycle
//! manager consumes, along with supporting types for command execution.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::container::{ContainerConfig, ContainerInfo, VolumeMap};
use crate::error::Result;

/// Decoded log output, one chunk per frame the runtime delivers.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Operations the lifecycle manager needs from a container runtime.
///
/// Any Docker-Engine-API-compatible daemon can back this trait. Calls address
/// containers, images, networks and volumes by name; implementations never
/// cache identities.
///
/// # Errors
///
/// Implementations report daemon responses as
/// [`OrchestratorError::Runtime`](crate::OrchestratorError::Runtime) so callers
/// can classify them with `is_not_found`, `is_conflict` and
/// `is_missing_network`.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`); one runtime is shared
/// by every manager in the process.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspects a container by name. Returns `Ok(None)` if it does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Creates a container from the configuration and starts it.
    ///
    /// Returns the new container ID.
    async fn run_container(&self, config: &ContainerConfig, volumes: &VolumeMap) -> Result<String>;

    /// Starts an existing container. Starting a running container succeeds.
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stops a container, waiting up to `timeout` before the runtime kills it.
    /// Stopping a stopped container succeeds.
    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Kills a container immediately.
    async fn kill_container(&self, name: &str) -> Result<()>;

    /// Restarts a container with the given stop grace period.
    async fn restart_container(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    /// Streams the decoded stdout and stderr of a container as it is
    /// produced. With `follow` the stream ends when the container stops.
    async fn stream_logs(&self, name: &str, follow: bool) -> Result<LogStream>;

    /// Returns the decoded stdout and stderr of a container in one piece.
    async fn container_logs(&self, name: &str, follow: bool) -> Result<String> {
        let mut stream = self.stream_logs(name, follow).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?);
        }
        Ok(output)
    }

    /// Executes a command inside a running container.
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Writes the container filesystem as a tarball to `dest`.
    async fn export_container(&self, name: &str, dest: &Path) -> Result<()>;

    /// Commits a container to an image `repo:tag` and returns the image ID.
    async fn commit_container(&self, name: &str, repo: &str, tag: &str) -> Result<String>;

    /// Writes an image as a tarball to `dest`.
    async fn save_image(&self, reference: &str, dest: &Path) -> Result<()>;

    /// Returns true if the image is present locally.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Pulls an image. Dropping the returned future abandons the pull.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Removes an image.
    async fn remove_image(&self, reference: &str, force: bool) -> Result<()>;

    /// Returns true if a network with this name exists.
    async fn network_exists(&self, name: &str) -> Result<bool>;

    /// Creates a network with the given driver.
    async fn create_network(&self, name: &str, driver: &str) -> Result<()>;

    /// Removes a network.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Removes a volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Returns the name of this runtime.
    fn name(&self) -> &str;
}

/// Output from executing a command in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Exit code of the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr)
        }
    }
}
