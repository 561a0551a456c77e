//! Docker runtime implementation.
//!
//! This module implements [`ContainerRuntime`] on top of the Docker Engine
//! API via bollard. The client is created lazily on the first call, so a
//! missing daemon only surfaces when an operation is actually attempted.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::service::{HealthConfig, HostConfig, PortBinding, RestartPolicyNameEnum};
use bollard::volume::RemoveVolumeOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::container::{ContainerConfig, ContainerInfo, ContainerState, RestartPolicy, VolumeMap};
use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{ContainerRuntime, ExecOutput, LogStream};

/// Label set on every container and network created by dockhand.
pub const MANAGED_LABEL: &str = "dockhand.managed";

/// Label carrying the managed container name.
pub const SERVICE_LABEL: &str = "dockhand.service";

/// How to reach the Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerConnection {
    /// `DOCKER_HOST` or the platform default socket.
    LocalDefaults,

    /// A unix socket or named pipe path.
    Socket {
        /// Socket path.
        path: String,
        /// Request timeout in seconds.
        timeout_secs: u64,
    },

    /// A plain HTTP endpoint, e.g. `tcp://10.0.0.5:2375`.
    Http {
        /// Endpoint address.
        addr: String,
        /// Request timeout in seconds.
        timeout_secs: u64,
    },
}

impl Default for DockerConnection {
    fn default() -> Self {
        Self::LocalDefaults
    }
}

impl DockerConnection {
    /// Parses a host string (`unix:///var/run/docker.sock`, `tcp://host:2375`,
    /// or a bare socket path). `None` selects local defaults.
    pub fn from_host(host: Option<&str>, timeout_secs: u64) -> Self {
        match host.map(str::trim).filter(|h| !h.is_empty()) {
            None => Self::LocalDefaults,
            Some(host) => {
                if let Some(path) = host.strip_prefix("unix://") {
                    Self::Socket {
                        path: path.to_string(),
                        timeout_secs,
                    }
                } else if host.starts_with("tcp://") || host.starts_with("http://") {
                    Self::Http {
                        addr: host.to_string(),
                        timeout_secs,
                    }
                } else {
                    Self::Socket {
                        path: host.to_string(),
                        timeout_secs,
                    }
                }
            }
        }
    }

    fn connect(&self) -> Result<Docker> {
        let docker = match self {
            Self::LocalDefaults => Docker::connect_with_local_defaults()?,
            Self::Socket { path, timeout_secs } => {
                Docker::connect_with_socket(path, *timeout_secs, API_DEFAULT_VERSION)?
            }
            Self::Http { addr, timeout_secs } => {
                Docker::connect_with_http(addr, *timeout_secs, API_DEFAULT_VERSION)?
            }
        };
        Ok(docker)
    }
}

/// Docker-backed container runtime.
pub struct DockerRuntime {
    /// Connection settings.
    connection: DockerConnection,

    /// Client, created on first use.
    client: OnceCell<Docker>,
}

impl DockerRuntime {
    /// Creates a runtime that connects with local defaults on first use.
    pub fn new() -> Self {
        Self::with_connection(DockerConnection::default())
    }

    /// Creates a runtime with explicit connection settings.
    pub fn with_connection(connection: DockerConnection) -> Self {
        Self {
            connection,
            client: OnceCell::new(),
        }
    }

    /// Returns the client, connecting if this is the first call.
    async fn docker(&self) -> Result<&Docker> {
        self.client
            .get_or_try_init(|| async {
                let docker = self.connection.connect()?;
                info!(connection = ?self.connection, "Connected to Docker daemon");
                Ok(docker)
            })
            .await
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let docker = self.docker().await?;
        match docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let state = inspect
                    .state
                    .map(|s| {
                        let status = s.status.map(|st| st.to_string()).unwrap_or_default();
                        ContainerState::from_status(&status, s.exit_code)
                    })
                    .unwrap_or(ContainerState::Unknown);

                Ok(Some(ContainerInfo {
                    id: inspect.id.unwrap_or_default(),
                    name: inspect
                        .name
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| name.to_string()),
                    image: inspect.config.and_then(|c| c.image),
                    state,
                }))
            }
            Err(e) => {
                let err = OrchestratorError::from(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn run_container(&self, config: &ContainerConfig, volumes: &VolumeMap) -> Result<String> {
        let docker = self.docker().await?;

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };
        let response = docker
            .create_container(Some(options), build_create_config(config, volumes))
            .await?;

        info!(container = %config.name, id = %response.id, "Created container");

        docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(container = %config.name, "Started container");
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let docker = self.docker().await?;
        ignore_not_modified(
            docker
                .start_container(name, None::<StartContainerOptions<String>>)
                .await,
        )
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()> {
        let docker = self.docker().await?;
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        ignore_not_modified(docker.stop_container(name, Some(options)).await)
    }

    async fn kill_container(&self, name: &str) -> Result<()> {
        let docker = self.docker().await?;
        docker
            .kill_container(name, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn restart_container(&self, name: &str, timeout: Duration) -> Result<()> {
        let docker = self.docker().await?;
        let options = RestartContainerOptions {
            t: timeout.as_secs() as isize,
        };
        docker.restart_container(name, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let docker = self.docker().await?;
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn stream_logs(&self, name: &str, follow: bool) -> Result<LogStream> {
        let docker = self.docker().await?;
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let stream = docker
            .logs(name, Some(options))
            .map(|chunk| chunk.map(|output| output.to_string()).map_err(OrchestratorError::from));
        Ok(stream.boxed())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        let docker = self.docker().await?;
        debug!(container = %name, cmd = ?cmd, "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = docker.create_exec(name, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = docker.start_exec(&exec.id, None).await? {
            while let Some(result) = output.next().await {
                match result? {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let exit_code = docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
        Ok(ExecOutput::new(stdout, stderr, exit_code))
    }

    async fn export_container(&self, name: &str, dest: &Path) -> Result<()> {
        let docker = self.docker().await?;
        let written = write_stream(docker.export_container(name), dest).await?;
        info!(container = %name, path = %dest.display(), bytes = written, "Exported container filesystem");
        Ok(())
    }

    async fn commit_container(&self, name: &str, repo: &str, tag: &str) -> Result<String> {
        let docker = self.docker().await?;
        let options = CommitContainerOptions {
            container: name.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            comment: format!("dockhand backup of {name}"),
            pause: true,
            ..Default::default()
        };
        let commit = docker
            .commit_container(options, Config::<String>::default())
            .await?;
        let id = committed_image_id(name, commit.id)?;
        info!(container = %name, image = %format!("{repo}:{tag}"), id = %id, "Committed container");
        Ok(id)
    }

    async fn save_image(&self, reference: &str, dest: &Path) -> Result<()> {
        let docker = self.docker().await?;
        let written = write_stream(docker.export_image(reference), dest).await?;
        info!(image = %reference, path = %dest.display(), bytes = written, "Saved image");
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let docker = self.docker().await?;
        match docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = OrchestratorError::from(e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let docker = self.docker().await?;
        info!(image = %reference, "Pulling image");

        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let progress = result?;
            if let Some(status) = progress.status {
                debug!(image = %reference, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()> {
        let docker = self.docker().await?;
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        docker.remove_image(reference, Some(options), None).await?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let docker = self.docker().await?;
        match docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = OrchestratorError::from(e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn create_network(&self, name: &str, driver: &str) -> Result<()> {
        let docker = self.docker().await?;
        let labels = HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: driver.to_string(),
            labels,
            ..Default::default()
        };
        docker.create_network(options).await?;
        info!(network = %name, driver = %driver, "Created network");
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let docker = self.docker().await?;
        docker.remove_network(name).await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let docker = self.docker().await?;
        docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }
}

/// Builds the create request for a configuration and its normalized volumes.
fn build_create_config(config: &ContainerConfig, volumes: &VolumeMap) -> Config<String> {
    let env: Vec<String> = config
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut labels: HashMap<String, String> = config
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(SERVICE_LABEL.to_string(), config.name.clone());

    let exposed_ports: HashMap<String, HashMap<(), ()>> = config
        .ports
        .iter()
        .map(|p| (p.port_key(), HashMap::new()))
        .collect();

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &config.ports {
        let binding = PortBinding {
            host_ip: port.host_ip.map(|ip| ip.to_string()),
            host_port: port.host_port.map(|hp| hp.to_string()),
        };
        port_bindings
            .entry(port.port_key())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(binding);
    }

    let binds: Vec<String> = volumes
        .iter()
        .map(|(host_ref, binding)| binding.to_bind_string(host_ref))
        .collect();

    let restart_policy = bollard::service::RestartPolicy {
        name: Some(match config.restart_policy {
            RestartPolicy::No => RestartPolicyNameEnum::NO,
            RestartPolicy::OnFailure { .. } => RestartPolicyNameEnum::ON_FAILURE,
            RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
            RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        }),
        maximum_retry_count: match config.restart_policy {
            RestartPolicy::OnFailure { max_retries } => max_retries.map(i64::from),
            _ => None,
        },
    };

    let host_config = HostConfig {
        binds: (!binds.is_empty()).then_some(binds),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: config.network.clone().filter(|n| !n.trim().is_empty()),
        memory: config.resources.memory_bytes.map(|b| b as i64),
        memory_reservation: config.resources.memory_reservation_bytes.map(|b| b as i64),
        nano_cpus: config.resources.nano_cpus(),
        cpu_shares: config.resources.cpu_shares.map(i64::from),
        cpu_quota: config.resources.cpu_quota,
        cpu_period: config.resources.cpu_period.map(|p| p as i64),
        pids_limit: config.resources.pids_limit,
        restart_policy: Some(restart_policy),
        ..Default::default()
    };

    let healthcheck = config.health_check.as_ref().map(|health| HealthConfig {
        test: Some(health.test.clone()),
        interval: Some(secs_to_nanos(health.interval_secs)),
        timeout: Some(secs_to_nanos(health.timeout_secs)),
        retries: Some(i64::from(health.retries)),
        start_period: Some(secs_to_nanos(health.start_period_secs)),
        ..Default::default()
    });

    Config {
        image: Some(config.image.reference().to_string()),
        env: (!env.is_empty()).then_some(env),
        labels: Some(labels),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        cmd: config.command.clone(),
        entrypoint: config.entrypoint.clone(),
        healthcheck,
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn secs_to_nanos(secs: u32) -> i64 {
    i64::from(secs) * 1_000_000_000
}

/// Treats HTTP 304 (already started / already stopped) as success.
fn ignore_not_modified(result: std::result::Result<(), bollard::errors::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The daemon omits the image ID only when the commit did not happen.
fn committed_image_id(name: &str, id: Option<String>) -> Result<String> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| OrchestratorError::runtime(500, format!("commit of {name} returned no image id")))
}

/// Streams a tarball to `dest`. The data lands in a `.partial` sibling that is
/// synced and renamed only once the stream completed.
async fn write_stream<S, B>(stream: S, dest: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, bollard::errors::Error>>,
    B: AsRef<[u8]>,
{
    let partial = partial_path(dest);
    match write_partial(stream, &partial, dest).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                debug!(path = %partial.display(), error = %cleanup, "Partial tarball not removed");
            }
            Err(e)
        }
    }
}

async fn write_partial<S, B>(stream: S, partial: &Path, dest: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, bollard::errors::Error>>,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(partial, dest).await?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{HealthCheck, PortMapping, ResourceLimits, VolumeBinding};

    #[test]
    fn test_connection_from_host() {
        assert_eq!(DockerConnection::from_host(None, 120), DockerConnection::LocalDefaults);
        assert_eq!(DockerConnection::from_host(Some("  "), 120), DockerConnection::LocalDefaults);
        assert_eq!(
            DockerConnection::from_host(Some("unix:///var/run/docker.sock"), 30),
            DockerConnection::Socket {
                path: "/var/run/docker.sock".to_string(),
                timeout_secs: 30
            }
        );
        assert_eq!(
            DockerConnection::from_host(Some("tcp://10.0.0.5:2375"), 30),
            DockerConnection::Http {
                addr: "tcp://10.0.0.5:2375".to_string(),
                timeout_secs: 30
            }
        );
    }

    #[test]
    fn test_build_create_config() {
        let config = ContainerConfig::builder("cache-1", "redis:7-alpine")
            .port(PortMapping::tcp(6379).host_port(16379))
            .env("REDIS_ARGS", "--appendonly yes")
            .label("team", "platform")
            .network("custom-net")
            .resources(ResourceLimits::builder().memory_mb(256).cpu_shares(512).build())
            .restart_policy(RestartPolicy::OnFailure { max_retries: Some(5) })
            .health_check(HealthCheck::cmd(vec!["redis-cli".into(), "ping".into()]))
            .command(vec!["redis-server".into()])
            .build();

        let mut volumes = VolumeMap::new();
        volumes.insert("redis-data".to_string(), VolumeBinding::rw("/data"));

        let create = build_create_config(&config, &volumes);

        assert_eq!(create.image.as_deref(), Some("redis:7-alpine"));
        assert_eq!(create.env, Some(vec!["REDIS_ARGS=--appendonly yes".to_string()]));
        assert_eq!(create.cmd, Some(vec!["redis-server".to_string()]));

        let labels = create.labels.unwrap();
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(SERVICE_LABEL).map(String::as_str), Some("cache-1"));
        assert_eq!(labels.get("team").map(String::as_str), Some("platform"));

        assert!(create.exposed_ports.unwrap().contains_key("6379/tcp"));

        let host = create.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["redis-data:/data:rw".to_string()]));
        assert_eq!(host.network_mode.as_deref(), Some("custom-net"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.cpu_shares, Some(512));

        let bindings = host.port_bindings.unwrap();
        let binding = &bindings["6379/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_port.as_deref(), Some("16379"));

        let restart = host.restart_policy.unwrap();
        assert_eq!(restart.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(restart.maximum_retry_count, Some(5));

        let health = create.healthcheck.unwrap();
        assert_eq!(health.interval, Some(30_000_000_000));
        assert_eq!(health.retries, Some(3));
    }

    #[test]
    fn test_build_create_config_minimal() {
        let config = ContainerConfig::builder("web", "nginx").build();
        let create = build_create_config(&config, &VolumeMap::new());
        let host = create.host_config.unwrap();

        assert!(create.env.is_none());
        assert!(create.exposed_ports.is_none());
        assert!(host.binds.is_none());
        assert!(host.network_mode.is_none());
        assert!(create.healthcheck.is_none());
    }

    #[tokio::test]
    async fn test_write_stream_renames_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("web_export_1.tar");
        let chunks: Vec<std::result::Result<Vec<u8>, bollard::errors::Error>> =
            vec![Ok(b"abc".to_vec()), Ok(b"def".to_vec())];

        let written = write_stream(futures::stream::iter(chunks), &dest).await.unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_write_stream_discards_partial_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("web_export_1.tar");
        let chunks: Vec<std::result::Result<Vec<u8>, bollard::errors::Error>> = vec![
            Ok(b"abc".to_vec()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "export interrupted".to_string(),
            }),
        ];

        let err = write_stream(futures::stream::iter(chunks), &dest).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Runtime { status: 500, .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_write_stream_discards_partial_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory in the way makes the final rename fail
        let dest = dir.path().join("web_export_1.tar");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("occupied"), b"x").unwrap();
        let chunks: Vec<std::result::Result<Vec<u8>, bollard::errors::Error>> = vec![Ok(b"abc".to_vec())];

        let err = write_stream(futures::stream::iter(chunks), &dest).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Io(_)));
        assert!(dest.join("occupied").exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_committed_image_id() {
        assert_eq!(
            committed_image_id("cache-1", Some("sha256:abc".to_string())).unwrap(),
            "sha256:abc"
        );

        for missing in [None, Some(String::new())] {
            let err = committed_image_id("cache-1", missing).unwrap_err();
            assert!(matches!(err, OrchestratorError::Runtime { status: 500, ref message } if message.contains("cache-1")));
        }
    }
}
