//! In-memory recording runtime for tests.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::container::volume::is_managed_volume;
use crate::container::{ContainerConfig, ContainerImage, ContainerInfo, ContainerState, VolumeMap};
use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{ContainerRuntime, ExecOutput, LogStream};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    image: String,
    network: Option<String>,
    state: ContainerState,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    networks: HashSet<String>,
    volumes: HashSet<String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<OrchestratorError>>,
    pull_delay: Option<Duration>,
    export_delay: Option<Duration>,
    next_id: u64,
}

/// Runtime double that keeps daemon state in memory and records every call
/// as `"<op> <target>"`.
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

const READ_ONLY_OPS: [&str; 4] = ["inspect", "image_exists", "network_exists", "logs"];

fn canonical_image(reference: &str) -> String {
    ContainerImage::new(reference).pull_reference()
}

fn no_such(kind: &str, name: &str) -> OrchestratorError {
    OrchestratorError::runtime(404, format!("No such {kind}: {name}"))
}

impl FakeRuntime {
    /// A daemon with only the built-in networks.
    pub(crate) fn new() -> Self {
        let mut state = FakeState::default();
        for builtin in ["bridge", "host", "none"] {
            state.networks.insert(builtin.to_string());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn with_image(self, reference: &str) -> Self {
        self.state.lock().unwrap().images.insert(canonical_image(reference));
        self
    }

    pub(crate) fn with_network(self, name: &str) -> Self {
        self.state.lock().unwrap().networks.insert(name.to_string());
        self
    }

    pub(crate) fn with_container(self, name: &str, image: &str, state: ContainerState) -> Self {
        self.insert_container(name, image, None, state);
        self
    }

    pub(crate) fn with_pull_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().pull_delay = Some(delay);
        self
    }

    pub(crate) fn with_export_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().export_delay = Some(delay);
        self
    }

    /// Makes the next call of `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub(crate) fn fail_next(&self, op: &'static str, err: OrchestratorError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change daemon state.
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                let op = c.split(' ').next().unwrap_or_default();
                !READ_ONLY_OPS.contains(&op)
            })
            .collect()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub(crate) fn container_state(&self, name: &str) -> Option<ContainerState> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.state.clone())
    }

    pub(crate) fn has_image(&self, reference: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .images
            .contains(&canonical_image(reference))
    }

    pub(crate) fn has_network(&self, name: &str) -> bool {
        self.state.lock().unwrap().networks.contains(name)
    }

    pub(crate) fn has_volume(&self, name: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(name)
    }

    fn insert_container(&self, name: &str, image: &str, network: Option<String>, state: ContainerState) -> String {
        let mut guard = self.state.lock().unwrap();
        guard.next_id += 1;
        let id = format!("{:064x}", guard.next_id);
        guard.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                image: canonical_image(image),
                network,
                state,
            },
        );
        id
    }

    /// Records the call and pops an injected failure, if any.
    fn enter(&self, op: &'static str, target: &str) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(format!("{op} {target}"));
        match guard.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_network(state: &FakeState, network: Option<&str>) -> Result<()> {
        match network {
            Some(net) if !net.is_empty() && net != "default" && !state.networks.contains(net) => {
                Err(OrchestratorError::runtime(404, format!("network {net} not found")))
            }
            _ => Ok(()),
        }
    }

    fn with_existing<T>(
        &self,
        name: &str,
        f: impl FnOnce(&FakeState, &mut FakeContainer) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let mut container = state
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| no_such("container", name))?;
        let result = f(state, &mut container);
        state.containers.insert(name.to_string(), container);
        result
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.enter("inspect", name)?;
        let guard = self.state.lock().unwrap();
        Ok(guard.containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: name.to_string(),
            image: Some(c.image.clone()),
            state: c.state.clone(),
        }))
    }

    async fn run_container(&self, config: &ContainerConfig, volumes: &VolumeMap) -> Result<String> {
        self.enter("run", &config.name)?;
        {
            let guard = self.state.lock().unwrap();
            if guard.containers.contains_key(&config.name) {
                return Err(OrchestratorError::runtime(
                    409,
                    format!("Conflict. The container name \"/{}\" is already in use", config.name),
                ));
            }
            let image = canonical_image(config.image.reference());
            if !guard.images.contains(&image) {
                return Err(no_such("image", &image));
            }
            Self::check_network(&guard, config.network.as_deref())?;
        }
        {
            // Named volumes spring into existence on first use
            let mut guard = self.state.lock().unwrap();
            for key in volumes.keys().filter(|k| is_managed_volume(k)) {
                guard.volumes.insert(key.clone());
            }
        }
        Ok(self.insert_container(
            &config.name,
            config.image.reference(),
            config.network.clone(),
            ContainerState::Running,
        ))
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.enter("start", name)?;
        self.with_existing(name, |state, c| {
            Self::check_network(state, c.network.as_deref())?;
            c.state = ContainerState::Running;
            Ok(())
        })
    }

    async fn stop_container(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.enter("stop", name)?;
        self.with_existing(name, |_, c| {
            if c.state.is_active() {
                c.state = ContainerState::Exited { exit_code: 0 };
            }
            Ok(())
        })
    }

    async fn kill_container(&self, name: &str) -> Result<()> {
        self.enter("kill", name)?;
        self.with_existing(name, |_, c| {
            if !c.state.is_active() {
                return Err(OrchestratorError::runtime(
                    409,
                    format!("Container {name} is not running"),
                ));
            }
            c.state = ContainerState::Exited { exit_code: 137 };
            Ok(())
        })
    }

    async fn restart_container(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.enter("restart", name)?;
        self.with_existing(name, |state, c| {
            Self::check_network(state, c.network.as_deref())?;
            c.state = ContainerState::Running;
            Ok(())
        })
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        self.enter("remove", name)?;
        let mut guard = self.state.lock().unwrap();
        let container = guard
            .containers
            .get(name)
            .ok_or_else(|| no_such("container", name))?;
        if container.state.is_active() && !force {
            return Err(OrchestratorError::runtime(
                409,
                format!("You cannot remove a running container {name}"),
            ));
        }
        guard.containers.remove(name);
        Ok(())
    }

    async fn stream_logs(&self, name: &str, _follow: bool) -> Result<LogStream> {
        self.enter("logs", name)?;
        if !self.state.lock().unwrap().containers.contains_key(name) {
            return Err(no_such("container", name));
        }
        let chunks = vec![
            Ok(format!("{name} starting\n")),
            Ok(format!("{name} ready to accept connections\n")),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.enter("exec", name)?;
        let guard = self.state.lock().unwrap();
        match guard.containers.get(name) {
            None => Err(no_such("container", name)),
            Some(c) if !c.state.is_running() => Err(OrchestratorError::runtime(
                409,
                format!("Container {name} is not running"),
            )),
            Some(_) => Ok(ExecOutput::new(format!("{}\n", cmd.join(" ")), "", 0)),
        }
    }

    async fn export_container(&self, name: &str, dest: &Path) -> Result<()> {
        self.enter("export", name)?;
        let delay = {
            let guard = self.state.lock().unwrap();
            if !guard.containers.contains_key(name) {
                return Err(no_such("container", name));
            }
            guard.export_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        tokio::fs::write(dest, format!("filesystem of {name}")).await?;
        Ok(())
    }

    async fn commit_container(&self, name: &str, repo: &str, tag: &str) -> Result<String> {
        self.enter("commit", name)?;
        let mut guard = self.state.lock().unwrap();
        if !guard.containers.contains_key(name) {
            return Err(no_such("container", name));
        }
        guard.images.insert(format!("{repo}:{tag}"));
        Ok(format!("sha256:{repo}-{tag}"))
    }

    async fn save_image(&self, reference: &str, dest: &Path) -> Result<()> {
        self.enter("save", reference)?;
        if !self.has_image(reference) {
            return Err(no_such("image", reference));
        }
        tokio::fs::write(dest, format!("image {reference}")).await?;
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        self.enter("image_exists", reference)?;
        Ok(self.has_image(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        self.enter("pull", reference)?;
        let delay = self.state.lock().unwrap().pull_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .images
            .insert(canonical_image(reference));
        Ok(())
    }

    async fn remove_image(&self, reference: &str, _force: bool) -> Result<()> {
        self.enter("remove_image", reference)?;
        let mut guard = self.state.lock().unwrap();
        if !guard.images.remove(&canonical_image(reference)) {
            return Err(no_such("image", reference));
        }
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        self.enter("network_exists", name)?;
        Ok(self.has_network(name))
    }

    async fn create_network(&self, name: &str, _driver: &str) -> Result<()> {
        self.enter("create_network", name)?;
        let mut guard = self.state.lock().unwrap();
        if !guard.networks.insert(name.to_string()) {
            return Err(OrchestratorError::runtime(
                409,
                format!("network with name {name} already exists"),
            ));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.enter("remove_network", name)?;
        let mut guard = self.state.lock().unwrap();
        if !guard.networks.remove(name) {
            return Err(OrchestratorError::runtime(404, format!("network {name} not found")));
        }
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.enter("remove_volume", name)?;
        let mut guard = self.state.lock().unwrap();
        if !guard.volumes.remove(name) {
            return Err(no_such("volume", name));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
