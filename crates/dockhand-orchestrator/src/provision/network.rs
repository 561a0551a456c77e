//! Network existence for custom networks.

use tracing::{debug, info};

use crate::container::is_builtin_network;
use crate::error::{OrchestratorError, Result};
use crate::runtime::SharedRuntime;

/// Driver used for networks created on demand.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// What [`NetworkProvisioner::ensure_network`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkOutcome {
    /// No network, or a built-in one; the runtime was not consulted.
    BuiltIn,
    /// The network already existed (possibly created by a concurrent caller).
    Existing,
    /// The network was created by this call.
    Created,
}

/// Creates custom networks on demand.
#[derive(Clone)]
pub struct NetworkProvisioner {
    runtime: SharedRuntime,
}

impl NetworkProvisioner {
    /// Creates a new provisioner.
    pub fn new(runtime: SharedRuntime) -> Self {
        Self { runtime }
    }

    /// Ensures the named network exists.
    ///
    /// Built-in networks and empty names are left untouched. A create that
    /// loses a race with another creator is treated as success.
    pub async fn ensure_network(&self, name: Option<&str>) -> Result<NetworkOutcome> {
        let name = match name.map(str::trim) {
            Some(name) if !is_builtin_network(name) => name,
            _ => return Ok(NetworkOutcome::BuiltIn),
        };

        let exists = self
            .runtime
            .network_exists(name)
            .await
            .map_err(|e| OrchestratorError::network(name, format!("inspect failed: {e}")))?;
        if exists {
            debug!(network = %name, "Using existing network");
            return Ok(NetworkOutcome::Existing);
        }

        match self.runtime.create_network(name, DEFAULT_NETWORK_DRIVER).await {
            Ok(()) => {
                info!(network = %name, driver = DEFAULT_NETWORK_DRIVER, "Created network");
                Ok(NetworkOutcome::Created)
            }
            Err(e) if e.is_conflict() => {
                debug!(network = %name, "Network created concurrently");
                Ok(NetworkOutcome::Existing)
            }
            Err(e) => Err(OrchestratorError::network(name, format!("create failed: {e}"))),
        }
    }
}
