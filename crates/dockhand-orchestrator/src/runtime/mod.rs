//! Container runtime backends.
//!
//! This module provides the trait the lifecycle manager talks to and the
//! Docker implementation backed by bollard.

mod docker;
#[cfg(test)]
pub(crate) mod fake;
mod r#trait;

pub use docker::{DockerConnection, DockerRuntime, MANAGED_LABEL, SERVICE_LABEL};
pub use r#trait::{ContainerRuntime, ExecOutput, LogStream};

/// Shared handle to a runtime, injected into managers.
pub type SharedRuntime = std::sync::Arc<dyn ContainerRuntime>;
