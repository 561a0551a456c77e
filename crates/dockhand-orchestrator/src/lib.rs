//! Declarative lifecycle management for named Docker containers.
//!
//! This crate turns a static [`ContainerConfig`] into a running container and
//! keeps it there idempotently. It can also tear the container down safely,
//! taking a backup first if asked.
//!
//! # Overview
//!
//! The orchestrator handles:
//! - **Validation**: rejecting bad configurations before any runtime call
//! - **Provisioning**: pulling images with bounded retries and creating custom
//!   networks on demand
//! - **Container lifecycle**: start, stop, restart, logs and exec by name
//! - **Teardown**: backup, then phased removal of the container, its image,
//!   managed volumes and network
//!
//! # Architecture
//!
//! - [`container`]: configuration types, volume normalization, live state
//! - [`provision`]: image and network provisioners
//! - [`manager`]: the per-container lifecycle manager and delete orchestration
//! - [`registry`]: name-keyed facade over managers
//! - [`runtime`]: the runtime trait and the bollard-backed Docker runtime
//! - [`error`]: error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dockhand_orchestrator::{
//!     ContainerConfig, DockerRuntime, ManagerOptions, ManagerRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ManagerRegistry::new(Arc::new(DockerRuntime::new()), ManagerOptions::default());
//!
//!     let config = ContainerConfig::builder("cache-1", "redis:7-alpine")
//!         .network("custom-net")
//!         .volume("redis-data", "/data")
//!         .build();
//!
//!     registry.start(config).await?;
//!
//!     let output = registry.exec("cache-1", &["redis-cli".into(), "PING".into()]).await?;
//!     println!("Response: {}", output.stdout);
//!
//!     registry.delete("cache-1", true, true).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Deletes on one manager are serialized by an in-process lock. Nothing
//! coordinates separate processes: each container name must be owned by one
//! manager in one process.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod container;
pub mod error;
pub mod manager;
pub mod provision;
pub mod registry;
pub mod runtime;

// Re-export commonly used types at the crate root
pub use container::{ContainerConfig, ContainerImage, ContainerState, ResourceLimits};
pub use error::{OrchestratorError, Result};
pub use manager::{
    BackupRecord, ContainerLifecycleManager, DeadContainerPolicy, DeleteOutcome, ManagerOptions,
    StartOutcome,
};
pub use registry::ManagerRegistry;
pub use runtime::{
    ContainerRuntime, DockerConnection, DockerRuntime, ExecOutput, LogStream, SharedRuntime,
};
