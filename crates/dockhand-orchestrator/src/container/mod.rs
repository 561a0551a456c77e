//! Container configuration types and live state.
//!
//! This module provides the declarative [`ContainerConfig`], its building
//! blocks, volume normalization, and the runtime-derived container state.

mod config;
mod spec;
mod state;
pub mod volume;

pub use config::{
    is_builtin_network, ContainerConfig, ContainerConfigBuilder, PullSettings, BUILTIN_NETWORKS,
};
pub use spec::{
    ContainerImage, HealthCheck, ImagePullPolicy, PortMapping, PortProtocol, ResourceLimits,
    ResourceLimitsBuilder, RestartPolicy,
};
pub use state::{ContainerInfo, ContainerState};
pub use volume::{VolumeBinding, VolumeMap, VolumeMode};
