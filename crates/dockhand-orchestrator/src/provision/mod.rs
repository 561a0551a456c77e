//! Idempotent provisioning of the resources a container depends on.
//!
//! - [`ImageProvisioner`]: makes the configured image available locally,
//!   pulling with bounded retries when needed.
//! - [`NetworkProvisioner`]: makes a custom network exist, leaving the
//!   built-in networks alone.

mod image;
mod network;

pub use image::{ImageOutcome, ImageProvisioner, DEFAULT_PULL_BACKOFF};
pub use network::{NetworkOutcome, NetworkProvisioner, DEFAULT_NETWORK_DRIVER};
