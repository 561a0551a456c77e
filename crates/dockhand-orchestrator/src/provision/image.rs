//! Image availability with retrying pulls.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::container::{ContainerConfig, ImagePullPolicy};
use crate::error::{OrchestratorError, Result};
use crate::runtime::SharedRuntime;

/// Base delay between pull attempts; attempt `n` waits `n` times this.
pub const DEFAULT_PULL_BACKOFF: Duration = Duration::from_secs(2);

/// What [`ImageProvisioner::ensure_image`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// The image was already present.
    Present,

    /// The image was pulled.
    Pulled {
        /// Attempt that succeeded (1-based).
        attempts: u32,
    },
}

/// Makes the configured image available locally.
#[derive(Clone)]
pub struct ImageProvisioner {
    runtime: SharedRuntime,
    backoff: Duration,
}

impl ImageProvisioner {
    /// Creates a provisioner with the default linear backoff.
    pub fn new(runtime: SharedRuntime) -> Self {
        Self {
            runtime,
            backoff: DEFAULT_PULL_BACKOFF,
        }
    }

    /// Overrides the base backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Ensures the image of `config` is present, honoring its pull settings.
    ///
    /// Each attempt is bounded by the configured pull timeout; a timed out
    /// attempt is abandoned and counts as a failure. Attempt `n` is followed
    /// by a sleep of `n * backoff` when another attempt remains.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::ImageNotFound`] if the policy is `never` and the
    ///   image is absent.
    /// - [`OrchestratorError::ImagePull`] wrapping the last attempt's error
    ///   once every attempt failed.
    pub async fn ensure_image(&self, config: &ContainerConfig) -> Result<ImageOutcome> {
        let reference = config.image.pull_reference();
        let settings = &config.pull;

        match settings.policy {
            ImagePullPolicy::Always => {}
            ImagePullPolicy::IfNotPresent => {
                if self.runtime.image_exists(&reference).await? {
                    debug!(image = %reference, "Image present locally");
                    return Ok(ImageOutcome::Present);
                }
            }
            ImagePullPolicy::Never => {
                if self.runtime.image_exists(&reference).await? {
                    return Ok(ImageOutcome::Present);
                }
                return Err(OrchestratorError::image_not_found(reference));
            }
        }

        let attempts = settings.retry_attempts.max(1);
        let timeout = settings.timeout();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.runtime.pull_image(&reference))
                    .await
                    .unwrap_or_else(|_| {
                        Err(OrchestratorError::timeout(format!(
                            "pull of {reference} ({}ms)",
                            limit.as_millis()
                        )))
                    }),
                None => self.runtime.pull_image(&reference).await,
            };

            match result {
                Ok(()) => {
                    info!(image = %reference, attempt, "Pulled image");
                    return Ok(ImageOutcome::Pulled { attempts: attempt });
                }
                Err(e) => {
                    warn!(image = %reference, attempt, max_attempts = attempts, error = %e, "Image pull failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| OrchestratorError::timeout("image pull"));
        Err(OrchestratorError::image_pull(reference, attempts, last))
    }
}
