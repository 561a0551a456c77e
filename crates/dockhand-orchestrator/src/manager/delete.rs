//! Destructive teardown with an optional backup taken first.
//!
//! Phases run in a fixed order: backup, container, image, volumes, network.
//! A failed backup aborts before anything is removed. After that every
//! phase is attempted even if an earlier one failed, and all failures are
//! reported together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::ContainerLifecycleManager;
use crate::container::volume::is_managed_volume;
use crate::container::ContainerInfo;
use crate::error::{DeletePhase, OrchestratorError, PhaseFailure, Result};

/// Timestamp format used in backup file names and image tags.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Artifacts written by a backup-enabled delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Tarball of the container filesystem.
    pub export_tar_path: PathBuf,

    /// Tarball of the committed snapshot image.
    pub image_tar_path: PathBuf,

    /// Repository of the snapshot image (`<name>_backup`).
    pub image_repo: String,

    /// Tag of the snapshot image (the timestamp).
    pub image_tag: String,

    /// ID of the snapshot image.
    pub image_id: String,

    /// When the backup was taken.
    pub timestamp: DateTime<Utc>,
}

impl BackupRecord {
    /// Returns the snapshot image reference, `repo:tag`.
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image_repo, self.image_tag)
    }
}

/// Result of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// There was no container to delete.
    NotPresent,

    /// The container and its resources were removed.
    Removed {
        /// Backup taken before removal, if requested.
        backup: Option<BackupRecord>,
    },
}

impl ContainerLifecycleManager {
    /// Tears the container down together with its image, managed volumes and
    /// custom network.
    ///
    /// Concurrent deletes on the same manager run one after another; the
    /// second one finds nothing left and returns
    /// [`DeleteOutcome::NotPresent`].
    ///
    /// With `backup`, the container is stopped, its filesystem exported and
    /// a snapshot image committed and saved, all into the backup directory,
    /// before anything is removed. `force` removes a container that refuses
    /// to stop and lets a failed stop fall back to a kill during backup.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Backup`] if any backup step fails; nothing has
    ///   been removed in that case.
    /// - [`OrchestratorError::DeleteIncomplete`] listing every teardown phase
    ///   that failed. Resources that were already gone do not count.
    pub async fn delete(&self, force: bool, backup: bool) -> Result<DeleteOutcome> {
        let _guard = self.delete_lock.lock().await;
        let name = self.name();

        let Some(info) = self.runtime.inspect_container(name).await? else {
            info!(container = %name, "Delete requested but container does not exist");
            return Ok(DeleteOutcome::NotPresent);
        };

        let record = if backup {
            Some(self.backup(&info, force).await?)
        } else {
            None
        };

        let mut failures = Vec::new();

        // A backup leaves the container stopped
        let active = info.state.is_active() && record.is_none();
        let result = self.remove_container_phase(active, force).await;
        record_phase(result, DeletePhase::Container, name, &mut failures);

        let image = self.config.image.reference();
        let result = self.runtime.remove_image(image, force).await;
        record_phase(result, DeletePhase::Image, image, &mut failures);

        for volume in self.volumes.keys().filter(|key| is_managed_volume(key)) {
            let result = self.runtime.remove_volume(volume).await;
            record_phase(result, DeletePhase::Volume, volume, &mut failures);
        }

        if let Some(network) = self.config.custom_network() {
            let result = self.runtime.remove_network(network).await;
            record_phase(result, DeletePhase::Network, network, &mut failures);
        }

        if !failures.is_empty() {
            return Err(OrchestratorError::DeleteIncomplete {
                container: name.to_string(),
                failures,
            });
        }

        info!(container = %name, backup = record.is_some(), "Container deleted");
        Ok(DeleteOutcome::Removed { backup: record })
    }

    async fn backup(&self, info: &ContainerInfo, force: bool) -> Result<BackupRecord> {
        let name = self.name();
        let fail = |reason: String| OrchestratorError::backup(name, reason);

        let timestamp = Utc::now();
        let stamp = timestamp.format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let dir = &self.options.backup_dir;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| fail(format!("cannot create {}: {e}", dir.display())))?;

        if info.state.is_active() {
            if let Err(e) = self.runtime.stop_container(name, self.options.stop_timeout).await {
                if !force {
                    return Err(fail(format!("stop failed: {e}")));
                }
                warn!(container = %name, error = %e, "Stop failed, killing before backup");
                self.runtime
                    .kill_container(name)
                    .await
                    .map_err(|e| fail(format!("kill failed: {e}")))?;
            }
        }

        let export_tar_path = backup_path(dir, name, "export", &stamp);
        self.runtime
            .export_container(name, &export_tar_path)
            .await
            .map_err(|e| fail(format!("export failed: {e}")))?;

        let image_repo = format!("{}_backup", name.to_lowercase());
        let image_id = self
            .runtime
            .commit_container(name, &image_repo, &stamp)
            .await
            .map_err(|e| fail(format!("commit failed: {e}")))?;

        let image_tar_path = backup_path(dir, name, "image", &stamp);
        self.runtime
            .save_image(&format!("{image_repo}:{stamp}"), &image_tar_path)
            .await
            .map_err(|e| fail(format!("image save failed: {e}")))?;

        info!(
            container = %name,
            export = %export_tar_path.display(),
            image = %image_tar_path.display(),
            "Backup written"
        );

        Ok(BackupRecord {
            export_tar_path,
            image_tar_path,
            image_repo,
            image_tag: stamp,
            image_id,
            timestamp,
        })
    }

    /// Stops (falling back to a kill) and removes the container.
    async fn remove_container_phase(&self, active: bool, force: bool) -> Result<()> {
        let name = self.name();

        if active {
            match self.runtime.stop_container(name, self.options.stop_timeout).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => {
                    warn!(container = %name, error = %e, "Stop failed, killing");
                    match self.runtime.kill_container(name).await {
                        Err(e) if !e.is_not_found() && !force => return Err(e),
                        Err(e) => warn!(container = %name, error = %e, "Kill failed"),
                        Ok(()) => {}
                    }
                }
            }
        }

        self.runtime.remove_container(name, force).await
    }
}

fn backup_path(dir: &Path, name: &str, kind: &str, stamp: &str) -> PathBuf {
    dir.join(format!("{name}_{kind}_{stamp}.tar"))
}

/// Logs a phase result; not-found counts as done, anything else is recorded.
fn record_phase(result: Result<()>, phase: DeletePhase, resource: &str, failures: &mut Vec<PhaseFailure>) {
    match result {
        Ok(()) => info!(phase = %phase, resource = %resource, "Removed"),
        Err(e) if e.is_not_found() => {
            warn!(phase = %phase, resource = %resource, "Already absent");
        }
        Err(e) => {
            warn!(phase = %phase, resource = %resource, error = %e, "Removal failed");
            failures.push(PhaseFailure::new(phase, resource, &e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, ContainerState, PortMapping};
    use crate::manager::{ManagerOptions, StartOutcome};
    use crate::runtime::fake::FakeRuntime;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache_config() -> ContainerConfig {
        ContainerConfig::builder("cache-1", "redis:7-alpine")
            .port(PortMapping::tcp(6379).host_port(16379))
            .network("custom-net")
            .volume("redis-data", "/data")
            .volume("/srv/redis/redis.conf", serde_json::json!(["/usr/local/etc/redis/redis.conf", "ro"]))
            .build()
    }

    fn manager_in(fake: &Arc<FakeRuntime>, backup_dir: &Path) -> ContainerLifecycleManager {
        let options = ManagerOptions {
            backup_dir: backup_dir.to_path_buf(),
            ..Default::default()
        };
        ContainerLifecycleManager::new(cache_config(), fake.clone(), options).unwrap()
    }

    async fn started(fake: &Arc<FakeRuntime>, backup_dir: &Path) -> ContainerLifecycleManager {
        let manager = manager_in(fake, backup_dir);
        assert_eq!(manager.start().await.unwrap(), StartOutcome::Created);
        manager
    }

    fn position(calls: &[String], call: &str) -> usize {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
    }

    #[tokio::test]
    async fn test_delete_absent_container() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = manager_in(&fake, dir.path());

        let outcome = manager.delete(true, true).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::NotPresent);
        assert!(fake.mutations().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_without_backup_removes_in_phase_order() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        let before = fake.mutations().len();

        let outcome = manager.delete(false, false).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Removed { backup: None });
        assert_eq!(
            fake.mutations()[before..],
            [
                "stop cache-1",
                "remove cache-1",
                "remove_image redis:7-alpine",
                "remove_volume redis-data",
                "remove_network custom-net",
            ]
        );
        assert!(!fake.has_volume("redis-data"));
        assert!(!fake.has_network("custom-net"));
    }

    #[tokio::test]
    async fn test_backup_precedes_every_removal() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;

        let outcome = manager.delete(false, true).await.unwrap();

        let DeleteOutcome::Removed { backup: Some(record) } = outcome else {
            panic!("expected a backup record");
        };

        assert_eq!(record.image_repo, "cache-1_backup");
        assert_eq!(record.image_tag.len(), 14);
        assert!(record.image_tag.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(record.image_tag, record.timestamp.format(BACKUP_TIMESTAMP_FORMAT).to_string());
        assert_eq!(
            record.export_tar_path,
            dir.path().join(format!("cache-1_export_{}.tar", record.image_tag))
        );
        assert_eq!(
            record.image_tar_path,
            dir.path().join(format!("cache-1_image_{}.tar", record.image_tag))
        );
        assert!(record.export_tar_path.exists());
        assert!(record.image_tar_path.exists());

        let calls = fake.mutations();
        let export = position(&calls, "export cache-1");
        let commit = position(&calls, "commit cache-1");
        let save = position(&calls, &format!("save {}", record.image_reference()));
        let remove = position(&calls, "remove cache-1");

        assert!(position(&calls, "stop cache-1") < export);
        assert!(export < commit && commit < save && save < remove);
        assert!(remove < position(&calls, "remove_image redis:7-alpine"));
    }

    #[tokio::test]
    async fn test_backup_stop_is_not_repeated_before_removal() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        let before = fake.mutations().len();

        manager.delete(false, true).await.unwrap();

        let calls = &fake.mutations()[before..];
        assert_eq!(calls.iter().filter(|c| *c == "stop cache-1").count(), 1);
        assert_eq!(fake.count("kill"), 0);
        assert_eq!(calls.iter().filter(|c| c.starts_with("remove ")).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_export_leaves_container_intact() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        fake.fail_next("export", OrchestratorError::runtime(500, "export interrupted"));

        let err = manager.delete(true, true).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Backup { ref reason, .. } if reason.contains("export")));
        assert_eq!(fake.mutations().last().map(String::as_str), Some("export cache-1"));
        assert!(fake.container_state("cache-1").is_some());
        assert_eq!(fake.count("commit"), 0);
        assert_eq!(fake.count("remove"), 0);
        assert_eq!(fake.count("remove_image"), 0);
    }

    #[tokio::test]
    async fn test_failed_image_save_leaves_container_intact() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        fake.fail_next("save", OrchestratorError::runtime(500, "no space left on device"));

        let err = manager.delete(true, true).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Backup { ref reason, .. } if reason.contains("image save")));
        assert!(fake.container_state("cache-1").is_some());
        assert!(fake.has_volume("redis-data"));
        assert!(fake.has_network("custom-net"));
        assert_eq!(fake.count("remove"), 0);
        assert_eq!(fake.count("remove_volume"), 0);
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_container_intact() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        fake.fail_next("commit", OrchestratorError::runtime(500, "no space left on device"));

        let err = manager.delete(true, true).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Backup { ref container, .. } if container == "cache-1"));
        assert!(fake.container_state("cache-1").is_some());
        assert!(fake.has_image("redis:7-alpine"));
        assert!(fake.has_volume("redis-data"));
        assert!(fake.has_network("custom-net"));
        assert_eq!(fake.count("remove"), 0);
        assert_eq!(fake.count("remove_image"), 0);
    }

    #[tokio::test]
    async fn test_backup_stop_failure_needs_force_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;

        fake.fail_next("stop", OrchestratorError::runtime(500, "container stuck"));
        let err = manager.delete(false, true).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Backup { .. }));
        assert_eq!(fake.count("kill"), 0);
        assert_eq!(fake.container_state("cache-1"), Some(ContainerState::Running));

        fake.fail_next("stop", OrchestratorError::runtime(500, "container stuck"));
        let outcome = manager.delete(true, true).await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Removed { backup: Some(_) }));
        assert_eq!(fake.count("kill"), 1);
    }

    #[tokio::test]
    async fn test_phase_failures_are_aggregated() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        fake.fail_next("remove_image", OrchestratorError::runtime(409, "image is being used"));
        fake.fail_next("remove_network", OrchestratorError::runtime(403, "network has active endpoints"));

        let err = manager.delete(false, false).await.unwrap_err();

        let OrchestratorError::DeleteIncomplete { container, failures } = err else {
            panic!("expected DeleteIncomplete");
        };
        assert_eq!(container, "cache-1");
        let phases: Vec<_> = failures.iter().map(|f| f.phase).collect();
        assert_eq!(phases, vec![DeletePhase::Image, DeletePhase::Network]);
        // Phases after the failed image removal still ran
        assert!(!fake.has_volume("redis-data"));
        assert!(fake.container_state("cache-1").is_none());
    }

    #[tokio::test]
    async fn test_already_absent_resources_are_not_failures() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = started(&fake, dir.path()).await;
        fake.fail_next("remove_image", OrchestratorError::runtime(404, "No such image: redis:7-alpine"));
        fake.fail_next("remove_volume", OrchestratorError::runtime(404, "No such volume: redis-data"));

        let outcome = manager.delete(false, false).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Removed { backup: None });
    }

    #[tokio::test]
    async fn test_concurrent_deletes_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new().with_export_delay(Duration::from_millis(50)));
        let manager = started(&fake, dir.path()).await;

        let (first, second) = tokio::join!(manager.delete(false, true), manager.delete(false, true));

        let mut outcomes = [first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DeleteOutcome::NotPresent));
        assert!(matches!(outcomes[0], DeleteOutcome::Removed { backup: Some(_) }));
        assert_eq!(outcomes[1], DeleteOutcome::NotPresent);
        assert_eq!(fake.count("export"), 1);
        assert_eq!(fake.count("remove"), 1);
    }

    #[tokio::test]
    async fn test_redis_lifecycle_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let manager = manager_in(&fake, dir.path());

        assert_eq!(manager.start().await.unwrap(), StartOutcome::Created);
        assert!(fake.has_network("custom-net"));
        assert_eq!(manager.status().await.unwrap(), Some(ContainerState::Running));

        let output = manager.exec(&["redis-cli".into(), "PING".into()]).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(!manager.logs(false).await.unwrap().is_empty());

        let outcome = manager.delete(true, true).await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Removed { backup: Some(_) }));

        assert_eq!(manager.status().await.unwrap(), None);
        assert!(!fake.has_network("custom-net"));
        assert!(!fake.has_volume("redis-data"));
        for builtin in ["bridge", "host", "none"] {
            assert!(fake.has_network(builtin));
            assert!(!fake.calls().contains(&format!("remove_network {builtin}")));
        }
        // Host paths are never treated as volumes
        assert!(!fake.calls().iter().any(|c| c.contains("/srv/redis")));

        assert_eq!(manager.delete(true, true).await.unwrap(), DeleteOutcome::NotPresent);
    }
}
