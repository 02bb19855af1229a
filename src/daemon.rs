//! The outer tick loop: validate workers, scale, sync tags, forever
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::autoscaler::Autoscaler;
use crate::host_storage::HostStorage;
use crate::worker_tags::WorkerTagsHandler;
use crate::worker_validator::WorkerValidator;
use crate::Error;

/// Runs the autoscaling tick loop until the process is interrupted
///
/// Grounded on the original's `GridEngineAutoscalingDaemon`: every tick
/// sleeps, reaps broken workers, makes a scaling decision, then syncs
/// in-use tags. A failure in any step is logged and the loop keeps going --
/// only a process-level interrupt stops it.
pub struct Daemon {
    autoscaler: Arc<Autoscaler>,
    worker_validator: Arc<WorkerValidator>,
    worker_tags_handler: Arc<WorkerTagsHandler>,
    static_host_storage: Arc<dyn HostStorage>,
    polling_timeout: u64,
}

impl Daemon {
    pub fn new(
        autoscaler: Arc<Autoscaler>,
        worker_validator: Arc<WorkerValidator>,
        worker_tags_handler: Arc<WorkerTagsHandler>,
        static_host_storage: Arc<dyn HostStorage>,
        polling_timeout: u64,
    ) -> Self {
        Daemon {
            autoscaler,
            worker_validator,
            worker_tags_handler,
            static_host_storage,
            polling_timeout,
        }
    }

    /// Seed the static host storage with the master host (or every host
    /// listed in `default_hostfile` when static hosts are enabled) before the
    /// first tick runs, unless it was already seeded by a previous run
    ///
    /// Never propagates an error, matching the original's blanket
    /// `except Exception` guard around `init_static_hosts`.
    pub async fn bootstrap(
        &self,
        default_hostfile: &Path,
        master_host: &str,
        static_hosts_enabled: bool,
        tagging_active_timeout: Duration,
    ) {
        if let Err(err) = self
            .bootstrap_inner(default_hostfile, master_host, static_hosts_enabled, tagging_active_timeout)
            .await
        {
            warn!(error = %err, "static hosts initialization has failed");
        }
    }

    async fn bootstrap_inner(
        &self,
        default_hostfile: &Path,
        master_host: &str,
        static_hosts_enabled: bool,
        tagging_active_timeout: Duration,
    ) -> Result<(), Error> {
        if !self.static_host_storage.load_hosts().await?.is_empty() {
            info!("static hosts already initialized");
            return Ok(());
        }
        info!("starting static hosts initialization");
        let hosts = if static_hosts_enabled {
            load_default_hosts(default_hostfile).await?
        } else {
            vec![master_host.to_string()]
        };
        for host in &hosts {
            self.static_host_storage.add_host(host).await?;
        }
        // backdate activity so tag syncing doesn't treat a freshly-seeded
        // host as newly active on the very first tick
        let backdated = Utc::now() - tagging_active_timeout.checked_mul(2).unwrap_or(tagging_active_timeout);
        self.static_host_storage.update_hosts_activity(&hosts, backdated).await?;
        info!("static hosts have been initialized");
        Ok(())
    }

    pub async fn run(&self) {
        info!("launching grid engine autoscaling daemon");
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(self.polling_timeout)).await;
            if let Err(err) = self.worker_validator.validate().await {
                warn!(error = %err, "scaling tick has failed");
                continue;
            }
            if let Err(err) = self.autoscaler.scale().await {
                warn!(error = %err, "scaling tick has failed");
                continue;
            }
            self.worker_tags_handler.process_tags().await;
        }
    }
}

/// Read a hostfile's lines, one hostname per line, returning an empty list
/// if the file doesn't exist yet
async fn load_default_hosts(path: &Path) -> Result<Vec<String>, Error> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ge-autoscaler-test-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn missing_hostfile_yields_no_hosts() {
        let path = scratch_path("missing-hostfile");
        assert!(load_default_hosts(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hostfile_lines_are_trimmed_and_blanks_dropped() {
        let path = scratch_path("hostfile");
        tokio::fs::write(&path, "worker-1\n  worker-2  \n\nworker-3\n")
            .await
            .unwrap();
        let hosts = load_default_hosts(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(hosts, vec!["worker-1", "worker-2", "worker-3"]);
    }
}
