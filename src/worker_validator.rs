//! Finds and reaps additional hosts that have gone bad
use std::sync::Arc;

use tracing::{info, warn};

use crate::cloud::{PipeCliApi, PipelineClient};
use crate::grid_engine::GridEngine;
use crate::host_storage::HostStorage;
use crate::scale_down::handler::ScaleDownHandler;
use crate::worker_tags::run_id_from_host;
use crate::Error;

const RUNNING_STATUS: &str = "RUNNING";

/// Reaps additional hosts that aren't valid Grid Engine execution hosts or
/// whose run has stopped running
///
/// Some additional hosts end up broken: the autoscaler may have crashed
/// mid-configuration leaving a half-set-up host, or a spot worker may have
/// been preempted out from under its cluster. This walks every tracked host
/// and, for anything invalid, stops its run, disables and force-kills
/// whatever Grid Engine still thinks is running there, removes it from
/// Grid Engine, and forgets it.
///
/// Grounded on the original's `GridEngineWorkerValidator`.
pub struct WorkerValidator {
    grid_engine: Arc<GridEngine>,
    api: Arc<PipelineClient>,
    pipe: Arc<dyn PipeCliApi>,
    host_storage: Arc<dyn HostStorage>,
    scale_down_handler: Arc<ScaleDownHandler>,
}

impl WorkerValidator {
    pub fn new(
        grid_engine: Arc<GridEngine>,
        api: Arc<PipelineClient>,
        pipe: Arc<dyn PipeCliApi>,
        host_storage: Arc<dyn HostStorage>,
        scale_down_handler: Arc<ScaleDownHandler>,
    ) -> Self {
        WorkerValidator {
            grid_engine,
            api,
            pipe,
            host_storage,
            scale_down_handler,
        }
    }

    pub async fn validate(&self) -> Result<(), Error> {
        let hosts = self.host_storage.load_hosts().await?;
        if hosts.is_empty() {
            info!("skipping worker validation, no additional hosts tracked");
            return Ok(());
        }
        info!("starting worker validation");
        let mut invalid_hosts = Vec::new();
        for host in hosts {
            let run_id = run_id_from_host(&host).to_string();
            if !self.grid_engine.is_valid(&host).await || !self.is_running(&run_id).await {
                invalid_hosts.push((host, run_id));
            }
        }
        for (host, run_id) in invalid_hosts {
            warn!(%host, "invalid additional host found, it will be downscaled");
            self.try_stop_worker(&run_id).await;
            self.try_disable_worker(&host, &run_id).await;
            self.try_kill_invalid_host_jobs(&host).await;
            if let Err(err) = self.grid_engine.delete_host(&host, true).await {
                warn!(%host, error = %err, "removing invalid host from grid engine has failed");
            }
            if let Err(err) = self.scale_down_handler.remove_host_from_hosts(&host).await {
                warn!(%host, error = %err, "removing invalid host from hosts has failed");
            }
            self.host_storage.remove_host(&host).await?;
        }
        info!("worker validation finished");
        Ok(())
    }

    async fn is_running(&self, run_id: &str) -> bool {
        match self.api.get_run(run_id).await {
            Ok(run) => {
                let status = run.status.as_deref().unwrap_or("not found").trim().to_uppercase();
                if status == RUNNING_STATUS {
                    true
                } else {
                    warn!(run_id, %status, "additional worker status is not running");
                    false
                }
            }
            Err(Error::Api { .. }) | Err(Error::Reqwest(_)) => {
                warn!(run_id, "additional worker status retrieval has failed, considering it not running");
                false
            }
            Err(err) => {
                warn!(run_id, error = %err, "additional worker status retrieval has failed, temporarily considering it running");
                true
            }
        }
    }

    async fn try_stop_worker(&self, run_id: &str) {
        info!(run_id, "stopping run");
        if let Err(err) = self.pipe.stop(run_id).await {
            warn!(run_id, error = %err, "invalid additional worker run stopping has failed");
        }
    }

    async fn try_disable_worker(&self, host: &str, run_id: &str) {
        info!(run_id, "disabling additional worker in grid engine");
        if let Err(err) = self.grid_engine.disable_host(host).await {
            warn!(run_id, error = %err, "invalid additional worker disabling has failed");
        }
    }

    async fn try_kill_invalid_host_jobs(&self, host: &str) {
        let jobs = match self.grid_engine.get_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(%host, error = %err, "listing jobs on invalid host has failed");
                return;
            }
        };
        let invalid: Vec<_> = jobs.into_iter().filter(|job| job.hosts.iter().any(|h| h == host)).collect();
        if !invalid.is_empty() {
            if let Err(err) = self.grid_engine.kill_jobs(&invalid, true).await {
                warn!(%host, error = %err, "killing jobs on invalid host has failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PipeCli;
    use crate::cmd::fake::FakeCmdExecutor;
    use crate::host_storage::MemoryHostStorage;

    const QHOST_BAD_STATE: &str = r#"
    <qhost>
      <host name="worker-9">
        <queue name="main.q">
          <queuevalue name="state_string">E</queuevalue>
        </queue>
      </host>
    </qhost>
    "#;
    const QSTAT_EMPTY: &str = r#"<job_info><queue_info></queue_info><job_info></job_info></job_info>"#;

    /// A host Grid Engine reports in a bad queue state is stopped, disabled,
    /// stripped of jobs, deleted from Grid Engine, and forgotten -- without
    /// ever needing to ask the cloud pipeline API whether its run is still
    /// running, since the invalid-state check alone already condemns it.
    #[tokio::test]
    async fn host_in_bad_queue_state_is_reaped_without_an_api_call() {
        let fake = Arc::new(FakeCmdExecutor::new());
        // is_valid's qconf -se, then qhost -q -xml
        fake.push_ok("");
        fake.push_ok(QHOST_BAD_STATE);
        // try_stop_worker's pipe stop
        fake.push_ok("");
        // try_disable_worker's qmod -d
        fake.push_ok("");
        // try_kill_invalid_host_jobs's get_jobs -- nothing left running there
        fake.push_ok(QSTAT_EMPTY);
        // delete_host's five qconf steps
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        // remove_host_from_hosts
        fake.push_ok("");

        let grid_engine = Arc::new(GridEngine::new(
            fake.clone(),
            "main.q".to_string(),
            "@allhosts".to_string(),
            true,
            "gpus".to_string(),
            "ram".to_string(),
        ));
        let pipe: Arc<dyn PipeCliApi> = Arc::new(PipeCli::new(fake.clone()));
        let host_storage: Arc<dyn HostStorage> = Arc::new(MemoryHostStorage::new());
        host_storage.add_host("worker-9").await.unwrap();

        let scale_down_handler = Arc::new(ScaleDownHandler::new(fake.clone(), pipe.clone(), grid_engine.clone()));
        let api = Arc::new(PipelineClient::new("http://localhost".to_string(), "token".to_string()).unwrap());
        let validator = WorkerValidator::new(grid_engine, api, pipe, host_storage.clone(), scale_down_handler);

        validator.validate().await.unwrap();

        assert!(host_storage.load_hosts().await.unwrap().is_empty());
    }
}
