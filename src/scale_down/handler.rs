//! Tears down a single additional worker
use std::sync::Arc;

use tracing::{info, warn};

use crate::cloud::PipeCliApi;
use crate::cmd::CmdExecutor;
use crate::grid_engine::GridEngine;
use crate::worker_tags::run_id_from_host;
use crate::Error;

/// Scales down a single additional worker: disables it in Grid Engine,
/// bails out if jobs are still running there, otherwise removes it from
/// Grid Engine, stops its run and forgets its hostname
///
/// Grounded on the original's `GridEngineScaleDownHandler`.
pub struct ScaleDownHandler {
    cmd: Arc<dyn CmdExecutor>,
    pipe: Arc<dyn PipeCliApi>,
    grid_engine: Arc<GridEngine>,
}

impl ScaleDownHandler {
    pub fn new(cmd: Arc<dyn CmdExecutor>, pipe: Arc<dyn PipeCliApi>, grid_engine: Arc<GridEngine>) -> Self {
        ScaleDownHandler { cmd, pipe, grid_engine }
    }

    /// Attempt to scale down `host`, returning whether it actually happened
    pub async fn scale_down(&self, host: &str) -> Result<bool, Error> {
        info!(%host, "disabling additional worker");
        self.grid_engine.disable_host(host).await?;
        let jobs = self.grid_engine.get_jobs().await?;
        let still_running: Vec<_> = jobs
            .into_iter()
            .filter(|job| job.hosts.iter().any(|h| h == host))
            .collect();
        if !still_running.is_empty() {
            warn!(%host, jobs = still_running.len(), "disabled additional worker has associated jobs, scaling down is interrupted");
            info!(%host, "re-enabling additional worker");
            self.grid_engine.enable_host(host).await?;
            return Ok(false);
        }
        self.remove_host_from_grid_engine_configuration(host).await?;
        self.stop_run(host).await?;
        self.remove_host_from_hosts(host).await?;
        info!(%host, "additional worker has been scaled down");
        Ok(true)
    }

    async fn remove_host_from_grid_engine_configuration(&self, host: &str) -> Result<(), Error> {
        info!(%host, "removing additional worker from grid engine cluster configuration");
        self.grid_engine.delete_host(host, false).await?;
        Ok(())
    }

    async fn stop_run(&self, host: &str) -> Result<(), Error> {
        let run_id = run_id_from_host(host);
        info!(run_id, "stopping run");
        self.pipe.stop(run_id).await?;
        Ok(())
    }

    pub async fn remove_host_from_hosts(&self, host: &str) -> Result<(), Error> {
        info!(%host, "removing host from hosts");
        self.cmd.execute(&format!(r#"remove_from_hosts "{host}""#)).await?;
        Ok(())
    }
}
