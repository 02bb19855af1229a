//! Batch-coordinates scaling up several additional workers at once
use std::sync::Arc;

use tracing::info;

use crate::grid_engine::GridEngine;
use crate::host_storage::HostStorage;
use crate::instances::selector::InstanceSelector;
use crate::models::job::JobState;
use crate::models::resource::IntegralDemand;
use crate::worker_recorder::WorkerRecorder;
use crate::worker_tags::WorkerTagsHandler;
use crate::demand::Demand;
use crate::scale_up::handler::ScaleUpHandler;
use crate::Error;

const POLL_DELAY_SECS: u64 = 10;

/// Scales up no more than a batch of additional workers at once, waiting for
/// the whole batch to finish before returning
///
/// Grounded on the original's `GridEngineScaleUpOrchestrator`: every
/// in-flight launch runs on its own tokio task, and while the batch is
/// outstanding we keep nudging host activity and tags just like the
/// original's polling loop does between thread liveness checks.
pub struct ScaleUpOrchestrator {
    scale_up_handler: Arc<ScaleUpHandler>,
    grid_engine: Arc<GridEngine>,
    host_storage: Arc<dyn HostStorage>,
    static_host_storage: Arc<dyn HostStorage>,
    worker_tags_handler: Arc<WorkerTagsHandler>,
    instance_selector: Arc<dyn InstanceSelector>,
    worker_recorder: Arc<dyn WorkerRecorder>,
    batch_size: usize,
    polling_delay: u64,
}

impl ScaleUpOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scale_up_handler: Arc<ScaleUpHandler>,
        grid_engine: Arc<GridEngine>,
        host_storage: Arc<dyn HostStorage>,
        static_host_storage: Arc<dyn HostStorage>,
        worker_tags_handler: Arc<WorkerTagsHandler>,
        instance_selector: Arc<dyn InstanceSelector>,
        worker_recorder: Arc<dyn WorkerRecorder>,
        batch_size: usize,
        polling_delay: u64,
    ) -> Self {
        ScaleUpOrchestrator {
            scale_up_handler,
            grid_engine,
            host_storage,
            static_host_storage,
            worker_tags_handler,
            instance_selector,
            worker_recorder,
            batch_size,
            polling_delay: if polling_delay != 0 { polling_delay } else { POLL_DELAY_SECS },
        }
    }

    pub async fn scale_up(&self, resource_demands: Vec<Demand>, max_batch_size: usize) -> Result<(), Error> {
        let limit = self.batch_size.min(max_batch_size);
        let instance_demands = self.instance_selector.select(&resource_demands).await?;
        let instance_demands: Vec<_> = instance_demands.into_iter().take(limit).collect();
        if instance_demands.is_empty() {
            info!("there are no instance demands, scaling up is aborted");
            return Ok(());
        }
        let count = instance_demands.len();
        info!(count, "scaling up additional workers");

        let mut tasks = Vec::with_capacity(count);
        for demand in instance_demands {
            let handler = self.scale_up_handler.clone();
            tasks.push(tokio::spawn(async move {
                handler.scale_up(&demand.instance, demand.owner).await
            }));
        }

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(self.polling_delay)).await;
            let finished = tasks.iter().filter(|t| t.is_finished()).count();
            if finished == count {
                info!(count, "all additional workers have been scaled up");
                break;
            }
            info!(finished, count, "additional workers are still scaling up");
            self.update_last_activity_for_currently_running_jobs().await?;
            self.worker_tags_handler.process_tags().await;
        }

        info!(count, "recording details of additional workers");
        for task in tasks {
            match task.await? {
                Ok(run_id) => self.worker_recorder.record(&run_id).await,
                Err(err) => tracing::warn!(error = %err, "scaling up an additional worker has failed"),
            }
        }
        info!("additional worker details recording has finished");
        Ok(())
    }

    async fn update_last_activity_for_currently_running_jobs(&self) -> Result<(), Error> {
        let jobs = self.grid_engine.get_jobs().await?;
        let running: Vec<_> = jobs.into_iter().filter(|job| job.state == JobState::Running).collect();
        if !running.is_empty() {
            let now = chrono::Utc::now();
            self.host_storage.update_running_jobs_host_activity(&running, now).await?;
            self.static_host_storage.update_running_jobs_host_activity(&running, now).await?;
        }
        Ok(())
    }
}

/// Sums a list of demands into a single [`IntegralDemand`], matching the
/// original's `functools.reduce(operator.add, resource_demands, IntegralDemand())`
pub fn total_integral_demand(demands: &[Demand]) -> IntegralDemand {
    demands.iter().fold(IntegralDemand::default(), |total, demand| {
        let fractional = demand.as_fractional();
        IntegralDemand {
            resources: total.resources + fractional.resources,
            owner: total.owner,
        }
    })
}
