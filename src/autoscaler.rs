//! Decides whether to scale up, scale down, or do nothing this tick
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::demand::selector::DemandSelector;
use crate::demand::validator::JobValidator;
use crate::grid_engine::GridEngine;
use crate::host_storage::HostStorage;
use crate::models::job::{Job, JobState};
use crate::models::resource::ResourceSupply;
use crate::scale_down::ScaleDownOrchestrator;
use crate::scale_up::{total_integral_demand, ScaleUpOrchestrator};
use crate::Error;

/// Scales up additional workers when jobs have been waiting too long, and
/// scales down idle ones when nothing has run recently
///
/// Grounded on the original's `GridEngineAutoscaler`.
pub struct Autoscaler {
    grid_engine: Arc<GridEngine>,
    host_storage: Arc<dyn HostStorage>,
    static_host_storage: Arc<dyn HostStorage>,
    scale_up_orchestrator: Arc<ScaleUpOrchestrator>,
    scale_down_orchestrator: Arc<ScaleDownOrchestrator>,
    scale_up_timeout: Duration,
    scale_down_timeout: Duration,
    idle_timeout: Duration,
    max_additional_hosts: u32,
    instance_max_supply: ResourceSupply,
    cluster_max_supply: ResourceSupply,
    latest_running_job: Mutex<Option<Job>>,
}

impl Autoscaler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid_engine: Arc<GridEngine>,
        host_storage: Arc<dyn HostStorage>,
        static_host_storage: Arc<dyn HostStorage>,
        scale_up_orchestrator: Arc<ScaleUpOrchestrator>,
        scale_down_orchestrator: Arc<ScaleDownOrchestrator>,
        scale_up_timeout: i64,
        scale_down_timeout: i64,
        idle_timeout: i64,
        max_additional_hosts: u32,
        instance_max_supply: ResourceSupply,
        cluster_max_supply: ResourceSupply,
    ) -> Self {
        Autoscaler {
            grid_engine,
            host_storage,
            static_host_storage,
            scale_up_orchestrator,
            scale_down_orchestrator,
            scale_up_timeout: Duration::seconds(scale_up_timeout),
            scale_down_timeout: Duration::seconds(scale_down_timeout),
            idle_timeout: Duration::seconds(idle_timeout),
            max_additional_hosts,
            instance_max_supply,
            cluster_max_supply,
            latest_running_job: Mutex::new(None),
        }
    }

    pub async fn scale(&self) -> Result<(), Error> {
        let now = Utc::now();
        info!("starting scaling");
        let additional_hosts = self.host_storage.load_hosts().await?;
        info!(count = additional_hosts.len(), max = self.max_additional_hosts, "additional workers tracked");
        let updated_jobs = self.grid_engine.get_jobs().await?;
        let running_jobs: Vec<Job> = updated_jobs
            .iter()
            .filter(|job| job.state == JobState::Running)
            .cloned()
            .collect();
        if !running_jobs.is_empty() {
            self.host_storage.update_running_jobs_host_activity(&running_jobs, now).await?;
            self.static_host_storage.update_running_jobs_host_activity(&running_jobs, now).await?;
            let latest = running_jobs.iter().max_by_key(|job| job.datetime).cloned();
            *self.latest_running_job.lock().await = latest;
        }
        if self.max_additional_hosts == 0 {
            info!("finished scaling");
            return Ok(());
        }
        let pending_jobs: Vec<Job> = updated_jobs
            .into_iter()
            .filter(|job| job.state == JobState::Pending)
            .collect();
        let waiting_jobs = self.valid_jobs(pending_jobs).await?;
        info!(count = waiting_jobs.len(), "waiting jobs found");
        if !waiting_jobs.is_empty() {
            let expired_jobs: Vec<&Job> = waiting_jobs
                .iter()
                .filter(|job| now >= job.datetime + self.scale_up_timeout)
                .collect();
            if !expired_jobs.is_empty() {
                info!(
                    count = expired_jobs.len(),
                    timeout = self.scale_up_timeout.num_seconds(),
                    "waiting jobs exceed the scale up timeout"
                );
                if (additional_hosts.len() as u32) < self.max_additional_hosts {
                    info!(current = additional_hosts.len(), max = self.max_additional_hosts, "scaling up");
                    let demand_selector = DemandSelector::new(&self.grid_engine);
                    let resource_demands = demand_selector.select(&waiting_jobs).await?;
                    let resource_demand = total_integral_demand(&resource_demands);
                    info!(
                        cpu = resource_demand.resources.cpu,
                        gpu = resource_demand.resources.gpu,
                        mem = resource_demand.resources.mem,
                        "waiting jobs require resources"
                    );
                    let remaining = self.max_additional_hosts - additional_hosts.len() as u32;
                    self.scale_up_orchestrator.scale_up(resource_demands, remaining as usize).await?;
                } else {
                    warn!(
                        current = additional_hosts.len(),
                        max = self.max_additional_hosts,
                        "scaling up is aborted, a deadlock is suspected, scaling down will be attempted"
                    );
                    self.scale_down(&running_jobs, &additional_hosts, None).await?;
                }
            } else {
                info!("no waiting jobs exceed the scale up timeout");
            }
        } else {
            let latest_running_job = self.latest_running_job.lock().await.clone();
            match latest_running_job {
                Some(job) => {
                    if now >= job.datetime + self.scale_down_timeout {
                        info!(job_id = %job.id, "latest job started long enough ago, scaling down");
                        self.scale_down(&running_jobs, &additional_hosts, Some(now)).await?;
                    } else {
                        info!(job_id = %job.id, "latest job started recently, scaling down is not required");
                    }
                }
                None => {
                    info!("no previously running jobs, scaling down");
                    self.scale_down(&running_jobs, &additional_hosts, Some(now)).await?;
                }
            }
        }
        let post_scale_additional_hosts = self.host_storage.load_hosts().await?;
        info!(count = post_scale_additional_hosts.len(), max = self.max_additional_hosts, "finished scaling");
        Ok(())
    }

    async fn valid_jobs(&self, jobs: Vec<Job>) -> Result<Vec<Job>, Error> {
        let count = jobs.len();
        info!(count, "validating jobs");
        let validator = JobValidator::new(&self.grid_engine, self.instance_max_supply.clone(), self.cluster_max_supply.clone());
        let (valid_jobs, invalid_jobs) = validator.validate(jobs).await?;
        if !invalid_jobs.is_empty() {
            let ids: Vec<&str> = invalid_jobs.iter().map(|job| job.id.as_str()).collect();
            warn!(jobs = ids.join(", #"), "jobs cannot be satisfied and will be killed");
            self.grid_engine.kill_jobs(&invalid_jobs, false).await?;
        }
        Ok(valid_jobs)
    }

    async fn scale_down(
        &self,
        running_jobs: &[Job],
        additional_hosts: &[String],
        scaling_period_start: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let active_hosts: std::collections::HashSet<&str> = running_jobs
            .iter()
            .flat_map(|job| job.hosts.iter().map(String::as_str))
            .collect();
        let mut inactive: Vec<String> = additional_hosts
            .iter()
            .filter(|host| !active_hosts.contains(host.as_str()))
            .cloned()
            .collect();
        if !inactive.is_empty() {
            info!(count = inactive.len(), "inactive additional workers found");
            if let Some(scaling_period_start) = scaling_period_start {
                inactive = self.filter_idle_hosts(inactive, scaling_period_start).await?;
                info!(count = inactive.len(), "idle additional workers found");
            }
        }
        if inactive.is_empty() {
            info!("there are no additional workers to scale down, scaling down is aborted");
            return Ok(());
        }
        info!("scaling down will be performed");
        self.scale_down_orchestrator.scale_down(inactive).await
    }

    async fn filter_idle_hosts(
        &self,
        candidates: Vec<String>,
        scaling_period_start: DateTime<Utc>,
    ) -> Result<Vec<String>, Error> {
        let activity = self.host_storage.get_hosts_activity(&candidates).await?;
        Ok(activity
            .into_iter()
            .filter(|(_, last_activity)| scaling_period_start >= *last_activity + self.idle_timeout)
            .map(|(host, _)| host)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::cloud::{PipeCli, PipeCliApi, PipelineClient};
    use crate::cmd::fake::FakeCmdExecutor;
    use crate::demand::Demand;
    use crate::host_storage::MemoryHostStorage;
    use crate::instances::selector::InstanceSelector;
    use crate::models::instance::InstanceDemand;
    use crate::scale_down::handler::ScaleDownHandler;
    use crate::scale_up::handler::ScaleUpHandler;
    use crate::scale_up::orchestrator::ScaleUpOrchestrator;
    use crate::worker_recorder::CloudPipelineWorkerRecorder;
    use crate::worker_tags::WorkerTagsHandler;

    struct NoopInstanceSelector;

    #[async_trait]
    impl InstanceSelector for NoopInstanceSelector {
        async fn select(&self, _demands: &[Demand]) -> Result<Vec<InstanceDemand>, Error> {
            Ok(Vec::new())
        }
    }

    const QSTAT_EMPTY: &str = r#"<job_info><queue_info></queue_info><job_info></job_info></job_info>"#;

    fn build_autoscaler(
        fake: Arc<FakeCmdExecutor>,
        host_storage: Arc<dyn HostStorage>,
        max_additional_hosts: u32,
    ) -> Autoscaler {
        let grid_engine = Arc::new(GridEngine::new(
            fake.clone(),
            "main.q".to_string(),
            "@allhosts".to_string(),
            true,
            "gpus".to_string(),
            "ram".to_string(),
        ));
        let pipe: Arc<dyn PipeCliApi> = Arc::new(PipeCli::new(fake.clone()));
        let api = Arc::new(PipelineClient::new("http://localhost".to_string(), "token".to_string()).unwrap());
        let static_host_storage: Arc<dyn HostStorage> = Arc::new(MemoryHostStorage::new());

        let scale_up_handler = Arc::new(ScaleUpHandler::new(
            fake.clone(),
            api.clone(),
            pipe.clone(),
            grid_engine.clone(),
            host_storage.clone(),
            "parent-run".to_string(),
            50,
            "image".to_string(),
            "bash".to_string(),
            crate::models::instance::PriceType::OnDemand,
            "region-1".to_string(),
            "CP_CAP_AUTOSCALE_OWNER".to_string(),
            1,
            1,
            HashMap::new(),
        ));
        let worker_tags_handler = Arc::new(WorkerTagsHandler::new(
            api.clone(),
            host_storage.clone(),
            static_host_storage.clone(),
            600,
        ));
        let worker_recorder = Arc::new(CloudPipelineWorkerRecorder::new(api));
        let scale_up_orchestrator = Arc::new(ScaleUpOrchestrator::new(
            scale_up_handler,
            grid_engine.clone(),
            host_storage.clone(),
            static_host_storage.clone(),
            worker_tags_handler,
            Arc::new(NoopInstanceSelector),
            worker_recorder,
            1,
            1,
        ));

        let scale_down_handler = Arc::new(ScaleDownHandler::new(fake, pipe, grid_engine.clone()));
        let scale_down_orchestrator = Arc::new(ScaleDownOrchestrator::new(
            scale_down_handler,
            grid_engine.clone(),
            host_storage.clone(),
            10,
        ));

        Autoscaler::new(
            grid_engine,
            host_storage,
            static_host_storage,
            scale_up_orchestrator,
            scale_down_orchestrator,
            30,
            60,
            120,
            max_additional_hosts,
            ResourceSupply::new(4, 0, 0),
            ResourceSupply::new(100, 0, 0),
        )
    }

    /// With every additional host slot already taken and a waiting job past
    /// the scale-up timeout, scaling up would only deadlock -- the
    /// autoscaler breaks it by scaling down instead, without filtering by
    /// idle time first.
    #[tokio::test]
    async fn deadlock_with_expired_waiting_job_triggers_unconditional_scale_down() {
        let fake = Arc::new(FakeCmdExecutor::new());
        let old_submission = (Utc::now() - Duration::seconds(300))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let qstat_pending = format!(
            r#"<job_info>
              <queue_info></queue_info>
              <job_info>
                <job_list>
                  <JB_job_number>55</JB_job_number>
                  <JB_name>waiting</JB_name>
                  <JB_owner>dave</JB_owner>
                  <state>qw</state>
                  <JB_submission_time>{old_submission}</JB_submission_time>
                </job_list>
              </job_info>
            </job_info>"#
        );
        // Autoscaler::scale's own get_jobs
        fake.push_ok(qstat_pending.as_str());
        // valid_jobs's JobValidator::validate -> get_pe_allocation_rule("local")
        fake.push_ok("");
        // select_hosts_to_scale_down's get_host_supply
        fake.push_ok("");
        // ScaleDownHandler::scale_down's disable_host
        fake.push_ok("");
        // ScaleDownHandler::scale_down's get_jobs -- nothing left running
        fake.push_ok(QSTAT_EMPTY);
        // delete_host's five qconf steps
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        // pipe stop
        fake.push_ok("");
        // remove_host_from_hosts
        fake.push_ok("");

        let host_storage: Arc<dyn HostStorage> = Arc::new(MemoryHostStorage::new());
        host_storage.add_host("worker-1").await.unwrap();

        let autoscaler = build_autoscaler(fake, host_storage.clone(), 1);
        autoscaler.scale().await.unwrap();

        assert!(host_storage.load_hosts().await.unwrap().is_empty());
    }

    /// With no waiting jobs and no job having ever run, the autoscaler takes
    /// its "no previously running jobs" branch and scales down whichever
    /// additional hosts have been idle past the idle timeout.
    #[tokio::test]
    async fn idle_additional_host_is_scaled_down_after_timeout() {
        let fake = Arc::new(FakeCmdExecutor::new());
        // Autoscaler::scale's get_jobs -- nothing running or pending
        fake.push_ok(QSTAT_EMPTY);
        // select_hosts_to_scale_down's get_host_supply
        fake.push_ok("");
        // ScaleDownHandler::scale_down's disable_host
        fake.push_ok("");
        // ScaleDownHandler::scale_down's get_jobs -- nothing left running
        fake.push_ok(QSTAT_EMPTY);
        // delete_host's five qconf steps
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        fake.push_ok("");
        // pipe stop
        fake.push_ok("");
        // remove_host_from_hosts
        fake.push_ok("");

        let host_storage: Arc<dyn HostStorage> = Arc::new(MemoryHostStorage::new());
        host_storage.add_host("worker-1").await.unwrap();
        // backdate past the idle timeout (120s) so filter_idle_hosts keeps it
        host_storage
            .update_hosts_activity(&["worker-1".to_string()], Utc::now() - Duration::seconds(300))
            .await
            .unwrap();

        let autoscaler = build_autoscaler(fake, host_storage.clone(), 2);
        autoscaler.scale().await.unwrap();

        assert!(host_storage.load_hosts().await.unwrap().is_empty());
    }
}
