//! End-to-end scenarios strung together from the same pieces `main` wires up,
//! driven by a scripted [`FakeCmdExecutor`] instead of a real Grid Engine
//! cluster or `pipe` CLI.
use std::sync::Arc;

use async_trait::async_trait;
use ge_autoscaler::cloud::{PipeCli, PipeCliApi};
use ge_autoscaler::cmd::fake::FakeCmdExecutor;
use ge_autoscaler::demand::selector::DemandSelector;
use ge_autoscaler::demand::validator::JobValidator;
use ge_autoscaler::grid_engine::GridEngine;
use ge_autoscaler::host_storage::{HostStorage, MemoryHostStorage};
use ge_autoscaler::instances::provider::InstanceProvider;
use ge_autoscaler::instances::selector::{CpuCapacityInstanceSelector, InstanceSelector};
use ge_autoscaler::models::instance::{Instance, PriceType};
use ge_autoscaler::models::resource::ResourceSupply;
use ge_autoscaler::scale_down::handler::ScaleDownHandler;
use ge_autoscaler::scale_down::orchestrator::ScaleDownOrchestrator;
use ge_autoscaler::Error;

/// A fixed pool of instance types, standing in for the cloud pipeline API's
/// allowed-instance-types response
struct StaticInstanceProvider {
    instances: Vec<Instance>,
}

#[async_trait]
impl InstanceProvider for StaticInstanceProvider {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        Ok(self.instances.clone())
    }
}

fn small_instance() -> Instance {
    Instance {
        name: "m5.xlarge".to_string(),
        price_type: PriceType::OnDemand,
        cpu: 4,
        gpu: 0,
        mem: 16,
    }
}

const QSTAT_ONE_FILL_UP_JOB: &str = r#"
<job_info>
  <queue_info>
  </queue_info>
  <job_info>
    <job_list>
      <JB_job_number>100</JB_job_number>
      <JB_name>mpi-job</JB_name>
      <JB_owner>alice</JB_owner>
      <state>qw</state>
      <JB_submission_time>2024-01-01T00:00:00</JB_submission_time>
      <requested_pe name="mpi">8</requested_pe>
    </job_list>
  </job_info>
</job_info>
"#;

const QHOST_EMPTY: &str = r#"<qhost></qhost>"#;
const QSTAT_EMPTY: &str = r#"<job_info><queue_info></queue_info><job_info></job_info></job_info>"#;

/// A pending MPI job with no free cluster capacity survives validation and
/// turns into a fractional demand the selector can satisfy by picking two
/// of the only instance type available.
#[tokio::test]
async fn pending_mpi_job_selects_enough_instances_to_cover_its_demand() {
    let fake = Arc::new(FakeCmdExecutor::new());
    // get_jobs's qstat call
    fake.push_ok(QSTAT_ONE_FILL_UP_JOB);
    // JobValidator.validate's get_pe_allocation_rule
    fake.push_ok("allocation_rule        $fill_up");
    // DemandSelector.select's get_host_supplies, then its own get_pe_allocation_rule
    fake.push_ok(QHOST_EMPTY);
    fake.push_ok("allocation_rule        $fill_up");

    let grid_engine = GridEngine::new(
        fake.clone(),
        "main.q".to_string(),
        "@allhosts".to_string(),
        true,
        "gpus".to_string(),
        "ram".to_string(),
    );

    let jobs = grid_engine.get_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cpu, 8);

    let cluster_max_supply = ResourceSupply::new(100, 0, 0);
    let instance_max_supply = ResourceSupply::new(4, 0, 0);
    let validator = JobValidator::new(&grid_engine, instance_max_supply, cluster_max_supply);
    let (valid_jobs, invalid_jobs) = validator.validate(jobs).await.unwrap();
    assert_eq!(valid_jobs.len(), 1);
    assert!(invalid_jobs.is_empty());

    let selector = DemandSelector::new(&grid_engine);
    let demands = selector.select(&valid_jobs).await.unwrap();
    assert_eq!(demands.len(), 1);
    assert_eq!(demands[0].cpu(), 8);

    let provider = StaticInstanceProvider {
        instances: vec![small_instance()],
    };
    let instance_selector = CpuCapacityInstanceSelector {
        provider,
        reserved_supply: ResourceSupply::default(),
    };
    let picked = instance_selector.select(&demands).await.unwrap();
    let total_cpu: u32 = picked.iter().map(|d| d.instance.cpu).sum();
    assert!(total_cpu >= 8, "picked instances should cover the job's demand");
    assert!(picked.iter().all(|d| d.instance.name == "m5.xlarge"));
}

/// An MPI job that no instance, even fully dedicated, could ever satisfy is
/// rejected up front instead of being handed to the selector.
#[tokio::test]
async fn job_exceeding_cluster_capacity_is_invalid() {
    let fake = Arc::new(FakeCmdExecutor::new());
    fake.push_ok("allocation_rule        $fill_up");

    let grid_engine = GridEngine::new(
        fake,
        "main.q".to_string(),
        "@allhosts".to_string(),
        true,
        "gpus".to_string(),
        "ram".to_string(),
    );

    let job = ge_autoscaler::models::job::Job {
        id: "200".to_string(),
        root_id: "200".to_string(),
        name: "huge".to_string(),
        user: "bob".to_string(),
        state: ge_autoscaler::models::job::JobState::Pending,
        datetime: chrono::Utc::now(),
        hosts: Vec::new(),
        cpu: 1000,
        gpu: 0,
        mem: 0,
        pe: "mpi".to_string(),
    };

    let validator = JobValidator::new(&grid_engine, ResourceSupply::new(4, 0, 0), ResourceSupply::new(64, 0, 0));
    let (valid_jobs, invalid_jobs) = validator.validate(vec![job]).await.unwrap();
    assert!(valid_jobs.is_empty());
    assert_eq!(invalid_jobs.len(), 1);
}

/// An idle additional worker with no jobs left on it is fully torn down:
/// disabled, confirmed job-free, removed from Grid Engine, its run stopped,
/// and dropped from host storage.
#[tokio::test]
async fn idle_worker_is_scaled_down_end_to_end() {
    let fake = Arc::new(FakeCmdExecutor::new());
    // select_hosts_to_scale_down's get_host_supply (qconf -se)
    fake.push_ok("");
    // disable_host
    fake.push_ok("");
    // get_jobs -- no jobs left anywhere
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
    host_storage.add_host("worker-42").await.unwrap();

    let scale_down_handler = Arc::new(ScaleDownHandler::new(fake, pipe, grid_engine.clone()));
    let orchestrator = ScaleDownOrchestrator::new(
        scale_down_handler,
        grid_engine,
        host_storage.clone(),
        10,
    );

    orchestrator.scale_down(vec!["worker-42".to_string()]).await.unwrap();

    assert!(host_storage.load_hosts().await.unwrap().is_empty());
}

/// A worker that disabling reveals is still running jobs is re-enabled and
/// left alone instead of being torn down.
#[tokio::test]
async fn worker_still_running_jobs_is_not_scaled_down() {
    let fake = Arc::new(FakeCmdExecutor::new());
    // select_hosts_to_scale_down's get_host_supply (qconf -se)
    fake.push_ok("");
    // disable_host
    fake.push_ok("");
    // get_jobs -- one job still running on worker-7
    let qstat = r#"
    <job_info>
      <queue_info>
        <Queue-List>
          <name>main.q@worker-7</name>
          <job_list>
            <JB_job_number>9</JB_job_number>
            <JB_name>running</JB_name>
            <JB_owner>carol</JB_owner>
            <state>r</state>
            <JAT_start_time>2024-01-01T00:00:00</JAT_start_time>
          </job_list>
        </Queue-List>
      </queue_info>
      <job_info>
      </job_info>
    </job_info>
    "#;
    fake.push_ok(qstat);
    // enable_host
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
    host_storage.add_host("worker-7").await.unwrap();

    let scale_down_handler = Arc::new(ScaleDownHandler::new(fake, pipe, grid_engine.clone()));
    let orchestrator = ScaleDownOrchestrator::new(scale_down_handler, grid_engine, host_storage.clone(), 10);

    orchestrator.scale_down(vec!["worker-7".to_string()]).await.unwrap();

    // the host was never removed from storage since it's still doing work
    assert_eq!(host_storage.load_hosts().await.unwrap(), vec!["worker-7".to_string()]);
}
