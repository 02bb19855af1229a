//! Launches and brings up a single additional worker
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cloud::{PipeCliApi, PipeRunArgs, PipelineClient};
use crate::cmd::CmdExecutor;
use crate::grid_engine::GridEngine;
use crate::host_storage::HostStorage;
use crate::models::instance::{Instance, PriceType};
use crate::models::pod::KubernetesPod;
use crate::Error;

const POLL_ATTEMPTS: u64 = 60;
const GE_POLL_TIMEOUT_SECS: u64 = 60;
const GE_POLL_ATTEMPTS: u64 = 6;

/// Brings a single additional worker from launch through Grid Engine
/// enablement, grounded on `GridEngineScaleUpHandler`
pub struct ScaleUpHandler {
    cmd: Arc<dyn CmdExecutor>,
    api: Arc<PipelineClient>,
    pipe: Arc<dyn PipeCliApi>,
    grid_engine: Arc<GridEngine>,
    host_storage: Arc<dyn HostStorage>,
    parent_run_id: String,
    instance_disk: u32,
    instance_image: String,
    cmd_template: String,
    price_type: PriceType,
    region_id: String,
    owner_param_name: String,
    polling_delay: u64,
    polling_timeout: u64,
    instance_launch_params: HashMap<String, String>,
}

impl ScaleUpHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cmd: Arc<dyn CmdExecutor>,
        api: Arc<PipelineClient>,
        pipe: Arc<dyn PipeCliApi>,
        grid_engine: Arc<GridEngine>,
        host_storage: Arc<dyn HostStorage>,
        parent_run_id: String,
        instance_disk: u32,
        instance_image: String,
        cmd_template: String,
        price_type: PriceType,
        region_id: String,
        owner_param_name: String,
        polling_delay: u64,
        polling_timeout: u64,
        instance_launch_params: HashMap<String, String>,
    ) -> Self {
        ScaleUpHandler {
            cmd,
            api,
            pipe,
            grid_engine,
            host_storage,
            parent_run_id,
            instance_disk,
            instance_image,
            cmd_template,
            price_type,
            region_id,
            owner_param_name,
            polling_delay,
            polling_timeout,
            instance_launch_params,
        }
    }

    fn attempts(&self, timeout: u64, fallback: u64) -> u64 {
        if self.polling_delay != 0 {
            timeout / self.polling_delay
        } else {
            fallback
        }
    }

    /// Scale up a single additional worker for `instance`, owned by `owner`.
    ///
    /// Notice that master hosts file is altered before an additional
    /// worker starts, so Grid Engine never sees it as an unresolvable
    /// hostname; and the worker is enabled in Grid Engine only after its
    /// run is fully initialized, since additional workers are disabled by
    /// default to prevent job submission to a not-yet-ready run.
    pub async fn scale_up(&self, instance: &Instance, owner: Option<String>) -> Result<String, Error> {
        info!(instance_type = %instance.name, "scaling up additional worker");
        let run_id = self.launch_additional_worker(instance, owner).await?;
        let host = self.retrieve_pod_name(&run_id).await?;
        self.host_storage.add_host(&host).await?;
        let pod = self.await_pod_initialization(&run_id).await?;
        self.add_worker_to_master_hosts(&pod).await?;
        self.await_worker_initialization(&run_id).await?;
        self.enable_worker_in_grid_engine(&pod).await?;
        info!(name = %pod.name, instance_type = %instance.name, "additional worker has been scaled up");
        Ok(run_id)
    }

    async fn launch_additional_worker(&self, instance: &Instance, owner: Option<String>) -> Result<String, Error> {
        let mut params = self.instance_launch_params.clone();
        params.insert(self.owner_param_name.clone(), owner.unwrap_or_default());
        let args = PipeRunArgs {
            instance_disk: self.instance_disk,
            instance_type: instance.name.clone(),
            instance_image: self.instance_image.clone(),
            cmd_template: self.cmd_template.clone(),
            parent_run_id: self.parent_run_id.clone(),
            price_type: self.price_type,
            region_id: self.region_id.clone(),
            params,
        };
        let run_id = self.pipe.run(&args).await?;
        info!(run_id = %run_id, instance_type = %instance.name, "additional worker has been launched");
        Ok(run_id)
    }

    async fn retrieve_pod_name(&self, run_id: &str) -> Result<String, Error> {
        let run = self.api.get_run(run_id).await?;
        run.pod_id
            .ok_or_else(|| Error::scaling(format!("additional worker #{run_id} has no pod name specified")))
    }

    async fn await_pod_initialization(&self, run_id: &str) -> Result<KubernetesPod, Error> {
        let mut attempts = self.attempts(self.polling_timeout, POLL_ATTEMPTS);
        while attempts != 0 {
            let run = self.api.get_run(run_id).await?;
            if run.status.as_deref().unwrap_or("RUNNING") != "RUNNING" {
                return Err(Error::scaling(format!(
                    "additional worker #{run_id} is not running, it has probably failed"
                )));
            }
            if let Some(pod_ip) = run.pod_ip {
                let pod = KubernetesPod {
                    ip: pod_ip,
                    name: run.pod_id.unwrap_or_default(),
                };
                info!(run_id, name = %pod.name, ip = %pod.ip, "additional worker pod has started");
                return Ok(pod);
            }
            attempts -= 1;
            tokio::time::sleep(std::time::Duration::from_secs(self.polling_delay)).await;
        }
        Err(Error::scaling(format!(
            "additional worker #{run_id} pod hasn't started after {} seconds",
            self.polling_timeout
        )))
    }

    async fn add_worker_to_master_hosts(&self, pod: &KubernetesPod) -> Result<(), Error> {
        self.cmd
            .execute(&format!(r#"add_to_hosts "{}" "{}""#, pod.name, pod.ip))
            .await?;
        Ok(())
    }

    async fn await_worker_initialization(&self, run_id: &str) -> Result<(), Error> {
        let mut attempts = self.attempts(self.polling_timeout, POLL_ATTEMPTS);
        while attempts > 0 {
            let run = self.api.get_run(run_id).await?;
            if run.status.as_deref().unwrap_or("RUNNING") != "RUNNING" {
                return Err(Error::scaling(format!(
                    "additional worker #{run_id} is not running, it has probably failed"
                )));
            }
            if run.initialized.unwrap_or(false) {
                let tasks = self.api.get_run_tasks(run_id).await?;
                if tasks.iter().any(|task| task.name == "SGEWorkerSetup" && task.status == "SUCCESS") {
                    info!(run_id, "additional worker has been initialized");
                    return Ok(());
                }
            }
            attempts -= 1;
            tokio::time::sleep(std::time::Duration::from_secs(self.polling_delay)).await;
        }
        Err(Error::scaling(format!(
            "additional worker #{run_id} hasn't been initialized after {} seconds",
            self.polling_timeout
        )))
    }

    async fn enable_worker_in_grid_engine(&self, pod: &KubernetesPod) -> Result<(), Error> {
        let mut attempts = self.attempts(GE_POLL_TIMEOUT_SECS, GE_POLL_ATTEMPTS);
        while attempts > 0 {
            match self.grid_engine.enable_host(&pod.name).await {
                Ok(()) => {
                    self.host_storage
                        .update_hosts_activity(&[pod.name.clone()], chrono::Utc::now())
                        .await?;
                    info!(name = %pod.name, "additional worker has been enabled in grid engine");
                    return Ok(());
                }
                Err(err) => {
                    warn!(name = %pod.name, error = %err, attempts, "enabling additional worker in grid engine has failed");
                    attempts -= 1;
                    tokio::time::sleep(std::time::Duration::from_secs(self.polling_delay)).await;
                }
            }
        }
        Err(Error::scaling(format!(
            "additional worker {} hasn't been enabled in grid engine after {GE_POLL_TIMEOUT_SECS} seconds",
            pod.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{PipeCli, PipelineClient};
    use crate::cmd::fake::FakeCmdExecutor;
    use crate::grid_engine::GridEngine;
    use crate::host_storage::MemoryHostStorage;
    use crate::models::instance::Instance;

    fn instance() -> Instance {
        Instance {
            name: "m5.xlarge".to_string(),
            price_type: PriceType::OnDemand,
            cpu: 4,
            gpu: 0,
            mem: 16,
        }
    }

    /// A job's owner, threaded all the way from its non-fractional resource
    /// demand, lands in the launch parameters the additional worker is
    /// started with -- not an empty string.
    #[tokio::test]
    async fn owner_reaches_the_launch_params() {
        let fake = Arc::new(FakeCmdExecutor::new());
        fake.push_ok("12345");

        let grid_engine = Arc::new(GridEngine::new(
            fake.clone(),
            "main.q".to_string(),
            "@allhosts".to_string(),
            true,
            "gpus".to_string(),
            "ram".to_string(),
        ));
        let pipe = Arc::new(PipeCli::new(fake.clone()));
        let api = Arc::new(PipelineClient::new("http://localhost".to_string(), "token".to_string()).unwrap());
        let host_storage = Arc::new(MemoryHostStorage::new());

        let handler = ScaleUpHandler::new(
            fake.clone(),
            api,
            pipe,
            grid_engine,
            host_storage,
            "parent-run".to_string(),
            50,
            "image".to_string(),
            "bash".to_string(),
            PriceType::OnDemand,
            "region-1".to_string(),
            "CP_CAP_AUTOSCALE_OWNER".to_string(),
            1,
            1,
            HashMap::new(),
        );

        let run_id = handler
            .launch_additional_worker(&instance(), Some("bob".to_string()))
            .await
            .unwrap();
        assert_eq!(run_id, "12345");

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("CP_CAP_AUTOSCALE_OWNER bob"));
    }
}
