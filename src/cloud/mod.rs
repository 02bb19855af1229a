//! The cloud pipeline API client and `pipe` CLI wrapper
pub mod client;
pub mod pipe;

pub use client::{PipelineClient, Run, RunTask};
pub use pipe::{PipeCli, PipeCliApi, PipeRunArgs};

use async_trait::async_trait;
use serde_json::Value;

use crate::instances::provider::InstanceProvider;
use crate::models::instance::Instance;
use crate::Error;

/// Lists the instance types the cloud account is allowed to launch in a
/// region, filtered to a price type
pub struct CloudPipelineInstanceProvider {
    client: std::sync::Arc<PipelineClient>,
    region_id: String,
    spot: bool,
}

impl CloudPipelineInstanceProvider {
    pub fn new(client: std::sync::Arc<PipelineClient>, region_id: String, spot: bool) -> Self {
        CloudPipelineInstanceProvider {
            client,
            region_id,
            spot,
        }
    }
}

#[async_trait]
impl InstanceProvider for CloudPipelineInstanceProvider {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        let allowed = self
            .client
            .get_allowed_instance_types(&self.region_id, self.spot)
            .await?;
        let docker_types = allowed
            .get("cluster.allowed.instance.types.docker")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        docker_types
            .into_iter()
            .map(Instance::from_cp_response)
            .collect()
    }
}
