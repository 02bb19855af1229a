//! Batch-coordinates scaling down several idle additional workers
use std::sync::Arc;

use tracing::{info, warn};

use crate::grid_engine::GridEngine;
use crate::host_storage::HostStorage;
use crate::scale_down::handler::ScaleDownHandler;
use crate::Error;

/// Scales down no more than a configured batch of additional workers at a
/// time, biggest hosts first, grounded on the original's
/// `GridEngineScaleDownOrchestrator`
pub struct ScaleDownOrchestrator {
    scale_down_handler: Arc<ScaleDownHandler>,
    grid_engine: Arc<GridEngine>,
    host_storage: Arc<dyn HostStorage>,
    batch_size: usize,
}

impl ScaleDownOrchestrator {
    pub fn new(
        scale_down_handler: Arc<ScaleDownHandler>,
        grid_engine: Arc<GridEngine>,
        host_storage: Arc<dyn HostStorage>,
        batch_size: usize,
    ) -> Self {
        ScaleDownOrchestrator {
            scale_down_handler,
            grid_engine,
            host_storage,
            batch_size,
        }
    }

    pub async fn scale_down(&self, inactive_additional_hosts: Vec<String>) -> Result<(), Error> {
        let hosts = self.select_hosts_to_scale_down(inactive_additional_hosts).await?;
        let hosts: Vec<String> = hosts.into_iter().take(self.batch_size).collect();
        let count = hosts.len();
        info!(count, "scaling down additional workers");
        for (finished, host) in hosts.into_iter().enumerate() {
            match self.scale_down_handler.scale_down(&host).await {
                Ok(true) => {
                    self.host_storage.remove_host(&host).await?;
                }
                Ok(false) => {}
                Err(err) => warn!(%host, error = %err, "scaling down additional worker has failed"),
            }
            if finished + 1 < count {
                info!(finished = finished + 1, count, "additional workers scaled down so far");
            }
        }
        info!(count, "all additional workers have been scaled down");
        Ok(())
    }

    /// Order candidates by descending host supply, matching the original's
    /// `sorted(hosts, key=grid_engine.get_host_supply, reverse=True)`
    async fn select_hosts_to_scale_down(&self, hosts: Vec<String>) -> Result<Vec<String>, Error> {
        let mut ranked = Vec::with_capacity(hosts.len());
        for host in hosts {
            let supply = self.grid_engine.get_host_supply(&host).await?;
            ranked.push((supply.resources.cpu, host));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(ranked.into_iter().map(|(_, host)| host).collect())
    }
}
