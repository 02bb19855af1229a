//! Builds the launch parameters passed through to every additional worker
use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::cloud::PipelineClient;

/// A single entry of the `launch.system.parameters` preference
#[derive(Deserialize, Debug, Clone)]
struct SystemLaunchParam {
    name: String,
    #[serde(rename = "passToWorkers", default)]
    pass_to_workers: bool,
}

/// Build the launch parameters every additional worker run is started with
///
/// Forwards whichever system launch parameters are marked `passToWorkers`,
/// resolving each from the process environment falling back to the master
/// run's own resolved parameters, then forces a fixed set of overrides so
/// workers never recursively autoscale themselves.
///
/// Grounded on the original's `fetch_instance_launch_params`.
pub async fn fetch_instance_launch_params(
    api: &PipelineClient,
    master_run_id: &str,
    queue: &str,
    hostlist: &str,
) -> HashMap<String, String> {
    let master_system_params = match api.get_run(master_run_id).await {
        Ok(run) => run
            .parameters
            .into_iter()
            .filter_map(|param| Some((param.name?, param.resolved_value.unwrap_or_default())))
            .collect::<HashMap<String, String>>(),
        Err(err) => {
            warn!(master_run_id, error = %err, "loading master run parameters has failed");
            HashMap::new()
        }
    };
    let raw = api.get_preference_string("launch.system.parameters", "[]").await;
    let system_launch_params: Vec<SystemLaunchParam> = serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(error = %err, "launch.system.parameters preference is not valid json");
        Vec::new()
    });

    let mut launch_params = HashMap::new();
    for param in system_launch_params {
        if !param.pass_to_workers {
            continue;
        }
        let value = std::env::var(&param.name)
            .ok()
            .or_else(|| master_system_params.get(&param.name).cloned())
            .unwrap_or_default();
        if value.is_empty() {
            continue;
        }
        launch_params.insert(param.name, value);
    }
    launch_params.insert("CP_CAP_SGE".to_string(), "false".to_string());
    launch_params.insert("CP_CAP_AUTOSCALE".to_string(), "false".to_string());
    launch_params.insert("CP_CAP_AUTOSCALE_WORKERS".to_string(), "0".to_string());
    launch_params.insert("CP_DISABLE_RUN_ENDPOINTS".to_string(), "true".to_string());
    launch_params.insert("CP_CAP_SGE_QUEUE_NAME".to_string(), queue.to_string());
    launch_params.insert("CP_CAP_SGE_HOSTLIST_NAME".to_string(), hostlist.to_string());
    launch_params.insert("cluster_role".to_string(), "worker".to_string());
    launch_params.insert("cluster_role_type".to_string(), "additional".to_string());
    launch_params
}
