//! The cloud pipeline HTTP API client
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::Error;

const NUMBER_OF_RETRIES: u32 = 10;
const SECS_TO_WAIT_BEFORE_RETRY: u64 = 15;

/// A run's instance details, the subset this daemon reads
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RunInstance {
    #[serde(rename = "nodeType")]
    pub node_type: Option<String>,
}

/// A cloud pipeline run, the subset this daemon reads
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Run {
    pub status: Option<String>,
    #[serde(rename = "podId")]
    pub pod_id: Option<String>,
    #[serde(rename = "podIP")]
    pub pod_ip: Option<String>,
    pub initialized: Option<bool>,
    pub instance: Option<RunInstance>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(rename = "stateReasonMessage")]
    pub state_reason_message: Option<String>,
    #[serde(rename = "pipelineRunParameters", default)]
    pub parameters: Vec<RunParameter>,
    #[serde(default)]
    pub tags: Option<std::collections::HashMap<String, String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunParameter {
    pub name: Option<String>,
    #[serde(rename = "resolvedValue")]
    pub resolved_value: Option<String>,
}

/// A single run task, as returned by `GET /run/{id}/task`
#[derive(Deserialize, Debug, Clone)]
pub struct RunTask {
    pub name: String,
    pub status: String,
}

#[derive(Serialize, Debug)]
struct UpdateTagsBody {
    tags: std::collections::HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct ApiResponse {
    status: Option<String>,
    message: Option<String>,
    payload: Option<Value>,
}

/// A `reqwest`-backed client for the cloud pipeline HTTP API
///
/// Grounded on the original's `CloudPipelineAPI`/raw `pipe` client: every GET
/// is retried up to [`NUMBER_OF_RETRIES`] times with a fixed
/// [`SECS_TO_WAIT_BEFORE_RETRY`]-second backoff, and TLS verification is
/// disabled (`verify=False` in the original) since the cloud API commonly
/// terminates TLS with a self-signed certificate inside the cluster network.
pub struct PipelineClient {
    http: reqwest::Client,
    api: String,
    api_token: String,
}

impl PipelineClient {
    pub fn new(api: String, api_token: String) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(PipelineClient { http, api, api_token })
    }

    #[instrument(name = "cloud.get_run", skip(self))]
    pub async fn get_run(&self, run_id: &str) -> Result<Run, Error> {
        let url = format!("{}/run/{run_id}", self.api.trim_end_matches('/'));
        let payload = self.get(&url).await?;
        serde_json::from_value(payload).map_err(|err| Error::parsing(err.to_string()))
    }

    #[instrument(name = "cloud.get_run_tasks", skip(self))]
    pub async fn get_run_tasks(&self, run_id: &str) -> Result<Vec<RunTask>, Error> {
        let url = format!("{}/run/{run_id}/task", self.api.trim_end_matches('/'));
        let payload = self.get(&url).await?;
        serde_json::from_value(payload).map_err(|err| Error::parsing(err.to_string()))
    }

    #[instrument(name = "cloud.put_run_tags", skip(self, tags))]
    pub async fn put_run_tags(
        &self,
        run_id: &str,
        tags: std::collections::HashMap<String, String>,
    ) -> Result<(), Error> {
        let url = format!("{}/run/{run_id}/tags", self.api.trim_end_matches('/'));
        let body = UpdateTagsBody { tags };
        let mut last_err = None;
        for attempt in 1..=NUMBER_OF_RETRIES {
            let result = self
                .http
                .put(&url)
                .bearer_auth(&self.api_token)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    warn!(attempt, %status, "tag update request failed");
                    last_err = Some(Error::Api {
                        status: Some(status),
                        msg: None,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, "tag update request failed");
                    last_err = Some(Error::Reqwest(err));
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(SECS_TO_WAIT_BEFORE_RETRY)).await;
        }
        Err(last_err.unwrap_or_else(|| Error::new("tag update failed with no recorded error")))
    }

    /// List the instance types allowed for launch in a region, matching the
    /// original's `pipe.get_allowed_instance_types`
    #[instrument(name = "cloud.get_allowed_instance_types", skip(self))]
    pub async fn get_allowed_instance_types(&self, region_id: &str, spot: bool) -> Result<Value, Error> {
        let url = format!(
            "{}/cluster/instance/allowed?regionId={region_id}&spot={spot}",
            self.api.trim_end_matches('/')
        );
        self.get(&url).await
    }

    /// Fetch a named preference, falling back to `default` on any failure,
    /// matching the original's `retrieve_preference`
    #[instrument(name = "cloud.get_preference", skip(self))]
    pub async fn get_preference(&self, name: &str, default: i64) -> i64 {
        let url = format!("{}/preferences/{name}", self.api.trim_end_matches('/'));
        match self.get(&url).await {
            Ok(payload) => payload
                .get("value")
                .and_then(Value::as_str)
                .and_then(|value| value.parse().ok())
                .unwrap_or(default),
            Err(err) => {
                warn!(preference = %name, error = %err, default, "preference retrieval failed, using default");
                default
            }
        }
    }

    /// Fetch a named preference as a raw string, falling back to `default` on
    /// any failure, matching the original's `retrieve_preference`
    #[instrument(name = "cloud.get_preference_string", skip(self))]
    pub async fn get_preference_string(&self, name: &str, default: &str) -> String {
        let url = format!("{}/preferences/{name}", self.api.trim_end_matches('/'));
        match self.get(&url).await {
            Ok(payload) => payload
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| default.to_string()),
            Err(err) => {
                warn!(preference = %name, error = %err, default, "preference retrieval failed, using default");
                default.to_string()
            }
        }
    }

    /// Overwrite the three preference-sourced timeouts on an [`Autoscaling`]
    /// config, matching `main()`'s `api.retrieve_preference(...)` calls
    pub async fn load_preferences(&self, autoscaling: &mut crate::conf::Autoscaling) {
        autoscaling.scale_up_timeout = self.get_preference("ge.autoscaling.scale.up.timeout", 30).await;
        autoscaling.scale_down_timeout = self.get_preference("ge.autoscaling.scale.down.timeout", 30).await;
        autoscaling.scale_up_polling_timeout = self
            .get_preference("ge.autoscaling.scale.up.polling.timeout", 900)
            .await as u64;
    }

    async fn get(&self, url: &str) -> Result<Value, Error> {
        let mut last_err = None;
        for attempt in 1..=NUMBER_OF_RETRIES {
            match self.try_get(url).await {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    warn!(attempt, total = NUMBER_OF_RETRIES, error = %err, "api request failed");
                    last_err = Some(err);
                }
            }
            if attempt < NUMBER_OF_RETRIES {
                tokio::time::sleep(std::time::Duration::from_secs(SECS_TO_WAIT_BEFORE_RETRY)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| Error::new("request failed with no recorded error")))
    }

    async fn try_get(&self, url: &str) -> Result<Value, Error> {
        let response = self.http.get(url).bearer_auth(&self.api_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: Some(status),
                msg: None,
            });
        }
        let decoded: ApiResponse = response.json().await?;
        match decoded.status.as_deref() {
            None => Err(Error::Api {
                status: None,
                msg: Some("API responded without any status".to_string()),
            }),
            Some("OK") => decoded.payload.ok_or_else(|| Error::Api {
                status: None,
                msg: Some("API responded without a payload".to_string()),
            }),
            Some(status) => Err(Error::Api {
                status: None,
                msg: Some(match decoded.message {
                    Some(message) => format!("API responded with status {status} and error message: {message}"),
                    None => format!("API responded with status {status}"),
                }),
            }),
        }
    }
}
