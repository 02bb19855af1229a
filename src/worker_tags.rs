//! Tags additional worker runs while a job is actively running on them
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cloud::PipelineClient;
use crate::host_storage::HostStorage;
use crate::Error;

const WORKER_TAG: &str = "SGE_IN_USE";

/// Extract the run id embedded in an additional worker's hostname
///
/// Additional worker hosts are named `<prefix>-<run_id>`; the run id is
/// always the last dash-separated element.
pub fn run_id_from_host(host: &str) -> &str {
    host.rsplit('-').next().unwrap_or(host)
}

#[derive(Debug, Clone, Default)]
struct LastActionMarker {
    last_action_timestamp: Option<DateTime<Utc>>,
    last_tag_timestamp: Option<DateTime<Utc>>,
}

/// Tags active additional workers with [`WORKER_TAG`] so they're visible to
/// operators browsing runs, untagging them once they go idle
///
/// Grounded on the original's `GridEngineWorkerTagsHandler`.
pub struct WorkerTagsHandler {
    api: std::sync::Arc<PipelineClient>,
    host_storage: std::sync::Arc<dyn HostStorage>,
    static_host_storage: std::sync::Arc<dyn HostStorage>,
    tagging_active_timeout: Duration,
    last_monitored_hosts: Mutex<HashMap<String, LastActionMarker>>,
}

impl WorkerTagsHandler {
    pub fn new(
        api: std::sync::Arc<PipelineClient>,
        host_storage: std::sync::Arc<dyn HostStorage>,
        static_host_storage: std::sync::Arc<dyn HostStorage>,
        tagging_active_timeout: i64,
    ) -> Self {
        WorkerTagsHandler {
            api,
            host_storage,
            static_host_storage,
            tagging_active_timeout: Duration::seconds(tagging_active_timeout),
            last_monitored_hosts: Mutex::new(HashMap::new()),
        }
    }

    fn run_is_active(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        timestamp > now - self.tagging_active_timeout
    }

    /// Process current host activity and sync worker tags; never propagates
    /// an error, matching the original's blanket `except Exception` guard
    /// around the whole tick.
    pub async fn process_tags(&self) {
        if let Err(err) = self.process_tags_inner().await {
            warn!(error = %err, "tags processing has failed");
        }
    }

    async fn process_tags_inner(&self) -> Result<(), Error> {
        info!("starting tags processing");
        let static_hosts = self.static_host_storage.load_hosts().await?;
        let mut current_hosts = self.host_storage.load_hosts().await?;
        let mut hosts_activity = self.host_storage.get_hosts_activity(&current_hosts).await?;
        hosts_activity.extend(self.static_host_storage.get_hosts_activity(&static_hosts).await?);
        let monitored_hosts: Vec<String> = self.last_monitored_hosts.lock().await.keys().cloned().collect();
        current_hosts.extend(static_hosts);
        self.process_current_hosts(&current_hosts, &hosts_activity).await?;
        self.process_outdated_hosts(&monitored_hosts, &current_hosts).await?;
        info!("tags processing finished");
        Ok(())
    }

    async fn process_current_hosts(
        &self,
        current_hosts: &[String],
        hosts_activity: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), Error> {
        let now = Utc::now();
        for host in current_hosts {
            let Some(&timestamp) = hosts_activity.get(host) else {
                continue;
            };
            let mut monitored = self.last_monitored_hosts.lock().await;
            let Some(marker) = monitored.get(host).cloned() else {
                monitored.insert(host.clone(), LastActionMarker::default());
                continue;
            };
            drop(monitored);
            if self.run_is_active(timestamp, now) {
                if marker.last_tag_timestamp.is_none() {
                    info!(%host, "adding tag to run");
                    self.tag_run(host, timestamp, now).await?;
                }
                continue;
            }
            if marker.last_tag_timestamp.is_some() {
                self.untag_run(host, Some(timestamp)).await?;
            }
        }
        Ok(())
    }

    async fn process_outdated_hosts(&self, monitored_hosts: &[String], current_hosts: &[String]) -> Result<(), Error> {
        for host in monitored_hosts {
            if !current_hosts.contains(host) {
                self.untag_run(host, None).await?;
            }
        }
        Ok(())
    }

    async fn tag_run(&self, host: &str, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), Error> {
        let run_id = run_id_from_host(host);
        self.add_worker_tag(run_id).await?;
        let mut monitored = self.last_monitored_hosts.lock().await;
        monitored.insert(
            host.to_string(),
            LastActionMarker {
                last_action_timestamp: Some(timestamp),
                last_tag_timestamp: Some(now),
            },
        );
        Ok(())
    }

    async fn untag_run(&self, host: &str, timestamp: Option<DateTime<Utc>>) -> Result<(), Error> {
        info!(%host, "removing tag from run");
        let run_id = run_id_from_host(host);
        self.remove_worker_tag(run_id).await?;
        let mut monitored = self.last_monitored_hosts.lock().await;
        match timestamp {
            Some(timestamp) => {
                monitored.insert(
                    host.to_string(),
                    LastActionMarker {
                        last_action_timestamp: Some(timestamp),
                        last_tag_timestamp: None,
                    },
                );
            }
            None => {
                monitored.remove(host);
            }
        }
        Ok(())
    }

    async fn add_worker_tag(&self, run_id: &str) -> Result<(), Error> {
        let run = self.api.get_run(run_id).await?;
        let mut tags = self.run_tags(&run);
        tags.insert(WORKER_TAG.to_string(), "true".to_string());
        self.api.put_run_tags(run_id, tags).await
    }

    async fn remove_worker_tag(&self, run_id: &str) -> Result<(), Error> {
        let run = self.api.get_run(run_id).await?;
        let mut tags = self.run_tags(&run);
        if tags.remove(WORKER_TAG).is_some() {
            self.api.put_run_tags(run_id, tags).await?;
        }
        Ok(())
    }

    fn run_tags(&self, run: &crate::cloud::Run) -> HashMap<String, String> {
        run.tags.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_the_trailing_host_segment() {
        assert_eq!(run_id_from_host("ip-10-0-0-1-42"), "42");
        assert_eq!(run_id_from_host("pipeline-123"), "123");
    }
}
