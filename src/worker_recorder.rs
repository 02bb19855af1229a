//! Records the launch history of every additional worker this daemon has scaled up
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cloud::PipelineClient;
use crate::models::worker::{WorkerRecord, WorkerRecords};

const DEFAULT_CAPACITY: usize = 100;
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Tracks recently-launched additional workers, grounded on the original's
/// `GridEngineWorkerRecorder`/`CloudPipelineWorkerRecorder` pair
#[async_trait]
pub trait WorkerRecorder: Send + Sync {
    /// Fetch and record the current state of a run just launched for scale-up
    async fn record(&self, run_id: &str);
    /// All records currently held, oldest first
    async fn get(&self) -> Vec<WorkerRecord>;
    /// Forget everything recorded so far
    async fn clear(&self);
}

/// Records worker launch outcomes by polling the cloud pipeline API,
/// grounded on `CloudPipelineWorkerRecorder`
pub struct CloudPipelineWorkerRecorder {
    api: std::sync::Arc<PipelineClient>,
    records: Arc<Mutex<WorkerRecords>>,
}

impl CloudPipelineWorkerRecorder {
    pub fn new(api: std::sync::Arc<PipelineClient>) -> Self {
        CloudPipelineWorkerRecorder::with_capacity(api, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(api: std::sync::Arc<PipelineClient>, capacity: usize) -> Self {
        CloudPipelineWorkerRecorder {
            api,
            records: Arc::new(Mutex::new(WorkerRecords::new(capacity))),
        }
    }

    /// Share the underlying record set with an [`crate::instances::provider::AvailableInstanceProvider`],
    /// matching the original's `AvailableInstanceProvider` reading the same
    /// `GridEngineWorkerRecorder` instance the scale up orchestrator records into
    pub fn records_handle(&self) -> Arc<Mutex<WorkerRecords>> {
        self.records.clone()
    }

    fn to_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
        let raw = raw?;
        let naive = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).ok()?;
        Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
    }

    fn has_insufficient_instance_capacity(run: &crate::cloud::Run) -> bool {
        if run.status.as_deref() == Some("FAILURE")
            && run.state_reason_message.as_deref() == Some("Insufficient instance capacity.")
        {
            if let Some(instance) = &run.instance {
                warn!(instance_type = ?instance.node_type, "insufficient instance capacity detected");
            }
            return true;
        }
        false
    }
}

#[async_trait]
impl WorkerRecorder for CloudPipelineWorkerRecorder {
    async fn record(&self, run_id: &str) {
        info!(run_id, "recording details of additional worker");
        let run = match self.api.get_run(run_id).await {
            Ok(run) => run,
            Err(err) => {
                warn!(run_id, error = %err, "recording details of additional worker has failed");
                return;
            }
        };
        let record = WorkerRecord {
            run_id: run_id.to_string(),
            name: run.pod_id.clone(),
            instance_type: run.instance.as_ref().and_then(|i| i.node_type.clone()),
            started: Self::to_datetime(run.start_date.as_deref()),
            stopped: Self::to_datetime(run.end_date.as_deref()),
            has_insufficient_instance_capacity: Self::has_insufficient_instance_capacity(&run),
        };
        self.records.lock().await.push(record);
    }

    async fn get(&self) -> Vec<WorkerRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    async fn clear(&self) {
        self.records.lock().await.clear();
    }
}
