//! Tracks which additional hosts exist and when they were last active
pub mod filesystem;
pub mod memory;
pub mod thread_safe;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::Job;
use crate::Error;

pub use filesystem::FileSystemHostStorage;
pub use memory::MemoryHostStorage;
pub use thread_safe::ThreadSafeHostStorage;

/// Tracks additional worker hosts and their last observed activity
///
/// Grounded on the original's `MemoryHostStorage`/`FileSystemHostStorage`
/// pair, both satisfying the same implicit interface.
#[async_trait]
pub trait HostStorage: Send + Sync {
    /// Register a newly launched host, initializing its activity to now
    async fn add_host(&self, host: &str) -> Result<(), Error>;

    /// Forget a host entirely
    async fn remove_host(&self, host: &str) -> Result<(), Error>;

    /// Bump the activity timestamp for every host hosting a running job
    async fn update_running_jobs_host_activity(
        &self,
        running_jobs: &[Job],
        timestamp: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut active_hosts = std::collections::HashSet::new();
        for job in running_jobs {
            active_hosts.extend(job.hosts.iter().cloned());
        }
        if !active_hosts.is_empty() {
            let hosts: Vec<String> = active_hosts.into_iter().collect();
            self.update_hosts_activity(&hosts, timestamp).await?;
        }
        Ok(())
    }

    /// Bump the activity timestamp for a specific set of hosts
    async fn update_hosts_activity(&self, hosts: &[String], timestamp: DateTime<Utc>) -> Result<(), Error>;

    /// Look up the last activity timestamp for a set of hosts
    async fn get_hosts_activity(&self, hosts: &[String]) -> Result<HashMap<String, DateTime<Utc>>, Error>;

    /// List every tracked hostname
    async fn load_hosts(&self) -> Result<Vec<String>, Error>;

    /// Forget every tracked host
    async fn clear(&self) -> Result<(), Error>;
}
