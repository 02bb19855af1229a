//! An in-memory [`super::HostStorage`] that forgets everything on restart
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::HostStorage;
use crate::Error;

/// In-memory additional hosts storage; lost on restart
#[derive(Default)]
pub struct MemoryHostStorage {
    hosts: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryHostStorage {
    pub fn new() -> Self {
        MemoryHostStorage::default()
    }
}

#[async_trait]
impl HostStorage for MemoryHostStorage {
    async fn add_host(&self, host: &str) -> Result<(), Error> {
        let mut hosts = self.hosts.lock().await;
        if hosts.contains_key(host) {
            return Err(Error::scaling(format!(
                "host with name '{host}' is already in the host storage"
            )));
        }
        hosts.insert(host.to_string(), Utc::now());
        Ok(())
    }

    async fn remove_host(&self, host: &str) -> Result<(), Error> {
        let mut hosts = self.hosts.lock().await;
        if hosts.remove(host).is_none() {
            return Err(Error::scaling(format!(
                "host with name '{host}' doesn't exist in the host storage"
            )));
        }
        Ok(())
    }

    async fn update_hosts_activity(&self, update: &[String], timestamp: DateTime<Utc>) -> Result<(), Error> {
        let mut hosts = self.hosts.lock().await;
        for host in update {
            if let Some(existing) = hosts.get_mut(host) {
                *existing = timestamp;
            }
        }
        Ok(())
    }

    async fn get_hosts_activity(&self, lookup: &[String]) -> Result<HashMap<String, DateTime<Utc>>, Error> {
        let hosts = self.hosts.lock().await;
        let mut activity = HashMap::new();
        for host in lookup {
            let timestamp = hosts.get(host).copied().ok_or_else(|| {
                Error::scaling(format!("host with name '{host}' doesn't exist in the host storage"))
            })?;
            activity.insert(host.clone(), timestamp);
        }
        Ok(activity)
    }

    async fn load_hosts(&self) -> Result<Vec<String>, Error> {
        Ok(self.hosts.lock().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.hosts.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adding_a_duplicate_host_is_an_error() {
        let storage = MemoryHostStorage::new();
        storage.add_host("worker-1").await.unwrap();
        assert!(storage.add_host("worker-1").await.is_err());
    }

    #[tokio::test]
    async fn removing_an_unknown_host_is_an_error() {
        let storage = MemoryHostStorage::new();
        assert!(storage.remove_host("worker-1").await.is_err());
    }

    #[tokio::test]
    async fn activity_updates_only_touch_tracked_hosts() {
        let storage = MemoryHostStorage::new();
        storage.add_host("worker-1").await.unwrap();
        let timestamp = Utc::now();
        storage
            .update_hosts_activity(&["worker-1".to_string(), "worker-2".to_string()], timestamp)
            .await
            .unwrap();
        let activity = storage.get_hosts_activity(&["worker-1".to_string()]).await.unwrap();
        assert_eq!(activity["worker-1"], timestamp);
    }
}
