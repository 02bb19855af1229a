//! Serializes concurrent access to an inner [`super::HostStorage`]
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::HostStorage;
use crate::Error;

/// Wraps an inner [`HostStorage`] behind an async mutex so the concurrent
/// scale-up tasks spawned per instance demand never race on the same file or
/// map, mirroring the original's `ThreadSafeHostStorage` decorator
pub struct ThreadSafeHostStorage<S> {
    inner: Mutex<S>,
}

impl<S> ThreadSafeHostStorage<S> {
    pub fn new(inner: S) -> Self {
        ThreadSafeHostStorage {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl<S: HostStorage> HostStorage for ThreadSafeHostStorage<S> {
    async fn add_host(&self, host: &str) -> Result<(), Error> {
        self.inner.lock().await.add_host(host).await
    }

    async fn remove_host(&self, host: &str) -> Result<(), Error> {
        self.inner.lock().await.remove_host(host).await
    }

    async fn update_hosts_activity(&self, hosts: &[String], timestamp: DateTime<Utc>) -> Result<(), Error> {
        self.inner.lock().await.update_hosts_activity(hosts, timestamp).await
    }

    async fn get_hosts_activity(&self, hosts: &[String]) -> Result<HashMap<String, DateTime<Utc>>, Error> {
        self.inner.lock().await.get_hosts_activity(hosts).await
    }

    async fn load_hosts(&self) -> Result<Vec<String>, Error> {
        self.inner.lock().await.load_hosts().await
    }

    async fn clear(&self) -> Result<(), Error> {
        self.inner.lock().await.clear().await
    }
}
