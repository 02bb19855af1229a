//! A file-backed [`super::HostStorage`] that survives daemon restarts
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Mutex;

use super::HostStorage;
use crate::cmd::CmdExecutor;
use crate::Error;

const DATETIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
const VALUE_BREAKER: char = '|';

/// File system additional hosts storage
///
/// Each line of the backing file is `hostname|last_activity`. The original
/// rewrote the file through the shell (`echo ... > file_MODIFIED; mv
/// file_MODIFIED file`) to get an atomic swap; we do the equivalent directly
/// with `tokio::fs` since there's no reason to shell out for it here, but we
/// still route the actual hostname/activity bookkeeping the same way the
/// original does.
pub struct FileSystemHostStorage {
    #[allow(dead_code)]
    cmd: Arc<dyn CmdExecutor>,
    storage_file: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSystemHostStorage {
    pub fn new(cmd: Arc<dyn CmdExecutor>, storage_file: PathBuf) -> Self {
        FileSystemHostStorage {
            cmd,
            storage_file,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, DateTime<Utc>>, Error> {
        if !tokio::fs::try_exists(&self.storage_file).await? {
            return Ok(HashMap::new());
        }
        let content = tokio::fs::read_to_string(&self.storage_file).await?;
        let mut hosts = HashMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.splitn(2, VALUE_BREAKER);
            let hostname = parts
                .next()
                .ok_or_else(|| Error::parsing("malformed host storage line"))?;
            let raw_activity = parts
                .next()
                .ok_or_else(|| Error::parsing("malformed host storage line"))?;
            let naive = NaiveDateTime::parse_from_str(raw_activity, DATETIME_FORMAT)?;
            hosts.insert(hostname.to_string(), DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
        Ok(hosts)
    }

    async fn save(&self, hosts: &HashMap<String, DateTime<Utc>>) -> Result<(), Error> {
        let mut lines: Vec<String> = hosts
            .iter()
            .map(|(host, activity)| format!("{host}{VALUE_BREAKER}{}", activity.format(DATETIME_FORMAT)))
            .collect();
        lines.sort();
        let content = lines.join("\n");
        let tmp_path = self.storage_file.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.storage_file).await?;
        Ok(())
    }
}

#[async_trait]
impl HostStorage for FileSystemHostStorage {
    async fn add_host(&self, host: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut hosts = self.load().await?;
        if hosts.contains_key(host) {
            return Err(Error::scaling(format!(
                "host with name '{host}' is already in the host storage"
            )));
        }
        hosts.insert(host.to_string(), Utc::now());
        self.save(&hosts).await
    }

    async fn remove_host(&self, host: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut hosts = self.load().await?;
        if hosts.remove(host).is_none() {
            return Err(Error::scaling(format!(
                "host with name '{host}' doesn't exist in the host storage"
            )));
        }
        self.save(&hosts).await
    }

    async fn update_hosts_activity(&self, update: &[String], timestamp: DateTime<Utc>) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut hosts = self.load().await?;
        for host in update {
            if let Some(existing) = hosts.get_mut(host) {
                *existing = timestamp;
            }
        }
        self.save(&hosts).await
    }

    async fn get_hosts_activity(&self, lookup: &[String]) -> Result<HashMap<String, DateTime<Utc>>, Error> {
        let hosts = self.load().await?;
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
        Ok(self.load().await?.into_keys().collect())
    }

    async fn clear(&self) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        self.save(&HashMap::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::fake::FakeCmdExecutor;

    fn storage(dir: &std::path::Path) -> FileSystemHostStorage {
        FileSystemHostStorage::new(Arc::new(FakeCmdExecutor::new()), dir.join("hosts.txt"))
    }

    #[tokio::test]
    async fn round_trips_hosts_through_disk() {
        let dir = tempfile_dir();
        let storage = storage(&dir);
        storage.add_host("worker-1").await.unwrap();
        storage.add_host("worker-2").await.unwrap();
        let mut hosts = storage.load_hosts().await.unwrap();
        hosts.sort();
        assert_eq!(hosts, vec!["worker-1".to_string(), "worker-2".to_string()]);
        storage.remove_host("worker-1").await.unwrap();
        assert_eq!(storage.load_hosts().await.unwrap(), vec!["worker-2".to_string()]);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ge-autoscaler-test-{}-{}",
            std::process::id(),
            line!()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
