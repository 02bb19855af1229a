//! Narrows and orders the pool of instance types a selector may choose from
use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::conf::CloudProvider;
use crate::models::instance::Instance;
use crate::models::worker::WorkerRecords;
use crate::Error;

/// A source of candidate instance types
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn provide(&self) -> Result<Vec<Instance>, Error>;
}

/// Lets an already-boxed provider chain be wrapped in another decorator,
/// so `main` can build the provider chain at runtime based on config flags
/// instead of needing one static generic type per combination
#[async_trait]
impl InstanceProvider for std::sync::Arc<dyn InstanceProvider> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        (**self).provide().await
    }
}

/// Sorts candidates by cpu count, largest first
pub struct DescendingInstanceProvider<I> {
    pub inner: I,
}

#[async_trait]
impl<I: InstanceProvider + Sync> InstanceProvider for DescendingInstanceProvider<I> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        let mut instances = self.inner.provide().await?;
        instances.sort_by(|a, b| b.cpu.cmp(&a.cpu));
        Ok(instances)
    }
}

/// Filters out any instance type that was recently reported unavailable
/// (insufficient capacity), falling back to the unfiltered list if that
/// would leave nothing to choose from
pub struct AvailableInstanceProvider<I> {
    pub inner: I,
    pub records: std::sync::Arc<tokio::sync::Mutex<WorkerRecords>>,
    pub unavailability_delay: chrono::Duration,
}

#[async_trait]
impl<I: InstanceProvider + Sync> InstanceProvider for AvailableInstanceProvider<I> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        let allowed = self.inner.provide().await?;
        let records = self.records.lock().await;
        let now = chrono::Utc::now();
        let expiration = now - self.unavailability_delay;
        let available: Vec<Instance> = allowed
            .iter()
            .filter(|instance| self.is_available(&records, &instance.name, expiration))
            .cloned()
            .collect();
        if !available.is_empty() {
            return Ok(available);
        }
        warn!("no available instance types, trying all allowed instance types");
        Ok(allowed)
    }
}

impl<I> AvailableInstanceProvider<I> {
    fn is_available(
        &self,
        records: &WorkerRecords,
        instance_type: &str,
        expiration: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        let mut unavailability = None;
        for record in records.iter() {
            if record.instance_type.as_deref() != Some(instance_type) {
                continue;
            }
            if record.has_insufficient_instance_capacity {
                unavailability = record.stopped;
            }
        }
        match unavailability {
            Some(stopped) => stopped < expiration,
            None => true,
        }
    }
}

/// Drops any instance type whose core count exceeds a configured maximum
pub struct SizeLimitingInstanceProvider<I> {
    pub inner: I,
    pub max_instance_cores: u32,
}

#[async_trait]
impl<I: InstanceProvider + Sync> InstanceProvider for SizeLimitingInstanceProvider<I> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        Ok(self
            .inner
            .provide()
            .await?
            .into_iter()
            .filter(|instance| instance.cpu <= self.max_instance_cores)
            .collect())
    }
}

/// Restricts candidates to a single instance family, sorted ascending by cpu
pub struct FamilyInstanceProvider<I> {
    pub inner: I,
    pub cloud_provider: CloudProvider,
    pub family: String,
}

#[async_trait]
impl<I: InstanceProvider + Sync> InstanceProvider for FamilyInstanceProvider<I> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        let mut instances: Vec<Instance> = self
            .inner
            .provide()
            .await?
            .into_iter()
            .filter(|instance| {
                extract_family(self.cloud_provider, &instance.name).as_deref() == Some(self.family.as_str())
            })
            .collect();
        instances.sort_by_key(|instance| instance.cpu);
        Ok(instances)
    }
}

/// Restricts candidates to exactly one instance type
pub struct DefaultInstanceProvider<I> {
    pub inner: I,
    pub instance_type: String,
}

#[async_trait]
impl<I: InstanceProvider + Sync> InstanceProvider for DefaultInstanceProvider<I> {
    async fn provide(&self) -> Result<Vec<Instance>, Error> {
        Ok(self
            .inner
            .provide()
            .await?
            .into_iter()
            .filter(|instance| instance.name == self.instance_type)
            .collect())
    }
}

/// Extract the instance family from a cloud-specific instance type name,
/// e.g. `m5.2xlarge` -> `m5` on AWS
pub fn extract_family(cloud_provider: CloudProvider, instance_type: &str) -> Option<String> {
    match cloud_provider {
        CloudProvider::Aws => {
            let re = Regex::new(r"^(\w+)\..*").unwrap();
            re.captures(instance_type)
                .map(|caps| caps[1].to_string())
        }
        CloudProvider::Gcp => {
            let re = Regex::new(r"^(?:custom-)?(\w+-\w+)-?.*").unwrap();
            if instance_type.starts_with("custom") {
                return None;
            }
            re.captures(instance_type)
                .map(|caps| caps[1].to_string())
        }
        CloudProvider::Azure => {
            let without_prefix = instance_type.splitn(2, '_').nth(1)?.replace('_', "");
            let re = Regex::new(r"^([a-zA-Z]+)\d+(.*)").unwrap();
            re.captures(&without_prefix)
                .map(|caps| format!("{}{}", &caps[1], &caps[2]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_aws_family() {
        assert_eq!(
            extract_family(CloudProvider::Aws, "m5.2xlarge"),
            Some("m5".to_string())
        );
    }

    #[test]
    fn extracts_azure_family() {
        assert_eq!(
            extract_family(CloudProvider::Azure, "Standard_D2s_v3"),
            Some("Dsv3".to_string())
        );
    }

    struct StubProvider {
        instances: Vec<Instance>,
    }

    #[async_trait]
    impl InstanceProvider for StubProvider {
        async fn provide(&self) -> Result<Vec<Instance>, Error> {
            Ok(self.instances.clone())
        }
    }

    fn instance(name: &str) -> Instance {
        Instance {
            name: name.to_string(),
            price_type: crate::models::instance::PriceType::OnDemand,
            cpu: 4,
            gpu: 0,
            mem: 0,
        }
    }

    fn record(instance_type: &str, stopped: chrono::DateTime<chrono::Utc>, insufficient: bool) -> crate::models::worker::WorkerRecord {
        crate::models::worker::WorkerRecord {
            run_id: "1".to_string(),
            name: None,
            instance_type: Some(instance_type.to_string()),
            started: None,
            stopped: Some(stopped),
            has_insufficient_instance_capacity: insufficient,
        }
    }

    /// An instance type that recently failed with insufficient capacity is
    /// dropped from the pool while its circuit-breaker delay hasn't elapsed.
    #[tokio::test]
    async fn recently_unavailable_instance_is_filtered_out() {
        let now = chrono::Utc::now();
        let mut records = WorkerRecords::new(8);
        records.push(record("X", now - chrono::Duration::seconds(600), true));
        let provider = AvailableInstanceProvider {
            inner: StubProvider {
                instances: vec![instance("X"), instance("Y")],
            },
            records: std::sync::Arc::new(tokio::sync::Mutex::new(records)),
            unavailability_delay: chrono::Duration::seconds(1800),
        };
        let available = provider.provide().await.unwrap();
        let names: Vec<&str> = available.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Y"]);
    }

    /// When every candidate is unavailable, the unfiltered list is returned
    /// instead of leaving nothing to scale up with.
    #[tokio::test]
    async fn falls_back_to_unfiltered_list_when_nothing_is_available() {
        let now = chrono::Utc::now();
        let mut records = WorkerRecords::new(8);
        records.push(record("X", now - chrono::Duration::seconds(600), true));
        let provider = AvailableInstanceProvider {
            inner: StubProvider {
                instances: vec![instance("X")],
            },
            records: std::sync::Arc::new(tokio::sync::Mutex::new(records)),
            unavailability_delay: chrono::Duration::seconds(1800),
        };
        let available = provider.provide().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "X");
    }
}
