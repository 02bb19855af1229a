//! Kubernetes pod reference returned by the cloud pipeline API for a run

/// The pod backing a cloud pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesPod {
    pub ip: String,
    pub name: String,
}
