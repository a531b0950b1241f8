use async_trait::async_trait;
use pkg_types::pod::{Pod, Workload};

use crate::registry::Registry;

/// Lists the workloads running in a namespace.
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn list_workloads(&self, namespace: &str) -> anyhow::Result<Vec<Workload>>;
}

/// Reads pods recorded in the registry.
#[derive(Clone)]
pub struct RegistryWorkloadLister {
    registry: Registry,
}

impl RegistryWorkloadLister {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl WorkloadLister for RegistryWorkloadLister {
    async fn list_workloads(&self, namespace: &str) -> anyhow::Result<Vec<Workload>> {
        let pods: Vec<Pod> = self.registry.list(Some(namespace)).await?;
        Ok(pods.iter().map(Workload::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use pkg_types::pod::PodPhase;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_pods_of_one_namespace() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        for (ns, name, phase) in [
            ("ns1", "train-1", PodPhase::Running),
            ("ns1", "train-2", PodPhase::Succeeded),
            ("ns2", "eval-1", PodPhase::Running),
        ] {
            registry
                .create_or_replace(Pod {
                    name: name.to_string(),
                    namespace: ns.to_string(),
                    phase,
                    resource_version: 0,
                    created_at: None,
                })
                .await
                .unwrap();
        }

        let lister = RegistryWorkloadLister::new(registry);
        let workloads = lister.list_workloads("ns1").await.unwrap();
        assert_eq!(workloads.len(), 2);
        assert!(workloads.iter().all(|w| w.name.starts_with("train")));
    }
}
