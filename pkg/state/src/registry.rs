use pkg_constants::state::{CLUSTER_SCOPE, REGISTRY_PREFIX};
use pkg_types::resource::Resource;
use std::sync::Arc;
use tracing::debug;

use crate::kv::KvStore;

/// Typed object store over a [`KvStore`].
///
/// Objects live at `/registry/{kind}/{namespace}/{name}`; cluster-scoped
/// objects use `_cluster` as their namespace segment. Every write replaces
/// the whole object and bumps its `resource_version`. There is no
/// compare-and-swap: the last writer wins.
#[derive(Clone)]
pub struct Registry {
    kv: Arc<dyn KvStore>,
}

impl Registry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn key<T: Resource>(namespace: Option<&str>, name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            REGISTRY_PREFIX,
            T::KIND,
            namespace.unwrap_or(CLUSTER_SCOPE),
            name
        )
    }

    fn prefix<T: Resource>(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}/{}/{}/", REGISTRY_PREFIX, T::KIND, ns),
            None => format!("{}/{}/", REGISTRY_PREFIX, T::KIND),
        }
    }

    pub async fn get<T: Resource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> anyhow::Result<Option<T>> {
        let key = Self::key::<T>(namespace, name);
        match self.kv.get(&key).await? {
            Some(bytes) => {
                let obj = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("corrupt object at {}: {}", key, e))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// List objects of kind `T` in one namespace, or across all namespaces
    /// when `namespace` is `None`.
    pub async fn list<T: Resource>(&self, namespace: Option<&str>) -> anyhow::Result<Vec<T>> {
        let prefix = Self::prefix::<T>(namespace);
        let entries = self.kv.list_prefix(&prefix).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            let obj = serde_json::from_slice(&bytes)
                .map_err(|e| anyhow::anyhow!("corrupt object at {}: {}", key, e))?;
            out.push(obj);
        }
        Ok(out)
    }

    /// Write `obj` whole, replacing whatever is stored under its key.
    /// Returns the stored object with its new resource version.
    pub async fn create_or_replace<T: Resource>(&self, mut obj: T) -> anyhow::Result<T> {
        let key = Self::key::<T>(obj.namespace(), obj.name());
        let previous = match self.kv.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<T>(&bytes)
                .map(|p| p.resource_version())
                .unwrap_or(0),
            None => 0,
        };
        obj.set_resource_version(previous + 1);
        obj.mark_created();
        let data = serde_json::to_vec(&obj)?;
        self.kv.put(&key, &data).await?;
        debug!("Registry: wrote {} (rv {})", key, previous + 1);
        Ok(obj)
    }

    /// Delete an object. Deleting a missing object is not an error.
    pub async fn delete<T: Resource>(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<()> {
        let key = Self::key::<T>(namespace, name);
        self.kv.delete(&key).await?;
        debug!("Registry: deleted {}", key);
        Ok(())
    }
}
