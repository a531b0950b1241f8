use async_trait::async_trait;

/// Flat key/value storage underneath the [`Registry`](crate::Registry).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// All `(key, value)` pairs whose keys start with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>>;
}
