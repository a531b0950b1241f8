use serde::Serialize;
use serde::de::DeserializeOwned;

/// An object kept in the registry: addressed by kind, namespace and name,
/// always written as a whole.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Registry key segment, e.g. `quotatrees`.
    const KIND: &'static str;

    fn name(&self) -> &str;

    /// `None` for cluster-scoped objects.
    fn namespace(&self) -> Option<&str>;

    fn resource_version(&self) -> u64;

    fn set_resource_version(&mut self, version: u64);

    /// Stamp the creation time if the object has none yet.
    fn mark_created(&mut self) {}
}

/// Implements [`Resource`] for a struct with `name`, `namespace: String`,
/// `resource_version` and `created_at: Option<DateTime<Utc>>` fields.
#[macro_export]
macro_rules! namespaced_resource {
    ($ty:ty, $kind:expr) => {
        impl $crate::resource::Resource for $ty {
            const KIND: &'static str = $kind;

            fn name(&self) -> &str {
                &self.name
            }

            fn namespace(&self) -> Option<&str> {
                Some(&self.namespace)
            }

            fn resource_version(&self) -> u64 {
                self.resource_version
            }

            fn set_resource_version(&mut self, version: u64) {
                self.resource_version = version;
            }

            fn mark_created(&mut self) {
                if self.created_at.is_none() {
                    self.created_at = Some(chrono::Utc::now());
                }
            }
        }
    };
}
