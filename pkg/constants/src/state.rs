//! State store key layout.

/// Root of every object key in the store.
pub const REGISTRY_PREFIX: &str = "/registry";

/// Key segment used for cluster-scoped objects.
pub const CLUSTER_SCOPE: &str = "_cluster";
