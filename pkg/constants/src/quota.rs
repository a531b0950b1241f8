//! Quota tree constants.

/// Name used for the quota tree when a request leaves it empty.
pub const DEFAULT_TREE_NAME: &str = "elasticquotatree";

/// Namespace used for the quota tree when a request leaves it empty.
pub const DEFAULT_TREE_NAMESPACE: &str = "kube-system";

/// Largest quota amount the platform can represent.
/// Any amount at or above this value means "unbounded".
pub const MAX_QUOTA: u64 = 2_147_483_647;

/// Wire marker for an unbounded quota amount.
pub const UNBOUNDED_MARKER: &str = "N/A";

/// Separator between the segments of a qualified node name.
pub const NAME_SEPARATOR: char = '.';
