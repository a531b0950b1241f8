//! Identity and RBAC constants.

/// Namespace holding user objects and their service accounts.
pub const DEFAULT_USER_NAMESPACE: &str = "kube-ai";

/// Namespace holding user group objects.
pub const DEFAULT_GROUP_NAMESPACE: &str = "kube-ai";

/// Group every user implicitly belongs to in the namespace index.
pub const DEFAULT_GROUP: &str = "default-group";

/// API role tag that adds the admin cluster role.
pub const API_ROLE_ADMIN: &str = "admin";

/// Namespaced role granted to every researcher in its quota namespaces.
pub const RESEARCHER_ROLE: &str = "kubeai-researcher-role";

/// Cluster role granted to every researcher.
pub const RESEARCHER_CLUSTER_ROLE: &str = "kubeai-researcher-clusterrole";

/// Cluster role granted to admins.
pub const ADMIN_CLUSTER_ROLE: &str = "kubeai-admin-clusterrole";

/// Binding name segment used for cluster-scoped bindings.
pub const CLUSTER_ROLE_SEGMENT: &str = "clusterRole";
