use chrono::{DateTime, Utc};
use pkg_constants::rbac::CLUSTER_ROLE_SEGMENT;
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

// --- Policy rules ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// API groups this rule applies to (e.g., "" for core, "*" for all)
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Resource types (e.g., "pods", "services", "*" for all)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Allowed verbs (e.g., "get", "list", "create", "update", "delete", "*" for all)
    #[serde(default)]
    pub verbs: Vec<String>,
}

// --- Scope ---

/// Where a role or binding lives: one namespace, or the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleScope {
    Namespace(String),
    Cluster,
}

impl RoleScope {
    pub fn from_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => RoleScope::Namespace(ns.to_string()),
            None => RoleScope::Cluster,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            RoleScope::Namespace(ns) => Some(ns),
            RoleScope::Cluster => None,
        }
    }
}

impl std::fmt::Display for RoleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleScope::Namespace(ns) => write!(f, "namespace/{}", ns),
            RoleScope::Cluster => write!(f, "cluster"),
        }
    }
}

// --- Role ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    /// `None` for a cluster role.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn scope(&self) -> RoleScope {
        RoleScope::from_namespace(self.namespace.as_deref())
    }
}

// --- Subject ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

// --- RoleBinding ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleKind {
    Role,
    ClusterRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub kind: RoleKind,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub name: String,
    /// `None` for a cluster role binding.
    #[serde(default)]
    pub namespace: Option<String>,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RoleBinding {
    pub fn scope(&self) -> RoleScope {
        RoleScope::from_namespace(self.namespace.as_deref())
    }
}

macro_rules! scoped_resource {
    ($ty:ty, $kind:expr) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn name(&self) -> &str {
                &self.name
            }

            fn namespace(&self) -> Option<&str> {
                self.namespace.as_deref()
            }

            fn resource_version(&self) -> u64 {
                self.resource_version
            }

            fn set_resource_version(&mut self, version: u64) {
                self.resource_version = version;
            }

            fn mark_created(&mut self) {
                if self.created_at.is_none() {
                    self.created_at = Some(Utc::now());
                }
            }
        }
    };
}

scoped_resource!(Role, "roles");
scoped_resource!(RoleBinding, "rolebindings");

/// Deterministic binding name: `sa:namespace:role`, or `sa:clusterRole:role`
/// for cluster-scoped bindings.
pub fn binding_name(service_account: &str, role: &str, scope: &RoleScope) -> String {
    match scope {
        RoleScope::Namespace(ns) => format!("{}:{}:{}", service_account, ns, role),
        RoleScope::Cluster => format!("{}:{}:{}", service_account, CLUSTER_ROLE_SEGMENT, role),
    }
}
