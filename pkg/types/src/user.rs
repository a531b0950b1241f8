use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rbac::RoleScope;

/// A binding the principal is recorded as holding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingRef {
    pub name: String,
    pub role_name: String,
    /// `None` for cluster role bindings.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl BindingRef {
    pub fn scope(&self) -> RoleScope {
        RoleScope::from_namespace(self.namespace.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountBindings {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub role_bindings: Vec<BindingRef>,
    #[serde(default)]
    pub cluster_role_bindings: Vec<BindingRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSpec {
    pub user_name: String,
    pub user_id: String,
    /// Role tags such as `admin` or `researcher`.
    #[serde(default)]
    pub api_roles: Vec<String>,
    /// Group meta names, not display names.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub service_account: ServiceAccountBindings,
}

// --- User (principal) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub spec: UserSpec,
}

crate::namespaced_resource!(User, "users");

impl User {
    /// The service account is named after the user id and lives in the
    /// user's own namespace.
    pub fn new(namespace: &str, user_name: &str, user_id: &str, api_roles: Vec<String>) -> Self {
        Self {
            name: user_id.to_string(),
            namespace: namespace.to_string(),
            resource_version: 0,
            created_at: None,
            spec: UserSpec {
                user_name: user_name.to_string(),
                user_id: user_id.to_string(),
                api_roles,
                groups: Vec::new(),
                service_account: ServiceAccountBindings {
                    name: user_id.to_string(),
                    namespace: namespace.to_string(),
                    ..Default::default()
                },
            },
        }
    }

    pub fn service_account_name(&self) -> &str {
        if self.spec.service_account.name.is_empty() {
            &self.spec.user_id
        } else {
            &self.spec.service_account.name
        }
    }

    pub fn in_group(&self, meta_name: &str) -> bool {
        self.spec.groups.iter().any(|g| g == meta_name)
    }

    /// Every binding recorded on the principal, both scopes.
    pub fn recorded_bindings(&self) -> impl Iterator<Item = &BindingRef> {
        self.spec
            .service_account
            .role_bindings
            .iter()
            .chain(self.spec.service_account.cluster_role_bindings.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_defaults_to_user_id() {
        let mut user = User::new("kube-ai", "Alice", "u-1", vec![]);
        assert_eq!(user.service_account_name(), "u-1");
        user.spec.service_account.name.clear();
        assert_eq!(user.service_account_name(), "u-1");
    }

    #[test]
    fn recorded_bindings_cover_both_scopes() {
        let mut user = User::new("kube-ai", "Alice", "u-1", vec![]);
        user.spec.service_account.role_bindings.push(BindingRef {
            name: "u-1:ns1:r".to_string(),
            role_name: "r".to_string(),
            namespace: Some("ns1".to_string()),
        });
        user.spec.service_account.cluster_role_bindings.push(BindingRef {
            name: "u-1:clusterRole:c".to_string(),
            role_name: "c".to_string(),
            namespace: None,
        });
        let scopes: Vec<RoleScope> = user.recorded_bindings().map(|b| b.scope()).collect();
        assert_eq!(
            scopes,
            vec![RoleScope::Namespace("ns1".to_string()), RoleScope::Cluster]
        );
    }
}
