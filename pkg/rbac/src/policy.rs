use pkg_constants::rbac::{API_ROLE_ADMIN, ADMIN_CLUSTER_ROLE, RESEARCHER_CLUSTER_ROLE, RESEARCHER_ROLE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Roles and cluster roles granted to a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub cluster_roles: BTreeSet<String>,
}

impl RoleGrant {
    pub fn merge(&mut self, other: &RoleGrant) {
        self.roles.extend(other.roles.iter().cloned());
        self.cluster_roles.extend(other.cluster_roles.iter().cloned());
    }
}

/// Maps a principal's API role tags to the RBAC roles it should hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    /// Granted to every principal.
    pub base: RoleGrant,
    /// Extra grants keyed by API role tag.
    #[serde(default)]
    pub by_api_role: BTreeMap<String, RoleGrant>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        let mut base = RoleGrant::default();
        base.roles.insert(RESEARCHER_ROLE.to_string());
        base.cluster_roles.insert(RESEARCHER_CLUSTER_ROLE.to_string());

        let mut admin = RoleGrant::default();
        admin.cluster_roles.insert(ADMIN_CLUSTER_ROLE.to_string());

        Self {
            base,
            by_api_role: BTreeMap::from([(API_ROLE_ADMIN.to_string(), admin)]),
        }
    }
}

impl RolePolicy {
    pub fn grant_for(&self, api_roles: &[String]) -> RoleGrant {
        let mut grant = self.base.clone();
        for tag in api_roles {
            if let Some(extra) = self.by_api_role.get(tag) {
                grant.merge(extra);
            }
        }
        grant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn researcher_gets_base_roles_only() {
        let grant = RolePolicy::default().grant_for(&["researcher".to_string()]);
        assert!(grant.roles.contains(RESEARCHER_ROLE));
        assert!(grant.cluster_roles.contains(RESEARCHER_CLUSTER_ROLE));
        assert!(!grant.cluster_roles.contains(ADMIN_CLUSTER_ROLE));
    }

    #[test]
    fn admin_adds_admin_cluster_role() {
        let grant = RolePolicy::default().grant_for(&["admin".to_string()]);
        assert!(grant.cluster_roles.contains(ADMIN_CLUSTER_ROLE));
        assert!(grant.cluster_roles.contains(RESEARCHER_CLUSTER_ROLE));
        assert_eq!(grant.roles.len(), 1);
    }
}
