use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- User group spec ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserGroupSpec {
    /// Display name as entered by the administrator.
    pub group_name: String,
    /// Qualified quota node names this group is bound to.
    #[serde(default)]
    pub quota_names: Vec<String>,
    #[serde(default)]
    pub default_roles: Vec<String>,
    #[serde(default)]
    pub default_cluster_roles: Vec<String>,
}

// --- User group ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    /// Storage identity, derived from the display name by [`meta_name_for`].
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub spec: UserGroupSpec,
}

crate::namespaced_resource!(UserGroup, "usergroups");

impl UserGroup {
    pub fn new(namespace: &str, spec: UserGroupSpec) -> Self {
        Self {
            name: meta_name_for(&spec.group_name),
            namespace: namespace.to_string(),
            resource_version: 0,
            created_at: None,
            spec,
        }
    }

    pub fn group_name(&self) -> &str {
        &self.spec.group_name
    }
}

/// Derive a storage-safe name: lowercase, with `@` and `_` turned into `-`.
pub fn meta_name_for(group_name: &str) -> String {
    group_name
        .to_lowercase()
        .chars()
        .map(|c| if c == '@' || c == '_' { '-' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_name_is_lowercased_and_sanitised() {
        assert_eq!(meta_name_for("Team_A@Corp"), "team-a-corp");
        assert_eq!(meta_name_for("ml-infra"), "ml-infra");
    }

    #[test]
    fn new_group_takes_meta_name_from_display_name() {
        let group = UserGroup::new(
            "kube-ai",
            UserGroupSpec {
                group_name: "Vision_Lab".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(group.name, "vision-lab");
        assert_eq!(group.group_name(), "Vision_Lab");
    }
}
