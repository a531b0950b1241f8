use anyhow::Context;
use pkg_constants::rbac::{ADMIN_CLUSTER_ROLE, RESEARCHER_CLUSTER_ROLE, RESEARCHER_ROLE};
use pkg_types::rbac::PolicyRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static definition a role object is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    /// Cluster roles are created once, cluster-wide.
    #[serde(default)]
    pub cluster: bool,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// Role name → template lookup table handed to the reconciler.
///
/// Example `roles.yaml`:
/// ```yaml
/// kubeai-researcher-role:
///   cluster: false
///   rules:
///     - api_groups: [""]
///       resources: ["pods", "services"]
///       verbs: ["*"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleTemplates {
    templates: BTreeMap<String, RoleTemplate>,
}

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
    PolicyRule {
        api_groups: owned(api_groups),
        resources: owned(resources),
        verbs: owned(verbs),
    }
}

impl RoleTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three roles every installation ships with.
    pub fn builtin() -> Self {
        let mut t = Self::new();
        t.insert(
            RESEARCHER_ROLE,
            RoleTemplate {
                cluster: false,
                rules: vec![
                    rule(
                        &[""],
                        &["pods", "pods/log", "pods/exec", "services", "configmaps", "persistentvolumeclaims"],
                        &["*"],
                    ),
                    rule(&["batch"], &["jobs"], &["*"]),
                    rule(&["kubeflow.org"], &["*"], &["*"]),
                ],
            },
        );
        t.insert(
            RESEARCHER_CLUSTER_ROLE,
            RoleTemplate {
                cluster: true,
                rules: vec![
                    rule(&[""], &["namespaces", "nodes"], &["get", "list", "watch"]),
                    rule(&["scheduling.sigs.k8s.io"], &["elasticquotas"], &["get", "list", "watch"]),
                ],
            },
        );
        t.insert(
            ADMIN_CLUSTER_ROLE,
            RoleTemplate {
                cluster: true,
                rules: vec![rule(&["*"], &["*"], &["*"])],
            },
        );
        t
    }

    /// Parse a YAML template table.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let t: Self = serde_yaml::from_str(content)?;
        Ok(t)
    }

    /// Built-in templates overlaid with the entries of a YAML file.
    /// Unlike the config file, a named template file must exist.
    pub fn load_with_builtin(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read role templates {}", path))?;
        let mut t = Self::builtin();
        t.extend(Self::from_yaml(&content)?);
        Ok(t)
    }

    pub fn insert(&mut self, role: &str, template: RoleTemplate) {
        self.templates.insert(role.to_string(), template);
    }

    /// Add or replace every entry of `other`.
    pub fn extend(&mut self, other: RoleTemplates) {
        self.templates.extend(other.templates);
    }

    pub fn get(&self, role: &str) -> Option<&RoleTemplate> {
        self.templates.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}
