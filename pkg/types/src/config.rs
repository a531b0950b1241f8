use serde::{Deserialize, Serialize};

/// quotactl configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/quota/data
/// tree-name: elasticquotatree
/// tree-namespace: kube-system
/// user-namespace: kube-ai
/// reconcile-concurrency: 8
/// role-templates: /etc/quota/roles.yaml
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "tree-name")]
    pub tree_name: Option<String>,
    #[serde(default, alias = "tree-namespace")]
    pub tree_namespace: Option<String>,
    #[serde(default, alias = "user-namespace")]
    pub user_namespace: Option<String>,
    #[serde(default, alias = "reconcile-concurrency")]
    pub reconcile_concurrency: Option<usize>,
    #[serde(default, alias = "role-templates")]
    pub role_templates: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
