use anyhow::{Result, bail};
use pkg_constants::quota::NAME_SEPARATOR;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate the local name of a quota node. The separator is reserved for
/// qualified names.
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("quota node name must not be empty");
    }
    if name.contains(NAME_SEPARATOR) {
        bail!(
            "quota node name '{}' must not contain '{}'",
            name,
            NAME_SEPARATOR
        );
    }
    if name.chars().any(char::is_whitespace) {
        bail!("quota node name '{}' must not contain whitespace", name);
    }
    Ok(())
}
