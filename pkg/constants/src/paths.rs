//! Filesystem path constants.

/// Default config file path for `quotactl`.
pub const DEFAULT_CONFIG: &str = "/etc/quota/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/quota-data";
