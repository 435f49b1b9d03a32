//! Global configuration types.

use serde::{Deserialize, Serialize};

/// Global configuration loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Address the REST API binds to.
    pub bind_addr: String,
    /// Default staleness threshold for maintenance queries, in minutes.
    pub default_stale_threshold_minutes: i64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8420".to_string(),
            default_stale_threshold_minutes: 60 * 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: GlobalConfig = toml::from_str("bind_addr = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.default_stale_threshold_minutes, 1440);
    }
}
