//! Deployment manager configuration.

use std::path::PathBuf;
use std::time::Duration;

use deploy_cache::ImportPolicy;
use deploy_core::{DeployError, Result};
use deploy_spider::SpiderConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`DeploymentManager`](crate::DeploymentManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Root of the durable cache; entries live under `<base_dir>/<network>/<deployment>`.
    pub base_dir: PathBuf,

    /// Persist cache writes to disk. Disable for ephemeral runs.
    pub write_cache_to_disk: bool,

    /// Retries after the first failed import query.
    pub import_retries: u32,

    /// Delay before the first import retry, in milliseconds. Doubles per retry.
    pub import_retry_delay_ms: u64,

    /// Maximum contracts expanded concurrently in one spider layer.
    pub spider_concurrency: usize,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("deployments"),
            write_cache_to_disk: true,
            import_retries: 3,
            import_retry_delay_ms: 500,
            spider_concurrency: 8,
        }
    }
}

impl DeploymentConfig {
    /// Parse from JSON; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DeployError::Config(e.to_string()))
    }

    pub fn import_policy(&self) -> ImportPolicy {
        ImportPolicy {
            retries: self.import_retries,
            initial_delay: Duration::from_millis(self.import_retry_delay_ms),
        }
    }

    pub fn spider_config(&self) -> SpiderConfig {
        SpiderConfig {
            concurrency: self.spider_concurrency,
            import: self.import_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            DeploymentConfig::from_json_str(r#"{"import_retries": 0, "base_dir": "/tmp/dm"}"#).unwrap();

        assert_eq!(config.import_retries, 0);
        assert_eq!(config.base_dir, PathBuf::from("/tmp/dm"));
        assert!(config.write_cache_to_disk);
        assert_eq!(config.spider_config().concurrency, 8);
    }

    #[test]
    fn test_invalid_json() {
        let err = DeploymentConfig::from_json_str("{\"import_retries\": -1}").unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }
}
