//! Build file store.
//!
//! Deployed build files are keyed by address under `contracts/`; compiler
//! output is keyed by source path under `builds/` so a type is compiled
//! once per deployment namespace.

use std::time::Duration;

use deploy_core::{Address, BuildFile, DeployError, Result, SourceIndex};
use tracing::{info, warn};

use crate::cache::{Cache, CachePath};

/// Retry policy for importing build files from a source index.
#[derive(Debug, Clone, Copy)]
pub struct ImportPolicy {
    /// Retries after the first attempt.
    pub retries: u32,

    /// Delay before the first retry; doubled for each further retry.
    pub initial_delay: Duration,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

fn contract_path(address: &Address) -> CachePath {
    CachePath::new(["contracts", address.as_str()])
}

fn build_path(type_path: &str) -> CachePath {
    let key: String = type_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    CachePath::new(["builds".to_string(), key])
}

/// Build file deployed at `address`, if cached.
pub async fn get_build_file(cache: &Cache, address: &Address) -> Result<Option<BuildFile>> {
    cache.get(&contract_path(address)).await
}

pub async fn put_build_file(cache: &Cache, address: &Address, build: &BuildFile) -> Result<()> {
    cache.put(&contract_path(address), build).await?;
    Ok(())
}

/// Compiler output for `type_path`, if cached.
pub async fn get_compiled(cache: &Cache, type_path: &str) -> Result<Option<BuildFile>> {
    cache.get(&build_path(type_path)).await
}

pub async fn put_compiled(cache: &Cache, type_path: &str, build: &BuildFile) -> Result<()> {
    cache.put(&build_path(type_path), build).await?;
    Ok(())
}

/// Return the cached build file for `address`, importing it from `index` on a miss.
///
/// Retryable failures (a failed query, or no published source yet) are
/// retried according to `policy`; once retries are exhausted the last one is
/// reported as [`DeployError::ImportFailed`]. Anything else, such as a cache
/// write error, is returned immediately.
pub async fn import_build_file(
    cache: &Cache,
    index: &dyn SourceIndex,
    address: &Address,
    policy: ImportPolicy,
) -> Result<BuildFile> {
    if let Some(build) = get_build_file(cache, address).await? {
        return Ok(build);
    }

    let attempts = policy.retries + 1;
    let mut delay = policy.initial_delay;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match try_import(cache, index, address).await {
            Ok(build) => {
                info!(%address, contract = %build.name, "Imported build file");
                return Ok(build);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => last_error = err.to_string(),
        }

        if attempt < attempts {
            warn!(%address, attempt, error = %last_error, "Import failed, retrying");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(DeployError::ImportFailed {
        address: address.to_string(),
        attempts,
        message: last_error,
    })
}

async fn try_import(cache: &Cache, index: &dyn SourceIndex, address: &Address) -> Result<BuildFile> {
    let build = index
        .query_existing_source(address)
        .await
        .map_err(|e| DeployError::Chain(format!("source query for {}: {}", address, e)))?
        .ok_or_else(|| DeployError::MissingBuildFile(address.to_string()))?;

    let build = match build.address {
        Some(_) => build,
        None => build.bind(address.clone())?,
    };
    put_build_file(cache, address, &build).await?;
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::testing::MockChain;
    use serde_json::json;

    fn fast(retries: u32) -> ImportPolicy {
        ImportPolicy {
            retries,
            initial_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_import_retries_then_succeeds() {
        let cache = Cache::in_memory("avalanche", "frax");
        let chain = MockChain::new();
        let address = chain.install(json!({})).await;
        chain.publish(&address, MockChain::build_file("FiatTokenProxy", &["admin"])).await;
        chain.fail_imports(&address, 2).await;

        let build = import_build_file(&cache, &chain, &address, fast(2)).await.unwrap();

        assert_eq!(build.name, "FiatTokenProxy");
        assert_eq!(build.address, Some(address.clone()));
        assert_eq!(chain.import_queries().await, 3);
        assert_eq!(get_build_file(&cache, &address).await.unwrap(), Some(build));
    }

    #[tokio::test]
    async fn test_import_exhausts_retries() {
        let cache = Cache::in_memory("avalanche", "frax");
        let chain = MockChain::new();
        let address = chain.install(json!({})).await;
        chain.fail_imports(&address, 5).await;

        let err = import_build_file(&cache, &chain, &address, fast(1)).await.unwrap_err();

        match err {
            DeployError::ImportFailed { address: a, attempts, .. } => {
                assert_eq!(a, address.to_string());
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_import_unpublished_fails_without_retries() {
        let cache = Cache::in_memory("avalanche", "frax");
        let chain = MockChain::new();
        let address = Address::from("0xb97ef9ef8734c71904d8002f8b6bc66dd9c48a6e");

        let err = import_build_file(&cache, &chain, &address, fast(0)).await.unwrap_err();
        assert!(err.to_string().contains("No build file for address"));
        assert_eq!(chain.import_queries().await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_write_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new("avalanche", "frax", dir.path(), true);
        let chain = MockChain::new();
        let address = chain.install(json!({})).await;
        chain.publish(&address, MockChain::build_file("FiatTokenProxy", &["admin"])).await;

        // Reads as absent, but writes fail.
        let file = cache.file_path(&CachePath::new(["contracts", address.as_str()]));
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing/target.json"), &file).unwrap();

        let err = import_build_file(&cache, &chain, &address, fast(3)).await.unwrap_err();

        assert!(matches!(err, DeployError::Cache { .. }), "{err}");
        assert_eq!(chain.import_queries().await, 1);
    }

    #[tokio::test]
    async fn test_import_uses_cache() {
        let cache = Cache::in_memory("avalanche", "frax");
        let chain = MockChain::new();
        let address = Address::from("0x01");
        let build = MockChain::build_file("Dog", &["name"]).bind(address.clone()).unwrap();
        put_build_file(&cache, &address, &build).await.unwrap();

        let imported = import_build_file(&cache, &chain, &address, fast(0)).await.unwrap();
        assert_eq!(imported, build);
        assert_eq!(chain.import_queries().await, 0);
    }

    #[tokio::test]
    async fn test_compiled_builds_keyed_by_source_path() {
        let cache = Cache::in_memory("test-network", "test-deployment");
        let dog = MockChain::build_file("Dog", &["name"]);

        put_compiled(&cache, "test/Dog.sol", &dog).await.unwrap();

        assert_eq!(get_compiled(&cache, "test/Dog.sol").await.unwrap(), Some(dog));
        assert_eq!(get_compiled(&cache, "test/Cat.sol").await.unwrap(), None);
    }
}
