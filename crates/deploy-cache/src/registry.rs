//! Name-keyed registries stored as a single JSON object per cache entry.
//!
//! Aliases, proxies, roots and pending verification arguments are all
//! `key -> value` maps; each module below is a typed view over one entry.

use std::collections::BTreeMap;

use deploy_core::{Address, Result, VerifyArgs};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::{Cache, CachePath};

/// Alias name to address.
pub type Aliases = BTreeMap<String, Address>;

/// Alias name to implementation address.
pub type Proxies = BTreeMap<String, Address>;

/// Root name to address.
pub type Roots = BTreeMap<String, Address>;

/// Address to pending verification parameters.
pub type VerifyArgsMap = BTreeMap<Address, VerifyArgs>;

pub const ALIASES: &str = "aliases";
pub const PROXIES: &str = "proxies";
pub const ROOTS: &str = "roots";
pub const VERIFY_ARGS: &str = "verify-args";

async fn read_map<K, V>(cache: &Cache, name: &str) -> Result<BTreeMap<K, V>>
where
    K: Ord + DeserializeOwned,
    V: DeserializeOwned,
{
    Ok(cache
        .get(&CachePath::from([name]))
        .await?
        .unwrap_or_default())
}

async fn write_map<K, V>(cache: &Cache, name: &str, map: &BTreeMap<K, V>) -> Result<()>
where
    K: Ord + Serialize,
    V: Serialize,
{
    cache.put(&CachePath::from([name]), map).await?;
    Ok(())
}

pub async fn get_aliases(cache: &Cache) -> Result<Aliases> {
    read_map(cache, ALIASES).await
}

pub async fn put_aliases(cache: &Cache, aliases: &Aliases) -> Result<()> {
    write_map(cache, ALIASES, aliases).await
}

/// Bind `name` to `address`, replacing any previous binding.
pub async fn put_alias(cache: &Cache, name: &str, address: &Address) -> Result<()> {
    let mut aliases = get_aliases(cache).await?;
    if let Some(previous) = aliases.insert(name.to_string(), address.clone()) {
        if &previous != address {
            debug!(alias = name, %previous, %address, "Rebinding alias");
        }
    }
    put_aliases(cache, &aliases).await
}

pub async fn get_proxies(cache: &Cache) -> Result<Proxies> {
    read_map(cache, PROXIES).await
}

pub async fn put_proxies(cache: &Cache, proxies: &Proxies) -> Result<()> {
    write_map(cache, PROXIES, proxies).await
}

/// Resolve `name`'s interface through `implementation`.
pub async fn put_proxy(cache: &Cache, name: &str, implementation: &Address) -> Result<()> {
    let mut proxies = get_proxies(cache).await?;
    proxies.insert(name.to_string(), implementation.clone());
    put_proxies(cache, &proxies).await
}

pub async fn get_roots(cache: &Cache) -> Result<Roots> {
    read_map(cache, ROOTS).await
}

/// Replace the root set.
pub async fn put_roots(cache: &Cache, roots: &Roots) -> Result<()> {
    write_map(cache, ROOTS, roots).await
}

pub async fn get_verify_args(cache: &Cache) -> Result<VerifyArgsMap> {
    read_map(cache, VERIFY_ARGS).await
}

/// Queue `args` for verification of `address`.
pub async fn put_verify_args(cache: &Cache, address: &Address, args: &VerifyArgs) -> Result<()> {
    let mut pending = get_verify_args(cache).await?;
    pending.insert(address.clone(), args.clone());
    write_map(cache, VERIFY_ARGS, &pending).await
}

/// Drop the pending entry for `address`, if any.
pub async fn delete_verify_args(cache: &Cache, address: &Address) -> Result<()> {
    let mut pending = get_verify_args(cache).await?;
    if pending.remove(address).is_some() {
        write_map(cache, VERIFY_ARGS, &pending).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero() -> Address {
        Address::zero()
    }

    #[tokio::test]
    async fn test_put_alias_overwrites() {
        let cache = Cache::in_memory("test-network", "test-deployment");

        put_alias(&cache, "pet", &Address::from("0x01")).await.unwrap();
        put_alias(&cache, "pet", &Address::from("0x02")).await.unwrap();
        put_alias(&cache, "finn", &zero()).await.unwrap();

        let aliases = get_aliases(&cache).await.unwrap();
        assert_eq!(aliases.get("pet"), Some(&Address::from("0x02")));
        assert_eq!(aliases.get("finn"), Some(&zero()));
        assert_eq!(aliases.len(), 2);
    }

    #[tokio::test]
    async fn test_registries_are_separate() {
        let cache = Cache::in_memory("test-network", "test-deployment");

        put_proxy(&cache, "finn", &zero()).await.unwrap();
        put_roots(&cache, &Roots::from([("finn".to_string(), Address::from("0x01"))]))
            .await
            .unwrap();

        assert!(get_aliases(&cache).await.unwrap().is_empty());
        assert_eq!(get_proxies(&cache).await.unwrap().get("finn"), Some(&zero()));
        assert_eq!(
            get_roots(&cache).await.unwrap().get("finn"),
            Some(&Address::from("0x01"))
        );
    }

    #[tokio::test]
    async fn test_verify_args_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new("test-network", "test-deployment", dir.path(), true);
        let args = VerifyArgs {
            address: zero(),
            contract: "Dog".into(),
            source_path: "test/Dog.sol".into(),
            constructor_arguments: vec![],
        };

        put_verify_args(&cache, &zero(), &args).await.unwrap();
        cache.clear_memory().await;
        assert_eq!(get_verify_args(&cache).await.unwrap().get(&zero()), Some(&args));

        delete_verify_args(&cache, &zero()).await.unwrap();
        cache.clear_memory().await;
        assert!(get_verify_args(&cache).await.unwrap().is_empty());
    }
}
