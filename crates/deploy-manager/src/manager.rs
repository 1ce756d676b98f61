//! The deployment manager façade.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use deploy_cache::{build_files, registry, Aliases, Cache, CachePath, Proxies, Roots, VerifyArgsMap};
use deploy_core::{
    Address, BuildFile, ChainReader, Compiler, Contract, DeployError, Deployer, Result, SourceIndex,
    Verifier, VerifyArgs,
};
use deploy_spider::{NetworkRelations, RelationConfig, Spider, SpiderReport};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DeploymentConfig;
use crate::migration::{render_template, MIGRATIONS_DIR};
use crate::verify::{verify_pending, VerifyReport};

const ARTIFACTS_DIR: &str = "artifacts";

/// External systems the manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub compiler: Arc<dyn Compiler>,
    pub deployer: Arc<dyn Deployer>,
    pub reader: Arc<dyn ChainReader>,
    pub index: Arc<dyn SourceIndex>,
    pub verifier: Arc<dyn Verifier>,
}

impl Collaborators {
    /// Use one value for every collaborator, e.g. a local dev chain.
    pub fn from_chain<C>(chain: C) -> Self
    where
        C: Compiler + Deployer + ChainReader + SourceIndex + Verifier + Clone + 'static,
    {
        Self {
            compiler: Arc::new(chain.clone()),
            deployer: Arc::new(chain.clone()),
            reader: Arc::new(chain.clone()),
            index: Arc::new(chain.clone()),
            verifier: Arc::new(chain),
        }
    }
}

/// Deploys, names, resolves and discovers the contracts of one
/// network/deployment pair.
///
/// All state lives in the manager's [`Cache`]. Handles returned by
/// [`contract`](Self::contract) are built fresh on every call, so rebinding
/// an alias or proxy takes effect immediately.
pub struct DeploymentManager {
    cache: Cache,
    collaborators: Collaborators,
    relations: RelationConfig,
    config: DeploymentConfig,
}

impl DeploymentManager {
    /// Create a manager over `<config.base_dir>/<network>/<deployment>`.
    pub fn new(
        network: impl Into<String>,
        deployment: impl Into<String>,
        collaborators: Collaborators,
        config: DeploymentConfig,
    ) -> Self {
        let cache = Cache::new(network, deployment, &config.base_dir, config.write_cache_to_disk);
        Self {
            cache,
            collaborators,
            relations: RelationConfig::default(),
            config,
        }
    }

    pub fn with_relations(mut self, relations: RelationConfig) -> Self {
        self.relations = relations;
        self
    }

    /// Select this deployment's entry from a per-network relation table.
    ///
    /// Leaves the current relations in place when the table has no entry.
    pub fn with_network_relations(mut self, relations: &NetworkRelations) -> Self {
        match relations.get(self.cache.network(), self.cache.deployment()) {
            Some(config) => self.relations = config.clone(),
            None => debug!(
                network = self.cache.network(),
                deployment = self.cache.deployment(),
                "No relation config for deployment"
            ),
        }
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn network(&self) -> &str {
        self.cache.network()
    }

    pub fn deployment(&self) -> &str {
        self.cache.deployment()
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Deploy & import
    // ------------------------------------------------------------------

    /// Compile `type_path`, reusing a cached build when one exists.
    pub async fn compile(&self, type_path: &str) -> Result<BuildFile> {
        if let Some(build) = build_files::get_compiled(&self.cache, type_path).await? {
            return Ok(build);
        }

        let build = self
            .collaborators
            .compiler
            .build(type_path)
            .await
            .map_err(|e| DeployError::DeployFailed {
                name: type_path.to_string(),
                message: format!("compilation failed: {}", e),
            })?;
        build_files::put_compiled(&self.cache, type_path, &build).await?;
        debug!(type_path, contract = %build.name, "Compiled contract");
        Ok(build)
    }

    /// Deploy `type_path` and bind `alias` to the new address.
    ///
    /// The build file is cached under the new address and the deployment is
    /// queued for verification. Deploy failures are never retried.
    pub async fn deploy(&self, alias: &str, type_path: &str, args: Vec<Value>) -> Result<Contract> {
        let build = self.compile(type_path).await?;
        let contract = self.deploy_build(&build, &args).await?;
        let address = contract.address().clone();

        registry::put_alias(&self.cache, alias, &address).await?;
        let verify = VerifyArgs {
            address: address.clone(),
            contract: build.name.clone(),
            source_path: type_path.to_string(),
            constructor_arguments: args,
        };
        registry::put_verify_args(&self.cache, &address, &verify).await?;

        info!(alias, %address, contract = %build.name, "🚀 Deployed contract");
        Ok(contract)
    }

    /// Deploy an already-built contract. No alias is bound and nothing is
    /// queued for verification.
    pub async fn deploy_build(&self, build: &BuildFile, args: &[Value]) -> Result<Contract> {
        let address = self
            .collaborators
            .deployer
            .submit_deploy(build, args)
            .await
            .map_err(|e| DeployError::DeployFailed {
                name: build.name.clone(),
                message: e.to_string(),
            })?;

        let deployed = build.clone().bind(address.clone())?;
        build_files::put_build_file(&self.cache, &address, &deployed).await?;
        Ok(Contract::new(address, deployed, self.collaborators.reader.clone()))
    }

    /// Resolve `alias` if bound, otherwise deploy it.
    pub async fn deploy_if_missing(&self, alias: &str, type_path: &str, args: Vec<Value>) -> Result<Contract> {
        if registry::get_aliases(&self.cache).await?.contains_key(alias) {
            debug!(alias, "Alias already deployed");
            return self.contract(alias).await;
        }
        self.deploy(alias, type_path, args).await
    }

    /// Build file for `address`, imported from the source index on a cache miss.
    pub async fn import(&self, address: &Address) -> Result<BuildFile> {
        build_files::import_build_file(
            &self.cache,
            self.collaborators.index.as_ref(),
            address,
            self.config.import_policy(),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Live handle for `alias`, reading the current alias and proxy state.
    pub async fn contract(&self, alias: &str) -> Result<Contract> {
        let aliases = registry::get_aliases(&self.cache).await?;
        let address = aliases
            .get(alias)
            .ok_or_else(|| DeployError::UnknownAlias(alias.to_string()))?;
        let proxies = registry::get_proxies(&self.cache).await?;
        self.resolve(alias, address, &proxies).await
    }

    /// Live handles for every alias.
    pub async fn contracts(&self) -> Result<BTreeMap<String, Contract>> {
        let aliases = registry::get_aliases(&self.cache).await?;
        let proxies = registry::get_proxies(&self.cache).await?;

        let contracts = try_join_all(
            aliases
                .iter()
                .map(|(alias, address)| self.resolve(alias, address, &proxies)),
        )
        .await?;

        Ok(aliases.into_keys().zip(contracts).collect())
    }

    /// Bind to `address`, with the proxy target's interface if one is registered.
    async fn resolve(&self, alias: &str, address: &Address, proxies: &Proxies) -> Result<Contract> {
        let interface_address = proxies.get(alias).unwrap_or(address);
        let build = self.import(interface_address).await?;
        Ok(Contract::new(address.clone(), build, self.collaborators.reader.clone()))
    }

    // ------------------------------------------------------------------
    // Registries
    // ------------------------------------------------------------------

    pub async fn get_aliases(&self) -> Result<Aliases> {
        registry::get_aliases(&self.cache).await
    }

    pub async fn put_alias(&self, alias: &str, address: &Address) -> Result<()> {
        registry::put_alias(&self.cache, alias, address).await
    }

    pub async fn get_proxies(&self) -> Result<Proxies> {
        registry::get_proxies(&self.cache).await
    }

    pub async fn put_proxy(&self, alias: &str, implementation: &Address) -> Result<()> {
        registry::put_proxy(&self.cache, alias, implementation).await
    }

    pub async fn get_roots(&self) -> Result<Roots> {
        registry::get_roots(&self.cache).await
    }

    pub async fn put_roots(&self, roots: &Roots) -> Result<()> {
        registry::put_roots(&self.cache, roots).await
    }

    pub async fn get_verify_args(&self) -> Result<VerifyArgsMap> {
        registry::get_verify_args(&self.cache).await
    }

    pub async fn put_verify_args(&self, address: &Address, args: &VerifyArgs) -> Result<()> {
        registry::put_verify_args(&self.cache, address, args).await
    }

    // ------------------------------------------------------------------
    // Discovery & verification
    // ------------------------------------------------------------------

    /// Discover every contract reachable from the roots.
    pub async fn spider(&self) -> Result<SpiderReport> {
        Spider::new(
            &self.cache,
            &self.relations,
            self.collaborators.reader.clone(),
            self.collaborators.index.as_ref(),
        )
        .with_config(self.config.spider_config())
        .run()
        .await
    }

    /// Submit every queued verification. Failures stay queued.
    pub async fn verify_contracts(&self) -> Result<VerifyReport> {
        let report = verify_pending(&self.cache, self.collaborators.verifier.as_ref()).await?;
        info!(
            verified = report.verified.len(),
            failed = report.failed.len(),
            "Verification round complete"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Migrations & artifacts
    // ------------------------------------------------------------------

    /// Write a migration scaffold for `name` and return its identifier,
    /// e.g. `1_cool.rs`.
    ///
    /// The ordinal defaults to one past the number of existing migrations.
    /// Names must be a single path component.
    pub async fn generate_migration(&self, name: &str, ordinal: Option<u64>) -> Result<String> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(DeployError::Migration {
                id: name.to_string(),
                message: "migration names must be a single path component".to_string(),
            });
        }

        let dir = CachePath::new([MIGRATIONS_DIR]);
        let existing = self.cache.list(&dir).await?;
        let ordinal = ordinal.unwrap_or(existing.len() as u64 + 1);

        let id = format!("{}_{}.rs", ordinal, name);
        let path = dir.join(id.as_str());
        if self.cache.get_text(&path).await?.is_some() {
            return Err(DeployError::MigrationExists(id));
        }

        let file = self.cache.put_text(&path, &render_template(name)).await?;
        info!(%id, path = %file.display(), "Generated migration");
        Ok(id)
    }

    /// Store the artifact for migration `id`. Returns the durable file path.
    pub async fn store_artifact<T: Serialize + ?Sized>(&self, id: &str, artifact: &T) -> Result<PathBuf> {
        self.cache.put(&artifact_path(id), artifact).await
    }

    /// Artifact for migration `id`, or `None` if none has been stored.
    pub async fn read_artifact<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        self.cache.get(&artifact_path(id)).await
    }
}

fn artifact_path(id: &str) -> CachePath {
    CachePath::new([ARTIFACTS_DIR, id])
}
