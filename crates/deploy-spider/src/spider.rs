//! Breadth-first discovery of related contracts.
//!
//! Starting from the roots, each layer expands every frontier contract by
//! applying the relations configured for it. Addresses are visited at most
//! once per pass, so cyclic relation graphs terminate and total work is
//! bounded by the number of reachable addresses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use deploy_cache::{build_files, registry, Aliases, Cache, ImportPolicy, Proxies};
use deploy_core::{Address, BuildFile, ChainReader, Contract, DeployError, Result, SourceIndex};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::relations::{AliasContext, AliasRule, Relation, RelationConfig};

/// Configuration for a spider pass.
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    /// Maximum frontier contracts expanded concurrently.
    pub concurrency: usize,

    /// Retry policy for importing unknown build files.
    pub import: ImportPolicy,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            import: ImportPolicy::default(),
        }
    }
}

/// A relation that failed for one contract during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationFailure {
    /// Alias of the contract the relation was read from.
    pub alias: String,
    pub relation: String,
    pub message: String,
}

/// Outcome of a spider pass.
#[derive(Debug, Clone, Default)]
pub struct SpiderReport {
    /// Every name bound during the pass, roots included.
    pub aliases: Aliases,

    /// Proxy entries written for delegating contracts.
    pub proxies: Proxies,

    /// Non-fatal relation failures.
    pub failures: Vec<RelationFailure>,

    /// Number of frontier layers expanded.
    pub layers: usize,
}

#[derive(Debug, Clone)]
struct Node {
    alias: String,
    address: Address,
    root: bool,
}

#[derive(Debug, Clone)]
struct Discovery {
    alias: String,
    address: Address,
}

#[derive(Debug, Default)]
struct Expansion {
    implementation: Option<Address>,
    discoveries: Vec<Discovery>,
    failures: Vec<RelationFailure>,
}

/// Graph discovery over one deployment's cache.
pub struct Spider<'a> {
    cache: &'a Cache,
    relations: &'a RelationConfig,
    reader: Arc<dyn ChainReader>,
    index: &'a dyn SourceIndex,
    config: SpiderConfig,
}

impl<'a> Spider<'a> {
    pub fn new(
        cache: &'a Cache,
        relations: &'a RelationConfig,
        reader: Arc<dyn ChainReader>,
        index: &'a dyn SourceIndex,
    ) -> Self {
        Self {
            cache,
            relations,
            reader,
            index,
            config: SpiderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SpiderConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one pass to a fixed point.
    ///
    /// Within a pass the first discovery of an address wins, in frontier
    /// order, then delegate before relations in declaration order, then
    /// element order. A name already bound earlier in the pass (roots
    /// included) is never rebound to a different address.
    pub async fn run(&self) -> Result<SpiderReport> {
        let roots = registry::get_roots(self.cache).await?;
        let mut proxies = registry::get_proxies(self.cache).await?;

        let mut report = SpiderReport::default();
        let mut visited: HashSet<Address> = HashSet::new();
        let mut claimed: HashMap<String, Address> = HashMap::new();
        let mut frontier = Vec::new();

        for (name, address) in &roots {
            claimed.insert(name.clone(), address.clone());
            report.aliases.insert(name.clone(), address.clone());
            if visited.insert(address.clone()) {
                frontier.push(Node {
                    alias: name.clone(),
                    address: address.clone(),
                    root: true,
                });
            }
        }
        self.write_layer(&report.aliases, &Proxies::new()).await?;

        info!(
            network = self.cache.network(),
            deployment = self.cache.deployment(),
            roots = roots.len(),
            "Spidering from roots"
        );

        while !frontier.is_empty() {
            report.layers += 1;
            debug!(layer = report.layers, size = frontier.len(), "Expanding frontier");

            let snapshot = proxies.clone();
            let snapshot = &snapshot;
            let expansions: Vec<Result<Expansion>> = stream::iter(frontier.iter())
                .map(move |node| self.expand(node, snapshot))
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await;

            let mut next = Vec::new();
            let mut layer_aliases = Aliases::new();
            let mut layer_proxies = Proxies::new();

            for (node, expansion) in frontier.iter().zip(expansions) {
                let expansion = expansion?;
                report.failures.extend(expansion.failures);

                if let Some(implementation) = expansion.implementation {
                    layer_proxies.insert(node.alias.clone(), implementation);
                }

                for Discovery { alias, address } in expansion.discoveries {
                    if visited.contains(&address) {
                        continue;
                    }
                    if let Some(bound) = claimed.get(&alias) {
                        warn!(%alias, %bound, %address, "Name already bound in this pass, skipping");
                        continue;
                    }
                    debug!(%alias, %address, parent = %node.alias, "Discovered contract");
                    visited.insert(address.clone());
                    claimed.insert(alias.clone(), address.clone());
                    layer_aliases.insert(alias.clone(), address.clone());
                    next.push(Node {
                        alias,
                        address,
                        root: false,
                    });
                }
            }

            self.write_layer(&layer_aliases, &layer_proxies).await?;
            proxies.extend(layer_proxies.clone());
            report.aliases.extend(layer_aliases);
            report.proxies.extend(layer_proxies);
            frontier = next;
        }

        info!(
            aliases = report.aliases.len(),
            proxies = report.proxies.len(),
            failures = report.failures.len(),
            layers = report.layers,
            "Spider pass complete"
        );
        Ok(report)
    }

    async fn build_file(&self, address: &Address) -> Result<BuildFile> {
        build_files::import_build_file(self.cache, self.index, address, self.config.import).await
    }

    async fn load(&self, address: &Address) -> Result<Contract> {
        let build = self.build_file(address).await?;
        Ok(Contract::new(address.clone(), build, self.reader.clone()))
    }

    /// Own build file and, if a proxy is registered, the implementation's.
    async fn interfaces(&self, node: &Node, proxies: &Proxies) -> Result<(BuildFile, Option<BuildFile>)> {
        let own = self.build_file(&node.address).await?;
        let implementation = match proxies.get(&node.alias) {
            Some(address) => Some(self.build_file(address).await?),
            None => None,
        };
        Ok((own, implementation))
    }

    async fn expand(&self, node: &Node, proxies: &Proxies) -> Result<Expansion> {
        let mut expansion = Expansion::default();

        let (own, registered) = match self.interfaces(node, proxies).await {
            Ok(interfaces) => interfaces,
            Err(err) if node.root => return Err(err),
            Err(err) => {
                expansion.failures.push(failure(node, "build", err));
                return Ok(expansion);
            }
        };

        let mut interface = registered.clone().unwrap_or_else(|| own.clone());

        let mut declared = vec![own.name.as_str()];
        if let Some(implementation) = &registered {
            declared.push(implementation.name.as_str());
        }
        if let Some(delegates) = self.relations.delegates(&node.alias, &declared) {
            let proxy = Contract::new(node.address.clone(), interface.clone(), self.reader.clone());
            match self
                .discover(node, "implementation", delegates, &proxy, "{parent}:implementation")
                .await
            {
                Ok(found) => {
                    if let Some(first) = found.first() {
                        expansion.implementation = Some(first.address.clone());
                        match self.build_file(&first.address).await {
                            Ok(build) => interface = build,
                            Err(err) => expansion.failures.push(failure(node, "implementation", err)),
                        }
                    }
                    expansion.discoveries.extend(found);
                }
                Err(err) => expansion.failures.push(failure(node, "implementation", err)),
            }
        }

        // The effective interface's type decides which relations apply.
        let Some(relations) = self
            .relations
            .lookup(&node.alias, &[interface.name.as_str(), own.name.as_str()])
        else {
            return Ok(expansion);
        };

        let contract = Contract::new(node.address.clone(), interface, self.reader.clone());
        let contract = &contract;
        let results = join_all(
            relations
                .relations
                .iter()
                .map(move |(name, relation)| self.discover(node, name, relation, contract, "{relation}")),
        )
        .await;

        for ((name, _), result) in relations.relations.iter().zip(results) {
            match result {
                Ok(found) => expansion.discoveries.extend(found),
                Err(err) => expansion.failures.push(failure(node, name, err)),
            }
        }

        Ok(expansion)
    }

    /// Apply one relation to `contract`. Any error aborts this relation only.
    async fn discover(
        &self,
        node: &Node,
        name: &str,
        relation: &Relation,
        contract: &Contract,
        default_alias: &str,
    ) -> Result<Vec<Discovery>> {
        let addresses = relation.field_or_default(name).extract(contract).await?;
        let rule = relation
            .alias
            .clone()
            .unwrap_or_else(|| AliasRule::template(default_alias));

        let count = addresses.len();
        let mut found = Vec::with_capacity(count);
        for (index, address) in addresses.into_iter().enumerate() {
            let ctx = AliasContext {
                parent: node.alias.clone(),
                relation: name.to_string(),
                index,
                count,
                address: address.clone(),
            };
            let discovered = if rule.needs_contract() {
                Some(self.load(&address).await?)
            } else {
                None
            };
            let alias = rule.render(&ctx, discovered.as_ref()).await?;
            found.push(Discovery { alias, address });
        }
        Ok(found)
    }

    async fn write_layer(&self, aliases: &Aliases, proxies: &Proxies) -> Result<()> {
        if !aliases.is_empty() {
            let mut all = registry::get_aliases(self.cache).await?;
            all.extend(aliases.iter().map(|(k, v)| (k.clone(), v.clone())));
            registry::put_aliases(self.cache, &all).await?;
        }
        if !proxies.is_empty() {
            let mut all = registry::get_proxies(self.cache).await?;
            all.extend(proxies.iter().map(|(k, v)| (k.clone(), v.clone())));
            registry::put_proxies(self.cache, &all).await?;
        }
        Ok(())
    }
}

fn failure(node: &Node, relation: &str, err: DeployError) -> RelationFailure {
    warn!(alias = %node.alias, relation, error = %err, "Relation failed");
    RelationFailure {
        alias: node.alias.clone(),
        relation: relation.to_string(),
        message: err.to_string(),
    }
}
