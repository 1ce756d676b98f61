//! In-memory chain for tests.
//!
//! [`MockChain`] implements every collaborator trait against a shared map of
//! fake contracts, so the cache, spider and manager can be exercised without
//! a node, a compiler or a block explorer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::collaborators::{ChainReader, Compiler, Deployer, SourceIndex, Verifier};
use crate::types::{Address, BuildFile, VerifyArgs};

/// A compilable contract known to the mock compiler.
#[derive(Debug, Clone)]
struct Template {
    build: BuildFile,
    /// Field each constructor argument is stored under.
    constructor: Vec<String>,
}

#[derive(Debug, Clone)]
struct Deployed {
    fields: HashMap<String, Value>,
    storage: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct ChainState {
    templates: HashMap<String, Template>,
    contracts: HashMap<Address, Deployed>,
    published: HashMap<Address, BuildFile>,
    import_failures: HashMap<Address, u32>,
    verify_failures: HashSet<Address>,
    verified: Vec<Address>,
    reverting_fields: HashSet<(Address, String)>,
    next_address: u64,
    compiles: usize,
    import_queries: usize,
    fail_deploys: bool,
}

/// Shared in-memory chain. Clones share state.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<RwLock<ChainState>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface with one getter per name.
    pub fn interface(functions: &[&str]) -> Value {
        Value::Array(
            functions
                .iter()
                .map(|f| json!({"type": "function", "name": f, "inputs": [], "stateMutability": "view"}))
                .collect(),
        )
    }

    /// Build file for a contract exposing the given getters.
    pub fn build_file(name: &str, functions: &[&str]) -> BuildFile {
        BuildFile::new(name, Self::interface(functions), format!("0x{}", hex_name(name)))
    }

    /// Make `type_path` compilable. Constructor args are stored in `constructor` fields, in order.
    pub async fn register_template(&self, type_path: &str, build: BuildFile, constructor: &[&str]) {
        let mut state = self.state.write().await;
        state.templates.insert(
            type_path.to_string(),
            Template {
                build,
                constructor: constructor.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// Place a contract on chain directly, bypassing compile and deploy.
    pub async fn install(&self, fields: Value) -> Address {
        let mut state = self.state.write().await;
        let address = state.allocate_address();
        let fields = match fields {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        state.contracts.insert(
            address.clone(),
            Deployed {
                fields,
                storage: HashMap::new(),
            },
        );
        address
    }

    pub async fn set_field(&self, address: &Address, field: &str, value: Value) {
        let mut state = self.state.write().await;
        if let Some(contract) = state.contracts.get_mut(address) {
            contract.fields.insert(field.to_string(), value);
        }
    }

    pub async fn set_storage(&self, address: &Address, slot: &str, word: String) {
        let mut state = self.state.write().await;
        if let Some(contract) = state.contracts.get_mut(address) {
            contract.storage.insert(slot.to_string(), word);
        }
    }

    /// Make reads of `field` on `address` revert.
    pub async fn revert_field(&self, address: &Address, field: &str) {
        let mut state = self.state.write().await;
        state
            .reverting_fields
            .insert((address.clone(), field.to_string()));
    }

    /// Publish source for `address` in the mock block explorer.
    pub async fn publish(&self, address: &Address, build: BuildFile) {
        let mut state = self.state.write().await;
        state.published.insert(address.clone(), build);
    }

    /// Fail the next `times` source queries for `address`.
    pub async fn fail_imports(&self, address: &Address, times: u32) {
        let mut state = self.state.write().await;
        state.import_failures.insert(address.clone(), times);
    }

    pub async fn fail_verification(&self, address: &Address) {
        let mut state = self.state.write().await;
        state.verify_failures.insert(address.clone());
    }

    pub async fn fail_deploys(&self, fail: bool) {
        self.state.write().await.fail_deploys = fail;
    }

    pub async fn verified(&self) -> Vec<Address> {
        self.state.read().await.verified.clone()
    }

    pub async fn compiles(&self) -> usize {
        self.state.read().await.compiles
    }

    pub async fn import_queries(&self) -> usize {
        self.state.read().await.import_queries
    }
}

impl ChainState {
    fn allocate_address(&mut self) -> Address {
        self.next_address += 1;
        Address::new(format!("0x{:040x}", self.next_address))
    }
}

fn hex_name(name: &str) -> String {
    name.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[async_trait]
impl Compiler for MockChain {
    async fn build(&self, type_path: &str) -> anyhow::Result<BuildFile> {
        let mut state = self.state.write().await;
        state.compiles += 1;
        state
            .templates
            .get(type_path)
            .map(|t| t.build.clone())
            .ok_or_else(|| anyhow!("no such source: {}", type_path))
    }
}

#[async_trait]
impl Deployer for MockChain {
    async fn submit_deploy(&self, build: &BuildFile, args: &[Value]) -> anyhow::Result<Address> {
        let mut state = self.state.write().await;
        if state.fail_deploys {
            bail!("transaction reverted");
        }
        let constructor = state
            .templates
            .values()
            .find(|t| t.build.bytecode == build.bytecode)
            .map(|t| t.constructor.clone())
            .unwrap_or_default();
        if args.len() != constructor.len() {
            bail!(
                "{} expects {} constructor argument(s), got {}",
                build.name,
                constructor.len(),
                args.len()
            );
        }
        let fields = constructor.into_iter().zip(args.iter().cloned()).collect();
        let address = state.allocate_address();
        state.contracts.insert(
            address.clone(),
            Deployed {
                fields,
                storage: HashMap::new(),
            },
        );
        Ok(address)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn read_field(&self, address: &Address, field: &str) -> anyhow::Result<Value> {
        let state = self.state.read().await;
        if state
            .reverting_fields
            .contains(&(address.clone(), field.to_string()))
        {
            bail!("execution reverted");
        }
        let contract = state
            .contracts
            .get(address)
            .ok_or_else(|| anyhow!("no contract at {}", address))?;
        contract
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| anyhow!("execution reverted: {}", field))
    }

    async fn storage_at(&self, address: &Address, slot: &str) -> anyhow::Result<String> {
        let state = self.state.read().await;
        Ok(state
            .contracts
            .get(address)
            .and_then(|c| c.storage.get(slot).cloned())
            .unwrap_or_else(|| Address::zero().to_storage_word()))
    }
}

#[async_trait]
impl SourceIndex for MockChain {
    async fn query_existing_source(&self, address: &Address) -> anyhow::Result<Option<BuildFile>> {
        let mut state = self.state.write().await;
        state.import_queries += 1;
        if let Some(remaining) = state.import_failures.get_mut(address) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("rate limited");
            }
        }
        Ok(state.published.get(address).cloned())
    }
}

#[async_trait]
impl Verifier for MockChain {
    async fn submit_verification(&self, args: &VerifyArgs) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if state.verify_failures.contains(&args.address) {
            bail!("bytecode mismatch");
        }
        state.verified.push(args.address.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_stores_constructor_fields() {
        let chain = MockChain::new();
        let dog = MockChain::build_file("Dog", &["name", "father"]);
        chain.register_template("test/Dog.sol", dog.clone(), &["name", "father"]).await;

        let build = chain.build("test/Dog.sol").await.unwrap();
        let address = chain
            .submit_deploy(&build, &[json!("spot"), json!("0x00")])
            .await
            .unwrap();

        assert_eq!(chain.read_field(&address, "name").await.unwrap(), json!("spot"));
        assert!(chain.read_field(&address, "pups").await.is_err());
        assert_eq!(chain.compiles().await, 1);
    }

    #[tokio::test]
    async fn test_scripted_import_failures() {
        let chain = MockChain::new();
        let address = chain.install(json!({})).await;
        chain.publish(&address, MockChain::build_file("Token", &["symbol"])).await;
        chain.fail_imports(&address, 1).await;

        assert!(chain.query_existing_source(&address).await.is_err());
        assert!(chain.query_existing_source(&address).await.unwrap().is_some());
        assert_eq!(chain.import_queries().await, 2);
    }
}
