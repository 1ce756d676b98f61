//! Relation configuration.
//!
//! A [`RelationConfig`] tells the spider, for each contract type (or alias),
//! how to find the addresses of related contracts and what to call them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use deploy_core::{Address, Contract, DeployError, Result};
use futures::future::BoxFuture;
use serde::Deserialize;

/// EIP-1967 implementation slot of transparent upgradeable proxies.
pub const IMPLEMENTATION_SLOT: &str =
    "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// Async accessor run against a live contract.
pub type FieldFn = Arc<dyn Fn(Contract) -> BoxFuture<'static, Result<Vec<Address>>> + Send + Sync>;

/// Name derivation from the discovery context.
pub type AliasFn = Arc<dyn Fn(&AliasContext) -> String + Send + Sync>;

/// Where a relation's addresses come from.
#[derive(Clone)]
pub enum Field {
    /// Zero-argument getter returning an address or address list.
    Static(String),
    /// Arbitrary async read against the parent contract.
    Dynamic(FieldFn),
    /// Raw storage slot holding an address in its low 20 bytes.
    Slot(String),
}

impl Field {
    pub fn getter(name: impl Into<String>) -> Self {
        Field::Static(name.into())
    }

    pub fn slot(slot: impl Into<String>) -> Self {
        Field::Slot(slot.into())
    }

    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(Contract) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Address>>> + Send + 'static,
    {
        Field::Dynamic(Arc::new(move |contract| Box::pin(f(contract))))
    }

    /// Read the related addresses from `contract`. Zero addresses are dropped.
    pub async fn extract(&self, contract: &Contract) -> Result<Vec<Address>> {
        let addresses = match self {
            Field::Static(getter) => contract.read_addresses(getter).await?,
            Field::Dynamic(f) => f(contract.clone()).await?,
            Field::Slot(slot) => {
                let word = contract.storage_at(slot).await?;
                let address = Address::from_storage_word(&word).ok_or_else(|| {
                    DeployError::Chain(format!("slot {} holds malformed word {}", slot, word))
                })?;
                vec![address]
            }
        };
        Ok(addresses.into_iter().filter(|a| !a.is_zero()).collect())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Static(getter) => f.debug_tuple("Static").field(getter).finish(),
            Field::Dynamic(_) => f.write_str("Dynamic(..)"),
            Field::Slot(slot) => f.debug_tuple("Slot").field(slot).finish(),
        }
    }
}

/// Context available when naming a discovered address.
#[derive(Debug, Clone)]
pub struct AliasContext {
    /// Alias of the contract the relation was read from.
    pub parent: String,
    /// Relation name (`implementation` for delegates).
    pub relation: String,
    /// Position of the address in the relation's result.
    pub index: usize,
    /// Number of addresses the relation yielded.
    pub count: usize,
    /// The discovered address.
    pub address: Address,
}

/// How a discovered address is named.
#[derive(Clone)]
pub enum AliasRule {
    /// Text with `{parent}`, `{relation}` and `{index}` placeholders.
    Template(String),
    /// Getter on the discovered contract returning its name, e.g. `name`.
    FromField(String),
    /// Derived from the discovery context.
    Derive(AliasFn),
}

impl AliasRule {
    pub fn template(template: impl Into<String>) -> Self {
        AliasRule::Template(template.into())
    }

    pub fn from_field(getter: impl Into<String>) -> Self {
        AliasRule::FromField(getter.into())
    }

    pub fn derive<F>(f: F) -> Self
    where
        F: Fn(&AliasContext) -> String + Send + Sync + 'static,
    {
        AliasRule::Derive(Arc::new(f))
    }

    /// Parse the configuration form: `.getter` or a template.
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix('.') {
            Some(getter) => AliasRule::FromField(getter.to_string()),
            None => AliasRule::Template(text.to_string()),
        }
    }

    /// Whether naming requires the discovered contract to be resolved first.
    pub fn needs_contract(&self) -> bool {
        matches!(self, AliasRule::FromField(_))
    }

    /// Name for the discovered address.
    ///
    /// `discovered` must be provided when [`needs_contract`](Self::needs_contract) is true.
    pub async fn render(&self, ctx: &AliasContext, discovered: Option<&Contract>) -> Result<String> {
        match self {
            AliasRule::Template(template) => Ok(render_template(template, ctx)),
            AliasRule::FromField(getter) => {
                let contract = discovered.ok_or_else(|| DeployError::Relation {
                    relation: ctx.relation.clone(),
                    message: format!("{} must be resolved to read .{}", ctx.address, getter),
                })?;
                contract.read_string(getter).await
            }
            AliasRule::Derive(f) => Ok(f(ctx)),
        }
    }
}

impl fmt::Debug for AliasRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasRule::Template(t) => f.debug_tuple("Template").field(t).finish(),
            AliasRule::FromField(g) => f.debug_tuple("FromField").field(g).finish(),
            AliasRule::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

/// Multi-address results get an index suffix unless the template places it.
fn render_template(template: &str, ctx: &AliasContext) -> String {
    let mut name = template
        .replace("{parent}", &ctx.parent)
        .replace("{relation}", &ctx.relation)
        .replace("{index}", &ctx.index.to_string());
    if ctx.count > 1 && !template.contains("{index}") {
        name = format!("{}:{}", name, ctx.index);
    }
    name
}

/// One way of reaching related contracts.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Defaults to a getter named after the relation.
    pub field: Option<Field>,
    /// Defaults to `{relation}`, or `{parent}:implementation` for delegates.
    pub alias: Option<AliasRule>,
}

impl Relation {
    pub fn new() -> Self {
        Self {
            field: None,
            alias: None,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.field = Some(field);
        self
    }

    pub fn alias(mut self, alias: AliasRule) -> Self {
        self.alias = Some(alias);
        self
    }

    /// Field to read, given the relation's name.
    pub fn field_or_default(&self, name: &str) -> Field {
        self.field.clone().unwrap_or_else(|| Field::Static(name.to_string()))
    }
}

impl Default for Relation {
    fn default() -> Self {
        Self::new()
    }
}

/// Relations declared for one contract type or alias.
#[derive(Debug, Clone, Default)]
pub struct TypeRelations {
    /// Locates the implementation behind a proxy that has no registered proxy entry.
    pub delegates: Option<Relation>,
    /// Relations in declaration order.
    pub relations: Vec<(String, Relation)>,
}

impl TypeRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegates(mut self, relation: Relation) -> Self {
        self.delegates = Some(relation);
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.push((name.into(), relation));
        self
    }
}

/// Per-type relation tables for one network/deployment.
#[derive(Debug, Clone, Default)]
pub struct RelationConfig {
    types: HashMap<String, TypeRelations>,
}

impl RelationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register relations for a contract name or alias.
    pub fn with(mut self, key: impl Into<String>, relations: TypeRelations) -> Self {
        self.types.insert(key.into(), relations);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, relations: TypeRelations) {
        self.types.insert(key.into(), relations);
    }

    /// Relations for a node: its alias takes precedence over its type names,
    /// which are tried in order.
    pub fn lookup(&self, alias: &str, type_names: &[&str]) -> Option<&TypeRelations> {
        self.types
            .get(alias)
            .or_else(|| type_names.iter().find_map(|name| self.types.get(*name)))
    }

    /// First delegate descriptor declared for the alias or any of the type names.
    ///
    /// Proxies usually declare `delegates` under their own type while the
    /// relations live under the implementation's type, so this does not stop
    /// at the first entry that merely exists.
    pub fn delegates(&self, alias: &str, type_names: &[&str]) -> Option<&Relation> {
        std::iter::once(alias)
            .chain(type_names.iter().copied())
            .filter_map(|key| self.types.get(key))
            .find_map(|relations| relations.delegates.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Parse the declarative form.
    ///
    /// ```json
    /// {
    ///   "Comet": {
    ///     "delegates": { "field": { "slot": "0x3608..." } },
    ///     "relations": {
    ///       "baseToken": { "alias": ".symbol" },
    ///       "governor": { "field": "governor", "alias": "governor" }
    ///     }
    ///   }
    /// }
    /// ```
    ///
    /// Relations are declared in key order.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let specs: BTreeMap<String, TypeSpec> = serde_json::from_value(value)
            .map_err(|e| DeployError::Config(format!("invalid relation config: {}", e)))?;
        let types = specs
            .into_iter()
            .map(|(key, spec)| (key, spec.into_relations()))
            .collect();
        Ok(Self { types })
    }
}

/// Relation configs keyed by network, then deployment.
#[derive(Debug, Clone, Default)]
pub struct NetworkRelations {
    networks: HashMap<String, HashMap<String, RelationConfig>>,
}

impl NetworkRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: &str, deployment: &str, config: RelationConfig) {
        self.networks
            .entry(network.to_string())
            .or_default()
            .insert(deployment.to_string(), config);
    }

    pub fn get(&self, network: &str, deployment: &str) -> Option<&RelationConfig> {
        self.networks.get(network)?.get(deployment)
    }

    /// Parse `{ "<network>": { "<deployment>": <relation config> } }`.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
            serde_json::from_value(value)
                .map_err(|e| DeployError::Config(format!("invalid network relations: {}", e)))?;
        let mut relations = Self::new();
        for (network, deployments) in raw {
            for (deployment, config) in deployments {
                relations.insert(&network, &deployment, RelationConfig::from_json(config)?);
            }
        }
        Ok(relations)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeSpec {
    #[serde(default)]
    delegates: Option<RelationSpec>,
    #[serde(default)]
    relations: BTreeMap<String, RelationSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationSpec {
    #[serde(default)]
    field: Option<FieldSpec>,
    #[serde(default)]
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Getter(String),
    Slot { slot: String },
}

impl TypeSpec {
    fn into_relations(self) -> TypeRelations {
        TypeRelations {
            delegates: self.delegates.map(RelationSpec::into_relation),
            relations: self
                .relations
                .into_iter()
                .map(|(name, spec)| (name, spec.into_relation()))
                .collect(),
        }
    }
}

impl RelationSpec {
    fn into_relation(self) -> Relation {
        Relation {
            field: self.field.map(|field| match field {
                FieldSpec::Getter(getter) => Field::Static(getter),
                FieldSpec::Slot { slot } => Field::Slot(slot),
            }),
            alias: self.alias.as_deref().map(AliasRule::parse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::testing::MockChain;
    use serde_json::json;

    fn ctx(index: usize, count: usize) -> AliasContext {
        AliasContext {
            parent: "comet".into(),
            relation: "assets".into(),
            index,
            count,
            address: Address::from("0x01"),
        }
    }

    #[tokio::test]
    async fn test_template_rendering() {
        let rule = AliasRule::template("{parent}:{relation}");
        assert_eq!(rule.render(&ctx(0, 1), None).await.unwrap(), "comet:assets");
        assert_eq!(rule.render(&ctx(1, 2), None).await.unwrap(), "comet:assets:1");

        let indexed = AliasRule::template("asset{index}");
        assert_eq!(indexed.render(&ctx(1, 2), None).await.unwrap(), "asset1");
    }

    #[tokio::test]
    async fn test_derived_alias() {
        let rule = AliasRule::derive(|ctx| format!("{}-{}", ctx.relation, ctx.address));
        assert_eq!(rule.render(&ctx(0, 1), None).await.unwrap(), "assets-0x01");
    }

    #[tokio::test]
    async fn test_field_alias_requires_contract() {
        let rule = AliasRule::parse(".symbol");
        assert!(rule.needs_contract());
        assert!(rule.render(&ctx(0, 1), None).await.is_err());

        let chain = MockChain::new();
        let address = chain.install(json!({"symbol": "USDC"})).await;
        let token = Contract::new(
            address,
            MockChain::build_file("Token", &["symbol"]),
            Arc::new(chain),
        );
        assert_eq!(rule.render(&ctx(0, 1), Some(&token)).await.unwrap(), "USDC");
    }

    #[tokio::test]
    async fn test_field_extraction() {
        let chain = MockChain::new();
        let dog = chain
            .install(json!({"father": "0x0000000000000000000000000000000000000000", "pups": ["0x02", "0x03"]}))
            .await;
        chain
            .set_storage(&dog, IMPLEMENTATION_SLOT, Address::from("0x00000000000000000000000000000000000000aa").to_storage_word())
            .await;
        let contract = Contract::new(
            dog,
            MockChain::build_file("Dog", &["father", "pups"]),
            Arc::new(chain),
        );

        assert!(Field::getter("father").extract(&contract).await.unwrap().is_empty());
        assert_eq!(
            Field::getter("pups").extract(&contract).await.unwrap(),
            vec![Address::from("0x02"), Address::from("0x03")]
        );
        assert_eq!(
            Field::slot(IMPLEMENTATION_SLOT).extract(&contract).await.unwrap(),
            vec![Address::from("0x00000000000000000000000000000000000000aa")]
        );

        let dynamic = Field::dynamic(|contract: Contract| async move {
            let mut pups = contract.read_addresses("pups").await?;
            pups.reverse();
            Ok::<_, DeployError>(pups)
        });
        assert_eq!(
            dynamic.extract(&contract).await.unwrap(),
            vec![Address::from("0x03"), Address::from("0x02")]
        );
    }

    #[test]
    fn test_from_json() {
        let config = RelationConfig::from_json(json!({
            "finn": {
                "delegates": {"field": {"slot": IMPLEMENTATION_SLOT}},
                "relations": {
                    "father": {"alias": ".name"},
                    "pups": {"field": "puppers", "alias": ".name"}
                }
            },
            "Comet": {"relations": {"governor": {}}}
        }))
        .unwrap();

        let finn = config.lookup("finn", &["Dog"]).unwrap();
        assert!(matches!(
            finn.delegates.as_ref().and_then(|d| d.field.as_ref()),
            Some(Field::Slot(slot)) if slot == IMPLEMENTATION_SLOT
        ));
        let names: Vec<&str> = finn.relations.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["father", "pups"]);
        assert!(matches!(&finn.relations[1].1.field, Some(Field::Static(g)) if g == "puppers"));

        assert!(config.lookup("comet", &["Comet"]).is_some());
        assert!(config.lookup("usdc", &["FiatToken"]).is_none());
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        let err = RelationConfig::from_json(json!({"finn": {"relatoins": {}}})).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn test_network_relations() {
        let relations = NetworkRelations::from_json(json!({
            "mumbai": {"usdc": {"Comet": {"relations": {}}}}
        }))
        .unwrap();
        assert!(relations.get("mumbai", "usdc").is_some());
        assert!(relations.get("mumbai", "weth").is_none());
        assert!(relations.get("goerli", "usdc").is_none());
    }

    #[test]
    fn test_delegates_found_past_entries_without_them() {
        let config = RelationConfig::new()
            .with("Comet", TypeRelations::new().relation("baseToken", Relation::new()))
            .with(
                "TransparentUpgradeableProxy",
                TypeRelations::new().delegates(Relation::new().field(Field::slot(IMPLEMENTATION_SLOT))),
            );

        let delegates = config
            .delegates("comet", &["Comet", "TransparentUpgradeableProxy"])
            .unwrap();
        assert!(matches!(delegates.field, Some(Field::Slot(ref slot)) if slot == IMPLEMENTATION_SLOT));
        assert!(config.delegates("comet", &["Comet"]).is_none());

        let relations = config
            .lookup("comet", &["Comet", "TransparentUpgradeableProxy"])
            .unwrap();
        assert_eq!(relations.relations[0].0, "baseToken");
    }
}
