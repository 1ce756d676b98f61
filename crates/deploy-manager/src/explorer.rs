//! Etherscan-compatible block explorer client.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use deploy_core::{Address, BuildFile, SourceIndex};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// `ABI` value returned for addresses without published source.
const UNVERIFIED: &str = "Contract source code not verified";

/// Source index backed by an Etherscan-style HTTP API.
#[derive(Clone)]
pub struct ExplorerClient {
    /// API endpoint, e.g. `https://api.snowtrace.io/api`.
    base_url: String,

    api_key: String,

    /// HTTP client.
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    #[serde(rename = "ABI")]
    abi: String,

    #[serde(rename = "ContractName")]
    contract_name: String,
}

#[derive(Debug, Deserialize)]
struct SourceResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    result: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl ExplorerClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client: reqwest::Client::new(),
        }
    }

    async fn call(&self, module: &str, action: &str, address: &Address) -> anyhow::Result<Value> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("module", module),
                ("action", action),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("{} request for {} failed", action, address))?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

/// Contract name and ABI from a `getsourcecode` response, or `None` if unverified.
pub fn parse_source_response(body: Value) -> anyhow::Result<Option<(String, Value)>> {
    let response: SourceResponse = serde_json::from_value(body)?;
    if response.status != "1" {
        bail!("explorer error: {} ({})", response.message, response.result);
    }

    let entries: Vec<SourceEntry> = serde_json::from_value(response.result)?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };
    if entry.abi == UNVERIFIED || entry.contract_name.is_empty() {
        return Ok(None);
    }

    let interface: Value =
        serde_json::from_str(&entry.abi).context("explorer returned a malformed ABI")?;
    Ok(Some((entry.contract_name, interface)))
}

/// Bytecode from an `eth_getCode` proxy response.
pub fn parse_code_response(body: Value) -> anyhow::Result<String> {
    let response: CodeResponse = serde_json::from_value(body)?;
    if let Some(error) = response.error {
        bail!("explorer error: {}", error);
    }
    response
        .result
        .filter(|code| code.starts_with("0x"))
        .ok_or_else(|| anyhow!("explorer returned no bytecode"))
}

#[async_trait]
impl SourceIndex for ExplorerClient {
    async fn query_existing_source(&self, address: &Address) -> anyhow::Result<Option<BuildFile>> {
        let source = self.call("contract", "getsourcecode", address).await?;
        let Some((name, interface)) = parse_source_response(source)? else {
            debug!(%address, "No verified source published");
            return Ok(None);
        };

        let code = self.call("proxy", "eth_getCode", address).await?;
        let bytecode = parse_code_response(code)?;

        Ok(Some(BuildFile::new(name, interface, bytecode)))
    }
}
