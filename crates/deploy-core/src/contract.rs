//! Live contract handles.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::collaborators::ChainReader;
use crate::error::{DeployError, Result};
use crate::types::{Address, BuildFile};

/// A deployed contract bound to an address and an interface.
///
/// For proxied contracts the address is the proxy's own address while the
/// build file is the implementation's.
#[derive(Clone)]
pub struct Contract {
    address: Address,
    build: BuildFile,
    reader: Arc<dyn ChainReader>,
}

impl Contract {
    /// Create a handle.
    pub fn new(address: Address, build: BuildFile, reader: Arc<dyn ChainReader>) -> Self {
        Self {
            address,
            build,
            reader,
        }
    }

    /// Address calls are sent to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Interface the handle was built with.
    pub fn build_file(&self) -> &BuildFile {
        &self.build
    }

    /// Contract name of the interface.
    pub fn contract_name(&self) -> &str {
        &self.build.name
    }

    /// Returns true if the interface declares `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.build.has_function(field)
    }

    /// Call a zero-argument getter declared by the interface.
    pub async fn read(&self, field: &str) -> Result<Value> {
        if !self.has_field(field) {
            return Err(DeployError::Chain(format!(
                "{} has no function {}",
                self.build.name, field
            )));
        }
        self.reader
            .read_field(&self.address, field)
            .await
            .map_err(|e| DeployError::Chain(format!("{}.{}: {}", self.address, field, e)))
    }

    /// Call a getter and interpret the result as a string.
    pub async fn read_string(&self, field: &str) -> Result<String> {
        match self.read(field).await? {
            Value::String(s) => Ok(s),
            other => Err(DeployError::Chain(format!(
                "{}.{} returned {} (expected string)",
                self.address, field, other
            ))),
        }
    }

    /// Call a getter and interpret the result as one or many addresses.
    pub async fn read_addresses(&self, field: &str) -> Result<Vec<Address>> {
        let value = self.read(field).await?;
        addresses_from_value(&value).ok_or_else(|| {
            DeployError::Chain(format!(
                "{}.{} returned {} (expected address or address list)",
                self.address, field, value
            ))
        })
    }

    /// Read the raw storage word at `slot`.
    pub async fn storage_at(&self, slot: &str) -> Result<String> {
        self.reader
            .storage_at(&self.address, slot)
            .await
            .map_err(|e| DeployError::Chain(format!("{} slot {}: {}", self.address, slot, e)))
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("address", &self.address)
            .field("contract", &self.build.name)
            .finish()
    }
}

/// Interpret a JSON value as an address or list of addresses.
///
/// `null` yields an empty list.
pub fn addresses_from_value(value: &Value) -> Option<Vec<Address>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::String(s) => Some(vec![Address::new(s.clone())]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(Address::from))
            .collect(),
        _ => None,
    }
}
