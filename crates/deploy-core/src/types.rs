//! Common types shared by the cache, spider and manager.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// An on-chain address.
///
/// Stored and compared exactly as given; no checksum or format validation
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from its textual form.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The all-zero address.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    /// Decode the low 20 bytes of a 32-byte storage word (`0x` + 64 hex chars).
    pub fn from_storage_word(word: &str) -> Option<Self> {
        let hex = word.strip_prefix("0x").unwrap_or(word);
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(format!("0x{}", hex[24..].to_ascii_lowercase())))
    }

    /// Left-pad the address to a 32-byte storage word.
    pub fn to_storage_word(&self) -> String {
        let hex = self.0.strip_prefix("0x").unwrap_or(&self.0);
        format!("0x{:0>64}", hex.to_ascii_lowercase())
    }

    /// Returns true for the all-zero address.
    pub fn is_zero(&self) -> bool {
        let hex = self.0.strip_prefix("0x").unwrap_or(&self.0);
        !hex.is_empty() && hex.chars().all(|c| c == '0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Persisted metadata for a compiled or deployed contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildFile {
    /// Contract (type) name, e.g. `Dog`.
    pub name: String,

    /// Interface descriptor (ABI). Opaque to the cache.
    pub interface: serde_json::Value,

    /// Creation bytecode, hex-encoded.
    pub bytecode: String,

    /// Deployed address, set exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

impl BuildFile {
    /// Create an undeployed build file.
    pub fn new(name: impl Into<String>, interface: serde_json::Value, bytecode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface,
            bytecode: bytecode.into(),
            address: None,
        }
    }

    /// Bind the build file to its deployed address.
    ///
    /// Fails if an address was already bound.
    pub fn bind(mut self, address: Address) -> Result<Self> {
        if let Some(existing) = &self.address {
            return Err(DeployError::AddressAlreadySet {
                name: self.name,
                address: existing.to_string(),
            });
        }
        self.address = Some(address);
        Ok(self)
    }

    /// Names of the functions declared in the interface.
    pub fn functions(&self) -> Vec<&str> {
        self.interface
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.get("type").and_then(|t| t.as_str()) == Some("function"))
                    .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true if the interface declares a function with this name.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions().contains(&name)
    }
}

/// Parameters queued for third-party source verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyArgs {
    /// Address of the deployed contract.
    pub address: Address,

    /// Contract name the source should compile to.
    pub contract: String,

    /// Source path the contract was built from.
    pub source_path: String,

    /// Constructor arguments used at deploy time.
    #[serde(default)]
    pub constructor_arguments: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dog_build() -> BuildFile {
        BuildFile::new(
            "Dog",
            json!([
                {"type": "function", "name": "name"},
                {"type": "function", "name": "puppers"},
                {"type": "event", "name": "Barked"}
            ]),
            "0x6080",
        )
    }

    #[test]
    fn test_bind_once() {
        let build = dog_build().bind(Address::from("0x01")).unwrap();
        assert_eq!(build.address, Some(Address::from("0x01")));

        let err = build.bind(Address::from("0x02")).unwrap_err();
        assert!(matches!(err, DeployError::AddressAlreadySet { .. }));
    }

    #[test]
    fn test_interface_functions() {
        let build = dog_build();
        assert_eq!(build.functions(), vec!["name", "puppers"]);
        assert!(build.has_function("puppers"));
        assert!(!build.has_function("Barked"));
    }

    #[test]
    fn test_address_from_storage_word() {
        let word = "0x000000000000000000000000AbCdEf0123456789abcdef0123456789ABCDEF01";
        let address = Address::from_storage_word(word).unwrap();
        assert_eq!(address.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert!(Address::from_storage_word("0x1234").is_none());
        assert_eq!(Address::from_storage_word(&address.to_storage_word()), Some(address));
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert!(!Address::from("0x0000000000000000000000000000000000000001").is_zero());
    }

    #[test]
    fn test_address_serializes_transparently() {
        let value = serde_json::to_value(Address::from("0xabc")).unwrap();
        assert_eq!(value, json!("0xabc"));
    }
}
