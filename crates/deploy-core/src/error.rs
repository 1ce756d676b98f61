//! Error types for the deployment manager.

use thiserror::Error;

/// Main error type for deployment operations.
#[derive(Error, Debug, Clone)]
pub enum DeployError {
    /// Importing a build file for an address failed after all retries.
    #[error("Import failed for {address} after {attempts} attempt(s): {message}")]
    ImportFailed {
        address: String,
        attempts: u32,
        message: String,
    },

    /// Compilation or deployment submission failed.
    #[error("Deploy of {name} failed: {message}")]
    DeployFailed { name: String, message: String },

    /// No alias is registered under this name.
    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    /// No build file is cached for this address.
    #[error("No build file for address {0}")]
    MissingBuildFile(String),

    /// A migration with the computed identifier already exists.
    #[error("Migration already exists: {0}")]
    MigrationExists(String),

    /// Enact was requested for a migration that was never prepared.
    #[error("No artifact stored for migration {0}")]
    MissingArtifact(String),

    /// A migration's prepare or enact step failed.
    #[error("Migration {id} failed: {message}")]
    Migration { id: String, message: String },

    /// Attempted to set the address of a build file twice.
    #[error("Build file {name} is already bound to {address}")]
    AddressAlreadySet { name: String, address: String },

    /// Durable cache read or write failed.
    #[error("Cache error at {path}: {message}")]
    Cache { path: String, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A relation extractor failed for one instance.
    #[error("Relation {relation} failed: {message}")]
    Relation { relation: String, message: String },

    /// Network read failed.
    #[error("Chain error: {0}")]
    Chain(String),

    /// Verification submission failed.
    #[error("Verification failed for {address}: {message}")]
    Verification { address: String, message: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeployError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployError::Chain(_)
                | DeployError::ImportFailed { .. }
                | DeployError::MissingBuildFile(_)
                | DeployError::Verification { .. }
        )
    }

    /// Returns the address this error concerns, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            DeployError::ImportFailed { address, .. } => Some(address),
            DeployError::MissingBuildFile(address) => Some(address),
            DeployError::AddressAlreadySet { address, .. } => Some(address),
            DeployError::Verification { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// Convenience Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        DeployError::Cache {
            path: String::from("<unknown>"),
            message: err.to_string(),
        }
    }
}
