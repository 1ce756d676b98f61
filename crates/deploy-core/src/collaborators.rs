//! Contracts for the external systems the deployment manager drives.
//!
//! Compilation, transaction submission, chain reads, source lookup and
//! third-party verification all live outside this workspace. The manager
//! only calls them through these traits, so each can be swapped for a
//! test double.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Address, BuildFile, VerifyArgs};

/// Compiles a contract source into a build file.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Build the contract at `type_path` (e.g. `test/Dog.sol`).
    async fn build(&self, type_path: &str) -> anyhow::Result<BuildFile>;
}

/// Submits deployment transactions.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deploy `build` with constructor `args` and return the new address.
    async fn submit_deploy(&self, build: &BuildFile, args: &[Value]) -> anyhow::Result<Address>;
}

/// Read-only access to deployed contract state.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Call the zero-argument getter `field` on the contract at `address`.
    async fn read_field(&self, address: &Address, field: &str) -> anyhow::Result<Value>;

    /// Read the raw 32-byte storage word at `slot`.
    async fn storage_at(&self, address: &Address, slot: &str) -> anyhow::Result<String>;
}

/// Looks up published source for contracts not built locally.
#[async_trait]
pub trait SourceIndex: Send + Sync {
    /// Returns `None` when the index has no source for `address`.
    async fn query_existing_source(&self, address: &Address) -> anyhow::Result<Option<BuildFile>>;
}

/// Submits contracts for third-party source verification.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn submit_verification(&self, args: &VerifyArgs) -> anyhow::Result<()>;
}
