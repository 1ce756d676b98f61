//! # Deploy Core
//!
//! Core types shared by the deployment manager crates.
//!
//! This crate provides the fundamental building blocks:
//! - [`BuildFile`] - compiled interface and bytecode of a contract
//! - [`Contract`] - live handle bound to an address and an interface
//! - [`collaborators`] - traits for compiler, deployer, chain and explorer
//! - [`DeployError`] - error types

pub mod collaborators;
pub mod contract;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

// Re-exports for convenience
pub use collaborators::{ChainReader, Compiler, Deployer, SourceIndex, Verifier};
pub use contract::{addresses_from_value, Contract};
pub use error::{DeployError, Result};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::collaborators::{ChainReader, Compiler, Deployer, SourceIndex, Verifier};
    pub use crate::contract::Contract;
    pub use crate::error::{DeployError, Result};
    pub use crate::types::{Address, BuildFile, VerifyArgs};
}
