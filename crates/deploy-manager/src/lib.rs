//! # Deploy Manager
//!
//! Cached deployment, naming and discovery of contracts per network and
//! deployment.
//!
//! ## Example
//!
//! ```ignore
//! use deploy_manager::prelude::*;
//!
//! let dm = DeploymentManager::new("avalanche", "usdc", collaborators, DeploymentConfig::default())
//!     .with_relations(relations);
//!
//! dm.put_roots(&roots).await?;
//! let report = dm.spider().await?;
//! let comet = dm.contract("comet").await?;
//! ```

pub mod config;
pub mod explorer;
pub mod manager;
pub mod migration;
pub mod telemetry;
pub mod verify;

pub use config::DeploymentConfig;
pub use explorer::ExplorerClient;
pub use manager::{Collaborators, DeploymentManager};
pub use migration::{migration_id, render_template, Enactment, Migration, MigrationRunner};
pub use verify::{VerificationFailure, VerifyReport};

pub use deploy_cache::{Aliases, Cache, CachePath, Proxies, Roots, VerifyArgsMap};
pub use deploy_core::{Address, BuildFile, Contract, DeployError, Result, VerifyArgs};
pub use deploy_spider::{
    AliasRule, Field, NetworkRelations, Relation, RelationConfig, SpiderReport, TypeRelations,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::DeploymentConfig;
    pub use crate::manager::{Collaborators, DeploymentManager};
    pub use crate::migration::{Migration, MigrationRunner};
    pub use deploy_cache::{Aliases, Roots};
    pub use deploy_core::prelude::*;
    pub use deploy_spider::{AliasRule, Field, Relation, RelationConfig, TypeRelations};
}
