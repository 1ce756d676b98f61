//! Ordered migrations with idempotent artifacts.
//!
//! A migration runs in two phases. `prepare` deploys whatever the change
//! needs and returns an artifact; the artifact is stored under
//! `artifacts/<id>` so later runs reuse it instead of preparing again.
//! `enact` applies the change using that artifact, and a record under
//! `enacted/<id>` keeps it from being applied twice.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy_cache::CachePath;
use deploy_core::{DeployError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::manager::DeploymentManager;

pub const MIGRATIONS_DIR: &str = "migrations";
pub const ENACTED_DIR: &str = "enacted";

const TEMPLATE: &str = r#"use async_trait::async_trait;
use deploy_manager::{DeploymentManager, Migration};
use serde_json::{json, Value};

pub struct {type_name};

#[async_trait]
impl Migration for {type_name} {
    fn name(&self) -> &str {
        "{name}"
    }

    async fn prepare(&self, _manager: &DeploymentManager) -> anyhow::Result<Value> {
        Ok(json!({}))
    }

    async fn enact(&self, _manager: &DeploymentManager, _artifact: Value) -> anyhow::Result<()> {
        Ok(())
    }
}
"#;

/// Render the migration scaffold for `name`.
pub fn render_template(name: &str) -> String {
    TEMPLATE
        .replace("{type_name}", &type_name(name))
        .replace("{name}", name)
}

/// `cool_thing` -> `CoolThing`.
fn type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if upper {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
            upper = false;
        } else {
            upper = true;
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'M');
    }
    out
}

/// Artifact and enactment key for a migration, e.g. `1_cool`.
pub fn migration_id(ordinal: u64, name: &str) -> String {
    format!("{}_{}", ordinal, name)
}

/// A deployment change applied at most once per deployment.
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    /// Deploy or compute what the change needs. The result is stored as the artifact.
    async fn prepare(&self, manager: &DeploymentManager) -> anyhow::Result<Value>;

    /// Apply the change.
    async fn enact(&self, manager: &DeploymentManager, artifact: Value) -> anyhow::Result<()>;
}

/// Record that a migration was enacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enactment {
    pub id: String,
    pub enacted_at: DateTime<Utc>,
}

/// Runs registered migrations in ordinal order.
#[derive(Default)]
pub struct MigrationRunner {
    migrations: BTreeMap<u64, Box<dyn Migration>>,
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `migration` at `ordinal`. Ordinals are unique.
    pub fn register(&mut self, ordinal: u64, migration: Box<dyn Migration>) -> Result<()> {
        if let Some(existing) = self.migrations.get(&ordinal) {
            return Err(DeployError::MigrationExists(migration_id(ordinal, existing.name())));
        }
        self.migrations.insert(ordinal, migration);
        Ok(())
    }

    pub fn with(mut self, ordinal: u64, migration: impl Migration + 'static) -> Result<Self> {
        self.register(ordinal, Box::new(migration))?;
        Ok(self)
    }

    /// Registered migration ids, in run order.
    pub fn ids(&self) -> Vec<String> {
        self.migrations
            .iter()
            .map(|(ordinal, m)| migration_id(*ordinal, m.name()))
            .collect()
    }

    /// Prepare every migration that has no stored artifact yet.
    pub async fn prepare(&self, manager: &DeploymentManager) -> Result<()> {
        for (ordinal, migration) in &self.migrations {
            prepare_one(manager, &migration_id(*ordinal, migration.name()), migration.as_ref()).await?;
        }
        Ok(())
    }

    /// Enact every prepared migration not yet enacted. Returns the ids enacted.
    ///
    /// A migration without an artifact fails with [`DeployError::MissingArtifact`].
    pub async fn enact(&self, manager: &DeploymentManager) -> Result<Vec<String>> {
        let mut enacted = Vec::new();
        for (ordinal, migration) in &self.migrations {
            let id = migration_id(*ordinal, migration.name());
            if enact_one(manager, &id, migration.as_ref()).await? {
                enacted.push(id);
            }
        }
        Ok(enacted)
    }

    /// Prepare then enact each migration in turn.
    pub async fn run(&self, manager: &DeploymentManager) -> Result<Vec<String>> {
        let mut enacted = Vec::new();
        for (ordinal, migration) in &self.migrations {
            let id = migration_id(*ordinal, migration.name());
            if is_enacted(manager, &id).await? {
                continue;
            }
            prepare_one(manager, &id, migration.as_ref()).await?;
            if enact_one(manager, &id, migration.as_ref()).await? {
                enacted.push(id);
            }
        }
        Ok(enacted)
    }
}

fn enacted_path(id: &str) -> CachePath {
    CachePath::new([ENACTED_DIR, id])
}

/// When `id` was enacted, if it has been.
pub async fn enactment(manager: &DeploymentManager, id: &str) -> Result<Option<Enactment>> {
    manager.cache().get(&enacted_path(id)).await
}

async fn is_enacted(manager: &DeploymentManager, id: &str) -> Result<bool> {
    manager.cache().contains(&enacted_path(id)).await
}

async fn prepare_one(manager: &DeploymentManager, id: &str, migration: &dyn Migration) -> Result<Value> {
    if let Some(artifact) = manager.read_artifact::<Value>(id).await? {
        info!(%id, "Artifact exists, skipping prepare");
        return Ok(artifact);
    }

    info!(%id, "📋 Preparing migration");
    let artifact = migration
        .prepare(manager)
        .await
        .map_err(|e| migration_error(id, "prepare", e))?;
    manager.store_artifact(id, &artifact).await?;
    Ok(artifact)
}

async fn enact_one(manager: &DeploymentManager, id: &str, migration: &dyn Migration) -> Result<bool> {
    if is_enacted(manager, id).await? {
        return Ok(false);
    }
    let artifact = manager
        .read_artifact::<Value>(id)
        .await?
        .ok_or_else(|| DeployError::MissingArtifact(id.to_string()))?;

    info!(%id, "⚡ Enacting migration");
    migration
        .enact(manager, artifact)
        .await
        .map_err(|e| migration_error(id, "enact", e))?;

    let record = Enactment {
        id: id.to_string(),
        enacted_at: Utc::now(),
    };
    manager.cache().put(&enacted_path(id), &record).await?;
    Ok(true)
}

fn migration_error(id: &str, phase: &str, err: anyhow::Error) -> DeployError {
    DeployError::Migration {
        id: id.to_string(),
        message: format!("{} failed: {:#}", phase, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let rendered = render_template("cool");
        assert!(rendered.contains("pub struct Cool;"));
        assert!(rendered.contains("impl Migration for Cool {"));
        assert!(rendered.contains("\"cool\""));
        assert!(!rendered.contains("{name}"));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(type_name("cool"), "Cool");
        assert_eq!(type_name("add-usdc_market"), "AddUsdcMarket");
        assert_eq!(type_name("2x"), "M2x");
    }

    #[test]
    fn test_migration_id() {
        assert_eq!(migration_id(1, "cool"), "1_cool");
    }
}
