//! # Deploy Spider
//!
//! Relation-driven discovery of every contract reachable from a
//! deployment's roots.

pub mod relations;
pub mod spider;

pub use relations::{
    AliasContext, AliasRule, Field, NetworkRelations, Relation, RelationConfig, TypeRelations,
    IMPLEMENTATION_SLOT,
};
pub use spider::{RelationFailure, Spider, SpiderConfig, SpiderReport};
