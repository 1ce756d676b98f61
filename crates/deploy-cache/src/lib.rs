//! # Deploy Cache
//!
//! Namespaced two-tier cache and the registries stored in it.

pub mod build_files;
pub mod cache;
pub mod registry;

pub use build_files::{import_build_file, ImportPolicy};
pub use cache::{Cache, CachePath};
pub use registry::{Aliases, Proxies, Roots, VerifyArgsMap};
