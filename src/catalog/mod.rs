//! Cluster Catalog Module
//!
//! Knows which datasets exist and which physical databases hold them.
//!
//! ## Core Concepts
//! - **Catalog description**: a versioned JSON document (v1 `farms`/`zones`/`ring`,
//!   v2 `replicas`/`slices`). A single loader detects the version.
//! - **Validation**: every check runs; a broken catalog yields one error listing
//!   every problem with its JSON path.
//! - **Continuum**: each v1 dataset ring and each v2 replica with two or more
//!   partitions gets a weighted consistent-hash continuum at load time.
//! - **Snapshots**: a loaded `CatalogModel` never changes. `CatalogStore` swaps whole
//!   models so readers always see a consistent catalog.

pub mod error;
pub mod loader;
pub mod ring;
pub mod store;
pub mod types;
mod validator;
mod version1;
mod version2;

pub use error::{CatalogError, ValidationError};
pub use loader::{detect_version, load, load_file};
pub use ring::ConsistentHashRing;
pub use store::CatalogStore;
pub use types::*;

#[cfg(test)]
mod tests;
