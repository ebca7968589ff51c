//! Membership Control Module
//!
//! Lets the external membership service reshape the cluster from this node:
//! change the node's role, join it to a dataset as a replica (optionally
//! copying data first), edit replica host lists and report status.
//!
//! ## Core Mechanisms
//! - **Commands**: named operations with JSON parameters, parsed into
//!   `ControlCommand` before anything runs.
//! - **Catalog edits**: built with `CatalogModel::with_replica_hosts` and
//!   published atomically by `CatalogStore`.
//! - **Absorb**: `AbsorbTracker` plus a readiness probe drive the data copy.
//! - **Status**: a persisted key/value file (`NodeStatusStore`).

pub mod absorb;
pub mod agents;
pub mod control;
pub mod status;
pub mod types;

pub use absorb::{AbsorbTracker, wait_until_ready};
pub use agents::{CommandAbsorber, HttpCatalogFetcher, HttpClusterAgent, HttpReadinessProbe};
pub use control::{
    AbsorbRequest, CatalogFetcher, ClusterAgent, Collaborators, ControlConfig, ControlService,
    DataAbsorber, ReadinessProbe,
};
pub use status::NodeStatusStore;
pub use types::*;
