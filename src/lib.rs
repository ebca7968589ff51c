//! Distributed Document Store Coordinator
//!
//! Coordination layer of a document-store cluster node: which databases hold
//! which data, where a request must go, how a multi-node request is split up
//! and gathered again, and how the cluster is reshaped at runtime.
//!
//! ## Architecture Modules
//! - **`catalog`**: versioned catalog descriptions, exhaustive validation, weighted
//!   consistent-hash continuums and atomically swapped snapshots.
//! - **`routing`**: broadcast and scatter routing with replica selection.
//! - **`planner`**: step registry and expansion of a message into a task graph.
//! - **`session`**: scatter/gather state machine and the dispatcher loop owning it.
//! - **`membership`**: control operations (join, absorb, replica edits, status).
//! - **`transport`**: HTTP forwarding between nodes and the node's endpoints.
//! - **`config`**: CLI and environment configuration.

pub mod catalog;
pub mod config;
pub mod membership;
pub mod planner;
pub mod routing;
pub mod session;
pub mod transport;
