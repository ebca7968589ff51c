//! Node Transport Module
//!
//! HTTP plumbing between nodes and towards clients.
//!
//! ## Submodules
//! - **`types`**: the `Transport` seam the dispatcher sends through.
//! - **`forwarder`**: reqwest-based `Transport` with retries and an on-disk
//!   per-peer buffer for unreachable nodes.
//! - **`protocol`**: endpoint paths and JSON DTOs.
//! - **`retry`**: backoff between attempts of one outbound request.
//! - **`handlers`**: axum handlers serving those endpoints.

pub mod forwarder;
pub mod handlers;
pub mod protocol;
pub mod retry;
pub mod types;

pub use forwarder::Forwarder;
pub use types::*;
