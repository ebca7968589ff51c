//! Scatter/Gather Session Module
//!
//! Tracks in-flight requests from planning to the final reply.
//!
//! ## Submodules
//! - **`session`**: per-request state machine (`start`, `receive`, `is_done`).
//! - **`dispatcher`**: event loop owning every active session, with deadlines.
//! - **`executor`**: runs task messages through the local step registry.

pub mod dispatcher;
pub mod executor;
pub mod session;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
pub use executor::run_task;
pub use session::{EffectBuffer, Session, SessionDispatcher};
pub use types::*;

#[cfg(test)]
mod tests;
