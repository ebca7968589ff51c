//! Execution Planning Module
//!
//! Binds an incoming message to its declared step and expands it into a task graph.
//!
//! ## Submodules
//! - **`registry`**: process-wide, append-only map from step name to `StepDefinition`.
//! - **`planner`**: `ExecutionPlanner::plan`, routing the step's root tasks to destinations.
//! - **`reducer`**: collectors used by gather tasks to merge partial results.
//! - **`types`**: message envelopes, step definitions and task graphs.

pub mod planner;
pub mod reducer;
pub mod registry;
pub mod types;

pub use planner::ExecutionPlanner;
pub use reducer::Reducer;
pub use registry::{StepRegistry, register_builtin_steps};
pub use types::*;
