//! Request Routing Module
//!
//! Maps a dataset and a request shape to concrete destination addresses.
//!
//! - **Broadcast** reaches every partition (v1 partitions can be limited to a range of
//!   their sortable range key).
//! - **Scatter** reaches the one partition whose continuum point owns the request key.
//! - **Replica selection** (`top`, `random`, `all`) picks which copies receive it.
//!   Random selection draws from a seedable generator so tests can pin it.

pub mod router;
pub mod types;

pub use router::Router;
pub use types::*;

#[cfg(test)]
mod tests;
