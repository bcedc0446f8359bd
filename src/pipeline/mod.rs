//! Per-subscription transforms between store notifications and view items.
//!
//! Each stage owns its state for exactly one subscription and is driven one
//! notification at a time.

pub mod diff;
pub mod reconstruct;
pub mod values;

pub use diff::ChangeDiffEmitter;
pub use reconstruct::OrderedStateReconstructor;
pub use values::project_values;
