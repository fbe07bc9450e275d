//! Engine adapter capability interface (§4.1).
//!
//! `forge-engine` defines the trait every inference backend implements and
//! the plumbing around it — instance handles, task context, and the merged
//! cancellation token the pool builds for every dispatched task. It has no
//! opinion on scheduling (`forge-pool`) or artifact management
//! (`forge-store`); those depend on this crate, not the other way around.

pub mod adapter;
pub mod cancel;
pub mod context;

pub use adapter::EngineAdapter;
pub use cancel::{CancelCause, CancelToken, TaskController};
pub use context::{InstanceHandle, TaskContext};
