//! Instance Pool (§4.4): routes tasks to [`ModelInstance`]s across all
//! configured models, arbitrates the single GPU lease, runs idle TTL
//! eviction, and queues requests FIFO when nothing can serve them yet.
//!
//! The pool is a single actor task behind an unbounded `mpsc` mailbox
//! (the same command-loop shape `forge-store` and the teacher's
//! orchestrator both use) so every invariant in §4.4 — at most one GPU
//! holder, `busy <= concurrency`, `min <= count <= max` — is enforced by
//! one piece of code touching one owned `HashMap`, never by a lock held
//! across an `.await`.

pub mod context;
pub mod instance;
pub mod lease;
pub mod pool;
pub mod request;

pub use context::{chat_digest, text_identity, ContextIdentity};
pub use instance::{InstanceId, InstanceStatus, ModelInstance, InstanceSnapshot};
pub use lease::{Lease, ReleaseOutcome};
pub use pool::{InstancePool, PoolStatus};
pub use request::ContextHint;
