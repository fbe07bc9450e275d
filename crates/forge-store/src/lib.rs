//! Model Store (§4.2): cache directory layout, artifact validation, and
//! the engine-agnostic preparation supervisor.
//!
//! `forge-store` never downloads by itself when it can help it — the
//! actual fetch is delegated to the owning [`forge_engine::EngineAdapter`],
//! which may need to pull auxiliary tokenizer/processor/vocoder repos
//! alongside the primary artifact. What lives here is the generic
//! bookkeeping every engine would otherwise have to reimplement: where an
//! artifact lives on disk, whether it's already valid, and the
//! cross-process lock that keeps two callers from downloading it twice.

pub mod cache_layout;
pub mod download;
pub mod lock;
pub mod model;
pub mod store;
pub mod validate;

pub use model::{ModelStatus, StoredModel};
pub use store::ModelStore;
