//! gridsched-state — scheduler state for a grid server.
//!
//! Holds the entity [`Registry`] (servers, resources, users), the ordered
//! [`JobQueue`], and the redb-backed [`CacheStore`] used to persist the
//! registry between restarts.
//!
//! # Architecture
//!
//! The registry and queue are plain owned values; the scheduler that owns
//! them serialises all mutation. The `CacheStore` is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`) and stores JSON-serialized records
//! keyed by entity id.

pub mod error;
pub mod queue;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use queue::JobQueue;
pub use registry::{Registry, RegistryCache};
pub use store::CacheStore;
