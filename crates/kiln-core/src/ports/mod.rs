//! Ports: trait seams for everything the engine consumes but does not own.
//!
//! The in-memory implementations in `impls` are for development and tests; a
//! relational task store or a real chain client is a drop-in behind the same
//! trait.

pub mod blob_store;
pub mod chain_api;
pub mod sealer;
pub mod task_store;

pub use blob_store::{BlobStore, IterOptions, WriteBatch};
pub use chain_api::{ChainApi, DomainSeparationTag, TipSet};
pub use sealer::SealerApi;
pub use task_store::TaskStore;
