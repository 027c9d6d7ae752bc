//! kiln-core
//!
//! A database-coordinated task engine for multi-stage sealing pipelines.
//! Independent worker processes poll a shared task store, admit only the
//! work they have capacity for, execute it, and record completion. There is
//! no central scheduler: the store's conditional updates are the only
//! cross-process coordination primitive.
//!
//! # Module layout
//! - **domain**: core model (ids, resources, task type descriptors, rows)
//! - **ports**: trait seams for external collaborators (TaskStore, ChainApi,
//!   BlobStore, SealerApi)
//! - **impls**: in-memory implementations for development and tests
//! - **engine**: the poller/claim/dispatch loop, resource scheduler, retry
//!   policy, and the task type contract
//! - **reservation**: the storage admission gate
//! - **pipeline**: the sealing pipeline stages (SDR, Trees) built on the
//!   engine contract

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod reservation;

pub use config::EngineConfig;
pub use error::KilnError;
