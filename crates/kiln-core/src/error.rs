//! Crate error type.
//!
//! The engine does not distinguish retryable from permanent errors at the
//! type level: any body error increments the row's failure counter, and the
//! counter crossing `max_failures` is what makes a failure permanent.
//! `CorrectnessViolation` is special only in that it must never be swallowed
//! by callers that observe it.

use thiserror::Error;

use crate::domain::TaskId;

#[derive(Debug, Error)]
pub enum KilnError {
    /// A durable update affected an unexpected number of rows. Indicates a
    /// duplicate claim or a vanished row; always fatal to the attempt.
    #[error("update affected {got} rows, expected {expected}")]
    CorrectnessViolation { expected: u64, got: u64 },

    /// No storage backend can hold the requested reservation.
    #[error("no storage backend has {needed} bytes free")]
    StorageExhausted { needed: u64 },

    /// A storage backend could not be queried.
    #[error("storage backend {0} unavailable")]
    BackendUnavailable(String),

    /// Chain API failure; retryable through the engine's generic retry.
    #[error("chain api: {0}")]
    ChainApi(String),

    #[error("task store: {0}")]
    Store(String),

    #[error("blob store: {0}")]
    BlobStore(String),

    #[error("sealer: {0}")]
    Sealer(String),

    /// `do_task` received admission data produced by a different type.
    #[error("admission data of unexpected type for {0}")]
    AdmissionDataMismatch(TaskId),

    #[error("duplicate task type {0}")]
    DuplicateTaskType(String),

    #[error("{0}")]
    Other(String),
}

impl KilnError {
    pub fn other(msg: impl Into<String>) -> Self {
        KilnError::Other(msg.into())
    }
}
