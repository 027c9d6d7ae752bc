//! Storage reservation manager: the admission gate for storage-heavy tasks.
//!
//! A reservation is taken during admission (`can_accept`), before the task is
//! claimed, so the cost of checking space never blocks an already-claimed
//! task. Every reservation is finished exactly once: `release()` on any
//! failure/abort path, `commit()` when the task body has durably consumed the
//! space. Both are idempotent, and dropping an unfinished reservation
//! releases it, so no error path can leak held space.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::KilnError;

/// Static description of one storage backend.
#[derive(Debug, Clone)]
pub struct StorageBackend {
    pub id: String,
    pub capacity: u64,
}

#[derive(Debug)]
struct BackendState {
    capacity: u64,
    /// Provisionally held by outstanding reservations.
    reserved: u64,
    /// Durably consumed by committed reservations.
    used: u64,
    /// False when the backend cannot be queried (unmounted, unreachable).
    available: bool,
}

impl BackendState {
    fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.reserved + self.used)
    }
}

/// Admission gate over a set of storage backends.
pub struct ReservationManager {
    backends: Arc<Mutex<BTreeMap<String, BackendState>>>,
}

impl ReservationManager {
    pub fn new(backends: impl IntoIterator<Item = StorageBackend>) -> Self {
        let map = backends
            .into_iter()
            .map(|b| {
                (
                    b.id,
                    BackendState {
                        capacity: b.capacity,
                        reserved: 0,
                        used: 0,
                        available: true,
                    },
                )
            })
            .collect();
        Self {
            backends: Arc::new(Mutex::new(map)),
        }
    }

    /// Reserve `needed` bytes on the first backend with room.
    ///
    /// `StorageExhausted` when no available backend fits;
    /// `BackendUnavailable` when the only backends that might have fit could
    /// not be queried.
    pub fn reserve(&self, needed: u64) -> Result<Reservation, KilnError> {
        let mut backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());

        let mut unavailable = None;
        for (id, state) in backends.iter_mut() {
            if !state.available {
                unavailable.get_or_insert_with(|| id.clone());
                continue;
            }
            if state.free() >= needed {
                state.reserved += needed;
                debug!(backend = %id, bytes = needed, "reserved storage");
                return Ok(Reservation {
                    backends: Arc::clone(&self.backends),
                    backend: id.clone(),
                    bytes: needed,
                    finished: AtomicBool::new(false),
                });
            }
        }

        match unavailable {
            Some(id) => Err(KilnError::BackendUnavailable(id)),
            None => Err(KilnError::StorageExhausted { needed }),
        }
    }

    /// Mark a backend as (un)queryable. Outstanding reservations are kept;
    /// only new admissions are affected.
    pub fn set_available(&self, id: &str, available: bool) {
        let mut backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = backends.get_mut(id) {
            state.available = available;
        }
    }

    /// Total free bytes across available backends.
    pub fn free_bytes(&self) -> u64 {
        let backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        backends
            .values()
            .filter(|s| s.available)
            .map(BackendState::free)
            .sum()
    }

    /// Total durably consumed bytes.
    pub fn used_bytes(&self) -> u64 {
        let backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        backends.values().map(|s| s.used).sum()
    }
}

/// A provisional hold on free space for one task.
///
/// Finished exactly once by `release()` or `commit()`; dropping an unfinished
/// reservation releases it.
#[derive(Debug)]
pub struct Reservation {
    backends: Arc<Mutex<BTreeMap<String, BackendState>>>,
    backend: String,
    bytes: u64,
    finished: AtomicBool,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Return the held space to the free pool. Idempotent; safe to call from
    /// any cleanup path.
    pub fn release(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        match backends.get_mut(&self.backend) {
            Some(state) => state.reserved = state.reserved.saturating_sub(self.bytes),
            None => warn!(backend = %self.backend, "released reservation on unknown backend"),
        }
    }

    /// Convert the hold into durably-used space (success path). Idempotent.
    pub fn commit(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = backends.get_mut(&self.backend) {
            state.reserved = state.reserved.saturating_sub(self.bytes);
            state.used += self.bytes;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}
