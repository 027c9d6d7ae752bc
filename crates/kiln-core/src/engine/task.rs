//! The task type contract: the polymorphic capability set every stage
//! implements, plus the admission-data and ownership primitives that travel
//! with a dispatched task.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{TaskId, TaskTypeDetails};
use crate::engine::poster::TaskPoster;
use crate::error::KilnError;

/// Data produced during admission and consumed during execution (e.g., a
/// storage reservation handle).
///
/// `not_claimed` is the type-specific cleanup for the paths where the task
/// was admitted but never run: a lost claim race, or the engine deciding not
/// to dispatch. It must be idempotent.
pub trait AcceptData: Send {
    fn not_claimed(&mut self);

    /// Downcast hook so `do_task` can recover its own concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Admission data for types that need nothing at execution time.
pub struct NoAcceptData;

impl AcceptData for NoAcceptData {
    fn not_claimed(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A chosen candidate plus whatever the execution phase will need.
pub struct Admitted {
    pub id: TaskId,
    pub data: Box<dyn AcceptData>,
}

impl Admitted {
    pub fn new(id: TaskId, data: impl AcceptData + 'static) -> Self {
        Self {
            id,
            data: Box::new(data),
        }
    }
}

/// Polling cancellation signal for task bodies.
///
/// The engine may revoke ownership independent of the body's cooperation
/// (shutdown, lease expiry); bodies check `still_owned` before any
/// irreversible or expensive step and abort cleanly when it turns false.
/// Durable mutations must therefore be conditional row updates, so a
/// different worker can re-claim without corrupting state.
#[derive(Clone)]
pub struct OwnershipToken {
    revoked: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    /// Keeps the channel open for tokens not backed by an engine sender.
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl OwnershipToken {
    pub(crate) fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            revoked: Arc::new(AtomicBool::new(false)),
            shutdown,
            _sender: None,
        }
    }

    /// A token that is never revoked, for tests and standalone runs.
    pub fn standing() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            revoked: Arc::new(AtomicBool::new(false)),
            shutdown: rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    pub fn still_owned(&self) -> bool {
        !self.revoked.load(Ordering::Acquire) && !*self.shutdown.borrow()
    }

    pub(crate) fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }
}

/// The capability set of one task type.
#[async_trait]
pub trait TaskInterface: Send + Sync {
    /// Given unclaimed, prerequisite-satisfied candidate ids, return the
    /// first acceptable one plus its admission data, or `Ok(None)` when none
    /// are acceptable (not an error). Malformed or missing rows must be
    /// logged and skipped, never abort the whole scan.
    async fn can_accept(&self, ids: &[TaskId]) -> Result<Option<Admitted>, KilnError>;

    /// Execute the task body. Returns `Ok(true)` only after the completion
    /// condition is durably persisted by an update affecting exactly one
    /// row. Checks `owned.still_owned()` at safe points.
    async fn do_task(
        &self,
        id: TaskId,
        data: Box<dyn AcceptData>,
        owned: &OwnershipToken,
    ) -> Result<bool, KilnError>;

    fn type_details(&self) -> TaskTypeDetails;

    /// Receives the posting handle for this type at engine startup, so the
    /// domain can create rows and wake the poller without a scan delay.
    fn adder(&self, poster: TaskPoster);

    /// Boredom hook: called when the worker has idle capacity and no pending
    /// work for this type, to synthesize new tasks. Default: nothing.
    async fn bored(&self, _poster: &TaskPoster) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standing_token_stays_owned() {
        let token = OwnershipToken::standing();
        assert!(token.still_owned());
    }

    #[test]
    fn standing_token_clone_outlives_original() {
        let token = OwnershipToken::standing();
        let clone = token.clone();
        drop(token);
        assert!(clone.still_owned());
    }

    #[test]
    fn revocation_is_observed() {
        let token = OwnershipToken::standing();
        token.revoke();
        assert!(!token.still_owned());
    }

    #[test]
    fn shutdown_signal_revokes_token() {
        let (tx, rx) = watch::channel(false);
        let token = OwnershipToken::new(rx);
        assert!(token.still_owned());
        tx.send(true).unwrap();
        assert!(!token.still_owned());
    }
}
