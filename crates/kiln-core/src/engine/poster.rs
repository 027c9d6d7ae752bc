//! Task posting and poller wake-up.
//!
//! `TaskPoster` is the dependency-triggering mechanism: an upstream body or
//! a boredom hook creates a row through it, and the owning type's poller is
//! woken immediately instead of waiting for the next poll interval.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::domain::TaskId;
use crate::error::KilnError;
use crate::ports::TaskStore;

/// One `Notify` per task type name; pollers wait on their own entry, posts
/// and upstream completions signal it.
pub(crate) struct WakeSet {
    notifies: Mutex<HashMap<String, Arc<Notify>>>,
}

impl WakeSet {
    pub(crate) fn new() -> Self {
        Self {
            notifies: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn handle(&self, name: &str) -> Arc<Notify> {
        let mut notifies = self.notifies.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(notifies.entry(name.to_string()).or_default())
    }

    pub(crate) fn wake(&self, name: &str) {
        self.handle(name).notify_one();
    }
}

/// Posting handle for one task type. Cloneable; handed to the type through
/// `adder` at engine startup.
#[derive(Clone)]
pub struct TaskPoster {
    name: String,
    store: Arc<dyn TaskStore>,
    wakes: Arc<WakeSet>,
}

impl TaskPoster {
    pub(crate) fn new(name: String, store: Arc<dyn TaskStore>, wakes: Arc<WakeSet>) -> Self {
        Self { name, store, wakes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an unowned row and wake the poller.
    pub async fn post(&self) -> Result<TaskId, KilnError> {
        let id = self.store.add(&self.name).await?;
        self.wakes.wake(&self.name);
        Ok(id)
    }

    /// Transactional post: create the row, then run `f` to attach the domain
    /// bookkeeping (e.g., set the stage's task-id column). If `f` returns
    /// `Ok(false)` or fails, the row is removed again — e.g., when another
    /// worker already posted a task for the same entity.
    pub async fn post_if<F, Fut>(&self, f: F) -> Result<Option<TaskId>, KilnError>
    where
        F: FnOnce(TaskId) -> Fut,
        Fut: Future<Output = Result<bool, KilnError>>,
    {
        let id = self.store.add(&self.name).await?;
        match f(id).await {
            Ok(true) => {
                self.wakes.wake(&self.name);
                Ok(Some(id))
            }
            Ok(false) => {
                self.store.remove(id).await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(rm) = self.store.remove(id).await {
                    warn!(task = %id, error = %rm, "failed to remove orphaned task row");
                }
                Err(e)
            }
        }
    }
}
