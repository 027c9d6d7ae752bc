//! Per-type poll/claim/dispatch loop.
//!
//! Each tick scans the store for unowned candidates, negotiates admission
//! with the type (`can_accept`), claims the winner with the store's
//! conditional update, and spawns the body. Lost claim races release the
//! admission data and continue with the remaining candidates; they are the
//! common case when several workers poll one store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{TaskId, TaskTypeDetails, WorkerId};
use crate::engine::poster::{TaskPoster, WakeSet};
use crate::engine::retry::RetryPolicy;
use crate::engine::scheduler::Scheduler;
use crate::engine::task::{AcceptData, Admitted, OwnershipToken, TaskInterface};
use crate::ports::TaskStore;

pub(crate) struct Poller {
    pub(crate) details: TaskTypeDetails,
    pub(crate) task: Arc<dyn TaskInterface>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) wakes: Arc<WakeSet>,
    pub(crate) retry: RetryPolicy,
    /// Types to wake when one of our tasks completes.
    pub(crate) followers: Vec<String>,
    pub(crate) worker: WorkerId,
    pub(crate) poster: TaskPoster,
    /// Currently owned instances of this type on this worker.
    pub(crate) running: Arc<AtomicUsize>,
    /// Handles of dispatched bodies, awaited at shutdown.
    pub(crate) bodies: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) poll_interval: Duration,
}

impl Poller {
    pub(crate) async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if self.details.max_concurrent == 0 {
            info!(task_type = %self.details.name, "local acceptance disabled (max_concurrent = 0)");
            return;
        }

        let this = Arc::new(self);
        let notify = this.wakes.handle(&this.details.name);
        // Latched after a boredom invocation; re-armed by a wake-up or by
        // seeing work, so the hook fires once per idle detection rather than
        // on every tick.
        let mut was_idle = false;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            this.tick(&mut was_idle, &shutdown_rx).await;

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = notify.notified() => {
                    was_idle = false;
                }
                _ = tokio::time::sleep(this.poll_interval) => {}
            }
        }

        // Bodies run detached; wait for them so their releases and failure
        // bookkeeping reach the store before the engine reports itself
        // stopped.
        let in_flight: Vec<_> = {
            let mut bodies = this.bodies.lock().unwrap_or_else(|e| e.into_inner());
            bodies.drain(..).collect()
        };
        for body in in_flight {
            let _ = body.await;
        }
    }

    async fn tick(self: &Arc<Self>, was_idle: &mut bool, shutdown_rx: &watch::Receiver<bool>) {
        let name = &self.details.name;

        let mut candidates = match self.store.unowned(name, Utc::now()).await {
            Ok(c) => c,
            Err(e) => {
                warn!(task_type = %name, error = %e, "candidate scan failed");
                return;
            }
        };

        if candidates.is_empty() {
            if self.running.load(Ordering::Acquire) == 0 && !*was_idle {
                self.task.bored(&self.poster).await;
                *was_idle = true;
            }
            return;
        }
        *was_idle = false;

        while !candidates.is_empty() {
            if self.running.load(Ordering::Acquire) >= self.details.max_concurrent {
                return;
            }
            if !self.scheduler.can_fit(&self.details.cost) {
                return;
            }

            let admitted = match self.task.can_accept(&candidates).await {
                Ok(Some(a)) => a,
                Ok(None) => return,
                Err(e) => {
                    warn!(task_type = %name, error = %e, "admission scan failed");
                    return;
                }
            };
            candidates.retain(|c| *c != admitted.id);
            let Admitted { id, mut data } = admitted;

            match self.store.claim(id, self.worker).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task = %id, task_type = %name, "lost claim race");
                    data.not_claimed();
                    continue;
                }
                Err(e) => {
                    warn!(task = %id, task_type = %name, error = %e, "claim failed");
                    data.not_claimed();
                    return;
                }
            }

            // Local capacity may have raced away between the check above and
            // the store claim; back out cleanly if so.
            if !self.scheduler.try_claim(&self.details.cost) {
                data.not_claimed();
                if let Err(e) = self.store.release(id, self.worker).await {
                    warn!(task = %id, error = %e, "releasing unclaimable task failed");
                }
                return;
            }

            self.running.fetch_add(1, Ordering::AcqRel);
            let token = OwnershipToken::new(shutdown_rx.clone());
            let exec = Arc::clone(self);
            let body = tokio::spawn(async move { exec.execute(id, data, token).await });

            let mut bodies = self.bodies.lock().unwrap_or_else(|e| e.into_inner());
            bodies.retain(|b| !b.is_finished());
            bodies.push(body);
        }
    }

    async fn execute(self: Arc<Self>, id: TaskId, data: Box<dyn AcceptData>, token: OwnershipToken) {
        let name = &self.details.name;
        info!(task = %id, task_type = %name, "task started");

        let result = self.task.do_task(id, data, &token).await;

        self.scheduler.release(&self.details.cost);
        self.running.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(true) => {
                if let Err(e) = self.store.mark_done(id).await {
                    error!(task = %id, task_type = %name, error = %e, "recording completion failed");
                }
                info!(task = %id, task_type = %name, "task done");
                for follower in &self.followers {
                    self.wakes.wake(follower);
                }
                // Capacity freed; there may be more candidates waiting.
                self.wakes.wake(name);
            }
            Ok(false) | Err(_) => {
                if !token.still_owned() {
                    // Ownership was revoked mid-flight; the row must be
                    // re-claimable by another worker, and the failure
                    // counters are no longer ours to touch.
                    warn!(task = %id, task_type = %name, "task aborted after ownership revocation");
                    if let Err(e) = self.store.release(id, self.worker).await {
                        warn!(task = %id, error = %e, "releasing revoked task failed");
                    }
                    return;
                }

                let msg = match &result {
                    Err(e) => e.to_string(),
                    Ok(_) => "task body returned not done".to_string(),
                };
                warn!(task = %id, task_type = %name, error = %msg, "task failed");

                let failures = match self.store.record_failure(id, &msg).await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(task = %id, error = %e, "recording failure failed");
                        return;
                    }
                };

                if failures > self.details.max_failures {
                    error!(task = %id, task_type = %name, failures, "task permanently failed");
                    if let Err(e) = self.store.mark_permanently_failed(id).await {
                        error!(task = %id, error = %e, "marking permanent failure failed");
                    }
                } else {
                    let delay = self.retry.next_delay(failures);
                    let retry_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300));
                    if let Err(e) = self.store.schedule_retry(id, retry_at).await {
                        error!(task = %id, error = %e, "scheduling retry failed");
                    }
                }
                self.wakes.wake(name);
            }
        }
    }
}
