//! Engine: the claim/dispatch cycle for one worker process.
//!
//! One poller per registered task type, all sharing the task store, the
//! resource scheduler, and the wake set. Cross-process coordination happens
//! exclusively through the store's conditional claim.

pub mod poller;
pub mod poster;
pub mod retry;
pub mod scheduler;
pub mod task;

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::domain::{MachineResources, WorkerId};
use crate::error::KilnError;
use crate::ports::TaskStore;

pub use poster::TaskPoster;
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use task::{AcceptData, Admitted, NoAcceptData, OwnershipToken, TaskInterface};

use poller::Poller;
use poster::WakeSet;

/// The per-worker task engine. `spawn` resolves the type set once, wires the
/// posting handles, and starts one poller per type.
pub struct TaskEngine;

impl TaskEngine {
    pub fn spawn(
        types: Vec<Arc<dyn TaskInterface>>,
        store: Arc<dyn TaskStore>,
        capacity: MachineResources,
        config: EngineConfig,
        retry: RetryPolicy,
    ) -> Result<EngineHandle, KilnError> {
        let worker = WorkerId::generate();
        let scheduler = Arc::new(Scheduler::new(capacity));
        let wakes = Arc::new(WakeSet::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Resolve the type set once; duplicate names are a wiring bug.
        let mut by_name: HashMap<String, Arc<dyn TaskInterface>> = HashMap::new();
        for task in &types {
            let name = task.type_details().name;
            if by_name.insert(name.clone(), Arc::clone(task)).is_some() {
                return Err(KilnError::DuplicateTaskType(name));
            }
        }

        // name -> types woken when a task of `name` completes.
        let mut followers: HashMap<String, Vec<String>> = HashMap::new();
        for task in &types {
            let details = task.type_details();
            for upstream in &details.follows {
                followers
                    .entry(upstream.clone())
                    .or_default()
                    .push(details.name.clone());
            }
        }

        let mut joins = Vec::with_capacity(types.len());
        for task in types {
            let details = task.type_details();
            let poster = TaskPoster::new(
                details.name.clone(),
                Arc::clone(&store),
                Arc::clone(&wakes),
            );
            task.adder(poster.clone());

            let poller = Poller {
                details: details.clone(),
                task,
                store: Arc::clone(&store),
                scheduler: Arc::clone(&scheduler),
                wakes: Arc::clone(&wakes),
                retry: retry.clone(),
                followers: followers.get(&details.name).cloned().unwrap_or_default(),
                worker,
                poster,
                running: Arc::new(AtomicUsize::new(0)),
                bodies: Mutex::new(Vec::new()),
                poll_interval: config.poll_interval,
            };
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move { poller.run(rx).await }));
        }

        Ok(EngineHandle {
            worker,
            shutdown_tx,
            joins,
        })
    }
}

/// Handle to a running engine. Dropping the handle does not stop the
/// pollers; call `shutdown_and_join`.
pub struct EngineHandle {
    worker: WorkerId,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Stop taking new claims and revoke ownership tokens. In-flight bodies
    /// observe the revocation at their next safe point.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for the pollers and every in-flight body, so all
    /// row releases have reached the store when this returns.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::domain::{Resources, TaskCounts, TaskId, TaskTypeDetails};
    use crate::engine::task::{Admitted, NoAcceptData, OwnershipToken};
    use crate::impls::InMemoryTaskStore;

    type PosterSlot = Arc<Mutex<Option<TaskPoster>>>;

    enum Outcome {
        Succeed,
        Fail,
        WaitForRevocation,
    }

    struct TestTask {
        name: &'static str,
        max_concurrent: usize,
        max_failures: u32,
        follows: Vec<String>,
        outcome: Outcome,
        attempts: Arc<AtomicUsize>,
        bored_calls: Arc<AtomicUsize>,
        poster_slot: PosterSlot,
        downstream: Option<PosterSlot>,
    }

    impl TestTask {
        fn new(name: &'static str, outcome: Outcome) -> Self {
            Self {
                name,
                max_concurrent: 4,
                max_failures: 2,
                follows: Vec::new(),
                outcome,
                attempts: Arc::new(AtomicUsize::new(0)),
                bored_calls: Arc::new(AtomicUsize::new(0)),
                poster_slot: Arc::new(Mutex::new(None)),
                downstream: None,
            }
        }

        fn poster(&self) -> TaskPoster {
            self.poster_slot.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl TaskInterface for TestTask {
        async fn can_accept(&self, ids: &[TaskId]) -> Result<Option<Admitted>, KilnError> {
            Ok(ids.first().map(|&id| Admitted::new(id, NoAcceptData)))
        }

        async fn do_task(
            &self,
            _id: TaskId,
            _data: Box<dyn AcceptData>,
            owned: &OwnershipToken,
        ) -> Result<bool, KilnError> {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            match self.outcome {
                Outcome::Succeed => {
                    if let Some(slot) = &self.downstream {
                        let poster = slot.lock().unwrap().clone();
                        if let Some(p) = poster {
                            p.post().await?;
                        }
                    }
                    Ok(true)
                }
                Outcome::Fail => Err(KilnError::other("induced failure")),
                Outcome::WaitForRevocation => {
                    while owned.still_owned() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Err(KilnError::other("aborted after revocation"))
                }
            }
        }

        fn type_details(&self) -> TaskTypeDetails {
            TaskTypeDetails {
                name: self.name.to_string(),
                max_concurrent: self.max_concurrent,
                cost: Resources {
                    cpu: 1.0,
                    gpu: 0.0,
                    ram: 1 << 20,
                },
                max_failures: self.max_failures,
                follows: self.follows.clone(),
            }
        }

        fn adder(&self, poster: TaskPoster) {
            *self.poster_slot.lock().unwrap() = Some(poster);
        }

        async fn bored(&self, _poster: &TaskPoster) {
            self.bored_calls.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            ..EngineConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(10),
            multiplier: 1.0,
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        }
    }

    fn capacity() -> MachineResources {
        MachineResources {
            cpu: 8.0,
            gpu: 1.0,
            ram: 8 << 30,
        }
    }

    async fn wait_for_counts(
        store: &Arc<InMemoryTaskStore>,
        pred: impl Fn(&TaskCounts) -> bool,
    ) -> TaskCounts {
        for _ in 0..500 {
            let counts = store.counts_by_state().await.unwrap();
            if pred(&counts) {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached the expected counts");
    }

    #[tokio::test]
    async fn posted_tasks_run_to_done() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Arc::new(TestTask::new("T", Outcome::Succeed));

        let handle = TaskEngine::spawn(
            vec![Arc::clone(&task) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        let poster = task.poster();
        for _ in 0..3 {
            poster.post().await.unwrap();
        }

        wait_for_counts(&store, |c| c.done == 3).await;
        assert_eq!(task.attempts.load(Ordering::Acquire), 3);
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn two_engines_share_a_store_without_double_execution() {
        let store = Arc::new(InMemoryTaskStore::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut a = TestTask::new("T", Outcome::Succeed);
        a.attempts = Arc::clone(&attempts);
        let mut b = TestTask::new("T", Outcome::Succeed);
        b.attempts = Arc::clone(&attempts);

        let h1 = TaskEngine::spawn(
            vec![Arc::new(a) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();
        let h2 = TaskEngine::spawn(
            vec![Arc::new(b) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();
        assert_ne!(h1.worker(), h2.worker());

        for _ in 0..10 {
            store.add("T").await.unwrap();
        }

        wait_for_counts(&store, |c| c.done == 10).await;
        assert_eq!(attempts.load(Ordering::Acquire), 10);

        h1.shutdown_and_join().await;
        h2.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn failing_task_retries_to_the_bound_then_parks() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = TestTask::new("T", Outcome::Fail);
        task.max_failures = 2;
        let task = Arc::new(task);

        let handle = TaskEngine::spawn(
            vec![Arc::clone(&task) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        let id = task.poster().post().await.unwrap();
        wait_for_counts(&store, |c| c.failed == 1).await;

        // max_failures + 1 attempts total, then the row is parked for good.
        assert_eq!(task.attempts.load(Ordering::Acquire), 3);
        let row = store.row(id).await.unwrap().unwrap();
        assert_eq!(row.failures, 3);
        assert!(row.last_error.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.attempts.load(Ordering::Acquire), 3);
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn upstream_completion_posts_downstream() {
        let store = Arc::new(InMemoryTaskStore::new());

        let mut downstream = TestTask::new("B", Outcome::Succeed);
        downstream.follows = vec!["A".to_string()];
        let downstream = Arc::new(downstream);

        let mut upstream = TestTask::new("A", Outcome::Succeed);
        upstream.downstream = Some(Arc::clone(&downstream.poster_slot));
        let upstream = Arc::new(upstream);

        let handle = TaskEngine::spawn(
            vec![
                Arc::clone(&upstream) as Arc<dyn TaskInterface>,
                Arc::clone(&downstream) as Arc<dyn TaskInterface>,
            ],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        upstream.poster().post().await.unwrap();
        wait_for_counts(&store, |c| c.done == 2).await;

        assert_eq!(upstream.attempts.load(Ordering::Acquire), 1);
        assert_eq!(downstream.attempts.load(Ordering::Acquire), 1);
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn boredom_fires_once_per_idle_stretch() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Arc::new(TestTask::new("T", Outcome::Succeed));

        let handle = TaskEngine::spawn(
            vec![Arc::clone(&task) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        // First idle detection invokes the hook exactly once, then the latch
        // suppresses it across further empty ticks.
        for _ in 0..100 {
            if task.bored_calls.load(Ordering::Acquire) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(task.bored_calls.load(Ordering::Acquire), 1);

        // Running a task re-arms the latch; going idle again fires it again.
        task.poster().post().await.unwrap();
        wait_for_counts(&store, |c| c.done == 1).await;
        for _ in 0..100 {
            if task.bored_calls.load(Ordering::Acquire) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(task.bored_calls.load(Ordering::Acquire), 2);
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn max_concurrent_zero_disables_local_acceptance() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = TestTask::new("T", Outcome::Succeed);
        task.max_concurrent = 0;
        let task = Arc::new(task);

        let handle = TaskEngine::spawn(
            vec![Arc::clone(&task) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        store.add("T").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(task.attempts.load(Ordering::Acquire), 0);
        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 1);
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn revoked_task_is_released_without_failure_bookkeeping() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Arc::new(TestTask::new("T", Outcome::WaitForRevocation));

        let handle = TaskEngine::spawn(
            vec![Arc::clone(&task) as Arc<dyn TaskInterface>],
            Arc::clone(&store) as Arc<dyn TaskStore>,
            capacity(),
            fast_config(),
            fast_retry(),
        )
        .unwrap();

        let id = task.poster().post().await.unwrap();
        for _ in 0..100 {
            if task.attempts.load(Ordering::Acquire) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(task.attempts.load(Ordering::Acquire), 1);

        handle.shutdown_and_join().await;

        // Shutdown waits for the body, so the release is already durable:
        // the row is back unowned and unblemished, claimable by another
        // worker, with no polling window in between.
        let row = store.row(id).await.unwrap().unwrap();
        assert!(row.owner.is_none());
        assert_eq!(row.failures, 0);
        assert!(row.is_claimable(Utc::now()));
    }
}
