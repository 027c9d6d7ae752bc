//! Task type descriptor: the static metadata a type publishes at startup.

use serde::{Deserialize, Serialize};

use super::Resources;

/// Static metadata for one task type. Registered once when the engine is
/// built and immutable thereafter. `cost` may still vary with runtime
/// configuration (devnet mode reduces RAM and drops the GPU requirement),
/// but only at construction time, never per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeDetails {
    /// Unique name of the stage ("SDR", "Trees", ...).
    pub name: String,

    /// Upper bound on simultaneously owned instances per worker.
    /// 0 disables local acceptance entirely.
    pub max_concurrent: usize,

    /// Declared per-instance resource cost.
    pub cost: Resources,

    /// Number of execution failures tolerated before the task is
    /// permanently failed. A task is offered `max_failures + 1` times.
    pub max_failures: u32,

    /// Upstream type names whose completion should wake this type's poller.
    pub follows: Vec<String>,
}
