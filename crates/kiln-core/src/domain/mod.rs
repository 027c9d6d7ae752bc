//! Domain model (IDs, resource vectors, task type descriptors, task rows).

pub mod ids;
pub mod resources;
pub mod row;
pub mod task_type;

pub use ids::{TaskId, WorkerId};
pub use resources::{MachineResources, Resources};
pub use row::{TaskCounts, TaskRow, TaskRowState};
pub use task_type::TaskTypeDetails;
