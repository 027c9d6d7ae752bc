//! Process-local resource accounting.
//!
//! One scheduler per engine owns the capacity counters; pollers claim at
//! dispatch and release at completion, under a single short critical
//! section. Task bodies never touch these counters.

use std::sync::Mutex;

use crate::domain::{MachineResources, Resources};

pub struct Scheduler {
    capacity: MachineResources,
    accounted: Mutex<Resources>,
}

impl Scheduler {
    pub fn new(capacity: MachineResources) -> Self {
        Self {
            capacity,
            accounted: Mutex::new(Resources::default()),
        }
    }

    /// Pure check, for skipping scans cheaply before admission.
    pub fn can_fit(&self, cost: &Resources) -> bool {
        let accounted = self.accounted.lock().unwrap_or_else(|e| e.into_inner());
        self.capacity.can_fit(&accounted, cost)
    }

    /// Atomic check-and-claim; the authoritative admission step.
    pub fn try_claim(&self, cost: &Resources) -> bool {
        let mut accounted = self.accounted.lock().unwrap_or_else(|e| e.into_inner());
        if !self.capacity.can_fit(&accounted, cost) {
            return false;
        }
        accounted.add(cost);
        true
    }

    pub fn release(&self, cost: &Resources) {
        let mut accounted = self.accounted.lock().unwrap_or_else(|e| e.into_inner());
        accounted.sub(cost);
    }

    pub fn accounted(&self) -> Resources {
        *self.accounted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1 << 30;

    fn scheduler() -> Scheduler {
        Scheduler::new(MachineResources {
            cpu: 8.0,
            gpu: 1.0,
            ram: 64 * GIB,
        })
    }

    #[test]
    fn claim_and_release_balance() {
        let s = scheduler();
        let cost = Resources {
            cpu: 4.0,
            gpu: 0.0,
            ram: 54 * GIB,
        };

        assert!(s.try_claim(&cost));
        assert!(!s.try_claim(&cost)); // second instance would exceed ram

        s.release(&cost);
        assert_eq!(s.accounted(), Resources::default());
        assert!(s.try_claim(&cost));
    }

    #[test]
    fn gpu_dimension_is_enforced() {
        let s = scheduler();
        let gpu_task = Resources {
            cpu: 1.0,
            gpu: 1.0,
            ram: GIB,
        };
        assert!(s.try_claim(&gpu_task));
        assert!(!s.try_claim(&gpu_task));
        assert!(s.can_fit(&Resources {
            cpu: 1.0,
            gpu: 0.0,
            ram: GIB
        }));
    }
}
