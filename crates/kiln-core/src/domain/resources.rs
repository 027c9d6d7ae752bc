//! Resource vectors: what a task costs and what a machine has.
//!
//! Admission is per-dimension AND semantics: a task fits only if every
//! dimension fits. There is no partial admission.

use serde::{Deserialize, Serialize};
use sysinfo::{CpuExt as _, System, SystemExt as _};

/// Declared cost of one task instance.
///
/// Units: CPU in core-equivalents, GPU in device-equivalents (0 disables the
/// GPU requirement), RAM in bytes. Storage is handled separately through the
/// reservation manager, so it does not appear here.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub gpu: f64,
    pub ram: u64,
}

impl Resources {
    /// Add a cost to an accounted total (claim).
    pub fn add(&mut self, other: &Resources) {
        self.cpu += other.cpu;
        self.gpu += other.gpu;
        self.ram += other.ram;
    }

    /// Subtract a cost from an accounted total (release). Saturating so a
    /// double release cannot wrap the counters.
    pub fn sub(&mut self, other: &Resources) {
        self.cpu = (self.cpu - other.cpu).max(0.0);
        self.gpu = (self.gpu - other.gpu).max(0.0);
        self.ram = self.ram.saturating_sub(other.ram);
    }
}

/// Static capacity of one worker machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineResources {
    pub cpu: f64,
    pub gpu: f64,
    pub ram: u64,
}

impl MachineResources {
    /// Detect capacity from the host. GPUs cannot be probed portably, so the
    /// device count is passed in.
    pub fn detect(gpus: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        Self {
            cpu: sys.cpus().len().max(1) as f64,
            gpu: gpus,
            ram: sys.total_memory(),
        }
    }

    /// Would `accounted + cost` still fit on this machine? Every dimension
    /// must pass.
    pub fn can_fit(&self, accounted: &Resources, cost: &Resources) -> bool {
        accounted.cpu + cost.cpu <= self.cpu
            && accounted.gpu + cost.gpu <= self.gpu
            && accounted.ram + cost.ram <= self.ram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const GIB: u64 = 1 << 30;

    fn machine() -> MachineResources {
        MachineResources {
            cpu: 8.0,
            gpu: 1.0,
            ram: 64 * GIB,
        }
    }

    #[rstest]
    #[case(Resources { cpu: 4.0, gpu: 0.0, ram: 54 * GIB }, true)]
    #[case(Resources { cpu: 9.0, gpu: 0.0, ram: GIB }, false)] // cpu over
    #[case(Resources { cpu: 1.0, gpu: 2.0, ram: GIB }, false)] // gpu over
    #[case(Resources { cpu: 1.0, gpu: 1.0, ram: 65 * GIB }, false)] // ram over
    fn all_dimensions_must_fit(#[case] cost: Resources, #[case] fits: bool) {
        let accounted = Resources::default();
        assert_eq!(machine().can_fit(&accounted, &cost), fits);
    }

    #[test]
    fn accounted_totals_gate_admission() {
        let m = machine();
        let mut accounted = Resources::default();
        let cost = Resources {
            cpu: 4.0,
            gpu: 0.0,
            ram: 30 * GIB,
        };

        assert!(m.can_fit(&accounted, &cost));
        accounted.add(&cost);
        assert!(m.can_fit(&accounted, &cost));
        accounted.add(&cost);
        // Third instance would exceed cpu (12 > 8) and ram (90 > 64).
        assert!(!m.can_fit(&accounted, &cost));

        accounted.sub(&cost);
        assert!(m.can_fit(&accounted, &cost));
    }

    #[test]
    fn release_saturates_at_zero() {
        let mut accounted = Resources::default();
        accounted.sub(&Resources {
            cpu: 1.0,
            gpu: 1.0,
            ram: GIB,
        });
        assert_eq!(accounted.cpu, 0.0);
        assert_eq!(accounted.ram, 0);
    }

    #[test]
    fn detect_reports_at_least_one_core() {
        let m = MachineResources::detect(0.0);
        assert!(m.cpu >= 1.0);
        assert_eq!(m.gpu, 0.0);
    }
}
