use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// CPU and memory utilisation, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu: f64,
    pub memory: f64,
}

impl SystemLoad {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu: sanitize(cpu),
            memory: sanitize(memory),
        }
    }

    /// The busier of the two resources.
    pub fn peak(&self) -> f64 {
        self.cpu.max(self.memory)
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub trait LoadProbe: Send + Sync {
    fn sample(&self) -> SystemLoad;
}

/// Returns whatever load it was last told; for tests and simulation.
#[derive(Debug, Default)]
pub struct StaticLoadProbe {
    load: Mutex<SystemLoad>,
}

impl StaticLoadProbe {
    pub fn new(load: SystemLoad) -> Self {
        Self {
            load: Mutex::new(load),
        }
    }

    pub fn set(&self, load: SystemLoad) {
        *self.load.lock() = load;
    }
}

impl LoadProbe for StaticLoadProbe {
    fn sample(&self) -> SystemLoad {
        *self.load.lock()
    }
}

/// Host CPU and memory usage via sysinfo.
pub struct SystemLoadProbe {
    sys: Mutex<System>,
}

impl SystemLoadProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemLoadProbe {
    fn sample(&self) -> SystemLoad {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        let total_memory = sys.total_memory();
        let memory = if total_memory == 0 {
            0.0
        } else {
            sys.used_memory() as f64 / total_memory as f64
        };
        SystemLoad::new(f64::from(sys.global_cpu_usage()) / 100.0, memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_is_clamped() {
        let load = SystemLoad::new(1.7, f64::NAN);
        assert_eq!(load.cpu, 1.0);
        assert_eq!(load.memory, 0.0);
        assert_eq!(load.peak(), 1.0);
    }

    #[test]
    fn system_probe_reports_fractions() {
        let load = SystemLoadProbe::new().sample();
        assert!((0.0..=1.0).contains(&load.cpu));
        assert!((0.0..=1.0).contains(&load.memory));
    }
}
