//! System and process memory probes.
//!
//! The chunk planner needs available system memory once per job; the status
//! monitor samples the resident set of this process on a fixed cadence.

use sysinfo::{MemoryRefreshKind, Pid, ProcessesToUpdate, RefreshKind, System};

/// Available system memory in bytes at the time of the call.
pub fn available_memory() -> u64 {
    let mut sys = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
    );
    sys.refresh_memory();
    sys.available_memory()
}

/// Repeated RSS sampling for the current process. Keeps one `System` around so
/// each sample only refreshes a single pid.
pub struct ProcessMemorySampler {
    system: System,
    pid: Pid,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Resident set size of this process in bytes, or 0 if the pid cannot be
    /// resolved (containers without a mounted procfs).
    pub fn sample(&mut self) -> u64 {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0)
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_available_memory() {
        assert!(available_memory() > 0);
    }

    #[test]
    fn samples_own_process() {
        let mut sampler = ProcessMemorySampler::new();
        // A running test binary has a nonzero resident set.
        assert!(sampler.sample() > 0);
    }
}
