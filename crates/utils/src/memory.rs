//! Live memory readings used by the adaptive memory budget and by workers
//! reporting their own footprint

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Source of system-wide free memory
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently available to new allocations
    fn available_bytes(&self) -> u64;
}

/// Reads memory figures from the operating system through `sysinfo`
pub struct SystemMemory {
    system: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Resident memory of the current process in bytes, if it can be read
    pub fn current_process_bytes(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        self.process_bytes(pid)
    }

    /// Resident memory of an arbitrary process in bytes
    pub fn process_bytes(&self, pid: Pid) -> Option<u64> {
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let available = system.available_memory();
        // Some platforms only report free memory
        if available == 0 {
            system.free_memory()
        } else {
            available
        }
    }
}

/// A probe that always reports the same figure
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> u64 {
        self.0
    }
}
