use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, ProcessesToUpdate, System};

const MB: u64 = 1024 * 1024;

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    /// Memory still available to the system, in MB
    fn available_mb(&self) -> u64;

    /// Resident memory of this process, in MB
    fn used_mb(&self) -> u64;
}

/// Reads system and process memory through `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn available_mb(&self) -> u64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.available_memory() / MB
    }

    fn used_mb(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory() / MB).unwrap_or(0)
    }
}

/// Probe returning fixed, adjustable readings
#[derive(Debug, Default)]
pub struct StaticProbe {
    available_mb: AtomicU64,
    used_mb: AtomicU64,
}

impl StaticProbe {
    pub fn new(available_mb: u64, used_mb: u64) -> Self {
        Self {
            available_mb: AtomicU64::new(available_mb),
            used_mb: AtomicU64::new(used_mb),
        }
    }

    /// A probe that never reports memory pressure
    pub fn unlimited() -> Self {
        Self::new(u64::MAX, 0)
    }

    pub fn set_available_mb(&self, mb: u64) {
        self.available_mb.store(mb, Ordering::Relaxed);
    }

    pub fn set_used_mb(&self, mb: u64) {
        self.used_mb.store(mb, Ordering::Relaxed);
    }
}

impl MemoryProbe for StaticProbe {
    fn available_mb(&self) -> u64 {
        self.available_mb.load(Ordering::Relaxed)
    }

    fn used_mb(&self) -> u64 {
        self.used_mb.load(Ordering::Relaxed)
    }
}
