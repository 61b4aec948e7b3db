//! System resource detection and thread pool sizing.
//!
//! Detects available RAM and CPU cores, then sizes the compute and IO pools
//! of a storage session. Stateless: each call to
//! `ResourceManager::auto_tune()` re-probes the system.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const GB: u64 = 1024 * 1024 * 1024;

/// Upper bound on IO threads; object reads are latency-bound, not CPU-bound.
const IO_THREADS_MAX: usize = 32;

// ── SystemResources ─────────────────────────────────────────────────

/// Snapshot of detected hardware resources.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
}

impl SystemResources {
    /// Probe the current system for RAM and CPU information.
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }

    /// Memory pressure indicator (0.0 = no pressure, 1.0 = critical).
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

// ── TuningProfile ───────────────────────────────────────────────────

/// Pool sizes computed from system resources.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningProfile {
    pub compute_threads: usize,
    pub io_threads: usize,
    pub memory_pressure: f64,
}

impl TuningProfile {
    /// Heuristics:
    /// - `compute_threads`: one per logical CPU.
    /// - `io_threads`: RAM < 4 GB -> `min(cpu, 2)`, else `clamp(2 * cpu, 2, 32)`.
    pub fn from_resources(res: &SystemResources) -> Self {
        let cpus = res.cpu_count.max(1);
        let io_threads = if res.total_memory_bytes < 4 * GB {
            cpus.min(2)
        } else {
            (2 * cpus).clamp(2, IO_THREADS_MAX)
        };
        Self {
            compute_threads: cpus,
            io_threads,
            memory_pressure: res.memory_pressure(),
        }
    }
}

impl Default for TuningProfile {
    /// Conservative defaults suitable for tests and unknown environments.
    fn default() -> Self {
        Self {
            compute_threads: 2,
            io_threads: 2,
            memory_pressure: 0.0,
        }
    }
}

// ── ResourceManager ─────────────────────────────────────────────────

pub struct ResourceManager;

impl ResourceManager {
    pub fn auto_tune() -> TuningProfile {
        TuningProfile::from_resources(&SystemResources::detect())
    }
}
