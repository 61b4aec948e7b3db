//! Session-wide counters.
//!
//! All counters are `AtomicU64` so any thread can record without
//! coordination. Read them through [`Stats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    arrays_opened: AtomicU64,
    arrays_closed: AtomicU64,
    schemas_loaded: AtomicU64,
    fragment_metadata_loaded: AtomicU64,
    fragment_metadata_consolidated: AtomicU64,
    consolidations: AtomicU64,
    uris_vacuumed: AtomicU64,
    queries_run: AtomicU64,
    tasks_cancelled: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub arrays_opened: u64,
    pub arrays_closed: u64,
    pub schemas_loaded: u64,
    /// Fragment metadata read from per-fragment files.
    pub fragment_metadata_loaded: u64,
    /// Fragment metadata served from a consolidated buffer.
    pub fragment_metadata_consolidated: u64,
    pub consolidations: u64,
    pub uris_vacuumed: u64,
    pub queries_run: u64,
    pub tasks_cancelled: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.arrays_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.arrays_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schemas_loaded(&self, n: u64) {
        self.schemas_loaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_fragment_metadata(&self, from_files: u64, from_consolidated: u64) {
        self.fragment_metadata_loaded
            .fetch_add(from_files, Ordering::Relaxed);
        self.fragment_metadata_consolidated
            .fetch_add(from_consolidated, Ordering::Relaxed);
    }

    pub fn record_consolidation(&self) {
        self.consolidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vacuumed(&self, n: u64) {
        self.uris_vacuumed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            arrays_opened: self.arrays_opened.load(Ordering::Relaxed),
            arrays_closed: self.arrays_closed.load(Ordering::Relaxed),
            schemas_loaded: self.schemas_loaded.load(Ordering::Relaxed),
            fragment_metadata_loaded: self.fragment_metadata_loaded.load(Ordering::Relaxed),
            fragment_metadata_consolidated: self
                .fragment_metadata_consolidated
                .load(Ordering::Relaxed),
            consolidations: self.consolidations.load(Ordering::Relaxed),
            uris_vacuumed: self.uris_vacuumed.load(Ordering::Relaxed),
            queries_run: self.queries_run.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
        }
    }
}
