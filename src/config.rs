//! Storage session configuration.
//!
//! Stored as JSON. Every field has a default, so a partial file (or none)
//! is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::ResourceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMode {
    #[default]
    Fragments,
    FragmentMeta,
    ArrayMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VacuumMode {
    #[default]
    Fragments,
    FragmentMeta,
    ArrayMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub mode: ConsolidationMode,
    pub timestamp_start: u64,
    pub timestamp_end: u64,
    /// Smallest run of fragments worth merging.
    pub min_frags: usize,
    /// Largest run merged into one fragment.
    pub max_frags: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            mode: ConsolidationMode::Fragments,
            timestamp_start: 0,
            timestamp_end: u64::MAX,
            min_frags: 2,
            max_frags: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumConfig {
    pub mode: VacuumMode,
    pub timestamp_start: u64,
    pub timestamp_end: u64,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            mode: VacuumMode::Fragments,
            timestamp_start: 0,
            timestamp_end: u64::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Compute pool size; `None` sizes from the host.
    pub compute_concurrency: Option<usize>,
    /// IO pool size; `None` sizes from the host.
    pub io_concurrency: Option<usize>,
    /// Merge adjacent integral ranges as they are added to a subarray.
    pub coalesce_ranges: bool,
    pub consolidation: ConsolidationConfig,
    pub vacuum: VacuumConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compute_concurrency: None,
            io_concurrency: None,
            coalesce_ranges: true,
            consolidation: ConsolidationConfig::default(),
            vacuum: VacuumConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Read config from `path`. Returns None if the file doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(Some(config))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Resolved `(compute, io)` pool sizes.
    pub fn thread_counts(&self) -> (usize, usize) {
        match (self.compute_concurrency, self.io_concurrency) {
            (Some(c), Some(io)) => (c.max(1), io.max(1)),
            (compute, io) => {
                let profile = ResourceManager::auto_tune();
                tracing::info!(
                    "Auto-tuned pools: {} compute threads, {} io threads, memory pressure {:.2}",
                    profile.compute_threads,
                    profile.io_threads,
                    profile.memory_pressure
                );
                (
                    compute.unwrap_or(profile.compute_threads).max(1),
                    io.unwrap_or(profile.io_threads).max(1),
                )
            }
        }
    }
}
