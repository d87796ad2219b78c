//! Pipeline tuning knobs.
//!
//! A [`PipelineConfig`] is handed to the coordinator once at startup and
//! applied to every source added afterwards. All fields have defaults
//! that suit interactive map use; embedders override them through the
//! `with_*` builders or by deserializing a partial document:
//!
//! ```ignore
//! let config: PipelineConfig = serde_json::from_str(r#"{"workers_per_source": 4}"#)?;
//! ```

use serde::{Deserialize, Serialize};

/// Decode workers spawned per source.
pub const DEFAULT_WORKERS_PER_SOURCE: usize = 2;

/// Priority above which a tile is neither requested nor retained.
pub const DEFAULT_EVICT_THRESHOLD: f64 = 0.8;

/// Prefetch ring width around the viewport, in tile widths.
pub const DEFAULT_PREFETCH_BUFFER: f64 = 0.6;

/// Tuning parameters shared by every source in a coordinator.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decode workers spawned per source.
    pub workers_per_source: usize,
    /// Priority above which cached tiles are evicted.
    pub evict_threshold: f64,
    /// Extra coverage around the viewport, in tile widths.
    pub prefetch_buffer: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers_per_source: DEFAULT_WORKERS_PER_SOURCE,
            evict_threshold: DEFAULT_EVICT_THRESHOLD,
            prefetch_buffer: DEFAULT_PREFETCH_BUFFER,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of decode workers per source (minimum one applies
    /// when the pool starts).
    pub fn with_workers_per_source(mut self, workers: usize) -> Self {
        self.workers_per_source = workers;
        self
    }

    /// Sets the eviction threshold.
    pub fn with_evict_threshold(mut self, threshold: f64) -> Self {
        self.evict_threshold = threshold;
        self
    }

    /// Sets the prefetch ring width, in tile widths.
    pub fn with_prefetch_buffer(mut self, buffer: f64) -> Self {
        self.prefetch_buffer = buffer;
        self
    }
}
