//! Lock-free event counters for pipeline instrumentation.

use std::sync::atomic::{AtomicU64, Ordering};

use super::TelemetrySnapshot;

/// Atomic counters shared by every stage of the pipeline.
///
/// Each recording method is a single relaxed increment and may be called
/// from any thread or task. Counters only ever grow; rates are derived by
/// diffing successive [`snapshot`](Self::snapshot) calls.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    tiles_requested: AtomicU64,
    decodes_completed: AtomicU64,
    decodes_failed: AtomicU64,
    decodes_canceled: AtomicU64,
    tiles_ready: AtomicU64,
    tiles_evicted: AtomicU64,
    frames: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tile entering the pipeline.
    pub fn tile_requested(&self) {
        self.tiles_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decode finishing successfully.
    pub fn decode_completed(&self) {
        self.decodes_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decode failing.
    pub fn decode_failed(&self) {
        self.decodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decode abandoned before completion.
    pub fn decode_canceled(&self) {
        self.decodes_canceled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a tile reaching the ready state.
    pub fn tile_ready(&self) {
        self.tiles_ready.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cached record being evicted.
    pub fn tile_evicted(&self) {
        self.tiles_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one coordinator update pass.
    pub fn frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    ///
    /// Queue gauges are not tracked here; the coordinator fills them in
    /// from the live queue when it assembles a snapshot.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            tiles_requested: self.tiles_requested.load(Ordering::Relaxed),
            decodes_completed: self.decodes_completed.load(Ordering::Relaxed),
            decodes_failed: self.decodes_failed.load(Ordering::Relaxed),
            decodes_canceled: self.decodes_canceled.load(Ordering::Relaxed),
            tiles_ready: self.tiles_ready.load(Ordering::Relaxed),
            tiles_evicted: self.tiles_evicted.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            queue_depth: 0,
            queue_turns: 0,
        }
    }
}
