//! Point-in-time telemetry snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A copy of the pipeline counters at one instant.
///
/// Counter fields are monotonic; `queue_depth` is a gauge of build tasks
/// waiting at snapshot time. Serializes cleanly for log shipping or
/// status endpoints.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Tiles that entered the pipeline.
    pub tiles_requested: u64,
    /// Decodes that finished successfully.
    pub decodes_completed: u64,
    /// Decodes that returned an error.
    pub decodes_failed: u64,
    /// Decodes abandoned before completion.
    pub decodes_canceled: u64,
    /// Tiles that reached the ready state.
    pub tiles_ready: u64,
    /// Cached records evicted.
    pub tiles_evicted: u64,
    /// Coordinator update passes.
    pub frames: u64,
    /// Build tasks queued at snapshot time.
    pub queue_depth: u64,
    /// Build queue turns executed since startup.
    pub queue_turns: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} | decoded {} ({} failed, {} canceled) | ready {} | \
             evicted {} | queue {} ({} turns) | frames {}",
            self.tiles_requested,
            self.decodes_completed,
            self.decodes_failed,
            self.decodes_canceled,
            self.tiles_ready,
            self.tiles_evicted,
            self.queue_depth,
            self.queue_turns,
            self.frames,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_summarises_counters() {
        let snapshot = TelemetrySnapshot {
            tiles_requested: 12,
            decodes_completed: 9,
            decodes_failed: 1,
            decodes_canceled: 2,
            tiles_ready: 9,
            tiles_evicted: 4,
            frames: 30,
            queue_depth: 3,
            queue_turns: 57,
        };
        let line = snapshot.to_string();
        assert!(line.contains("requested 12"));
        assert!(line.contains("1 failed"));
        assert!(line.contains("queue 3 (57 turns)"));
    }

    #[test]
    fn test_serializes_with_field_names() {
        let json = serde_json::to_value(TelemetrySnapshot::default()).unwrap();
        assert_eq!(json["tiles_requested"], 0);
        assert_eq!(json["queue_depth"], 0);
    }
}
