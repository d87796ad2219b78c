//! Pipeline telemetry for observability and user feedback.
//!
//! Every stage of the pipeline records its events on a shared set of
//! relaxed atomic counters, so instrumentation never contends with the
//! hot path. Consumers read a coherent copy on demand rather than
//! subscribing to an event stream.
//!
//! # Architecture
//!
//! ```text
//! Pipeline Stages ─────► PipelineMetrics ─────► TelemetrySnapshot ─────► Views
//!                        (atomic counters)     (point-in-time copy)      (CLI, etc.)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tilestream::telemetry::{PipelineMetrics, TelemetrySnapshot};
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(PipelineMetrics::new());
//!
//! // Record events from pipeline stages
//! metrics.tile_requested();
//! metrics.decode_completed();
//! metrics.tile_ready();
//!
//! // Take snapshot for display
//! let snapshot = metrics.snapshot();
//! println!("Tiles ready: {}", snapshot.tiles_ready);
//! println!("{}", snapshot);
//! ```

mod metrics;
mod snapshot;

pub use metrics::PipelineMetrics;
pub use snapshot::TelemetrySnapshot;
