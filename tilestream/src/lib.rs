//! Tilestream - Viewport-driven map tile streaming
//!
//! This library provides the data pipeline of a slippy-map renderer:
//! deciding which tiles a camera needs, fetching and decoding them
//! concurrently, flattening decoded features into render-ready geometry on
//! a cooperative build queue, and serving every frame from a per-source
//! cache with multi-resolution fallback.
//!
//! # Architecture
//!
//! ```text
//!            update(viewport, transform), once per redraw
//!                              │
//!                              ▼
//!                      SourceCoordinator
//!                              │ per source
//!                              ▼
//!                       SourcePipeline
//!         ┌─────────────┬──────┴───────┬──────────────┐
//!         ▼             ▼              ▼              ▼
//!      TileGrid     TileCache      WorkerPool     TaskQueue
//!      coverage     records +      decode via     chunked
//!      priority     pyramid        Codec seam     buffer builds
//!                   fallback
//!                              │
//!                              ▼
//!                Tileset (one view per covered tile)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilestream::{
//!     LayerKind, PipelineConfig, SourceCoordinator, SourceDescriptor, StyleLayer,
//! };
//!
//! let mut coordinator = SourceCoordinator::new(
//!     PipelineConfig::default(),
//!     Arc::new(MyCodec),
//!     tokio::runtime::Handle::current(),
//! );
//! coordinator.add_source(
//!     "basemap",
//!     SourceDescriptor::vector(["https://tiles.example/{z}/{x}/{y}.pbf"]),
//! )?;
//! coordinator.set_layers(vec![
//!     StyleLayer::new("roads", "basemap", LayerKind::Line).with_source_layer("road"),
//! ])?;
//!
//! // Every redraw
//! coordinator.update(viewport, transform);
//! if let Some(tileset) = coordinator.tiles(&"basemap".into()) {
//!     for view in tileset.tiles.iter().filter(|view| view.is_ready()) {
//!         // draw view.record's bundle, cropped to view.crop
//!     }
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod coord;
pub mod coordinator;
pub mod geometry;
pub mod grid;
pub mod pool;
pub mod queue;
pub mod source;
pub mod telemetry;

pub use codec::{Codec, CodecError};
pub use config::PipelineConfig;
pub use coord::TileKey;
pub use coordinator::{SourceCoordinator, TileView, Tileset};
pub use grid::{Transform, Viewport};
pub use source::{LayerKind, SetupError, SourceDescriptor, SourceId, StyleLayer};
pub use telemetry::TelemetrySnapshot;
