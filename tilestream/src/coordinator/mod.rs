//! Multi-source coordination.
//!
//! The [`SourceCoordinator`] is the embedder's entry point. It owns one
//! pipeline per source, the shared build queue and its runner task, and
//! the style layer list that decides what each source builds.
//!
//! # Architecture
//!
//! ```text
//!                 update(viewport, transform)
//! Embedder ─────────────────┬────────────────────────────────────┐
//!                           ▼                                    ▼
//!                  ┌─────────────────┐                  ┌─────────────────┐
//!                  │ SourcePipeline  │       ...        │ SourcePipeline  │
//!                  │ cache + workers │                  │ cache + workers │
//!                  └────────┬────────┘                  └────────┬────────┘
//!                           └──────────────┬─────────────────────┘
//!                                          ▼
//!                                 shared TaskQueue ──► runner task
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tilestream::coordinator::SourceCoordinator;
//! use tilestream::config::PipelineConfig;
//! use tilestream::source::{LayerKind, SourceDescriptor, StyleLayer};
//!
//! let mut coordinator = SourceCoordinator::new(
//!     PipelineConfig::default(),
//!     codec,
//!     tokio::runtime::Handle::current(),
//! );
//! coordinator.add_source("basemap", SourceDescriptor::vector(endpoints))?;
//! coordinator.set_layers(vec![
//!     StyleLayer::new("roads", "basemap", LayerKind::Line).with_source_layer("road"),
//! ])?;
//!
//! // once per redraw
//! coordinator.update(viewport, transform);
//! if let Some(tileset) = coordinator.tiles(&"basemap".into()) {
//!     // draw tileset.tiles
//! }
//! ```

mod types;

pub use types::{TileView, Tileset};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec::Codec;
use crate::config::PipelineConfig;
use crate::coord::MAX_ZOOM;
use crate::grid::{Transform, Viewport};
use crate::queue::TaskQueue;
use crate::source::{
    SetupError, SourceData, SourceDescriptor, SourceId, SourcePipeline, StyleLayer,
};
use crate::telemetry::{PipelineMetrics, TelemetrySnapshot};

/// Drives every source's pipeline from one camera.
pub struct SourceCoordinator {
    config: PipelineConfig,
    codec: Arc<dyn Codec>,
    runtime: Handle,
    queue: Arc<TaskQueue>,
    runner: JoinHandle<()>,
    shutdown: CancellationToken,
    pipelines: HashMap<SourceId, SourcePipeline>,
    layers: Vec<StyleLayer>,
    tilesets: HashMap<SourceId, Tileset>,
    metrics: Arc<PipelineMetrics>,
}

impl SourceCoordinator {
    /// Creates a coordinator and spawns the shared build queue runner onto
    /// `runtime`.
    ///
    /// The codec is shared by every source's decode workers.
    pub fn new(config: PipelineConfig, codec: Arc<dyn Codec>, runtime: Handle) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let shutdown = CancellationToken::new();
        let runner = queue.spawn_runner(&runtime, shutdown.clone());

        Self {
            config,
            codec,
            runtime,
            queue,
            runner,
            shutdown,
            pipelines: HashMap::new(),
            layers: Vec::new(),
            tilesets: HashMap::new(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Registers a source and spawns its decode workers.
    ///
    /// # Errors
    ///
    /// Rejects duplicate ids, inverted or out-of-range zoom ranges, vector
    /// sources without endpoints, and malformed bounds. Nothing is
    /// registered on error.
    pub fn add_source(
        &mut self,
        id: impl Into<SourceId>,
        descriptor: SourceDescriptor,
    ) -> Result<(), SetupError> {
        let id = id.into();
        if self.pipelines.contains_key(&id) {
            return Err(SetupError::DuplicateSource { id });
        }
        validate_descriptor(&id, &descriptor)?;

        let pipeline = SourcePipeline::new(
            id.clone(),
            &descriptor,
            self.config,
            Arc::clone(&self.codec),
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
            &self.runtime,
        );
        info!(source = %id, "source added");
        self.pipelines.insert(id, pipeline);
        Ok(())
    }

    /// Removes a source, cancelling its outstanding work and dropping any
    /// style layers bound to it. Returns false for unknown ids.
    pub fn remove_source(&mut self, id: &SourceId) -> bool {
        let Some(mut pipeline) = self.pipelines.remove(id) else {
            return false;
        };
        pipeline.teardown();
        self.layers.retain(|layer| &layer.source != id);
        self.tilesets.remove(id);
        info!(source = %id, "source removed");
        true
    }

    /// Replaces the style layer list.
    ///
    /// Layer order is paint order. The whole list is validated before any
    /// of it is applied.
    ///
    /// # Errors
    ///
    /// Rejects duplicate layer ids, layers naming unknown sources, vector
    /// layers without a `source_layer`, and GeoJSON layers with one.
    pub fn set_layers(&mut self, layers: Vec<StyleLayer>) -> Result<(), SetupError> {
        let mut seen = HashSet::new();
        for layer in &layers {
            if !seen.insert(layer.id.as_str()) {
                return Err(SetupError::DuplicateLayer {
                    layer: layer.id.clone(),
                });
            }
            let Some(pipeline) = self.pipelines.get(&layer.source) else {
                return Err(SetupError::UnknownSource {
                    layer: layer.id.clone(),
                    source: layer.source.clone(),
                });
            };
            if pipeline.has_named_layers() {
                if layer.source_layer.is_none() {
                    return Err(SetupError::MissingSourceLayer {
                        layer: layer.id.clone(),
                        source: layer.source.clone(),
                    });
                }
            } else if layer.source_layer.is_some() {
                return Err(SetupError::UnexpectedSourceLayer {
                    layer: layer.id.clone(),
                    source: layer.source.clone(),
                });
            }
        }

        self.layers = layers;
        Ok(())
    }

    /// Shows or hides one layer. Returns false for unknown layer ids.
    ///
    /// Hiding every layer of a source freezes that source: no new
    /// requests, no eviction, and no tileset until one becomes visible
    /// again.
    pub fn set_layer_visibility(&mut self, layer_id: &str, visible: bool) -> bool {
        match self.layers.iter_mut().find(|layer| layer.id == layer_id) {
            Some(layer) => {
                layer.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Advances every visible source one frame.
    ///
    /// Call once per redraw with the current camera; afterwards
    /// [`tiles`](Self::tiles) holds each visible source's tileset.
    pub fn update(&mut self, viewport: Viewport, transform: Transform) {
        for (id, pipeline) in &mut self.pipelines {
            let source_layers: Vec<StyleLayer> = self
                .layers
                .iter()
                .filter(|layer| layer.visible && &layer.source == id)
                .cloned()
                .collect();
            if source_layers.is_empty() {
                self.tilesets.remove(id);
                continue;
            }
            let tileset = pipeline.update(viewport, transform, &source_layers);
            self.tilesets.insert(id.clone(), tileset);
        }

        // Build priorities moved with the camera; restore queue order
        self.queue.sort_tasks();
        self.metrics.frame();
    }

    /// The last update's tileset for `id`, if the source is visible.
    pub fn tiles(&self, id: &SourceId) -> Option<&Tileset> {
        self.tilesets.get(id)
    }

    /// Completeness of the last frame across visible sources, `0.0` to
    /// `1.0`.
    ///
    /// The mean of each visible source's load; `1.0` when nothing is
    /// visible.
    pub fn load_status(&self) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for id in self.tilesets.keys() {
            if let Some(pipeline) = self.pipelines.get(id) {
                total += pipeline.load();
                count += 1;
            }
        }
        if count == 0 {
            1.0
        } else {
            total / count as f64
        }
    }

    /// Point-in-time pipeline counters plus live queue gauges.
    pub fn metrics(&self) -> TelemetrySnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_depth = self.queue.len() as u64;
        snapshot.queue_turns = self.queue.turns();
        snapshot
    }

    /// Stops the queue runner and every source's workers, waiting for all
    /// of them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.runner.await;
        futures::future::join_all(self.pipelines.into_values().map(|pipeline| pipeline.shutdown()))
            .await;
        info!("tile coordinator stopped");
    }
}

fn validate_descriptor(id: &SourceId, descriptor: &SourceDescriptor) -> Result<(), SetupError> {
    if descriptor.min_zoom > descriptor.max_zoom || descriptor.max_zoom > MAX_ZOOM {
        return Err(SetupError::ZoomRange {
            id: id.clone(),
            min: descriptor.min_zoom,
            max: descriptor.max_zoom,
        });
    }
    if let SourceData::Vector { tiles } = &descriptor.data {
        if tiles.is_empty() {
            return Err(SetupError::NoEndpoints { id: id.clone() });
        }
    }
    if let Some([west, south, east, north]) = descriptor.bounds {
        let finite =
            west.is_finite() && south.is_finite() && east.is_finite() && north.is_finite();
        if !finite || west >= east || south >= north {
            return Err(SetupError::Bounds { id: id.clone() });
        }
    }
    Ok(())
}
