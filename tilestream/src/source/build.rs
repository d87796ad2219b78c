//! Chunked construction of render-ready layer bundles.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::cache::TileRecord;
use crate::geometry::{DecodedTile, FeatureGeometry, FeatureSet, GeometryBuffer, LayerBundle};
use crate::queue::{ChunkedTask, IncrementOutcome};

use super::LayerKind;

/// One style layer awaiting flattening, captured at enqueue time.
///
/// The source layer name is already resolved here; GeoJSON sources use
/// their well-known single layer.
#[derive(Clone, Debug)]
pub(crate) struct BuildLayer {
    pub id: String,
    pub source_layer: String,
    pub kind: LayerKind,
}

/// Message sent back to the pipeline when a bundle finishes building.
pub(crate) struct BuildCompletion {
    pub record: Arc<TileRecord>,
    pub bundle: LayerBundle,
}

/// Chunked task that flattens one decoded tile into a [`LayerBundle`].
///
/// Each increment flattens one style layer, so a heavy tile never holds
/// the build queue for longer than one layer's worth of work. A canceled
/// record finishes early without sending a completion.
pub(crate) struct BundleBuild {
    record: Arc<TileRecord>,
    decoded: DecodedTile,
    layers: VecDeque<BuildLayer>,
    bundle: LayerBundle,
    completion_tx: mpsc::UnboundedSender<BuildCompletion>,
    name: String,
}

impl BundleBuild {
    pub fn new(
        record: Arc<TileRecord>,
        decoded: DecodedTile,
        layers: Vec<BuildLayer>,
        completion_tx: mpsc::UnboundedSender<BuildCompletion>,
    ) -> Self {
        let name = format!("build {}", record.key());
        Self {
            record,
            decoded,
            layers: layers.into(),
            bundle: LayerBundle::default(),
            completion_tx,
            name,
        }
    }

    /// Flattens every feature matching `kind` into one buffer.
    ///
    /// Features of other geometry types are skipped; a circle layer over a
    /// mixed source layer only picks up its points.
    fn flatten(kind: LayerKind, features: &FeatureSet) -> GeometryBuffer {
        let mut buffer = GeometryBuffer::new(kind.primitive());
        for feature in &features.features {
            match (kind, feature) {
                (LayerKind::Circle, FeatureGeometry::Points(points)) => {
                    buffer.push_points(points);
                }
                (LayerKind::Line, FeatureGeometry::Lines(lines)) => {
                    for line in lines {
                        buffer.push_polyline(line);
                    }
                }
                (LayerKind::Fill, FeatureGeometry::Triangles { vertices, indices }) => {
                    buffer.push_triangles(vertices, indices);
                }
                _ => {}
            }
        }
        buffer
    }
}

impl ChunkedTask for BundleBuild {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> f32 {
        self.record.priority()
    }

    fn run_increment(&mut self) -> IncrementOutcome {
        if self.record.cancellation().is_cancelled() {
            trace!(tile = %self.record.key(), "abandoning build of canceled tile");
            return IncrementOutcome::Finished;
        }

        if let Some(layer) = self.layers.pop_front() {
            if let Some(features) = self.decoded.layers.get(&layer.source_layer) {
                let buffer = Self::flatten(layer.kind, features);
                if !buffer.is_empty() {
                    self.bundle.buffers.insert(layer.id, buffer);
                }
            }
            if !self.layers.is_empty() {
                return IncrementOutcome::Pending;
            }
        }

        self.bundle.atlas = self.decoded.atlas.take();
        let completion = BuildCompletion {
            record: Arc::clone(&self.record),
            bundle: mem::take(&mut self.bundle),
        };
        // The pipeline may already be gone during shutdown
        let _ = self.completion_tx.send(completion);
        IncrementOutcome::Finished
    }
}
