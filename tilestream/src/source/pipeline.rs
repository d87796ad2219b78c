//! Per-source pipeline orchestration.
//!
//! A [`SourcePipeline`] owns everything one source needs to stream tiles:
//! its cache, its decode worker pool, and the plumbing that feeds decoded
//! tiles through the shared build queue. The coordinator calls
//! [`update`](SourcePipeline::update) once per frame; everything else
//! happens on worker tasks and the queue runner between frames.
//!
//! One update pass, in order: drain finished decodes and builds, re-score
//! every cached record against the new camera, retrieve coverage (starting
//! decodes for new tiles and resolving each need to its best view), then
//! evict records the camera no longer justifies.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{TileCache, TileRecord};
use crate::codec::{Codec, DecodePayload, DecodeRequest, TileScheme, GEOJSON_SOURCE_LAYER};
use crate::config::PipelineConfig;
use crate::coord::{bounds_from_lng_lat, CropRegion, WorldBounds};
use crate::coordinator::{TileView, Tileset};
use crate::grid::{TileGrid, Transform, Viewport};
use crate::pool::{DecodeResult, WorkerPool};
use crate::queue::TaskQueue;
use crate::telemetry::PipelineMetrics;

use super::build::{BuildCompletion, BuildLayer, BundleBuild};
use super::{SourceData, SourceDescriptor, SourceId, StyleLayer};

/// One source's complete streaming pipeline.
pub(crate) struct SourcePipeline {
    id: SourceId,
    grid: TileGrid,
    cache: TileCache,
    pool: WorkerPool,
    queue: Arc<TaskQueue>,
    build_tx: mpsc::UnboundedSender<BuildCompletion>,
    build_rx: mpsc::UnboundedReceiver<BuildCompletion>,
    payload: DecodePayload,
    scheme: TileScheme,
    min_zoom: u8,
    metrics: Arc<PipelineMetrics>,
    load: f64,
}

impl SourcePipeline {
    /// Builds the pipeline for a validated descriptor and spawns its
    /// decode workers onto `runtime`.
    pub(crate) fn new(
        id: SourceId,
        descriptor: &SourceDescriptor,
        config: PipelineConfig,
        codec: Arc<dyn Codec>,
        queue: Arc<TaskQueue>,
        metrics: Arc<PipelineMetrics>,
        runtime: &Handle,
    ) -> Self {
        let bounds = descriptor
            .bounds
            .map(|[west, south, east, north]| bounds_from_lng_lat(west, south, east, north))
            .unwrap_or(WorldBounds::WORLD);
        let grid = TileGrid::new(
            descriptor.tile_size,
            descriptor.min_zoom,
            descriptor.max_zoom,
            bounds,
        )
        .with_prefetch_buffer(config.prefetch_buffer)
        .with_evict_threshold(config.evict_threshold);

        let payload = match &descriptor.data {
            SourceData::Vector { tiles } => DecodePayload::Vector {
                endpoints: Arc::new(tiles.clone()),
            },
            SourceData::GeoJson { data } => DecodePayload::GeoJson {
                document: Arc::new(data.clone()),
                limits: descriptor.geojson,
            },
        };

        let pool = WorkerPool::start(codec, config.workers_per_source, runtime);
        let (build_tx, build_rx) = mpsc::unbounded_channel();

        Self {
            id,
            grid,
            cache: TileCache::new(),
            pool,
            queue,
            build_tx,
            build_rx,
            payload,
            scheme: descriptor.scheme,
            min_zoom: descriptor.min_zoom,
            metrics,
            load: 1.0,
        }
    }

    /// Fraction of the last frame's need satisfied by finished tiles,
    /// ancestor substitutes counting by resolution share. `1.0` when
    /// nothing was needed.
    pub(crate) fn load(&self) -> f64 {
        self.load
    }

    /// True when this source's tiles carry named layers that style layers
    /// must select with `source_layer`.
    pub(crate) fn has_named_layers(&self) -> bool {
        matches!(self.payload, DecodePayload::Vector { .. })
    }

    /// Advances the pipeline one frame and returns the frame's tileset,
    /// one view per covered tile.
    ///
    /// `layers` must be the style layers drawing this source that are
    /// currently visible; they decide which buffers newly decoded tiles
    /// build.
    pub(crate) fn update(
        &mut self,
        viewport: Viewport,
        transform: Transform,
        layers: &[StyleLayer],
    ) -> Tileset {
        self.integrate_completions(layers);

        if viewport.is_empty() || transform.scale <= 0.0 {
            self.load = 1.0;
            return Tileset::default();
        }

        let frame = self.grid.frame(viewport, transform);

        // Re-score the whole cache against the new camera before coverage
        // decides what to keep
        self.cache
            .process(|record| record.set_priority(self.grid.priority(&frame, record.key())));

        let Self {
            id,
            grid,
            cache,
            pool,
            payload,
            scheme,
            metrics,
            min_zoom,
            ..
        } = self;
        let min_zoom = *min_zoom;

        let needs = grid.coverage(&frame);
        let mut tiles = Vec::new();
        let mut credit = 0.0;

        for need in &needs {
            let retrieval = cache.retrieve(
                need.key,
                need.priority,
                |key| key.zoom < min_zoom,
                |key, priority| {
                    let record = TileRecord::new(key, priority);
                    let request = DecodeRequest {
                        key,
                        scheme: *scheme,
                        payload: payload.clone(),
                    };
                    let task = pool.start_decode(key, request, record.cancellation().clone());
                    record.begin_decoding(task);
                    metrics.tile_requested();
                    debug!(source = %id, tile = %key, "tile requested");
                    record
                },
            );

            match retrieval.fallback {
                Some(fallback) => {
                    // An ancestor N levels up contributes a quarter per level
                    credit += fallback.crop.scale * fallback.crop.scale;
                    tiles.push(TileView {
                        key: need.key,
                        record: fallback.record,
                        crop: fallback.crop,
                    });
                }
                // Nothing finished covers this key yet; report the pending
                // record so the renderer can tell absence from loading
                None => tiles.push(TileView {
                    key: need.key,
                    record: retrieval.record,
                    crop: CropRegion::FULL,
                }),
            }
        }

        self.load = if needs.is_empty() {
            1.0
        } else {
            credit / needs.len() as f64
        };

        self.evict();

        // Coarse zoom first, so substituted ancestors paint underneath
        tiles.sort_by_key(|view| view.record.key().zoom);
        Tileset {
            zoom: frame.zoom,
            tile_screen_size: frame.tile_screen_size,
            translate_x: transform.translate_x,
            translate_y: transform.translate_y,
            tiles,
        }
    }

    /// Drains decode outcomes and finished builds accumulated since the
    /// last frame.
    fn integrate_completions(&mut self, layers: &[StyleLayer]) {
        let build_layers: Vec<BuildLayer> = layers
            .iter()
            .map(|layer| BuildLayer {
                id: layer.id.clone(),
                source_layer: layer
                    .source_layer
                    .clone()
                    .unwrap_or_else(|| GEOJSON_SOURCE_LAYER.to_owned()),
                kind: layer.kind,
            })
            .collect();

        for outcome in self.pool.poll_completions() {
            let Some(record) = self.cache.get(outcome.key).cloned() else {
                continue;
            };
            match record.decode_task() {
                Some(task) if task == outcome.task => {
                    record.take_decode_task();
                }
                _ => {
                    debug!(source = %self.id, tile = %outcome.key, "ignoring stale decode outcome");
                    continue;
                }
            }

            match outcome.result {
                DecodeResult::Completed(decoded) => {
                    self.metrics.decode_completed();
                    let build = BundleBuild::new(
                        Arc::clone(&record),
                        decoded,
                        build_layers.clone(),
                        self.build_tx.clone(),
                    );
                    let task = self.queue.enqueue(Box::new(build));
                    record.begin_building(task);
                }
                DecodeResult::Failed(error) => {
                    self.metrics.decode_failed();
                    record.fail();
                    warn!(source = %self.id, tile = %outcome.key, %error, "tile decode failed");
                }
                DecodeResult::Canceled => {
                    self.metrics.decode_canceled();
                    record.cancel();
                }
            }
        }

        while let Ok(completion) = self.build_rx.try_recv() {
            let record = completion.record;
            record.take_build_task();
            if record.complete(Arc::new(completion.bundle)) {
                self.metrics.tile_ready();
                debug!(source = %self.id, tile = %record.key(), "tile ready");
            }
        }
    }

    /// Drops every record the camera no longer justifies keeping and
    /// cancels its outstanding work.
    fn evict(&mut self) {
        let Self {
            id,
            grid,
            cache,
            pool,
            queue,
            metrics,
            ..
        } = self;
        let threshold = grid.evict_threshold();

        cache.drop_records(
            |record| record.priority() as f64 > threshold,
            |record| {
                if let Some(task) = record.take_decode_task() {
                    pool.cancel(task);
                    metrics.decode_canceled();
                }
                if let Some(task) = record.take_build_task() {
                    queue.cancel(task);
                }
                record.cancel();
                metrics.tile_evicted();
                debug!(source = %id, tile = %record.key(), "tile evicted");
            },
        );
    }

    /// Cancels all outstanding work and empties the cache. Workers are
    /// signalled to stop but not awaited.
    pub(crate) fn teardown(&mut self) {
        let Self {
            cache, pool, queue, ..
        } = self;
        cache.drop_records(
            |_| true,
            |record| {
                if let Some(task) = record.take_decode_task() {
                    pool.cancel(task);
                }
                if let Some(task) = record.take_build_task() {
                    queue.cancel(task);
                }
                record.cancel();
            },
        );
        pool.stop();
    }

    /// Tears the pipeline down and waits for its decode workers to exit.
    pub(crate) async fn shutdown(mut self) {
        self.teardown();
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BoxFuture, CodecError};
    use crate::geometry::{DecodedTile, FeatureGeometry, FeatureSet};
    use crate::source::LayerKind;
    use std::time::Duration;

    /// Codec producing a one-point "test" layer immediately.
    struct InstantCodec;

    impl Codec for InstantCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(async {
                let features = FeatureSet {
                    features: vec![FeatureGeometry::Points(vec![[0.5, 0.5]])],
                };
                Ok(DecodedTile::single_layer("test", features))
            })
        }
    }

    struct FailingCodec;

    impl Codec for FailingCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(async { Err(CodecError::Parse("truncated".into())) })
        }
    }

    struct StalledCodec;

    impl Codec for StalledCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(futures::future::pending())
        }
    }

    fn test_pipeline(codec: Arc<dyn Codec>) -> (SourcePipeline, Arc<TaskQueue>, Arc<PipelineMetrics>) {
        let queue = Arc::new(TaskQueue::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let descriptor = SourceDescriptor::vector(["https://tiles.example/{z}/{x}/{y}.pbf"]);
        let pipeline = SourcePipeline::new(
            SourceId::new("basemap"),
            &descriptor,
            PipelineConfig::new().with_prefetch_buffer(0.0),
            codec,
            Arc::clone(&queue),
            Arc::clone(&metrics),
            &Handle::current(),
        );
        (pipeline, queue, metrics)
    }

    fn dot_layers() -> Vec<StyleLayer> {
        vec![StyleLayer::new("dots", "basemap", LayerKind::Circle).with_source_layer("test")]
    }

    /// Camera showing tiles 5..=6 x 3..=4 at zoom 4.
    fn four_tile_camera() -> (Viewport, Transform) {
        (
            Viewport::new(800.0, 600.0),
            Transform {
                scale: 8192.0,
                translate_x: -2662.4,
                translate_y: -1689.6,
            },
        )
    }

    /// Runs update passes and queue turns until every needed tile is
    /// ready, returning the first fully-loaded tileset.
    async fn settle(
        pipeline: &mut SourcePipeline,
        queue: &TaskQueue,
        viewport: Viewport,
        transform: Transform,
        layers: &[StyleLayer],
    ) -> Tileset {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let tileset = pipeline.update(viewport, transform, layers);
                if pipeline.load() == 1.0 {
                    return tileset;
                }
                while queue.run_turn() {}
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pipeline should settle")
    }

    #[tokio::test]
    async fn test_update_requests_coverage_then_settles() {
        let (mut pipeline, queue, metrics) = test_pipeline(Arc::new(InstantCodec));
        let (viewport, transform) = four_tile_camera();
        let layers = dot_layers();

        let first = pipeline.update(viewport, transform, &layers);
        assert_eq!(first.tiles.len(), 4, "pending tiles are reported immediately");
        assert!(first.tiles.iter().all(|view| !view.is_ready() && view.crop.is_full()));
        assert_eq!(pipeline.load(), 0.0);
        assert_eq!(metrics.snapshot().tiles_requested, 4);

        let tileset = settle(&mut pipeline, &queue, viewport, transform, &layers).await;
        assert_eq!(tileset.zoom, 4);
        assert_eq!(tileset.tile_screen_size, 512.0);
        assert_eq!(tileset.tiles.len(), 4);
        for view in &tileset.tiles {
            assert!(view.crop.is_full());
            let bundle = view.record.data().expect("settled record has data");
            assert_eq!(bundle.buffers["dots"].vertex_count(), 1);
        }
        assert_eq!(metrics.snapshot().tiles_ready, 4);
        // Settling never re-requested anything
        assert_eq!(metrics.snapshot().tiles_requested, 4);
    }

    #[tokio::test]
    async fn test_zoom_in_substitutes_ready_parent() {
        let (mut pipeline, queue, metrics) = test_pipeline(Arc::new(InstantCodec));
        let (viewport, transform) = four_tile_camera();
        let layers = dot_layers();
        settle(&mut pipeline, &queue, viewport, transform, &layers).await;

        // Double the scale about the screen origin: same world spot, zoom 5
        let zoomed = Transform {
            scale: transform.scale * 2.0,
            translate_x: transform.translate_x * 2.0,
            translate_y: transform.translate_y * 2.0,
        };
        let tileset = pipeline.update(viewport, zoomed, &layers);

        // All four zoom-5 needs sit inside ready tile 4/5/3
        assert_eq!(tileset.zoom, 5);
        assert_eq!(tileset.tiles.len(), 4);
        for view in &tileset.tiles {
            assert_eq!(view.key.zoom, 5);
            assert_eq!(view.record.key(), crate::coord::TileKey::new(4, 5, 3));
            assert_eq!(view.crop.scale, 0.5);
        }
        assert_eq!(pipeline.load(), 0.25);

        // The three zoom-4 tiles now fully outside the view were evicted
        assert_eq!(metrics.snapshot().tiles_evicted, 3);
        assert_eq!(pipeline.cache.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_decode_is_terminal_and_not_retried() {
        let (mut pipeline, queue, metrics) = test_pipeline(Arc::new(FailingCodec));
        let (viewport, transform) = four_tile_camera();
        let layers = dot_layers();

        pipeline.update(viewport, transform, &layers);
        tokio::time::timeout(Duration::from_secs(2), async {
            while metrics.snapshot().decodes_failed < 4 {
                pipeline.update(viewport, transform, &layers);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failures should surface");

        let tileset = pipeline.update(viewport, transform, &layers);
        assert_eq!(tileset.tiles.len(), 4);
        assert!(tileset.tiles.iter().all(|view| !view.is_ready()));
        assert_eq!(pipeline.load(), 0.0);
        // Failed records stay cached; nothing was dispatched again
        assert_eq!(metrics.snapshot().tiles_requested, 4);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_degenerate_viewport_is_fully_loaded() {
        let (mut pipeline, _queue, metrics) = test_pipeline(Arc::new(InstantCodec));
        let (_, transform) = four_tile_camera();

        let tileset = pipeline.update(Viewport::new(0.0, 600.0), transform, &dot_layers());
        assert!(tileset.is_empty());
        assert_eq!(pipeline.load(), 1.0);
        assert_eq!(metrics.snapshot().tiles_requested, 0);
    }

    #[tokio::test]
    async fn test_camera_move_evicts_inflight_decodes() {
        let (mut pipeline, _queue, metrics) = test_pipeline(Arc::new(StalledCodec));
        let (viewport, transform) = four_tile_camera();
        let layers = dot_layers();

        pipeline.update(viewport, transform, &layers);
        assert_eq!(pipeline.pool.outstanding(), 4);

        // Pan half a world east; nothing from the first frame stays relevant
        let moved = Transform {
            translate_x: transform.translate_x - 4096.0,
            ..transform
        };
        pipeline.update(viewport, moved, &layers);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tiles_evicted, 4);
        assert_eq!(snapshot.decodes_canceled, 4);
        assert_eq!(snapshot.tiles_requested, 8);
        // Only the second frame's decodes remain in flight
        assert_eq!(pipeline.pool.outstanding(), 4);
    }

    #[tokio::test]
    async fn test_teardown_cancels_outstanding_work() {
        let (mut pipeline, _queue, metrics) = test_pipeline(Arc::new(StalledCodec));
        let (viewport, transform) = four_tile_camera();

        pipeline.update(viewport, transform, &dot_layers());
        assert_eq!(pipeline.pool.outstanding(), 4);

        pipeline.teardown();
        assert_eq!(pipeline.pool.outstanding(), 0);
        assert!(pipeline.cache.is_empty());
        // Teardown is removal, not camera-driven eviction
        assert_eq!(metrics.snapshot().tiles_evicted, 0);
    }

    #[tokio::test]
    async fn test_geojson_descriptor_feeds_geojson_payload() {
        let queue = Arc::new(TaskQueue::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let descriptor = SourceDescriptor::geojson(serde_json::json!({
            "type": "FeatureCollection",
            "features": []
        }));
        let pipeline = SourcePipeline::new(
            SourceId::new("overlay"),
            &descriptor,
            PipelineConfig::new(),
            Arc::new(InstantCodec),
            queue,
            metrics,
            &Handle::current(),
        );
        assert!(matches!(pipeline.payload, DecodePayload::GeoJson { .. }));
    }
}
