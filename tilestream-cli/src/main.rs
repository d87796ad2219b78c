//! Tilestream demo driver.
//!
//! Flies a scripted camera from the whole world down to street level over
//! synthetic sources, exercising coverage, decode workers, chunked buffer
//! builds and pyramid fallback without a renderer attached. Load status is
//! logged during the flight and the pipeline counters are printed at the
//! end.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilestream::codec::{BoxFuture, DecodePayload, DecodeRequest, GEOJSON_SOURCE_LAYER};
use tilestream::config::DEFAULT_WORKERS_PER_SOURCE;
use tilestream::coord::{lng_lat_to_world, tile_world_rect, MAX_ZOOM};
use tilestream::geometry::{DecodedTile, FeatureGeometry, FeatureSet};
use tilestream::{
    Codec, CodecError, LayerKind, PipelineConfig, SetupError, SourceCoordinator, SourceDescriptor,
    SourceId, StyleLayer, TelemetrySnapshot, TileKey, Transform, Viewport,
};

/// Tile size the synthetic source advertises, in pixels.
const TILE_SIZE: f64 = 512.0;

/// Flight destination (Hamburg), in degrees.
const TARGET_LNG: f64 = 9.99;
const TARGET_LAT: f64 = 53.55;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tilestream demo flight - stream synthetic tiles along a scripted camera.
///
/// The camera starts with the whole world in view and dives exponentially
/// to the target zoom, holding the destination at viewport center. Two
/// sources are streamed: a synthetic vector basemap and a small inline
/// GeoJSON overlay of city markers.
#[derive(Parser, Debug)]
#[command(name = "tilestream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Viewport width in pixels.
    #[arg(long, default_value_t = 1280.0)]
    width: f64,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = 720.0)]
    height: f64,

    /// Animation frames in the flight.
    #[arg(long, default_value_t = 240)]
    frames: u32,

    /// Frame pacing in frames per second.
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Zoom level the flight dives to.
    #[arg(long, default_value_t = 12)]
    target_zoom: u8,

    /// Decode workers per source.
    #[arg(long, default_value_t = DEFAULT_WORKERS_PER_SOURCE)]
    workers: usize,

    /// Base synthetic decode latency in milliseconds.
    #[arg(long, default_value_t = 15)]
    decode_ms: u64,

    /// Per-mille of tiles whose decode fails, picked by key hash.
    #[arg(long, default_value_t = 0)]
    fail_per_mille: u16,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

// =============================================================================
// Synthetic Codec
// =============================================================================

/// Codec producing deterministic synthetic tiles.
///
/// Each decode sleeps a latency derived from the tile key so completions
/// interleave like real network fetches, then emits the tile border as a
/// polyline and the tile center as a point. An optional slice of the key
/// space fails instead, keyed by hash so reruns fail the same tiles.
struct SynthCodec {
    base_latency: Duration,
    fail_per_mille: u16,
}

impl SynthCodec {
    fn new(args: &Args) -> Self {
        Self {
            base_latency: Duration::from_millis(args.decode_ms),
            fail_per_mille: args.fail_per_mille,
        }
    }
}

impl Codec for SynthCodec {
    fn decode(
        &self,
        request: DecodeRequest,
    ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
        let base = self.base_latency;
        let fail_per_mille = self.fail_per_mille;
        Box::pin(async move {
            let hash = key_hash(request.key);
            // Spread latencies over 1x..2x of the base
            let jitter = base.mul_f64((hash % 997) as f64 / 997.0);
            tokio::time::sleep(base + jitter).await;

            if ((hash % 1000) as u16) < fail_per_mille {
                return Err(CodecError::Fetch {
                    url: request_url(&request),
                    reason: "synthetic outage".into(),
                });
            }

            Ok(match request.payload {
                DecodePayload::Vector { .. } => synth_vector_tile(),
                DecodePayload::GeoJson { document, .. } => slice_points(request.key, &document),
            })
        })
    }
}

fn key_hash(key: TileKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Endpoint URL the decode would have hit, for failure reporting.
fn request_url(request: &DecodeRequest) -> String {
    match &request.payload {
        DecodePayload::Vector { endpoints } => match endpoints.first() {
            Some(template) => template
                .replace("{z}", &request.key.zoom.to_string())
                .replace("{x}", &request.key.x.to_string())
                .replace("{y}", &request.scheme.wire_y(request.key).to_string()),
            None => request.key.to_string(),
        },
        DecodePayload::GeoJson { .. } => format!("geojson:{}", request.key),
    }
}

/// Border polyline plus center marker, in tile-local coordinates.
fn synth_vector_tile() -> DecodedTile {
    let mut tile = DecodedTile::default();
    tile.layers.insert(
        "outline".into(),
        FeatureSet {
            features: vec![FeatureGeometry::Lines(vec![vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.0, 1.0],
                [0.0, 0.0],
            ]])],
        },
    );
    tile.layers.insert(
        "centers".into(),
        FeatureSet {
            features: vec![FeatureGeometry::Points(vec![[0.5, 0.5]])],
        },
    );
    tile
}

/// Minimal GeoJSON slice: point features inside the tile, projected into
/// tile-local coordinates.
fn slice_points(key: TileKey, document: &serde_json::Value) -> DecodedTile {
    let rect = tile_world_rect(key);
    let mut points = Vec::new();
    if let Some(features) = document["features"].as_array() {
        for feature in features {
            let coords = &feature["geometry"]["coordinates"];
            let (Some(lng), Some(lat)) = (coords[0].as_f64(), coords[1].as_f64()) else {
                continue;
            };
            let (wx, wy) = lng_lat_to_world(lng, lat);
            if wx >= rect.min_x && wx < rect.max_x && wy >= rect.min_y && wy < rect.max_y {
                points.push([
                    ((wx - rect.min_x) / rect.width()) as f32,
                    ((wy - rect.min_y) / rect.height()) as f32,
                ]);
            }
        }
    }
    DecodedTile::single_layer(
        GEOJSON_SOURCE_LAYER,
        FeatureSet {
            features: vec![FeatureGeometry::Points(points)],
        },
    )
}

/// A few European city markers for the overlay source.
fn city_points() -> serde_json::Value {
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "Hamburg"},
             "geometry": {"type": "Point", "coordinates": [9.99, 53.55]}},
            {"type": "Feature", "properties": {"name": "London"},
             "geometry": {"type": "Point", "coordinates": [-0.13, 51.51]}},
            {"type": "Feature", "properties": {"name": "Paris"},
             "geometry": {"type": "Point", "coordinates": [2.35, 48.86]}},
        ]
    })
}

// =============================================================================
// Camera Flight
// =============================================================================

/// Exponential zoom toward the target, holding it at viewport center.
fn flight_transform(args: &Args, target_world: (f64, f64), progress: f64) -> Transform {
    let start_scale = args.width.min(args.height);
    let end_scale = TILE_SIZE * (1u64 << args.target_zoom) as f64;
    let scale = start_scale * (end_scale / start_scale).powf(progress);
    Transform {
        scale,
        translate_x: args.width / 2.0 - target_world.0 * scale,
        translate_y: args.height / 2.0 - target_world.1 * scale,
    }
}

/// True when every dispatched decode has resolved and the build queue is
/// empty. Load status alone cannot end the run when some tiles fail.
fn drained(snapshot: &TelemetrySnapshot) -> bool {
    snapshot.decodes_completed + snapshot.decodes_failed + snapshot.decodes_canceled
        >= snapshot.tiles_requested
        && snapshot.queue_depth == 0
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = Args::parse();
    init_logging(args.verbose);

    if args.target_zoom > MAX_ZOOM {
        warn!("target zoom {} clamped to {}", args.target_zoom, MAX_ZOOM);
        args.target_zoom = MAX_ZOOM;
    }
    args.fps = args.fps.max(1);

    print_banner(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("setup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), SetupError> {
    let viewport = Viewport::new(args.width, args.height);
    let config = PipelineConfig::new().with_workers_per_source(args.workers);
    let codec = Arc::new(SynthCodec::new(&args));
    let mut coordinator = SourceCoordinator::new(config, codec, Handle::current());

    coordinator.add_source(
        "world",
        SourceDescriptor::vector(["synthetic://tiles/{z}/{x}/{y}"]),
    )?;
    coordinator.add_source("cities", SourceDescriptor::geojson(city_points()))?;
    coordinator.set_layers(vec![
        StyleLayer::new("grid", "world", LayerKind::Line).with_source_layer("outline"),
        StyleLayer::new("marks", "world", LayerKind::Circle).with_source_layer("centers"),
        StyleLayer::new("cities", "cities", LayerKind::Circle),
    ])?;

    let target_world = lng_lat_to_world(TARGET_LNG, TARGET_LAT);
    let frame_time = Duration::from_secs(1) / args.fps;
    let report_every = (args.fps / 2).max(1);

    for frame in 0..args.frames {
        let progress = if args.frames > 1 {
            f64::from(frame) / f64::from(args.frames - 1)
        } else {
            1.0
        };
        let transform = flight_transform(&args, target_world, progress);
        coordinator.update(viewport, transform);

        if frame % report_every == 0 {
            let zoom = coordinator
                .tiles(&SourceId::new("world"))
                .map(|tileset| tileset.zoom)
                .unwrap_or(0);
            info!(
                "frame {:>4} | zoom {:>2} | load {:>5.1}%",
                frame,
                zoom,
                coordinator.load_status() * 100.0
            );
        }
        tokio::time::sleep(frame_time).await;
    }

    // Hold the final frame until everything visible is drawable or failed
    let final_transform = flight_transform(&args, target_world, 1.0);
    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            coordinator.update(viewport, final_transform);
            if coordinator.load_status() == 1.0 || drained(&coordinator.metrics()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if settled.is_err() {
        warn!("pipeline did not settle within 10s, reporting as-is");
    }

    info!("flight complete, load {:>5.1}%", coordinator.load_status() * 100.0);
    for name in ["world", "cities"] {
        let id = SourceId::new(name);
        if let Some(tileset) = coordinator.tiles(&id) {
            info!(
                "source {:<6} | zoom {:>2} | {}/{} tiles drawable",
                name,
                tileset.zoom,
                tileset.ready_count(),
                tileset.tiles.len()
            );
        }
    }

    println!();
    println!("{}", coordinator.metrics());

    coordinator.shutdown().await;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "tilestream=debug,tilestream_cli=debug"
    } else {
        "tilestream=info,tilestream_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_banner(args: &Args) {
    println!("Tilestream Demo Flight v{}", env!("CARGO_PKG_VERSION"));
    println!("==========================");
    println!();
    println!("Viewport:  {}x{} px", args.width, args.height);
    println!(
        "Flight:    world -> zoom {} over {} frames at {} fps",
        args.target_zoom, args.frames, args.fps
    );
    println!(
        "Decode:    {} workers/source, ~{} ms synthetic latency",
        args.workers, args.decode_ms
    );
    if args.fail_per_mille > 0 {
        println!("Failures:  {} per mille of tiles", args.fail_per_mille);
    }
    println!();
}
