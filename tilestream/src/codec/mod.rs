//! External codec seam.
//!
//! Fetching, binary tile parsing, polygon triangulation, and GeoJSON
//! slicing live behind the [`Codec`] trait; the pipeline only sees a
//! request going in and a [`DecodedTile`] (or error) coming out. Decode
//! workers race the returned future against the tile's cancellation token,
//! so dropping the future must abandon the work cleanly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::TileKey;
use crate::geometry::DecodedTile;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source layer name codecs use for sliced GeoJSON features.
///
/// GeoJSON documents carry no layer structure, so their features land in a
/// single well-known layer.
pub const GEOJSON_SOURCE_LAYER: &str = "geojson";

/// Tile addressing scheme used by a source's endpoints.
///
/// The pipeline always thinks in XYZ; a TMS source's row flip is applied by
/// the codec when it forms the wire request.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
    /// Row 0 at the north edge.
    #[default]
    Xyz,
    /// Row 0 at the south edge.
    Tms,
}

impl TileScheme {
    /// Row index to place on the wire for `key`.
    pub fn wire_y(&self, key: TileKey) -> u32 {
        match self {
            TileScheme::Xyz => key.y,
            TileScheme::Tms => TileKey::tiles_across(key.zoom) - 1 - key.y,
        }
    }
}

/// Limits applied when slicing an inline GeoJSON document into tiles.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GeoJsonLimits {
    /// Deepest zoom the document is tiled to; deeper requests overzoom.
    pub max_tile_zoom: u8,
    /// Upper bound on indexed points per slice.
    pub max_points: usize,
}

impl Default for GeoJsonLimits {
    fn default() -> Self {
        Self {
            max_tile_zoom: 14,
            max_points: 100_000,
        }
    }
}

/// What a codec decodes from.
#[derive(Clone, Debug)]
pub enum DecodePayload {
    /// Fetch from one of the endpoint templates, then parse the binary
    /// tile. Templates use `{z}`, `{x}` and `{y}` placeholders.
    Vector { endpoints: Arc<Vec<String>> },
    /// Slice the shared GeoJSON document down to the requested tile.
    GeoJson {
        document: Arc<serde_json::Value>,
        limits: GeoJsonLimits,
    },
}

/// Everything a codec needs to produce one tile.
#[derive(Clone, Debug)]
pub struct DecodeRequest {
    pub key: TileKey,
    pub scheme: TileScheme,
    pub payload: DecodePayload,
}

/// Errors surfaced by codec implementations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The tile could not be fetched from any endpoint.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The fetched bytes did not parse as a tile.
    #[error("malformed tile data: {0}")]
    Parse(String),

    /// The GeoJSON document could not be sliced.
    #[error("geojson slicing failed: {0}")]
    GeoJson(String),
}

/// Decodes tile payloads into render-ready feature sets.
///
/// Implementations are shared across decode workers as `Arc<dyn Codec>`
/// and must hand out `'static` futures that own whatever they need.
pub trait Codec: Send + Sync + 'static {
    /// Decodes one tile.
    ///
    /// The returned future is polled to completion exactly once per
    /// request; dropping it abandons the work.
    fn decode(&self, request: DecodeRequest) -> BoxFuture<'static, Result<DecodedTile, CodecError>>;
}
