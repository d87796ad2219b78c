//! Source and layer descriptions, and the per-source pipeline.
//!
//! A [`SourceDescriptor`] says where tile data comes from and which part
//! of the world it covers; [`StyleLayer`]s say how features from a source
//! are turned into geometry. Both are plain serde types so embedders can
//! load them straight from a style document.
//!
//! Internally, a source pipeline ties one source's cache, decode pool and
//! build tasks together; the coordinator drives one pipeline per source.

mod build;
mod pipeline;

pub(crate) use pipeline::SourcePipeline;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{GeoJsonLimits, TileScheme};
use crate::geometry::Primitive;

/// Identifier of a tile source, unique within a coordinator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a source's tile data comes from.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceData {
    /// Tiled endpoints queried per key. Templates use `{z}`, `{x}` and
    /// `{y}` placeholders.
    Vector { tiles: Vec<String> },
    /// One inline GeoJSON document, sliced into tiles on demand.
    GeoJson { data: serde_json::Value },
}

fn default_tile_size() -> u32 {
    512
}

fn default_max_zoom() -> u8 {
    22
}

/// Everything needed to add one source to the pipeline.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(flatten)]
    pub data: SourceData,
    /// Nominal tile size in pixels; drives zoom selection.
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default)]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    /// Optional lng/lat extent as `[west, south, east, north]`.
    #[serde(default)]
    pub bounds: Option<[f64; 4]>,
    #[serde(default)]
    pub scheme: TileScheme,
    /// Slicing limits, used by GeoJSON sources only.
    #[serde(default)]
    pub geojson: GeoJsonLimits,
}

impl SourceDescriptor {
    /// Describes a tiled vector source served from `endpoints`.
    pub fn vector<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data: SourceData::Vector {
                tiles: endpoints.into_iter().map(Into::into).collect(),
            },
            tile_size: default_tile_size(),
            min_zoom: 0,
            max_zoom: default_max_zoom(),
            bounds: None,
            scheme: TileScheme::default(),
            geojson: GeoJsonLimits::default(),
        }
    }

    /// Describes an inline GeoJSON source.
    pub fn geojson(document: serde_json::Value) -> Self {
        Self {
            data: SourceData::GeoJson { data: document },
            tile_size: default_tile_size(),
            min_zoom: 0,
            max_zoom: default_max_zoom(),
            bounds: None,
            scheme: TileScheme::default(),
            geojson: GeoJsonLimits::default(),
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Restricts the source to a lng/lat box `[west, south, east, north]`.
    pub fn with_bounds(mut self, bounds: [f64; 4]) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_scheme(mut self, scheme: TileScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_geojson_limits(mut self, limits: GeoJsonLimits) -> Self {
        self.geojson = limits;
        self
    }
}

/// How a style layer turns features into geometry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Point features rendered as circles.
    Circle,
    /// Line features rendered as stroked polylines.
    Line,
    /// Polygon features rendered as filled triangles.
    Fill,
}

impl LayerKind {
    /// Geometry primitive buffers of this kind hold.
    pub fn primitive(self) -> Primitive {
        match self {
            LayerKind::Circle => Primitive::Points,
            LayerKind::Line => Primitive::Lines,
            LayerKind::Fill => Primitive::Triangles,
        }
    }
}

fn default_visible() -> bool {
    true
}

/// One style layer drawing features from a source.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct StyleLayer {
    pub id: String,
    pub source: SourceId,
    /// Named layer inside a vector tile. Required for vector sources,
    /// absent for GeoJSON sources.
    #[serde(default)]
    pub source_layer: Option<String>,
    pub kind: LayerKind,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl StyleLayer {
    pub fn new(id: impl Into<String>, source: impl Into<SourceId>, kind: LayerKind) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            source_layer: None,
            kind,
            visible: true,
        }
    }

    pub fn with_source_layer(mut self, name: impl Into<String>) -> Self {
        self.source_layer = Some(name.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Validation failures when wiring sources and layers together.
///
/// Setup errors are programming or configuration mistakes and are fatal
/// for the operation that raised them; nothing is partially applied.
// Display/Error are implemented by hand: thiserror's derive insists that a
// field literally named `source` is the error's cause, but here `source`
// is a SourceId and part of the public API.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SetupError {
    DuplicateSource { id: SourceId },

    ZoomRange { id: SourceId, min: u8, max: u8 },

    NoEndpoints { id: SourceId },

    Bounds { id: SourceId },

    UnknownSource { layer: String, source: SourceId },

    MissingSourceLayer { layer: String, source: SourceId },

    UnexpectedSourceLayer { layer: String, source: SourceId },

    DuplicateLayer { layer: String },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::DuplicateSource { id } => {
                write!(f, "source {id} already exists")
            }
            SetupError::ZoomRange { id, min, max } => {
                write!(f, "source {id}: invalid zoom range {min}..={max}")
            }
            SetupError::NoEndpoints { id } => {
                write!(f, "source {id}: no tile endpoints configured")
            }
            SetupError::Bounds { id } => {
                write!(f, "source {id}: bounds must be a finite west/south/east/north box")
            }
            SetupError::UnknownSource { layer, source } => {
                write!(f, "layer {layer}: unknown source {source}")
            }
            SetupError::MissingSourceLayer { layer, source } => {
                write!(f, "layer {layer}: vector source {source} requires a source layer")
            }
            SetupError::UnexpectedSourceLayer { layer, source } => {
                write!(f, "layer {layer}: geojson source {source} does not take a source layer")
            }
            SetupError::DuplicateLayer { layer } => {
                write!(f, "duplicate layer id {layer}")
            }
        }
    }
}

impl std::error::Error for SetupError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vector_descriptor_from_style_json() {
        let descriptor: SourceDescriptor = serde_json::from_value(json!({
            "type": "vector",
            "tiles": ["https://tiles.example/{z}/{x}/{y}.pbf"],
            "min_zoom": 2,
            "max_zoom": 14,
            "scheme": "tms"
        }))
        .unwrap();

        match &descriptor.data {
            SourceData::Vector { tiles } => assert_eq!(tiles.len(), 1),
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(descriptor.tile_size, 512);
        assert_eq!(descriptor.min_zoom, 2);
        assert_eq!(descriptor.max_zoom, 14);
        assert_eq!(descriptor.scheme, TileScheme::Tms);
        assert!(descriptor.bounds.is_none());
    }

    #[test]
    fn test_geojson_descriptor_from_style_json() {
        let descriptor: SourceDescriptor = serde_json::from_value(json!({
            "type": "geojson",
            "data": {"type": "FeatureCollection", "features": []}
        }))
        .unwrap();

        assert!(matches!(descriptor.data, SourceData::GeoJson { .. }));
        assert_eq!(descriptor.geojson, GeoJsonLimits::default());
    }

    #[test]
    fn test_descriptor_builders() {
        let descriptor = SourceDescriptor::vector(["https://a.example/{z}/{x}/{y}"])
            .with_tile_size(256)
            .with_zoom_range(1, 10)
            .with_bounds([-10.0, -10.0, 10.0, 10.0]);

        assert_eq!(descriptor.tile_size, 256);
        assert_eq!(descriptor.min_zoom, 1);
        assert_eq!(descriptor.max_zoom, 10);
        assert_eq!(descriptor.bounds, Some([-10.0, -10.0, 10.0, 10.0]));
    }

    #[test]
    fn test_layer_kind_primitives() {
        assert_eq!(LayerKind::Circle.primitive(), Primitive::Points);
        assert_eq!(LayerKind::Line.primitive(), Primitive::Lines);
        assert_eq!(LayerKind::Fill.primitive(), Primitive::Triangles);
    }

    #[test]
    fn test_style_layer_defaults_to_visible() {
        let layer: StyleLayer = serde_json::from_value(json!({
            "id": "roads",
            "source": "basemap",
            "source_layer": "road",
            "kind": "line"
        }))
        .unwrap();

        assert!(layer.visible);
        assert_eq!(layer.source, SourceId::new("basemap"));
        assert_eq!(layer.source_layer.as_deref(), Some("road"));
    }

    #[test]
    fn test_setup_error_messages_name_the_parts() {
        let err = SetupError::MissingSourceLayer {
            layer: "roads".into(),
            source: SourceId::new("basemap"),
        };
        let message = err.to_string();
        assert!(message.contains("roads"));
        assert!(message.contains("basemap"));
    }
}
