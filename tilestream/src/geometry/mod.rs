//! Decoded tile data model.
//!
//! Codecs produce a [`DecodedTile`] of parsed features per named source
//! layer. The buffer build step flattens those features into flat
//! [`GeometryBuffer`] arrays, one per style layer, collected into a
//! [`LayerBundle`]. Bundles are immutable once produced and are shared with
//! the renderer behind `Arc`.

use std::collections::HashMap;

use bytes::Bytes;

/// How the renderer should interpret a geometry buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Primitive {
    /// Each vertex is one point.
    Points,
    /// Index pairs form line segments.
    Lines,
    /// Index triples form triangles.
    Triangles,
}

/// Flat vertex/index arrays for one style layer of one tile.
///
/// Vertices are `(x, y)` pairs in tile-local coordinates, packed into a
/// single `f32` array the way the renderer uploads them.
#[derive(Clone, Debug)]
pub struct GeometryBuffer {
    pub primitive: Primitive,
    pub vertex_data: Vec<f32>,
    pub index_data: Vec<u32>,
}

impl GeometryBuffer {
    /// Creates an empty buffer for `primitive`.
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            vertex_data: Vec::new(),
            index_data: Vec::new(),
        }
    }

    /// Number of packed vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertex_data.len() / 2
    }

    /// True when no geometry has been appended.
    pub fn is_empty(&self) -> bool {
        self.vertex_data.is_empty()
    }

    /// Appends point vertices, indexed sequentially.
    pub fn push_points(&mut self, points: &[[f32; 2]]) {
        let base = self.vertex_count() as u32;
        for (offset, point) in points.iter().enumerate() {
            self.vertex_data.extend(point);
            self.index_data.push(base + offset as u32);
        }
    }

    /// Appends a polyline as line-list segments between consecutive
    /// vertices.
    pub fn push_polyline(&mut self, line: &[[f32; 2]]) {
        if line.len() < 2 {
            return;
        }
        let base = self.vertex_count() as u32;
        for point in line {
            self.vertex_data.extend(point);
        }
        for i in 1..line.len() as u32 {
            self.index_data.push(base + i - 1);
            self.index_data.push(base + i);
        }
    }

    /// Appends pre-triangulated geometry, rebasing the indices onto this
    /// buffer's vertex range.
    pub fn push_triangles(&mut self, vertices: &[[f32; 2]], indices: &[u32]) {
        let base = self.vertex_count() as u32;
        for vertex in vertices {
            self.vertex_data.extend(vertex);
        }
        self.index_data.extend(indices.iter().map(|i| base + i));
    }
}

/// Shared raster atlas produced by the codec for one tile.
///
/// Glyphs and sprites referenced by the tile's features are packed into a
/// single RGBA image; the bytes are shared, never copied per layer.
#[derive(Clone, Debug)]
pub struct AtlasImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// Finished render-ready geometry for one tile, keyed by style layer id.
#[derive(Debug, Default)]
pub struct LayerBundle {
    pub buffers: HashMap<String, GeometryBuffer>,
    pub atlas: Option<AtlasImage>,
}

impl LayerBundle {
    /// True when no layer produced any geometry.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Geometry of a single parsed feature.
///
/// Polygon fills arrive pre-triangulated; triangulation is the codec's job.
#[derive(Clone, Debug)]
pub enum FeatureGeometry {
    /// Point positions.
    Points(Vec<[f32; 2]>),
    /// Polyline vertex runs.
    Lines(Vec<Vec<[f32; 2]>>),
    /// Triangulated fill: vertices plus triangle indices.
    Triangles {
        vertices: Vec<[f32; 2]>,
        indices: Vec<u32>,
    },
}

/// Parsed features for one named source layer of a decoded tile.
#[derive(Clone, Debug, Default)]
pub struct FeatureSet {
    pub features: Vec<FeatureGeometry>,
}

/// Codec output for one tile.
#[derive(Debug, Default)]
pub struct DecodedTile {
    /// Features grouped by source layer name.
    pub layers: HashMap<String, FeatureSet>,
    /// Optional shared atlas for the tile's symbols.
    pub atlas: Option<AtlasImage>,
}

impl DecodedTile {
    /// Builds a single-layer tile, the shape GeoJSON sources produce.
    pub fn single_layer(name: impl Into<String>, features: FeatureSet) -> Self {
        let mut layers = HashMap::new();
        layers.insert(name.into(), features);
        Self {
            layers,
            atlas: None,
        }
    }
}
