//! Render-facing output types.

use std::sync::Arc;

use crate::cache::TileRecord;
use crate::coord::{CropRegion, TileKey};

/// One covered tile of a frame's tileset.
#[derive(Clone, Debug)]
pub struct TileView {
    /// The key the viewport asked for.
    pub key: TileKey,
    /// Record backing this view: a ready ancestor standing in for `key`,
    /// or `key`'s own record, which may still be in flight.
    pub record: Arc<TileRecord>,
    /// Region of `record` covering `key`; full when the record is `key`'s
    /// own.
    pub crop: CropRegion,
}

impl TileView {
    /// True when [`record`](Self::record) holds a bundle ready to draw.
    /// Renderers skip views that are not.
    pub fn is_ready(&self) -> bool {
        self.record.is_ready()
    }
}

/// One source's view state for one frame.
///
/// Views are ordered coarse zoom first so substituted ancestors paint
/// underneath current-zoom tiles.
#[derive(Clone, Debug, Default)]
pub struct Tileset {
    /// Zoom tiles were requested at.
    pub zoom: u8,
    /// On-screen size of one tile at that zoom, in pixels.
    pub tile_screen_size: f64,
    /// Screen translation the frame was computed with.
    pub translate_x: f64,
    pub translate_y: f64,
    pub tiles: Vec<TileView>,
}

impl Tileset {
    /// True when the frame covered no tiles at all.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of views ready to draw this frame.
    pub fn ready_count(&self) -> usize {
        self.tiles.iter().filter(|view| view.is_ready()).count()
    }
}
