//! Core coordinate types for tile addressing.

use std::fmt;

/// Minimum supported zoom level.
pub const MIN_ZOOM: u8 = 0;

/// Maximum supported zoom level.
///
/// Web Mercator tile indices at this depth still fit comfortably in `u32`,
/// and pyramid walks are bounded by this many steps.
pub const MAX_ZOOM: u8 = 24;

/// Address of one tile in the Web Mercator pyramid.
///
/// `x` counts columns from the antimeridian eastward and wraps modulo
/// `2^zoom`; `y` counts rows from the north edge and does not wrap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Creates a key, wrapping a possibly negative or overflowing `x` into
    /// the tile range for `zoom`.
    ///
    /// # Arguments
    ///
    /// * `zoom` - Zoom level (0 to [`MAX_ZOOM`])
    /// * `x` - Column index; any value is wrapped modulo `2^zoom`
    /// * `y` - Row index; must already be within `0..2^zoom`
    pub fn new(zoom: u8, x: i64, y: u32) -> Self {
        debug_assert!(zoom <= MAX_ZOOM, "zoom {zoom} exceeds MAX_ZOOM");
        debug_assert!(
            y < Self::tiles_across(zoom),
            "row {y} out of range at zoom {zoom}"
        );
        Self {
            zoom,
            x: Self::wrap_x(zoom, x),
            y,
        }
    }

    /// Number of tiles along one axis at `zoom`.
    pub fn tiles_across(zoom: u8) -> u32 {
        1u32 << zoom
    }

    /// Wraps a column index into `0..2^zoom`.
    pub fn wrap_x(zoom: u8, x: i64) -> u32 {
        x.rem_euclid(1i64 << zoom) as u32
    }

    /// The tile one level up that contains this tile.
    ///
    /// Returns `None` at zoom 0.
    pub fn parent(&self) -> Option<TileKey> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileKey {
            zoom: self.zoom - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// This tile's quadrant within its parent: `(0|1, 0|1)`.
    pub fn quadrant(&self) -> (u32, u32) {
        (self.x & 1, self.y & 1)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileKey({}/{}/{})", self.zoom, self.x, self.y)
    }
}

/// Sub-region of a tile, in the tile's own unit square.
///
/// `origin_x`/`origin_y` locate the region's top-left corner and `scale` is
/// its side length; the full tile is origin `(0, 0)` with scale `1`. Used
/// when an ancestor tile stands in for a missing descendant.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CropRegion {
    pub origin_x: f64,
    pub origin_y: f64,
    pub scale: f64,
}

impl CropRegion {
    /// The whole tile.
    pub const FULL: CropRegion = CropRegion {
        origin_x: 0.0,
        origin_y: 0.0,
        scale: 1.0,
    };

    /// True when the region covers the whole tile.
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Narrows this region from `child`'s frame into its parent's frame.
    ///
    /// Stepping up one level, the child occupies one quadrant of the parent,
    /// so the region's origin shifts by the child's quadrant offset and
    /// everything halves. Applied once per level of a pyramid walk.
    pub fn into_parent(self, child: TileKey) -> CropRegion {
        let (qx, qy) = child.quadrant();
        CropRegion {
            origin_x: (qx as f64 + self.origin_x) / 2.0,
            origin_y: (qy as f64 + self.origin_y) / 2.0,
            scale: self.scale / 2.0,
        }
    }
}

/// Axis-aligned rectangle in unit world coordinates.
///
/// The whole world maps to `[0, 1] x [0, 1]` with y growing southward, the
/// same frame tile indices are derived from. X values outside `[0, 1]`
/// denote positions on wrapped copies of the world.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct WorldBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl WorldBounds {
    /// The whole world.
    pub const WORLD: WorldBounds = WorldBounds {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };

    /// Width of the rectangle.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the rectangle.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        self.max_x <= self.min_x || self.max_y <= self.min_y
    }
}
