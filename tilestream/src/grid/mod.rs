//! Viewport coverage and tile priority.
//!
//! A [`TileGrid`] turns the camera state of one redraw into the set of
//! tiles a source needs, each carrying a priority in `[0, 1]` where lower
//! is more urgent. The same priority metric orders decode and build work
//! and drives eviction: a record whose priority climbs past the eviction
//! threshold is no longer worth keeping.
//!
//! Priority combines how much of the (prefetch-buffered) viewport a tile
//! covers with how well its zoom matches the view:
//!
//! ```text
//! priority = 1 - visible_fraction * 2^-|zoom - ideal_zoom|
//! ```
//!
//! Horizontal overlap is evaluated at the tile's raw position and shifted
//! a full world width east and west, so tiles straddling the antimeridian
//! score the same as anywhere else. Rows are clamped to the world; columns
//! wrap.

use crate::coord::{tile_world_rect, TileKey, WorldBounds};
use crate::config::{DEFAULT_EVICT_THRESHOLD, DEFAULT_PREFETCH_BUFFER};

/// Viewport size in physical pixels.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Viewport {
    pub width_px: f64,
    pub height_px: f64,
}

impl Viewport {
    pub fn new(width_px: f64, height_px: f64) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    /// True when the viewport has no area.
    pub fn is_empty(&self) -> bool {
        self.width_px <= 0.0 || self.height_px <= 0.0
    }
}

/// Maps unit world coordinates onto the screen.
///
/// `scale` is the width of one world copy in screen pixels;
/// `screen = world * scale + translate`.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Transform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Transform {
    /// The world rectangle visible through `viewport`.
    ///
    /// X is reported unwrapped; values outside `[0, 1]` are positions on
    /// neighbouring world copies.
    pub fn world_rect(&self, viewport: Viewport) -> WorldBounds {
        WorldBounds {
            min_x: -self.translate_x / self.scale,
            min_y: -self.translate_y / self.scale,
            max_x: (viewport.width_px - self.translate_x) / self.scale,
            max_y: (viewport.height_px - self.translate_y) / self.scale,
        }
    }
}

/// One tile the viewport needs, with its computed priority.
#[derive(Clone, Copy, Debug)]
pub struct TileNeed {
    pub key: TileKey,
    pub priority: f32,
}

/// Per-frame view-derived quantities shared by coverage and priority math.
#[derive(Clone, Copy, Debug)]
pub struct ViewFrame {
    /// Integer zoom tiles are requested at.
    pub zoom: u8,
    /// On-screen size of one tile at `zoom`, in pixels.
    pub tile_screen_size: f64,
    /// Fractional ideal zoom, clamped to the source's range.
    ideal_zoom: f64,
    /// Buffered visible rectangle in unit world coordinates.
    world: WorldBounds,
    degenerate: bool,
}

/// Coverage and priority calculator for one source.
pub struct TileGrid {
    tile_size_px: u32,
    min_zoom: u8,
    max_zoom: u8,
    bounds: WorldBounds,
    prefetch_buffer: f64,
    evict_threshold: f64,
}

impl TileGrid {
    /// Creates a grid with the default prefetch buffer and eviction
    /// threshold.
    ///
    /// # Arguments
    ///
    /// * `tile_size_px` - Nominal tile size in pixels (zoom selection pivot)
    /// * `min_zoom` / `max_zoom` - Zoom range tiles exist in
    /// * `bounds` - World-space extent the source covers
    pub fn new(tile_size_px: u32, min_zoom: u8, max_zoom: u8, bounds: WorldBounds) -> Self {
        Self {
            tile_size_px,
            min_zoom,
            max_zoom,
            bounds,
            prefetch_buffer: DEFAULT_PREFETCH_BUFFER,
            evict_threshold: DEFAULT_EVICT_THRESHOLD,
        }
    }

    /// Sets the prefetch ring width, in tile widths.
    pub fn with_prefetch_buffer(mut self, buffer: f64) -> Self {
        self.prefetch_buffer = buffer;
        self
    }

    /// Sets the priority above which tiles are neither requested nor kept.
    pub fn with_evict_threshold(mut self, threshold: f64) -> Self {
        self.evict_threshold = threshold;
        self
    }

    pub fn evict_threshold(&self) -> f64 {
        self.evict_threshold
    }

    /// Integer zoom for `transform`: `log2(scale / tile_size)`, floored and
    /// clamped to the source's range.
    pub fn zoom_for(&self, transform: Transform) -> u8 {
        if transform.scale <= 0.0 {
            return self.min_zoom;
        }
        let ideal = (transform.scale / self.tile_size_px as f64).log2();
        ideal.floor().clamp(self.min_zoom as f64, self.max_zoom as f64) as u8
    }

    /// Captures the view-derived quantities for one redraw.
    pub fn frame(&self, viewport: Viewport, transform: Transform) -> ViewFrame {
        let zoom = self.zoom_for(transform);
        let tiles = TileKey::tiles_across(zoom) as f64;
        let degenerate = viewport.is_empty() || transform.scale <= 0.0;

        let ideal = if degenerate {
            self.min_zoom as f64
        } else {
            (transform.scale / self.tile_size_px as f64)
                .log2()
                .clamp(self.min_zoom as f64, self.max_zoom as f64)
        };

        let visible = transform.world_rect(viewport);
        let buffer = self.prefetch_buffer / tiles;
        ViewFrame {
            zoom,
            tile_screen_size: transform.scale / tiles,
            ideal_zoom: ideal,
            world: WorldBounds {
                min_x: visible.min_x - buffer,
                min_y: visible.min_y - buffer,
                max_x: visible.max_x + buffer,
                max_y: visible.max_y + buffer,
            },
            degenerate,
        }
    }

    /// Enumerates the tiles the frame needs, most urgent first left to the
    /// caller; order is row-major.
    ///
    /// Columns wrap across the antimeridian (each key appears at most
    /// once), rows are clamped to the world, and candidates outside the
    /// source bounds or past the eviction threshold are skipped.
    pub fn coverage(&self, frame: &ViewFrame) -> Vec<TileNeed> {
        if frame.degenerate {
            return Vec::new();
        }

        let zoom = frame.zoom;
        let tiles = TileKey::tiles_across(zoom) as i64;
        let tiles_f = tiles as f64;

        let mut x_start = (frame.world.min_x * tiles_f).floor() as i64;
        let mut x_end = (frame.world.max_x * tiles_f).ceil() as i64 - 1;
        // A viewport wider than the world covers every column exactly once
        if x_end - x_start + 1 >= tiles {
            x_start = 0;
            x_end = tiles - 1;
        }

        let y_start = ((frame.world.min_y * tiles_f).floor().max(0.0) as i64)
            .max((self.bounds.min_y * tiles_f).floor() as i64);
        let y_end = ((frame.world.max_y * tiles_f).ceil() as i64 - 1)
            .min(tiles - 1)
            .min((self.bounds.max_y * tiles_f).ceil() as i64 - 1);

        let bx_start = (self.bounds.min_x * tiles_f).floor() as i64;
        let bx_end = (self.bounds.max_x * tiles_f).ceil() as i64 - 1;

        let mut needs = Vec::new();
        for iy in y_start..=y_end {
            for ix in x_start..=x_end {
                let wx = TileKey::wrap_x(zoom, ix) as i64;
                if wx < bx_start || wx > bx_end {
                    continue;
                }
                let key = TileKey::new(zoom, wx, iy as u32);
                let priority = self.priority(frame, key);
                if priority as f64 <= self.evict_threshold {
                    needs.push(TileNeed { key, priority });
                }
            }
        }
        needs
    }

    /// Priority of `key` for this frame; lower is more urgent.
    ///
    /// Valid for keys at any zoom, so cached records from previous zoom
    /// levels are scored by the same metric as current candidates.
    pub fn priority(&self, frame: &ViewFrame, key: TileKey) -> f32 {
        if frame.degenerate {
            return 1.0;
        }
        let fraction = visible_fraction(&frame.world, key);
        let resolution = (-((key.zoom as f64) - frame.ideal_zoom).abs()).exp2();
        (1.0 - fraction * resolution) as f32
    }
}

/// Fraction of `key`'s footprint inside `world`, testing the raw position
/// and one world width east and west.
fn visible_fraction(world: &WorldBounds, key: TileKey) -> f64 {
    let rect = tile_world_rect(key);
    let height = overlap(rect.min_y, rect.max_y, world.min_y, world.max_y);
    if height <= 0.0 {
        return 0.0;
    }
    let mut width: f64 = 0.0;
    for shift in [-1.0, 0.0, 1.0] {
        width = width.max(overlap(
            rect.min_x + shift,
            rect.max_x + shift,
            world.min_x,
            world.max_x,
        ));
    }
    (width * height) / (rect.width() * rect.height())
}

fn overlap(a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> f64 {
    (a_max.min(b_max) - a_min.max(b_min)).max(0.0)
}
