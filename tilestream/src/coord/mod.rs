//! Tile coordinate module
//!
//! Provides tile pyramid addressing ([`TileKey`], crop regions for ancestor
//! substitution) and conversions from geographic coordinates to the unit
//! world square that tile indices are derived from.

mod types;

pub use types::{CropRegion, TileKey, WorldBounds, MAX_ZOOM, MIN_ZOOM};

use std::f64::consts::PI;

/// Northern latitude limit of the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;

/// Southern latitude limit of the Web Mercator projection.
pub const MIN_LAT: f64 = -85.05112878;

/// Projects geographic coordinates onto the unit world square.
///
/// Latitudes beyond the Web Mercator limits are clamped to the projection
/// edge rather than rejected; sources commonly declare `[-90, 90]` bounds.
///
/// # Arguments
///
/// * `lng` - Longitude in degrees (-180.0 to 180.0)
/// * `lat` - Latitude in degrees
///
/// # Returns
///
/// `(x, y)` in `[0, 1]`, with y growing southward.
#[inline]
pub fn lng_lat_to_world(lng: f64, lat: f64) -> (f64, f64) {
    let x = (lng + 180.0) / 360.0;
    let lat_rad = lat.clamp(MIN_LAT, MAX_LAT) * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0;
    (x, y.clamp(0.0, 1.0))
}

/// Converts a `[west, south, east, north]` degree box to world bounds.
///
/// North maps to the smaller y, so the result is min/max ordered in the
/// world frame.
pub fn bounds_from_lng_lat(west: f64, south: f64, east: f64, north: f64) -> WorldBounds {
    let (min_x, max_y) = lng_lat_to_world(west, south);
    let (max_x, min_y) = lng_lat_to_world(east, north);
    WorldBounds {
        min_x,
        min_y,
        max_x,
        max_y,
    }
}

/// Returns the unit-world rectangle covered by `key`.
#[inline]
pub fn tile_world_rect(key: TileKey) -> WorldBounds {
    let tiles = TileKey::tiles_across(key.zoom) as f64;
    WorldBounds {
        min_x: key.x as f64 / tiles,
        min_y: key.y as f64 / tiles,
        max_x: (key.x + 1) as f64 / tiles,
        max_y: (key.y + 1) as f64 / tiles,
    }
}
