//! Tile record cache with pyramid fallback.
//!
//! One [`TileCache`] exists per source. It holds the single authoritative
//! [`TileRecord`] per tile key, creates records lazily on first retrieval,
//! and answers lookups with the best already-finished substitute: the tile
//! itself when ready, otherwise the nearest ready ancestor together with
//! the crop isolating the requested region.
//!
//! # Example
//!
//! ```ignore
//! use tilestream::cache::TileCache;
//!
//! let mut cache = TileCache::new();
//! let retrieval = cache.retrieve(key, priority, |k| k.zoom < min_zoom, |key, priority| {
//!     let record = TileRecord::new(key, priority);
//!     // dispatch the decode and wire its completion here
//!     record
//! });
//! if let Some(fallback) = retrieval.fallback {
//!     // draw fallback.record with fallback.crop
//! }
//! ```

mod record;

pub use record::{TileRecord, TileState};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::coord::{CropRegion, TileKey};

/// A finished record standing in for a requested tile.
///
/// `crop` selects the region of `record` covering the requested key; it is
/// the full tile when the record is the key's own.
#[derive(Clone, Debug)]
pub struct PyramidLookup {
    pub record: Arc<TileRecord>,
    pub crop: CropRegion,
}

/// Result of a cache retrieval.
#[derive(Debug)]
pub struct Retrieval {
    /// The requested key's record; repeat lookups return the identical
    /// instance while it lives in the cache.
    pub record: Arc<TileRecord>,
    /// Best drawable substitute right now, if any.
    pub fallback: Option<PyramidLookup>,
}

/// Cache of tile records for one source.
#[derive(Default)]
pub struct TileCache {
    records: HashMap<TileKey, Arc<TileRecord>>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record for `key`, if present.
    pub fn get(&self, key: TileKey) -> Option<&Arc<TileRecord>> {
        self.records.get(&key)
    }

    /// Gets or creates the record for `key` and resolves its best drawable
    /// substitute.
    ///
    /// An existing record has its priority refreshed; a missing one is
    /// created by `factory`, which is expected to start production before
    /// returning. The fallback walk visits ancestors until one is ready or
    /// `stop` rejects the next candidate; it only ever reads, never
    /// creating ancestor records.
    ///
    /// # Arguments
    ///
    /// * `key` - Tile to retrieve
    /// * `priority` - Current scheduling priority for the record
    /// * `stop` - Bounds the ancestor walk (e.g. the source's min zoom)
    /// * `factory` - Builds the record on first retrieval
    pub fn retrieve<S, F>(&mut self, key: TileKey, priority: f32, stop: S, factory: F) -> Retrieval
    where
        S: Fn(TileKey) -> bool,
        F: FnOnce(TileKey, f32) -> Arc<TileRecord>,
    {
        let record = match self.records.entry(key) {
            Entry::Occupied(entry) => {
                let record = Arc::clone(entry.get());
                record.set_priority(priority);
                record
            }
            Entry::Vacant(entry) => Arc::clone(entry.insert(factory(key, priority))),
        };
        let fallback = self.pyramid_fallback(&record, &stop);
        Retrieval { record, fallback }
    }

    /// Applies `f` to every cached record.
    pub fn process(&self, mut f: impl FnMut(&Arc<TileRecord>)) {
        for record in self.records.values() {
            f(record);
        }
    }

    /// Removes records matching `predicate`, invoking `on_drop` on each
    /// just before removal so callers can cancel outstanding work.
    ///
    /// Returns the number of records retained.
    pub fn drop_records<P, F>(&mut self, mut predicate: P, mut on_drop: F) -> usize
    where
        P: FnMut(&TileRecord) -> bool,
        F: FnMut(&Arc<TileRecord>),
    {
        self.records.retain(|_, record| {
            if predicate(record) {
                on_drop(record);
                false
            } else {
                true
            }
        });
        self.records.len()
    }

    fn pyramid_fallback<S>(&self, start: &Arc<TileRecord>, stop: &S) -> Option<PyramidLookup>
    where
        S: Fn(TileKey) -> bool,
    {
        if start.is_ready() {
            return Some(PyramidLookup {
                record: Arc::clone(start),
                crop: CropRegion::FULL,
            });
        }

        let mut key = start.key();
        let mut crop = CropRegion::FULL;
        loop {
            let Some(parent) = key.parent() else { break };
            if stop(parent) {
                break;
            }
            crop = crop.into_parent(key);
            key = parent;
            if let Some(record) = self.records.get(&key) {
                if record.is_ready() {
                    return Some(PyramidLookup {
                        record: Arc::clone(record),
                        crop,
                    });
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("len", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LayerBundle;
    use crate::pool::DecodeTaskId;
    use crate::queue::TaskId;

    fn no_stop(_: TileKey) -> bool {
        false
    }

    fn plain_factory(key: TileKey, priority: f32) -> Arc<TileRecord> {
        TileRecord::new(key, priority)
    }

    fn make_ready(record: &Arc<TileRecord>) {
        record.begin_decoding(DecodeTaskId(0));
        record.begin_building(TaskId(0));
        assert!(record.complete(Arc::new(LayerBundle::default())));
    }

    #[test]
    fn test_retrieve_creates_once_and_returns_same_instance() {
        let mut cache = TileCache::new();
        let key = TileKey::new(4, 5, 3);
        let mut created = 0;

        let first = cache.retrieve(key, 0.5, no_stop, |key, priority| {
            created += 1;
            plain_factory(key, priority)
        });
        let second = cache.retrieve(key, 0.2, no_stop, |key, priority| {
            created += 1;
            plain_factory(key, priority)
        });

        assert_eq!(created, 1);
        assert!(Arc::ptr_eq(&first.record, &second.record));
        // Repeat retrieval refreshed the priority
        assert_eq!(second.record.priority(), 0.2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_retrieve_pending_has_no_fallback() {
        let mut cache = TileCache::new();
        let retrieval = cache.retrieve(TileKey::new(4, 5, 3), 0.5, no_stop, plain_factory);
        assert!(retrieval.fallback.is_none());
    }

    #[test]
    fn test_ready_record_falls_back_to_itself() {
        let mut cache = TileCache::new();
        let key = TileKey::new(4, 5, 3);
        let retrieval = cache.retrieve(key, 0.5, no_stop, plain_factory);
        make_ready(&retrieval.record);

        let retrieval = cache.retrieve(key, 0.5, no_stop, plain_factory);
        let fallback = retrieval.fallback.expect("ready record should resolve");
        assert!(Arc::ptr_eq(&fallback.record, &retrieval.record));
        assert!(fallback.crop.is_full());
    }

    #[test]
    fn test_ancestor_fallback_accumulates_crop() {
        let mut cache = TileCache::new();

        // Grandparent of 4/5/6 is 2/1/1; make it ready
        let ancestor = cache.retrieve(TileKey::new(2, 1, 1), 0.5, no_stop, plain_factory);
        make_ready(&ancestor.record);

        let retrieval = cache.retrieve(TileKey::new(4, 5, 6), 0.5, no_stop, plain_factory);
        let fallback = retrieval.fallback.expect("grandparent should substitute");
        assert_eq!(fallback.record.key(), TileKey::new(2, 1, 1));
        assert_eq!(fallback.crop.scale, 0.25);
        assert_eq!(fallback.crop.origin_x, 0.25);
        assert_eq!(fallback.crop.origin_y, 0.5);
    }

    #[test]
    fn test_nearest_ready_ancestor_wins() {
        let mut cache = TileCache::new();

        let parent = cache.retrieve(TileKey::new(3, 2, 3), 0.5, no_stop, plain_factory);
        make_ready(&parent.record);
        let grandparent = cache.retrieve(TileKey::new(2, 1, 1), 0.5, no_stop, plain_factory);
        make_ready(&grandparent.record);

        let retrieval = cache.retrieve(TileKey::new(4, 5, 6), 0.5, no_stop, plain_factory);
        let fallback = retrieval.fallback.unwrap();
        assert_eq!(fallback.record.key(), TileKey::new(3, 2, 3));
        assert_eq!(fallback.crop.scale, 0.5);
    }

    #[test]
    fn test_descendants_never_substitute() {
        let mut cache = TileCache::new();

        // A ready child must not serve its pending parent
        let child = cache.retrieve(TileKey::new(5, 10, 12), 0.5, no_stop, plain_factory);
        make_ready(&child.record);

        let retrieval = cache.retrieve(TileKey::new(4, 5, 6), 0.5, no_stop, plain_factory);
        assert!(retrieval.fallback.is_none());
    }

    #[test]
    fn test_stop_bounds_the_walk() {
        let mut cache = TileCache::new();

        let ancestor = cache.retrieve(TileKey::new(2, 1, 1), 0.5, no_stop, plain_factory);
        make_ready(&ancestor.record);

        // Stop below zoom 3: the ready zoom-2 ancestor is out of reach
        let retrieval = cache.retrieve(
            TileKey::new(4, 5, 6),
            0.5,
            |key| key.zoom < 3,
            plain_factory,
        );
        assert!(retrieval.fallback.is_none());
    }

    #[test]
    fn test_unready_ancestor_does_not_stop_walk() {
        let mut cache = TileCache::new();

        // Pending parent, ready grandparent
        cache.retrieve(TileKey::new(3, 2, 3), 0.5, no_stop, plain_factory);
        let grandparent = cache.retrieve(TileKey::new(2, 1, 1), 0.5, no_stop, plain_factory);
        make_ready(&grandparent.record);

        let retrieval = cache.retrieve(TileKey::new(4, 5, 6), 0.5, no_stop, plain_factory);
        let fallback = retrieval.fallback.unwrap();
        assert_eq!(fallback.record.key(), TileKey::new(2, 1, 1));
    }

    #[test]
    fn test_fallback_does_not_create_ancestor_records() {
        let mut cache = TileCache::new();
        cache.retrieve(TileKey::new(4, 5, 6), 0.5, no_stop, plain_factory);
        // Only the requested record exists
        assert_eq!(cache.len(), 1);
        assert!(cache.get(TileKey::new(3, 2, 3)).is_none());
    }

    #[test]
    fn test_process_touches_every_record() {
        let mut cache = TileCache::new();
        cache.retrieve(TileKey::new(1, 0, 0), 0.5, no_stop, plain_factory);
        cache.retrieve(TileKey::new(1, 1, 0), 0.5, no_stop, plain_factory);

        cache.process(|record| record.set_priority(0.75));

        cache.process(|record| assert_eq!(record.priority(), 0.75));
    }

    #[test]
    fn test_drop_records_invokes_hook_and_counts_retained() {
        let mut cache = TileCache::new();
        cache.retrieve(TileKey::new(1, 0, 0), 0.9, no_stop, plain_factory);
        cache.retrieve(TileKey::new(1, 1, 0), 0.1, no_stop, plain_factory);
        cache.retrieve(TileKey::new(1, 0, 1), 0.95, no_stop, plain_factory);

        let mut dropped = Vec::new();
        let retained = cache.drop_records(
            |record| record.priority() > 0.8,
            |record| {
                record.cancel();
                dropped.push(record.key());
            },
        );

        assert_eq!(retained, 1);
        assert_eq!(dropped.len(), 2);
        assert!(cache.get(TileKey::new(1, 1, 0)).is_some());
        assert!(cache.get(TileKey::new(1, 0, 0)).is_none());
    }

    #[test]
    fn test_recreate_after_drop_is_new_instance() {
        let mut cache = TileCache::new();
        let key = TileKey::new(1, 0, 0);
        let first = cache.retrieve(key, 0.5, no_stop, plain_factory).record;
        cache.drop_records(|_| true, |record| record.cancel());

        let second = cache.retrieve(key, 0.5, no_stop, plain_factory).record;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), TileState::Canceled);
        assert_eq!(second.state(), TileState::Requested);
    }
}
