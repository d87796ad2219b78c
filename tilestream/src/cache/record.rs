//! Per-tile production record.
//!
//! A [`TileRecord`] tracks one tile from request to render-ready geometry.
//! The state machine is driven by events integrated on the owner's
//! timeline: decode outcomes move a record from `Decoding` to `Building`,
//! build completions to `Ready`, failures and eviction to the terminal
//! states.
//!
//! ```text
//! Requested ──► Decoding ──► Building ──► Ready
//!     │             │            │
//!     └─────────────┴────────────┴──► Failed | Canceled
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::coord::TileKey;
use crate::geometry::LayerBundle;
use crate::pool::DecodeTaskId;
use crate::queue::TaskId;

/// Production stage of a tile record.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TileState {
    /// Created; decode dispatch in progress.
    Requested,
    /// A decode worker owns the request.
    Decoding,
    /// Decoded features are queued for buffer building.
    Building,
    /// Geometry is available for rendering.
    Ready,
    /// Production failed; the record stays until eviction.
    Failed,
    /// Eviction cancelled outstanding work.
    Canceled,
}

impl TileState {
    /// True for states that no further event can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TileState::Ready | TileState::Failed | TileState::Canceled)
    }
}

/// One tile's production state, shared between the cache, the scheduler and
/// in-flight work.
///
/// The cache owns the authoritative handle; clones ride on build tasks and
/// tilesets. Geometry is set at most once and is immutable afterwards.
pub struct TileRecord {
    key: TileKey,
    state: Mutex<TileState>,
    /// Scheduling priority as `f32` bits; lower values are more urgent.
    priority: AtomicU32,
    cancel: CancellationToken,
    data: OnceLock<Arc<LayerBundle>>,
    /// Outstanding decode dispatch, cleared when its outcome integrates.
    decode_task: Mutex<Option<DecodeTaskId>>,
    /// Outstanding build task on the shared queue.
    build_task: Mutex<Option<TaskId>>,
}

impl TileRecord {
    /// Creates a record in the `Requested` state.
    pub fn new(key: TileKey, priority: f32) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: Mutex::new(TileState::Requested),
            priority: AtomicU32::new(priority.to_bits()),
            cancel: CancellationToken::new(),
            data: OnceLock::new(),
            decode_task: Mutex::new(None),
            build_task: Mutex::new(None),
        })
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn state(&self) -> TileState {
        *self.state.lock()
    }

    /// True once `complete` has stored geometry.
    pub fn is_ready(&self) -> bool {
        self.state() == TileState::Ready
    }

    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: f32) {
        self.priority.store(priority.to_bits(), Ordering::Relaxed);
    }

    /// Token cancelled when this record's work is abandoned.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The finished geometry, if production reached `Ready`.
    pub fn data(&self) -> Option<&Arc<LayerBundle>> {
        self.data.get()
    }

    /// Marks the record as owned by a decode worker.
    pub(crate) fn begin_decoding(&self, task: DecodeTaskId) {
        let mut state = self.state.lock();
        if *state == TileState::Requested {
            *state = TileState::Decoding;
        }
        *self.decode_task.lock() = Some(task);
    }

    /// Marks the decoded record as queued for buffer building.
    pub(crate) fn begin_building(&self, task: TaskId) {
        let mut state = self.state.lock();
        if *state == TileState::Decoding {
            *state = TileState::Building;
        }
        *self.build_task.lock() = Some(task);
    }

    /// Stores the finished geometry and flips the record to `Ready`.
    ///
    /// Returns false if the record is not in `Building`; a completion
    /// arriving after cancellation is discarded this way, keeping the
    /// set-once data invariant intact.
    pub(crate) fn complete(&self, bundle: Arc<LayerBundle>) -> bool {
        let mut state = self.state.lock();
        if *state != TileState::Building {
            return false;
        }
        if self.data.set(bundle).is_err() {
            return false;
        }
        *state = TileState::Ready;
        true
    }

    /// Marks production as failed. Terminal states are left alone.
    pub(crate) fn fail(&self) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = TileState::Failed;
        }
    }

    /// Cancels outstanding work and marks the record `Canceled`.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = TileState::Canceled;
        }
    }

    pub(crate) fn decode_task(&self) -> Option<DecodeTaskId> {
        *self.decode_task.lock()
    }

    /// Takes the outstanding decode dispatch, if any.
    pub(crate) fn take_decode_task(&self) -> Option<DecodeTaskId> {
        self.decode_task.lock().take()
    }

    /// Takes the outstanding build task, if any.
    pub(crate) fn take_build_task(&self) -> Option<TaskId> {
        self.build_task.lock().take()
    }
}

impl std::fmt::Debug for TileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRecord")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}
