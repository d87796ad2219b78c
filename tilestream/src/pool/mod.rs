//! Decode worker pool.
//!
//! Each source owns a small pool of long-lived worker tasks that fetch and
//! decode tiles through the codec seam. Dispatch is load-balanced to the
//! worker with the fewest outstanding requests; every dispatch carries a
//! cancellation token that the worker races against the codec future.
//!
//! # Architecture
//!
//! ```text
//!                 start_decode()                 per-worker channels
//! Pipeline ────────────┬──────────────────► ┌──────────┐ ┌──────────┐
//!                      │                    │ worker 0 │ │ worker 1 │ ...
//!                      │                    └────┬─────┘ └────┬─────┘
//!                      │                         │ select! { codec, cancel }
//!   poll_completions() ▼                         ▼            ▼
//! Pipeline ◄──────────────────────────────── shared completion channel
//! ```
//!
//! Workers never share mutable state with the pipeline; requests move in by
//! value and exactly one terminal [`DecodeOutcome`] comes back per
//! dispatch. Outcomes for dispatches cancelled in the meantime are
//! discarded at drain time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{Codec, CodecError, DecodeRequest};
use crate::coord::TileKey;
use crate::geometry::DecodedTile;

/// Identifier for one dispatched decode request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DecodeTaskId(pub(crate) u64);

/// Terminal result of one decode dispatch.
#[derive(Debug)]
pub enum DecodeResult {
    Completed(DecodedTile),
    Failed(CodecError),
    Canceled,
}

/// One drained completion.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub task: DecodeTaskId,
    pub key: TileKey,
    pub result: DecodeResult,
}

struct WorkerRequest {
    task: DecodeTaskId,
    key: TileKey,
    decode: DecodeRequest,
    cancel: CancellationToken,
}

struct WorkerSlot {
    request_tx: mpsc::UnboundedSender<WorkerRequest>,
    handle: JoinHandle<()>,
    outstanding: usize,
}

struct InFlight {
    worker: usize,
    cancel: CancellationToken,
}

/// Fixed-size pool of decode workers for one source.
pub struct WorkerPool {
    workers: Vec<WorkerSlot>,
    in_flight: HashMap<DecodeTaskId, InFlight>,
    completion_rx: mpsc::UnboundedReceiver<DecodeOutcome>,
    next_task: u64,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawns `worker_count` workers (at least one) onto `runtime`.
    pub fn start(codec: Arc<dyn Codec>, worker_count: usize, runtime: &Handle) -> Self {
        let worker_count = worker_count.max(1);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|index| {
                let (request_tx, request_rx) = mpsc::unbounded_channel();
                let worker = Worker {
                    index,
                    codec: Arc::clone(&codec),
                    request_rx,
                    completion_tx: completion_tx.clone(),
                    shutdown: shutdown.clone(),
                };
                WorkerSlot {
                    request_tx,
                    handle: runtime.spawn(worker.run()),
                    outstanding: 0,
                }
            })
            .collect();

        Self {
            workers,
            in_flight: HashMap::new(),
            completion_rx,
            next_task: 0,
            shutdown,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Outstanding dispatches across all workers.
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    /// Per-worker outstanding counts, indexed by worker.
    pub fn loads(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.outstanding).collect()
    }

    /// Dispatches a decode to the least-loaded worker.
    ///
    /// Ties go to the lowest worker index. The worker races the codec
    /// against `cancel`; the terminal outcome arrives via
    /// [`WorkerPool::poll_completions`].
    pub fn start_decode(
        &mut self,
        key: TileKey,
        decode: DecodeRequest,
        cancel: CancellationToken,
    ) -> DecodeTaskId {
        let task = DecodeTaskId(self.next_task);
        self.next_task += 1;

        let index = self
            .workers
            .iter()
            .enumerate()
            .min_by_key(|(i, worker)| (worker.outstanding, *i))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let request = WorkerRequest {
            task,
            key,
            decode,
            cancel: cancel.clone(),
        };
        // Send only fails after shutdown; the outcome is then never drained.
        let _ = self.workers[index].request_tx.send(request);
        self.workers[index].outstanding += 1;
        self.in_flight.insert(task, InFlight { worker: index, cancel });
        debug!(%key, task = task.0, worker = index, "decode dispatched");
        task
    }

    /// Cancels an outstanding dispatch.
    ///
    /// The worker's load is released immediately; when the worker's
    /// outcome eventually arrives it no longer matches an in-flight entry
    /// and is discarded.
    pub fn cancel(&mut self, task: DecodeTaskId) {
        if let Some(in_flight) = self.in_flight.remove(&task) {
            in_flight.cancel.cancel();
            self.workers[in_flight.worker].outstanding -= 1;
            debug!(task = task.0, worker = in_flight.worker, "decode cancelled");
        }
    }

    /// Drains finished decodes without blocking.
    ///
    /// Outcomes whose dispatch was cancelled are dropped here.
    pub fn poll_completions(&mut self) -> Vec<DecodeOutcome> {
        let mut drained = Vec::new();
        while let Ok(outcome) = self.completion_rx.try_recv() {
            match self.in_flight.remove(&outcome.task) {
                Some(in_flight) => {
                    self.workers[in_flight.worker].outstanding -= 1;
                    drained.push(outcome);
                }
                None => {
                    debug!(task = outcome.task.0, key = %outcome.key, "discarding late decode result");
                }
            }
        }
        drained
    }

    /// Signals workers to stop without waiting for them.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stops workers and waits for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.into_iter().map(|w| w.handle).collect();
        let _ = futures::future::join_all(handles).await;
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("outstanding", &self.in_flight.len())
            .finish()
    }
}

struct Worker {
    index: usize,
    codec: Arc<dyn Codec>,
    request_rx: mpsc::UnboundedReceiver<WorkerRequest>,
    completion_tx: mpsc::UnboundedSender<DecodeOutcome>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.index, "decode worker started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                request = self.request_rx.recv() => {
                    let Some(request) = request else { break };
                    self.decode_one(request).await;
                }
            }
        }
        debug!(worker = self.index, "decode worker stopped");
    }

    async fn decode_one(&self, request: WorkerRequest) {
        let WorkerRequest {
            task,
            key,
            decode,
            cancel,
        } = request;

        let result = if cancel.is_cancelled() {
            DecodeResult::Canceled
        } else {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => DecodeResult::Canceled,

                decoded = self.codec.decode(decode) => match decoded {
                    Ok(tile) => DecodeResult::Completed(tile),
                    Err(error) => {
                        debug!(%key, %error, "decode failed");
                        DecodeResult::Failed(error)
                    }
                }
            }
        };

        let _ = self.completion_tx.send(DecodeOutcome { task, key, result });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BoxFuture, DecodePayload, TileScheme};
    use crate::geometry::{FeatureGeometry, FeatureSet};
    use std::time::Duration;

    fn request_for(key: TileKey) -> DecodeRequest {
        DecodeRequest {
            key,
            scheme: TileScheme::Xyz,
            payload: DecodePayload::Vector {
                endpoints: Arc::new(vec!["https://tiles.example/{z}/{x}/{y}.pbf".into()]),
            },
        }
    }

    /// Codec that resolves immediately with a one-point tile.
    struct InstantCodec;

    impl Codec for InstantCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(async {
                let features = FeatureSet {
                    features: vec![FeatureGeometry::Points(vec![[0.5, 0.5]])],
                };
                Ok(DecodedTile::single_layer("test", features))
            })
        }
    }

    /// Codec whose futures never resolve.
    struct StalledCodec;

    impl Codec for StalledCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(futures::future::pending())
        }
    }

    /// Codec that always fails.
    struct FailingCodec;

    impl Codec for FailingCodec {
        fn decode(
            &self,
            _request: DecodeRequest,
        ) -> BoxFuture<'static, Result<DecodedTile, CodecError>> {
            Box::pin(async { Err(CodecError::Parse("truncated".into())) })
        }
    }

    async fn drain_one(pool: &mut WorkerPool) -> DecodeOutcome {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(outcome) = pool.poll_completions().pop() {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("completion should arrive")
    }

    #[tokio::test]
    async fn test_successful_decode_completes() {
        let mut pool = WorkerPool::start(Arc::new(InstantCodec), 2, &Handle::current());
        let key = TileKey::new(4, 5, 3);
        let task = pool.start_decode(key, request_for(key), CancellationToken::new());

        let outcome = drain_one(&mut pool).await;
        assert_eq!(outcome.task, task);
        assert_eq!(outcome.key, key);
        assert!(matches!(outcome.result, DecodeResult::Completed(_)));
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_outcome() {
        let mut pool = WorkerPool::start(Arc::new(FailingCodec), 1, &Handle::current());
        let key = TileKey::new(4, 5, 3);
        pool.start_decode(key, request_for(key), CancellationToken::new());

        let outcome = drain_one(&mut pool).await;
        assert!(matches!(outcome.result, DecodeResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_dispatch_balances_to_least_loaded() {
        let mut pool = WorkerPool::start(Arc::new(StalledCodec), 2, &Handle::current());

        for x in 0..4 {
            let key = TileKey::new(4, x, 0);
            pool.start_decode(key, request_for(key), CancellationToken::new());
        }

        // Round-robin falls out of least-loaded with lowest-index ties
        assert_eq!(pool.loads(), vec![2, 2]);
        pool.stop();
    }

    #[tokio::test]
    async fn test_cancel_releases_load_and_discards_result() {
        let mut pool = WorkerPool::start(Arc::new(StalledCodec), 2, &Handle::current());
        let key = TileKey::new(4, 5, 3);
        let token = CancellationToken::new();
        let task = pool.start_decode(key, request_for(key), token.clone());
        assert_eq!(pool.loads(), vec![1, 0]);

        pool.cancel(task);
        assert_eq!(pool.loads(), vec![0, 0]);
        assert!(token.is_cancelled());

        // The worker still posts a Canceled outcome; it must be discarded
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.poll_completions().is_empty());
        pool.stop();
    }

    #[tokio::test]
    async fn test_cancelled_slot_is_reused_by_next_dispatch() {
        let mut pool = WorkerPool::start(Arc::new(StalledCodec), 2, &Handle::current());

        let keys: Vec<_> = (0..3).map(|x| TileKey::new(4, x, 0)).collect();
        let first = pool.start_decode(keys[0], request_for(keys[0]), CancellationToken::new());
        pool.start_decode(keys[1], request_for(keys[1]), CancellationToken::new());
        pool.cancel(first);

        // Worker 0 is now idle again and must receive the next dispatch
        pool.start_decode(keys[2], request_for(keys[2]), CancellationToken::new());
        assert_eq!(pool.loads(), vec![1, 1]);
        pool.stop();
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_reports_canceled() {
        let mut pool = WorkerPool::start(Arc::new(InstantCodec), 1, &Handle::current());
        let key = TileKey::new(4, 5, 3);
        let token = CancellationToken::new();
        token.cancel();

        // The token was cancelled externally, not via pool.cancel(), so the
        // in-flight entry is still live and the outcome drains normally.
        pool.start_decode(key, request_for(key), token);
        let outcome = drain_one(&mut pool).await;
        assert!(matches!(outcome.result, DecodeResult::Canceled));
    }

    #[tokio::test]
    async fn test_shutdown_joins_workers() {
        let pool = WorkerPool::start(Arc::new(StalledCodec), 3, &Handle::current());
        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("workers should exit promptly");
    }
}
