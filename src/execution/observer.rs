use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        records: usize,
        workers: usize,
        chunk_size: usize,
    },
    ChunkStarted { start_row: usize, row_count: usize },
    ChunkFinished { start_row: usize, row_count: usize },
    /// One envelope was merged. `kept` is the relay decision.
    RecordCompleted { name: String, kept: bool },
    RecordFailed { name: String, message: String },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
    /// The run failed and the collection was left unchanged.
    RunFailed { stage: &'static str, error: String },
}

/// Observer hook for execution events (progress reporting).
///
/// Events are fire-and-forget. `ChunkStarted`/`ChunkFinished` are emitted from worker threads,
/// everything else from the thread that called `collect`.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted {
                records,
                workers,
                chunk_size,
            } => info!(records, workers, chunk_size, "collect started"),
            ExecutionEvent::ChunkStarted { start_row, row_count } => {
                debug!(start_row, row_count, "chunk started")
            }
            ExecutionEvent::ChunkFinished { start_row, row_count } => {
                debug!(start_row, row_count, "chunk finished")
            }
            ExecutionEvent::RecordCompleted { name, kept } => {
                trace!(record = %name, kept, "record completed")
            }
            ExecutionEvent::RecordFailed { name, message } => {
                warn!(record = %name, error = %message, "record failed")
            }
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(?elapsed, %metrics, "collect finished")
            }
            ExecutionEvent::RunFailed { stage, error } => {
                error!(stage, error = %error, "collect failed")
            }
        }
    }
}

/// Real-time counters for a `collect` run.
///
/// The engine updates these during execution; callers can snapshot them at any time. Each run
/// counts into its own instance, which forwards every update to the engine's shared handle.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    records_processed: AtomicU64,
    records_kept: AtomicU64,
    records_dropped: AtomicU64,
    records_failed: AtomicU64,
    items_emitted: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,

    active_chunks: AtomicUsize,
    max_active_chunks: AtomicUsize,

    shared: Option<Arc<ExecutionMetrics>>,
}

impl ExecutionMetrics {
    /// Create zeroed counters not attached to any engine.
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            records_kept: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            items_emitted: AtomicU64::new(0),
            chunks_started: AtomicU64::new(0),
            chunks_finished: AtomicU64::new(0),
            active_chunks: AtomicUsize::new(0),
            max_active_chunks: AtomicUsize::new(0),
            shared: None,
        }
    }

    /// Fresh counters for one run, mirrored into `shared`.
    pub(crate) fn for_run(shared: &Arc<ExecutionMetrics>) -> Self {
        let run = Self::new();
        run.run_id.store(shared.begin_run(), Ordering::SeqCst);
        Self {
            shared: Some(Arc::clone(shared)),
            ..run
        }
    }

    /// Reset every counter and return the new run id.
    pub fn begin_run(&self) -> u64 {
        let run_id = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.records_processed.store(0, Ordering::SeqCst);
        self.records_kept.store(0, Ordering::SeqCst);
        self.records_dropped.store(0, Ordering::SeqCst);
        self.records_failed.store(0, Ordering::SeqCst);
        self.items_emitted.store(0, Ordering::SeqCst);
        self.chunks_started.store(0, Ordering::SeqCst);
        self.chunks_finished.store(0, Ordering::SeqCst);
        self.active_chunks.store(0, Ordering::SeqCst);
        self.max_active_chunks.store(0, Ordering::SeqCst);
        run_id
    }

    pub fn end_run(&self, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.each(|m| m.elapsed_ns.store(ns, Ordering::SeqCst));
    }

    pub fn on_record_processed(&self) {
        self.each(|m| {
            let _ = m.records_processed.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// A record survived the relay policy and normalized into `items` items.
    pub fn on_record_kept(&self, items: usize) {
        self.each(|m| {
            let _ = m.records_kept.fetch_add(1, Ordering::SeqCst);
            let _ = m.items_emitted.fetch_add(items as u64, Ordering::SeqCst);
        });
    }

    pub fn on_record_dropped(&self) {
        self.each(|m| {
            let _ = m.records_dropped.fetch_add(1, Ordering::SeqCst);
        });
    }

    pub fn on_record_failed(&self) {
        self.each(|m| {
            let _ = m.records_failed.fetch_add(1, Ordering::SeqCst);
        });
    }

    pub fn on_chunk_start(&self) {
        self.each(|m| {
            let _ = m.chunks_started.fetch_add(1, Ordering::SeqCst);
            let now = m.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
            update_max_usize(&m.max_active_chunks, now);
        });
    }

    /// A chunk stopped running, whether it finished or panicked.
    pub fn on_chunk_end(&self) {
        self.each(|m| {
            let _ = m.chunks_finished.fetch_add(1, Ordering::SeqCst);
            let _ = m.active_chunks.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            records_processed: self.records_processed.load(Ordering::SeqCst),
            records_kept: self.records_kept.load(Ordering::SeqCst),
            records_dropped: self.records_dropped.load(Ordering::SeqCst),
            records_failed: self.records_failed.load(Ordering::SeqCst),
            items_emitted: self.items_emitted.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
            max_active_chunks: self.max_active_chunks.load(Ordering::SeqCst),
        }
    }

    fn each(&self, update: impl Fn(&ExecutionMetrics)) {
        update(self);
        if let Some(shared) = &self.shared {
            update(shared);
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst
            .compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub records_processed: u64,
    pub records_kept: u64,
    pub records_dropped: u64,
    pub records_failed: u64,
    /// Items appended to the collection (a kept record may normalize into several).
    pub items_emitted: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
    pub max_active_chunks: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, records={} (kept={}, dropped={}, failed={}), items_emitted={}, chunks={}/{}, max_active_chunks={}, elapsed={:?}",
            self.run_id,
            self.records_processed,
            self.records_kept,
            self.records_dropped,
            self.records_failed,
            self.items_emitted,
            self.chunks_finished,
            self.chunks_started,
            self.max_active_chunks,
            self.elapsed
        )
    }
}
