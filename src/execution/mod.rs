//! Parallel execution engine behind [`crate::Collection::collect`].
//!
//! The engine:
//!
//! - sizes a worker pool as `min(requested or available parallelism, max_workers)`
//! - splits the records into contiguous chunks of `ceil(records / workers)`
//! - runs a [`RecordHandler`] over every record on a scoped `rayon` pool, each chunk working on
//!   its own copy of its records
//! - merges envelopes in completion order through the relay policy and normalization
//! - reports progress through an optional [`ExecutionObserver`] and real-time metrics
//!
//! Output order follows worker completion order, not input order.

mod observer;

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::orm::{normalize, should_keep};
use crate::processing::{panic_message, Envelope, RecordHandler, RecordOutcome};
use crate::record::Item;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingObserver,
};

/// Default upper bound on the worker count.
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// What to do when a user callable panics on one record.
///
/// Either way the panic is contained, but it still goes through the process panic hook first:
/// with the default hook every failed record prints one `thread '...' panicked at` message to
/// stderr. Install a quieter hook with [`std::panic::set_hook`] if that is too noisy; the
/// failure itself is still logged and reported as [`ExecutionEvent::RecordFailed`].
///
/// ```no_run
/// std::panic::set_hook(Box::new(|info| {
///     tracing::debug!(%info, "contained panic");
/// }));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordFailurePolicy {
    /// Drop the failed record, count it and keep going.
    #[default]
    Skip,
    /// Fail the whole `collect`, leaving the collection unchanged.
    AbortBatch,
}

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Requested worker count. If `None`, uses the platform's available parallelism.
    pub num_workers: Option<usize>,
    /// Upper bound applied to the worker count.
    pub max_workers: usize,
    /// Records per chunk. If `None`, `ceil(records / workers)`.
    pub chunk_size: Option<usize>,
    /// Handling of records whose operation chain panicked.
    pub on_record_failure: RecordFailurePolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            num_workers: None,
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: None,
            on_record_failure: RecordFailurePolicy::Skip,
        }
    }
}

/// Worker count, chunk size and chunk ranges for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub workers: usize,
    pub chunk_size: usize,
    pub chunks: Vec<Range<usize>>,
}

/// Items that survived a run, plus the run's metrics.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub items: Vec<Item>,
    pub metrics: ExecutionMetricsSnapshot,
}

/// What a chunk task sends back to the merging thread.
enum ChunkMessage {
    Record(Envelope),
    /// The chunk task itself panicked outside any record's operation chain.
    Panicked { start_row: usize, message: String },
}

/// A configurable execution engine for record pipelines.
///
/// The worker pool is built per run; its threads are closed and joined before
/// [`ExecutionEngine::execute`] returns, on success and on failure.
///
/// One engine may be shared by several threads running collects at the same time. Each run
/// counts into its own [`ExecutionMetrics`], so [`ExecutionOutput::metrics`] only ever covers
/// that run.
pub struct ExecutionEngine {
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    ///
    /// Options are validated when a run is planned.
    pub fn new(opts: ExecutionOptions) -> Self {
        Self {
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        }
    }

    /// Attach an observer for execution events (progress/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Options this engine was built with.
    pub fn options(&self) -> &ExecutionOptions {
        &self.opts
    }

    /// Get a handle to real-time execution metrics.
    ///
    /// The handle follows the most recently started run. When runs on this engine overlap their
    /// counts mix here; use the per-run [`ExecutionOutput::metrics`] for exact figures.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of workers a run would use.
    pub fn worker_count(&self) -> PipelineResult<usize> {
        if self.opts.max_workers == 0 {
            return Err(PipelineError::InvalidOptions {
                message: "max_workers must be > 0".to_string(),
            });
        }
        let requested = match self.opts.num_workers {
            Some(0) => {
                return Err(PipelineError::InvalidOptions {
                    message: "num_workers must be > 0 when set".to_string(),
                });
            }
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        Ok(requested.min(self.opts.max_workers))
    }

    /// Plan a run over `record_count` records.
    pub fn plan(&self, record_count: usize) -> PipelineResult<ExecutionPlan> {
        let workers = self.worker_count()?;
        let chunk_size = match self.opts.chunk_size {
            Some(0) => {
                return Err(PipelineError::InvalidOptions {
                    message: "chunk_size must be > 0 when set".to_string(),
                });
            }
            Some(n) => n,
            None => chunk_size_for(record_count, workers),
        };
        Ok(ExecutionPlan {
            workers,
            chunk_size,
            chunks: chunk_ranges(record_count, chunk_size),
        })
    }

    /// Run `handler` over every item and return the surviving, normalized items.
    ///
    /// On error nothing is returned; callers keep their previous state. The error is logged and
    /// reported to the observer as [`ExecutionEvent::RunFailed`].
    pub fn execute(&self, handler: &RecordHandler, items: &[Item]) -> PipelineResult<ExecutionOutput> {
        let start = Instant::now();
        let run = ExecutionMetrics::for_run(&self.metrics);

        let result = self.execute_impl(handler, items, &run);
        run.end_run(start.elapsed());

        match result {
            Ok(items) => {
                let metrics = run.snapshot();
                self.emit(ExecutionEvent::RunFinished {
                    elapsed: start.elapsed(),
                    metrics: metrics.clone(),
                });
                Ok(ExecutionOutput { items, metrics })
            }
            Err(e) => {
                let stage = failure_stage(&e);
                error!(stage, error = %e, records = items.len(), "collect failed; collection left unchanged");
                self.emit(ExecutionEvent::RunFailed {
                    stage,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn execute_impl(
        &self,
        handler: &RecordHandler,
        items: &[Item],
        run: &ExecutionMetrics,
    ) -> PipelineResult<Vec<Item>> {
        let plan = self.plan(items.len())?;
        debug!(
            records = items.len(),
            workers = plan.workers,
            chunk_size = plan.chunk_size,
            chunks = plan.chunks.len(),
            operations = handler.operations().len(),
            "planned collect"
        );
        self.emit(ExecutionEvent::RunStarted {
            records: items.len(),
            workers: plan.workers,
            chunk_size: plan.chunk_size,
        });

        // Worker threads are joined before `build_scoped` returns.
        let mut out = Vec::new();
        ThreadPoolBuilder::new()
            .num_threads(plan.workers)
            .thread_name(|i| format!("record-worker-{i}"))
            .build_scoped(
                |thread| thread.run(),
                |pool| {
                    self.dispatch(pool, handler, items, &plan, run, |env| {
                        self.merge(env, run, &mut out)
                    })
                },
            )??;
        Ok(out)
    }

    /// Fan `items` out over `pool` chunk by chunk and feed envelopes to `on_envelope` in
    /// completion order.
    ///
    /// Every spawned chunk has finished when this returns, including on error.
    fn dispatch<F>(
        &self,
        pool: &ThreadPool,
        handler: &RecordHandler,
        items: &[Item],
        plan: &ExecutionPlan,
        run: &ExecutionMetrics,
        mut on_envelope: F,
    ) -> PipelineResult<()>
    where
        F: FnMut(Envelope) -> PipelineResult<()>,
    {
        pool.in_place_scope(|scope| {
            let (tx, rx) = mpsc::channel::<ChunkMessage>();
            for range in plan.chunks.iter().cloned() {
                // Each chunk owns a copy of its records.
                let chunk: Vec<Item> = items[range.clone()].to_vec();
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let start_row = range.start;
                    let finished = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.run_chunk(handler, range, chunk, run, &tx)
                    }));
                    if let Err(payload) = finished {
                        run.on_chunk_end();
                        let _ = tx.send(ChunkMessage::Panicked {
                            start_row,
                            message: panic_message(payload.as_ref()),
                        });
                    }
                });
            }
            drop(tx);

            for msg in rx {
                match msg {
                    ChunkMessage::Record(env) => on_envelope(env)?,
                    ChunkMessage::Panicked { start_row, message } => {
                        return Err(PipelineError::WorkerPanicked { start_row, message });
                    }
                }
            }
            Ok(())
        })
    }

    fn run_chunk(
        &self,
        handler: &RecordHandler,
        range: Range<usize>,
        chunk: Vec<Item>,
        run: &ExecutionMetrics,
        tx: &mpsc::Sender<ChunkMessage>,
    ) {
        run.on_chunk_start();
        self.emit(ExecutionEvent::ChunkStarted {
            start_row: range.start,
            row_count: range.len(),
        });

        for (offset, item) in chunk.into_iter().enumerate() {
            let env = handler.handle(range.start + offset, item);
            run.on_record_processed();
            if tx.send(ChunkMessage::Record(env)).is_err() {
                // receiver gone: the run already failed
                break;
            }
        }

        self.emit(ExecutionEvent::ChunkFinished {
            start_row: range.start,
            row_count: range.len(),
        });
        run.on_chunk_end();
    }

    fn merge(&self, env: Envelope, run: &ExecutionMetrics, out: &mut Vec<Item>) -> PipelineResult<()> {
        let Envelope { name, outcome } = env;
        match outcome {
            RecordOutcome::Produced(payload) => {
                let kept = should_keep(&payload);
                if kept {
                    let items = normalize(payload, None);
                    run.on_record_kept(items.len());
                    out.extend(items);
                } else {
                    run.on_record_dropped();
                }
                self.emit(ExecutionEvent::RecordCompleted { name, kept });
            }
            RecordOutcome::Rejected => {
                run.on_record_dropped();
                self.emit(ExecutionEvent::RecordCompleted { name, kept: false });
            }
            RecordOutcome::Failed(message) => {
                run.on_record_failed();
                self.emit(ExecutionEvent::RecordFailed {
                    name: name.clone(),
                    message: message.clone(),
                });
                match self.opts.on_record_failure {
                    RecordFailurePolicy::Skip => {
                        warn!(record = %name, error = %message, "record failed; skipping");
                    }
                    RecordFailurePolicy::AbortBatch => {
                        return Err(PipelineError::RecordFailed { name, message });
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Where in a run an error originated, for diagnostics.
fn failure_stage(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::InvalidOptions { .. } => "plan",
        PipelineError::PoolBuild(_) => "pool",
        PipelineError::RecordFailed { .. } | PipelineError::WorkerPanicked { .. } => "dispatch",
        PipelineError::UnknownCommand { .. } | PipelineError::CommandMismatch { .. } => "build",
    }
}

/// `ceil(record_count / workers)`, at least 1.
pub fn chunk_size_for(record_count: usize, workers: usize) -> usize {
    record_count.div_ceil(workers.max(1)).max(1)
}

/// Contiguous ranges of at most `chunk_size` covering `0..row_count` exactly once.
pub fn chunk_ranges(row_count: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if row_count == 0 {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::with_capacity(row_count.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + chunk_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        chunk_ranges, chunk_size_for, ExecutionEngine, ExecutionOptions, RecordFailurePolicy,
        DEFAULT_MAX_WORKERS,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::PipelineError;
    use crate::processing::{Operation, RecordHandler};
    use crate::record::{Item, Payload};
    use crate::types::Value;

    fn ints(n: i64) -> Vec<Item> {
        (1..=n).map(|i| Item::Value(Value::Int64(i))).collect()
    }

    fn int(p: &Payload) -> i64 {
        p.as_scalar().and_then(Value::as_i64).unwrap_or_default()
    }

    fn engine(workers: usize) -> ExecutionEngine {
        ExecutionEngine::new(ExecutionOptions {
            num_workers: Some(workers),
            ..Default::default()
        })
    }

    #[test]
    fn chunks_cover_every_record_exactly_once() {
        for workers in 1..=DEFAULT_MAX_WORKERS {
            for n in 0..200usize {
                let ranges = chunk_ranges(n, chunk_size_for(n, workers));
                assert!(ranges.len() <= workers, "n={n} workers={workers}");

                let mut next = 0usize;
                for r in &ranges {
                    assert_eq!(r.start, next, "gap or overlap at n={n} workers={workers}");
                    assert!(r.end > r.start);
                    next = r.end;
                }
                assert_eq!(next, n);
            }
        }
    }

    #[test]
    fn worker_count_is_capped_by_max_workers() {
        let e = ExecutionEngine::new(ExecutionOptions {
            num_workers: Some(64),
            ..Default::default()
        });
        assert_eq!(e.worker_count().unwrap(), DEFAULT_MAX_WORKERS);

        let e = ExecutionEngine::new(ExecutionOptions {
            num_workers: Some(64),
            max_workers: 3,
            ..Default::default()
        });
        assert_eq!(e.worker_count().unwrap(), 3);

        let e = ExecutionEngine::default();
        let n = e.worker_count().unwrap();
        assert!((1..=DEFAULT_MAX_WORKERS).contains(&n));
    }

    #[test]
    fn plan_uses_ceil_chunking() {
        let plan = engine(4).plan(10).unwrap();
        assert_eq!(plan.workers, 4);
        assert_eq!(plan.chunk_size, 3);
        assert_eq!(plan.chunks, vec![0..3, 3..6, 6..9, 9..10]);
    }

    #[test]
    fn invalid_options_are_rejected_at_plan_time() {
        for opts in [
            ExecutionOptions {
                num_workers: Some(0),
                ..Default::default()
            },
            ExecutionOptions {
                max_workers: 0,
                ..Default::default()
            },
            ExecutionOptions {
                chunk_size: Some(0),
                ..Default::default()
            },
        ] {
            let err = ExecutionEngine::new(opts).plan(3).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidOptions { .. }));
        }
    }

    #[test]
    fn execute_runs_concurrently() {
        let items = ints(200);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let active2 = Arc::clone(&active);
        let max_active2 = Arc::clone(&max_active);
        let handler = RecordHandler::new(vec![Operation::map(move |p| {
            let now = active2.fetch_add(1, Ordering::SeqCst) + 1;
            max_active2.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            let _ = active2.fetch_sub(1, Ordering::SeqCst);
            p
        })]);

        let out = engine(4).execute(&handler, &items).unwrap();
        assert_eq!(out.items.len(), items.len());
        assert!(max_active.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn relay_and_normalization_are_applied_to_results() {
        // 1..=6: odd -> 0 (dropped), even -> a two-element list (expanded)
        let handler = RecordHandler::new(vec![Operation::map(|p| {
            let v = int(&p);
            if v % 2 == 1 {
                Payload::Scalar(Value::Int64(0))
            } else {
                Payload::List(vec![Item::Value(Value::Int64(v)), Item::Value(Value::Int64(-v))])
            }
        })]);

        let out = engine(3).execute(&handler, &ints(6)).unwrap();
        let mut values: Vec<i64> = out
            .items
            .iter()
            .filter_map(|i| i.as_value().and_then(Value::as_i64))
            .collect();
        values.sort();
        assert_eq!(values, vec![-6, -4, -2, 2, 4, 6]);

        assert_eq!(out.metrics.records_processed, 6);
        assert_eq!(out.metrics.records_kept, 3);
        assert_eq!(out.metrics.records_dropped, 3);
        assert_eq!(out.metrics.items_emitted, 6);
        assert_eq!(out.metrics.chunks_started, 3);
        assert_eq!(out.metrics.chunks_finished, 3);
        assert!(out.metrics.elapsed.is_some());
    }

    #[test]
    fn failed_records_are_skipped_by_default() {
        let handler = RecordHandler::new(vec![Operation::map(|p| {
            if int(&p) == 2 {
                panic!("boom");
            }
            p
        })]);

        let out = engine(2).execute(&handler, &ints(4)).unwrap();
        assert_eq!(out.items.len(), 3);
        assert_eq!(out.metrics.records_failed, 1);
    }

    #[test]
    fn abort_batch_turns_a_record_failure_into_a_run_failure() {
        let handler = RecordHandler::new(vec![Operation::map(|p| {
            if int(&p) == 2 {
                panic!("boom");
            }
            p
        })]);
        let e = ExecutionEngine::new(ExecutionOptions {
            num_workers: Some(2),
            on_record_failure: RecordFailurePolicy::AbortBatch,
            ..Default::default()
        });

        let err = e.execute(&handler, &ints(4)).unwrap_err();
        match err {
            PipelineError::RecordFailed { name, message } => {
                assert_eq!(name, "#1");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        // every chunk still ran to completion before execute returned
        let snap = e.metrics().snapshot();
        assert_eq!(snap.chunks_started, snap.chunks_finished);
    }

    #[test]
    fn overlapping_runs_report_their_own_metrics() {
        let e = engine(3);
        let handler = RecordHandler::new(vec![Operation::map(|p| {
            std::thread::sleep(Duration::from_micros(200));
            p
        })]);

        std::thread::scope(|s| {
            let runs: Vec<_> = [40i64, 90, 150]
                .into_iter()
                .map(|n| {
                    let (e, handler) = (&e, &handler);
                    s.spawn(move || (n, e.execute(handler, &ints(n)).unwrap()))
                })
                .collect();

            let mut run_ids = Vec::new();
            for run in runs {
                let (n, out) = run.join().unwrap();
                assert_eq!(out.items.len() as i64, n);
                assert_eq!(out.metrics.records_processed, n as u64);
                assert_eq!(out.metrics.records_kept, n as u64);
                assert_eq!(out.metrics.chunks_started, out.metrics.chunks_finished);
                run_ids.push(out.metrics.run_id);
            }
            run_ids.sort();
            assert_eq!(run_ids, vec![1, 2, 3]);
        });
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let handler = RecordHandler::new(vec![Operation::map(|p| p)]);
        let out = engine(4).execute(&handler, &[]).unwrap();
        assert!(out.items.is_empty());
        assert_eq!(out.metrics.chunks_started, 0);
    }
}
