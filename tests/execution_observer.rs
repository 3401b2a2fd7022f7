use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use rust_record_pipeline::execution::{
    ExecutionEngine, ExecutionEvent, ExecutionObserver, ExecutionOptions, TracingObserver,
};
use rust_record_pipeline::record::Payload;
use rust_record_pipeline::types::{DataSet, DataType, Field, Schema, Value};
use rust_record_pipeline::{Collection, PipelineError};

#[derive(Default)]
struct RecordingObserver {
    completed: Mutex<Vec<(String, bool)>>,
    failed_runs: Mutex<Vec<&'static str>>,
    run_started: Mutex<Option<(usize, usize, usize)>>,
    run_finished: Mutex<usize>,
}

impl ExecutionObserver for RecordingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted {
                records,
                workers,
                chunk_size,
            } => {
                *self.run_started.lock().unwrap() = Some((*records, *workers, *chunk_size));
            }
            ExecutionEvent::RecordCompleted { name, kept } => {
                self.completed.lock().unwrap().push((name.clone(), *kept));
            }
            ExecutionEvent::RunFinished { .. } => {
                *self.run_finished.lock().unwrap() += 1;
            }
            ExecutionEvent::RunFailed { stage, .. } => {
                self.failed_runs.lock().unwrap().push(*stage);
            }
            _ => {}
        }
    }
}

fn ids(n: i64) -> DataSet {
    let schema = Schema::new(vec![Field::new("id", DataType::Int64)]);
    DataSet::new(schema, (0..n).map(|i| vec![Value::Int64(i * 10)]).collect())
}

#[test]
fn observer_sees_every_record_by_name() {
    let obs = Arc::new(RecordingObserver::default());
    let engine = ExecutionEngine::new(ExecutionOptions {
        num_workers: Some(3),
        ..Default::default()
    })
    .with_observer(obs.clone());

    let mut c = Collection::new(ids(7));
    c.filter(|p: &Payload| p.get("id").and_then(Value::as_i64).unwrap_or_default() >= 30);
    c.collect_with(&engine).unwrap();

    let completed = obs.completed.lock().unwrap().clone();
    let names: BTreeSet<String> = completed.iter().map(|(n, _)| n.clone()).collect();
    let expected: BTreeSet<String> = (0..7).map(|i| i.to_string()).collect();
    assert_eq!(names, expected);
    assert_eq!(completed.iter().filter(|(_, kept)| *kept).count(), 4);

    assert_eq!(*obs.run_started.lock().unwrap(), Some((7, 3, 3)));
    assert_eq!(*obs.run_finished.lock().unwrap(), 1);
    assert!(obs.failed_runs.lock().unwrap().is_empty());
}

#[test]
fn observer_is_told_about_failed_runs() {
    let obs = Arc::new(RecordingObserver::default());
    let engine = ExecutionEngine::new(ExecutionOptions {
        chunk_size: Some(0),
        ..Default::default()
    })
    .with_observer(obs.clone());

    let mut c = Collection::new(ids(2));
    assert!(c.collect_with(&engine).is_err());

    assert_eq!(*obs.failed_runs.lock().unwrap(), vec!["plan"]);
    assert_eq!(*obs.run_finished.lock().unwrap(), 0);
    assert!(obs.completed.lock().unwrap().is_empty());
}

#[test]
fn metrics_are_available_after_run() {
    let engine = ExecutionEngine::new(ExecutionOptions {
        num_workers: Some(4),
        chunk_size: Some(1),
        ..Default::default()
    })
    .with_observer(Arc::new(TracingObserver));
    let metrics = engine.metrics();

    let mut c = Collection::new(ids(12));
    c.map(|p| p);
    let report = c.collect_with(&engine).unwrap();

    let snap = metrics.snapshot();
    assert_eq!(snap, report.metrics);
    assert_eq!(snap.run_id, 1);
    assert_eq!(snap.records_processed, 12);
    assert_eq!(snap.records_kept, 12);
    assert_eq!(snap.chunks_started, 12);
    assert_eq!(snap.chunks_finished, 12);
    assert!(snap.max_active_chunks >= 1 && snap.max_active_chunks <= 4);
    assert!(snap.elapsed.is_some());
    assert!(snap.to_string().contains("records=12 (kept=12, dropped=0, failed=0)"));
}

/// Panics on every `ChunkStarted`, i.e. on a worker thread outside any record's chain.
#[derive(Default)]
struct ChunkPanicObserver {
    failed_runs: Mutex<Vec<&'static str>>,
}

impl ExecutionObserver for ChunkPanicObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::ChunkStarted { .. } => panic!("observer exploded"),
            ExecutionEvent::RunFailed { stage, .. } => {
                self.failed_runs.lock().unwrap().push(*stage);
            }
            _ => {}
        }
    }
}

#[test]
fn worker_side_panic_fails_the_run_and_keeps_the_collection() {
    let obs = Arc::new(ChunkPanicObserver::default());
    let engine = ExecutionEngine::new(ExecutionOptions {
        num_workers: Some(2),
        ..Default::default()
    })
    .with_observer(obs.clone());

    let mut c = Collection::new(ids(4));
    c.map(|p| p);
    let before = c.items().to_vec();

    let err = c.collect_with(&engine).unwrap_err();
    match err {
        PipelineError::WorkerPanicked { message, .. } => assert_eq!(message, "observer exploded"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(c.items(), before.as_slice());
    assert_eq!(c.pending().len(), 1);
    assert_eq!(*obs.failed_runs.lock().unwrap(), vec!["dispatch"]);

    let snap = engine.metrics().snapshot();
    assert_eq!(snap.chunks_started, snap.chunks_finished);
}
