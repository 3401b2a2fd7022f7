//! One-call pipeline entry point.
//!
//! [`run`] builds a [`Collection`] from a table, attaches an optional query, a list of mappers
//! and a list of declarative [`Step`]s, collects, and returns the resulting table.

use std::fmt;
use std::sync::Arc;

use crate::collection::Collection;
use crate::error::{PipelineError, PipelineResult};
use crate::execution::{ExecutionEngine, ExecutionObserver, ExecutionOptions};
use crate::processing::{Mapper, Operation, OperationKind, Predicate};
use crate::record::Payload;
use crate::types::DataSet;

/// Callable attached by a declarative [`Step`].
#[derive(Clone)]
pub enum StepFn {
    Predicate(Predicate),
    Mapper(Mapper),
}

impl StepFn {
    /// Wrap a predicate for `query`/`filter` steps.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Wrap a mapper for `map`/`reduce` steps.
    pub fn mapper<F>(f: F) -> Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        Self::Mapper(Arc::new(f))
    }
}

/// A `(command, callable)` pair, e.g. `("filter", predicate)`.
///
/// `query`/`filter` take a predicate, `map`/`reduce` take a mapper.
#[derive(Clone)]
pub struct Step {
    pub command: String,
    pub func: StepFn,
}

impl Step {
    /// Create a step from a command name and its callable.
    pub fn new(command: impl Into<String>, func: StepFn) -> Self {
        Self {
            command: command.into(),
            func,
        }
    }

    /// Resolve the command name into the operation the matching builder method would attach.
    pub fn into_operation(self) -> PipelineResult<Operation> {
        let kind: OperationKind = self.command.parse()?;
        match (kind, self.func) {
            (OperationKind::Query, StepFn::Predicate(p)) => Ok(Operation::Query(p)),
            (OperationKind::Filter, StepFn::Predicate(p)) => Ok(Operation::Filter(p)),
            (OperationKind::Map | OperationKind::Reduce, StepFn::Mapper(m)) => Ok(Operation::Map(m)),
            (OperationKind::Query | OperationKind::Filter, StepFn::Mapper(_)) => {
                Err(PipelineError::CommandMismatch {
                    command: self.command,
                    expected: "predicate",
                })
            }
            (OperationKind::Map | OperationKind::Reduce, StepFn::Predicate(_)) => {
                Err(PipelineError::CommandMismatch {
                    command: self.command,
                    expected: "mapper",
                })
            }
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = match self.func {
            StepFn::Predicate(_) => "predicate",
            StepFn::Mapper(_) => "mapper",
        };
        f.debug_struct("Step")
            .field("command", &self.command)
            .field("func", &func)
            .finish()
    }
}

/// Options for [`run`].
///
/// Use [`Default`] for common cases.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Attached first, as a query.
    pub query: Option<Predicate>,
    /// Attached in order after the query.
    pub mappers: Vec<Mapper>,
    /// Attached in order after the mappers.
    pub steps: Vec<Step>,
    /// Engine configuration for the collect.
    pub execution: ExecutionOptions,
    /// Optional progress observer.
    pub observer: Option<Arc<dyn ExecutionObserver>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("query_set", &self.query.is_some())
            .field("mappers_len", &self.mappers.len())
            .field("steps", &self.steps)
            .field("execution", &self.execution)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

/// Run a pipeline over `dataset` and return the resulting table.
///
/// Unknown step commands and mismatched callables are reported before anything executes.
/// Row order of the result follows worker completion order.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use rust_record_pipeline::pipeline::{run, RunOptions, Step, StepFn};
/// use rust_record_pipeline::processing::Predicate;
/// use rust_record_pipeline::record::Payload;
/// use rust_record_pipeline::types::{DataSet, DataType, Field, Schema, Value};
///
/// # fn main() -> Result<(), rust_record_pipeline::PipelineError> {
/// let schema = Schema::new(vec![Field::new("score", DataType::Int64)]);
/// let ds = DataSet::new(schema, (1..=4).map(|i| vec![Value::Int64(i)]).collect());
///
/// let at_least_two: Predicate = Arc::new(|p: &Payload| {
///     p.get("score").and_then(Value::as_i64).is_some_and(|s| s >= 2)
/// });
/// let opts = RunOptions {
///     query: Some(at_least_two),
///     steps: vec![Step::new(
///         "filter",
///         StepFn::predicate(|p| p.get("score") != Some(&Value::Int64(3))),
///     )],
///     ..Default::default()
/// };
///
/// let out = run(ds, opts)?;
/// assert_eq!(out.row_count(), 2);
/// # Ok(())
/// # }
/// ```
pub fn run(dataset: DataSet, options: RunOptions) -> PipelineResult<DataSet> {
    let RunOptions {
        query,
        mappers,
        steps,
        execution,
        observer,
    } = options;

    let mut c = Collection::new(dataset);
    if let Some(q) = query {
        c.push(Operation::Query(q));
    }
    for m in mappers {
        c.push(Operation::Map(m));
    }
    for step in steps {
        c.push(step.into_operation()?);
    }

    let mut engine = ExecutionEngine::new(execution);
    if let Some(obs) = observer {
        engine = engine.with_observer(obs);
    }
    c.collect_with(&engine)?;
    Ok(c.to_dataset())
}
