//! Per-record composition of an operation sequence.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::record::{INDEX_FIELD, Item, Payload};
use crate::types::Value;

use super::operation::Operation;

/// What one record produced after running through the operation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The chain completed; the payload still has to pass the relay policy.
    Produced(Payload),
    /// A query/filter rejected the record.
    Rejected,
    /// A user callable panicked while processing this record.
    Failed(String),
}

/// Result of handling one record: the record's name plus its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub name: String,
    pub outcome: RecordOutcome,
}

/// An operation sequence composed into a single per-record function.
///
/// Operations run strictly left to right; the output of one is the input of the next, and a
/// rejection skips everything downstream.
#[derive(Debug, Clone, Default)]
pub struct RecordHandler {
    operations: Vec<Operation>,
}

impl RecordHandler {
    /// Create a handler running `operations` in order.
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// The composed operations.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Run the chain over one item.
    ///
    /// Panics raised by user callables are caught here and reported as
    /// [`RecordOutcome::Failed`] so sibling records are unaffected.
    pub fn handle(&self, position: usize, item: Item) -> Envelope {
        let name = record_name(position, &item);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_chain(item.into())))
            .unwrap_or_else(|payload| RecordOutcome::Failed(panic_message(payload.as_ref())));
        Envelope { name, outcome }
    }

    fn run_chain(&self, mut payload: Payload) -> RecordOutcome {
        for op in &self.operations {
            match op.apply(payload) {
                Some(next) => payload = next,
                None => return RecordOutcome::Rejected,
            }
        }
        RecordOutcome::Produced(payload)
    }
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Name used for progress reporting: the record's `index_record` value when present, otherwise
/// `#<position>`.
pub fn record_name(position: usize, item: &Item) -> String {
    match item.get(INDEX_FIELD) {
        Some(Value::Int64(v)) => v.to_string(),
        Some(Value::Utf8(s)) => s.clone(),
        Some(Value::Float64(v)) => v.to_string(),
        Some(Value::Bool(v)) => v.to_string(),
        Some(Value::Null) | None => format!("#{position}"),
    }
}
