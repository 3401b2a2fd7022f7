//! [`Collection`]: a lazily built pipeline over a sequence of records.

use std::fmt;
use std::ops::Range;

use tracing::debug;

use crate::error::PipelineResult;
use crate::execution::{ExecutionEngine, ExecutionMetricsSnapshot};
use crate::orm::{denormalize, normalize};
use crate::processing::{Operation, RecordHandler};
use crate::record::{Item, Payload, Record};
use crate::types::DataSet;

/// Number of items shown by the `Display` impl.
const PREVIEW_LEN: usize = 5;

/// Summary of a successful [`Collection::collect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    /// Item count before the run.
    pub input_count: usize,
    /// Item count after the run.
    pub output_count: usize,
    /// Operations that were applied (and cleared).
    pub operations: usize,
    pub metrics: ExecutionMetricsSnapshot,
}

/// An ordered sequence of items plus the operations waiting to be applied to them.
///
/// `query`, `map`, `filter` and `reduce` only record an operation; nothing runs until
/// [`Collection::collect`]. These builder methods mutate the collection in place and return it
/// for chaining.
///
/// After `collect`, item order follows worker completion order and is not related to input
/// order.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    data: Vec<Item>,
    funcs: Vec<Operation>,
}

impl Collection {
    /// Normalize `data` into a new collection.
    pub fn new(data: impl Into<Payload>) -> Self {
        Self::from_items(normalize(data.into(), None))
    }

    /// Like [`Collection::new`], merging `extra_fields` onto every record built from a table.
    pub fn with_fields(data: impl Into<Payload>, extra_fields: &Record) -> Self {
        Self::from_items(normalize(data.into(), Some(extra_fields)))
    }

    /// Wrap already-normalized items.
    pub fn from_items(data: Vec<Item>) -> Self {
        Self {
            data,
            funcs: Vec::new(),
        }
    }

    /// Queue a query: records failing `predicate` are dropped.
    pub fn query<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.push(Operation::query(predicate))
    }

    /// Queue a map over every record.
    pub fn map<F>(&mut self, mapper: F) -> &mut Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.push(Operation::map(mapper))
    }

    /// Queue a filter: records failing `predicate` are dropped.
    pub fn filter<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.push(Operation::filter(predicate))
    }

    /// Same as [`Collection::map`].
    pub fn reduce<F>(&mut self, reducer: F) -> &mut Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.push(Operation::reduce(reducer))
    }

    /// Append an already-built operation.
    pub fn push(&mut self, op: Operation) -> &mut Self {
        self.funcs.push(op);
        self
    }

    /// Apply pending operations with a default [`ExecutionEngine`].
    pub fn collect(&mut self) -> PipelineResult<CollectReport> {
        self.collect_with(&ExecutionEngine::default())
    }

    /// Apply pending operations on `engine`.
    ///
    /// On success the items are replaced by the surviving, re-normalized results and the pending
    /// operations are cleared. On error the collection is left exactly as it was.
    pub fn collect_with(&mut self, engine: &ExecutionEngine) -> PipelineResult<CollectReport> {
        let handler = RecordHandler::new(self.funcs.clone());
        let output = engine.execute(&handler, &self.data)?;

        let report = CollectReport {
            input_count: self.data.len(),
            output_count: output.items.len(),
            operations: self.funcs.len(),
            metrics: output.metrics,
        };
        self.data = output.items;
        self.funcs.clear();

        debug!(
            input = report.input_count,
            output = report.output_count,
            operations = report.operations,
            "collection replaced"
        );
        Ok(report)
    }

    /// Tabular form of the current items.
    pub fn to_dataset(&self) -> DataSet {
        denormalize(&self.data)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` if there are no items.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Item at `index`.
    pub fn get(&self, index: usize) -> Option<&Item> {
        self.data.get(index)
    }

    /// A new collection holding a copy of `range`, with no pending operations.
    ///
    /// The range is clamped to the current length.
    pub fn slice(&self, range: Range<usize>) -> Collection {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        Self::from_items(self.data[start..end].to_vec())
    }

    /// Iterate the current items.
    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.data.iter()
    }

    /// The current items.
    pub fn items(&self) -> &[Item] {
        &self.data
    }

    /// Consume the collection, returning its items.
    pub fn into_items(self) -> Vec<Item> {
        self.data
    }

    /// Operations waiting for the next `collect`.
    pub fn pending(&self) -> &[Operation] {
        &self.funcs
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: Vec<String> = self
            .data
            .iter()
            .take(PREVIEW_LEN)
            .map(|i| i.to_string())
            .collect();
        write!(f, "[{}", preview.join(",\n"))?;
        if self.data.len() > PREVIEW_LEN {
            write!(f, ",\n...")?;
        }
        write!(f, "]\n\nCollection with\n{} records", self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::Collection;
    use crate::execution::{ExecutionEngine, ExecutionOptions};
    use crate::record::{INDEX_FIELD, Item, Payload, Record};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn values(n: i64) -> DataSet {
        let schema = Schema::new(vec![Field::new("v", DataType::Int64)]);
        DataSet::new(schema, (1..=n).map(|i| vec![Value::Int64(i)]).collect())
    }

    fn v(p: &Payload) -> i64 {
        p.get("v").and_then(Value::as_i64).unwrap_or_default()
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(ExecutionOptions {
            num_workers: Some(3),
            ..Default::default()
        })
    }

    #[test]
    fn builder_defers_execution() {
        let mut c = Collection::new(values(3));
        c.filter(|_| panic!("must not run before collect"))
            .map(|p| p)
            .reduce(|p| p);

        assert_eq!(c.pending().len(), 3);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn collect_clears_pending_operations() {
        let mut c = Collection::new(values(4));
        c.filter(|p| v(p) > 2);
        let report = c.collect_with(&engine()).unwrap();

        assert!(c.pending().is_empty());
        assert_eq!(report.input_count, 4);
        assert_eq!(report.output_count, 2);
        assert_eq!(report.operations, 1);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn collect_without_operations_keeps_every_record() {
        let mut c = Collection::new(values(5));
        let before: Vec<Item> = c.items().to_vec();
        c.collect_with(&engine()).unwrap();

        let mut after: Vec<Item> = c.items().to_vec();
        after.sort_by_key(|i| i.get(INDEX_FIELD).and_then(Value::as_i64));
        assert_eq!(after, before);
    }

    #[test]
    fn slicing_and_indexing() {
        let c = Collection::new(values(6));
        let s = c.slice(1..3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0), c.get(1));
        assert!(s.pending().is_empty());

        assert_eq!(c.slice(4..100).len(), 2);
        assert!(c.slice(9..12).is_empty());
        assert!(c.get(6).is_none());
    }

    #[test]
    fn extra_fields_are_applied_on_construction() {
        let extra = Record::new().with("batch", "b1");
        let c = Collection::with_fields(values(2), &extra);
        for item in &c {
            assert_eq!(item.get("batch"), Some(&Value::Utf8("b1".to_string())));
        }
    }

    #[test]
    fn display_previews_five_items() {
        let c = Collection::new(values(7));
        let text = c.to_string();
        assert!(text.starts_with(r#"[{"index_record":0,"v":1}"#));
        assert!(text.contains(",\n...]"));
        assert!(text.ends_with("Collection with\n7 records"));

        let short = Collection::new(values(1)).to_string();
        assert!(!short.contains("..."));
    }

    #[test]
    fn scalar_and_record_inputs() {
        assert_eq!(Collection::new(Value::Int64(3)).len(), 1);
        assert_eq!(Collection::new(Record::new().with("a", 1i64)).len(), 1);
        assert!(Collection::new(Vec::<Record>::new()).is_empty());
    }
}
