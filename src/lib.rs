//! `rust-record-pipeline` runs lazy query/map/filter/reduce pipelines over in-memory tabular
//! data, executing them in parallel over a bounded worker pool.
//!
//! A [`Collection`] is built from a [`types::DataSet`] (or a single record, a list, or a scalar).
//! Operations attached to it are only recorded; [`Collection::collect`] composes them into one
//! per-record function, fans the records out over a `rayon` pool in contiguous chunks, and
//! replaces the collection's items with whatever survives.
//!
//! ## Data flow
//!
//! 1. **Normalize**: tables become one [`record::Record`] per row with an `index_record` field
//!    plus one field per column ([`orm::normalize`]).
//! 2. **Build**: `query`/`filter` attach predicates, `map`/`reduce` attach mappers. Nothing runs.
//! 3. **Collect**: every record runs through the operations left to right. A rejected record
//!    stops early. Results pass the relay policy ([`orm::should_keep`]): empty tables, empty
//!    lists, `Null`, `false`, `0` and `""` are dropped; everything else is normalized back into
//!    records and kept.
//! 4. **Extract**: [`Collection::to_dataset`] rebuilds a table.
//!
//! Results come back in worker completion order, not input order.
//!
//! ## Example
//!
//! ```rust
//! use rust_record_pipeline::record::Payload;
//! use rust_record_pipeline::types::{DataSet, DataType, Field, Schema, Value};
//! use rust_record_pipeline::Collection;
//!
//! # fn main() -> Result<(), rust_record_pipeline::PipelineError> {
//! let schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64),
//!     Field::new("score", DataType::Float64),
//! ]);
//! let ds = DataSet::new(
//!     schema,
//!     vec![
//!         vec![Value::Int64(1), Value::Float64(10.0)],
//!         vec![Value::Int64(2), Value::Float64(20.0)],
//!         vec![Value::Int64(3), Value::Null],
//!     ],
//! );
//!
//! let mut c = Collection::new(ds);
//! c.filter(|p| matches!(p.get("score"), Some(Value::Float64(_))))
//!     .map(|p| match p {
//!         Payload::Record(mut r) => {
//!             let doubled = r.get("score").and_then(Value::as_f64).unwrap_or_default() * 2.0;
//!             r.set("score", doubled);
//!             Payload::Record(r)
//!         }
//!         other => other,
//!     });
//! c.collect()?;
//!
//! let out = c.to_dataset();
//! assert_eq!(out.row_count(), 2);
//! let mut scores: Vec<f64> = out
//!     .column("score")
//!     .unwrap()
//!     .into_iter()
//!     .filter_map(Value::as_f64)
//!     .collect();
//! scores.sort_by(f64::total_cmp);
//! assert_eq!(scores, vec![20.0, 40.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failures
//!
//! A panic inside a user callable is contained to its record. By default the record is
//! dropped and counted; with [`execution::RecordFailurePolicy::AbortBatch`] it fails the whole
//! run. Any failed [`Collection::collect`] returns an error and leaves the collection exactly as
//! it was.
//!
//! ## Modules
//!
//! - [`types`]: tabular dataset types
//! - [`record`]: records, items and payload shapes
//! - [`orm`]: normalization, denormalization and the relay policy
//! - [`processing`]: operations and per-record handlers
//! - [`execution`]: the parallel engine, options, observers and metrics
//! - [`collection`]: the lazy pipeline builder
//! - [`pipeline`]: the one-call [`pipeline::run`] facade
//! - [`error`]: error types

pub mod collection;
pub mod error;
pub mod execution;
pub mod orm;
pub mod pipeline;
pub mod processing;
pub mod record;
pub mod types;

pub use collection::{Collection, CollectReport};
pub use error::{PipelineError, PipelineResult};
