//! Operations and their per-record composition.
//!
//! - [`Operation`]: one query/map/filter step wrapping a user callable
//! - [`RecordHandler`]: an operation sequence composed into a single per-record function that
//!   produces an [`Envelope`]
//!
//! ## Example
//!
//! ```rust
//! use rust_record_pipeline::processing::{Operation, RecordHandler, RecordOutcome};
//! use rust_record_pipeline::record::{Item, Payload};
//! use rust_record_pipeline::types::Value;
//!
//! let handler = RecordHandler::new(vec![
//!     Operation::filter(|p| p.as_scalar().and_then(Value::as_i64).is_some_and(|v| v > 1)),
//!     Operation::map(|p| match p {
//!         Payload::Scalar(Value::Int64(v)) => Payload::Scalar(Value::Int64(v * 2)),
//!         other => other,
//!     }),
//! ]);
//!
//! let env = handler.handle(0, Item::Value(Value::Int64(3)));
//! assert_eq!(env.name, "#0");
//! assert_eq!(env.outcome, RecordOutcome::Produced(Payload::Scalar(Value::Int64(6))));
//! ```

pub mod handler;
pub mod operation;

pub use handler::{Envelope, RecordHandler, RecordOutcome, record_name};
pub(crate) use handler::panic_message;
pub use operation::{Mapper, Operation, OperationKind, Predicate};
