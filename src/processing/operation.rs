//! Pipeline operations (query/map/filter/reduce).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::record::Payload;

/// Shared predicate used by [`Operation::Query`] and [`Operation::Filter`].
pub type Predicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Shared mapper used by [`Operation::Map`].
pub type Mapper = Arc<dyn Fn(Payload) -> Payload + Send + Sync>;

/// One configured step of a pipeline.
///
/// Operations wrap exactly one user callable and hold no per-call state, so a single operation
/// is shared by every worker.
#[derive(Clone)]
pub enum Operation {
    /// Keep the payload unchanged when the predicate holds, drop it otherwise.
    Query(Predicate),
    /// Replace the payload with the mapper's return value.
    Map(Mapper),
    /// Same semantics as [`Operation::Query`].
    Filter(Predicate),
}

impl Operation {
    /// Create a query from a predicate.
    pub fn query<F>(predicate: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self::Query(Arc::new(predicate))
    }

    /// Create a map from a mapper.
    pub fn map<F>(mapper: F) -> Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        Self::Map(Arc::new(mapper))
    }

    /// Create a filter from a predicate.
    pub fn filter<F>(predicate: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self::Filter(Arc::new(predicate))
    }

    /// Reductions are plain maps over a single payload.
    pub fn reduce<F>(reducer: F) -> Self
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        Self::map(reducer)
    }

    /// The command this operation was built from (`reduce` reports as `Map`).
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Query(_) => OperationKind::Query,
            Operation::Map(_) => OperationKind::Map,
            Operation::Filter(_) => OperationKind::Filter,
        }
    }

    /// Apply this operation to one payload.
    ///
    /// Returns `None` when a query/filter rejects the payload.
    pub fn apply(&self, payload: Payload) -> Option<Payload> {
        match self {
            Operation::Map(mapper) => Some(mapper(payload)),
            Operation::Query(predicate) | Operation::Filter(predicate) => {
                if predicate(&payload) {
                    Some(payload)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operation").field(&self.kind()).finish()
    }
}

/// Builder command names accepted by declarative pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Map,
    Filter,
    Reduce,
}

impl OperationKind {
    /// Command name as written in a declarative step.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Map => "map",
            OperationKind::Filter => "filter",
            OperationKind::Reduce => "reduce",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "map" => Ok(Self::Map),
            "filter" => Ok(Self::Filter),
            "reduce" => Ok(Self::Reduce),
            other => Err(PipelineError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }
}
