pub mod compile;
pub mod eval;
pub mod exec;
pub mod query;
pub mod snapshot;
pub mod value;

pub use crate::eval::context::{EvaluationContext, Session};
pub use crate::eval::policy::{MethodPolicy, DEFAULT_FILTER, FILTER_ENV_VAR};
pub use crate::exec::{execute_query, QueryOutcome};
pub use crate::query::ir::{Expr, FromClause, FromSource, Query, SelectClause, SelectItem};
pub use crate::query::{parse_query, union};
pub use crate::snapshot::memory::{MemorySnapshot, SnapshotBuilder};
pub use crate::snapshot::{ClassInfo, NoProgress, ProgressListener, Snapshot, SnapshotError};
pub use crate::value::{ObjectId, ResultTable, Value};
