//! Query layer: QuerySpec documents, filter trees, note sources, the
//! execution engine, and result fingerprints.
//!
//! ```text
//! QuerySpec::parse ──▶ execute(spec, &impl NoteSource, options) ──▶ QueryResult
//!                              │                                        │
//!                    pushdown conditions                       fingerprint() for
//!                    passed to NoteSource::load               staleness checks
//! ```

pub mod engine;
pub mod filter;
pub mod fingerprint;
pub mod source;
pub mod spec;

pub use engine::{execute, ExecuteOptions, Group, QueryError, QueryResult, QueryWarning};
pub use filter::{Condition, Filter, Op};
pub use fingerprint::{fingerprint, results_differ};
pub use source::{normalize_filtered, MemorySource, NoteSource, SourceRequest};
pub use spec::{
    Column, ColumnValue, Direction, Expand, Lookup, OutputFormat, OutputSpec, QuerySpec,
    QuerySpecError, SortKey, SourceSpec, DEFAULT_COLUMNS,
};
