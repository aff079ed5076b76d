//! Query Engine Trait - contract for the remote warehouse
//!
//! The warehouse is an opaque remote service: it takes SQL plus named
//! parameters and either reports what a scan would cost (dry run) or runs it
//! and returns typed rows.

use crate::error::EngineError;
use crate::templates::RenderedQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options for an estimation-only submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunOptions {
    /// Whether the engine may answer from its result cache. Estimates must
    /// reflect a real scan, so the estimator always sends `false`.
    pub use_query_cache: bool,
}

impl DryRunOptions {
    pub fn uncached() -> Self {
        Self {
            use_query_cache: false,
        }
    }
}

/// What the engine reported for a dry run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunStats {
    pub total_bytes_processed: u64,
}

/// A single typed cell as returned by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    /// Fixed-point decimal, kept as the engine's exact text
    Numeric(String),
    Timestamp(DateTime<Utc>),
    /// Strings, dates, times and anything without a richer mapping
    Text(String),
}

/// One result row; columns are kept in the order the engine reported them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineRow {
    pub columns: Vec<(String, EngineValue)>,
}

impl EngineRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: EngineValue) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&EngineValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Remote warehouse - implementations must be safe to share across tasks
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Engine name (e.g., "bigquery")
    fn name(&self) -> &'static str;

    /// Report the bytes the query would scan without running it
    async fn dry_run(
        &self,
        query: &RenderedQuery,
        options: DryRunOptions,
    ) -> Result<DryRunStats, EngineError>;

    /// Run the query and return every row in engine order
    async fn execute(&self, query: &RenderedQuery) -> Result<Vec<EngineRow>, EngineError>;
}
