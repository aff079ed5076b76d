//! Execution Module - cost-guarded access to the remote warehouse
//!
//! - QueryEngine trait for the remote service (BigQuery in production, mocks in tests)
//! - CostEstimator for dry-run scan estimates
//! - CostGuard for the estimate -> admit/reject -> execute protocol
//! - Result normalization into JSON-safe rows

pub mod engine;
pub mod estimator;
pub mod cost_guard;
pub mod result;

// Engine implementations
pub mod bigquery_engine;

pub use bigquery_engine::BigQueryEngine;
pub use cost_guard::{Admission, CostGuard, GuardState};
pub use engine::{DryRunOptions, DryRunStats, EngineRow, EngineValue, QueryEngine};
pub use estimator::{bytes_to_gb, CostEstimator};
pub use result::{normalize_row, normalize_rows, normalize_value, ResultRow};
