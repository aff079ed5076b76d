//! Cost-guarded wallet activity queries over BigQuery's public crypto datasets.
//!
//! Every query is dry-run first; anything projected to scan more than the
//! configured ceiling is rejected before it can be executed.

pub mod config;
pub mod error;
pub mod execution;
pub mod operations;
pub mod templates;
pub mod validation;

pub use config::{BigQueryConfig, CostPolicy};
pub use error::{EngineError, EngineErrorKind, EnginePhase, InsightsError, Result};
pub use execution::{BigQueryEngine, CostGuard, QueryEngine, ResultRow};
pub use operations::{Outcome, Rejection, WalletInsights, WalletQuery};
