//! Cost Guard - estimate, admit or reject, then execute
//!
//! No query whose projected scan exceeds the ceiling is ever sent for
//! execution. Each call does at most two sequential round trips (dry run,
//! then the real job) and nothing is cached or retried.

use crate::error::{EnginePhase, InsightsError, Result};
use crate::execution::engine::QueryEngine;
use crate::execution::estimator::CostEstimator;
use crate::execution::result::{normalize_rows, ResultRow};
use crate::templates::RenderedQuery;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardState {
    Estimating,
    Admitted,
    Executing,
    Completed,
    Rejected,
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of comparing an estimate with the ceiling
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Admission {
    pub estimate_gb: f64,
    pub ceiling_gb: f64,
    pub admitted: bool,
}

impl Admission {
    pub fn decide(estimate_gb: f64, ceiling_gb: f64) -> Self {
        Self {
            estimate_gb,
            ceiling_gb,
            // NaN compares false, so it must be rejected explicitly
            admitted: !estimate_gb.is_nan() && estimate_gb <= ceiling_gb,
        }
    }

    pub fn into_result(self) -> Result<Self> {
        if self.admitted {
            Ok(self)
        } else {
            Err(InsightsError::QueryTooLarge {
                estimate_gb: self.estimate_gb,
                ceiling_gb: self.ceiling_gb,
            })
        }
    }
}

#[derive(Clone)]
pub struct CostGuard {
    engine: Arc<dyn QueryEngine>,
    estimator: CostEstimator,
    ceiling_gb: f64,
}

impl CostGuard {
    pub fn new(engine: Arc<dyn QueryEngine>, ceiling_gb: f64) -> Self {
        Self {
            estimator: CostEstimator::new(engine.clone()),
            engine,
            ceiling_gb,
        }
    }

    pub fn ceiling_gb(&self) -> f64 {
        self.ceiling_gb
    }

    /// Estimate only; never executes.
    pub async fn check(&self, query: &RenderedQuery) -> Result<Admission> {
        let estimate_gb = self.estimator.estimate_gb(query).await?;
        Ok(Admission::decide(estimate_gb, self.ceiling_gb))
    }

    /// Run `query` if its projected scan fits under the ceiling.
    ///
    /// Returns `QueryTooLarge` without touching the engine's execute path when
    /// it does not.
    pub async fn run(&self, query: &RenderedQuery) -> Result<Vec<ResultRow>> {
        debug!(state = %GuardState::Estimating, "cost guard");
        let admission = match self.check(query).await?.into_result() {
            Ok(admission) => admission,
            Err(e) => {
                warn!(state = %GuardState::Rejected, "{}", e);
                return Err(e);
            }
        };

        info!(state = %GuardState::Admitted, "Query usage: {:.2} GB", admission.estimate_gb);

        debug!(state = %GuardState::Executing, engine = self.engine.name(), "cost guard");
        let rows = self
            .engine
            .execute(query)
            .await
            .map_err(|e| InsightsError::remote(EnginePhase::Execute, e))?;

        let rows = normalize_rows(rows);
        debug!(state = %GuardState::Completed, rows = rows.len(), "cost guard");
        Ok(rows)
    }
}
