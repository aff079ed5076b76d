//! Cost Estimator - projected scan size of a query, in gigabytes

use crate::error::{EnginePhase, InsightsError, Result};
use crate::execution::engine::{DryRunOptions, QueryEngine};
use crate::templates::RenderedQuery;
use std::sync::Arc;
use tracing::debug;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Clone)]
pub struct CostEstimator {
    engine: Arc<dyn QueryEngine>,
}

impl CostEstimator {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Dry-run `query` with the result cache off and return the scan size in GB.
    pub async fn estimate_gb(&self, query: &RenderedQuery) -> Result<f64> {
        let stats = self
            .engine
            .dry_run(query, DryRunOptions::uncached())
            .await
            .map_err(|e| InsightsError::remote(EnginePhase::Estimate, e))?;

        let gb = bytes_to_gb(stats.total_bytes_processed);
        debug!(engine = self.engine.name(), bytes = stats.total_bytes_processed, "estimated {:.2} GB", gb);
        Ok(gb)
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}
