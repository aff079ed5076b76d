#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Mutex;
use wallet_insights::execution::{DryRunOptions, DryRunStats, EngineRow};
use wallet_insights::templates::RenderedQuery;
use wallet_insights::{EngineError, QueryEngine};

/// Deterministic in-memory engine that records every call it receives
pub struct MockEngine {
    pub bytes: u64,
    pub rows: Vec<EngineRow>,
    pub dry_run_error: Option<EngineError>,
    pub execute_error: Option<EngineError>,
    pub dry_runs: Mutex<Vec<(RenderedQuery, DryRunOptions)>>,
    pub executions: Mutex<Vec<RenderedQuery>>,
}

impl MockEngine {
    pub fn new(bytes: u64, rows: Vec<EngineRow>) -> Self {
        Self {
            bytes,
            rows,
            dry_run_error: None,
            execute_error: None,
            dry_runs: Mutex::new(Vec::new()),
            executions: Mutex::new(Vec::new()),
        }
    }

    pub fn dry_run_count(&self) -> usize {
        self.dry_runs.lock().unwrap().len()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    pub fn last_executed(&self) -> RenderedQuery {
        self.executions.lock().unwrap().last().cloned().expect("no executions recorded")
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn dry_run(&self, query: &RenderedQuery, options: DryRunOptions) -> Result<DryRunStats, EngineError> {
        self.dry_runs.lock().unwrap().push((query.clone(), options));
        if let Some(err) = &self.dry_run_error {
            return Err(err.clone());
        }
        Ok(DryRunStats {
            total_bytes_processed: self.bytes,
        })
    }

    async fn execute(&self, query: &RenderedQuery) -> Result<Vec<EngineRow>, EngineError> {
        self.executions.lock().unwrap().push(query.clone());
        if let Some(err) = &self.execute_error {
            return Err(err.clone());
        }
        Ok(self.rows.clone())
    }
}

pub const GB: u64 = 1_000_000_000;
pub const WALLET: &str = "0x28C6c06298d514Db089934071355E5743bf21d60";
pub const SOL_WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
