//! Configuration - cost policy and warehouse connection settings
//!
//! Both are plain values built once at startup and shared read-only afterwards.

use crate::error::{InsightsError, Result};
use std::str::FromStr;

pub const DEFAULT_MAX_QUERY_SIZE_GB: f64 = 300.0;
pub const DEFAULT_DAYS_TO_LOOK_BACK: i64 = 100;
pub const DEFAULT_TRANSACTION_LIMIT: i64 = 100;
pub const MAX_DAYS_TO_LOOK_BACK: i64 = 500;
pub const MAX_TRANSACTION_LIMIT: i64 = 500;

pub const DEFAULT_BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Cost ceiling and per-parameter bounds applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct CostPolicy {
    /// Largest projected scan (GB) that will be executed
    pub max_query_size_gb: f64,
    pub default_lookback_days: i64,
    pub max_lookback_days: i64,
    pub default_result_cap: i64,
    pub max_result_cap: i64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            max_query_size_gb: DEFAULT_MAX_QUERY_SIZE_GB,
            default_lookback_days: DEFAULT_DAYS_TO_LOOK_BACK,
            max_lookback_days: MAX_DAYS_TO_LOOK_BACK,
            default_result_cap: DEFAULT_TRANSACTION_LIMIT,
            max_result_cap: MAX_TRANSACTION_LIMIT,
        }
    }
}

impl CostPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ceiling_gb(mut self, max_query_size_gb: f64) -> Self {
        self.max_query_size_gb = max_query_size_gb;
        self
    }

    /// Build the policy from environment variables, falling back to the defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let policy = Self {
            max_query_size_gb: env_or("MAX_QUERY_SIZE_GB", defaults.max_query_size_gb)?,
            default_lookback_days: env_or("DEFAULT_DAYS_TO_LOOK_BACK", defaults.default_lookback_days)?,
            max_lookback_days: env_or("MAX_DAYS_TO_LOOK_BACK", defaults.max_lookback_days)?,
            default_result_cap: env_or("DEFAULT_TRANSACTION_LIMIT", defaults.default_result_cap)?,
            max_result_cap: env_or("MAX_TRANSACTION_LIMIT", defaults.max_result_cap)?,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if !self.max_query_size_gb.is_finite() || self.max_query_size_gb < 0.0 {
            return Err(InsightsError::Config(format!(
                "MAX_QUERY_SIZE_GB must be a non-negative number, got {}",
                self.max_query_size_gb
            )));
        }
        if self.max_lookback_days < 1 || self.max_result_cap < 1 {
            return Err(InsightsError::Config(
                "MAX_DAYS_TO_LOOK_BACK and MAX_TRANSACTION_LIMIT must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the BigQuery REST API
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub location: Option<String>,
    pub api_url: String,
    pub access_token: Option<String>,
}

impl BigQueryConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: None,
            api_url: DEFAULT_BIGQUERY_API_URL.to_string(),
            access_token: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let project_id = std::env::var("PROJECT_ID")
            .map_err(|_| InsightsError::Config("PROJECT_ID is not set".to_string()))?;
        let api_url = std::env::var("BIGQUERY_API_URL")
            .unwrap_or_else(|_| DEFAULT_BIGQUERY_API_URL.to_string());
        let location = std::env::var("BIGQUERY_LOCATION").ok();
        let access_token = std::env::var("BIGQUERY_ACCESS_TOKEN")
            .or_else(|_| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN"))
            .ok();

        Ok(Self {
            project_id,
            location,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| InsightsError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e)))
}
