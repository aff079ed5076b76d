//! BigQuery Execution Engine
//!
//! Talks to the BigQuery REST API (`jobs.query` / `jobs.getQueryResults`).
//! Dry runs and real runs go through the same endpoint; only the `dryRun`
//! and `useQueryCache` flags differ.

use crate::config::BigQueryConfig;
use crate::error::{EngineError, EngineErrorKind, InsightsError, Result};
use crate::execution::engine::{DryRunOptions, DryRunStats, EngineRow, EngineValue, QueryEngine};
use crate::templates::RenderedQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const PAGE_SIZE: u32 = 10_000;
const SERVER_WAIT_MS: u32 = 10_000;
const MAX_POLLS: usize = 10_000;

/// BigQuery execution engine
pub struct BigQueryEngine {
    config: BigQueryConfig,
    client: Client,
    max_polls: usize,
}

// jobs.query: POST {api}/projects/{project}/queries
// jobs.getQueryResults: GET {api}/projects/{project}/queries/{jobId}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    dry_run: bool,
    use_query_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    timeout_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_parameters: Vec<BqQueryParameter>,
    request_id: String,
    format_options: FormatOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BqQueryParameter {
    name: String,
    parameter_type: BqParameterType,
    parameter_value: BqParameterValue,
}

#[derive(Debug, Serialize)]
struct BqParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct BqParameterValue {
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl BigQueryEngine {
    pub fn new(config: BigQueryConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| InsightsError::Config(format!("Failed to create HTTP client for BigQuery: {}", e)))?;

        Ok(Self {
            config,
            client,
            max_polls: MAX_POLLS,
        })
    }

    /// Bound on `jobs.getQueryResults` round trips (status polls and pages) for one job
    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Create BigQuery engine from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(BigQueryConfig::from_env()?)
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    fn queries_url(&self) -> String {
        format!("{}/projects/{}/queries", self.config.api_url, self.config.project_id)
    }

    fn build_request<'a>(&'a self, query: &'a RenderedQuery, dry_run: bool, use_query_cache: bool) -> QueryRequest<'a> {
        let query_parameters: Vec<BqQueryParameter> = query
            .parameters
            .iter()
            .map(|p| BqQueryParameter {
                name: p.name.clone(),
                parameter_type: BqParameterType { kind: "STRING" },
                parameter_value: BqParameterValue { value: p.value.clone() },
            })
            .collect();

        QueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            dry_run,
            use_query_cache,
            max_results: if dry_run { None } else { Some(PAGE_SIZE) },
            timeout_ms: SERVER_WAIT_MS,
            location: self.config.location.as_deref(),
            parameter_mode: if query_parameters.is_empty() { None } else { Some("NAMED") },
            query_parameters,
            request_id: uuid::Uuid::new_v4().to_string(),
            format_options: FormatOptions { use_int64_timestamp: true },
        }
    }

    async fn submit(&self, request: &QueryRequest<'_>) -> std::result::Result<QueryResponse, EngineError> {
        let mut builder = self.client.post(self.queries_url()).json(request);
        if let Some(token) = &self.config.access_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::transport(format!("Failed to submit BigQuery job: {}", e)))?;
        read_response(response).await
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> std::result::Result<QueryResponse, EngineError> {
        let url = format!("{}/{}", self.queries_url(), job.job_id);
        let mut params: Vec<(&str, String)> = vec![
            ("timeoutMs", SERVER_WAIT_MS.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = job.location.as_deref().or(self.config.location.as_deref()) {
            params.push(("location", location.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let mut builder = self.client.get(&url).query(&params);
        if let Some(token) = &self.config.access_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::transport(format!("Failed to fetch BigQuery results: {}", e)))?;
        read_response(response).await
    }
}

#[async_trait]
impl QueryEngine for BigQueryEngine {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    async fn dry_run(
        &self,
        query: &RenderedQuery,
        options: DryRunOptions,
    ) -> std::result::Result<DryRunStats, EngineError> {
        let request = self.build_request(query, true, options.use_query_cache);
        let response = self.submit(&request).await?;
        let total_bytes_processed = parse_bytes(response.total_bytes_processed.as_deref())?;
        debug!("BigQuery dry run: {} bytes", total_bytes_processed);
        Ok(DryRunStats { total_bytes_processed })
    }

    async fn execute(&self, query: &RenderedQuery) -> std::result::Result<Vec<EngineRow>, EngineError> {
        let request = self.build_request(query, false, true);
        let mut response = self.submit(&request).await?;

        let job = response
            .job_reference
            .clone()
            .ok_or_else(|| EngineError::protocol("BigQuery response has no job reference"))?;
        info!("BigQuery job submitted: {}", job.job_id);

        let mut schema: Option<TableSchema> = None;
        let mut rows = Vec::new();
        let mut polls = 0;

        loop {
            polls += 1;
            if polls > self.max_polls {
                return Err(EngineError::protocol(format!(
                    "BigQuery job {} exceeded max polls ({})",
                    job.job_id, self.max_polls
                )));
            }

            if !response.job_complete.unwrap_or(true) {
                debug!("BigQuery job {} still running", job.job_id);
                response = self.fetch_results(&job, None).await?;
                continue;
            }

            if schema.is_none() {
                schema = response.schema.take();
            }
            let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
            rows.extend(decode_rows(fields, &response.rows)?);

            match response.page_token.take() {
                Some(token) => response = self.fetch_results(&job, Some(&token)).await?,
                None => break,
            }
        }

        info!("BigQuery job {} returned {} rows", job.job_id, rows.len());
        Ok(rows)
    }
}

async fn read_response(response: reqwest::Response) -> std::result::Result<QueryResponse, EngineError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| EngineError::transport(format!("Failed to read BigQuery response: {}", e)))?;

    parse_response(status, &text)
}

/// A 2xx body may still carry `errors`; BigQuery uses the same list for
/// warnings. They only fail the call when the body has no result to go with them.
fn parse_response(status: StatusCode, text: &str) -> std::result::Result<QueryResponse, EngineError> {
    if !status.is_success() {
        let err = api_error(status, text);
        warn!("BigQuery request failed with status {}: {}", status, err);
        return Err(err);
    }

    let parsed: QueryResponse = serde_json::from_str(text)
        .map_err(|e| EngineError::protocol(format!("Failed to parse BigQuery response: {}", e)))?;

    if let Some(first) = parsed.errors.first() {
        let message = first.message.clone().unwrap_or_else(|| "BigQuery job failed".to_string());
        if parsed.has_result() {
            warn!("BigQuery reported: {}", message);
        } else {
            let reasons: Vec<&str> = parsed.errors.iter().filter_map(|e| e.reason.as_deref()).collect();
            return Err(EngineError::new(classify(None, &reasons, &message), message));
        }
    }

    Ok(parsed)
}

impl QueryResponse {
    fn has_result(&self) -> bool {
        self.job_complete == Some(false)
            || self.schema.is_some()
            || !self.rows.is_empty()
            || self.total_bytes_processed.is_some()
    }
}

fn api_error(status: StatusCode, body: &str) -> EngineError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reasons: Vec<&str> = envelope
                .error
                .errors
                .iter()
                .filter_map(|e| e.reason.as_deref())
                .collect();
            let kind = classify(Some(status), &reasons, &envelope.error.message);
            EngineError::new(kind, envelope.error.message.clone())
        }
        Err(_) => EngineError::new(
            classify(Some(status), &[], body),
            format!("BigQuery request failed with status {}: {}", status, body),
        ),
    }
}

/// Map an HTTP status and BigQuery error reasons onto an error kind.
/// Reasons win over status: quota errors also come back as 403.
fn classify(status: Option<StatusCode>, reasons: &[&str], message: &str) -> EngineErrorKind {
    for reason in reasons {
        match *reason {
            "quotaExceeded" | "rateLimitExceeded" | "billingTierLimitExceeded" => {
                return EngineErrorKind::QuotaExceeded
            }
            "accessDenied" => return EngineErrorKind::AccessDenied,
            "invalidQuery" | "invalid" => return EngineErrorKind::InvalidQuery,
            _ => {}
        }
    }
    if message.contains("Access Denied") {
        return EngineErrorKind::AccessDenied;
    }
    match status {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => EngineErrorKind::AccessDenied,
        Some(StatusCode::BAD_REQUEST) => EngineErrorKind::InvalidQuery,
        _ => EngineErrorKind::Other,
    }
}

fn parse_bytes(raw: Option<&str>) -> std::result::Result<u64, EngineError> {
    let raw = raw.ok_or_else(|| EngineError::protocol("Dry run response has no totalBytesProcessed"))?;
    raw.parse::<u64>()
        .map_err(|e| EngineError::protocol(format!("Invalid totalBytesProcessed '{}': {}", raw, e)))
}

fn decode_rows(fields: &[TableFieldSchema], rows: &[TableRow]) -> std::result::Result<Vec<EngineRow>, EngineError> {
    if !rows.is_empty() && fields.is_empty() {
        return Err(EngineError::protocol("BigQuery returned rows without a schema"));
    }

    rows.iter()
        .map(|row| -> std::result::Result<EngineRow, EngineError> {
            let mut columns = Vec::with_capacity(fields.len());
            for (idx, field) in fields.iter().enumerate() {
                let cell = row.f.get(idx).map(|c| &c.v).unwrap_or(&serde_json::Value::Null);
                columns.push((field.name.clone(), decode_cell(field, cell)?));
            }
            Ok(EngineRow { columns })
        })
        .collect()
}

fn decode_cell(field: &TableFieldSchema, cell: &serde_json::Value) -> std::result::Result<EngineValue, EngineError> {
    let field_type = field.field_type.to_ascii_uppercase();
    let repeated = field.mode.as_deref() == Some("REPEATED");

    if cell.is_null() {
        return Ok(EngineValue::Null);
    }
    // Nested values have no scalar mapping; keep their JSON text
    if repeated || field_type == "RECORD" || field_type == "STRUCT" {
        return Ok(EngineValue::Text(cell.to_string()));
    }

    let raw = match cell {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Bool(b) => return Ok(EngineValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            return Ok(match n.as_i64() {
                Some(i) => EngineValue::Int64(i),
                None => EngineValue::Float64(n.as_f64().unwrap_or(f64::NAN)),
            })
        }
        other => return Ok(EngineValue::Text(other.to_string())),
    };

    let bad = |e: &dyn std::fmt::Display| {
        EngineError::protocol(format!(
            "Column '{}' ({}) has unparsable value '{}': {}",
            field.name, field.field_type, raw, e
        ))
    };

    match field_type.as_str() {
        "INTEGER" | "INT64" => raw.parse::<i64>().map(EngineValue::Int64).map_err(|e| bad(&e)),
        "FLOAT" | "FLOAT64" => raw.parse::<f64>().map(EngineValue::Float64).map_err(|e| bad(&e)),
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => Ok(EngineValue::Numeric(raw.to_string())),
        "BOOLEAN" | "BOOL" => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(EngineValue::Bool(true)),
            "false" => Ok(EngineValue::Bool(false)),
            _ => Err(bad(&"not a boolean")),
        },
        "TIMESTAMP" => parse_timestamp(raw)
            .map(EngineValue::Timestamp)
            .ok_or_else(|| bad(&"not an epoch timestamp")),
        _ => Ok(EngineValue::Text(raw.to_string())),
    }
}

/// BigQuery sends TIMESTAMP as epoch microseconds when `useInt64Timestamp`
/// is set, and as (possibly exponent-formatted) epoch seconds otherwise.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(micros) = raw.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros);
    }
    let seconds = raw.parse::<f64>().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}
