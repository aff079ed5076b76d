//! Wallet operations
//!
//! Each operation validates the caller's knobs, renders its template and hands
//! the query to the cost guard. Oversized queries come back as a
//! `Outcome::Rejected` value rather than an error.

use crate::config::CostPolicy;
use crate::error::{InsightsError, Result, TOO_LARGE_SUGGESTION};
use crate::execution::{Admission, CostGuard, QueryEngine, ResultRow};
use crate::templates::{self, RenderedQuery, TemplateParams, TemplateRegistry};
use crate::validation::{ensure_read_only, Chain, ParameterValidator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Default lookback for Solana transfers; the Solana tables are far larger per day.
pub const SOL_DEFAULT_DAYS_TO_LOOK_BACK: i64 = 10;

/// Caller-supplied arguments shared by every wallet operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletQuery {
    pub wallet_address: String,
    #[serde(default)]
    pub lookback_days: Option<i64>,
    #[serde(default)]
    pub result_cap: Option<i64>,
}

impl WalletQuery {
    pub fn new(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            lookback_days: None,
            result_cap: None,
        }
    }

    pub fn days(mut self, days: i64) -> Self {
        self.lookback_days = Some(days);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.result_cap = Some(limit);
        self
    }
}

/// Structured "too expensive" response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub error: String,
    pub suggestion: String,
    #[serde(skip)]
    pub estimate_gb: f64,
    #[serde(skip)]
    pub ceiling_gb: f64,
}

/// Either the operation's value or a cost rejection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Completed(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Rejected(r) => Some(r),
            Outcome::Completed(_) => None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Rejected(r) => Outcome::Rejected(r),
        }
    }
}

/// Turn `QueryTooLarge` into a rejection value; every other error propagates.
fn catch_rejection<T>(result: Result<T>) -> Result<Outcome<T>> {
    match result {
        Ok(v) => Ok(Outcome::Completed(v)),
        Err(InsightsError::QueryTooLarge { estimate_gb, ceiling_gb }) => {
            let err = InsightsError::QueryTooLarge { estimate_gb, ceiling_gb };
            warn!("Warning: {}", err);
            Ok(Outcome::Rejected(Rejection {
                error: err.to_string(),
                suggestion: TOO_LARGE_SUGGESTION.to_string(),
                estimate_gb,
                ceiling_gb,
            }))
        }
        Err(e) => Err(e),
    }
}

/// Entry point for the wallet activity operations
#[derive(Clone)]
pub struct WalletInsights {
    guard: CostGuard,
    validator: ParameterValidator,
    templates: Arc<TemplateRegistry>,
    policy: CostPolicy,
}

impl WalletInsights {
    pub fn new(engine: Arc<dyn QueryEngine>, policy: CostPolicy) -> Self {
        Self::with_templates(engine, policy, TemplateRegistry::builtin())
    }

    pub fn with_templates(engine: Arc<dyn QueryEngine>, policy: CostPolicy, templates: TemplateRegistry) -> Self {
        Self {
            guard: CostGuard::new(engine, policy.max_query_size_gb),
            validator: ParameterValidator::new(&policy),
            templates: Arc::new(templates),
            policy,
        }
    }

    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    /// USDC token transfers to or from an Ethereum wallet, newest first
    pub async fn usdc_transactions(&self, request: &WalletQuery) -> Result<Outcome<Vec<ResultRow>>> {
        let mut params = self.wallet_params(Chain::Ethereum, request, self.policy.default_lookback_days)?;
        params.insert("token_address".to_string(), templates::USDC_TOKEN_ADDRESS.into());
        self.run_template(templates::USDC_TRANSFERS, &params).await
    }

    /// Native ETH transfers with gas cost
    pub async fn eth_transfers(&self, request: &WalletQuery) -> Result<Outcome<Vec<ResultRow>>> {
        let params = self.wallet_params(Chain::Ethereum, request, self.policy.default_lookback_days)?;
        self.run_template(templates::ETH_TRANSFERS, &params).await
    }

    /// Solana token transfers
    pub async fn sol_transfers(&self, request: &WalletQuery) -> Result<Outcome<Vec<ResultRow>>> {
        let params = self.wallet_params(Chain::Solana, request, SOL_DEFAULT_DAYS_TO_LOOK_BACK)?;
        self.run_template(templates::SOL_TRANSFERS, &params).await
    }

    /// Tokens the wallet moved the most volume in
    pub async fn top_tokens(&self, request: &WalletQuery) -> Result<Outcome<Vec<ResultRow>>> {
        let params = self.wallet_params(Chain::Ethereum, request, self.policy.default_lookback_days)?;
        self.run_template(templates::TOP_TOKENS, &params).await
    }

    /// First-seen time, transaction count and contract flag for a wallet.
    ///
    /// A wallet with no activity yields the empty summary rather than no rows.
    pub async fn wallet_info(&self, request: &WalletQuery) -> Result<Outcome<ResultRow>> {
        let params = self.wallet_params(Chain::Ethereum, request, self.policy.default_lookback_days)?;
        let outcome = self.run_template(templates::WALLET_INFO, &params).await?;
        Ok(outcome.map(|rows| rows.into_iter().next().unwrap_or_else(empty_wallet_summary)))
    }

    /// Run caller-written SQL behind the same cost guard. Only a single
    /// read-only statement is accepted.
    pub async fn run_query(&self, sql: &str) -> Result<Outcome<Vec<ResultRow>>> {
        ensure_read_only(sql)?;
        catch_rejection(self.guard.run(&RenderedQuery::raw(sql.trim())).await)
    }

    /// Dry-run `sql` and report whether it would be admitted
    pub async fn estimate(&self, sql: &str) -> Result<Admission> {
        ensure_read_only(sql)?;
        self.guard.check(&RenderedQuery::raw(sql.trim())).await
    }

    fn wallet_params(&self, chain: Chain, request: &WalletQuery, default_days: i64) -> Result<TemplateParams> {
        let wallet = self.validator.validate_wallet(chain, &request.wallet_address)?;
        let (days, limit) = self.validator.clamp_limits(
            request.lookback_days.unwrap_or(default_days),
            request.result_cap.unwrap_or(self.policy.default_result_cap),
        );

        let mut params = TemplateParams::new();
        params.insert("wallet_id".to_string(), wallet.into());
        params.insert("days".to_string(), days.into());
        params.insert("limit".to_string(), limit.into());
        Ok(params)
    }

    async fn run_template(&self, name: &str, params: &TemplateParams) -> Result<Outcome<Vec<ResultRow>>> {
        let query = self.templates.render(name, params)?;
        info!(template = name, "running wallet query");
        catch_rejection(self.guard.run(&query).await)
    }
}

/// Summary returned for a wallet with no recorded activity
pub fn empty_wallet_summary() -> ResultRow {
    let mut row = ResultRow::new();
    row.insert("first_seen".to_string(), Value::Null);
    row.insert("total_transactions".to_string(), Value::from(0));
    row.insert("is_contract".to_string(), Value::Bool(false));
    row
}
