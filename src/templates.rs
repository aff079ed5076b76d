//! Query Template Registry
//!
//! Named SQL templates with `{placeholder}` slots. Integer values are written
//! into the SQL text; string values are never interpolated, they become named
//! query parameters (`@name`) that travel next to the SQL.

use crate::error::{InsightsError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

pub const USDC_TOKEN_ADDRESS: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

pub const USDC_TRANSFERS: &str = "usdc_transfers";
pub const ETH_TRANSFERS: &str = "eth_transfers";
pub const SOL_TRANSFERS: &str = "sol_transfers";
pub const TOP_TOKENS: &str = "top_tokens";
pub const WALLET_INFO: &str = "wallet_info";

const USDC_TRANSFERS_SQL: &str = r#"
SELECT
    block_timestamp,
    from_address,
    to_address,
    token_address,
    CAST(value AS NUMERIC) / 1e6 AS value_usdc,
    transaction_hash
FROM `bigquery-public-data.crypto_ethereum.token_transfers`
WHERE token_address = {token_address}
    AND (from_address = {wallet_id} OR to_address = {wallet_id})
    AND block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
ORDER BY block_timestamp DESC
LIMIT {limit}
"#;

const ETH_TRANSFERS_SQL: &str = r#"
SELECT
    block_timestamp,
    from_address,
    to_address,
    value / 1e18 AS value_eth,
    `hash`,
    gas_price / 1e9 AS gas_price_gwei,
    receipt_gas_used AS gas_used
FROM `bigquery-public-data.crypto_ethereum.transactions`
WHERE (from_address = {wallet_id} OR to_address = {wallet_id})
    AND block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
ORDER BY block_timestamp DESC
LIMIT {limit}
"#;

const SOL_TRANSFERS_SQL: &str = r#"
SELECT
    block_timestamp,
    source,
    destination,
    value / 1e9 AS value_sol,
    tx_signature
FROM `bigquery-public-data.crypto_solana_mainnet_us.Token Transfers`
WHERE (source = {wallet_id} OR destination = {wallet_id})
    AND block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
ORDER BY block_timestamp DESC
LIMIT {limit}
"#;

const TOP_TOKENS_SQL: &str = r#"
WITH token_metadata AS (
    SELECT address, name, symbol, decimals
    FROM `bigquery-public-data.crypto_ethereum.tokens`
)
SELECT
    t.token_address,
    m.name,
    m.symbol,
    COUNT(*) AS transaction_count,
    SUM(CASE WHEN t.from_address = {wallet_id} THEN CAST(t.value AS NUMERIC) ELSE 0 END) AS sent,
    SUM(CASE WHEN t.to_address = {wallet_id} THEN CAST(t.value AS NUMERIC) ELSE 0 END) AS received
FROM `bigquery-public-data.crypto_ethereum.token_transfers` t
LEFT JOIN token_metadata m ON t.token_address = m.address
WHERE (t.from_address = {wallet_id} OR t.to_address = {wallet_id})
    AND t.block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
GROUP BY t.token_address, m.name, m.symbol, m.decimals
ORDER BY (sent + received) DESC
LIMIT {limit}
"#;

const WALLET_INFO_SQL: &str = r#"
WITH wallet_stats AS (
    SELECT
        MIN(block_timestamp) AS first_seen,
        COUNT(*) AS total_transactions
    FROM `bigquery-public-data.crypto_ethereum.transactions`
    WHERE (from_address = {wallet_id} OR to_address = {wallet_id})
        AND block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
),
contract_check AS (
    SELECT COUNT(*) > 0 AS is_contract
    FROM `bigquery-public-data.crypto_ethereum.contracts`
    WHERE address = {wallet_id}
        AND block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY)
)
SELECT
    ws.first_seen,
    ws.total_transactions,
    cc.is_contract
FROM wallet_stats ws, contract_check cc
LIMIT {limit}
"#;

/// A value supplied for a template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

pub type TemplateParams = HashMap<String, ParamValue>;

/// Named parameter sent to the engine alongside the SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: String,
}

/// Fully-formed query ready for estimation and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

impl RenderedQuery {
    /// Query with no bound parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Registry preloaded with the wallet activity templates
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(USDC_TRANSFERS, USDC_TRANSFERS_SQL);
        registry.register(ETH_TRANSFERS, ETH_TRANSFERS_SQL);
        registry.register(SOL_TRANSFERS, SOL_TRANSFERS_SQL);
        registry.register(TOP_TOKENS, TOP_TOKENS_SQL);
        registry.register(WALLET_INFO, WALLET_INFO_SQL);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        self.templates.insert(name.into(), sql.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(|s| s.as_str())
    }

    /// Names of all placeholders a template expects, in first-use order
    pub fn placeholders(&self, name: &str) -> Result<Vec<String>> {
        let sql = self.lookup(name)?;
        let mut seen = Vec::new();
        for cap in PLACEHOLDER.captures_iter(sql) {
            let key = cap[1].to_string();
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        Ok(seen)
    }

    /// Substitute every placeholder of template `name` from `params`.
    ///
    /// Fails with `TemplateParameter` on the first placeholder that has no value.
    /// Values in `params` that the template does not use are ignored.
    pub fn render(&self, name: &str, params: &TemplateParams) -> Result<RenderedQuery> {
        let sql = self.lookup(name)?;

        let mut rendered = String::with_capacity(sql.len());
        let mut bound: BTreeMap<String, String> = BTreeMap::new();
        let mut last = 0;

        for cap in PLACEHOLDER.captures_iter(sql) {
            let Some(whole) = cap.get(0) else { continue };
            let key = &cap[1];
            rendered.push_str(&sql[last..whole.start()]);

            match params.get(key) {
                Some(ParamValue::Int(v)) => rendered.push_str(&v.to_string()),
                Some(ParamValue::Text(v)) => {
                    rendered.push('@');
                    rendered.push_str(key);
                    bound.insert(key.to_string(), v.clone());
                }
                None => {
                    return Err(InsightsError::TemplateParameter {
                        template: name.to_string(),
                        placeholder: key.to_string(),
                    })
                }
            }
            last = whole.end();
        }
        rendered.push_str(&sql[last..]);

        Ok(RenderedQuery {
            sql: rendered.trim().to_string(),
            parameters: bound
                .into_iter()
                .map(|(name, value)| QueryParameter { name, value })
                .collect(),
        })
    }

    fn lookup(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| InsightsError::Validation(format!("Unknown query template '{}'", name)))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
