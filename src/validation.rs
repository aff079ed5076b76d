//! Parameter Validator
//!
//! Clamps caller-supplied knobs against the cost policy and checks wallet
//! addresses before they get anywhere near a query template.

use crate::config::CostPolicy;
use crate::error::{InsightsError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;
use tracing::warn;

lazy_static! {
    static ref EVM_ADDRESS: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
    static ref SOLANA_ADDRESS: Regex = Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap();
}

/// Address format family a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Ethereum,
    Solana,
}

#[derive(Debug, Clone)]
pub struct ParameterValidator {
    max_lookback_days: i64,
    max_result_cap: i64,
}

impl ParameterValidator {
    pub fn new(policy: &CostPolicy) -> Self {
        Self {
            max_lookback_days: policy.max_lookback_days,
            max_result_cap: policy.max_result_cap,
        }
    }

    /// Clamp (days, limit) to the policy maxima. Values below the maxima,
    /// including zero and negatives, pass through unchanged.
    pub fn clamp_limits(&self, days: i64, limit: i64) -> (i64, i64) {
        (days.min(self.max_lookback_days), limit.min(self.max_result_cap))
    }

    /// Check that `address` is a well-formed wallet for `chain` and return the
    /// canonical form used in queries.
    pub fn validate_wallet(&self, chain: Chain, address: &str) -> Result<String> {
        let address = address.trim();
        match chain {
            Chain::Ethereum => {
                if EVM_ADDRESS.is_match(address) {
                    // crypto_ethereum stores addresses lowercased
                    Ok(address.to_ascii_lowercase())
                } else {
                    Err(InsightsError::Validation(format!(
                        "'{}' is not an Ethereum address (expected 0x followed by 40 hex characters)",
                        address
                    )))
                }
            }
            Chain::Solana => {
                if SOLANA_ADDRESS.is_match(address) {
                    Ok(address.to_string())
                } else {
                    Err(InsightsError::Validation(format!(
                        "'{}' is not a Solana address (expected 32-44 base58 characters)",
                        address
                    )))
                }
            }
        }
    }
}

impl Default for ParameterValidator {
    fn default() -> Self {
        Self::new(&CostPolicy::default())
    }
}

/// Accept only a single read-only query statement.
///
/// Falls back to a keyword check when the parser does not understand the
/// dialect feature in use.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(InsightsError::Validation("Query is empty".to_string()));
    }

    match Parser::parse_sql(&BigQueryDialect {}, trimmed) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [_] => Err(InsightsError::Validation(
                "Only SELECT queries can be run".to_string(),
            )),
            _ => Err(InsightsError::Validation(format!(
                "Expected exactly one statement, found {}",
                statements.len()
            ))),
        },
        Err(e) => {
            warn!("SQL parsing failed: {}, using keyword check", e);
            read_only_heuristic(trimmed)
        }
    }
}

/// Keyword check for SQL the parser rejects. It does not tokenize, so a `;`
/// anywhere before the trailing one counts as a statement separator, even
/// inside a string literal or comment. Such queries are refused.
fn read_only_heuristic(sql: &str) -> Result<()> {
    let body = sql.trim_end_matches(';');
    if body.contains(';') {
        return Err(InsightsError::Validation(
            "Multiple statements are not allowed".to_string(),
        ));
    }
    let first = body
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    if first == "SELECT" || first == "WITH" || first == "(" || first.starts_with("(SELECT") {
        Ok(())
    } else {
        Err(InsightsError::Validation(
            "Only SELECT queries can be run".to_string(),
        ))
    }
}
