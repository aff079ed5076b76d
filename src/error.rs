use std::fmt;
use thiserror::Error;

/// Which round trip to the warehouse a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Estimate,
    Execute,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePhase::Estimate => write!(f, "estimate"),
            EnginePhase::Execute => write!(f, "execute"),
        }
    }
}

/// Broad classification of what the remote engine reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Missing credentials or IAM permissions
    AccessDenied,
    QuotaExceeded,
    /// The engine rejected the SQL itself
    InvalidQuery,
    /// Network / HTTP level failure before the engine answered
    Transport,
    /// Response body did not match the expected shape
    Protocol,
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineErrorKind::AccessDenied => "access denied",
            EngineErrorKind::QuotaExceeded => "quota exceeded",
            EngineErrorKind::InvalidQuery => "invalid query",
            EngineErrorKind::Transport => "transport",
            EngineErrorKind::Protocol => "protocol",
            EngineErrorKind::Other => "engine failure",
        };
        write!(f, "{}", s)
    }
}

/// Error reported by a `QueryEngine` implementation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::AccessDenied, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Protocol, message)
    }
}

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template '{template}' is missing a value for placeholder '{placeholder}'")]
    TemplateParameter {
        template: String,
        placeholder: String,
    },

    #[error("Query would process {estimate_gb:.2} GB, which exceeds the maximum allowed size of {ceiling_gb} GB")]
    QueryTooLarge { estimate_gb: f64, ceiling_gb: f64 },

    #[error("Remote engine error during {phase}: {source}")]
    RemoteEngine {
        phase: EnginePhase,
        #[source]
        source: EngineError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InsightsError {
    pub fn remote(phase: EnginePhase, source: EngineError) -> Self {
        InsightsError::RemoteEngine { phase, source }
    }

    /// True when the warehouse refused us for lack of permissions.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            InsightsError::RemoteEngine { source, .. } if source.kind == EngineErrorKind::AccessDenied
        )
    }

    /// Operator-facing guidance for errors that have an obvious fix.
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            InsightsError::QueryTooLarge { .. } => Some(TOO_LARGE_SUGGESTION),
            InsightsError::RemoteEngine { source, .. } => match source.kind {
                EngineErrorKind::AccessDenied => Some(
                    "Make sure your account has the 'BigQuery User' role in the project \
                     (IAM & Admin in the Google Cloud Console) and that the access token is current",
                ),
                EngineErrorKind::QuotaExceeded => {
                    Some("The project's query quota is exhausted; wait for it to reset or raise the quota")
                }
                _ => None,
            },
            _ => None,
        }
    }
}

pub const TOO_LARGE_SUGGESTION: &str = "Try reducing the time window or using a more specific query";

pub type Result<T> = std::result::Result<T, InsightsError>;
