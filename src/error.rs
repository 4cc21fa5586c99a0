use serde::Serialize;
use thiserror::Error;

use crate::freeipa::types::RpcError;

/// Diagnostic shape printed by the CLI for a failed operation.
#[derive(Debug, Serialize)]
pub struct DiagnosticBody {
    pub summary: &'static str,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Client(RpcError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("cannot move user {login} from {from} to {to}")]
    InvalidTransition {
        login: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("membership of group {group} failed: {}", failures.join("; "))]
    Member { group: String, failures: Vec<String> },

    #[error("{0}")]
    Config(String),

    #[error("request to FreeIPA failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected FreeIPA reply: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ProviderError::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ProviderError::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ProviderError::Protocol(msg.into())
    }

    /// True when FreeIPA reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound { .. } => true,
            ProviderError::Client(rpc) => rpc.is_not_found(),
            _ => false,
        }
    }

    /// Short label used as the diagnostic summary.
    pub fn summary(&self) -> &'static str {
        match self {
            ProviderError::Client(_) => "Client Error",
            ProviderError::NotFound { .. } => "Not Found",
            ProviderError::Validation(_) => "Attribute format",
            ProviderError::InvalidTransition { .. } => "Invalid lifecycle transition",
            ProviderError::Member { .. } => "Membership Error",
            ProviderError::Config(_) => "Provider Configuration",
            ProviderError::Transport(_) => "Transport Error",
            ProviderError::Protocol(_) => "Protocol Error",
        }
    }

    pub fn diagnostic(&self) -> DiagnosticBody {
        DiagnosticBody {
            summary: self.summary(),
            detail: self.to_string(),
        }
    }
}

impl From<RpcError> for ProviderError {
    fn from(err: RpcError) -> Self {
        ProviderError::Client(err)
    }
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
