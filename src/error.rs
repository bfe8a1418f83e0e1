//! Error types for the deployment pipeline.

use alloy::primitives::B256;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ethereum::storage::DataItem;

/// Failures talking to the JSON-RPC endpoint. Every variant records the
/// method that was being called.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{method}: connection failed: {message}")]
    Connection { method: String, message: String },

    #[error("{method}: request timed out: {message}")]
    Timeout { method: String, message: String },

    #[error("{method}: malformed response: {message}")]
    MalformedResponse { method: String, message: String },

    #[error("{method}: RPC error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
}

impl TransportError {
    pub fn method(&self) -> &str {
        match self {
            Self::Connection { method, .. }
            | Self::Timeout { method, .. }
            | Self::MalformedResponse { method, .. }
            | Self::Rpc { method, .. } => method,
        }
    }

    pub fn rpc<S: Into<String>>(method: &str, code: i64, message: S) -> Self {
        Self::Rpc {
            method: method.to_string(),
            code,
            message: message.into(),
        }
    }

    pub fn malformed<S: Into<String>>(method: &str, message: S) -> Self {
        Self::MalformedResponse {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("chain id mismatch: configured {configured}, endpoint reports {reported}")]
    ChainMismatch { configured: u64, reported: u64 },

    #[error("artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("invalid artifact {}: {reason}", path.display())]
    ArtifactInvalid { path: PathBuf, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("arguments do not match '{function}': {reason}")]
    SignatureMismatch { function: String, reason: String },

    #[error("function '{0}' not found in contract ABI")]
    UnknownFunction(String),

    #[error("event '{0}' not found in contract ABI")]
    UnknownEvent(String),

    #[error("failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("insufficient transaction parameters: {0}")]
    InsufficientParameters(String),

    #[error("transaction {tx_hash} not mined within {waited:?}")]
    ConfirmationTimeout { tx_hash: B256, waited: Duration },

    #[error("wait for transaction {tx_hash} was cancelled")]
    Cancelled { tx_hash: B256 },

    #[error("transaction {tx_hash} reverted in block {block_number} (gas used {gas_used})")]
    TransactionReverted {
        tx_hash: B256,
        block_number: u64,
        gas_used: u64,
    },

    #[error("receipt for creation transaction {tx_hash} carries no contract address")]
    MissingContractAddress { tx_hash: B256 },

    #[error("stored state {stored} disagrees with DataSaved log {logged}")]
    StateMismatch { logged: DataItem, stored: DataItem },
}

impl DeployError {
    /// Top-level category used when reporting a failure.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::ChainMismatch { .. } | Self::InsufficientParameters(_) => {
                "ConfigError"
            }
            Self::ArtifactNotFound { .. } | Self::ArtifactInvalid { .. } => "ArtifactError",
            Self::Transport(_) => "TransportError",
            Self::InvalidKey(_) | Self::Signing(_) => "SigningError",
            Self::SignatureMismatch { .. }
            | Self::UnknownFunction(_)
            | Self::UnknownEvent(_)
            | Self::Decode { .. } => "EncodingError",
            Self::ConfirmationTimeout { .. } | Self::Cancelled { .. } => "ConfirmationTimeout",
            // The save was mined but did not leave the state it announced.
            Self::TransactionReverted { .. }
            | Self::MissingContractAddress { .. }
            | Self::StateMismatch { .. } => "TransactionReverted",
        }
    }

    pub fn decode<C: Into<String>, R: ToString>(context: C, reason: R) -> Self {
        Self::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
