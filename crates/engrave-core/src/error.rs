//! Error types for engrave operations.
//!
//! Every fallible operation returns [`EngraveResult`]. Structured variants carry
//! an [`ErrorCode`] for programmatic handling and, where it helps, a hint for
//! resolving the failure.

use thiserror::Error;

use crate::types::RecordId;

/// Result type alias for engrave operations.
pub type EngraveResult<T> = Result<T, EngraveError>;

/// Main error type for all engrave operations.
#[derive(Error, Debug)]
pub enum EngraveError {
    /// An operation referenced a record that does not exist.
    #[error("Record not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        record_id: Option<RecordId>,
    },

    /// A caller-supplied value was rejected before any mutation happened.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        message: String,
        code: ErrorCode,
        parameter: Option<String>,
        suggestion: Option<String>,
    },

    /// The durable store failed.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The semantic-similarity provider is absent or failing.
    #[error("Provider unavailable: {message}")]
    ProviderUnavailable {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Records (REC_xxx)
    RecNotFound,

    // Parameters (PARAM_xxx)
    ParamOutOfRange,
    ParamUnknownValue,
    ParamEmpty,

    // Storage (STORE_xxx)
    StoreOperationFailed,
    StoreCorrupted,

    // Providers (PROV_xxx)
    ProvAbsent,
    ProvFailed,
    ProvBadResponse,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RecNotFound => "REC_001",
            ErrorCode::ParamOutOfRange => "PARAM_001",
            ErrorCode::ParamUnknownValue => "PARAM_002",
            ErrorCode::ParamEmpty => "PARAM_003",
            ErrorCode::StoreOperationFailed => "STORE_001",
            ErrorCode::StoreCorrupted => "STORE_002",
            ErrorCode::ProvAbsent => "PROV_001",
            ErrorCode::ProvFailed => "PROV_002",
            ErrorCode::ProvBadResponse => "PROV_003",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl EngraveError {
    /// Create a not found error for a record.
    pub fn not_found(record_id: RecordId) -> Self {
        Self::NotFound {
            message: format!("Record with id '{}' not found", record_id),
            code: ErrorCode::RecNotFound,
            record_id: Some(record_id),
        }
    }

    /// Create an invalid parameter error for a value outside its valid range.
    pub fn out_of_range(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
            code: ErrorCode::ParamOutOfRange,
            parameter: Some(parameter.into()),
            suggestion: None,
        }
    }

    /// Create an invalid parameter error with a suggestion.
    pub fn invalid_with_suggestion(
        code: ErrorCode,
        parameter: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            message: message.into(),
            code,
            parameter: Some(parameter.into()),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
            code: ErrorCode::StoreOperationFailed,
            source: None,
        }
    }

    /// Create a storage error for a row that could not be decoded.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
            code: ErrorCode::StoreCorrupted,
            source: None,
        }
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            code: ErrorCode::ProvFailed,
            source: None,
        }
    }

    /// Create an error for a provider that is not available in this build.
    pub fn provider_absent(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            code: ErrorCode::ProvAbsent,
            source: None,
        }
    }

    /// Create an error for a provider answer that breaks the embedder contract.
    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            code: ErrorCode::ProvBadResponse,
            source: None,
        }
    }

    /// Create an error for a lock poisoned by a panicking holder.
    pub fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{} lock poisoned", what))
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { code, .. } => *code,
            Self::InvalidParameter { code, .. } => *code,
            Self::StorageUnavailable { code, .. } => *code,
            Self::ProviderUnavailable { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::NotFound { .. } => Some("Check the record id; forgotten records are deleted permanently"),
            Self::InvalidParameter { suggestion, .. } => suggestion.as_deref(),
            Self::StorageUnavailable { .. } => Some("Check that the database path is writable"),
            Self::ProviderUnavailable { .. } => Some("Check your embedding provider configuration"),
            _ => None,
        }
    }

    /// Whether this error is an invalid parameter rejection.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. })
    }

    /// Whether this error is a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for EngraveError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable {
            message: err.to_string(),
            code: ErrorCode::StoreOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}
