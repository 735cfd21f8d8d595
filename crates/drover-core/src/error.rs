use thiserror::Error;

#[derive(Debug, Error)]
pub enum DroverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown provider '{provider_id}'. {remediation}")]
    UnknownProvider {
        provider_id: String,
        remediation: String,
    },

    #[error("Malformed model reference '{0}'")]
    MalformedModelRef(String),

    #[error("Provider '{provider_id}' requires an explicit api_base")]
    MissingApiBase { provider_id: String },

    #[error("Daily token quota exceeded: {used} of {limit} tokens used today")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DroverError {
    /// Short error code string for status surfaces and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            DroverError::Config(_) => "CONFIG_ERROR",
            DroverError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            DroverError::MalformedModelRef(_) => "MALFORMED_MODEL_REF",
            DroverError::MissingApiBase { .. } => "MISSING_API_BASE",
            DroverError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            DroverError::Serialization(_) => "SERIALIZATION_ERROR",
            DroverError::Io(_) => "IO_ERROR",
            DroverError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DroverError>;
