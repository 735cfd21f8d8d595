use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The sealed blob or container entry does not exist. Distinct from a
    /// blob that exists but cannot be decrypted.
    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("credential expired for provider '{provider}'")]
    Expired { provider: String },

    /// Wrong key, corrupted blob, truncated nonce, or bad format version.
    /// Never reported as "missing".
    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CredentialError {
    /// Human-readable hint surfaced next to the error.
    pub fn remediation(&self) -> Option<String> {
        match self {
            CredentialError::NotFound(what) => Some(format!(
                "no credential for {what}; run `drover models auth set-key` or `drover models auth login`"
            )),
            CredentialError::Expired { provider } => Some(format!(
                "re-authenticate with `drover models auth login --provider {provider}`"
            )),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
