//! Error types for pairsign

use thiserror::Error;

/// Errors that can occur in pairsign operations
#[derive(Error, Debug)]
pub enum Error {
    /// A request was missing required parameters or otherwise malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An authorization code was unknown, expired, or bound to other parameters
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Client authentication failed
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// The token endpoint was asked for a grant type it does not support
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Credentials or bearer token did not check out
    #[error("Unauthorized")]
    Unauthorized,

    /// Credential store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Signing key generation or loading failure
    #[error("Key error: {0}")]
    Key(String),

    /// Token signing failure
    #[error("Signing error: {0}")]
    Signing(String),

    /// TLS setup failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pairsign operations
pub type Result<T> = std::result::Result<T, Error>;
