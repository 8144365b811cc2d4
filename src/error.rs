//! Error types for rsoemcrypto.

use std::time::Duration;

use thiserror::Error;

use crate::registry::SessionId;
use crate::types::OemCryptoResult;

/// Main error type for adapter operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The negotiated ABI (or the implementation) does not offer the operation.
    #[error("Operation not implemented at the negotiated API version")]
    NotImplemented,

    /// No session is open with the specified identifier.
    #[error("Session identifier {0} is invalid")]
    InvalidSession(SessionId),

    /// No implementation is available to serve the call.
    #[error("No OEMCrypto implementation is available")]
    NoImplementation,

    /// The implementation reported a failure code.
    #[error("OEMCrypto returned {0}")]
    Underlying(OemCryptoResult),

    /// The caller's output buffer is too small.
    #[error("Output buffer too small ({required} bytes required)")]
    ShortBuffer { required: usize },

    /// The usage table cannot be recovered and must be rebuilt.
    #[error("Usage table is unrecoverable")]
    UsageTableUnrecoverable,

    /// An implementation could not be brought up.
    #[error("Initialization failure: {0}")]
    InitializationFailure(String),

    /// Software bring-up exceeded its deadline.
    #[error("Level 3 initialization did not finish within {:?}", .timeout)]
    FatalAbort { timeout: Duration },

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// YAML configuration could not be parsed.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Numeric OEMCrypto code equivalent to this error.
    #[must_use]
    pub fn code(&self) -> OemCryptoResult {
        match self {
            Self::NotImplemented => OemCryptoResult::ERROR_NOT_IMPLEMENTED,
            Self::InvalidSession(_) | Self::NoImplementation => {
                OemCryptoResult::ERROR_INVALID_SESSION
            }
            Self::Underlying(code) => *code,
            Self::ShortBuffer { .. } => OemCryptoResult::ERROR_SHORT_BUFFER,
            Self::UsageTableUnrecoverable => OemCryptoResult::ERROR_USAGE_TABLE_UNRECOVERABLE,
            Self::InitializationFailure(_) | Self::FatalAbort { .. } => {
                OemCryptoResult::ERROR_INIT_FAILED
            }
            Self::Config(_) | Self::YamlError(_) | Self::IoError(_) => {
                OemCryptoResult::ERROR_UNKNOWN_FAILURE
            }
        }
    }
}

/// Result type alias for rsoemcrypto operations.
pub type Result<T> = std::result::Result<T, Error>;
