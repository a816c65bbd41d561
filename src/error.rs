//! Error types for filepush

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic text shown for every decryption failure. Wrong key, tampered
/// ciphertext and truncated tags all map here.
pub const DECRYPTION_FAILED_MESSAGE: &str = "invalid key or corrupted file";

/// Main error type for filepush
#[derive(Error, Debug)]
pub enum Error {
    // Key errors
    #[error("Invalid encryption key format: the link may be corrupted")]
    InvalidKeyFormat,

    #[error("Key serialization error: {0}")]
    Serialization(String),

    // Cipher errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Malformed encrypted blob: {len} bytes is too short")]
    MalformedBlob { len: usize },

    #[error("Decryption failed: {}", DECRYPTION_FAILED_MESSAGE)]
    DecryptionFailed,

    // Share link errors
    #[error("Encryption key not found: URL is incomplete")]
    MissingKey,

    #[error("Invalid share URL: {0}")]
    InvalidShareUrl(String),

    // Server gate errors
    #[error("Invalid password")]
    Unauthorized,

    #[error("File not found or has been deleted")]
    NotFound,

    #[error("File has expired")]
    Expired,

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Environment errors
    #[error("Transmission failed (status {status:?}): {message}")]
    Transmission { status: Option<u16>, message: String },

    #[error("Failed to read source: {0}")]
    SourceRead(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the caller may retry by restarting the flow or re-prompting.
    ///
    /// Nothing inside the crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized | Error::Transmission { .. } | Error::SourceRead(_)
        )
    }

    /// Short message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidKeyFormat => "The link is broken. Ask the sender for a new link.".to_string(),
            Error::MissingKey => "The URL is incomplete. Encryption key not found.".to_string(),
            Error::MalformedBlob { .. } | Error::DecryptionFailed => {
                format!("Decryption failed: {}", DECRYPTION_FAILED_MESSAGE)
            }
            Error::Unauthorized => "Invalid password".to_string(),
            Error::NotFound => "File not found or has been deleted".to_string(),
            Error::Expired => "File has expired".to_string(),
            Error::Transmission { .. } => "Network error. Please try again.".to_string(),
            other => other.to_string(),
        }
    }

    /// Map an HTTP status from the server onto the error taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Error::Validation(message),
            401 | 403 => Error::Unauthorized,
            404 => Error::NotFound,
            410 => Error::Expired,
            413 => Error::PayloadTooLarge(message),
            _ => Error::Transmission {
                status: Some(status),
                message,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transmission {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_message_is_generic() {
        assert_eq!(
            Error::DecryptionFailed.to_string(),
            "Decryption failed: invalid key or corrupted file"
        );
        assert_eq!(
            Error::MalformedBlob { len: 3 }.user_message(),
            Error::DecryptionFailed.user_message()
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::Unauthorized.is_retryable());
        assert!(Error::SourceRead("gone".into()).is_retryable());
        assert!(!Error::DecryptionFailed.is_retryable());
        assert!(!Error::MissingKey.is_retryable());
        assert!(!Error::InvalidKeyFormat.is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(Error::from_status(401, "x"), Error::Unauthorized));
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound));
        assert!(matches!(Error::from_status(410, "x"), Error::Expired));
        assert!(matches!(Error::from_status(400, "x"), Error::Validation(_)));
        assert!(matches!(
            Error::from_status(503, "x"),
            Error::Transmission { status: Some(503), .. }
        ));
    }
}
