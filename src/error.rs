//! Error types for the PDF engine

use std::io;
use thiserror::Error;

/// Main error type for PDF engine operations
#[derive(Error, Debug)]
pub enum PDFError {
    /// Malformed primitive token, number or string
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input ended in the middle of a token or object
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEof(String),

    /// Unknown or unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Filter preconditions not met
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Bad key material for a cipher
    #[error("Cipher initialization failed: {0}")]
    CryptoInit(String),

    /// Unreadable cross-reference data
    #[error("Cross reference table corrupt: {0}")]
    XRefCorrupt(String),

    /// Invalid page reorder request
    #[error("Invalid page reorder: {0}")]
    Reorder(String),

    /// An API was used in the wrong state
    #[error("API misuse: {0}")]
    ApiMisuse(String),

    /// Authentication failed (wrong password)
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Unsupported security handler revision
    #[error("Unsupported revision: {0}")]
    UnsupportedRevision(u8),

    /// Unsupported security handler
    #[error("Unsupported security handler: {0}")]
    UnsupportedSecurityHandler(String),

    /// Invalid object type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// Missing required dictionary entry
    #[error("Missing required dictionary entry: {0}")]
    MissingDictionaryEntry(String),

    /// Invalid dictionary value
    #[error("Invalid dictionary value for key {key}: {message}")]
    InvalidDictionaryValue {
        key: String,
        message: String,
    },

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for PDF engine operations
pub type PDFResult<T> = Result<T, PDFError>;

impl PDFError {
    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new end-of-input error
    pub fn eof(context: impl Into<String>) -> Self {
        Self::UnexpectedEof(context.into())
    }

    /// Create a new corrupt cross reference error
    pub fn xref(msg: impl Into<String>) -> Self {
        Self::XRefCorrupt(msg.into())
    }

    /// Create a new cipher initialization error
    pub fn crypto_init(msg: impl Into<String>) -> Self {
        Self::CryptoInit(msg.into())
    }

    /// Create a new page reorder error
    pub fn reorder(msg: impl Into<String>) -> Self {
        Self::Reorder(msg.into())
    }

    /// Create a new API misuse error
    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::ApiMisuse(msg.into())
    }

    /// Create a new invalid dictionary value error
    pub fn invalid_dict_value(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidDictionaryValue {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Check if error is authentication related
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Check if error is cryptographic
    pub fn is_crypto_error(&self) -> bool {
        matches!(self,
            Self::CryptoInit(_) |
            Self::AuthenticationFailed |
            Self::UnsupportedRevision(_) |
            Self::UnsupportedSecurityHandler(_)
        )
    }

    /// Check if error is related to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(self,
            Self::Parse(_) |
            Self::UnexpectedEof(_) |
            Self::XRefCorrupt(_) |
            Self::InvalidObjectType { .. } |
            Self::MissingDictionaryEntry(_) |
            Self::InvalidDictionaryValue { .. }
        )
    }

    /// Errors the reader recovers from by rebuilding or returning null
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            Self::Parse(_) |
            Self::UnexpectedEof(_) |
            Self::XRefCorrupt(_) |
            Self::InvalidObjectType { .. }
        )
    }
}

impl From<aes::cipher::InvalidLength> for PDFError {
    fn from(err: aes::cipher::InvalidLength) -> Self {
        Self::CryptoInit(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PDFError::parse("bad number");
        assert!(matches!(err, PDFError::Parse(_)));

        let err = PDFError::crypto_init("key too short");
        assert!(matches!(err, PDFError::CryptoInit(_)));

        let err = PDFError::reorder("duplicate page 2");
        assert!(matches!(err, PDFError::Reorder(_)));
    }

    #[test]
    fn test_error_categorization() {
        let auth_err = PDFError::AuthenticationFailed;
        assert!(auth_err.is_auth_error());
        assert!(auth_err.is_crypto_error());
        assert!(!auth_err.is_structure_error());

        let xref_err = PDFError::xref("missing startxref");
        assert!(xref_err.is_structure_error());
        assert!(xref_err.is_recoverable());
        assert!(!xref_err.is_crypto_error());

        assert!(!PDFError::reorder("x").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = PDFError::UnsupportedFilter("DCTDecode".to_string());
        assert_eq!(err.to_string(), "Unsupported filter: DCTDecode");

        let err = PDFError::InvalidDictionaryValue {
            key: "W".to_string(),
            message: "expected three widths".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid dictionary value for key W: expected three widths"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let pdf_err: PDFError = io_err.into();
        assert!(matches!(pdf_err, PDFError::Io(_)));
    }
}
