//! Error types for binject-pack.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using binject-pack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during injection, extraction, or repacking.
#[derive(Error, Debug)]
pub enum Error {
    /// A null or malformed parameter from the caller.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// Not a recognized executable image.
    #[error("invalid executable format: {0}")]
    InvalidFormat(String),

    /// Recognized format, but an architecture variant this tool does not mutate.
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// SIP-protected path or an underlying OS denial.
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        /// Path that was rejected.
        path: PathBuf,
    },

    /// A read/verify target section is absent or empty.
    #[error("section not found: {0}")]
    SectionNotFound(String),

    /// Any failure after mutation begins; the temporary file has been unlinked.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Codec failure or metadata corruption in a SMOL stub.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A config string exceeds its fixed slot.
    #[error("{field} exceeds {max} bytes (got {len})")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Maximum payload size for the slot.
        max: usize,
        /// Actual byte length supplied.
        len: usize,
    },

    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid-argument error with a message.
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create an invalid-format error with a message.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a permission-denied error for a path.
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    /// Create a section-not-found error with the section name.
    pub fn section_not_found(name: impl Into<String>) -> Self {
        Self::SectionNotFound(name.into())
    }

    /// Create a write-failed error with a message.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create a decompression error with a message.
    pub fn decompress(msg: impl Into<String>) -> Self {
        Self::Decompress(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages should carry the context a caller needs to act on them.

    #[test]
    fn test_section_not_found_includes_name() {
        let err = Error::section_not_found("__NODE_SEA_BLOB");
        assert!(err.to_string().contains("__NODE_SEA_BLOB"));
    }

    #[test]
    fn test_permission_denied_includes_path() {
        let err = Error::permission_denied("/usr/bin/node");
        assert!(err.to_string().contains("/usr/bin/node"));
    }

    #[test]
    fn test_too_long_includes_field_and_sizes() {
        let err = Error::TooLong {
            field: "url",
            max: 510,
            len: 600,
        };
        let msg = err.to_string();
        assert!(msg.contains("url"));
        assert!(msg.contains("510"));
        assert!(msg.contains("600"));
    }

    #[test]
    fn test_invalid_format_includes_reason() {
        let err = Error::invalid_format("32-bit Mach-O is not supported");
        assert!(err.to_string().contains("32-bit"));
    }
}
