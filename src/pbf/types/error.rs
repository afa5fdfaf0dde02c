//! Error types for the pbf-reader crate.

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum PbfError {
    /// An error originating from I/O operations on the underlying source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a framed blob.
    #[error("truncated input while reading {context}")]
    Truncated { context: &'static str },

    /// The input is structurally invalid: a protobuf message failed to
    /// decode, a declared size did not match, or a payload is unrecognized.
    #[error("invalid format: {0}")]
    Format(String),

    /// The blob uses a compression scheme this reader does not handle.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(&'static str),

    /// The file requires a capability this reader does not implement,
    /// such as non-dense node groups or an unknown required header feature.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An index lookup matched no blob.
    #[error("not found in index")]
    NotFound,
}

impl From<prost::DecodeError> for PbfError {
    fn from(err: prost::DecodeError) -> Self {
        PbfError::Format(err.to_string())
    }
}

/// A convenience `Result` type alias using the crate's [`PbfError`] type.
pub type Result<T> = std::result::Result<T, PbfError>;
