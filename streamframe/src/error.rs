/*!
Common error types for the stream framing library.
*/

use thiserror::Error;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced to callers.
///
/// Marker mismatches in the byte stream are not errors; the decoder recovers
/// from them locally and only counts them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Invalid frame scheme, data type tag or endianness
    #[error("Configuration error: {0}")]
    Config(String),

    /// Values that cannot be encoded under the active scheme
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),
}

impl StreamError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }
}
