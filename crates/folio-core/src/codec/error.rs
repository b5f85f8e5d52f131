//! Error types for the session codec.

/// Errors produced while decoding a session token.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown session token scheme: {0:?}")]
    UnknownScheme(String),

    #[error("invalid character {ch:?} at offset {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("token ended before the end-of-stream marker")]
    Truncated,

    #[error("unexpected data after the end-of-stream marker (offset {offset})")]
    TrailingData { offset: usize },

    #[error("corrupt back-reference {code} (dictionary size {dict_size})")]
    CorruptReference { code: u32, dict_size: u32 },

    #[error("decoded text is not valid unicode: {0}")]
    InvalidText(String),

    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
