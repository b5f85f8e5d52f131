//! Session codec: reversible text ↔ token transforms for shareable links.
//!
//! Two schemes live side by side so that links minted under either keep
//! decoding. Each token (or query-parameter key) carries a short prefix that
//! selects the scheme:
//!
//! - [`compact`]: `cp_`, LZ dictionary coding into a URI-safe alphabet
//! - [`compressed`]: `gz_`, gzip + base64url
//! - [`error`]: `CodecError` / `CodecResult`

pub mod compact;
pub mod compressed;
pub mod error;

use serde::{Deserialize, Serialize};

pub use compact::CompactScheme;
pub use compressed::CompressedScheme;
pub use error::{CodecError, CodecResult};

/// A reversible text encoding suitable for URL query components.
pub trait CodecScheme: Send + Sync {
    /// Prefix tagging tokens (and link parameter keys) of this scheme.
    fn prefix(&self) -> &'static str;

    fn encode(&self, text: &str) -> CodecResult<String>;

    fn decode(&self, token: &str) -> CodecResult<String>;
}

/// The schemes known to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Short snippets.
    Compact,
    /// General-purpose, larger code.
    Compressed,
}

impl Scheme {
    pub const ALL: [Scheme; 2] = [Scheme::Compact, Scheme::Compressed];

    pub fn codec(self) -> &'static dyn CodecScheme {
        match self {
            Scheme::Compact => &CompactScheme,
            Scheme::Compressed => &CompressedScheme,
        }
    }

    pub fn prefix(self) -> &'static str {
        self.codec().prefix()
    }

    /// Split a prefixed string into its scheme and remainder.
    pub fn strip(tagged: &str) -> Option<(Scheme, &str)> {
        Scheme::ALL.into_iter().find_map(|scheme| {
            tagged
                .strip_prefix(scheme.prefix())
                .map(|rest| (scheme, rest))
        })
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Compact => write!(f, "compact"),
            Scheme::Compressed => write!(f, "compressed"),
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" | "cp" => Ok(Scheme::Compact),
            "compressed" | "gz" => Ok(Scheme::Compressed),
            other => Err(CodecError::UnknownScheme(other.to_string())),
        }
    }
}

/// Encode `text` as a scheme-tagged token, e.g. `gz_H4sI…`.
pub fn encode_token(scheme: Scheme, text: &str) -> CodecResult<String> {
    let body = scheme.codec().encode(text)?;
    Ok(format!("{}{}", scheme.prefix(), body))
}

/// Decode a scheme-tagged token, selecting the scheme from its prefix.
pub fn decode_token(token: &str) -> CodecResult<String> {
    let (scheme, body) =
        Scheme::strip(token).ok_or_else(|| CodecError::UnknownScheme(token.to_string()))?;
    scheme.codec().decode(body)
}
