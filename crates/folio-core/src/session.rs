//! Shareable session links.
//!
//! A link is the playground URL with the source code packed into a query
//! parameter. The parameter name carries the scheme: `gz_code` for links
//! created here, `cp_code` for older compact links. Any `cp_*`/`gz_*`
//! parameter is decoded into its unprefixed key.

use std::collections::BTreeMap;

use tracing::warn;
use url::Url;

use crate::catalog::QUICK_START;
use crate::codec::{CodecError, CodecResult, Scheme};

/// Source shown when a session starts without a usable link.
pub const DEFAULT_CODE: &str = QUICK_START;

const CODE_KEY: &str = "code";
const MODULES_KEY: &str = "modules";

/// Write `code` (and the `modules` flag when set) into `base`'s query,
/// replacing any session parameters already present.
pub fn create_link(base: &Url, code: &str, modules: bool) -> CodecResult<Url> {
    let token = Scheme::Compressed.codec().encode(code)?;
    let mut link = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| !is_session_key(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = link.query_pairs_mut();
        query.clear();
        query.extend_pairs(kept);
        query.append_pair(
            &format!("{}{CODE_KEY}", Scheme::Compressed.prefix()),
            &token,
        );
        if modules {
            query.append_pair(MODULES_KEY, "true");
        }
    }
    Ok(link)
}

fn is_session_key(key: &str) -> bool {
    let bare = Scheme::strip(key).map_or(key, |(_, rest)| rest);
    bare == CODE_KEY || key == MODULES_KEY
}

/// Decoded query parameters of a link.
#[derive(Debug, Default)]
pub struct SessionParams {
    values: BTreeMap<String, String>,
    failures: Vec<(String, CodecError)>,
}

/// What a session starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub code: String,
    pub modules: bool,
    /// Whether `code` came from the link rather than the default.
    pub from_link: bool,
}

/// Decode every parameter of `url`. Later duplicates win.
pub fn parse_link(url: &Url) -> SessionParams {
    parse_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
}

/// Same as [`parse_link`] for a bare query string (no leading `?`).
pub fn parse_query(query: &str) -> SessionParams {
    parse_pairs(
        url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned())),
    )
}

fn parse_pairs(pairs: impl Iterator<Item = (String, String)>) -> SessionParams {
    let mut params = SessionParams::default();
    for (key, value) in pairs {
        match Scheme::strip(&key) {
            Some((scheme, bare)) => match scheme.codec().decode(&value) {
                Ok(text) => {
                    params.values.insert(bare.to_string(), text);
                }
                Err(err) => {
                    warn!(param = %key, error = %err, "could not decode link parameter");
                    params.values.remove(bare);
                    params.failures.push((key, err));
                }
            },
            None => {
                params.values.insert(key, value);
            }
        }
    }
    params
}

impl SessionParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The decoded code, when the link carries one. Empty code counts.
    pub fn code(&self) -> Option<&str> {
        self.get(CODE_KEY)
    }

    /// Parameters that were present but failed to decode.
    pub fn failures(&self) -> &[(String, CodecError)] {
        &self.failures
    }

    /// Starting code and options. Without code in the link the default
    /// example runs. Modules follows the link only for non-empty code and is
    /// on otherwise.
    pub fn resolve(&self) -> ResolvedSession {
        match self.code() {
            Some(code) => ResolvedSession {
                code: code.to_string(),
                modules: code.is_empty()
                    || self.get(MODULES_KEY).is_some_and(|v| !v.is_empty()),
                from_link: true,
            },
            None => ResolvedSession {
                code: DEFAULT_CODE.to_string(),
                modules: true,
                from_link: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://playground.example/repl?theme=dark").unwrap()
    }

    #[test]
    fn test_link_roundtrip() {
        let code = "const d = <Document><Page /></Document>; // ünïcode 🎉";
        let link = create_link(&base(), code, true).unwrap();
        assert!(link.as_str().contains("gz_code="));
        assert!(link.as_str().contains("theme=dark"));

        let resolved = parse_link(&link).resolve();
        assert_eq!(resolved.code, code);
        assert!(resolved.modules);
        assert!(resolved.from_link);
    }

    #[test]
    fn test_modules_absent_means_off_when_code_present() {
        let link = create_link(&base(), "doc", false).unwrap();
        assert!(!link.as_str().contains("modules"));
        assert!(!parse_link(&link).resolve().modules);
    }

    #[test]
    fn test_no_code_uses_default_with_modules() {
        let resolved = parse_query("theme=dark").resolve();
        assert_eq!(resolved.code, DEFAULT_CODE);
        assert!(resolved.modules);
        assert!(!resolved.from_link);
    }

    #[test]
    fn test_empty_code_link_reopens_empty() {
        let link = create_link(&base(), "", false).unwrap();
        let resolved = parse_link(&link).resolve();
        assert_eq!(resolved.code, "");
        assert!(resolved.from_link);
        assert!(resolved.modules);
    }

    #[test]
    fn test_compact_links_still_open() {
        let body = Scheme::Compact.codec().encode("hello hello hello").unwrap();
        let params = parse_query(&format!("?cp_code={body}"));
        assert_eq!(params.code(), Some("hello hello hello"));
    }

    #[test]
    fn test_undecodable_code_falls_back() {
        let params = parse_query("gz_code=not-gzip&modules=true");
        assert_eq!(params.failures().len(), 1);
        let resolved = params.resolve();
        assert_eq!(resolved.code, DEFAULT_CODE);
        assert!(resolved.modules);
    }

    #[test]
    fn test_relinking_replaces_old_session_params() {
        let old = Url::parse("https://playground.example/?cp_code=BYUwNmD2AEoTcpA&modules=true")
            .unwrap();
        let link = create_link(&old, "new", false).unwrap();
        let params = parse_link(&link);
        assert!(params.get("modules").is_none());
        assert_eq!(params.code(), Some("new"));
        assert!(!link.as_str().contains("cp_code"));
    }
}
