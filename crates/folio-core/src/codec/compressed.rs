//! Compressed scheme (`gz_`): gzip over UTF-8, base64url without padding.
//!
//! Suited for larger documents where the compact scheme's six bits per
//! output character stop paying off. The gzip trailer CRC rejects tampered
//! or truncated tokens.

use std::io::{Read, Write};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::error::{CodecError, CodecResult};
use super::CodecScheme;

/// Upper bound on decompressed size; guards against decompression bombs in links.
pub const MAX_DECOMPRESSED_BYTES: usize = 8 * 1024 * 1024;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Default, Clone, Copy)]
pub struct CompressedScheme;

impl CodecScheme for CompressedScheme {
    fn prefix(&self) -> &'static str {
        "gz_"
    }

    fn encode(&self, text: &str) -> CodecResult<String> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(text.as_bytes())?;
        let bytes = encoder.finish()?;
        Ok(URL_SAFE_LENIENT.encode(bytes))
    }

    fn decode(&self, token: &str) -> CodecResult<String> {
        let compressed = URL_SAFE_LENIENT.decode(token.trim())?;
        if compressed.is_empty() {
            return Err(CodecError::Truncated);
        }

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .take(MAX_DECOMPRESSED_BYTES as u64 + 1)
            .read_to_end(&mut decoded)?;
        if decoded.len() > MAX_DECOMPRESSED_BYTES {
            return Err(CodecError::TooLarge {
                limit: MAX_DECOMPRESSED_BYTES,
            });
        }

        String::from_utf8(decoded).map_err(|e| CodecError::InvalidText(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_document_source() {
        let src = r#"const styles = StyleSheet.create({ page: { backgroundColor: '#E4E4E4' } });
export default () => (<Document><Page style={styles.page}><Text>Résumé ✓</Text></Page></Document>);"#;
        let scheme = CompressedScheme;
        let token = scheme.encode(src).unwrap();
        assert_eq!(scheme.decode(&token).unwrap(), src);
    }

    #[test]
    fn empty_text_roundtrips() {
        let scheme = CompressedScheme;
        let token = scheme.encode("").unwrap();
        assert!(!token.is_empty());
        assert_eq!(scheme.decode(&token).unwrap(), "");
    }

    #[test]
    fn token_is_url_safe() {
        let token = CompressedScheme.encode(&"?&=#/+ ".repeat(64)).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn padded_tokens_still_decode() {
        let scheme = CompressedScheme;
        let token = scheme.encode("pad me").unwrap();
        let padded = format!("{token}{}", "=".repeat((4 - token.len() % 4) % 4));
        assert_eq!(scheme.decode(&padded).unwrap(), "pad me");
    }

    #[test]
    fn corrupted_payload_fails_integrity_check() {
        let scheme = CompressedScheme;
        let token = scheme.encode("integrity matters here").unwrap();
        let mut bytes = URL_SAFE_LENIENT.decode(&token).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let tampered = URL_SAFE_LENIENT.encode(bytes);
        assert!(scheme.decode(&tampered).is_err());
    }

    #[test]
    fn non_base64_input_is_rejected() {
        match CompressedScheme.decode("not*base64!") {
            Err(CodecError::Base64(_)) => {}
            other => panic!("expected Base64 error, got {:?}", other),
        }
    }
}
