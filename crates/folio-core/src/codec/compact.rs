//! Compact scheme (`cp_`): LZ-style dictionary coding over UTF-16 code units,
//! packed six bits per character into a URI-component-safe alphabet.
//!
//! The bit layout matches the `compressToEncodedURIComponent` format used by
//! existing playground links, so tokens minted elsewhere decode here.

use std::collections::{HashMap, HashSet};

use super::error::{CodecError, CodecResult};
use super::CodecScheme;

const ALPHABET: &[u8; 65] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-$";
const BITS_PER_CHAR: u32 = 6;

/// Marker codes shared by encoder and decoder.
const CODE_CHAR8: u32 = 0;
const CODE_CHAR16: u32 = 1;
const CODE_END: u32 = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactScheme;

impl CodecScheme for CompactScheme {
    fn prefix(&self) -> &'static str {
        "cp_"
    }

    fn encode(&self, text: &str) -> CodecResult<String> {
        Ok(compress(text))
    }

    fn decode(&self, token: &str) -> CodecResult<String> {
        decompress(token)
    }
}

/// Accumulates bits LSB-first per value and emits one alphabet char per six bits.
struct BitWriter {
    out: String,
    val: u32,
    position: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            val: 0,
            position: 0,
        }
    }

    fn write(&mut self, num_bits: u32, mut value: u32) {
        for _ in 0..num_bits {
            self.val = (self.val << 1) | (value & 1);
            value >>= 1;
            if self.position == BITS_PER_CHAR - 1 {
                self.position = 0;
                self.out.push(ALPHABET[self.val as usize] as char);
                self.val = 0;
            } else {
                self.position += 1;
            }
        }
    }

    fn finish(mut self) -> String {
        loop {
            self.val <<= 1;
            if self.position == BITS_PER_CHAR - 1 {
                self.out.push(ALPHABET[self.val as usize] as char);
                break;
            }
            self.position += 1;
        }
        self.out
    }
}

struct Encoder {
    bits: BitWriter,
    dictionary: HashMap<Vec<u16>, u32>,
    pending_literals: HashSet<Vec<u16>>,
    dict_size: u32,
    num_bits: u32,
    enlarge_in: u32,
}

impl Encoder {
    fn tick(&mut self) {
        self.enlarge_in -= 1;
        if self.enlarge_in == 0 {
            self.enlarge_in = 1 << self.num_bits;
            self.num_bits += 1;
        }
    }

    /// Emit the phrase `w`, either as a fresh literal or a dictionary reference.
    fn emit(&mut self, w: &[u16]) {
        if self.pending_literals.remove(w) {
            let unit = u32::from(w[0]);
            if unit < 256 {
                self.bits.write(self.num_bits, CODE_CHAR8);
                self.bits.write(8, unit);
            } else {
                self.bits.write(self.num_bits, CODE_CHAR16);
                self.bits.write(16, unit);
            }
            self.tick();
        } else {
            let code = self.dictionary[w];
            self.bits.write(self.num_bits, code);
        }
        self.tick();
    }
}

/// Compress `text` into a compact token body.
pub fn compress(text: &str) -> String {
    let mut enc = Encoder {
        bits: BitWriter::new(),
        dictionary: HashMap::new(),
        pending_literals: HashSet::new(),
        dict_size: 3,
        num_bits: 2,
        enlarge_in: 2,
    };

    let mut w: Vec<u16> = Vec::new();
    for unit in text.encode_utf16() {
        let c = vec![unit];
        if !enc.dictionary.contains_key(&c) {
            enc.dictionary.insert(c.clone(), enc.dict_size);
            enc.dict_size += 1;
            enc.pending_literals.insert(c.clone());
        }

        let mut wc = w.clone();
        wc.push(unit);
        if enc.dictionary.contains_key(&wc) {
            w = wc;
        } else {
            enc.emit(&w);
            enc.dictionary.insert(wc, enc.dict_size);
            enc.dict_size += 1;
            w = c;
        }
    }

    if !w.is_empty() {
        enc.emit(&w);
    }

    enc.bits.write(enc.num_bits, CODE_END);
    enc.bits.finish()
}

struct BitReader {
    values: Vec<u32>,
    val: u32,
    position: u32,
    index: usize,
}

impl BitReader {
    fn new(values: Vec<u32>) -> Self {
        let val = values.first().copied().unwrap_or(0);
        Self {
            values,
            val,
            position: 1 << (BITS_PER_CHAR - 1),
            index: 1,
        }
    }

    fn exhausted(&self) -> bool {
        self.index > self.values.len()
    }

    /// The last code read ended the stream: nothing but zero padding is left.
    /// When the marker fills its character exactly, the encoder appends one
    /// all-zero character, which the reader has already loaded.
    fn at_clean_end(&self) -> bool {
        let padding = (self.position << 1) - 1;
        self.index == self.values.len() && self.val & padding == 0
    }

    /// Offset of the character holding the next unread bit.
    fn offset(&self) -> usize {
        self.index - 1
    }

    fn read(&mut self, num_bits: u32) -> u32 {
        let mut bits = 0;
        for shift in 0..num_bits {
            let bit = self.val & self.position;
            self.position >>= 1;
            if self.position == 0 {
                self.position = 1 << (BITS_PER_CHAR - 1);
                self.val = self.values.get(self.index).copied().unwrap_or(0);
                self.index += 1;
            }
            if bit > 0 {
                bits |= 1 << shift;
            }
        }
        bits
    }
}

fn alphabet_value(ch: char, offset: usize) -> CodecResult<u32> {
    // '+' arrives as ' ' once a query string has been form-decoded.
    let ch = if ch == ' ' { '+' } else { ch };
    ALPHABET
        .iter()
        .position(|&b| b as char == ch)
        .map(|p| p as u32)
        .ok_or(CodecError::InvalidCharacter { ch, offset })
}

fn utf16_to_string(units: &[u16]) -> CodecResult<String> {
    String::from_utf16(units).map_err(|e| CodecError::InvalidText(e.to_string()))
}

fn finish(reader: &BitReader, units: &[u16]) -> CodecResult<String> {
    if !reader.at_clean_end() {
        return Err(CodecError::TrailingData {
            offset: reader.offset(),
        });
    }
    utf16_to_string(units)
}

/// Decompress a compact token body back into text.
pub fn decompress(token: &str) -> CodecResult<String> {
    if token.is_empty() {
        return Err(CodecError::Truncated);
    }
    let values = token
        .chars()
        .enumerate()
        .map(|(offset, ch)| alphabet_value(ch, offset))
        .collect::<CodecResult<Vec<_>>>()?;

    let mut reader = BitReader::new(values);
    let mut dictionary: Vec<Vec<u16>> = vec![Vec::new(), Vec::new(), Vec::new()];
    let mut num_bits = 3;
    let mut enlarge_in: u32 = 4;

    let first = match reader.read(2) {
        CODE_CHAR8 => vec![reader.read(8) as u16],
        CODE_CHAR16 => vec![reader.read(16) as u16],
        CODE_END => return finish(&reader, &[]),
        code => return Err(CodecError::CorruptReference { code, dict_size: 3 }),
    };
    dictionary.push(first.clone());
    let mut w = first;
    let mut result = w.clone();

    loop {
        if reader.exhausted() {
            return Err(CodecError::Truncated);
        }

        let mut code = reader.read(num_bits);
        match code {
            CODE_CHAR8 | CODE_CHAR16 => {
                let width = if code == CODE_CHAR8 { 8 } else { 16 };
                let unit = reader.read(width) as u16;
                dictionary.push(vec![unit]);
                code = dictionary.len() as u32 - 1;
                enlarge_in -= 1;
            }
            CODE_END => return finish(&reader, &result),
            _ => {}
        }

        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }

        let dict_size = dictionary.len() as u32;
        let entry = if code < dict_size {
            dictionary[code as usize].clone()
        } else if code == dict_size {
            let mut entry = w.clone();
            entry.push(w[0]);
            entry
        } else {
            return Err(CodecError::CorruptReference { code, dict_size });
        };

        result.extend_from_slice(&entry);

        let mut phrase = w;
        phrase.push(entry[0]);
        dictionary.push(phrase);
        enlarge_in -= 1;
        w = entry;

        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_encodes_to_single_char() {
        assert_eq!(compress(""), "Q");
        assert_eq!(decompress("Q").unwrap(), "");
    }

    #[test]
    fn junk_after_end_marker_is_rejected() {
        assert!(matches!(
            decompress("QQQQQQ"),
            Err(CodecError::TrailingData { .. })
        ));
        // End marker first, then non-zero padding bits in the same character.
        assert!(matches!(
            decompress("Zzzzzzzz"),
            Err(CodecError::TrailingData { .. })
        ));
        let mut token = compress("hello hello hello");
        token.push('A');
        assert!(decompress(&token).is_err());
    }

    #[test]
    fn reserved_first_code_is_rejected() {
        // 0b110000: first two bits read LSB-first give 3.
        assert!(matches!(
            decompress("w"),
            Err(CodecError::CorruptReference { code: 3, .. })
        ));
    }

    #[test]
    fn marker_on_character_boundary_needs_zero_filler() {
        for len in 0..64 {
            let src = "ab".repeat(len);
            let token = compress(&src);
            assert_eq!(decompress(&token).unwrap(), src, "length {len}");
            if token.ends_with('A') && token.len() > 1 {
                let mut bad = token.clone();
                bad.pop();
                bad.push('B');
                assert!(decompress(&bad).is_err(), "length {len}");
            }
        }
    }

    #[test]
    fn matches_reference_encoding() {
        // Reference values from the JavaScript implementation of the format.
        assert_eq!(compress("a"), "IZA");
        assert_eq!(compress("hello hello hello"), "BYUwNmD2AEoTcpA");
        assert_eq!(decompress("BYUwNmD2AEoTcpA").unwrap(), "hello hello hello");
        assert_eq!(
            decompress("FoH4TglgxgFgBIFAI6EdzQNXJ0DwbhI-cLwbgRnbgDsBDAe4DcBTIA").unwrap(),
            "Zürich — 東京 🎉📄 naïve"
        );
    }

    #[test]
    fn roundtrip_repetitive_source() {
        let src = "<Page><Text>hello</Text><Text>hello</Text><Text>hello</Text></Page>\n".repeat(20);
        let token = compress(&src);
        assert!(token.len() < src.len());
        assert_eq!(decompress(&token).unwrap(), src);
    }

    #[test]
    fn roundtrip_astral_and_accented_text() {
        let src = "Zürich — 東京 🎉📄 naïve";
        assert_eq!(decompress(&compress(src)).unwrap(), src);
    }

    #[test]
    fn token_uses_uri_safe_alphabet() {
        let token = compress("const a = { b: 'ç', c: \"&?=#\" };");
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '$'));
    }

    #[test]
    fn form_decoded_plus_is_accepted() {
        let src = "some source that may produce a plus sign ~~~~ ????";
        let token = compress(src);
        let mangled = token.replace('+', " ");
        assert_eq!(decompress(&mangled).unwrap(), src);
    }

    #[test]
    fn invalid_character_is_rejected() {
        match decompress("IY*Q") {
            Err(CodecError::InvalidCharacter { ch: '*', offset: 2 }) => {}
            other => panic!("expected InvalidCharacter, got {:?}", other),
        }
    }

    #[test]
    fn truncated_token_is_rejected() {
        let token = compress(&"lorem ipsum dolor sit amet ".repeat(10));
        let cut = &token[..token.len() / 2];
        assert!(decompress(cut).is_err());
    }
}
