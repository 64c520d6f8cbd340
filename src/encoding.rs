//! Text encoding detection for tabular input.
//!
//! Detection is layered and stops at the first layer that yields a clean decode:
//!
//! 1. byte-order mark
//! 2. statistics: zero-byte distribution (UTF-16 without BOM), then `chardetng`
//! 3. trial decoding against a fixed, ordered candidate list
//!
//! A candidate is only accepted when it decodes the *whole* input without a
//! single malformed sequence.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use tracing::debug;

use crate::error::{AutogenError, Result};

/// Trial candidates, in order. UTF-16 candidates are only tried when the byte
/// layout looks like UTF-16 (see `utf16_layout`). windows-1252 maps every byte,
/// so it is the last resort and nothing after it could ever be reached.
const TRIAL_ENCODINGS: &[&Encoding] = &[UTF_8, UTF_16LE, UTF_16BE, WINDOWS_1252];

/// Minimum share of code units with a zero byte in the same half to call it UTF-16.
const UTF16_ZERO_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Explicit,
    ByteOrderMark,
    Statistical,
    Trial,
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static Encoding,
    pub method: DetectionMethod,
}

/// Decode `bytes` with a forced encoding label.
pub fn decode_with_label(bytes: &[u8], label: &str) -> Result<Decoded> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| AutogenError::configuration(format!("unknown encoding '{}'", label)))?;

    let (body, encoding) = match Encoding::for_bom(bytes) {
        Some((bom_encoding, len)) if bom_encoding == encoding => (&bytes[len..], encoding),
        _ => (bytes, encoding),
    };

    let text = strict_decode(body, encoding).ok_or_else(|| {
        AutogenError::data_format(format!(
            "input is not valid {} (malformed byte sequence)",
            encoding.name()
        ))
    })?;

    Ok(Decoded {
        text,
        encoding,
        method: DetectionMethod::Explicit,
    })
}

/// Detect the encoding of `bytes` and decode them.
pub fn detect_and_decode(bytes: &[u8]) -> Result<Decoded> {
    // Layer 1: BOM
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        debug!("encoding: byte-order mark says {}", encoding.name());
        if let Some(text) = strict_decode(&bytes[bom_len..], encoding) {
            return Ok(Decoded {
                text,
                encoding,
                method: DetectionMethod::ByteOrderMark,
            });
        }
        return Err(AutogenError::data_format(format!(
            "byte-order mark announces {} but the content does not decode",
            encoding.name()
        )));
    }

    // Layer 2: statistics
    if let Some(encoding) = utf16_layout(bytes) {
        if let Some(text) = strict_decode(bytes, encoding) {
            debug!("encoding: zero-byte layout says {}", encoding.name());
            return Ok(Decoded {
                text,
                encoding,
                method: DetectionMethod::Statistical,
            });
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    if let Some(text) = strict_decode(bytes, guessed) {
        debug!("encoding: statistical detection says {}", guessed.name());
        return Ok(Decoded {
            text,
            encoding: guessed,
            method: DetectionMethod::Statistical,
        });
    }

    // Layer 3: trial decoding
    let utf16 = utf16_layout(bytes);
    for &candidate in TRIAL_ENCODINGS {
        let is_utf16 = candidate == UTF_16LE || candidate == UTF_16BE;
        if is_utf16 && utf16 != Some(candidate) {
            continue;
        }
        if let Some(text) = strict_decode(bytes, candidate) {
            debug!("encoding: trial decode accepted {}", candidate.name());
            return Ok(Decoded {
                text,
                encoding: candidate,
                method: DetectionMethod::Trial,
            });
        }
    }

    Err(AutogenError::data_format(
        "could not determine the text encoding of the input file",
    ))
}

fn strict_decode(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let text = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
    if text.contains('\u{0}') {
        return None;
    }
    Some(text.into_owned())
}

/// Guess UTF-16 endianness from where the zero bytes sit. ASCII-heavy UTF-16
/// text has a zero in the high byte of most code units.
fn utf16_layout(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.len() < 4 || bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.len() / 2;
    let mut zero_even = 0usize;
    let mut zero_odd = 0usize;
    for pair in bytes.chunks_exact(2) {
        if pair[0] == 0 {
            zero_even += 1;
        }
        if pair[1] == 0 {
            zero_odd += 1;
        }
    }
    let ratio = |n: usize| n as f64 / units as f64;
    if ratio(zero_odd) >= UTF16_ZERO_RATIO && zero_odd > zero_even {
        Some(UTF_16LE)
    } else if ratio(zero_even) >= UTF16_ZERO_RATIO && zero_even > zero_odd {
        Some(UTF_16BE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if bom {
            out.extend_from_slice(&[0xFF, 0xFE]);
        }
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_plain_utf8() {
        let decoded = detect_and_decode("name,city\nZoë,Köln\n".as_bytes()).unwrap();
        assert_eq!(decoded.encoding, UTF_8);
        assert!(decoded.text.contains("Zoë"));
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"name\nAda\n");
        let decoded = detect_and_decode(&bytes).unwrap();
        assert_eq!(decoded.method, DetectionMethod::ByteOrderMark);
        assert!(decoded.text.starts_with("name"));
    }

    #[test]
    fn test_utf16_with_and_without_bom() {
        let with_bom = detect_and_decode(&utf16le("name\nAda\n", true)).unwrap();
        assert_eq!(with_bom.encoding, UTF_16LE);
        assert_eq!(with_bom.text, "name\nAda\n");

        let without_bom = detect_and_decode(&utf16le("name\nAda\n", false)).unwrap();
        assert_eq!(without_bom.encoding, UTF_16LE);
        assert_eq!(without_bom.method, DetectionMethod::Statistical);
        assert_eq!(without_bom.text, "name\nAda\n");
    }

    #[test]
    fn test_windows_1252_bytes() {
        // "Café,Straße" in windows-1252
        let bytes = b"name,street\nCaf\xE9,Stra\xDFe\n";
        let decoded = detect_and_decode(bytes).unwrap();
        assert_ne!(decoded.encoding, UTF_8);
        assert!(decoded.text.starts_with("name,street\nCaf"));
        assert_eq!(decoded.text.lines().count(), 2);
    }

    #[test]
    fn test_explicit_label_rejects_malformed() {
        let err = decode_with_label(b"Caf\xE9", "utf-8").unwrap_err();
        assert!(matches!(err, AutogenError::DataFormat(_)));
        let ok = decode_with_label(b"Caf\xE9", "latin1").unwrap();
        assert_eq!(ok.text, "Café");
    }

    #[test]
    fn test_trial_list_ends_at_single_byte_fallback() {
        let every_byte: Vec<u8> = (1..=255).collect();
        assert!(strict_decode(&every_byte, WINDOWS_1252).is_some());
        assert_eq!(TRIAL_ENCODINGS.last(), Some(&WINDOWS_1252));
    }
}
