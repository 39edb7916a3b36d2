//! Canonical text normalization and codec detection (§4.1).
//!
//! `decode` turns caller-supplied bytes into a `String`, autodetecting the
//! source encoding when the caller doesn't pin one; `normalize` then applies
//! the one-time, idempotent text transform every downstream offset is
//! relative to.

use encoding_rs::{Encoding, MACINTOSH, UTF_16BE, UTF_16LE, WINDOWS_1252};

/// A caller-supplied or autodetected codec for raw ingest bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Cp1252,
    MacRoman,
    Latin1,
}

/// Decode raw bytes to a `String`, using `codec` if given, else autodetecting.
///
/// Detection order: BOM sniffing (UTF-8, UTF-16 LE/BE, UTF-32 LE/BE), then a
/// NUL-ratio heuristic for unmarked UTF-16/32, then a fallback chain
/// (UTF-8 -> CP1252 -> MacRoman -> Latin-1), with lossy UTF-8 as the last
/// resort.
pub fn decode(bytes: &[u8], codec: Option<Codec>) -> String {
    if let Some(codec) = codec {
        return decode_with(bytes, codec);
    }

    if let Some(codec) = sniff_bom(bytes) {
        return decode_with(bytes, codec);
    }

    if let Some(codec) = sniff_nul_ratio(bytes) {
        return decode_with(bytes, codec);
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    for enc in [WINDOWS_1252, MACINTOSH] {
        let (cow, _, had_errors) = enc.decode(bytes);
        if !had_errors {
            return cow.into_owned();
        }
    }
    // Latin-1 never produces decode errors (every byte maps to a code point).
    let (cow, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    let _ = cow; // fall through to lossy UTF-8 below, matching the spec's
                 // documented "last resort: lossy UTF-8" behavior.
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_with(bytes: &[u8], codec: Codec) -> String {
    match codec {
        Codec::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Codec::Utf16Le => UTF_16LE.decode(bytes).0.into_owned(),
        Codec::Utf16Be => UTF_16BE.decode(bytes).0.into_owned(),
        Codec::Utf32Le => decode_utf32(bytes, false),
        Codec::Utf32Be => decode_utf32(bytes, true),
        Codec::Cp1252 => WINDOWS_1252.decode(bytes).0.into_owned(),
        Codec::MacRoman => MACINTOSH.decode(bytes).0.into_owned(),
        Codec::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn decode_utf32(bytes: &[u8], big_endian: bool) -> String {
    let mut out = String::new();
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk.try_into().unwrap();
        let cp = if big_endian {
            u32::from_be_bytes(arr)
        } else {
            u32::from_le_bytes(arr)
        };
        if let Some(c) = char::from_u32(cp) {
            out.push(c);
        }
    }
    out
}

fn sniff_bom(bytes: &[u8]) -> Option<Codec> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(Codec::Utf8);
    }
    if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        return Some(Codec::Utf32Le);
    }
    if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        return Some(Codec::Utf32Be);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some(Codec::Utf16Le);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(Codec::Utf16Be);
    }
    None
}

/// Guess UTF-16/32 for unmarked text by counting NUL bytes at even/every-4th
/// offsets, which dominate ASCII-range UTF-16/32 text but never appear in
/// plain UTF-8 prose.
fn sniff_nul_ratio(bytes: &[u8]) -> Option<Codec> {
    if bytes.len() < 8 {
        return None;
    }
    let sample = &bytes[..bytes.len().min(4096)];
    let nul_count = sample.iter().filter(|&&b| b == 0).count();
    let ratio = nul_count as f64 / sample.len() as f64;
    if ratio < 0.2 {
        return None;
    }
    let even_nuls = sample.iter().step_by(2).filter(|&&b| b == 0).count();
    let odd_nuls = sample.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    if odd_nuls > even_nuls * 2 {
        Some(Codec::Utf16Le)
    } else {
        Some(Codec::Utf16Be)
    }
}

/// Apply the one-time normalization every downstream offset is relative to:
/// CRLF -> LF, strip trailing spaces before a newline, collapse 3+ blank
/// lines to 2.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let trimmed_lines: Vec<&str> = unified
        .split('\n')
        .map(|line| line.trim_end_matches(' '))
        .collect();
    let trailing_stripped = trimmed_lines.join("\n");

    collapse_blank_lines(&trailing_stripped)
}

fn collapse_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut blank_run = 0usize;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out.push(line);
            }
        } else {
            blank_run = 0;
            out.push(line);
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(normalize("a\r\nb\r\n"), "a\nb\n");
    }

    #[test]
    fn trailing_spaces_stripped() {
        assert_eq!(normalize("hello   \nworld"), "hello\nworld");
    }

    #[test]
    fn three_blank_lines_collapse_to_two() {
        let input = "a\n\n\n\nb";
        assert_eq!(normalize(input), "a\n\n\nb");
    }

    #[test]
    fn two_blank_lines_preserved() {
        let input = "a\n\n\nb";
        assert_eq!(normalize(input), "a\n\n\nb");
    }

    #[test]
    fn utf8_bom_detected_and_stripped_of_meaning() {
        let bytes = [0xEF, 0xBB, 0xBF, b'h', b'i'];
        let s = decode(&bytes, None);
        assert!(s.ends_with("hi"));
    }

    #[test]
    fn explicit_codec_overrides_detection() {
        let bytes = b"plain ascii";
        let s = decode(bytes, Some(Codec::Utf8));
        assert_eq!(s, "plain ascii");
    }

    #[test]
    fn invalid_utf8_falls_back_to_lossy() {
        let bytes = vec![0xFF, 0xFE, 0xFD]; // not a valid BOM+payload, not valid UTF-8
        let s = decode(&bytes, None);
        assert!(!s.is_empty());
    }
}
