//! Archive path normalization.
//!
//! Canonical in-memory form uses `/` separators; the on-disk index and the
//! `prefix` header use `\`. Cleaning is purely lexical and never touches the
//! filesystem. All operations are byte-level: paths are 8-bit byte strings
//! and non-ASCII bytes pass through untouched.

use crate::error::{Error, Result};
use crate::types::ByteString;

/// Normalize an archive/internal path to slash-separated form.
///
/// Trims whitespace, accepts both `/` and `\`, strips leading `./` and `/`,
/// resolves `.` and `..` segments lexically, and drops a trailing `/`.
/// Returns an empty string when nothing remains.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    // Byte-level normalization only rewrites ASCII, so UTF-8 input stays
    // valid and the lossy conversion is an identity here.
    String::from_utf8_lossy(&normalize_path_bytes(raw.as_bytes())).into_owned()
}

/// Normalize a PBO `prefix` header value to `\` separators.
#[must_use]
pub fn normalize_prefix_header(raw: &str) -> String {
    String::from_utf8_lossy(&normalize_prefix_header_bytes(raw.as_bytes())).into_owned()
}

/// Byte-level [`normalize_path`].
pub(crate) fn normalize_path_bytes(raw: &[u8]) -> Vec<u8> {
    let raw = trim_ascii(raw);
    let swapped: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'\\' { b'/' } else { b })
        .collect();

    let mut rest: &[u8] = &swapped;
    if let Some(stripped) = rest.strip_prefix(b"./") {
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_prefix(b"/") {
        rest = stripped;
    }

    let mut parts: Vec<&[u8]> = Vec::new();
    for part in rest.split(|&b| b == b'/') {
        match part {
            b"" | b"." => {}
            // Rooted clean: ".." above the top is discarded.
            b".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join(&b'/')
}

/// Byte-level [`normalize_prefix_header`].
pub(crate) fn normalize_prefix_header_bytes(raw: &[u8]) -> Vec<u8> {
    let mut normalized = normalize_path_bytes(raw);
    for b in &mut normalized {
        if *b == b'/' {
            *b = b'\\';
        }
    }

    normalized
}

/// Normalize a user/input path for rule matching: slashes only, no `./`.
pub(crate) fn normalize_for_matching(path: &str) -> String {
    let path = path.trim();
    let path = path.replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

/// Convert an input path to canonical archive form with `\` separators.
///
/// Fails when the path normalizes to nothing.
pub(crate) fn normalize_archive_entry_path(raw: &str) -> Result<String> {
    let normalized = normalize_archive_entry_path_bytes(raw.as_bytes())?;
    Ok(String::from_utf8_lossy(normalized.as_bytes()).into_owned())
}

/// Byte-level [`normalize_archive_entry_path`] used for parsed entry names.
pub(crate) fn normalize_archive_entry_path_bytes(raw: &[u8]) -> Result<ByteString> {
    let mut normalized = normalize_path_bytes(raw);
    if normalized.is_empty() {
        return Err(Error::InvalidEntryPath {
            path: String::from_utf8_lossy(raw).into_owned(),
        });
    }

    for b in &mut normalized {
        if *b == b'/' {
            *b = b'\\';
        }
    }

    Ok(ByteString::new(normalized))
}

/// Strip leading and trailing ASCII whitespace.
pub(crate) fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_cases() {
        let cases = [
            ("", ""),
            ("/", ""),
            ("metricz/scripts/5_Mission", "metricz/scripts/5_Mission"),
            (".\\metricz\\scripts\\5_Mission\\", "metricz/scripts/5_Mission"),
            ("./a/../b//c.txt", "b/c.txt"),
            ("../evil.txt", "evil.txt"),
            ("  spaced/name.txt  ", "spaced/name.txt"),
        ];

        for (input, want) in cases {
            assert_eq!(normalize_path(input), want, "input {input:?}");
        }
    }

    #[test]
    fn normalize_path_bytes_preserves_non_ascii() {
        let raw = [b'.', b'/', b'd', 0xe9, b'p', b'\\', b'f', 0xff, b'.', b'c'];
        let got = normalize_path_bytes(&raw);
        assert_eq!(got, [b'd', 0xe9, b'p', b'/', b'f', 0xff, b'.', b'c']);
    }

    #[test]
    fn normalize_prefix_header_cases() {
        let cases = [
            ("", ""),
            ("metricz/scripts/5_Mission", "metricz\\scripts\\5_Mission"),
            ("metricz\\scripts\\5_Mission\\", "metricz\\scripts\\5_Mission"),
            ("./a/../b/c", "b\\c"),
        ];

        for (input, want) in cases {
            assert_eq!(normalize_prefix_header(input), want, "input {input:?}");
        }
    }

    #[test]
    fn archive_entry_path_uses_backslashes() {
        let got = normalize_archive_entry_path(".\\metricz/scripts\\5_Mission\\config.cpp").unwrap();
        assert_eq!(got, "metricz\\scripts\\5_Mission\\config.cpp");
    }

    #[test]
    fn archive_entry_path_bytes_keeps_raw_bytes() {
        let raw = [b'd', b'i', b'r', b'/', 0xe9, b'.', b'c'];
        let got = normalize_archive_entry_path_bytes(&raw).unwrap();
        assert_eq!(got.as_bytes(), [b'd', b'i', b'r', b'\\', 0xe9, b'.', b'c']);
    }

    #[test]
    fn archive_entry_path_rejects_empty() {
        assert!(matches!(
            normalize_archive_entry_path("/"),
            Err(Error::InvalidEntryPath { .. })
        ));
    }

    #[test]
    fn trim_ascii_strips_both_ends() {
        assert_eq!(trim_ascii(b"  a b\t"), b"a b");
        assert_eq!(trim_ascii(b"\n"), b"");
        assert_eq!(trim_ascii(b""), b"");
    }
}
