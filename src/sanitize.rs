//! Filesystem-safe rewriting of hostile entry names.
//!
//! Sanitized output is deterministic and unique within a batch, so listing
//! and extraction agree on the rewritten namespace.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::path::{normalize_path_bytes, trim_ascii};
use crate::types::EntryInfo;

/// One path segment is capped at a common filesystem-safe byte length.
const MAX_SEGMENT_LEN: usize = 240;

/// Case-insensitive reserved DOS/Windows/OS2 device names, sorted.
static RESERVED_DOS_NAMES: &[&str] = &[
    "$", "$addstor", "$idle$", "386max$$", "4dosstak", "82164a", "aux", "cloak$$$", "clock",
    "clock$", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8", "com9", "con",
    "config$", "dblssys$", "dpmixxx0", "dpmsxxx0", "emm$$$$$", "emmqxxx0", "emmxxxq0", "emmxxxx0",
    "hmaldsys", "ifs$hlp$", "kbd$", "keybd$", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6",
    "lpt7", "lpt8", "lpt9", "lst", "mouse$", "ndosstak", "nul", "pc$mouse", "plt", "pointer$",
    "prn", "protman$", "qdpmi$$$", "qemm386$", "qextxxx0", "qmmxxxx0", "screen$", "vcpixxx0",
    "xmsxxxx0",
];

/// Rewrite one path to deterministic filesystem-safe slash-separated form.
///
/// Returns an empty string for paths that normalize to nothing.
///
/// # Errors
/// Returns an error when the sanitized result is still unsafe to extract.
pub fn sanitize_path(path: &str) -> Result<String> {
    sanitize_path_from_bytes(path.as_bytes())
}

/// [`sanitize_path`] over raw archive bytes. Rune-level replacement works
/// on a lossy decoding, so invalid byte sequences surface as U+FFFD and
/// are rewritten to `_` like any other hostile rune.
pub(crate) fn sanitize_path_from_bytes(path: &[u8]) -> Result<String> {
    let normalized = normalize_path_bytes(path);
    if normalized.is_empty() {
        return Ok(String::new());
    }

    let relative = String::from_utf8_lossy(&normalized);
    let sanitized = sanitize_relative_path(&relative, sanitize_segment)?;
    normalize_extract_entry_path(sanitized.as_bytes())?;

    Ok(sanitized)
}

/// Rewrite entry paths to deterministic filesystem-safe unique names.
pub(crate) fn sanitize_entry_paths(entries: &[EntryInfo]) -> Result<Vec<EntryInfo>> {
    sanitize_entries_with(entries, sanitize_segment, true)
}

/// Rewrite control/format runes in entry paths, keeping names otherwise.
pub(crate) fn sanitize_entry_control_paths(entries: &[EntryInfo]) -> Result<Vec<EntryInfo>> {
    sanitize_entries_with(entries, sanitize_control_segment, false)
}

fn sanitize_entries_with(
    entries: &[EntryInfo],
    segment_fn: fn(&str) -> Result<String>,
    verify_extract_safe: bool,
) -> Result<Vec<EntryInfo>> {
    let mut out = Vec::with_capacity(entries.len());
    let mut used = HashSet::with_capacity(entries.len());
    let mut next_suffix = HashMap::new();

    for entry in entries {
        // Keep sanitize resilient for mangled/obfuscated names: when the
        // path fails safety normalization, fall back to slash conversion
        // and sanitize segment-by-segment instead of failing hard. The
        // rune pass runs on a lossy decoding; invalid bytes become U+FFFD
        // and are rewritten to `_` with the other hostile runes.
        let relative: String = match normalize_extract_entry_path(entry.path.as_bytes()) {
            Ok(normalized) => String::from_utf8_lossy(&normalized).into_owned(),
            Err(_) => {
                let swapped: Vec<u8> = entry
                    .path
                    .as_bytes()
                    .iter()
                    .map(|&b| if b == b'\\' { b'/' } else { b })
                    .collect();
                String::from_utf8_lossy(&swapped).into_owned()
            }
        };

        let sanitized = sanitize_relative_path(&relative, segment_fn)?;
        let sanitized = make_unique(sanitized, &mut used, &mut next_suffix)?;
        if verify_extract_safe {
            normalize_extract_entry_path(sanitized.as_bytes())?;
        }

        let mut rewritten = entry.clone();
        rewritten.path = sanitized.into();
        out.push(rewritten);
    }

    Ok(out)
}

/// Sanitize each segment of a relative slash-separated path.
fn sanitize_relative_path(
    relative: &str,
    segment_fn: fn(&str) -> Result<String>,
) -> Result<String> {
    let mut sanitized = Vec::new();
    for part in relative.split('/') {
        let part = part.trim();
        if part.is_empty() || part == "." {
            continue;
        }

        sanitized.push(segment_fn(part)?);
    }

    if sanitized.is_empty() {
        return Ok("_".to_string());
    }

    Ok(sanitized.join("/"))
}

/// Sanitize one path segment for broad filesystem compatibility.
fn sanitize_segment(segment: &str) -> Result<String> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Ok("_".to_string());
    }

    let segment = sanitize_windows_guid_suffix(segment);
    let raw_reserved = is_reserved_device_name(&segment);

    let mut replaced = String::with_capacity(segment.len());
    for c in segment.chars() {
        if is_unsafe_control_char(c) || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        {
            replaced.push('_');
        } else {
            replaced.push(c);
        }
    }

    let mut sanitized = replaced.trim_end_matches(['.', ' ']).to_string();
    if sanitized.is_empty() {
        sanitized = "_".to_string();
    }

    let base = sanitized.split('.').next().unwrap_or_default();
    if raw_reserved || is_reserved_device_name(base) {
        sanitized.insert(0, '_');
    }

    if sanitized.len() > MAX_SEGMENT_LEN {
        sanitized = shorten_segment_deterministic(&sanitized, MAX_SEGMENT_LEN);
    }
    if sanitized.is_empty() {
        return Err(Error::InvalidExtractPath {
            path: segment.to_string(),
        });
    }

    Ok(sanitized)
}

/// Sanitize one path segment for safe text output (control runes only).
fn sanitize_control_segment(segment: &str) -> Result<String> {
    if segment == ".." {
        return Ok("_".to_string());
    }

    let sanitized: String = segment
        .chars()
        .map(|c| if is_unsafe_control_char(c) { '_' } else { c })
        .collect();

    if sanitized.is_empty() {
        return Ok("_".to_string());
    }

    Ok(sanitized)
}

/// Control runes, Unicode format runes, and U+FFFD are unsafe in names.
fn is_unsafe_control_char(c: char) -> bool {
    // U+FFFD often appears from invalid byte sequences in obfuscated names.
    c.is_control() || is_format_char(c) || c == '\u{FFFD}'
}

/// Unicode `Cf` (format) category membership.
fn is_format_char(c: char) -> bool {
    matches!(u32::from(c),
        0x00ad
        | 0x0600..=0x0605
        | 0x061c
        | 0x06dd
        | 0x070f
        | 0x0890..=0x0891
        | 0x08e2
        | 0x180e
        | 0x200b..=0x200f
        | 0x202a..=0x202e
        | 0x2060..=0x2064
        | 0x2066..=0x206f
        | 0xfeff
        | 0xfff9..=0xfffb
        | 0x1_10bd
        | 0x1_10cd
        | 0x1_3430..=0x1_343f
        | 0x1_bca0..=0x1_bca3
        | 0x1_d173..=0x1_d17a
        | 0xe_0001
        | 0xe_0020..=0xe_007f)
}

/// Rewrite a trailing `.{GUID}` to `_{GUID}` to defuse Windows shell
/// namespace aliasing.
fn sanitize_windows_guid_suffix(segment: &str) -> String {
    let Some(dot_index) = segment.rfind(".{") else {
        return segment.to_string();
    };

    let braced = &segment[dot_index + 1..];
    if !is_braced_guid(braced) {
        return segment.to_string();
    }

    format!("{}_{}", &segment[..dot_index], braced)
}

/// Whether the token matches `{hhhhhhhh-hhhh-hhhh-hhhh-hhhhhhhhhhhh}`.
fn is_braced_guid(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() != 38 || bytes[0] != b'{' || bytes[37] != b'}' {
        return false;
    }

    for (idx, &ch) in bytes.iter().enumerate().take(37).skip(1) {
        if matches!(idx, 9 | 14 | 19 | 24) {
            if ch != b'-' {
                return false;
            }
            continue;
        }

        if !ch.is_ascii_hexdigit() {
            return false;
        }
    }

    true
}

/// Whether a name matches a reserved DOS/Windows/OS2 device identifier.
fn is_reserved_device_name(name: &str) -> bool {
    let candidate = name.trim();
    let candidate = candidate.trim_end_matches(['.', ' ', ':']);
    let candidate = candidate.to_ascii_lowercase();
    let candidate = candidate.split('.').next().unwrap_or_default();
    let candidate = candidate.trim_end_matches(['.', ' ', ':']);
    if candidate.is_empty() {
        return false;
    }

    RESERVED_DOS_NAMES.binary_search(&candidate).is_ok()
}

/// Resolve collisions by appending a deterministic numeric suffix.
///
/// The suffix counter per colliding base persists across the batch, so
/// successive collisions keep increasing.
fn make_unique(
    path: String,
    used: &mut HashSet<String>,
    next_suffix: &mut HashMap<String, usize>,
) -> Result<String> {
    let key = path.to_ascii_lowercase();
    if !used.contains(&key) {
        used.insert(key);
        return Ok(path);
    }

    let (dir, name) = match path.rfind('/') {
        Some(split) => (&path[..split], &path[split + 1..]),
        None => ("", path.as_str()),
    };

    let start = next_suffix.get(&key).copied().unwrap_or(2).max(2);
    for idx in start..1_000_000 {
        let candidate_name = with_numeric_suffix(name, idx);
        let candidate = if dir.is_empty() {
            candidate_name
        } else {
            format!("{dir}/{candidate_name}")
        };

        let candidate_key = candidate.to_ascii_lowercase();
        if used.contains(&candidate_key) {
            continue;
        }

        used.insert(candidate_key);
        next_suffix.insert(key, idx + 1);
        return Ok(candidate);
    }

    Err(Error::InvalidExtractPath { path })
}

/// Append `~N` before the extension, preserving the segment length cap.
fn with_numeric_suffix(name: &str, n: usize) -> String {
    let (base, ext) = match name.rfind('.') {
        Some(dot) => name.split_at(dot),
        None => (name, ""),
    };

    let suffix = format!("~{n}");
    let allowed = MAX_SEGMENT_LEN
        .saturating_sub(ext.len() + suffix.len())
        .max(1);
    let base = if base.len() > allowed {
        shorten_segment_deterministic(base, allowed)
    } else {
        base.to_string()
    };

    format!("{base}{suffix}{ext}")
}

/// Shorten a long segment while keeping a deterministic identity suffix.
fn shorten_segment_deterministic(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    if max_len <= 10 {
        return truncate_at_boundary(value, max_len).to_string();
    }

    let hash_part = format!("~{:08x}", fnv32a(value.as_bytes()));
    let prefix_len = max_len.saturating_sub(hash_part.len()).max(1);

    format!("{}{}", truncate_at_boundary(value, prefix_len), hash_part)
}

/// Byte-length truncation backed off to the nearest char boundary.
fn truncate_at_boundary(value: &str, mut len: usize) -> &str {
    while len > 0 && !value.is_char_boundary(len) {
        len -= 1;
    }

    &value[..len]
}

fn fnv32a(bytes: &[u8]) -> u32 {
    let mut hash = 2_166_136_261u32;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(16_777_619);
    }

    hash
}

/// Normalize an entry path for extraction and reject hostile inputs.
///
/// Absolute paths (`/`, `\`, or a drive prefix), NUL bytes, and `..`
/// segments fail; empty and `.` segments are skipped. Operates on raw
/// bytes; non-ASCII bytes pass through verbatim.
pub(crate) fn normalize_extract_entry_path(entry_path: &[u8]) -> Result<Vec<u8>> {
    let reject = || Error::InvalidExtractPath {
        path: String::from_utf8_lossy(entry_path).into_owned(),
    };

    let raw = trim_ascii(entry_path);
    if raw.is_empty() || raw.contains(&0) {
        return Err(reject());
    }
    if raw.first() == Some(&b'/') || raw.first() == Some(&b'\\') {
        return Err(reject());
    }

    let raw: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'\\' { b'/' } else { b })
        .collect();
    if has_windows_drive_prefix(&raw) {
        return Err(reject());
    }

    let mut clean: Vec<&[u8]> = Vec::new();
    for part in raw.split(|&b| b == b'/') {
        match part {
            b"" | b"." => {}
            b".." => return Err(reject()),
            other => clean.push(other),
        }
    }
    if clean.is_empty() {
        return Err(reject());
    }

    Ok(clean.join(&b'/'))
}

/// Whether the path starts with a drive-root prefix like `C:/`.
fn has_windows_drive_prefix(path: &[u8]) -> bool {
    path.len() >= 3 && path[0].is_ascii_alphabetic() && path[1] == b':' && path[2] == b'/'
}
