//! Signature hash set: hash1/hash2/hash3 over a packed archive.
//!
//! The file hash is computed over packed on-disk bytes in stored entry
//! order; the name hash over normalized, sorted, deduplicated entry names.
//! Both feed the composed hashes together with the `prefix` header value.
//! Names and the prefix are hashed as raw archive bytes: only ASCII
//! letters are case-folded and non-ASCII bytes contribute verbatim, so the
//! digests match other tools byte for byte.

use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::source::ReadAt;
use crate::types::{EntryInfo, GameType, HeaderPair, SignVersion, SignatureSet, SHA_SIZE};

const HASH_COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Compute the signature hash set for a PBO file.
///
/// # Errors
/// Fails on invalid version/game combinations or archive read errors.
pub fn compute_hash_set(
    path: impl AsRef<Path>,
    version: SignVersion,
    game: GameType,
) -> Result<SignatureSet> {
    validate_sign_args(version, game)?;

    let reader = Reader::open(path)?;
    compute_hash_set_from_reader(&reader, version, game)
}

/// Compute the signature hash set from an already parsed reader.
///
/// # Errors
/// Fails on invalid version/game combinations or payload read errors.
pub fn compute_hash_set_from_reader<S: ReadAt>(
    reader: &Reader<S>,
    version: SignVersion,
    game: GameType,
) -> Result<SignatureSet> {
    compute_hash_set_from_parts(
        reader.source(),
        reader.size(),
        reader.sha1_trailer().is_some(),
        reader.headers(),
        reader.entries(),
        version,
        game,
    )
}

/// Validate hash/signing configuration.
pub(crate) fn validate_sign_args(version: SignVersion, game: GameType) -> Result<()> {
    if version == SignVersion::V3 && game == GameType::Any {
        return Err(Error::UnsupportedGameTypeV3 {
            game: format!("{game:?}"),
        });
    }

    Ok(())
}

/// Compute the hash set from packed metadata and a random-access source.
pub(crate) fn compute_hash_set_from_parts(
    source: &dyn ReadAt,
    size: u64,
    has_trailer: bool,
    headers: &[HeaderPair],
    entries: &[EntryInfo],
    version: SignVersion,
    game: GameType,
) -> Result<SignatureSet> {
    validate_sign_args(version, game)?;

    let prefix = prefix_from_headers(headers);

    let hash1 = compute_hash1(source, size, has_trailer)?;
    let name_hash = compute_name_hash(entries);
    let file_hash = compute_file_hash(source, entries, version, game)?;

    Ok(SignatureSet {
        hash1,
        hash2: compose_hash(&hash1, &name_hash, prefix),
        hash3: compose_hash(&file_hash, &name_hash, prefix),
    })
}

/// Extract the `prefix` header value (case-insensitive key) as raw bytes.
fn prefix_from_headers(headers: &[HeaderPair]) -> &[u8] {
    headers
        .iter()
        .find(|h| h.key.as_bytes().eq_ignore_ascii_case(b"prefix"))
        .map_or(&[][..], |h| h.value.as_bytes())
}

/// Hash the full PBO content, excluding the optional 21-byte trailer.
fn compute_hash1(source: &dyn ReadAt, size: u64, has_trailer: bool) -> Result<[u8; SHA_SIZE]> {
    let to_read = if has_trailer && size >= 21 {
        size - 21
    } else {
        size
    };

    let mut hasher = Sha1::new();
    hash_region(&mut hasher, source, 0, to_read)?;

    Ok(hasher.finalize().into())
}

/// SHA-1 over normalized, sorted, deduplicated entry name bytes.
fn compute_name_hash(entries: &[EntryInfo]) -> [u8; SHA_SIZE] {
    let mut names: Vec<Vec<u8>> = entries
        .iter()
        .filter(|e| !e.path.is_empty() && e.data_size != 0)
        .map(|e| normalize_sign_entry_name(e.path.as_bytes()))
        .collect();
    names.sort_unstable();

    let mut hasher = Sha1::new();
    let mut prev: Option<&[u8]> = None;
    for name in &names {
        if prev == Some(name.as_slice()) {
            continue;
        }

        hasher.update(name);
        prev = Some(name);
    }

    hasher.finalize().into()
}

/// Normalize an entry path for name-hash comparison: `/` becomes `\`,
/// ASCII uppercase becomes lowercase, all other bytes stay untouched.
fn normalize_sign_entry_name(path: &[u8]) -> Vec<u8> {
    path.iter()
        .map(|&b| match b {
            b'/' => b'\\',
            b'A'..=b'Z' => b + (b'a' - b'A'),
            other => other,
        })
        .collect()
}

/// SHA-1 over selected packed payload bytes, in stored entry order.
///
/// Payloads are hashed as stored on disk, not decompressed. When no entry
/// contributes, hashes the literal `nothing` (v2) or `gnihton` (v3).
fn compute_file_hash(
    source: &dyn ReadAt,
    entries: &[EntryInfo],
    version: SignVersion,
    game: GameType,
) -> Result<[u8; SHA_SIZE]> {
    let mut hasher = Sha1::new();
    let mut hashed_any = false;

    for entry in entries {
        if entry.path.is_empty() || entry.data_size == 0 {
            continue;
        }
        if !should_hash_entry(version, game, entry.path.as_bytes())? {
            continue;
        }

        hash_region(
            &mut hasher,
            source,
            u64::from(entry.offset),
            u64::from(entry.data_size),
        )?;
        hashed_any = true;
    }

    if !hashed_any {
        let fallback: &[u8] = match version {
            SignVersion::V2 => b"nothing",
            SignVersion::V3 => b"gnihton",
        };
        hasher.update(fallback);
    }

    Ok(hasher.finalize().into())
}

/// Compose hash2/hash3 from a base hash, the name hash, and the prefix.
///
/// A non-empty prefix contributes its raw bytes with a guaranteed trailing
/// `\`; an empty prefix contributes nothing.
fn compose_hash(base: &[u8; SHA_SIZE], name_hash: &[u8; SHA_SIZE], prefix: &[u8]) -> [u8; SHA_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(base);
    hasher.update(name_hash);

    if !prefix.is_empty() {
        hasher.update(prefix);
        if prefix.last() != Some(&b'\\') {
            hasher.update(b"\\");
        }
    }

    hasher.finalize().into()
}

/// Per-version/per-game file extension policy.
fn should_hash_entry(version: SignVersion, game: GameType, filename: &[u8]) -> Result<bool> {
    let ext = file_ext_lower(filename);

    match version {
        SignVersion::V2 => Ok(!is_v2_excluded_ext(&ext)),
        SignVersion::V3 => match game {
            GameType::DayZ => Ok(is_dayz_v3_allowed_ext(&ext)),
            GameType::Arma => Ok(is_arma_v3_allowed_ext(&ext)),
            GameType::Any => Err(Error::UnsupportedGameTypeV3 {
                game: format!("{game:?}"),
            }),
        },
    }
}

/// Lowercased ASCII extension bytes, taken after the last `.` past the
/// last separator; empty when the name has no usable extension.
fn file_ext_lower(filename: &[u8]) -> Vec<u8> {
    let sep = filename
        .iter()
        .rposition(|&b| b == b'/' || b == b'\\')
        .map_or(0, |i| i + 1);
    let name = &filename[sep..];

    match name.iter().rposition(|&b| b == b'.') {
        Some(dot) if dot + 1 < name.len() => name[dot + 1..].to_ascii_lowercase(),
        _ => Vec::new(),
    }
}

fn is_v2_excluded_ext(ext: &[u8]) -> bool {
    matches!(
        ext,
        b"paa" | b"jpg" | b"p3d" | b"tga" | b"rvmat" | b"lip" | b"ogg" | b"wss" | b"png"
            | b"rtm" | b"pac" | b"fxy" | b"wrp"
    )
}

fn is_dayz_v3_allowed_ext(ext: &[u8]) -> bool {
    matches!(ext, b"bikb" | b"c" | b"ext" | b"hpp" | b"cfg" | b"h" | b"inc")
}

fn is_arma_v3_allowed_ext(ext: &[u8]) -> bool {
    matches!(
        ext,
        b"sqf" | b"inc" | b"bikb" | b"ext" | b"fsm" | b"sqm" | b"hpp" | b"cfg" | b"sqs" | b"h"
            | b"cpp"
    )
}

/// Feed `[offset, offset + len)` of `source` into the hasher in chunks.
fn hash_region(hasher: &mut Sha1, source: &dyn ReadAt, mut offset: u64, mut remaining: u64) -> Result<()> {
    let mut buf = [0u8; HASH_COPY_BUFFER_SIZE];

    while remaining > 0 {
        let chunk = buf
            .len()
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = source.read_at(&mut buf[..chunk], offset)?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "hash region past end of source",
            )));
        }

        hasher.update(&buf[..n]);
        offset += n as u64;
        remaining -= n as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ByteString;

    fn sha1_of(data: &[u8]) -> [u8; SHA_SIZE] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn named_entry(path: impl Into<ByteString>, data_size: u32) -> EntryInfo {
        EntryInfo {
            path: path.into(),
            data_size,
            ..EntryInfo::default()
        }
    }

    #[test]
    fn validate_rejects_v3_without_game() {
        assert!(validate_sign_args(SignVersion::V2, GameType::Any).is_ok());
        assert!(validate_sign_args(SignVersion::V3, GameType::DayZ).is_ok());
        assert!(matches!(
            validate_sign_args(SignVersion::V3, GameType::Any),
            Err(Error::UnsupportedGameTypeV3 { .. })
        ));
    }

    #[test]
    fn sign_name_normalization() {
        assert_eq!(
            normalize_sign_entry_name(b"already\\lower.c"),
            b"already\\lower.c"
        );
        assert_eq!(normalize_sign_entry_name(b"Dir/File.C"), b"dir\\file.c");
        assert_eq!(
            normalize_sign_entry_name(b"mixed/Path\\Name"),
            b"mixed\\path\\name"
        );
    }

    #[test]
    fn sign_name_normalization_keeps_non_ascii_bytes() {
        // 0xc3 0x8f is a valid two-byte sequence, 0xe9 alone is not; both
        // pass through untouched while ASCII letters fold.
        let raw = [b'N', b'a', 0xc3, 0x8f, b'/', b'X', 0xe9, b'.', b'C'];
        let want = [b'n', b'a', 0xc3, 0x8f, b'\\', b'x', 0xe9, b'.', b'c'];
        assert_eq!(normalize_sign_entry_name(&raw), want);
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(file_ext_lower(b"scripts/main.SQF"), b"sqf");
        assert_eq!(file_ext_lower(b"a\\b\\config.cpp"), b"cpp");
        assert_eq!(file_ext_lower(b"noext"), b"");
        assert_eq!(file_ext_lower(b"dir.d/noext"), b"");
        assert_eq!(file_ext_lower(b"trailing."), b"");
        // Non-ASCII bytes in the stem do not disturb the extension.
        assert_eq!(file_ext_lower(&[b'c', 0xe9, b'.', b'c']), b"c");
    }

    #[test]
    fn extension_policy_tables() {
        assert!(!should_hash_entry(SignVersion::V2, GameType::Any, b"a.paa").unwrap());
        assert!(should_hash_entry(SignVersion::V2, GameType::Any, b"a.sqf").unwrap());
        assert!(should_hash_entry(SignVersion::V2, GameType::Any, b"a.bin").unwrap());

        assert!(should_hash_entry(SignVersion::V3, GameType::DayZ, b"a.c").unwrap());
        assert!(!should_hash_entry(SignVersion::V3, GameType::DayZ, b"a.sqf").unwrap());
        assert!(should_hash_entry(SignVersion::V3, GameType::Arma, b"a.sqf").unwrap());
        assert!(!should_hash_entry(SignVersion::V3, GameType::Arma, b"a.bin").unwrap());
        assert!(should_hash_entry(SignVersion::V3, GameType::Arma, b"a.cpp").unwrap());
    }

    #[test]
    fn name_hash_sorts_and_dedups() {
        let entries = [
            named_entry("B.c", 1),
            named_entry("a.c", 1),
            named_entry("b.C", 1),
            named_entry("skipped", 0),
        ];

        // "B.c" and "b.C" normalize to the same name and deduplicate.
        assert_eq!(compute_name_hash(&entries), sha1_of(b"a.cb.c"));
    }

    #[test]
    fn name_hash_uses_raw_bytes_for_non_ascii_names() {
        // "A" 0xff "/B" 0xc3: invalid UTF-8 on purpose. The digest must be
        // over the transformed raw bytes, not any replacement character.
        let raw = [b'A', 0xff, b'/', b'B', 0xc3, b'.', b'c'];
        let entries = [named_entry(ByteString::from(&raw[..]), 1)];

        let expected = [b'a', 0xff, b'\\', b'b', 0xc3, b'.', b'c'];
        assert_eq!(compute_name_hash(&entries), sha1_of(&expected));

        // The lossy rendering of the same name hashes differently.
        let lossy = ByteString::from(&raw[..]).to_string_lossy().into_owned();
        let lossy_transformed = normalize_sign_entry_name(lossy.as_bytes());
        assert_ne!(compute_name_hash(&entries), sha1_of(&lossy_transformed));
    }

    #[test]
    fn file_hash_fallback_literals() {
        let source: Vec<u8> = Vec::new();
        let empty: [EntryInfo; 0] = [];

        let v2 = compute_file_hash(&source, &empty, SignVersion::V2, GameType::Any).unwrap();
        assert_eq!(v2, sha1_of(b"nothing"));

        let v3 = compute_file_hash(&source, &empty, SignVersion::V3, GameType::DayZ).unwrap();
        assert_eq!(v3, sha1_of(b"gnihton"));
    }

    #[test]
    fn file_hash_uses_packed_bytes_in_stored_order() {
        // Source bytes: entry payloads back to back.
        let source = b"AAAABBBB".to_vec();
        let entries = [
            EntryInfo {
                path: ByteString::from("z.c"),
                offset: 0,
                data_size: 4,
                ..EntryInfo::default()
            },
            EntryInfo {
                path: ByteString::from("a.c"),
                offset: 4,
                data_size: 4,
                ..EntryInfo::default()
            },
        ];

        let stored_order =
            compute_file_hash(&source, &entries, SignVersion::V3, GameType::DayZ).unwrap();
        assert_eq!(stored_order, sha1_of(b"AAAABBBB"));

        let mut sorted = entries.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        let sorted_order =
            compute_file_hash(&source, &sorted, SignVersion::V3, GameType::DayZ).unwrap();
        assert_eq!(sorted_order, sha1_of(b"BBBBAAAA"));
        assert_ne!(stored_order, sorted_order);
    }

    #[test]
    fn prefix_fragment_contract() {
        let base = [1u8; SHA_SIZE];
        let names = [2u8; SHA_SIZE];

        let empty = compose_hash(&base, &names, b"");
        let mut manual = Sha1::new();
        manual.update(base);
        manual.update(names);
        let manual: [u8; SHA_SIZE] = manual.finalize().into();
        assert_eq!(empty, manual);

        // Trailing backslash is appended exactly once.
        let with_sep = compose_hash(&base, &names, b"my\\addon\\");
        let without_sep = compose_hash(&base, &names, b"my\\addon");
        assert_eq!(with_sep, without_sep);
        assert_ne!(with_sep, empty);
    }

    #[test]
    fn prefix_fragment_contributes_raw_bytes() {
        let base = [1u8; SHA_SIZE];
        let names = [2u8; SHA_SIZE];
        let raw_prefix = [b'm', 0xff, b'd'];

        let composed = compose_hash(&base, &names, &raw_prefix);

        let mut manual = Sha1::new();
        manual.update(base);
        manual.update(names);
        manual.update(raw_prefix);
        manual.update(b"\\");
        let manual: [u8; SHA_SIZE] = manual.finalize().into();
        assert_eq!(composed, manual);
    }

    #[test]
    fn hash1_excludes_trailer_when_present() {
        let mut data = b"payload-bytes".to_vec();
        let body_hash = compute_hash1(&data, data.len() as u64, false).unwrap();
        assert_eq!(body_hash, sha1_of(&data));

        let body_len = data.len();
        data.push(0);
        data.extend_from_slice(&[0u8; 20]);
        let with_trailer = compute_hash1(&data, data.len() as u64, true).unwrap();
        assert_eq!(with_trailer, sha1_of(&data[..body_len]));
    }
}
