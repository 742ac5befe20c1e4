//! PBO writer: single rewrite core used by pack and editor commit.
//!
//! The writer emits the fixed header, the key-value block, a placeholder
//! index, then streams payloads, and finally seeks back to patch the index
//! fields. The stored offset field is always written as zero; readers derive
//! offsets sequentially.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use byteorder::{ByteOrder, LittleEndian};
use walkdir::WalkDir;

use crate::compression::{lzss, should_compress, should_compress_by_size, CompressMatcher};
use crate::error::{Error, Result};
use crate::path::{normalize_archive_entry_path, normalize_prefix_header_bytes, trim_ascii};
use crate::sign::{compute_hash_set_from_parts, validate_sign_args};
use crate::source::{ReadAt, Section};
use crate::trailer::write_sha1_trailer;
use crate::types::{
    time_to_u32, ByteString, EntryInfo, GameType, HeaderPair, Input, Mime, PackEntryProgress,
    PackOptions, PackProgressCallback, PackResult, SignVersion, SignatureSet, HEADER_SIZE,
    MAX_PBO_DATA,
};

/// Streaming payload copy buffer size.
const COPY_BUFFER_SIZE: usize = 64 * 1024;
/// Consecutive interrupted reads without progress before giving up.
const MAX_STALLED_READS: u32 = 100;

/// Concrete entry values produced during a payload write.
#[derive(Debug, Clone, Copy)]
struct WrittenEntry {
    data_size: u32,
    original_size: u32,
    mime: Mime,
    timestamp: u32,
    compression_candidate: bool,
}

/// One payload source for the archive rewrite core.
pub(crate) enum PlanPayload {
    /// Caller-provided input stream.
    Input(Input),
    /// Packed bytes copied verbatim from a parsed source archive.
    Source(EntryInfo),
}

/// One rewrite plan item with its canonical archive path.
pub(crate) struct RewriteItem {
    pub(crate) path: ByteString,
    pub(crate) payload: PlanPayload,
}

/// Rewrite core output: statistics plus written metadata for hashing.
pub(crate) struct RewriteOutcome {
    pub(crate) result: PackResult,
    pub(crate) entries: Vec<EntryInfo>,
    pub(crate) headers: Vec<HeaderPair>,
}

/// Write a PBO to `dst` from the given inputs.
///
/// Inputs are sorted by canonical path, so output is deterministic for a
/// given input set.
///
/// # Errors
/// Fails on empty input, invalid or duplicate paths, or I/O errors; the
/// destination is left truncated mid-write on failure.
pub fn pack<W: Write + Seek>(dst: &mut W, inputs: Vec<Input>, opts: &PackOptions) -> Result<PackResult> {
    pack_with_progress(dst, inputs, opts, &|_| {})
}

/// [`pack`] with a per-entry completion callback.
///
/// # Errors
/// Same as [`pack`].
pub fn pack_with_progress<W: Write + Seek>(
    dst: &mut W,
    inputs: Vec<Input>,
    opts: &PackOptions,
    progress: PackProgressCallback,
) -> Result<PackResult> {
    if inputs.is_empty() {
        return Err(Error::EmptyInputs);
    }

    let opts = opts.normalized();
    let plan = prepare_pack_plan(inputs)?;
    let outcome = rewrite_archive(dst, None, &plan, &opts, progress)?;

    Ok(outcome.result)
}

/// Write a PBO file to `path` and append a SHA-1 trailer.
///
/// # Errors
/// Same as [`pack`], plus trailer write failures.
pub fn pack_file(path: impl AsRef<Path>, inputs: Vec<Input>, opts: &PackOptions) -> Result<PackResult> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let result = pack(&mut file, inputs, opts)?;
    file.sync_all()?;
    drop(file);

    write_sha1_trailer(path)?;

    Ok(result)
}

/// Write a PBO to `dst` and compute the signature hash set over the
/// written bytes (no trailer involved).
///
/// # Errors
/// Same as [`pack`], plus invalid sign version/game combinations.
pub fn pack_and_hash<W: Write + Seek + ReadAt>(
    dst: &mut W,
    inputs: Vec<Input>,
    opts: &PackOptions,
    version: SignVersion,
    game: GameType,
) -> Result<(PackResult, SignatureSet)> {
    validate_sign_args(version, game)?;

    if inputs.is_empty() {
        return Err(Error::EmptyInputs);
    }

    let opts = opts.normalized();
    let plan = prepare_pack_plan(inputs)?;
    let outcome = rewrite_archive(dst, None, &plan, &opts, &|_| {})?;

    let size = dst.seek(SeekFrom::End(0))?;
    let hashes = compute_hash_set_from_parts(
        &*dst,
        size,
        false,
        &outcome.headers,
        &outcome.entries,
        version,
        game,
    )?;

    Ok((outcome.result, hashes))
}

/// [`pack_and_hash`] writing to a file path, then appending the trailer.
///
/// # Errors
/// Same as [`pack_and_hash`], plus trailer write failures.
pub fn pack_and_hash_file(
    path: impl AsRef<Path>,
    inputs: Vec<Input>,
    opts: &PackOptions,
    version: SignVersion,
    game: GameType,
) -> Result<(PackResult, SignatureSet)> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let (result, hashes) = pack_and_hash(&mut file, inputs, opts, version, game)?;
    file.sync_all()?;
    drop(file);

    write_sha1_trailer(path)?;

    Ok((result, hashes))
}

/// Collect pack inputs from a directory tree, one input per regular file,
/// paths relative to `root`. Symlinks are not followed.
///
/// # Errors
/// Fails when the walk or file metadata reads fail.
pub fn inputs_from_dir(root: impl AsRef<Path>) -> Result<Vec<Input>> {
    let root = root.as_ref();
    let mut inputs = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidEntryPath {
                path: entry.path().display().to_string(),
            })?;
        let archive_path = relative.to_string_lossy().replace('\\', "/");

        inputs.push(Input::from_file(archive_path, entry.path())?);
    }

    inputs.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(inputs)
}

/// Canonicalize, sort, and validate pack inputs into a rewrite plan.
fn prepare_pack_plan(inputs: Vec<Input>) -> Result<Vec<RewriteItem>> {
    let mut sorted = Vec::with_capacity(inputs.len());
    for mut input in inputs {
        input.path = normalize_archive_entry_path(&input.path)?;
        sorted.push(input);
    }

    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    validate_unique_entry_paths(&sorted)?;

    let total_hint: u64 = sorted.iter().filter_map(|i| i.size_hint).sum();
    if total_hint > MAX_PBO_DATA {
        return Err(Error::SizeOverflow {
            detail: format!("estimated data {total_hint} exceeds 4 GiB"),
        });
    }

    Ok(sorted
        .into_iter()
        .map(|input| RewriteItem {
            path: ByteString::from(input.path.clone()),
            payload: PlanPayload::Input(input),
        })
        .collect())
}

/// Ensure no two inputs share a case-insensitive archive path.
fn validate_unique_entry_paths(inputs: &[Input]) -> Result<()> {
    let mut seen: std::collections::HashMap<String, &str> =
        std::collections::HashMap::with_capacity(inputs.len());

    for input in inputs {
        let key = input.path.to_ascii_lowercase();
        if let Some(existing) = seen.insert(key, &input.path) {
            return Err(Error::DuplicateEntryPath {
                path: input.path.clone(),
                existing: existing.to_string(),
            });
        }
    }

    Ok(())
}

/// Shared writer core for pack and editor commit flows.
///
/// `opts` must already be normalized by the caller.
pub(crate) fn rewrite_archive<W: Write + Seek>(
    dst: &mut W,
    src: Option<&dyn ReadAt>,
    plan: &[RewriteItem],
    opts: &PackOptions,
    progress: PackProgressCallback,
) -> Result<RewriteOutcome> {
    let started = Instant::now();
    let matcher = CompressMatcher::new(&opts.compress, opts.matcher)?;

    let mut w = BufWriter::with_capacity(opts.writer_buffer_size, dst);

    let mut fixed = [0u8; HEADER_SIZE];
    LittleEndian::write_u32(&mut fixed[1..5], Mime::HEADER_TAG);
    w.write_all(&fixed)?;

    let mut written_headers = Vec::with_capacity(opts.headers.len());
    for pair in &opts.headers {
        let value = if trim_ascii(pair.key.as_bytes()).eq_ignore_ascii_case(b"prefix") {
            ByteString::new(normalize_prefix_header_bytes(pair.value.as_bytes()))
        } else {
            pair.value.clone()
        };

        w.write_all(pair.key.as_bytes())?;
        w.write_all(&[0])?;
        w.write_all(value.as_bytes())?;
        w.write_all(&[0])?;

        written_headers.push(HeaderPair {
            key: pair.key.clone(),
            value,
        });
    }
    w.write_all(&[0])?;
    w.flush()?;

    let entries_start = w.get_mut().stream_position()?;

    let placeholder = [0u8; 20];
    for item in plan {
        w.write_all(item.path.as_bytes())?;
        w.write_all(&[0])?;
        w.write_all(&placeholder)?;
    }
    w.write_all(&[0])?;
    w.write_all(&placeholder)?;
    w.flush()?;

    let data_start = w.get_mut().stream_position()?;
    if data_start > MAX_PBO_DATA {
        return Err(Error::SizeOverflow {
            detail: format!("data start offset {data_start}"),
        });
    }

    let mut copy_buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = Vec::with_capacity(plan.len());
    let mut entries = Vec::with_capacity(plan.len());
    let mut current_offset = data_start as u32;
    let mut raw_bytes = 0u64;
    let mut compressed_bytes = 0u64;
    let mut compressed_entries = 0usize;
    let mut skipped_compression_entries = 0usize;

    for item in plan {
        let record = match &item.payload {
            PlanPayload::Source(entry) => {
                let src = src.ok_or_else(|| {
                    Error::Io(io::Error::other("source-backed plan item without source archive"))
                })?;

                write_source_payload(&mut w, src, &item.path, entry, current_offset, &mut copy_buf)?
            }
            PlanPayload::Input(input) => write_input_payload(
                &mut w,
                input,
                opts,
                matcher.as_ref(),
                current_offset,
                &mut copy_buf,
            )?,
        };

        entries.push(EntryInfo {
            path: item.path.clone(),
            offset: current_offset,
            data_size: record.data_size,
            original_size: record.original_size,
            timestamp: record.timestamp,
            mime: record.mime,
        });

        if record.mime == Mime::Compressed {
            compressed_entries += 1;
            compressed_bytes += u64::from(record.data_size);
        } else {
            raw_bytes += u64::from(record.data_size);
            if record.compression_candidate {
                skipped_compression_entries += 1;
            }
        }

        progress(&PackEntryProgress {
            path: item.path.clone(),
            offset: current_offset,
            data_size: record.data_size,
            original_size: record.original_size,
            mime: record.mime,
            compression_candidate: record.compression_candidate,
            compressed: record.mime == Mime::Compressed,
        });

        // checked_data_size guaranteed this fits.
        current_offset += record.data_size;
        written.push(record);
    }
    w.flush()?;

    let out = w.get_mut();
    let mut pos = entries_start;
    for (item, record) in plan.iter().zip(&written) {
        pos += item.path.len() as u64 + 1;
        out.seek(SeekFrom::Start(pos))?;

        let mut fields = [0u8; 20];
        LittleEndian::write_u32(&mut fields[0..4], record.mime.to_u32());
        LittleEndian::write_u32(&mut fields[4..8], record.original_size);
        // Offset field stays zero; common tooling derives offsets sequentially.
        LittleEndian::write_u32(&mut fields[12..16], record.timestamp);
        LittleEndian::write_u32(&mut fields[16..20], record.data_size);
        out.write_all(&fields)?;

        pos += fields.len() as u64;
    }

    Ok(RewriteOutcome {
        result: PackResult {
            written_entries: written.len(),
            data_size: u64::from(current_offset) - data_start,
            index_size: data_start - entries_start,
            raw_bytes,
            compressed_bytes,
            compressed_entries,
            skipped_compression_entries,
            duration: started.elapsed(),
        },
        entries,
        headers: written_headers,
    })
}

/// Whether an input should enter the compression candidate path.
fn should_use_compression_for_input(
    opts: &PackOptions,
    matcher: Option<&CompressMatcher>,
    input: &Input,
) -> bool {
    let Some(matcher) = matcher else {
        return false;
    };

    match input.size_hint {
        Some(hint) => {
            if hint < u64::from(opts.min_compress_size) || hint > u64::from(opts.max_compress_size)
            {
                return false;
            }
            let Ok(hint) = u32::try_from(hint) else {
                return false;
            };

            should_compress(opts, Some(matcher), &input.path, hint)
        }
        None => matcher.matches(&input.path),
    }
}

/// Whether a known-size candidate can take the in-memory compression path.
fn should_use_in_memory_compress_path(
    opts: &PackOptions,
    size_hint: Option<u64>,
    max_entry_size: u64,
) -> bool {
    let Some(hint) = size_hint else {
        return false;
    };

    hint > 0 && hint <= max_entry_size && hint <= u64::from(opts.max_compress_size)
}

/// Open and write one input-backed plan item.
fn write_input_payload(
    dst: &mut impl Write,
    input: &Input,
    opts: &PackOptions,
    matcher: Option<&CompressMatcher>,
    current_offset: u32,
    copy_buf: &mut [u8],
) -> Result<WrittenEntry> {
    let candidate = should_use_compression_for_input(opts, matcher, input);
    let mut payload = input.open()?;

    let mut record = if candidate {
        write_compressed_candidate_payload(dst, &mut payload, input, opts, current_offset, copy_buf)?
    } else {
        write_uncompressed_payload(dst, &mut payload, input, current_offset, copy_buf)?
    };

    record.compression_candidate = candidate;
    Ok(record)
}

/// Stream a payload raw into the destination.
fn write_uncompressed_payload(
    dst: &mut impl Write,
    payload: &mut dyn Read,
    input: &Input,
    current_offset: u32,
    copy_buf: &mut [u8],
) -> Result<WrittenEntry> {
    let max_entry_size = u64::from(u32::MAX - current_offset);
    let streamed = copy_payload_bounded(dst, payload, max_entry_size, copy_buf, &input.path)?;
    let data_size = checked_data_size(&input.path, streamed, current_offset)?;

    Ok(WrittenEntry {
        data_size,
        original_size: 0,
        mime: Mime::Raw,
        timestamp: time_to_u32(input.mod_time),
        compression_candidate: false,
    })
}

/// Handle a compression candidate. Known-size inputs are buffered in memory
/// and compressed; unknown-size and out-of-range candidates stream raw
/// (no temp-file fallback).
fn write_compressed_candidate_payload(
    dst: &mut impl Write,
    payload: &mut dyn Read,
    input: &Input,
    opts: &PackOptions,
    current_offset: u32,
    copy_buf: &mut [u8],
) -> Result<WrittenEntry> {
    let max_entry_size = u64::from(u32::MAX - current_offset);
    if !should_use_in_memory_compress_path(opts, input.size_hint, max_entry_size) {
        return write_uncompressed_payload(dst, payload, input, current_offset, copy_buf);
    }

    let raw = read_payload_bounded(payload, max_entry_size, input.size_hint, copy_buf, &input.path)?;
    let original_size = checked_data_size(&input.path, raw.len() as u64, current_offset)?;

    let mut record = WrittenEntry {
        data_size: original_size,
        original_size: 0,
        mime: Mime::Raw,
        timestamp: time_to_u32(input.mod_time),
        compression_candidate: false,
    };

    if !should_compress_by_size(opts, original_size) {
        dst.write_all(&raw)?;
        return Ok(record);
    }

    let compressed = lzss::compress(&raw);
    if compressed.len() >= raw.len() {
        dst.write_all(&raw)?;
        return Ok(record);
    }

    record.data_size = checked_data_size(&input.path, compressed.len() as u64, current_offset)?;
    record.original_size = original_size;
    record.mime = Mime::Compressed;
    dst.write_all(&compressed)?;

    Ok(record)
}

/// Read a whole payload into memory with strict size enforcement.
fn read_payload_bounded(
    src: &mut dyn Read,
    limit: u64,
    size_hint: Option<u64>,
    copy_buf: &mut [u8],
    path: &str,
) -> Result<Vec<u8>> {
    let capacity = size_hint
        .unwrap_or(0)
        .min(limit)
        .try_into()
        .unwrap_or(usize::MAX);

    let mut out = Vec::with_capacity(capacity);
    copy_payload_bounded(&mut out, src, limit, copy_buf, path)?;

    Ok(out)
}

/// Copy packed bytes of a source archive entry verbatim.
fn write_source_payload(
    dst: &mut impl Write,
    src: &dyn ReadAt,
    path: &ByteString,
    entry: &EntryInfo,
    current_offset: u32,
    copy_buf: &mut [u8],
) -> Result<WrittenEntry> {
    let display = path.to_string_lossy();
    let size = u64::from(entry.data_size);
    let data_size = checked_data_size(&display, size, current_offset)?;

    let mut section = Section::new(src, u64::from(entry.offset), size);
    let written = copy_payload_bounded(dst, &mut section, size, copy_buf, &display)?;
    if written != size {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("copy packed entry {display}: short read ({written}/{size})"),
        )));
    }

    Ok(WrittenEntry {
        data_size,
        original_size: entry.original_size,
        mime: entry.mime,
        timestamp: entry.timestamp,
        compression_candidate: false,
    })
}

/// Stream from `src` to `dst` enforcing a strict byte limit.
///
/// After reaching the limit, one extra byte is probed to catch sources that
/// produce more than they claimed; a successful probe is a size overflow.
fn copy_payload_bounded(
    dst: &mut dyn Write,
    src: &mut dyn Read,
    limit: u64,
    buf: &mut [u8],
    path: &str,
) -> Result<u64> {
    let mut written = 0u64;
    let mut stalled = 0u32;

    while written < limit {
        let chunk = buf
            .len()
            .min(usize::try_from(limit - written).unwrap_or(usize::MAX));

        match src.read(&mut buf[..chunk]) {
            Ok(0) => break,
            Ok(n) => {
                stalled = 0;
                dst.write_all(&buf[..n])?;
                written += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                stalled += 1;
                if stalled > MAX_STALLED_READS {
                    return Err(Error::NoProgress {
                        path: path.to_string(),
                    });
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }

    if written == limit {
        let mut probe = [0u8; 1];
        match src.read(&mut probe) {
            Ok(0) => {}
            Ok(_) => {
                return Err(Error::SizeOverflow {
                    detail: format!("entry {path} produced more bytes than its declared size"),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(written)
}

/// Validate one entry size against the u32 fields and the running offset.
fn checked_data_size(path: &str, size: u64, current_offset: u32) -> Result<u32> {
    let max_entry_size = u64::from(u32::MAX - current_offset);
    if size > max_entry_size {
        return Err(Error::SizeOverflow {
            detail: format!("entry {path} size {size} would exceed 4 GiB"),
        });
    }

    Ok(size as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressRule;

    fn include_rules(patterns: &[&str]) -> Vec<CompressRule> {
        patterns.iter().map(|p| CompressRule::include(*p)).collect()
    }

    fn opts_with_rules(patterns: &[&str]) -> PackOptions {
        PackOptions {
            compress: include_rules(patterns),
            ..PackOptions::default()
        }
        .normalized()
    }

    #[test]
    fn compression_candidate_selection() {
        let opts = PackOptions {
            compress: include_rules(&["*.paa"]),
            min_compress_size: 100,
            max_compress_size: 1000,
            ..PackOptions::default()
        }
        .normalized();
        let matcher = CompressMatcher::new(&opts.compress, opts.matcher)
            .unwrap()
            .unwrap();

        let cases = [
            (Input::from_bytes("data/a.txt", vec![0u8; 256]), false),
            (Input::from_bytes("data/b.paa", vec![0u8; 50]), false),
            (
                Input::from_stream("data/c.paa", || Ok(Box::new(std::io::empty()) as _), None),
                true,
            ),
            (Input::from_bytes("data/d.paa", vec![0u8; 200]), true),
        ];

        for (input, want) in &cases {
            assert_eq!(
                should_use_compression_for_input(&opts, Some(&matcher), input),
                *want,
                "input {}",
                input.path
            );
        }
    }

    #[test]
    fn in_memory_path_requires_known_bounded_size() {
        let opts = PackOptions {
            max_compress_size: 1024,
            ..PackOptions::default()
        };

        assert!(!should_use_in_memory_compress_path(&opts, None, 100));
        assert!(!should_use_in_memory_compress_path(&opts, Some(0), 100));
        assert!(!should_use_in_memory_compress_path(&opts, Some(1025), 1 << 30));
        assert!(!should_use_in_memory_compress_path(&opts, Some(128), 127));
        assert!(should_use_in_memory_compress_path(&opts, Some(128), 1 << 30));
    }

    #[test]
    fn bounded_copy_exact_limit() {
        let mut dst = Vec::new();
        let mut src = b"abc".as_slice();
        let mut buf = [0u8; 2];

        let written = copy_payload_bounded(&mut dst, &mut src, 3, &mut buf, "x").unwrap();
        assert_eq!(written, 3);
        assert_eq!(dst, b"abc");
    }

    #[test]
    fn bounded_copy_detects_overrun() {
        let mut dst = Vec::new();
        let mut src = b"abcdef".as_slice();
        let mut buf = [0u8; 2];

        let err = copy_payload_bounded(&mut dst, &mut src, 3, &mut buf, "x").unwrap_err();
        assert!(matches!(err, Error::SizeOverflow { .. }));
        assert_eq!(dst, b"abc");
    }

    #[test]
    fn pack_rejects_empty_inputs() {
        let mut dst = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            pack(&mut dst, Vec::new(), &PackOptions::default()),
            Err(Error::EmptyInputs)
        ));
    }

    #[test]
    fn pack_rejects_duplicate_paths_case_insensitive() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let inputs = vec![
            Input::from_bytes("data/a.txt", b"ok".to_vec()),
            Input::from_bytes("data/A.TXT", b"ok".to_vec()),
        ];

        assert!(matches!(
            pack(&mut dst, inputs, &PackOptions::default()),
            Err(Error::DuplicateEntryPath { .. })
        ));
    }

    #[test]
    fn pack_rejects_invalid_normalized_path() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let inputs = vec![Input::from_bytes("/", b"ok".to_vec())];

        assert!(matches!(
            pack(&mut dst, inputs, &PackOptions::default()),
            Err(Error::InvalidEntryPath { .. })
        ));
    }

    #[test]
    fn pack_writes_zero_offset_fields() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let inputs = vec![
            Input::from_bytes("a.txt", b"hello".to_vec()),
            Input::from_bytes("b.txt", b"world".to_vec()),
        ];
        pack(&mut dst, inputs, &PackOptions::default()).unwrap();

        let bytes = dst.into_inner();
        // First entry record: fixed header, header terminator, name, NUL.
        let fields_start = HEADER_SIZE + 1 + "a.txt".len() + 1;
        let offset_field =
            LittleEndian::read_u32(&bytes[fields_start + 8..fields_start + 12]);
        assert_eq!(offset_field, 0);
    }

    #[test]
    fn unknown_size_candidate_stays_raw() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let payload = vec![b'x'; 64 * 1024];
        let inputs = vec![Input::from_stream(
            "data/a.txt",
            move || Ok(Box::new(std::io::Cursor::new(payload.clone())) as _),
            None,
        )];

        pack(&mut dst, inputs, &opts_with_rules(&["*"])).unwrap();

        let bytes = dst.into_inner();
        let size = bytes.len() as u64;
        let reader = crate::reader::Reader::from_read_at(bytes, size).unwrap();
        assert!(!reader.entries()[0].is_compressed());
    }

    #[test]
    fn known_size_candidate_compresses() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let inputs = vec![Input::from_bytes("data/a.txt", vec![b'x'; 64 * 1024])];

        let result = pack(&mut dst, inputs, &opts_with_rules(&["*"])).unwrap();
        assert_eq!(result.compressed_entries, 1);

        let bytes = dst.into_inner();
        let size = bytes.len() as u64;
        let reader = crate::reader::Reader::from_read_at(bytes, size).unwrap();
        let entry = &reader.entries()[0];
        assert!(entry.is_compressed());
        assert_eq!(entry.original_size, 64 * 1024);
        assert!(entry.data_size < 64 * 1024);
        assert_eq!(reader.read_entry("data/a.txt").unwrap(), vec![b'x'; 64 * 1024]);
    }

    #[test]
    fn oversized_candidate_stays_raw() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let inputs = vec![Input::from_bytes("data/a.txt", vec![b'x'; 64 * 1024])];
        let opts = PackOptions {
            compress: include_rules(&["*"]),
            min_compress_size: 1,
            max_compress_size: 1024,
            ..PackOptions::default()
        };

        pack(&mut dst, inputs, &opts).unwrap();

        let bytes = dst.into_inner();
        let size = bytes.len() as u64;
        let reader = crate::reader::Reader::from_read_at(bytes, size).unwrap();
        assert!(!reader.entries()[0].is_compressed());
    }

    #[test]
    fn pack_statistics_and_progress_events() {
        let mut dst = std::io::Cursor::new(Vec::new());
        let compressible = vec![b'x'; 64 * 1024];
        let inputs = vec![
            Input::from_bytes("c.bin", b"raw-content".to_vec()),
            Input::from_bytes("a.txt", compressible.clone()),
            Input::from_stream(
                "b.txt",
                move || Ok(Box::new(std::io::Cursor::new(compressible.clone())) as _),
                None,
            ),
        ];

        let opts = PackOptions {
            compress: include_rules(&["*.txt"]),
            min_compress_size: 1,
            ..PackOptions::default()
        };

        let progress = std::sync::Mutex::new(Vec::new());
        let result = pack_with_progress(&mut dst, inputs, &opts, &|event| {
            progress.lock().unwrap().push(event.clone());
        })
        .unwrap();

        assert_eq!(result.written_entries, 3);
        assert_eq!(result.compressed_entries, 1);
        assert_eq!(result.skipped_compression_entries, 1);
        assert_eq!(result.raw_bytes + result.compressed_bytes, result.data_size);

        let events = progress.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.compression_candidate).count(), 2);
        let compressed: Vec<_> = events.iter().filter(|e| e.compressed).collect();
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].mime, Mime::Compressed);
        assert!(compressed[0].original_size > 0);
    }

    #[test]
    fn deterministic_output_regardless_of_input_order() {
        let build = |order: &[(&str, &[u8])]| {
            let mut dst = std::io::Cursor::new(Vec::new());
            let inputs = order
                .iter()
                .map(|(path, data)| Input::from_bytes(*path, data.to_vec()))
                .collect();
            pack(&mut dst, inputs, &PackOptions::default()).unwrap();
            dst.into_inner()
        };

        let forward = build(&[("a.txt", b"alpha"), ("b.txt", b"beta"), ("c/d.txt", b"delta")]);
        let shuffled = build(&[("c/d.txt", b"delta"), ("a.txt", b"alpha"), ("b.txt", b"beta")]);
        assert_eq!(forward, shuffled);
    }
}
