//! PBO reader: parses the header block, entry index, and optional SHA-1
//! trailer, and exposes positional payload streams.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};

use crate::compression::lzss::LzssDecoder;
use crate::error::{Error, Result};
use crate::filter::apply_entry_filters;
use crate::path::normalize_path_bytes;
use crate::source::{ReadAt, Section};
use crate::types::{
    ByteString, EntryInfo, HeaderPair, Mime, OffsetMode, ReaderOptions, HEADER_SIZE, MAX_NAME_LEN,
    SHA_SIZE,
};

/// Chunk size used by the NUL-terminated string scanner.
const SCAN_CHUNK_SIZE: usize = 256;
/// Sequential read buffer for entry table parsing.
const ENTRY_BUFFER_SIZE: usize = 64 * 1024;

/// Read-only access to a parsed PBO file.
///
/// Parsed metadata is immutable for the reader's lifetime. Payload reads
/// use absolute offsets, so a `Reader` can be shared across threads.
#[derive(Debug)]
pub struct Reader<S> {
    source: S,
    size: u64,
    headers: Vec<HeaderPair>,
    entries: Vec<EntryInfo>,
    data_start: u64,
    sha1_trailer: Option<[u8; SHA_SIZE]>,
    closed: Mutex<bool>,
}

impl Reader<File> {
    /// Open a PBO file by path and parse its header and index structures.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is not a valid PBO.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &ReaderOptions::default())
    }

    /// Open a PBO file with explicit reader options.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is not a valid PBO.
    pub fn open_with_options(path: impl AsRef<Path>, opts: &ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        Self::from_read_at_with_options(file, size, opts)
    }
}

impl<S: ReadAt> Reader<S> {
    /// Parse a PBO from an existing random-access source of known size.
    ///
    /// # Errors
    /// Returns an error if the source is not a valid PBO.
    pub fn from_read_at(source: S, size: u64) -> Result<Self> {
        Self::from_read_at_with_options(source, size, &ReaderOptions::default())
    }

    /// Parse a PBO from a random-access source with explicit options.
    ///
    /// # Errors
    /// Returns an error if the source is not a valid PBO.
    pub fn from_read_at_with_options(source: S, size: u64, opts: &ReaderOptions) -> Result<Self> {
        let parsed = parse_archive(&source, size, opts)?;

        Ok(Self {
            source,
            size,
            headers: parsed.headers,
            entries: parsed.entries,
            data_start: parsed.data_start,
            sha1_trailer: parsed.sha1_trailer,
            closed: Mutex::new(false),
        })
    }

    /// Parsed entry metadata, with reader-option filters applied.
    #[must_use]
    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    /// Parsed header key-value pairs in original order.
    #[must_use]
    pub fn headers(&self) -> &[HeaderPair] {
        &self.headers
    }

    /// The 20-byte trailer hash, when the file ends with one.
    #[must_use]
    pub fn sha1_trailer(&self) -> Option<[u8; SHA_SIZE]> {
        self.sha1_trailer
    }

    /// Absolute offset of the first payload byte.
    #[must_use]
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Mark the reader closed. Idempotent; later payload reads fail with
    /// [`Error::Closed`]. The underlying source is released on drop.
    pub fn close(&self) {
        let mut closed = self.closed.lock().expect("reader close mutex poisoned");
        *closed = true;
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        let closed = self.closed.lock().expect("reader close mutex poisoned");
        if *closed {
            return Err(Error::Closed);
        }

        Ok(())
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Resolve one entry by normalized path, compared byte-equal.
    #[must_use]
    pub fn find_entry(&self, name: &str) -> Option<&EntryInfo> {
        let lookup = normalize_path_bytes(name.as_bytes());
        self.entries
            .iter()
            .find(|e| normalize_path_bytes(e.path.as_bytes()) == lookup)
    }

    /// Open the named entry for reading.
    ///
    /// The returned stream yields decompressed content for LZSS-compressed
    /// entries.
    ///
    /// # Errors
    /// Fails when the entry is missing, the reader is closed, or the entry
    /// uses the `Encr` encoding.
    pub fn open_entry(&self, name: &str) -> Result<EntryReader<'_>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| Error::EntryNotFound {
                path: name.to_string(),
            })?
            .clone();

        self.open_entry_info(&entry)
    }

    /// Open an entry stream from already resolved metadata.
    ///
    /// # Errors
    /// Fails when the reader is closed or the entry uses `Encr` encoding.
    pub fn open_entry_info(&self, entry: &EntryInfo) -> Result<EntryReader<'_>> {
        self.ensure_open()?;

        if entry.mime == Mime::Encoded {
            return Err(Error::UnsupportedEncoding {
                path: entry.path.to_string_lossy().into_owned(),
            });
        }

        let section = Section::new(&self.source, u64::from(entry.offset), u64::from(entry.data_size));
        let stream = if entry.is_compressed() {
            EntryStream::Compressed(Box::new(LzssDecoder::new(
                section,
                u64::from(entry.original_size),
            )))
        } else {
            EntryStream::Raw(section)
        };

        Ok(EntryReader { stream })
    }

    /// Read the full decompressed content of the named entry.
    ///
    /// # Errors
    /// Fails when the entry is missing or its payload cannot be decoded.
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| Error::EntryNotFound {
                path: name.to_string(),
            })?
            .clone();

        self.read_entry_info(&entry)
    }

    /// Read the full decompressed content of an already resolved entry.
    ///
    /// # Errors
    /// Fails when the payload cannot be decoded.
    pub fn read_entry_info(&self, entry: &EntryInfo) -> Result<Vec<u8>> {
        let mut stream = self.open_entry_info(entry)?;
        let capacity = if entry.original_size > 0 {
            entry.original_size
        } else {
            entry.data_size
        };

        let mut out = Vec::with_capacity(capacity as usize);
        stream
            .read_to_end(&mut out)
            .map_err(|e| classify_payload_error(entry, e))?;

        Ok(out)
    }
}

/// Payload stream of one entry; implements [`Read`].
pub struct EntryReader<'a> {
    stream: EntryStream<'a>,
}

enum EntryStream<'a> {
    Raw(Section<'a>),
    Compressed(Box<LzssDecoder<Section<'a>>>),
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            EntryStream::Raw(section) => section.read(buf),
            EntryStream::Compressed(decoder) => decoder.read(buf),
        }
    }
}

/// Map decode failures of compressed payloads to a decompress error.
pub(crate) fn classify_payload_error(entry: &EntryInfo, err: io::Error) -> Error {
    if entry.is_compressed() && err.kind() == io::ErrorKind::InvalidData {
        return Error::Decompress {
            path: entry.path.to_string_lossy().into_owned(),
            detail: err.to_string(),
        };
    }

    Error::Io(err)
}

/// Read only the header key-value pairs of a PBO file.
///
/// Tolerates a malformed entry table: only the header section is parsed.
///
/// # Errors
/// Fails when the fixed header or the key-value block is malformed.
pub fn read_headers(path: impl AsRef<Path>) -> Result<Vec<HeaderPair>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    read_headers_from(&file, size)
}

/// Read only the header key-value pairs from a random-access source.
///
/// # Errors
/// Fails when the fixed header or the key-value block is malformed.
pub fn read_headers_from(source: &dyn ReadAt, size: u64) -> Result<Vec<HeaderPair>> {
    if size < HEADER_SIZE as u64 {
        return Err(Error::InvalidHeader);
    }

    let (headers, _) = parse_header_section(source)?;
    Ok(headers)
}

/// Parse entry metadata from a PBO file without payload reads.
///
/// # Errors
/// Fails when the archive structure is malformed.
pub fn list_entries(path: impl AsRef<Path>, opts: &ReaderOptions) -> Result<Vec<EntryInfo>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    list_entries_from(&file, size, opts)
}

/// Parse entry metadata from a random-access source.
///
/// # Errors
/// Fails when the archive structure is malformed.
pub fn list_entries_from(
    source: &dyn ReadAt,
    size: u64,
    opts: &ReaderOptions,
) -> Result<Vec<EntryInfo>> {
    if size < HEADER_SIZE as u64 {
        return Err(Error::InvalidHeader);
    }

    let (_, table_offset) = parse_header_section(source)?;
    let (mut entries, data_start) = parse_entries(source, table_offset, size)?;
    resolve_entry_offsets(&mut entries, data_start, size, opts.offset_mode)?;

    apply_entry_filters(entries, opts)
}

struct ParsedArchive {
    headers: Vec<HeaderPair>,
    entries: Vec<EntryInfo>,
    data_start: u64,
    sha1_trailer: Option<[u8; SHA_SIZE]>,
}

/// Read and validate the full PBO structure.
fn parse_archive(source: &dyn ReadAt, size: u64, opts: &ReaderOptions) -> Result<ParsedArchive> {
    let (headers, table_offset) = parse_header_section(source)?;
    let (mut entries, data_start) = parse_entries(source, table_offset, size)?;

    resolve_entry_offsets(&mut entries, data_start, size, opts.offset_mode)?;
    let entries = apply_entry_filters(entries, opts)?;

    // Trailer presence is advisory on open, never an authentication gate.
    let mut sha1_trailer = None;
    if size >= (HEADER_SIZE as u64) {
        let mut tail = [0u8; HEADER_SIZE];
        if source
            .read_exact_at(&mut tail, size - HEADER_SIZE as u64)
            .is_ok()
            && tail[0] == 0x00
        {
            let mut digest = [0u8; SHA_SIZE];
            digest.copy_from_slice(&tail[1..]);
            sha1_trailer = Some(digest);
        }
    }

    Ok(ParsedArchive {
        headers,
        entries,
        data_start,
        sha1_trailer,
    })
}

/// Parse the fixed header and key-value pairs; returns the entry table offset.
fn parse_header_section(source: &dyn ReadAt) -> Result<(Vec<HeaderPair>, u64)> {
    let mut fixed = [0u8; HEADER_SIZE];
    source.read_exact_at(&mut fixed, 0).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::InvalidHeader
        } else {
            Error::Io(e)
        }
    })?;

    // The first index record must carry the "Vers" marker.
    if LittleEndian::read_u32(&fixed[1..5]) != Mime::HEADER_TAG {
        return Err(Error::InvalidHeader);
    }

    let mut headers = Vec::with_capacity(4);
    let mut offset = HEADER_SIZE as u64;
    loop {
        let (key, consumed) = read_nul_terminated(source, offset)?;
        offset += consumed;
        if key.is_empty() {
            break;
        }

        let (value, consumed) = read_nul_terminated(source, offset)?;
        offset += consumed;
        headers.push(HeaderPair {
            key: ByteString::new(key),
            value: ByteString::new(value),
        });
    }

    Ok((headers, offset))
}

/// Parse entry records; returns entries with stored offsets plus the
/// payload start offset.
fn parse_entries(source: &dyn ReadAt, table_offset: u64, size: u64) -> Result<(Vec<EntryInfo>, u64)> {
    if table_offset >= size {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "entry table starts past end of file",
        )));
    }

    // Sequential buffered reads keep ReadAt syscall overhead off the table walk.
    let section = Section::new(source, table_offset, size - table_offset);
    let mut reader = BufReader::with_capacity(ENTRY_BUFFER_SIZE, section);

    let mut entries = Vec::with_capacity(estimate_entry_capacity(size - table_offset));
    let mut offset = table_offset;
    let mut name_buf = Vec::with_capacity(SCAN_CHUNK_SIZE);

    loop {
        name_buf.clear();
        let consumed = reader.read_until(0, &mut name_buf)?;
        if consumed == 0 || name_buf.last() != Some(&0) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unterminated entry filename",
            )));
        }
        name_buf.pop();
        offset += consumed as u64;

        let mut fields = [0u8; 20];
        reader.read_exact(&mut fields)?;
        offset += fields.len() as u64;

        let mime = LittleEndian::read_u32(&fields[0..4]);
        let original_size = LittleEndian::read_u32(&fields[4..8]);
        let stored_offset = LittleEndian::read_u32(&fields[8..12]);
        let timestamp = LittleEndian::read_u32(&fields[12..16]);
        let data_size = LittleEndian::read_u32(&fields[16..20]);

        let is_terminator = name_buf.is_empty()
            && mime == 0
            && original_size == 0
            && stored_offset == 0
            && timestamp == 0
            && data_size == 0;
        if is_terminator {
            return Ok((entries, offset));
        }

        if name_buf.len() > MAX_NAME_LEN {
            return Err(Error::FileNameTooLong {
                length: name_buf.len(),
            });
        }

        entries.push(EntryInfo {
            path: ByteString::from(name_buf.as_slice()),
            offset: stored_offset,
            data_size,
            original_size,
            timestamp,
            mime: Mime::from_u32(mime),
        });
    }
}

/// Conservative initial capacity for parsed entry metadata.
fn estimate_entry_capacity(remaining_bytes: u64) -> usize {
    const MIN_CAP: usize = 128;
    const MAX_CAP: usize = 8192;
    // remaining_bytes includes the payload region, so stay conservative.
    const AVG_ENTRY_BYTES: u64 = 512;

    usize::try_from(remaining_bytes / AVG_ENTRY_BYTES)
        .unwrap_or(MAX_CAP)
        .clamp(MIN_CAP, MAX_CAP)
}

/// Apply the selected offset policy and validate payload bounds.
fn resolve_entry_offsets(
    entries: &mut [EntryInfo],
    data_start: u64,
    total_size: u64,
    mode: OffsetMode,
) -> Result<()> {
    match mode {
        OffsetMode::Sequential => assign_sequential_offsets(entries, data_start)?,
        OffsetMode::StoredCompat => {
            if !try_assign_stored_offsets(entries, data_start, total_size).unwrap_or(false) {
                assign_sequential_offsets(entries, data_start)?;
            }
        }
        OffsetMode::StoredStrict => match try_assign_stored_offsets(entries, data_start, total_size)
        {
            Ok(true) => {}
            Ok(false) => assign_sequential_offsets(entries, data_start)?,
            Err(detail) => return Err(Error::InvalidEntryOffset { detail }),
        },
    }

    validate_resolved_offsets(entries, data_start, total_size)
}

/// Derive payload offsets from `data_start` and previous entry sizes.
fn assign_sequential_offsets(entries: &mut [EntryInfo], data_start: u64) -> Result<()> {
    let mut current = u32::try_from(data_start).map_err(|_| Error::SizeOverflow {
        detail: format!("data start offset {data_start}"),
    })?;

    for entry in entries.iter_mut() {
        entry.offset = current;
        current = current
            .checked_add(entry.data_size)
            .ok_or_else(|| Error::SizeOverflow {
                detail: format!("entry {} size would exceed 4 GiB", entry.path),
            })?;
    }

    Ok(())
}

/// Try stored non-zero index offsets in relative then absolute form (or the
/// reverse, by heuristic). Returns `Ok(false)` when no stored offset is
/// meaningful; `Err` describes why both interpretations failed.
fn try_assign_stored_offsets(
    entries: &mut [EntryInfo],
    data_start: u64,
    total_size: u64,
) -> std::result::Result<bool, String> {
    if entries.is_empty() || entries.iter().all(|e| e.offset == 0) {
        return Ok(false);
    }

    let first = u64::from(entries[0].offset);
    // Heuristic: first offset zero usually means relative, first at or past
    // data_start usually absolute.
    let try_relative_first = first == 0 || first < data_start;
    let order = if try_relative_first {
        [false, true]
    } else {
        [true, false]
    };

    let mut last_err = String::new();
    for absolute in order {
        match compute_stored_offsets(entries, data_start, total_size, absolute) {
            Ok(resolved) => {
                for (entry, offset) in entries.iter_mut().zip(resolved) {
                    entry.offset = offset;
                }
                return Ok(true);
            }
            Err(detail) => last_err = detail,
        }
    }

    Err(last_err)
}

/// Validate stored offsets in one interpretation without mutating entries.
fn compute_stored_offsets(
    entries: &[EntryInfo],
    data_start: u64,
    total_size: u64,
    absolute: bool,
) -> std::result::Result<Vec<u32>, String> {
    let adjust = if absolute { 0 } else { data_start };
    let mut resolved = Vec::with_capacity(entries.len());
    let mut prev = 0u64;

    for entry in entries {
        let offset = u64::from(entry.offset) + adjust;
        if offset < data_start {
            return Err(format!("entry {} offset before data start", entry.path));
        }
        if offset > u64::from(u32::MAX) {
            return Err(format!("entry {} offset out of range", entry.path));
        }
        if offset < prev {
            return Err(format!("entry {} offset is not monotonic", entry.path));
        }

        let end = offset + u64::from(entry.data_size);
        if end > total_size {
            return Err(format!("entry {} payload out of file bounds", entry.path));
        }

        resolved.push(offset as u32);
        prev = offset;
    }

    Ok(resolved)
}

/// Final validation applied to all offset modes.
fn validate_resolved_offsets(
    entries: &[EntryInfo],
    data_start: u64,
    total_size: u64,
) -> Result<()> {
    for entry in entries {
        let offset = u64::from(entry.offset);
        if offset < data_start {
            return Err(Error::InvalidEntryOffset {
                detail: format!("entry {} offset before data start", entry.path),
            });
        }

        let end = offset + u64::from(entry.data_size);
        if end > total_size {
            return Err(Error::InvalidEntryOffset {
                detail: format!("entry {} payload out of file bounds", entry.path),
            });
        }
    }

    Ok(())
}

/// Read a NUL-terminated byte string at `offset`, scanning in chunks to
/// avoid one-byte positional reads on large indices. Bytes are returned
/// verbatim; no encoding is assumed.
fn read_nul_terminated(source: &dyn ReadAt, offset: u64) -> Result<(Vec<u8>, u64)> {
    let mut collected: Vec<u8> = Vec::new();
    let mut total = 0u64;
    let mut chunk = [0u8; SCAN_CHUNK_SIZE];

    loop {
        let n = source.read_at(&mut chunk, offset + total)?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unterminated string",
            )));
        }

        let part = &chunk[..n];
        if let Some(idx) = part.iter().position(|&b| b == 0) {
            let consumed = total + idx as u64 + 1;
            collected.extend_from_slice(&part[..idx]);
            return Ok((collected, consumed));
        }

        collected.extend_from_slice(part);
        total += n as u64;
    }
}
