//! Core PBO data model: entry metadata, header pairs, pack inputs, options.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::ops::Deref;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::compression::CompressRule;

/// Fixed PBO header size in bytes.
pub(crate) const HEADER_SIZE: usize = 21;
/// SHA-1 digest size in the trailer.
pub(crate) const SHA_SIZE: usize = 20;
/// Maximum entry filename length in bytes.
pub(crate) const MAX_NAME_LEN: usize = 512;
/// Maximum addressable payload in a classic PBO (4 GiB).
pub(crate) const MAX_PBO_DATA: u64 = 1 << 32;

/// Default buffered writer size for pack operations.
pub const DEFAULT_WRITE_BUFFER: usize = 16 * 1024 * 1024;
/// Default lower bound for compression candidates.
pub const DEFAULT_MIN_COMPRESS_SIZE: u32 = 512;
/// Default upper bound for compression candidates, which also bounds the
/// in-memory compression path.
pub const DEFAULT_MAX_COMPRESS_SIZE: u32 = 16 * 1024 * 1024;

/// An archive string: 8-bit bytes, interpreted as ASCII for comparisons.
///
/// Entry names and header pairs are stored on disk as raw NUL-terminated
/// bytes with no declared encoding. Non-ASCII bytes are preserved verbatim
/// and compared byte-equal; they are never re-encoded. Lossy UTF-8
/// conversion is available for display and diagnostics only.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteString(Vec<u8>);

impl ByteString {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy UTF-8 view for display and diagnostics; invalid bytes render
    /// as U+FFFD. Identity and comparisons always use [`Self::as_bytes`].
    #[must_use]
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl Deref for ByteString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl From<&str> for ByteString {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for ByteString {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for ByteString {
    fn from(value: &[u8; N]) -> Self {
        Self(value.to_vec())
    }
}

impl PartialEq<str> for ByteString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for ByteString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<[u8]> for ByteString {
    fn eq(&self, other: &[u8]) -> bool {
        self.0 == other
    }
}

/// The 4-byte PBO entry type tag (stored little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mime {
    /// `Vers` marker of the fixed header record.
    Header,
    /// `Cprs` LZSS-compressed payload.
    Compressed,
    /// `Encr` encoded payload (read-through only, never produced).
    Encoded,
    /// Raw payload or index terminator.
    Raw,
    /// Any tag this library does not interpret; preserved verbatim.
    Other(u32),
}

impl Mime {
    pub(crate) const HEADER_TAG: u32 = 0x5665_7273;
    pub(crate) const COMPRESSED_TAG: u32 = 0x4370_7273;
    pub(crate) const ENCODED_TAG: u32 = 0x456e_6372;

    /// Decode a mime tag from its stored u32 value.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            Self::HEADER_TAG => Mime::Header,
            Self::COMPRESSED_TAG => Mime::Compressed,
            Self::ENCODED_TAG => Mime::Encoded,
            0 => Mime::Raw,
            other => Mime::Other(other),
        }
    }

    /// Encode this mime tag to its stored u32 value.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            Mime::Header => Self::HEADER_TAG,
            Mime::Compressed => Self::COMPRESSED_TAG,
            Mime::Encoded => Self::ENCODED_TAG,
            Mime::Raw => 0,
            Mime::Other(other) => other,
        }
    }
}

impl Default for Mime {
    fn default() -> Self {
        Mime::Raw
    }
}

/// Metadata of a single parsed PBO entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Entry path as stored in the archive index, bytes preserved verbatim.
    pub path: ByteString,
    /// Resolved byte offset of the entry payload.
    pub offset: u32,
    /// Stored payload size in bytes.
    pub data_size: u32,
    /// Uncompressed size for compressed entries; zero otherwise.
    pub original_size: u32,
    /// Unix timestamp from the entry record.
    pub timestamp: u32,
    /// Entry mime marker.
    pub mime: Mime,
}

impl EntryInfo {
    /// Whether this entry is stored with LZSS compression.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.mime == Mime::Compressed
            || (self.original_size != 0 && self.data_size < self.original_size)
    }
}

/// A PBO header key-value pair, written in provided order. Both sides are
/// raw archive bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub key: ByteString,
    pub value: ByteString,
}

impl HeaderPair {
    /// Convenience constructor.
    pub fn new(key: impl Into<ByteString>, value: impl Into<ByteString>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Payload source backing one pack [`Input`].
pub enum InputSource {
    /// In-memory payload.
    Bytes(Vec<u8>),
    /// Payload read from a filesystem path at pack time.
    File(PathBuf),
    /// Payload produced by a caller-provided opener.
    Stream(Box<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>),
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            InputSource::File(path) => f.debug_tuple("File").field(path).finish(),
            InputSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One source stream to be packed into a PBO entry.
#[derive(Debug)]
pub struct Input {
    /// Destination path inside the PBO.
    pub path: String,
    /// Payload source.
    pub source: InputSource,
    /// Expected payload size in bytes, when known.
    ///
    /// Unknown-size inputs are never compression candidates for the
    /// in-memory path and are streamed raw.
    pub size_hint: Option<u64>,
    /// Optional entry timestamp.
    pub mod_time: Option<SystemTime>,
}

impl Input {
    /// Build an input from an in-memory payload; the size hint is implied.
    pub fn from_bytes(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            path: path.into(),
            size_hint: Some(bytes.len() as u64),
            source: InputSource::Bytes(bytes),
            mod_time: None,
        }
    }

    /// Build an input backed by a file on disk.
    ///
    /// The file is stat'ed immediately for the size hint and modification
    /// time, and opened lazily during pack.
    ///
    /// # Errors
    /// Returns an error if the file metadata cannot be read.
    pub fn from_file(path: impl Into<String>, file_path: impl Into<PathBuf>) -> io::Result<Self> {
        let file_path = file_path.into();
        let meta = fs::metadata(&file_path)?;

        Ok(Self {
            path: path.into(),
            size_hint: Some(meta.len()),
            mod_time: meta.modified().ok(),
            source: InputSource::File(file_path),
        })
    }

    /// Build an input from a caller-provided stream opener.
    pub fn from_stream<F>(path: impl Into<String>, open: F, size_hint: Option<u64>) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            source: InputSource::Stream(Box::new(open)),
            size_hint,
            mod_time: None,
        }
    }

    /// Open the payload stream for this input.
    pub(crate) fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.source {
            InputSource::Bytes(bytes) => Ok(Box::new(bytes.as_slice())),
            InputSource::File(path) => Ok(Box::new(fs::File::open(path)?)),
            InputSource::Stream(open) => {
                let stream: Box<dyn Read> = open()?;
                Ok(stream)
            }
        }
    }
}

/// Options of the compression path-rule matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherOptions {
    /// Match patterns case-insensitively. Defaults to `true`.
    pub case_insensitive: bool,
    /// Include paths no rule matched. Defaults to `false` (exclude).
    pub default_include: bool,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            default_include: false,
        }
    }
}

/// Pack behavior configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackOptions {
    /// Header key-value pairs, written in this order. A `prefix` key has its
    /// value normalized to `\` separators on write.
    pub headers: Vec<HeaderPair>,
    /// Ordered path rules selecting compression candidates. An empty rule
    /// set disables compression entirely.
    pub compress: Vec<CompressRule>,
    /// Rule matching behavior.
    pub matcher: MatcherOptions,
    /// Buffered writer size in bytes; zero means [`DEFAULT_WRITE_BUFFER`].
    pub writer_buffer_size: usize,
    /// Entries smaller than this are never compressed; zero means
    /// [`DEFAULT_MIN_COMPRESS_SIZE`].
    pub min_compress_size: u32,
    /// Entries larger than this are never compressed; zero means
    /// [`DEFAULT_MAX_COMPRESS_SIZE`].
    pub max_compress_size: u32,
}

impl PackOptions {
    /// Copy of these options with zero values replaced by defaults.
    #[must_use]
    pub(crate) fn normalized(&self) -> Self {
        let mut opts = self.clone();
        if opts.writer_buffer_size < 4096 {
            opts.writer_buffer_size = DEFAULT_WRITE_BUFFER;
        }
        if opts.min_compress_size == 0 {
            opts.min_compress_size = DEFAULT_MIN_COMPRESS_SIZE;
        }
        if opts.max_compress_size == 0 || opts.max_compress_size <= opts.min_compress_size {
            opts.max_compress_size = DEFAULT_MAX_COMPRESS_SIZE;
        }

        opts
    }
}

/// One completed entry write event from the pack flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackEntryProgress {
    /// Entry path written to the archive.
    pub path: ByteString,
    /// Payload offset in the resulting archive.
    pub offset: u32,
    /// Stored payload size in bytes.
    pub data_size: u32,
    /// Original size for compressed entries; zero for raw entries.
    pub original_size: u32,
    /// Stored entry mime marker.
    pub mime: Mime,
    /// Whether the compression path was selected for this input.
    pub compression_candidate: bool,
    /// Whether a compressed payload was actually written.
    pub compressed: bool,
}

/// Callback invoked after each entry is fully written during pack.
pub type PackProgressCallback<'a> = &'a (dyn Fn(&PackEntryProgress) + Sync);

/// Pack output statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackResult {
    /// Number of entries written to the archive.
    pub written_entries: usize,
    /// Total payload bytes written.
    pub data_size: u64,
    /// Total index bytes written.
    pub index_size: u64,
    /// Bytes written for uncompressed payload entries.
    pub raw_bytes: u64,
    /// Bytes written for compressed payload entries.
    pub compressed_bytes: u64,
    /// Number of entries written with compressed payload.
    pub compressed_entries: usize,
    /// Number of compression candidates stored as raw payload.
    pub skipped_compression_entries: usize,
    /// End-to-end pack core duration.
    pub duration: Duration,
}

/// How the reader resolves payload offsets from the index table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMode {
    /// Ignore stored index offsets and derive payload offsets sequentially.
    ///
    /// This matches mainstream tooling, which writes zero offset fields.
    #[default]
    Sequential,
    /// Try stored non-zero offsets and silently fall back to sequential
    /// resolution on malformed data.
    StoredCompat,
    /// Require stored non-zero offsets to be valid and fail otherwise.
    StoredStrict,
}

/// Reader parse and filter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Offset resolution policy.
    pub offset_mode: OffsetMode,
    /// Drop malformed/mangled entries from the visible entry list.
    pub enable_junk_filter: bool,
    /// Drop entries whose `max(original_size, data_size)` is below this.
    pub min_entry_original_size: u32,
    /// Drop entries whose stored payload size is below this.
    pub min_entry_data_size: u32,
    /// Drop entries whose path contains non-ASCII bytes (any byte over
    /// 0x7f; no UTF-8 validation is attempted).
    pub filter_ascii_only: bool,
    /// Keep only entries equal to or under this normalized path prefix.
    pub entry_path_prefix: String,
    /// Replace control/format runes in entry paths with `_`.
    pub sanitize_control_chars: bool,
    /// Rewrite entry paths to filesystem-safe names for listing workflows.
    pub sanitize_names: bool,
}

/// Output file creation policy during extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFileMode {
    /// Try create-exclusive first, then fall back to truncate.
    #[default]
    Auto,
    /// Rewrite files in place; truncate only when the existing file is
    /// larger than the bytes just written.
    OverwriteSmart,
    /// Always truncate on open.
    Truncate,
    /// Create only when absent; fail on existing files.
    CreateOnly,
}

/// Extraction configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Output file creation policy.
    pub file_mode: ExtractFileMode,
    /// Limit extraction to this metadata list; `None` means all entries.
    pub entries: Option<Vec<EntryInfo>>,
    /// Number of extraction workers; zero means host parallelism.
    pub max_workers: usize,
    /// Disable the default path sanitization and require raw names to
    /// already be extraction-safe.
    pub raw_names: bool,
}

/// Callback invoked after one entry is fully written to disk.
pub type ExtractCallback<'a> = &'a (dyn Fn(&EntryInfo, u64, &std::path::Path) + Sync);

/// File-based archive edit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditOptions {
    /// Pack options applied to added/replaced entries during commit.
    pub pack: PackOptions,
    /// Backup generations kept after a successful commit: `0` removes the
    /// backup, `1` keeps `<archive>.bak`, `n` keeps `.bak` + `.bak.1..n-1`.
    pub backup_keep: usize,
}

/// Signature hash triple identifying one PBO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSet {
    /// SHA-1 of the full PBO content without the trailer.
    pub hash1: [u8; 20],
    /// Composed from hash1, the name hash, and the prefix header.
    pub hash2: [u8; 20],
    /// Composed from the file hash, the name hash, and the prefix header.
    pub hash3: [u8; 20],
}

impl fmt::Display for SignatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            hex::encode(self.hash1),
            hex::encode(self.hash2),
            hex::encode(self.hash3)
        )
    }
}

/// PBO signature hash policy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignVersion {
    /// Legacy hash policy: all extensions except a fixed exclusion list.
    V2,
    /// Current hash policy with per-game extension allow-lists.
    V3,
}

/// Game-specific hash policy discriminator for v3 signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// No game-specific policy; only valid for v2.
    #[default]
    Any,
    /// Arma 3 extension policy.
    Arma,
    /// DayZ extension policy.
    DayZ,
}

/// Convert a timestamp to the u32 Unix-seconds field with bounds clamping.
pub(crate) fn time_to_u32(time: Option<SystemTime>) -> u32 {
    let Some(time) = time else {
        return 0;
    };

    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => u32::try_from(since.as_secs()).unwrap_or(u32::MAX),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_string_preserves_non_utf8_bytes() {
        let raw = [b'n', 0xe9, b'.', b'c'];
        let name = ByteString::from(&raw);

        assert_eq!(name.as_bytes(), raw);
        assert_eq!(name.len(), 4);
        // Display is lossy; identity is not.
        assert_eq!(name.to_string_lossy(), "n\u{fffd}.c");
        assert_ne!(name.as_bytes(), name.to_string_lossy().as_bytes());
    }

    #[test]
    fn byte_string_compares_with_str() {
        let name = ByteString::from("a.txt");
        assert_eq!(name, "a.txt");
        assert_eq!(name, *"a.txt");
        assert!(name == *b"a.txt".as_slice());
    }

    #[test]
    fn byte_string_orders_bytewise() {
        let mut names = vec![
            ByteString::from("a.c"),
            ByteString::from("B.c"),
            ByteString::from(&[0xffu8][..]),
        ];
        names.sort();
        assert_eq!(names[0], "B.c");
        assert_eq!(names[1], "a.c");
        assert_eq!(names[2].as_bytes(), [0xff]);
    }

    #[test]
    fn mime_round_trips_known_and_unknown_tags() {
        for tag in [
            Mime::HEADER_TAG,
            Mime::COMPRESSED_TAG,
            Mime::ENCODED_TAG,
            0,
            0xdead_beef,
        ] {
            assert_eq!(Mime::from_u32(tag).to_u32(), tag);
        }

        assert_eq!(Mime::from_u32(Mime::COMPRESSED_TAG), Mime::Compressed);
        assert_eq!(Mime::from_u32(7), Mime::Other(7));
    }

    #[test]
    fn entry_is_compressed_by_mime_or_sizes() {
        let by_mime = EntryInfo {
            mime: Mime::Compressed,
            ..EntryInfo::default()
        };
        assert!(by_mime.is_compressed());

        let by_sizes = EntryInfo {
            original_size: 100,
            data_size: 40,
            ..EntryInfo::default()
        };
        assert!(by_sizes.is_compressed());

        let raw = EntryInfo {
            data_size: 40,
            ..EntryInfo::default()
        };
        assert!(!raw.is_compressed());
    }

    #[test]
    fn pack_options_normalized_fills_defaults() {
        let opts = PackOptions::default().normalized();
        assert_eq!(opts.writer_buffer_size, DEFAULT_WRITE_BUFFER);
        assert_eq!(opts.min_compress_size, DEFAULT_MIN_COMPRESS_SIZE);
        assert_eq!(opts.max_compress_size, DEFAULT_MAX_COMPRESS_SIZE);

        let inverted = PackOptions {
            min_compress_size: 4096,
            max_compress_size: 1024,
            ..PackOptions::default()
        }
        .normalized();
        assert_eq!(inverted.max_compress_size, DEFAULT_MAX_COMPRESS_SIZE);
    }

    #[test]
    fn time_to_u32_clamps() {
        assert_eq!(time_to_u32(None), 0);
        assert_eq!(time_to_u32(Some(UNIX_EPOCH)), 0);

        let past = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(time_to_u32(Some(past)), 0);

        let huge = UNIX_EPOCH + Duration::from_secs(u64::from(u32::MAX) + 100);
        assert_eq!(time_to_u32(Some(huge)), u32::MAX);
    }
}
