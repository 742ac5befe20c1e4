//! Error types for `rvbank`

use thiserror::Error;

/// The error type for PBO archive operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Parse Errors ====================
    /// The file is missing the fixed 21-byte header or the `Vers` tag.
    #[error("invalid PBO file: missing or bad header")]
    InvalidHeader,

    /// An entry filename in the index exceeds the 512-byte limit.
    #[error("entry filename exceeds maximum length: {length} bytes")]
    FileNameTooLong {
        /// Length of the offending name in bytes.
        length: usize,
    },

    /// An entry offset is malformed for the selected offset policy.
    #[error("invalid entry offset: {detail}")]
    InvalidEntryOffset {
        /// Description of the failing entry and bound.
        detail: String,
    },

    // ==================== Path Errors ====================
    /// An entry path is empty or unrepresentable after normalization.
    #[error("invalid entry path: {path:?}")]
    InvalidEntryPath {
        /// The raw path as provided by the caller or the archive.
        path: String,
    },

    /// Two inputs resolve to the same case-insensitive archive path.
    #[error("duplicate entry path: {path:?} conflicts with {existing:?}")]
    DuplicateEntryPath {
        /// The later of the two conflicting paths.
        path: String,
        /// The path already claimed under the same key.
        existing: String,
    },

    /// An archive entry path is unsafe as an extraction destination.
    #[error("invalid extract path: {path:?}")]
    InvalidExtractPath {
        /// The rejected path.
        path: String,
    },

    // ==================== Size/Limit Errors ====================
    /// An offset or size would exceed the 4 GiB PBO payload limit,
    /// or a bounded copy produced more bytes than its declared size.
    #[error("size exceeds u32 or 4 GiB PBO limit: {detail}")]
    SizeOverflow {
        /// Description of the overflowing value.
        detail: String,
    },

    /// A payload source returned zero bytes repeatedly without reaching EOF.
    #[error("payload source stalled without progress: {path}")]
    NoProgress {
        /// Entry path being streamed when the source stalled.
        path: String,
    },

    // ==================== Lookup/Plan Errors ====================
    /// The named entry does not exist in the archive.
    #[error("entry not found: {path}")]
    EntryNotFound {
        /// The looked-up archive path.
        path: String,
    },

    /// Pack was invoked with an empty input list.
    #[error("no inputs provided for pack")]
    EmptyInputs,

    /// One or more compression path rules failed to compile.
    #[error("invalid compress rules: {0}")]
    InvalidCompressPattern(#[from] globset::Error),

    // ==================== Signature Hash Errors ====================
    /// The signature hash policy version is not supported.
    #[error("unsupported signature version: {version}")]
    UnsupportedSignVersion {
        /// The rejected version number.
        version: u32,
    },

    /// The game type is not supported for v3 signature hashing.
    #[error("unsupported game type for v3 signatures: {game:?}")]
    UnsupportedGameTypeV3 {
        /// The rejected game type discriminator.
        game: String,
    },

    // ==================== Trailer Errors ====================
    /// The file is too short to hold a `0x00` + SHA-1 trailer.
    #[error("file too short for SHA1 trailer")]
    TrailerTooShort,

    /// The trailer does not start with a `0x00` marker byte.
    #[error("trailer does not start with 0x00")]
    InvalidTrailerPrefix,

    /// The stored trailer hash does not match the file content.
    #[error("trailer hash mismatch")]
    TrailerHashMismatch,

    // ==================== Payload Codec Errors ====================
    /// An LZSS-compressed payload is truncated or fails its checksum.
    #[error("decompress entry {path}: {detail}")]
    Decompress {
        /// Entry path being decoded.
        path: String,
        /// Description of the stream defect.
        detail: String,
    },

    /// The entry payload uses the `Encr` encoding, which has no read path.
    #[error("entry {path} uses unsupported Encr encoding")]
    UnsupportedEncoding {
        /// The encoded entry's path.
        path: String,
    },

    // ==================== Lifecycle Errors ====================
    /// The reader was already closed.
    #[error("reader already closed")]
    Closed,

    /// A failed editor commit could not restore the backup archive.
    #[error("commit failed ({commit}) and rollback failed ({rollback})")]
    RollbackFailed {
        /// The original commit error.
        commit: String,
        /// The error hit while restoring the backup.
        rollback: String,
    },
}

/// A specialized Result type for PBO archive operations.
pub type Result<T> = std::result::Result<T, Error>;
