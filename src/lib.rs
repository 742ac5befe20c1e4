//! rvbank - read, extract, pack, hash, and transactionally edit PBO
//! ("Packed Bank of files") archives used by the Real Virtuality and
//! Enfusion engines (Arma, DayZ).
//!
//! The crate is built for streaming workflows: packing accepts
//! caller-provided sources ([`Input`]), and reading/extracting never loads
//! the full archive payload into memory.
//!
//! Compression rules in short:
//! - the path must be included by [`PackOptions::compress`] rules;
//! - the entry size must fall within `[min_compress_size, max_compress_size]`;
//! - known-size inputs use a bounded in-memory compression path;
//! - unknown-size inputs are streamed raw (no temp-file fallback);
//! - compression is kept only when the result is smaller than the source.
//!
//! # Reading
//!
//! ```no_run
//! use rvbank::{Reader, ReaderOptions};
//!
//! let reader = Reader::open("addon.pbo")?;
//! for entry in reader.entries() {
//!     let data = reader.read_entry_info(entry)?;
//!     // use data
//! }
//!
//! // Compatibility mode for archives with meaningful stored offsets:
//! let reader = Reader::open_with_options("addon.pbo", &ReaderOptions {
//!     offset_mode: rvbank::OffsetMode::StoredCompat,
//!     ..ReaderOptions::default()
//! })?;
//! # let _ = reader;
//! # Ok::<(), rvbank::Error>(())
//! ```
//!
//! # Extracting
//!
//! ```no_run
//! use rvbank::{ExtractOptions, Reader};
//!
//! let reader = Reader::open("addon.pbo")?;
//! // Path sanitization is on by default; raw_names disables it.
//! reader.extract("out/", &ExtractOptions { max_workers: 4, ..ExtractOptions::default() })?;
//! # Ok::<(), rvbank::Error>(())
//! ```
//!
//! # Packing
//!
//! ```no_run
//! use rvbank::{pack_file, CompressRule, HeaderPair, Input, PackOptions};
//!
//! let inputs = vec![Input::from_bytes("config.cpp", b"class CfgPatches {};".to_vec())];
//! let opts = PackOptions {
//!     headers: vec![HeaderPair::new("prefix", "myaddon")],
//!     // An empty rule set means no compression.
//!     compress: vec![CompressRule::include("*.rvmat"), CompressRule::include("textures/**")],
//!     ..PackOptions::default()
//! };
//! let result = pack_file("addon.pbo", inputs, &opts)?;
//! println!("{} entries written", result.written_entries);
//! # Ok::<(), rvbank::Error>(())
//! ```
//!
//! # Editing
//!
//! ```no_run
//! use rvbank::{EditOptions, Editor, Input};
//!
//! let mut editor = Editor::open("addon.pbo", EditOptions { backup_keep: 1, ..EditOptions::default() })?;
//! editor.replace([Input::from_file("scripts/main.c", "scripts/main.c")?])?;
//! editor.commit()?;
//! # Ok::<(), rvbank::Error>(())
//! ```

pub mod compression;
pub mod error;
pub mod types;

mod editor;
mod extract;
mod filter;
mod path;
mod reader;
mod sanitize;
mod sign;
mod source;
mod trailer;
mod writer;

// Re-exports for convenience
pub use compression::{CompressRule, RuleAction};
pub use editor::Editor;
pub use error::{Error, Result};
pub use path::{normalize_path, normalize_prefix_header};
pub use reader::{list_entries, list_entries_from, read_headers, read_headers_from};
pub use reader::{EntryReader, Reader};
pub use sanitize::sanitize_path;
pub use sign::{compute_hash_set, compute_hash_set_from_reader};
pub use source::{ReadAt, Section};
pub use trailer::{verify_sha1_trailer, write_sha1_trailer};
pub use types::{
    ByteString, EditOptions, EntryInfo, ExtractCallback, ExtractFileMode, ExtractOptions,
    GameType, HeaderPair, Input, InputSource, MatcherOptions, Mime, OffsetMode,
    PackEntryProgress, PackOptions, PackProgressCallback, PackResult, ReaderOptions, SignVersion,
    SignatureSet, DEFAULT_MAX_COMPRESS_SIZE, DEFAULT_MIN_COMPRESS_SIZE, DEFAULT_WRITE_BUFFER,
};
pub use writer::{
    inputs_from_dir, pack, pack_and_hash, pack_and_hash_file, pack_file, pack_with_progress,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
