//! Parallel entry extraction with path safety and file-mode policy.
//!
//! Workers share the immutable reader and own their copy buffers; the first
//! error cancels the remaining work and wins.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::warn;

use crate::error::{Error, Result};
use crate::path::trim_ascii;
use crate::reader::{classify_payload_error, Reader};
use crate::sanitize::{normalize_extract_entry_path, sanitize_entry_paths};
use crate::source::ReadAt;
use crate::types::{EntryInfo, ExtractCallback, ExtractFileMode, ExtractOptions};

/// Per-worker copy buffer size.
const EXTRACT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// One selected entry with its prepared output-relative path bytes.
struct WorkItem {
    entry: EntryInfo,
    rel_path: Vec<u8>,
    rel_dir: Vec<u8>,
}

impl<S: ReadAt + Sync> Reader<S> {
    /// Extract entries to `dst_dir`.
    ///
    /// Entry paths are sanitized by default; set
    /// [`ExtractOptions::raw_names`] to require already-safe names instead.
    ///
    /// # Errors
    /// Returns the first error encountered across workers.
    pub fn extract(&self, dst_dir: impl AsRef<Path>, opts: &ExtractOptions) -> Result<()> {
        self.extract_with_progress(dst_dir, opts, None)
    }

    /// [`Reader::extract`] with a per-entry completion callback.
    ///
    /// # Errors
    /// Returns the first error encountered across workers.
    pub fn extract_with_progress(
        &self,
        dst_dir: impl AsRef<Path>,
        opts: &ExtractOptions,
        on_entry_done: Option<ExtractCallback<'_>>,
    ) -> Result<()> {
        self.ensure_open()?;

        let entries: Vec<EntryInfo> = match &opts.entries {
            Some(selected) => selected.clone(),
            None => self.entries().to_vec(),
        };
        if entries.is_empty() {
            return Ok(());
        }

        let entries = if opts.raw_names {
            entries
        } else {
            sanitize_entry_paths(&entries)?
        };

        let work_items = prepare_work_items(&entries)?;
        if work_items.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(dst_dir.as_ref())?;
        let dst_root = std::fs::canonicalize(dst_dir.as_ref())?;
        create_output_dirs(&dst_root, &work_items)?;

        let workers = match opts.max_workers {
            0 => std::thread::available_parallelism().map_or(1, usize::from),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(io::Error::other)?;

        let cancelled = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        pool.install(|| {
            work_items.par_iter().for_each_init(
                || vec![0u8; EXTRACT_COPY_BUFFER_SIZE],
                |copy_buf, item| {
                    if cancelled.load(Ordering::Relaxed) {
                        return;
                    }

                    if let Err(e) =
                        self.extract_one(&dst_root, item, opts.file_mode, copy_buf, on_entry_done)
                    {
                        cancelled.store(true, Ordering::Relaxed);
                        let mut slot = first_error.lock().expect("extract error mutex poisoned");
                        if slot.is_none() {
                            *slot = Some(e);
                        } else {
                            // Only the first error surfaces; later ones are logged.
                            warn!(path = %item.entry.path, error = %e, "extract worker failed");
                        }
                    }
                },
            );
        });

        match first_error.into_inner().expect("extract error mutex poisoned") {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write one prepared work item under the destination root.
    fn extract_one(
        &self,
        dst_root: &Path,
        item: &WorkItem,
        mode: ExtractFileMode,
        copy_buf: &mut [u8],
        on_entry_done: Option<ExtractCallback<'_>>,
    ) -> Result<()> {
        let out_path = join_rel_path(dst_root, &item.rel_path);

        let mut stream = self.open_entry_info(&item.entry)?;
        let (mut file, pre_size) = open_extract_file(&out_path, mode)?;

        let mut written = 0u64;
        loop {
            let n = match stream.read(copy_buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_payload_error(&item.entry, e)),
            };

            file.write_all(&copy_buf[..n])?;
            written += n as u64;
        }

        if pre_size.is_some_and(|pre| pre > written) {
            file.set_len(written)?;
        }
        file.sync_data()?;

        if let Some(on_entry_done) = on_entry_done {
            on_entry_done(&item.entry, written, &out_path);
        }

        Ok(())
    }
}

/// Validate selected entries and prepare relative output paths.
fn prepare_work_items(entries: &[EntryInfo]) -> Result<Vec<WorkItem>> {
    let mut work_items = Vec::with_capacity(entries.len());
    for entry in entries {
        if trim_ascii(entry.path.as_bytes()).is_empty() {
            continue;
        }

        let rel_path = normalize_extract_entry_path(entry.path.as_bytes())?;
        let rel_dir = match rel_path.iter().rposition(|&b| b == b'/') {
            Some(split) => rel_path[..split].to_vec(),
            None => Vec::new(),
        };

        work_items.push(WorkItem {
            entry: entry.clone(),
            rel_path,
            rel_dir,
        });
    }

    Ok(work_items)
}

/// Create all unique parent directories up front, deduplicated by
/// lowercased path so case-colliding directories are made once.
fn create_output_dirs(dst_root: &Path, work_items: &[WorkItem]) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(work_items.len());
    for item in work_items {
        if item.rel_dir.is_empty() {
            continue;
        }

        if !seen.insert(item.rel_dir.to_ascii_lowercase()) {
            continue;
        }

        std::fs::create_dir_all(join_rel_path(dst_root, &item.rel_dir))?;
    }

    Ok(())
}

/// Join a validated slash-separated relative byte path onto the root.
fn join_rel_path(root: &Path, rel: &[u8]) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in rel.split(|&b| b == b'/') {
        out.push(os_component(part));
    }

    out
}

/// Turn one validated path segment into a filesystem component. Unix file
/// names are raw bytes and pass through verbatim; other platforms take the
/// lossy rendering, mirroring what their native file APIs would do with
/// undecodable names.
#[cfg(unix)]
fn os_component(part: &[u8]) -> std::ffi::OsString {
    use std::os::unix::ffi::OsStrExt;

    std::ffi::OsStr::from_bytes(part).to_os_string()
}

#[cfg(not(unix))]
fn os_component(part: &[u8]) -> std::ffi::OsString {
    String::from_utf8_lossy(part).into_owned().into()
}

/// Open the output path according to the selected extract file mode.
///
/// Returns the pre-existing file size when the mode defers truncation to
/// after the copy.
fn open_extract_file(path: &Path, mode: ExtractFileMode) -> Result<(File, Option<u64>)> {
    match mode {
        ExtractFileMode::Auto => {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => Ok((file, None)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(path)?;
                    Ok((file, None))
                }
                Err(e) => Err(e.into()),
            }
        }
        ExtractFileMode::OverwriteSmart => {
            let file = OpenOptions::new().write(true).create(true).open(path)?;
            let pre_size = file.metadata()?.len();
            Ok((file, Some(pre_size)))
        }
        ExtractFileMode::Truncate => {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            Ok((file, None))
        }
        ExtractFileMode::CreateOnly => {
            let file = OpenOptions::new().write(true).create_new(true).open(path)?;
            Ok((file, None))
        }
    }
}
