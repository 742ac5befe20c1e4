//! Entry list filters applied after offset resolution.
//!
//! All path comparisons are byte-level; non-ASCII bytes are compared
//! byte-equal and never re-encoded.

use tracing::debug;

use crate::error::Result;
use crate::path::normalize_path_bytes;
use crate::sanitize::{
    normalize_extract_entry_path, sanitize_entry_control_paths, sanitize_entry_paths,
    sanitize_path, sanitize_path_from_bytes,
};
use crate::types::{EntryInfo, Mime, ReaderOptions};

/// Apply the configured filter pipeline to parsed entries, in order:
/// junk, size, ASCII-only, prefix, control-char sanitize, name sanitize.
pub(crate) fn apply_entry_filters(
    mut entries: Vec<EntryInfo>,
    opts: &ReaderOptions,
) -> Result<Vec<EntryInfo>> {
    if opts.enable_junk_filter {
        entries = filter_junk_entries(entries);
    }

    entries = filter_by_size(entries, opts.min_entry_original_size, opts.min_entry_data_size);

    if opts.filter_ascii_only {
        entries.retain(|e| path_is_ascii_only(e.path.as_bytes()));
    }

    if !opts.entry_path_prefix.is_empty() {
        entries = if opts.sanitize_names {
            filter_by_sanitized_prefix(entries, &opts.entry_path_prefix)
        } else {
            filter_by_prefix(entries, &opts.entry_path_prefix)
        };
    }

    if opts.sanitize_control_chars {
        entries = sanitize_entry_control_paths(&entries)?;
    }

    if opts.sanitize_names {
        entries = sanitize_entry_paths(&entries)?;
    }

    Ok(entries)
}

/// Remove malformed or unusable entries from the parsed table.
pub(crate) fn filter_junk_entries(entries: Vec<EntryInfo>) -> Vec<EntryInfo> {
    entries
        .into_iter()
        .filter(|entry| {
            if entry.data_size == 0 {
                debug!(path = %entry.path, "junk filter: dropping zero-size entry");
                return false;
            }
            if entry.mime == Mime::Compressed && entry.original_size == 0 {
                debug!(path = %entry.path, "junk filter: dropping compressed entry without original size");
                return false;
            }
            if normalize_extract_entry_path(entry.path.as_bytes()).is_err() {
                debug!(path = %entry.path, "junk filter: dropping unsafe entry path");
                return false;
            }

            true
        })
        .collect()
}

/// Keep entries satisfying minimum original and packed size thresholds.
fn filter_by_size(
    entries: Vec<EntryInfo>,
    min_original_size: u32,
    min_data_size: u32,
) -> Vec<EntryInfo> {
    if min_original_size == 0 && min_data_size == 0 {
        return entries;
    }

    entries
        .into_iter()
        .filter(|entry| {
            original_or_data_size(entry) >= min_original_size && entry.data_size >= min_data_size
        })
        .collect()
}

/// `original_size` when present, otherwise `data_size`.
fn original_or_data_size(entry: &EntryInfo) -> u32 {
    if entry.original_size == 0 {
        entry.data_size
    } else {
        entry.original_size
    }
}

/// Whether the path contains only ASCII bytes (every byte below 0x80).
fn path_is_ascii_only(path: &[u8]) -> bool {
    path.iter().all(|&b| b < 0x80)
}

/// Keep entries under `prefix`, or the exact entry when it names a file.
fn filter_by_prefix(entries: Vec<EntryInfo>, prefix: &str) -> Vec<EntryInfo> {
    let prefix = normalize_path_bytes(prefix.as_bytes());
    if prefix.is_empty() {
        return entries;
    }

    let mut prefix_dir = prefix.clone();
    prefix_dir.push(b'/');

    entries
        .into_iter()
        .filter(|entry| {
            let path = normalize_path_bytes(entry.path.as_bytes());
            path == prefix || path.starts_with(&prefix_dir)
        })
        .collect()
}

/// Prefix filter in the sanitized path namespace, used when name
/// sanitization is active so the listed names and the filter agree.
fn filter_by_sanitized_prefix(entries: Vec<EntryInfo>, prefix: &str) -> Vec<EntryInfo> {
    let sanitized_prefix = match sanitize_path(prefix) {
        Ok(p) if !p.is_empty() => p,
        _ => return Vec::new(),
    };

    let prefix_dir = format!("{sanitized_prefix}/");
    entries
        .into_iter()
        .filter(|entry| match sanitize_path_from_bytes(entry.path.as_bytes()) {
            Ok(path) if !path.is_empty() => {
                path == sanitized_prefix || path.starts_with(&prefix_dir)
            }
            _ => false,
        })
        .collect()
}
