//! Staged archive editing with backup rotation and rollback.
//!
//! Operations accumulate until [`Editor::commit`], which rotates backups,
//! renames the archive aside, rebuilds the entry plan over the parsed
//! backup, and rewrites the destination. The original file is never
//! mutated in place; on any failure the backup is restored.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::path::{normalize_archive_entry_path, normalize_archive_entry_path_bytes};
use crate::reader::Reader;
use crate::trailer::write_sha1_trailer;
use crate::types::{ByteString, EditOptions, EntryInfo, Input, PackResult};
use crate::writer::{rewrite_archive, PlanPayload, RewriteItem};

/// Accumulates archive edit operations and applies them on commit.
pub struct Editor {
    path: PathBuf,
    ops: Vec<EditOperation>,
    opts: EditOptions,
}

enum EditOperation {
    /// Append new entries; fails on an existing path during commit.
    Add(Vec<Input>),
    /// Rewrite existing entries; fails on a missing path during commit.
    Replace(Vec<Input>),
    /// Remove exact paths unconditionally.
    Delete(Vec<String>),
    /// Remove every entry under the given directory prefixes.
    DeleteDir(Vec<String>),
}

impl Editor {
    /// Create a staged editor for a file-based archive rewrite workflow.
    ///
    /// # Errors
    /// Fails when `path` is empty.
    pub fn open(path: impl AsRef<Path>, opts: EditOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidEntryPath {
                path: String::new(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            ops: Vec::new(),
            opts,
        })
    }

    /// Schedule adding new entries. Colliding paths fail during commit.
    ///
    /// # Errors
    /// Fails when an input path does not normalize to a valid entry path.
    pub fn add(&mut self, inputs: impl IntoIterator<Item = Input>) -> Result<()> {
        let normalized = normalize_editor_inputs(inputs)?;
        if !normalized.is_empty() {
            self.ops.push(EditOperation::Add(normalized));
        }

        Ok(())
    }

    /// Schedule replacing existing entries. Missing paths fail during commit.
    ///
    /// # Errors
    /// Fails when an input path does not normalize to a valid entry path.
    pub fn replace(&mut self, inputs: impl IntoIterator<Item = Input>) -> Result<()> {
        let normalized = normalize_editor_inputs(inputs)?;
        if !normalized.is_empty() {
            self.ops.push(EditOperation::Replace(normalized));
        }

        Ok(())
    }

    /// Schedule exact-path removal.
    ///
    /// # Errors
    /// Fails when a path does not normalize to a valid entry path.
    pub fn delete<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<()> {
        let normalized = normalize_editor_paths(paths)?;
        if !normalized.is_empty() {
            self.ops.push(EditOperation::Delete(normalized));
        }

        Ok(())
    }

    /// Schedule directory-prefix removal: every entry whose canonical path
    /// equals a prefix or lies under it is dropped.
    ///
    /// # Errors
    /// Fails when a prefix does not normalize to a valid entry path.
    pub fn delete_dir<S: AsRef<str>>(&mut self, prefixes: &[S]) -> Result<()> {
        let normalized = normalize_editor_paths(prefixes)?;
        if !normalized.is_empty() {
            self.ops.push(EditOperation::DeleteDir(normalized));
        }

        Ok(())
    }

    /// Apply all staged operations in one rewrite transaction.
    ///
    /// The backup holds the only valid copy while the destination is being
    /// rewritten; on failure the backup is renamed back into place.
    ///
    /// # Errors
    /// Surfaces the commit failure, or [`Error::RollbackFailed`] when the
    /// restore itself fails too.
    pub fn commit(mut self) -> Result<PackResult> {
        let backup_path = backup_path_for(&self.path);
        prepare_backup_slot(&backup_path, self.opts.backup_keep)?;

        fs::rename(&self.path, &backup_path)?;

        let ops = std::mem::take(&mut self.ops);
        match self.commit_from_backup(&backup_path, ops) {
            Ok(result) => {
                if self.opts.backup_keep == 0 {
                    remove_if_exists(&backup_path)?;
                }

                Ok(result)
            }
            Err(commit_err) => match rollback_from_backup(&self.path, &backup_path) {
                Ok(()) => Err(commit_err),
                Err(rollback_err) => Err(Error::RollbackFailed {
                    commit: commit_err.to_string(),
                    rollback: rollback_err.to_string(),
                }),
            },
        }
    }

    /// Write the edited archive from the backup source.
    fn commit_from_backup(&self, backup_path: &Path, ops: Vec<EditOperation>) -> Result<PackResult> {
        let src_file = File::open(backup_path)?;
        let size = src_file.metadata()?.len();
        let src_reader = Reader::from_read_at(&src_file, size)?;

        let plan = build_edit_plan(src_reader.entries(), ops)?;

        let mut pack_opts = self.opts.pack.clone();
        if pack_opts.headers.is_empty() {
            pack_opts.headers = src_reader.headers().to_vec();
        }
        let pack_opts = pack_opts.normalized();

        let mut dst = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        let outcome = rewrite_archive(&mut dst, Some(&src_file), &plan, &pack_opts, &|_| {})?;

        dst.sync_all()?;
        drop(dst);

        write_sha1_trailer(&self.path)?;

        Ok(outcome.result)
    }
}

/// Canonicalize editor input paths at staging time.
fn normalize_editor_inputs(inputs: impl IntoIterator<Item = Input>) -> Result<Vec<Input>> {
    let mut normalized = Vec::new();
    for mut input in inputs {
        input.path = normalize_archive_entry_path(&input.path)?;
        normalized.push(input);
    }

    Ok(normalized)
}

/// Canonicalize editor path arguments at staging time.
fn normalize_editor_paths<S: AsRef<str>>(paths: &[S]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|raw| normalize_archive_entry_path(raw.as_ref()))
        .collect()
}

/// Apply staged operations over the source entries into a final plan,
/// keyed by case-insensitive canonical path bytes and sorted for the
/// writer. Non-ASCII bytes take part in keys verbatim.
fn build_edit_plan(source_entries: &[EntryInfo], ops: Vec<EditOperation>) -> Result<Vec<RewriteItem>> {
    let mut state: HashMap<Vec<u8>, RewriteItem> = HashMap::with_capacity(source_entries.len());

    for entry in source_entries {
        let path = normalize_archive_entry_path_bytes(entry.path.as_bytes())?;
        let key = editor_path_key(path.as_bytes());
        if state.contains_key(&key) {
            return Err(Error::DuplicateEntryPath {
                path: path.to_string_lossy().into_owned(),
                existing: path.to_string_lossy().into_owned(),
            });
        }

        let mut entry = entry.clone();
        entry.path = path.clone();
        state.insert(
            key,
            RewriteItem {
                path,
                payload: PlanPayload::Source(entry),
            },
        );
    }

    for op in ops {
        match op {
            EditOperation::Add(inputs) => {
                for input in inputs {
                    let key = editor_path_key(input.path.as_bytes());
                    if let Some(existing) = state.get(&key) {
                        return Err(Error::DuplicateEntryPath {
                            path: input.path,
                            existing: existing.path.to_string_lossy().into_owned(),
                        });
                    }

                    state.insert(
                        key,
                        RewriteItem {
                            path: ByteString::from(input.path.clone()),
                            payload: PlanPayload::Input(input),
                        },
                    );
                }
            }
            EditOperation::Replace(inputs) => {
                for input in inputs {
                    let key = editor_path_key(input.path.as_bytes());
                    if !state.contains_key(&key) {
                        return Err(Error::EntryNotFound { path: input.path });
                    }

                    state.insert(
                        key,
                        RewriteItem {
                            path: ByteString::from(input.path.clone()),
                            payload: PlanPayload::Input(input),
                        },
                    );
                }
            }
            EditOperation::Delete(paths) => {
                for path in paths {
                    state.remove(&editor_path_key(path.as_bytes()));
                }
            }
            EditOperation::DeleteDir(prefixes) => {
                for prefix in prefixes {
                    let prefix_key = editor_path_key(prefix.as_bytes());
                    let mut prefix_dir = prefix_key.clone();
                    prefix_dir.push(b'\\');
                    state.retain(|key, _| key != &prefix_key && !key.starts_with(&prefix_dir[..]));
                }
            }
        }
    }

    let mut plan: Vec<RewriteItem> = state.into_values().collect();
    plan.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(plan)
}

/// Case-insensitive map key for an archive path: ASCII letters fold,
/// all other bytes are kept verbatim.
fn editor_path_key(path: &[u8]) -> Vec<u8> {
    path.to_ascii_lowercase()
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    PathBuf::from(os)
}

fn numbered_backup(backup_path: &Path, generation: usize) -> PathBuf {
    let mut os = backup_path.as_os_str().to_os_string();
    os.push(format!(".{generation}"));
    PathBuf::from(os)
}

/// Rotate or remove existing backup generations before a new commit.
fn prepare_backup_slot(backup_path: &Path, keep: usize) -> Result<()> {
    if keep <= 1 {
        return remove_if_exists(backup_path);
    }

    let oldest = numbered_backup(backup_path, keep - 1);
    remove_if_exists(&oldest)?;

    for generation in (1..=keep.saturating_sub(2)).rev() {
        rename_if_exists(
            &numbered_backup(backup_path, generation),
            &numbered_backup(backup_path, generation + 1),
        )?;
    }

    debug!(backup = %backup_path.display(), keep, "rotating backup generations");
    rename_if_exists(backup_path, &numbered_backup(backup_path, 1))
}

fn rename_if_exists(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Ok(());
    }

    remove_if_exists(to)?;
    fs::rename(from, to)?;

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Restore the backup over a failed commit's partial destination.
fn rollback_from_backup(path: &Path, backup_path: &Path) -> Result<()> {
    let _ = fs::remove_file(path);
    fs::rename(backup_path, path)?;

    Ok(())
}
