//! Change detection against the previous backup tree.
//!
//! A file needs backing up when its archive is missing or the source was
//! modified strictly after the archive was written. Nothing else is tracked:
//! the archive's own mtime is the whole "last backup" state.

use crate::backup::archive::archive_path;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use function_name::named;
use getset::{CopyGetters, Getters};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

pub fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MIB
}

/// One source file that must be re-archived this run.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct ChangeRecord {
    #[getset(get = "pub")]
    relative_path: PathBuf,
    #[getset(get = "pub")]
    source_path: PathBuf,
    /// Destination path without the archive extension
    #[getset(get = "pub")]
    destination_base: PathBuf,
    #[getset(get_copy = "pub")]
    size_bytes: u64,
}

impl ChangeRecord {
    pub fn size_mib(&self) -> f64 {
        bytes_to_mib(self.size_bytes)
    }

    pub fn archive_path(&self) -> PathBuf {
        archive_path(&self.destination_base)
    }
}

/// Counters for one run. Sizes are kept in bytes so sums do not depend on
/// traversal order; `*_mib` accessors convert on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub files_scanned: usize,
    pub total_bytes: u64,
    pub changed_count: usize,
    pub changed_bytes: u64,
    pub done_count: usize,
    pub done_bytes: u64,
}

impl RunTotals {
    pub fn total_size_mib(&self) -> f64 {
        bytes_to_mib(self.total_bytes)
    }

    pub fn changed_size_mib(&self) -> f64 {
        bytes_to_mib(self.changed_bytes)
    }

    pub fn done_size_mib(&self) -> f64 {
        bytes_to_mib(self.done_bytes)
    }
}

/// `true` when `archive` is missing or strictly older than `source_modified`.
pub fn needs_backup<P: AsRef<Path>>(source_modified: SystemTime, archive: P) -> Result<bool> {
    match std::fs::metadata(archive.as_ref()) {
        Ok(md) => Ok(source_modified > md.modified()?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Walks `source_root` (sorted by file name at every level) and returns the
/// change set plus totals. Any traversal error aborts the whole pass.
#[named]
pub fn detect_changes<P1: AsRef<Path>, P2: AsRef<Path>>(
    source_root: P1,
    dest_root: P2,
) -> Result<(Vec<ChangeRecord>, RunTotals)> {
    let source_root = source_root.as_ref();
    let dest_root = dest_root.as_ref();
    tracing::debug!("Scanning {:?} against {:?}", source_root, dest_root);

    scan(source_root, dest_root)
        .with_debug_object_and_fn_name(source_root.to_path_buf(), function_path!())
}

fn scan(source_root: &Path, dest_root: &Path) -> Result<(Vec<ChangeRecord>, RunTotals)> {
    let mut changes = Vec::new();
    let mut totals = RunTotals::default();

    for entry in WalkDir::new(source_root).follow_links(true).sort_by_file_name() {
        let (path, metadata) = match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    tracing::trace!("Skipping {:?} not a file", entry.path());
                    continue;
                }
                let metadata = entry.metadata()?;
                (entry.into_path(), metadata)
            }
            Err(e) => match dangling_link(&e) {
                Some(link) => {
                    tracing::warn!("Dangling symlink {:?}, its target is missing", link.0);
                    link
                }
                None => return Err(e.into()),
            },
        };

        let relative_path = path
            .strip_prefix(source_root)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .to_path_buf();
        let destination_base = dest_root.join(&relative_path);
        let size_bytes = metadata.len();

        totals.files_scanned += 1;
        totals.total_bytes += size_bytes;

        if needs_backup(metadata.modified()?, archive_path(&destination_base))? {
            tracing::trace!("Changed: {:?}", relative_path);
            totals.changed_count += 1;
            totals.changed_bytes += size_bytes;
            changes.push(ChangeRecord {
                source_path: path,
                relative_path,
                destination_base,
                size_bytes,
            });
        }
    }

    Ok((changes, totals))
}

/// A symlink whose target is gone is kept as a file of its own, so archiving
/// it fails for that file alone. Loops and every other walk error stay fatal.
fn dangling_link(err: &walkdir::Error) -> Option<(PathBuf, Metadata)> {
    if err.loop_ancestor().is_some() {
        return None;
    }
    if err.io_error()?.kind() != std::io::ErrorKind::NotFound {
        return None;
    }
    let path = err.path()?;
    let metadata = std::fs::symlink_metadata(path).ok()?;
    metadata
        .file_type()
        .is_symlink()
        .then(|| (path.to_path_buf(), metadata))
}
