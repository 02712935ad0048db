//! Path walker: depth-first enumeration of one search root with recursion
//! gating for hidden/system directories, reparse points and the
//! exclude-dirs pattern. The walker never opens file contents; it only
//! yields metadata for the filter and the worker pool.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::config::SearchRequest;
use crate::filters::{passes_date, passes_size, DirExcluder, NameMatcher};
use crate::replace::InFlightSet;

/// One unit of work for the pool: a file (or, in inventory mode, a folder)
/// together with the metadata the walker already has.
#[derive(Debug, Clone)]
pub struct FileTask {
    /// The search root this entry came from; backup trees are rooted here.
    pub root: PathBuf,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Walker output, consumed by the dispatcher.
#[derive(Debug)]
pub(crate) enum WalkItem {
    /// Passed every predicate; scan its contents.
    Task(FileTask),
    /// Inventory mode: report without opening.
    Inventory(FileTask),
    /// Considered and rejected; counts toward progress only.
    Filtered,
    /// Enumeration failed for this one entry; the walk continues.
    Error(PathBuf, io::Error),
}

#[cfg(unix)]
fn entry_hidden(path: &Path, _meta: &Metadata) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
fn entry_hidden(_path: &Path, meta: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    meta.file_attributes() & 0x2 != 0 // FILE_ATTRIBUTE_HIDDEN
}

#[cfg(unix)]
fn entry_system(_meta: &Metadata) -> bool {
    false
}

#[cfg(windows)]
fn entry_system(meta: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    meta.file_attributes() & 0x4 != 0 // FILE_ATTRIBUTE_SYSTEM
}

fn task_for(root: &Path, path: &Path, is_dir: bool, meta: &Metadata) -> FileTask {
    FileTask {
        root: root.to_path_buf(),
        path: path.to_path_buf(),
        is_dir,
        size: meta.len(),
        modified: meta.modified().ok(),
    }
}

/// Walks one root, emitting a [`WalkItem`] per considered entry.
///
/// A root that is a plain file bypasses every predicate except the
/// in-flight set. Cancellation is checked once per directory entry.
pub(crate) fn walk_root(
    root: &Path,
    request: &SearchRequest,
    names: &NameMatcher,
    exclude: &DirExcluder,
    in_flight: &InFlightSet,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(WalkItem),
) {
    if !root.is_dir() {
        if in_flight.contains(root) {
            return;
        }
        let parent = root.parent().unwrap_or(root).to_path_buf();
        match std::fs::metadata(root) {
            Ok(meta) => {
                let task = FileTask {
                    root: parent,
                    path: root.to_path_buf(),
                    is_dir: false,
                    size: meta.len(),
                    modified: meta.modified().ok(),
                };
                if request.counting_only() {
                    emit(WalkItem::Inventory(task));
                } else {
                    emit(WalkItem::Task(task));
                }
            }
            Err(e) => emit(WalkItem::Error(root.to_path_buf(), e)),
        }
        return;
    }

    let mut walker = WalkDir::new(root).follow_links(false);
    if !request.include_subfolders {
        walker = walker.max_depth(1);
    }

    let gate = |entry: &walkdir::DirEntry| -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if !request.include_symlinks && entry.path_is_symlink() {
            return false;
        }
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                if !request.include_hidden && entry_hidden(entry.path(), &meta) {
                    return false;
                }
                if !request.include_system && entry_system(&meta) {
                    return false;
                }
            }
            if exclude.excludes(entry.path(), root) {
                return false;
            }
        }
        true
    };

    for entry in walker.into_iter().filter_entry(gate) {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                let io_err = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory loop"));
                emit(WalkItem::Error(path, io_err));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue; // the root itself is only a traversal node
        }

        let path = entry.path();
        if in_flight.contains(path) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                let io_err = err.into_io_error().unwrap_or_else(|| io::Error::other("stat failed"));
                emit(WalkItem::Error(path.to_path_buf(), io_err));
                continue;
            }
        };
        let is_dir = entry.file_type().is_dir();

        if !is_dir
            && ((!request.include_hidden && entry_hidden(path, &meta))
                || (!request.include_system && entry_system(&meta)))
        {
            emit(WalkItem::Filtered);
            continue;
        }

        if is_dir {
            // directories are reported only as inventory; otherwise they are
            // pure traversal nodes
            if request.counting_only() && names.matches(path) {
                emit(WalkItem::Inventory(task_for(root, path, true, &meta)));
            }
            continue;
        }

        if !names.matches(path) {
            emit(WalkItem::Filtered);
            continue;
        }

        // size and date predicates do not apply in forced-report mode
        if !request.not_search
            && (!passes_size(request.size, meta.len())
                || !passes_date(request.date, meta.modified().ok()))
        {
            emit(WalkItem::Filtered);
            continue;
        }

        let task = task_for(root, path, false, &meta);
        if request.counting_only() {
            emit(WalkItem::Inventory(task));
        } else {
            emit(WalkItem::Task(task));
        }
    }
}
