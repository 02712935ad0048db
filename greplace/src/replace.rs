//! Crash-safe in-place replacement.
//!
//! The matchers write the rewritten content to a sibling temp file; this
//! module swaps it over the original: snapshot to a backup when requested,
//! rename the temp file into place, then restore timestamps and permission
//! bits. A file is either fully rewritten or untouched under its original
//! name; no partial content ever persists there.

use std::collections::HashSet;
use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::SearchRequest;
use crate::errors::{SearchError, SearchResult};
use crate::results::FileResult;

pub const TEMP_SUFFIX: &str = ".grepwinreplaced";
pub const BACKUP_SUFFIX: &str = ".bak";
pub const BACKUP_DIR_NAME: &str = "grepWin_backup";

const TIMESTAMP_RETRIES: u32 = 5;
const TIMESTAMP_BACKOFF: Duration = Duration::from_millis(50);

/// Paths the engine is currently creating (temp files, backups). The walker
/// consults this set so artifacts of an in-progress replace are never
/// scanned as inputs.
#[derive(Debug, Default)]
pub(crate) struct InFlightSet {
    paths: Mutex<HashSet<PathBuf>>,
}

impl InFlightSet {
    pub fn insert(&self, path: PathBuf) {
        self.paths.lock().unwrap().insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().unwrap().contains(path)
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Sibling temp file the rewritten content is streamed into.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    append_suffix(path, TEMP_SUFFIX)
}

/// Where the pre-replace snapshot of `path` goes: a sibling `.bak`, or a
/// mirrored path under `<root>/grepWin_backup/` when requested.
pub(crate) fn backup_destination(
    root: &Path,
    path: &Path,
    in_subfolder: bool,
) -> SearchResult<PathBuf> {
    if !in_subfolder {
        return Ok(append_suffix(path, BACKUP_SUFFIX));
    }
    let relative = path.strip_prefix(root).unwrap_or_else(|_| {
        Path::new(path.file_name().expect("file task paths have a final component"))
    });
    let dest = append_suffix(&root.join(BACKUP_DIR_NAME).join(relative), BACKUP_SUFFIX);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SearchError::replace_failed(path, format!("backup dir: {e}")))?;
    }
    Ok(dest)
}

/// Swaps the finished temp file over the original.
///
/// Cancellation is honored on entry; once the original has been moved aside
/// for its backup the swap runs to completion (or restores the backup on
/// failure) so the original name never dangles.
pub(crate) fn adopt_temp_file(
    request: &SearchRequest,
    root: &Path,
    result: &mut FileResult,
    temp: &Path,
    in_flight: &InFlightSet,
    cancel: &AtomicBool,
) -> SearchResult<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(SearchError::Cancelled);
    }

    let path = result.path.clone();

    let saved_times = if request.keep_file_date {
        let meta = fs::metadata(&path)
            .map_err(|e| SearchError::replace_failed(&path, format!("stat: {e}")))?;
        Some((meta.accessed().ok(), meta.modified().ok()))
    } else {
        None
    };

    let mut restore_perms = None;
    if let Ok(meta) = fs::metadata(&path) {
        let perms = meta.permissions();
        if perms.readonly() {
            let mut writable = perms.clone();
            writable.set_readonly(false);
            fs::set_permissions(&path, writable)
                .map_err(|e| SearchError::replace_failed(&path, format!("clear read-only: {e}")))?;
            restore_perms = Some(perms);
        }
    }

    let mut moved_to_backup = None;
    if request.create_backup && !result.backed_up {
        let backup = backup_destination(root, &path, request.backup_in_subfolder)?;
        // registered before it exists so the walker can never pick it up
        in_flight.insert(backup.clone());
        if fs::rename(&path, &backup).is_err() {
            fs::copy(&path, &backup)
                .map_err(|e| SearchError::replace_failed(&path, format!("backup: {e}")))?;
            fs::remove_file(&path)
                .map_err(|e| SearchError::replace_failed(&path, format!("backup: {e}")))?;
        }
        moved_to_backup = Some(backup);
        result.backed_up = true;
    }

    if let Err(e) = fs::rename(temp, &path) {
        // the original was moved aside; put it back before failing
        if let Some(backup) = &moved_to_backup {
            if let Err(restore) = fs::copy(backup, &path) {
                warn!(
                    "could not restore '{}' from its backup: {restore}",
                    path.display()
                );
            }
        }
        return Err(SearchError::replace_failed(&path, format!("swap: {e}")));
    }

    if let Some((accessed, modified)) = saved_times {
        // attribute handles may be held briefly after the rename; retry
        for attempt in 0..TIMESTAMP_RETRIES {
            let outcome = File::options().write(true).open(&path).and_then(|file| {
                let mut times = FileTimes::new();
                if let Some(a) = accessed {
                    times = times.set_accessed(a);
                }
                if let Some(m) = modified {
                    times = times.set_modified(m);
                }
                file.set_times(times)
            });
            match outcome {
                Ok(()) => break,
                Err(e) if attempt + 1 == TIMESTAMP_RETRIES => {
                    warn!("timestamps not restored on '{}': {e}", path.display());
                }
                Err(_) => thread::sleep(TIMESTAMP_BACKOFF),
            }
        }
    }

    if let Some(perms) = restore_perms {
        if let Err(e) = fs::set_permissions(&path, perms) {
            warn!("permissions not restored on '{}': {e}", path.display());
        }
    }

    Ok(())
}
