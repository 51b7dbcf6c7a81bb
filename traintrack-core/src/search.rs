//! Directory-tree lookup shared by config and checkpoint discovery.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What kind of entry a lookup should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Find the first entry literally named `name` below `root`.
///
/// Directories are walked depth-first in file-name order, and a directory's
/// immediate children are checked before any of its subdirectories is entered.
/// Symlinks are not followed.
pub fn find_named(root: &Path, name: &str, kind: EntryKind) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|dir| dir.path().join(name))
        .find(|candidate| match kind {
            EntryKind::File => candidate.is_file(),
            EntryKind::Dir => candidate.is_dir(),
        })
}
