//! Directory walk (§4.4 operation 1): traverse a local directory tree,
//! calling an optional filter for every entry and collecting the regular
//! files that survive it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::ClientError;

/// One file discovered by [`walk`], paired with the logical (forward-slash,
/// backend-relative) path it will be uploaded under.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path relative to the walk root, always forward-slash separated and
    /// without a leading slash (e.g. `sub/b.txt`).
    pub rel_path: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub modtime: Option<DateTime<Utc>>,
}

/// A filter invoked for every entry (file or directory) the walk visits.
/// Returning `false` skips the entry — and, for a directory, its entire
/// sub-tree (§4.4 "skip entries (and their sub-trees when directories)").
pub trait EntryFilter: Fn(&Path, bool) -> bool + Send + Sync {}
impl<T: Fn(&Path, bool) -> bool + Send + Sync> EntryFilter for T {}

/// Walks `root`, returning every regular file beneath it that the filter
/// did not reject (along with any ancestor directory the filter rejected).
pub fn walk(root: &Path, filter: Option<&dyn EntryFilter>) -> Result<Vec<WalkEntry>, ClientError> {
    let mut out = Vec::new();
    let mut walker = WalkDir::new(root).into_iter();

    loop {
        let entry = match walker.next() {
            Some(Ok(entry)) => entry,
            Some(Err(e)) => return Err(ClientError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walkdir error with no underlying io::Error")
            }))),
            None => break,
        };

        let path = entry.path();
        if path == root {
            continue;
        }
        let is_dir = entry.file_type().is_dir();

        if let Some(filter) = filter {
            if !filter(path, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            ClientError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("stat failed")))
        })?;
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        out.push(WalkEntry {
            rel_path,
            local_path: path.to_path_buf(),
            size: metadata.len(),
            modtime: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_nested_files_with_relative_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let mut entries = walk(dir.path(), None).unwrap();
        entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn filter_skips_directory_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("skip")).unwrap();
        fs::write(dir.path().join("skip/hidden.txt"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"y").unwrap();

        let filter = |path: &Path, _is_dir: bool| !path.ends_with("skip") && !path.to_string_lossy().contains("/skip/");
        let entries = walk(dir.path(), Some(&filter)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, "keep.txt");
    }
}
