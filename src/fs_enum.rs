//! Local tree enumeration for the push client

use crate::error::Result;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source of the relative paths to mirror, separately for directories and files.
///
/// Paths use `/` separators, are relative to the listing root, and come back
/// ordered so that every directory precedes its descendants.
pub trait TreeListing {
    fn directories(&self) -> Result<Vec<String>>;
    fn files(&self) -> Result<Vec<String>>;
}

/// File filter options
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl FileFilter {
    fn should_include_file(&self, path: &Path) -> bool {
        let filename = path.file_name().unwrap_or_default().to_string_lossy();
        !self
            .exclude_files
            .iter()
            .any(|pattern| glob_match(pattern, &filename))
    }

    /// Any path component matching a pattern excludes the whole subtree
    fn should_include_dir(&self, rel: &Path) -> bool {
        for pattern in &self.exclude_dirs {
            for component in rel.components() {
                if let Some(component_str) = component.as_os_str().to_str() {
                    if glob_match(pattern, component_str) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Simple glob matching (supports * wildcards)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        if pattern.starts_with('*') && pattern.ends_with('*') {
            let middle = &pattern[1..pattern.len() - 1];
            return text.contains(middle);
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
    }

    pattern == text
}

/// Component-wise order: a directory always sorts before anything beneath it.
pub fn tree_order(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dir,
    File,
}

/// Walks a local root with walkdir. Symlinks are not followed.
pub struct WalkdirListing {
    root: PathBuf,
    filter: FileFilter,
}

impl WalkdirListing {
    pub fn new<P: Into<PathBuf>>(root: P, filter: FileFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    fn collect(&self, kind: Kind) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", self.root.display()),
            )
            .into());
        }

        let root = &self.root;
        let mut out = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                // Skip excluded directories entirely
                if e.file_type().is_dir() {
                    e.path()
                        .strip_prefix(root)
                        .map(|rel| self.filter.should_include_dir(rel))
                        .unwrap_or(false)
                } else {
                    true
                }
            })
            .filter_map(|e| e.ok())
        {
            let ft = entry.file_type();
            let wanted = match kind {
                Kind::Dir => ft.is_dir(),
                Kind::File => ft.is_file() && self.filter.should_include_file(entry.path()),
            };
            if !wanted {
                continue;
            }
            if let Some(rel) = relative_slash_path(root, entry.path()) {
                out.push(rel);
            }
        }
        out.sort_by(|a, b| tree_order(a, b));
        Ok(out)
    }
}

impl TreeListing for WalkdirListing {
    fn directories(&self) -> Result<Vec<String>> {
        self.collect(Kind::Dir)
    }

    fn files(&self) -> Result<Vec<String>> {
        self.collect(Kind::File)
    }
}

// Non-UTF-8 names cannot be carried in a path payload and are skipped
fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
