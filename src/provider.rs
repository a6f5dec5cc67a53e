//! File resolution for `include` (spec.md §6, SPEC_FULL §2). Paths are
//! resolved relative to the including file's directory, `.`/`..` segments
//! are collapsed, and the canonical path is used for dedup.
//!
//! Shaped like the on-disk/in-memory split an LSP server uses for its
//! virtual file system: a real editor backs most files from disk but
//! overlays unsaved buffers from memory. Here `FsProvider` is the disk
//! backend and `MapProvider` (used by tests) is an in-memory override
//! with the same collapsing logic, so include-cycle and path-dedup
//! tests don't need a temp dir.

use std::collections::HashMap as StdHashMap;
use std::io;
use std::path::{Path, PathBuf};

pub trait FileProvider {
  fn read_to_string(&self, path: &Path) -> io::Result<String>;
  /// Whether a module at this canonical path exists at all (used to
  /// distinguish "unknown include" from deferred parse failures).
  fn exists(&self, path: &Path) -> bool;
}

pub struct FsProvider;

impl FileProvider for FsProvider {
  fn read_to_string(&self, path: &Path) -> io::Result<String> { std::fs::read_to_string(path) }
  fn exists(&self, path: &Path) -> bool { path.is_file() }
}

#[derive(Default)]
pub struct MapProvider(pub StdHashMap<PathBuf, String>);

impl FileProvider for MapProvider {
  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    self.0.get(path).cloned().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
  }
  fn exists(&self, path: &Path) -> bool { self.0.contains_key(path) }
}

/// Joins `include_path` against `from_dir` (the including file's
/// directory) and collapses `.`/`..` segments lexically (no symlink
/// resolution, since `MapProvider` paths never exist on disk).
#[must_use] pub fn resolve_include(from_dir: &Path, include_path: &str) -> PathBuf {
  let joined = from_dir.join(include_path);
  collapse(&joined)
}

fn collapse(path: &Path) -> PathBuf {
  let mut out = Vec::new();
  for comp in path.components() {
    use std::path::Component::*;
    match comp {
      CurDir => {}
      ParentDir => { if matches!(out.last(), Some(Normal(_))) { out.pop(); } else { out.push(comp) } }
      c => out.push(c),
    }
  }
  out.into_iter().collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn collapses_dot_and_dotdot() {
    let base = Path::new("/a/b/c");
    assert_eq!(resolve_include(base, "../d.nc"), PathBuf::from("/a/b/d.nc"));
    assert_eq!(resolve_include(base, "./d.nc"), PathBuf::from("/a/b/c/d.nc"));
    assert_eq!(resolve_include(base, "../../e.nc"), PathBuf::from("/a/e.nc"));
  }

  /// `MapProvider` never touches disk, so `FsProvider` is exercised
  /// separately against a real temp directory here.
  #[test]
  fn fs_provider_reads_real_files_and_reports_missing_ones() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let file = dir.path().join("m.nc");
    std::fs::write(&file, "export i32 Main() { return 0; }").expect("write temp file");

    let provider = FsProvider;
    assert!(provider.exists(&file));
    assert_eq!(provider.read_to_string(&file).unwrap(), "export i32 Main() { return 0; }");

    let missing = dir.path().join("missing.nc");
    assert!(!provider.exists(&missing));
    assert!(provider.read_to_string(&missing).is_err());
  }
}
