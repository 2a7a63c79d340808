//! The file set, a table of source files addressed by [`FileId`].
//!
//! The middle end never reads the disk itself; the driver loads file contents
//! up front and registers them here. Virtual files (editor buffers, test
//! inputs) participate in diagnostics but are never written back by the fix
//! applier.

use std::path::{Path, PathBuf};
use crate::Idx;
use crate::types::{FileSpan, Span};

crate::mk_id! {
  /// An index into the [`FileSet`].
  FileId
}

/// How [`FileSet::format_path`] renders a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathMode {
  /// The path exactly as registered.
  Full,
  /// The path relative to a base directory, falling back to the full path
  /// when the file is not under the base.
  Relative,
}

/// A resolved source position, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineCol {
  /// The 1-based line number.
  pub line: u32,
  /// The 1-based column number, in bytes.
  pub col: u32,
}

#[derive(Debug)]
struct File {
  path: PathBuf,
  content: String,
  /// Byte offsets of line starts, computed on registration.
  lines: Vec<u32>,
  virtual_: bool,
}

/// The set of source files participating in a compilation.
#[derive(Debug, Default)]
pub struct FileSet {
  files: Vec<File>,
}

fn line_starts(s: &str) -> Vec<u32> {
  let mut out = vec![0];
  for (i, b) in s.bytes().enumerate() {
    if b == b'\n' { out.push((i + 1).try_into().expect("file too large")) }
  }
  out
}

impl FileSet {
  /// Register a disk-backed file, returning its id.
  pub fn add(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> FileId {
    self.add_inner(path.into(), content.into(), false)
  }

  /// Register a virtual file. It resolves spans like any other file but the
  /// fix applier refuses to write it.
  pub fn add_virtual(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> FileId {
    self.add_inner(path.into(), content.into(), true)
  }

  fn add_inner(&mut self, path: PathBuf, content: String, virtual_: bool) -> FileId {
    let id = FileId::from_usize(self.files.len());
    let lines = line_starts(&content);
    self.files.push(File { path, content, lines, virtual_ });
    id
  }

  /// The number of registered files.
  #[must_use] pub fn len(&self) -> usize { self.files.len() }

  /// Whether the set is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.files.is_empty() }

  /// Iterate over all file ids, in registration order.
  pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
    (0..self.files.len()).map(FileId::from_usize)
  }

  /// The content of a file.
  #[must_use] pub fn content(&self, file: FileId) -> &str {
    &self.files[file.into_usize()].content
  }

  /// Replace the content of a file. Used by the fix applier at commit time.
  pub fn set_content(&mut self, file: FileId, content: String) {
    let f = &mut self.files[file.into_usize()];
    f.lines = line_starts(&content);
    f.content = content;
  }

  /// The path of a file.
  #[must_use] pub fn path(&self, file: FileId) -> &Path {
    &self.files[file.into_usize()].path
  }

  /// Whether a file is virtual (not disk-backed).
  #[must_use] pub fn is_virtual(&self, file: FileId) -> bool {
    self.files[file.into_usize()].virtual_
  }

  /// Find a file by path, if registered.
  #[must_use] pub fn find(&self, path: &Path) -> Option<FileId> {
    self.files.iter().position(|f| f.path == path).map(FileId::from_usize)
  }

  /// Render a file path in the given mode.
  #[must_use] pub fn format_path(&self, file: FileId, mode: PathMode, base: Option<&Path>) -> String {
    let path = self.path(file);
    match (mode, base) {
      (PathMode::Relative, Some(base)) =>
        path.strip_prefix(base).unwrap_or(path).display().to_string(),
      _ => path.display().to_string(),
    }
  }

  /// Resolve the start of a span to a 1-based line and column.
  #[must_use] pub fn resolve(&self, fsp: FileSpan) -> LineCol {
    self.resolve_offset(fsp.file, fsp.span.start)
  }

  /// Resolve a byte offset in a file to a 1-based line and column.
  #[must_use] pub fn resolve_offset(&self, file: FileId, offset: u32) -> LineCol {
    let lines = &self.files[file.into_usize()].lines;
    let line = lines.partition_point(|&start| start <= offset) - 1;
    LineCol {
      line: u32::try_from(line).expect("file too large") + 1,
      col: offset - lines[line] + 1,
    }
  }

  /// The slice of file content covered by a span.
  #[must_use] pub fn slice(&self, file: FileId, span: Span) -> &str {
    &self.content(file)[span.start as usize..span.end as usize]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_line_col() {
    let mut fs = FileSet::default();
    let f = fs.add("a.sg", "let x = 1;\nlet y = 2;\n");
    assert_eq!(fs.resolve_offset(f, 0), LineCol { line: 1, col: 1 });
    assert_eq!(fs.resolve_offset(f, 4), LineCol { line: 1, col: 5 });
    assert_eq!(fs.resolve_offset(f, 11), LineCol { line: 2, col: 1 });
    assert_eq!(fs.resolve_offset(f, 15), LineCol { line: 2, col: 5 });
  }

  #[test]
  fn relative_paths() {
    let mut fs = FileSet::default();
    let f = fs.add("/proj/src/a.sg", "");
    assert_eq!(fs.format_path(f, PathMode::Relative, Some(Path::new("/proj"))), "src/a.sg");
    assert_eq!(fs.format_path(f, PathMode::Relative, Some(Path::new("/other"))), "/proj/src/a.sg");
    assert_eq!(fs.format_path(f, PathMode::Full, None), "/proj/src/a.sg");
  }
}
