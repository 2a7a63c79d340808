//! The fix applier: stages, conflict-checks, and commits the edits carried
//! by diagnostics. Application is atomic per fix; a later fix never
//! overwrites a span an earlier fix already changed.

use std::fmt;
use std::io;
use std::path::PathBuf;
use hashbrown::{HashMap, HashSet};
use crate::FileId;
use crate::diag::{Applicability, Diagnostic, Fix, FixBuildContext, TextEdit};
use crate::fileset::FileSet;
use crate::types::Span;

/// Which fixes to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyMode {
  /// Apply the single best candidate.
  Once,
  /// Apply every always-safe candidate.
  All,
  /// Apply the candidate with the given id.
  ById(String),
}

/// A fix that was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedFix {
  /// The fix id.
  pub id: String,
  /// The fix title.
  pub title: String,
}

/// A fix that was not applied, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedFix {
  /// The fix id.
  pub id: String,
  /// The fix title.
  pub title: String,
  /// The reason it was skipped.
  pub reason: String,
}

/// The outcome of one [`apply`] run.
#[derive(Clone, Debug, Default)]
pub struct ApplyReport {
  /// Fixes applied, in application order.
  pub applied: Vec<AppliedFix>,
  /// Fixes skipped, with reasons.
  pub skipped: Vec<SkippedFix>,
  /// Files written, with the number of edits that landed in each.
  pub changed: Vec<(PathBuf, usize)>,
}

/// A disk failure during commit. Edits staged before the failure are
/// reported in `partial`; the failing file and everything after it were not
/// written.
#[derive(Debug)]
pub struct ApplyError {
  /// The file that failed to write.
  pub path: PathBuf,
  /// The underlying error.
  pub source: io::Error,
  /// What had been applied before the failure.
  pub partial: ApplyReport,
}

impl fmt::Display for ApplyError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "failed to write {}: {}", self.path.display(), self.source)
  }
}

impl std::error::Error for ApplyError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.source) }
}

/// A materialized candidate, carrying its sort key.
struct Candidate {
  id: String,
  title: String,
  applicability: Applicability,
  requires_all: bool,
  edits: Vec<TextEdit>,
  /// Sort key fields from the parent diagnostic.
  file: FileId,
  start: u32,
  end: u32,
  order: usize,
  code: u16,
  is_preferred: bool,
}

/// Per-file application state: the working buffer plus the original spans
/// of committed edits (with their length deltas), kept sorted by start.
#[derive(Default)]
struct FileState {
  buf: String,
  committed: Vec<(Span, i64)>,
  count: usize,
}

impl FileState {
  /// The byte delta accumulated by committed edits entirely before `pos`.
  fn delta_at(&self, pos: u32) -> i64 {
    self.committed.iter()
      .filter(|(sp, _)| sp.end <= pos)
      .map(|&(_, d)| d)
      .sum()
  }

  fn conflicts(&self, span: Span) -> bool {
    self.committed.iter().any(|(sp, _)| sp.overlaps(span))
  }
}

fn synthesize_id(fix: &Fix, diag: &Diagnostic, index: usize) -> String {
  fix.id.clone().unwrap_or_else(|| format!("{}.{index}", diag.code.id()))
}

/// Gather candidates: materialize every fix (invoking thunks), drop
/// edit-less ones, and deduplicate by id within each diagnostic.
fn gather(
  files: &FileSet, diags: &[Diagnostic], report: &mut ApplyReport,
) -> Vec<Candidate> {
  let mut out = vec![];
  let mut order = 0;
  for diag in diags {
    let mut seen = HashSet::new();
    for (index, fix) in diag.fixes.iter().enumerate() {
      let id = synthesize_id(fix, diag, index);
      if !seen.insert(id.clone()) { continue }
      let ctx = FixBuildContext { files, primary: diag.primary };
      let edits = fix.resolve(&ctx);
      if edits.is_empty() {
        report.skipped.push(SkippedFix {
          id, title: fix.title.clone(), reason: "fix produced no edits".into(),
        });
        continue
      }
      out.push(Candidate {
        id, title: fix.title.clone(),
        applicability: fix.applicability,
        requires_all: fix.requires_all,
        edits,
        file: diag.primary.file,
        start: diag.primary.span.start,
        end: diag.primary.span.end,
        order,
        code: diag.code.num(),
        is_preferred: fix.is_preferred,
      });
      order += 1;
    }
  }
  out.sort_by(|a, b| {
    (a.file, a.start, a.end, a.order, a.code).cmp(&(b.file, b.start, b.end, b.order, b.code))
      .then(b.is_preferred.cmp(&a.is_preferred))
      .then(a.id.cmp(&b.id))
      .then(a.title.cmp(&b.title))
  });
  out
}

const REQUIRES_ALL: &str = "fix requires all fixes to be applied";

/// Select candidates per the mode, recording skips.
fn select(mode: &ApplyMode, cands: Vec<Candidate>, report: &mut ApplyReport) -> Vec<Candidate> {
  match mode {
    ApplyMode::Once => {
      for c in &cands {
        if c.requires_all {
          report.skipped.push(SkippedFix {
            id: c.id.clone(), title: c.title.clone(), reason: REQUIRES_ALL.into(),
          });
        }
      }
      let pick = cands.iter()
        .position(|c| !c.requires_all && c.applicability == Applicability::AlwaysSafe)
        .or_else(|| cands.iter().position(|c| !c.requires_all));
      match pick {
        Some(i) => { let mut cands = cands; vec![cands.swap_remove(i)] }
        None => vec![],
      }
    }
    ApplyMode::All => {
      let (take, skip): (Vec<_>, Vec<_>) =
        cands.into_iter().partition(|c| c.applicability == Applicability::AlwaysSafe);
      for c in skip {
        report.skipped.push(SkippedFix {
          id: c.id, title: c.title, reason: c.applicability.to_string(),
        });
      }
      take
    }
    ApplyMode::ById(target) => {
      for c in cands {
        if c.id == *target {
          if c.requires_all {
            report.skipped.push(SkippedFix {
              id: c.id, title: c.title, reason: REQUIRES_ALL.into(),
            });
            return vec![]
          }
          return vec![c]
        }
      }
      vec![]
    }
  }
}

/// Apply one fix into the working state. Either all of its edits land or
/// none do; on failure the reason is returned.
fn apply_fix(
  files: &FileSet, states: &mut HashMap<FileId, FileState>, cand: &Candidate,
) -> Result<(), String> {
  for e in &cand.edits {
    if files.is_virtual(e.span.file) { return Err("target file is virtual".into()) }
  }
  // conflict check against everything already committed, by original spans
  for e in &cand.edits {
    let st = states.entry(e.span.file).or_insert_with(|| FileState {
      buf: files.content(e.span.file).to_owned(), committed: vec![], count: 0,
    });
    if st.conflicts(e.span.span) {
      return Err("overlaps an already applied fix".into())
    }
  }
  // stage right-to-left so earlier edits in the same fix keep their offsets
  let mut edits: Vec<&TextEdit> = cand.edits.iter().collect();
  edits.sort_by(|a, b| {
    (b.span.span.start, b.span.span.end).cmp(&(a.span.span.start, a.span.span.end))
  });
  let mut staged: HashMap<FileId, (String, usize)> = HashMap::new();
  for e in edits {
    let st = &states[&e.span.file];
    let (buf, n) = staged.entry(e.span.file)
      .or_insert_with(|| (st.buf.clone(), 0));
    let delta = st.delta_at(e.span.span.start);
    let start = usize::try_from(i64::from(e.span.span.start) + delta)
      .expect("edit offset underflow");
    let end = usize::try_from(i64::from(e.span.span.end) + delta)
      .expect("edit offset underflow");
    if end > buf.len() { return Err("edit is out of range".into()) }
    if let Some(old) = &e.old_text {
      if !old.is_empty() && &buf[start..end] != old {
        return Err("stale edit: file content changed".into())
      }
    }
    buf.replace_range(start..end, &e.new_text);
    *n += 1;
  }
  // commit the staging buffers and record the original spans
  for (file, (buf, n)) in staged {
    let st = states.get_mut(&file).expect("staged file has state");
    st.buf = buf;
    st.count += n;
  }
  for e in &cand.edits {
    let st = states.get_mut(&e.span.file).expect("staged file has state");
    let delta = i64::try_from(e.new_text.len()).expect("edit too large")
      - i64::from(e.span.span.len());
    st.committed.push((e.span.span, delta));
    st.committed.sort_by_key(|(sp, _)| (sp.start, sp.end));
  }
  Ok(())
}

/// Run the full pipeline: gather, sort, select, apply, and commit to disk.
/// Returns the report, or an [`ApplyError`] carrying the partial report if
/// a disk write fails.
pub fn apply(
  files: &mut FileSet, diags: &[Diagnostic], mode: &ApplyMode,
) -> Result<ApplyReport, ApplyError> {
  let mut report = ApplyReport::default();
  let cands = gather(files, diags, &mut report);
  let selected = select(mode, cands, &mut report);
  log::debug!("fix applier: {} candidate(s) selected", selected.len());

  let mut states: HashMap<FileId, FileState> = HashMap::new();
  for cand in &selected {
    match apply_fix(files, &mut states, cand) {
      Ok(()) => report.applied.push(AppliedFix { id: cand.id.clone(), title: cand.title.clone() }),
      Err(reason) => report.skipped.push(SkippedFix {
        id: cand.id.clone(), title: cand.title.clone(), reason,
      }),
    }
  }

  // commit: write dirty buffers to disk, preserving file modes
  let mut dirty: Vec<(FileId, FileState)> = states.into_iter()
    .filter(|(_, st)| st.count > 0)
    .collect();
  dirty.sort_by_key(|&(file, _)| file);
  for (file, st) in dirty {
    let path = files.path(file).to_path_buf();
    if let Err(source) = write_preserving_mode(&path, &st.buf) {
      return Err(ApplyError { path, source, partial: report })
    }
    files.set_content(file, st.buf);
    report.changed.push((path, st.count));
  }
  Ok(report)
}

fn write_preserving_mode(path: &std::path::Path, content: &str) -> io::Result<()> {
  let perms = std::fs::metadata(path).map(|m| m.permissions()).ok();
  std::fs::write(path, content)?;
  if let Some(perms) = perms { std::fs::set_permissions(path, perms)? }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::{DiagCode, Fix, FixKind, FixSource, Severity};
  use crate::types::FileSpan;

  fn edit(file: FileId, start: u32, end: u32, text: &str) -> TextEdit {
    TextEdit {
      span: FileSpan::new(file, start..end),
      new_text: text.into(),
      old_text: None,
    }
  }

  fn fix(id: &str, requires_all: bool, edits: Vec<TextEdit>) -> Fix {
    Fix {
      id: Some(id.into()),
      title: id.into(),
      kind: FixKind::QuickFix,
      applicability: Applicability::AlwaysSafe,
      is_preferred: false,
      requires_all,
      source: FixSource::Edits(edits),
    }
  }

  fn scenario(dir: &std::path::Path) -> (FileSet, Vec<Diagnostic>, FileId) {
    let path = dir.join("main.sg");
    std::fs::write(&path, "let x = 1").expect("write input");
    let mut files = FileSet::default();
    let f = files.add(path, "let x = 1");
    let d1 = Diagnostic::new(
      Severity::Warning, DiagCode::SemaNotExhaustive, FileSpan::new(f, 0..1), "comment it",
    ).with_fix(fix("comment", true, vec![edit(f, 0, 0, "// ")]));
    let d2 = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 8..9), "missing ;")
      .with_fix(fix("semi", false, vec![edit(f, 9, 9, ";")]));
    (files, vec![d1, d2], f)
  }

  #[test]
  fn once_skips_requires_all() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut files, diags, f) = scenario(dir.path());
    let report = apply(&mut files, &diags, &ApplyMode::Once).expect("apply");
    assert_eq!(files.content(f), "let x = 1;");
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].id, "semi");
    assert!(report.skipped.iter().any(|s|
      s.id == "comment" && s.reason == "fix requires all fixes to be applied"));
    let on_disk = std::fs::read_to_string(files.path(f)).expect("read back");
    assert_eq!(on_disk, "let x = 1;");
  }

  #[test]
  fn all_applies_both() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut files, diags, f) = scenario(dir.path());
    let report = apply(&mut files, &diags, &ApplyMode::All).expect("apply");
    assert_eq!(files.content(f), "// let x = 1;");
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed[0].1, 2);
  }

  #[test]
  fn by_id_picks_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut files, diags, f) = scenario(dir.path());
    let report = apply(&mut files, &diags, &ApplyMode::ById("semi".into())).expect("apply");
    assert_eq!(files.content(f), "let x = 1;");
    assert_eq!(report.applied.len(), 1);
  }

  #[test]
  fn overlapping_fix_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.sg");
    std::fs::write(&path, "abcdef").expect("write input");
    let mut files = FileSet::default();
    let f = files.add(path, "abcdef");
    let d1 = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 0..4), "one")
      .with_fix(fix("one", false, vec![edit(f, 0, 4, "XYZ")]));
    let d2 = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 2..6), "two")
      .with_fix(fix("two", false, vec![edit(f, 2, 6, "123")]));
    let report = apply(&mut files, &diags_vec(d1, d2), &ApplyMode::All).expect("apply");
    assert_eq!(files.content(f), "XYZef");
    assert_eq!(report.applied.len(), 1);
    assert!(report.skipped.iter().any(|s| s.id == "two"));
  }

  fn diags_vec(a: Diagnostic, b: Diagnostic) -> Vec<Diagnostic> { vec![a, b] }

  #[test]
  fn stale_old_text_skips_whole_fix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.sg");
    std::fs::write(&path, "abcdef").expect("write input");
    let mut files = FileSet::default();
    let f = files.add(path, "abcdef");
    let stale = TextEdit {
      span: FileSpan::new(f, 0..3),
      new_text: "X".into(),
      old_text: Some("zzz".into()),
    };
    let d = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 0..3), "stale")
      .with_fix(fix("stale", false, vec![stale, edit(f, 4, 5, "Y")]));
    let report = apply(&mut files, &diags_vec(d.clone(), d), &ApplyMode::Once).expect("apply");
    assert_eq!(files.content(f), "abcdef", "atomic: no edit of the fix landed");
    assert!(report.applied.is_empty());
  }

  #[test]
  fn virtual_files_are_never_written() {
    let mut files = FileSet::default();
    let f = files.add_virtual("<generated>", "abc");
    let d = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 0..1), "v")
      .with_fix(fix("v", false, vec![edit(f, 0, 1, "X")]));
    let report = apply(&mut files, &[d], &ApplyMode::All).expect("apply");
    assert!(report.applied.is_empty());
    assert!(report.skipped.iter().any(|s| s.reason == "target file is virtual"));
    assert_eq!(files.content(f), "abc");
  }

  #[test]
  fn cumulative_deltas_across_fixes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.sg");
    std::fs::write(&path, "ab").expect("write input");
    let mut files = FileSet::default();
    let f = files.add(path, "ab");
    // first fix doubles the prefix; second inserts at the (original) end
    let d1 = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 0..1), "p")
      .with_fix(fix("prefix", false, vec![edit(f, 0, 1, "aaaa")]));
    let d2 = Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(f, 1..2), "s")
      .with_fix(fix("suffix", false, vec![edit(f, 2, 2, "!")]));
    let report = apply(&mut files, &diags_vec(d1, d2), &ApplyMode::All).expect("apply");
    assert_eq!(report.applied.len(), 2);
    assert_eq!(files.content(f), "aaaab!");
  }
}
