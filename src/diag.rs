//! The diagnostic model: severities, stable codes, structured fixes, the
//! per-file bag, and the reporters the analyzer writes through.

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use hashbrown::HashSet;
use itertools::Itertools;
use crate::FileId;
use crate::fileset::{FileSet, PathMode};
use crate::types::FileSpan;

/// The severity of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
  /// An attached note.
  Note,
  /// Informational output.
  Info,
  /// A warning; promoted to [`Severity::Error`] under warnings-as-errors.
  Warning,
  /// An error; the compilation cannot proceed to codegen.
  Error,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Severity::Note => "note",
      Severity::Info => "info",
      Severity::Warning => "warning",
      Severity::Error => "error",
    })
  }
}

/// The compiler phase a diagnostic code belongs to. Each phase owns a
/// numeric range and a code-id prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
  /// Lexical analysis, range 1000.
  Lex,
  /// Syntax, range 2000.
  Syn,
  /// Semantic analysis, range 3000.
  Sem,
  /// File input/output, range 4000.
  Io,
  /// Project structure, range 5000.
  Prj,
}

impl Phase {
  /// The code-id prefix for this phase.
  #[must_use] pub fn prefix(self) -> &'static str {
    match self {
      Phase::Lex => "LEX",
      Phase::Syn => "SYN",
      Phase::Sem => "SEM",
      Phase::Io => "IO",
      Phase::Prj => "PRJ",
    }
  }
}

macro_rules! make_codes {
  {$($(#[$attr:meta])* $x:ident: ($phase:ident, $num:literal, $title:literal),)*} => {
    /// A stable diagnostic code. The numeric value is partitioned by phase
    /// (1000 lexer, 2000 syntax, 3000 semantic, 4000 IO, 5000 project) and
    /// never reused.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum DiagCode { $($(#[$attr])* $x),* }

    impl DiagCode {
      /// The phase that owns the code.
      #[must_use] pub fn phase(self) -> Phase {
        match self { $(Self::$x => Phase::$phase),* }
      }
      /// The numeric value, including the phase range.
      #[must_use] pub fn num(self) -> u16 {
        match self { $(Self::$x => $num),* }
      }
      /// The stable title.
      #[must_use] pub fn title(self) -> &'static str {
        match self { $(Self::$x => $title),* }
      }
    }
  }
}

make_codes! {
  /// A malformed token reached the middle end.
  LexInvalidToken: (Lex, 1001, "invalid token"),
  /// A symbol was re-exported with reduced visibility.
  SynVisibilityReduction: (Syn, 2101, "visibility cannot be reduced"),
  /// A name was declared twice in one scope with a colliding signature.
  SynDuplicateName: (Syn, 2102, "duplicate declaration"),
  /// Operand types do not fit the operator or expected type.
  SemaTypeMismatch: (Sem, 3001, "type mismatch"),
  /// A name did not resolve.
  SemaUnknownName: (Sem, 3002, "unknown name"),
  /// More than one overload matched a call.
  SemaAmbiguousOverload: (Sem, 3003, "ambiguous overload"),
  /// A moved-out binding was used again.
  SemaMovedValueUse: (Sem, 3004, "use of moved value"),
  /// A borrow conflicts with an existing borrow.
  SemaBorrowConflict: (Sem, 3005, "conflicting borrow"),
  /// An exclusive borrow was taken from an immutable binding.
  SemaMutBorrowRequiresMut: (Sem, 3006, "exclusive borrow of immutable binding"),
  /// A binding was reassigned while borrowed.
  SemaAssignWhileBorrowed: (Sem, 3007, "assignment while borrowed"),
  /// A `@nonblocking` function calls something that may wait.
  SemaLockNonblockingCallsWait: (Sem, 3008, "nonblocking function calls a blocking operation"),
  /// A borrowed value crosses a task boundary.
  SemaBorrowCrossTask: (Sem, 3009, "borrowed value crosses task boundary"),
  /// A value type contains itself with no indirection.
  SemaRecursiveUnsized: (Sem, 3010, "recursive type has infinite size"),
  /// Generic expansion exceeded the depth limit.
  SemaMonoDepthExceeded: (Sem, 3011, "generic instantiation depth exceeded"),
  /// A `compare` does not cover every tag and has no `finally` arm.
  SemaNotExhaustive: (Sem, 3012, "compare is not exhaustive"),
  /// A field access named no field of the type.
  SemaUnknownField: (Sem, 3013, "unknown field"),
  /// A call passed the wrong number of arguments.
  SemaArgCountMismatch: (Sem, 3014, "wrong number of arguments"),
  /// A call target is not callable.
  SemaNotCallable: (Sem, 3015, "expression is not callable"),
  /// An assignment target is not a mutable place.
  SemaAssignToImmutable: (Sem, 3016, "assignment to immutable binding"),
  /// A `compare` pattern named no tag of the union.
  SemaUnknownTag: (Sem, 3017, "unknown tag"),
  /// `break` or `continue` outside a loop.
  SemaBreakOutsideLoop: (Sem, 3018, "break outside of loop"),
  /// An invalid cast.
  SemaCastInvalid: (Sem, 3019, "invalid cast"),
  /// Wrong number of generic arguments.
  SemaGenericArgCount: (Sem, 3020, "wrong number of generic arguments"),
  /// A file write failed while applying fixes.
  IoWriteFailed: (Io, 4001, "file write failed"),
  /// No `@entrypoint` function was found.
  PrjNoEntrypoint: (Prj, 5001, "no entrypoint"),
}

impl DiagCode {
  /// The stable code id, e.g. `SEM3010`.
  #[must_use] pub fn id(self) -> String {
    format!("{}{:04}", self.phase().prefix(), self.num())
  }
}

impl PartialOrd for DiagCode {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for DiagCode {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.num().cmp(&other.num()) }
}

/// A single text replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEdit {
  /// The replaced range. Zero-length for pure insertions.
  pub span: FileSpan,
  /// The replacement text.
  pub new_text: String,
  /// The expected current text. When nonempty and the file no longer
  /// matches, the whole fix is skipped as stale.
  pub old_text: Option<String>,
}

/// How confident the producer is that a fix can be applied unattended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applicability {
  /// The fix is always correct to apply.
  AlwaysSafe,
  /// The fix is correct under heuristics that usually hold.
  SafeWithHeuristics,
  /// A human should review before applying.
  ManualReview,
}

impl fmt::Display for Applicability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Applicability::AlwaysSafe => "always safe",
      Applicability::SafeWithHeuristics => "safe with heuristics",
      Applicability::ManualReview => "needs manual review",
    })
  }
}

/// The general category of a fix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixKind {
  /// A small local correction.
  QuickFix,
  /// A larger rewrite.
  Refactor,
}

/// Context handed to lazy fix builders. Materialization must be pure: the
/// same context always yields the same edits.
pub struct FixBuildContext<'a> {
  /// The file set, for reading current content.
  pub files: &'a FileSet,
  /// The primary span of the parent diagnostic.
  pub primary: FileSpan,
}

/// A lazy fix builder.
pub trait FixThunk {
  /// Build the edits.
  fn build(&self, ctx: &FixBuildContext<'_>) -> Vec<TextEdit>;
}

impl<F: Fn(&FixBuildContext<'_>) -> Vec<TextEdit>> FixThunk for F {
  fn build(&self, ctx: &FixBuildContext<'_>) -> Vec<TextEdit> { self(ctx) }
}

/// The edits of a fix: either materialized up front or built on demand.
#[derive(Clone)]
pub enum FixSource {
  /// Edits known at diagnostic construction time.
  Edits(Vec<TextEdit>),
  /// A pure builder invoked at render or apply time.
  Lazy(Rc<dyn FixThunk>),
}

impl fmt::Debug for FixSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FixSource::Edits(es) => f.debug_tuple("Edits").field(es).finish(),
      FixSource::Lazy(_) => f.write_str("Lazy(..)"),
    }
  }
}

/// A structured code change attached to a diagnostic.
#[derive(Clone, Debug)]
pub struct Fix {
  /// A stable identifier; synthesized by the applier when absent.
  pub id: Option<String>,
  /// A human-readable title.
  pub title: String,
  /// The category.
  pub kind: FixKind,
  /// Application confidence.
  pub applicability: Applicability,
  /// Whether this is the preferred fix for its diagnostic.
  pub is_preferred: bool,
  /// Whether the fix only makes sense when every fix in the batch is
  /// applied together.
  pub requires_all: bool,
  /// The edits.
  pub source: FixSource,
}

impl Fix {
  /// Materialize the edits, invoking the thunk if the fix is lazy.
  #[must_use] pub fn resolve(&self, ctx: &FixBuildContext<'_>) -> Vec<TextEdit> {
    match &self.source {
      FixSource::Edits(es) => es.clone(),
      FixSource::Lazy(thunk) => thunk.build(ctx),
    }
  }
}

/// An attached note pointing at a secondary location.
#[derive(Clone, Debug)]
pub struct DiagNote {
  /// The location, when the note is anchored.
  pub span: Option<FileSpan>,
  /// The note text.
  pub message: String,
}

/// A diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  /// The severity.
  pub severity: Severity,
  /// The stable code.
  pub code: DiagCode,
  /// The message.
  pub message: String,
  /// The primary location.
  pub primary: FileSpan,
  /// Secondary notes.
  pub notes: Vec<DiagNote>,
  /// Attached fixes.
  pub fixes: Vec<Fix>,
}

impl Diagnostic {
  /// Construct a diagnostic with no notes or fixes.
  #[must_use] pub fn new(
    severity: Severity, code: DiagCode, primary: FileSpan, message: impl Into<String>,
  ) -> Self {
    Self { severity, code, message: message.into(), primary, notes: vec![], fixes: vec![] }
  }

  /// Shorthand for an error.
  #[must_use] pub fn error(code: DiagCode, primary: FileSpan, message: impl Into<String>) -> Self {
    Self::new(Severity::Error, code, primary, message)
  }

  /// Shorthand for a warning.
  #[must_use] pub fn warning(code: DiagCode, primary: FileSpan, message: impl Into<String>) -> Self {
    Self::new(Severity::Warning, code, primary, message)
  }

  /// Attach a note.
  #[must_use] pub fn with_note(mut self, span: Option<FileSpan>, message: impl Into<String>) -> Self {
    self.notes.push(DiagNote { span, message: message.into() });
    self
  }

  /// Attach a fix.
  #[must_use] pub fn with_fix(mut self, fix: Fix) -> Self {
    self.fixes.push(fix);
    self
  }
}

/// Anything diagnostics can be reported into.
pub trait Reporter {
  /// Report one diagnostic.
  fn report(&mut self, diag: Diagnostic);
}

/// The diagnostic bag: the accumulation point for one compilation.
#[derive(Debug)]
pub struct Bag {
  diags: Vec<Diagnostic>,
  /// The cap on stored diagnostics; adds beyond it are no-ops.
  max: usize,
  /// Promote warnings to errors on add.
  warnings_as_errors: bool,
  errors: usize,
}

impl Default for Bag {
  fn default() -> Self { Self::new(usize::MAX, false) }
}

impl Bag {
  /// Create a bag with a cap and warnings policy.
  #[must_use] pub fn new(max: usize, warnings_as_errors: bool) -> Self {
    Self { diags: vec![], max, warnings_as_errors, errors: 0 }
  }

  /// Add a diagnostic, applying the warnings policy and the cap.
  pub fn add(&mut self, mut diag: Diagnostic) {
    if self.diags.len() >= self.max { return }
    if self.warnings_as_errors && diag.severity == Severity::Warning {
      diag.severity = Severity::Error;
    }
    if diag.severity == Severity::Error { self.errors += 1 }
    self.diags.push(diag);
  }

  /// Whether any error has been recorded.
  #[must_use] pub fn has_errors(&self) -> bool { self.errors > 0 }

  /// The number of stored diagnostics.
  #[must_use] pub fn len(&self) -> usize { self.diags.len() }

  /// Whether the bag is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.diags.is_empty() }

  /// The stored diagnostics, in current order.
  #[must_use] pub fn diags(&self) -> &[Diagnostic] { &self.diags }

  /// Merge another bag into this one, respecting the cap.
  pub fn absorb(&mut self, other: Bag) {
    for d in other.diags { self.add(d) }
  }

  /// Sort into the canonical emission order: file, then span, then severity
  /// (most severe first), then code. Stable, so sorting twice is a no-op.
  pub fn sort(&mut self) {
    self.diags.sort_by(|a, b| {
      (a.primary.file, a.primary.span.start, a.primary.span.end)
        .cmp(&(b.primary.file, b.primary.span.start, b.primary.span.end))
        .then(b.severity.cmp(&a.severity))
        .then(a.code.cmp(&b.code))
    });
  }

  /// Render the golden short form: one line per entry,
  /// `<severity> <code> <relpath>:<line>:<col> <message>`, filtered to
  /// exclude stdlib and internal paths, sorted by
  /// `(path, line, col, severity, code, message)`.
  #[must_use] pub fn render_short(&self, files: &FileSet, base: Option<&Path>) -> String {
    self.diags.iter()
      .filter(|d| !is_internal_path(files.path(d.primary.file)))
      .map(|d| {
        let pos = files.resolve(d.primary);
        let path = files.format_path(d.primary.file, PathMode::Relative, base);
        (path, pos.line, pos.col, d.severity, d.code, &d.message)
      })
      .sorted()
      .map(|(path, line, col, sev, code, msg)| {
        format!("{sev} {} {path}:{line}:{col} {msg}", code.id())
      })
      .join("\n")
  }
}

fn is_internal_path(path: &Path) -> bool {
  path.components().any(|c| c.as_os_str() == "std")
    || path.to_string_lossy().starts_with('<')
}

impl Reporter for Bag {
  fn report(&mut self, diag: Diagnostic) { self.add(diag) }
}

impl Reporter for &mut Bag {
  fn report(&mut self, diag: Diagnostic) { self.add(diag) }
}

/// A reporter that drops diagnostics identical in
/// `(code, severity, primary, message)` to one already seen. Recursive type
/// resolution re-reports the same failure from several paths; users see it
/// once.
pub struct Dedup<R> {
  inner: R,
  seen: HashSet<(DiagCode, Severity, FileId, u32, u32, String)>,
}

impl<R: Reporter> Dedup<R> {
  /// Wrap a reporter.
  pub fn new(inner: R) -> Self { Self { inner, seen: HashSet::new() } }

  /// Unwrap, discarding the seen-set.
  pub fn into_inner(self) -> R { self.inner }
}

impl<R: Reporter> Reporter for Dedup<R> {
  fn report(&mut self, diag: Diagnostic) {
    let key = (
      diag.code, diag.severity, diag.primary.file,
      diag.primary.span.start, diag.primary.span.end, diag.message.clone(),
    );
    if self.seen.insert(key) { self.inner.report(diag) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Span;

  fn fsp(file: u32, start: u32, end: u32) -> FileSpan {
    FileSpan { file: FileId(file), span: Span::new(start, end) }
  }

  #[test]
  fn code_ids() {
    assert_eq!(DiagCode::SemaRecursiveUnsized.id(), "SEM3010");
    assert_eq!(DiagCode::IoWriteFailed.id(), "IO4001");
    assert_eq!(DiagCode::SynVisibilityReduction.title(), "visibility cannot be reduced");
  }

  #[test]
  fn bag_cap_and_promotion() {
    let mut bag = Bag::new(2, true);
    bag.add(Diagnostic::warning(DiagCode::SemaNotExhaustive, fsp(0, 0, 1), "a"));
    assert!(bag.has_errors(), "warnings promote to errors");
    bag.add(Diagnostic::error(DiagCode::SemaTypeMismatch, fsp(0, 1, 2), "b"));
    bag.add(Diagnostic::error(DiagCode::SemaTypeMismatch, fsp(0, 2, 3), "c"));
    assert_eq!(bag.len(), 2, "adds beyond the cap are no-ops");
  }

  #[test]
  fn sort_is_stable() {
    let mut bag = Bag::default();
    bag.add(Diagnostic::error(DiagCode::SemaUnknownName, fsp(1, 5, 6), "late"));
    bag.add(Diagnostic::warning(DiagCode::SemaNotExhaustive, fsp(0, 5, 6), "warn"));
    bag.add(Diagnostic::error(DiagCode::SemaTypeMismatch, fsp(0, 5, 6), "err"));
    bag.sort();
    let first: Vec<_> = bag.diags().iter().map(|d| d.message.clone()).collect();
    bag.sort();
    let second: Vec<_> = bag.diags().iter().map(|d| d.message.clone()).collect();
    assert_eq!(first, second);
    assert_eq!(first, ["err", "warn", "late"], "severity desc within one span");
  }

  #[test]
  fn dedup_reporter() {
    let mut bag = Bag::default();
    {
      let mut rep = Dedup::new(&mut bag);
      let d = Diagnostic::error(DiagCode::SemaTypeMismatch, fsp(0, 0, 1), "same");
      rep.report(d.clone());
      rep.report(d);
      rep.report(Diagnostic::error(DiagCode::SemaTypeMismatch, fsp(0, 0, 1), "other"));
    }
    assert_eq!(bag.len(), 2);
  }

  #[test]
  fn golden_rendering() {
    let mut files = FileSet::default();
    let a = files.add("/p/src/a.sg", "xx\nyy\n");
    let s = files.add("/p/std/io.sg", "zz\n");
    let mut bag = Bag::default();
    bag.add(Diagnostic::error(DiagCode::SemaTypeMismatch, FileSpan::new(s, 0..1), "hidden"));
    bag.add(Diagnostic::error(DiagCode::SemaUnknownName, FileSpan::new(a, 3..4), "who?"));
    bag.add(Diagnostic::warning(DiagCode::SemaNotExhaustive, FileSpan::new(a, 0..1), "gap"));
    let out = bag.render_short(&files, Some(Path::new("/p")));
    assert_eq!(out, "warning SEM3012 src/a.sg:1:1 gap\nerror SEM3002 src/a.sg:2:1 who?");
  }
}
