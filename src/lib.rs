//! The Surge compiler middle end.
//!
//! The pipeline takes parsed files (as [`ast::AstBuilder`] arenas) and
//! produces a validated, monomorphized, machine-independent IR:
//!
//! 1. name resolution ([`resolve`]) builds the symbol table;
//! 2. semantic analysis ([`infer`]) types every expression, enforces
//!    ownership and concurrency rules, and records generic instantiations;
//! 3. monomorphization ([`mono`]) specializes generics against the recorded
//!    instantiation map;
//! 4. MIR lowering ([`build_mir`]) and the pass pipeline ([`mir_opt`])
//!    produce validated control-flow graphs;
//! 5. the layout engine ([`layout`]) answers ABI queries and detects
//!    infinite-size recursive value types.
//!
//! User errors accumulate in a [`diag::Bag`]; the pipeline itself only
//! fails on internal invariant violations or cancellation.

#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]
#![allow(clippy::match_like_matches_macro)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod symbol;
pub mod fileset;
pub mod types;
pub mod diag;
pub mod fix;
pub mod resolve;
pub mod infer;
pub mod mono;
pub mod build_mir;
pub mod mir_opt;
pub mod layout;

pub use fileset::{FileId, FileSet};
pub use symbol::Symbol;

use diag::{Bag, Dedup, DiagCode, Diagnostic, Reporter};
use types::FileSpan;
use types::ast::AstBuilder;
use types::entity::{SymbolId, SymbolKind, SymbolTable, Visibility};
use types::ty::TypeStore;
use types::{hir, mir};

/// A newtype index into some array or arena.
pub trait Idx: Copy + Eq {
  /// Convert to a `usize` index.
  fn into_usize(self) -> usize;
  /// Convert from a `usize` index.
  fn from_usize(n: usize) -> Self;
  /// Return the current value and increment in place.
  fn fresh(&mut self) -> Self {
    let n = *self;
    *self = Self::from_usize(self.into_usize() + 1);
    n
  }
}

/// Define `u32` newtype indexes implementing [`Idx`].
#[macro_export]
macro_rules! mk_id {
  {$($(#[$attr:meta])* $id:ident),* $(,)?} => {$(
    $(#[$attr])*
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $id(pub u32);
    impl $crate::Idx for $id {
      fn into_usize(self) -> usize { self.0 as usize }
      fn from_usize(n: usize) -> Self { Self(n.try_into().expect("index overflow")) }
    }
  )*}
}

/// A cancellation token checked at function and block boundaries of the
/// long-running passes.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
  /// A token that never fires.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Request cancellation.
  pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed) }

  /// Whether cancellation was requested.
  #[must_use] pub fn is_canceled(&self) -> bool { self.0.load(Ordering::Relaxed) }

  /// Short-circuit with [`CompileError::Canceled`] when requested.
  pub fn check(&self) -> Result<(), CompileError> {
    if self.is_canceled() { Err(CompileError::Canceled) } else { Ok(()) }
  }
}

/// A fatal pipeline failure. User-facing problems are never reported this
/// way; they accumulate in the bag.
#[derive(Debug)]
pub enum CompileError {
  /// Cancellation was requested; no diagnostics are emitted.
  Canceled,
  /// A later phase ran without the HIR it requires.
  MissingHir,
  /// The MIR validator found broken IR, an internal invariant violation.
  InvalidMir(Vec<String>),
}

impl fmt::Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CompileError::Canceled => write!(f, "compilation canceled"),
      CompileError::MissingHir => write!(f, "internal error: HIR is absent"),
      CompileError::InvalidMir(errs) =>
        write!(f, "internal error: invalid MIR: {}", errs.join("; ")),
    }
  }
}

impl std::error::Error for CompileError {}

/// How far the pipeline runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
  /// Stop after tokenization (external; the middle end does nothing).
  Tokenize,
  /// Stop after parsing (external; the middle end does nothing).
  Syntax,
  /// Run semantic analysis only.
  Sema,
  /// Run the full pipeline through validated MIR.
  #[default]
  All,
}

/// Options for one [`diagnose`] run.
#[derive(Clone, Debug)]
pub struct DiagnoseOptions {
  /// How far to run.
  pub stage: Stage,
  /// The diagnostic cap; adds beyond it are no-ops.
  pub max_diagnostics: usize,
  /// Promote warnings to errors.
  pub warnings_as_errors: bool,
  /// Keep the checked HIR in the result.
  pub emit_hir: bool,
  /// Keep the instantiation map in the result.
  pub emit_instantiations: bool,
  /// The recursion bound for generic expansion.
  pub mono_max_depth: u32,
  /// Drop monomorphized items not reachable from an entrypoint.
  pub dce: bool,
  /// Report a project-level error when no `@entrypoint` exists.
  pub require_entrypoint: bool,
  /// The layout target.
  pub target: layout::TargetSpec,
}

impl Default for DiagnoseOptions {
  fn default() -> Self {
    Self {
      stage: Stage::All,
      max_diagnostics: 1000,
      warnings_as_errors: false,
      emit_hir: false,
      emit_instantiations: false,
      mono_max_depth: mono::DEFAULT_MAX_DEPTH,
      dce: false,
      require_entrypoint: false,
      target: layout::TargetSpec::X86_64_LINUX_GNU,
    }
  }
}

/// One exported symbol, for the external driver's module metadata.
#[derive(Clone, Debug)]
pub struct ExportedSymbol {
  /// The name.
  pub name: Symbol,
  /// The kind.
  pub kind: SymbolKind,
  /// The visibility.
  pub vis: Visibility,
  /// The structural signature key, for functions.
  pub signature: Option<String>,
}

/// The output of one [`diagnose`] run.
#[derive(Debug, Default)]
pub struct DiagnoseResult {
  /// The accumulated diagnostics, sorted.
  pub bag: Bag,
  /// The type interner, for backend and ABI queries against the MIR.
  pub types: TypeStore,
  /// The symbol table.
  pub symbols: SymbolTable,
  /// The checked (and, after a full run, monomorphized) HIR, when
  /// `emit_hir` is set.
  pub hir: Option<hir::Module>,
  /// The instantiation map, when `emit_instantiations` is set.
  pub instantiations: Option<hir::InstantiationMap>,
  /// The validated MIR, after an error-free full run.
  pub mir: Option<mir::Module>,
  /// Exported symbol summaries, sorted by name.
  pub metadata: Vec<ExportedSymbol>,
  /// The `@entrypoint` functions, in declaration order.
  pub entrypoints: Vec<SymbolId>,
}

/// Run the middle end over a set of parsed files.
///
/// Files are processed in path-sorted order so results are deterministic
/// regardless of input order. Returns `Err` only for cancellation or an
/// internal invariant violation; user errors are in the result's bag.
pub fn diagnose(
  files: &FileSet, mut asts: Vec<AstBuilder>, options: &DiagnoseOptions, cancel: &Cancel,
) -> Result<DiagnoseResult, CompileError> {
  let mut result = DiagnoseResult::default();
  if options.stage < Stage::Sema { return Ok(result) }
  cancel.check()?;
  asts.sort_by(|a, b| files.path(a.file).cmp(files.path(b.file)));
  let ast_refs: Vec<&AstBuilder> = asts.iter().collect();

  let mut bag = Bag::new(options.max_diagnostics, options.warnings_as_errors);
  let mut types = TypeStore::new();
  let module_name = symbol::intern("main");

  let hir_module;
  let insts;
  let mut symbols;
  let entrypoints;
  {
    let mut rep = Dedup::new(&mut bag);
    let resolve::ResolveResult { symbols: syms, item_syms, entrypoints: entries } =
      resolve::resolve(&ast_refs, module_name, &mut rep);
    symbols = syms;
    entrypoints = entries;

    let mut az = infer::Analyzer::new(&mut types, &mut symbols, files, &item_syms);
    az.declare(&ast_refs, &mut rep);
    az.check_layouts(&options.target, &mut rep);

    let mut parts = vec![];
    for ast in &ast_refs {
      cancel.check()?;
      log::debug!("checking {}", files.path(ast.file).display());
      parts.push(az.check_file(ast, &mut rep));
    }
    insts = az.finish();
    hir_module = hir::Module::merge(parts);

    if options.require_entrypoint && entrypoints.is_empty() {
      let span = ast_refs.first().map_or_else(FileSpan::default, |a| FileSpan::new(a.file, 0..0));
      rep.report(Diagnostic::error(
        DiagCode::PrjNoEntrypoint, span, "project has no @entrypoint function"));
    }
  }
  result.entrypoints = entrypoints;
  log::debug!("sema: {} instantiation(s), {} diagnostic(s)", insts.len(), bag.len());

  let run_backend = options.stage >= Stage::All && !bag.has_errors();
  if run_backend {
    cancel.check()?;
    let mut rep = Dedup::new(&mut bag);
    let mono_opts = mono::Options {
      max_depth: options.mono_max_depth,
      dce: options.dce,
    };
    let hir_module = mono::monomorphize(
      hir_module, &insts, &mut types, &mut symbols, &result.entrypoints, &mono_opts, &mut rep,
    );
    if !bag.has_errors() {
      let mut mir_module = build_mir::lower_module(&hir_module, &types, &symbols, cancel)?;
      mir_opt::optimize(&mut mir_module, &types, cancel)?;
      result.mir = Some(mir_module);
    }
    if options.emit_hir { result.hir = Some(hir_module) }
  } else if options.emit_hir {
    result.hir = Some(hir_module);
  }

  if options.emit_instantiations { result.instantiations = Some(insts) }
  result.metadata = module_metadata(&symbols);
  bag.sort();
  result.bag = bag;
  result.types = types;
  result.symbols = symbols;
  Ok(result)
}

fn module_metadata(symbols: &SymbolTable) -> Vec<ExportedSymbol> {
  let mut out: Vec<ExportedSymbol> = symbols.iter()
    .map(|id| symbols.get(id))
    .filter(|s| s.vis == Visibility::Public)
    .map(|s| ExportedSymbol {
      name: s.name,
      kind: s.kind,
      vis: s.vis,
      signature: s.sig.as_ref().map(|sig| {
        let params: Vec<&str> = sig.params.iter().map(|p| &*p.key).collect();
        format!("({})->{}", params.join(","), sig.result)
      }),
    })
    .collect();
  out.sort_by_key(|s| s.name.as_str());
  out
}
