//! The high-level IR: the typed tree the analyzer produces and the
//! monomorphizer consumes. Nodes are reference-counted so specialized
//! copies can share unchanged subtrees.

use std::fmt;
use std::rc::Rc;
use hashbrown::HashMap;
use num::BigInt;
use crate::symbol::Symbol;
use super::{Binop, FileSpan, Unop};
use super::entity::SymbolId;
use super::ty::{Mutability, TypeId};

crate::mk_id! {
  /// A function-local variable, numbered by the analyzer.
  VarId
}

impl fmt::Display for VarId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "_{}", self.0)
  }
}

/// A typed expression node.
pub type Expr = Rc<ExprS>;

/// The contents of an expression node: span, checked type, and kind.
#[derive(Debug)]
pub struct ExprS {
  /// The source span.
  pub span: FileSpan,
  /// The checked type; [`TypeId::NONE`] when checking failed.
  pub ty: TypeId,
  /// The expression kind.
  pub k: ExprKind,
}

/// One arm of a `compare`, matching a union member by index.
#[derive(Debug)]
pub struct CompareArm {
  /// The matched member index.
  pub member: u32,
  /// Variables binding the tag payload.
  pub binders: Box<[VarId]>,
  /// The arm body.
  pub body: Expr,
}

/// A block: statements plus an optional value-giving tail expression.
#[derive(Debug, Default)]
pub struct Block {
  /// The statements.
  pub stmts: Box<[Stmt]>,
  /// The tail expression.
  pub tail: Option<Expr>,
}

/// A typed expression kind.
#[derive(Debug)]
pub enum ExprKind {
  /// `()`
  Unit,
  /// A boolean literal.
  Bool(bool),
  /// An integer literal.
  Int(BigInt),
  /// A float literal.
  Float(f64),
  /// A string literal.
  Str(Symbol),
  /// The `nothing` member of the node's union type.
  Nothing,
  /// A local variable.
  Var(VarId),
  /// A named constant.
  Const(SymbolId),
  /// A unary operation.
  Unop(Unop, Expr),
  /// A binary operation.
  Binop(Binop, Expr, Expr),
  /// A call of a resolved function.
  Call {
    /// The callee symbol.
    f: SymbolId,
    /// Generic arguments, already interned.
    targs: Box<[TypeId]>,
    /// The arguments.
    args: Box<[Expr]>,
  },
  /// A struct field or tuple element access by index.
  Field {
    /// The base expression.
    base: Expr,
    /// The field index.
    index: u32,
  },
  /// An array index.
  Index {
    /// The base expression.
    base: Expr,
    /// The index expression.
    index: Expr,
  },
  /// A tuple literal.
  Tuple(Box<[Expr]>),
  /// An array literal.
  ArrayLit(Box<[Expr]>),
  /// A struct literal with initializers in field order.
  StructLit(Box<[Expr]>),
  /// A tag construction; the node type is the union.
  TagLit {
    /// The member index.
    member: u32,
    /// The payload values.
    args: Box<[Expr]>,
  },
  /// A tag query `e.is(tag)`, of boolean type.
  TagTest {
    /// The union value.
    base: Expr,
    /// The queried member index.
    member: u32,
  },
  /// An `if` expression.
  If {
    /// The condition.
    cond: Expr,
    /// The then branch.
    then: Expr,
    /// The else branch.
    els: Option<Expr>,
  },
  /// A block expression.
  Block(Block),
  /// A `compare` over a union scrutinee.
  Compare {
    /// The scrutinee.
    scrut: Expr,
    /// The arms.
    arms: Box<[CompareArm]>,
    /// The `finally` arm.
    default: Option<Expr>,
  },
  /// A `spawn` expression producing a task handle.
  Spawn {
    /// Whether the task is scope-local.
    local: bool,
    /// The spawned body.
    body: Expr,
  },
  /// An `async` block with implicit join.
  Async(Block),
  /// An `await`.
  Await(Expr),
  /// A borrow.
  Borrow(Mutability, Expr),
  /// A dereference.
  Deref(Expr),
  /// A cast; the target type is the node type.
  Cast(Expr),
  /// A checking failure; downstream phases skip it.
  Error,
}

/// A statement.
#[derive(Debug)]
pub struct Stmt {
  /// The source span.
  pub span: FileSpan,
  /// The statement kind.
  pub k: StmtKind,
}

/// A statement kind.
#[derive(Debug)]
pub enum StmtKind {
  /// A `let` binding.
  Let {
    /// The bound variable.
    var: VarId,
    /// The binding type.
    ty: TypeId,
    /// The initializer.
    init: Expr,
  },
  /// An expression statement.
  Expr(Expr),
  /// An assignment to a place expression.
  Assign {
    /// The place.
    lhs: Expr,
    /// The value.
    rhs: Expr,
  },
  /// A `return`.
  Return(Option<Expr>),
  /// A `while` loop.
  While {
    /// The condition.
    cond: Expr,
    /// The body.
    body: Block,
  },
  /// `break`
  Break,
  /// `continue`
  Continue,
  /// `@drop x;` — end borrows rooted at the variable.
  Drop(VarId),
}

/// A function parameter.
#[derive(Clone, Copy, Debug)]
pub struct Param {
  /// The parameter variable.
  pub var: VarId,
  /// The parameter type.
  pub ty: TypeId,
  /// The parameter name, for dumps.
  pub name: Symbol,
}

/// A checked function.
#[derive(Debug)]
pub struct Func {
  /// The declaring symbol.
  pub sym: SymbolId,
  /// The function name (mangled for specializations).
  pub name: Symbol,
  /// The declaration span.
  pub span: FileSpan,
  /// Generic parameters, as `Generic` type ids. Nonempty functions are
  /// templates: they are skipped by MIR lowering until monomorphized.
  pub generics: Box<[TypeId]>,
  /// The parameters.
  pub params: Box<[Param]>,
  /// The result type.
  pub result: TypeId,
  /// The body; `None` for extern declarations.
  pub body: Option<Block>,
  /// Whether the body is async.
  pub is_async: bool,
  /// The number of [`VarId`]s allocated in the body.
  pub num_vars: u32,
}

/// A module of checked functions, merged from per-file results.
#[derive(Debug, Default)]
pub struct Module {
  /// The functions, in declaration order.
  pub funcs: Vec<Func>,
  /// Function index by symbol.
  pub by_sym: HashMap<SymbolId, usize>,
}

impl Module {
  /// Append a function, indexing it by symbol.
  pub fn push(&mut self, f: Func) {
    self.by_sym.insert(f.sym, self.funcs.len());
    self.funcs.push(f);
  }

  /// A function by symbol.
  #[must_use] pub fn get(&self, sym: SymbolId) -> Option<&Func> {
    self.by_sym.get(&sym).map(|&i| &self.funcs[i])
  }

  /// Merge per-file modules, in the given (path-sorted) order.
  #[must_use] pub fn merge(parts: impl IntoIterator<Item = Module>) -> Module {
    let mut out = Module::default();
    for part in parts {
      for f in part.funcs { out.push(f) }
    }
    out
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for func in &self.funcs {
      write!(f, "fn {}", func.name)?;
      if !func.generics.is_empty() {
        write!(f, "<{} params>", func.generics.len())?;
      }
      writeln!(f, "({} args) [{} vars]", func.params.len(), func.num_vars)?;
    }
    Ok(())
  }
}

/// One recorded use of a generic definition.
#[derive(Clone, Debug)]
pub struct Instantiation {
  /// The generic definition.
  pub def: SymbolId,
  /// The argument tuple.
  pub args: Box<[TypeId]>,
  /// The use site.
  pub span: FileSpan,
  /// The function the use occurs in, if any.
  pub in_fn: Option<SymbolId>,
}

/// The instantiation registry: every generic-use site recorded by the
/// analyzer, deduplicated by `(definition, argument tuple)` and iterated in
/// stable insertion order.
#[derive(Debug, Default)]
pub struct InstantiationMap {
  entries: Vec<Instantiation>,
  seen: HashMap<(SymbolId, Box<[TypeId]>), usize>,
}

impl InstantiationMap {
  /// Record a use site. Repeats of the same `(def, args)` keep the first
  /// entry.
  pub fn record(
    &mut self, def: SymbolId, args: Box<[TypeId]>, span: FileSpan, in_fn: Option<SymbolId>,
  ) {
    if self.seen.contains_key(&(def, args.clone())) { return }
    self.seen.insert((def, args.clone()), self.entries.len());
    self.entries.push(Instantiation { def, args, span, in_fn });
  }

  /// All entries, in insertion order.
  #[must_use] pub fn entries(&self) -> &[Instantiation] { &self.entries }

  /// The entries for one definition, in insertion order.
  pub fn of_def(&self, def: SymbolId) -> impl Iterator<Item = &Instantiation> + '_ {
    self.entries.iter().filter(move |i| i.def == def)
  }

  /// The number of distinct instantiations.
  #[must_use] pub fn len(&self) -> usize { self.entries.len() }

  /// Whether nothing was recorded.
  #[must_use] pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Merge another map into this one, keeping insertion order.
  pub fn absorb(&mut self, other: InstantiationMap) {
    for i in other.entries {
      self.record(i.def, i.args, i.span, i.in_fn);
    }
  }
}

impl fmt::Display for InstantiationMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for i in &self.entries {
      write!(f, "sym{}[", i.def.0)?;
      for (n, a) in i.args.iter().enumerate() {
        if n != 0 { write!(f, ", ")? }
        write!(f, "ty{}", a.0)?;
      }
      writeln!(f, "] at {}:{}", i.span.span.start, i.span.span.end)?;
    }
    Ok(())
  }
}

impl ExprS {
  /// A new error node.
  #[must_use] pub fn error(span: FileSpan) -> Expr {
    Rc::new(ExprS { span, ty: TypeId::NONE, k: ExprKind::Error })
  }

  /// Whether this expression is a place (assignable / borrowable).
  #[must_use] pub fn is_place(&self) -> bool {
    match &self.k {
      ExprKind::Var(_) | ExprKind::Deref(_) => true,
      ExprKind::Field { base, .. } | ExprKind::Index { base, .. } => base.is_place(),
      _ => false,
    }
  }

  /// The root variable of a place expression, if any.
  #[must_use] pub fn place_root(&self) -> Option<VarId> {
    match &self.k {
      ExprKind::Var(v) => Some(*v),
      ExprKind::Field { base, .. }
      | ExprKind::Index { base, .. } => base.place_root(),
      ExprKind::Deref(base) => base.place_root(),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn instantiation_dedup() {
    let mut map = InstantiationMap::default();
    let d = SymbolId(3);
    let args: Box<[TypeId]> = Box::new([TypeId(7)]);
    let span = FileSpan::default();
    map.record(d, args.clone(), span, None);
    map.record(d, args, span, None);
    map.record(d, Box::new([TypeId(8)]), span, None);
    assert_eq!(map.len(), 2);
    assert_eq!(map.of_def(d).count(), 2);
  }
}
