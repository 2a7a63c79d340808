//! The monomorphizer: specializes generic functions against the recorded
//! instantiation map, bounding recursive expansion, and optionally drops
//! items unreachable from an entrypoint.

use std::collections::VecDeque;
use std::rc::Rc;
use bit_set::BitSet;
use hashbrown::{HashMap, HashSet};
use crate::diag::{DiagCode, Diagnostic, Reporter};
use crate::symbol::intern;
use crate::types::FileSpan;
use crate::types::entity::{SymbolId, SymbolTable};
use crate::types::hir::{
  Block, CompareArm, Expr, ExprKind, ExprS, Func, InstantiationMap, Module, Param, Stmt,
  StmtKind,
};
use crate::types::ty::{TypeId, TypeKind, TypeStore};

/// The default bound on recursive generic expansion.
pub const DEFAULT_MAX_DEPTH: u32 = 64;

/// Monomorphization options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
  /// The recursion bound; exceeding it reports `SemaMonoDepthExceeded`.
  pub max_depth: u32,
  /// Retain only items reachable from an entrypoint.
  pub dce: bool,
}

impl Default for Options {
  fn default() -> Self { Self { max_depth: DEFAULT_MAX_DEPTH, dce: false } }
}

/// Whether a type is free of generic parameters.
fn is_concrete(types: &TypeStore, ty: TypeId, visiting: &mut HashSet<TypeId>) -> bool {
  if !visiting.insert(ty) { return true }
  let r = match types.lookup(ty) {
    None => true,
    Some(TypeKind::Generic(_)) => false,
    Some(&TypeKind::Array(t) | &TypeKind::Ptr(t) | &TypeKind::Ref(_, t)
      | &TypeKind::Own(t)) => is_concrete(types, t, visiting),
    Some(TypeKind::Tuple(ts)) => {
      let ts = ts.clone();
      ts.iter().all(|&t| is_concrete(types, t, visiting))
    }
    Some(TypeKind::Fn(ps, r)) => {
      let (ps, r) = (ps.clone(), *r);
      ps.iter().all(|&t| is_concrete(types, t, visiting)) && is_concrete(types, r, visiting)
    }
    Some(&TypeKind::Struct(s)) => {
      let args = types.struct_info(s).args.clone();
      args.iter().all(|&t| is_concrete(types, t, visiting))
    }
    Some(&TypeKind::Union(u)) => {
      let args = types.union_info(u).args.clone();
      args.iter().all(|&t| is_concrete(types, t, visiting))
    }
    Some(&TypeKind::Alias(a)) => {
      let args = types.alias_info(a).args.clone();
      args.iter().all(|&t| is_concrete(types, t, visiting))
    }
    Some(_) => true,
  };
  visiting.remove(&ty);
  r
}

struct Mono<'a, R> {
  types: &'a mut TypeStore,
  symbols: &'a mut SymbolTable,
  rep: &'a mut R,
  /// Generic templates by symbol.
  templates: HashMap<SymbolId, Func>,
  out: Module,
  /// Specializations already produced, keyed by `(template, args)`.
  done: HashMap<(SymbolId, Box<[TypeId]>), SymbolId>,
  queue: VecDeque<(SymbolId, Box<[TypeId]>, FileSpan, u32)>,
  max_depth: u32,
}

impl<R: Reporter> Mono<'_, R> {
  fn run(&mut self) {
    while let Some((def, args, span, depth)) = self.queue.pop_front() {
      if depth > self.max_depth {
        self.rep.report(Diagnostic::error(
          DiagCode::SemaMonoDepthExceeded, span,
          format!("generic instantiation exceeds the depth limit ({})", self.max_depth)));
        continue
      }
      self.specialize(def, &args, span, depth);
    }
  }

  /// The specialized symbol for `(def, args)`, creating it (and queueing
  /// its body) on first request.
  fn request(&mut self, def: SymbolId, args: Box<[TypeId]>, span: FileSpan, depth: u32) -> SymbolId {
    if let Some(&sym) = self.done.get(&(def, args.clone())) { return sym }
    let base = self.symbols.get(def).clone();
    let arg_names: Vec<String> = args.iter().map(|&t| self.types.name(t)).collect();
    let name = intern(&format!("{}<{}>", base.name, arg_names.join(", ")));
    let sym = self.symbols.add(crate::types::entity::SymbolData { name, ..base });
    self.done.insert((def, args.clone()), sym);
    self.queue.push_back((def, args, span, depth));
    sym
  }

  fn specialize(&mut self, def: SymbolId, args: &[TypeId], span: FileSpan, depth: u32) {
    let Some(template) = self.templates.get(&def) else { return };
    let sym = self.done[&(def, Box::from(args))];
    let subst: HashMap<TypeId, TypeId> = template.generics.iter().copied()
      .zip(args.iter().copied())
      .collect();
    let param_info: Vec<Param> = template.params.to_vec();
    let result_ty = template.result;
    let (t_span, t_is_async, t_num_vars) =
      (template.span, template.is_async, template.num_vars);
    let body = template.body.as_ref().map(clone_block_raw);

    let params: Box<[Param]> = param_info.into_iter()
      .map(|p| Param { ty: self.types.substitute(p.ty, &subst), ..p })
      .collect();
    let result = self.types.substitute(result_ty, &subst);
    let body = body.map(|b| self.subst_block(b, &subst, span, depth));
    let name = self.symbols.get(sym).name;
    let fn_ty = self.types.intern(TypeKind::Fn(
      params.iter().map(|p| p.ty).collect(), result));
    self.symbols.get_mut(sym).ty = fn_ty;

    self.out.push(Func {
      sym, name,
      span: t_span,
      generics: Box::new([]),
      params, result, body,
      is_async: t_is_async,
      num_vars: t_num_vars,
    });
  }

  fn subst_ty(&mut self, ty: TypeId, subst: &HashMap<TypeId, TypeId>) -> TypeId {
    if !ty.exists() { return ty }
    self.types.substitute(ty, subst)
  }

  fn subst_block(
    &mut self, b: Block, subst: &HashMap<TypeId, TypeId>, span: FileSpan, depth: u32,
  ) -> Block {
    Block {
      stmts: b.stmts.into_vec().into_iter()
        .map(|s| self.subst_stmt(s, subst, span, depth)).collect(),
      tail: b.tail.map(|e| self.subst_expr(&e, subst, span, depth)),
    }
  }

  fn subst_stmt(
    &mut self, s: Stmt, subst: &HashMap<TypeId, TypeId>, span: FileSpan, depth: u32,
  ) -> Stmt {
    let k = match s.k {
      StmtKind::Let { var, ty, init } => StmtKind::Let {
        var,
        ty: self.subst_ty(ty, subst),
        init: self.subst_expr(&init, subst, span, depth),
      },
      StmtKind::Expr(e) => StmtKind::Expr(self.subst_expr(&e, subst, span, depth)),
      StmtKind::Assign { lhs, rhs } => StmtKind::Assign {
        lhs: self.subst_expr(&lhs, subst, span, depth),
        rhs: self.subst_expr(&rhs, subst, span, depth),
      },
      StmtKind::Return(e) => StmtKind::Return(
        e.map(|e| self.subst_expr(&e, subst, span, depth))),
      StmtKind::While { cond, body } => StmtKind::While {
        cond: self.subst_expr(&cond, subst, span, depth),
        body: self.subst_block(body, subst, span, depth),
      },
      k @ (StmtKind::Break | StmtKind::Continue | StmtKind::Drop(_)) => k,
    };
    Stmt { span: s.span, k }
  }

  #[allow(clippy::too_many_lines)]
  fn subst_expr(
    &mut self, e: &Expr, subst: &HashMap<TypeId, TypeId>, ispan: FileSpan, depth: u32,
  ) -> Expr {
    let ty = self.subst_ty(e.ty, subst);
    let k = match &e.k {
      ExprKind::Unit => ExprKind::Unit,
      ExprKind::Bool(b) => ExprKind::Bool(*b),
      ExprKind::Int(n) => ExprKind::Int(n.clone()),
      ExprKind::Float(x) => ExprKind::Float(*x),
      ExprKind::Str(s) => ExprKind::Str(*s),
      ExprKind::Nothing => ExprKind::Nothing,
      ExprKind::Var(v) => ExprKind::Var(*v),
      ExprKind::Const(c) => ExprKind::Const(*c),
      ExprKind::Error => ExprKind::Error,
      ExprKind::Unop(op, a) => ExprKind::Unop(*op, self.subst_expr(a, subst, ispan, depth)),
      ExprKind::Binop(op, a, b) => ExprKind::Binop(*op,
        self.subst_expr(a, subst, ispan, depth),
        self.subst_expr(b, subst, ispan, depth)),
      ExprKind::Call { f, targs, args } => {
        let targs: Box<[TypeId]> = targs.iter().map(|&t| self.subst_ty(t, subst)).collect();
        let args: Box<[Expr]> =
          args.iter().map(|a| self.subst_expr(a, subst, ispan, depth)).collect();
        // a concrete call of a template becomes a call of the specialization
        let f = if !targs.is_empty() && self.templates.contains_key(f) {
          self.request(*f, targs.clone(), ispan, depth + 1)
        } else { *f };
        ExprKind::Call { f, targs, args }
      }
      ExprKind::Field { base, index } => ExprKind::Field {
        base: self.subst_expr(base, subst, ispan, depth), index: *index,
      },
      ExprKind::Index { base, index } => ExprKind::Index {
        base: self.subst_expr(base, subst, ispan, depth),
        index: self.subst_expr(index, subst, ispan, depth),
      },
      ExprKind::Tuple(es) => ExprKind::Tuple(
        es.iter().map(|a| self.subst_expr(a, subst, ispan, depth)).collect()),
      ExprKind::ArrayLit(es) => ExprKind::ArrayLit(
        es.iter().map(|a| self.subst_expr(a, subst, ispan, depth)).collect()),
      ExprKind::StructLit(es) => ExprKind::StructLit(
        es.iter().map(|a| self.subst_expr(a, subst, ispan, depth)).collect()),
      ExprKind::TagLit { member, args } => ExprKind::TagLit {
        member: *member,
        args: args.iter().map(|a| self.subst_expr(a, subst, ispan, depth)).collect(),
      },
      ExprKind::TagTest { base, member } => ExprKind::TagTest {
        base: self.subst_expr(base, subst, ispan, depth), member: *member,
      },
      ExprKind::If { cond, then, els } => ExprKind::If {
        cond: self.subst_expr(cond, subst, ispan, depth),
        then: self.subst_expr(then, subst, ispan, depth),
        els: els.as_ref().map(|e| self.subst_expr(e, subst, ispan, depth)),
      },
      ExprKind::Block(b) => ExprKind::Block(
        self.subst_block(clone_block_raw(b), subst, ispan, depth)),
      ExprKind::Compare { scrut, arms, default } => ExprKind::Compare {
        scrut: self.subst_expr(scrut, subst, ispan, depth),
        arms: arms.iter().map(|a| CompareArm {
          member: a.member,
          binders: a.binders.clone(),
          body: self.subst_expr(&a.body, subst, ispan, depth),
        }).collect(),
        default: default.as_ref().map(|e| self.subst_expr(e, subst, ispan, depth)),
      },
      ExprKind::Spawn { local, body } => ExprKind::Spawn {
        local: *local, body: self.subst_expr(body, subst, ispan, depth),
      },
      ExprKind::Async(b) => ExprKind::Async(
        self.subst_block(clone_block_raw(b), subst, ispan, depth)),
      ExprKind::Await(a) => ExprKind::Await(self.subst_expr(a, subst, ispan, depth)),
      ExprKind::Borrow(m, a) => ExprKind::Borrow(*m, self.subst_expr(a, subst, ispan, depth)),
      ExprKind::Deref(a) => ExprKind::Deref(self.subst_expr(a, subst, ispan, depth)),
      ExprKind::Cast(a) => ExprKind::Cast(self.subst_expr(a, subst, ispan, depth)),
    };
    Rc::new(ExprS { span: e.span, ty, k })
  }
}

/// Structurally clone a block without substitution, sharing leaf `Expr`
/// nodes where possible is not needed since blocks own their statements.
fn clone_block_raw(b: &Block) -> Block {
  Block {
    stmts: b.stmts.iter().map(clone_stmt_raw).collect(),
    tail: b.tail.clone(),
  }
}

fn clone_stmt_raw(s: &Stmt) -> Stmt {
  let k = match &s.k {
    StmtKind::Let { var, ty, init } =>
      StmtKind::Let { var: *var, ty: *ty, init: init.clone() },
    StmtKind::Expr(e) => StmtKind::Expr(e.clone()),
    StmtKind::Assign { lhs, rhs } => StmtKind::Assign { lhs: lhs.clone(), rhs: rhs.clone() },
    StmtKind::Return(e) => StmtKind::Return(e.clone()),
    StmtKind::While { cond, body } =>
      StmtKind::While { cond: cond.clone(), body: clone_block_raw(body) },
    StmtKind::Break => StmtKind::Break,
    StmtKind::Continue => StmtKind::Continue,
    StmtKind::Drop(v) => StmtKind::Drop(*v),
  };
  Stmt { span: s.span, k }
}

/// Monomorphize a module: non-generic functions pass through, generic
/// templates are replaced by one specialization per concrete recorded
/// instantiation (plus any nested ones discovered while cloning).
pub fn monomorphize(
  module: Module, insts: &InstantiationMap, types: &mut TypeStore,
  symbols: &mut SymbolTable, entrypoints: &[SymbolId], options: &Options,
  rep: &mut impl Reporter,
) -> Module {
  let mut mono = Mono {
    types, symbols, rep,
    templates: HashMap::new(),
    out: Module::default(),
    done: HashMap::new(),
    queue: VecDeque::new(),
    max_depth: options.max_depth,
  };
  for f in module.funcs {
    if f.generics.is_empty() {
      mono.out.push(f);
    } else {
      mono.templates.insert(f.sym, f);
    }
  }
  for inst in insts.entries() {
    if !mono.templates.contains_key(&inst.def) { continue }
    let concrete = inst.args.iter()
      .all(|&t| is_concrete(mono.types, t, &mut HashSet::new()));
    if !concrete { continue }
    mono.request(inst.def, inst.args.clone(), inst.span, 0);
  }
  mono.run();
  // rewrite call sites in pass-through functions too: concrete calls of
  // generic functions retarget to their specialization
  let mut out = Module::default();
  let funcs = std::mem::take(&mut mono.out.funcs);
  for f in funcs {
    let body = f.body.map(|b| {
      let empty = HashMap::new();
      mono.subst_block(b, &empty, f.span, 0)
    });
    out.push(Func { body, ..f });
  }
  mono.run();
  let mut extra = std::mem::take(&mut mono.out.funcs);
  for f in extra.drain(..) { out.push(f) }
  log::debug!("monomorphization produced {} function(s)", out.funcs.len());

  if options.dce { dce(out, entrypoints) } else { out }
}

/// Retain only functions reachable from the entrypoint set.
fn dce(module: Module, entrypoints: &[SymbolId]) -> Module {
  let mut reachable = BitSet::with_capacity(module.funcs.len());
  let mut work: Vec<usize> = entrypoints.iter()
    .filter_map(|sym| module.by_sym.get(sym).copied())
    .collect();
  while let Some(i) = work.pop() {
    if !reachable.insert(i) { continue }
    let mut callees = vec![];
    if let Some(b) = &module.funcs[i].body { collect_calls_block(b, &mut callees) }
    for c in callees {
      if let Some(id) = module.by_sym.get(&c) {
        let j = *id;
        if !reachable.contains(j) { work.push(j) }
      }
    }
  }
  let mut out = Module::default();
  for (i, f) in module.funcs.into_iter().enumerate() {
    if reachable.contains(i) { out.push(f) }
  }
  out
}

fn collect_calls_block(b: &Block, out: &mut Vec<SymbolId>) {
  for s in &b.stmts { collect_calls_stmt(s, out) }
  if let Some(t) = &b.tail { collect_calls(t, out) }
}

fn collect_calls_stmt(s: &Stmt, out: &mut Vec<SymbolId>) {
  match &s.k {
    StmtKind::Let { init, .. } => collect_calls(init, out),
    StmtKind::Expr(e) => collect_calls(e, out),
    StmtKind::Assign { lhs, rhs } => { collect_calls(lhs, out); collect_calls(rhs, out) }
    StmtKind::Return(e) => if let Some(e) = e { collect_calls(e, out) },
    StmtKind::While { cond, body } => {
      collect_calls(cond, out);
      collect_calls_block(body, out);
    }
    StmtKind::Break | StmtKind::Continue | StmtKind::Drop(_) => {}
  }
}

fn collect_calls(e: &Expr, out: &mut Vec<SymbolId>) {
  match &e.k {
    ExprKind::Call { f, args, .. } => {
      out.push(*f);
      for a in args { collect_calls(a, out) }
    }
    ExprKind::Unop(_, a) | ExprKind::Await(a) | ExprKind::Borrow(_, a)
    | ExprKind::Deref(a) | ExprKind::Cast(a)
    | ExprKind::Field { base: a, .. } | ExprKind::TagTest { base: a, .. }
    | ExprKind::Spawn { body: a, .. } => collect_calls(a, out),
    ExprKind::Binop(_, a, b) | ExprKind::Index { base: a, index: b } => {
      collect_calls(a, out);
      collect_calls(b, out);
    }
    ExprKind::Tuple(es) | ExprKind::ArrayLit(es) | ExprKind::StructLit(es)
    | ExprKind::TagLit { args: es, .. } =>
      for a in es { collect_calls(a, out) },
    ExprKind::If { cond, then, els } => {
      collect_calls(cond, out);
      collect_calls(then, out);
      if let Some(e) = els { collect_calls(e, out) }
    }
    ExprKind::Block(b) | ExprKind::Async(b) => collect_calls_block(b, out),
    ExprKind::Compare { scrut, arms, default } => {
      collect_calls(scrut, out);
      for a in arms { collect_calls(&a.body, out) }
      if let Some(d) = default { collect_calls(d, out) }
    }
    ExprKind::Unit | ExprKind::Bool(_) | ExprKind::Int(_) | ExprKind::Float(_)
    | ExprKind::Str(_) | ExprKind::Nothing | ExprKind::Var(_) | ExprKind::Const(_)
    | ExprKind::Error => {}
  }
}
