//! Build the mid-level IR from HIR: walk each function body, producing a
//! linear instruction stream broken into basic blocks, with branch and
//! switch terminators for the control constructs.

use num::BigInt;
use crate::{Cancel, CompileError, Idx};
use crate::symbol::Symbol;
use crate::types::Binop;
use crate::types::entity::SymbolTable;
use crate::types::hir::{self, VarId};
use crate::types::mir::{
  BlockId, ConstValue, Inst, LocalFlags, LocalId, Operand, Place, Projection, Terminator,
};
use crate::types::mir;
use crate::types::ty::{TypeId, TypeKind, TypeStore};

/// Lower every concrete function with a body. Generic templates and extern
/// declarations are skipped.
pub fn lower_module(
  hir: &hir::Module, types: &TypeStore, symbols: &SymbolTable, cancel: &Cancel,
) -> Result<mir::Module, CompileError> {
  let mut out = mir::Module::default();
  for f in &hir.funcs {
    cancel.check()?;
    if !f.generics.is_empty() { continue }
    let Some(body) = &f.body else { continue };
    out.push(lower_func(f, body, types, symbols));
  }
  log::debug!("lowered {} function(s) to MIR", out.funcs.len());
  Ok(out)
}

struct LoopFrame {
  continue_: BlockId,
  break_: BlockId,
}

struct Builder<'a> {
  types: &'a TypeStore,
  symbols: &'a SymbolTable,
  f: mir::Func,
  cur: BlockId,
  vars: Vec<Option<LocalId>>,
  loops: Vec<LoopFrame>,
  next_state: u32,
}

fn lower_func(
  f: &hir::Func, body: &hir::Block, types: &TypeStore, symbols: &SymbolTable,
) -> mir::Func {
  let mut func = mir::Func {
    sym: f.sym,
    name: f.name,
    locals: vec![],
    params: vec![],
    result: f.result,
    blocks: vec![],
    is_async: f.is_async,
  };
  let entry = func.new_block();
  debug_assert_eq!(entry, BlockId::ENTRY);
  let mut b = Builder {
    types, symbols,
    f: func,
    cur: entry,
    vars: vec![None; f.num_vars as usize],
    loops: vec![],
    next_state: 0,
  };
  for p in &f.params {
    let local = b.f.new_local(p.ty, LocalFlags::PARAM);
    b.f.params.push(local);
    b.vars[p.var.into_usize()] = Some(local);
  }
  let tail = b.block(body);
  match tail {
    Some(op) if !is_unit_ty(types, f.result) => b.terminate(Terminator::Return(Some(op))),
    _ => b.terminate(Terminator::Return(None)),
  };
  // the trailing block opened by the final terminator is unreachable
  if b.f[b.cur].term.is_none() {
    b.f[b.cur].terminate(Terminator::Unreachable);
  }
  b.f
}

fn is_unit_ty(types: &TypeStore, ty: TypeId) -> bool {
  matches!(types.lookup(types.resolve_alias(ty)),
    Some(TypeKind::Unit | TypeKind::Nothing) | None)
}

impl Builder<'_> {
  fn emit(&mut self, inst: Inst) {
    self.f[self.cur].insts.push(inst);
  }

  /// Terminate the current block and open a fresh one.
  fn terminate(&mut self, term: Terminator) -> BlockId {
    self.f[self.cur].terminate(term);
    self.cur = self.f.new_block();
    self.cur
  }

  /// Terminate the current block, continuing in an existing one.
  fn goto(&mut self, to: BlockId) {
    self.f[self.cur].terminate(Terminator::Goto(to));
    self.cur = to;
  }

  fn temp(&mut self, ty: TypeId) -> Place {
    Place::local(self.f.new_local(ty, LocalFlags::empty()), ty)
  }

  fn var_local(&mut self, v: VarId, ty: TypeId) -> LocalId {
    match self.vars[v.into_usize()] {
      Some(l) => l,
      None => {
        let l = self.f.new_local(ty, LocalFlags::empty());
        self.vars[v.into_usize()] = Some(l);
        l
      }
    }
  }

  fn use_place(&self, p: Place) -> Operand {
    if self.types.is_copy(p.ty) { Operand::Copy(p) } else { Operand::Move(p) }
  }

  fn fn_name(&self, sym: crate::types::entity::SymbolId) -> Symbol {
    self.symbols.get(sym).name
  }

  /// A place designating the location of a place expression, spilling
  /// non-place expressions into a temporary.
  fn place(&mut self, e: &hir::Expr) -> Place {
    match &e.k {
      hir::ExprKind::Var(v) => {
        let local = self.var_local(*v, e.ty);
        Place::local(local, e.ty)
      }
      hir::ExprKind::Field { base, index } => {
        let mut p = self.place(base);
        p.proj.push(Projection::Field(*index));
        p.ty = e.ty;
        p
      }
      hir::ExprKind::Index { base, index } => {
        let idx = self.expr(index);
        let mut p = self.place(base);
        p.proj.push(Projection::Index(idx));
        p.ty = e.ty;
        p
      }
      hir::ExprKind::Deref(base) => {
        let mut p = self.place(base);
        p.proj.push(Projection::Deref);
        p.ty = e.ty;
        p
      }
      _ => {
        let op = self.expr(e);
        let dst = self.temp(e.ty);
        self.emit(Inst::Assign(dst.clone(), op));
        dst
      }
    }
  }

  /// Lower an expression to an operand, emitting instructions as needed.
  #[allow(clippy::too_many_lines)]
  fn expr(&mut self, e: &hir::Expr) -> Operand {
    match &e.k {
      hir::ExprKind::Unit | hir::ExprKind::Error =>
        Operand::Const(ConstValue::Unit, e.ty),
      hir::ExprKind::Bool(v) => Operand::Const(ConstValue::Bool(*v), e.ty),
      hir::ExprKind::Int(n) => Operand::Const(ConstValue::Int(n.clone()), e.ty),
      hir::ExprKind::Float(x) => {
        // floats travel as their bit pattern; the backends reconstitute
        Operand::Const(ConstValue::Int(BigInt::from(x.to_bits())), e.ty)
      }
      hir::ExprKind::Str(s) => Operand::Const(ConstValue::Str(*s), e.ty),
      hir::ExprKind::Nothing => Operand::Const(ConstValue::Nothing, e.ty),
      hir::ExprKind::Var(_) | hir::ExprKind::Field { .. }
      | hir::ExprKind::Index { .. } => {
        let p = self.place(e);
        self.use_place(p)
      }
      hir::ExprKind::Deref(inner) => {
        let src = self.place(inner);
        let dst = self.temp(e.ty);
        self.emit(Inst::Load { dst: dst.clone(), src });
        self.use_place(dst)
      }
      hir::ExprKind::Const(sym) => {
        // named constants that were not inlined read through their symbol
        let dst = self.temp(e.ty);
        self.emit(Inst::Call {
          dst: Some(dst.clone()), f: *sym, name: self.fn_name(*sym), args: Box::new([]),
        });
        self.use_place(dst)
      }
      hir::ExprKind::Unop(op, a) => {
        let a = self.expr(a);
        let dst = self.temp(e.ty);
        self.emit(Inst::Unop(dst.clone(), *op, a));
        Operand::Move(dst)
      }
      hir::ExprKind::Binop(op, l, r) => self.binop(e.ty, *op, l, r),
      hir::ExprKind::Call { f, args, .. } => {
        let args: Box<[Operand]> = args.iter().map(|a| self.expr(a)).collect();
        let name = self.fn_name(*f);
        if is_unit_ty(self.types, e.ty) {
          self.emit(Inst::Call { dst: None, f: *f, name, args });
          Operand::Const(ConstValue::Unit, e.ty)
        } else {
          let dst = self.temp(e.ty);
          self.emit(Inst::Call { dst: Some(dst.clone()), f: *f, name, args });
          Operand::Move(dst)
        }
      }
      hir::ExprKind::Tuple(es) | hir::ExprKind::StructLit(es) => {
        let dst = self.temp(e.ty);
        for (i, el) in es.iter().enumerate() {
          let op = self.expr(el);
          let field = Place {
            local: dst.local,
            proj: vec![Projection::Field(i.try_into().expect("too many fields"))],
            ty: el.ty,
          };
          self.emit(Inst::Assign(field, op));
        }
        Operand::Move(dst)
      }
      hir::ExprKind::ArrayLit(es) => {
        let dst = self.temp(e.ty);
        for (i, el) in es.iter().enumerate() {
          let op = self.expr(el);
          let idx = Operand::Const(
            ConstValue::Int(BigInt::from(i)), self.types.builtins.uint(crate::types::Size::S64));
          let slot = Place {
            local: dst.local,
            proj: vec![Projection::Index(idx)],
            ty: el.ty,
          };
          self.emit(Inst::Assign(slot, op));
        }
        Operand::Move(dst)
      }
      hir::ExprKind::TagLit { member, args } => {
        let args: Box<[Operand]> = args.iter().map(|a| self.expr(a)).collect();
        let dst = self.temp(e.ty);
        self.emit(Inst::TagNew { dst: dst.clone(), member: *member, args });
        Operand::Move(dst)
      }
      hir::ExprKind::TagTest { base, member } => {
        let src = self.place(base);
        let dst = self.temp(e.ty);
        self.emit(Inst::TagTest { dst: dst.clone(), src, member: *member });
        Operand::Move(dst)
      }
      hir::ExprKind::If { cond, then, els } => self.lower_if(e.ty, cond, then, els.as_ref()),
      hir::ExprKind::Block(b) => {
        self.block(b).unwrap_or(Operand::Const(ConstValue::Unit, e.ty))
      }
      hir::ExprKind::Compare { scrut, arms, default } =>
        self.lower_compare(e.ty, scrut, arms, default.as_ref()),
      hir::ExprKind::Borrow(_, inner) => {
        let place = self.place(inner);
        let dst = self.temp(e.ty);
        self.emit(Inst::Ref { dst: dst.clone(), place });
        Operand::Move(dst)
      }
      hir::ExprKind::Cast(inner) => {
        let src = self.expr(inner);
        if let Operand::Const(v, _) = &src {
          // constants re-type without a runtime conversion
          return Operand::Const(v.clone(), e.ty)
        }
        let dst = self.temp(e.ty);
        self.emit(Inst::Cast { dst: dst.clone(), src });
        Operand::Move(dst)
      }
      hir::ExprKind::Spawn { body, .. } => {
        let op = self.expr(body);
        let dst = self.temp(e.ty);
        let value = Place {
          local: dst.local, proj: vec![Projection::Field(0)], ty: body.ty,
        };
        self.emit(Inst::Assign(value, op));
        Operand::Move(dst)
      }
      hir::ExprKind::Async(b) => {
        let tail = self.block(b);
        // implicit join: locally spawned tasks the block never awaited are
        // joined before the block produces its value
        for var in pending_local_tasks(b) { self.force_join(var) }
        tail.unwrap_or(Operand::Const(ConstValue::Unit, e.ty))
      }
      hir::ExprKind::Await(task) => {
        let task_place = self.place(task);
        self.suspend_point();
        let value = Place {
          local: task_place.local,
          proj: { let mut p = task_place.proj.clone(); p.push(Projection::Field(0)); p },
          ty: e.ty,
        };
        let dst = self.temp(e.ty);
        self.emit(Inst::Assign(dst.clone(), self.use_place(value)));
        Operand::Move(dst)
      }
    }
  }

  /// Short-circuiting `&&`/`||` lower as branches; everything else is a
  /// single instruction.
  fn binop(&mut self, ty: TypeId, op: Binop, l: &hir::Expr, r: &hir::Expr) -> Operand {
    match op {
      Binop::And | Binop::Or => {
        let dst = self.temp(ty);
        let l = self.expr(l);
        self.emit(Inst::Assign(dst.clone(), l));
        let rhs_block = self.f.new_block();
        let join = self.f.new_block();
        let cond = Operand::Copy(dst.clone());
        let term = if op == Binop::And {
          Terminator::Branch(cond, rhs_block, join)
        } else {
          Terminator::Branch(cond, join, rhs_block)
        };
        self.f[self.cur].terminate(term);
        self.cur = rhs_block;
        let r = self.expr(r);
        self.emit(Inst::Assign(dst.clone(), r));
        self.goto(join);
        Operand::Move(dst)
      }
      _ => {
        let l = self.expr(l);
        let r = self.expr(r);
        let dst = self.temp(ty);
        self.emit(Inst::Binop(dst.clone(), op, l, r));
        Operand::Move(dst)
      }
    }
  }

  fn lower_if(
    &mut self, ty: TypeId, cond: &hir::Expr, then: &hir::Expr, els: Option<&hir::Expr>,
  ) -> Operand {
    let cond = self.expr(cond);
    let dst = self.temp(ty);
    let then_block = self.f.new_block();
    let else_block = self.f.new_block();
    let join = self.f.new_block();
    self.f[self.cur].terminate(Terminator::Branch(cond, then_block, else_block));

    self.cur = then_block;
    let t = self.expr(then);
    self.emit(Inst::Assign(dst.clone(), t));
    self.goto(join);

    self.cur = else_block;
    match els {
      Some(els) => {
        let v = self.expr(els);
        self.emit(Inst::Assign(dst.clone(), v));
      }
      None => {
        let unit = Operand::Const(ConstValue::Unit, self.types.builtins.unit);
        self.emit(Inst::Assign(dst.clone(), unit));
      }
    }
    self.goto(join);
    Operand::Move(dst)
  }

  /// `compare` over a tag union: a tag load plus a switch on the integer
  /// tag, with payload decomposition in each case block.
  fn lower_compare(
    &mut self, ty: TypeId, scrut: &hir::Expr, arms: &[hir::CompareArm],
    default: Option<&hir::Expr>,
  ) -> Operand {
    let scrut_place = self.place(scrut);
    let tag_ty = self.types.builtins.uint(crate::types::Size::S8);
    let tag = self.temp(tag_ty);
    self.emit(Inst::TagLoad { dst: tag.clone(), src: scrut_place.clone() });

    let dst = self.temp(ty);
    let join = self.f.new_block();
    let default_block = self.f.new_block();
    let mut cases = vec![];
    let arm_blocks: Vec<BlockId> = arms.iter().map(|arm| {
      let b = self.f.new_block();
      cases.push((u64::from(arm.member), b));
      b
    }).collect();
    self.f[self.cur].terminate(Terminator::Switch {
      scrut: Operand::Move(tag), cases, default: default_block,
    });

    for (arm, &block) in arms.iter().zip(&arm_blocks) {
      self.cur = block;
      for (i, &binder) in arm.binders.iter().enumerate() {
        let bty = self.binder_ty(scrut.ty, arm.member, i);
        let local = self.var_local(binder, bty);
        self.emit(Inst::TagGet {
          dst: Place::local(local, bty),
          src: scrut_place.clone(),
          member: arm.member,
          index: i.try_into().expect("too many binders"),
        });
      }
      let v = self.expr(&arm.body);
      self.emit(Inst::Assign(dst.clone(), v));
      self.goto(join);
    }

    self.cur = default_block;
    match default {
      Some(d) => {
        let v = self.expr(d);
        self.emit(Inst::Assign(dst.clone(), v));
        self.goto(join);
      }
      None => {
        // arms were checked exhaustive; the default case cannot run
        self.f[self.cur].terminate(Terminator::Unreachable);
        self.cur = join;
      }
    }
    self.cur = join;
    Operand::Move(dst)
  }

  /// Emit a suspension point. Only async functions become state machines;
  /// in any other context a join completes without suspending.
  fn suspend_point(&mut self) {
    if !self.f.is_async { return }
    let state = self.next_state;
    self.next_state += 1;
    self.emit(Inst::Suspend(state));
    self.emit(Inst::Resume(state));
  }

  /// Join a task the block left unawaited: wait for it and discard the
  /// settled value.
  fn force_join(&mut self, var: VarId) {
    let Some(Some(local)) = self.vars.get(var.into_usize()).copied() else { return };
    let task_ty = self.f.locals[local.into_usize()].ty;
    let value_ty = self.types.as_struct(task_ty)
      .and_then(|info| info.args.first().copied())
      .unwrap_or(TypeId::NONE);
    if !value_ty.exists() { return }
    self.suspend_point();
    let value = Place { local, proj: vec![Projection::Field(0)], ty: value_ty };
    let dst = self.temp(value_ty);
    self.emit(Inst::Assign(dst, self.use_place(value)));
  }

  fn binder_ty(&self, union_ty: TypeId, member: u32, index: usize) -> TypeId {
    use crate::types::ty::UnionMember;
    let Some(info) = self.types.as_union(union_ty) else { return TypeId::NONE };
    match info.members.get(member as usize) {
      Some(UnionMember::Tag(_, args)) => args.get(index).copied().unwrap_or(TypeId::NONE),
      Some(UnionMember::Value(t)) if index == 0 => *t,
      _ => TypeId::NONE,
    }
  }

  /// Lower a block, returning the tail operand if there is one.
  fn block(&mut self, b: &hir::Block) -> Option<Operand> {
    for s in &b.stmts { self.stmt(s) }
    b.tail.as_ref().map(|t| self.expr(t))
  }

  fn stmt(&mut self, s: &hir::Stmt) {
    match &s.k {
      hir::StmtKind::Let { var, ty, init } => {
        let op = self.expr(init);
        let local = self.var_local(*var, *ty);
        self.emit(Inst::Assign(Place::local(local, *ty), op));
      }
      hir::StmtKind::Expr(e) => { self.expr(e); }
      hir::StmtKind::Assign { lhs, rhs } => {
        let op = self.expr(rhs);
        if let hir::ExprKind::Deref(ptr) = &lhs.k {
          let dst = self.place(ptr);
          self.emit(Inst::Store { dst, val: op });
        } else {
          let dst = self.place(lhs);
          self.emit(Inst::Assign(dst, op));
        }
      }
      hir::StmtKind::Return(e) => {
        let op = e.as_ref().map(|e| self.expr(e));
        self.terminate(Terminator::Return(op));
      }
      hir::StmtKind::While { cond, body } => {
        let cond_block = self.f.new_block();
        let body_block = self.f.new_block();
        let exit = self.f.new_block();
        self.goto(cond_block);
        let c = self.expr(cond);
        self.f[self.cur].terminate(Terminator::Branch(c, body_block, exit));
        self.cur = body_block;
        self.loops.push(LoopFrame { continue_: cond_block, break_: exit });
        self.block(body);
        self.loops.pop();
        self.goto(cond_block);
        self.cur = exit;
      }
      hir::StmtKind::Break => {
        if let Some(frame) = self.loops.last() {
          let to = frame.break_;
          self.terminate(Terminator::Goto(to));
        }
      }
      hir::StmtKind::Continue => {
        if let Some(frame) = self.loops.last() {
          let to = frame.continue_;
          self.terminate(Terminator::Goto(to));
        }
      }
      hir::StmtKind::Drop(_) => {}
    }
  }
}

/// The `spawn local` bindings of an async block that no `await` in the
/// block consumes. These must still be joined when the block exits.
fn pending_local_tasks(b: &hir::Block) -> Vec<VarId> {
  let mut spawned = vec![];
  let mut awaited = vec![];
  scan_block(b, &mut spawned, &mut awaited);
  spawned.retain(|v| !awaited.contains(v));
  spawned
}

fn scan_block(b: &hir::Block, spawned: &mut Vec<VarId>, awaited: &mut Vec<VarId>) {
  for s in &b.stmts { scan_stmt(s, spawned, awaited) }
  if let Some(t) = &b.tail { scan_expr(t, spawned, awaited) }
}

fn scan_stmt(s: &hir::Stmt, spawned: &mut Vec<VarId>, awaited: &mut Vec<VarId>) {
  match &s.k {
    hir::StmtKind::Let { var, init, .. } => {
      if matches!(init.k, hir::ExprKind::Spawn { local: true, .. }) { spawned.push(*var) }
      scan_expr(init, spawned, awaited);
    }
    hir::StmtKind::Expr(e) => scan_expr(e, spawned, awaited),
    hir::StmtKind::Assign { lhs, rhs } => {
      scan_expr(lhs, spawned, awaited);
      scan_expr(rhs, spawned, awaited);
    }
    hir::StmtKind::Return(e) => if let Some(e) = e { scan_expr(e, spawned, awaited) },
    hir::StmtKind::While { cond, body } => {
      scan_expr(cond, spawned, awaited);
      scan_block(body, spawned, awaited);
    }
    hir::StmtKind::Break | hir::StmtKind::Continue | hir::StmtKind::Drop(_) => {}
  }
}

fn scan_expr(e: &hir::Expr, spawned: &mut Vec<VarId>, awaited: &mut Vec<VarId>) {
  match &e.k {
    hir::ExprKind::Await(inner) => {
      if let Some(root) = inner.place_root() { awaited.push(root) }
      scan_expr(inner, spawned, awaited);
    }
    // a nested async block joins its own tasks
    hir::ExprKind::Async(_) => {}
    hir::ExprKind::Unop(_, a) | hir::ExprKind::Borrow(_, a) | hir::ExprKind::Deref(a)
    | hir::ExprKind::Cast(a) | hir::ExprKind::Field { base: a, .. }
    | hir::ExprKind::TagTest { base: a, .. } | hir::ExprKind::Spawn { body: a, .. } =>
      scan_expr(a, spawned, awaited),
    hir::ExprKind::Binop(_, a, b) | hir::ExprKind::Index { base: a, index: b } => {
      scan_expr(a, spawned, awaited);
      scan_expr(b, spawned, awaited);
    }
    hir::ExprKind::Call { args, .. } =>
      for a in args { scan_expr(a, spawned, awaited) },
    hir::ExprKind::Tuple(es) | hir::ExprKind::ArrayLit(es) | hir::ExprKind::StructLit(es)
    | hir::ExprKind::TagLit { args: es, .. } =>
      for a in es { scan_expr(a, spawned, awaited) },
    hir::ExprKind::If { cond, then, els } => {
      scan_expr(cond, spawned, awaited);
      scan_expr(then, spawned, awaited);
      if let Some(e) = els { scan_expr(e, spawned, awaited) }
    }
    hir::ExprKind::Block(b) => scan_block(b, spawned, awaited),
    hir::ExprKind::Compare { scrut, arms, default } => {
      scan_expr(scrut, spawned, awaited);
      for a in arms { scan_expr(&a.body, spawned, awaited) }
      if let Some(d) = default { scan_expr(d, spawned, awaited) }
    }
    hir::ExprKind::Unit | hir::ExprKind::Bool(_) | hir::ExprKind::Int(_)
    | hir::ExprKind::Float(_) | hir::ExprKind::Str(_) | hir::ExprKind::Nothing
    | hir::ExprKind::Var(_) | hir::ExprKind::Const(_) | hir::ExprKind::Error => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;
  use crate::symbol::intern;
  use crate::types::FileSpan;
  use crate::types::entity::{SymbolData, SymbolFlags, SymbolId, SymbolKind, Visibility};
  use crate::types::hir::{Block, Expr, ExprKind, ExprS, Func, Module, Param, Stmt, StmtKind};

  fn sym_table(name: &str) -> (SymbolTable, SymbolId) {
    let mut t = SymbolTable::default();
    let id = t.add(SymbolData {
      kind: SymbolKind::Fn, name: intern(name), decl: None, span: FileSpan::default(),
      vis: Visibility::Private, flags: SymbolFlags::empty(), module: intern("main"),
      ty: TypeId::NONE, sig: None,
    });
    (t, id)
  }

  fn e(ty: TypeId, k: ExprKind) -> Expr {
    Rc::new(ExprS { span: FileSpan::default(), ty, k })
  }

  #[test]
  fn lowers_if_to_branch() {
    let types = TypeStore::new();
    let (symbols, sym) = sym_table("f");
    let int = types.builtins.int(crate::types::Size::Any);
    let b = types.builtins.bool_;
    let body = Block {
      stmts: Box::new([]),
      tail: Some(e(int, ExprKind::If {
        cond: e(b, ExprKind::Bool(true)),
        then: e(int, ExprKind::Int(1.into())),
        els: Some(e(int, ExprKind::Int(2.into()))),
      })),
    };
    let f = Func {
      sym, name: intern("f"), span: FileSpan::default(),
      generics: Box::new([]), params: Box::new([]), result: int,
      body: Some(body), is_async: false, num_vars: 0,
    };
    let hir = { let mut m = Module::default(); m.push(f); m };
    let out = lower_module(&hir, &types, &symbols, &Cancel::new()).expect("lowered");
    let func = &out.funcs[0];
    assert!(matches!(func[BlockId::ENTRY].terminator(), Terminator::Branch(..)));
    let dump = func.to_string();
    assert!(dump.starts_with("fn f() {\nbb0:"), "entry block first: {dump}");
  }

  #[test]
  fn while_loop_shape() {
    let types = TypeStore::new();
    let (symbols, sym) = sym_table("w");
    let b = types.builtins.bool_;
    let body = Block {
      stmts: Box::new([Stmt {
        span: FileSpan::default(),
        k: StmtKind::While {
          cond: e(b, ExprKind::Bool(false)),
          body: Block::default(),
        },
      }]),
      tail: None,
    };
    let f = Func {
      sym, name: intern("w"), span: FileSpan::default(),
      generics: Box::new([]), params: Box::new([]), result: types.builtins.unit,
      body: Some(body), is_async: false, num_vars: 0,
    };
    let hir = { let mut m = Module::default(); m.push(f); m };
    let out = lower_module(&hir, &types, &symbols, &Cancel::new()).expect("lowered");
    let func = &out.funcs[0];
    let branches = func.blocks.iter()
      .filter(|bl| matches!(bl.term, Some(Terminator::Branch(..))))
      .count();
    assert_eq!(branches, 1, "one branch for the loop condition");
  }
}
