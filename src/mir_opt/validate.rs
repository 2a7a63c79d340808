//! The MIR validator. Runs last in the pipeline; any finding here is an
//! internal invariant violation and fails the compilation.

use bit_vec::BitVec;
use hashbrown::HashSet;
use crate::{CompileError, Idx};
use crate::types::mir::{
  Func, Inst, Module, Operand, Place, Projection, Terminator,
};
use crate::types::ty::{TypeId, TypeKind, TypeStore};

/// Validate every function:
/// * every block ends in exactly one terminator;
/// * every referenced block id exists;
/// * every local index is in range;
/// * assignment types match after alias resolution;
/// * no unresolved generic parameter appears in any operand or place type.
pub fn validate(m: &Module, types: &TypeStore) -> Result<(), CompileError> {
  let mut errs = vec![];
  for f in &m.funcs {
    Validator { f, types, errs: &mut errs }.run();
  }
  if errs.is_empty() { Ok(()) } else { Err(CompileError::InvalidMir(errs)) }
}

struct Validator<'a> {
  f: &'a Func,
  types: &'a TypeStore,
  errs: &'a mut Vec<String>,
}

impl Validator<'_> {
  fn run(&mut self) {
    let name = self.f.name;
    let mut terminated = BitVec::from_elem(self.f.blocks.len(), false);
    for (bi, b) in self.f.blocks.iter().enumerate() {
      for inst in &b.insts { self.inst(bi, inst) }
      match &b.term {
        None => {}
        Some(t) => {
          terminated.set(bi, true);
          self.terminator(bi, t);
        }
      }
    }
    for (bi, ok) in terminated.iter().enumerate() {
      if !ok {
        self.errs.push(format!("{name}: bb{bi} has no terminator"));
      }
    }
  }

  fn err(&mut self, bi: usize, msg: String) {
    let name = self.f.name;
    self.errs.push(format!("{name}: bb{bi}: {msg}"));
  }

  fn block_ref(&mut self, bi: usize, b: crate::types::mir::BlockId) {
    if b.into_usize() >= self.f.blocks.len() {
      self.err(bi, format!("reference to missing block {b}"));
    }
  }

  fn place(&mut self, bi: usize, p: &Place) {
    if p.local.into_usize() >= self.f.locals.len() {
      self.err(bi, format!("local {} out of range", p.local));
    }
    for proj in &p.proj {
      if let Projection::Index(op) = proj { self.operand(bi, op) }
    }
    self.concrete(bi, p.ty);
  }

  fn operand(&mut self, bi: usize, op: &Operand) {
    match op {
      Operand::Const(_, ty) => self.concrete(bi, *ty),
      Operand::Copy(p) | Operand::Move(p) => self.place(bi, p),
    }
  }

  fn concrete(&mut self, bi: usize, ty: TypeId) {
    if !ty.exists() {
      self.err(bi, "unresolved type".into());
      return
    }
    if contains_generic(self.types, ty, &mut HashSet::new()) {
      let name = self.types.name(ty);
      self.err(bi, format!("generic parameter survives in `{name}`"));
    }
  }

  fn assign_types(&mut self, bi: usize, dst: TypeId, src: TypeId) {
    let (d, s) = (self.types.resolve_alias(dst), self.types.resolve_alias(src));
    if d.exists() && s.exists() && d != s {
      let (dn, sn) = (self.types.name(d), self.types.name(s));
      self.err(bi, format!("assignment type mismatch: `{dn}` = `{sn}`"));
    }
  }

  fn inst(&mut self, bi: usize, inst: &Inst) {
    match inst {
      Inst::Assign(p, op) => {
        self.place(bi, p);
        self.operand(bi, op);
        self.assign_types(bi, p.ty, op.ty());
      }
      Inst::Binop(p, _, a, b) => {
        self.place(bi, p);
        self.operand(bi, a);
        self.operand(bi, b);
      }
      Inst::Unop(p, _, a) => {
        self.place(bi, p);
        self.operand(bi, a);
      }
      Inst::Call { dst, args, .. } => {
        if let Some(p) = dst { self.place(bi, p) }
        for a in args { self.operand(bi, a) }
      }
      Inst::Ref { dst, place } => {
        self.place(bi, dst);
        self.place(bi, place);
        let inner = match self.types.lookup(self.types.resolve_alias(dst.ty)) {
          Some(&TypeKind::Ref(_, t) | &TypeKind::Ptr(t) | &TypeKind::Own(t)) => Some(t),
          _ => None,
        };
        match inner {
          Some(t) => self.assign_types(bi, t, place.ty),
          None => self.err(bi, "address-of destination is not pointer-like".into()),
        }
      }
      Inst::Cast { dst, src } => {
        self.place(bi, dst);
        self.operand(bi, src);
      }
      Inst::Load { dst, src } => {
        self.place(bi, dst);
        self.place(bi, src);
      }
      Inst::Store { dst, val } => {
        self.place(bi, dst);
        self.operand(bi, val);
      }
      Inst::TagNew { dst, args, .. } => {
        self.place(bi, dst);
        for a in args { self.operand(bi, a) }
      }
      Inst::TagLoad { dst, src } | Inst::TagGet { dst, src, .. } => {
        self.place(bi, dst);
        self.place(bi, src);
      }
      Inst::TagTest { dst, src, .. } => {
        self.place(bi, dst);
        self.place(bi, src);
      }
      Inst::Suspend(_) | Inst::Resume(_) => {
        self.err(bi, "suspension survives async lowering".into());
      }
    }
  }

  fn terminator(&mut self, bi: usize, t: &Terminator) {
    match t {
      Terminator::Goto(b) => self.block_ref(bi, *b),
      Terminator::Branch(cond, th, el) => {
        self.operand(bi, cond);
        let cty = self.types.resolve_alias(cond.ty());
        if !matches!(self.types.lookup(cty), Some(TypeKind::Bool)) {
          self.err(bi, "branch condition is not a bool".into());
        }
        self.block_ref(bi, *th);
        self.block_ref(bi, *el);
      }
      Terminator::Switch { scrut, cases, default } => {
        self.operand(bi, scrut);
        let sty = self.types.resolve_alias(scrut.ty());
        if !matches!(self.types.lookup(sty),
          Some(TypeKind::Int(_) | TypeKind::Uint(_) | TypeKind::Enum(_)))
        {
          self.err(bi, "switch scrutinee is not integral".into());
        }
        for &(_, b) in cases { self.block_ref(bi, b) }
        self.block_ref(bi, *default);
      }
      Terminator::Return(op) => {
        if let Some(op) = op {
          self.operand(bi, op);
          self.assign_types(bi, self.f.result, op.ty());
        }
      }
      Terminator::Unreachable => {}
    }
  }
}

/// Whether a type mentions a generic parameter anywhere.
fn contains_generic(types: &TypeStore, ty: TypeId, visiting: &mut HashSet<TypeId>) -> bool {
  if !visiting.insert(ty) { return false }
  let r = match types.lookup(ty) {
    None => false,
    Some(TypeKind::Generic(_)) => true,
    Some(&TypeKind::Array(t) | &TypeKind::Ptr(t) | &TypeKind::Ref(_, t)
      | &TypeKind::Own(t)) => contains_generic(types, t, visiting),
    Some(TypeKind::Tuple(ts)) => {
      let ts = ts.clone();
      ts.iter().any(|&t| contains_generic(types, t, visiting))
    }
    Some(TypeKind::Fn(ps, r)) => {
      let (ps, r) = (ps.clone(), *r);
      ps.iter().any(|&t| contains_generic(types, t, visiting))
        || contains_generic(types, r, visiting)
    }
    Some(&TypeKind::Struct(s)) => {
      let args = types.struct_info(s).args.clone();
      args.iter().any(|&t| contains_generic(types, t, visiting))
    }
    Some(&TypeKind::Union(u)) => {
      let args = types.union_info(u).args.clone();
      args.iter().any(|&t| contains_generic(types, t, visiting))
    }
    Some(&TypeKind::Alias(a)) => {
      let args = types.alias_info(a).args.clone();
      args.iter().any(|&t| contains_generic(types, t, visiting))
    }
    Some(_) => false,
  };
  visiting.remove(&ty);
  r
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::Size;
  use crate::types::entity::SymbolId;
  use crate::types::mir::{ConstValue, LocalFlags, Place};

  fn func(result: TypeId) -> Func {
    Func {
      sym: SymbolId::default(), name: intern("v"), locals: vec![], params: vec![],
      result, blocks: vec![], is_async: false,
    }
  }

  #[test]
  fn catches_unterminated_block() {
    let types = TypeStore::new();
    let mut f = func(types.builtins.unit);
    f.new_block();
    let mut m = Module::default();
    m.push(f);
    let err = validate(&m, &types).expect_err("unterminated");
    let CompileError::InvalidMir(errs) = err else { panic!("wrong error kind") };
    assert!(errs[0].contains("no terminator"), "{errs:?}");
  }

  #[test]
  fn catches_out_of_range_local_and_block() {
    let types = TypeStore::new();
    let int = types.builtins.int(Size::S32);
    let mut f = func(types.builtins.unit);
    let b0 = f.new_block();
    f[b0].insts.push(Inst::Assign(
      Place::local(crate::types::mir::LocalId(7), int),
      Operand::Const(ConstValue::Int(0.into()), int)));
    f[b0].terminate(Terminator::Goto(crate::types::mir::BlockId(9)));
    let mut m = Module::default();
    m.push(f);
    let CompileError::InvalidMir(errs) = validate(&m, &types).expect_err("broken") else {
      panic!("wrong error kind")
    };
    assert!(errs.iter().any(|e| e.contains("out of range")));
    assert!(errs.iter().any(|e| e.contains("missing block")));
  }

  #[test]
  fn catches_assign_mismatch() {
    let types = TypeStore::new();
    let int = types.builtins.int(Size::S32);
    let b = types.builtins.bool_;
    let mut f = func(types.builtins.unit);
    let b0 = f.new_block();
    let l = f.new_local(b, LocalFlags::empty());
    f[b0].insts.push(Inst::Assign(
      Place::local(l, b), Operand::Const(ConstValue::Int(1.into()), int)));
    f[b0].terminate(Terminator::Return(None));
    let mut m = Module::default();
    m.push(f);
    let CompileError::InvalidMir(errs) = validate(&m, &types).expect_err("mismatch") else {
      panic!("wrong error kind")
    };
    assert!(errs.iter().any(|e| e.contains("assignment type mismatch")), "{errs:?}");
  }

  #[test]
  fn accepts_well_formed_function() {
    let types = TypeStore::new();
    let int = types.builtins.int(Size::S32);
    let mut f = func(int);
    let b0 = f.new_block();
    let l = f.new_local(int, LocalFlags::PARAM);
    f.params.push(l);
    f[b0].terminate(Terminator::Return(Some(Operand::Copy(Place::local(l, int)))));
    let mut m = Module::default();
    m.push(f);
    validate(&m, &types).expect("valid");
  }
}
