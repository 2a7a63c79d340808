//! Switch-tag recognition: fold a chain of tag-equality branches over the
//! same place into a single tag load plus a `Switch` terminator.

use if_chain::if_chain;
use crate::Idx;
use crate::types::Size;
use crate::types::mir::{
  Block, BlockId, Func, Inst, LocalFlags, Operand, Place, Projection, Terminator,
};
use crate::types::ty::TypeStore;

/// Structural place equality over constant projections. Places with runtime
/// index projections never compare equal.
fn eq_place(a: &Place, b: &Place) -> bool {
  a.local == b.local
    && a.proj.len() == b.proj.len()
    && a.proj.iter().zip(&b.proj).all(|(x, y)| match (x, y) {
      (Projection::Field(i), Projection::Field(j)) => i == j,
      (Projection::Deref, Projection::Deref) => true,
      _ => false,
    })
}

/// Match a block of the form `…; t = p is #m; branch t -> [then, else]`.
fn tag_branch(blk: &Block, expect_src: Option<&Place>) -> Option<(Place, u32, BlockId, BlockId)> {
  if_chain! {
    if let Some(Inst::TagTest { dst, src, member }) = blk.insts.last();
    if dst.proj.is_empty();
    if let Some(Terminator::Branch(cond, then, els)) = &blk.term;
    if let Operand::Copy(p) | Operand::Move(p) = cond;
    if p.local == dst.local && p.proj.is_empty();
    if expect_src.is_none_or(|e| eq_place(e, src));
    then { Some((src.clone(), *member, *then, *els)) } else { None }
  }
}

fn pred_counts(f: &Func) -> Vec<usize> {
  let mut preds = vec![0usize; f.blocks.len()];
  for b in &f.blocks {
    if let Some(t) = &b.term {
      for s in t.successors() { preds[s.into_usize()] += 1 }
    }
  }
  preds
}

/// Recognize tag-test chains and rewrite the head block to a `Switch`.
/// Consumed chain blocks become unreachable and are cleaned up by the next
/// simplification pass.
pub fn recognize_switch_tag(f: &mut Func, types: &TypeStore) {
  for i in 0..f.blocks.len() {
    let Some((src, member, then, mut els)) = tag_branch(&f.blocks[i], None) else { continue };
    let preds = pred_counts(f);
    let mut cases = vec![(u64::from(member), then)];
    loop {
      let j = els.into_usize();
      if preds[j] != 1 || f.blocks[j].insts.len() != 1 { break }
      let Some((_, m, t, next)) = tag_branch(&f.blocks[j], Some(&src)) else { break };
      cases.push((u64::from(m), t));
      els = next;
    }
    if cases.len() < 2 { continue }
    let tag_ty = types.builtins.uint(Size::S8);
    let tmp = f.new_local(tag_ty, LocalFlags::empty());
    let blk = &mut f.blocks[i];
    blk.insts.pop();
    blk.insts.push(Inst::TagLoad { dst: Place::local(tmp, tag_ty), src });
    blk.term = Some(Terminator::Switch {
      scrut: Operand::Move(Place::local(tmp, tag_ty)),
      cases,
      default: els,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::entity::SymbolId;
  use crate::types::ty::TypeId;

  /// Build `if u is #0 {} else if u is #1 {} else {}` by hand.
  #[test]
  fn folds_tag_chain() {
    let types = TypeStore::new();
    let b = types.builtins.bool_;
    let mut f = Func {
      sym: SymbolId::default(), name: intern("t"), locals: vec![], params: vec![],
      result: TypeId::NONE, blocks: vec![], is_async: false,
    };
    let u = f.new_local(TypeId::NONE, LocalFlags::empty());
    let up = Place::local(u, TypeId::NONE);
    let head = f.new_block();
    let arm0 = f.new_block();
    let test1 = f.new_block();
    let arm1 = f.new_block();
    let fall = f.new_block();
    for a in [arm0, arm1, fall] { f[a].terminate(Terminator::Return(None)) }

    let t0 = f.new_local(b, LocalFlags::empty());
    f[head].insts.push(Inst::TagTest { dst: Place::local(t0, b), src: up.clone(), member: 0 });
    f[head].terminate(Terminator::Branch(
      Operand::Move(Place::local(t0, b)), arm0, test1));

    let t1 = f.new_local(b, LocalFlags::empty());
    f[test1].insts.push(Inst::TagTest { dst: Place::local(t1, b), src: up.clone(), member: 1 });
    f[test1].terminate(Terminator::Branch(
      Operand::Move(Place::local(t1, b)), arm1, fall));

    recognize_switch_tag(&mut f, &types);
    let Some(Terminator::Switch { cases, default, .. }) = &f[head].term else {
      panic!("head folds to a switch")
    };
    assert_eq!(cases[..], [(0, arm0), (1, arm1)]);
    assert_eq!(*default, fall);
    assert!(matches!(f[head].insts.last(), Some(Inst::TagLoad { .. })));
  }
}
