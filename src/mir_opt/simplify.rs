//! CFG simplification: collapse goto chains, merge straight-line blocks,
//! and drop unreachable blocks.

use bit_set::BitSet;
use hashbrown::HashSet;
use crate::Idx;
use crate::types::mir::{Block, BlockId, Func, Terminator};

/// Simplify a function's CFG to a fixpoint. Idempotent.
pub fn simplify_cfg(f: &mut Func) {
  loop {
    let before = f.blocks.len();
    collapse_goto_chains(f);
    merge_linear(f);
    drop_unreachable(f);
    if f.blocks.len() == before { return }
  }
}

/// Redirect every successor through chains of empty `goto` blocks.
fn collapse_goto_chains(f: &mut Func) {
  let resolve = |mut b: BlockId| {
    let mut seen = HashSet::new();
    loop {
      let block = &f.blocks[b.into_usize()];
      if !block.insts.is_empty() { return b }
      let Some(Terminator::Goto(next)) = block.term else { return b };
      if !seen.insert(b) { return b }
      b = next;
    }
  };
  let targets: Vec<Vec<BlockId>> = f.blocks.iter().map(|b| {
    b.term.as_ref().map_or(vec![], |t| t.successors().iter().map(|&s| resolve(s)).collect())
  }).collect();
  for (b, resolved) in f.blocks.iter_mut().zip(targets) {
    if let Some(t) = &mut b.term {
      let mut it = resolved.into_iter();
      t.map_successors(|_| it.next().expect("successor count changed"));
    }
  }
}

/// Merge a block into its single `goto` successor when that successor has
/// no other predecessors.
fn merge_linear(f: &mut Func) {
  loop {
    let mut preds = vec![0usize; f.blocks.len()];
    for b in &f.blocks {
      if let Some(t) = &b.term {
        for s in t.successors() { preds[s.into_usize()] += 1 }
      }
    }
    let mut merged = false;
    for i in 0..f.blocks.len() {
      let Some(Terminator::Goto(next)) = f.blocks[i].term else { continue };
      let j = next.into_usize();
      if j == i || next == BlockId::ENTRY || preds[j] != 1 { continue }
      let Block { insts, term } = std::mem::take(&mut f.blocks[j]);
      let src = &mut f.blocks[i];
      src.term = term;
      src.insts.extend(insts);
      merged = true;
      break
    }
    if !merged { return }
  }
}

/// Drop blocks not reachable from the entry, compacting ids.
fn drop_unreachable(f: &mut Func) {
  let mut reachable = BitSet::with_capacity(f.blocks.len());
  let mut work = vec![BlockId::ENTRY];
  while let Some(b) = work.pop() {
    if !reachable.insert(b.into_usize()) { continue }
    if let Some(t) = &f.blocks[b.into_usize()].term {
      work.extend(t.successors());
    }
  }
  if reachable.len() == f.blocks.len() { return }
  let mut remap = vec![BlockId::ENTRY; f.blocks.len()];
  let mut kept = vec![];
  for (i, b) in std::mem::take(&mut f.blocks).into_iter().enumerate() {
    if reachable.contains(i) {
      remap[i] = BlockId::from_usize(kept.len());
      kept.push(b);
    }
  }
  for b in &mut kept {
    if let Some(t) = &mut b.term {
      t.map_successors(|s| remap[s.into_usize()]);
    }
  }
  f.blocks = kept;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::entity::SymbolId;
  use crate::types::mir::{Inst, Operand, ConstValue, Place, LocalFlags};
  use crate::types::ty::{TypeId, TypeStore};

  fn empty_func() -> Func {
    Func {
      sym: SymbolId::default(), name: intern("t"), locals: vec![], params: vec![],
      result: TypeId::NONE, blocks: vec![], is_async: false,
    }
  }

  #[test]
  fn goto_chain_collapses() {
    let mut f = empty_func();
    let b0 = f.new_block();
    let b1 = f.new_block();
    let b2 = f.new_block();
    f[b0].terminate(Terminator::Goto(b1));
    f[b1].terminate(Terminator::Goto(b2));
    f[b2].terminate(Terminator::Return(None));
    simplify_cfg(&mut f);
    assert_eq!(f.blocks.len(), 1);
    assert!(matches!(f[BlockId::ENTRY].terminator(), Terminator::Return(None)));
  }

  #[test]
  fn unreachable_blocks_drop() {
    let types = TypeStore::new();
    let mut f = empty_func();
    let b0 = f.new_block();
    let dead = f.new_block();
    let b2 = f.new_block();
    let unit = types.builtins.unit;
    let l = f.new_local(unit, LocalFlags::empty());
    f[dead].insts.push(Inst::Assign(
      Place::local(l, unit), Operand::Const(ConstValue::Unit, unit)));
    f[dead].terminate(Terminator::Goto(b2));
    f[b0].terminate(Terminator::Goto(b2));
    f[b2].terminate(Terminator::Return(None));
    simplify_cfg(&mut f);
    assert_eq!(f.blocks.len(), 1, "dead block and the merged goto both fold away");
  }

  #[test]
  fn branch_targets_remap() {
    let types = TypeStore::new();
    let mut f = empty_func();
    let b0 = f.new_block();
    let skip = f.new_block();
    let t = f.new_block();
    let e = f.new_block();
    let b = types.builtins.bool_;
    let l = f.new_local(b, LocalFlags::empty());
    f[skip].terminate(Terminator::Goto(t));
    f[b0].terminate(Terminator::Branch(
      Operand::Copy(Place::local(l, b)), skip, e));
    f[t].terminate(Terminator::Return(None));
    f[e].terminate(Terminator::Return(None));
    simplify_cfg(&mut f);
    let Terminator::Branch(_, then_b, _) = f[BlockId::ENTRY].terminator() else {
      panic!("branch survives")
    };
    // the empty goto hop is gone: the branch goes straight to the return
    assert!(matches!(f[*then_b].terminator(), Terminator::Return(None)));
  }
}
