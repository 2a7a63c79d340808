//! Async state-machine lowering: rewrite each async function into a
//! resumable form. Every suspension point becomes a state save plus a
//! return to the scheduler, with a resume block re-entered through a
//! dispatch prologue that switches on the saved state index.

use num::BigInt;
use crate::Idx;
use crate::types::Size;
use crate::types::mir::{
  BlockId, ConstValue, Func, Inst, LocalFlags, Operand, Place, Terminator,
};
use crate::types::ty::TypeStore;

/// Rewrite one function, if it is async. Functions without suspension
/// points just lose the flag.
pub fn lower_state_machine(f: &mut Func, types: &TypeStore) {
  if !f.is_async { return }
  f.is_async = false;
  let has_suspend = f.blocks.iter()
    .any(|b| b.insts.iter().any(|i| matches!(i, Inst::Suspend(_))));
  if !has_suspend { return }

  let state_ty = types.builtins.uint(Size::S32);
  let state_local = f.new_local(state_ty, LocalFlags::STATE);
  let state_place = Place::local(state_local, state_ty);

  // split every block at its suspension points; the saved state index is
  // `state + 1`, reserving 0 for a fresh start
  let mut resumes: Vec<(u32, BlockId)> = vec![];
  let mut i = 0;
  while i < f.blocks.len() {
    let pos = f.blocks[i].insts.iter()
      .position(|inst| matches!(inst, Inst::Suspend(_)));
    let Some(pos) = pos else { i += 1; continue };
    let Inst::Suspend(state) = f.blocks[i].insts[pos] else { unreachable!() };
    let mut tail = f.blocks[i].insts.split_off(pos + 1);
    f.blocks[i].insts.pop();
    let term = f.blocks[i].term.take();
    f.blocks[i].insts.push(Inst::Assign(
      state_place.clone(),
      Operand::Const(ConstValue::Int(BigInt::from(state + 1)), state_ty),
    ));
    f.blocks[i].term = Some(Terminator::Return(None));

    if matches!(tail.first(), Some(Inst::Resume(_))) { tail.remove(0); }
    let resume = f.new_block();
    f.blocks[resume.into_usize()].insts = tail;
    f.blocks[resume.into_usize()].term = term;
    resumes.push((state, resume));
    // the remainder moved to `resume`, which is scanned later in the loop
  }

  // dispatch prologue: the entry becomes a switch on the saved state
  let moved = f.new_block();
  let m = moved.into_usize();
  f.blocks.swap(0, m);
  for b in &mut f.blocks {
    if let Some(t) = &mut b.term {
      t.map_successors(|s| if s == BlockId::ENTRY { moved } else { s });
    }
  }
  f.blocks[0].term = Some(Terminator::Switch {
    scrut: Operand::Copy(state_place),
    cases: resumes.iter().map(|&(s, b)| (u64::from(s) + 1, b)).collect(),
    default: moved,
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::entity::SymbolId;
  use crate::types::ty::TypeId;

  #[test]
  fn suspend_splits_and_dispatches() {
    let types = TypeStore::new();
    let mut f = Func {
      sym: SymbolId::default(), name: intern("a"), locals: vec![], params: vec![],
      result: TypeId::NONE, blocks: vec![], is_async: true,
    };
    let entry = f.new_block();
    let int = types.builtins.int(Size::S64);
    let l = f.new_local(int, LocalFlags::empty());
    f[entry].insts.push(Inst::Suspend(0));
    f[entry].insts.push(Inst::Resume(0));
    f[entry].insts.push(Inst::Assign(
      Place::local(l, int), Operand::Const(ConstValue::Int(1.into()), int)));
    f[entry].terminate(Terminator::Return(None));

    lower_state_machine(&mut f, &types);
    assert!(!f.is_async);
    // entry is now the dispatcher
    let Some(Terminator::Switch { cases, .. }) = &f[BlockId::ENTRY].term else {
      panic!("dispatch prologue")
    };
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].0, 1, "state 0 is reserved for a fresh start");
    // the resume block kept the post-suspend work and no marker remains
    let resume = cases[0].1;
    assert!(matches!(f[resume].insts[0], Inst::Assign(..)));
    assert!(!f.blocks.iter().any(|b|
      b.insts.iter().any(|i| matches!(i, Inst::Suspend(_) | Inst::Resume(_)))));
    // the state local exists and is flagged
    assert!(f.locals.iter().any(|l| l.flags.contains(LocalFlags::STATE)));
  }
}
