//! The mid-level IR: a machine-independent control-flow-graph representation
//! built from HIR, rewritten by the pass pipeline, and then frozen for the
//! backends.

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};
use hashbrown::HashMap;
use num::BigInt;
use crate::Idx;
use crate::symbol::Symbol;
use super::{Binop, Unop};
use super::entity::SymbolId;
use super::ty::TypeId;

crate::mk_id! {
  /// A function-local slot.
  LocalId,
  /// An index into a module's function list.
  FuncId,
  /// A basic block id. Ids are assigned monotonically during construction.
  BlockId,
}

impl BlockId {
  /// The entry block of every function.
  pub const ENTRY: Self = Self(0);
}

impl fmt::Display for LocalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "_{}", self.0) }
}

impl fmt::Display for BlockId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "bb{}", self.0) }
}

bitflags::bitflags! {
  /// Flags on a local slot.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct LocalFlags: u8 {
    /// The local is a parameter.
    const PARAM = 1;
    /// The local is the saved-state index of an async state machine.
    const STATE = 1 << 1;
  }
}

/// A local slot: its type plus flags.
#[derive(Clone, Copy, Debug)]
pub struct Local {
  /// The slot type.
  pub ty: TypeId,
  /// Flags.
  pub flags: LocalFlags,
}

/// A constant value.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
  /// `()`
  Unit,
  /// A boolean.
  Bool(bool),
  /// An integer.
  Int(BigInt),
  /// A string.
  Str(Symbol),
  /// The `nothing` union member.
  Nothing,
}

impl fmt::Display for ConstValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConstValue::Unit => write!(f, "()"),
      ConstValue::Bool(b) => write!(f, "{b}"),
      ConstValue::Int(n) => write!(f, "{n}"),
      ConstValue::Str(s) => write!(f, "{s:?}"),
      ConstValue::Nothing => write!(f, "nothing"),
    }
  }
}

/// A projection step refining a place.
#[derive(Clone, Debug)]
pub enum Projection {
  /// Select a struct field or tuple element.
  Field(u32),
  /// Index into an array.
  Index(Operand),
  /// Dereference a pointer, reference, or own.
  Deref,
}

/// A place: a local plus a projection path, designating a memory location.
#[derive(Clone, Debug)]
pub struct Place {
  /// The root local.
  pub local: LocalId,
  /// The projection path, applied left to right.
  pub proj: Vec<Projection>,
  /// The type of the fully projected place.
  pub ty: TypeId,
}

impl Place {
  /// A place designating a whole local.
  #[must_use] pub fn local(local: LocalId, ty: TypeId) -> Self {
    Self { local, proj: vec![], ty }
  }
}

impl fmt::Display for Place {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let derefs = self.proj.iter().filter(|p| matches!(p, Projection::Deref)).count();
    for _ in 0..derefs { write!(f, "(*")? }
    write!(f, "{}", self.local)?;
    for p in &self.proj {
      match p {
        Projection::Field(i) => write!(f, ".{i}")?,
        Projection::Index(op) => write!(f, "[{op}]")?,
        Projection::Deref => write!(f, ")")?,
      }
    }
    Ok(())
  }
}

/// A value source: a constant, or a copy or move out of a place.
#[derive(Clone, Debug)]
pub enum Operand {
  /// A constant with its type.
  Const(ConstValue, TypeId),
  /// Copy the place; requires a copy type.
  Copy(Place),
  /// Move out of the place, invalidating it.
  Move(Place),
}

impl Operand {
  /// The type of the value this operand produces.
  #[must_use] pub fn ty(&self) -> TypeId {
    match self {
      Operand::Const(_, ty) => *ty,
      Operand::Copy(p) | Operand::Move(p) => p.ty,
    }
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Const(c, _) => write!(f, "const {c}"),
      Operand::Copy(p) => write!(f, "copy {p}"),
      Operand::Move(p) => write!(f, "move {p}"),
    }
  }
}

/// An instruction: an operation that cannot fail and does not end the block.
#[derive(Clone, Debug)]
pub enum Inst {
  /// `place = operand`
  Assign(Place, Operand),
  /// `place = op(lhs, rhs)`
  Binop(Place, Binop, Operand, Operand),
  /// `place = op(operand)`
  Unop(Place, Unop, Operand),
  /// `dst = f(args)`, or a bare call when `dst` is `None`.
  Call {
    /// The destination.
    dst: Option<Place>,
    /// The callee symbol.
    f: SymbolId,
    /// The callee name, for dumps.
    name: Symbol,
    /// The arguments.
    args: Box<[Operand]>,
  },
  /// Take the address of a place: `dst = &place`. The destination type is
  /// the reference, pointer, or own wrapper of the place type.
  Ref {
    /// The destination.
    dst: Place,
    /// The place whose address is taken.
    place: Place,
  },
  /// Convert between numeric (or enum) representations: `dst = src as T`.
  Cast {
    /// The destination, carrying the target type.
    dst: Place,
    /// The converted value.
    src: Operand,
  },
  /// Load through a pointer-like place: `dst = *src`.
  Load {
    /// The destination.
    dst: Place,
    /// The source, a pointer-like place.
    src: Place,
  },
  /// Store through a pointer-like place: `*dst = val`.
  Store {
    /// The destination, a pointer-like place.
    dst: Place,
    /// The stored value.
    val: Operand,
  },
  /// Construct a union value with the given member tag.
  TagNew {
    /// The destination, of union type.
    dst: Place,
    /// The member index.
    member: u32,
    /// The payload values.
    args: Box<[Operand]>,
  },
  /// Load the integer discriminant of a union value.
  TagLoad {
    /// The destination, of integer type.
    dst: Place,
    /// The union place.
    src: Place,
  },
  /// Test whether a union value carries the given member.
  TagTest {
    /// The destination, of boolean type.
    dst: Place,
    /// The union place.
    src: Place,
    /// The member index.
    member: u32,
  },
  /// Extract one payload value of a union member.
  TagGet {
    /// The destination.
    dst: Place,
    /// The union place.
    src: Place,
    /// The member index.
    member: u32,
    /// The payload position.
    index: u32,
  },
  /// A suspension point in an async function, rewritten into a state save
  /// and return by the async lowering pass.
  Suspend(u32),
  /// The matching resume label: execution continues here when the scheduler
  /// re-enters the state machine. Consumed by the async lowering pass.
  Resume(u32),
}

impl fmt::Display for Inst {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Inst::Assign(p, op) => write!(f, "{p} = {op}"),
      Inst::Binop(p, op, a, b) => write!(f, "{p} = {op:?}({a}, {b})"),
      Inst::Unop(p, op, a) => write!(f, "{p} = {op:?}({a})"),
      Inst::Call { dst: Some(p), name, args, .. } => {
        write!(f, "{p} = {name}(")?;
        write_args(f, args)
      }
      Inst::Call { dst: None, name, args, .. } => {
        write!(f, "{name}(")?;
        write_args(f, args)
      }
      Inst::Ref { dst, place } => write!(f, "{dst} = &{place}"),
      Inst::Cast { dst, src } => write!(f, "{dst} = cast {src}"),
      Inst::Load { dst, src } => write!(f, "{dst} = load {src}"),
      Inst::Store { dst, val } => write!(f, "store {dst} = {val}"),
      Inst::TagNew { dst, member, args } => {
        write!(f, "{dst} = tag #{member}(")?;
        write_args(f, args)
      }
      Inst::TagLoad { dst, src } => write!(f, "{dst} = tagof {src}"),
      Inst::TagTest { dst, src, member } => write!(f, "{dst} = {src} is #{member}"),
      Inst::TagGet { dst, src, member, index } =>
        write!(f, "{dst} = payload {src} #{member}.{index}"),
      Inst::Suspend(state) => write!(f, "suspend {state}"),
      Inst::Resume(state) => write!(f, "resume {state}"),
    }
  }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Operand]) -> fmt::Result {
  for (i, a) in args.iter().enumerate() {
    if i != 0 { write!(f, ", ")? }
    write!(f, "{a}")?;
  }
  write!(f, ")")
}

/// The final statement of a block, determining where control goes next.
#[derive(Clone, Debug)]
pub enum Terminator {
  /// Unconditional jump.
  Goto(BlockId),
  /// Two-way branch on a boolean operand.
  Branch(Operand, BlockId, BlockId),
  /// Multi-way switch on an integer operand.
  Switch {
    /// The scrutinee.
    scrut: Operand,
    /// `(value, target)` cases.
    cases: Vec<(u64, BlockId)>,
    /// Where to go when no case matches.
    default: BlockId,
  },
  /// Return from the function.
  Return(Option<Operand>),
  /// The block cannot be reached.
  Unreachable,
}

impl Terminator {
  /// The successor blocks, in case order.
  #[must_use] pub fn successors(&self) -> Vec<BlockId> {
    match self {
      Terminator::Goto(b) => vec![*b],
      Terminator::Branch(_, t, e) => vec![*t, *e],
      Terminator::Switch { cases, default, .. } => {
        let mut out: Vec<_> = cases.iter().map(|&(_, b)| b).collect();
        out.push(*default);
        out
      }
      Terminator::Return(_) | Terminator::Unreachable => vec![],
    }
  }

  /// Rewrite every successor through `f`.
  pub fn map_successors(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
    match self {
      Terminator::Goto(b) => *b = f(*b),
      Terminator::Branch(_, t, e) => { *t = f(*t); *e = f(*e) }
      Terminator::Switch { cases, default, .. } => {
        for (_, b) in cases { *b = f(*b) }
        *default = f(*default);
      }
      Terminator::Return(_) | Terminator::Unreachable => {}
    }
  }
}

impl fmt::Display for Terminator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Terminator::Goto(b) => write!(f, "goto -> {b}"),
      Terminator::Branch(c, t, e) => write!(f, "branch {c} -> [{t}, {e}]"),
      Terminator::Switch { scrut, cases, default } => {
        write!(f, "switch {scrut} -> [")?;
        for (v, b) in cases { write!(f, "{v}: {b}, ")? }
        write!(f, "otherwise: {default}]")
      }
      Terminator::Return(Some(op)) => write!(f, "return {op}"),
      Terminator::Return(None) => write!(f, "return"),
      Terminator::Unreachable => write!(f, "unreachable"),
    }
  }
}

/// A basic block: instructions plus a terminator. The terminator is optional
/// only during construction; a finished function has one in every block.
#[derive(Clone, Debug, Default)]
pub struct Block {
  /// The instructions, in execution order.
  pub insts: Vec<Inst>,
  /// The terminator.
  pub term: Option<Terminator>,
}

impl Block {
  /// Finish the block. It is a bug to terminate a block twice.
  pub fn terminate(&mut self, term: Terminator) {
    assert!(mem::replace(&mut self.term, Some(term)).is_none(), "block already terminated");
  }

  /// The terminator of a finished block.
  #[must_use] pub fn terminator(&self) -> &Terminator {
    self.term.as_ref().expect("unterminated block")
  }
}

/// A lowered function.
#[derive(Debug)]
pub struct Func {
  /// The declaring symbol.
  pub sym: SymbolId,
  /// The function name.
  pub name: Symbol,
  /// The local slots; parameters come first.
  pub locals: Vec<Local>,
  /// The parameter locals.
  pub params: Vec<LocalId>,
  /// The result type.
  pub result: TypeId,
  /// The basic blocks.
  pub blocks: Vec<Block>,
  /// Whether the function was declared async. Cleared by the state-machine
  /// lowering once the rewrite is done.
  pub is_async: bool,
}

impl Index<BlockId> for Func {
  type Output = Block;
  fn index(&self, id: BlockId) -> &Block { &self.blocks[id.into_usize()] }
}
impl IndexMut<BlockId> for Func {
  fn index_mut(&mut self, id: BlockId) -> &mut Block { &mut self.blocks[id.into_usize()] }
}

impl Func {
  /// Start a new empty block, returning its id.
  pub fn new_block(&mut self) -> BlockId {
    let id = BlockId::from_usize(self.blocks.len());
    self.blocks.push(Block::default());
    id
  }

  /// Allocate a local slot.
  pub fn new_local(&mut self, ty: TypeId, flags: LocalFlags) -> LocalId {
    let id = LocalId::from_usize(self.locals.len());
    self.locals.push(Local { ty, flags });
    id
  }

  /// Iterate block ids with the entry first, then the rest in id order.
  pub fn block_order(&self) -> impl Iterator<Item = BlockId> + '_ {
    std::iter::once(BlockId::ENTRY).chain(
      (0..self.blocks.len()).map(BlockId::from_usize).filter(|&b| b != BlockId::ENTRY))
  }
}

impl fmt::Display for Func {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "fn {}(", self.name)?;
    for (i, &p) in self.params.iter().enumerate() {
      if i != 0 { write!(f, ", ")? }
      write!(f, "{p}")?;
    }
    writeln!(f, ") {{")?;
    for b in self.block_order() {
      writeln!(f, "{b}:")?;
      for inst in &self[b].insts {
        writeln!(f, "  {inst}")?;
      }
      match &self[b].term {
        Some(t) => writeln!(f, "  {t}")?,
        None => writeln!(f, "  <unterminated>")?,
      }
    }
    writeln!(f, "}}")
  }
}

/// A module of lowered functions.
#[derive(Debug, Default)]
pub struct Module {
  /// The functions.
  pub funcs: Vec<Func>,
  /// Function index by symbol.
  pub by_sym: HashMap<SymbolId, FuncId>,
}

impl Module {
  /// Append a function, indexing it by symbol.
  pub fn push(&mut self, f: Func) -> FuncId {
    let id = FuncId::from_usize(self.funcs.len());
    self.by_sym.insert(f.sym, id);
    self.funcs.push(f);
    id
  }

  /// A function by symbol.
  #[must_use] pub fn get(&self, sym: SymbolId) -> Option<&Func> {
    self.by_sym.get(&sym).map(|&i| &self[i])
  }
}

impl Index<FuncId> for Module {
  type Output = Func;
  fn index(&self, id: FuncId) -> &Func { &self.funcs[id.into_usize()] }
}
impl IndexMut<FuncId> for Module {
  fn index_mut(&mut self, id: FuncId) -> &mut Func { &mut self.funcs[id.into_usize()] }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for func in &self.funcs {
      write!(f, "{func}")?;
    }
    Ok(())
  }
}
