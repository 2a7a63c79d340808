//! End-to-end pipeline scenarios: programs are built as AST arenas the way
//! the external parser would produce them, then pushed through `diagnose`.

use num::BigInt;
use surgec::{Cancel, DiagnoseOptions, FileSet, diagnose};
use surgec::diag::DiagCode;
use surgec::layout::{LayoutEngine, LayoutErrorKind, TargetSpec};
use surgec::symbol::{Symbol, intern};
use surgec::types::{FileSpan, Spanned};
use surgec::types::ast::{
  AstBuilder, Attr, CompareArm, ExprId, ExprKind, FieldDef, FnDef, ItemKind, Literal,
  MemberDef, ParamDef, PatKind, StmtKind, TyExprId, TyExprKind, TypeParam,
};
use surgec::types::entity::SymbolKind;
use surgec::types::ty::{Mutability, NominalKey};

/// A tiny program builder: one source file, spans handed out sequentially
/// so every declaration site is distinct.
struct Prog {
  files: FileSet,
  ast: AstBuilder,
  pos: u32,
}

impl Prog {
  fn new() -> Self {
    let mut files = FileSet::default();
    let file = files.add("/proj/src/main.sg", String::new());
    Self { files, ast: AstBuilder::new(file), pos: 0 }
  }

  fn sp(&mut self) -> FileSpan {
    self.pos += 2;
    FileSpan::new(self.ast.file, self.pos - 2..self.pos - 1)
  }

  fn named_ty(&mut self, name: &str) -> TyExprId {
    let sp = self.sp();
    self.ast.push_ty(sp, TyExprKind::Name { name: intern(name), args: Box::new([]) })
  }

  fn generic_ty(&mut self, name: &str, args: Box<[TyExprId]>) -> TyExprId {
    let sp = self.sp();
    self.ast.push_ty(sp, TyExprKind::Name { name: intern(name), args })
  }

  fn lit_ty(&mut self, n: i64) -> TyExprId {
    let sp = self.sp();
    self.ast.push_ty(sp, TyExprKind::Lit(BigInt::from(n)))
  }

  fn int_lit(&mut self, n: i64) -> ExprId {
    let sp = self.sp();
    self.ast.push_expr(sp, ExprKind::Lit(Literal::Int(BigInt::from(n))))
  }

  fn name(&mut self, s: &str) -> ExprId {
    let sp = self.sp();
    self.ast.push_expr(sp, ExprKind::Name(intern(s)))
  }

  fn block(&mut self, stmts: Vec<surgec::types::ast::StmtId>, tail: Option<ExprId>) -> ExprId {
    let sp = self.sp();
    self.ast.push_expr(sp, ExprKind::Block { stmts: stmts.into(), tail })
  }

  fn param(&mut self, name: &str, ty: TyExprId) -> ParamDef {
    ParamDef {
      name: intern(name), ty, variadic: false, default: None,
      allow_to: false, is_self: false, span: self.sp(),
    }
  }

  fn const_param(&mut self, name: &str) -> TypeParam {
    let int = self.named_ty("int");
    TypeParam { name: intern(name), is_const: true, const_ty: Some(int), span: self.sp() }
  }

  fn push_fn(
    &mut self, name: &str, attrs: Box<[Spanned<Attr>]>, generics: Box<[TypeParam]>,
    params: Box<[ParamDef]>, result: Option<TyExprId>, body: ExprId,
  ) {
    let sp = self.sp();
    self.ast.push_item(sp, ItemKind::Fn(FnDef {
      name: intern(name), public: false, attrs, generics, params, result,
      body: Some(body), is_async: false,
    }));
  }

  /// `@entrypoint fn main() -> int { return 0; }`
  fn push_main(&mut self) {
    let zero = self.int_lit(0);
    let sp = self.sp();
    let ret = self.ast.push_stmt(sp, StmtKind::Return(Some(zero)));
    let body = self.block(vec![ret], None);
    let int = self.named_ty("int");
    let at = self.sp();
    self.push_fn("main", Box::new([Spanned::new(at, Attr::Entrypoint)]),
      Box::new([]), Box::new([]), Some(int), body);
  }

  fn run(self) -> surgec::DiagnoseResult {
    diagnose(&self.files, vec![self.ast], &DiagnoseOptions::default(), &Cancel::new())
      .expect("pipeline runs")
  }
}

fn type_of(result: &surgec::DiagnoseResult, name: &str) -> surgec::types::ty::TypeId {
  let sym = result.symbols
    .lookup_kind(intern(name), |k| k == SymbolKind::Type)
    .next().expect("type is declared");
  result.symbols.get(sym).ty
}

fn field(name: &str, ty: TyExprId) -> FieldDef {
  FieldDef { name: intern(name), ty, attrs: Box::new([]), public: false }
}

#[test]
fn recursive_value_type_is_detected() {
  let mut p = Prog::new();
  // type Node = { next: Node? }
  let node_ref = p.named_ty("Node");
  let sp = p.sp();
  let opt = p.ast.push_ty(sp, TyExprKind::Optional(node_ref));
  let f = field("next", opt);
  let sp = p.sp();
  p.ast.push_item(sp, ItemKind::Struct {
    name: intern("Node"), public: false, attrs: Box::new([]),
    params: Box::new([]), fields: Box::new([f]),
  });
  p.push_main();
  let result = p.run();
  assert!(result.bag.diags().iter().any(|d| d.code == DiagCode::SemaRecursiveUnsized),
    "bag: {:?}", result.bag.diags());

  let node = type_of(&result, "Node");
  let mut eng = LayoutEngine::new(&result.types, TargetSpec::X86_64_LINUX_GNU);
  let err = eng.layout_of(node).expect_err("Node is unsized");
  assert_eq!(err.kind, LayoutErrorKind::RecursiveUnsized);
  assert!(err.cycle.iter().any(|n| n == "Node"), "cycle: {:?}", err.cycle);
}

#[test]
fn reference_field_breaks_recursion() {
  let mut p = Prog::new();
  // type Node = { next: &Node }
  let node_ref = p.named_ty("Node");
  let sp = p.sp();
  let shared = p.ast.push_ty(sp, TyExprKind::Ref(Mutability::Not, node_ref));
  let f = field("next", shared);
  let sp = p.sp();
  p.ast.push_item(sp, ItemKind::Struct {
    name: intern("Node"), public: false, attrs: Box::new([]),
    params: Box::new([]), fields: Box::new([f]),
  });
  p.push_main();
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  let node = type_of(&result, "Node");
  let mut eng = LayoutEngine::new(&result.types, TargetSpec::X86_64_LINUX_GNU);
  let l = eng.layout_of(node).expect("Node is sized");
  assert_eq!((l.size, l.align), (8, 8));
  assert!(result.mir.is_some(), "an error-free run produces validated MIR");
}

#[test]
fn const_generic_identity_by_value() {
  let mut p = Prog::new();
  // const SIZE = 3;
  let three = p.int_lit(3);
  let sp = p.sp();
  p.ast.push_item(sp, ItemKind::Const {
    name: intern("SIZE"), public: false, ty: None, value: three,
  });
  // type Maze<const N: int, const M: int> = {};
  let n = p.const_param("N");
  let m = p.const_param("M");
  let maze_span = p.sp();
  p.ast.push_item(maze_span, ItemKind::Struct {
    name: intern("Maze"), public: false, attrs: Box::new([]),
    params: Box::new([n, m]), fields: Box::new([]),
  });
  // fn use_maze(m: Maze<SIZE, SIZE>) { let x: Maze<3, 3> = m; }
  let s1 = p.named_ty("SIZE");
  let s2 = p.named_ty("SIZE");
  let by_const = p.generic_ty("Maze", Box::new([s1, s2]));
  let param = p.param("m", by_const);
  let l1 = p.lit_ty(3);
  let l2 = p.lit_ty(3);
  let by_lit = p.generic_ty("Maze", Box::new([l1, l2]));
  let init = p.name("m");
  let sp = p.sp();
  let let_stmt = p.ast.push_stmt(sp, StmtKind::Let {
    name: intern("x"), mutable: false, ty: Some(by_lit), init,
  });
  let body = p.block(vec![let_stmt], None);
  p.push_fn("use_maze", Box::new([]), Box::new([]), Box::new([param]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  // both spellings intern to the same instance
  let key = NominalKey::Decl(maze_span);
  let inst = result.types.find_instance(&key, &[], &[BigInt::from(3), BigInt::from(3)]);
  assert!(inst.is_some(), "Maze<3, 3> was instantiated once");
}

#[test]
fn const_generic_rejects_non_const_argument() {
  let mut p = Prog::new();
  // type Maze<const N: int> = {};
  let n = p.const_param("N");
  let sp = p.sp();
  p.ast.push_item(sp, ItemKind::Struct {
    name: intern("Maze"), public: false, attrs: Box::new([]),
    params: Box::new([n]), fields: Box::new([]),
  });
  // fn bad(n: int) { let x: Maze<n> = {}; }
  let int = p.named_ty("int");
  let param = p.param("n", int);
  let arg = p.named_ty("n");
  let maze_n = p.generic_ty("Maze", Box::new([arg]));
  let sp = p.sp();
  let init = p.ast.push_expr(sp, ExprKind::StructLit { ty: None, fields: Box::new([]) });
  let sp = p.sp();
  let let_stmt = p.ast.push_stmt(sp, StmtKind::Let {
    name: intern("x"), mutable: false, ty: Some(maze_n), init,
  });
  let body = p.block(vec![let_stmt], None);
  p.push_fn("bad", Box::new([]), Box::new([]), Box::new([param]), None, body);
  p.push_main();
  let result = p.run();
  let hit = result.bag.diags().iter().find(|d| d.code == DiagCode::SemaTypeMismatch)
    .expect("a type mismatch is reported");
  assert!(hit.message.contains("`n`"), "message names the operand: {}", hit.message);
}

#[test]
fn generic_function_monomorphizes_per_argument_tuple() {
  let mut p = Prog::new();
  // fn id<T>(x: T) -> T { return x; }
  let t_param = TypeParam {
    name: intern("T"), is_const: false, const_ty: None, span: p.sp(),
  };
  let t_ty = p.named_ty("T");
  let x_param = p.param("x", t_ty);
  let t_res = p.named_ty("T");
  let x = p.name("x");
  let sp = p.sp();
  let ret = p.ast.push_stmt(sp, StmtKind::Return(Some(x)));
  let body = p.block(vec![ret], None);
  p.push_fn("id", Box::new([]), Box::new([t_param]), Box::new([x_param]), Some(t_res), body);
  // @entrypoint fn main() -> int { return id(7); }
  let seven = p.int_lit(7);
  let callee = p.name("id");
  let sp = p.sp();
  let call = p.ast.push_expr(sp, ExprKind::Call {
    f: callee, gen_args: Box::new([]), args: Box::new([seven]),
  });
  let sp = p.sp();
  let ret = p.ast.push_stmt(sp, StmtKind::Return(Some(call)));
  let body = p.block(vec![ret], None);
  let int = p.named_ty("int");
  let at = p.sp();
  p.push_fn("main", Box::new([Spanned::new(at, Attr::Entrypoint)]),
    Box::new([]), Box::new([]), Some(int), body);
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  let mir = result.mir.expect("validated MIR");
  assert_eq!(mir.funcs.len(), 2, "main plus exactly one specialization of id");
  let names: Vec<String> = mir.funcs.iter().map(|f| f.name.as_str()).collect();
  assert!(names.iter().any(|n| n.starts_with("id<")), "specialization is mangled: {names:?}");
}

#[test]
fn compare_lowers_to_a_tag_switch() {
  let mut p = Prog::new();
  // union Shape = nothing | circle(int) | rect(int, int)
  let c_arg = p.named_ty("int");
  let r_w = p.named_ty("int");
  let r_h = p.named_ty("int");
  let sp = p.sp();
  p.ast.push_item(sp, ItemKind::Union {
    name: intern("Shape"), public: false, params: Box::new([]),
    members: Box::new([
      MemberDef::Nothing,
      MemberDef::Tag { name: intern("circle"), args: Box::new([c_arg]) },
      MemberDef::Tag { name: intern("rect"), args: Box::new([r_w, r_h]) },
    ]),
  });
  // fn area(s: Shape) -> int { compare s { circle(r) => r, rect(w, h) => w * h } finally 0 }
  let shape = p.named_ty("Shape");
  let s_param = p.param("s", shape);
  let scrut = p.name("s");
  let sp = p.sp();
  let circle_pat = p.ast.push_pat(sp, PatKind::Tag {
    name: intern("circle"), binders: Box::new([intern("r")]),
  });
  let r_body = p.name("r");
  let sp = p.sp();
  let rect_pat = p.ast.push_pat(sp, PatKind::Tag {
    name: intern("rect"), binders: Box::new([intern("w"), intern("h")]),
  });
  let w = p.name("w");
  let h = p.name("h");
  let sp = p.sp();
  let wh = p.ast.push_expr(sp, ExprKind::Binop(surgec::types::Binop::Mul, w, h));
  let finally = p.int_lit(0);
  let sp = p.sp();
  let cmp = p.ast.push_expr(sp, ExprKind::Compare {
    scrut,
    arms: Box::new([
      CompareArm { pat: circle_pat, body: r_body },
      CompareArm { pat: rect_pat, body: wh },
    ]),
    finally: Some(finally),
  });
  let body = p.block(vec![], Some(cmp));
  let int = p.named_ty("int");
  p.push_fn("area", Box::new([]), Box::new([]), Box::new([s_param]), Some(int), body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  let mir = result.mir.expect("validated MIR");
  let area = mir.funcs.iter().find(|f| f.name == intern("area")).expect("area lowered");
  let dump = area.to_string();
  assert!(dump.contains("switch"), "compare becomes a tag switch:\n{dump}");
  assert!(dump.starts_with("fn area"), "{dump}");
}

#[test]
fn ambiguous_overload_leaves_the_call_untyped() {
  let mut p = Prog::new();
  // fn f(x: int) {}  and  fn f<T>(x: T) {}  both match f(1)
  let int = p.named_ty("int");
  let x1 = p.param("x", int);
  let b1 = p.block(vec![], None);
  p.push_fn("f", Box::new([]), Box::new([]), Box::new([x1]), None, b1);
  let t_param = TypeParam {
    name: intern("T"), is_const: false, const_ty: None, span: p.sp(),
  };
  let t_ty = p.named_ty("T");
  let x2 = p.param("x", t_ty);
  let b2 = p.block(vec![], None);
  p.push_fn("f", Box::new([]), Box::new([t_param]), Box::new([x2]), None, b2);

  let one = p.int_lit(1);
  let callee = p.name("f");
  let sp = p.sp();
  let call = p.ast.push_expr(sp, ExprKind::Call {
    f: callee, gen_args: Box::new([]), args: Box::new([one]),
  });
  let sp = p.sp();
  let stmt = p.ast.push_stmt(sp, StmtKind::Expr(call));
  let body = p.block(vec![stmt], None);
  p.push_fn("caller", Box::new([]), Box::new([]), Box::new([]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.diags().iter().any(|d| d.code == DiagCode::SemaAmbiguousOverload),
    "bag: {:?}", result.bag.diags());
  assert!(result.mir.is_none(), "an ambiguous call is an error; no MIR is produced");
}

#[test]
fn async_block_joins_unawaited_local_tasks() {
  use surgec::types::mir::{Inst, Operand, Projection};
  let mut p = Prog::new();
  // fn run() { async { let t = spawn local 1; } }
  let one = p.int_lit(1);
  let sp = p.sp();
  let spawned = p.ast.push_expr(sp, ExprKind::Spawn { local: true, body: one });
  let sp = p.sp();
  let let_t = p.ast.push_stmt(sp, StmtKind::Let {
    name: intern("t"), mutable: false, ty: None, init: spawned,
  });
  let inner = p.block(vec![let_t], None);
  let sp = p.sp();
  let ablock = p.ast.push_expr(sp, ExprKind::Async { body: inner });
  let sp = p.sp();
  let stmt = p.ast.push_stmt(sp, StmtKind::Expr(ablock));
  let body = p.block(vec![stmt], None);
  p.push_fn("run", Box::new([]), Box::new([]), Box::new([]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  let mir = result.mir.expect("validated MIR");
  let run = mir.funcs.iter().find(|f| f.name == intern("run")).expect("run lowered");
  // the implicit join reads the task's settled value out of the handle;
  // the spawn itself only writes into it
  let joins = run.blocks.iter()
    .flat_map(|b| &b.insts)
    .filter(|i| matches!(i, Inst::Assign(_, Operand::Copy(pl))
      if matches!(pl.proj.first(), Some(Projection::Field(0)))))
    .count();
  assert_eq!(joins, 1, "the unawaited local task is joined at block exit:\n{run}");
}

#[test]
fn async_block_skips_joining_awaited_tasks() {
  use surgec::types::mir::Inst;
  let mut p = Prog::new();
  // fn run() { async { let t = spawn local 1; let v = await t; } }
  let one = p.int_lit(1);
  let sp = p.sp();
  let spawned = p.ast.push_expr(sp, ExprKind::Spawn { local: true, body: one });
  let sp = p.sp();
  let let_t = p.ast.push_stmt(sp, StmtKind::Let {
    name: intern("t"), mutable: false, ty: None, init: spawned,
  });
  let t_ref = p.name("t");
  let sp = p.sp();
  let awaited = p.ast.push_expr(sp, ExprKind::Await(t_ref));
  let sp = p.sp();
  let let_v = p.ast.push_stmt(sp, StmtKind::Let {
    name: intern("v"), mutable: false, ty: None, init: awaited,
  });
  let inner = p.block(vec![let_t, let_v], None);
  let sp = p.sp();
  let ablock = p.ast.push_expr(sp, ExprKind::Async { body: inner });
  let sp = p.sp();
  let stmt = p.ast.push_stmt(sp, StmtKind::Expr(ablock));
  let body = p.block(vec![stmt], None);
  p.push_fn("run", Box::new([]), Box::new([]), Box::new([]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.is_empty(), "bag: {:?}", result.bag.diags());

  let mir = result.mir.expect("validated MIR");
  let run = mir.funcs.iter().find(|f| f.name == intern("run")).expect("run lowered");
  let reads = run.blocks.iter()
    .flat_map(|b| &b.insts)
    .filter(|i| matches!(i, Inst::Assign(_, op)
      if matches!(op, surgec::types::mir::Operand::Copy(pl)
        if matches!(pl.proj.first(), Some(surgec::types::mir::Projection::Field(0))))))
    .count();
  assert_eq!(reads, 1, "only the explicit await reads the handle; no double join:\n{run}");
}

#[test]
fn moved_value_use_is_reported() {
  let mut p = Prog::new();
  // fn consume(s: string) {}  fn twice(s: string) { consume(s); consume(s); }
  let st = p.named_ty("string");
  let s_param = p.param("s", st);
  let empty = p.block(vec![], None);
  p.push_fn("consume", Box::new([]), Box::new([]), Box::new([s_param]), None, empty);

  let st2 = p.named_ty("string");
  let s2 = p.param("s", st2);
  let mut stmts = vec![];
  for _ in 0..2 {
    let callee = p.name("consume");
    let arg = p.name("s");
    let sp = p.sp();
    let call = p.ast.push_expr(sp, ExprKind::Call {
      f: callee, gen_args: Box::new([]), args: Box::new([arg]),
    });
    let sp = p.sp();
    stmts.push(p.ast.push_stmt(sp, StmtKind::Expr(call)));
  }
  let body = p.block(stmts, None);
  p.push_fn("twice", Box::new([]), Box::new([]), Box::new([s2]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.diags().iter().any(|d| d.code == DiagCode::SemaMovedValueUse),
    "bag: {:?}", result.bag.diags());
}

#[test]
fn nonblocking_function_cannot_wait() {
  let mut p = Prog::new();
  // fn sleepy() {}  (declared blocking via @waits_on)
  let sp = p.sp();
  let empty = p.block(vec![], None);
  p.push_fn("sleepy",
    Box::new([Spanned::new(sp, Attr::WaitsOn(intern("io")))]),
    Box::new([]), Box::new([]), None, empty);
  // @nonblocking fn fast() { sleepy(); }
  let callee = p.name("sleepy");
  let sp = p.sp();
  let call = p.ast.push_expr(sp, ExprKind::Call {
    f: callee, gen_args: Box::new([]), args: Box::new([]),
  });
  let sp = p.sp();
  let stmt = p.ast.push_stmt(sp, StmtKind::Expr(call));
  let body = p.block(vec![stmt], None);
  let at = p.sp();
  p.push_fn("fast", Box::new([Spanned::new(at, Attr::Nonblocking)]),
    Box::new([]), Box::new([]), None, body);
  p.push_main();
  let result = p.run();
  assert!(result.bag.diags().iter()
    .any(|d| d.code == DiagCode::SemaLockNonblockingCallsWait),
    "bag: {:?}", result.bag.diags());
}

#[test]
fn golden_rendering_names_code_and_path() {
  let mut p = Prog::new();
  let sp = p.sp();
  let bad = p.ast.push_expr(sp, ExprKind::Name(intern("missing")));
  let sp = p.sp();
  let stmt = p.ast.push_stmt(sp, StmtKind::Expr(bad));
  let body = p.block(vec![stmt], None);
  p.push_fn("f", Box::new([]), Box::new([]), Box::new([]), None, body);
  p.push_main();
  let result = p.run();
  let mut files = FileSet::default();
  files.add("/proj/src/main.sg", String::new());
  let out = result.bag.render_short(&files, Some(std::path::Path::new("/proj")));
  assert!(out.contains("error SEM3002 src/main.sg"), "{out}");
}

#[test]
fn symbols_intern_stably() {
  let a: Symbol = intern("stable");
  assert_eq!(a, intern("stable"));
}
