//! The semantic analyzer: resolves type expressions, checks every
//! expression and statement, enforces ownership and concurrency rules,
//! instantiates generics on demand, and records instantiation sites for the
//! monomorphizer.

use std::rc::Rc;
use hashbrown::HashMap;
use num::BigInt;
use smallvec::SmallVec;
use crate::{FileId, FileSet, Idx};
use crate::diag::{DiagCode, Diagnostic, Reporter};
use crate::layout::{LayoutEngine, LayoutErrorKind, TargetSpec};
use crate::symbol::{Symbol, intern};
use crate::types::{
  Binop, FileSpan, IntTy, RuleResult, Size, Spanned, TyFamily, Unop,
  binary_specs, unary_spec_for,
};
use crate::types::ast::{
  AstBuilder, Attr, CompareArm, ExprId, ExprKind, FnDef, ItemId, ItemKind, Literal,
  MemberDef, PatKind, StmtId, StmtKind, TyExprId, TyExprKind, TypeParam,
};
use crate::types::entity::{
  BlockingMethod, PrimGeneric, PrimType, SymbolFlags, SymbolId, SymbolKind, SymbolTable,
  Visibility,
};
use crate::types::hir::{self, InstantiationMap, VarId};
use crate::types::ty::{
  EnumValue, EnumVariant, FieldAttrs, FieldInfo, LayoutAttrs, Mutability, NominalKey,
  TypeId, TypeKind, TypeStore, UnionMember,
};

/// The resolved signature of a function, computed by the declare pass.
#[derive(Clone, Debug, Default)]
pub struct FnSig {
  /// Generic parameters, as `Generic` type ids.
  pub generics: Box<[TypeId]>,
  /// Parameter types.
  pub params: Box<[TypeId]>,
  /// Per-parameter flags `(variadic, has_default, allow_to)`.
  pub param_flags: Box<[(bool, bool, bool)]>,
  /// The result type.
  pub result: TypeId,
}

impl FnSig {
  /// The minimum number of arguments a call must pass.
  #[must_use] pub fn min_args(&self) -> usize {
    self.param_flags.iter().filter(|&&(v, d, _)| !v && !d).count()
  }

  /// Whether the last parameter is a variadic tail.
  #[must_use] pub fn variadic(&self) -> bool {
    self.param_flags.last().is_some_and(|&(v, _, _)| v)
  }
}

/// The semantic analyzer. One per compilation; [`Analyzer::declare`] runs
/// once over all files, then [`Analyzer::check_file`] per file.
pub struct Analyzer<'a> {
  types: &'a mut TypeStore,
  symbols: &'a mut SymbolTable,
  files: &'a FileSet,
  item_syms: &'a HashMap<(FileId, ItemId), SymbolId>,
  insts: InstantiationMap,
  /// Declared nominal types, for the layout check.
  declared: Vec<(SymbolId, TypeId)>,
  /// Resolved function signatures.
  fn_sigs: HashMap<SymbolId, FnSig>,
  /// Evaluated integer constants.
  const_vals: HashMap<SymbolId, BigInt>,
  /// Reverse map from declared nominal types to their symbols, for
  /// visibility checks.
  type_syms: HashMap<TypeId, SymbolId>,
}

impl<'a> Analyzer<'a> {
  /// Create an analyzer over shared compilation state.
  pub fn new(
    types: &'a mut TypeStore, symbols: &'a mut SymbolTable, files: &'a FileSet,
    item_syms: &'a HashMap<(FileId, ItemId), SymbolId>,
  ) -> Self {
    Self {
      types, symbols, files, item_syms,
      insts: InstantiationMap::default(),
      declared: vec![],
      fn_sigs: HashMap::new(),
      const_vals: HashMap::new(),
      type_syms: HashMap::new(),
    }
  }

  /// Consume the analyzer, returning the recorded instantiations.
  #[must_use] pub fn finish(self) -> InstantiationMap { self.insts }

  fn item_sym(&self, file: FileId, item: ItemId) -> Option<SymbolId> {
    self.item_syms.get(&(file, item)).copied()
  }

  // ---------------------------------------------------------------------
  // Declare pass

  /// Register every nominal type, resolve field/member/target types, and
  /// compute function signatures. Must run before any body is checked.
  pub fn declare(&mut self, asts: &[&AstBuilder], rep: &mut impl Reporter) {
    // phase 1: create the definition types so names resolve in any order
    for ast in asts {
      log::debug!("declaring items in {}", self.files.path(ast.file).display());
      for (id, item) in ast.items() {
        self.register_item(ast, id, item.span, &item.k);
      }
    }
    // phase 2: resolve the types the declarations mention
    for ast in asts {
      for (id, item) in ast.items() {
        self.populate_item(ast, id, item.span, &item.k, rep);
      }
    }
    self.compute_copy_marks();
  }

  fn register_item(&mut self, ast: &AstBuilder, id: ItemId, span: FileSpan, item: &ItemKind) {
    let Some(sym) = self.item_sym(ast.file, id) else { return };
    match item {
      ItemKind::Struct { name, attrs, params, .. } => {
        let tparams = self.register_params(ast, sym, params);
        let ty = self.types.register_struct(*name, NominalKey::Decl(span), tparams);
        self.types.set_type_layout_attrs(ty, layout_attrs(attrs));
        self.bind_type(sym, ty);
      }
      ItemKind::Union { name, params, .. } => {
        let tparams = self.register_params(ast, sym, params);
        let ty = self.types.register_union(*name, NominalKey::Decl(span), tparams);
        self.bind_type(sym, ty);
      }
      ItemKind::Alias { name, params, .. } => {
        let tparams = self.register_params(ast, sym, params);
        let ty = self.types.register_alias(*name, NominalKey::Decl(span), tparams);
        self.bind_type(sym, ty);
      }
      ItemKind::Enum { name, base, variants, .. } => {
        let base = base.and_then(|b| prim_int(ast, b))
          .unwrap_or(IntTy::Int(Size::S32));
        let mut next = BigInt::from(0);
        let vars = variants.iter().map(|v| {
          let value = match v.value.map(|e| &ast[e].k) {
            Some(ExprKind::Lit(Literal::Int(n))) => {
              next = n.clone() + 1;
              EnumValue::Int(n.clone())
            }
            Some(ExprKind::Lit(Literal::Str(s))) => EnumValue::Str(intern(s)),
            _ => {
              let n = next.clone();
              next += 1;
              EnumValue::Int(n)
            }
          };
          EnumVariant { name: v.name, value }
        }).collect();
        let ty = self.types.register_enum(*name, NominalKey::Decl(span), base, vars);
        self.bind_type(sym, ty);
      }
      ItemKind::Fn(_) | ItemKind::Const { .. } | ItemKind::Import { .. } => {}
    }
  }

  fn bind_type(&mut self, sym: SymbolId, ty: TypeId) {
    self.symbols.get_mut(sym).ty = ty;
    self.declared.push((sym, ty));
    self.type_syms.insert(ty, sym);
  }

  fn register_params(
    &mut self, ast: &AstBuilder, owner: SymbolId, params: &[TypeParam],
  ) -> Box<[TypeId]> {
    params.iter().enumerate().map(|(i, p)| {
      let const_ty = p.const_ty
        .and_then(|t| prim_int(ast, t))
        .map_or(TypeId::NONE, |ity| self.types.builtins.int_ty(ity));
      let const_ty = if p.is_const && !const_ty.exists() {
        self.types.builtins.int(Size::Any)
      } else { const_ty };
      self.types.register_type_param(
        p.name, owner, i.try_into().expect("too many params"), p.is_const, const_ty)
    }).collect()
  }

  fn populate_item(
    &mut self, ast: &AstBuilder, id: ItemId, span: FileSpan, item: &ItemKind,
    rep: &mut impl Reporter,
  ) {
    let Some(sym) = self.item_sym(ast.file, id) else { return };
    let public = self.symbols.get(sym).vis == Visibility::Public;
    match item {
      ItemKind::Struct { params, fields, .. } => {
        let scope = self.param_scope(sym, params);
        let ty = self.symbols.get(sym).ty;
        let fs = fields.iter().map(|f| FieldInfo {
          name: f.name,
          ty: self.resolve_ty(ast, f.ty, &scope, rep),
          attrs: if f.public { FieldAttrs::PUB } else { FieldAttrs::empty() },
          layout: layout_attrs(&f.attrs),
        }).collect::<Box<[_]>>();
        if public {
          for f in &fs { self.check_exported_ty(f.ty, span, rep) }
        }
        self.types.set_struct_fields(ty, fs);
      }
      ItemKind::Union { params, members, .. } => {
        let scope = self.param_scope(sym, params);
        let ty = self.symbols.get(sym).ty;
        let ms = members.iter().map(|m| match m {
          MemberDef::Value(t) => UnionMember::Value(self.resolve_ty(ast, *t, &scope, rep)),
          MemberDef::Nothing => UnionMember::Nothing,
          MemberDef::Tag { name, args } => UnionMember::Tag(*name,
            args.iter().map(|&t| self.resolve_ty(ast, t, &scope, rep)).collect()),
        }).collect::<Box<[_]>>();
        if public {
          for m in &ms {
            match m {
              UnionMember::Value(t) => self.check_exported_ty(*t, span, rep),
              UnionMember::Nothing => {}
              UnionMember::Tag(_, args) =>
                for &t in args { self.check_exported_ty(t, span, rep) },
            }
          }
        }
        self.types.set_union_members(ty, ms);
      }
      ItemKind::Alias { params, target, .. } => {
        let scope = self.param_scope(sym, params);
        let ty = self.symbols.get(sym).ty;
        let tgt = self.resolve_ty(ast, *target, &scope, rep);
        if public { self.check_exported_ty(tgt, span, rep) }
        self.types.set_alias_target(ty, tgt);
      }
      ItemKind::Enum { .. } | ItemKind::Import { .. } => {}
      ItemKind::Fn(f) => {
        let scope = self.param_scope(sym, &f.generics);
        let generics: Box<[TypeId]> = f.generics.iter().enumerate().map(|(i, _)| {
          *scope.get(&f.generics[i].name).expect("param just registered")
        }).collect();
        let params: Box<[TypeId]> =
          f.params.iter().map(|p| self.resolve_ty(ast, p.ty, &scope, rep)).collect();
        let param_flags = f.params.iter()
          .map(|p| (p.variadic, p.default.is_some(), p.allow_to))
          .collect();
        let result = f.result
          .map_or(self.types.builtins.unit, |r| self.resolve_ty(ast, r, &scope, rep));
        if public {
          for &p in &params { self.check_exported_ty(p, span, rep) }
          self.check_exported_ty(result, span, rep);
        }
        let fn_ty = self.types.intern(TypeKind::Fn(params.clone(), result));
        self.symbols.get_mut(sym).ty = fn_ty;
        self.fn_sigs.insert(sym, FnSig { generics, params, param_flags, result });
      }
      ItemKind::Const { ty, value, .. } => {
        let scope = HashMap::new();
        let declared = ty.map(|t| self.resolve_ty(ast, t, &scope, rep));
        if let Some(n) = self.eval_const(ast, *value) {
          let cty = declared.unwrap_or_else(|| self.types.builtins.int(Size::Any));
          self.symbols.get_mut(sym).ty = cty;
          self.const_vals.insert(sym, n);
        } else if let Some(t) = declared {
          self.symbols.get_mut(sym).ty = t;
        }
      }
    }
  }

  /// A `pub` declaration may not expose a private type in its surface.
  fn check_exported_ty(&mut self, ty: TypeId, span: FileSpan, rep: &mut impl Reporter) {
    let canon = self.types.resolve_alias(ty);
    if let Some(&sym) = self.type_syms.get(&canon) {
      let data = self.symbols.get(sym);
      if data.vis == Visibility::Private {
        rep.report(Diagnostic::error(
          DiagCode::SynVisibilityReduction, span,
          format!("public declaration exposes private type `{}`", data.name),
        ));
      }
    }
  }

  /// Mark user structs and unions whose contents are all copy types, so
  /// `is_copy` answers for them too. Runs to a fixpoint to handle types
  /// that mention each other.
  fn compute_copy_marks(&mut self) {
    loop {
      let mut changed = false;
      for &(_, ty) in &self.declared {
        if self.types.is_copy(ty) { continue }
        let all_copy = match self.types.lookup(ty) {
          Some(&TypeKind::Struct(s)) => {
            let tys: Vec<TypeId> =
              self.types.struct_info(s).fields.iter().map(|f| f.ty).collect();
            tys.iter().all(|&t| self.types.is_copy(t))
          }
          Some(&TypeKind::Union(u)) => {
            let members = self.types.union_info(u).members.to_vec();
            members.iter().all(|m| match m {
              UnionMember::Value(t) => self.types.is_copy(*t),
              UnionMember::Nothing => true,
              UnionMember::Tag(_, args) => args.iter().all(|&t| self.types.is_copy(t)),
            })
          }
          _ => false,
        };
        if all_copy {
          self.types.mark_copy(ty);
          changed = true;
        }
      }
      if !changed { break }
    }
  }

  /// Run the layout engine over every declared nominal type, reporting
  /// recursive value types.
  pub fn check_layouts(&mut self, target: &TargetSpec, rep: &mut impl Reporter) {
    let mut eng = LayoutEngine::new(self.types, *target);
    for &(sym, ty) in &self.declared {
      if let Err(err) = eng.layout_of(ty) {
        if err.kind == LayoutErrorKind::RecursiveUnsized {
          let data = self.symbols.get(sym);
          rep.report(Diagnostic::error(
            DiagCode::SemaRecursiveUnsized, data.span,
            format!("type `{}` contains itself without indirection: {}",
              data.name, err.cycle.join(" -> ")),
          ));
        }
      }
    }
  }

  fn param_scope(&mut self, owner: SymbolId, params: &[TypeParam]) -> HashMap<Symbol, TypeId> {
    params.iter().enumerate().map(|(i, p)| {
      let id = self.types.register_type_param(
        p.name, owner, i.try_into().expect("too many params"), p.is_const, TypeId::NONE);
      (p.name, id)
    }).collect()
  }

  fn eval_const(&self, ast: &AstBuilder, e: ExprId) -> Option<BigInt> {
    match &ast[e].k {
      ExprKind::Lit(Literal::Int(n)) => Some(n.clone()),
      ExprKind::Unop(Unop::Neg, e) => self.eval_const(ast, *e).map(|n| -n),
      ExprKind::Name(name) => {
        let sym = self.symbols
          .lookup_kind(*name, |k| k == SymbolKind::Const)
          .next()?;
        self.const_vals.get(&sym).cloned()
      }
      _ => None,
    }
  }

  // ---------------------------------------------------------------------
  // Type expression resolution

  /// Resolve a type expression to an interned type, reporting on failure
  /// and returning [`TypeId::NONE`].
  fn resolve_ty(
    &mut self, ast: &AstBuilder, ty: TyExprId, scope: &HashMap<Symbol, TypeId>,
    rep: &mut impl Reporter,
  ) -> TypeId {
    let span = ast[ty].span;
    match &ast[ty].k.clone() {
      TyExprKind::Unit => self.types.builtins.unit,
      TyExprKind::Lit(_) => {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span, "expected a type, found a constant"));
        TypeId::NONE
      }
      TyExprKind::Ref(mutbl, t) => {
        let t = self.resolve_ty(ast, *t, scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.types.intern(TypeKind::Ref(*mutbl, t))
      }
      TyExprKind::Own(t) => {
        let t = self.resolve_ty(ast, *t, scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.types.intern(TypeKind::Own(t))
      }
      TyExprKind::Ptr(t) => {
        let t = self.resolve_ty(ast, *t, scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.types.intern(TypeKind::Ptr(t))
      }
      TyExprKind::Array { elem, len } => {
        let t = self.resolve_ty(ast, *elem, scope, rep);
        if !t.exists() { return TypeId::NONE }
        match len {
          None => self.types.intern(TypeKind::Array(t)),
          Some(n) => match self.eval_const(ast, *n) {
            Some(n) => self.fixed_array(t, n),
            None => {
              rep.report(Diagnostic::error(
                DiagCode::SemaTypeMismatch, span,
                "fixed array length must be a constant"));
              TypeId::NONE
            }
          },
        }
      }
      TyExprKind::Tuple(ts) => {
        let elems: Box<[TypeId]> =
          ts.iter().map(|&t| self.resolve_ty(ast, t, scope, rep)).collect();
        if elems.iter().any(|t| !t.exists()) { return TypeId::NONE }
        self.types.intern(TypeKind::Tuple(elems))
      }
      TyExprKind::Fn { params, result } => {
        let ps: Box<[TypeId]> =
          params.iter().map(|&t| self.resolve_ty(ast, t, scope, rep)).collect();
        let r = self.resolve_ty(ast, *result, scope, rep);
        if ps.iter().any(|t| !t.exists()) || !r.exists() { return TypeId::NONE }
        self.types.intern(TypeKind::Fn(ps, r))
      }
      TyExprKind::Optional(t) => {
        let t = self.resolve_ty(ast, *t, scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.option_of(t)
      }
      TyExprKind::Name { name, args } => self.resolve_named(ast, span, *name, args, scope, rep),
    }
  }

  /// `Option<T>`: a built-in union of `nothing` and a `T` value, shared by
  /// name across modules.
  fn option_of(&mut self, t: TypeId) -> TypeId {
    let name = self.types.builtins.sym_option;
    let key = NominalKey::Builtin(name);
    let (id, fresh) = self.types.register_union_instance(name, key, Box::new([t]));
    if fresh {
      self.types.set_union_members(id,
        Box::new([UnionMember::Nothing, UnionMember::Value(t)]));
    }
    id
  }

  /// `ArrayFixed<T, N>`: the built-in fixed array struct instance.
  fn fixed_array(&mut self, t: TypeId, n: BigInt) -> TypeId {
    let name = self.types.builtins.sym_array_fixed;
    let key = NominalKey::Builtin(name);
    let (id, _) = self.types.register_struct_instance(
      name, key, Box::new([t]), Box::new([n]));
    id
  }

  /// `Array<T>`: the built-in dynamic array.
  fn dyn_array(&mut self, t: TypeId) -> TypeId {
    self.types.intern(TypeKind::Array(t))
  }

  fn resolve_named(
    &mut self, ast: &AstBuilder, span: FileSpan, name: Symbol, args: &[TyExprId],
    scope: &HashMap<Symbol, TypeId>, rep: &mut impl Reporter,
  ) -> TypeId {
    if let Some(&param) = scope.get(&name) {
      return param
    }
    if let Some(prim) = PrimType::from_symbol(name) {
      return prim_type_id(self.types, prim)
    }
    if let Some(g) = PrimGeneric::from_symbol(name) {
      return self.resolve_prim_generic(ast, span, g, args, scope, rep)
    }
    let sym = self.symbols.lookup_kind(name, |k| k == SymbolKind::Type).next();
    let Some(sym) = sym else {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownName, span, format!("unknown type `{name}`")));
      return TypeId::NONE
    };
    let def_ty = self.symbols.get(sym).ty;
    if !def_ty.exists() { return TypeId::NONE }
    let params = self.def_params(def_ty);
    if params.len() != args.len() {
      rep.report(Diagnostic::error(
        DiagCode::SemaGenericArgCount, span,
        format!("`{name}` takes {} generic argument(s), found {}", params.len(), args.len())));
      return TypeId::NONE
    }
    if params.is_empty() { return def_ty }

    // split the argument list into type arguments and const values
    let mut targs: SmallVec<[TypeId; 4]> = SmallVec::new();
    let mut values: Vec<BigInt> = vec![];
    for (&param, &arg) in params.iter().zip(args) {
      let is_const = match self.types.kind(param) {
        &TypeKind::Generic(p) => self.types.param_info(p).is_const,
        _ => false,
      };
      if is_const {
        match self.resolve_const_arg(ast, arg, rep) {
          Some(n) => values.push(n),
          None => return TypeId::NONE,
        }
      } else {
        let t = self.resolve_ty(ast, arg, scope, rep);
        if !t.exists() { return TypeId::NONE }
        targs.push(t);
      }
    }
    let in_fn = None;
    self.insts.record(sym, targs.iter().copied().collect(), span, in_fn);
    self.instantiate(sym, &targs, &values, span, rep)
  }

  fn resolve_prim_generic(
    &mut self, ast: &AstBuilder, span: FileSpan, g: PrimGeneric, args: &[TyExprId],
    scope: &HashMap<Symbol, TypeId>, rep: &mut impl Reporter,
  ) -> TypeId {
    let want = match g {
      PrimGeneric::Array | PrimGeneric::Option => 1,
      PrimGeneric::ArrayFixed | PrimGeneric::Map => 2,
    };
    if args.len() != want {
      rep.report(Diagnostic::error(
        DiagCode::SemaGenericArgCount, span,
        format!("wrong number of generic arguments: expected {want}, found {}", args.len())));
      return TypeId::NONE
    }
    match g {
      PrimGeneric::Array => {
        let t = self.resolve_ty(ast, args[0], scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.dyn_array(t)
      }
      PrimGeneric::Option => {
        let t = self.resolve_ty(ast, args[0], scope, rep);
        if !t.exists() { return TypeId::NONE }
        self.option_of(t)
      }
      PrimGeneric::ArrayFixed => {
        let t = self.resolve_ty(ast, args[0], scope, rep);
        let Some(n) = self.resolve_const_arg(ast, args[1], rep) else { return TypeId::NONE };
        if !t.exists() { return TypeId::NONE }
        self.fixed_array(t, n)
      }
      PrimGeneric::Map => {
        let name = self.types.builtins.sym_map;
        let k = self.resolve_ty(ast, args[0], scope, rep);
        let v = self.resolve_ty(ast, args[1], scope, rep);
        if !k.exists() || !v.exists() { return TypeId::NONE }
        let (id, _) = self.types.register_struct_instance(
          name, NominalKey::Builtin(name), Box::new([k, v]), Box::new([]));
        id
      }
    }
  }

  /// A const-generic argument: an integer literal or a named constant.
  fn resolve_const_arg(
    &mut self, ast: &AstBuilder, arg: TyExprId, rep: &mut impl Reporter,
  ) -> Option<BigInt> {
    let span = ast[arg].span;
    match &ast[arg].k {
      TyExprKind::Lit(n) => Some(n.clone()),
      TyExprKind::Name { name, args } if args.is_empty() => {
        let sym = self.symbols
          .lookup_kind(*name, |k| k == SymbolKind::Const)
          .next();
        match sym.and_then(|s| self.const_vals.get(&s).cloned()) {
          Some(n) => Some(n),
          None => {
            rep.report(Diagnostic::error(
              DiagCode::SemaTypeMismatch, span,
              format!("expected a constant value, found `{name}`")));
            None
          }
        }
      }
      _ => {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span, "expected a constant value"));
        None
      }
    }
  }

  fn def_params(&self, def_ty: TypeId) -> Box<[TypeId]> {
    match self.types.lookup(def_ty) {
      Some(&TypeKind::Struct(s)) => self.types.struct_info(s).params.clone(),
      Some(&TypeKind::Union(u)) => self.types.union_info(u).params.clone(),
      Some(&TypeKind::Alias(a)) => self.types.alias_info(a).params.clone(),
      _ => Box::new([]),
    }
  }

  // ---------------------------------------------------------------------
  // Generic instantiation

  /// Instantiate a generic type definition for concrete arguments,
  /// substituting parameters in all nested positions. Cached by the
  /// instance maps; a per-key in-progress guard breaks self-referential
  /// expansion (the layout engine reports value-sized cases properly).
  fn instantiate(
    &mut self, def: SymbolId, args: &[TypeId], values: &[BigInt], span: FileSpan,
    rep: &mut impl Reporter,
  ) -> TypeId {
    let def_ty = self.symbols.get(def).ty;
    let name = self.symbols.get(def).name;
    let decl = NominalKey::Decl(self.symbols.get(def).span);
    if let Some(id) = self.types.find_instance(&decl, args, values) { return id }
    if !self.types.begin_instance(&decl, args, values) { return TypeId::NONE }

    let params = self.def_params(def_ty);
    let mut map = HashMap::new();
    let mut ai = 0;
    let mut vi = 0;
    for &p in &params {
      let is_const = match self.types.kind(p) {
        &TypeKind::Generic(pp) => self.types.param_info(pp).is_const,
        _ => false,
      };
      if is_const {
        let v = values.get(vi).cloned().unwrap_or_default();
        vi += 1;
        let c = self.types.intern(TypeKind::Const(v));
        map.insert(p, c);
      } else {
        map.insert(p, args.get(ai).copied().unwrap_or(TypeId::NONE));
        ai += 1;
      }
    }

    let id = match self.types.kind(def_ty).clone() {
      TypeKind::Struct(s) => {
        let info = self.types.struct_info(s).clone();
        let (id, fresh) = self.types.register_struct_instance(
          name, decl.clone(), args.into(), values.into());
        if fresh {
          let fields = info.fields.iter().map(|f| FieldInfo {
            ty: self.types.substitute(f.ty, &map), ..f.clone()
          }).collect();
          self.types.set_struct_fields(id, fields);
        }
        id
      }
      TypeKind::Union(u) => {
        let info = self.types.union_info(u).clone();
        let (id, fresh) = self.types.register_union_instance(name, decl.clone(), args.into());
        if fresh {
          let members = info.members.iter().map(|m| match m {
            UnionMember::Value(t) => UnionMember::Value(self.types.substitute(*t, &map)),
            UnionMember::Nothing => UnionMember::Nothing,
            UnionMember::Tag(n, tys) => UnionMember::Tag(*n,
              tys.iter().map(|&t| self.types.substitute(t, &map)).collect()),
          }).collect();
          self.types.set_union_members(id, members);
        }
        id
      }
      TypeKind::Alias(a) => {
        let info = self.types.alias_info(a).clone();
        let (id, fresh) = self.types.register_alias_instance(name, decl.clone(), args.into());
        if fresh {
          let tgt = self.types.substitute(info.target, &map);
          self.types.set_alias_target(id, tgt);
        }
        id
      }
      _ => {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("`{name}` does not take generic arguments")));
        TypeId::NONE
      }
    };
    self.types.end_instance(&decl, args, values);
    id
  }

  // ---------------------------------------------------------------------
  // Body checking

  /// Check every function body in one file, producing its HIR module.
  pub fn check_file(&mut self, ast: &AstBuilder, rep: &mut impl Reporter) -> hir::Module {
    let mut out = hir::Module::default();
    for (id, item) in ast.items() {
      let ItemKind::Fn(f) = &item.k else { continue };
      let Some(sym) = self.item_sym(ast.file, id) else { continue };
      if let Some(func) = self.check_fn(ast, sym, f, item.span, rep) {
        out.push(func);
      }
    }
    out
  }

  fn check_fn(
    &mut self, ast: &AstBuilder, sym: SymbolId, f: &FnDef, span: FileSpan,
    rep: &mut impl Reporter,
  ) -> Option<hir::Func> {
    let sig = self.fn_sigs.get(&sym)?.clone();
    let flags = self.symbols.get(sym).flags;
    let scope: HashMap<Symbol, TypeId> = f.generics.iter()
      .zip(&*sig.generics)
      .map(|(p, &t)| (p.name, t))
      .collect();
    let mut cx = FnCx {
      fn_sym: sym,
      result: sig.result,
      nonblocking: flags.contains(SymbolFlags::NONBLOCKING),
      vars: vec![],
      scopes: vec![HashMap::new()],
      frames: vec![vec![]],
      loop_depth: 0,
      async_depth: u32::from(f.is_async),
      spawn_boundaries: vec![],
      no_consume: 0,
      generics: scope,
    };
    let params: Box<[hir::Param]> = f.params.iter().zip(&*sig.params).map(|(p, &ty)| {
      let var = cx.fresh_var(p.name, ty, false);
      hir::Param { var, ty, name: p.name }
    }).collect();

    let body = f.body.map(|b| {
      let e = self.check_expr(ast, b, &mut cx, Some(sig.result), rep);
      let mut block = into_block(e);
      // a tail value must produce the declared result; a block that ends in
      // statements returns through explicit `return`s
      if let Some(tail) = block.tail.take() {
        block.tail = Some(if is_unit(self.types, sig.result) { tail } else {
          self.coerce(tail, sig.result, rep)
        });
      }
      block
    });

    Some(hir::Func {
      sym,
      name: f.name,
      span,
      generics: sig.generics,
      params,
      result: sig.result,
      body,
      is_async: f.is_async,
      num_vars: u32::try_from(cx.vars.len()).expect("too many variables"),
    })
  }

  // ---------------------------------------------------------------------
  // Expressions

  #[allow(clippy::too_many_lines)]
  fn check_expr(
    &mut self, ast: &AstBuilder, e: ExprId, cx: &mut FnCx, expect: Option<TypeId>,
    rep: &mut impl Reporter,
  ) -> hir::Expr {
    let span = ast[e].span;
    let node = |ty, k| Rc::new(hir::ExprS { span, ty, k });
    match &ast[e].k.clone() {
      ExprKind::Lit(lit) => self.check_lit(lit, span, expect),
      ExprKind::Name(name) => self.check_name(*name, span, cx, rep),
      ExprKind::Unop(op, a) => {
        let a = self.check_expr(ast, *a, cx, None, rep);
        let ty = self.check_unop(*op, &a, span, rep);
        node(ty, hir::ExprKind::Unop(*op, a))
      }
      ExprKind::Binop(op, l, r) => {
        let l = self.check_expr(ast, *l, cx, None, rep);
        let r = self.check_expr(ast, *r, cx, Some(l.ty), rep);
        let ty = self.check_binop(*op, &l, &r, span, rep);
        node(ty, hir::ExprKind::Binop(*op, l, r))
      }
      ExprKind::Call { f, gen_args, args } => self.check_call(ast, span, *f, gen_args, args, cx, rep),
      ExprKind::Field { base, name } => self.check_field(ast, span, *base, *name, cx, rep),
      ExprKind::Indexed { base, index } => {
        let base = self.check_place(ast, *base, cx, rep);
        let index = self.check_expr(ast, *index, cx, None, rep);
        let ty = self.element_type(base.ty, span, rep);
        let int = self.types.builtins.int(Size::Any);
        let index = self.coerce_family(index, int, TyFamily::Int, rep);
        node(ty, hir::ExprKind::Index { base, index })
      }
      ExprKind::Tuple(es) => {
        let elems: Box<[hir::Expr]> =
          es.iter().map(|&e| self.check_expr(ast, e, cx, None, rep)).collect();
        let tys: Box<[TypeId]> = elems.iter().map(|e| e.ty).collect();
        let ty = if tys.iter().all(|t| t.exists()) {
          self.types.intern(TypeKind::Tuple(tys))
        } else { TypeId::NONE };
        node(ty, hir::ExprKind::Tuple(elems))
      }
      ExprKind::ArrayLit(es) => {
        let elems: Box<[hir::Expr]> =
          es.iter().map(|&e| self.check_expr(ast, e, cx, None, rep)).collect();
        let ty = match elems.first() {
          Some(first) if first.ty.exists() => self.dyn_array(first.ty),
          _ => expect.unwrap_or(TypeId::NONE),
        };
        node(ty, hir::ExprKind::ArrayLit(elems))
      }
      ExprKind::StructLit { ty, fields } =>
        self.check_struct_lit(ast, span, *ty, fields, cx, expect, rep),
      ExprKind::Tag { ty, tag } => self.check_tag(span, *ty, *tag, &[], ast, cx, rep),
      ExprKind::If { cond, then, els } => {
        let cond = self.check_expr(ast, *cond, cx, Some(self.types.builtins.bool_), rep);
        let cond = self.coerce(cond, self.types.builtins.bool_, rep);
        let then = self.check_expr(ast, *then, cx, expect, rep);
        let els = els.map(|els| {
          let e = self.check_expr(ast, els, cx, Some(then.ty), rep);
          self.coerce(e, then.ty, rep)
        });
        let ty = if els.is_some() { then.ty } else { self.types.builtins.unit };
        node(ty, hir::ExprKind::If { cond, then, els })
      }
      ExprKind::Block { stmts, tail } => {
        let (block, ty) = self.check_block(ast, stmts, *tail, cx, expect, rep);
        node(ty, hir::ExprKind::Block(block))
      }
      ExprKind::Compare { scrut, arms, finally } =>
        self.check_compare(ast, span, *scrut, arms, *finally, cx, rep),
      ExprKind::Spawn { local, body } => {
        cx.spawn_boundaries.push(cx.vars.len());
        let body = self.check_expr(ast, *body, cx, None, rep);
        cx.spawn_boundaries.pop();
        let ty = self.task_of(body.ty);
        node(ty, hir::ExprKind::Spawn { local: *local, body })
      }
      ExprKind::Async { body } => {
        cx.async_depth += 1;
        let body = self.check_expr(ast, *body, cx, None, rep);
        cx.async_depth -= 1;
        let ty = body.ty;
        node(ty, hir::ExprKind::Async(into_block(body)))
      }
      ExprKind::Await(inner) => {
        if cx.nonblocking {
          rep.report(Diagnostic::error(
            DiagCode::SemaLockNonblockingCallsWait, span,
            "await in a @nonblocking function"));
        }
        let inner = self.check_expr(ast, *inner, cx, None, rep);
        let ty = self.task_result(inner.ty, span, rep);
        node(ty, hir::ExprKind::Await(inner))
      }
      ExprKind::Borrow(mutbl, inner) => {
        let inner = self.check_place(ast, *inner, cx, rep);
        let ty = self.check_borrow(*mutbl, &inner, span, cx, rep);
        node(ty, hir::ExprKind::Borrow(*mutbl, inner))
      }
      ExprKind::Deref(inner) => {
        let inner = self.check_place(ast, *inner, cx, rep);
        let ty = self.deref_type(inner.ty, span, rep);
        node(ty, hir::ExprKind::Deref(inner))
      }
      ExprKind::Cast { expr, ty } => {
        let inner = self.check_expr(ast, *expr, cx, None, rep);
        let target = self.resolve_ty(ast, *ty, &cx.generics.clone(), rep);
        if target.exists() && inner.ty.exists() && !self.cast_ok(inner.ty, target) {
          rep.report(Diagnostic::error(
            DiagCode::SemaCastInvalid, span,
            format!("cannot cast `{}` to `{}`",
              self.types.name(inner.ty), self.types.name(target))));
        }
        node(target, hir::ExprKind::Cast(inner))
      }
    }
  }

  /// Check an expression in place context: variable uses are reads of the
  /// location, not moves.
  fn check_place(
    &mut self, ast: &AstBuilder, e: ExprId, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    cx.no_consume += 1;
    let r = self.check_expr(ast, e, cx, None, rep);
    cx.no_consume -= 1;
    r
  }

  fn check_lit(&mut self, lit: &Literal, span: FileSpan, expect: Option<TypeId>) -> hir::Expr {
    let node = |ty, k| Rc::new(hir::ExprS { span, ty, k });
    match lit {
      Literal::Unit => node(self.types.builtins.unit, hir::ExprKind::Unit),
      Literal::Bool(b) => node(self.types.builtins.bool_, hir::ExprKind::Bool(*b)),
      Literal::Int(n) => {
        // literals are widened; narrowing happens at assignment or cast
        let ty = expect
          .filter(|&t| {
            matches!(self.types.lookup(self.types.resolve_alias(t)),
              Some(TypeKind::Int(_) | TypeKind::Uint(_)))
          })
          .unwrap_or(self.types.builtins.int(Size::Any));
        node(ty, hir::ExprKind::Int(n.clone()))
      }
      Literal::Float(x) => {
        let ty = expect
          .filter(|&t| {
            matches!(self.types.lookup(self.types.resolve_alias(t)), Some(TypeKind::Float(_)))
          })
          .unwrap_or(self.types.builtins.float(Size::Any));
        node(ty, hir::ExprKind::Float(*x))
      }
      Literal::Str(s) => node(self.types.builtins.str_, hir::ExprKind::Str(intern(s))),
      Literal::Nothing => {
        let ty = expect
          .filter(|&t| self.nothing_member(t).is_some())
          .unwrap_or(TypeId::NONE);
        node(ty, hir::ExprKind::Nothing)
      }
    }
  }

  fn nothing_member(&self, ty: TypeId) -> Option<u32> {
    let info = self.types.as_union(ty)?;
    info.members.iter().position(|m| matches!(m, UnionMember::Nothing))
      .map(|i| i.try_into().expect("too many members"))
  }

  fn check_name(
    &mut self, name: Symbol, span: FileSpan, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    let node = |ty, k| Rc::new(hir::ExprS { span, ty, k });
    if let Some(v) = cx.lookup(name) {
      let ty = cx.vars[v.into_usize()].ty;
      self.use_var(cx, v, span, rep);
      return node(ty, hir::ExprKind::Var(v))
    }
    if let Some(sym) = self.symbols.lookup_kind(name, |k| k == SymbolKind::Const).next() {
      let ty = self.symbols.get(sym).ty;
      return node(ty, hir::ExprKind::Const(sym))
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaUnknownName, span, format!("unknown name `{name}`")));
    hir::ExprS::error(span)
  }

  /// Use of a variable as a value: enforce move and cross-task rules.
  fn use_var(&mut self, cx: &mut FnCx, v: VarId, span: FileSpan, rep: &mut impl Reporter) {
    let info = &cx.vars[v.into_usize()];
    if let Some(moved) = info.moved {
      let name = info.name;
      rep.report(Diagnostic::error(
        DiagCode::SemaMovedValueUse, span, format!("use of moved value `{name}`"))
        .with_note(Some(moved), "value moved here"));
      return
    }
    if let Some(&boundary) = cx.spawn_boundaries.last() {
      if v.into_usize() < boundary {
        let is_ref = matches!(
          self.types.lookup(self.types.resolve_alias(info.ty)),
          Some(TypeKind::Ref(..)));
        if is_ref {
          let name = info.name;
          rep.report(Diagnostic::error(
            DiagCode::SemaBorrowCrossTask, span,
            format!("borrowed value `{name}` cannot cross a task boundary")));
          return
        }
      }
    }
    if let Some(depth) = info.local_task {
      if cx.async_depth < depth {
        let name = info.name;
        rep.report(Diagnostic::error(
          DiagCode::SemaBorrowCrossTask, span,
          format!("local task `{name}` cannot leave its async scope")));
        return
      }
    }
    // non-copy value use is a move, except in place contexts (borrows,
    // assignment targets, projection bases)
    let ty = info.ty;
    if cx.no_consume == 0 && ty.exists() && !self.types.is_copy(ty) {
      if cx.is_borrowed(v) {
        let name = cx.vars[v.into_usize()].name;
        rep.report(Diagnostic::error(
          DiagCode::SemaBorrowConflict, span,
          format!("cannot move `{name}` while it is borrowed")));
      } else {
        cx.vars[v.into_usize()].moved = Some(span);
      }
    }
  }

  fn check_unop(
    &mut self, op: Unop, a: &hir::Expr, span: FileSpan, rep: &mut impl Reporter,
  ) -> TypeId {
    if !a.ty.exists() { return TypeId::NONE }
    let fam = self.family_of(a.ty);
    for rule in unary_spec_for(op) {
      if family_matches(rule.operand, fam) {
        return match rule.result {
          RuleResult::Bool => self.types.builtins.bool_,
          RuleResult::Operand => a.ty,
        }
      }
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaTypeMismatch, span,
      format!("operator `{op}` cannot be applied to `{}`", self.types.name(a.ty))));
    TypeId::NONE
  }

  fn check_binop(
    &mut self, op: Binop, l: &hir::Expr, r: &hir::Expr, span: FileSpan,
    rep: &mut impl Reporter,
  ) -> TypeId {
    if !l.ty.exists() || !r.ty.exists() { return TypeId::NONE }
    let (lf, rf) = (self.family_of(l.ty), self.family_of(r.ty));
    for rule in binary_specs(op) {
      if !family_matches(rule.left, lf) || !family_matches(rule.right, rf) { continue }
      let unified = if rule.flags.contains(crate::types::RuleFlags::SHIFT) {
        Some(l.ty)
      } else {
        self.unify_operands(l.ty, r.ty)
      };
      let Some(out) = unified else { continue };
      return match rule.result {
        RuleResult::Bool => self.types.builtins.bool_,
        RuleResult::Operand => out,
      }
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaTypeMismatch, span,
      format!("operator `{op}` cannot be applied to `{}` and `{}`",
        self.types.name(l.ty), self.types.name(r.ty))));
    TypeId::NONE
  }

  /// The operand family used by the operator tables.
  fn family_of(&self, ty: TypeId) -> Option<TyFamily> {
    match self.types.lookup(self.types.resolve_alias(ty))? {
      TypeKind::Int(_) | TypeKind::Uint(_) => Some(TyFamily::Int),
      TypeKind::Float(_) => Some(TyFamily::Float),
      TypeKind::Bool => Some(TyFamily::Bool),
      TypeKind::Str => Some(TyFamily::Str),
      _ => None,
    }
  }

  /// Unify two operand types: equal types, or a width-unconstrained literal
  /// type adopting the width of the other side.
  fn unify_operands(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
    let (ra, rb) = (self.types.resolve_alias(a), self.types.resolve_alias(b));
    if ra == rb { return Some(a) }
    match (self.types.lookup(ra)?, self.types.lookup(rb)?) {
      (TypeKind::Int(Size::Any), TypeKind::Int(_))
      | (TypeKind::Uint(Size::Any), TypeKind::Uint(_))
      | (TypeKind::Uint(Size::Any), TypeKind::Int(_))
      | (TypeKind::Float(Size::Any), TypeKind::Float(_)) => Some(b),
      (TypeKind::Int(_), TypeKind::Int(Size::Any))
      | (TypeKind::Uint(_), TypeKind::Uint(Size::Any))
      | (TypeKind::Int(_), TypeKind::Uint(Size::Any))
      | (TypeKind::Float(_), TypeKind::Float(Size::Any)) => Some(a),
      _ => None,
    }
  }

  /// Coerce an expression to a target type, reporting a mismatch. A
  /// width-unconstrained literal is retyped (through a cast node) so the
  /// value carries the concrete type downstream.
  fn coerce(&mut self, e: hir::Expr, want: TypeId, rep: &mut impl Reporter) -> hir::Expr {
    if !want.exists() || !e.ty.exists() { return e }
    if self.types.resolve_alias(e.ty) == self.types.resolve_alias(want) { return e }
    if self.unify_operands(e.ty, want).is_some() {
      let span = e.span;
      return Rc::new(hir::ExprS { span, ty: want, k: hir::ExprKind::Cast(e) })
    }
    // `nothing` and member-typed values coerce into their union
    if let Some((member, carries)) = self.wrap_member(e.ty, want) {
      let span = e.span;
      let args: Box<[hir::Expr]> = if carries { Box::new([e]) } else { Box::new([]) };
      return Rc::new(hir::ExprS {
        span, ty: want, k: hir::ExprKind::TagLit { member, args },
      })
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaTypeMismatch, e.span,
      format!("expected `{}`, found `{}`", self.types.name(want), self.types.name(e.ty))));
    e
  }

  /// When assigning into a union, a bare `nothing` or a value of a member
  /// type wraps into the union. Returns `(member index, carries payload)`.
  fn wrap_member(&self, from: TypeId, want: TypeId) -> Option<(u32, bool)> {
    let info = self.types.as_union(want)?;
    if matches!(self.types.lookup(from), Some(TypeKind::Nothing)) {
      let i = info.members.iter().position(|m| matches!(m, UnionMember::Nothing))?;
      return Some((i.try_into().expect("too many members"), false))
    }
    let i = info.members.iter().position(|m| matches!(m,
      UnionMember::Value(t) if self.types.resolve_alias(*t) == self.types.resolve_alias(from)))?;
    Some((i.try_into().expect("too many members"), true))
  }

  fn coerce_family(
    &mut self, e: hir::Expr, fallback: TypeId, fam: TyFamily, rep: &mut impl Reporter,
  ) -> hir::Expr {
    if self.family_of(e.ty) == Some(fam) { return e }
    self.coerce(e, fallback, rep)
  }

  fn element_type(&mut self, base: TypeId, span: FileSpan, rep: &mut impl Reporter) -> TypeId {
    if !base.exists() { return TypeId::NONE }
    match self.types.lookup(self.types.resolve_alias(base)) {
      Some(&TypeKind::Array(t)) => t,
      _ => {
        if let Some(info) = self.types.as_struct(base) {
          if info.name == self.types.builtins.sym_array_fixed {
            if let Some(&t) = info.args.first() { return t }
          }
        }
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("`{}` cannot be indexed", self.types.name(base))));
        TypeId::NONE
      }
    }
  }

  fn deref_type(&mut self, base: TypeId, span: FileSpan, rep: &mut impl Reporter) -> TypeId {
    if !base.exists() { return TypeId::NONE }
    match self.types.lookup(self.types.resolve_alias(base)) {
      Some(&TypeKind::Ref(_, t) | &TypeKind::Own(t) | &TypeKind::Ptr(t)) => t,
      _ => {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("`{}` cannot be dereferenced", self.types.name(base))));
        TypeId::NONE
      }
    }
  }

  fn cast_ok(&self, from: TypeId, to: TypeId) -> bool {
    let (f, t) = (self.types.resolve_alias(from), self.types.resolve_alias(to));
    let numeric = |k: &TypeKind| matches!(k,
      TypeKind::Int(_) | TypeKind::Uint(_) | TypeKind::Float(_) | TypeKind::Bool);
    match (self.types.lookup(f), self.types.lookup(t)) {
      (Some(a), Some(b)) if numeric(a) && numeric(b) => true,
      (Some(TypeKind::Enum(_)), Some(b)) if numeric(b) => true,
      (Some(a), Some(TypeKind::Enum(_))) if numeric(a) => true,
      (Some(TypeKind::Ptr(_)), Some(TypeKind::Ptr(_))) => true,
      _ => f == t,
    }
  }

  /// `Task<T>`, the handle a `spawn` produces. Carries the settled value in
  /// a single field the lowering projects.
  fn task_of(&mut self, t: TypeId) -> TypeId {
    let name = intern("Task");
    let (id, fresh) = self.types.register_struct_instance(
      name, NominalKey::Builtin(name), Box::new([t]), Box::new([]));
    if fresh {
      self.types.set_struct_fields(id, Box::new([FieldInfo {
        name: intern("value"), ty: t, attrs: FieldAttrs::empty(),
        layout: LayoutAttrs::default(),
      }]));
    }
    id
  }

  fn task_result(&mut self, task: TypeId, span: FileSpan, rep: &mut impl Reporter) -> TypeId {
    if !task.exists() { return TypeId::NONE }
    if let Some(info) = self.types.as_struct(task) {
      if info.name == intern("Task") {
        if let Some(&t) = info.args.first() { return t }
      }
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaTypeMismatch, span,
      format!("`{}` is not a task and cannot be awaited", self.types.name(task))));
    TypeId::NONE
  }

  fn check_borrow(
    &mut self, mutbl: Mutability, inner: &hir::Expr, span: FileSpan, cx: &mut FnCx,
    rep: &mut impl Reporter,
  ) -> TypeId {
    if !inner.is_place() {
      rep.report(Diagnostic::error(
        DiagCode::SemaTypeMismatch, span, "cannot borrow a temporary value"));
      return TypeId::NONE
    }
    if let Some(root) = inner.place_root() {
      let info = &cx.vars[root.into_usize()];
      match mutbl {
        Mutability::Mut => {
          if !info.mutable {
            let name = info.name;
            rep.report(Diagnostic::error(
              DiagCode::SemaMutBorrowRequiresMut, span,
              format!("cannot borrow `{name}` exclusively: binding is not mutable")));
          } else if info.shared > 0 || info.exclusive {
            let name = info.name;
            rep.report(Diagnostic::error(
              DiagCode::SemaBorrowConflict, span,
              format!("`{name}` is already borrowed")));
          } else {
            cx.vars[root.into_usize()].exclusive = true;
            cx.frames.last_mut().expect("no borrow frame")
              .push(BorrowRec { root, mutbl, holder: None });
          }
        }
        Mutability::Not => {
          if info.exclusive {
            let name = info.name;
            rep.report(Diagnostic::error(
              DiagCode::SemaBorrowConflict, span,
              format!("`{name}` is already exclusively borrowed")));
          } else {
            cx.vars[root.into_usize()].shared += 1;
            cx.frames.last_mut().expect("no borrow frame")
              .push(BorrowRec { root, mutbl, holder: None });
          }
        }
      }
    }
    if inner.ty.exists() {
      self.types.intern(TypeKind::Ref(mutbl, inner.ty))
    } else { TypeId::NONE }
  }

  // ---------------------------------------------------------------------
  // Calls, fields, tags

  fn check_call(
    &mut self, ast: &AstBuilder, span: FileSpan, f: ExprId, gen_args: &[TyExprId],
    args: &[ExprId], cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    // tag construction `Shape.circle(...)` and method calls `x.m(...)`
    // both parse as calls of a field access
    if let ExprKind::Field { base, name } = &ast[f].k.clone() {
      if let ExprKind::Name(ty_name) = ast[*base].k {
        let is_type = self.symbols
          .lookup_kind(ty_name, |k| k == SymbolKind::Type)
          .next().is_some();
        if is_type && cx.lookup(ty_name).is_none() {
          return self.check_tag(span, ty_name, *name, args, ast, cx, rep)
        }
      }
      return self.check_method(ast, span, *base, *name, args, cx, rep)
    }
    let ExprKind::Name(name) = ast[f].k else {
      rep.report(Diagnostic::error(
        DiagCode::SemaNotCallable, span, "expression is not callable"));
      return hir::ExprS::error(span)
    };
    let hargs: Vec<hir::Expr> =
      args.iter().map(|&a| self.check_expr(ast, a, cx, None, rep)).collect();
    let cands: Vec<SymbolId> =
      self.symbols.lookup_kind(name, |k| k == SymbolKind::Fn).collect();
    if cands.is_empty() {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownName, span, format!("unknown function `{name}`")));
      return hir::ExprS::error(span)
    }
    self.dispatch(ast, span, name, &cands, gen_args, hargs, cx, rep)
  }

  fn check_method(
    &mut self, ast: &AstBuilder, span: FileSpan, base: ExprId, name: Symbol,
    args: &[ExprId], cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    let recv = self.check_expr(ast, base, cx, None, rep);
    let Some(base_name) = self.base_type_name(recv.ty) else {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownField, span,
        format!("no method `{name}` on `{}`", self.types.name(recv.ty))));
      return hir::ExprS::error(span)
    };
    if cx.nonblocking && BlockingMethod::from_symbols(base_name, name).is_some() {
      rep.report(Diagnostic::error(
        DiagCode::SemaLockNonblockingCallsWait, span,
        format!("@nonblocking function calls `{base_name}.{name}`, which may wait")));
    }
    let cands: Vec<SymbolId> = self.symbols.lookup_method(base_name, name).to_vec();
    if cands.is_empty() {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownField, span,
        format!("no method `{name}` on `{base_name}`")));
      return hir::ExprS::error(span)
    }
    let mut hargs = vec![recv];
    hargs.extend(args.iter().map(|&a| self.check_expr(ast, a, cx, None, rep)));
    self.dispatch(ast, span, name, &cands, &[], hargs, cx, rep)
  }

  fn base_type_name(&self, ty: TypeId) -> Option<Symbol> {
    match self.types.lookup(self.types.resolve_alias(ty))? {
      &TypeKind::Ref(_, t) | &TypeKind::Own(t) | &TypeKind::Ptr(t) =>
        self.base_type_name(t),
      &TypeKind::Struct(s) => Some(self.types.struct_info(s).name),
      &TypeKind::Union(u) => Some(self.types.union_info(u).name),
      &TypeKind::Enum(e) => Some(self.types.enum_info(e).name),
      _ => None,
    }
  }

  /// Overload dispatch: pick the candidate whose parameters match the
  /// argument types, binding generic parameters along the way.
  #[allow(clippy::too_many_arguments)]
  fn dispatch(
    &mut self, ast: &AstBuilder, span: FileSpan, name: Symbol, cands: &[SymbolId],
    gen_args: &[TyExprId], args: Vec<hir::Expr>, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    let explicit: Vec<TypeId> = gen_args.iter()
      .map(|&g| self.resolve_ty(ast, g, &cx.generics.clone(), rep))
      .collect();
    let mut matches: Vec<(SymbolId, FnSig, HashMap<TypeId, TypeId>)> = vec![];
    for &cand in cands {
      let Some(sig) = self.fn_sigs.get(&cand).cloned() else { continue };
      if args.len() < sig.min_args() { continue }
      if args.len() > sig.params.len() && !sig.variadic() { continue }
      let mut bind: HashMap<TypeId, TypeId> = sig.generics.iter()
        .zip(&explicit)
        .map(|(&p, &a)| (p, a))
        .collect();
      let mut ok = true;
      for (i, arg) in args.iter().enumerate() {
        let pi = i.min(sig.params.len().saturating_sub(1));
        let want = sig.params.get(pi).copied().unwrap_or(TypeId::NONE);
        let allow_to = sig.param_flags.get(pi).is_some_and(|&(_, _, a)| a);
        if !self.match_param(want, arg.ty, allow_to, &mut bind) { ok = false; break }
      }
      if ok { matches.push((cand, sig, bind)) }
    }
    match matches.len() {
      0 => {
        let tys: Vec<String> = args.iter().map(|a| self.types.name(a.ty)).collect();
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("no overload of `{name}` matches ({})", tys.join(", "))));
        return hir::ExprS::error(span)
      }
      1 => {}
      _ => {
        // an ambiguous call stays untyped; later phases skip it
        rep.report(Diagnostic::error(
          DiagCode::SemaAmbiguousOverload, span,
          format!("call of `{name}` is ambiguous: {} overloads match", matches.len())));
        return hir::ExprS::error(span)
      }
    }
    let (sym, sig, bind) = matches.swap_remove(0);

    // a nonblocking function may not call anything that can block
    let callee_flags = self.symbols.get(sym).flags;
    if cx.nonblocking && callee_flags.contains(SymbolFlags::MAY_BLOCK) {
      rep.report(Diagnostic::error(
        DiagCode::SemaLockNonblockingCallsWait, span,
        format!("@nonblocking function calls `{name}`, which may block")));
    }

    let targs: Box<[TypeId]> = sig.generics.iter()
      .map(|p| bind.get(p).copied().unwrap_or(TypeId::NONE))
      .collect();
    if targs.iter().any(|t| !t.exists()) {
      rep.report(Diagnostic::error(
        DiagCode::SemaTypeMismatch, span,
        format!("cannot infer the generic arguments of `{name}`; annotate the call")));
      return hir::ExprS::error(span)
    }
    if !targs.is_empty() {
      self.insts.record(sym, targs.clone(), span, Some(cx.fn_sym));
    }
    let result = if bind.is_empty() { sig.result } else {
      self.types.substitute(sig.result, &bind)
    };
    let args: Box<[hir::Expr]> = args.into_iter().enumerate().map(|(i, a)| {
      let pi = i.min(sig.params.len().saturating_sub(1));
      let want = sig.params.get(pi).copied().unwrap_or(TypeId::NONE);
      let want = if bind.is_empty() { want } else { self.types.substitute(want, &bind) };
      self.coerce(a, want, rep)
    }).collect();
    Rc::new(hir::ExprS { span, ty: result, k: hir::ExprKind::Call { f: sym, targs, args } })
  }

  /// Structural parameter matching with generic binding.
  fn match_param(
    &mut self, want: TypeId, got: TypeId, allow_to: bool, bind: &mut HashMap<TypeId, TypeId>,
  ) -> bool {
    if !want.exists() || !got.exists() { return true }
    let (w, g) = (self.types.resolve_alias(want), self.types.resolve_alias(got));
    if w == g { return true }
    if let Some(&bound) = bind.get(&w) {
      return bound == g || !bound.exists() && { bind.insert(w, g); true }
    }
    match self.types.kind(w).clone() {
      TypeKind::Generic(_) => { bind.insert(w, g); true }
      TypeKind::Ref(m1, t1) => match self.types.kind(g).clone() {
        TypeKind::Ref(m2, t2) if m1 == m2 => self.match_param(t1, t2, false, bind),
        _ => false,
      },
      TypeKind::Own(t1) => match self.types.kind(g).clone() {
        TypeKind::Own(t2) => self.match_param(t1, t2, false, bind),
        _ => false,
      },
      TypeKind::Array(t1) => match self.types.kind(g).clone() {
        TypeKind::Array(t2) => self.match_param(t1, t2, false, bind),
        _ => false,
      },
      TypeKind::Tuple(ts1) => match self.types.kind(g).clone() {
        TypeKind::Tuple(ts2) if ts1.len() == ts2.len() =>
          ts1.iter().zip(&*ts2).all(|(&a, &b)| self.match_param(a, b, false, bind)),
        _ => false,
      },
      TypeKind::Struct(s1) => match self.types.kind(g).clone() {
        TypeKind::Struct(s2) => {
          let (i1, i2) = (self.types.struct_info(s1).clone(), self.types.struct_info(s2).clone());
          i1.name == i2.name && i1.args.len() == i2.args.len()
            && i1.values == i2.values
            && i1.args.iter().zip(&*i2.args)
              .all(|(&a, &b)| self.match_param(a, b, false, bind))
        }
        _ => false,
      },
      TypeKind::Union(u1) => match self.types.kind(g).clone() {
        TypeKind::Union(u2) => {
          let (i1, i2) = (self.types.union_info(u1).clone(), self.types.union_info(u2).clone());
          i1.name == i2.name && i1.args.len() == i2.args.len()
            && i1.args.iter().zip(&*i2.args)
              .all(|(&a, &b)| self.match_param(a, b, false, bind))
        }
        _ => false,
      },
      _ => {
        // widening literals always unify; `allow_to` additionally accepts
        // narrower concrete integers
        if self.unify_operands(w, g).is_some() { return true }
        if allow_to {
          if let (Some(TypeKind::Int(a) | TypeKind::Uint(a)),
                  Some(TypeKind::Int(b) | TypeKind::Uint(b))) =
            (self.types.lookup(w), self.types.lookup(g))
          {
            return b <= a
          }
        }
        false
      }
    }
  }

  fn check_field(
    &mut self, ast: &AstBuilder, span: FileSpan, base: ExprId, name: Symbol,
    cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    // `Color.red` where `Color` is an enum: a variant constant
    if let ExprKind::Name(ty_name) = ast[base].k {
      if cx.lookup(ty_name).is_none() {
        let found_sym = self.symbols
          .lookup_kind(ty_name, |k| k == SymbolKind::Type).next();
        if let Some(sym) = found_sym
        {
          let ty = self.symbols.get(sym).ty;
          if let Some(TypeKind::Enum(e)) = self.types.lookup(ty) {
            let info = self.types.enum_info(*e).clone();
            let Some(var) = info.variants.iter().find(|v| v.name == name) else {
              rep.report(Diagnostic::error(
                DiagCode::SemaUnknownField, span,
                format!("enum `{ty_name}` has no variant `{name}`")));
              return hir::ExprS::error(span)
            };
            let k = match &var.value {
              EnumValue::Int(n) => hir::ExprKind::Int(n.clone()),
              EnumValue::Str(s) => hir::ExprKind::Str(*s),
            };
            return Rc::new(hir::ExprS { span, ty, k })
          }
          if self.types.as_union(ty).is_some() {
            return self.check_tag(span, ty_name, name, &[], ast, cx, rep)
          }
        }
      }
    }
    let base = self.check_place(ast, base, cx, rep);
    if !base.ty.exists() { return hir::ExprS::error(span) }
    let inner = self.autoderef(base.ty);
    if let Some(info) = self.types.as_struct(inner).cloned() {
      if let Some(i) = info.field_index(name) {
        let ty = info.fields[i as usize].ty;
        return Rc::new(hir::ExprS { span, ty, k: hir::ExprKind::Field { base, index: i } })
      }
    }
    if let Some(ts) = self.tuple_elems(inner) {
      if let Ok(i) = name.as_str().parse::<u32>() {
        if let Some(&ty) = ts.get(i as usize) {
          return Rc::new(hir::ExprS { span, ty, k: hir::ExprKind::Field { base, index: i } })
        }
      }
    }
    if let Some(info) = self.types.as_union(inner) {
      // a tag query `u.circle` is a boolean test
      if let Some(i) = info.tag_index(name) {
        let ty = self.types.builtins.bool_;
        return Rc::new(hir::ExprS {
          span, ty, k: hir::ExprKind::TagTest { base, member: i },
        })
      }
    }
    rep.report(Diagnostic::error(
      DiagCode::SemaUnknownField, span,
      format!("`{}` has no field `{name}`", self.types.name(base.ty))));
    hir::ExprS::error(span)
  }

  fn autoderef(&self, ty: TypeId) -> TypeId {
    match self.types.lookup(self.types.resolve_alias(ty)) {
      Some(&TypeKind::Ref(_, t) | &TypeKind::Own(t)) => self.autoderef(t),
      _ => self.types.resolve_alias(ty),
    }
  }

  fn tuple_elems(&self, ty: TypeId) -> Option<Box<[TypeId]>> {
    match self.types.lookup(self.types.resolve_alias(ty))? {
      TypeKind::Tuple(ts) => Some(ts.clone()),
      _ => None,
    }
  }

  fn check_tag(
    &mut self, span: FileSpan, ty_name: Symbol, tag: Symbol, args: &[ExprId],
    ast: &AstBuilder, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    let Some(sym) = self.symbols.lookup_kind(ty_name, |k| k == SymbolKind::Type).next() else {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownName, span, format!("unknown type `{ty_name}`")));
      return hir::ExprS::error(span)
    };
    let ty = self.symbols.get(sym).ty;
    let Some(info) = self.types.as_union(ty).cloned() else {
      rep.report(Diagnostic::error(
        DiagCode::SemaTypeMismatch, span, format!("`{ty_name}` is not a union")));
      return hir::ExprS::error(span)
    };
    if tag == intern("nothing") {
      if let Some(m) = self.nothing_member(ty) {
        return Rc::new(hir::ExprS {
          span, ty, k: hir::ExprKind::TagLit { member: m, args: Box::new([]) },
        })
      }
    }
    let Some(i) = info.tag_index(tag) else {
      rep.report(Diagnostic::error(
        DiagCode::SemaUnknownTag, span, format!("`{ty_name}` has no tag `{tag}`")));
      return hir::ExprS::error(span)
    };
    let UnionMember::Tag(_, payload) = &info.members[i as usize] else { unreachable!() };
    let payload = payload.clone();
    if args.len() != payload.len() {
      rep.report(Diagnostic::error(
        DiagCode::SemaArgCountMismatch, span,
        format!("tag `{tag}` takes {} value(s), found {}", payload.len(), args.len())));
    }
    let hargs: Box<[hir::Expr]> = args.iter().zip(&*payload).map(|(&a, &want)| {
      let e = self.check_expr(ast, a, cx, Some(want), rep);
      self.coerce(e, want, rep)
    }).collect();
    Rc::new(hir::ExprS { span, ty, k: hir::ExprKind::TagLit { member: i, args: hargs } })
  }

  fn check_struct_lit(
    &mut self, ast: &AstBuilder, span: FileSpan, ty: Option<TyExprId>,
    fields: &[(Symbol, ExprId)], cx: &mut FnCx, expect: Option<TypeId>,
    rep: &mut impl Reporter,
  ) -> hir::Expr {
    let ty = match ty {
      Some(t) => self.resolve_ty(ast, t, &cx.generics.clone(), rep),
      None => expect.unwrap_or(TypeId::NONE),
    };
    if !ty.exists() {
      // no determinable type: check the initializers for their own errors
      for &(_, e) in fields { self.check_expr(ast, e, cx, None, rep); }
      return hir::ExprS::error(span)
    }
    let Some(info) = self.types.as_struct(ty).cloned() else {
      rep.report(Diagnostic::error(
        DiagCode::SemaTypeMismatch, span,
        format!("`{}` is not a struct", self.types.name(ty))));
      return hir::ExprS::error(span)
    };
    let mut inits: Vec<Option<hir::Expr>> = vec![None; info.fields.len()];
    for &(name, e) in fields {
      match info.field_index(name) {
        Some(i) => {
          let want = info.fields[i as usize].ty;
          let v = self.check_expr(ast, e, cx, Some(want), rep);
          inits[i as usize] = Some(self.coerce(v, want, rep));
        }
        None => {
          rep.report(Diagnostic::error(
            DiagCode::SemaUnknownField, span,
            format!("`{}` has no field `{name}`", info.name)));
          self.check_expr(ast, e, cx, None, rep);
        }
      }
    }
    for (i, init) in inits.iter().enumerate() {
      if init.is_none() {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("missing field `{}` in struct literal", info.fields[i].name)));
      }
    }
    let args: Box<[hir::Expr]> = inits.into_iter()
      .map(|i| i.unwrap_or_else(|| hir::ExprS::error(span)))
      .collect();
    Rc::new(hir::ExprS { span, ty, k: hir::ExprKind::StructLit(args) })
  }

  fn check_compare(
    &mut self, ast: &AstBuilder, span: FileSpan, scrut: ExprId, arms: &[CompareArm],
    finally: Option<ExprId>, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> hir::Expr {
    let scrut = self.check_expr(ast, scrut, cx, None, rep);
    let Some(info) = self.types.as_union(self.autoderef(scrut.ty)).cloned() else {
      if scrut.ty.exists() {
        rep.report(Diagnostic::error(
          DiagCode::SemaTypeMismatch, span,
          format!("`compare` requires a union, found `{}`", self.types.name(scrut.ty))));
      }
      return hir::ExprS::error(span)
    };
    let mut covered = vec![false; info.members.len()];
    let mut out_ty: Option<TypeId> = None;
    let mut harms = vec![];
    for arm in arms {
      let pat = &ast[arm.pat];
      let (member, binders): (u32, Box<[VarId]>) = match &pat.k {
        PatKind::Nothing => {
          match info.members.iter().position(|m| matches!(m, UnionMember::Nothing)) {
            Some(i) => (i.try_into().expect("too many members"), Box::new([])),
            None => {
              rep.report(Diagnostic::error(
                DiagCode::SemaUnknownTag, pat.span,
                format!("`{}` has no `nothing` member", info.name)));
              continue
            }
          }
        }
        PatKind::Tag { name, binders } => {
          let Some(i) = info.tag_index(*name) else {
            rep.report(Diagnostic::error(
              DiagCode::SemaUnknownTag, pat.span,
              format!("`{}` has no tag `{name}`", info.name)));
            continue
          };
          let UnionMember::Tag(_, payload) = &info.members[i as usize] else { unreachable!() };
          if binders.len() != payload.len() {
            rep.report(Diagnostic::error(
              DiagCode::SemaArgCountMismatch, pat.span,
              format!("tag `{name}` carries {} value(s), pattern binds {}",
                payload.len(), binders.len())));
          }
          let payload = payload.clone();
          cx.enter_scope();
          let vars = binders.iter().enumerate().map(|(bi, &b)| {
            let ty = payload.get(bi).copied().unwrap_or(TypeId::NONE);
            cx.fresh_var(b, ty, false)
          }).collect();
          (i, vars)
        }
      };
      if let Some(c) = covered.get_mut(member as usize) { *c = true }
      let body = self.check_expr(ast, arm.body, cx, out_ty, rep);
      if matches!(ast[arm.pat].k, PatKind::Tag { .. }) { cx.exit_scope() }
      let body = match out_ty {
        Some(t) => self.coerce(body, t, rep),
        None => { out_ty = Some(body.ty); body }
      };
      harms.push(hir::CompareArm { member, binders, body });
    }
    let default = finally.map(|e| {
      let b = self.check_expr(ast, e, cx, out_ty, rep);
      match out_ty {
        Some(t) => self.coerce(b, t, rep),
        None => { out_ty = Some(b.ty); b }
      }
    });
    if default.is_none() && covered.iter().any(|&c| !c) {
      rep.report(Diagnostic::warning(
        DiagCode::SemaNotExhaustive, span,
        format!("compare over `{}` does not cover every member and has no `finally` arm",
          info.name)));
    }
    Rc::new(hir::ExprS {
      span,
      ty: out_ty.unwrap_or(self.types.builtins.unit),
      k: hir::ExprKind::Compare { scrut, arms: harms.into(), default },
    })
  }

  // ---------------------------------------------------------------------
  // Statements

  fn check_block(
    &mut self, ast: &AstBuilder, stmts: &[StmtId], tail: Option<ExprId>, cx: &mut FnCx,
    expect: Option<TypeId>, rep: &mut impl Reporter,
  ) -> (hir::Block, TypeId) {
    cx.enter_scope();
    let hstmts: Box<[hir::Stmt]> = stmts.iter()
      .filter_map(|&s| self.check_stmt(ast, s, cx, rep))
      .collect();
    let htail = tail.map(|t| self.check_expr(ast, t, cx, expect, rep));
    let ty = htail.as_ref().map_or(self.types.builtins.unit, |t| t.ty);
    cx.exit_scope();
    (hir::Block { stmts: hstmts, tail: htail }, ty)
  }

  fn check_stmt(
    &mut self, ast: &AstBuilder, s: StmtId, cx: &mut FnCx, rep: &mut impl Reporter,
  ) -> Option<hir::Stmt> {
    let span = ast[s].span;
    let k = match &ast[s].k.clone() {
      StmtKind::Let { name, mutable, ty, init } => {
        let declared = ty.map(|t| self.resolve_ty(ast, t, &cx.generics.clone(), rep));
        let init = self.check_expr(ast, *init, cx, declared, rep);
        let init = match declared {
          Some(t) if t.exists() => self.coerce(init, t, rep),
          _ => init,
        };
        let vty = declared.unwrap_or(init.ty);
        let local_task = matches!(init.k, hir::ExprKind::Spawn { local: true, .. })
          .then_some(cx.async_depth);
        let var = cx.fresh_var(*name, vty, *mutable);
        cx.vars[var.into_usize()].local_task = local_task;
        hir::StmtKind::Let { var, ty: vty, init }
      }
      StmtKind::Expr(e) => hir::StmtKind::Expr(self.check_expr(ast, *e, cx, None, rep)),
      StmtKind::Assign { lhs, rhs } => {
        let lhs = self.check_place(ast, *lhs, cx, rep);
        if !lhs.is_place() {
          rep.report(Diagnostic::error(
            DiagCode::SemaAssignToImmutable, span, "left side is not assignable"));
        } else if let Some(root) = lhs.place_root() {
          let info = &cx.vars[root.into_usize()];
          if !info.mutable {
            let name = info.name;
            rep.report(Diagnostic::error(
              DiagCode::SemaAssignToImmutable, span,
              format!("cannot assign to `{name}`: binding is not mutable")));
          } else if cx.is_borrowed(root) {
            let name = info.name;
            rep.report(Diagnostic::error(
              DiagCode::SemaAssignWhileBorrowed, span,
              format!("cannot assign to `{name}` while it is borrowed")));
          } else {
            // assignment reinitializes a moved-out binding
            cx.vars[root.into_usize()].moved = None;
          }
        }
        let rhs = self.check_expr(ast, *rhs, cx, Some(lhs.ty), rep);
        let rhs = self.coerce(rhs, lhs.ty, rep);
        hir::StmtKind::Assign { lhs, rhs }
      }
      StmtKind::Return(e) => {
        let e = e.map(|e| {
          let v = self.check_expr(ast, e, cx, Some(cx.result), rep);
          let want = cx.result;
          self.coerce(v, want, rep)
        });
        hir::StmtKind::Return(e)
      }
      StmtKind::While { cond, body } => {
        let cond = self.check_expr(ast, *cond, cx, Some(self.types.builtins.bool_), rep);
        let cond = self.coerce(cond, self.types.builtins.bool_, rep);
        cx.loop_depth += 1;
        let body = self.check_expr(ast, *body, cx, None, rep);
        cx.loop_depth -= 1;
        hir::StmtKind::While { cond, body: into_block(body) }
      }
      StmtKind::Break => {
        if cx.loop_depth == 0 {
          rep.report(Diagnostic::error(
            DiagCode::SemaBreakOutsideLoop, span, "break outside of a loop"));
        }
        hir::StmtKind::Break
      }
      StmtKind::Continue => {
        if cx.loop_depth == 0 {
          rep.report(Diagnostic::error(
            DiagCode::SemaBreakOutsideLoop, span, "continue outside of a loop"));
        }
        hir::StmtKind::Continue
      }
      StmtKind::Drop(name) => {
        let Some(v) = cx.lookup(*name) else {
          rep.report(Diagnostic::error(
            DiagCode::SemaUnknownName, span, format!("unknown name `{name}`")));
          return None
        };
        cx.release_borrows(v);
        hir::StmtKind::Drop(v)
      }
    };
    Some(hir::Stmt { span, k })
  }
}

/// Per-binding ownership state tracked while a body is checked.
#[derive(Debug)]
struct VarInfo {
  name: Symbol,
  ty: TypeId,
  mutable: bool,
  moved: Option<FileSpan>,
  shared: u32,
  exclusive: bool,
  /// The async depth a `spawn local` handle was created at.
  local_task: Option<u32>,
}

#[derive(Debug)]
struct BorrowRec {
  root: VarId,
  mutbl: Mutability,
  holder: Option<VarId>,
}

/// Per-function checking state.
struct FnCx {
  fn_sym: SymbolId,
  result: TypeId,
  nonblocking: bool,
  vars: Vec<VarInfo>,
  scopes: Vec<HashMap<Symbol, VarId>>,
  /// Lexical borrow frames, pushed on block entry.
  frames: Vec<Vec<BorrowRec>>,
  loop_depth: u32,
  async_depth: u32,
  /// Variable counts at each enclosing `spawn`, for cross-task checks.
  spawn_boundaries: Vec<usize>,
  /// Nonzero while checking a place context, where a variable use is not a
  /// move.
  no_consume: u32,
  generics: HashMap<Symbol, TypeId>,
}

impl FnCx {
  fn fresh_var(&mut self, name: Symbol, ty: TypeId, mutable: bool) -> VarId {
    let var = VarId::from_usize(self.vars.len());
    self.vars.push(VarInfo {
      name, ty, mutable, moved: None, shared: 0, exclusive: false, local_task: None,
    });
    self.scopes.last_mut().expect("no open scope").insert(name, var);
    var
  }

  fn lookup(&self, name: Symbol) -> Option<VarId> {
    self.scopes.iter().rev().find_map(|s| s.get(&name).copied())
  }

  fn is_borrowed(&self, v: VarId) -> bool {
    let info = &self.vars[v.into_usize()];
    info.shared > 0 || info.exclusive
  }

  fn enter_scope(&mut self) {
    self.scopes.push(HashMap::new());
    self.frames.push(vec![]);
  }

  fn exit_scope(&mut self) {
    self.scopes.pop().expect("unbalanced scopes");
    let frame = self.frames.pop().expect("unbalanced borrow frames");
    for b in frame { self.end_borrow(&b) }
  }

  fn end_borrow(&mut self, b: &BorrowRec) {
    let info = &mut self.vars[b.root.into_usize()];
    match b.mutbl {
      Mutability::Mut => info.exclusive = false,
      Mutability::Not => info.shared = info.shared.saturating_sub(1),
    }
  }

  /// `@drop x;` ends every borrow rooted at or held by `x`.
  fn release_borrows(&mut self, v: VarId) {
    let mut released = vec![];
    for frame in &mut self.frames {
      frame.retain(|b| {
        if b.root == v || b.holder == Some(v) {
          released.push(BorrowRec { root: b.root, mutbl: b.mutbl, holder: b.holder });
          false
        } else { true }
      });
    }
    for b in released { self.end_borrow(&b) }
  }
}

fn layout_attrs(attrs: &[Spanned<Attr>]) -> LayoutAttrs {
  let mut out = LayoutAttrs::default();
  for a in attrs {
    match a.k {
      Attr::Packed => out.packed = true,
      Attr::Align(n) => out.align = Some(n),
      _ => {}
    }
  }
  out
}

fn prim_int(ast: &AstBuilder, ty: TyExprId) -> Option<IntTy> {
  let TyExprKind::Name { name, .. } = &ast[ty].k else { return None };
  match PrimType::from_symbol(*name)? {
    PrimType::Int => Some(IntTy::Int(Size::Any)),
    PrimType::I8 => Some(IntTy::Int(Size::S8)),
    PrimType::I16 => Some(IntTy::Int(Size::S16)),
    PrimType::I32 => Some(IntTy::Int(Size::S32)),
    PrimType::I64 => Some(IntTy::Int(Size::S64)),
    PrimType::Uint => Some(IntTy::Uint(Size::Any)),
    PrimType::U8 => Some(IntTy::Uint(Size::S8)),
    PrimType::U16 => Some(IntTy::Uint(Size::S16)),
    PrimType::U32 => Some(IntTy::Uint(Size::S32)),
    PrimType::U64 => Some(IntTy::Uint(Size::S64)),
    _ => None,
  }
}

fn prim_type_id(types: &TypeStore, prim: PrimType) -> TypeId {
  let b = &types.builtins;
  match prim {
    PrimType::Int => b.int(Size::Any),
    PrimType::I8 => b.int(Size::S8),
    PrimType::I16 => b.int(Size::S16),
    PrimType::I32 => b.int(Size::S32),
    PrimType::I64 => b.int(Size::S64),
    PrimType::Uint => b.uint(Size::Any),
    PrimType::U8 => b.uint(Size::S8),
    PrimType::U16 => b.uint(Size::S16),
    PrimType::U32 => b.uint(Size::S32),
    PrimType::U64 => b.uint(Size::S64),
    PrimType::Float => b.float(Size::Any),
    PrimType::F32 => b.float(Size::S32),
    PrimType::F64 => b.float(Size::S64),
    PrimType::Bool => b.bool_,
    PrimType::Str => b.str_,
    PrimType::Unit => b.unit,
    PrimType::Nothing => b.nothing,
  }
}

fn family_matches(want: TyFamily, got: Option<TyFamily>) -> bool {
  want == TyFamily::Any || got == Some(want)
}

fn is_unit(types: &TypeStore, ty: TypeId) -> bool {
  matches!(types.lookup(types.resolve_alias(ty)), Some(TypeKind::Unit))
}

/// View an expression as a block, wrapping non-block expressions as a tail.
fn into_block(e: hir::Expr) -> hir::Block {
  match Rc::try_unwrap(e) {
    Ok(hir::ExprS { k: hir::ExprKind::Block(b), .. }) => b,
    Ok(other) => hir::Block { stmts: Box::new([]), tail: Some(Rc::new(other)) },
    Err(e) => hir::Block { stmts: Box::new([]), tail: Some(e) },
  }
}
