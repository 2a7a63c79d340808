//! Name resolution: build the symbol table from the parsed items of every
//! file, compute structural function signatures, classify overloads, and
//! index methods by receiver type.
//!
//! Type declarations are registered here as symbols only; their interned
//! types are created by the semantic analyzer's declare pass, which can
//! resolve type expressions and report on them.

use hashbrown::HashMap;
use crate::symbol::Symbol;
use crate::diag::{DiagCode, Diagnostic, Reporter};
use crate::types::{FileSpan, Spanned};
use crate::types::ast::{AstBuilder, Attr, FnDef, ItemId, ItemKind, TyExprId, TyExprKind};
use crate::types::entity::{
  DeclRef, FunctionSignature, ParamSig, SymbolData, SymbolFlags, SymbolId, SymbolKind,
  SymbolTable, Visibility,
};
use crate::types::ty::{Mutability, TypeId};

/// The output of name resolution.
#[derive(Debug, Default)]
pub struct ResolveResult {
  /// The symbol table.
  pub symbols: SymbolTable,
  /// The symbol declared by each item.
  pub item_syms: HashMap<(crate::FileId, ItemId), SymbolId>,
  /// Functions marked `@entrypoint`, in declaration order.
  pub entrypoints: Vec<SymbolId>,
}

/// Compute the structural key of a type expression. Keys are derived purely
/// from the AST, so signatures can be compared before any type is interned.
#[must_use] pub fn type_key(ast: &AstBuilder, ty: TyExprId) -> String {
  let mut s = String::new();
  write_key(ast, ty, &mut s);
  s
}

fn write_key(ast: &AstBuilder, ty: TyExprId, out: &mut String) {
  match &ast[ty].k {
    TyExprKind::Name { name, args } => {
      out.push_str(&name.as_str());
      if !args.is_empty() {
        out.push('<');
        for (i, &a) in args.iter().enumerate() {
          if i != 0 { out.push(',') }
          write_key(ast, a, out);
        }
        out.push('>');
      }
    }
    TyExprKind::Lit(n) => out.push_str(&n.to_string()),
    TyExprKind::Ref(Mutability::Not, t) => { out.push('&'); write_key(ast, *t, out) }
    TyExprKind::Ref(Mutability::Mut, t) => { out.push_str("&mut "); write_key(ast, *t, out) }
    TyExprKind::Own(t) => { out.push_str("own "); write_key(ast, *t, out) }
    TyExprKind::Ptr(t) => { out.push('*'); write_key(ast, *t, out) }
    TyExprKind::Array { elem, len } => {
      out.push('[');
      write_key(ast, *elem, out);
      if len.is_some() { out.push_str("; _") }
      out.push(']');
    }
    TyExprKind::Tuple(ts) => {
      out.push('(');
      for (i, &t) in ts.iter().enumerate() {
        if i != 0 { out.push(',') }
        write_key(ast, t, out);
      }
      out.push(')');
    }
    TyExprKind::Fn { params, result } => {
      out.push_str("fn(");
      for (i, &t) in params.iter().enumerate() {
        if i != 0 { out.push(',') }
        write_key(ast, t, out);
      }
      out.push_str(")->");
      write_key(ast, *result, out);
    }
    TyExprKind::Optional(t) => {
      out.push_str("Option<");
      write_key(ast, *t, out);
      out.push('>');
    }
    TyExprKind::Unit => out.push_str("unit"),
  }
}

/// The base type name a method receiver hangs off: the root `Name` under
/// any reference, pointer, or own wrapper.
#[must_use] pub fn receiver_base(ast: &AstBuilder, ty: TyExprId) -> Option<Symbol> {
  match &ast[ty].k {
    TyExprKind::Name { name, .. } => Some(*name),
    TyExprKind::Ref(_, t) | TyExprKind::Own(t) | TyExprKind::Ptr(t) =>
      receiver_base(ast, *t),
    _ => None,
  }
}

fn signature_of(ast: &AstBuilder, f: &FnDef) -> FunctionSignature {
  let params = f.params.iter().map(|p| ParamSig {
    key: type_key(ast, p.ty).into(),
    name: p.name,
    variadic: p.variadic,
    has_default: p.default.is_some(),
    allow_to: p.allow_to,
  }).collect();
  let result = f.result.map_or_else(|| "unit".into(), |r| type_key(ast, r).into());
  FunctionSignature { params, result, has_body: f.body.is_some(), has_self: f.has_self() }
}

impl FnDef {
  /// Whether the first parameter is a `self` receiver.
  #[must_use] pub fn has_self(&self) -> bool {
    self.params.first().is_some_and(|p| p.is_self)
  }
}

fn fn_flags(attrs: &[Spanned<Attr>], is_async: bool) -> SymbolFlags {
  let mut flags = SymbolFlags::empty();
  for a in attrs {
    match a.k {
      Attr::Entrypoint => flags |= SymbolFlags::ENTRYPOINT,
      Attr::Nonblocking => flags |= SymbolFlags::NONBLOCKING,
      Attr::WaitsOn(_) => flags |= SymbolFlags::MAY_BLOCK,
      _ => {}
    }
  }
  if is_async { flags |= SymbolFlags::ASYNC | SymbolFlags::MAY_BLOCK }
  flags
}

fn vis(public: bool) -> Visibility {
  if public { Visibility::Public } else { Visibility::Private }
}

struct Resolver<'a, R> {
  module: Symbol,
  reporter: &'a mut R,
  out: ResolveResult,
}

impl<R: Reporter> Resolver<'_, R> {
  fn declare_item(&mut self, ast: &AstBuilder, id: ItemId, item: &Spanned<ItemKind>) {
    let span = item.span;
    let decl = Some(DeclRef { file: ast.file, item: id });
    let sym = match &item.k {
      ItemKind::Struct { name, public, .. }
      | ItemKind::Union { name, public, .. }
      | ItemKind::Alias { name, public, .. }
      | ItemKind::Enum { name, public, .. } => {
        self.check_type_clash(*name, span);
        self.add(SymbolData {
          kind: SymbolKind::Type, name: *name, decl, span,
          vis: vis(*public), flags: SymbolFlags::empty(),
          module: self.module, ty: TypeId::NONE, sig: None,
        })
      }
      ItemKind::Fn(f) => {
        let sig = signature_of(ast, f);
        if !self.check_overload(f.name, &sig, span) { return }
        let flags = fn_flags(&f.attrs, f.is_async);
        let sym = self.add(SymbolData {
          kind: SymbolKind::Fn, name: f.name, decl, span,
          vis: vis(f.public), flags,
          module: self.module, ty: TypeId::NONE, sig: Some(sig),
        });
        if flags.contains(SymbolFlags::ENTRYPOINT) { self.out.entrypoints.push(sym) }
        if f.has_self() {
          if let Some(recv) = receiver_base(ast, f.params[0].ty) {
            self.out.symbols.add_method(recv, f.name, sym);
          }
        }
        sym
      }
      ItemKind::Const { name, public, .. } => {
        self.add(SymbolData {
          kind: SymbolKind::Const, name: *name, decl, span,
          vis: vis(*public), flags: SymbolFlags::empty(),
          module: self.module, ty: TypeId::NONE, sig: None,
        })
      }
      ItemKind::Import { path } => {
        let name = *path.last().expect("empty import path");
        self.add(SymbolData {
          kind: SymbolKind::Module, name, decl, span,
          vis: Visibility::Private, flags: SymbolFlags::IMPORTED,
          module: self.module, ty: TypeId::NONE, sig: None,
        })
      }
    };
    self.out.item_syms.insert((ast.file, id), sym);
  }

  fn add(&mut self, data: SymbolData) -> SymbolId {
    self.out.symbols.add(data)
  }

  /// Two type declarations may not share a name in one module.
  fn check_type_clash(&mut self, name: Symbol, span: FileSpan) {
    let clash = self.out.symbols
      .lookup_kind(name, |k| k == SymbolKind::Type)
      .next().is_some();
    if clash {
      self.reporter.report(Diagnostic::error(
        DiagCode::SynDuplicateName, span,
        format!("type `{name}` is already declared"),
      ));
    }
  }

  /// A function may share its name with other functions only when its
  /// signature differs from every one of them.
  fn check_overload(&mut self, name: Symbol, sig: &FunctionSignature, span: FileSpan) -> bool {
    let existing: Vec<&FunctionSignature> = self.out.symbols
      .lookup_kind(name, |k| k == SymbolKind::Fn)
      .filter_map(|id| self.out.symbols.get(id).sig.as_ref())
      .collect();
    if sig.differs_from_all(existing) { return true }
    self.reporter.report(Diagnostic::error(
      DiagCode::SynDuplicateName, span,
      format!("`{name}` is already declared with this signature"),
    ));
    false
  }
}

/// Resolve the items of every file into one module-level symbol table.
/// Files must be supplied in deterministic (path-sorted) order.
pub fn resolve(
  files: &[&AstBuilder], module: Symbol, reporter: &mut impl Reporter,
) -> ResolveResult {
  let mut r = Resolver { module, reporter, out: ResolveResult::default() };
  // Types first, so function signatures can refer to any type in the module
  // regardless of declaration order.
  for ast in files {
    for (id, item) in ast.items() {
      if matches!(item.k,
        ItemKind::Struct { .. } | ItemKind::Union { .. }
        | ItemKind::Alias { .. } | ItemKind::Enum { .. } | ItemKind::Import { .. })
      {
        r.declare_item(ast, id, item);
      }
    }
  }
  for ast in files {
    for (id, item) in ast.items() {
      if matches!(item.k, ItemKind::Fn(_) | ItemKind::Const { .. }) {
        r.declare_item(ast, id, item);
      }
    }
  }
  log::debug!("resolved {} symbol(s) in module {module}", r.out.symbols.len());
  r.out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::FileId;
  use crate::diag::Bag;
  use crate::symbol::intern;
  use crate::types::ast::ParamDef;

  fn fsp(n: u32) -> FileSpan { FileSpan::new(FileId::default(), n..n + 1) }

  fn fn_item(ast: &mut AstBuilder, name: &str, param_tys: &[&str]) -> ItemId {
    let params = param_tys.iter().enumerate().map(|(i, t)| {
      let ty = ast.push_ty(fsp(0), TyExprKind::Name { name: intern(t), args: Box::new([]) });
      ParamDef {
        name: intern(&format!("p{i}")), ty, variadic: false,
        default: None, allow_to: false, is_self: false, span: fsp(0),
      }
    }).collect();
    ast.push_item(fsp(1), ItemKind::Fn(FnDef {
      name: intern(name), public: false, attrs: Box::new([]),
      generics: Box::new([]), params, result: None, body: None, is_async: false,
    }))
  }

  #[test]
  fn overloads_by_signature() {
    let mut ast = AstBuilder::new(FileId::default());
    fn_item(&mut ast, "f", &["int"]);
    fn_item(&mut ast, "f", &["string"]);
    fn_item(&mut ast, "f", &["int"]); // duplicate
    let mut bag = Bag::default();
    let out = resolve(&[&ast], intern("main"), &mut bag);
    assert_eq!(out.symbols.lookup_name(intern("f")).len(), 2);
    assert_eq!(bag.len(), 1);
    assert_eq!(bag.diags()[0].code, DiagCode::SynDuplicateName);
  }

  #[test]
  fn type_keys() {
    let mut ast = AstBuilder::new(FileId::default());
    let int = ast.push_ty(fsp(0), TyExprKind::Name { name: intern("int"), args: Box::new([]) });
    let opt = ast.push_ty(fsp(0), TyExprKind::Optional(int));
    let r = ast.push_ty(fsp(0), TyExprKind::Ref(Mutability::Mut, opt));
    assert_eq!(type_key(&ast, r), "&mut Option<int>");
  }

}
