//! The ABI layout engine: sizes, alignments, and field offsets per target,
//! with detection of infinite-size recursive value types.

use std::fmt;
use hashbrown::HashMap;
use crate::types::Size;
use crate::types::ty::{
  LayoutAttrs, StructInfo, TypeId, TypeKind, TypeStore, UnionMember,
};

/// The target parameters layout depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetSpec {
  /// The target triple.
  pub name: &'static str,
  /// Pointer size in bytes.
  pub ptr_size: u64,
  /// Pointer alignment in bytes.
  pub ptr_align: u64,
}

impl TargetSpec {
  /// The default 64-bit Linux target.
  pub const X86_64_LINUX_GNU: Self =
    Self { name: "x86_64-linux-gnu", ptr_size: 8, ptr_align: 8 };
}

/// The computed layout of a type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeLayout {
  /// Total size in bytes, rounded up to the alignment.
  pub size: u64,
  /// Alignment in bytes.
  pub align: u64,
  /// Byte offset of each field, for structs and tuples.
  pub field_offsets: Box<[u64]>,
  /// Alignment of each field, for structs and tuples.
  pub field_aligns: Box<[u64]>,
  /// Size of the discriminant, for tag unions.
  pub tag_size: u64,
  /// Alignment of the discriminant, for tag unions.
  pub tag_align: u64,
  /// Byte offset of the payload area, for tag unions.
  pub payload_offset: u64,
}

impl TypeLayout {
  fn scalar(size: u64, align: u64) -> Self {
    Self { size, align, ..Self::default() }
  }
}

/// Why a layout could not be computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutErrorKind {
  /// The type contains a value-typed path back to itself with no
  /// indirection, so it has no finite size.
  RecursiveUnsized,
  /// The type is invalid or still contains a generic parameter.
  Unresolved,
}

/// A layout failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutError {
  /// The failure kind.
  pub kind: LayoutErrorKind,
  /// For recursive types, the names along the cycle, starting and ending
  /// at the repeated type.
  pub cycle: Vec<String>,
}

impl LayoutError {
  fn unresolved() -> Self {
    Self { kind: LayoutErrorKind::Unresolved, cycle: vec![] }
  }
}

impl fmt::Display for LayoutError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      LayoutErrorKind::RecursiveUnsized =>
        write!(f, "recursive type has infinite size: {}", self.cycle.join(" -> ")),
      LayoutErrorKind::Unresolved => write!(f, "type is not fully resolved"),
    }
  }
}

fn round_up(n: u64, align: u64) -> u64 {
  if align == 0 { return n }
  n.div_ceil(align) * align
}

fn prim_size(sz: Size) -> u64 {
  // width-unconstrained literals behave as the native word
  sz.bytes().unwrap_or(8)
}

type Key = (TypeId, String);

/// The layout engine. Results are cached by canonical type plus an
/// attribute fingerprint, so changing `@packed`/`@align` attributes yields
/// distinct cache entries.
pub struct LayoutEngine<'a> {
  types: &'a TypeStore,
  target: TargetSpec,
  cache: HashMap<Key, Result<TypeLayout, LayoutError>>,
  stack: Vec<Key>,
  pos: HashMap<Key, usize>,
}

impl<'a> LayoutEngine<'a> {
  /// Create an engine for one target.
  #[must_use] pub fn new(types: &'a TypeStore, target: TargetSpec) -> Self {
    Self { types, target, cache: HashMap::new(), stack: vec![], pos: HashMap::new() }
  }

  /// The attribute fingerprint of a type: its own layout attributes folded
  /// with the per-field ones, rendered as a stable hex key.
  #[must_use] pub fn fingerprint(&self, ty: TypeId) -> String {
    let mut bytes = vec![];
    let fold = |bytes: &mut Vec<u8>, attrs: LayoutAttrs| {
      bytes.push(u8::from(attrs.packed));
      bytes.extend_from_slice(&attrs.align.unwrap_or(0).to_le_bytes());
    };
    fold(&mut bytes, self.types.type_layout_attrs(ty));
    if let Some(TypeKind::Struct(s)) = self.types.lookup(ty) {
      for field in &self.types.struct_info(*s).fields {
        fold(&mut bytes, field.layout);
      }
    }
    hex::encode(bytes)
  }

  /// Compute the layout of a type.
  pub fn layout_of(&mut self, ty: TypeId) -> Result<TypeLayout, LayoutError> {
    let canon = self.types.resolve_alias(ty);
    if !canon.exists() { return Err(LayoutError::unresolved()) }
    let key = (canon, self.fingerprint(canon));
    if let Some(r) = self.cache.get(&key) { return r.clone() }
    if let Some(&start) = self.pos.get(&key) {
      // re-entry with the same key: a value-typed cycle
      let mut cycle: Vec<String> = self.stack[start..].iter()
        .map(|(t, _)| self.types.name(*t))
        .collect();
      cycle.push(self.types.name(canon));
      let err = LayoutError { kind: LayoutErrorKind::RecursiveUnsized, cycle };
      self.cache.insert(key, Err(err.clone()));
      return Err(err)
    }
    self.pos.insert(key.clone(), self.stack.len());
    self.stack.push(key.clone());
    let r = self.compute(canon);
    self.stack.pop();
    self.pos.remove(&key);
    // keep the first cached error from the cycle detection if present
    self.cache.entry(key).or_insert_with(|| r.clone());
    r
  }

  fn compute(&mut self, ty: TypeId) -> Result<TypeLayout, LayoutError> {
    let ptr = TypeLayout::scalar(self.target.ptr_size, self.target.ptr_align);
    match self.types.kind(ty).clone() {
      TypeKind::Invalid | TypeKind::Generic(_) => Err(LayoutError::unresolved()),
      TypeKind::Alias(_) => Err(LayoutError::unresolved()),
      TypeKind::Unit | TypeKind::Nothing => Ok(TypeLayout::scalar(0, 1)),
      TypeKind::Bool => Ok(TypeLayout::scalar(1, 1)),
      TypeKind::Const(_) => Ok(TypeLayout::scalar(0, 1)),
      TypeKind::Int(sz) | TypeKind::Uint(sz) | TypeKind::Float(sz) => {
        let n = prim_size(sz);
        Ok(TypeLayout::scalar(n, n))
      }
      // heap handles: a pointer plus a length
      TypeKind::Str => Ok(TypeLayout::scalar(self.target.ptr_size * 2, self.target.ptr_align)),
      TypeKind::Array(_) => Ok(ptr),
      TypeKind::Ptr(_) | TypeKind::Ref(..) | TypeKind::Own(_) | TypeKind::Fn(..) => Ok(ptr),
      TypeKind::Enum(e) => {
        let n = prim_size(self.types.enum_info(e).base.size());
        Ok(TypeLayout::scalar(n, n))
      }
      TypeKind::Tuple(ts) => self.fields_layout(
        &ts.iter().map(|&t| (t, LayoutAttrs::default())).collect::<Vec<_>>(),
        LayoutAttrs::default()),
      TypeKind::Struct(s) => {
        let info = self.types.struct_info(s).clone();
        if let Some(l) = self.fixed_array_layout(&info)? { return Ok(l) }
        let attrs = self.types.type_layout_attrs(ty);
        let fields: Vec<(TypeId, LayoutAttrs)> =
          info.fields.iter().map(|f| (f.ty, f.layout)).collect();
        self.fields_layout(&fields, attrs)
      }
      TypeKind::Union(u) => {
        let info = self.types.union_info(u).clone();
        let mut payload_size = 0u64;
        let mut payload_align = 1u64;
        for m in &info.members {
          let l = match m {
            UnionMember::Nothing => TypeLayout::scalar(0, 1),
            UnionMember::Value(t) => self.layout_of(*t)?,
            UnionMember::Tag(_, args) => {
              let fields: Vec<(TypeId, LayoutAttrs)> =
                args.iter().map(|&t| (t, LayoutAttrs::default())).collect();
              self.fields_layout(&fields, LayoutAttrs::default())?
            }
          };
          payload_size = payload_size.max(l.size);
          payload_align = payload_align.max(l.align);
        }
        let (tag_size, tag_align) = (1, 1);
        let align = tag_align.max(payload_align);
        let payload_offset = round_up(tag_size, payload_align);
        Ok(TypeLayout {
          size: round_up(payload_offset + payload_size, align),
          align,
          field_offsets: Box::new([]),
          field_aligns: Box::new([]),
          tag_size, tag_align, payload_offset,
        })
      }
    }
  }

  /// `ArrayFixed<T, N>` lays out as `N` consecutive elements.
  fn fixed_array_layout(&mut self, info: &StructInfo) -> Result<Option<TypeLayout>, LayoutError> {
    if info.name != self.types.builtins.sym_array_fixed { return Ok(None) }
    let (Some(&elem), Some(n)) = (info.args.first(), info.values.first()) else {
      return Err(LayoutError::unresolved())
    };
    let n = u64::try_from(n).map_err(|_| LayoutError::unresolved())?;
    let l = self.layout_of(elem)?;
    Ok(Some(TypeLayout {
      size: round_up(l.size, l.align).saturating_mul(n),
      align: l.align,
      ..TypeLayout::default()
    }))
  }

  fn fields_layout(
    &mut self, fields: &[(TypeId, LayoutAttrs)], attrs: LayoutAttrs,
  ) -> Result<TypeLayout, LayoutError> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut aligns = Vec::with_capacity(fields.len());
    let mut offset = 0u64;
    let mut align = u64::from(attrs.align.unwrap_or(1));
    for &(ty, fattrs) in fields {
      let l = self.layout_of(ty)?;
      let falign = match fattrs.align {
        Some(a) => u64::from(a),
        None if attrs.packed || fattrs.packed => 1,
        None => l.align,
      };
      offset = round_up(offset, falign);
      offsets.push(offset);
      aligns.push(falign);
      offset += l.size;
      align = align.max(falign);
    }
    Ok(TypeLayout {
      size: round_up(offset, align),
      align,
      field_offsets: offsets.into(),
      field_aligns: aligns.into(),
      tag_size: 0, tag_align: 0, payload_offset: 0,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use num::BigInt;
  use crate::FileId;
  use crate::symbol::intern;
  use crate::types::{FileSpan, IntTy};
  use crate::types::ty::{
    FieldAttrs, FieldInfo, Mutability, NominalKey, TypeStore,
  };

  fn field(name: &str, ty: TypeId) -> FieldInfo {
    FieldInfo { name: intern(name), ty, attrs: FieldAttrs::empty(), layout: LayoutAttrs::default() }
  }

  fn decl(n: u32) -> NominalKey {
    NominalKey::Decl(FileSpan::new(FileId::default(), n..n + 1))
  }

  #[test]
  fn reference_breaks_recursion() {
    let mut ts = TypeStore::new();
    let node = ts.register_struct(intern("Node"), decl(0), Box::new([]));
    let next = ts.intern(TypeKind::Ref(Mutability::Not, node));
    let f = field("next", next);
    ts.set_struct_fields(node, Box::new([f]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(node).expect("sized");
    assert_eq!((l.size, l.align), (8, 8));
  }

  #[test]
  fn value_recursion_is_unsized() {
    let mut ts = TypeStore::new();
    let node = ts.register_struct(intern("Node"), decl(0), Box::new([]));
    // Node? = Option<Node>, a union of nothing and Node by value
    let (opt, _) = ts.register_union_instance(
      intern("Option"), NominalKey::Builtin(ts.builtins.sym_option), Box::new([node]));
    ts.set_union_members(opt, Box::new([UnionMember::Nothing, UnionMember::Value(node)]));
    let f = field("next", opt);
    ts.set_struct_fields(node, Box::new([f]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let err = eng.layout_of(node).expect_err("unsized");
    assert_eq!(err.kind, LayoutErrorKind::RecursiveUnsized);
    assert!(err.cycle.iter().any(|n| n == "Node"), "cycle names the type: {:?}", err.cycle);
    // cached short-circuit returns the same error
    let again = eng.layout_of(node).expect_err("still unsized");
    assert_eq!(again.kind, LayoutErrorKind::RecursiveUnsized);
  }

  #[test]
  fn struct_offsets_and_padding() {
    let mut ts = TypeStore::new();
    let s = ts.register_struct(intern("S"), decl(0), Box::new([]));
    let b = ts.builtins.bool_;
    let i64t = ts.builtins.int(Size::S64);
    let fields = Box::new([field("a", b), field("b", i64t)]);
    ts.set_struct_fields(s, fields);
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(s).expect("sized");
    assert_eq!(&*l.field_offsets, &[0, 8]);
    assert_eq!((l.size, l.align), (16, 8));
  }

  #[test]
  fn packed_struct_removes_padding() {
    let mut ts = TypeStore::new();
    let s = ts.register_struct(intern("P"), decl(0), Box::new([]));
    let b = ts.builtins.bool_;
    let i64t = ts.builtins.int(Size::S64);
    ts.set_struct_fields(s, Box::new([field("a", b), field("b", i64t)]));
    ts.set_type_layout_attrs(s, LayoutAttrs { packed: true, align: None });
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(s).expect("sized");
    assert_eq!(&*l.field_offsets, &[0, 1]);
    assert_eq!((l.size, l.align), (9, 1));
  }

  #[test]
  fn attribute_fingerprint_distinguishes_cache_entries() {
    let mut ts = TypeStore::new();
    let s = ts.register_struct(intern("F"), decl(0), Box::new([]));
    let i32t = ts.builtins.int(Size::S32);
    ts.set_struct_fields(s, Box::new([field("a", i32t)]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let plain = eng.fingerprint(s);
    drop(eng);
    ts.set_type_layout_attrs(s, LayoutAttrs { packed: true, align: None });
    let eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    assert_ne!(plain, eng.fingerprint(s));
  }

  #[test]
  fn union_layout_formula() {
    let mut ts = TypeStore::new();
    let u = ts.register_union(intern("Shape"), decl(0), Box::new([]));
    let f64t = ts.builtins.float(Size::S64);
    ts.set_union_members(u, Box::new([
      UnionMember::Nothing,
      UnionMember::Tag(intern("circle"), Box::new([f64t])),
      UnionMember::Tag(intern("rect"), Box::new([f64t, f64t])),
    ]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(u).expect("sized");
    assert_eq!(l.tag_size, 1);
    assert_eq!(l.payload_offset, 8);
    assert_eq!(l.align, 8);
    assert_eq!(l.size, 24, "tag, padding, then the largest payload");
  }

  #[test]
  fn fixed_arrays_use_value_args() {
    let mut ts = TypeStore::new();
    let i32t = ts.builtins.int(Size::S32);
    let (arr, _) = ts.register_struct_instance(
      intern("ArrayFixed"), NominalKey::Builtin(ts.builtins.sym_array_fixed),
      Box::new([i32t]), Box::new([BigInt::from(5)]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(arr).expect("sized");
    assert_eq!((l.size, l.align), (20, 4));
  }

  #[test]
  fn enum_uses_base_type() {
    let mut ts = TypeStore::new();
    let e = ts.register_enum(intern("Color"), decl(0), IntTy::Uint(Size::S8), Box::new([]));
    let mut eng = LayoutEngine::new(&ts, TargetSpec::X86_64_LINUX_GNU);
    let l = eng.layout_of(e).expect("sized");
    assert_eq!((l.size, l.align), (1, 1));
  }
}
