//! The type interner. Every type in a compilation is an interned record
//! addressed by [`TypeId`]; structural types are deduplicated by descriptor
//! equality and nominal types by declaration plus argument tuple. Heavy
//! per-type data (fields, members, variants) lives in side arenas keyed by a
//! slot number embedded in the descriptor.

use std::fmt::Write as _;
use hashbrown::{HashMap, HashSet};
use num::BigInt;
use smallvec::SmallVec;
use crate::Idx;
use crate::symbol::{Symbol, intern};
use super::{FileSpan, IntTy, Size};
use super::entity::SymbolId;

crate::mk_id! {
  /// An interned type. `TypeId::NONE` (index 0) is the "absent or invalid"
  /// sentinel; every real type has a nonzero id.
  TypeId,
  /// A slot in the struct info arena.
  StructId,
  /// A slot in the union info arena.
  UnionId,
  /// A slot in the alias info arena.
  AliasId,
  /// A slot in the enum info arena.
  EnumId,
  /// A slot in the type parameter info arena.
  TypeParamId,
}

impl TypeId {
  /// The sentinel for "no type": expressions that failed to check keep this
  /// id and downstream phases skip typed work on them.
  pub const NONE: Self = Self(0);

  /// Whether this is a real type.
  #[must_use] pub fn exists(self) -> bool { self != Self::NONE }
}

/// Reference mutability. Part of type identity: `&T` and `&mut T` are
/// distinct types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mutability {
  /// A shared reference.
  Not,
  /// An exclusive reference.
  Mut,
}

/// A type descriptor. Interning two equal descriptors yields the same
/// [`TypeId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
  /// The error type, produced when checking fails. Never interned to a
  /// real id.
  Invalid,
  /// The unit type `()`.
  Unit,
  /// The diverging type of expressions that do not produce a value.
  Nothing,
  /// The boolean type.
  Bool,
  /// The string type, a heap-allocated handle.
  Str,
  /// A signed integer type.
  Int(Size),
  /// An unsigned integer type.
  Uint(Size),
  /// A floating point type.
  Float(Size),
  /// A const-generic value lifted to the type level, such as the `3` in
  /// `Maze<3, 3>`. Identity is by value.
  Const(BigInt),
  /// A dynamic array `[T]`, a pointer-sized handle. Fixed arrays are
  /// instances of the built-in `ArrayFixed<T, N>` struct.
  Array(TypeId),
  /// A raw pointer.
  Ptr(TypeId),
  /// A reference, shared or exclusive.
  Ref(Mutability, TypeId),
  /// An owning pointer `own T`.
  Own(TypeId),
  /// A nominal struct; data in the struct arena.
  Struct(StructId),
  /// A tag union; data in the union arena.
  Union(UnionId),
  /// A type alias; data in the alias arena.
  Alias(AliasId),
  /// An enum over an integer base type; data in the enum arena.
  Enum(EnumId),
  /// A tuple of element types.
  Tuple(Box<[TypeId]>),
  /// A function type: parameter types and result type.
  Fn(Box<[TypeId]>, TypeId),
  /// A generic parameter; identity is (owner, index), data in the param
  /// arena.
  Generic(TypeParamId),
}

bitflags::bitflags! {
  /// Attributes on a struct field.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct FieldAttrs: u8 {
    /// The field is visible outside the defining module.
    const PUB = 1;
  }
}

/// Layout-affecting attributes on a type or field: `@packed` and
/// `@align(N)`. Folded into the layout cache fingerprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LayoutAttrs {
  /// Suppress inter-field padding.
  pub packed: bool,
  /// Override the natural alignment.
  pub align: Option<u32>,
}

impl LayoutAttrs {
  /// Whether no attribute is set.
  #[must_use] pub fn is_default(self) -> bool { self == Self::default() }
}

/// A field of a struct.
#[derive(Clone, Debug)]
pub struct FieldInfo {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: TypeId,
  /// Field attributes.
  pub attrs: FieldAttrs,
  /// Layout attributes on the field.
  pub layout: LayoutAttrs,
}

/// The identity anchor of a nominal type: a user declaration is identified
/// by its declaration span, while importable built-ins (`Array<T>`,
/// `Map<K, V>`, `ArrayFixed<T, N>`, `Option<T>`) are identified by name so
/// that instances unify across modules.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NominalKey {
  /// A user declaration.
  Decl(FileSpan),
  /// An importable built-in, keyed by name.
  Builtin(Symbol),
}

/// Struct data: name, declaration, fields, and the generic parameter or
/// argument tuples.
#[derive(Clone, Debug)]
pub struct StructInfo {
  /// The struct name.
  pub name: Symbol,
  /// The declaration anchor.
  pub decl: NominalKey,
  /// The ordered fields. Empty until [`TypeStore::set_struct_fields`] runs.
  pub fields: Box<[FieldInfo]>,
  /// Generic parameters of the definition, as `Generic` type ids. Empty for
  /// instances.
  pub params: Box<[TypeId]>,
  /// Type arguments, for instances of a generic definition.
  pub args: Box<[TypeId]>,
  /// Const-generic value arguments, for instances.
  pub values: Box<[BigInt]>,
}

/// A member of a tag union.
#[derive(Clone, Debug)]
pub enum UnionMember {
  /// A bare value member: the union can hold a `T` directly.
  Value(TypeId),
  /// The `nothing` sentinel member, carrying no payload.
  Nothing,
  /// A named tag variant with ordered payload types.
  Tag(Symbol, Box<[TypeId]>),
}

/// Tag union data.
#[derive(Clone, Debug)]
pub struct UnionInfo {
  /// The union name.
  pub name: Symbol,
  /// The declaration anchor.
  pub decl: NominalKey,
  /// The ordered members. Empty until [`TypeStore::set_union_members`] runs.
  pub members: Box<[UnionMember]>,
  /// Generic parameters of the definition.
  pub params: Box<[TypeId]>,
  /// Type arguments, for instances.
  pub args: Box<[TypeId]>,
}

/// Alias data.
#[derive(Clone, Debug)]
pub struct AliasInfo {
  /// The alias name.
  pub name: Symbol,
  /// The declaration anchor.
  pub decl: NominalKey,
  /// The aliased type. `TypeId::NONE` until the target is set.
  pub target: TypeId,
  /// Generic parameters of the definition.
  pub params: Box<[TypeId]>,
  /// Type arguments, for instances.
  pub args: Box<[TypeId]>,
}

/// The value of an enum variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnumValue {
  /// An integer value.
  Int(BigInt),
  /// A string value.
  Str(Symbol),
}

/// One enum variant.
#[derive(Clone, Debug)]
pub struct EnumVariant {
  /// The variant name.
  pub name: Symbol,
  /// The variant value.
  pub value: EnumValue,
}

/// Enum data.
#[derive(Clone, Debug)]
pub struct EnumInfo {
  /// The enum name.
  pub name: Symbol,
  /// The declaration anchor.
  pub decl: NominalKey,
  /// The integer base type.
  pub base: IntTy,
  /// The variants.
  pub variants: Box<[EnumVariant]>,
}

/// Generic parameter data. Identity is `(owner, index)`.
#[derive(Clone, Debug)]
pub struct TypeParamInfo {
  /// The parameter name.
  pub name: Symbol,
  /// The symbol that declares the parameter.
  pub owner: SymbolId,
  /// The position among the owner's parameters.
  pub index: u32,
  /// Whether this is a const-generic parameter.
  pub is_const: bool,
  /// For const parameters, the type of the value.
  pub const_ty: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct InstanceKey {
  owner: NominalKey,
  args: Box<[TypeId]>,
  values: Box<[BigInt]>,
}

/// Handles to the primitive types, interned once at store construction.
#[derive(Clone, Debug)]
pub struct Builtins {
  /// The unit type.
  pub unit: TypeId,
  /// The diverging type.
  pub nothing: TypeId,
  /// The boolean type.
  pub bool_: TypeId,
  /// The string type.
  pub str_: TypeId,
  ints: [TypeId; 5],
  uints: [TypeId; 5],
  floats: [TypeId; 5],
  /// The name of the built-in dynamic array type.
  pub sym_array: Symbol,
  /// The name of the built-in fixed array type.
  pub sym_array_fixed: Symbol,
  /// The name of the built-in map type.
  pub sym_map: Symbol,
  /// The name of the built-in option type.
  pub sym_option: Symbol,
}

fn size_index(sz: Size) -> usize {
  match sz { Size::S8 => 0, Size::S16 => 1, Size::S32 => 2, Size::S64 => 3, Size::Any => 4 }
}

impl Builtins {
  /// The signed integer type of the given width.
  #[must_use] pub fn int(&self, sz: Size) -> TypeId { self.ints[size_index(sz)] }
  /// The unsigned integer type of the given width.
  #[must_use] pub fn uint(&self, sz: Size) -> TypeId { self.uints[size_index(sz)] }
  /// The floating point type of the given width.
  #[must_use] pub fn float(&self, sz: Size) -> TypeId { self.floats[size_index(sz)] }
  /// The type for an [`IntTy`].
  #[must_use] pub fn int_ty(&self, ity: IntTy) -> TypeId {
    match ity { IntTy::Int(sz) => self.int(sz), IntTy::Uint(sz) => self.uint(sz) }
  }
}

/// The type interner. One per compilation; all phases share it.
#[derive(Debug)]
pub struct TypeStore {
  kinds: Vec<TypeKind>,
  table: HashMap<TypeKind, TypeId>,
  structs: Vec<StructInfo>,
  unions: Vec<UnionInfo>,
  aliases: Vec<AliasInfo>,
  enums: Vec<EnumInfo>,
  params: Vec<TypeParamInfo>,
  param_table: HashMap<(SymbolId, u32), TypeId>,
  instances: HashMap<InstanceKey, TypeId>,
  inst_in_progress: HashSet<InstanceKey>,
  copy_marks: HashSet<TypeId>,
  layout_attrs: HashMap<TypeId, LayoutAttrs>,
  /// The primitive type handles.
  pub builtins: Builtins,
}

impl Default for TypeStore {
  fn default() -> Self { Self::new() }
}

impl TypeStore {
  /// Create a store with the primitives interned.
  #[must_use] pub fn new() -> Self {
    let mut kinds = vec![TypeKind::Invalid];
    let mut table = HashMap::new();
    table.insert(TypeKind::Invalid, TypeId::NONE);
    let mut alloc = |k: TypeKind| {
      let id = TypeId::from_usize(kinds.len());
      table.insert(k.clone(), id);
      kinds.push(k);
      id
    };
    const SIZES: [Size; 5] = [Size::S8, Size::S16, Size::S32, Size::S64, Size::Any];
    let builtins = Builtins {
      unit: alloc(TypeKind::Unit),
      nothing: alloc(TypeKind::Nothing),
      bool_: alloc(TypeKind::Bool),
      str_: alloc(TypeKind::Str),
      ints: SIZES.map(|sz| alloc(TypeKind::Int(sz))),
      uints: SIZES.map(|sz| alloc(TypeKind::Uint(sz))),
      floats: SIZES.map(|sz| alloc(TypeKind::Float(sz))),
      sym_array: intern("Array"),
      sym_array_fixed: intern("ArrayFixed"),
      sym_map: intern("Map"),
      sym_option: intern("Option"),
    };
    Self {
      kinds, table, builtins,
      structs: vec![], unions: vec![], aliases: vec![], enums: vec![], params: vec![],
      param_table: HashMap::new(),
      instances: HashMap::new(),
      inst_in_progress: HashSet::new(),
      copy_marks: HashSet::new(),
      layout_attrs: HashMap::new(),
    }
  }

  fn alloc(&mut self, k: TypeKind) -> TypeId {
    let id = TypeId::from_usize(self.kinds.len());
    self.table.insert(k.clone(), id);
    self.kinds.push(k);
    id
  }

  /// Intern a structural descriptor. Idempotent: equal descriptors yield
  /// equal ids. `Invalid` interns to [`TypeId::NONE`].
  pub fn intern(&mut self, k: TypeKind) -> TypeId {
    if let Some(&id) = self.table.get(&k) { return id }
    self.alloc(k)
  }

  /// Look up a descriptor. Out-of-range ids yield `None`.
  #[must_use] pub fn lookup(&self, id: TypeId) -> Option<&TypeKind> {
    self.kinds.get(id.into_usize())
  }

  /// Look up a descriptor that is known to be in range.
  #[must_use] pub fn kind(&self, id: TypeId) -> &TypeKind {
    self.lookup(id).expect("dangling TypeId")
  }

  /// The struct data for a slot.
  #[must_use] pub fn struct_info(&self, id: StructId) -> &StructInfo {
    &self.structs[id.into_usize()]
  }

  /// The union data for a slot.
  #[must_use] pub fn union_info(&self, id: UnionId) -> &UnionInfo {
    &self.unions[id.into_usize()]
  }

  /// The alias data for a slot.
  #[must_use] pub fn alias_info(&self, id: AliasId) -> &AliasInfo {
    &self.aliases[id.into_usize()]
  }

  /// The enum data for a slot.
  #[must_use] pub fn enum_info(&self, id: EnumId) -> &EnumInfo {
    &self.enums[id.into_usize()]
  }

  /// The parameter data for a slot.
  #[must_use] pub fn param_info(&self, id: TypeParamId) -> &TypeParamInfo {
    &self.params[id.into_usize()]
  }

  /// The struct data behind a type, if it is a struct (after alias
  /// resolution).
  #[must_use] pub fn as_struct(&self, ty: TypeId) -> Option<&StructInfo> {
    match *self.lookup(self.resolve_alias(ty))? {
      TypeKind::Struct(s) => Some(self.struct_info(s)),
      _ => None,
    }
  }

  /// The union data behind a type, if it is a union (after alias
  /// resolution).
  #[must_use] pub fn as_union(&self, ty: TypeId) -> Option<&UnionInfo> {
    match *self.lookup(self.resolve_alias(ty))? {
      TypeKind::Union(u) => Some(self.union_info(u)),
      _ => None,
    }
  }

  /// Register a struct definition. Fields are attached later with
  /// [`Self::set_struct_fields`], after the field types can be resolved.
  pub fn register_struct(
    &mut self, name: Symbol, decl: NominalKey, params: Box<[TypeId]>,
  ) -> TypeId {
    let slot = StructId::from_usize(self.structs.len());
    self.structs.push(StructInfo {
      name, decl, fields: Box::new([]), params, args: Box::new([]), values: Box::new([]),
    });
    self.alloc(TypeKind::Struct(slot))
  }

  /// Attach fields to a struct definition or instance.
  pub fn set_struct_fields(&mut self, ty: TypeId, fields: Box<[FieldInfo]>) {
    let TypeKind::Struct(slot) = *self.kind(ty) else { panic!("not a struct") };
    self.structs[slot.into_usize()].fields = fields;
  }

  /// Register a union definition. Members are attached later.
  pub fn register_union(
    &mut self, name: Symbol, decl: NominalKey, params: Box<[TypeId]>,
  ) -> TypeId {
    let slot = UnionId::from_usize(self.unions.len());
    self.unions.push(UnionInfo {
      name, decl, members: Box::new([]), params, args: Box::new([]),
    });
    self.alloc(TypeKind::Union(slot))
  }

  /// Attach members to a union definition or instance.
  pub fn set_union_members(&mut self, ty: TypeId, members: Box<[UnionMember]>) {
    let TypeKind::Union(slot) = *self.kind(ty) else { panic!("not a union") };
    self.unions[slot.into_usize()].members = members;
  }

  /// Register an alias definition. The target is attached later.
  pub fn register_alias(
    &mut self, name: Symbol, decl: NominalKey, params: Box<[TypeId]>,
  ) -> TypeId {
    let slot = AliasId::from_usize(self.aliases.len());
    self.aliases.push(AliasInfo {
      name, decl, target: TypeId::NONE, params, args: Box::new([]),
    });
    self.alloc(TypeKind::Alias(slot))
  }

  /// Attach the target to an alias definition or instance.
  pub fn set_alias_target(&mut self, ty: TypeId, target: TypeId) {
    let TypeKind::Alias(slot) = *self.kind(ty) else { panic!("not an alias") };
    self.aliases[slot.into_usize()].target = target;
  }

  /// Register an enum with its variants.
  pub fn register_enum(
    &mut self, name: Symbol, decl: NominalKey, base: IntTy, variants: Box<[EnumVariant]>,
  ) -> TypeId {
    let slot = EnumId::from_usize(self.enums.len());
    self.enums.push(EnumInfo { name, decl, base, variants });
    self.alloc(TypeKind::Enum(slot))
  }

  /// Register a generic parameter. Identity is `(owner, index)`: repeated
  /// registration returns the existing id.
  pub fn register_type_param(
    &mut self, name: Symbol, owner: SymbolId, index: u32, is_const: bool, const_ty: TypeId,
  ) -> TypeId {
    if let Some(&id) = self.param_table.get(&(owner, index)) { return id }
    let slot = TypeParamId::from_usize(self.params.len());
    self.params.push(TypeParamInfo { name, owner, index, is_const, const_ty });
    let id = self.alloc(TypeKind::Generic(slot));
    self.param_table.insert((owner, index), id);
    id
  }

  /// Register a struct instance for `(decl, args, values)`, or return the
  /// existing one. The caller attaches substituted fields on first
  /// registration.
  pub fn register_struct_instance(
    &mut self, name: Symbol, decl: NominalKey, args: Box<[TypeId]>, values: Box<[BigInt]>,
  ) -> (TypeId, bool) {
    let key = InstanceKey { owner: decl.clone(), args: args.clone(), values: values.clone() };
    if let Some(&id) = self.instances.get(&key) { return (id, false) }
    let slot = StructId::from_usize(self.structs.len());
    self.structs.push(StructInfo {
      name, decl, fields: Box::new([]), params: Box::new([]), args, values,
    });
    let id = self.alloc(TypeKind::Struct(slot));
    self.instances.insert(key, id);
    (id, true)
  }

  /// Register a union instance, or return the existing one.
  pub fn register_union_instance(
    &mut self, name: Symbol, decl: NominalKey, args: Box<[TypeId]>,
  ) -> (TypeId, bool) {
    let key = InstanceKey { owner: decl.clone(), args: args.clone(), values: Box::new([]) };
    if let Some(&id) = self.instances.get(&key) { return (id, false) }
    let slot = UnionId::from_usize(self.unions.len());
    self.unions.push(UnionInfo { name, decl, members: Box::new([]), params: Box::new([]), args });
    let id = self.alloc(TypeKind::Union(slot));
    self.instances.insert(key, id);
    (id, true)
  }

  /// Register an alias instance, or return the existing one.
  pub fn register_alias_instance(
    &mut self, name: Symbol, decl: NominalKey, args: Box<[TypeId]>,
  ) -> (TypeId, bool) {
    let key = InstanceKey { owner: decl.clone(), args: args.clone(), values: Box::new([]) };
    if let Some(&id) = self.instances.get(&key) { return (id, false) }
    let slot = AliasId::from_usize(self.aliases.len());
    self.aliases.push(AliasInfo {
      name, decl, target: TypeId::NONE, params: Box::new([]), args,
    });
    let id = self.alloc(TypeKind::Alias(slot));
    self.instances.insert(key, id);
    (id, true)
  }

  /// Find an existing nominal instance.
  #[must_use] pub fn find_instance(
    &self, decl: &NominalKey, args: &[TypeId], values: &[BigInt],
  ) -> Option<TypeId> {
    let key = InstanceKey { owner: decl.clone(), args: args.into(), values: values.into() };
    self.instances.get(&key).copied()
  }

  /// Mark the start of an instantiation, returning false if the same key is
  /// already being expanded (a self-referential generic).
  pub fn begin_instance(&mut self, decl: &NominalKey, args: &[TypeId], values: &[BigInt]) -> bool {
    let key = InstanceKey { owner: decl.clone(), args: args.into(), values: values.into() };
    self.inst_in_progress.insert(key)
  }

  /// Mark the end of an instantiation started by [`Self::begin_instance`].
  pub fn end_instance(&mut self, decl: &NominalKey, args: &[TypeId], values: &[BigInt]) {
    let key = InstanceKey { owner: decl.clone(), args: args.into(), values: values.into() };
    self.inst_in_progress.remove(&key);
  }

  /// Mark a user-defined type as `Copy`. Populated by the semantic layer.
  pub fn mark_copy(&mut self, ty: TypeId) { self.copy_marks.insert(ty); }

  /// Whether values of this type may be duplicated by byte copy.
  #[must_use] pub fn is_copy(&self, ty: TypeId) -> bool {
    self.is_copy_inner(ty, &mut HashSet::new())
  }

  fn is_copy_inner(&self, ty: TypeId, visiting: &mut HashSet<TypeId>) -> bool {
    if !visiting.insert(ty) { return false }
    let r = match self.lookup(ty) {
      None | Some(TypeKind::Invalid) => false,
      Some(TypeKind::Unit | TypeKind::Nothing | TypeKind::Bool
        | TypeKind::Int(_) | TypeKind::Uint(_) | TypeKind::Float(_)
        | TypeKind::Const(_) | TypeKind::Enum(_) | TypeKind::Ptr(_)
        | TypeKind::Fn(..)) => true,
      Some(TypeKind::Str | TypeKind::Array(_)) => false,
      Some(TypeKind::Ref(mutbl, _)) => *mutbl == Mutability::Not,
      Some(&TypeKind::Own(t)) => self.is_copy_inner(t, visiting),
      Some(&TypeKind::Alias(a)) => {
        let tgt = self.aliases[a.into_usize()].target;
        tgt.exists() && self.is_copy_inner(tgt, visiting)
      }
      Some(TypeKind::Tuple(ts)) => {
        let ts = ts.clone();
        ts.iter().all(|&t| self.is_copy_inner(t, visiting))
      }
      Some(TypeKind::Struct(_) | TypeKind::Union(_)) => self.copy_marks.contains(&ty),
      Some(TypeKind::Generic(_)) => false,
    };
    visiting.remove(&ty);
    r
  }

  /// The immediate target of an alias, or `None` for non-aliases.
  #[must_use] pub fn alias_target(&self, ty: TypeId) -> Option<TypeId> {
    match *self.lookup(ty)? {
      TypeKind::Alias(a) => Some(self.aliases[a.into_usize()].target),
      _ => None,
    }
  }

  /// Follow an alias chain to a non-alias type. Terminates on cycles,
  /// returning [`TypeId::NONE`]. Callers must use this before structurally
  /// matching on a type.
  #[must_use] pub fn resolve_alias(&self, mut ty: TypeId) -> TypeId {
    let mut visiting: SmallVec<[TypeId; 4]> = SmallVec::new();
    while let Some(tgt) = self.alias_target(ty) {
      if visiting.contains(&ty) { return TypeId::NONE }
      visiting.push(ty);
      ty = tgt;
    }
    ty
  }

  /// The layout attributes recorded for a type.
  #[must_use] pub fn type_layout_attrs(&self, ty: TypeId) -> LayoutAttrs {
    self.layout_attrs.get(&ty).copied().unwrap_or_default()
  }

  /// Record layout attributes for a type.
  pub fn set_type_layout_attrs(&mut self, ty: TypeId, attrs: LayoutAttrs) {
    if attrs.is_default() { self.layout_attrs.remove(&ty); } else {
      self.layout_attrs.insert(ty, attrs);
    }
  }

  /// The number of interned types, counting the sentinel.
  #[must_use] pub fn len(&self) -> usize { self.kinds.len() }

  /// Whether the store holds only the primitives.
  #[must_use] pub fn is_empty(&self) -> bool { false }

  /// Render a type for diagnostics.
  #[must_use] pub fn name(&self, ty: TypeId) -> String {
    let mut s = String::new();
    self.write_name(ty, &mut s);
    s
  }

  fn write_name(&self, ty: TypeId, out: &mut String) {
    match self.lookup(ty) {
      None | Some(TypeKind::Invalid) => out.push_str("<error>"),
      Some(TypeKind::Unit) => out.push_str("()"),
      Some(TypeKind::Nothing) => out.push_str("nothing"),
      Some(TypeKind::Bool) => out.push_str("bool"),
      Some(TypeKind::Str) => out.push_str("string"),
      Some(&TypeKind::Int(sz)) => { let _ = write!(out, "{}", IntTy::Int(sz)); }
      Some(&TypeKind::Uint(sz)) => { let _ = write!(out, "{}", IntTy::Uint(sz)); }
      Some(&TypeKind::Float(sz)) => {
        if sz == Size::Any { out.push_str("float") } else { let _ = write!(out, "f{sz}"); }
      }
      Some(TypeKind::Const(n)) => { let _ = write!(out, "{n}"); }
      Some(&TypeKind::Array(t)) => {
        out.push('[');
        self.write_name(t, out);
        out.push(']');
      }
      Some(&TypeKind::Ptr(t)) => { out.push('*'); self.write_name(t, out) }
      Some(&TypeKind::Ref(mutbl, t)) => {
        out.push('&');
        if mutbl == Mutability::Mut { out.push_str("mut ") }
        self.write_name(t, out);
      }
      Some(&TypeKind::Own(t)) => { out.push_str("own "); self.write_name(t, out) }
      Some(&TypeKind::Struct(s)) => {
        let info = self.struct_info(s);
        let _ = write!(out, "{}", info.name);
        self.write_args(&info.args.clone(), &info.values.clone(), out);
      }
      Some(&TypeKind::Union(u)) => {
        let info = self.union_info(u);
        let _ = write!(out, "{}", info.name);
        self.write_args(&info.args.clone(), &[], out);
      }
      Some(&TypeKind::Alias(a)) => {
        let info = self.alias_info(a);
        let _ = write!(out, "{}", info.name);
        self.write_args(&info.args.clone(), &[], out);
      }
      Some(&TypeKind::Enum(e)) => { let _ = write!(out, "{}", self.enum_info(e).name); }
      Some(TypeKind::Tuple(ts)) => {
        out.push('(');
        for (i, &t) in ts.clone().iter().enumerate() {
          if i != 0 { out.push_str(", ") }
          self.write_name(t, out);
        }
        out.push(')');
      }
      Some(TypeKind::Fn(params, ret)) => {
        let (params, ret) = (params.clone(), *ret);
        out.push_str("fn(");
        for (i, &t) in params.iter().enumerate() {
          if i != 0 { out.push_str(", ") }
          self.write_name(t, out);
        }
        out.push_str(") -> ");
        self.write_name(ret, out);
      }
      Some(&TypeKind::Generic(p)) => { let _ = write!(out, "{}", self.param_info(p).name); }
    }
  }

  fn write_args(&self, args: &[TypeId], values: &[BigInt], out: &mut String) {
    if args.is_empty() && values.is_empty() { return }
    out.push('<');
    let mut first = true;
    for &a in args {
      if !first { out.push_str(", ") }
      first = false;
      self.write_name(a, out);
    }
    for v in values {
      if !first { out.push_str(", ") }
      first = false;
      let _ = write!(out, "{v}");
    }
    out.push('>');
  }

  /// Substitute generic parameters in a type according to `map` (keyed by
  /// the `Generic` type id), interning the result. Nominal types whose
  /// arguments change are re-instantiated through the instance maps; a
  /// per-call visiting set short-circuits cyclic nominal graphs.
  pub fn substitute(&mut self, ty: TypeId, map: &HashMap<TypeId, TypeId>) -> TypeId {
    self.subst_inner(ty, map, &mut HashSet::new())
  }

  fn subst_inner(
    &mut self, ty: TypeId, map: &HashMap<TypeId, TypeId>, visiting: &mut HashSet<TypeId>,
  ) -> TypeId {
    if let Some(&r) = map.get(&ty) { return r }
    if !visiting.insert(ty) { return ty }
    let r = match self.kind(ty).clone() {
      TypeKind::Invalid | TypeKind::Unit | TypeKind::Nothing | TypeKind::Bool
      | TypeKind::Str | TypeKind::Int(_) | TypeKind::Uint(_) | TypeKind::Float(_)
      | TypeKind::Const(_) | TypeKind::Enum(_) | TypeKind::Generic(_) => ty,
      TypeKind::Array(t) => {
        let t2 = self.subst_inner(t, map, visiting);
        if t2 == t { ty } else { self.intern(TypeKind::Array(t2)) }
      }
      TypeKind::Ptr(t) => {
        let t2 = self.subst_inner(t, map, visiting);
        if t2 == t { ty } else { self.intern(TypeKind::Ptr(t2)) }
      }
      TypeKind::Ref(mutbl, t) => {
        let t2 = self.subst_inner(t, map, visiting);
        if t2 == t { ty } else { self.intern(TypeKind::Ref(mutbl, t2)) }
      }
      TypeKind::Own(t) => {
        let t2 = self.subst_inner(t, map, visiting);
        if t2 == t { ty } else { self.intern(TypeKind::Own(t2)) }
      }
      TypeKind::Tuple(ts) => {
        let ts2: Box<[TypeId]> = ts.iter().map(|&t| self.subst_inner(t, map, visiting)).collect();
        if ts2 == ts { ty } else { self.intern(TypeKind::Tuple(ts2)) }
      }
      TypeKind::Fn(params, ret) => {
        let params2: Box<[TypeId]> =
          params.iter().map(|&t| self.subst_inner(t, map, visiting)).collect();
        let ret2 = self.subst_inner(ret, map, visiting);
        if params2 == params && ret2 == ret { ty } else {
          self.intern(TypeKind::Fn(params2, ret2))
        }
      }
      TypeKind::Struct(slot) => self.subst_struct(ty, slot, map, visiting),
      TypeKind::Union(slot) => self.subst_union(ty, slot, map, visiting),
      TypeKind::Alias(slot) => self.subst_alias(ty, slot, map, visiting),
    };
    visiting.remove(&ty);
    r
  }

  fn subst_struct(
    &mut self, ty: TypeId, slot: StructId, map: &HashMap<TypeId, TypeId>,
    visiting: &mut HashSet<TypeId>,
  ) -> TypeId {
    let info = self.struct_info(slot).clone();
    let args2: Box<[TypeId]> =
      info.args.iter().map(|&t| self.subst_inner(t, map, visiting)).collect();
    if args2 == info.args { return ty }
    let (id, fresh) =
      self.register_struct_instance(info.name, info.decl, args2, info.values.clone());
    if fresh {
      let fields = info.fields.iter().map(|f| FieldInfo {
        ty: self.subst_inner(f.ty, map, visiting), ..f.clone()
      }).collect();
      self.set_struct_fields(id, fields);
    }
    id
  }

  fn subst_union(
    &mut self, ty: TypeId, slot: UnionId, map: &HashMap<TypeId, TypeId>,
    visiting: &mut HashSet<TypeId>,
  ) -> TypeId {
    let info = self.union_info(slot).clone();
    let args2: Box<[TypeId]> =
      info.args.iter().map(|&t| self.subst_inner(t, map, visiting)).collect();
    if args2 == info.args { return ty }
    let (id, fresh) = self.register_union_instance(info.name, info.decl, args2);
    if fresh {
      let members = info.members.iter().map(|m| match m {
        UnionMember::Value(t) => UnionMember::Value(self.subst_inner(*t, map, visiting)),
        UnionMember::Nothing => UnionMember::Nothing,
        UnionMember::Tag(name, tys) => UnionMember::Tag(*name,
          tys.iter().map(|&t| self.subst_inner(t, map, visiting)).collect()),
      }).collect();
      self.set_union_members(id, members);
    }
    id
  }

  fn subst_alias(
    &mut self, ty: TypeId, slot: AliasId, map: &HashMap<TypeId, TypeId>,
    visiting: &mut HashSet<TypeId>,
  ) -> TypeId {
    let info = self.alias_info(slot).clone();
    let args2: Box<[TypeId]> =
      info.args.iter().map(|&t| self.subst_inner(t, map, visiting)).collect();
    if args2 == info.args { return ty }
    let (id, fresh) = self.register_alias_instance(info.name, info.decl, args2);
    if fresh {
      let target = self.subst_inner(info.target, map, visiting);
      self.set_alias_target(id, target);
    }
    id
  }
}

impl UnionInfo {
  /// The index of the tag with the given name, if any.
  #[must_use] pub fn tag_index(&self, name: Symbol) -> Option<u32> {
    self.members.iter().position(|m| matches!(m, UnionMember::Tag(n, _) if *n == name))
      .map(|i| i.try_into().expect("too many members"))
  }
}

impl StructInfo {
  /// The index of the field with the given name, if any.
  #[must_use] pub fn field_index(&self, name: Symbol) -> Option<u32> {
    self.fields.iter().position(|f| f.name == name)
      .map(|i| i.try_into().expect("too many fields"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn span(n: u32) -> FileSpan {
    FileSpan::new(crate::FileId::default(), n..n + 1)
  }

  #[test]
  fn intern_idempotent() {
    let mut ts = TypeStore::new();
    let int = ts.builtins.int(Size::S32);
    let a = ts.intern(TypeKind::Array(int));
    let b = ts.intern(TypeKind::Array(int));
    assert_eq!(a, b);
    assert_eq!(ts.intern(TypeKind::Invalid), TypeId::NONE);
    assert!(ts.lookup(TypeId(9999)).is_none());
  }

  #[test]
  fn ref_mutability_is_identity() {
    let mut ts = TypeStore::new();
    let int = ts.builtins.int(Size::S64);
    let shared = ts.intern(TypeKind::Ref(Mutability::Not, int));
    let excl = ts.intern(TypeKind::Ref(Mutability::Mut, int));
    assert_ne!(shared, excl);
  }

  #[test]
  fn nominal_instance_identity() {
    let mut ts = TypeStore::new();
    let name = intern("Pair");
    let decl = NominalKey::Decl(span(10));
    let int = ts.builtins.int(Size::S32);
    let (a, fresh_a) =
      ts.register_struct_instance(name, decl.clone(), Box::new([int]), Box::new([]));
    let (b, fresh_b) =
      ts.register_struct_instance(name, decl.clone(), Box::new([int]), Box::new([]));
    assert!(fresh_a);
    assert!(!fresh_b);
    assert_eq!(a, b);
    let (c, _) = ts.register_struct_instance(
      name, decl, Box::new([int]), Box::new([BigInt::from(3)]));
    assert_ne!(a, c, "value arguments are part of identity");
  }

  #[test]
  fn copy_rules() {
    let mut ts = TypeStore::new();
    let int = ts.builtins.int(Size::S32);
    let s = ts.builtins.str_;
    let own_int = ts.intern(TypeKind::Own(int));
    let own_str = ts.intern(TypeKind::Own(s));
    let shr = ts.intern(TypeKind::Ref(Mutability::Not, s));
    let mt = ts.intern(TypeKind::Ref(Mutability::Mut, int));
    assert!(ts.is_copy(int));
    assert!(!ts.is_copy(s));
    assert!(ts.is_copy(own_int), "own T is Copy iff T is");
    assert!(!ts.is_copy(own_str));
    assert!(ts.is_copy(shr));
    assert!(!ts.is_copy(mt));
  }

  #[test]
  fn alias_cycle_terminates() {
    let mut ts = TypeStore::new();
    let a = ts.register_alias(intern("A"), NominalKey::Decl(span(1)), Box::new([]));
    let b = ts.register_alias(intern("B"), NominalKey::Decl(span(2)), Box::new([]));
    ts.set_alias_target(a, b);
    ts.set_alias_target(b, a);
    assert_eq!(ts.resolve_alias(a), TypeId::NONE);
    let int = ts.builtins.int(Size::S8);
    ts.set_alias_target(b, int);
    assert_eq!(ts.resolve_alias(a), int);
  }

  #[test]
  fn substitute_nested() {
    let mut ts = TypeStore::new();
    let owner = SymbolId::default();
    let t = ts.register_type_param(intern("T"), owner, 0, false, TypeId::NONE);
    let int = ts.builtins.int(Size::S64);
    let arr_t = ts.intern(TypeKind::Array(t));
    let tup = ts.intern(TypeKind::Tuple(Box::new([arr_t, t])));
    let mut map = HashMap::new();
    map.insert(t, int);
    let out = ts.substitute(tup, &map);
    let arr_int = ts.intern(TypeKind::Array(int));
    let expect = ts.intern(TypeKind::Tuple(Box::new([arr_int, int])));
    assert_eq!(out, expect);
  }
}
