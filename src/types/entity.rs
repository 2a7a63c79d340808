//! The symbol model: processed declarations, function signatures, and the
//! intrinsic name tables (primitive types, blocking methods).

use std::sync::LazyLock;
use hashbrown::HashMap;
use crate::Idx;
use crate::symbol::{Symbol, init_dense_symbol_map, intern};
use super::FileSpan;
use super::ast::ItemId;
use super::ty::TypeId;
use crate::FileId;

crate::mk_id! {
  /// An index into the symbol table.
  SymbolId
}

macro_rules! make_prims {
  {$($(#[$attr0:meta])* enum $name:ident { $($(#[$attr:meta])* $x:ident: $e:expr,)* })*} => {$(
    $(#[$attr0])*
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub enum $name { $($(#[$attr])* $x),* }

    impl $name {
      /// Evaluate a function on all elements of the type, with their names.
      pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
        $(f($name::$x, $e);)*
      }
      /// Convert a string into this type.
      #[allow(clippy::should_implement_trait)]
      #[must_use] pub fn from_str(s: &str) -> Option<Self> {
        match s {
          $($e => Some(Self::$x),)*
          _ => None
        }
      }

      /// Convert an interned name into this type.
      #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
        static SYMBOL_MAP: LazyLock<Box<[Option<$name>]>> = LazyLock::new(|| {
          init_dense_symbol_map(&[$((intern($e), $name::$x)),*])
        });
        SYMBOL_MAP.get(s.into_usize()).map_or(None, |x| *x)
      }
    }
  )*}
}

make_prims! {
  /// The primitive type names resolvable in any scope.
  enum PrimType {
    /// The width-unconstrained signed integer type.
    Int: "int",
    /// 8-bit signed integers.
    I8: "i8",
    /// 16-bit signed integers.
    I16: "i16",
    /// 32-bit signed integers.
    I32: "i32",
    /// 64-bit signed integers.
    I64: "i64",
    /// The width-unconstrained unsigned integer type.
    Uint: "uint",
    /// 8-bit unsigned integers.
    U8: "u8",
    /// 16-bit unsigned integers.
    U16: "u16",
    /// 32-bit unsigned integers.
    U32: "u32",
    /// 64-bit unsigned integers.
    U64: "u64",
    /// The width-unconstrained float type.
    Float: "float",
    /// 32-bit floats.
    F32: "f32",
    /// 64-bit floats.
    F64: "f64",
    /// The boolean type.
    Bool: "bool",
    /// The string type.
    Str: "string",
    /// The unit type.
    Unit: "unit",
    /// The diverging type.
    Nothing: "nothing",
  }

  /// The importable built-in generic types, whose instances unify by name
  /// across modules.
  enum PrimGeneric {
    /// The dynamic array `Array<T>`.
    Array: "Array",
    /// The fixed array `ArrayFixed<T, N>`.
    ArrayFixed: "ArrayFixed",
    /// The hash map `Map<K, V>`.
    Map: "Map",
    /// The optional type `Option<T>`.
    Option: "Option",
  }
}

/// The intrinsic methods that may suspend the calling task. Used by the
/// `@nonblocking` checker: calling any of these from a nonblocking function
/// is an error. A data table; receivers are matched by base type name.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockingMethod {
  /// `Mutex.lock`
  MutexLock,
  /// `Channel.send`
  ChannelSend,
  /// `Channel.recv`
  ChannelRecv,
  /// `Condition.wait`
  ConditionWait,
  /// `Semaphore.acquire`
  SemaphoreAcquire,
  /// `RwLock.read_lock`
  RwLockReadLock,
  /// `RwLock.write_lock`
  RwLockWriteLock,
}

const BLOCKING_METHODS: &[(BlockingMethod, &str, &str)] = &[
  (BlockingMethod::MutexLock, "Mutex", "lock"),
  (BlockingMethod::ChannelSend, "Channel", "send"),
  (BlockingMethod::ChannelRecv, "Channel", "recv"),
  (BlockingMethod::ConditionWait, "Condition", "wait"),
  (BlockingMethod::SemaphoreAcquire, "Semaphore", "acquire"),
  (BlockingMethod::RwLockReadLock, "RwLock", "read_lock"),
  (BlockingMethod::RwLockWriteLock, "RwLock", "write_lock"),
];

impl BlockingMethod {
  /// Evaluate a function on every entry, with receiver and method names.
  pub fn scan(mut f: impl FnMut(Self, &'static str, &'static str)) {
    for &(x, recv, name) in BLOCKING_METHODS { f(x, recv, name) }
  }

  /// Look up a `(receiver type name, method name)` pair.
  #[must_use] pub fn from_symbols(recv: Symbol, name: Symbol) -> Option<Self> {
    static MAP: LazyLock<HashMap<(Symbol, Symbol), BlockingMethod>> = LazyLock::new(|| {
      BLOCKING_METHODS.iter().map(|&(x, r, n)| ((intern(r), intern(n)), x)).collect()
    });
    MAP.get(&(recv, name)).copied()
  }
}

/// What kind of entity a symbol is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
  /// A local variable binding.
  Var,
  /// A function parameter.
  Param,
  /// A function.
  Fn,
  /// A type declaration (struct, union, alias, or enum).
  Type,
  /// A tag variant of a union.
  Tag,
  /// A module.
  Module,
  /// A constant.
  Const,
  /// A struct field.
  Field,
}

bitflags::bitflags! {
  /// Flags on a symbol.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct SymbolFlags: u16 {
    /// The symbol was brought in by an import.
    const IMPORTED = 1;
    /// The symbol is a compiler built-in.
    const BUILTIN = 1 << 1;
    /// The binding is mutable.
    const MUTABLE = 1 << 2;
    /// The parameter is a `self` receiver.
    const SELF_BINDING = 1 << 3;
    /// The function is marked `@entrypoint`.
    const ENTRYPOINT = 1 << 4;
    /// The function is marked `@nonblocking`.
    const NONBLOCKING = 1 << 5;
    /// The function body is `async`.
    const ASYNC = 1 << 6;
    /// Analysis found that the function may suspend or block.
    const MAY_BLOCK = 1 << 7;
  }
}

/// Symbol visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
  /// Visible in the defining module only.
  #[default]
  Private,
  /// Exported from the defining module.
  Public,
}

/// A reference back to the declaring AST item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeclRef {
  /// The file the item was parsed from.
  pub file: FileId,
  /// The item index in that file's AST.
  pub item: ItemId,
}

/// A structural type key derived from the AST, used to compare function
/// signatures before types are fully interned.
pub type TypeKey = Box<str>;

/// One parameter of a function signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSig {
  /// The structural key of the parameter type.
  pub key: TypeKey,
  /// The parameter name.
  pub name: Symbol,
  /// Whether the parameter is a variadic tail.
  pub variadic: bool,
  /// Whether the parameter has a default value.
  pub has_default: bool,
  /// Whether the parameter accepts implicit widening (`allow_to`).
  pub allow_to: bool,
}

/// A function signature, compared structurally for overload classification.
#[derive(Clone, Debug)]
pub struct FunctionSignature {
  /// The ordered parameters.
  pub params: Box<[ParamSig]>,
  /// The structural key of the result type.
  pub result: TypeKey,
  /// Whether the declaration has a body.
  pub has_body: bool,
  /// Whether the first parameter is a `self` receiver.
  pub has_self: bool,
}

impl FunctionSignature {
  /// Signature equality: parameter keys, variadic flags, and result key.
  /// Body presence does not participate, so an extern declaration and a
  /// definition with the same shape collide rather than overload.
  #[must_use] pub fn same_signature(&self, other: &Self) -> bool {
    self.result == other.result
      && self.params.len() == other.params.len()
      && self.params.iter().zip(&*other.params)
        .all(|(a, b)| a.key == b.key && a.variadic == b.variadic)
  }

  /// Whether this signature differs from every signature in the list, the
  /// condition for adding another overload under the same name.
  #[must_use] pub fn differs_from_all<'a>(
    &self, others: impl IntoIterator<Item = &'a Self>,
  ) -> bool {
    others.into_iter().all(|o| !self.same_signature(o))
  }
}

/// A symbol: an immutable record created during name resolution.
#[derive(Clone, Debug)]
pub struct SymbolData {
  /// The kind of entity.
  pub kind: SymbolKind,
  /// The name.
  pub name: Symbol,
  /// The declaring item, when the symbol comes from source.
  pub decl: Option<DeclRef>,
  /// The declaration span, for diagnostics and nominal identity.
  pub span: FileSpan,
  /// Visibility.
  pub vis: Visibility,
  /// Flags.
  pub flags: SymbolFlags,
  /// The dotted module path the symbol lives in.
  pub module: Symbol,
  /// The associated type: for types the declared type itself, for values
  /// their type. [`TypeId::NONE`] while unresolved.
  pub ty: TypeId,
  /// For functions, the structural signature.
  pub sig: Option<FunctionSignature>,
}

/// The symbol table built by name resolution and read by every later phase.
#[derive(Debug, Default)]
pub struct SymbolTable {
  symbols: Vec<SymbolData>,
  by_name: HashMap<Symbol, Vec<SymbolId>>,
  /// Methods indexed by receiver base type name.
  methods: HashMap<(Symbol, Symbol), Vec<SymbolId>>,
}

impl SymbolTable {
  /// Add a symbol, indexing it by name.
  pub fn add(&mut self, data: SymbolData) -> SymbolId {
    let id = SymbolId::from_usize(self.symbols.len());
    self.by_name.entry(data.name).or_default().push(id);
    self.symbols.push(data);
    id
  }

  /// Index a method under its receiver base type name.
  pub fn add_method(&mut self, recv: Symbol, name: Symbol, id: SymbolId) {
    self.methods.entry((recv, name)).or_default().push(id);
  }

  /// The data for a symbol.
  #[must_use] pub fn get(&self, id: SymbolId) -> &SymbolData {
    &self.symbols[id.into_usize()]
  }

  /// Mutable access, used only while the declaring pass is still running.
  pub fn get_mut(&mut self, id: SymbolId) -> &mut SymbolData {
    &mut self.symbols[id.into_usize()]
  }

  /// All symbols with the given name, in declaration order.
  #[must_use] pub fn lookup_name(&self, name: Symbol) -> &[SymbolId] {
    self.by_name.get(&name).map_or(&[], |v| v)
  }

  /// All symbols with the given name matching a kind filter.
  pub fn lookup_kind<'a>(
    &'a self, name: Symbol, f: impl Fn(SymbolKind) -> bool + Copy + 'a,
  ) -> impl Iterator<Item = SymbolId> + 'a {
    self.lookup_name(name).iter().copied().filter(move |&id| f(self.get(id).kind))
  }

  /// Methods on a receiver base type name.
  #[must_use] pub fn lookup_method(&self, recv: Symbol, name: Symbol) -> &[SymbolId] {
    self.methods.get(&(recv, name)).map_or(&[], |v| v)
  }

  /// The number of symbols.
  #[must_use] pub fn len(&self) -> usize { self.symbols.len() }

  /// Whether the table is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.symbols.is_empty() }

  /// Iterate over all symbol ids in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = SymbolId> + '_ {
    (0..self.symbols.len()).map(SymbolId::from_usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prim_type_lookup() {
    assert_eq!(PrimType::from_str("i32"), Some(PrimType::I32));
    assert_eq!(PrimType::from_symbol(intern("u64")), Some(PrimType::U64));
    assert_eq!(PrimType::from_str("i128"), None);
  }

  #[test]
  fn blocking_registry() {
    let m = BlockingMethod::from_symbols(intern("Mutex"), intern("lock"));
    assert_eq!(m, Some(BlockingMethod::MutexLock));
    assert_eq!(BlockingMethod::from_symbols(intern("Mutex"), intern("unlock")), None);
    let mut n = 0;
    BlockingMethod::scan(|_, _, _| n += 1);
    assert_eq!(n, 7);
  }

  #[test]
  fn signature_equality_ignores_body() {
    let sig = |has_body| FunctionSignature {
      params: Box::new([ParamSig {
        key: "int".into(), name: intern("x"), variadic: false,
        has_default: false, allow_to: false,
      }]),
      result: "unit".into(),
      has_body, has_self: false,
    };
    assert!(sig(true).same_signature(&sig(false)));
    let other = FunctionSignature {
      params: Box::new([]), result: "unit".into(), has_body: true, has_self: false,
    };
    assert!(other.differs_from_all([&sig(true)]));
  }
}
