//! The global symbol interner, which stores the names used in a compilation.

use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};
use hashbrown::HashMap;
use crate::Idx;

/// An interned string. Within one process, equal strings intern to equal symbols,
/// so symbols can be compared and hashed as plain integers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { Self(n.try_into().expect("too many symbols")) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// The string interner itself. Normally accessed through [`intern`] and
/// [`Symbol::as_str`], but it can be locked once for a batch of lookups.
#[derive(Default)]
pub struct Interner {
  names: HashMap<Box<str>, Symbol>,
  strs: Vec<Box<str>>,
}

impl Interner {
  /// Intern a string, returning its unique symbol.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.names.get(s) { return sym }
    let sym = Symbol::from_usize(self.strs.len());
    self.strs.push(s.into());
    self.names.insert(s.into(), sym);
    sym
  }

  /// Get the string corresponding to a symbol.
  #[must_use] pub fn lookup(&self, sym: Symbol) -> &str {
    &self.strs[sym.into_usize()]
  }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(|| {
  let mut i = Interner::default();
  // Symbol 0 is the empty name, used as a niche by `Default`.
  i.intern("");
  Mutex::new(i)
});

/// Lock the global interner for a batch of operations.
pub fn with_interner<R>(f: impl FnOnce(&mut MutexGuard<'_, Interner>) -> R) -> R {
  f(&mut INTERNER.lock().expect("interner poisoned"))
}

/// Intern a string in the global interner.
pub fn intern(s: &str) -> Symbol {
  with_interner(|i| i.intern(s))
}

impl Symbol {
  /// The empty symbol.
  pub const UNDEF: Self = Self(0);

  /// Get the string for this symbol. This clones out of the global table,
  /// since the table can be reallocated by concurrent interning.
  #[must_use] pub fn as_str(self) -> String {
    with_interner(|i| i.lookup(self).to_owned())
  }
}

/// Construct a dense map from symbols to values, given a sparse list of pairs.
/// Useful for keyword-like symbol sets that are all interned at startup.
#[must_use] pub fn init_dense_symbol_map<T: Clone>(xs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let mut vec = vec![];
  for (s, x) in xs {
    let n = s.into_usize();
    if vec.len() <= n { vec.resize(n + 1, None) }
    vec[n] = Some(x.clone());
  }
  vec.into()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_ne!(intern("bar"), a);
    assert_eq!(a.as_str(), "foo");
  }

  #[test]
  fn dense_map() {
    let a = intern("dense_a");
    let b = intern("dense_b");
    let map = init_dense_symbol_map(&[(a, 1u8), (b, 2u8)]);
    assert_eq!(map[a.into_usize()], Some(1));
    assert_eq!(map[b.into_usize()], Some(2));
  }
}
