//! A string interner built on the usual `Symbol`/`Interner` pair
//! (`intern`, `Symbol::into_usize`), scoped to one `Compiler` instance
//! rather than a process-global, since a test binary may run many
//! independent compilations.

use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An interned string. Cheap to copy and compare; the backing text is
/// looked up through the owning [`Interner`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Symbol({})", self.0) }
}

#[derive(Default)]
pub struct Interner {
  map: HashMap<Rc<str>, Symbol>,
  strings: Vec<Rc<str>>,
}

impl Interner {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let rc: Rc<str> = Rc::from(s);
    let sym = Symbol(u32::try_from(self.strings.len()).expect("interner overflow"));
    self.strings.push(rc.clone());
    self.map.insert(rc, sym);
    sym
  }

  #[must_use] pub fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.into_usize()] }
}

thread_local! {
  static GLOBAL: RefCell<Interner> = RefCell::new(Interner::new());
}

/// Intern into the thread-local interner shared by keyword tables (the
/// primitive-type and operator keyword sets built once via
/// [`init_dense_symbol_map`] below), matching `entity.rs`'s free `intern`
/// helper used from `make_prims!`.
pub fn intern(s: &str) -> Symbol { GLOBAL.with(|i| i.borrow_mut().intern(s)) }

#[must_use] pub fn resolve(sym: Symbol) -> Rc<str> {
  GLOBAL.with(|i| Rc::from(i.borrow().resolve(sym)))
}

/// Build a dense `Symbol -> T` lookup table sized to the interner at the
/// time of the call, as `entity.rs`'s `make_prims!` does for keyword
/// tables. Symbols observed later than `table`'s widest entry simply miss.
#[must_use] pub fn init_dense_symbol_map<T: Copy>(table: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = GLOBAL.with(|i| i.borrow().strings.len());
  let mut out = vec![None; len].into_boxed_slice();
  for &(sym, val) in table {
    if sym.into_usize() < out.len() { out[sym.into_usize()] = Some(val) }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_stable_and_deduplicates() {
    let a = intern("foo_unique_test_symbol");
    let b = intern("foo_unique_test_symbol");
    assert_eq!(a, b);
    assert_eq!(&*resolve(a), "foo_unique_test_symbol");
  }
}
