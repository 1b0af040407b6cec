//! String interning. Identifiers, class names, and method names are interned
//! once by the lexer/parser and compared by `Symbol` (a cheap `Copy` index)
//! for the rest of the pipeline instead of by `String`.

use std::cell::RefCell;
use std::fmt;
use hashbrown::HashMap;

/// An interned string. Two `Symbol`s are equal iff the underlying strings are equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    INTERNER.with(|i| write!(f, "{:?}", i.borrow().resolve(*self)))
  }
}
impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    INTERNER.with(|i| f.write_str(i.borrow().resolve(*self)))
  }
}

#[derive(Default)]
struct Interner {
  map: HashMap<&'static str, Symbol>,
  strings: Vec<&'static str>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) {
      return sym;
    }
    let sym = Symbol(self.strings.len().try_into().expect("too many interned strings"));
    // Leak the string to get a `'static` reference; the interner lives for the
    // process, so this is the same tradeoff `Symbol`-interning compilers usually make.
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    self.strings.push(s);
    self.map.insert(s, sym);
    sym
  }

  fn resolve(&self, sym: Symbol) -> &'static str {
    self.strings[sym.0 as usize]
  }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

/// Intern a string, returning the `Symbol` that represents it.
#[must_use] pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

impl Symbol {
  /// Resolve this symbol back to its string contents.
  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.with(|i| i.borrow().resolve(self))
  }
}

macro_rules! predefined {
  ($($name:ident => $value:expr),* $(,)?) => {
    /// Well-known symbols, computed once so hot-path comparisons
    /// (`"__init__"`, `"object"`, ...) avoid repeated interning.
    #[allow(non_upper_case_globals)]
    pub mod sym {
      use super::{Symbol, intern};
      use std::sync::LazyLock;
      $(
        #[allow(non_upper_case_globals)]
        pub static $name: LazyLock<Symbol> = LazyLock::new(|| intern($value));
      )*
    }
  };
}

predefined! {
  object => "object",
  int => "int",
  bool_ => "bool",
  str_ => "str",
  none => "<None>",
  empty => "<Empty>",
  init => "__init__",
  len => "len",
  print => "print",
  input => "input",
}
