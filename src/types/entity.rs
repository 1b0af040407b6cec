//! Scoped symbol tables. A [`SymbolType`] is whatever a name can be bound to:
//! a variable's `ValueType`, a `FunctionDefType`, a `ClassDefType`, or one of
//! the `global`/`nonlocal` placeholders the symbol-table generator inserts
//! and the declaration analyzer resolves in place.

use hashbrown::HashMap;

use crate::idx::IdxVec;
use crate::mk_idx;
use crate::symbol::Symbol;
use crate::types::ty::ValueType;

mk_idx! {
  /// Identifies a lexical scope: program, a class body, a function body, or
  /// a nested function body.
  pub struct ScopeId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
  Program,
  Class,
  Function,
}

/// A function's declared signature plus its own nested scope.
#[derive(Clone, Debug)]
pub struct FunctionDefType {
  pub name: Symbol,
  pub return_type: ValueType,
  pub params: Vec<ValueType>,
  pub scope: ScopeId,
  pub is_method: bool,
}

impl FunctionDefType {
  /// Parameter count excluding `self`, used for method-call arity checks.
  #[must_use] pub fn arity(&self) -> usize {
    if self.is_method { self.params.len() - 1 } else { self.params.len() }
  }
}

/// A class's declared super-class plus its own member scope.
#[derive(Clone, Debug)]
pub struct ClassDefType {
  pub name: Symbol,
  /// `None` only for `object`, the root of the hierarchy.
  pub super_name: Option<Symbol>,
  pub scope: ScopeId,
  /// Names inherited from the super-class and not shadowed by this class,
  /// recorded so the IR builder can tell new members from inherited ones.
  pub inherited_members: Vec<Symbol>,
}

/// Whatever a name in a scope can be bound to.
#[derive(Clone, Debug)]
pub enum SymbolType {
  Value(ValueType),
  Function(Box<FunctionDefType>),
  Class(Box<ClassDefType>),
  /// `global x` inside a function, before the declaration analyzer resolves
  /// it to the program-scope binding's `ValueType`.
  GlobalRef,
  /// `nonlocal x` inside a nested function, before resolution.
  NonlocalRef,
}

impl SymbolType {
  #[must_use] pub fn as_value(&self) -> Option<&ValueType> {
    if let SymbolType::Value(v) = self { Some(v) } else { None }
  }
  #[must_use] pub fn as_function(&self) -> Option<&FunctionDefType> {
    if let SymbolType::Function(f) = self { Some(f) } else { None }
  }
  #[must_use] pub fn as_class(&self) -> Option<&ClassDefType> {
    if let SymbolType::Class(c) = self { Some(c) } else { None }
  }
  #[must_use] pub fn is_placeholder(&self) -> bool {
    matches!(self, SymbolType::GlobalRef | SymbolType::NonlocalRef)
  }
}

#[derive(Debug, Default)]
pub struct Scope {
  pub parent: Option<ScopeId>,
  pub kind: Option<ScopeKind>,
  pub bindings: HashMap<Symbol, SymbolType>,
  /// Insertion order, so iteration (e.g. "new members appended after
  /// inherited ones") is deterministic.
  pub order: Vec<Symbol>,
}

/// All scopes created while walking one program, addressed by [`ScopeId`].
#[derive(Debug)]
pub struct SymbolTables {
  arena: IdxVec<ScopeId, Scope>,
  pub root: ScopeId,
}

impl Default for SymbolTables {
  fn default() -> Self {
    let mut arena = IdxVec::new();
    let root = arena.push(Scope { parent: None, kind: Some(ScopeKind::Program), ..Scope::default() });
    Self { arena, root }
  }
}

impl SymbolTables {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
    self.arena.push(Scope { parent: Some(parent), kind: Some(kind), ..Scope::default() })
  }

  #[must_use] pub fn scope(&self, id: ScopeId) -> &Scope { &self.arena[id] }
  pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope { &mut self.arena[id] }

  /// Binds `name` in `scope` unless it is already bound there; returns
  /// `false` on a duplicate so the caller can raise a declaration error.
  pub fn define(&mut self, scope: ScopeId, name: Symbol, ty: SymbolType) -> bool {
    let s = self.scope_mut(scope);
    if s.bindings.contains_key(&name) {
      return false;
    }
    s.order.push(name);
    s.bindings.insert(name, ty);
    true
  }

  #[must_use] pub fn lookup_local(&self, scope: ScopeId, name: Symbol) -> Option<&SymbolType> {
    self.arena[scope].bindings.get(&name)
  }

  /// Walks the parent chain, returning the first binding found together with
  /// the scope it was found in.
  #[must_use] pub fn lookup(&self, mut scope: ScopeId, name: Symbol) -> Option<(&SymbolType, ScopeId)> {
    loop {
      if let Some(ty) = self.arena[scope].bindings.get(&name) {
        return Some((ty, scope));
      }
      scope = self.arena[scope].parent?;
    }
  }

  /// Walks from `scope`'s parent upward (excluding `scope` itself), used for
  /// `nonlocal` resolution which never targets the function's own bindings.
  #[must_use] pub fn lookup_enclosing(&self, scope: ScopeId, name: Symbol) -> Option<(&SymbolType, ScopeId)> {
    let parent = self.arena[scope].parent?;
    self.lookup(parent, name)
  }
}
