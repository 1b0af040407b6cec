//! The semantic type universe: `ValueType` and its sub-typing/join rules.
//! Grounded on `ValueType.hpp`/`SymbolType.hpp`, but expressed as a closed
//! Rust enum per the "Sum types" design note rather than a class hierarchy.

use std::fmt;

use crate::hierarchy::HierarchyTree;
use crate::symbol::{sym, Symbol};

/// A ChocoPy static type: either a named class, a list of some element type,
/// or one of the two special atoms `<None>`/`<Empty>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
  Class(Symbol),
  List(Box<ValueType>),
  /// The type of the `None` literal and of any variable that might hold it.
  NoneType,
  /// The type of the empty list literal `[]`, a subtype of every list type.
  Empty,
}

impl ValueType {
  #[must_use] pub fn class(name: Symbol) -> Self { ValueType::Class(name) }
  #[must_use] pub fn list(elem: ValueType) -> Self { ValueType::List(Box::new(elem)) }
  #[must_use] pub fn int() -> Self { ValueType::Class(*sym::int) }
  #[must_use] pub fn bool_() -> Self { ValueType::Class(*sym::bool_) }
  #[must_use] pub fn str_() -> Self { ValueType::Class(*sym::str_) }
  #[must_use] pub fn object() -> Self { ValueType::Class(*sym::object) }

  #[must_use] pub fn is_list(&self) -> bool { matches!(self, ValueType::List(_)) }

  /// `int`, `bool`, and `str` are final: they cannot be extended and do not
  /// participate in the `<None>`-accepts-everything rule.
  #[must_use] pub fn is_primitive(&self) -> bool {
    matches!(self, ValueType::Class(c) if *c == *sym::int || *c == *sym::bool_ || *c == *sym::str_)
  }

  /// Does a variable of this type accept `None`? Every type except the three
  /// final primitives does (§3.v).
  #[must_use] pub fn accepts_none(&self) -> bool { !self.is_primitive() }

  #[must_use] pub fn class_name(&self) -> Option<Symbol> {
    if let ValueType::Class(c) = self { Some(*c) } else { None }
  }

  /// `self <: other`, per the rules in §3 of the design.
  #[must_use] pub fn is_subtype(&self, other: &ValueType, tree: &HierarchyTree) -> bool {
    if self == other {
      return true;
    }
    match (self, other) {
      (ValueType::Empty, ValueType::List(_)) => true,
      (ValueType::NoneType, sup) => sup.accepts_none(),
      (ValueType::Class(a), ValueType::Class(b)) => tree.is_superclass(*a, *b),
      (ValueType::List(a), ValueType::List(b)) => {
        **a == **b || (**a == ValueType::NoneType && b.accepts_none())
      }
      _ => false,
    }
  }

  /// The nearest common super-type of `self` and `other`, used for `if`-expression
  /// results, `+` on lists, and list-literal element inference. Returns `object`
  /// when no more specific common type exists (§3.vi).
  #[must_use] pub fn join(&self, other: &ValueType, tree: &HierarchyTree) -> ValueType {
    if self == other {
      return self.clone();
    }
    match (self, other) {
      (ValueType::Empty, t) | (t, ValueType::Empty) => t.clone(),
      (ValueType::NoneType, t) | (t, ValueType::NoneType) if t.accepts_none() => t.clone(),
      (ValueType::Class(a), ValueType::Class(b)) => ValueType::Class(tree.common_ancestor(*a, *b)),
      _ => ValueType::object(),
    }
  }
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueType::Class(c) => write!(f, "{c}"),
      ValueType::List(e) => write!(f, "[{e}]"),
      ValueType::NoneType => write!(f, "<None>"),
      ValueType::Empty => write!(f, "<Empty>"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  #[test]
  fn empty_is_subtype_of_every_list() {
    let tree = HierarchyTree::new();
    assert!(ValueType::Empty.is_subtype(&ValueType::list(ValueType::int()), &tree));
    assert!(ValueType::Empty.is_subtype(&ValueType::list(ValueType::object()), &tree));
  }

  #[test]
  fn none_is_not_subtype_of_primitives() {
    let tree = HierarchyTree::new();
    assert!(!ValueType::NoneType.is_subtype(&ValueType::int(), &tree));
    assert!(ValueType::NoneType.is_subtype(&ValueType::object(), &tree));
  }

  #[test]
  fn bool_is_not_subtype_of_int() {
    let tree = HierarchyTree::new();
    assert!(!ValueType::bool_().is_subtype(&ValueType::int(), &tree));
  }

  #[test]
  fn list_of_none_is_subtype_of_list_of_class() {
    let mut tree = HierarchyTree::new();
    let a = intern("A");
    tree.add_class(a, *sym::object);
    let list_none = ValueType::list(ValueType::NoneType);
    let list_a = ValueType::list(ValueType::class(a));
    assert!(list_none.is_subtype(&list_a, &tree));
    assert!(!list_a.is_subtype(&list_none, &tree));
  }

  #[test]
  fn join_of_unrelated_classes_is_ancestor() {
    let mut tree = HierarchyTree::new();
    let a = intern("A");
    let b = intern("B");
    tree.add_class(a, *sym::object);
    tree.add_class(b, *sym::object);
    assert_eq!(ValueType::class(a).join(&ValueType::class(b), &tree), ValueType::object());
  }
}
