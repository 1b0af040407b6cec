//! Source locations. Every AST node carries a [`Location`] spanning its first
//! and last token, mirroring the original `chocopy_ast.hpp` `Location` type.

use std::fmt;

/// A single `(line, column)` position, both 1-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
  pub line: u32,
  pub col: u32,
}

impl Position {
  #[must_use] pub fn new(line: u32, col: u32) -> Self { Self { line, col } }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

/// A span from the first token to the last token of a syntactic construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Location {
  pub first: Position,
  pub last: Position,
}

impl Location {
  #[must_use] pub fn new(first: Position, last: Position) -> Self { Self { first, last } }

  /// A span covering both `self` and `other`, for combining child spans into a parent's.
  #[must_use] pub fn to(self, other: Location) -> Location {
    Location { first: self.first, last: other.last }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.first, self.last)
  }
}

/// A value tagged with the source location it came from.
#[derive(Clone, Copy, Debug)]
pub struct Spanned<T> {
  pub span: Location,
  pub k: T,
}

impl<T> Spanned<T> {
  #[must_use] pub fn new(span: Location, k: T) -> Self { Self { span, k } }
}
