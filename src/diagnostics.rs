//! Error accumulation. The front end never aborts on the first problem it
//! finds: it collects [`Diagnostic`]s as it walks, the way the original
//! `SemanticError`/`CompilerError` machinery in `chocopy_semant.cpp` does,
//! and the driver only turns that list into a hard failure at the end.

use std::fmt;
use thiserror::Error;

use crate::span::Location;

/// A single semantic or syntax error attached to a source location.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub location: Location,
  pub message: String,
  /// `true` for lexer/parser errors, `false` for everything the semantic
  /// passes find. Syntax errors short-circuit the remaining passes.
  pub syntax: bool,
}

impl Diagnostic {
  #[must_use] pub fn semantic(location: Location, message: impl Into<String>) -> Self {
    Self { location, message: message.into(), syntax: false }
  }

  #[must_use] pub fn syntax(location: Location, message: impl Into<String>) -> Self {
    Self { location, message: message.into(), syntax: true }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.location, self.message)
  }
}

/// A growable bag of diagnostics shared by the three semantic passes.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn error(&mut self, location: Location, message: impl Into<String>) {
    self.0.push(Diagnostic::semantic(location, message));
  }

  pub fn syntax_error(&mut self, location: Location, message: impl Into<String>) {
    self.0.push(Diagnostic::syntax(location, message));
  }

  #[must_use] pub fn has_errors(&self) -> bool { !self.0.is_empty() }
  #[must_use] pub fn as_slice(&self) -> &[Diagnostic] { &self.0 }
  #[must_use] pub fn into_vec(self) -> Vec<Diagnostic> { self.0 }

  pub fn extend(&mut self, other: Diagnostics) { self.0.extend(other.0); }
}

/// Hard failures the driver can hit outside the normal diagnose-and-continue
/// flow: these abort compilation immediately rather than being collected.
#[derive(Debug, Error)]
pub enum CompileError {
  #[error("source contains {0} semantic error(s)")]
  HasErrors(usize),
  #[error("lexer error at {0}: {1}")]
  Lex(Location, String),
  #[error("parser error at {0}: {1}")]
  Parse(Location, String),
}
