//! Compiler facade: sequences lex → parse → symbol-table generation →
//! declaration analysis → type checking → IR building, aborting at the first
//! stage that can't recover. Grounded on mmcc's own top-level `Compiler`
//! driver, which pipes its pass list the same way.

use log::debug;

use crate::declck::DeclarationAnalyzer;
use crate::diagnostics::{CompileError, Diagnostic, Diagnostics};
use crate::hierarchy::HierarchyTree;
use crate::lexer::lex;
use crate::nameck::SymbolTableGenerator;
use crate::parser::parse;
use crate::types::ast::Program;
use crate::types::entity::SymbolTables;
use crate::types::mir::Module;
use crate::typeck::TypeChecker;

pub struct Compiler;

impl Compiler {
  /// Lexes and parses `src`, returning the raw (not yet name- or
  /// type-checked) AST. Exposed separately from [`Compiler::compile`] for
  /// tools that only need the parse tree (formatters, linters).
  pub fn compile_to_ast(src: &str) -> Result<Program, CompileError> {
    let tokens = lex(src).map_err(|d| CompileError::Lex(d.location, d.message))?;
    parse(tokens).map_err(|d| CompileError::Parse(d.location, d.message))
  }

  /// Runs every semantic pass over a parsed `Program`, filling in
  /// `Expr::inferred_type` and `FuncDef::lambda_params` in place. Returns the
  /// accumulated symbol tables and hierarchy alongside any diagnostics raised
  /// — callers decide whether warnings-only output should still proceed.
  pub fn compile_to_typed_ast(program: &mut Program) -> (SymbolTables, HierarchyTree, Diagnostics) {
    let mut gen = SymbolTableGenerator::new();
    let mut diags = Diagnostics::new();
    gen.run(program, &mut diags);
    DeclarationAnalyzer::new(&mut gen.tables, &gen.tree).run(program, &mut diags);
    TypeChecker::new(&mut gen.tables, &gen.tree).run(program, &mut diags);
    (gen.tables, gen.tree, diags)
  }

  /// Compiles `src` all the way down to the IR `Module`. Aborts with
  /// [`CompileError::HasErrors`] if any semantic pass raised a diagnostic,
  /// since the IR builder assumes a fully resolved, well-typed program.
  pub fn compile(src: &str) -> Result<Module, CompileError> {
    let mut program = Self::compile_to_ast(src)?;
    let (tables, tree, diags) = Self::compile_to_typed_ast(&mut program);
    if diags.has_errors() {
      return Err(CompileError::HasErrors(diags.as_slice().len()));
    }
    debug!("typechecked {} top-level declaration(s)", program.declarations.len());
    Ok(crate::build_mir::build_module(&program, &tables, &tree))
  }

  /// Like [`Compiler::compile`] but returns every diagnostic instead of just
  /// a count, for callers (tests, a future CLI) that want to print them.
  pub fn compile_collecting_diagnostics(src: &str) -> Result<Module, Vec<Diagnostic>> {
    let mut program = match Self::compile_to_ast(src) {
      Ok(p) => p,
      Err(CompileError::Lex(loc, msg)) | Err(CompileError::Parse(loc, msg)) => {
        return Err(vec![Diagnostic::syntax(loc, msg)]);
      }
      Err(e) => return Err(vec![Diagnostic::syntax(Default::default(), e.to_string())]),
    };
    let (tables, tree, diags) = Self::compile_to_typed_ast(&mut program);
    if diags.has_errors() {
      return Err(diags.into_vec());
    }
    Ok(crate::build_mir::build_module(&program, &tables, &tree))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn compiles_a_trivial_program() {
    let m = Compiler::compile("print(1 + 2)\n").unwrap();
    assert!(m.functions.iter().any(|f| f.name.as_str() == "main"));
  }

  #[test]
  fn reports_undefined_class_as_an_error() {
    let err = Compiler::compile("x:Unknown = None\n").unwrap_err();
    assert!(matches!(err, CompileError::HasErrors(_)));
  }

  #[test]
  fn reports_syntax_errors_before_running_semantic_passes() {
    let err = Compiler::compile("def f(:\n  pass\n").unwrap_err();
    assert!(matches!(err, CompileError::Parse(..)));
  }
}
