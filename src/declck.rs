//! Declaration Analyzer: the second pre-order walk. Validates every
//! annotated type the symbol-table generator inserted and resolves
//! `global`/`nonlocal` placeholders to real bindings in outer scopes.
//! Grounded on `chocopy_semant.cpp`'s `DeclarationAnalyzer` pass.

use crate::diagnostics::Diagnostics;
use crate::hierarchy::HierarchyTree;
use crate::symbol::Symbol;
use crate::types::ast::*;
use crate::types::entity::{ScopeId, SymbolTables, SymbolType};

pub struct DeclarationAnalyzer<'a> {
  tables: &'a mut SymbolTables,
  tree: &'a HierarchyTree,
}

impl<'a> DeclarationAnalyzer<'a> {
  pub fn new(tables: &'a mut SymbolTables, tree: &'a HierarchyTree) -> Self {
    Self { tables, tree }
  }

  pub fn run(&mut self, program: &Program, diags: &mut Diagnostics) {
    let root = self.tables.root;
    for decl in &program.declarations {
      self.visit_decl(decl, root, diags);
    }
    for stmt in &program.statements {
      self.reject_top_level_return(stmt, diags);
    }
  }

  fn check_annotation(&self, ann: &TypeAnnotation, location: crate::span::Location, diags: &mut Diagnostics) {
    let leaf = ann.leaf_class();
    if !self.tree.contains(leaf) {
      diags.error(location, format!("Class '{leaf}' is not defined"));
    }
  }

  fn visit_decl(&mut self, decl: &Declaration, scope: ScopeId, diags: &mut Diagnostics) {
    match decl {
      Declaration::Class(c) => self.visit_class(c, scope, diags),
      Declaration::Func(f) => self.visit_func(f, scope, diags),
      Declaration::Var(v) => self.check_annotation(&v.var.ty, v.location, diags),
      Declaration::Global(g) => self.visit_global(g, scope, diags),
      Declaration::Nonlocal(n) => self.visit_nonlocal(n, scope, diags),
    }
  }

  fn visit_global(&mut self, g: &GlobalDecl, scope: ScopeId, diags: &mut Diagnostics) {
    let root = self.tables.root;
    match self.tables.lookup_local(root, g.name).cloned() {
      Some(SymbolType::Value(ty)) => {
        self.tables.scope_mut(scope).bindings.insert(g.name, SymbolType::Value(ty));
      }
      _ => diags.error(g.location, format!("Not a global variable: '{}'", g.name)),
    }
  }

  fn visit_nonlocal(&mut self, n: &NonlocalDecl, scope: ScopeId, diags: &mut Diagnostics) {
    match self.tables.lookup_enclosing(scope, n.name) {
      Some((SymbolType::Value(ty), _)) => {
        let ty = ty.clone();
        self.tables.scope_mut(scope).bindings.insert(n.name, SymbolType::Value(ty));
      }
      _ => diags.error(n.location, format!("Not a nonlocal variable: '{}'", n.name)),
    }
  }

  fn visit_class(&mut self, c: &ClassDef, scope: ScopeId, diags: &mut Diagnostics) {
    let class_scope = self
      .tables
      .lookup_local(scope, c.name)
      .and_then(SymbolType::as_class)
      .map(|def| def.scope)
      .unwrap_or(scope);
    for decl in &c.declarations {
      match decl {
        Declaration::Var(v) => self.check_annotation(&v.var.ty, v.location, diags),
        Declaration::Func(f) => self.visit_func(f, class_scope, diags),
        _ => {}
      }
    }
  }

  fn visit_func(&mut self, f: &FuncDef, scope: ScopeId, diags: &mut Diagnostics) {
    for p in &f.params {
      self.check_annotation(&p.ty, p.location, diags);
    }
    if let Some(rt) = &f.return_type {
      self.check_annotation(rt, f.location, diags);
    }
    let fscope = self
      .tables
      .lookup_local(scope, f.name)
      .and_then(SymbolType::as_function)
      .map(|def| def.scope)
      .unwrap_or(scope);
    for decl in &f.declarations {
      self.visit_decl(decl, fscope, diags);
    }
    for stmt in &f.statements {
      self.reject_return_in_init(stmt, f.name, diags);
    }
  }

  /// `return` is illegal inside `__init__` (§4.3). Checked structurally
  /// rather than via scope kind, since a nested function inside `__init__`
  /// may legally return.
  fn reject_return_in_init(&self, stmt: &Stmt, owner: Symbol, diags: &mut Diagnostics) {
    if owner != *crate::symbol::sym::init {
      return;
    }
    match stmt {
      Stmt::Return(r) => diags.error(r.location, "return is not allowed inside __init__"),
      Stmt::If(s) => {
        for st in s.then_body.iter().chain(s.else_body.iter()) {
          self.reject_return_in_init(st, owner, diags);
        }
      }
      Stmt::While(s) => {
        for st in &s.body {
          self.reject_return_in_init(st, owner, diags);
        }
      }
      Stmt::For(s) => {
        for st in &s.body {
          self.reject_return_in_init(st, owner, diags);
        }
      }
      _ => {}
    }
  }

  /// `return` at the program top level is illegal (§4.3).
  fn reject_top_level_return(&self, stmt: &Stmt, diags: &mut Diagnostics) {
    match stmt {
      Stmt::Return(r) => diags.error(r.location, "return is not allowed at the program top level"),
      Stmt::If(s) => {
        for st in s.then_body.iter().chain(s.else_body.iter()) {
          self.reject_top_level_return(st, diags);
        }
      }
      Stmt::While(s) => {
        for st in &s.body {
          self.reject_top_level_return(st, diags);
        }
      }
      Stmt::For(s) => {
        for st in &s.body {
          self.reject_top_level_return(st, diags);
        }
      }
      _ => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;
  use crate::nameck::SymbolTableGenerator;
  use crate::parser::parse;

  fn check(src: &str) -> Diagnostics {
    let prog = parse(lex(src).unwrap()).unwrap();
    let mut gen = SymbolTableGenerator::new();
    let mut diags = Diagnostics::new();
    gen.run(&prog, &mut diags);
    let mut analyzer = DeclarationAnalyzer::new(&mut gen.tables, &gen.tree);
    analyzer.run(&prog, &mut diags);
    diags
  }

  #[test]
  fn unknown_type_annotation_is_rejected() {
    let diags = check("x:Unknown = None\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn top_level_return_is_rejected() {
    let diags = check("return\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn init_return_is_rejected() {
    let diags = check("class A(object):\n  def __init__(self:\"A\"):\n    return\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn global_resolves_to_program_scope_type() {
    let diags = check("x:int = 0\ndef f() -> int:\n  global x\n  return x\n");
    assert!(!diags.has_errors());
  }

  #[test]
  fn nonlocal_without_enclosing_binding_is_rejected() {
    let diags = check("def f() -> int:\n  def g() -> int:\n    nonlocal y\n    return y\n  return g()\n");
    assert!(diags.has_errors());
  }
}
