//! Symbol Table Generator: one pre-order walk of declarations building
//! nested scopes (program → class → function → nested function) and
//! populating them with `ValueType`/`FunctionDefType`/`ClassDefType` entries.
//! Grounded on `chocopy_semant.cpp`'s `SymbolTableGenerator` pass.

use crate::diagnostics::Diagnostics;
use crate::hierarchy::HierarchyTree;
use crate::symbol::{intern, sym, Symbol};
use crate::types::ast::*;
use crate::types::entity::{ClassDefType, FunctionDefType, ScopeId, ScopeKind, SymbolTables, SymbolType};
use crate::types::ty::ValueType;

pub struct SymbolTableGenerator {
  pub tables: SymbolTables,
  pub tree: HierarchyTree,
}

impl Default for SymbolTableGenerator {
  fn default() -> Self {
    let mut g = Self { tables: SymbolTables::new(), tree: HierarchyTree::new() };
    g.seed_builtins();
    g
  }
}

impl SymbolTableGenerator {
  #[must_use] pub fn new() -> Self { Self::default() }

  fn seed_builtin_class(&mut self, name: Symbol) {
    let root = self.tables.root;
    let scope = self.tables.new_scope(root, ScopeKind::Class);
    let init_scope = self.tables.new_scope(scope, ScopeKind::Function);
    self.tables.define(init_scope, intern("self"), SymbolType::Value(ValueType::Class(name)));
    let init_fn = FunctionDefType {
      name: *sym::init,
      return_type: ValueType::NoneType,
      params: vec![ValueType::Class(name)],
      scope: init_scope,
      is_method: true,
    };
    self.tables.define(scope, *sym::init, SymbolType::Function(Box::new(init_fn)));
    let super_name = if name == *sym::object { None } else { Some(*sym::object) };
    let class_def = ClassDefType { name, super_name, scope, inherited_members: Vec::new() };
    self.tables.define(root, name, SymbolType::Class(Box::new(class_def)));
  }

  fn seed_builtin_func(&mut self, name: Symbol, params: Vec<ValueType>, return_type: ValueType) {
    let root = self.tables.root;
    let scope = self.tables.new_scope(root, ScopeKind::Function);
    let f = FunctionDefType { name, return_type, params, scope, is_method: false };
    self.tables.define(root, name, SymbolType::Function(Box::new(f)));
  }

  fn seed_builtins(&mut self) {
    self.seed_builtin_class(*sym::object);
    self.seed_builtin_class(*sym::str_);
    self.seed_builtin_class(*sym::int);
    self.seed_builtin_class(*sym::bool_);
    self.seed_builtin_func(*sym::len, vec![ValueType::object()], ValueType::int());
    self.seed_builtin_func(*sym::print, vec![ValueType::object()], ValueType::NoneType);
    self.seed_builtin_func(*sym::input, Vec::new(), ValueType::str_());
  }

  pub fn run(&mut self, program: &Program, diags: &mut Diagnostics) {
    let root = self.tables.root;
    for decl in &program.declarations {
      self.visit_decl(decl, root, diags);
    }
  }

  fn visit_decl(&mut self, decl: &Declaration, scope: ScopeId, diags: &mut Diagnostics) {
    match decl {
      Declaration::Class(c) => self.visit_class(c, scope, diags),
      Declaration::Func(f) => self.visit_func(f, scope, diags),
      Declaration::Var(v) => self.visit_var(v, scope, diags),
      Declaration::Global(g) => self.visit_global(g, scope, diags),
      Declaration::Nonlocal(n) => self.visit_nonlocal(n, scope, diags),
    }
  }

  fn duplicate(&self, diags: &mut Diagnostics, location: crate::span::Location, name: Symbol) {
    diags.error(location, format!("Duplicate declaration of identifier '{name}' in this scope"));
  }

  fn visit_var(&mut self, v: &VarDef, scope: ScopeId, diags: &mut Diagnostics) {
    let ty = v.var.ty.to_value_type();
    if !self.tables.define(scope, v.var.name, SymbolType::Value(ty)) {
      self.duplicate(diags, v.location, v.var.name);
    }
  }

  fn visit_global(&mut self, g: &GlobalDecl, scope: ScopeId, diags: &mut Diagnostics) {
    if !self.tables.define(scope, g.name, SymbolType::GlobalRef) {
      self.duplicate(diags, g.location, g.name);
    }
  }

  fn visit_nonlocal(&mut self, n: &NonlocalDecl, scope: ScopeId, diags: &mut Diagnostics) {
    if !self.tables.define(scope, n.name, SymbolType::NonlocalRef) {
      self.duplicate(diags, n.location, n.name);
    }
  }

  fn visit_func(&mut self, f: &FuncDef, scope: ScopeId, diags: &mut Diagnostics) {
    let fscope = self.tables.new_scope(scope, ScopeKind::Function);
    let mut params = Vec::new();
    for p in &f.params {
      let ty = p.ty.to_value_type();
      params.push(ty.clone());
      if !self.tables.define(fscope, p.name, SymbolType::Value(ty)) {
        self.duplicate(diags, p.location, p.name);
      }
    }
    let return_type = f.return_type.as_ref().map_or(ValueType::NoneType, TypeAnnotation::to_value_type);
    let def = FunctionDefType { name: f.name, return_type, params, scope: fscope, is_method: false };
    if !self.tables.define(scope, f.name, SymbolType::Function(Box::new(def))) {
      self.duplicate(diags, f.location, f.name);
    }
    for decl in &f.declarations {
      self.visit_decl(decl, fscope, diags);
    }
  }

  fn visit_class(&mut self, c: &ClassDef, scope: ScopeId, diags: &mut Diagnostics) {
    let mut super_class_id = None;
    let mut super_scope = None;
    match self.tables.lookup(scope, c.super_name).map(|(t, _)| t.clone()) {
      None => diags.error(c.location, format!("Super-class '{}' not defined", c.super_name)),
      Some(SymbolType::Class(def)) => {
        if c.super_name == *sym::int || c.super_name == *sym::bool_ || c.super_name == *sym::str_ {
          diags.error(c.location, format!("Class '{}' cannot extend special class '{}'", c.name, c.super_name));
        } else {
          super_class_id = Some(c.super_name);
          super_scope = Some(def.scope);
        }
      }
      Some(_) => diags.error(c.location, format!("Super-class '{}' is not a class", c.super_name)),
    }

    let class_scope = self.tables.new_scope(scope, ScopeKind::Class);
    if let Some(sup) = super_class_id {
      if !self.tree.contains(c.name) {
        self.tree.add_class(c.name, sup);
      }
    }

    for decl in &c.declarations {
      match decl {
        Declaration::Var(v) => self.visit_var(v, class_scope, diags),
        Declaration::Func(f) => self.visit_method(f, c, class_scope, super_scope, diags),
        _ => {}
      }
    }

    let mut inherited_members = Vec::new();
    if let Some(sup_scope) = super_scope {
      let super_bindings: Vec<(Symbol, SymbolType)> = self
        .tables
        .scope(sup_scope)
        .order
        .iter()
        .map(|n| (*n, self.tables.scope(sup_scope).bindings[n].clone()))
        .collect();
      for (name, ty) in super_bindings {
        if self.tables.lookup_local(class_scope, name).is_none() {
          self.tables.define(class_scope, name, ty);
          inherited_members.push(name);
        }
      }
    }

    let class_def = ClassDefType { name: c.name, super_name: super_class_id, scope: class_scope, inherited_members };
    if !self.tables.define(scope, c.name, SymbolType::Class(Box::new(class_def))) {
      self.duplicate(diags, c.location, c.name);
    }
  }

  fn visit_method(
    &mut self, f: &FuncDef, class: &ClassDef, class_scope: ScopeId, super_scope: Option<ScopeId>,
    diags: &mut Diagnostics,
  ) {
    match f.params.first() {
      Some(first) if first.ty == TypeAnnotation::Class(class.name) => {}
      Some(first) => diags.error(
        first.location,
        format!("The first parameter of the following method must be of the enclosing class: '{}'", f.name),
      ),
      None => diags.error(
        f.location,
        format!("First parameter of the following method must be of the enclosing class: '{}'", f.name),
      ),
    }

    let fscope = self.tables.new_scope(class_scope, ScopeKind::Function);
    let mut params = Vec::new();
    for p in &f.params {
      let ty = p.ty.to_value_type();
      params.push(ty.clone());
      if !self.tables.define(fscope, p.name, SymbolType::Value(ty)) {
        self.duplicate(diags, p.location, p.name);
      }
    }
    let return_type = f.return_type.as_ref().map_or(ValueType::NoneType, TypeAnnotation::to_value_type);

    if f.name != *sym::init {
      if let Some(sup_scope) = super_scope {
        if let Some(super_member) = self.tables.lookup_local(sup_scope, f.name).cloned() {
          match super_member {
            SymbolType::Function(super_fn) => {
              let overrides_ok = super_fn.return_type == return_type
                && super_fn.params.len() == params.len()
                && super_fn.params.iter().skip(1).zip(params.iter().skip(1)).all(|(a, b)| a == b);
              if !overrides_ok {
                diags.error(f.location, format!("Method '{}' overridden with a different type signature", f.name));
              }
            }
            SymbolType::Value(_) => {
              diags.error(f.location, format!("Cannot override attribute '{}' with a method", f.name));
            }
            _ => {}
          }
        }
      }
    }

    let def = FunctionDefType { name: f.name, return_type, params, scope: fscope, is_method: true };
    if !self.tables.define(class_scope, f.name, SymbolType::Function(Box::new(def))) {
      self.duplicate(diags, f.location, f.name);
    }
    for decl in &f.declarations {
      self.visit_decl(decl, fscope, diags);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;
  use crate::parser::parse;

  fn generate(src: &str) -> (SymbolTableGenerator, Diagnostics) {
    let prog = parse(lex(src).unwrap()).unwrap();
    let mut g = SymbolTableGenerator::new();
    let mut diags = Diagnostics::new();
    g.run(&prog, &mut diags);
    (g, diags)
  }

  #[test]
  fn builtins_are_seeded() {
    let (g, diags) = generate("");
    assert!(!diags.has_errors());
    assert!(g.tables.lookup_local(g.tables.root, *sym::print).is_some());
    assert!(g.tables.lookup_local(g.tables.root, *sym::int).is_some());
  }

  #[test]
  fn duplicate_class_name_is_rejected() {
    let (_, diags) = generate("class A(object):\n  pass\nclass A(object):\n  pass\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn class_inherits_unshadowed_members() {
    let (g, diags) = generate(
      "class A(object):\n  x:int = 0\nclass B(A):\n  y:int = 0\n",
    );
    assert!(!diags.has_errors());
    let b = g.tables.lookup_local(g.tables.root, intern("B")).unwrap().as_class().unwrap();
    assert!(b.inherited_members.contains(&intern("x")));
    assert!(g.tables.lookup_local(b.scope, intern("x")).is_some());
  }
}
