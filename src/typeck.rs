//! Type Checker: the bidirectional judgement over expressions and
//! statements. Fills every `Expr.inferred_type`, enforces sub-typing, and
//! records each function's free-variable ("lambda-params") capture set.
//! Grounded on `chocopy_semant.cpp`'s `TypeChecker` visitor.

use crate::diagnostics::Diagnostics;
use crate::hierarchy::HierarchyTree;
use crate::span::Location;
use crate::symbol::{sym, Symbol};
use crate::types::ast::*;
use crate::types::entity::{ClassDefType, ScopeId, ScopeKind, SymbolTables, SymbolType};
use crate::types::ty::ValueType;

struct FuncCtx {
  scope: ScopeId,
  return_type: ValueType,
  /// Free names read from an enclosing function's scope, in discovery order.
  captures: Vec<Symbol>,
}

pub struct TypeChecker<'a> {
  tables: &'a mut SymbolTables,
  tree: &'a HierarchyTree,
  func_stack: Vec<FuncCtx>,
}

impl<'a> TypeChecker<'a> {
  pub fn new(tables: &'a mut SymbolTables, tree: &'a HierarchyTree) -> Self {
    Self { tables, tree, func_stack: Vec::new() }
  }

  pub fn run(&mut self, program: &mut Program, diags: &mut Diagnostics) {
    let root = self.tables.root;
    for decl in &mut program.declarations {
      self.visit_decl(decl, root, diags);
    }
    self.visit_block(&mut program.statements, root, diags);
  }

  fn class_def(&self, name: Symbol) -> Option<ClassDefType> {
    self.tables.lookup_local(self.tables.root, name).and_then(SymbolType::as_class).cloned()
  }

  /// Walks the parent chain skipping class scopes: a bare identifier or call
  /// name is never resolved to a class's own attribute/method table.
  fn lookup_skip_class(&self, scope: ScopeId, name: Symbol) -> Option<(SymbolType, ScopeId)> {
    let mut cur = Some(scope);
    while let Some(s) = cur {
      let sc = self.tables.scope(s);
      if sc.kind != Some(ScopeKind::Class) {
        if let Some(ty) = sc.bindings.get(&name) {
          return Some((ty.clone(), s));
        }
      }
      cur = sc.parent;
    }
    None
  }

  fn is_list_like(ty: &ValueType) -> bool { matches!(ty, ValueType::List(_) | ValueType::Empty) }

  fn list_elem(ty: &ValueType) -> Option<ValueType> {
    if let ValueType::List(e) = ty { Some((**e).clone()) } else { None }
  }

  fn literal_type(lit: &Literal) -> ValueType {
    match lit {
      Literal::Integer(_) => ValueType::int(),
      Literal::Bool(_) => ValueType::bool_(),
      Literal::Str(_) => ValueType::str_(),
      Literal::None => ValueType::NoneType,
    }
  }

  fn check_args(&self, args: &[ValueType], params: &[ValueType], location: Location, diags: &mut Diagnostics, name: &str) {
    if args.len() != params.len() {
      diags.error(location, format!("Expected {} argument(s) for '{name}', got {}", params.len(), args.len()));
      return;
    }
    for (a, p) in args.iter().zip(params) {
      if !a.is_subtype(p, self.tree) {
        diags.error(location, format!("Expected type '{p}' for argument to '{name}'; got type '{a}'"));
      }
    }
  }

  // --- Declarations ---

  fn visit_decl(&mut self, decl: &mut Declaration, scope: ScopeId, diags: &mut Diagnostics) {
    match decl {
      Declaration::Class(c) => self.visit_class(c, scope, diags),
      Declaration::Func(f) => self.visit_func(f, scope, diags),
      Declaration::Var(v) => self.visit_vardef(v, diags),
      Declaration::Global(_) | Declaration::Nonlocal(_) => {}
    }
  }

  fn visit_vardef(&self, v: &VarDef, diags: &mut Diagnostics) {
    let declared = v.var.ty.to_value_type();
    let lit_ty = Self::literal_type(&v.value);
    if !lit_ty.is_subtype(&declared, self.tree) {
      diags.error(v.location, format!("Expected type '{declared}'; got type '{lit_ty}'"));
    }
  }

  fn visit_class(&mut self, c: &mut ClassDef, scope: ScopeId, diags: &mut Diagnostics) {
    let class_scope =
      self.tables.lookup_local(scope, c.name).and_then(SymbolType::as_class).map(|d| d.scope).unwrap_or(scope);
    for decl in &mut c.declarations {
      match decl {
        Declaration::Var(v) => self.visit_vardef(v, diags),
        Declaration::Func(f) => self.visit_func(f, class_scope, diags),
        _ => {}
      }
    }
  }

  fn visit_func(&mut self, f: &mut FuncDef, scope: ScopeId, diags: &mut Diagnostics) {
    let def = match self.tables.lookup_local(scope, f.name).and_then(SymbolType::as_function).cloned() {
      Some(d) => d,
      None => return,
    };
    self.func_stack.push(FuncCtx { scope: def.scope, return_type: def.return_type.clone(), captures: Vec::new() });
    for decl in &mut f.declarations {
      self.visit_decl(decl, def.scope, diags);
    }
    let is_return = self.visit_block(&mut f.statements, def.scope, diags);
    if def.return_type != ValueType::NoneType && !is_return {
      diags.error(f.location, format!("Function '{}' does not return a value on every path", f.name));
    }
    let ctx = self.func_stack.pop().expect("pushed just above");
    f.lambda_params = ctx.captures;
  }

  // --- Statements ---

  fn visit_block(&mut self, stmts: &mut [Stmt], scope: ScopeId, diags: &mut Diagnostics) -> bool {
    let mut any = false;
    for s in stmts {
      if self.visit_stmt(s, scope, diags) {
        any = true;
      }
    }
    any
  }

  fn visit_stmt(&mut self, stmt: &mut Stmt, scope: ScopeId, diags: &mut Diagnostics) -> bool {
    match stmt {
      Stmt::Expr(e) => {
        self.visit_expr(e, scope, diags);
        false
      }
      Stmt::Assign(a) => {
        self.visit_assign(a, scope, diags);
        false
      }
      Stmt::If(s) => self.visit_if(s, scope, diags),
      Stmt::While(s) => {
        self.visit_while(s, scope, diags);
        false
      }
      Stmt::For(s) => {
        self.visit_for(s, scope, diags);
        false
      }
      Stmt::Return(r) => {
        self.visit_return(r, scope, diags);
        true
      }
      Stmt::Pass(_) => false,
    }
  }

  fn visit_if(&mut self, s: &mut IfStmt, scope: ScopeId, diags: &mut Diagnostics) -> bool {
    let cond_ty = self.visit_expr(&mut s.condition, scope, diags);
    if cond_ty != ValueType::bool_() {
      diags.error(s.location, format!("If condition must be bool, got '{cond_ty}'"));
    }
    let then_ret = self.visit_block(&mut s.then_body, scope, diags);
    let else_ret = self.visit_block(&mut s.else_body, scope, diags);
    then_ret && else_ret
  }

  fn visit_while(&mut self, s: &mut WhileStmt, scope: ScopeId, diags: &mut Diagnostics) {
    let cond_ty = self.visit_expr(&mut s.condition, scope, diags);
    if cond_ty != ValueType::bool_() {
      diags.error(s.location, format!("While condition must be bool, got '{cond_ty}'"));
    }
    self.visit_block(&mut s.body, scope, diags);
  }

  fn visit_for(&mut self, s: &mut ForStmt, scope: ScopeId, diags: &mut Diagnostics) {
    let iter_ty = self.visit_expr(&mut s.iterable, scope, diags);
    let elem_ty = match &iter_ty {
      ValueType::Class(c) if *c == *sym::str_ => ValueType::str_(),
      ValueType::List(e) => (**e).clone(),
      ValueType::Empty => ValueType::object(),
      _ => {
        diags.error(s.location, format!("For loop requires a str or list, got '{iter_ty}'"));
        ValueType::object()
      }
    };
    match self.tables.lookup_local(scope, s.identifier) {
      Some(SymbolType::Value(var_ty)) => {
        let var_ty = var_ty.clone();
        if !elem_ty.is_subtype(&var_ty, self.tree) {
          diags.error(s.location, format!("Expected type '{var_ty}' for loop variable; got type '{elem_ty}'"));
        }
      }
      _ => diags.error(s.location, format!("Undeclared loop variable '{}'", s.identifier)),
    }
    self.visit_block(&mut s.body, scope, diags);
  }

  fn visit_return(&mut self, r: &mut ReturnStmt, scope: ScopeId, diags: &mut Diagnostics) {
    let value_ty = match &mut r.value {
      Some(e) => self.visit_expr(e, scope, diags),
      None => ValueType::NoneType,
    };
    if let Some(ctx) = self.func_stack.last() {
      let ret_ty = ctx.return_type.clone();
      if !value_ty.is_subtype(&ret_ty, self.tree) {
        diags.error(r.location, format!("Expected return type '{ret_ty}'; got type '{value_ty}'"));
      }
    }
  }

  fn visit_assign(&mut self, a: &mut AssignStmt, scope: ScopeId, diags: &mut Diagnostics) {
    let rhs_ty = self.visit_expr(&mut a.value, scope, diags);
    if a.targets.len() > 1 {
      if let ValueType::List(e) = &rhs_ty {
        if **e == ValueType::NoneType {
          diags.error(a.location, "Right-hand side of a multiple assignment cannot be '[<None>]'");
        }
      }
    }
    for target in &mut a.targets {
      self.visit_assign_target(target, &rhs_ty, scope, diags);
    }
  }

  fn visit_assign_target(&mut self, target: &mut Expr, rhs_ty: &ValueType, scope: ScopeId, diags: &mut Diagnostics) {
    let location = target.location;
    let target_ty = match &mut target.kind {
      ExprKind::Identifier(name) => match self.tables.lookup_local(scope, *name) {
        Some(SymbolType::Value(ty)) => Some(ty.clone()),
        _ => {
          diags.error(location, format!("Cannot assign to undeclared name '{name}'"));
          None
        }
      },
      ExprKind::Member { base, member } => {
        let base_ty = self.visit_expr(base, scope, diags);
        if let ValueType::Class(c) = &base_ty {
          match self.class_def(*c) {
            Some(def) => match self.tables.lookup_local(def.scope, *member) {
              Some(SymbolType::Value(ty)) => Some(ty.clone()),
              _ => {
                diags.error(location, format!("Class '{c}' has no attribute '{member}'"));
                None
              }
            },
            None => None,
          }
        } else {
          diags.error(location, "Cannot assign an attribute on a non-object type");
          None
        }
      }
      ExprKind::Index { base, index } => {
        let base_ty = self.visit_expr(base, scope, diags);
        let idx_ty = self.visit_expr(index, scope, diags);
        if idx_ty != ValueType::int() {
          diags.error(location, format!("Index must be of type int, got '{idx_ty}'"));
        }
        match &base_ty {
          ValueType::Class(c) if *c == *sym::str_ => {
            diags.error(location, "Cannot assign to a string index");
            None
          }
          ValueType::List(e) => Some((**e).clone()),
          _ => {
            diags.error(location, format!("Cannot assign to an index of type '{base_ty}'"));
            None
          }
        }
      }
      _ => {
        diags.error(location, "Invalid assignment target");
        None
      }
    };
    if let Some(ty) = target_ty {
      if !rhs_ty.is_subtype(&ty, self.tree) {
        diags.error(location, format!("Expected type '{ty}'; got type '{rhs_ty}'"));
      }
      target.inferred_type = Some(ty);
    }
  }

  // --- Expressions ---

  fn visit_expr(&mut self, e: &mut Expr, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let ty = match &mut e.kind {
      ExprKind::IntegerLiteral(_) => ValueType::int(),
      ExprKind::BoolLiteral(_) => ValueType::bool_(),
      ExprKind::StringLiteral(_) => ValueType::str_(),
      ExprKind::NoneLiteral => ValueType::NoneType,
      ExprKind::Identifier(name) => self.visit_identifier(*name, e.location, scope, diags),
      ExprKind::Unary { op, operand } => self.visit_unary(*op, operand, e.location, scope, diags),
      ExprKind::Binary { op, left, right } => self.visit_binary(*op, left, right, e.location, scope, diags),
      ExprKind::IfExpr { condition, then_expr, else_expr } => {
        self.visit_if_expr(condition, then_expr, else_expr, e.location, scope, diags)
      }
      ExprKind::ListLiteral(items) => self.visit_list_literal(items, scope, diags),
      ExprKind::Index { base, index } => self.visit_index(base, index, e.location, scope, diags),
      ExprKind::Member { base, member } => self.visit_member(base, *member, e.location, scope, diags),
      ExprKind::Call { callee, args } => self.visit_call(*callee, args, e.location, scope, diags),
      ExprKind::MethodCall { receiver, method, args } => {
        self.visit_method_call(receiver, *method, args, e.location, scope, diags)
      }
    };
    e.inferred_type = Some(ty.clone());
    ty
  }

  fn visit_identifier(&mut self, name: Symbol, location: Location, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    match self.lookup_skip_class(scope, name) {
      Some((SymbolType::Value(ty), found_scope)) => {
        if let Some(ctx) = self.func_stack.last_mut() {
          if found_scope != scope && found_scope != self.tables.root && !ctx.captures.contains(&name) {
            ctx.captures.push(name);
          }
        }
        ty
      }
      Some((SymbolType::Function(_), _)) => {
        diags.error(location, format!("Function '{name}' cannot be used as a value"));
        ValueType::object()
      }
      Some((SymbolType::Class(_), _)) => {
        diags.error(location, format!("Class '{name}' cannot be used as a value"));
        ValueType::object()
      }
      _ => {
        diags.error(location, format!("Undefined name '{name}'"));
        ValueType::object()
      }
    }
  }

  fn visit_unary(&mut self, op: UnaryOp, operand: &mut Expr, location: Location, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let ty = self.visit_expr(operand, scope, diags);
    match op {
      UnaryOp::Neg => {
        if ty != ValueType::int() {
          diags.error(location, format!("Cannot negate type '{ty}'"));
        }
        ValueType::int()
      }
      UnaryOp::Not => {
        if ty != ValueType::bool_() {
          diags.error(location, format!("Cannot apply 'not' to type '{ty}'"));
        }
        ValueType::bool_()
      }
    }
  }

  fn visit_binary(
    &mut self, op: BinaryOp, left: &mut Expr, right: &mut Expr, location: Location, scope: ScopeId,
    diags: &mut Diagnostics,
  ) -> ValueType {
    let lt = self.visit_expr(left, scope, diags);
    let rt = self.visit_expr(right, scope, diags);
    if op.is_arithmetic() {
      if op == BinaryOp::Add {
        if lt == ValueType::int() && rt == ValueType::int() {
          return ValueType::int();
        }
        if lt == ValueType::str_() && rt == ValueType::str_() {
          return ValueType::str_();
        }
        if Self::is_list_like(&lt) && Self::is_list_like(&rt) {
          return match (Self::list_elem(&lt), Self::list_elem(&rt)) {
            (Some(a), Some(b)) => ValueType::list(a.join(&b, self.tree)),
            (Some(a), None) => ValueType::list(a),
            (None, Some(b)) => ValueType::list(b),
            (None, None) => ValueType::Empty,
          };
        }
        diags.error(location, format!("Cannot apply '+' to types '{lt}' and '{rt}'"));
        return ValueType::object();
      }
      if lt != ValueType::int() || rt != ValueType::int() {
        diags.error(location, format!("Operator requires int operands, got '{lt}' and '{rt}'"));
      }
      return ValueType::int();
    }
    if op.is_equality() {
      if lt.is_primitive() && rt.is_primitive() && lt == rt {
        return ValueType::bool_();
      }
      diags.error(location, format!("Cannot compare types '{lt}' and '{rt}'"));
      return ValueType::bool_();
    }
    if op.is_ordering() {
      if lt != ValueType::int() || rt != ValueType::int() {
        diags.error(location, format!("Comparison requires int operands, got '{lt}' and '{rt}'"));
      }
      return ValueType::bool_();
    }
    if op.is_logical() {
      if lt != ValueType::bool_() || rt != ValueType::bool_() {
        diags.error(location, format!("Operator requires bool operands, got '{lt}' and '{rt}'"));
      }
      return ValueType::bool_();
    }
    // BinaryOp::Is
    if lt.is_primitive() || rt.is_primitive() {
      diags.error(location, "Cannot use 'is' on primitive types");
    }
    ValueType::bool_()
  }

  fn visit_if_expr(
    &mut self, condition: &mut Expr, then_expr: &mut Expr, else_expr: &mut Expr, location: Location, scope: ScopeId,
    diags: &mut Diagnostics,
  ) -> ValueType {
    let cond_ty = self.visit_expr(condition, scope, diags);
    if cond_ty != ValueType::bool_() {
      diags.error(location, format!("If-expression condition must be bool, got '{cond_ty}'"));
    }
    let then_ty = self.visit_expr(then_expr, scope, diags);
    let else_ty = self.visit_expr(else_expr, scope, diags);
    then_ty.join(&else_ty, self.tree)
  }

  fn visit_list_literal(&mut self, items: &mut [Expr], scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let mut elem: Option<ValueType> = None;
    for item in items.iter_mut() {
      let t = self.visit_expr(item, scope, diags);
      elem = Some(match elem {
        Some(acc) => acc.join(&t, self.tree),
        None => t,
      });
    }
    match elem {
      Some(e) => ValueType::list(e),
      None => ValueType::Empty,
    }
  }

  fn visit_index(&mut self, base: &mut Expr, index: &mut Expr, location: Location, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let base_ty = self.visit_expr(base, scope, diags);
    let idx_ty = self.visit_expr(index, scope, diags);
    if idx_ty != ValueType::int() {
      diags.error(location, format!("Index must be of type int, got '{idx_ty}'"));
    }
    match &base_ty {
      ValueType::Class(c) if *c == *sym::str_ => ValueType::str_(),
      ValueType::List(e) => (**e).clone(),
      ValueType::Empty => {
        diags.error(location, "Cannot index into an empty list");
        ValueType::object()
      }
      _ => {
        diags.error(location, format!("Cannot index into type '{base_ty}'"));
        ValueType::object()
      }
    }
  }

  fn visit_member(&mut self, base: &mut Expr, member: Symbol, location: Location, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let base_ty = self.visit_expr(base, scope, diags);
    let ValueType::Class(c) = &base_ty else {
      diags.error(location, "Attribute access on a non-object type");
      return ValueType::object();
    };
    let Some(def) = self.class_def(*c) else { return ValueType::object() };
    match self.tables.lookup_local(def.scope, member) {
      Some(SymbolType::Value(ty)) => ty.clone(),
      Some(SymbolType::Function(_)) => {
        diags.error(location, format!("'{member}' is a method; call it instead of reading it"));
        ValueType::object()
      }
      _ => {
        diags.error(location, format!("Class '{c}' has no attribute '{member}'"));
        ValueType::object()
      }
    }
  }

  fn visit_call(&mut self, callee: Symbol, args: &mut [Expr], location: Location, scope: ScopeId, diags: &mut Diagnostics) -> ValueType {
    let arg_tys: Vec<ValueType> = args.iter_mut().map(|a| self.visit_expr(a, scope, diags)).collect();
    match self.lookup_skip_class(scope, callee).map(|(t, _)| t) {
      Some(SymbolType::Function(f)) => {
        self.check_args(&arg_tys, &f.params, location, diags, f.name.as_str());
        f.return_type
      }
      Some(SymbolType::Class(c)) => {
        if let Some(init) = self.tables.lookup_local(c.scope, *sym::init).and_then(SymbolType::as_function).cloned() {
          self.check_args(&arg_tys, &init.params[1..], location, diags, "__init__");
        }
        ValueType::Class(c.name)
      }
      Some(SymbolType::Value(_)) => {
        diags.error(location, format!("'{callee}' is not callable"));
        ValueType::object()
      }
      _ => {
        diags.error(location, format!("Undefined function or class '{callee}'"));
        ValueType::object()
      }
    }
  }

  fn visit_method_call(
    &mut self, receiver: &mut Expr, method: Symbol, args: &mut [Expr], location: Location, scope: ScopeId,
    diags: &mut Diagnostics,
  ) -> ValueType {
    let recv_ty = self.visit_expr(receiver, scope, diags);
    let arg_tys: Vec<ValueType> = args.iter_mut().map(|a| self.visit_expr(a, scope, diags)).collect();
    let ValueType::Class(c) = &recv_ty else {
      diags.error(location, "Method call on a non-object type");
      return ValueType::object();
    };
    let Some(def) = self.class_def(*c) else { return ValueType::object() };
    match self.tables.lookup_local(def.scope, method).cloned() {
      Some(SymbolType::Function(f)) => {
        self.check_args(&arg_tys, &f.params[1..], location, diags, f.name.as_str());
        f.return_type
      }
      Some(SymbolType::Value(_)) => {
        diags.error(location, format!("'{method}' is an attribute, not a method"));
        ValueType::object()
      }
      _ => {
        diags.error(location, format!("Class '{c}' has no method '{method}'"));
        ValueType::object()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declck::DeclarationAnalyzer;
  use crate::lexer::lex;
  use crate::nameck::SymbolTableGenerator;
  use crate::parser::parse;

  fn check(src: &str) -> (Program, Diagnostics) {
    let mut prog = parse(lex(src).unwrap()).unwrap();
    let mut gen = SymbolTableGenerator::new();
    let mut diags = Diagnostics::new();
    gen.run(&prog, &mut diags);
    DeclarationAnalyzer::new(&mut gen.tables, &gen.tree).run(&prog, &mut diags);
    TypeChecker::new(&mut gen.tables, &gen.tree).run(&mut prog, &mut diags);
    (prog, diags)
  }

  #[test]
  fn arithmetic_on_mismatched_types_is_rejected() {
    let (_, diags) = check("a:int = 0\na = \"hi\"\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn accepted_program_has_no_errors() {
    let (_, diags) = check("print(1 + 2)\n");
    assert!(!diags.has_errors());
  }

  #[test]
  fn nested_function_capture_is_recorded() {
    let (prog, diags) = check(
      "def outer() -> int:\n  x:int = 7\n  def inner() -> int:\n    return x\n  return inner()\nprint(outer())\n",
    );
    assert!(!diags.has_errors());
    let Declaration::Func(outer) = &prog.declarations[0] else { panic!("expected a function") };
    let Declaration::Func(inner) = &outer.declarations[0] else { panic!("expected a nested function") };
    assert_eq!(inner.lambda_params, vec![crate::symbol::intern("x")]);
  }

  #[test]
  fn missing_return_is_rejected() {
    let (_, diags) = check("def f() -> int:\n  pass\n");
    assert!(diags.has_errors());
  }

  #[test]
  fn method_override_join_is_inherited() {
    let (_, diags) = check(
      "class A(object):\n  def f(self:\"A\") -> int:\n    return 1\nclass B(A):\n  pass\nb:B = None\nb = B()\nprint(b.f())\n",
    );
    assert!(!diags.has_errors());
  }
}
