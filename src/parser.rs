//! Recursive-descent parser over the token stream `lexer` produces.
//! Grammar shape follows `chocopy_parse.{hpp,cpp}`'s node set; precedence
//! climbing for expressions follows the order documented in §4.6:
//! `or < and < not < comparisons < + - < * // % < unary - < postfix . [] () < atom`.

use crate::diagnostics::Diagnostic;
use crate::lexer::{TokKind, Token};
use crate::span::{Location, Position};
use crate::symbol::{intern, Symbol};
use crate::types::ast::*;

struct Parser {
  toks: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn cur(&self) -> &Token { &self.toks[self.pos] }
  fn cur_kind(&self) -> &TokKind { &self.cur().kind }

  fn bump(&mut self) -> Token {
    let t = self.toks[self.pos].clone();
    if self.pos + 1 < self.toks.len() { self.pos += 1; }
    t
  }

  fn at(&self, k: &TokKind) -> bool { std::mem::discriminant(self.cur_kind()) == std::mem::discriminant(k) }

  fn expect(&mut self, k: TokKind) -> Result<Token, Diagnostic> {
    if self.at(&k) {
      Ok(self.bump())
    } else {
      Err(Diagnostic::syntax(self.cur().span, format!("expected {:?}, found {:?}", k, self.cur_kind())))
    }
  }

  fn expect_ident(&mut self) -> Result<Symbol, Diagnostic> {
    Ok(self.expect_ident_spanned()?.0)
  }

  fn expect_ident_spanned(&mut self) -> Result<(Symbol, Token), Diagnostic> {
    if let TokKind::Ident(s) = self.cur_kind() {
      let s = *s;
      let t = self.bump();
      Ok((s, t))
    } else {
      Err(Diagnostic::syntax(self.cur().span, format!("expected identifier, found {:?}", self.cur_kind())))
    }
  }

  fn peek2_is_colon(&self) -> bool {
    matches!(self.toks.get(self.pos + 1).map(|t| &t.kind), Some(TokKind::Colon))
  }

  // ---- declarations ----

  fn parse_decl_block(&mut self) -> Result<Vec<Declaration>, Diagnostic> {
    let mut decls = Vec::new();
    loop {
      match self.cur_kind() {
        TokKind::Def => decls.push(Declaration::Func(self.parse_funcdef()?)),
        TokKind::Class => decls.push(Declaration::Class(self.parse_classdef()?)),
        TokKind::Global => decls.push(Declaration::Global(self.parse_global()?)),
        TokKind::Nonlocal => decls.push(Declaration::Nonlocal(self.parse_nonlocal()?)),
        TokKind::Ident(_) if self.peek2_is_colon() => decls.push(Declaration::Var(self.parse_vardef()?)),
        _ => break,
      }
    }
    Ok(decls)
  }

  /// A class body additionally tolerates a bare `pass` as filler, mirroring
  /// the original grammar's dual-purpose `PassStmt` node.
  fn parse_class_body(&mut self) -> Result<Vec<Declaration>, Diagnostic> {
    let mut decls = Vec::new();
    loop {
      match self.cur_kind() {
        TokKind::Pass => { self.bump(); self.expect(TokKind::Newline)?; }
        TokKind::Def => decls.push(Declaration::Func(self.parse_funcdef()?)),
        TokKind::Ident(_) if self.peek2_is_colon() => decls.push(Declaration::Var(self.parse_vardef()?)),
        _ => break,
      }
    }
    Ok(decls)
  }

  fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, Diagnostic> {
    if self.at(&TokKind::LBracket) {
      self.bump();
      let inner = self.parse_type_annotation()?;
      self.expect(TokKind::RBracket)?;
      Ok(TypeAnnotation::List(Box::new(inner)))
    } else if let TokKind::Str(s) = self.cur_kind() {
      let s = s.clone();
      self.bump();
      Ok(TypeAnnotation::Class(intern(&s)))
    } else {
      Ok(TypeAnnotation::Class(self.expect_ident()?))
    }
  }

  fn parse_typedvar(&mut self) -> Result<TypedVar, Diagnostic> {
    let (name, tok) = self.expect_ident_spanned()?;
    self.expect(TokKind::Colon)?;
    let ty = self.parse_type_annotation()?;
    Ok(TypedVar { location: tok.span, name, ty })
  }

  fn parse_literal(&mut self) -> Result<Literal, Diagnostic> {
    let tok = self.bump();
    match tok.kind {
      TokKind::Int(n) => Ok(Literal::Integer(n)),
      TokKind::Str(s) => Ok(Literal::Str(s)),
      TokKind::True => Ok(Literal::Bool(true)),
      TokKind::False => Ok(Literal::Bool(false)),
      TokKind::None => Ok(Literal::None),
      k => Err(Diagnostic::syntax(tok.span, format!("expected literal, found {k:?}"))),
    }
  }

  fn parse_vardef(&mut self) -> Result<VarDef, Diagnostic> {
    let var = self.parse_typedvar()?;
    self.expect(TokKind::Eq)?;
    let value = self.parse_literal()?;
    let end = self.expect(TokKind::Newline)?.span.last;
    Ok(VarDef { location: Location::new(var.location.first, end), var, value })
  }

  fn parse_global(&mut self) -> Result<GlobalDecl, Diagnostic> {
    let start = self.expect(TokKind::Global)?.span.first;
    let name = self.expect_ident()?;
    let end = self.expect(TokKind::Newline)?.span.last;
    Ok(GlobalDecl { location: Location::new(start, end), name })
  }

  fn parse_nonlocal(&mut self) -> Result<NonlocalDecl, Diagnostic> {
    let start = self.expect(TokKind::Nonlocal)?.span.first;
    let name = self.expect_ident()?;
    let end = self.expect(TokKind::Newline)?.span.last;
    Ok(NonlocalDecl { location: Location::new(start, end), name })
  }

  fn parse_classdef(&mut self) -> Result<ClassDef, Diagnostic> {
    let start = self.expect(TokKind::Class)?.span.first;
    let name = self.expect_ident()?;
    self.expect(TokKind::LParen)?;
    let super_name = self.expect_ident()?;
    self.expect(TokKind::RParen)?;
    self.expect(TokKind::Colon)?;
    self.expect(TokKind::Newline)?;
    self.expect(TokKind::Indent)?;
    let declarations = self.parse_class_body()?;
    let end = self.expect(TokKind::Dedent)?.span.last;
    Ok(ClassDef { location: Location::new(start, end), name, super_name, declarations })
  }

  fn parse_funcdef(&mut self) -> Result<FuncDef, Diagnostic> {
    let start = self.expect(TokKind::Def)?.span.first;
    let name = self.expect_ident()?;
    self.expect(TokKind::LParen)?;
    let mut params = Vec::new();
    if !self.at(&TokKind::RParen) {
      loop {
        params.push(self.parse_typedvar()?);
        if self.at(&TokKind::Comma) { self.bump(); } else { break; }
      }
    }
    self.expect(TokKind::RParen)?;
    let return_type =
      if self.at(&TokKind::Arrow) { self.bump(); Some(self.parse_type_annotation()?) } else { None };
    self.expect(TokKind::Colon)?;
    self.expect(TokKind::Newline)?;
    self.expect(TokKind::Indent)?;
    let declarations = self.parse_decl_block()?;
    let mut statements = Vec::new();
    while !self.at(&TokKind::Dedent) {
      statements.push(self.parse_stmt()?);
    }
    let end = self.expect(TokKind::Dedent)?.span.last;
    Ok(FuncDef {
      location: Location::new(start, end), name, params, return_type,
      declarations, statements, lambda_params: Vec::new(),
    })
  }

  // ---- statements ----

  fn parse_suite_stmts(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
    let mut stmts = Vec::new();
    while !self.at(&TokKind::Dedent) {
      stmts.push(self.parse_stmt()?);
    }
    Ok(stmts)
  }

  fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
    match self.cur_kind() {
      TokKind::If => self.parse_if(),
      TokKind::While => self.parse_while(),
      TokKind::For => self.parse_for(),
      TokKind::Return => self.parse_return(),
      TokKind::Pass => { let t = self.bump(); self.expect(TokKind::Newline)?; Ok(Stmt::Pass(t.span)) }
      _ => self.parse_expr_stmt(),
    }
  }

  fn parse_if_like(&mut self, start: Position) -> Result<IfStmt, Diagnostic> {
    let condition = self.parse_expr()?;
    self.expect(TokKind::Colon)?;
    self.expect(TokKind::Newline)?;
    self.expect(TokKind::Indent)?;
    let then_body = self.parse_suite_stmts()?;
    let mut end = self.expect(TokKind::Dedent)?.span.last;
    let else_body = if self.at(&TokKind::Elif) {
      let elif_start = self.expect(TokKind::Elif)?.span.first;
      let nested = self.parse_if_like(elif_start)?;
      end = nested.location.last;
      vec![Stmt::If(nested)]
    } else if self.at(&TokKind::Else) {
      self.bump();
      self.expect(TokKind::Colon)?;
      self.expect(TokKind::Newline)?;
      self.expect(TokKind::Indent)?;
      let body = self.parse_suite_stmts()?;
      end = self.expect(TokKind::Dedent)?.span.last;
      body
    } else {
      Vec::new()
    };
    Ok(IfStmt { location: Location::new(start, end), condition, then_body, else_body })
  }

  fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
    let start = self.expect(TokKind::If)?.span.first;
    Ok(Stmt::If(self.parse_if_like(start)?))
  }

  fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
    let start = self.expect(TokKind::While)?.span.first;
    let condition = self.parse_expr()?;
    self.expect(TokKind::Colon)?;
    self.expect(TokKind::Newline)?;
    self.expect(TokKind::Indent)?;
    let body = self.parse_suite_stmts()?;
    let end = self.expect(TokKind::Dedent)?.span.last;
    Ok(Stmt::While(WhileStmt { location: Location::new(start, end), condition, body }))
  }

  fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
    let start = self.expect(TokKind::For)?.span.first;
    let identifier = self.expect_ident()?;
    self.expect(TokKind::In)?;
    let iterable = self.parse_expr()?;
    self.expect(TokKind::Colon)?;
    self.expect(TokKind::Newline)?;
    self.expect(TokKind::Indent)?;
    let body = self.parse_suite_stmts()?;
    let end = self.expect(TokKind::Dedent)?.span.last;
    Ok(Stmt::For(ForStmt { location: Location::new(start, end), identifier, iterable, body }))
  }

  fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
    let start = self.expect(TokKind::Return)?.span.first;
    let value = if self.at(&TokKind::Newline) { None } else { Some(self.parse_expr()?) };
    let end = self.expect(TokKind::Newline)?.span.last;
    Ok(Stmt::Return(ReturnStmt { location: Location::new(start, end), value }))
  }

  fn parse_expr_stmt(&mut self) -> Result<Stmt, Diagnostic> {
    let first = self.parse_expr()?;
    if self.at(&TokKind::Eq) {
      let mut targets = vec![first];
      let value;
      loop {
        self.bump();
        let e = self.parse_expr()?;
        if self.at(&TokKind::Eq) {
          targets.push(e);
        } else {
          value = e;
          break;
        }
      }
      let end = self.expect(TokKind::Newline)?.span.last;
      let start = targets[0].location.first;
      Ok(Stmt::Assign(AssignStmt { location: Location::new(start, end), targets, value }))
    } else {
      self.expect(TokKind::Newline)?;
      Ok(Stmt::Expr(first))
    }
  }

  // ---- expressions ----

  fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
    let e = self.parse_or()?;
    if self.at(&TokKind::If) {
      self.bump();
      let condition = self.parse_or()?;
      self.expect(TokKind::Else)?;
      let else_expr = self.parse_expr()?;
      let loc = Location::new(e.location.first, else_expr.location.last);
      return Ok(Expr::new(
        loc,
        ExprKind::IfExpr { condition: Box::new(condition), then_expr: Box::new(e), else_expr: Box::new(else_expr) },
      ));
    }
    Ok(e)
  }

  fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
    let mut left = self.parse_and()?;
    while self.at(&TokKind::Or) {
      self.bump();
      let right = self.parse_and()?;
      let loc = left.location.to(right.location);
      left = Expr::new(loc, ExprKind::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) });
    }
    Ok(left)
  }

  fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
    let mut left = self.parse_not()?;
    while self.at(&TokKind::And) {
      self.bump();
      let right = self.parse_not()?;
      let loc = left.location.to(right.location);
      left = Expr::new(loc, ExprKind::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right) });
    }
    Ok(left)
  }

  fn parse_not(&mut self) -> Result<Expr, Diagnostic> {
    if self.at(&TokKind::Not) {
      let t = self.bump();
      let operand = self.parse_not()?;
      let loc = Location::new(t.span.first, operand.location.last);
      return Ok(Expr::new(loc, ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }));
    }
    self.parse_comparison()
  }

  fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
    let mut left = self.parse_add()?;
    loop {
      let op = match self.cur_kind() {
        TokKind::EqEq => BinaryOp::Eq,
        TokKind::NotEq => BinaryOp::Ne,
        TokKind::Lt => BinaryOp::Lt,
        TokKind::Le => BinaryOp::Le,
        TokKind::Gt => BinaryOp::Gt,
        TokKind::Ge => BinaryOp::Ge,
        TokKind::Is => BinaryOp::Is,
        _ => break,
      };
      self.bump();
      let right = self.parse_add()?;
      let loc = left.location.to(right.location);
      left = Expr::new(loc, ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) });
    }
    Ok(left)
  }

  fn parse_add(&mut self) -> Result<Expr, Diagnostic> {
    let mut left = self.parse_mul()?;
    loop {
      let op = match self.cur_kind() {
        TokKind::Plus => BinaryOp::Add,
        TokKind::Minus => BinaryOp::Sub,
        _ => break,
      };
      self.bump();
      let right = self.parse_mul()?;
      let loc = left.location.to(right.location);
      left = Expr::new(loc, ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) });
    }
    Ok(left)
  }

  fn parse_mul(&mut self) -> Result<Expr, Diagnostic> {
    let mut left = self.parse_unary()?;
    loop {
      let op = match self.cur_kind() {
        TokKind::Star => BinaryOp::Mul,
        TokKind::SlashSlash => BinaryOp::FloorDiv,
        TokKind::Percent => BinaryOp::Mod,
        _ => break,
      };
      self.bump();
      let right = self.parse_unary()?;
      let loc = left.location.to(right.location);
      left = Expr::new(loc, ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) });
    }
    Ok(left)
  }

  fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
    if self.at(&TokKind::Minus) {
      let t = self.bump();
      let operand = self.parse_unary()?;
      let loc = Location::new(t.span.first, operand.location.last);
      return Ok(Expr::new(loc, ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand) }));
    }
    self.parse_postfix()
  }

  fn parse_args(&mut self) -> Result<Vec<Expr>, Diagnostic> {
    let mut args = Vec::new();
    if !self.at(&TokKind::RParen) {
      loop {
        args.push(self.parse_expr()?);
        if self.at(&TokKind::Comma) { self.bump(); } else { break; }
      }
    }
    Ok(args)
  }

  fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
    let mut e = self.parse_atom()?;
    loop {
      match self.cur_kind() {
        TokKind::Dot => {
          self.bump();
          let (member, tok) = self.expect_ident_spanned()?;
          if self.at(&TokKind::LParen) {
            self.bump();
            let args = self.parse_args()?;
            let end = self.expect(TokKind::RParen)?.span.last;
            let loc = Location::new(e.location.first, end);
            e = Expr::new(loc, ExprKind::MethodCall { receiver: Box::new(e), method: member, args });
          } else {
            let loc = Location::new(e.location.first, tok.span.last);
            e = Expr::new(loc, ExprKind::Member { base: Box::new(e), member });
          }
        }
        TokKind::LBracket => {
          self.bump();
          let index = self.parse_expr()?;
          let end = self.expect(TokKind::RBracket)?.span.last;
          let loc = Location::new(e.location.first, end);
          e = Expr::new(loc, ExprKind::Index { base: Box::new(e), index: Box::new(index) });
        }
        _ => break,
      }
    }
    Ok(e)
  }

  fn parse_atom(&mut self) -> Result<Expr, Diagnostic> {
    let tok = self.cur().clone();
    match tok.kind.clone() {
      TokKind::Int(n) => { self.bump(); Ok(Expr::new(tok.span, ExprKind::IntegerLiteral(n))) }
      TokKind::Str(s) => { self.bump(); Ok(Expr::new(tok.span, ExprKind::StringLiteral(s))) }
      TokKind::True => { self.bump(); Ok(Expr::new(tok.span, ExprKind::BoolLiteral(true))) }
      TokKind::False => { self.bump(); Ok(Expr::new(tok.span, ExprKind::BoolLiteral(false))) }
      TokKind::None => { self.bump(); Ok(Expr::new(tok.span, ExprKind::NoneLiteral)) }
      TokKind::Ident(name) => {
        self.bump();
        if self.at(&TokKind::LParen) {
          self.bump();
          let args = self.parse_args()?;
          let end = self.expect(TokKind::RParen)?.span.last;
          Ok(Expr::new(Location::new(tok.span.first, end), ExprKind::Call { callee: name, args }))
        } else {
          Ok(Expr::new(tok.span, ExprKind::Identifier(name)))
        }
      }
      TokKind::LParen => {
        self.bump();
        let e = self.parse_expr()?;
        let end = self.expect(TokKind::RParen)?.span.last;
        Ok(Expr { location: Location::new(tok.span.first, end), ..e })
      }
      TokKind::LBracket => {
        self.bump();
        let mut elems = Vec::new();
        if !self.at(&TokKind::RBracket) {
          loop {
            elems.push(self.parse_expr()?);
            if self.at(&TokKind::Comma) { self.bump(); } else { break; }
          }
        }
        let end = self.expect(TokKind::RBracket)?.span.last;
        Ok(Expr::new(Location::new(tok.span.first, end), ExprKind::ListLiteral(elems)))
      }
      k => Err(Diagnostic::syntax(tok.span, format!("unexpected token {k:?}"))),
    }
  }
}

/// Parses a complete token stream into a `Program`. Stops at the first
/// syntax error, matching §7's "syntax errors short-circuit" rule.
pub fn parse(tokens: Vec<Token>) -> Result<Program, Diagnostic> {
  let mut p = Parser { toks: tokens, pos: 0 };
  let declarations = p.parse_decl_block()?;
  let mut statements = Vec::new();
  while !p.at(&TokKind::Eof) {
    statements.push(p.parse_stmt()?);
  }
  Ok(Program { declarations, statements })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;

  fn parse_src(src: &str) -> Program {
    parse(lex(src).unwrap()).unwrap()
  }

  #[test]
  fn parses_class_with_method() {
    let prog = parse_src(
      "class A(object):\n  x:int = 0\n  def f(self:\"A\") -> int:\n    return self.x + 1\n",
    );
    assert_eq!(prog.declarations.len(), 1);
    let Declaration::Class(c) = &prog.declarations[0] else { panic!("expected class") };
    assert_eq!(c.declarations.len(), 2);
  }

  #[test]
  fn parses_chained_assignment() {
    let prog = parse_src("a:int = 0\nb:int = 0\na = b = 1\n");
    assert!(matches!(prog.statements[0], Stmt::Assign(ref s) if s.targets.len() == 1));
  }

  #[test]
  fn parses_if_elif_else() {
    let prog = parse_src("if 1 == 1:\n  pass\nelif 2 == 2:\n  pass\nelse:\n  pass\n");
    let Stmt::If(s) = &prog.statements[0] else { panic!("expected if") };
    assert_eq!(s.else_body.len(), 1);
    assert!(matches!(s.else_body[0], Stmt::If(_)));
  }
}
