//! The parsed program shape. Declarations and statements are plain data
//! produced by the parser; expressions additionally carry an `inferred_type`
//! slot the type checker fills in during its walk.

use crate::span::Location;
use crate::symbol::Symbol;
use crate::types::ty::ValueType;

#[derive(Clone, Debug)]
pub struct Program {
  pub declarations: Vec<Declaration>,
  pub statements: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub enum Declaration {
  Class(ClassDef),
  Func(FuncDef),
  Var(VarDef),
  Global(GlobalDecl),
  Nonlocal(NonlocalDecl),
}

impl Declaration {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      Declaration::Class(d) => d.location,
      Declaration::Func(d) => d.location,
      Declaration::Var(d) => d.location,
      Declaration::Global(d) => d.location,
      Declaration::Nonlocal(d) => d.location,
    }
  }
}

/// A type as written in source, before the declaration analyzer checks that
/// every leaf class name actually exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeAnnotation {
  Class(Symbol),
  List(Box<TypeAnnotation>),
}

impl TypeAnnotation {
  /// Converts syntax to the semantic universe; callers are responsible for
  /// having already verified the leaf class exists.
  #[must_use] pub fn to_value_type(&self) -> ValueType {
    match self {
      TypeAnnotation::Class(c) => ValueType::Class(*c),
      TypeAnnotation::List(e) => ValueType::List(Box::new(e.to_value_type())),
    }
  }

  #[must_use] pub fn leaf_class(&self) -> Symbol {
    match self {
      TypeAnnotation::Class(c) => *c,
      TypeAnnotation::List(e) => e.leaf_class(),
    }
  }
}

#[derive(Clone, Debug)]
pub struct TypedVar {
  pub location: Location,
  pub name: Symbol,
  pub ty: TypeAnnotation,
}

/// The literal value a variable declaration is initialized with — ChocoPy
/// only allows literal initializers, never arbitrary expressions.
#[derive(Clone, Debug)]
pub enum Literal {
  Integer(i32),
  Bool(bool),
  Str(String),
  None,
}

#[derive(Clone, Debug)]
pub struct VarDef {
  pub location: Location,
  pub var: TypedVar,
  pub value: Literal,
}

#[derive(Clone, Debug)]
pub struct GlobalDecl {
  pub location: Location,
  pub name: Symbol,
}

#[derive(Clone, Debug)]
pub struct NonlocalDecl {
  pub location: Location,
  pub name: Symbol,
}

#[derive(Clone, Debug)]
pub struct ClassDef {
  pub location: Location,
  pub name: Symbol,
  pub super_name: Symbol,
  pub declarations: Vec<Declaration>,
}

#[derive(Clone, Debug)]
pub struct FuncDef {
  pub location: Location,
  pub name: Symbol,
  pub params: Vec<TypedVar>,
  /// `None` means the function is declared to return `<None>` (no `->` clause).
  pub return_type: Option<TypeAnnotation>,
  pub declarations: Vec<Declaration>,
  pub statements: Vec<Stmt>,
  /// Filled in by the type checker: the free names `self` reads from an
  /// enclosing function's scope, in first-read order.
  pub lambda_params: Vec<Symbol>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
  Expr(Expr),
  Assign(AssignStmt),
  If(IfStmt),
  While(WhileStmt),
  For(ForStmt),
  Return(ReturnStmt),
  Pass(Location),
}

impl Stmt {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      Stmt::Expr(e) => e.location,
      Stmt::Assign(s) => s.location,
      Stmt::If(s) => s.location,
      Stmt::While(s) => s.location,
      Stmt::For(s) => s.location,
      Stmt::Return(s) => s.location,
      Stmt::Pass(l) => *l,
    }
  }
}

#[derive(Clone, Debug)]
pub struct AssignStmt {
  pub location: Location,
  pub targets: Vec<Expr>,
  pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct IfStmt {
  pub location: Location,
  pub condition: Expr,
  pub then_body: Vec<Stmt>,
  pub else_body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct WhileStmt {
  pub location: Location,
  pub condition: Expr,
  pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct ForStmt {
  pub location: Location,
  pub identifier: Symbol,
  pub iterable: Expr,
  pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct ReturnStmt {
  pub location: Location,
  pub value: Option<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp { Neg, Not }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp { Add, Sub, Mul, FloorDiv, Mod, Eq, Ne, Lt, Le, Gt, Ge, And, Or, Is }

impl BinaryOp {
  #[must_use] pub fn is_arithmetic(self) -> bool {
    matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::FloorDiv | BinaryOp::Mod)
  }
  #[must_use] pub fn is_equality(self) -> bool { matches!(self, BinaryOp::Eq | BinaryOp::Ne) }
  #[must_use] pub fn is_ordering(self) -> bool {
    matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
  }
  #[must_use] pub fn is_logical(self) -> bool { matches!(self, BinaryOp::And | BinaryOp::Or) }
}

#[derive(Clone, Debug)]
pub struct Expr {
  pub location: Location,
  /// `None` until the type checker visits this node.
  pub inferred_type: Option<ValueType>,
  pub kind: ExprKind,
}

impl Expr {
  #[must_use] pub fn new(location: Location, kind: ExprKind) -> Self {
    Self { location, inferred_type: None, kind }
  }

  /// The type the checker assigned; panics if called before type checking,
  /// matching the teacher's convention of trusting pass ordering.
  #[must_use] pub fn ty(&self) -> &ValueType {
    self.inferred_type.as_ref().expect("expr visited before type checking")
  }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
  IntegerLiteral(i32),
  BoolLiteral(bool),
  StringLiteral(String),
  NoneLiteral,
  Identifier(Symbol),
  Unary { op: UnaryOp, operand: Box<Expr> },
  Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
  IfExpr { condition: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
  ListLiteral(Vec<Expr>),
  Index { base: Box<Expr>, index: Box<Expr> },
  Member { base: Box<Expr>, member: Symbol },
  /// A bare-name call: resolves to a function binding first, then a class constructor.
  Call { callee: Symbol, args: Vec<Expr> },
  MethodCall { receiver: Box<Expr>, method: Symbol, args: Vec<Expr> },
}
