//! IR Builder ("LightWalker"): lowers the fully typed AST into the SSA-like
//! `mir::Module`. Shaped after `BuildMir` in mmcc's own `build_mir.rs` — a
//! builder that owns the module under construction and a "current block"
//! cursor, pushing one instruction at a time rather than building a tree and
//! flattening it later — but lowering ChocoPy declarations/statements/
//! expressions instead of mmcc's proof-carrying HIR.

use std::collections::HashMap;

use crate::hierarchy::HierarchyTree;
use crate::idx::Idx;
use crate::symbol::{intern, sym, Symbol};
use crate::types::ast::*;
use crate::types::entity::{FunctionDefType, ScopeId, SymbolTables, SymbolType};
use crate::types::mir::*;
use crate::types::ty::ValueType;

/// A value together with the IR type it was produced as, since bare `Value`s
/// (constants, globals, calls, params) don't carry their type the way
/// `InstData` does.
#[derive(Clone, Debug)]
struct Typed {
  value: Value,
  ty: IrType,
}

impl Typed {
  fn new(value: Value, ty: IrType) -> Self { Self { value, ty } }
}

/// Where a local name's storage lives: its own stack slot, or a module global.
#[derive(Clone, Debug)]
enum Local {
  Alloca(Value, IrType),
  Global(GlobalId, IrType),
}

const RUNTIME_FUNCS: &[(&str, &[IrType], IrType)] = &[
  ("alloc_object", &[IrType::Ptr], IrType::Ptr),
  ("makeint", &[IrType::I32], IrType::Ptr),
  ("makebool", &[IrType::I1], IrType::Ptr),
  ("makestr", &[IrType::I32, IrType::I32], IrType::Ptr),
  ("concat_list", &[IrType::Ptr, IrType::Ptr], IrType::Ptr),
  ("str_object_eq", &[IrType::Ptr, IrType::Ptr], IrType::I1),
  ("str_object_neq", &[IrType::Ptr, IrType::Ptr], IrType::I1),
  ("str_object_concat", &[IrType::Ptr, IrType::Ptr], IrType::Ptr),
  ("$len", &[IrType::Ptr], IrType::I32),
  ("print", &[IrType::Ptr], IrType::Void),
  ("$input", &[], IrType::Ptr),
  ("error.OOB", &[], IrType::Void),
  ("error.None", &[], IrType::Void),
  ("error.Div", &[], IrType::Void),
];

/// Per-class member layout: attribute slot index (after the 3-word header,
/// unless `anon`) and method dispatch-table slot index, both keyed by name.
#[derive(Default)]
struct ClassLayout {
  attrs: HashMap<Symbol, (usize, IrType)>,
  methods: HashMap<Symbol, usize>,
}

pub struct IrBuilder<'a> {
  tables: &'a SymbolTables,
  #[allow(dead_code)]
  tree: &'a HierarchyTree,
  module: Module,
  class_ids: HashMap<Symbol, ClassId>,
  layouts: HashMap<ClassId, ClassLayout>,
  runtime: HashMap<&'static str, FuncId>,
  func_ids: HashMap<Symbol, FuncId>,
  string_consts: HashMap<String, GlobalId>,
  global_vars: HashMap<Symbol, Local>,
  cur_func: FuncId,
  cur_block: BlockId,
  locals: Vec<HashMap<Symbol, Local>>,
  /// Nested functions that take a hidden `$closure` first parameter, keyed
  /// by their own `FuncId`, so a call site can rebuild the capture record
  /// the callee's prologue expects without re-deriving it from the AST.
  closures: HashMap<FuncId, (ClassId, Vec<(Symbol, IrType)>)>,
}

impl<'a> IrBuilder<'a> {
  pub fn new(tables: &'a SymbolTables, tree: &'a HierarchyTree) -> Self {
    let mut module = Module::new();
    let main_id = module.functions.push(Function {
      name: intern("main"),
      params: Vec::new(),
      return_ty: IrType::Void,
      blocks: Default::default(),
      entry: BlockId::from_usize(0),
      external: false,
    });
    let entry = module.functions[main_id].new_block();
    module.functions[main_id].entry = entry;

    let mut b = Self {
      tables,
      tree,
      module,
      class_ids: HashMap::new(),
      layouts: HashMap::new(),
      runtime: HashMap::new(),
      func_ids: HashMap::new(),
      string_consts: HashMap::new(),
      global_vars: HashMap::new(),
      cur_func: main_id,
      cur_block: entry,
      locals: vec![HashMap::new()],
      closures: HashMap::new(),
    };
    b.seed_builtins();
    b
  }

  // --- Pre-seeding ---

  fn declare_builtin_class(&mut self, name: Symbol, tag: i32, attrs: Vec<(&str, IrType)>) -> ClassId {
    let attrs: Vec<AttrInfo> = attrs
      .into_iter()
      .map(|(n, ty)| AttrInfo { name: intern(n), ty: ty.clone(), init: AttrInit::Literal(Constant::Zero(ty)) })
      .collect();
    let id = self.module.classes.push(Class {
      name,
      type_tag: tag,
      super_: None,
      attrs: attrs.clone(),
      methods: Vec::new(),
      anon: false,
    });
    let mut layout = ClassLayout::default();
    for (i, a) in attrs.iter().enumerate() {
      layout.attrs.insert(a.name, (i, a.ty.clone()));
    }
    self.layouts.insert(id, layout);
    self.class_ids.insert(name, id);
    id
  }

  fn seed_builtins(&mut self) {
    self.declare_builtin_class(*sym::object, TAG_OBJECT, Vec::new());
    self.declare_builtin_class(*sym::int, TAG_INT, vec![("value", IrType::I32)]);
    self.declare_builtin_class(*sym::bool_, TAG_BOOL, vec![("value", IrType::I1)]);
    self.declare_builtin_class(*sym::str_, TAG_STR, vec![("len", IrType::I32), ("data", IrType::Ptr)]);

    let list_id = self.module.classes.push(Class {
      name: intern(".list"),
      type_tag: TAG_LIST,
      super_: None,
      attrs: vec![
        AttrInfo { name: intern("len"), ty: IrType::I32, init: AttrInit::Literal(Constant::Zero(IrType::I32)) },
        AttrInfo { name: intern("data"), ty: IrType::Ptr, init: AttrInit::Literal(Constant::Zero(IrType::Ptr)) },
      ],
      methods: Vec::new(),
      anon: false,
    });
    let mut list_layout = ClassLayout::default();
    list_layout.attrs.insert(intern("len"), (0, IrType::I32));
    list_layout.attrs.insert(intern("data"), (1, IrType::Ptr));
    self.layouts.insert(list_id, list_layout);
    self.class_ids.insert(intern(".list"), list_id);

    for entry in RUNTIME_FUNCS {
      let name = entry.0;
      let params: Vec<(Symbol, IrType)> = entry.1.iter().map(|t| (intern("_"), t.clone())).collect();
      let id = self.module.functions.push(Function {
        name: intern(name),
        params,
        return_ty: entry.2.clone(),
        blocks: Default::default(),
        entry: BlockId::from_usize(0),
        external: true,
      });
      self.runtime.insert(name, id);
    }
  }

  fn list_class(&self) -> ClassId { self.class_ids[&intern(".list")] }
  fn class_id(&self, name: Symbol) -> ClassId { self.class_ids[&name] }

  fn ir_type_of(&self, vt: &ValueType) -> IrType {
    match vt {
      ValueType::Class(c) if *c == *sym::int => IrType::I32,
      ValueType::Class(c) if *c == *sym::bool_ => IrType::I1,
      ValueType::Class(c) => IrType::Object(self.class_id(*c)),
      ValueType::List(_) | ValueType::Empty => IrType::Object(self.list_class()),
      ValueType::NoneType => IrType::Ptr,
    }
  }

  /// The IR type a value of `vt` takes when stored in an `object`-typed slot
  /// (list element, class attribute, `print` argument).
  fn boxed_type_of(&self, vt: &ValueType) -> IrType {
    match vt {
      ValueType::Class(c) if *c == *sym::int || *c == *sym::bool_ => IrType::Object(self.class_id(*c)),
      other => self.ir_type_of(other),
    }
  }

  // --- Block/instruction plumbing ---

  fn func(&mut self) -> &mut Function { &mut self.module.functions[self.cur_func] }

  fn push(&mut self, ty: IrType, kind: Instruction) -> Value {
    let blk = self.cur_block;
    let id = self.func().blocks[blk].push(ty, kind);
    Value::Inst(self.cur_func, blk, id)
  }

  fn new_block(&mut self) -> BlockId { self.func().new_block() }
  fn connect(&mut self, from: BlockId, to: BlockId) { self.func().connect(from, to); }
  fn is_terminated(&self) -> bool { self.module.functions[self.cur_func].blocks[self.cur_block].is_terminated() }

  fn param_value(&self, idx: usize) -> Value { Value::Param(idx) }

  fn call_runtime(&mut self, name: &str, args: Vec<Value>, ty: IrType) -> Value {
    let f = self.runtime[name];
    self.push(ty, Instruction::Call { callee: Value::Func(f), args })
  }

  /// Emits `error.*` on a dedicated block; the caller wires the guarded
  /// branch into it. The block always diverges, so no successor is connected.
  fn error_block(&mut self, which: &str) -> BlockId {
    let blk = self.new_block();
    let saved = self.cur_block;
    self.cur_block = blk;
    self.call_runtime(which, Vec::new(), IrType::Void);
    self.push(IrType::Void, Instruction::Ret(None));
    self.cur_block = saved;
    blk
  }

  /// Boxes an unboxed `int`/`bool` value up to `want`; a no-op otherwise.
  /// `Ptr` is treated as "any object", the type the runtime's generic
  /// `print`/method-receiver slots are declared with.
  fn box_to(&mut self, v: Typed, want: &IrType) -> Typed {
    if &v.ty == want {
      return v;
    }
    match (&v.ty, want) {
      (IrType::I32, IrType::Object(_) | IrType::Ptr) => {
        let int_ty = IrType::Object(self.class_id(*sym::int));
        Typed::new(self.call_runtime("makeint", vec![v.value], int_ty.clone()), int_ty)
      }
      (IrType::I1, IrType::Object(_) | IrType::Ptr) => {
        let bool_ty = IrType::Object(self.class_id(*sym::bool_));
        Typed::new(self.call_runtime("makebool", vec![v.value], bool_ty.clone()), bool_ty)
      }
      _ => v,
    }
  }

  /// Boxes or unboxes `v` to exactly `want`; the two are mutually exclusive
  /// (`want` is either an object type or a primitive type), so at most one
  /// of them does anything.
  fn coerce_to(&mut self, v: Typed, want: &IrType) -> Typed {
    let v = self.box_to(v, want);
    self.unbox_if_needed(v, want)
  }

  /// Lowers each argument and coerces it to the corresponding declared
  /// parameter type, so a raw `i32`/`i1` never reaches a call site that
  /// expects a boxed object (e.g. `print`, a user function parameter) and a
  /// boxed value (e.g. an attribute read) never reaches an unboxed one.
  fn lower_args(&mut self, args: &[Expr], param_tys: &[IrType]) -> Vec<Value> {
    args
      .iter()
      .zip(param_tys)
      .map(|(a, want)| {
        let v = self.lower_expr(a);
        self.coerce_to(v, want).value
      })
      .collect()
  }

  /// Unboxes a boxed `int`/`bool` value down to `want`; a no-op otherwise.
  fn unbox_if_needed(&mut self, v: Typed, want: &IrType) -> Typed {
    if &v.ty == want {
      return v;
    }
    match (want, &v.ty) {
      (IrType::I32, IrType::Object(c)) if *c == self.class_id(*sym::int) => {
        let payload = self.push(IrType::Ptr, Instruction::Gep { base: v.value, indices: [Value::Const(Constant::Int(3))].into_iter().collect() });
        Typed::new(self.push(IrType::I32, Instruction::Load(payload)), IrType::I32)
      }
      (IrType::I1, IrType::Object(c)) if *c == self.class_id(*sym::bool_) => {
        let payload = self.push(IrType::Ptr, Instruction::Gep { base: v.value, indices: [Value::Const(Constant::Int(3))].into_iter().collect() });
        Typed::new(self.push(IrType::I1, Instruction::Load(payload)), IrType::I1)
      }
      _ => v,
    }
  }

  fn string_global(&mut self, s: &str) -> GlobalId {
    if let Some(&id) = self.string_consts.get(s) {
      return id;
    }
    let name = intern(&format!("const_{}", self.string_consts.len()));
    let id = self.module.globals.push(Global {
      name,
      ty: IrType::Object(self.class_id(*sym::str_)),
      init: Constant::Null(IrType::Object(self.class_id(*sym::str_))),
    });
    self.module.globals[id].init = Constant::Str(id, s.to_owned());
    self.string_consts.insert(s.to_owned(), id);
    id
  }

  /// A constant of type `ir_ty` for a literal appearing in a var/global
  /// initializer (not a class attribute, which always boxes — see
  /// `attr_init`).
  fn scalar_constant(&mut self, lit: &Literal, ir_ty: &IrType) -> Constant {
    match lit {
      Literal::Integer(n) => if *ir_ty == IrType::I32 { Constant::Int(*n) } else { Constant::BoxInt(*n) },
      Literal::Bool(b) => if *ir_ty == IrType::I1 { Constant::Int(i32::from(*b)) } else { Constant::BoxBool(*b) },
      Literal::Str(s) => { let g = self.string_global(s); Constant::Str(g, s.clone()) }
      Literal::None => Constant::Null(ir_ty.clone()),
    }
  }

  /// Class attributes are always stored boxed, per `boxed_type_of`.
  fn attr_init(&mut self, lit: &Literal, attr_ir_ty: &IrType) -> AttrInit {
    match lit {
      Literal::Str(s) => AttrInit::Global(self.string_global(s)),
      other => AttrInit::Literal(self.scalar_constant(other, attr_ir_ty)),
    }
  }

  // --- Function declaration/definition ---

  fn declare_function(&mut self, name: Symbol, f: &FuncDef, def: &FunctionDefType) -> FuncId {
    let params: Vec<(Symbol, IrType)> = f.params.iter().zip(&def.params).map(|(p, pty)| (p.name, self.ir_type_of(pty))).collect();
    let return_ty = self.ir_type_of(&def.return_type);
    self.module.functions.push(Function { name, params, return_ty, blocks: Default::default(), entry: BlockId::from_usize(0), external: false })
  }

  /// Lowers a top-level function's or method's body. Neither ever captures
  /// an enclosing function's locals (only a function nested inside another
  /// function's body can), so there is no closure parameter to unpack here.
  fn define_function_body(&mut self, id: FuncId, name: Symbol, f: &FuncDef) {
    let saved_func = self.cur_func;
    let saved_block = self.cur_block;
    self.cur_func = id;
    let entry = self.func().new_block();
    self.func().entry = entry;
    self.cur_block = entry;
    self.locals.push(HashMap::new());

    for (i, p) in f.params.iter().enumerate() {
      let pty = self.module.functions[id].params[i].1.clone();
      let slot = self.push(IrType::Ptr, Instruction::Alloca(pty.clone()));
      let pval = self.param_value(i);
      self.push(IrType::Void, Instruction::Store { ptr: slot.clone(), value: pval });
      self.locals.last_mut().unwrap().insert(p.name, Local::Alloca(slot, pty));
    }

    let prefix = format!("{name}");
    self.lower_body_declarations(f, &prefix);
    for stmt in &f.statements {
      self.lower_stmt(stmt);
    }
    self.finish_function(&self.module.functions[id].return_ty.clone());

    self.locals.pop();
    self.cur_func = saved_func;
    self.cur_block = saved_block;
  }

  fn finish_function(&mut self, return_ty: &IrType) {
    if self.is_terminated() {
      return;
    }
    let ret = if *return_ty == IrType::Void { None } else { Some(Value::Const(Constant::Null(return_ty.clone()))) };
    self.push(IrType::Void, Instruction::Ret(ret));
  }

  fn lower_body_declarations(&mut self, f: &FuncDef, prefix: &str) {
    for decl in &f.declarations {
      match decl {
        Declaration::Var(v) => {
          let ty = v.var.ty.to_value_type();
          let ir_ty = self.ir_type_of(&ty);
          let slot = self.push(IrType::Ptr, Instruction::Alloca(ir_ty.clone()));
          let init = self.scalar_constant(&v.value, &ir_ty);
          self.push(IrType::Void, Instruction::Store { ptr: slot.clone(), value: Value::Const(init) });
          self.locals.last_mut().unwrap().insert(v.var.name, Local::Alloca(slot, ir_ty));
        }
        Declaration::Func(nested) => {
          self.build_nested_function(nested, prefix);
        }
        _ => {}
      }
    }
  }

  /// Lowers a function nested inside another function's body, synthesizing a
  /// `$name$anon` closure-record class when it has non-empty `lambda_params`
  /// (§4.5: captures are loaded into fresh locals at entry, not written back).
  fn build_nested_function(&mut self, f: &FuncDef, prefix: &str) -> FuncId {
    let def = self.find_function_scope(self.tables.root, f).expect("function must have been typechecked");
    let name = intern(&format!("{prefix}.{}", f.name));

    let mut captures: Vec<(Symbol, IrType)> = Vec::new();
    let closure_class = if f.lambda_params.is_empty() {
      None
    } else {
      for &cap in &f.lambda_params {
        captures.push((cap, self.outer_local_type(cap)));
      }
      Some(self.build_closure_class(f.name, &captures))
    };

    let mut params: Vec<(Symbol, IrType)> = Vec::new();
    if closure_class.is_some() {
      params.push((intern("$closure"), IrType::Ptr));
    }
    for (p, pty) in f.params.iter().zip(&def.params) {
      params.push((p.name, self.ir_type_of(pty)));
    }
    let return_ty = self.ir_type_of(&def.return_type);
    let id = self.module.functions.push(Function {
      name,
      params: params.clone(),
      return_ty,
      blocks: Default::default(),
      entry: BlockId::from_usize(0),
      external: false,
    });
    self.func_ids.insert(f.name, id);
    if let Some(class_id) = closure_class {
      self.closures.insert(id, (class_id, captures.clone()));
    }

    let saved_func = self.cur_func;
    let saved_block = self.cur_block;
    self.cur_func = id;
    let entry = self.func().new_block();
    self.func().entry = entry;
    self.cur_block = entry;
    self.locals.push(HashMap::new());

    let mut offset = 0;
    if closure_class.is_some() {
      let closure_param = self.param_value(0);
      for (i, (cap, cap_ty)) in captures.iter().enumerate() {
        let gep = self.push(IrType::Ptr, Instruction::Gep { base: closure_param.clone(), indices: [Value::Const(Constant::Int(i32::try_from(i).unwrap()))].into_iter().collect() });
        let loaded = self.push(cap_ty.clone(), Instruction::Load(gep));
        let slot = self.push(IrType::Ptr, Instruction::Alloca(cap_ty.clone()));
        self.push(IrType::Void, Instruction::Store { ptr: slot.clone(), value: loaded });
        self.locals.last_mut().unwrap().insert(*cap, Local::Alloca(slot, cap_ty.clone()));
      }
      offset = 1;
    }
    for (i, p) in f.params.iter().enumerate() {
      let pty = params[i + offset].1.clone();
      let slot = self.push(IrType::Ptr, Instruction::Alloca(pty.clone()));
      let pval = self.param_value(i + offset);
      self.push(IrType::Void, Instruction::Store { ptr: slot.clone(), value: pval });
      self.locals.last_mut().unwrap().insert(p.name, Local::Alloca(slot, pty));
    }

    let next_prefix = format!("{name}");
    self.lower_body_declarations(f, &next_prefix);
    for stmt in &f.statements {
      self.lower_stmt(stmt);
    }
    let return_ty = self.module.functions[id].return_ty.clone();
    self.finish_function(&return_ty);

    self.locals.pop();
    self.cur_func = saved_func;
    self.cur_block = saved_block;
    id
  }

  fn build_closure_class(&mut self, f_name: Symbol, attrs: &[(Symbol, IrType)]) -> ClassId {
    let attr_infos: Vec<AttrInfo> = attrs
      .iter()
      .map(|(n, t)| AttrInfo { name: *n, ty: t.clone(), init: AttrInit::Literal(Constant::Zero(t.clone())) })
      .collect();
    let id = self.module.classes.push(Class {
      name: intern(&format!("{f_name}$anon")),
      type_tag: TAG_OBJECT,
      super_: None,
      attrs: attr_infos.clone(),
      methods: Vec::new(),
      anon: true,
    });
    let mut layout = ClassLayout::default();
    for (i, a) in attr_infos.iter().enumerate() {
      layout.attrs.insert(a.name, (i, a.ty.clone()));
    }
    self.layouts.insert(id, layout);
    id
  }

  /// The IR type of `name` as currently bound in an enclosing function's
  /// locals, used to size a closure record's captured attributes.
  fn outer_local_type(&self, name: Symbol) -> IrType {
    for scope in self.locals.iter().rev() {
      if let Some(local) = scope.get(&name) {
        return match local {
          Local::Alloca(_, ty) | Local::Global(_, ty) => ty.clone(),
        };
      }
    }
    IrType::Ptr
  }

  /// Depth-first search for a function named like `f` (matching arity),
  /// starting from `scope`. Used for nested functions, which aren't
  /// re-addressable by name from the program's root scope.
  fn find_function_scope(&self, scope: ScopeId, f: &FuncDef) -> Option<FunctionDefType> {
    if let Some(SymbolType::Function(def)) = self.tables.lookup_local(scope, f.name) {
      if def.params.len() == f.params.len() {
        return Some((**def).clone());
      }
    }
    for sym_ty in self.tables.scope(scope).bindings.values() {
      let inner = match sym_ty {
        SymbolType::Function(def) => def.scope,
        SymbolType::Class(def) => def.scope,
        _ => continue,
      };
      if let Some(found) = self.find_function_scope(inner, f) {
        return Some(found);
      }
    }
    None
  }

  // --- Classes ---

  /// Flattens `C`'s super-chain into attribute/method layout, in root-to-leaf
  /// declaration order, then lowers its methods (two-pass: every method's
  /// `FuncId` is registered before any body is built, so methods may call
  /// themselves or a sibling method declared later in the same class).
  fn build_class(&mut self, c: &ClassDef) {
    let Some(def) = self.tables.lookup_local(self.tables.root, c.name).and_then(SymbolType::as_class).cloned() else { return };
    let super_id = def.super_name.map(|s| self.class_id(s));

    let (mut attrs, methods, mut layout) = if let Some(sup) = super_id {
      let sup_class = self.module.classes[sup].clone();
      let sup_layout = &self.layouts[&sup];
      (sup_class.attrs, sup_class.methods, ClassLayout { attrs: sup_layout.attrs.clone(), methods: sup_layout.methods.clone() })
    } else {
      (Vec::new(), Vec::new(), ClassLayout::default())
    };

    for decl in &c.declarations {
      if let Declaration::Var(v) = decl {
        let ty = v.var.ty.to_value_type();
        let ir_ty = self.boxed_type_of(&ty);
        let init = self.attr_init(&v.value, &ir_ty);
        if let Some(&(idx, _)) = layout.attrs.get(&v.var.name) {
          attrs[idx] = AttrInfo { name: v.var.name, ty: ir_ty, init };
        } else {
          layout.attrs.insert(v.var.name, (attrs.len(), ir_ty.clone()));
          attrs.push(AttrInfo { name: v.var.name, ty: ir_ty, init });
        }
      }
    }

    let id = self.module.classes.push(Class { name: c.name, type_tag: TAG_OBJECT, super_: super_id, attrs, methods, anon: false });
    self.class_ids.insert(c.name, id);
    self.layouts.insert(id, layout);

    let class_scope = def.scope;
    let mut to_build = Vec::new();
    for decl in &c.declarations {
      if let Declaration::Func(f) = decl {
        let Some(fdef) = self.tables.lookup_local(class_scope, f.name).and_then(SymbolType::as_function).cloned() else { continue };
        let mangled = intern(&format!("$$METHOD$${}.{}", c.name, f.name));
        let fid = self.declare_function(mangled, f, &fdef);
        let layout = self.layouts.get_mut(&id).expect("just inserted");
        if let Some(&slot) = layout.methods.get(&f.name) {
          self.module.classes[id].methods[slot] = fid;
        } else {
          layout.methods.insert(f.name, self.module.classes[id].methods.len());
          self.module.classes[id].methods.push(fid);
        }
        to_build.push((f, fid, mangled));
      }
    }
    for (f, fid, mangled) in to_build {
      self.define_function_body(fid, mangled, f);
    }
  }

  // --- Statements ---

  fn lower_stmt(&mut self, stmt: &Stmt) {
    if self.is_terminated() {
      return;
    }
    match stmt {
      Stmt::Expr(e) => {
        self.lower_expr(e);
      }
      Stmt::Assign(a) => self.lower_assign(a),
      Stmt::If(s) => self.lower_if(s),
      Stmt::While(s) => self.lower_while(s),
      Stmt::For(s) => self.lower_for(s),
      Stmt::Return(r) => self.lower_return(r),
      Stmt::Pass(_) => {}
    }
  }

  fn lower_block(&mut self, stmts: &[Stmt]) {
    for s in stmts {
      self.lower_stmt(s);
    }
  }

  fn lower_if(&mut self, s: &IfStmt) {
    let cond = self.lower_expr(&s.condition);
    let cond = self.unbox_if_needed(cond, &IrType::I1);
    let b_true = self.new_block();
    let b_false = self.new_block();
    let b_end = self.new_block();
    self.push(IrType::Void, Instruction::Br { cond: Some(cond.value), then_blk: b_true, else_blk: Some(b_false) });
    self.connect(self.cur_block, b_true);
    self.connect(self.cur_block, b_false);

    self.cur_block = b_true;
    self.lower_block(&s.then_body);
    if !self.is_terminated() {
      self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
      self.connect(self.cur_block, b_end);
    }

    self.cur_block = b_false;
    self.lower_block(&s.else_body);
    if !self.is_terminated() {
      self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
      self.connect(self.cur_block, b_end);
    }

    self.cur_block = b_end;
  }

  fn lower_while(&mut self, s: &WhileStmt) {
    let b_cond = self.new_block();
    let b_body = self.new_block();
    let b_end = self.new_block();
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_cond, else_blk: None });
    self.connect(self.cur_block, b_cond);

    self.cur_block = b_cond;
    let cond = self.lower_expr(&s.condition);
    let cond = self.unbox_if_needed(cond, &IrType::I1);
    self.push(IrType::Void, Instruction::Br { cond: Some(cond.value), then_blk: b_body, else_blk: Some(b_end) });
    self.connect(self.cur_block, b_body);
    self.connect(self.cur_block, b_end);

    self.cur_block = b_body;
    self.lower_block(&s.body);
    if !self.is_terminated() {
      self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_cond, else_blk: None });
      self.connect(self.cur_block, b_cond);
    }

    self.cur_block = b_end;
  }

  /// Null-checks the iterable, calls `$len`, then walks an incrementing
  /// index loading each element, per §4.5's description of `For`.
  fn lower_for(&mut self, s: &ForStmt) {
    let iter = self.lower_expr(&s.iterable);
    let none_blk = self.error_block("error.None");
    let cont = self.new_block();
    let is_null = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: iter.value.clone(), rhs: Value::Const(Constant::Null(iter.ty.clone())) });
    self.push(IrType::Void, Instruction::Br { cond: Some(is_null), then_blk: none_blk, else_blk: Some(cont) });
    self.connect(self.cur_block, none_blk);
    self.connect(self.cur_block, cont);
    self.cur_block = cont;

    let len = self.call_runtime("$len", vec![iter.value.clone()], IrType::I32);
    let idx_slot = self.push(IrType::Ptr, Instruction::Alloca(IrType::I32));
    self.push(IrType::Void, Instruction::Store { ptr: idx_slot.clone(), value: Value::Const(Constant::Int(0)) });

    let elem_ty = self.for_elem_type(s);
    let var_local = self.lookup_local(s.identifier);

    let b_cond = self.new_block();
    let b_body = self.new_block();
    let b_end = self.new_block();
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_cond, else_blk: None });
    self.connect(self.cur_block, b_cond);

    self.cur_block = b_cond;
    let idx = self.push(IrType::I32, Instruction::Load(idx_slot.clone()));
    let keep_going = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Lt, lhs: idx.clone(), rhs: len });
    self.push(IrType::Void, Instruction::Br { cond: Some(keep_going), then_blk: b_body, else_blk: Some(b_end) });
    self.connect(self.cur_block, b_body);
    self.connect(self.cur_block, b_end);

    self.cur_block = b_body;
    let data_ptr = self.push(IrType::Ptr, Instruction::Gep { base: iter.value.clone(), indices: [Value::Const(Constant::Int(4))].into_iter().collect() });
    let elem_ptr = self.push(IrType::Ptr, Instruction::Gep { base: data_ptr, indices: [idx.clone()].into_iter().collect() });
    let elem = self.push(elem_ty.clone(), Instruction::Load(elem_ptr));
    if let Some(local) = var_local {
      self.store_local(&local, elem);
    }
    self.lower_block(&s.body);
    if !self.is_terminated() {
      let idx2 = self.push(IrType::I32, Instruction::Load(idx_slot.clone()));
      let next = self.push(IrType::I32, Instruction::Add(idx2, Value::Const(Constant::Int(1))));
      self.push(IrType::Void, Instruction::Store { ptr: idx_slot, value: next });
      self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_cond, else_blk: None });
      self.connect(self.cur_block, b_cond);
    }

    self.cur_block = b_end;
  }

  fn for_elem_type(&self, s: &ForStmt) -> IrType {
    match s.iterable.inferred_type.as_ref() {
      Some(ValueType::List(e)) => self.boxed_type_of(e),
      Some(ValueType::Class(c)) if *c == *sym::str_ => IrType::Object(self.class_id(*sym::str_)),
      _ => IrType::Ptr,
    }
  }

  fn lower_return(&mut self, r: &ReturnStmt) {
    let v = r.value.as_ref().map(|e| self.lower_expr(e).value);
    self.push(IrType::Void, Instruction::Ret(v));
  }

  fn lower_assign(&mut self, a: &AssignStmt) {
    let rhs = self.lower_expr(&a.value);
    for target in &a.targets {
      self.store_target(target, rhs.clone());
    }
  }

  /// Attribute and list-element slots are always boxed, so a write through
  /// `Member`/`Index` always coerces to `boxed_type_of(want)`. An
  /// `Identifier` target may be an unboxed `int`/`bool` local or global, so
  /// it coerces to that slot's own declared `IrType` instead.
  fn store_target(&mut self, target: &Expr, value: Typed) {
    match &target.kind {
      ExprKind::Identifier(name) => {
        let local = self.lookup_local(*name).or_else(|| self.global_vars.get(name).cloned());
        if let Some(local) = local {
          let slot_ty = match &local { Local::Alloca(_, ty) | Local::Global(_, ty) => ty.clone() };
          let value = self.coerce_to(value, &slot_ty);
          self.store_local(&local, value.value);
        }
      }
      ExprKind::Member { base, member } => {
        let base_v = self.lower_expr(base);
        if let IrType::Object(class_id) = base_v.ty {
          if let Some(&(idx, ref attr_ty)) = self.layouts[&class_id].attrs.get(member) {
            let attr_ty = attr_ty.clone();
            let value = self.box_to(value, &attr_ty);
            let field_idx = idx + if self.module.classes[class_id].anon { 0 } else { 3 };
            let ptr = self.push(IrType::Ptr, Instruction::Gep { base: base_v.value, indices: [Value::Const(Constant::Int(i32::try_from(field_idx).unwrap()))].into_iter().collect() });
            self.push(IrType::Void, Instruction::Store { ptr, value: value.value });
          }
        }
      }
      ExprKind::Index { base, index } => {
        let want = target.inferred_type.clone().unwrap_or_else(ValueType::object);
        let boxed = self.boxed_type_of(&want);
        let value = self.box_to(value, &boxed);
        let base_v = self.lower_expr(base);
        let idx_v = self.lower_expr(index);
        let elem_ptr = self.checked_index_ptr(base_v, idx_v);
        self.push(IrType::Void, Instruction::Store { ptr: elem_ptr, value: value.value });
      }
      _ => {}
    }
  }

  fn lookup_local(&self, name: Symbol) -> Option<Local> {
    self.locals.last().and_then(|s| s.get(&name).cloned())
  }

  fn store_local(&mut self, local: &Local, value: Value) {
    match local {
      Local::Alloca(ptr, _) => { self.push(IrType::Void, Instruction::Store { ptr: ptr.clone(), value }); }
      Local::Global(id, _) => { self.push(IrType::Void, Instruction::Store { ptr: Value::Global(*id), value }); }
    }
  }

  fn load_local(&mut self, local: &Local) -> Typed {
    match local {
      Local::Alloca(ptr, ty) => Typed::new(self.push(ty.clone(), Instruction::Load(ptr.clone())), ty.clone()),
      Local::Global(id, ty) => Typed::new(self.push(ty.clone(), Instruction::Load(Value::Global(*id))), ty.clone()),
    }
  }

  // --- Expressions ---

  fn lower_expr(&mut self, e: &Expr) -> Typed {
    match &e.kind {
      ExprKind::IntegerLiteral(n) => Typed::new(Value::Const(Constant::Int(*n)), IrType::I32),
      ExprKind::BoolLiteral(b) => Typed::new(Value::Const(Constant::Int(i32::from(*b))), IrType::I1),
      ExprKind::StringLiteral(s) => {
        let g = self.string_global(s);
        Typed::new(Value::Global(g), IrType::Object(self.class_id(*sym::str_)))
      }
      ExprKind::NoneLiteral => Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr),
      ExprKind::Identifier(name) => self.lower_identifier(*name),
      ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
      ExprKind::Binary { op, left, right } => self.lower_binary(*op, left, right),
      ExprKind::IfExpr { condition, then_expr, else_expr } => self.lower_if_expr(condition, then_expr, else_expr, e),
      ExprKind::ListLiteral(items) => self.lower_list_literal(items, e),
      ExprKind::Index { base, index } => self.lower_index(base, index),
      ExprKind::Member { base, member } => self.lower_member(base, *member),
      ExprKind::Call { callee, args } => self.lower_call(*callee, args),
      ExprKind::MethodCall { receiver, method, args } => self.lower_method_call(receiver, *method, args),
    }
  }

  fn lower_identifier(&mut self, name: Symbol) -> Typed {
    if let Some(local) = self.lookup_local(name) {
      return self.load_local(&local);
    }
    if let Some(local) = self.global_vars.get(&name).cloned() {
      return self.load_local(&local);
    }
    Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr)
  }

  fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Typed {
    let v = self.lower_expr(operand);
    match op {
      UnaryOp::Neg => {
        let v = self.unbox_if_needed(v, &IrType::I32);
        Typed::new(self.push(IrType::I32, Instruction::Neg(v.value)), IrType::I32)
      }
      UnaryOp::Not => {
        let v = self.unbox_if_needed(v, &IrType::I1);
        Typed::new(self.push(IrType::I1, Instruction::Not(v.value)), IrType::I1)
      }
    }
  }

  fn lower_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Typed {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
      return self.lower_short_circuit(op, left, right);
    }
    let lt = left.inferred_type.clone().unwrap_or_else(ValueType::object);
    if op == BinaryOp::Add && lt.class_name() == Some(*sym::str_) {
      let lv = self.lower_expr(left);
      let rv = self.lower_expr(right);
      return Typed::new(self.call_runtime("str_object_concat", vec![lv.value, rv.value], lv.ty.clone()), lv.ty);
    }
    if op == BinaryOp::Add && lt.is_list() {
      let lv = self.lower_expr(left);
      let rv = self.lower_expr(right);
      return Typed::new(self.call_runtime("concat_list", vec![lv.value, rv.value], lv.ty.clone()), lv.ty);
    }
    if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && lt.class_name() == Some(*sym::str_) {
      let lv = self.lower_expr(left);
      let rv = self.lower_expr(right);
      let name = if op == BinaryOp::Eq { "str_object_eq" } else { "str_object_neq" };
      return Typed::new(self.call_runtime(name, vec![lv.value, rv.value], IrType::I1), IrType::I1);
    }
    if op == BinaryOp::Is {
      let lv = self.lower_expr(left);
      let rv = self.lower_expr(right);
      return Typed::new(self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: lv.value, rhs: rv.value }), IrType::I1);
    }

    let lv = self.lower_expr(left);
    let rv = self.lower_expr(right);
    if op.is_arithmetic() {
      let lv = self.unbox_if_needed(lv, &IrType::I32);
      let rv = self.unbox_if_needed(rv, &IrType::I32);
      return self.lower_arithmetic(op, lv, rv);
    }
    let lv = self.unbox_if_needed(lv, &IrType::I32);
    let rv = self.unbox_if_needed(rv, &IrType::I32);
    let cond = match op {
      BinaryOp::Eq => ICmpCond::Eq,
      BinaryOp::Ne => ICmpCond::Ne,
      BinaryOp::Lt => ICmpCond::Lt,
      BinaryOp::Le => ICmpCond::Le,
      BinaryOp::Gt => ICmpCond::Gt,
      BinaryOp::Ge => ICmpCond::Ge,
      _ => unreachable!("unary-only or already-handled operator"),
    };
    Typed::new(self.push(IrType::I1, Instruction::ICmp { cond, lhs: lv.value, rhs: rv.value }), IrType::I1)
  }

  fn lower_arithmetic(&mut self, op: BinaryOp, lv: Typed, rv: Typed) -> Typed {
    if matches!(op, BinaryOp::FloorDiv | BinaryOp::Mod) {
      let div_blk = self.error_block("error.Div");
      let cont = self.new_block();
      let is_zero = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: rv.value.clone(), rhs: Value::Const(Constant::Int(0)) });
      self.push(IrType::Void, Instruction::Br { cond: Some(is_zero), then_blk: div_blk, else_blk: Some(cont) });
      self.connect(self.cur_block, div_blk);
      self.connect(self.cur_block, cont);
      self.cur_block = cont;
    }
    let inst = match op {
      BinaryOp::Add => Instruction::Add(lv.value, rv.value),
      BinaryOp::Sub => Instruction::Sub(lv.value, rv.value),
      BinaryOp::Mul => Instruction::Mul(lv.value, rv.value),
      BinaryOp::FloorDiv => Instruction::Div(lv.value, rv.value),
      BinaryOp::Mod => Instruction::Rem(lv.value, rv.value),
      _ => unreachable!("only arithmetic operators reach here"),
    };
    Typed::new(self.push(IrType::I32, inst), IrType::I32)
  }

  fn lower_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Typed {
    let lv = self.lower_expr(left);
    let lv = self.unbox_if_needed(lv, &IrType::I1);
    let b_run = self.new_block();
    let b_norun = self.new_block();
    let b_end = self.new_block();
    let (then_blk, else_blk) = if op == BinaryOp::And { (b_run, b_norun) } else { (b_norun, b_run) };
    self.push(IrType::Void, Instruction::Br { cond: Some(lv.value.clone()), then_blk, else_blk: Some(else_blk) });
    self.connect(self.cur_block, then_blk);
    self.connect(self.cur_block, else_blk);
    let lhs_block = self.cur_block;

    self.cur_block = b_run;
    let rv = self.lower_expr(right);
    let rv = self.unbox_if_needed(rv, &IrType::I1);
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
    self.connect(self.cur_block, b_end);
    let run_block = self.cur_block;

    self.cur_block = b_norun;
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
    self.connect(self.cur_block, b_end);

    self.cur_block = b_end;
    let phi = self.push(IrType::I1, Instruction::Phi([(rv.value, run_block), (lv.value, lhs_block)].into_iter().collect()));
    Typed::new(phi, IrType::I1)
  }

  fn lower_if_expr(&mut self, cond: &Expr, then_e: &Expr, else_e: &Expr, whole: &Expr) -> Typed {
    let want_vt = whole.inferred_type.clone().unwrap_or_else(ValueType::object);
    let want_ty = self.boxed_type_of(&want_vt);
    let c = self.lower_expr(cond);
    let c = self.unbox_if_needed(c, &IrType::I1);
    let b_then = self.new_block();
    let b_else = self.new_block();
    let b_end = self.new_block();
    self.push(IrType::Void, Instruction::Br { cond: Some(c.value), then_blk: b_then, else_blk: Some(b_else) });
    self.connect(self.cur_block, b_then);
    self.connect(self.cur_block, b_else);

    self.cur_block = b_then;
    let then_v = self.lower_expr(then_e);
    let then_v = self.box_to(then_v, &want_ty);
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
    self.connect(self.cur_block, b_end);
    let then_block = self.cur_block;

    self.cur_block = b_else;
    let else_v = self.lower_expr(else_e);
    let else_v = self.box_to(else_v, &want_ty);
    self.push(IrType::Void, Instruction::Br { cond: None, then_blk: b_end, else_blk: None });
    self.connect(self.cur_block, b_end);
    let else_block = self.cur_block;

    self.cur_block = b_end;
    let phi = self.push(want_ty.clone(), Instruction::Phi([(then_v.value, then_block), (else_v.value, else_block)].into_iter().collect()));
    Typed::new(phi, want_ty)
  }

  fn lower_list_literal(&mut self, items: &[Expr], whole: &Expr) -> Typed {
    let elem_ty = match whole.inferred_type.as_ref() {
      Some(ValueType::List(e)) => self.boxed_type_of(e),
      _ => IrType::Ptr,
    };
    let list_class = self.list_class();
    let proto = Value::Const(Constant::Null(IrType::Object(list_class)));
    let list_obj = self.call_runtime("alloc_object", vec![proto], IrType::Object(list_class));
    let len_ptr = self.push(IrType::Ptr, Instruction::Gep { base: list_obj.clone(), indices: [Value::Const(Constant::Int(3))].into_iter().collect() });
    self.push(IrType::Void, Instruction::Store { ptr: len_ptr, value: Value::Const(Constant::Int(i32::try_from(items.len()).unwrap())) });
    let data_ptr = self.push(IrType::Ptr, Instruction::Gep { base: list_obj.clone(), indices: [Value::Const(Constant::Int(4))].into_iter().collect() });
    for (i, item) in items.iter().enumerate() {
      let v = self.lower_expr(item);
      let v = self.box_to(v, &elem_ty);
      let slot = self.push(IrType::Ptr, Instruction::Gep { base: data_ptr.clone(), indices: [Value::Const(Constant::Int(i32::try_from(i).unwrap()))].into_iter().collect() });
      self.push(IrType::Void, Instruction::Store { ptr: slot, value: v.value });
    }
    Typed::new(list_obj, IrType::Object(list_class))
  }

  /// Null/bounds-checked index access, used by both reads and writes.
  fn checked_index_ptr(&mut self, base: Typed, index: Typed) -> Value {
    let index = self.unbox_if_needed(index, &IrType::I32);
    let none_blk = self.error_block("error.None");
    let cont1 = self.new_block();
    let is_null = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: base.value.clone(), rhs: Value::Const(Constant::Null(base.ty.clone())) });
    self.push(IrType::Void, Instruction::Br { cond: Some(is_null), then_blk: none_blk, else_blk: Some(cont1) });
    self.connect(self.cur_block, none_blk);
    self.connect(self.cur_block, cont1);
    self.cur_block = cont1;

    let len_ptr = self.push(IrType::Ptr, Instruction::Gep { base: base.value.clone(), indices: [Value::Const(Constant::Int(3))].into_iter().collect() });
    let len = self.push(IrType::I32, Instruction::Load(len_ptr));
    let oob_blk = self.error_block("error.OOB");
    let cont2 = self.new_block();
    let too_low = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Lt, lhs: index.value.clone(), rhs: Value::Const(Constant::Int(0)) });
    let too_high = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Ge, lhs: index.value.clone(), rhs: len });
    let bad = self.push(IrType::I1, Instruction::Or(too_low, too_high));
    self.push(IrType::Void, Instruction::Br { cond: Some(bad), then_blk: oob_blk, else_blk: Some(cont2) });
    self.connect(self.cur_block, oob_blk);
    self.connect(self.cur_block, cont2);
    self.cur_block = cont2;

    let data_ptr = self.push(IrType::Ptr, Instruction::Gep { base: base.value, indices: [Value::Const(Constant::Int(4))].into_iter().collect() });
    self.push(IrType::Ptr, Instruction::Gep { base: data_ptr, indices: [index.value].into_iter().collect() })
  }

  fn lower_index(&mut self, base: &Expr, index: &Expr) -> Typed {
    let base_v = self.lower_expr(base);
    let idx_v = self.lower_expr(index);
    let is_str = matches!(base.inferred_type, Some(ValueType::Class(c)) if c == *sym::str_);
    let ptr = self.checked_index_ptr(base_v, idx_v);
    if is_str {
      let byte = self.push(IrType::I32, Instruction::Load(ptr));
      let str_class = self.class_id(*sym::str_);
      Typed::new(self.call_runtime("makestr", vec![byte, Value::Const(Constant::Int(1))], IrType::Object(str_class)), IrType::Object(str_class))
    } else {
      Typed::new(self.push(IrType::Ptr, Instruction::Load(ptr)), IrType::Ptr)
    }
  }

  fn lower_member(&mut self, base: &Expr, member: Symbol) -> Typed {
    let base_v = self.lower_expr(base);
    let none_blk = self.error_block("error.None");
    let cont = self.new_block();
    let is_null = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: base_v.value.clone(), rhs: Value::Const(Constant::Null(base_v.ty.clone())) });
    self.push(IrType::Void, Instruction::Br { cond: Some(is_null), then_blk: none_blk, else_blk: Some(cont) });
    self.connect(self.cur_block, none_blk);
    self.connect(self.cur_block, cont);
    self.cur_block = cont;

    if let IrType::Object(class_id) = base_v.ty {
      if let Some(&(idx, ref ty)) = self.layouts[&class_id].attrs.get(&member) {
        let ty = ty.clone();
        let field_idx = idx + if self.module.classes[class_id].anon { 0 } else { 3 };
        let ptr = self.push(IrType::Ptr, Instruction::Gep { base: base_v.value, indices: [Value::Const(Constant::Int(i32::try_from(field_idx).unwrap()))].into_iter().collect() });
        return Typed::new(self.push(ty.clone(), Instruction::Load(ptr)), ty);
      }
    }
    Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr)
  }

  fn lower_call(&mut self, callee: Symbol, args: &[Expr]) -> Typed {
    if callee == *sym::len {
      let arg = self.lower_expr(&args[0]);
      return Typed::new(self.call_runtime("$len", vec![arg.value], IrType::I32), IrType::I32);
    }
    if callee == *sym::input {
      let str_ty = IrType::Object(self.class_id(*sym::str_));
      return Typed::new(self.call_runtime("$input", Vec::new(), str_ty.clone()), str_ty);
    }
    if let Some(&class_id) = self.class_ids.get(&callee) {
      let proto = Value::Const(Constant::Null(IrType::Object(class_id)));
      let obj = self.call_runtime("alloc_object", vec![proto], IrType::Object(class_id));
      if let Some(&init_slot) = self.layouts[&class_id].methods.get(&*sym::init) {
        let init_fn = self.module.classes[class_id].methods[init_slot];
        let param_tys: Vec<IrType> = self.module.functions[init_fn].params[1..].iter().map(|(_, t)| t.clone()).collect();
        let mut call_args = vec![obj.clone()];
        call_args.extend(self.lower_args(args, &param_tys));
        self.push(IrType::Void, Instruction::Call { callee: Value::Func(init_fn), args: call_args });
      }
      return Typed::new(obj, IrType::Object(class_id));
    }
    let fid = self.func_ids.get(&callee).copied().or_else(|| self.runtime.get(callee.as_str()).copied());
    let Some(fid) = fid else { return Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr) };
    let ret_ty = self.module.functions[fid].return_ty.clone();

    if let Some((class_id, captures)) = self.closures.get(&fid).cloned() {
      let proto = Value::Const(Constant::Null(IrType::Object(class_id)));
      let record = self.call_runtime("alloc_object", vec![proto], IrType::Object(class_id));
      for (i, (cap, _)) in captures.iter().enumerate() {
        let local = self.lookup_local(*cap).expect("a captured name is always a visible local at its call site");
        let cur = self.load_local(&local);
        let ptr = self.push(IrType::Ptr, Instruction::Gep { base: record.clone(), indices: [Value::Const(Constant::Int(i32::try_from(i).unwrap()))].into_iter().collect() });
        self.push(IrType::Void, Instruction::Store { ptr, value: cur.value });
      }
      let param_tys: Vec<IrType> = self.module.functions[fid].params[1..].iter().map(|(_, t)| t.clone()).collect();
      let mut call_args = vec![record];
      call_args.extend(self.lower_args(args, &param_tys));
      return Typed::new(self.push(ret_ty.clone(), Instruction::Call { callee: Value::Func(fid), args: call_args }), ret_ty);
    }

    let param_tys: Vec<IrType> = self.module.functions[fid].params.iter().map(|(_, t)| t.clone()).collect();
    let call_args = self.lower_args(args, &param_tys);
    Typed::new(self.push(ret_ty.clone(), Instruction::Call { callee: Value::Func(fid), args: call_args }), ret_ty)
  }

  fn lower_method_call(&mut self, receiver: &Expr, method: Symbol, args: &[Expr]) -> Typed {
    let recv = self.lower_expr(receiver);
    let none_blk = self.error_block("error.None");
    let cont = self.new_block();
    let is_null = self.push(IrType::I1, Instruction::ICmp { cond: ICmpCond::Eq, lhs: recv.value.clone(), rhs: Value::Const(Constant::Null(recv.ty.clone())) });
    self.push(IrType::Void, Instruction::Br { cond: Some(is_null), then_blk: none_blk, else_blk: Some(cont) });
    self.connect(self.cur_block, none_blk);
    self.connect(self.cur_block, cont);
    self.cur_block = cont;

    let IrType::Object(class_id) = recv.ty.clone() else {
      return Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr);
    };
    let Some(&slot) = self.layouts[&class_id].methods.get(&method) else {
      return Typed::new(Value::Const(Constant::Null(IrType::Ptr)), IrType::Ptr);
    };
    let fid = self.module.classes[class_id].methods[slot];
    let ret_ty = self.module.functions[fid].return_ty.clone();
    let param_tys: Vec<IrType> = self.module.functions[fid].params[1..].iter().map(|(_, t)| t.clone()).collect();
    let mut call_args = vec![recv.value];
    call_args.extend(self.lower_args(args, &param_tys));
    Typed::new(self.push(ret_ty.clone(), Instruction::Call { callee: Value::Func(fid), args: call_args }), ret_ty)
  }

  // --- Top level ---

  pub fn run(mut self, program: &Program) -> Module {
    for decl in &program.declarations {
      if let Declaration::Class(c) = decl {
        self.build_class(c);
      }
    }

    let mut to_build = Vec::new();
    for decl in &program.declarations {
      if let Declaration::Func(f) = decl {
        let Some(fdef) = self.find_function_scope(self.tables.root, f) else { continue };
        let mangled = intern(&format!("${}", f.name));
        let fid = self.declare_function(mangled, f, &fdef);
        self.func_ids.insert(f.name, fid);
        to_build.push((f, fid, mangled));
      }
    }
    for (f, fid, mangled) in to_build {
      self.define_function_body(fid, mangled, f);
    }

    for decl in &program.declarations {
      if let Declaration::Var(v) = decl {
        let ty = v.var.ty.to_value_type();
        let ir_ty = self.ir_type_of(&ty);
        let init = self.scalar_constant(&v.value, &ir_ty);
        let gid = self.module.globals.push(Global { name: v.var.name, ty: ir_ty.clone(), init });
        self.global_vars.insert(v.var.name, Local::Global(gid, ir_ty));
      }
    }

    for stmt in &program.statements {
      self.lower_stmt(stmt);
    }
    if !self.is_terminated() {
      self.push(IrType::Void, Instruction::Asm("li a7, 93\nli a0, 0\necall".to_owned()));
      self.push(IrType::Void, Instruction::Ret(None));
    }

    self.module.set_instr_names();
    self.module
  }
}

/// Builds the IR `Module` from a fully typed program. The caller is
/// responsible for aborting before calling this if any diagnostic was
/// recorded by the earlier passes (§7).
#[must_use] pub fn build_module(program: &Program, tables: &SymbolTables, tree: &HierarchyTree) -> Module {
  IrBuilder::new(tables, tree).run(program)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declck::DeclarationAnalyzer;
  use crate::diagnostics::Diagnostics;
  use crate::lexer::lex;
  use crate::nameck::SymbolTableGenerator;
  use crate::parser::parse;
  use crate::typeck::TypeChecker;

  fn build(src: &str) -> Module {
    let mut prog = parse(lex(src).unwrap()).unwrap();
    let mut gen = SymbolTableGenerator::new();
    let mut diags = Diagnostics::new();
    gen.run(&prog, &mut diags);
    DeclarationAnalyzer::new(&mut gen.tables, &gen.tree).run(&prog, &mut diags);
    TypeChecker::new(&mut gen.tables, &gen.tree).run(&mut prog, &mut diags);
    assert!(!diags.has_errors(), "{diags:?}");
    build_module(&prog, &gen.tables, &gen.tree)
  }

  fn main_of(m: &Module) -> &Function {
    m.functions.iter().find(|f| f.name.as_str() == "main").unwrap()
  }

  fn calls_runtime(m: &Module, f: &Function, name: &str) -> bool {
    f.blocks.iter().any(|b| b.insts.iter().any(|i| matches!(&i.kind, Instruction::Call { callee: Value::Func(cf), .. } if m.functions[*cf].name.as_str() == name)))
  }

  #[test]
  fn print_sum_has_a_call_to_print() {
    let m = build("print(1 + 2)\n");
    assert!(calls_runtime(&m, main_of(&m), "print"));
  }

  #[test]
  fn closure_class_has_captured_attribute() {
    let m = build(
      "def outer() -> int:\n  x:int = 7\n  def inner() -> int:\n    return x\n  return inner()\nprint(outer())\n",
    );
    let anon = m.classes.iter().find(|c| c.anon).expect("closure class exists");
    assert!(anon.attrs.iter().any(|a| a.name.as_str() == "x"));
  }

  #[test]
  fn for_loop_null_checks_the_iterable() {
    let m = build("l:[int] = None\nl = [1,2,3]\nfor x in l:\n  print(x)\n");
    assert!(calls_runtime(&m, main_of(&m), "error.None"));
  }

  #[test]
  fn division_inserts_a_zero_check() {
    let m = build("print(1 // 2)\n");
    assert!(calls_runtime(&m, main_of(&m), "error.Div"));
  }

  #[test]
  fn class_inherits_attribute_layout() {
    let m = build("class A(object):\n  x:int = 0\nclass B(A):\n  y:int = 0\n");
    let b = m.classes.iter().find(|c| c.name.as_str() == "B").unwrap();
    assert_eq!(b.attrs.len(), 2);
    assert_eq!(b.attrs[0].name.as_str(), "x");
    assert_eq!(b.attrs[1].name.as_str(), "y");
  }

  #[test]
  fn recursive_function_resolves_its_own_call() {
    let m = build("def f(n:int) -> int:\n  if n <= 0:\n    return 0\n  return n + f(n - 1)\nprint(f(3))\n");
    let f = m.functions.iter().find(|f| f.name.as_str() == "$f").unwrap();
    assert!(f.blocks.iter().any(|b| b.insts.iter().any(|i| matches!(&i.kind, Instruction::Call { callee: Value::Func(_), .. }))));
  }
}
