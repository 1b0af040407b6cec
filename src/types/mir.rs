//! The SSA-like IR the builder emits: classes with prototype layouts and
//! dispatch tables, functions of basic blocks, and three-address instructions.
//! Arenas are addressed by `Idx` newtypes rather than by pointer, following
//! the convention `build_mir`'s own `VarId`/`BlockId` indices use upstream.

use smallvec::SmallVec;

use crate::idx::IdxVec;
use crate::mk_idx;
use crate::symbol::Symbol;

mk_idx! { pub struct ClassId; }
mk_idx! { pub struct FuncId; }
mk_idx! { pub struct GlobalId; }
mk_idx! { pub struct BlockId; }
mk_idx! { pub struct InstId; }

/// The four built-in layout tags; `.list` is not instantiable so it has no
/// positive tag of its own.
pub const TAG_OBJECT: i32 = 0;
pub const TAG_INT: i32 = 1;
pub const TAG_BOOL: i32 = 2;
pub const TAG_STR: i32 = 3;
pub const TAG_LIST: i32 = -1;

/// A machine-level type: what a `Value` actually looks like in memory,
/// distinct from the source-level `ValueType` the type checker works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrType {
  I32,
  I1,
  Ptr,
  Void,
  /// A pointer to an instance of this class's layout.
  Object(ClassId),
}

/// A reference to wherever a value came from: another instruction, a
/// function (for calls/closures), a global, or a compile-time constant.
#[derive(Clone, Debug)]
pub enum Value {
  Inst(FuncId, BlockId, InstId),
  /// The `n`th incoming parameter of the function currently being built.
  Param(usize),
  Func(FuncId),
  Global(GlobalId),
  Const(Constant),
}

#[derive(Clone, Debug)]
pub enum Constant {
  Int(i32),
  Null(IrType),
  /// An interned string literal: the global slot holding its bytes, and the
  /// bytes themselves for diagnostics/tests.
  Str(GlobalId, String),
  BoxInt(i32),
  BoxBool(bool),
  Zero(IrType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ICmpCond { Eq, Ne, Lt, Le, Gt, Ge }

/// One three-address instruction. Each carries its own result type (`Void`
/// for control-flow-only instructions like `Store`/`Br`/`Ret`).
#[derive(Clone, Debug)]
pub struct InstData {
  pub ty: IrType,
  pub kind: Instruction,
  /// Assigned by a post-pass (`set_instr_name`) so every IR value prints
  /// with a stable, unique name.
  pub name: Option<Symbol>,
}

#[derive(Clone, Debug)]
pub enum Instruction {
  Ret(Option<Value>),
  /// Unconditional when `cond` is `None`.
  Br { cond: Option<Value>, then_blk: BlockId, else_blk: Option<BlockId> },
  Neg(Value),
  Not(Value),
  Add(Value, Value),
  Sub(Value, Value),
  Mul(Value, Value),
  Div(Value, Value),
  Rem(Value, Value),
  And(Value, Value),
  Or(Value, Value),
  Alloca(IrType),
  Load(Value),
  Store { ptr: Value, value: Value },
  Shl(Value, Value),
  AShr(Value, Value),
  LShr(Value, Value),
  ICmp { cond: ICmpCond, lhs: Value, rhs: Value },
  Phi(SmallVec<[(Value, BlockId); 2]>),
  Call { callee: Value, args: Vec<Value> },
  Gep { base: Value, indices: SmallVec<[Value; 2]> },
  ZExt(Value, IrType),
  BitCast(Value, IrType),
  PtrToInt(Value),
  Trunc(Value, IrType),
  Asm(String),
  InsertElement { vec: Value, elem: Value, idx: Value },
  ExtractElement { vec: Value, idx: Value },
}

impl Instruction {
  /// Instructions with no successor fallthrough: the block they end must have no more instructions after them.
  #[must_use] pub fn is_terminator(&self) -> bool {
    matches!(self, Instruction::Ret(_) | Instruction::Br { .. })
  }
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
  pub insts: IdxVec<InstId, InstData>,
  pub preds: Vec<BlockId>,
  pub succs: Vec<BlockId>,
}

impl BasicBlock {
  pub fn push(&mut self, ty: IrType, kind: Instruction) -> InstId {
    self.insts.push(InstData { ty, kind, name: None })
  }

  #[must_use] pub fn is_terminated(&self) -> bool {
    self.insts.last_idx().is_some_and(|i| self.insts[i].kind.is_terminator())
  }
}

#[derive(Clone, Debug)]
pub struct Function {
  pub name: Symbol,
  pub params: Vec<(Symbol, IrType)>,
  pub return_ty: IrType,
  pub blocks: IdxVec<BlockId, BasicBlock>,
  pub entry: BlockId,
  /// `true` for runtime functions (`alloc_object`, `makeint`, ...) declared
  /// but not defined by this module.
  pub external: bool,
}

impl Function {
  pub fn new_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::default()) }

  pub fn connect(&mut self, from: BlockId, to: BlockId) {
    self.blocks[from].succs.push(to);
    self.blocks[to].preds.push(from);
  }
}

#[derive(Clone, Debug)]
pub enum AttrInit {
  Literal(Constant),
  Global(GlobalId),
}

#[derive(Clone, Debug)]
pub struct AttrInfo {
  pub name: Symbol,
  pub ty: IrType,
  pub init: AttrInit,
}

/// A class's IR-level layout: `[class_tag, object_size, dispatch_table_ptr,
/// attr_0, attr_1, ...]`, shared by every instance cloned from the prototype.
#[derive(Clone, Debug)]
pub struct Class {
  pub name: Symbol,
  pub type_tag: i32,
  pub super_: Option<ClassId>,
  pub attrs: Vec<AttrInfo>,
  /// Method slots in dispatch-table order: inherited slots first (possibly
  /// overridden in place), then newly declared methods appended.
  pub methods: Vec<FuncId>,
  /// Closure-record classes (`$f$anon`) skip the three-word object header.
  pub anon: bool,
}

#[derive(Clone, Debug)]
pub struct Global {
  pub name: Symbol,
  pub ty: IrType,
  pub init: Constant,
}

/// The complete lowering output: everything codegen would need to emit assembly.
#[derive(Clone, Debug, Default)]
pub struct Module {
  pub classes: IdxVec<ClassId, Class>,
  pub globals: IdxVec<GlobalId, Global>,
  pub functions: IdxVec<FuncId, Function>,
}

impl Module {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Assigns a unique printable name to every instruction result, matching
  /// the round-trip property that every `Value` names uniquely.
  pub fn set_instr_names(&mut self) {
    for f in self.functions.iter_mut() {
      let mut counter: u32 = 0;
      for blk in f.blocks.iter_mut() {
        for inst in blk.insts.iter_mut() {
          if !matches!(inst.ty, IrType::Void) {
            inst.name = Some(crate::symbol::intern(&format!("%{counter}")));
            counter += 1;
          }
        }
      }
    }
  }
}
