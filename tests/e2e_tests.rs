//! End-to-end scenarios, each driving the full `lex -> parse -> typecheck ->
//! build_mir` pipeline through `Compiler`. Execution of the emitted assembly
//! is outside this crate's boundary, so these check IR shape (the calls and
//! safety-check blocks a correct lowering must contain) rather than runtime
//! output.

use chocopy_compiler::driver::Compiler;
use chocopy_compiler::types::mir::{Function, Instruction, Module, Value};

fn build(src: &str) -> Module {
  Compiler::compile(src).unwrap_or_else(|e| panic!("expected {src:?} to compile, got {e}"))
}

fn main_of(m: &Module) -> &Function {
  m.functions.iter().find(|f| f.name.as_str() == "main").expect("module has a main")
}

fn calls_runtime(m: &Module, f: &Function, name: &str) -> bool {
  f.blocks.iter().any(|b| {
    b.insts.iter().any(|i| {
      matches!(&i.kind, Instruction::Call { callee: Value::Func(cf), .. } if m.functions[*cf].name.as_str() == name)
    })
  })
}

#[test]
fn scenario_1_print_of_a_sum_calls_print() {
  let m = build("print(1 + 2)\n");
  assert!(calls_runtime(&m, main_of(&m), "print"));
}

#[test]
fn scenario_2_method_call_on_a_possibly_none_receiver_is_guarded() {
  let src = "class A(object):\n  x:int = 0\n  def f(self:\"A\") -> int:\n    return self.x + 1\na:A = None\na = A()\nprint(a.f())\n";
  let m = build(src);
  assert!(calls_runtime(&m, main_of(&m), "error.None"));
  assert!(m.classes.iter().any(|c| c.name.as_str() == "A" && c.methods.len() == 1));
}

#[test]
fn scenario_3_list_index_is_bounds_checked() {
  let m = build("l:[int] = None\nl = [1,2,3]\nprint(l[5])\n");
  assert!(calls_runtime(&m, main_of(&m), "error.OOB"));
}

#[test]
fn scenario_4_nested_function_captures_into_a_closure_class() {
  let src = "def outer() -> int:\n  x:int = 7\n  def inner() -> int:\n    return x\n  return inner()\nprint(outer())\n";
  let m = build(src);
  let anon = m.classes.iter().find(|c| c.anon).expect("a closure class was synthesized");
  assert!(anon.attrs.iter().any(|a| a.name.as_str() == "x"));
}

#[test]
fn scenario_5_assigning_a_str_to_an_int_variable_is_a_type_error() {
  let err = Compiler::compile("a:int = 0\na = \"hi\"\n").unwrap_err();
  assert!(matches!(err, chocopy_compiler::diagnostics::CompileError::HasErrors(_)));
}

#[test]
fn scenario_6_floor_division_is_zero_checked() {
  let m = build("print(1 // 0)\n");
  assert!(calls_runtime(&m, main_of(&m), "error.Div"));
}
