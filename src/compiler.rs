//! Compiler — lowers the typed tree into a flat bytecode program.
//!
//! Lowering is syntax-directed; the checker already resolved names,
//! types, offsets, and overloads, so this pass only chooses ops and
//! fixes up addresses:
//!
//! - **Jump patching**: `if`/`while`/`loop`/`for` emit forward
//!   `jump_if_false` and backward `jump` ops whose displacements are
//!   patched once the branch bodies are emitted. `break`/`continue`
//!   emit placeholder jumps collected per enclosing loop.
//! - **Function address table**: call sites are emitted with a
//!   placeholder target and resolved in a final pass, so calls can
//!   reference functions defined later in the file.
//! - **Calling convention**: a call site pushes a 16-byte zeroed frame
//!   header, then the arguments in source order; `function_call` fills
//!   the header with the caller's saved state at runtime, and
//!   `return(n)` collapses the frame to its `n` result bytes.
//! - **Read-only data**: string literals and all-constant array
//!   literals are baked into rodata and loaded by address.

use std::collections::HashMap;

use crate::checker::{
    BinaryOp, CheckedProgram, Place, PlaceKind, TExpr, TExprKind, TStmt, UnaryOp,
};
use crate::program::{Op, Program};
use crate::types::{TypeName, TypeStore};

/// Lower a checked program to bytecode.
pub fn compile(checked: &CheckedProgram) -> Program {
    let mut compiler = Compiler::new(&checked.types);
    for stmt in &checked.stmts {
        compiler.compile_stmt(stmt);
    }
    compiler.patch_functions();
    Program {
        ops: compiler.ops,
        rodata: compiler.rodata,
    }
}

struct LoopCtx {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct Compiler<'a> {
    ops: Vec<Op>,
    rodata: Vec<u8>,
    types: &'a TypeStore,
    /// Function name -> op index of the first body op.
    functions: HashMap<String, u64>,
    /// `function_call` ops awaiting a target address.
    call_patches: Vec<(usize, String)>,
    /// `load_bytes` ops awaiting a function address value.
    addr_patches: Vec<(usize, String)>,
    loops: Vec<LoopCtx>,
}

impl<'a> Compiler<'a> {
    fn new(types: &'a TypeStore) -> Self {
        Self {
            ops: Vec::new(),
            rodata: Vec::new(),
            types,
            functions: HashMap::new(),
            call_patches: Vec::new(),
            addr_patches: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn size_of(&self, ty: &TypeName) -> u64 {
        self.types.size_of(ty)
    }

    /// Point the jump at `at` to the op at `target`.
    fn patch_jump_to(&mut self, at: usize, target: usize) {
        let delta = target as i64 - at as i64;
        match &mut self.ops[at] {
            Op::Jump { jump } | Op::JumpIfFalse { jump } => *jump = delta,
            other => unreachable!("patching a non-jump op {}", other),
        }
    }

    fn patch_functions(&mut self) {
        for (at, name) in std::mem::take(&mut self.call_patches) {
            let ptr = *self
                .functions
                .get(&name)
                .expect("call target missing from function table");
            match &mut self.ops[at] {
                Op::FunctionCall { ptr: slot, .. } => *slot = ptr,
                other => unreachable!("patching a non-call op {}", other),
            }
        }
        for (at, name) in std::mem::take(&mut self.addr_patches) {
            let ptr = *self
                .functions
                .get(&name)
                .expect("function address missing from function table");
            self.ops[at] = Op::LoadBytes {
                bytes: ptr.to_le_bytes().to_vec(),
            };
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn compile_stmt(&mut self, stmt: &TStmt) {
        match stmt {
            TStmt::Block { stmts, scope_size } => {
                for s in stmts {
                    self.compile_stmt(s);
                }
                if *scope_size > 0 {
                    self.emit(Op::Pop { size: *scope_size });
                }
            }

            // The computed value lands at the new local's frame offset.
            TStmt::Declaration { value } => {
                self.compile_expr(value);
            }

            TStmt::Assign { place, value } => {
                self.compile_expr(value);
                self.compile_place_addr(place);
                self.emit(Op::Save {
                    size: self.size_of(&place.ty),
                });
            }

            TStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.compile_expr(condition);
                let cond_jump = self.emit(Op::JumpIfFalse { jump: 0 });
                self.compile_stmt(then_body);
                match else_body {
                    Some(else_body) => {
                        let exit_jump = self.emit(Op::Jump { jump: 0 });
                        self.patch_jump_to(cond_jump, self.ops.len());
                        self.compile_stmt(else_body);
                        self.patch_jump_to(exit_jump, self.ops.len());
                    }
                    None => {
                        self.patch_jump_to(cond_jump, self.ops.len());
                    }
                }
            }

            TStmt::While { condition, body } => {
                let begin = self.ops.len();
                self.compile_expr(condition);
                let cond_jump = self.emit(Op::JumpIfFalse { jump: 0 });
                self.loops.push(LoopCtx {
                    breaks: Vec::new(),
                    continues: Vec::new(),
                });
                self.compile_stmt(body);
                let back = self.emit(Op::Jump { jump: 0 });
                self.patch_jump_to(back, begin);
                let exit = self.ops.len();
                self.patch_jump_to(cond_jump, exit);
                let ctx = self.loops.pop().expect("loop context stack empty");
                for b in ctx.breaks {
                    self.patch_jump_to(b, exit);
                }
                for c in ctx.continues {
                    self.patch_jump_to(c, begin);
                }
            }

            TStmt::Loop { body } => {
                let begin = self.ops.len();
                self.loops.push(LoopCtx {
                    breaks: Vec::new(),
                    continues: Vec::new(),
                });
                self.compile_stmt(body);
                let back = self.emit(Op::Jump { jump: 0 });
                self.patch_jump_to(back, begin);
                let exit = self.ops.len();
                let ctx = self.loops.pop().expect("loop context stack empty");
                for b in ctx.breaks {
                    self.patch_jump_to(b, exit);
                }
                for c in ctx.continues {
                    self.patch_jump_to(c, begin);
                }
            }

            TStmt::For {
                prologue,
                condition,
                bind_var,
                body,
                latch,
                scope_size,
            } => {
                for s in prologue {
                    self.compile_stmt(s);
                }
                let begin = self.ops.len();
                self.compile_expr(condition);
                let cond_jump = self.emit(Op::JumpIfFalse { jump: 0 });
                self.compile_stmt(bind_var);
                self.loops.push(LoopCtx {
                    breaks: Vec::new(),
                    continues: Vec::new(),
                });
                self.compile_stmt(body);
                let latch_at = self.ops.len();
                self.compile_stmt(latch);
                let back = self.emit(Op::Jump { jump: 0 });
                self.patch_jump_to(back, begin);
                let exit = self.ops.len();
                self.patch_jump_to(cond_jump, exit);
                let ctx = self.loops.pop().expect("loop context stack empty");
                for b in ctx.breaks {
                    self.patch_jump_to(b, exit);
                }
                // Skipped increments would loop forever; continue lands
                // on the latch, not the condition.
                for c in ctx.continues {
                    self.patch_jump_to(c, latch_at);
                }
                if *scope_size > 0 {
                    self.emit(Op::Pop { size: *scope_size });
                }
            }

            TStmt::Break { unwind } => {
                if *unwind > 0 {
                    self.emit(Op::Pop { size: *unwind });
                }
                let at = self.emit(Op::Jump { jump: 0 });
                self.loops
                    .last_mut()
                    .expect("break outside loop survived checking")
                    .breaks
                    .push(at);
            }

            TStmt::Continue { unwind } => {
                if *unwind > 0 {
                    self.emit(Op::Pop { size: *unwind });
                }
                let at = self.emit(Op::Jump { jump: 0 });
                self.loops
                    .last_mut()
                    .expect("continue outside loop survived checking")
                    .continues
                    .push(at);
            }

            TStmt::Return { value } => {
                self.compile_expr(value);
                self.emit(Op::Return {
                    size: self.size_of(&value.ty),
                });
            }

            TStmt::Assert { condition, message } => {
                self.compile_expr(condition);
                self.emit(Op::Assert {
                    message: message.clone(),
                });
            }

            TStmt::Expression { value } => {
                self.compile_expr(value);
                self.emit(Op::Pop {
                    size: self.size_of(&value.ty),
                });
            }

            TStmt::Function {
                name,
                body,
                implicit_return,
            } => {
                let fn_op = self.emit(Op::Function {
                    name: name.clone(),
                    jump: 0,
                });
                self.functions.insert(name.clone(), fn_op as u64 + 1);
                self.compile_stmt(body);
                if *implicit_return {
                    self.emit(Op::LoadBytes { bytes: vec![0] });
                    self.emit(Op::Return { size: 1 });
                }
                let past = self.ops.len() as u64;
                match &mut self.ops[fn_op] {
                    Op::Function { jump, .. } => *jump = past,
                    other => unreachable!("patching a non-function op {}", other),
                }
            }

            TStmt::Delete { value } => {
                self.compile_expr(value);
                self.emit(Op::Deallocate);
            }
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &TExpr) {
        match &expr.kind {
            TExprKind::Literal { bytes } => {
                self.emit(Op::LoadBytes {
                    bytes: bytes.clone(),
                });
            }

            TExprKind::StringLit { data } => {
                let position = self.intern_rodata(data);
                self.emit(Op::PushGlobalAddr { position });
                self.emit(Op::LoadBytes {
                    bytes: (data.len() as u64).to_le_bytes().to_vec(),
                });
            }

            TExprKind::LoadPlace { place } => {
                self.compile_place_addr(place);
                self.emit(Op::Load {
                    size: self.size_of(&place.ty),
                });
            }

            TExprKind::AddrOf { place } => {
                self.compile_place_addr(place);
            }

            TExprKind::Unary { op, expr: inner } => {
                self.compile_expr(inner);
                self.emit(unary_op_for(&inner.ty, *op));
            }

            TExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs);
                self.compile_expr(rhs);
                self.emit(binary_op_for(&lhs.ty, *op));
            }

            TExprKind::Call {
                name,
                args,
                args_size,
            } => {
                // Reserved slots for the caller's base_ptr and prog_ptr.
                self.emit(Op::LoadBytes {
                    bytes: vec![0; 16],
                });
                for arg in args {
                    self.compile_expr(arg);
                }
                let at = self.emit(Op::FunctionCall {
                    name: name.clone(),
                    ptr: 0,
                    args_size: *args_size,
                });
                self.call_patches.push((at, name.clone()));
            }

            TExprKind::CallPtr {
                callee,
                args,
                args_size,
            } => {
                self.emit(Op::LoadBytes {
                    bytes: vec![0; 16],
                });
                for arg in args {
                    self.compile_expr(arg);
                }
                self.compile_expr(callee);
                self.emit(Op::CallPtr {
                    args_size: *args_size,
                });
            }

            TExprKind::Builtin { name, ptr, args } => {
                for arg in args {
                    self.compile_expr(arg);
                }
                self.emit(Op::BuiltinCall {
                    name: name.clone(),
                    ptr: *ptr,
                });
            }

            TExprKind::FnAddr { name } => {
                let at = self.emit(Op::LoadBytes {
                    bytes: vec![0; 8],
                });
                self.addr_patches.push((at, name.clone()));
            }

            TExprKind::Array { elements } => {
                // Constant arrays live in rodata; anything else is
                // evaluated element by element, contiguously.
                if let Some(bytes) = constant_bytes_of(elements) {
                    let position = self.intern_rodata(&bytes);
                    self.emit(Op::PushGlobalAddr { position });
                    self.emit(Op::Load {
                        size: bytes.len() as u64,
                    });
                    return;
                }
                for element in elements {
                    self.compile_expr(element);
                }
            }

            TExprKind::Repeat { value, count } => {
                if let TExprKind::Literal { bytes } = &value.kind {
                    let mut repeated = Vec::with_capacity(bytes.len() * *count as usize);
                    for _ in 0..*count {
                        repeated.extend_from_slice(bytes);
                    }
                    self.emit(Op::LoadBytes { bytes: repeated });
                    return;
                }
                for _ in 0..*count {
                    self.compile_expr(value);
                }
            }

            TExprKind::MakeSpan { ptr, len } => {
                self.compile_expr(ptr);
                self.compile_expr(len);
            }

            TExprKind::New { count, elem_size } => {
                self.compile_expr(count);
                self.emit(Op::Allocate {
                    type_size: *elem_size,
                });
            }
        }
    }

    fn compile_place_addr(&mut self, place: &Place) {
        match &place.kind {
            PlaceKind::Local { offset } => {
                self.emit(Op::PushLocalAddr { offset: *offset });
            }
            PlaceKind::Computed { addr } => {
                self.compile_expr(addr);
            }
        }
    }

    fn intern_rodata(&mut self, bytes: &[u8]) -> u64 {
        let position = self.rodata.len() as u64;
        self.rodata.extend_from_slice(bytes);
        position
    }
}

/// Concatenated bytes of an all-literal element list, if it is one.
fn constant_bytes_of(elements: &[TExpr]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for element in elements {
        match &element.kind {
            TExprKind::Literal { bytes } => out.extend_from_slice(bytes),
            _ => return None,
        }
    }
    Some(out)
}

fn unary_op_for(operand: &TypeName, op: UnaryOp) -> Op {
    let name = simple_name(operand);
    match (op, name) {
        (UnaryOp::Neg, "i32") => Op::I32Neg,
        (UnaryOp::Neg, "i64") => Op::I64Neg,
        (UnaryOp::Neg, "f64") => Op::F64Neg,
        (UnaryOp::Not, "bool") => Op::BoolNot,
        _ => unreachable!("no unary op for '{}'", operand),
    }
}

/// One op per (operand type, operation). Pointer-shaped operands use
/// the u64 family; their tag bits ride along untouched.
fn binary_op_for(operand: &TypeName, op: BinaryOp) -> Op {
    use BinaryOp::*;
    let name = match operand {
        TypeName::Ptr { .. } | TypeName::Reference { .. } | TypeName::FnPtr { .. } => "u64",
        _ => simple_name(operand),
    };
    match (name, op) {
        ("i32", Add) => Op::I32Add,
        ("i32", Sub) => Op::I32Sub,
        ("i32", Mul) => Op::I32Mul,
        ("i32", Div) => Op::I32Div,
        ("i32", Mod) => Op::I32Mod,
        ("i32", Eq) => Op::I32Eq,
        ("i32", Ne) => Op::I32Ne,
        ("i32", Lt) => Op::I32Lt,
        ("i32", Le) => Op::I32Le,
        ("i32", Gt) => Op::I32Gt,
        ("i32", Ge) => Op::I32Ge,

        ("i64", Add) => Op::I64Add,
        ("i64", Sub) => Op::I64Sub,
        ("i64", Mul) => Op::I64Mul,
        ("i64", Div) => Op::I64Div,
        ("i64", Mod) => Op::I64Mod,
        ("i64", Eq) => Op::I64Eq,
        ("i64", Ne) => Op::I64Ne,
        ("i64", Lt) => Op::I64Lt,
        ("i64", Le) => Op::I64Le,
        ("i64", Gt) => Op::I64Gt,
        ("i64", Ge) => Op::I64Ge,

        ("u64", Add) => Op::U64Add,
        ("u64", Sub) => Op::U64Sub,
        ("u64", Mul) => Op::U64Mul,
        ("u64", Div) => Op::U64Div,
        ("u64", Mod) => Op::U64Mod,
        ("u64", Eq) => Op::U64Eq,
        ("u64", Ne) => Op::U64Ne,
        ("u64", Lt) => Op::U64Lt,
        ("u64", Le) => Op::U64Le,
        ("u64", Gt) => Op::U64Gt,
        ("u64", Ge) => Op::U64Ge,

        ("f64", Add) => Op::F64Add,
        ("f64", Sub) => Op::F64Sub,
        ("f64", Mul) => Op::F64Mul,
        ("f64", Div) => Op::F64Div,
        ("f64", Eq) => Op::F64Eq,
        ("f64", Ne) => Op::F64Ne,
        ("f64", Lt) => Op::F64Lt,
        ("f64", Le) => Op::F64Le,
        ("f64", Gt) => Op::F64Gt,
        ("f64", Ge) => Op::F64Ge,

        ("bool", And) => Op::BoolAnd,
        ("bool", Or) => Op::BoolOr,
        ("bool", Eq) => Op::BoolEq,
        ("bool", Ne) => Op::BoolNe,

        ("char", Eq) => Op::CharEq,
        ("char", Ne) => Op::CharNe,

        _ => unreachable!("no binary op '{:?}' for '{}'", op, operand),
    }
}

fn simple_name(ty: &TypeName) -> &str {
    match ty {
        TypeName::Simple(name) => name.as_str(),
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::construct_builtin_map;
    use crate::checker::check;
    use crate::parser::parse;

    fn compile_source(source: &str) -> Program {
        let builtins = construct_builtin_map();
        let module = parse(source).expect("parse error");
        let checked = check(&module, &builtins, source).expect("check error");
        compile(&checked)
    }

    fn find_op(prog: &Program, pred: impl Fn(&Op) -> bool) -> bool {
        prog.ops.iter().any(pred)
    }

    #[test]
    fn test_return_of_sum() {
        let prog = compile_source("fn main() -> i64 { return 1 + 2; }");
        assert_eq!(
            prog.ops.last(),
            Some(&Op::Return { size: 8 }),
            "program must end with the function's return"
        );
        assert!(find_op(&prog, |op| matches!(
            op,
            Op::LoadBytes { bytes } if bytes.as_slice() == 1i64.to_le_bytes()
        )));
        assert!(find_op(&prog, |op| matches!(
            op,
            Op::LoadBytes { bytes } if bytes.as_slice() == 2i64.to_le_bytes()
        )));
        assert!(find_op(&prog, |op| *op == Op::I64Add));
        // Linear execution skips the body.
        let Op::Function { jump, .. } = &prog.ops[0] else {
            panic!("expected a function marker first");
        };
        assert_eq!(*jump, prog.ops.len() as u64);
    }

    #[test]
    fn test_declaration_leaves_value_in_slot() {
        let prog = compile_source("x := 7;");
        // A declaration is just the value computation; no save.
        assert!(!find_op(&prog, |op| matches!(op, Op::Save { .. })));
        assert!(find_op(&prog, |op| matches!(op, Op::LoadBytes { .. })));
    }

    #[test]
    fn test_assignment_saves_through_address() {
        let prog = compile_source("x := 7; x = 8;");
        assert!(find_op(&prog, |op| *op == Op::Save { size: 8 }));
        assert!(find_op(&prog, |op| *op == Op::PushLocalAddr { offset: 0 }));
    }

    #[test]
    fn test_if_else_jumps_are_patched() {
        let prog = compile_source("if true { x := 1; } else { y := 2; }");
        for (idx, op) in prog.ops.iter().enumerate() {
            if let Op::Jump { jump } | Op::JumpIfFalse { jump } = op {
                let target = idx as i64 + jump;
                assert!(*jump != 0, "unpatched jump at {}", idx);
                assert!(target >= 0 && target <= prog.ops.len() as i64);
            }
        }
    }

    #[test]
    fn test_while_has_backward_jump() {
        let prog = compile_source("while false { }");
        assert!(find_op(&prog, |op| matches!(op, Op::Jump { jump } if *jump < 0)));
        assert!(find_op(&prog, |op| matches!(op, Op::JumpIfFalse { jump } if *jump > 0)));
    }

    #[test]
    fn test_break_jumps_forward_out_of_loop() {
        let prog = compile_source("loop { break; }");
        assert!(find_op(&prog, |op| matches!(op, Op::Jump { jump } if *jump > 0)));
    }

    #[test]
    fn test_forward_call_is_patched() {
        let prog = compile_source(
            "fn main() -> i64 { return helper(); } fn helper() -> i64 { return 1; }",
        );
        let mut seen = false;
        for op in &prog.ops {
            if let Op::FunctionCall { name, ptr, .. } = op {
                assert_eq!(name, "helper");
                // The helper body starts past its function marker.
                assert!(*ptr > 0);
                let Op::Function { name, .. } = &prog.ops[*ptr as usize - 1] else {
                    panic!("call target must follow a function marker");
                };
                assert_eq!(name, "helper");
                seen = true;
            }
        }
        assert!(seen);
    }

    #[test]
    fn test_call_pushes_frame_header_before_args() {
        let prog = compile_source("fn f(x: i64) -> i64 { return x; } y := f(3);");
        let call_at = prog
            .ops
            .iter()
            .position(|op| matches!(op, Op::FunctionCall { .. }))
            .expect("expected a call");
        let Op::FunctionCall { args_size, .. } = &prog.ops[call_at] else {
            unreachable!();
        };
        assert_eq!(*args_size, 24); // 16-byte header + one i64
        assert!(matches!(
            &prog.ops[call_at - 2],
            Op::LoadBytes { bytes } if bytes.len() == 16
        ));
    }

    #[test]
    fn test_string_literal_lands_in_rodata() {
        let prog = compile_source("s := \"abc\";");
        assert_eq!(&prog.rodata, b"abc");
        assert!(find_op(&prog, |op| *op == Op::PushGlobalAddr { position: 0 }));
        // The span's length follows the pointer.
        assert!(find_op(&prog, |op| matches!(
            op,
            Op::LoadBytes { bytes } if bytes.as_slice() == 3u64.to_le_bytes()
        )));
    }

    #[test]
    fn test_constant_array_folds_into_rodata() {
        let prog = compile_source("xs := [10, 20, 30];");
        assert_eq!(prog.rodata.len(), 24);
        assert!(find_op(&prog, |op| *op == Op::Load { size: 24 }));
    }

    #[test]
    fn test_new_and_delete_lowering() {
        let prog = compile_source("p := new i64; delete p;");
        assert!(find_op(&prog, |op| *op == Op::Allocate { type_size: 8 }));
        assert!(find_op(&prog, |op| *op == Op::Deallocate));
        // The default allocation count is one.
        assert!(find_op(&prog, |op| matches!(
            op,
            Op::LoadBytes { bytes } if bytes.as_slice() == 1u64.to_le_bytes()
        )));
    }

    #[test]
    fn test_builtin_call() {
        let prog = compile_source("println(1);");
        assert!(find_op(
            &prog,
            |op| matches!(op, Op::BuiltinCall { name, .. } if name == "println")
        ));
        // The discarded null result is popped.
        assert!(find_op(&prog, |op| *op == Op::Pop { size: 1 }));
    }

    #[test]
    fn test_expression_statement_pops_value() {
        let prog = compile_source("1 + 2;");
        assert_eq!(prog.ops.last(), Some(&Op::Pop { size: 8 }));
    }

    #[test]
    fn test_block_pops_scope() {
        let prog = compile_source("{ x := 1; y := 2; }");
        assert_eq!(prog.ops.last(), Some(&Op::Pop { size: 16 }));
    }

    #[test]
    fn test_function_pointer_value_is_patched() {
        let prog = compile_source("fn f() -> i64 { return 1; } g := f; y := g();");
        assert!(find_op(&prog, |op| matches!(op, Op::CallPtr { .. })));
        // The function's address was patched into a load_bytes.
        assert!(find_op(&prog, |op| matches!(
            op,
            Op::LoadBytes { bytes } if bytes.as_slice() == 1u64.to_le_bytes()
        )));
    }

    #[test]
    fn test_null_function_gets_implicit_return() {
        let prog = compile_source("fn f() { x := 1; }");
        assert!(find_op(&prog, |op| *op == Op::Return { size: 1 }));
    }
}
