//! Builtins — native functions callable from bytecode.
//!
//! The registry is keyed by `(name, argument type vector)`, so the
//! print family is overloaded per type. It is built once at startup
//! and shared read-only by the checker (overload resolution), the
//! compiler (embedding the function pointer into `builtin_call`), and
//! the VM (invoking it).
//!
//! By convention a builtin pops its argument bytes from the stack and
//! pushes exactly one result; void-returners push a single zero byte
//! representing `null`.

use std::collections::HashMap;

use crate::program::BuiltinFn;
use crate::runtime::{pop_value, push_value, StackValue};
use crate::types::{
    bool_type, char_type, f64_type, i32_type, i64_type, null_type, u64_type, TypeName,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuiltinKey {
    pub name: String,
    pub args: Vec<TypeName>,
}

#[derive(Debug, Clone)]
pub struct BuiltinVal {
    pub ptr: BuiltinFn,
    pub return_type: TypeName,
}

pub type BuiltinMap = HashMap<BuiltinKey, BuiltinVal>;

fn pop_arg<T: StackValue>(mem: &mut Vec<u8>) -> T {
    pop_value(mem).expect("builtin invoked with malformed stack")
}

fn builtin_sqrt(mem: &mut Vec<u8>) {
    let value: f64 = pop_arg(mem);
    push_value(mem, value.sqrt());
}

macro_rules! print_builtins {
    ($print:ident, $println:ident, $t:ty) => {
        fn $print(mem: &mut Vec<u8>) {
            let value: $t = pop_arg(mem);
            print!("{}", value);
            mem.push(0);
        }
        fn $println(mem: &mut Vec<u8>) {
            let value: $t = pop_arg(mem);
            println!("{}", value);
            mem.push(0);
        }
    };
}

print_builtins!(print_i32, println_i32, i32);
print_builtins!(print_i64, println_i64, i64);
print_builtins!(print_u64, println_u64, u64);
print_builtins!(print_f64, println_f64, f64);
print_builtins!(print_bool, println_bool, bool);

fn print_char(mem: &mut Vec<u8>) {
    let value: u8 = pop_arg(mem);
    print!("{}", value as char);
    mem.push(0);
}

fn println_char(mem: &mut Vec<u8>) {
    let value: u8 = pop_arg(mem);
    println!("{}", value as char);
    mem.push(0);
}

fn print_null(mem: &mut Vec<u8>) {
    let _: u8 = pop_arg(mem);
    print!("null");
    mem.push(0);
}

fn println_null(mem: &mut Vec<u8>) {
    let _: u8 = pop_arg(mem);
    println!("null");
    mem.push(0);
}

/// Build the process-lifetime builtin registry.
pub fn construct_builtin_map() -> BuiltinMap {
    let mut builtins = BuiltinMap::new();

    let mut add = |name: &str, args: Vec<TypeName>, ptr: BuiltinFn, return_type: TypeName| {
        builtins.insert(
            BuiltinKey {
                name: name.to_string(),
                args,
            },
            BuiltinVal { ptr, return_type },
        );
    };

    add("sqrt", vec![f64_type()], builtin_sqrt, f64_type());

    add("print", vec![i32_type()], print_i32, null_type());
    add("println", vec![i32_type()], println_i32, null_type());
    add("print", vec![i64_type()], print_i64, null_type());
    add("println", vec![i64_type()], println_i64, null_type());
    add("print", vec![u64_type()], print_u64, null_type());
    add("println", vec![u64_type()], println_u64, null_type());
    add("print", vec![f64_type()], print_f64, null_type());
    add("println", vec![f64_type()], println_f64, null_type());
    add("print", vec![char_type()], print_char, null_type());
    add("println", vec![char_type()], println_char, null_type());
    add("print", vec![bool_type()], print_bool, null_type());
    add("println", vec![bool_type()], println_bool, null_type());
    add("print", vec![null_type()], print_null, null_type());
    add("println", vec![null_type()], println_null, null_type());

    builtins
}
