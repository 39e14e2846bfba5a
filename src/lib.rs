//! Anzu — compiler and bytecode VM for the Anzu programming language.
//!
//! # Pipeline
//!
//! ```text
//! Source Code (.az)
//!     │
//!     ▼
//! ┌──────────┐
//! │  Lexer    │  Scanner + token stream with two-token lookahead
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Parser   │  Pratt parser (expressions) + recursive descent (statements)
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Checker  │  Name resolution, overloads, layout; emits a typed tree
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │ Compiler  │  Typed tree → flat op stream + read-only data
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │    VM     │  Stack machine with a tagged-pointer heap
//! └──────────┘
//! ```
//!
//! The stages are strictly sequential and share only the type store
//! (built by the checker, consulted by the compiler) and the builtin
//! registry (built once, read by checker, compiler, and VM).

pub mod ast;
pub mod builtins;
pub mod checker;
pub mod compiler;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod runtime;
pub mod token;
pub mod types;
