//! Anzu CLI entry point.
//!
//! Usage:
//!   anzu <file> lex     (dump tokens)
//!   anzu <file> parse   (dump the AST)
//!   anzu <file> check   (type-check only)
//!   anzu <file> com     (print the compiled bytecode)
//!   anzu <file> run     (execute)
//!   anzu <file> debug   (execute with an op trace)

use std::path::Path;
use std::{env, fs, process};

use anzu::builtins::construct_builtin_map;
use anzu::checker::check;
use anzu::compiler::compile;
use anzu::errors::{CompileError, RuntimeError};
use anzu::lexer::Scanner;
use anzu::parser::Parser;
use anzu::runtime::{run_program, run_program_debug};
use anzu::token::TokenKind;

fn print_usage() {
    eprintln!("usage: anzu <file> <mode>");
    eprintln!();
    eprintln!("The Anzu Programming Language");
    eprintln!();
    eprintln!("modes:");
    eprintln!("    lex   - runs the lexer and prints the tokens");
    eprintln!("    parse - runs the parser and prints the AST");
    eprintln!("    check - after parsing, run the type checker then exit");
    eprintln!("    com   - runs the compiler and prints the bytecode");
    eprintln!("    run   - runs the program");
    eprintln!("    debug - runs the program and prints each op code executed");
}

fn fail_compile(err: CompileError) -> ! {
    eprintln!("{:?}", miette::Report::new(err));
    process::exit(1);
}

fn fail_runtime(err: RuntimeError) -> ! {
    eprintln!("[ERROR] {}", err);
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        print_usage();
        process::exit(1);
    }
    let file = &args[1];
    let mode = args[2].as_str();

    let source = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("could not read '{}': {}", file, err);
            process::exit(1);
        }
    };
    // Tokens and AST nodes borrow the source for the whole run.
    let source: &'static str = Box::leak(source.into_boxed_str());

    if mode == "lex" {
        let mut scanner = Scanner::new(source);
        loop {
            match scanner.next_token() {
                Ok(token) if token.kind == TokenKind::Eof => break,
                Ok(token) => println!(
                    "{:<15} - {:<20} {:<5} {:<5}",
                    token.kind.to_string(),
                    format!("'{}'", token.text),
                    token.line,
                    token.col
                ),
                Err(err) => fail_compile(err),
            }
        }
        return;
    }

    let module_dir = Path::new(file).parent().unwrap_or_else(|| Path::new("."));
    let module = Parser::new(source, module_dir)
        .and_then(|mut parser| parser.parse_program())
        .unwrap_or_else(|err| fail_compile(err));
    if mode == "parse" {
        for stmt in &module {
            println!("{:#?}", stmt);
        }
        return;
    }

    let builtins = construct_builtin_map();
    let checked = match check(&module, &builtins, source) {
        Ok(checked) => checked,
        Err(err) => fail_compile(err),
    };
    if mode == "check" {
        println!("No type errors.");
        return;
    }

    let program = compile(&checked);
    if mode == "com" {
        print!("{}", program);
        return;
    }

    let result = match mode {
        "run" => run_program(&program),
        "debug" => run_program_debug(&program),
        other => {
            eprintln!("unknown mode: '{}'", other);
            print_usage();
            process::exit(1);
        }
    };
    if let Err(err) = result {
        fail_runtime(err);
    }
}
