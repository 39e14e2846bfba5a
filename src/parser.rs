//! Parser — Pratt parser (expressions) + recursive descent (statements).
//!
//! Expressions are parsed against a fixed precedence table. Each token
//! kind maps to an optional prefix handler, an optional midfix handler,
//! and a precedence:
//!
//! ```text
//! NONE < OR < AND < EQUALITY < COMPARISON < TERM < FACTOR < UNARY < CALL < SCOPE < PRIMARY
//! ```
//!
//! `parse_precedence(prec)` dispatches on the current token's prefix
//! handler to form a seed node, then keeps applying the current token's
//! midfix handler while its precedence is at least `prec`. Binary
//! operators are left-associative because their right operand parses
//! one level tighter.
//!
//! Statements use plain recursive descent. There is no error recovery:
//! the first diagnostic aborts the parse.
//!
//! `import "path";` splices the imported file's statements in place,
//! deduplicated by canonical path. Imported sources are leaked so their
//! tokens live as long as the main buffer's.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::ast::*;
use crate::errors::CompileError;
use crate::lexer::{numeric_prefix, TokenStream};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Or,         // ||
    And,        // &&
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // . () [] !() @ & const
    Scope,      // ::
    Primary,
}

impl Prec {
    /// One level tighter; used for the right operand of binary ops.
    fn next(self) -> Prec {
        match self {
            Prec::None => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Equality,
            Prec::Equality => Prec::Comparison,
            Prec::Comparison => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary => Prec::Call,
            Prec::Call => Prec::Scope,
            Prec::Scope | Prec::Primary => Prec::Primary,
        }
    }
}

type PrefixFn<'src> = fn(&mut Parser<'src>) -> Result<Expr<'src>, CompileError>;
type MidfixFn<'src> = fn(&mut Parser<'src>, Expr<'src>) -> Result<Expr<'src>, CompileError>;

struct ParseRule<'src> {
    prefix: Option<PrefixFn<'src>>,
    midfix: Option<MidfixFn<'src>>,
    prec: Prec,
}

fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    let (prefix, midfix, prec): (Option<PrefixFn<'src>>, Option<MidfixFn<'src>>, Prec) = match kind
    {
        LParen => (Some(Parser::parse_grouping), Some(Parser::parse_call), Prec::Call),
        Bang => (Some(Parser::parse_unary), Some(Parser::parse_call), Prec::Call),
        LBracket => (
            Some(Parser::parse_array),
            Some(Parser::parse_subscript),
            Prec::Call,
        ),
        Dot => (None, Some(Parser::parse_dot), Prec::Call),
        At => (None, Some(Parser::parse_at), Prec::Call),
        Ampersand => (None, Some(Parser::parse_ampersand), Prec::Call),
        KwConst => (None, Some(Parser::parse_const), Prec::Call),

        Minus => (Some(Parser::parse_unary), Some(Parser::parse_binary), Prec::Term),
        Plus => (None, Some(Parser::parse_binary), Prec::Term),
        Slash | Star | Percent => (None, Some(Parser::parse_binary), Prec::Factor),
        EqualEqual | BangEqual => (None, Some(Parser::parse_binary), Prec::Equality),
        Less | LessEqual | Greater | GreaterEqual => {
            (None, Some(Parser::parse_binary), Prec::Comparison)
        }
        AmpAmp => (None, Some(Parser::parse_binary), Prec::And),
        BarBar => (None, Some(Parser::parse_binary), Prec::Or),

        Int32 => (Some(Parser::parse_i32), None, Prec::None),
        Int64 => (Some(Parser::parse_i64), None, Prec::None),
        Uint64 => (Some(Parser::parse_u64), None, Prec::None),
        Float64 => (Some(Parser::parse_f64), None, Prec::None),
        Character => (Some(Parser::parse_char), None, Prec::None),
        Str => (Some(Parser::parse_string), None, Prec::None),
        KwTrue => (Some(Parser::parse_true), None, Prec::None),
        KwFalse => (Some(Parser::parse_false), None, Prec::None),
        KwNull => (Some(Parser::parse_null), None, Prec::None),
        KwNullptr => (Some(Parser::parse_nullptr), None, Prec::None),

        Identifier | KwI32 | KwI64 | KwU64 | KwF64 | KwChar | KwBool => {
            (Some(Parser::parse_name), None, Prec::None)
        }
        KwTypeof => (Some(Parser::parse_typeof), None, Prec::None),
        KwSizeof => (Some(Parser::parse_sizeof), None, Prec::None),
        KwFn => (Some(Parser::parse_fn_ptr_type), None, Prec::None),
        KwNew => (Some(Parser::parse_new), None, Prec::None),

        _ => (None, None, Prec::None),
    };
    ParseRule {
        prefix,
        midfix,
        prec,
    }
}

pub struct Parser<'src> {
    tokens: TokenStream<'src>,
    imported: HashSet<PathBuf>,
    module_dir: PathBuf,
}

/// Parse a complete module from source text.
pub fn parse(source: &str) -> Result<Module<'_>, CompileError> {
    Parser::new(source, ".")?.parse_program()
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, module_dir: impl Into<PathBuf>) -> Result<Self, CompileError> {
        Ok(Self {
            tokens: TokenStream::new(source)?,
            imported: HashSet::new(),
            module_dir: module_dir.into(),
        })
    }

    pub fn parse_program(&mut self) -> Result<Module<'src>, CompileError> {
        let mut stmts = Vec::new();
        while self.tokens.valid() {
            if self.tokens.peek(TokenKind::KwImport) {
                stmts.extend(self.parse_import()?);
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // ── Imports ──────────────────────────────────────────────────────

    fn parse_import(&mut self) -> Result<Vec<Stmt<'src>>, CompileError> {
        self.tokens.consume_only(TokenKind::KwImport)?;
        let path_token = self.tokens.consume_only(TokenKind::Str)?;
        self.tokens.consume_only(TokenKind::Semicolon)?;

        let path = self.module_dir.join(path_token.text);
        let canonical = path.canonicalize().map_err(|_| {
            self.tokens
                .error_at(path_token, format!("could not find module '{}'", path_token.text))
        })?;
        if !self.imported.insert(canonical) {
            return Ok(Vec::new());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            self.tokens
                .error_at(path_token, format!("could not read module '{}': {}", path_token.text, e))
        })?;
        // The module's tokens borrow its source, so the buffer must
        // live as long as the main program's.
        let source: &'static str = Box::leak(text.into_boxed_str());
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut sub = Parser {
            tokens: TokenStream::new(source)?,
            imported: std::mem::take(&mut self.imported),
            module_dir: dir,
        };
        let stmts = sub.parse_program();
        self.imported = sub.imported;
        stmts
    }

    // ── Statements ───────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.curr();
        match token.kind {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwLoop => self.parse_loop(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwStruct => self.parse_struct(),
            TokenKind::KwFn if self.tokens.peek_next(TokenKind::Identifier) => {
                self.parse_function()
            }
            TokenKind::KwBreak => {
                self.tokens.consume()?;
                self.tokens.consume_only(TokenKind::Semicolon)?;
                Ok(Stmt {
                    token,
                    kind: StmtKind::Break,
                })
            }
            TokenKind::KwContinue => {
                self.tokens.consume()?;
                self.tokens.consume_only(TokenKind::Semicolon)?;
                Ok(Stmt {
                    token,
                    kind: StmtKind::Continue,
                })
            }
            TokenKind::KwReturn => {
                self.tokens.consume()?;
                let value = if self.tokens.peek(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.tokens.consume_only(TokenKind::Semicolon)?;
                Ok(Stmt {
                    token,
                    kind: StmtKind::Return { value },
                })
            }
            TokenKind::KwAssert => {
                self.tokens.consume()?;
                let condition = self.parse_expression()?;
                self.tokens.consume_only(TokenKind::Semicolon)?;
                Ok(Stmt {
                    token,
                    kind: StmtKind::Assert { condition },
                })
            }
            TokenKind::KwDelete => {
                self.tokens.consume()?;
                let value = self.parse_expression()?;
                self.tokens.consume_only(TokenKind::Semicolon)?;
                Ok(Stmt {
                    token,
                    kind: StmtKind::Delete { value },
                })
            }
            TokenKind::Identifier if self.tokens.peek_next(TokenKind::ColonEqual) => {
                self.parse_inferred_declaration()
            }
            TokenKind::Identifier if self.tokens.peek_next(TokenKind::Colon) => {
                self.parse_annotated_declaration()
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_block(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while self.tokens.valid() && !self.tokens.peek(TokenKind::RBrace) {
            stmts.push(self.parse_statement()?);
        }
        self.tokens.consume_only(TokenKind::RBrace)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Block(stmts),
        })
    }

    fn parse_if(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwIf)?;
        let condition = self.parse_expression()?;
        let then_body = Box::new(self.parse_block()?);
        let else_body = if self.tokens.consume_maybe(TokenKind::KwElse)? {
            if self.tokens.peek(TokenKind::KwIf) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(Stmt {
            token,
            kind: StmtKind::If {
                condition,
                then_body,
                else_body,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwWhile)?;
        let condition = self.parse_expression()?;
        let body = Box::new(self.parse_block()?);
        Ok(Stmt {
            token,
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwLoop)?;
        let body = Box::new(self.parse_block()?);
        Ok(Stmt {
            token,
            kind: StmtKind::Loop { body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwFor)?;
        let var = self.tokens.consume_only(TokenKind::Identifier)?.text;
        self.tokens.consume_only(TokenKind::KwIn)?;
        let iter = self.parse_expression()?;
        let body = Box::new(self.parse_block()?);
        Ok(Stmt {
            token,
            kind: StmtKind::For { var, iter, body },
        })
    }

    fn parse_function(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwFn)?;
        let name = self.tokens.consume_only(TokenKind::Identifier)?.text;

        self.tokens.consume_only(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.comma_separated(TokenKind::RParen, |p| {
            let param_token = p.tokens.consume_only(TokenKind::Identifier)?;
            p.tokens.consume_only(TokenKind::Colon)?;
            let type_ann = p.parse_expression()?;
            params.push(Param {
                token: param_token,
                name: param_token.text,
                type_ann,
            });
            Ok(())
        })?;

        let return_type = if self.tokens.consume_maybe(TokenKind::Arrow)? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let body = Box::new(self.parse_block()?);
        Ok(Stmt {
            token,
            kind: StmtKind::Function {
                name,
                params,
                return_type,
                body,
            },
        })
    }

    fn parse_struct(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwStruct)?;
        let name = self.tokens.consume_only(TokenKind::Identifier)?.text;
        self.tokens.consume_only(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        while self.tokens.valid() && !self.tokens.peek(TokenKind::RBrace) {
            let field_token = self.tokens.consume_only(TokenKind::Identifier)?;
            self.tokens.consume_only(TokenKind::Colon)?;
            let type_ann = self.parse_expression()?;
            self.tokens.consume_only(TokenKind::Semicolon)?;
            fields.push(FieldDef {
                token: field_token,
                name: field_token.text,
                type_ann,
            });
        }
        self.tokens.consume_only(TokenKind::RBrace)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Struct { name, fields },
        })
    }

    fn parse_inferred_declaration(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Identifier)?;
        self.tokens.consume_only(TokenKind::ColonEqual)?;
        let value = self.parse_expression()?;
        self.tokens.consume_only(TokenKind::Semicolon)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Declaration {
                name: token.text,
                type_ann: None,
                value: Some(value),
            },
        })
    }

    fn parse_annotated_declaration(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Identifier)?;
        self.tokens.consume_only(TokenKind::Colon)?;
        let type_ann = self.parse_expression()?;
        let value = if self.tokens.consume_maybe(TokenKind::Equal)? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.tokens.consume_only(TokenKind::Semicolon)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Declaration {
                name: token.text,
                type_ann: Some(type_ann),
                value,
            },
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt<'src>, CompileError> {
        let token = self.tokens.curr();
        let expr = self.parse_expression()?;
        if self.tokens.consume_maybe(TokenKind::Equal)? {
            let value = self.parse_expression()?;
            self.tokens.consume_only(TokenKind::Semicolon)?;
            return Ok(Stmt {
                token,
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
            });
        }
        self.tokens.consume_only(TokenKind::Semicolon)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Expression(expr),
        })
    }

    // ── Pratt expression parser ──────────────────────────────────────

    pub fn parse_expression(&mut self) -> Result<Expr<'src>, CompileError> {
        self.parse_precedence(Prec::Or)
    }

    fn parse_precedence(&mut self, prec: Prec) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.curr();
        let Some(prefix) = get_rule(token.kind).prefix else {
            return Err(self.tokens.error_at(token, "expected an expression"));
        };
        let mut node = prefix(self)?;
        while prec <= get_rule(self.tokens.curr().kind).prec {
            let Some(midfix) = get_rule(self.tokens.curr().kind).midfix else {
                break;
            };
            node = midfix(self, node)?;
        }
        Ok(node)
    }

    // ── Prefix rules ─────────────────────────────────────────────────

    fn parse_i32(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Int32)?;
        let value = numeric_prefix(token.text)
            .parse::<i32>()
            .map_err(|_| self.number_error(token))?;
        Ok(Expr {
            token,
            kind: ExprKind::I32Lit(value),
        })
    }

    fn parse_i64(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Int64)?;
        let value = numeric_prefix(token.text)
            .parse::<i64>()
            .map_err(|_| self.number_error(token))?;
        Ok(Expr {
            token,
            kind: ExprKind::I64Lit(value),
        })
    }

    fn parse_u64(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Uint64)?;
        let value = numeric_prefix(token.text)
            .parse::<u64>()
            .map_err(|_| self.number_error(token))?;
        Ok(Expr {
            token,
            kind: ExprKind::U64Lit(value),
        })
    }

    fn parse_f64(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Float64)?;
        let value = numeric_prefix(token.text)
            .parse::<f64>()
            .map_err(|_| self.number_error(token))?;
        Ok(Expr {
            token,
            kind: ExprKind::F64Lit(value),
        })
    }

    fn number_error(&self, token: Token<'src>) -> CompileError {
        self.tokens.error_at(
            token,
            format!("cannot convert '{}' to '{}'", token.text, token.kind),
        )
    }

    fn parse_char(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Character)?;
        Ok(Expr {
            token,
            kind: ExprKind::CharLit(token.text.as_bytes()[0]),
        })
    }

    fn parse_string(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Str)?;
        Ok(Expr {
            token,
            kind: ExprKind::StringLit(token.text),
        })
    }

    fn parse_true(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwTrue)?;
        Ok(Expr {
            token,
            kind: ExprKind::BoolLit(true),
        })
    }

    fn parse_false(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwFalse)?;
        Ok(Expr {
            token,
            kind: ExprKind::BoolLit(false),
        })
    }

    fn parse_null(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwNull)?;
        Ok(Expr {
            token,
            kind: ExprKind::NullLit,
        })
    }

    fn parse_nullptr(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwNullptr)?;
        Ok(Expr {
            token,
            kind: ExprKind::NullptrLit,
        })
    }

    fn parse_name(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume()?;
        Ok(Expr {
            token,
            kind: ExprKind::Name(token.text),
        })
    }

    fn parse_grouping(&mut self) -> Result<Expr<'src>, CompileError> {
        self.tokens.consume_only(TokenKind::LParen)?;
        let node = self.parse_expression()?;
        self.tokens.consume_only(TokenKind::RParen)?;
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume()?;
        let expr = Box::new(self.parse_precedence(Prec::Unary)?);
        Ok(Expr {
            token,
            kind: ExprKind::Unary { expr },
        })
    }

    fn parse_typeof(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwTypeof)?;
        self.tokens.consume_only(TokenKind::LParen)?;
        let expr = Box::new(self.parse_expression()?);
        self.tokens.consume_only(TokenKind::RParen)?;
        Ok(Expr {
            token,
            kind: ExprKind::TypeOf { expr },
        })
    }

    fn parse_sizeof(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwSizeof)?;
        self.tokens.consume_only(TokenKind::LParen)?;
        let expr = Box::new(self.parse_expression()?);
        self.tokens.consume_only(TokenKind::RParen)?;
        Ok(Expr {
            token,
            kind: ExprKind::SizeOf { expr },
        })
    }

    /// `[a, b, c]` or the repeat form `[value; count]`.
    fn parse_array(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::LBracket)?;
        let first = self.parse_expression()?;

        if self.tokens.consume_maybe(TokenKind::Semicolon)? {
            let count = self.parse_count()?;
            self.tokens.consume_only(TokenKind::RBracket)?;
            return Ok(Expr {
                token,
                kind: ExprKind::Repeat {
                    value: Box::new(first),
                    count,
                },
            });
        }

        let mut elements = vec![first];
        if !self.tokens.consume_maybe(TokenKind::RBracket)? {
            self.tokens.consume_only(TokenKind::Comma)?;
            self.comma_separated(TokenKind::RBracket, |p| {
                elements.push(p.parse_expression()?);
                Ok(())
            })?;
        }
        Ok(Expr {
            token,
            kind: ExprKind::Array { elements },
        })
    }

    /// The count of a repeat array must be an integer literal. Plain
    /// integer literals are accepted alongside `u64`-suffixed ones;
    /// anything else fails through `consume_u64`.
    fn parse_count(&mut self) -> Result<u64, CompileError> {
        if self.tokens.peek(TokenKind::Int64) {
            return Ok(self.tokens.consume_i64()? as u64);
        }
        self.tokens.consume_u64()
    }

    /// `fn(T, ...) -> T` — a function pointer type expression.
    fn parse_fn_ptr_type(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwFn)?;
        self.tokens.consume_only(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.comma_separated(TokenKind::RParen, |p| {
            params.push(p.parse_expression()?);
            Ok(())
        })?;
        self.tokens.consume_only(TokenKind::Arrow)?;
        let return_type = Box::new(self.parse_expression()?);
        Ok(Expr {
            token,
            kind: ExprKind::FnPtrType {
                params,
                return_type,
            },
        })
    }

    /// `new T` or `new T[n]`. The operand parses at call precedence, so
    /// a trailing subscript becomes the allocation count.
    fn parse_new(&mut self) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwNew)?;
        let operand = self.parse_precedence(Prec::Call)?;
        let (type_ann, count) = match operand.kind {
            ExprKind::Subscript { expr, index } => (expr, Some(index)),
            _ => (Box::new(operand), None),
        };
        Ok(Expr {
            token,
            kind: ExprKind::New { type_ann, count },
        })
    }

    // ── Midfix rules ─────────────────────────────────────────────────

    fn parse_binary(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume()?;
        let right = self.parse_precedence(get_rule(token.kind).prec.next())?;
        Ok(Expr {
            token,
            kind: ExprKind::Binary {
                lhs: Box::new(left),
                rhs: Box::new(right),
            },
        })
    }

    /// A call, with an optional `!(...)` template-argument prefix.
    fn parse_call(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.curr();
        let mut template_args = Vec::new();
        if self.tokens.consume_maybe(TokenKind::Bang)? {
            self.tokens.consume_only(TokenKind::LParen)?;
            self.comma_separated(TokenKind::RParen, |p| {
                template_args.push(p.parse_expression()?);
                Ok(())
            })?;
        }
        self.tokens.consume_only(TokenKind::LParen)?;
        let mut args = Vec::new();
        self.comma_separated(TokenKind::RParen, |p| {
            args.push(p.parse_expression()?);
            Ok(())
        })?;
        Ok(Expr {
            token,
            kind: ExprKind::Call {
                callee: Box::new(left),
                template_args,
                args,
            },
        })
    }

    /// `e[i]`, the empty span `e[]`, or the slice `e[a:b]`.
    fn parse_subscript(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::LBracket)?;

        if self.tokens.consume_maybe(TokenKind::RBracket)? {
            return Ok(Expr {
                token,
                kind: ExprKind::SpanOf {
                    expr: Box::new(left),
                    bounds: None,
                },
            });
        }

        let first = self.parse_expression()?;
        let node = if self.tokens.consume_maybe(TokenKind::Colon)? {
            let upper = self.parse_expression()?;
            Expr {
                token,
                kind: ExprKind::SpanOf {
                    expr: Box::new(left),
                    bounds: Some((Box::new(first), Box::new(upper))),
                },
            }
        } else {
            Expr {
                token,
                kind: ExprKind::Subscript {
                    expr: Box::new(left),
                    index: Box::new(first),
                },
            }
        };
        self.tokens.consume_only(TokenKind::RBracket)?;
        Ok(node)
    }

    /// Field access, or a member call when the name is followed by an
    /// argument list.
    fn parse_dot(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Dot)?;
        let name = self.tokens.consume_only(TokenKind::Identifier)?.text;

        if self.tokens.peek(TokenKind::LParen) || self.tokens.peek(TokenKind::Bang) {
            let mut template_args = Vec::new();
            if self.tokens.consume_maybe(TokenKind::Bang)? {
                self.tokens.consume_only(TokenKind::LParen)?;
                self.comma_separated(TokenKind::RParen, |p| {
                    template_args.push(p.parse_expression()?);
                    Ok(())
                })?;
            }
            self.tokens.consume_only(TokenKind::LParen)?;
            let mut args = Vec::new();
            self.comma_separated(TokenKind::RParen, |p| {
                args.push(p.parse_expression()?);
                Ok(())
            })?;
            return Ok(Expr {
                token,
                kind: ExprKind::MemberCall {
                    receiver: Box::new(left),
                    name,
                    template_args,
                    args,
                },
            });
        }

        Ok(Expr {
            token,
            kind: ExprKind::Field {
                expr: Box::new(left),
                name,
            },
        })
    }

    fn parse_at(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::At)?;
        Ok(Expr {
            token,
            kind: ExprKind::Deref {
                expr: Box::new(left),
            },
        })
    }

    fn parse_ampersand(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::Ampersand)?;
        Ok(Expr {
            token,
            kind: ExprKind::AddrOf {
                expr: Box::new(left),
            },
        })
    }

    fn parse_const(&mut self, left: Expr<'src>) -> Result<Expr<'src>, CompileError> {
        let token = self.tokens.consume_only(TokenKind::KwConst)?;
        Ok(Expr {
            token,
            kind: ExprKind::Const {
                expr: Box::new(left),
            },
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn comma_separated(
        &mut self,
        end: TokenKind,
        mut f: impl FnMut(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        if self.tokens.consume_maybe(end)? {
            return Ok(());
        }
        loop {
            f(self)?;
            if self.tokens.consume_maybe(end)? {
                return Ok(());
            }
            self.tokens.consume_only(TokenKind::Comma)?;
            // Allow a trailing comma.
            if self.tokens.consume_maybe(end)? {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module<'_> {
        parse(source).expect("parse error")
    }

    fn first_expr<'src>(module: &'src Module<'src>) -> &'src Expr<'src> {
        match &module[0].kind {
            StmtKind::Expression(e) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_declaration_forms() {
        let module = parse_ok("x := 1; y: i64 = 2; z: i64;");
        assert_eq!(module.len(), 3);
        assert!(matches!(
            module[0].kind,
            StmtKind::Declaration {
                type_ann: None,
                value: Some(_),
                ..
            }
        ));
        assert!(matches!(
            module[1].kind,
            StmtKind::Declaration {
                type_ann: Some(_),
                value: Some(_),
                ..
            }
        ));
        assert!(matches!(
            module[2].kind,
            StmtKind::Declaration {
                type_ann: Some(_),
                value: None,
                ..
            }
        ));
    }

    #[test]
    fn test_binary_precedence() {
        let module = parse_ok("1 + 2 * 3;");
        let expr = first_expr(&module);
        // Add at the top, Mul underneath on the right.
        let ExprKind::Binary { rhs, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(expr.token.kind, TokenKind::Plus);
        assert_eq!(rhs.token.kind, TokenKind::Star);
    }

    #[test]
    fn test_left_associativity() {
        let module = parse_ok("1 - 2 - 3;");
        let expr = first_expr(&module);
        // ((1 - 2) - 3)
        let ExprKind::Binary { lhs, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(lhs.token.kind, TokenKind::Minus);
    }

    #[test]
    fn test_comparison_and_logic() {
        let module = parse_ok("a < b && c == d || e;");
        let expr = first_expr(&module);
        assert_eq!(expr.token.kind, TokenKind::BarBar);
    }

    #[test]
    fn test_unary_binds_tighter_than_term() {
        let module = parse_ok("-a + b;");
        let expr = first_expr(&module);
        assert_eq!(expr.token.kind, TokenKind::Plus);
        let ExprKind::Binary { lhs, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(lhs.kind, ExprKind::Unary { .. }));
    }

    #[test]
    fn test_postfix_addr_and_deref() {
        let module = parse_ok("p@ = x&;");
        let StmtKind::Assign { target, value } = &module[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, ExprKind::Deref { .. }));
        assert!(matches!(value.kind, ExprKind::AddrOf { .. }));
    }

    #[test]
    fn test_array_literals() {
        let module = parse_ok("[1, 2, 3]; [0; 8];");
        let ExprKind::Array { elements } = &first_expr(&module).kind else {
            panic!("expected array");
        };
        assert_eq!(elements.len(), 3);
        let StmtKind::Expression(e) = &module[1].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::Repeat { count: 8, .. }));
    }

    #[test]
    fn test_repeat_count_accepts_u64_suffix() {
        let module = parse_ok("[0; 4u64];");
        let StmtKind::Expression(e) = &module[0].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::Repeat { count: 4, .. }));
    }

    #[test]
    fn test_repeat_count_must_be_an_integer_literal() {
        let err = parse("[0; x];").unwrap_err();
        assert!(err.message.contains("expected u64, got 'identifier'"));
    }

    #[test]
    fn test_subscript_span_and_slice() {
        let module = parse_ok("x[1]; x[]; x[1:3];");
        assert!(matches!(
            first_expr(&module).kind,
            ExprKind::Subscript { .. }
        ));
        let StmtKind::Expression(e) = &module[1].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::SpanOf { bounds: None, .. }));
        let StmtKind::Expression(e) = &module[2].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::SpanOf { bounds: Some(_), .. }));
    }

    #[test]
    fn test_function_definition() {
        let module = parse_ok("fn add(a: i64, b: i64) -> i64 { return a + b; }");
        let StmtKind::Function {
            name,
            params,
            return_type,
            ..
        } = &module[0].kind
        else {
            panic!("expected function");
        };
        assert_eq!(*name, "add");
        assert_eq!(params.len(), 2);
        assert!(return_type.is_some());
    }

    #[test]
    fn test_struct_definition() {
        let module = parse_ok("struct vec2 { x: f64; y: f64; }");
        let StmtKind::Struct { name, fields } = &module[0].kind else {
            panic!("expected struct");
        };
        assert_eq!(*name, "vec2");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_member_call_and_field() {
        let module = parse_ok("v.length(); v.x;");
        let StmtKind::Expression(e) = &module[0].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::MemberCall { .. }));
        let StmtKind::Expression(e) = &module[1].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::Field { .. }));
    }

    #[test]
    fn test_new_and_delete() {
        let module = parse_ok("p := new i64; q := new i64[8]; delete p;");
        let StmtKind::Declaration { value: Some(v), .. } = &module[0].kind else {
            panic!();
        };
        assert!(matches!(v.kind, ExprKind::New { count: None, .. }));
        let StmtKind::Declaration { value: Some(v), .. } = &module[1].kind else {
            panic!();
        };
        assert!(matches!(v.kind, ExprKind::New { count: Some(_), .. }));
        assert!(matches!(module[2].kind, StmtKind::Delete { .. }));
    }

    #[test]
    fn test_fn_ptr_type_expression() {
        let module = parse_ok("f: fn(i64) -> i64 = g;");
        let StmtKind::Declaration {
            type_ann: Some(t), ..
        } = &module[0].kind
        else {
            panic!();
        };
        assert!(matches!(t.kind, ExprKind::FnPtrType { .. }));
    }

    #[test]
    fn test_typeof_and_sizeof() {
        let module = parse_ok("x: typeof(y) = y; n := sizeof(x);");
        assert!(matches!(
            module[0].kind,
            StmtKind::Declaration {
                type_ann: Some(Expr {
                    kind: ExprKind::TypeOf { .. },
                    ..
                }),
                ..
            }
        ));
    }

    #[test]
    fn test_control_flow() {
        let module = parse_ok(
            "while x < 10 { x = x + 1; } loop { break; } for v in xs { continue; } \
             if a { } else if b { } else { }",
        );
        assert!(matches!(module[0].kind, StmtKind::While { .. }));
        assert!(matches!(module[1].kind, StmtKind::Loop { .. }));
        assert!(matches!(module[2].kind, StmtKind::For { .. }));
        assert!(matches!(module[3].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_template_call_syntax() {
        let module = parse_ok("f!(i64)(x);");
        let StmtKind::Expression(e) = &module[0].kind else {
            panic!();
        };
        let ExprKind::Call { template_args, args, .. } = &e.kind else {
            panic!("expected call");
        };
        assert_eq!(template_args.len(), 1);
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_missing_semicolon_is_an_error() {
        assert!(parse("x := 1").is_err());
    }

    #[test]
    fn test_expected_expression_error() {
        let err = parse("x := ;").unwrap_err();
        assert!(err.message.contains("expected an expression"));
    }

    #[test]
    fn test_numeric_literal_values() {
        let module = parse_ok("42; 42u64; 42i32; 9.0f64;");
        assert!(matches!(first_expr(&module).kind, ExprKind::I64Lit(42)));
        let StmtKind::Expression(e) = &module[1].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::U64Lit(42)));
        let StmtKind::Expression(e) = &module[2].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::I32Lit(42)));
        let StmtKind::Expression(e) = &module[3].kind else {
            panic!();
        };
        assert!(matches!(e.kind, ExprKind::F64Lit(v) if v == 9.0));
    }
}
