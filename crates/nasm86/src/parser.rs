//! Parser: token stream → AST statements.
//!
//! Statement kinds: label definitions (`name:`), instructions with optional
//! `lock`/`rep`/`repne` prefixes, data defines (`db`/`dw`/`dd`), `times`,
//! `equ` constants, and the compiler options `org`, `bits`, and `cpu`
//! (bracketed NASM-primitive form or bare).
//!
//! Local labels (leading `.`) are composed against the most recent
//! non-local label at parse time, both at definition and at reference
//! sites, so the rest of the pipeline only ever sees absolute names.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{AsmError, Span};
use crate::expr::{self, EvalOutcome};
use crate::ir::{
    ArgToken, ArgTokenKind, BranchHint, ConstDef, Cpu, DataDecl, DataItem, InstructionNode,
    Mode, Prefix, Register, Statement, TimesNode,
};
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into statements.
///
/// Parsing recovers at line boundaries: a malformed statement is recorded
/// and the parser resumes at the next line, so all syntax errors of a file
/// surface in one run.
///
/// # Errors
///
/// `AsmError::Multiple` with every statement-level error, or the error
/// itself when there is exactly one.
pub fn parse(tokens: &[Token<'_>]) -> Result<Vec<Statement>, AsmError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        parent_label: None,
    };
    let mut statements = Vec::new();
    let mut errors = Vec::new();

    while !parser.at_end() {
        if parser.skip_separators() {
            break;
        }
        match parser.parse_statement() {
            Ok(stmt) => statements.push(stmt),
            Err(err) => {
                errors.push(err);
                parser.skip_to_next_line();
            }
        }
    }

    if errors.is_empty() {
        Ok(statements)
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(AsmError::Multiple { errors })
    }
}

struct Parser<'t, 'src> {
    tokens: &'t [Token<'src>],
    pos: usize,
    parent_label: Option<String>,
}

impl<'t, 'src> Parser<'t, 'src> {
    fn peek(&self) -> &Token<'src> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, n: usize) -> Option<&Token<'src>> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> &Token<'src> {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    /// Skip newline separators; returns true at end of input.
    fn skip_separators(&mut self) -> bool {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }
        self.at_end()
    }

    fn skip_to_next_line(&mut self) {
        while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            self.advance();
        }
    }

    // ── statements ─────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Statement, AsmError> {
        // Bracketed primitive directive: [bits 16], [org 0x7C00], [cpu 186].
        if matches!(self.peek().kind, TokenKind::OpenBracket) {
            return self.parse_bracketed_directive();
        }

        let tok = self.peek().clone();
        let TokenKind::Ident = tok.kind else {
            return Err(AsmError::Syntax {
                msg: alloc::format!("unexpected token '{}'", tok.text()),
                span: tok.span,
            });
        };

        // Label definition: `name:`, possibly followed by another
        // statement on the same line.
        if self
            .peek_at(1)
            .is_some_and(|t| t.kind == TokenKind::Colon)
        {
            let name = self.compose_label_def(tok.text(), tok.span)?;
            self.advance();
            self.advance();
            return Ok(Statement::Label {
                name,
                span: tok.span,
            });
        }

        // `name equ expr`
        if self
            .peek_at(1)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text().eq_ignore_ascii_case("equ"))
        {
            return self.parse_equ();
        }

        let word = lower(tok.text());
        match word.as_str() {
            "org" | "bits" | "cpu" => {
                self.advance();
                self.parse_directive_body(&word, tok.span)
            }
            "db" => self.parse_data(1),
            "dw" => self.parse_data(2),
            "dd" => self.parse_data(4),
            "times" => self.parse_times(),
            _ => self.parse_instruction(),
        }
    }

    fn parse_bracketed_directive(&mut self) -> Result<Statement, AsmError> {
        let open = self.advance().clone();
        let name_tok = self.advance().clone();
        let TokenKind::Ident = name_tok.kind else {
            return Err(AsmError::Syntax {
                msg: String::from("expected directive name after '['"),
                span: open.span,
            });
        };
        let word = lower(name_tok.text());
        let stmt = self.parse_directive_body(&word, name_tok.span)?;
        let close = self.advance().clone();
        if close.kind != TokenKind::CloseBracket {
            return Err(AsmError::Syntax {
                msg: String::from("expected ']' after directive"),
                span: close.span,
            });
        }
        Ok(stmt)
    }

    /// Collect expression tokens up to the end of the directive (newline,
    /// end of input, or the closing bracket of a primitive directive).
    fn collect_expr_tokens(&mut self) -> Result<Vec<ArgToken>, AsmError> {
        let mut out = Vec::new();
        while !matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Eof | TokenKind::CloseBracket
        ) {
            let tok = self.advance().clone();
            out.push(self.arg_token(&tok)?);
        }
        Ok(out)
    }

    /// The value part of `org`/`bits`/`cpu` (mnemonic already consumed).
    fn parse_directive_body(&mut self, word: &str, span: Span) -> Result<Statement, AsmError> {
        let value_tokens = self.collect_expr_tokens()?;
        let value = match expr::evaluate(&value_tokens, span, None)? {
            EvalOutcome::Value(v) => v,
            EvalOutcome::Unresolved(name) => {
                return Err(AsmError::IncorrectExpression {
                    detail: alloc::format!("'{}' is not a constant", name),
                    span,
                });
            }
        };
        match word {
            "org" => {
                if value < 0 {
                    return Err(AsmError::UnsupportedCompilerMode {
                        detail: alloc::format!("negative origin {}", value),
                        span,
                    });
                }
                Ok(Statement::Org {
                    origin: value as u64,
                    span,
                })
            }
            "bits" => {
                let mode = match value {
                    16 => Mode::Bits16,
                    32 => Mode::Bits32,
                    other => {
                        return Err(AsmError::UnsupportedCompilerMode {
                            detail: alloc::format!("bits {}", other),
                            span,
                        });
                    }
                };
                Ok(Statement::Bits { mode, span })
            }
            "cpu" => {
                let cpu = match value {
                    8086 | 8088 => Cpu::I8086,
                    186 | 80186 => Cpu::I80186,
                    386 | 80386 => Cpu::I80386,
                    486 | 80486 => Cpu::I80486,
                    other => {
                        return Err(AsmError::UnsupportedCompilerMode {
                            detail: alloc::format!("cpu {}", other),
                            span,
                        });
                    }
                };
                Ok(Statement::Target { cpu, span })
            }
            other => Err(AsmError::Syntax {
                msg: alloc::format!("unknown directive '{}'", other),
                span,
            }),
        }
    }

    fn parse_equ(&mut self) -> Result<Statement, AsmError> {
        let name_tok = self.advance().clone();
        let name = name_tok.text().to_string();
        self.advance(); // equ

        let mut exprs: Vec<Vec<ArgToken>> = Vec::new();
        let mut current: Vec<ArgToken> = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            let tok = self.advance().clone();
            if tok.kind == TokenKind::Comma {
                exprs.push(core::mem::take(&mut current));
                continue;
            }
            current.push(self.arg_token(&tok)?);
        }
        if !current.is_empty() {
            exprs.push(current);
        }
        if exprs.len() != 1 {
            return Err(AsmError::IncorrectEquArgsCount {
                count: exprs.len(),
                span: name_tok.span,
            });
        }
        Ok(Statement::Const(ConstDef {
            name,
            expr: exprs.remove(0),
            span: name_tok.span,
        }))
    }

    fn parse_data(&mut self, unit: u8) -> Result<Statement, AsmError> {
        let kw = self.advance().clone();
        let mut items = Vec::new();
        let mut current: Vec<ArgToken> = Vec::new();
        let mut saw_any = false;

        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::Comma => {
                    self.advance();
                    if current.is_empty() {
                        return Err(AsmError::Syntax {
                            msg: String::from("empty data item"),
                            span: tok.span,
                        });
                    }
                    items.push(DataItem::Expr(core::mem::take(&mut current)));
                }
                TokenKind::Str(ref bytes) => {
                    self.advance();
                    if !current.is_empty() {
                        return Err(AsmError::Syntax {
                            msg: String::from("string literal inside expression"),
                            span: tok.span,
                        });
                    }
                    items.push(DataItem::Str(bytes.clone()));
                    saw_any = true;
                    // Expect a comma or end of line next.
                    if matches!(self.peek().kind, TokenKind::Comma) {
                        self.advance();
                    }
                }
                _ => {
                    let tok = self.advance().clone();
                    current.push(self.arg_token(&tok)?);
                    saw_any = true;
                }
            }
        }
        if !current.is_empty() {
            items.push(DataItem::Expr(current));
        }
        if !saw_any {
            return Err(AsmError::Syntax {
                msg: String::from("data directive needs at least one value"),
                span: kw.span,
            });
        }
        Ok(Statement::Data(DataDecl {
            unit,
            items,
            span: kw.span,
        }))
    }

    fn parse_times(&mut self) -> Result<Statement, AsmError> {
        let kw = self.advance().clone();

        // The repeat count is the longest token run that still reads as an
        // expression; the first value token that cannot continue one starts
        // the repeated statement.
        let mut count: Vec<ArgToken> = Vec::new();
        let mut expect_value = true;
        while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            let tok = self.peek().clone();
            let is_value = matches!(tok.kind, TokenKind::Number(_) | TokenKind::Ident);
            let is_operator = matches!(
                tok.kind,
                TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash
            );
            if expect_value && is_value {
                // A register name cannot be part of a repeat count.
                if tok.kind == TokenKind::Ident && Register::parse(tok.text()).is_some() {
                    break;
                }
                let tok = self.advance().clone();
                count.push(self.arg_token(&tok)?);
                expect_value = false;
            } else if !expect_value && is_operator {
                let tok = self.advance().clone();
                count.push(self.arg_token(&tok)?);
                expect_value = true;
            } else {
                break;
            }
        }
        if count.is_empty() || expect_value {
            return Err(AsmError::IncorrectTimesValue {
                value: 0,
                span: kw.span,
            });
        }

        if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            return Err(AsmError::Syntax {
                msg: String::from("'times' needs a statement to repeat"),
                span: kw.span,
            });
        }
        let inner = self.parse_statement()?;
        Ok(Statement::Times(TimesNode {
            count,
            inner: Box::new(inner),
            span: kw.span,
        }))
    }

    fn parse_instruction(&mut self) -> Result<Statement, AsmError> {
        let mut prefixes = Vec::new();
        let mut tok = self.advance().clone();
        let mut span = tok.span;

        // Prefix keywords precede the mnemonic.
        while let Some(prefix) = Prefix::parse(&lower(tok.text())) {
            if prefixes.len() >= 4 {
                return Err(AsmError::Syntax {
                    msg: String::from("too many instruction prefixes"),
                    span: tok.span,
                });
            }
            prefixes.push(prefix);
            if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                return Err(AsmError::Syntax {
                    msg: alloc::format!("prefix '{}' needs an instruction", tok.text()),
                    span: tok.span,
                });
            }
            tok = self.advance().clone();
            span = tok.span;
        }
        let TokenKind::Ident = tok.kind else {
            return Err(AsmError::Syntax {
                msg: alloc::format!("expected instruction mnemonic, got '{}'", tok.text()),
                span: tok.span,
            });
        };
        let mnemonic = lower(tok.text());

        let mut args = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            let tok = self.advance().clone();
            args.push(self.arg_token(&tok)?);
        }

        Ok(Statement::Instruction(InstructionNode {
            mnemonic,
            prefixes,
            args,
            span,
        }))
    }

    // ── token conversion ───────────────────────────────────

    /// Convert a lexer token into an owned operand token, refining keyword
    /// identifiers into registers, size overrides, and branch hints, and
    /// composing local label references.
    fn arg_token(&self, tok: &Token<'src>) -> Result<ArgToken, AsmError> {
        let kind = match &tok.kind {
            TokenKind::Number(n) => ArgTokenKind::Number(*n),
            TokenKind::Str(bytes) => ArgTokenKind::Str(bytes.clone()),
            TokenKind::Comma => ArgTokenKind::Comma,
            TokenKind::Colon => ArgTokenKind::Colon,
            TokenKind::Plus => ArgTokenKind::Plus,
            TokenKind::Minus => ArgTokenKind::Minus,
            TokenKind::Star => ArgTokenKind::Star,
            TokenKind::Slash => ArgTokenKind::Slash,
            TokenKind::OpenBracket => ArgTokenKind::OpenBracket,
            TokenKind::CloseBracket => ArgTokenKind::CloseBracket,
            TokenKind::Ident => {
                let word = lower(tok.text());
                if let Some(reg) = Register::parse(&word) {
                    ArgTokenKind::Register(reg)
                } else if let Some(hint) = BranchHint::parse(&word) {
                    ArgTokenKind::Branch(hint)
                } else {
                    match word.as_str() {
                        "byte" => ArgTokenKind::SizeOverride(1),
                        "word" => ArgTokenKind::SizeOverride(2),
                        "dword" => ArgTokenKind::SizeOverride(4),
                        _ => {
                            let name = self.compose_label_ref(tok.text(), tok.span)?;
                            return Ok(ArgToken {
                                kind: ArgTokenKind::Ident,
                                text: name,
                                span: tok.span,
                            });
                        }
                    }
                }
            }
            TokenKind::Newline | TokenKind::Eof => {
                return Err(AsmError::Syntax {
                    msg: String::from("unexpected end of statement"),
                    span: tok.span,
                });
            }
        };
        Ok(ArgToken {
            kind,
            text: tok.text().to_string(),
            span: tok.span,
        })
    }

    // ── local labels ───────────────────────────────────────

    fn compose_label_def(&mut self, name: &str, span: Span) -> Result<String, AsmError> {
        if let Some(rest) = name.strip_prefix('.') {
            let _ = rest;
            let parent = self.parent_label.as_ref().ok_or(AsmError::MissingParentLabel {
                label: name.to_string(),
                span,
            })?;
            Ok(alloc::format!("{}{}", parent, name))
        } else {
            self.parent_label = Some(name.to_string());
            Ok(name.to_string())
        }
    }

    fn compose_label_ref(&self, name: &str, span: Span) -> Result<String, AsmError> {
        if name.starts_with('.') {
            let parent = self.parent_label.as_ref().ok_or(AsmError::MissingParentLabel {
                label: name.to_string(),
                span,
            })?;
            Ok(alloc::format!("{}{}", parent, name))
        } else {
            Ok(name.to_string())
        }
    }
}

fn lower(s: &str) -> String {
    s.to_ascii_lowercase()
}
