//! Memory-expression resolution: the phrase inside `[…]`.
//!
//! Reduces the token phrase to a [`MemOperand`]: an optional leading
//! segment override (`es:`), at most one `reg*scale` product, up to two
//! standalone registers (base, then index), and a residual arithmetic
//! expression that the RPN evaluator folds into the displacement.
//!
//! An unknown identifier in the displacement is not fatal: without a
//! resolver the operand is returned with `unresolved` set and a pessimistic
//! wide displacement, to be re-parsed once labels have addresses.

use alloc::string::ToString;
use alloc::vec::Vec;

use crate::error::{AsmError, Span};
use crate::expr::{self, EvalOutcome, Resolver};
use crate::ir::{ArgToken, ArgTokenKind, MemOperand, Register, signed_width, unsigned_width};

/// Outcome of parsing a memory phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMem {
    /// The reduced operand.
    pub mem: MemOperand,
    /// First unresolved symbol name, when `mem.unresolved` is set.
    pub pending: Option<alloc::string::String>,
}

/// One `+`/`-`-separated term of the phrase.
struct Term<'t> {
    negative: bool,
    tokens: &'t [ArgToken],
    span: Span,
}

/// Parse the tokens between `[` and `]` into a memory operand.
///
/// # Errors
///
/// A non-segment register before `:`, a second scale product, a scale
/// outside {1, 2, 4, 8}, more than two registers, and malformed residual
/// expressions are all rejected.
pub fn parse_mem_phrase(
    tokens: &[ArgToken],
    span: Span,
    resolver: Option<&Resolver<'_>>,
) -> Result<ParsedMem, AsmError> {
    let mut mem = MemOperand::default();
    let mut rest = tokens;

    // Leading segment override: `sreg :`.
    if let [first, second, ..] = rest {
        if second.kind == ArgTokenKind::Colon {
            let ArgTokenKind::Register(reg) = first.kind else {
                return Err(AsmError::IncorrectMemExpression { span: first.span });
            };
            if !reg.is_segment() {
                return Err(AsmError::RegisterIsNotSegmentReg {
                    register: reg.name().to_string(),
                    span: first.span,
                });
            }
            mem.sreg = Some(reg);
            rest = &rest[2..];
        }
    }
    if rest.is_empty() {
        return Err(AsmError::IncorrectMemExpression { span });
    }

    // Split into +/- separated terms; a stray colon is malformed here.
    let mut terms: Vec<Term<'_>> = Vec::new();
    let mut negative = false;
    let mut start = 0;
    let mut i = 0;
    while i <= rest.len() {
        let boundary = i == rest.len()
            || matches!(rest[i].kind, ArgTokenKind::Plus | ArgTokenKind::Minus);
        // `*`/`/` never separate terms, and a leading sign makes an empty slice.
        if boundary {
            if start < i {
                terms.push(Term {
                    negative,
                    tokens: &rest[start..i],
                    span: rest[start].span,
                });
            }
            if i < rest.len() {
                negative = rest[i].kind == ArgTokenKind::Minus;
                start = i + 1;
            }
        }
        if i < rest.len() && rest[i].kind == ArgTokenKind::Colon {
            return Err(AsmError::IncorrectMemExpression { span: rest[i].span });
        }
        i += 1;
    }
    if terms.is_empty() {
        return Err(AsmError::IncorrectMemExpression { span });
    }

    // Classify the terms.
    let mut residual: Vec<ArgToken> = Vec::new();
    let mut scale_seen = false;
    for term in &terms {
        match classify(term)? {
            TermKind::Register(reg) => {
                if term.negative {
                    return Err(AsmError::IncorrectMemExpression { span: term.span });
                }
                if mem.base.is_none() {
                    mem.base = Some(reg);
                } else if mem.index.is_none() {
                    mem.index = Some(reg);
                } else {
                    return Err(AsmError::IncorrectMemExpression { span: term.span });
                }
            }
            TermKind::Scaled(reg, scale) => {
                if term.negative {
                    return Err(AsmError::IncorrectMemExpression { span: term.span });
                }
                if scale_seen {
                    return Err(AsmError::ScaleIsAlreadyDefined { span: term.span });
                }
                scale_seen = true;
                if !matches!(scale, 1 | 2 | 4 | 8) {
                    return Err(AsmError::IncorrectScale {
                        scale,
                        span: term.span,
                    });
                }
                if mem.index.is_some() {
                    return Err(AsmError::IncorrectMemExpression { span: term.span });
                }
                mem.index = Some(reg);
                mem.scale = scale as u8;
            }
            TermKind::Expr => {
                if !residual.is_empty() || term.negative {
                    residual.push(ArgToken {
                        kind: if term.negative {
                            ArgTokenKind::Minus
                        } else {
                            ArgTokenKind::Plus
                        },
                        text: alloc::string::String::new(),
                        span: term.span,
                    });
                }
                residual.extend_from_slice(term.tokens);
            }
        }
    }

    // A scaled product with two standalone registers already present has no
    // index slot left; `classify` caught reg*reg, this catches reg+reg+reg.
    let mut pending = None;
    if !residual.is_empty() {
        match expr::evaluate(&residual, span, resolver)? {
            EvalOutcome::Value(v) => {
                mem.disp = v;
                mem.disp_size = unsigned_width(v);
                mem.signed_disp_size = signed_width(v);
            }
            EvalOutcome::Unresolved(name) => {
                mem.unresolved = true;
                mem.disp = 0;
                mem.disp_size = 2;
                mem.signed_disp_size = 2;
                pending = Some(name);
            }
        }
    }

    Ok(ParsedMem { mem, pending })
}

enum TermKind {
    Register(Register),
    Scaled(Register, i64),
    Expr,
}

/// Classify one term: a lone register, a `reg*num`/`num*reg` product, or a
/// constant sub-expression for the RPN evaluator.
fn classify(term: &Term<'_>) -> Result<TermKind, AsmError> {
    match term.tokens {
        [tok] => match tok.kind {
            ArgTokenKind::Register(reg) => Ok(TermKind::Register(reg)),
            _ => Ok(TermKind::Expr),
        },
        [a, star, b] if star.kind == ArgTokenKind::Star => {
            match (&a.kind, &b.kind) {
                (ArgTokenKind::Register(reg), ArgTokenKind::Number(n)) => {
                    Ok(TermKind::Scaled(*reg, *n))
                }
                (ArgTokenKind::Number(n), ArgTokenKind::Register(reg)) => {
                    Ok(TermKind::Scaled(*reg, *n))
                }
                (ArgTokenKind::Register(_), ArgTokenKind::Register(_)) => {
                    Err(AsmError::IncorrectScaleMemParams { span: star.span })
                }
                _ => Ok(TermKind::Expr),
            }
        }
        toks => {
            // Longer products: any register inside a multi-token term is
            // only valid as part of a two-factor scale product.
            if toks
                .iter()
                .any(|t| matches!(t.kind, ArgTokenKind::Register(_)))
            {
                Err(AsmError::IncorrectMemExpression { span: term.span })
            } else {
                Ok(TermKind::Expr)
            }
        }
    }
}
