//! Constant-expression evaluation over operand tokens.
//!
//! Expressions are compiled to a small RPN program (shunting-yard) and then
//! executed against a value stack. Identifier references go through an
//! optional resolver; an unknown identifier is not a hard error here — it
//! yields [`EvalOutcome::Unresolved`] so the layout engine can retry on a
//! later pass once labels have addresses.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{AsmError, Span};
use crate::ir::{ArgToken, ArgTokenKind};

/// Result of evaluating a constant expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// The expression folded to a value.
    Value(i64),
    /// The expression references a symbol the resolver cannot supply (yet).
    /// Carries the first unresolved name for diagnostics.
    Unresolved(String),
}

/// A symbol resolver: name → value, or `None` when unknown.
///
/// Plain closures coerce to this; the layout engine supplies one backed by
/// its constant and label tables.
pub type Resolver<'a> = dyn Fn(&str) -> Option<i64> + 'a;

/// One instruction of the compiled RPN program.
#[derive(Debug, Clone, PartialEq)]
enum RpnOp {
    Push(i64),
    PushSym(String),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
}

/// Binary operator precedence (higher binds tighter).
fn precedence(op: &RpnOp) -> u8 {
    match op {
        RpnOp::Mul | RpnOp::Div => 2,
        RpnOp::Add | RpnOp::Sub => 1,
        RpnOp::Neg => 3,
        _ => 0,
    }
}

/// Compile an operand-token expression into RPN.
///
/// Accepts numbers, identifiers, `+ - * /`, and unary `+`/`-`.
fn compile(tokens: &[ArgToken], span: Span) -> Result<Vec<RpnOp>, AsmError> {
    if tokens.is_empty() {
        return Err(AsmError::IncorrectExpression {
            detail: String::from("empty expression"),
            span,
        });
    }

    let mut program = Vec::with_capacity(tokens.len());
    let mut ops: Vec<RpnOp> = Vec::new();
    // True when the next token must be a value (start, or after an operator).
    let mut expect_value = true;

    for tok in tokens {
        match &tok.kind {
            ArgTokenKind::Number(n) if expect_value => {
                program.push(RpnOp::Push(*n));
                expect_value = false;
            }
            ArgTokenKind::Ident if expect_value => {
                program.push(RpnOp::PushSym(tok.text.clone()));
                expect_value = false;
            }
            ArgTokenKind::Plus if expect_value => {
                // Unary plus: no effect.
            }
            ArgTokenKind::Minus if expect_value => {
                while ops.last().is_some_and(|top| precedence(top) >= 3) {
                    program.push(ops.pop().unwrap_or(RpnOp::Neg));
                }
                ops.push(RpnOp::Neg);
            }
            ArgTokenKind::Plus | ArgTokenKind::Minus | ArgTokenKind::Star | ArgTokenKind::Slash
                if !expect_value =>
            {
                let op = match tok.kind {
                    ArgTokenKind::Plus => RpnOp::Add,
                    ArgTokenKind::Minus => RpnOp::Sub,
                    ArgTokenKind::Star => RpnOp::Mul,
                    _ => RpnOp::Div,
                };
                while ops.last().is_some_and(|top| precedence(top) >= precedence(&op)) {
                    program.push(ops.pop().unwrap_or(RpnOp::Add));
                }
                ops.push(op);
                expect_value = true;
            }
            _ => {
                return Err(AsmError::IncorrectExpression {
                    detail: alloc::format!("unexpected token '{}'", describe(tok)),
                    span: tok.span,
                });
            }
        }
    }

    if expect_value {
        return Err(AsmError::IncorrectExpression {
            detail: String::from("expression ends with an operator"),
            span,
        });
    }
    while let Some(op) = ops.pop() {
        program.push(op);
    }
    Ok(program)
}

/// Human-readable token description for diagnostics.
fn describe(tok: &ArgToken) -> String {
    match &tok.kind {
        ArgTokenKind::Register(r) => r.name().to_string(),
        ArgTokenKind::Str(_) => String::from("string"),
        _ if !tok.text.is_empty() => tok.text.clone(),
        ArgTokenKind::Comma => String::from(","),
        ArgTokenKind::Colon => String::from(":"),
        ArgTokenKind::OpenBracket => String::from("["),
        ArgTokenKind::CloseBracket => String::from("]"),
        _ => String::from("?"),
    }
}

/// Evaluate an operand-token expression.
///
/// With no resolver, any identifier makes the result
/// [`EvalOutcome::Unresolved`]; with a resolver, only identifiers the
/// resolver does not know do.
///
/// # Errors
///
/// Returns `AsmError::IncorrectExpression` for malformed expressions and
/// division by zero.
pub fn evaluate(
    tokens: &[ArgToken],
    span: Span,
    resolver: Option<&Resolver<'_>>,
) -> Result<EvalOutcome, AsmError> {
    let program = compile(tokens, span)?;
    let mut stack: Vec<i64> = Vec::with_capacity(4);

    for op in &program {
        match op {
            RpnOp::Push(n) => stack.push(*n),
            RpnOp::PushSym(name) => {
                match resolver.and_then(|r| r(name)) {
                    Some(v) => stack.push(v),
                    None => return Ok(EvalOutcome::Unresolved(name.clone())),
                }
            }
            RpnOp::Neg => {
                let v = pop(&mut stack, span)?;
                stack.push(v.wrapping_neg());
            }
            RpnOp::Add => {
                let r = pop(&mut stack, span)?;
                let l = pop(&mut stack, span)?;
                stack.push(l.wrapping_add(r));
            }
            RpnOp::Sub => {
                let r = pop(&mut stack, span)?;
                let l = pop(&mut stack, span)?;
                stack.push(l.wrapping_sub(r));
            }
            RpnOp::Mul => {
                let r = pop(&mut stack, span)?;
                let l = pop(&mut stack, span)?;
                stack.push(l.wrapping_mul(r));
            }
            RpnOp::Div => {
                let r = pop(&mut stack, span)?;
                let l = pop(&mut stack, span)?;
                if r == 0 {
                    return Err(AsmError::IncorrectExpression {
                        detail: String::from("division by zero"),
                        span,
                    });
                }
                stack.push(l.wrapping_div(r));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(v), true) => Ok(EvalOutcome::Value(v)),
        _ => Err(AsmError::IncorrectExpression {
            detail: String::from("expression does not reduce to a single value"),
            span,
        }),
    }
}

fn pop(stack: &mut Vec<i64>, span: Span) -> Result<i64, AsmError> {
    stack.pop().ok_or(AsmError::IncorrectExpression {
        detail: String::from("operator is missing an operand"),
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn num(n: i64) -> ArgToken {
        ArgToken {
            kind: ArgTokenKind::Number(n),
            text: alloc::format!("{}", n),
            span: Span::dummy(),
        }
    }

    fn ident(name: &str) -> ArgToken {
        ArgToken {
            kind: ArgTokenKind::Ident,
            text: name.into(),
            span: Span::dummy(),
        }
    }

    fn op(kind: ArgTokenKind, text: &str) -> ArgToken {
        ArgToken {
            kind,
            text: text.into(),
            span: Span::dummy(),
        }
    }

    fn eval(tokens: &[ArgToken]) -> EvalOutcome {
        evaluate(tokens, Span::dummy(), None).unwrap()
    }

    #[test]
    fn single_number() {
        assert_eq!(eval(&[num(42)]), EvalOutcome::Value(42));
    }

    #[test]
    fn precedence_mul_over_add() {
        // 2 + 3 * 4 = 14
        let toks = vec![
            num(2),
            op(ArgTokenKind::Plus, "+"),
            num(3),
            op(ArgTokenKind::Star, "*"),
            num(4),
        ];
        assert_eq!(eval(&toks), EvalOutcome::Value(14));
    }

    #[test]
    fn left_associative_sub() {
        // 10 - 4 - 3 = 3
        let toks = vec![
            num(10),
            op(ArgTokenKind::Minus, "-"),
            num(4),
            op(ArgTokenKind::Minus, "-"),
            num(3),
        ];
        assert_eq!(eval(&toks), EvalOutcome::Value(3));
    }

    #[test]
    fn unary_minus() {
        let toks = vec![op(ArgTokenKind::Minus, "-"), num(7)];
        assert_eq!(eval(&toks), EvalOutcome::Value(-7));
        // 5 * -2 = -10
        let toks = vec![
            num(5),
            op(ArgTokenKind::Star, "*"),
            op(ArgTokenKind::Minus, "-"),
            num(2),
        ];
        assert_eq!(eval(&toks), EvalOutcome::Value(-10));
    }

    #[test]
    fn division() {
        let toks = vec![num(510), op(ArgTokenKind::Slash, "/"), num(2)];
        assert_eq!(eval(&toks), EvalOutcome::Value(255));
    }

    #[test]
    fn division_by_zero_is_error() {
        let toks = vec![num(1), op(ArgTokenKind::Slash, "/"), num(0)];
        let err = evaluate(&toks, Span::dummy(), None).unwrap_err();
        assert_eq!(err.code(), "INCORRECT_EXPRESSION");
    }

    #[test]
    fn unresolved_symbol_without_resolver() {
        let toks = vec![ident("msg"), op(ArgTokenKind::Plus, "+"), num(2)];
        assert_eq!(eval(&toks), EvalOutcome::Unresolved("msg".into()));
    }

    #[test]
    fn resolver_supplies_symbols() {
        let toks = vec![ident("msg"), op(ArgTokenKind::Plus, "+"), num(2)];
        let resolver = |name: &str| (name == "msg").then_some(0x7C10_i64);
        let got = evaluate(&toks, Span::dummy(), Some(&resolver)).unwrap();
        assert_eq!(got, EvalOutcome::Value(0x7C12));
    }

    #[test]
    fn resolver_miss_is_unresolved() {
        let toks = vec![ident("other")];
        let resolver = |name: &str| (name == "msg").then_some(1_i64);
        let got = evaluate(&toks, Span::dummy(), Some(&resolver)).unwrap();
        assert_eq!(got, EvalOutcome::Unresolved("other".into()));
    }

    #[test]
    fn empty_expression_is_error() {
        let err = evaluate(&[], Span::dummy(), None).unwrap_err();
        assert_eq!(err.code(), "INCORRECT_EXPRESSION");
    }

    #[test]
    fn trailing_operator_is_error() {
        let toks = vec![num(1), op(ArgTokenKind::Plus, "+")];
        let err = evaluate(&toks, Span::dummy(), None).unwrap_err();
        assert_eq!(err.code(), "INCORRECT_EXPRESSION");
    }

    #[test]
    fn register_in_expression_is_error() {
        let toks = vec![ArgToken {
            kind: ArgTokenKind::Register(crate::ir::Register::Ax),
            text: "ax".into(),
            span: Span::dummy(),
        }];
        let err = evaluate(&toks, Span::dummy(), None).unwrap_err();
        assert_eq!(err.code(), "INCORRECT_EXPRESSION");
    }
}
