//! Per-instruction operand parsing.
//!
//! Consumes the raw token span between the mnemonic and end of line, split
//! by commas at the top level, and produces typed [`Operand`]s. This runs
//! once per layout pass: without a resolver on the first pass (labels stay
//! symbolic, memory displacements may come back unresolved), and with the
//! resolver installed on later passes.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{AsmError, Span};
use crate::expr::{self, EvalOutcome, Resolver};
use crate::ir::{
    ArgToken, ArgTokenKind, BranchHint, Imm, InstructionNode, Mode, Operand,
};
use crate::mem;

/// Mnemonics whose operands legitimately differ in size, exempt from the
/// mixed-size upcast/mismatch rule (`shl ax, cl`, `movzx ax, bl`, `out
/// 0x60, al`, `les ax, [bx]`, …).
const SIZE_RULE_EXEMPT: &[&str] = &[
    "shl", "sal", "shr", "sar", "rol", "ror", "rcl", "rcr", "in", "out", "movzx", "movsx",
    "les", "lds", "lea",
];

/// The parsed operand list of one instruction, plus the flags the layout
/// engine tracks across passes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOperands {
    /// The typed operands, in source order.
    pub ops: Vec<Operand>,
    /// Branch-addressing hint (`short`/`near`/`far`), if present.
    pub hint: Option<BranchHint>,
    /// Some operand is still a symbolic label reference.
    pub has_labels: bool,
    /// Some memory displacement could not be folded yet.
    pub has_unresolved_mem: bool,
    /// First symbol that failed to resolve (diagnostics).
    pub pending: Option<String>,
}

/// Parse the instruction's raw operand tokens.
///
/// # Errors
///
/// Operand-shape and size errors per the operand rules; expression errors
/// from the RPN evaluator; memory-phrase errors from the memory parser.
pub fn parse_operands(
    instr: &InstructionNode,
    mode: Mode,
    resolver: Option<&Resolver<'_>>,
) -> Result<ParsedOperands, AsmError> {
    let mut tokens = &instr.args[..];
    let mut out = ParsedOperands {
        ops: Vec::new(),
        hint: None,
        has_labels: false,
        has_unresolved_mem: false,
        pending: None,
    };

    // Branch-addressing keyword, if present, leads the operand list.
    if let Some(first) = tokens.first() {
        if let ArgTokenKind::Branch(hint) = first.kind {
            out.hint = Some(hint);
            tokens = &tokens[1..];
        }
    }

    for segment in split_top_level_commas(tokens, instr.span)? {
        let op = parse_one(segment, instr.span, mode, resolver, &mut out)?;
        out.ops.push(op);
    }

    // A segmented immediate defaults the branch form to far.
    if out.hint.is_none()
        && out
            .ops
            .iter()
            .any(|op| matches!(op, Operand::SegImm { .. }))
    {
        out.hint = Some(BranchHint::Far);
    }

    deduce_mem_sizes(instr, &mut out.ops)?;
    if !SIZE_RULE_EXEMPT.contains(&instr.mnemonic.as_str()) {
        apply_size_rule(instr, mode, &mut out.ops)?;
    }

    Ok(out)
}

/// Split the operand tokens at top-level commas (commas inside `[]` would
/// be malformed anyway, but depth is tracked for robustness).
fn split_top_level_commas<'t>(
    tokens: &'t [ArgToken],
    span: Span,
) -> Result<Vec<&'t [ArgToken]>, AsmError> {
    let mut segments = Vec::new();
    if tokens.is_empty() {
        return Ok(segments);
    }
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            ArgTokenKind::OpenBracket => depth += 1,
            ArgTokenKind::CloseBracket => {
                depth = depth.checked_sub(1).ok_or(AsmError::Syntax {
                    msg: String::from("unbalanced ']'"),
                    span: tok.span,
                })?;
            }
            ArgTokenKind::Comma if depth == 0 => {
                if start == i {
                    return Err(AsmError::Syntax {
                        msg: String::from("empty operand"),
                        span: tok.span,
                    });
                }
                segments.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start >= tokens.len() {
        return Err(AsmError::Syntax {
            msg: String::from("trailing comma in operand list"),
            span,
        });
    }
    segments.push(&tokens[start..]);
    Ok(segments)
}

fn parse_one(
    segment: &[ArgToken],
    instr_span: Span,
    mode: Mode,
    resolver: Option<&Resolver<'_>>,
    out: &mut ParsedOperands,
) -> Result<Operand, AsmError> {
    let mut rest = segment;

    // Sticky size override for this operand. After `near`/`far` the
    // override names the whole segment:offset pair, hence the doubling.
    let mut cast: Option<u8> = None;
    if let Some(first) = rest.first() {
        if let ArgTokenKind::SizeOverride(n) = first.kind {
            let factor = match out.hint {
                Some(BranchHint::Near) | Some(BranchHint::Far) => 2,
                _ => 1,
            };
            cast = Some(n * factor);
            rest = &rest[1..];
        }
    }

    let Some(first) = rest.first() else {
        return Err(AsmError::Syntax {
            msg: String::from("empty operand"),
            span: instr_span,
        });
    };

    // Register operand.
    if rest.len() == 1 {
        if let ArgTokenKind::Register(reg) = first.kind {
            return Ok(Operand::Reg(reg));
        }
    }

    // Memory pointer.
    if first.kind == ArgTokenKind::OpenBracket {
        let last = rest.last().filter(|t| t.kind == ArgTokenKind::CloseBracket);
        if last.is_none() {
            return Err(AsmError::Syntax {
                msg: String::from("expected ']' at end of memory operand"),
                span: first.span,
            });
        }
        let inner = &rest[1..rest.len() - 1];
        let parsed = mem::parse_mem_phrase(inner, first.span, resolver)?;
        let mut mem_op = parsed.mem;
        mem_op.size = cast;
        out.has_labels |= parsed.pending.is_some();
        out.has_unresolved_mem |= mem_op.unresolved;
        if out.pending.is_none() {
            out.pending = parsed.pending;
        }
        return Ok(Operand::Mem(mem_op));
    }

    // Quoted string, packed little-endian.
    if rest.len() == 1 {
        if let ArgTokenKind::Str(bytes) = &first.kind {
            if bytes.is_empty() || bytes.len() > 8 {
                return Err(AsmError::Syntax {
                    msg: String::from("string operand must be 1 to 8 characters"),
                    span: first.span,
                });
            }
            let mut value: i64 = 0;
            for (i, b) in bytes.iter().enumerate() {
                value |= i64::from(*b) << (8 * i);
            }
            let mut imm = Imm::from_value(value);
            imm.size = bytes.len() as u8;
            if let Some(c) = cast {
                return casted_imm(value, c, first.span);
            }
            return Ok(Operand::Imm(imm));
        }
    }

    // Segmented immediate: `segexpr : offexpr` at top level.
    if let Some(colon) = rest
        .iter()
        .position(|t| t.kind == ArgTokenKind::Colon)
    {
        let (seg_toks, off_toks) = (&rest[..colon], &rest[colon + 1..]);
        if seg_toks.is_empty() || off_toks.is_empty() {
            return Err(AsmError::IncorrectSegmentedMemFormat { span: first.span });
        }
        let seg = eval_half(seg_toks, first.span, resolver, out)?;
        let off = eval_half(off_toks, first.span, resolver, out)?;
        if seg.size > 2 {
            return Err(AsmError::IncorrectSegmentMemArgSize {
                size: seg.size,
                span: first.span,
            });
        }
        let off_max = match cast {
            Some(pair) if pair >= 2 => pair / 2,
            Some(bad) => {
                return Err(AsmError::IncorrectOffsetMemArgSize {
                    size: bad,
                    span: first.span,
                });
            }
            None => 2,
        };
        if off.size > off_max {
            return Err(AsmError::OffsetMemArgSizeExceedingSize {
                size: off.size,
                max: off_max,
                span: first.span,
            });
        }
        return Ok(Operand::SegImm { seg, off });
    }

    // Everything else is a constant expression: a plain number, a label
    // reference, or arithmetic over both.
    match expr::evaluate(rest, first.span, resolver)? {
        EvalOutcome::Value(v) => match cast {
            Some(c) => casted_imm(v, c, first.span),
            None => Ok(Operand::Imm(Imm::from_value(v))),
        },
        EvalOutcome::Unresolved(name) => {
            out.has_labels = true;
            if out.pending.is_none() {
                out.pending = Some(name.clone());
            }
            Ok(Operand::Label { name, cast })
        }
    }
}

/// Evaluate one half of a `seg:off` pair.
fn eval_half(
    tokens: &[ArgToken],
    span: Span,
    resolver: Option<&Resolver<'_>>,
    out: &mut ParsedOperands,
) -> Result<Imm, AsmError> {
    match expr::evaluate(tokens, span, resolver) {
        Ok(EvalOutcome::Value(v)) => Ok(Imm::from_value(v)),
        Ok(EvalOutcome::Unresolved(name)) => {
            // Placeholder until a later pass can supply the symbol.
            out.has_labels = true;
            if out.pending.is_none() {
                out.pending = Some(name);
            }
            let mut imm = Imm::from_value(0);
            imm.size = 2;
            imm.signed_size = 2;
            Ok(imm)
        }
        Err(_) => Err(AsmError::IncorrectSegmentedMemFormat { span }),
    }
}

/// Build an explicitly casted immediate, validating the value fits.
fn casted_imm(value: i64, cast: u8, span: Span) -> Result<Operand, AsmError> {
    let fits = match cast {
        1 => (-0x80..=0xFF).contains(&value),
        2 => (-0x8000..=0xFFFF).contains(&value),
        4 => i64::from(i32::MIN) <= value && value <= i64::from(u32::MAX),
        _ => false,
    };
    if !fits {
        return Err(AsmError::ExceedingCastedNumberSize {
            value,
            size: cast,
            span,
        });
    }
    Ok(Operand::Imm(Imm::with_size(value, cast)))
}

/// Give size-less memory operands the size of a sibling register operand;
/// fail when another operand exists but cannot supply one.
fn deduce_mem_sizes(instr: &InstructionNode, ops: &mut [Operand]) -> Result<(), AsmError> {
    if ops.len() < 2 {
        return Ok(());
    }
    let reg_size = ops.iter().find_map(|op| match op {
        Operand::Reg(r) if !r.is_x87() => Some(r.size_bytes()),
        _ => None,
    });
    if SIZE_RULE_EXEMPT.contains(&instr.mnemonic.as_str()) {
        return Ok(());
    }
    for op in ops.iter_mut() {
        if let Operand::Mem(mem_op) = op {
            if mem_op.size.is_none() {
                match reg_size {
                    Some(size) => mem_op.size = Some(size),
                    None => {
                        return Err(AsmError::MissingMemOperandSize { span: instr.span });
                    }
                }
            }
        }
    }
    Ok(())
}

/// The mixed-size rule: upcast a smaller implicit immediate to the sibling
/// operand's size, and reject register/memory size disagreements.
fn apply_size_rule(
    instr: &InstructionNode,
    mode: Mode,
    ops: &mut [Operand],
) -> Result<(), AsmError> {
    for i in 1..ops.len() {
        let (head, tail) = ops.split_at_mut(i);
        let prev = &mut head[i - 1];
        let cur = &mut tail[0];

        // Labels resolve later; segmented pairs have their own size rules.
        if matches!(prev, Operand::Label { .. } | Operand::SegImm { .. })
            || matches!(cur, Operand::Label { .. } | Operand::SegImm { .. })
        {
            continue;
        }
        let (Some(a), Some(b)) = (prev.byte_size(mode), cur.byte_size(mode)) else {
            continue;
        };
        if a == b {
            continue;
        }

        match (&mut *prev, &mut *cur) {
            (_, Operand::Imm(imm)) if b < a && !imm.explicit => imm.upcast(a),
            (Operand::Imm(imm), _) if a < b && !imm.explicit => imm.upcast(b),
            _ => {
                return Err(AsmError::OperandSizesMismatch {
                    left: a,
                    right: b,
                    span: instr.span,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Register;
    use alloc::vec;

    fn instr(mnemonic: &str, args: Vec<ArgToken>) -> InstructionNode {
        InstructionNode {
            mnemonic: mnemonic.into(),
            prefixes: vec![],
            args,
            span: Span::dummy(),
        }
    }

    fn reg(r: Register) -> ArgToken {
        ArgToken {
            kind: ArgTokenKind::Register(r),
            text: r.name().into(),
            span: Span::dummy(),
        }
    }

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

    fn tok(kind: ArgTokenKind) -> ArgToken {
        ArgToken {
            kind,
            text: String::new(),
            span: Span::dummy(),
        }
    }

    fn parse(node: &InstructionNode) -> ParsedOperands {
        parse_operands(node, Mode::Bits16, None).unwrap()
    }

    #[test]
    fn register_and_number() {
        let node = instr("mov", vec![reg(Register::Ax), tok(ArgTokenKind::Comma), num(2)]);
        let got = parse(&node);
        assert_eq!(got.ops[0], Operand::Reg(Register::Ax));
        // The immediate is upcast to the register's 16-bit size.
        let Operand::Imm(imm) = &got.ops[1] else {
            panic!("expected immediate")
        };
        assert_eq!((imm.value, imm.size), (2, 2));
    }

    #[test]
    fn byte_override_is_sticky_for_one_operand() {
        let node = instr(
            "mov",
            vec![
                tok(ArgTokenKind::OpenBracket),
                num(0),
                tok(ArgTokenKind::CloseBracket),
                tok(ArgTokenKind::Comma),
                reg(Register::Ax),
            ],
        );
        let mut args = vec![tok(ArgTokenKind::SizeOverride(1))];
        args.extend(node.args.clone());
        let node2 = instr("mov", args);
        let got = parse_operands(&node2, Mode::Bits16, None);
        // byte [0], ax → the override pins the memory size to 1, which then
        // mismatches ax.
        assert_eq!(got.unwrap_err().code(), "OPERAND_SIZES_MISMATCH");
    }

    #[test]
    fn mem_size_deduced_from_register() {
        let node = instr(
            "mov",
            vec![
                tok(ArgTokenKind::OpenBracket),
                num(0),
                tok(ArgTokenKind::CloseBracket),
                tok(ArgTokenKind::Comma),
                reg(Register::Ax),
            ],
        );
        let got = parse(&node);
        let Operand::Mem(mem_op) = &got.ops[0] else {
            panic!("expected memory operand")
        };
        assert_eq!(mem_op.size, Some(2));
    }

    #[test]
    fn mem_size_underdetermined_is_rejected() {
        let node = instr(
            "mov",
            vec![
                tok(ArgTokenKind::OpenBracket),
                num(0),
                tok(ArgTokenKind::CloseBracket),
                tok(ArgTokenKind::Comma),
                num(1),
            ],
        );
        let err = parse_operands(&node, Mode::Bits16, None).unwrap_err();
        assert_eq!(err.code(), "MISSING_MEM_OPERAND_SIZE");
    }

    #[test]
    fn branch_hint_is_consumed() {
        let node = instr(
            "jmp",
            vec![
                ArgToken {
                    kind: ArgTokenKind::Branch(BranchHint::Short),
                    text: "short".into(),
                    span: Span::dummy(),
                },
                ident("start"),
            ],
        );
        let got = parse(&node);
        assert_eq!(got.hint, Some(BranchHint::Short));
        assert!(got.has_labels);
        assert_eq!(
            got.ops[0],
            Operand::Label {
                name: "start".into(),
                cast: None
            }
        );
    }

    #[test]
    fn segmented_immediate_defaults_to_far() {
        let node = instr(
            "jmp",
            vec![num(0xFFFF), tok(ArgTokenKind::Colon), num(0)],
        );
        let got = parse(&node);
        assert_eq!(got.hint, Some(BranchHint::Far));
        let Operand::SegImm { seg, off } = &got.ops[0] else {
            panic!("expected segmented operand")
        };
        assert_eq!((seg.value, off.value), (0xFFFF, 0));
    }

    #[test]
    fn word_override_after_far_names_the_pair() {
        // In `call far word 0x1234:0x5678` the override counts the whole
        // 4-byte pair, so a 2-byte offset still fits.
        let node = instr(
            "call",
            vec![
                ArgToken {
                    kind: ArgTokenKind::Branch(BranchHint::Far),
                    text: "far".into(),
                    span: Span::dummy(),
                },
                tok(ArgTokenKind::SizeOverride(2)),
                num(0x1234),
                tok(ArgTokenKind::Colon),
                num(0x5678),
            ],
        );
        let got = parse(&node);
        assert!(matches!(got.ops[0], Operand::SegImm { .. }));
    }

    #[test]
    fn quoted_string_packs_little_endian() {
        let node = instr(
            "mov",
            vec![
                reg(Register::Ax),
                tok(ArgTokenKind::Comma),
                tok(ArgTokenKind::Str(b"ab".to_vec())),
            ],
        );
        let got = parse(&node);
        let Operand::Imm(imm) = &got.ops[1] else {
            panic!("expected immediate")
        };
        assert_eq!(imm.value, 0x6261);
        assert_eq!(imm.size, 2);
    }

    #[test]
    fn oversized_cast_is_rejected() {
        let node = instr(
            "mov",
            vec![
                reg(Register::Al),
                tok(ArgTokenKind::Comma),
                tok(ArgTokenKind::SizeOverride(1)),
                num(0x1234),
            ],
        );
        let err = parse_operands(&node, Mode::Bits16, None).unwrap_err();
        assert_eq!(err.code(), "EXCEEDING_CASTED_NUMBER_SIZE");
    }

    #[test]
    fn reg_reg_size_mismatch_is_rejected() {
        let node = instr("mov", vec![reg(Register::Bx), tok(ArgTokenKind::Comma), reg(Register::Al)]);
        let err = parse_operands(&node, Mode::Bits16, None).unwrap_err();
        assert_eq!(err.code(), "OPERAND_SIZES_MISMATCH");
    }

    #[test]
    fn shift_by_cl_is_exempt_from_size_rule() {
        let node = instr("shl", vec![reg(Register::Ax), tok(ArgTokenKind::Comma), reg(Register::Cl)]);
        let got = parse(&node);
        assert_eq!(got.ops.len(), 2);
    }

    #[test]
    fn label_arithmetic_stays_symbolic_without_resolver() {
        let node = instr(
            "mov",
            vec![
                reg(Register::Ax),
                tok(ArgTokenKind::Comma),
                ident("msg"),
                tok(ArgTokenKind::Plus),
                num(1),
            ],
        );
        let got = parse(&node);
        assert!(got.has_labels);
        assert!(matches!(&got.ops[1], Operand::Label { name, .. } if name == "msg"));
    }

    #[test]
    fn label_arithmetic_resolves_with_resolver() {
        let node = instr(
            "mov",
            vec![
                reg(Register::Ax),
                tok(ArgTokenKind::Comma),
                ident("msg"),
                tok(ArgTokenKind::Plus),
                num(1),
            ],
        );
        let resolver = |name: &str| (name == "msg").then_some(0x7C10_i64);
        let got = parse_operands(&node, Mode::Bits16, Some(&resolver)).unwrap();
        let Operand::Imm(imm) = &got.ops[1] else {
            panic!("expected immediate")
        };
        assert_eq!(imm.value, 0x7C11);
    }

    #[test]
    fn trailing_comma_is_rejected() {
        let node = instr("mov", vec![reg(Register::Ax), tok(ArgTokenKind::Comma)]);
        let err = parse_operands(&node, Mode::Bits16, None).unwrap_err();
        assert_eq!(err.code(), "SYNTAX_ERROR");
    }

    #[test]
    fn no_operands_is_fine() {
        let node = instr("nop", vec![]);
        let got = parse(&node);
        assert!(got.ops.is_empty());
        assert_eq!(got.hint, None);
    }
}
