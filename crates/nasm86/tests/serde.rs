//! Serde round-trip tests for `nasm86` IR and error types.

#![cfg(feature = "serde")]

use nasm86::{
    ArgToken, ArgTokenKind, AsmError, BranchHint, Cpu, DataDecl, DataItem, Imm, InstructionNode,
    MemOperand, Mode, Operand, Prefix, Register, Span, Statement, TimesNode,
};

/// Helper: serialize to JSON, deserialize back, assert equality.
fn round_trip<T>(val: &T)
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + core::fmt::Debug,
{
    let json = serde_json::to_string(val).expect("serialize");
    let back: T = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(val, &back, "round-trip mismatch for JSON: {json}");
}

// ─── Span / errors ──────────────────────────────────────────────────────

#[test]
fn serde_span() {
    round_trip(&Span::new(1, 5, 10, 3));
    round_trip(&Span::default());
}

#[test]
fn serde_errors() {
    round_trip(&AsmError::UnknownOperation {
        mnemonic: "blorp".into(),
        span: Span::new(2, 1, 10, 5),
    });
    round_trip(&AsmError::DisplacementExceedingByteSize {
        displacement: 0x1_0000,
        size: 2,
        span: Span::dummy(),
    });
    round_trip(&AsmError::Multiple {
        errors: vec![AsmError::OriginRedefined { span: Span::dummy() }],
    });
}

// ─── Registers and modes ────────────────────────────────────────────────

#[test]
fn serde_register_samples() {
    for reg in [
        Register::Al,
        Register::Ax,
        Register::Esi,
        Register::Cs,
        Register::St7,
    ] {
        round_trip(&reg);
    }
}

#[test]
fn serde_modes() {
    round_trip(&Mode::Bits16);
    round_trip(&Mode::Bits32);
    round_trip(&Cpu::I8086);
    round_trip(&Cpu::I80486);
    round_trip(&BranchHint::Far);
    round_trip(&Prefix::Repne);
}

// ─── Operands ───────────────────────────────────────────────────────────

#[test]
fn serde_operands() {
    round_trip(&Operand::Reg(Register::Bx));
    round_trip(&Operand::Imm(Imm::from_value(0x1234)));
    round_trip(&Operand::Label {
        name: "start".into(),
        cast: Some(2),
    });
    round_trip(&Operand::SegImm {
        seg: Imm::from_value(0xFFFF),
        off: Imm::from_value(0),
    });
    round_trip(&Operand::Mem(MemOperand {
        sreg: Some(Register::Es),
        base: Some(Register::Bx),
        index: Some(Register::Si),
        disp: -4,
        disp_size: 1,
        signed_disp_size: 1,
        size: Some(2),
        ..MemOperand::default()
    }));
}

// ─── Statements ─────────────────────────────────────────────────────────

fn arg(kind: ArgTokenKind, text: &str) -> ArgToken {
    ArgToken {
        kind,
        text: text.into(),
        span: Span::dummy(),
    }
}

#[test]
fn serde_statements() {
    round_trip(&Statement::Label {
        name: "start".into(),
        span: Span::new(1, 1, 0, 5),
    });
    round_trip(&Statement::Org {
        origin: 0x7C00,
        span: Span::dummy(),
    });
    round_trip(&Statement::Instruction(InstructionNode {
        mnemonic: "mov".into(),
        prefixes: vec![Prefix::Lock],
        args: vec![
            arg(ArgTokenKind::Register(Register::Ax), "ax"),
            arg(ArgTokenKind::Comma, ","),
            arg(ArgTokenKind::Number(5), "5"),
        ],
        span: Span::dummy(),
    }));
    round_trip(&Statement::Data(DataDecl {
        unit: 1,
        items: vec![
            DataItem::Str(b"Hi".to_vec()),
            DataItem::Expr(vec![arg(ArgTokenKind::Number(0), "0")]),
        ],
        span: Span::dummy(),
    }));
    round_trip(&Statement::Times(TimesNode {
        count: vec![arg(ArgTokenKind::Number(3), "3")],
        inner: Box::new(Statement::Instruction(InstructionNode {
            mnemonic: "nop".into(),
            prefixes: vec![],
            args: vec![],
            span: Span::dummy(),
        })),
        span: Span::dummy(),
    }));
}
