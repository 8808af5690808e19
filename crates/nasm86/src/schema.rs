//! The instruction schema registry and operand matching.
//!
//! A mnemonic maps to an ordered list of candidate [`Schema`]s. Matching
//! walks the list in registration order and the first schema that applies
//! wins, so tie-breaks are expressed purely by registration order: smaller
//! encodings are registered before larger ones of the same semantics, which
//! is what lets the layout engine collapse a near jump to a short jump once
//! the target address is known.
//!
//! A schema's binary template is a textual atom sequence (`"89 mr d0 d1"`,
//! see the encoder module for the atom grammar). Per-register opcode forms
//! (`B0+r`, `50+r`, x87 `D9 C0+i`, …) are expanded into one schema per
//! register when the registry is built.

use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use crate::encoder;
use crate::ir::{BranchHint, Cpu, Imm, InstructionNode, Mode, Operand, Register};

// ─── Patterns ───────────────────────────────────────────────

/// An operand matcher inside a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPattern {
    /// Exactly this register (`al`, `ax`, `eax`, `cl`, `dx`, `st3`, …).
    Reg(Register),
    /// Any 8-bit general-purpose register.
    R8,
    /// Any 16-bit general-purpose register.
    R16,
    /// Any 32-bit general-purpose register.
    R32,
    /// Any segment register.
    Sreg,
    /// Any segment register except `cs` (writable destinations).
    SregNoCs,
    /// 8-bit register or memory.
    Rm8,
    /// 16-bit register or memory.
    Rm16,
    /// 32-bit register or memory.
    Rm32,
    /// 16-bit memory only.
    M16,
    /// 32-bit memory only.
    M32,
    /// Memory of any size (effective-address operands like `lea`).
    MemAny,
    /// 8-bit immediate.
    Imm8,
    /// 16-bit immediate.
    Imm16,
    /// 32-bit immediate.
    Imm32,
    /// Immediate that equals the sign-extension of its own low byte
    /// (the `0x83` opcode trick).
    Imm8S,
    /// The literal constant 1 (shift-by-one forms).
    One,
    /// 8-bit relative branch target.
    Rel8,
    /// 16-bit relative branch target.
    Rel16,
    /// Indirect near branch target (memory).
    NearPtr,
    /// Indirect far branch target (memory).
    FarPtr,
    /// Displacement-only memory operand encoded without ModR/M.
    Moffs,
    /// A `segment:offset` immediate pair.
    SegImm,
}

impl ArgPattern {
    /// The operand size in bytes this pattern pins the instruction to,
    /// for operand-size prefix selection. Memory-only and x87 patterns
    /// contribute nothing.
    #[must_use]
    pub fn operand_bytes(self) -> Option<u8> {
        match self {
            ArgPattern::Reg(r) if r.is_gpr(1) => Some(1),
            ArgPattern::Reg(r) if r.is_gpr(2) => Some(2),
            ArgPattern::Reg(r) if r.is_gpr(4) => Some(4),
            ArgPattern::R8 | ArgPattern::Rm8 => Some(1),
            ArgPattern::R16 | ArgPattern::Rm16 | ArgPattern::Imm16 | ArgPattern::Rel16 => Some(2),
            ArgPattern::R32 | ArgPattern::Rm32 | ArgPattern::Imm32 => Some(4),
            // A 16:16 pair is an o16 form; `bits 32` needs the prefix.
            ArgPattern::SegImm => Some(2),
            _ => None,
        }
    }

    /// Whether the pattern consumes an immediate operand for `iN` atoms.
    #[must_use]
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            ArgPattern::Imm8
                | ArgPattern::Imm16
                | ArgPattern::Imm32
                | ArgPattern::Imm8S
        )
    }

    /// Whether the pattern is a relative branch target.
    #[must_use]
    pub fn is_relative(self) -> bool {
        matches!(self, ArgPattern::Rel8 | ArgPattern::Rel16)
    }
}

// ─── Schema ─────────────────────────────────────────────────

/// One candidate operand-pattern + encoding for a mnemonic.
#[derive(Debug, Clone)]
pub struct Schema {
    /// The instruction mnemonic (lower-case).
    pub mnemonic: &'static str,
    /// One matcher per expected operand.
    pub args: Vec<ArgPattern>,
    /// The binary template (textual atoms, space-separated).
    pub template: Cow<'static, str>,
    /// Minimum CPU family this form requires.
    pub min_cpu: Cpu,
    /// True for bare-offset forms (`mov al, [imm16]`) with no ModR/M.
    pub moffset: bool,
    /// Index of the operand whose encoding goes into ModR/M's `r/m` field.
    pub rm_arg: Option<usize>,
}

impl Schema {
    /// The instruction operand size this schema pins (16/32-bit prefix logic).
    #[must_use]
    pub fn operand_bytes(&self) -> Option<u8> {
        self.args.iter().find_map(|p| p.operand_bytes())
    }

    /// Bit width that `Imm8S` sign-extension targets for this schema.
    #[must_use]
    pub fn imm_target_bits(&self, mode: Mode) -> u8 {
        match self.operand_bytes() {
            Some(4) => 32,
            Some(2) => 16,
            Some(1) => 8,
            _ => u8::from(mode.word_bytes()) * 8,
        }
    }
}

// ─── Matching ───────────────────────────────────────────────

/// Context for one schema-matching attempt.
#[derive(Debug, Clone, Copy)]
pub struct MatchCtx {
    /// Current operand-size mode.
    pub mode: Mode,
    /// Target CPU family.
    pub cpu: Cpu,
    /// Absolute address of the instruction, when known (second pass).
    pub addr: Option<u64>,
    /// The instruction's current encoded length in the layout, when it
    /// already has one. A forward target sits after this instruction and
    /// moves back by exactly the bytes a re-encoding saves, so the reach
    /// check for a forward target measures from the end of the
    /// current-size instruction, not the candidate-size one.
    pub cur_len: Option<usize>,
    /// Branch-addressing hint from the source (`short`/`near`/`far`).
    pub hint: Option<BranchHint>,
    /// Second-chance matching: let `rel8` accept an unresolved label.
    ///
    /// Off in the regular round so that labels land on the widest relative
    /// form; switched on for a retry when nothing matched, which is how
    /// rel8-only branches (`loop`, `jcxz`, `jcc` on a plain 8086) accept a
    /// label on the first pass.
    pub relaxed: bool,
}

/// Decide whether `schema` applies to the given operand list.
///
/// Unresolved labels satisfy size predicates pessimistically: they behave as
/// values of the mode's full word size, so only the widest immediate or
/// relative form accepts them. Once resolved (second pass), the smaller
/// forms become viable and win by registration order.
#[must_use]
pub fn matches(
    schema: &Schema,
    ops: &[Operand],
    instr: &InstructionNode,
    ctx: &MatchCtx,
) -> bool {
    if schema.min_cpu > ctx.cpu || schema.args.len() != ops.len() {
        return false;
    }
    for (pattern, op) in schema.args.iter().zip(ops) {
        if !arg_matches(schema, *pattern, op, instr, ctx) {
            return false;
        }
    }
    true
}

fn arg_matches(
    schema: &Schema,
    pattern: ArgPattern,
    op: &Operand,
    instr: &InstructionNode,
    ctx: &MatchCtx,
) -> bool {
    match pattern {
        ArgPattern::Reg(want) => matches!(op, Operand::Reg(r) if *r == want),
        ArgPattern::R8 => matches!(op, Operand::Reg(r) if r.is_gpr(1)),
        ArgPattern::R16 => matches!(op, Operand::Reg(r) if r.is_gpr(2)),
        ArgPattern::R32 => matches!(op, Operand::Reg(r) if r.is_gpr(4)),
        ArgPattern::Sreg => matches!(op, Operand::Reg(r) if r.is_segment()),
        ArgPattern::SregNoCs => {
            matches!(op, Operand::Reg(r) if r.is_segment() && *r != Register::Cs)
        }
        ArgPattern::Rm8 => rm_matches(op, 1),
        ArgPattern::Rm16 => rm_matches(op, 2),
        ArgPattern::Rm32 => rm_matches(op, 4),
        ArgPattern::M16 => matches!(op, Operand::Mem(m) if m.size == Some(2)),
        ArgPattern::M32 => matches!(op, Operand::Mem(m) if m.size == Some(4)),
        ArgPattern::MemAny => matches!(op, Operand::Mem(_)),
        ArgPattern::Imm8 => imm_matches(op, 1, ctx.mode),
        ArgPattern::Imm16 => imm_matches(op, 2, ctx.mode),
        ArgPattern::Imm32 => imm_matches(op, 4, ctx.mode),
        ArgPattern::Imm8S => match op {
            Operand::Imm(imm) => {
                if imm.explicit && imm.size != 1 {
                    return false;
                }
                fits_sign_extended(imm.value, schema.imm_target_bits(ctx.mode))
            }
            _ => false,
        },
        ArgPattern::One => matches!(op, Operand::Imm(imm) if imm.value == 1),
        ArgPattern::Rel8 => rel_matches(schema, op, instr, ctx, 1),
        ArgPattern::Rel16 => rel_matches(schema, op, instr, ctx, 2),
        ArgPattern::NearPtr => {
            !matches!(ctx.hint, Some(BranchHint::Far) | Some(BranchHint::Short))
                && matches!(op, Operand::Mem(m)
                    if m.size.is_none() || m.size == Some(ctx.mode.word_bytes()))
        }
        ArgPattern::FarPtr => {
            ctx.hint == Some(BranchHint::Far) && matches!(op, Operand::Mem(_))
        }
        ArgPattern::Moffs => match op {
            Operand::Mem(m) => {
                m.is_displacement_only()
                    && (m.unresolved || m.disp >= 0 && m.disp <= i64::from(u32::MAX))
            }
            _ => false,
        },
        ArgPattern::SegImm => {
            !matches!(ctx.hint, Some(BranchHint::Short) | Some(BranchHint::Near))
                && matches!(op, Operand::SegImm { .. })
        }
    }
}

/// Register-or-memory of an exact byte size.
fn rm_matches(op: &Operand, size: u8) -> bool {
    match op {
        Operand::Reg(r) => r.is_gpr(size),
        Operand::Mem(m) => m.size == Some(size),
        _ => false,
    }
}

/// Immediate of a byte size: explicitly casted operands must equal the
/// matcher's size, implicit ones need only fit. Unresolved labels behave as
/// implicit values of the mode's word size.
fn imm_matches(op: &Operand, size: u8, mode: Mode) -> bool {
    match op {
        Operand::Imm(Imm { size: s, explicit, .. }) => {
            if *explicit {
                *s == size
            } else {
                *s <= size
            }
        }
        Operand::Label { cast, .. } => match cast {
            Some(c) => *c == size,
            None => mode.word_bytes() <= size,
        },
        _ => false,
    }
}

/// `value`, taken as a `target_bits`-bit unsigned integer, equals the
/// sign-extension of its own low byte to `target_bits`.
#[must_use]
pub fn fits_sign_extended(value: i64, target_bits: u8) -> bool {
    let mask: u64 = if target_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << target_bits) - 1
    };
    let v = (value as u64) & mask;
    let low = v & 0xFF;
    let sext = (low | (0u64.wrapping_sub((low >> 7) & 1) << 8)) & mask;
    v == sext
}

/// Relative-target matcher for `rel8`/`rel16`.
fn rel_matches(
    schema: &Schema,
    op: &Operand,
    instr: &InstructionNode,
    ctx: &MatchCtx,
    size: u8,
) -> bool {
    // An explicit hint pins the form: `short` demands rel8, `far` forbids
    // relative forms entirely. `near` merely excludes far targets, so the
    // short form still wins when the displacement fits.
    match ctx.hint {
        Some(BranchHint::Far) => return false,
        Some(BranchHint::Short) if size != 1 => return false,
        _ => {}
    }

    match op {
        // Unresolved label: pessimistically assume the widest form.
        Operand::Label { .. } => size == 2 || ctx.relaxed,
        Operand::Imm(imm) => {
            if size == 2 {
                return true;
            }
            // rel8 needs the instruction's own end address.
            let Some(addr) = ctx.addr else { return false };
            let Ok(cand) = encoder::encoded_len(schema, core::slice::from_ref(op), instr, ctx.mode)
            else {
                return false;
            };
            let own = if imm.value > addr as i64 {
                ctx.cur_len.unwrap_or(cand)
            } else {
                cand
            };
            let disp = imm.value - (addr as i64 + own as i64);
            (-128..=127).contains(&disp)
        }
        _ => false,
    }
}

// ─── Registry ───────────────────────────────────────────────

/// The process-wide table of instruction schemas.
///
/// Built once per assembler and shared immutably across compiles.
#[derive(Debug)]
pub struct SchemaRegistry {
    map: BTreeMap<&'static str, Vec<Schema>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 8-bit general-purpose registers in encoding order.
const GPR8: [Register; 8] = [
    Register::Al,
    Register::Cl,
    Register::Dl,
    Register::Bl,
    Register::Ah,
    Register::Ch,
    Register::Dh,
    Register::Bh,
];

/// 16-bit general-purpose registers in encoding order.
const GPR16: [Register; 8] = [
    Register::Ax,
    Register::Cx,
    Register::Dx,
    Register::Bx,
    Register::Sp,
    Register::Bp,
    Register::Si,
    Register::Di,
];

/// 32-bit general-purpose registers in encoding order.
const GPR32: [Register; 8] = [
    Register::Eax,
    Register::Ecx,
    Register::Edx,
    Register::Ebx,
    Register::Esp,
    Register::Ebp,
    Register::Esi,
    Register::Edi,
];

/// x87 stack registers in encoding order.
const STREGS: [Register; 8] = [
    Register::St0,
    Register::St1,
    Register::St2,
    Register::St3,
    Register::St4,
    Register::St5,
    Register::St6,
    Register::St7,
];

struct Builder {
    map: BTreeMap<&'static str, Vec<Schema>>,
}

impl Builder {
    fn push(&mut self, schema: Schema) {
        self.map.entry(schema.mnemonic).or_default().push(schema);
    }

    /// Register a schema with a static template.
    fn def(
        &mut self,
        mnemonic: &'static str,
        args: &[ArgPattern],
        template: &'static str,
        min_cpu: Cpu,
        rm_arg: Option<usize>,
    ) {
        self.push(Schema {
            mnemonic,
            args: args.to_vec(),
            template: Cow::Borrowed(template),
            min_cpu,
            moffset: false,
            rm_arg,
        });
    }

    /// Register a schema with a generated (per-register) template.
    fn def_expanded(
        &mut self,
        mnemonic: &'static str,
        args: Vec<ArgPattern>,
        template: alloc::string::String,
        min_cpu: Cpu,
    ) {
        self.push(Schema {
            mnemonic,
            args,
            template: Cow::Owned(template),
            min_cpu,
            moffset: false,
            rm_arg: None,
        });
    }

    /// Register a moffset schema (`mov al, [imm16]` family).
    fn def_moffs(&mut self, mnemonic: &'static str, args: &[ArgPattern], template: &'static str) {
        self.push(Schema {
            mnemonic,
            args: args.to_vec(),
            template: Cow::Borrowed(template),
            min_cpu: Cpu::I8086,
            moffset: true,
            rm_arg: None,
        });
    }
}

impl SchemaRegistry {
    /// Build the full schema table.
    #[must_use]
    pub fn new() -> Self {
        use ArgPattern::*;
        use Cpu::{I80186, I80386, I80486, I8086};

        let mut b = Builder {
            map: BTreeMap::new(),
        };

        // ── mov ─────────────────────────────────────────────
        // Accumulator moffset forms come first: they are the shortest
        // encodings for displacement-only operands.
        b.def_moffs("mov", &[Reg(Register::Al), Moffs], "a0 d0 d1 d2 d3");
        b.def_moffs("mov", &[Reg(Register::Ax), Moffs], "a1 d0 d1 d2 d3");
        b.def_moffs("mov", &[Reg(Register::Eax), Moffs], "a1 d0 d1 d2 d3");
        b.def_moffs("mov", &[Moffs, Reg(Register::Al)], "a2 d0 d1 d2 d3");
        b.def_moffs("mov", &[Moffs, Reg(Register::Ax)], "a3 d0 d1 d2 d3");
        b.def_moffs("mov", &[Moffs, Reg(Register::Eax)], "a3 d0 d1 d2 d3");
        b.def("mov", &[Rm8, R8], "88 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("mov", &[Rm16, R16], "89 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("mov", &[Rm32, R32], "89 mr d0 d1 d2 d3", I80386, Some(0));
        b.def("mov", &[R8, Rm8], "8a mr d0 d1 d2 d3", I8086, Some(1));
        b.def("mov", &[R16, Rm16], "8b mr d0 d1 d2 d3", I8086, Some(1));
        b.def("mov", &[R32, Rm32], "8b mr d0 d1 d2 d3", I80386, Some(1));
        b.def("mov", &[Rm16, Sreg], "8c mr d0 d1 d2 d3", I8086, Some(0));
        b.def("mov", &[SregNoCs, Rm16], "8e mr d0 d1 d2 d3", I8086, Some(1));
        for (i, reg) in GPR8.iter().enumerate() {
            b.def_expanded("mov", vec![Reg(*reg), Imm8], format!("{:02x} i0", 0xB0 + i), I8086);
        }
        for (i, reg) in GPR16.iter().enumerate() {
            b.def_expanded(
                "mov",
                vec![Reg(*reg), Imm16],
                format!("{:02x} i0 i1", 0xB8 + i),
                I8086,
            );
        }
        for (i, reg) in GPR32.iter().enumerate() {
            b.def_expanded(
                "mov",
                vec![Reg(*reg), Imm32],
                format!("{:02x} i0 i1 i2 i3", 0xB8 + i),
                I80386,
            );
        }
        b.def("mov", &[Rm8, Imm8], "c6 /0 d0 d1 d2 d3 i0", I8086, Some(0));
        b.def("mov", &[Rm16, Imm16], "c7 /0 d0 d1 d2 d3 i0 i1", I8086, Some(0));
        b.def(
            "mov",
            &[Rm32, Imm32],
            "c7 /0 d0 d1 d2 d3 i0 i1 i2 i3",
            I80386,
            Some(0),
        );

        // ── ALU family ──────────────────────────────────────
        const ALU: [(&str, usize); 8] = [
            ("add", 0),
            ("or", 1),
            ("adc", 2),
            ("sbb", 3),
            ("and", 4),
            ("sub", 5),
            ("xor", 6),
            ("cmp", 7),
        ];
        for (mn, n) in ALU {
            let base = n * 8;
            b.def_expanded(mn, vec![Rm8, R8], format!("{:02x} mr d0 d1 d2 d3", base), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm16, R16], format!("{:02x} mr d0 d1 d2 d3", base + 1), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm32, R32], format!("{:02x} mr d0 d1 d2 d3", base + 1), I80386);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![R8, Rm8], format!("{:02x} mr d0 d1 d2 d3", base + 2), I8086);
            set_rm(&mut b, mn, 1);
            b.def_expanded(mn, vec![R16, Rm16], format!("{:02x} mr d0 d1 d2 d3", base + 3), I8086);
            set_rm(&mut b, mn, 1);
            b.def_expanded(mn, vec![R32, Rm32], format!("{:02x} mr d0 d1 d2 d3", base + 3), I80386);
            set_rm(&mut b, mn, 1);
            // Sign-extended byte forms precede the accumulator/full forms
            // so that `add ax, 5` takes the 0x83 encoding.
            b.def_expanded(mn, vec![Rm16, Imm8S], format!("83 /{} d0 d1 d2 d3 i0", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm32, Imm8S], format!("83 /{} d0 d1 d2 d3 i0", n), I80386);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Reg(Register::Al), Imm8], format!("{:02x} i0", base + 4), I8086);
            b.def_expanded(
                mn,
                vec![Reg(Register::Ax), Imm16],
                format!("{:02x} i0 i1", base + 5),
                I8086,
            );
            b.def_expanded(
                mn,
                vec![Reg(Register::Eax), Imm32],
                format!("{:02x} i0 i1 i2 i3", base + 5),
                I80386,
            );
            b.def_expanded(mn, vec![Rm8, Imm8], format!("80 /{} d0 d1 d2 d3 i0", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm16, Imm16], format!("81 /{} d0 d1 d2 d3 i0 i1", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(
                mn,
                vec![Rm32, Imm32],
                format!("81 /{} d0 d1 d2 d3 i0 i1 i2 i3", n),
                I80386,
            );
            set_rm(&mut b, mn, 0);
        }

        // ── test ────────────────────────────────────────────
        b.def("test", &[Rm8, R8], "84 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("test", &[Rm16, R16], "85 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("test", &[Rm32, R32], "85 mr d0 d1 d2 d3", I80386, Some(0));
        b.def("test", &[R8, Rm8], "84 mr d0 d1 d2 d3", I8086, Some(1));
        b.def("test", &[R16, Rm16], "85 mr d0 d1 d2 d3", I8086, Some(1));
        b.def("test", &[R32, Rm32], "85 mr d0 d1 d2 d3", I80386, Some(1));
        b.def("test", &[Reg(Register::Al), Imm8], "a8 i0", I8086, None);
        b.def("test", &[Reg(Register::Ax), Imm16], "a9 i0 i1", I8086, None);
        b.def("test", &[Reg(Register::Eax), Imm32], "a9 i0 i1 i2 i3", I80386, None);
        b.def("test", &[Rm8, Imm8], "f6 /0 d0 d1 d2 d3 i0", I8086, Some(0));
        b.def("test", &[Rm16, Imm16], "f7 /0 d0 d1 d2 d3 i0 i1", I8086, Some(0));
        b.def(
            "test",
            &[Rm32, Imm32],
            "f7 /0 d0 d1 d2 d3 i0 i1 i2 i3",
            I80386,
            Some(0),
        );

        // ── inc / dec ───────────────────────────────────────
        for (i, reg) in GPR16.iter().enumerate() {
            b.def_expanded("inc", vec![Reg(*reg)], format!("{:02x}", 0x40 + i), I8086);
            b.def_expanded("dec", vec![Reg(*reg)], format!("{:02x}", 0x48 + i), I8086);
        }
        for (i, reg) in GPR32.iter().enumerate() {
            b.def_expanded("inc", vec![Reg(*reg)], format!("{:02x}", 0x40 + i), I80386);
            b.def_expanded("dec", vec![Reg(*reg)], format!("{:02x}", 0x48 + i), I80386);
        }
        b.def("inc", &[Rm8], "fe /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("inc", &[Rm16], "ff /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("inc", &[Rm32], "ff /0 d0 d1 d2 d3", I80386, Some(0));
        b.def("dec", &[Rm8], "fe /1 d0 d1 d2 d3", I8086, Some(0));
        b.def("dec", &[Rm16], "ff /1 d0 d1 d2 d3", I8086, Some(0));
        b.def("dec", &[Rm32], "ff /1 d0 d1 d2 d3", I80386, Some(0));

        // ── push / pop ──────────────────────────────────────
        for (i, reg) in GPR16.iter().enumerate() {
            b.def_expanded("push", vec![Reg(*reg)], format!("{:02x}", 0x50 + i), I8086);
            b.def_expanded("pop", vec![Reg(*reg)], format!("{:02x}", 0x58 + i), I8086);
        }
        for (i, reg) in GPR32.iter().enumerate() {
            b.def_expanded("push", vec![Reg(*reg)], format!("{:02x}", 0x50 + i), I80386);
            b.def_expanded("pop", vec![Reg(*reg)], format!("{:02x}", 0x58 + i), I80386);
        }
        b.def("push", &[Reg(Register::Es)], "06", I8086, None);
        b.def("push", &[Reg(Register::Cs)], "0e", I8086, None);
        b.def("push", &[Reg(Register::Ss)], "16", I8086, None);
        b.def("push", &[Reg(Register::Ds)], "1e", I8086, None);
        b.def("push", &[Reg(Register::Fs)], "0f a0", I80386, None);
        b.def("push", &[Reg(Register::Gs)], "0f a8", I80386, None);
        b.def("push", &[Rm16], "ff /6 d0 d1 d2 d3", I8086, Some(0));
        b.def("push", &[Rm32], "ff /6 d0 d1 d2 d3", I80386, Some(0));
        b.def("push", &[Imm8S], "6a i0", I80186, None);
        b.def("push", &[Imm16], "68 i0 i1", I80186, None);
        b.def("pop", &[Reg(Register::Es)], "07", I8086, None);
        b.def("pop", &[Reg(Register::Ss)], "17", I8086, None);
        b.def("pop", &[Reg(Register::Ds)], "1f", I8086, None);
        b.def("pop", &[Reg(Register::Fs)], "0f a1", I80386, None);
        b.def("pop", &[Reg(Register::Gs)], "0f a9", I80386, None);
        b.def("pop", &[Rm16], "8f /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("pop", &[Rm32], "8f /0 d0 d1 d2 d3", I80386, Some(0));

        // ── xchg ────────────────────────────────────────────
        for (i, reg) in GPR16.iter().enumerate() {
            b.def_expanded(
                "xchg",
                vec![Reg(Register::Ax), Reg(*reg)],
                format!("{:02x}", 0x90 + i),
                I8086,
            );
            b.def_expanded(
                "xchg",
                vec![Reg(*reg), Reg(Register::Ax)],
                format!("{:02x}", 0x90 + i),
                I8086,
            );
        }
        b.def("xchg", &[Rm8, R8], "86 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("xchg", &[R8, Rm8], "86 mr d0 d1 d2 d3", I8086, Some(1));
        b.def("xchg", &[Rm16, R16], "87 mr d0 d1 d2 d3", I8086, Some(0));
        b.def("xchg", &[R16, Rm16], "87 mr d0 d1 d2 d3", I8086, Some(1));
        b.def("xchg", &[Rm32, R32], "87 mr d0 d1 d2 d3", I80386, Some(0));
        b.def("xchg", &[R32, Rm32], "87 mr d0 d1 d2 d3", I80386, Some(1));

        // ── effective-address loads ─────────────────────────
        b.def("lea", &[R16, MemAny], "8d mr d0 d1 d2 d3", I8086, Some(1));
        b.def("lea", &[R32, MemAny], "8d mr d0 d1 d2 d3", I80386, Some(1));
        b.def("les", &[R16, MemAny], "c4 mr d0 d1 d2 d3", I8086, Some(1));
        b.def("lds", &[R16, MemAny], "c5 mr d0 d1 d2 d3", I8086, Some(1));

        // ── unary F6/F7 group ───────────────────────────────
        const UNARY: [(&str, usize); 6] = [
            ("not", 2),
            ("neg", 3),
            ("mul", 4),
            ("imul", 5),
            ("div", 6),
            ("idiv", 7),
        ];
        for (mn, n) in UNARY {
            b.def_expanded(mn, vec![Rm8], format!("f6 /{} d0 d1 d2 d3", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm16], format!("f7 /{} d0 d1 d2 d3", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm32], format!("f7 /{} d0 d1 d2 d3", n), I80386);
            set_rm(&mut b, mn, 0);
        }
        // Two- and three-operand imul extensions.
        b.def("imul", &[R16, Rm16], "0f af mr d0 d1 d2 d3", I80386, Some(1));
        b.def("imul", &[R32, Rm32], "0f af mr d0 d1 d2 d3", I80386, Some(1));
        b.def("imul", &[R16, Rm16, Imm8S], "6b mr d0 d1 d2 d3 i0", I80186, Some(1));
        b.def("imul", &[R32, Rm32, Imm8S], "6b mr d0 d1 d2 d3 i0", I80386, Some(1));
        b.def("imul", &[R16, Rm16, Imm16], "69 mr d0 d1 d2 d3 i0 i1", I80186, Some(1));
        b.def(
            "imul",
            &[R32, Rm32, Imm32],
            "69 mr d0 d1 d2 d3 i0 i1 i2 i3",
            I80386,
            Some(1),
        );

        // ── shifts / rotates ────────────────────────────────
        const SHIFT: [(&str, usize); 8] = [
            ("rol", 0),
            ("ror", 1),
            ("rcl", 2),
            ("rcr", 3),
            ("shl", 4),
            ("sal", 4),
            ("shr", 5),
            ("sar", 7),
        ];
        for (mn, n) in SHIFT {
            b.def_expanded(mn, vec![Rm8, One], format!("d0 /{} d0 d1 d2 d3", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm16, One], format!("d1 /{} d0 d1 d2 d3", n), I8086);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm32, One], format!("d1 /{} d0 d1 d2 d3", n), I80386);
            set_rm(&mut b, mn, 0);
            b.def_expanded(
                mn,
                vec![Rm8, Reg(Register::Cl)],
                format!("d2 /{} d0 d1 d2 d3", n),
                I8086,
            );
            set_rm(&mut b, mn, 0);
            b.def_expanded(
                mn,
                vec![Rm16, Reg(Register::Cl)],
                format!("d3 /{} d0 d1 d2 d3", n),
                I8086,
            );
            set_rm(&mut b, mn, 0);
            b.def_expanded(
                mn,
                vec![Rm32, Reg(Register::Cl)],
                format!("d3 /{} d0 d1 d2 d3", n),
                I80386,
            );
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm8, Imm8], format!("c0 /{} d0 d1 d2 d3 i0", n), I80186);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm16, Imm8], format!("c1 /{} d0 d1 d2 d3 i0", n), I80186);
            set_rm(&mut b, mn, 0);
            b.def_expanded(mn, vec![Rm32, Imm8], format!("c1 /{} d0 d1 d2 d3 i0", n), I80386);
            set_rm(&mut b, mn, 0);
        }

        // ── jumps and calls ─────────────────────────────────
        b.def("jmp", &[Rel8], "eb r0", I8086, None);
        b.def("jmp", &[Rel16], "e9 r0 r1", I8086, None);
        b.def("jmp", &[SegImm], "ea o0 o1 s0 s1", I8086, None);
        b.def("jmp", &[NearPtr], "ff /4 d0 d1 d2 d3", I8086, Some(0));
        b.def("jmp", &[FarPtr], "ff /5 d0 d1 d2 d3", I8086, Some(0));
        b.def("call", &[Rel16], "e8 r0 r1", I8086, None);
        b.def("call", &[SegImm], "9a o0 o1 s0 s1", I8086, None);
        b.def("call", &[NearPtr], "ff /2 d0 d1 d2 d3", I8086, Some(0));
        b.def("call", &[FarPtr], "ff /3 d0 d1 d2 d3", I8086, Some(0));

        // ── conditional branches ────────────────────────────
        const JCC: [(&str, usize); 30] = [
            ("jo", 0x0),
            ("jno", 0x1),
            ("jb", 0x2),
            ("jc", 0x2),
            ("jnae", 0x2),
            ("jnb", 0x3),
            ("jnc", 0x3),
            ("jae", 0x3),
            ("je", 0x4),
            ("jz", 0x4),
            ("jne", 0x5),
            ("jnz", 0x5),
            ("jbe", 0x6),
            ("jna", 0x6),
            ("jnbe", 0x7),
            ("ja", 0x7),
            ("js", 0x8),
            ("jns", 0x9),
            ("jp", 0xA),
            ("jpe", 0xA),
            ("jnp", 0xB),
            ("jpo", 0xB),
            ("jl", 0xC),
            ("jnge", 0xC),
            ("jnl", 0xD),
            ("jge", 0xD),
            ("jle", 0xE),
            ("jng", 0xE),
            ("jnle", 0xF),
            ("jg", 0xF),
        ];
        for (mn, cc) in JCC {
            b.def_expanded(mn, vec![Rel8], format!("{:02x} r0", 0x70 + cc), I8086);
            b.def_expanded(mn, vec![Rel16], format!("0f {:02x} r0 r1", 0x80 + cc), I80386);
        }
        b.def("jcxz", &[Rel8], "e3 r0", I8086, None);
        b.def("loop", &[Rel8], "e2 r0", I8086, None);
        b.def("loope", &[Rel8], "e1 r0", I8086, None);
        b.def("loopz", &[Rel8], "e1 r0", I8086, None);
        b.def("loopne", &[Rel8], "e0 r0", I8086, None);
        b.def("loopnz", &[Rel8], "e0 r0", I8086, None);

        // ── returns and interrupts ──────────────────────────
        b.def("ret", &[], "c3", I8086, None);
        b.def("ret", &[Imm16], "c2 i0 i1", I8086, None);
        b.def("retn", &[], "c3", I8086, None);
        b.def("retn", &[Imm16], "c2 i0 i1", I8086, None);
        b.def("retf", &[], "cb", I8086, None);
        b.def("retf", &[Imm16], "ca i0 i1", I8086, None);
        b.def("lret", &[], "cb", I8086, None);
        b.def("lret", &[Imm16], "ca i0 i1", I8086, None);
        b.def("iret", &[], "cf", I8086, None);
        b.def("int", &[Imm8], "cd i0", I8086, None);
        b.def("int3", &[], "cc", I8086, None);
        b.def("int1", &[], "f1", I8086, None);
        b.def("into", &[], "ce", I8086, None);

        // ── I/O ─────────────────────────────────────────────
        b.def("in", &[Reg(Register::Al), Imm8], "e4 i0", I8086, None);
        b.def("in", &[Reg(Register::Ax), Imm8], "e5 i0", I8086, None);
        b.def("in", &[Reg(Register::Eax), Imm8], "e5 i0", I80386, None);
        b.def("in", &[Reg(Register::Al), Reg(Register::Dx)], "ec", I8086, None);
        b.def("in", &[Reg(Register::Ax), Reg(Register::Dx)], "ed", I8086, None);
        b.def("in", &[Reg(Register::Eax), Reg(Register::Dx)], "ed", I80386, None);
        b.def("out", &[Imm8, Reg(Register::Al)], "e6 i0", I8086, None);
        b.def("out", &[Imm8, Reg(Register::Ax)], "e7 i0", I8086, None);
        b.def("out", &[Imm8, Reg(Register::Eax)], "e7 i0", I80386, None);
        b.def("out", &[Reg(Register::Dx), Reg(Register::Al)], "ee", I8086, None);
        b.def("out", &[Reg(Register::Dx), Reg(Register::Ax)], "ef", I8086, None);
        b.def("out", &[Reg(Register::Dx), Reg(Register::Eax)], "ef", I80386, None);

        // ── widening moves ──────────────────────────────────
        b.def("movzx", &[R16, Rm8], "0f b6 mr d0 d1 d2 d3", I80386, Some(1));
        b.def("movzx", &[R32, Rm8], "0f b6 mr d0 d1 d2 d3", I80386, Some(1));
        b.def("movzx", &[R32, Rm16], "0f b7 mr d0 d1 d2 d3", I80386, Some(1));
        b.def("movsx", &[R16, Rm8], "0f be mr d0 d1 d2 d3", I80386, Some(1));
        b.def("movsx", &[R32, Rm8], "0f be mr d0 d1 d2 d3", I80386, Some(1));
        b.def("movsx", &[R32, Rm16], "0f bf mr d0 d1 d2 d3", I80386, Some(1));

        // ── 486 extensions ──────────────────────────────────
        for (i, reg) in GPR32.iter().enumerate() {
            b.def_expanded("bswap", vec![Reg(*reg)], format!("0f {:02x}", 0xC8 + i), I80486);
        }
        b.def("cmpxchg", &[Rm8, R8], "0f b0 mr d0 d1 d2 d3", I80486, Some(0));
        b.def("cmpxchg", &[Rm16, R16], "0f b1 mr d0 d1 d2 d3", I80486, Some(0));
        b.def("cmpxchg", &[Rm32, R32], "0f b1 mr d0 d1 d2 d3", I80486, Some(0));
        b.def("xadd", &[Rm8, R8], "0f c0 mr d0 d1 d2 d3", I80486, Some(0));
        b.def("xadd", &[Rm16, R16], "0f c1 mr d0 d1 d2 d3", I80486, Some(0));
        b.def("xadd", &[Rm32, R32], "0f c1 mr d0 d1 d2 d3", I80486, Some(0));

        // ── fixed-encoding instructions ─────────────────────
        const FIXED: [(&str, &str, Cpu); 48] = [
            ("aaa", "37", I8086),
            ("aas", "3f", I8086),
            ("cbw", "98", I8086),
            ("clc", "f8", I8086),
            ("cld", "fc", I8086),
            ("cli", "fa", I8086),
            ("cmc", "f5", I8086),
            ("cmpsb", "a6", I8086),
            ("cmpsw", "a7", I8086),
            ("cpuid", "0f a2", I80486),
            ("cwd", "99", I8086),
            ("daa", "27", I8086),
            ("das", "2f", I8086),
            ("fabs", "d9 e1", I8086),
            ("fchs", "d9 e0", I8086),
            ("finit", "9b db e3", I8086),
            ("fld1", "d9 e8", I8086),
            ("fldpi", "d9 eb", I8086),
            ("fldz", "d9 ee", I8086),
            ("fninit", "db e3", I8086),
            ("fsqrt", "d9 fa", I8086),
            ("fwait", "9b", I8086),
            ("hlt", "f4", I8086),
            ("invd", "0f 08", I80486),
            ("lahf", "9f", I8086),
            ("leave", "c9", I80186),
            ("lodsb", "ac", I8086),
            ("lodsw", "ad", I8086),
            ("movsb", "a4", I8086),
            ("movsw", "a5", I8086),
            ("nop", "90", I8086),
            ("popa", "61", I80186),
            ("popf", "9d", I8086),
            ("pusha", "60", I80186),
            ("pushf", "9c", I8086),
            ("sahf", "9e", I8086),
            ("salc", "d6", I8086),
            ("scasb", "ae", I8086),
            ("scasw", "af", I8086),
            ("stc", "f9", I8086),
            ("std", "fd", I8086),
            ("sti", "fb", I8086),
            ("stosb", "aa", I8086),
            ("stosw", "ab", I8086),
            ("wait", "9b", I8086),
            ("wbinvd", "0f 09", I80486),
            ("xlat", "d7", I8086),
            ("xlatb", "d7", I8086),
        ];
        for (mn, tpl, cpu) in FIXED {
            b.def(mn, &[], tpl, cpu, None);
        }
        b.def("aam", &[], "d4 0a", I8086, None);
        b.def("aam", &[Imm8], "d4 i0", I8086, None);
        b.def("aad", &[], "d5 0a", I8086, None);
        b.def("aad", &[Imm8], "d5 i0", I8086, None);

        // ── x87 register and memory forms ───────────────────
        for (i, st) in STREGS.iter().enumerate() {
            b.def_expanded("fld", vec![Reg(*st)], format!("d9 {:02x}", 0xC0 + i), I8086);
            b.def_expanded("fst", vec![Reg(*st)], format!("dd {:02x}", 0xD0 + i), I8086);
            b.def_expanded("fstp", vec![Reg(*st)], format!("dd {:02x}", 0xD8 + i), I8086);
            b.def_expanded("fxch", vec![Reg(*st)], format!("d9 {:02x}", 0xC8 + i), I8086);
            b.def_expanded("fcom", vec![Reg(*st)], format!("d8 {:02x}", 0xD0 + i), I8086);
            b.def_expanded("fcomp", vec![Reg(*st)], format!("d8 {:02x}", 0xD8 + i), I8086);
            b.def_expanded("fadd", vec![Reg(*st)], format!("d8 {:02x}", 0xC0 + i), I8086);
            b.def_expanded("fmul", vec![Reg(*st)], format!("d8 {:02x}", 0xC8 + i), I8086);
            b.def_expanded("fsub", vec![Reg(*st)], format!("d8 {:02x}", 0xE0 + i), I8086);
            b.def_expanded("fsubr", vec![Reg(*st)], format!("d8 {:02x}", 0xE8 + i), I8086);
            b.def_expanded("fdiv", vec![Reg(*st)], format!("d8 {:02x}", 0xF0 + i), I8086);
            b.def_expanded("fdivr", vec![Reg(*st)], format!("d8 {:02x}", 0xF8 + i), I8086);
            b.def_expanded(
                "fadd",
                vec![Reg(Register::St0), Reg(*st)],
                format!("d8 {:02x}", 0xC0 + i),
                I8086,
            );
            b.def_expanded(
                "fadd",
                vec![Reg(*st), Reg(Register::St0)],
                format!("dc {:02x}", 0xC0 + i),
                I8086,
            );
            b.def_expanded(
                "fmul",
                vec![Reg(Register::St0), Reg(*st)],
                format!("d8 {:02x}", 0xC8 + i),
                I8086,
            );
            b.def_expanded(
                "fmul",
                vec![Reg(*st), Reg(Register::St0)],
                format!("dc {:02x}", 0xC8 + i),
                I8086,
            );
            b.def_expanded(
                "fsub",
                vec![Reg(Register::St0), Reg(*st)],
                format!("d8 {:02x}", 0xE0 + i),
                I8086,
            );
            b.def_expanded(
                "fsub",
                vec![Reg(*st), Reg(Register::St0)],
                format!("dc {:02x}", 0xE8 + i),
                I8086,
            );
            b.def_expanded(
                "fdiv",
                vec![Reg(Register::St0), Reg(*st)],
                format!("d8 {:02x}", 0xF0 + i),
                I8086,
            );
            b.def_expanded(
                "fdiv",
                vec![Reg(*st), Reg(Register::St0)],
                format!("dc {:02x}", 0xF8 + i),
                I8086,
            );
            b.def_expanded("faddp", vec![Reg(*st)], format!("de {:02x}", 0xC0 + i), I8086);
            b.def_expanded("fmulp", vec![Reg(*st)], format!("de {:02x}", 0xC8 + i), I8086);
            b.def_expanded("fsubp", vec![Reg(*st)], format!("de {:02x}", 0xE8 + i), I8086);
            b.def_expanded("fdivp", vec![Reg(*st)], format!("de {:02x}", 0xF8 + i), I8086);
        }
        b.def("fxch", &[], "d9 c9", I8086, None);
        b.def("faddp", &[], "de c1", I8086, None);
        b.def("fmulp", &[], "de c9", I8086, None);
        b.def("fsubp", &[], "de e9", I8086, None);
        b.def("fdivp", &[], "de f9", I8086, None);
        b.def("fld", &[M32], "d9 /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("fst", &[M32], "d9 /2 d0 d1 d2 d3", I8086, Some(0));
        b.def("fstp", &[M32], "d9 /3 d0 d1 d2 d3", I8086, Some(0));
        b.def("fadd", &[M32], "d8 /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("fmul", &[M32], "d8 /1 d0 d1 d2 d3", I8086, Some(0));
        b.def("fcom", &[M32], "d8 /2 d0 d1 d2 d3", I8086, Some(0));
        b.def("fcomp", &[M32], "d8 /3 d0 d1 d2 d3", I8086, Some(0));
        b.def("fsub", &[M32], "d8 /4 d0 d1 d2 d3", I8086, Some(0));
        b.def("fsubr", &[M32], "d8 /5 d0 d1 d2 d3", I8086, Some(0));
        b.def("fdiv", &[M32], "d8 /6 d0 d1 d2 d3", I8086, Some(0));
        b.def("fdivr", &[M32], "d8 /7 d0 d1 d2 d3", I8086, Some(0));
        b.def("fild", &[M16], "df /0 d0 d1 d2 d3", I8086, Some(0));
        b.def("fist", &[M16], "df /2 d0 d1 d2 d3", I8086, Some(0));
        b.def("fistp", &[M16], "df /3 d0 d1 d2 d3", I8086, Some(0));

        Self { map: b.map }
    }

    /// All candidate schemas for a mnemonic, in registration order.
    #[must_use]
    pub fn lookup(&self, mnemonic: &str) -> Option<&[Schema]> {
        self.map.get(mnemonic).map(Vec::as_slice)
    }

    /// Whether the mnemonic is known at all.
    #[must_use]
    pub fn knows(&self, mnemonic: &str) -> bool {
        self.map.contains_key(mnemonic)
    }

    /// Total number of registered schemas (diagnostics/tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Mark the most recently pushed schema for `mnemonic` as carrying its
/// ModR/M `r/m` field in operand `idx`.
fn set_rm(b: &mut Builder, mnemonic: &'static str, idx: usize) {
    if let Some(schemas) = b.map.get_mut(mnemonic) {
        if let Some(last) = schemas.last_mut() {
            last.rm_arg = Some(idx);
        }
    }
}
