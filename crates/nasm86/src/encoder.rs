//! Binary-template encoding of matched instructions.
//!
//! A schema's template is a whitespace-separated sequence of textual atoms:
//!
//! | Atom        | Emits                                                    |
//! |-------------|----------------------------------------------------------|
//! | two hex digits | that literal byte                                     |
//! | `i0`–`i3`   | byte N of the immediate operand (little-endian)          |
//! | `d0`–`d3`   | byte N of the displacement; skipped beyond its width     |
//! | `r0`,`r1`   | byte N of the PC-relative offset (target − next instr)   |
//! | `o0`–`o3`   | byte N of a segmented operand's offset half              |
//! | `s0`,`s1`   | byte N of a segmented operand's segment half             |
//! | `mr`        | the assembled ModR/M byte (reg from the other operand)   |
//! | `/0`–`/7`   | ModR/M byte with a fixed `reg` digit                     |
//!
//! `d0`–`d3` collide with the literal bytes `D0`–`D3`; they are read as
//! literals until a `mr`/`/n` atom has been seen (displacement bytes only
//! ever follow the ModR/M byte), or from the second atom on in a bare-offset
//! (moffset) template.
//!
//! Before the template bytes the encoder prepends, in order: instruction
//! prefixes from the source (`lock`/`rep`/`repne`), a segment-override byte
//! when a memory operand names a non-default segment, the operand-size
//! prefix `0x66` when the schema's operand size disagrees with the current
//! mode, and the address-size prefix `0x67` when the addressing form does.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{AsmError, Span};
use crate::ir::{InstructionNode, MemOperand, Mode, Operand, Register};
use crate::modrm::{self, EffectiveAddr};
use crate::schema::{ArgPattern, MatchCtx, Schema, SchemaRegistry};

// ─── InstrBytes ────────────────────────────────────────────

/// Maximum encoded instruction length (prefixes included).
const MAX_INSTR_LEN: usize = 24;

/// Fixed-capacity instruction byte buffer.
///
/// Encoded 16/32-bit instructions never exceed [`MAX_INSTR_LEN`] bytes, so
/// the buffer lives entirely on the stack.
#[derive(Clone, Copy)]
pub struct InstrBytes {
    buf: [u8; MAX_INSTR_LEN],
    len: u8,
}

impl InstrBytes {
    /// Creates an empty buffer.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_INSTR_LEN],
            len: 0,
        }
    }

    /// Appends a byte.
    ///
    /// # Panics
    /// Panics if the buffer is full — template lengths are bounded well
    /// below the capacity.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        assert!((self.len as usize) < MAX_INSTR_LEN, "InstrBytes overflow");
        self.buf[self.len as usize] = byte;
        self.len += 1;
    }

    /// Appends a slice of bytes.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the buffer is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the bytes into a `Vec`.
    #[inline]
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

impl Default for InstrBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for InstrBytes {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

impl AsRef<[u8]> for InstrBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl core::fmt::Debug for InstrBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for InstrBytes {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl PartialEq<[u8]> for InstrBytes {
    fn eq(&self, other: &[u8]) -> bool {
        **self == *other
    }
}

impl Eq for InstrBytes {}

// ─── Template atoms ────────────────────────────────────────

/// A parsed template atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Atom {
    Byte(u8),
    ModRm,
    Digit(u8),
    Imm(u8),
    Disp(u8),
    Rel(u8),
    Off(u8),
    SegByte(u8),
}

/// Parse a template string into atoms, resolving the `d0`–`d3` /
/// `0xD0`–`0xD3` ambiguity by position (see module docs).
fn parse_template(schema: &Schema, span: Span) -> Result<Vec<Atom>, AsmError> {
    let mut atoms = Vec::with_capacity(8);
    let mut seen_modrm = false;
    for (idx, word) in schema.template.split_whitespace().enumerate() {
        let disp_context = seen_modrm || (schema.moffset && idx > 0);
        let atom = match word {
            "mr" => {
                seen_modrm = true;
                Atom::ModRm
            }
            "/0" | "/1" | "/2" | "/3" | "/4" | "/5" | "/6" | "/7" => {
                seen_modrm = true;
                Atom::Digit(word.as_bytes()[1] - b'0')
            }
            "i0" | "i1" | "i2" | "i3" => Atom::Imm(word.as_bytes()[1] - b'0'),
            "d0" | "d1" | "d2" | "d3" if disp_context => Atom::Disp(word.as_bytes()[1] - b'0'),
            "r0" | "r1" => Atom::Rel(word.as_bytes()[1] - b'0'),
            "o0" | "o1" | "o2" | "o3" => Atom::Off(word.as_bytes()[1] - b'0'),
            "s0" | "s1" => Atom::SegByte(word.as_bytes()[1] - b'0'),
            _ => {
                let byte = parse_hex_byte(word).ok_or_else(|| AsmError::UnknownBinarySchemaDef {
                    atom: String::from(word),
                    span,
                })?;
                Atom::Byte(byte)
            }
        };
        atoms.push(atom);
    }
    Ok(atoms)
}

fn parse_hex_byte(word: &str) -> Option<u8> {
    let bytes = word.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let hi = hex_digit(bytes[0])?;
    let lo = hex_digit(bytes[1])?;
    Some(hi * 16 + lo)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ─── Encoding plan ─────────────────────────────────────────

/// Where the ModR/M `reg` field comes from.
#[derive(Debug, Clone, Copy)]
enum RegField {
    Fixed(u8),
    Operand(usize),
}

/// A fully resolved ModR/M arrangement.
#[derive(Debug, Clone, Copy)]
struct RmPlan {
    mod_bits: u8,
    rm: u8,
    sib: Option<u8>,
    reg_field: RegField,
}

/// Everything needed to emit (or measure) one instruction.
struct Plan {
    atoms: Vec<Atom>,
    prefixes: InstrBytes,
    rm: Option<RmPlan>,
    disp_size: u8,
    disp: i64,
    imm_idx: Option<usize>,
    rel_idx: Option<usize>,
    seg_idx: Option<usize>,
}

/// Segment-override prefix byte for a segment register.
fn sreg_prefix(sreg: Register, span: Span) -> Result<u8, AsmError> {
    match sreg {
        Register::Cs => Ok(0x2E),
        Register::Ss => Ok(0x36),
        Register::Ds => Ok(0x3E),
        Register::Es => Ok(0x26),
        Register::Fs => Ok(0x64),
        Register::Gs => Ok(0x65),
        other => Err(AsmError::IncorrectSregOverride {
            register: other.name().to_string(),
            span,
        }),
    }
}

/// The segment a memory operand uses when no override is given.
fn default_segment(mem: &MemOperand) -> Register {
    match mem.base {
        Some(Register::Bp) | Some(Register::Ebp) | Some(Register::Esp) => Register::Ss,
        _ => Register::Ds,
    }
}

fn build_plan(
    schema: &Schema,
    ops: &[Operand],
    instr: &InstructionNode,
    mode: Mode,
) -> Result<Plan, AsmError> {
    let span = instr.span;
    let atoms = parse_template(schema, span)?;

    let mut plan = Plan {
        atoms,
        prefixes: InstrBytes::new(),
        rm: None,
        disp_size: 0,
        disp: 0,
        imm_idx: None,
        rel_idx: None,
        seg_idx: None,
    };

    // Source-level prefixes first, in source order.
    for p in &instr.prefixes {
        plan.prefixes.push(p.byte());
    }

    // Segment override from memory operands.
    let mut override_byte: Option<u8> = None;
    for op in ops {
        if let Operand::Mem(mem) = op {
            if let Some(sreg) = mem.sreg {
                if sreg != default_segment(mem) {
                    let byte = sreg_prefix(sreg, span)?;
                    if override_byte.is_some_and(|b| b != byte) {
                        return Err(AsmError::ConflictSregOverride { span });
                    }
                    override_byte = Some(byte);
                }
            }
        }
    }
    if let Some(byte) = override_byte {
        plan.prefixes.push(byte);
    }

    // Operand-size prefix.
    if let Some(bytes) = schema.operand_bytes() {
        if bytes != 1 && bytes != mode.word_bytes() {
            plan.prefixes.push(0x66);
        }
    }

    // ModR/M arrangement.
    let needs_modrm = plan
        .atoms
        .iter()
        .any(|a| matches!(a, Atom::ModRm | Atom::Digit(_)));
    let mut ea: Option<EffectiveAddr> = None;
    if needs_modrm {
        let rm_idx = plan_rm_index(schema, ops, instr)?;
        let reg_field = match plan
            .atoms
            .iter()
            .find(|a| matches!(a, Atom::ModRm | Atom::Digit(_)))
        {
            Some(Atom::Digit(d)) => RegField::Fixed(*d),
            _ => {
                // `mr`: the reg field comes from the other register operand.
                let other = ops
                    .iter()
                    .enumerate()
                    .position(|(i, op)| i != rm_idx && matches!(op, Operand::Reg(_)))
                    .ok_or_else(|| AsmError::MissingRmByteDef {
                        mnemonic: instr.mnemonic.clone(),
                        span,
                    })?;
                RegField::Operand(other)
            }
        };
        match &ops[rm_idx] {
            Operand::Reg(r) => {
                plan.rm = Some(RmPlan {
                    mod_bits: 0b11,
                    rm: r.code(),
                    sib: None,
                    reg_field,
                });
            }
            Operand::Mem(mem) => {
                let addr = modrm::effective_addr(mem, mode, span)?;
                plan.rm = Some(RmPlan {
                    mod_bits: addr.mod_bits,
                    rm: addr.rm,
                    sib: addr.sib,
                    reg_field,
                });
                plan.disp_size = addr.disp_size;
                plan.disp = addr.disp;
                ea = Some(addr);
            }
            _ => {
                return Err(AsmError::MissingRmByteDef {
                    mnemonic: instr.mnemonic.clone(),
                    span,
                });
            }
        }
    }

    // Bare-offset (moffset) forms take the displacement straight from the
    // memory operand at the mode's address width.
    if schema.moffset {
        let mem = ops
            .iter()
            .find_map(|op| match op {
                Operand::Mem(m) => Some(m),
                _ => None,
            })
            .ok_or_else(|| AsmError::MissingMemArgDef {
                mnemonic: instr.mnemonic.clone(),
                span,
            })?;
        let width = mode.word_bytes();
        if !mem.unresolved && unsigned_fits(mem.disp, width) == Fits::No {
            return Err(AsmError::DisplacementExceedingByteSize {
                displacement: mem.disp,
                size: width,
                span,
            });
        }
        plan.disp_size = width;
        plan.disp = mem.disp;
    }

    // Address-size prefix: the chosen addressing form disagrees with the mode.
    if let Some(addr) = ea {
        let mode_bits = match mode {
            Mode::Bits16 => 16,
            Mode::Bits32 => 32,
        };
        if addr.addr_bits != mode_bits {
            plan.prefixes.push(0x67);
        }
    }

    // Operand indices for immediate / relative / segmented atoms.
    plan.imm_idx = schema.args.iter().position(|p| p.is_immediate());
    plan.rel_idx = schema.args.iter().position(|p| p.is_relative());
    plan.seg_idx = schema
        .args
        .iter()
        .position(|p| matches!(p, ArgPattern::SegImm));

    if plan.atoms.iter().any(|a| matches!(a, Atom::Imm(_))) && plan.imm_idx.is_none() {
        return Err(AsmError::MissingImmArgDef {
            mnemonic: instr.mnemonic.clone(),
            span,
        });
    }
    if plan
        .atoms
        .iter()
        .any(|a| matches!(a, Atom::Off(_) | Atom::SegByte(_)))
        && plan.seg_idx.is_none()
    {
        return Err(AsmError::MissingImmArgDef {
            mnemonic: instr.mnemonic.clone(),
            span,
        });
    }

    Ok(plan)
}

/// The operand index feeding the ModR/M `r/m` field.
fn plan_rm_index(
    schema: &Schema,
    ops: &[Operand],
    instr: &InstructionNode,
) -> Result<usize, AsmError> {
    match schema.rm_arg {
        Some(idx) if idx < ops.len() => Ok(idx),
        _ => Err(AsmError::MissingRmByteDef {
            mnemonic: instr.mnemonic.clone(),
            span: instr.span,
        }),
    }
}

#[derive(PartialEq, Eq)]
enum Fits {
    Yes,
    No,
}

fn unsigned_fits(value: i64, width: u8) -> Fits {
    let ok = match width {
        1 => (-0x80..=0xFF).contains(&value),
        2 => (-0x8000..=0xFFFF).contains(&value),
        _ => i64::from(i32::MIN) <= value && value <= i64::from(u32::MAX),
    };
    if ok {
        Fits::Yes
    } else {
        Fits::No
    }
}

/// Total encoded byte length of the plan.
fn plan_len(plan: &Plan) -> usize {
    let mut len = plan.prefixes.len();
    for atom in &plan.atoms {
        len += match atom {
            Atom::Byte(_) | Atom::Imm(_) | Atom::Rel(_) | Atom::Off(_) | Atom::SegByte(_) => 1,
            Atom::ModRm | Atom::Digit(_) => {
                1 + usize::from(plan.rm.is_some_and(|rm| rm.sib.is_some()))
            }
            Atom::Disp(n) => usize::from(*n < plan.disp_size),
        };
    }
    len
}

/// Encoded byte length of `schema` applied to `ops`, prefixes included.
///
/// Used by the relative-target matchers, which need the instruction's end
/// address before any bytes exist.
pub(crate) fn encoded_len(
    schema: &Schema,
    ops: &[Operand],
    instr: &InstructionNode,
    mode: Mode,
) -> Result<usize, AsmError> {
    build_plan(schema, ops, instr, mode).map(|plan| plan_len(&plan))
}

/// Encode `schema` applied to `ops` into bytes.
///
/// `addr` is the instruction's absolute address when known (second pass);
/// without it, relative and label-dependent fields are emitted as zero
/// placeholders of the correct width.
pub fn encode(
    schema: &Schema,
    ops: &[Operand],
    instr: &InstructionNode,
    mode: Mode,
    addr: Option<u64>,
) -> Result<InstrBytes, AsmError> {
    let plan = build_plan(schema, ops, instr, mode)?;
    let total_len = plan_len(&plan);

    let mut out = InstrBytes::new();
    out.extend_from_slice(&plan.prefixes);

    // Relative displacement, when computable.
    let rel: i64 = match (plan.rel_idx, addr) {
        (Some(idx), Some(addr)) => match &ops[idx] {
            Operand::Imm(imm) => imm.value - (addr as i64 + total_len as i64),
            _ => 0,
        },
        _ => 0,
    };

    for atom in &plan.atoms {
        match atom {
            Atom::Byte(b) => out.push(*b),
            Atom::ModRm | Atom::Digit(_) => {
                let rm = plan.rm.ok_or_else(|| AsmError::MissingRmByteDef {
                    mnemonic: instr.mnemonic.clone(),
                    span: instr.span,
                })?;
                let reg = match rm.reg_field {
                    RegField::Fixed(d) => d,
                    RegField::Operand(i) => match &ops[i] {
                        Operand::Reg(r) => r.code(),
                        _ => {
                            return Err(AsmError::MissingRmByteDef {
                                mnemonic: instr.mnemonic.clone(),
                                span: instr.span,
                            });
                        }
                    },
                };
                out.push(modrm::modrm(rm.mod_bits, reg, rm.rm));
                if let Some(sib) = rm.sib {
                    out.push(sib);
                }
            }
            Atom::Disp(n) => {
                if *n < plan.disp_size {
                    out.push(le_byte(plan.disp, *n));
                }
            }
            Atom::Imm(n) => {
                let idx = plan.imm_idx.ok_or_else(|| AsmError::MissingImmArgDef {
                    mnemonic: instr.mnemonic.clone(),
                    span: instr.span,
                })?;
                let value = match &ops[idx] {
                    Operand::Imm(imm) => imm.value,
                    // Unresolved label: placeholder, patched on a later pass.
                    Operand::Label { .. } => 0,
                    _ => {
                        return Err(AsmError::OperandMustBeNumber { span: instr.span });
                    }
                };
                out.push(le_byte(value, *n));
            }
            Atom::Rel(n) => out.push(le_byte(rel, *n)),
            Atom::Off(n) | Atom::SegByte(n) => {
                let idx = plan.seg_idx.ok_or_else(|| AsmError::MissingImmArgDef {
                    mnemonic: instr.mnemonic.clone(),
                    span: instr.span,
                })?;
                let Operand::SegImm { seg, off } = &ops[idx] else {
                    return Err(AsmError::IncorrectSegmentedMemFormat { span: instr.span });
                };
                let value = if matches!(atom, Atom::Off(_)) {
                    off.value
                } else {
                    seg.value
                };
                out.push(le_byte(value, *n));
            }
        }
    }

    debug_assert_eq!(out.len(), total_len);
    Ok(out)
}

#[inline]
fn le_byte(value: i64, n: u8) -> u8 {
    (value as u64 >> (8 * u32::from(n))) as u8
}

// ─── Schema selection ──────────────────────────────────────

/// Find the first matching schema for an instruction and encode it.
///
/// Returns the registration index of the chosen schema together with the
/// bytes, so the layout engine can tell when a later pass picked a
/// different (smaller) form.
pub(crate) fn select_and_encode(
    registry: &SchemaRegistry,
    instr: &InstructionNode,
    ops: &[Operand],
    ctx: &MatchCtx,
) -> Result<(usize, InstrBytes), AsmError> {
    let schemas = registry
        .lookup(&instr.mnemonic)
        .ok_or_else(|| AsmError::UnknownOperation {
            mnemonic: instr.mnemonic.clone(),
            span: instr.span,
        })?;

    for (idx, schema) in schemas.iter().enumerate() {
        if crate::schema::matches(schema, ops, instr, ctx) {
            let bytes = encode(schema, ops, instr, ctx.mode, ctx.addr)?;
            return Ok((idx, bytes));
        }
    }

    // Nothing matched outright. Retry once letting rel8 take an unresolved
    // label, for branches that have no wider relative form.
    if !ctx.relaxed {
        let relaxed = MatchCtx {
            relaxed: true,
            ..*ctx
        };
        for (idx, schema) in schemas.iter().enumerate() {
            if crate::schema::matches(schema, ops, instr, &relaxed) {
                let bytes = encode(schema, ops, instr, ctx.mode, ctx.addr)?;
                return Ok((idx, bytes));
            }
        }
    }

    // No schema fits. If a memory operand never got a size, that is the
    // actionable diagnostic; otherwise the operand combination is wrong.
    if ops
        .iter()
        .any(|op| matches!(op, Operand::Mem(m) if m.size.is_none()))
        && !schemas.iter().any(|s| {
            s.args.iter().any(|p| {
                matches!(
                    p,
                    ArgPattern::MemAny | ArgPattern::NearPtr | ArgPattern::FarPtr | ArgPattern::Moffs
                )
            })
        })
    {
        return Err(AsmError::MissingMemOperandSize { span: instr.span });
    }

    Err(AsmError::InvalidInstructionOperand {
        mnemonic: instr.mnemonic.clone(),
        span: instr.span,
    })
}
