//! ModR/M and displacement synthesis for 16-bit and 32-bit addressing.
//!
//! Maps a resolved memory operand to `(mod, rm)` bits, an optional SIB
//! byte, and a displacement width. The 16-bit table only admits the classic
//! base/index pairs (`bx/bp` with `si/di`); `[bp]` with no displacement is
//! not encodable (`mod=00 rm=6` means `[disp16]`) and is emitted with a
//! zero disp8 instead.

use alloc::string::ToString;

use crate::error::{AsmError, Span};
use crate::ir::{MemOperand, Mode, Register};

/// Assemble a ModR/M byte from its fields.
#[inline]
#[must_use]
pub fn modrm(mod_bits: u8, reg: u8, rm: u8) -> u8 {
    (mod_bits << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// Assemble a SIB byte from scale/index/base fields.
#[inline]
#[must_use]
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let ss = match scale {
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    };
    (ss << 6) | ((index & 0x7) << 3) | (base & 0x7)
}

/// A synthesized effective-address encoding (everything but the `reg` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveAddr {
    /// The `mod` field (0–2; register-direct `mod=11` is produced elsewhere).
    pub mod_bits: u8,
    /// The `r/m` field.
    pub rm: u8,
    /// SIB byte, present only for 32-bit addressing forms that need one.
    pub sib: Option<u8>,
    /// Displacement width in bytes to emit (0, 1, 2, or 4).
    pub disp_size: u8,
    /// The displacement value.
    pub disp: i64,
    /// Address-size of the chosen form: 16 or 32.
    pub addr_bits: u8,
}

/// Synthesize the addressing-form half of a ModR/M encoding for `mem`.
///
/// # Errors
///
/// - `SCALE_INDEX_IS_UNSUPPORTED_IN_MODE` — 32-bit registers or scale ≠ 1
///   in 16-bit mode.
/// - `IMPOSSIBLE_MEM_REG` — a register that cannot address memory, or
///   mixed 16/32-bit registers.
/// - `INVALID_ADDRESSING_MODE` — a combination with no table entry.
/// - `DISPLACEMENT_EXCEEDING_BYTE_SIZE` — displacement outside the
///   addressable range.
pub fn effective_addr(mem: &MemOperand, mode: Mode, span: Span) -> Result<EffectiveAddr, AsmError> {
    // Classify the registers involved.
    let mut reg_bits: Option<u8> = None;
    for reg in [mem.base, mem.index].into_iter().flatten() {
        let bits = match reg.size_bytes() {
            2 if !reg.is_segment() => 16,
            4 => 32,
            _ => {
                return Err(AsmError::ImpossibleMemReg {
                    register: reg.name().to_string(),
                    span,
                });
            }
        };
        match reg_bits {
            None => reg_bits = Some(bits),
            Some(prev) if prev != bits => {
                return Err(AsmError::ImpossibleMemReg {
                    register: reg.name().to_string(),
                    span,
                });
            }
            Some(_) => {}
        }
    }

    if mode == Mode::Bits16 && (reg_bits == Some(32) || mem.scale != 1) {
        return Err(AsmError::ScaleIndexUnsupportedInMode { span });
    }

    // Displacement-only operands use the current mode's address size;
    // register forms use the registers' size.
    let addr_bits = reg_bits.unwrap_or(match mode {
        Mode::Bits16 => 16,
        Mode::Bits32 => 32,
    });

    if addr_bits == 16 {
        effective_addr_16(mem, span)
    } else {
        effective_addr_32(mem, span)
    }
}

/// The classic 16-bit addressing table.
fn effective_addr_16(mem: &MemOperand, span: Span) -> Result<EffectiveAddr, AsmError> {
    if !(-0x8000..=0xFFFF).contains(&mem.disp) {
        return Err(AsmError::DisplacementExceedingByteSize {
            displacement: mem.disp,
            size: 2,
            span,
        });
    }

    // [si*1] style operands carry the register in the index slot.
    let (base, index) = match (mem.base, mem.index) {
        (None, Some(idx)) => (Some(idx), None),
        pair => pair,
    };

    // Pure [disp16].
    let (Some(base), index) = (base, index) else {
        return Ok(EffectiveAddr {
            mod_bits: 0b00,
            rm: 0b110,
            sib: None,
            disp_size: 2,
            disp: mem.disp,
            addr_bits: 16,
        });
    };

    let rm = rm_16(base, index)
        .or_else(|| index.and_then(|idx| rm_16(idx, Some(base))))
        .ok_or(AsmError::InvalidAddressingMode { span })?;

    // [bp] has no mod=00 row (that slot is [disp16]); force a zero disp8.
    let bare_bp = rm == 0b110;
    let (mod_bits, disp_size) = if mem.unresolved {
        (0b10, 2)
    } else if mem.disp == 0 && !bare_bp {
        (0b00, 0)
    } else if mem.signed_disp_size <= 1 && (-0x80..=0x7F).contains(&mem.disp) {
        (0b01, 1)
    } else {
        (0b10, 2)
    };

    Ok(EffectiveAddr {
        mod_bits,
        rm,
        sib: None,
        disp_size,
        disp: mem.disp,
        addr_bits: 16,
    })
}

/// `(base, index)` → `r/m` per the 16-bit table; `None` when unlisted.
fn rm_16(base: Register, index: Option<Register>) -> Option<u8> {
    use Register::*;
    match (base, index) {
        (Bx, Some(Si)) => Some(0b000),
        (Bx, Some(Di)) => Some(0b001),
        (Bp, Some(Si)) => Some(0b010),
        (Bp, Some(Di)) => Some(0b011),
        (Si, None) => Some(0b100),
        (Di, None) => Some(0b101),
        (Bp, None) => Some(0b110),
        (Bx, None) => Some(0b111),
        _ => None,
    }
}

/// The 32-bit addressing forms, including SIB.
fn effective_addr_32(mem: &MemOperand, span: Span) -> Result<EffectiveAddr, AsmError> {
    use Register::*;

    if let Some(idx) = mem.index {
        // ESP cannot be an index: the SIB index code 0b100 means "none".
        if idx == Esp {
            return Err(AsmError::InvalidAddressingMode { span });
        }
    }

    // Pure [disp32].
    if mem.base.is_none() && mem.index.is_none() {
        return Ok(EffectiveAddr {
            mod_bits: 0b00,
            rm: 0b101,
            sib: None,
            disp_size: 4,
            disp: mem.disp,
            addr_bits: 32,
        });
    }

    // Index with no base: mod=00 + SIB with base=101 means disp32 follows.
    if let (None, Some(idx)) = (mem.base, mem.index) {
        return Ok(EffectiveAddr {
            mod_bits: 0b00,
            rm: 0b100,
            sib: Some(sib(mem.scale, idx.code(), 0b101)),
            disp_size: 4,
            disp: mem.disp,
            addr_bits: 32,
        });
    }

    let base = mem.base.ok_or(AsmError::InvalidAddressingMode { span })?;
    let need_sib = mem.index.is_some() || base == Esp;

    let (mod_bits, disp_size) = if mem.unresolved {
        (0b10, 4)
    } else if mem.disp == 0 && base != Ebp {
        (0b00, 0)
    } else if (-0x80..=0x7F).contains(&mem.disp) {
        (0b01, 1)
    } else {
        (0b10, 4)
    };

    let (rm, sib_byte) = if need_sib {
        let idx_code = mem.index.map_or(0b100, Register::code);
        (0b100, Some(sib(mem.scale, idx_code, base.code())))
    } else {
        (base.code(), None)
    };

    Ok(EffectiveAddr {
        mod_bits,
        rm,
        sib: sib_byte,
        disp_size,
        disp: mem.disp,
        addr_bits: 32,
    })
}
