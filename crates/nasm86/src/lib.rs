//! # nasm86 — NASM-syntax 16-bit x86 assembler
//!
//! `nasm86` is a pure Rust assembler for 16-bit Intel 8086/80186/80386/
//! 80486 instructions in NASM-compatible syntax, producing a flat machine
//! code image suitable for booting (an MBR) or embedding in an emulator.
//!
//! ## Quick Start
//!
//! ```rust
//! use nasm86::assemble;
//!
//! let code = assemble("mov al, 0x12").unwrap();
//! assert_eq!(code, vec![0xB0, 0x12]);
//! ```
//!
//! ## Features
//!
//! - **Pure Rust** — no C dependencies, no system assembler.
//! - **Two-pass layout** — labels resolve across the file, near jumps
//!   collapse to short jumps once target addresses are known.
//! - **`times`, `org`, `bits`, `cpu`, `equ`, `db`/`dw`/`dd`** — the NASM
//!   directives a boot sector needs.
//! - **`%define` / `%macro` / `%rep` / `%if`** — a text preprocessor runs
//!   before the assembler core.
//! - **`no_std` + `alloc`** — embeddable in hosts without an OS.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// An assembler intentionally performs many narrowing / sign-changing casts
// between integer widths (i64→u8, u8→u32, etc.) and uses dense hex
// literals without separators (0x7C00, 0xAA55).  The lints below are
// expected and acceptable in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::redundant_closure_for_method_calls,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::single_match_else,
    clippy::manual_let_else,
    clippy::unnecessary_wraps,
    clippy::map_unwrap_or,
    clippy::many_single_char_names,
    clippy::redundant_else,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc,
    clippy::needless_continue
)]

extern crate alloc;

/// Public assembler API — builder pattern, one-shot assembly, listing.
pub mod assembler;
/// Binary-template instruction encoder (prefixes, ModR/M, immediates).
pub mod encoder;
/// Error types and source-span diagnostics.
pub mod error;
/// Constant-expression evaluation (RPN over operand tokens).
pub mod expr;
/// Intermediate representation: registers, operands, AST statements.
pub mod ir;
/// Two-pass layout engine: addresses, shrinking, `times` expansion.
pub mod layout;
/// Zero-copy lexer (tokenizer) with span tracking.
pub mod lexer;
/// Memory-expression resolution (`[seg:base+index*scale+disp]`).
pub mod mem;
/// ModR/M and displacement synthesis (16-bit and 32-bit tables).
pub mod modrm;
/// Per-instruction operand parsing.
pub mod operand;
/// NASM-syntax parser producing AST statements.
pub mod parser;
/// Preprocessor: `%define`, `%macro`, `%rep`, conditional assembly.
pub mod preprocessor;
/// The instruction schema registry and operand matching.
pub mod schema;

// Re-exports
pub use assembler::{Assembler, AssemblyResult, ResourceLimits};
pub use error::{AsmError, Span};
pub use ir::{
    ArgToken, ArgTokenKind, BranchHint, ConstDef, Cpu, DataDecl, DataItem, Imm, InstructionNode,
    MemOperand, Mode, Operand, Prefix, Register, Statement, TimesNode,
};
pub use layout::{LayoutOptions, LayoutResult};
pub use preprocessor::Preprocessor;
pub use schema::{ArgPattern, Schema, SchemaRegistry};

use alloc::vec::Vec;

/// Assemble a string of NASM-syntax assembly into machine code bytes.
///
/// Newlines separate statements; labels are defined with a trailing colon.
///
/// # Errors
///
/// Returns [`AsmError`] if the input contains syntax errors, unknown
/// mnemonics, invalid operand combinations, undefined labels, or any other
/// encoding issue.
///
/// # Examples
///
/// ```rust
/// use nasm86::assemble;
///
/// let code = assemble("mov ax, 0x1234").unwrap();
/// assert_eq!(code, vec![0xB8, 0x34, 0x12]);
/// ```
pub fn assemble(source: &str) -> Result<Vec<u8>, AsmError> {
    assemble_with(source, Cpu::default())
}

/// Assemble with an explicit target CPU family.
///
/// # Errors
///
/// Returns [`AsmError`] on assembly failure (see [`assemble`]).
///
/// # Examples
///
/// ```rust
/// use nasm86::{assemble_with, Cpu};
///
/// let code = assemble_with("nop", Cpu::I8086).unwrap();
/// assert_eq!(code, vec![0x90]);
/// ```
pub fn assemble_with(source: &str, cpu: Cpu) -> Result<Vec<u8>, AsmError> {
    let mut asm = Assembler::new();
    asm.cpu(cpu);
    asm.emit(source)?;
    let result = asm.finish()?;
    Ok(result.into_bytes())
}

/// Assemble and return the full result: bytes, labels, origin, pass count.
///
/// # Errors
///
/// Returns [`AsmError`] on assembly failure (see [`assemble`]).
///
/// # Examples
///
/// ```rust
/// use nasm86::assemble_full;
///
/// let result = assemble_full("[org 0x7C00]\nstart: jmp start").unwrap();
/// assert_eq!(result.bytes(), &[0xEB, 0xFE]);
/// assert_eq!(result.label_address("start"), Some(0x7C00));
/// ```
pub fn assemble_full(source: &str) -> Result<AssemblyResult, AsmError> {
    let mut asm = Assembler::new();
    asm.emit(source)?;
    asm.finish()
}
