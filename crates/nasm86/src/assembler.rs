//! Public assembler API — builder pattern and one-shot assembly.
//!
//! Ties together the preprocessor, lexer, parser, and layout engine into a
//! fluent API for assembling NASM-syntax source.

#[allow(unused_imports)]
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::AsmError;
use crate::ir::{Cpu, Mode};
use crate::layout::{self, LayoutOptions};
use crate::lexer;
use crate::parser;
use crate::preprocessor::Preprocessor;
use crate::schema::SchemaRegistry;

/// The result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct AssemblyResult {
    bytes: Vec<u8>,
    labels: Vec<(String, u64)>,
    origin: u64,
    passes: usize,
}

impl AssemblyResult {
    /// Get the assembled bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use nasm86::Assembler;
    ///
    /// let mut asm = Assembler::new();
    /// asm.emit("nop")?;
    /// let result = asm.finish()?;
    /// assert_eq!(result.bytes(), &[0x90]);
    /// # Ok::<(), nasm86::AsmError>(())
    /// ```
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume and return the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Get the byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the result is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Label addresses, sorted by address.
    ///
    /// # Examples
    ///
    /// ```
    /// use nasm86::Assembler;
    ///
    /// let mut asm = Assembler::new();
    /// asm.emit("start: nop\nend: ret")?;
    /// let result = asm.finish()?;
    /// assert_eq!(result.label_address("start"), Some(0));
    /// assert_eq!(result.label_address("end"), Some(1));
    /// # Ok::<(), nasm86::AsmError>(())
    /// ```
    #[must_use]
    pub fn labels(&self) -> &[(String, u64)] {
        &self.labels
    }

    /// Look up a label address by name.
    #[must_use]
    pub fn label_address(&self, name: &str) -> Option<u64> {
        self.labels.iter().find(|(n, _)| n == name).map(|(_, a)| *a)
    }

    /// The origin address (`org`, default 0).
    #[must_use]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Number of layout passes used, the first pass included.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Produce a human-readable listing of addresses and hex bytes.
    ///
    /// Labels are shown on their own line with their resolved address;
    /// machine code in rows of up to 8 bytes, broken at label boundaries.
    ///
    /// # Example output
    ///
    /// ```text
    /// 00007C00                  start:
    /// 00007C00  EBFE
    /// ```
    #[must_use]
    pub fn listing(&self) -> String {
        use core::fmt::Write;

        let mut sorted_labels = self.labels.clone();
        sorted_labels.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut label_at: alloc::collections::BTreeMap<u64, Vec<&str>> =
            alloc::collections::BTreeMap::new();
        for (name, addr) in &sorted_labels {
            label_at.entry(*addr).or_default().push(name);
        }

        let mut out = String::new();
        let mut offset = self.origin;
        let mut i = 0;

        while i < self.bytes.len() {
            if let Some(names) = label_at.get(&offset) {
                for name in names {
                    let _ = writeln!(out, "{:08X}                  {}:", offset, name);
                }
            }

            // Up to 8 bytes, but break at the next label boundary.
            let mut chunk_end = core::cmp::min(i + 8, self.bytes.len());
            let range_end = offset + (chunk_end - i) as u64;
            if let Some(&split) = label_at.range((offset + 1)..range_end).next().map(|(k, _)| k) {
                chunk_end = (split - self.origin) as usize;
            }

            let chunk = &self.bytes[i..chunk_end];
            let hex: String = chunk.iter().fold(String::new(), |mut acc, b| {
                let _ = write!(acc, "{:02X}", b);
                acc
            });
            let _ = writeln!(out, "{:08X}  {:<16}", offset, hex);

            offset += (chunk_end - i) as u64;
            i = chunk_end;
        }

        // Labels at the very end of the image.
        if let Some(names) = label_at.get(&offset) {
            for name in names {
                let _ = writeln!(out, "{:08X}                  {}:", offset, name);
            }
        }

        out
    }
}

/// Configurable resource limits for defense against pathological input.
///
/// When assembling untrusted source, these bound the memory and CPU a
/// single compile can consume. The defaults are generous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceLimits {
    /// Maximum parsed statements. Default: 1,000,000.
    pub max_statements: usize,
    /// Maximum output image size in bytes. Default: 16 MiB.
    pub max_output_bytes: usize,
    /// Maximum accumulated errors before bailing. Default: 64.
    pub max_errors: usize,
    /// Maximum layout passes. Default: 4.
    pub max_passes: usize,
    /// Maximum input source bytes per `emit()` call. Default: 64 MiB.
    pub max_source_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_statements: 1_000_000,
            max_output_bytes: 16 * 1024 * 1024,
            max_errors: 64,
            max_passes: 4,
            max_source_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Builder-pattern assembler.
///
/// # Examples
///
/// ```rust
/// use nasm86::Assembler;
///
/// let mut asm = Assembler::new();
/// asm.emit("[bits 16]").unwrap();
/// asm.emit("[org 0x7C00]").unwrap();
/// asm.emit("start: jmp start").unwrap();
/// let result = asm.finish().unwrap();
/// assert_eq!(result.bytes(), &[0xEB, 0xFE]);
/// assert_eq!(result.label_address("start"), Some(0x7C00));
/// ```
#[derive(Debug)]
pub struct Assembler {
    registry: SchemaRegistry,
    preprocessor: Preprocessor,
    statements: Vec<crate::ir::Statement>,
    cpu: Cpu,
    mode: Mode,
    limits: ResourceLimits,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Create a new assembler (16-bit mode, 486 target).
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: SchemaRegistry::new(),
            preprocessor: Preprocessor::new(),
            statements: Vec::new(),
            cpu: Cpu::default(),
            mode: Mode::Bits16,
            limits: ResourceLimits::default(),
        }
    }

    /// Set the target CPU family (a `cpu` directive overrides this).
    pub fn cpu(&mut self, cpu: Cpu) -> &mut Self {
        self.cpu = cpu;
        self
    }

    /// Set the initial operand-size mode (a `bits` directive overrides this).
    pub fn mode(&mut self, mode: Mode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Set resource limits.
    pub fn limits(&mut self, limits: ResourceLimits) -> &mut Self {
        self.limits = limits;
        self
    }

    /// Predefine a preprocessor symbol (as if by `%define`).
    pub fn define(&mut self, name: &str, value: &str) -> &mut Self {
        self.preprocessor.define(name, value);
        self
    }

    /// Feed source text. Can be called repeatedly; statements accumulate.
    ///
    /// # Errors
    ///
    /// Preprocessor, lexer, and parser errors; parse errors for a chunk are
    /// aggregated into `AsmError::Multiple`.
    pub fn emit(&mut self, source: &str) -> Result<(), AsmError> {
        if source.len() > self.limits.max_source_bytes {
            return Err(AsmError::ResourceLimitExceeded {
                resource: String::from("source bytes"),
                limit: self.limits.max_source_bytes,
            });
        }
        let expanded = self.preprocessor.process(source)?;
        let tokens = lexer::tokenize(&expanded)?;
        let statements = parser::parse(&tokens)?;
        if self.statements.len() + statements.len() > self.limits.max_statements {
            return Err(AsmError::ResourceLimitExceeded {
                resource: String::from("statements"),
                limit: self.limits.max_statements,
            });
        }
        self.statements.extend(statements);
        Ok(())
    }

    /// Run the layout and produce the final image.
    ///
    /// # Errors
    ///
    /// Accumulated first-pass errors, unresolved labels, or a layout that
    /// does not stabilize within the pass budget.
    pub fn finish(&mut self) -> Result<AssemblyResult, AsmError> {
        let options = LayoutOptions {
            cpu: self.cpu,
            mode: self.mode,
            max_passes: self.limits.max_passes,
            max_output_bytes: self.limits.max_output_bytes,
            max_errors: self.limits.max_errors,
        };
        let result = layout::run(&self.statements, &self.registry, &options)?;

        let mut labels: Vec<(String, u64)> = result.labels.into_iter().collect();
        labels.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(AssemblyResult {
            bytes: result.image,
            labels,
            origin: result.origin,
            passes: result.passes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_builder() {
        let mut asm = Assembler::new();
        asm.emit("mov al, 0x12").unwrap();
        let result = asm.finish().unwrap();
        assert_eq!(result.bytes(), &[0xB0, 0x12]);
        assert_eq!(result.passes(), 1);
    }

    #[test]
    fn multiple_emit_calls_accumulate() {
        let mut asm = Assembler::new();
        asm.emit("start:").unwrap();
        asm.emit("jmp start").unwrap();
        let result = asm.finish().unwrap();
        assert_eq!(result.bytes(), &[0xEB, 0xFE]);
    }

    #[test]
    fn cpu_gate_is_enforced() {
        // The mnemonic is known; the 486-only form is gated out, so the
        // operand combination is what gets rejected.
        let mut asm = Assembler::new();
        asm.cpu(Cpu::I8086);
        asm.emit("bswap eax").unwrap();
        let err = asm.finish().unwrap_err();
        assert_eq!(err.code(), "INVALID_INSTRUCTION_OPERAND");
    }

    #[test]
    fn cpu_directive_overrides_builder() {
        let mut asm = Assembler::new();
        asm.cpu(Cpu::I8086);
        asm.emit("cpu 486\nbswap eax").unwrap();
        let result = asm.finish().unwrap();
        // bswap eax carries the operand-size prefix in 16-bit mode.
        assert_eq!(result.bytes(), &[0x66, 0x0F, 0xC8]);
    }

    #[test]
    fn preprocessor_symbols_flow_through() {
        let mut asm = Assembler::new();
        asm.define("BOOT", "0x7C00");
        asm.emit("[org 0x7C00]\nmov ax, BOOT").unwrap();
        let result = asm.finish().unwrap();
        assert_eq!(result.bytes(), &[0xB8, 0x00, 0x7C]);
    }

    #[test]
    fn source_limit_is_enforced() {
        let mut asm = Assembler::new();
        asm.limits(ResourceLimits {
            max_source_bytes: 4,
            ..ResourceLimits::default()
        });
        let err = asm.emit("mov ax, 5").unwrap_err();
        assert_eq!(err.code(), "RESOURCE_LIMIT_EXCEEDED");
    }

    #[test]
    fn statement_limit_is_enforced() {
        let mut asm = Assembler::new();
        asm.limits(ResourceLimits {
            max_statements: 1,
            ..ResourceLimits::default()
        });
        let err = asm.emit("nop\nnop").unwrap_err();
        assert_eq!(err.code(), "RESOURCE_LIMIT_EXCEEDED");
    }

    #[test]
    fn listing_shows_labels_and_bytes() {
        let mut asm = Assembler::new();
        asm.emit("[org 0x7C00]\nstart: jmp start").unwrap();
        let listing = asm.finish().unwrap().listing();
        assert!(listing.contains("00007C00                  start:"));
        assert!(listing.contains("00007C00  EBFE"));
    }

    #[test]
    fn listing_breaks_rows_at_labels() {
        let mut asm = Assembler::new();
        asm.emit("db 1, 2\nmid: db 3, 4").unwrap();
        let listing = asm.finish().unwrap().listing();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("00000000  0102"));
        assert!(lines[1].contains("mid:"));
        assert!(lines[2].starts_with("00000002  0304"));
    }

    #[test]
    fn cpu_directive_gates_later_instructions() {
        let mut asm = Assembler::new();
        asm.emit("cpu 8086\nbswap eax").unwrap();
        let err = asm.finish().unwrap_err();
        assert_eq!(err.code(), "INVALID_INSTRUCTION_OPERAND");
    }
}
