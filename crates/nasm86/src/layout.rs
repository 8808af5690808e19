//! Two-pass layout: address assignment, instruction shrinking, and
//! `times` expansion.
//!
//! Blobs live in a `Vec`; labels record the index of the blob they precede
//! and an offsets table (`offsets[i]` = absolute address of blob `i`, with
//! a sentinel for the end address) is recomputed per iteration. Shrinking
//! therefore never rewrites addresses by hand: a size change simply marks
//! the pass dirty and the next offset computation moves everything that
//! follows.
//!
//! The first pass encodes pessimistically (labels as wide placeholders);
//! the second-pass loop expands `times` blobs in place, re-encodes every
//! label-dependent instruction against real addresses, and repeats until a
//! full sweep changes no sizes. Sizes can only shrink after the first pass,
//! which bounds the loop; the pass budget guards the pathological cases.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::encoder;
use crate::error::{AsmError, Span};
use crate::expr::{self, EvalOutcome, Resolver};
use crate::ir::{
    ArgTokenKind, Cpu, DataDecl, DataItem, InstructionNode, Mode, Statement, TimesNode,
};
use crate::operand::{self, ParsedOperands};
use crate::schema::{MatchCtx, SchemaRegistry};

/// Tunables for a layout run.
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Target CPU family.
    pub cpu: Cpu,
    /// Initial operand-size mode.
    pub mode: Mode,
    /// Maximum second-pass sweeps before giving up.
    pub max_passes: usize,
    /// Maximum output image size in bytes.
    pub max_output_bytes: usize,
    /// Maximum accumulated first-pass errors before bailing.
    pub max_errors: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            cpu: Cpu::default(),
            mode: Mode::Bits16,
            max_passes: 4,
            max_output_bytes: 16 * 1024 * 1024,
            max_errors: 64,
        }
    }
}

/// The stable output of a layout run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutResult {
    /// The flat image, gap-free from `origin` upward.
    pub image: Vec<u8>,
    /// Label addresses (absolute, origin included).
    pub labels: BTreeMap<String, u64>,
    /// The origin address (`org`, default 0).
    pub origin: u64,
    /// Number of passes used, the first pass included.
    pub passes: usize,
}

// ─── Blobs ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct InstrBlob {
    node: InstructionNode,
    bytes: Vec<u8>,
    /// Re-encode on later passes: operands reference labels or carry an
    /// unresolved memory displacement.
    tracked: bool,
    mode: Mode,
    cpu: Cpu,
}

#[derive(Debug, Clone)]
struct DataBlob {
    decl: DataDecl,
    bytes: Vec<u8>,
    needs_update: bool,
}

#[derive(Debug, Clone)]
struct TimesBlob {
    node: TimesNode,
    est_size: u64,
    mode: Mode,
    cpu: Cpu,
}

#[derive(Debug, Clone)]
enum Blob {
    Instr(InstrBlob),
    Data(DataBlob),
    Times(TimesBlob),
}

impl Blob {
    fn size(&self) -> u64 {
        match self {
            Blob::Instr(b) => b.bytes.len() as u64,
            Blob::Data(b) => b.bytes.len() as u64,
            Blob::Times(b) => b.est_size,
        }
    }
}

#[derive(Debug, Clone)]
struct LabelDef {
    index: usize,
    span: Span,
}

// ─── Engine ────────────────────────────────────────────────

/// Run the two-pass layout over a parsed statement list.
///
/// # Errors
///
/// First-pass errors are accumulated and returned together (as
/// `AsmError::Multiple` when there is more than one); second-pass errors
/// (unknown labels, non-converging layout) abort immediately.
pub fn run(
    statements: &[Statement],
    registry: &SchemaRegistry,
    options: &LayoutOptions,
) -> Result<LayoutResult, AsmError> {
    let mut engine = Engine {
        registry,
        options: *options,
        mode: options.mode,
        cpu: options.cpu,
        origin: None,
        blobs: Vec::new(),
        labels: BTreeMap::new(),
        constants: BTreeMap::new(),
        errors: Vec::new(),
    };

    engine.first_pass(statements);
    if !engine.errors.is_empty() {
        let mut errors = core::mem::take(&mut engine.errors);
        return Err(if errors.len() == 1 {
            errors.remove(0)
        } else {
            AsmError::Multiple { errors }
        });
    }

    engine.stabilize()
}

struct Engine<'r> {
    registry: &'r SchemaRegistry,
    options: LayoutOptions,
    mode: Mode,
    cpu: Cpu,
    origin: Option<u64>,
    blobs: Vec<Blob>,
    labels: BTreeMap<String, LabelDef>,
    constants: BTreeMap<String, (i64, Span)>,
    errors: Vec<AsmError>,
}

impl Engine<'_> {
    // ── resolvers ──────────────────────────────────────────

    /// First-pass resolver: `equ` constants only, labels stay symbolic.
    fn const_resolver(&self) -> impl Fn(&str) -> Option<i64> + '_ {
        move |name: &str| self.constants.get(name).map(|(v, _)| *v)
    }

    /// Second-pass resolver: constants plus label addresses under the
    /// given offsets table.
    fn addr_resolver<'a>(&'a self, offsets: &'a [u64]) -> impl Fn(&str) -> Option<i64> + 'a {
        move |name: &str| {
            if let Some((v, _)) = self.constants.get(name) {
                return Some(*v);
            }
            self.labels
                .get(name)
                .and_then(|def| offsets.get(def.index))
                .map(|addr| *addr as i64)
        }
    }

    // ── first pass ─────────────────────────────────────────

    fn first_pass(&mut self, statements: &[Statement]) {
        for stmt in statements {
            if self.errors.len() >= self.options.max_errors {
                break;
            }
            if let Err(err) = self.first_pass_statement(stmt) {
                self.errors.push(err);
            }
        }
    }

    fn first_pass_statement(&mut self, stmt: &Statement) -> Result<(), AsmError> {
        match stmt {
            Statement::Org { origin, span } => {
                if self.origin.is_some() {
                    return Err(AsmError::OriginRedefined { span: *span });
                }
                if *origin > self.mode.max_address() {
                    return Err(AsmError::UnsupportedCompilerMode {
                        detail: alloc::format!(
                            "origin {:#x} exceeds the {} address range",
                            origin,
                            self.mode
                        ),
                        span: *span,
                    });
                }
                self.origin = Some(*origin);
                Ok(())
            }
            Statement::Bits { mode, .. } => {
                self.mode = *mode;
                Ok(())
            }
            Statement::Target { cpu, .. } => {
                self.cpu = *cpu;
                Ok(())
            }
            Statement::Const(def) => {
                self.check_fresh_name(&def.name, def.span)?;
                let outcome = {
                    let resolver = self.const_resolver();
                    expr::evaluate(&def.expr, def.span, Some(&resolver))?
                };
                match outcome {
                    EvalOutcome::Value(v) => {
                        self.constants.insert(def.name.clone(), (v, def.span));
                        Ok(())
                    }
                    EvalOutcome::Unresolved(name) => Err(AsmError::IncorrectExpression {
                        detail: alloc::format!("'{}' is not a constant", name),
                        span: def.span,
                    }),
                }
            }
            Statement::Label { name, span } => {
                self.check_fresh_name(name, *span)?;
                self.labels.insert(
                    name.clone(),
                    LabelDef {
                        index: self.blobs.len(),
                        span: *span,
                    },
                );
                Ok(())
            }
            Statement::Instruction(node) => {
                let blob = self.encode_instruction_first(node)?;
                self.blobs.push(Blob::Instr(blob));
                Ok(())
            }
            Statement::Data(decl) => {
                let (bytes, unresolved) = {
                    let resolver = self.const_resolver();
                    encode_data(decl, Some(&resolver), false)?
                };
                self.blobs.push(Blob::Data(DataBlob {
                    decl: decl.clone(),
                    bytes,
                    needs_update: unresolved,
                }));
                Ok(())
            }
            Statement::Times(times) => {
                check_times_inner(&times.inner)?;
                let outcome = {
                    let resolver = self.const_resolver();
                    expr::evaluate(&times.count, times.span, Some(&resolver))?
                };
                let est_size = match outcome {
                    EvalOutcome::Value(k) => {
                        if k < 0 {
                            return Err(AsmError::IncorrectTimesValue {
                                value: k,
                                span: times.span,
                            });
                        }
                        let unit = self.measure_statement(&times.inner)?;
                        self.check_repeat_budget(k as u64, unit, times.span)?;
                        k as u64 * unit
                    }
                    // Count depends on a label; sized on expansion.
                    EvalOutcome::Unresolved(_) => 0,
                };
                self.blobs.push(Blob::Times(TimesBlob {
                    node: times.clone(),
                    est_size,
                    mode: self.mode,
                    cpu: self.cpu,
                }));
                Ok(())
            }
        }
    }

    fn check_fresh_name(&self, name: &str, span: Span) -> Result<(), AsmError> {
        let first_span = self
            .labels
            .get(name)
            .map(|def| def.span)
            .or_else(|| self.constants.get(name).map(|(_, s)| *s));
        match first_span {
            Some(first_span) => Err(AsmError::LabelAlreadyDefined {
                label: name.to_string(),
                span,
                first_span,
            }),
            None => Ok(()),
        }
    }

    /// Pessimistic first-pass encoding: matching sees no addresses, so
    /// labels take the widest forms and relative fields stay placeholders.
    fn encode_instruction_first(&self, node: &InstructionNode) -> Result<InstrBlob, AsmError> {
        let resolver = self.const_resolver();
        let parsed = operand::parse_operands(node, self.mode, Some(&resolver))?;
        let ctx = MatchCtx {
            mode: self.mode,
            cpu: self.cpu,
            addr: None,
            cur_len: None,
            hint: parsed.hint,
            relaxed: false,
        };
        let (idx, bytes) = encoder::select_and_encode(self.registry, node, &parsed.ops, &ctx)?;
        // Relative targets need the real address even when the target is a
        // plain number, so any rel-form instruction is revisited.
        let has_rel = self
            .registry
            .lookup(&node.mnemonic)
            .and_then(|schemas| schemas.get(idx))
            .is_some_and(|s| s.args.iter().any(|p| p.is_relative()));
        let tracked = parsed.has_labels || parsed.has_unresolved_mem || has_rel;
        Ok(InstrBlob {
            node: node.clone(),
            bytes: bytes.to_vec(),
            tracked,
            mode: self.mode,
            cpu: self.cpu,
        })
    }

    /// Encoded size of a statement, for `times` estimation.
    fn measure_statement(&self, stmt: &Statement) -> Result<u64, AsmError> {
        match stmt {
            Statement::Instruction(node) => {
                Ok(self.encode_instruction_first(node)?.bytes.len() as u64)
            }
            Statement::Data(decl) => {
                let resolver = self.const_resolver();
                let (bytes, _) = encode_data(decl, Some(&resolver), false)?;
                Ok(bytes.len() as u64)
            }
            Statement::Times(times) => {
                let resolver = self.const_resolver();
                match expr::evaluate(&times.count, times.span, Some(&resolver))? {
                    EvalOutcome::Value(k) if k >= 0 => {
                        let unit = self.measure_statement(&times.inner)?;
                        self.check_repeat_budget(k as u64, unit, times.span)?;
                        Ok(k as u64 * unit)
                    }
                    EvalOutcome::Value(k) => Err(AsmError::IncorrectTimesValue {
                        value: k,
                        span: times.span,
                    }),
                    EvalOutcome::Unresolved(_) => Ok(0),
                }
            }
            other => Err(AsmError::UnpermittedNodeInPostprocessMode { span: other.span() }),
        }
    }

    fn check_repeat_budget(&self, count: u64, unit: u64, span: Span) -> Result<(), AsmError> {
        let total = count.saturating_mul(unit.max(1));
        if total > self.options.max_output_bytes as u64 {
            let _ = span;
            return Err(AsmError::ResourceLimitExceeded {
                resource: String::from("times expansion bytes"),
                limit: self.options.max_output_bytes,
            });
        }
        Ok(())
    }

    // ── second pass ────────────────────────────────────────

    fn stabilize(&mut self) -> Result<LayoutResult, AsmError> {
        let mut pass = 0usize;
        loop {
            let offsets = self.compute_offsets();
            let total = offsets.last().copied().unwrap_or(0) - self.origin.unwrap_or(0);
            if total > self.options.max_output_bytes as u64 {
                return Err(AsmError::ResourceLimitExceeded {
                    resource: String::from("output bytes"),
                    limit: self.options.max_output_bytes,
                });
            }

            let mut needs_pass = false;
            let mut restarted = false;

            let mut i = 0;
            while i < self.blobs.len() {
                match &self.blobs[i] {
                    Blob::Times(tb) => {
                        let tb = tb.clone();
                        let expanded = self.expand_times(&tb, &offsets)?;
                        let added = expanded.len();
                        self.blobs.splice(i..=i, expanded);
                        // Later labels now sit `added - 1` blobs further on.
                        for def in self.labels.values_mut() {
                            if def.index > i {
                                def.index = def.index - 1 + added;
                            }
                        }
                        restarted = true;
                        break;
                    }
                    Blob::Instr(ib) if ib.tracked => {
                        let node = ib.node.clone();
                        let (mode, cpu, old_len) = (ib.mode, ib.cpu, ib.bytes.len());
                        let bytes = {
                            let resolver = self.addr_resolver(&offsets);
                            reencode(self.registry, &node, mode, cpu, offsets[i], old_len, &resolver)?
                        };
                        if bytes.len() != old_len {
                            needs_pass = true;
                        }
                        if let Blob::Instr(ib) = &mut self.blobs[i] {
                            ib.bytes = bytes;
                        }
                    }
                    Blob::Data(db) if db.needs_update => {
                        let decl = db.decl.clone();
                        let bytes = {
                            let resolver = self.addr_resolver(&offsets);
                            encode_data(&decl, Some(&resolver), true)?.0
                        };
                        if let Blob::Data(db) = &mut self.blobs[i] {
                            db.bytes = bytes;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }

            if restarted {
                // Addresses after the expansion shifted; rescan without
                // charging the pass budget (each restart consumes one
                // `times` blob, so this terminates).
                continue;
            }
            if !needs_pass {
                return self.emit(pass + 1);
            }
            pass += 1;
            if pass >= self.options.max_passes {
                return Err(AsmError::UnableToCompileFile { passes: pass });
            }
        }
    }

    /// Expand a `times` blob into concrete blobs at its address.
    fn expand_times(&self, tb: &TimesBlob, offsets: &[u64]) -> Result<Vec<Blob>, AsmError> {
        let resolver = self.addr_resolver(offsets);
        let count = match expr::evaluate(&tb.node.count, tb.node.span, Some(&resolver))? {
            EvalOutcome::Value(k) => k,
            EvalOutcome::Unresolved(name) => {
                return Err(AsmError::UnknownLabel {
                    label: name,
                    span: tb.node.span,
                });
            }
        };
        if count < 0 {
            return Err(AsmError::IncorrectTimesValue {
                value: count,
                span: tb.node.span,
            });
        }

        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }
        let unit = self.blob_for_expanded(&tb.node.inner, tb, &resolver)?;
        self.check_repeat_budget(count as u64, unit.size(), tb.node.span)?;

        // Repeated data with no label references is byte-identical across
        // copies: merge it into a single blob instead of half a million.
        if let Blob::Data(db) = &unit {
            if !db.needs_update {
                let mut bytes = Vec::with_capacity(db.bytes.len() * count as usize);
                for _ in 0..count {
                    bytes.extend_from_slice(&db.bytes);
                }
                out.push(Blob::Data(DataBlob {
                    decl: db.decl.clone(),
                    bytes,
                    needs_update: false,
                }));
                return Ok(out);
            }
        }

        out.reserve(count as usize);
        for _ in 1..count {
            out.push(unit.clone());
        }
        out.push(unit);
        Ok(out)
    }

    /// Build one blob for the inner statement of an expanded `times`.
    fn blob_for_expanded(
        &self,
        stmt: &Statement,
        tb: &TimesBlob,
        resolver: &Resolver<'_>,
    ) -> Result<Blob, AsmError> {
        match stmt {
            Statement::Instruction(node) => {
                let parsed = operand::parse_operands(node, tb.mode, Some(resolver))?;
                let ctx = MatchCtx {
                    mode: tb.mode,
                    cpu: tb.cpu,
                    addr: None,
                    cur_len: None,
                    hint: parsed.hint,
                    relaxed: false,
                };
                let (_, bytes) =
                    encoder::select_and_encode(self.registry, node, &parsed.ops, &ctx)?;
                Ok(Blob::Instr(InstrBlob {
                    node: node.clone(),
                    bytes: bytes.to_vec(),
                    // Always revisited: the clone's address is only known
                    // on the next sweep.
                    tracked: true,
                    mode: tb.mode,
                    cpu: tb.cpu,
                }))
            }
            Statement::Data(decl) => {
                let (bytes, _) = encode_data(decl, Some(resolver), true)?;
                // Label addresses may still shift on later sweeps; constants
                // never do.
                let needs_update = decl.items.iter().any(|item| match item {
                    DataItem::Expr(tokens) => tokens.iter().any(|t| {
                        matches!(t.kind, ArgTokenKind::Ident)
                            && !self.constants.contains_key(&t.text)
                    }),
                    DataItem::Str(_) => false,
                });
                Ok(Blob::Data(DataBlob {
                    decl: decl.clone(),
                    bytes,
                    needs_update,
                }))
            }
            Statement::Times(inner) => {
                check_times_inner(&inner.inner)?;
                Ok(Blob::Times(TimesBlob {
                    node: inner.clone(),
                    est_size: 0,
                    mode: tb.mode,
                    cpu: tb.cpu,
                }))
            }
            other => Err(AsmError::UnpermittedNodeInPostprocessMode { span: other.span() }),
        }
    }

    // ── offsets and emission ───────────────────────────────

    /// `offsets[i]` is the absolute address of blob `i`; one extra entry
    /// holds the end address.
    fn compute_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.blobs.len() + 1);
        let mut cursor = self.origin.unwrap_or(0);
        for blob in &self.blobs {
            offsets.push(cursor);
            cursor += blob.size();
        }
        offsets.push(cursor);
        offsets
    }

    fn emit(&self, passes: usize) -> Result<LayoutResult, AsmError> {
        let offsets = self.compute_offsets();
        let origin = self.origin.unwrap_or(0);
        let total = (offsets.last().copied().unwrap_or(origin) - origin) as usize;

        let mut image = Vec::with_capacity(total);
        for blob in &self.blobs {
            match blob {
                Blob::Instr(b) => image.extend_from_slice(&b.bytes),
                Blob::Data(b) => image.extend_from_slice(&b.bytes),
                Blob::Times(b) => {
                    // Unreachable: every times blob is expanded before the
                    // layout can stabilize.
                    return Err(AsmError::IncorrectTimesValue {
                        value: b.est_size as i64,
                        span: b.node.span,
                    });
                }
            }
        }

        let labels = self
            .labels
            .iter()
            .map(|(name, def)| (name.clone(), offsets[def.index]))
            .collect();

        Ok(LayoutResult {
            image,
            labels,
            origin,
            passes,
        })
    }
}

/// Re-parse and re-encode one instruction against real addresses.
fn reencode(
    registry: &SchemaRegistry,
    node: &InstructionNode,
    mode: Mode,
    cpu: Cpu,
    addr: u64,
    cur_len: usize,
    resolver: &Resolver<'_>,
) -> Result<Vec<u8>, AsmError> {
    let parsed: ParsedOperands = operand::parse_operands(node, mode, Some(resolver))?;
    if parsed.has_labels || parsed.has_unresolved_mem {
        return Err(AsmError::UnknownLabel {
            label: parsed.pending.unwrap_or_default(),
            span: node.span,
        });
    }
    let ctx = MatchCtx {
        mode,
        cpu,
        addr: Some(addr),
        cur_len: Some(cur_len),
        hint: parsed.hint,
        relaxed: false,
    };
    let (_, bytes) = encoder::select_and_encode(registry, node, &parsed.ops, &ctx)?;
    Ok(bytes.to_vec())
}

/// Reject statement kinds that may not be repeated by `times`.
fn check_times_inner(stmt: &Statement) -> Result<(), AsmError> {
    match stmt {
        Statement::Instruction(_) | Statement::Data(_) | Statement::Times(_) => Ok(()),
        other => Err(AsmError::UnpermittedNodeInPostprocessMode { span: other.span() }),
    }
}

/// Encode a data-define directive. With `strict` set, an unresolved symbol
/// is an error; otherwise it yields zero placeholders and a dirty flag.
fn encode_data(
    decl: &DataDecl,
    resolver: Option<&Resolver<'_>>,
    strict: bool,
) -> Result<(Vec<u8>, bool), AsmError> {
    let unit = usize::from(decl.unit);
    let mut bytes = Vec::new();
    let mut unresolved = false;

    for item in &decl.items {
        match item {
            DataItem::Str(s) => {
                bytes.extend_from_slice(s);
                if unit > 1 {
                    let rem = s.len() % unit;
                    if rem != 0 {
                        bytes.resize(bytes.len() + unit - rem, 0);
                    }
                }
            }
            DataItem::Expr(tokens) => {
                let value = match expr::evaluate(tokens, decl.span, resolver)? {
                    EvalOutcome::Value(v) => v,
                    EvalOutcome::Unresolved(name) => {
                        if strict {
                            return Err(AsmError::UnknownLabel {
                                label: name,
                                span: decl.span,
                            });
                        }
                        unresolved = true;
                        0
                    }
                };
                if !value_fits(value, decl.unit) {
                    return Err(AsmError::ExceedingCastedNumberSize {
                        value,
                        size: decl.unit,
                        span: decl.span,
                    });
                }
                for n in 0..decl.unit {
                    bytes.push((value as u64 >> (8 * u32::from(n))) as u8);
                }
            }
        }
    }
    Ok((bytes, unresolved))
}

fn value_fits(value: i64, unit: u8) -> bool {
    match unit {
        1 => (-0x80..=0xFF).contains(&value),
        2 => (-0x8000..=0xFFFF).contains(&value),
        _ => i64::from(i32::MIN) <= value && value <= i64::from(u32::MAX),
    }
}
