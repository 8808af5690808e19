//! Error types and source span tracking for diagnostics.

#[allow(unused_imports)]
use alloc::format;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Source location for diagnostics.
///
/// Tracks the line, column, byte offset, and length of a token or construct
/// in the original assembly source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (byte offset within line).
    pub col: u32,
    /// 0-based byte offset from start of source.
    pub offset: usize,
    /// Byte length of the spanned region.
    pub len: usize,
}

impl Span {
    /// Create a new span.
    #[must_use]
    pub fn new(line: u32, col: u32, offset: usize, len: usize) -> Self {
        Self {
            line,
            col,
            offset,
            len,
        }
    }

    /// A dummy span for generated/internal constructs and whole-file errors.
    #[must_use]
    pub fn dummy() -> Self {
        Self {
            line: 0,
            col: 0,
            offset: 0,
            len: 0,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Assembly error with source location and descriptive parameters.
///
/// Every variant maps to a stable mnemonic code (see [`AsmError::code`]) so
/// callers can branch on the class of failure without string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AsmError {
    // ── Lexical / statement shape ───────────────────────────

    /// A character or token the lexer does not recognize.
    UnknownToken {
        /// The offending source text.
        text: String,
        /// Source location of the token.
        span: Span,
    },

    /// Malformed statement or operand list.
    Syntax {
        /// The syntax error message.
        msg: String,
        /// Source location of the syntax error.
        span: Span,
    },

    /// A constant expression that cannot be evaluated.
    IncorrectExpression {
        /// Description of the failure (empty operand, unknown symbol, …).
        detail: String,
        /// Source location of the expression.
        span: Span,
    },

    // ── Operand semantics ───────────────────────────────────

    /// A position that only accepts a numeric operand got something else.
    OperandMustBeNumber {
        /// Source location of the operand.
        span: Span,
    },

    /// Two operands have incompatible byte sizes.
    OperandSizesMismatch {
        /// Byte size of the first operand.
        left: u8,
        /// Byte size of the second operand.
        right: u8,
        /// Source location of the instruction.
        span: Span,
    },

    /// A memory operand's data size can neither be read from an override
    /// nor deduced from the other operand.
    MissingMemOperandSize {
        /// Source location of the memory operand.
        span: Span,
    },

    /// The mnemonic exists but no schema accepts this operand combination.
    InvalidInstructionOperand {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Source location of the instruction.
        span: Span,
    },

    /// Unknown instruction mnemonic.
    UnknownOperation {
        /// The mnemonic that was not recognized.
        mnemonic: String,
        /// Source location of the mnemonic.
        span: Span,
    },

    /// The register before `:` in a memory expression is not a segment register.
    RegisterIsNotSegmentReg {
        /// The offending register name.
        register: String,
        /// Source location of the register.
        span: Span,
    },

    /// An explicitly casted number does not fit the cast size.
    ExceedingCastedNumberSize {
        /// The numeric value.
        value: i64,
        /// The declared byte size.
        size: u8,
        /// Source location of the number.
        span: Span,
    },

    // ── Memory expressions ──────────────────────────────────

    /// More than one `reg*scale` product inside one memory expression.
    ScaleIsAlreadyDefined {
        /// Source location of the second product.
        span: Span,
    },

    /// Scale factor outside {1, 2, 4, 8}.
    IncorrectScale {
        /// The scale value that was given.
        scale: i64,
        /// Source location of the scale.
        span: Span,
    },

    /// A `reg*num` product where neither side is usable (e.g. `reg*reg`).
    IncorrectScaleMemParams {
        /// Source location of the product.
        span: Span,
    },

    /// Memory expression that does not reduce to base/index/displacement.
    IncorrectMemExpression {
        /// Source location of the expression.
        span: Span,
    },

    /// Displacement does not fit its declared byte size.
    DisplacementExceedingByteSize {
        /// The displacement value.
        displacement: i64,
        /// The declared byte size.
        size: u8,
        /// Source location of the displacement.
        span: Span,
    },

    /// A register that cannot take part in an effective address.
    ImpossibleMemReg {
        /// The offending register name.
        register: String,
        /// Source location of the register.
        span: Span,
    },

    /// Scaled-index addressing (or a 32-bit index register) in 16-bit mode.
    ScaleIndexUnsupportedInMode {
        /// Source location of the memory operand.
        span: Span,
    },

    // ── Segmented memory ────────────────────────────────────

    /// A `segment:offset` pair that is not two numbers.
    IncorrectSegmentedMemFormat {
        /// Source location of the pair.
        span: Span,
    },

    /// The segment half of a `segment:offset` pair exceeds two bytes.
    IncorrectSegmentMemArgSize {
        /// Byte size of the segment value.
        size: u8,
        /// Source location of the segment value.
        span: Span,
    },

    /// The offset half of a `segment:offset` pair has an invalid size.
    IncorrectOffsetMemArgSize {
        /// Byte size of the offset value.
        size: u8,
        /// Source location of the offset value.
        span: Span,
    },

    /// The offset half of a `segment:offset` pair exceeds the schema's size.
    OffsetMemArgSizeExceedingSize {
        /// Byte size of the offset value.
        size: u8,
        /// Maximum byte size the encoding supports.
        max: u8,
        /// Source location of the offset value.
        span: Span,
    },

    // ── Encoding ────────────────────────────────────────────

    /// The base/index/displacement combination has no ModR/M encoding.
    InvalidAddressingMode {
        /// Source location of the memory operand.
        span: Span,
    },

    /// A template wants a ModR/M byte but no operand supplies one.
    MissingRmByteDef {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Source location of the instruction.
        span: Span,
    },

    /// A template wants displacement bytes but there is no memory operand.
    MissingMemArgDef {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Source location of the instruction.
        span: Span,
    },

    /// A template wants immediate bytes but there is no immediate operand.
    MissingImmArgDef {
        /// The instruction mnemonic.
        mnemonic: String,
        /// Source location of the instruction.
        span: Span,
    },

    /// A binary template contains an atom the encoder does not know.
    UnknownBinarySchemaDef {
        /// The unknown atom text.
        atom: String,
        /// Source location of the instruction being encoded.
        span: Span,
    },

    /// A segment override that does not map to a prefix byte.
    IncorrectSregOverride {
        /// The offending register name.
        register: String,
        /// Source location of the override.
        span: Span,
    },

    /// Two different segment overrides on one instruction.
    ConflictSregOverride {
        /// Source location of the instruction.
        span: Span,
    },

    // ── Layout ──────────────────────────────────────────────

    /// Label was defined more than once.
    LabelAlreadyDefined {
        /// The duplicated label name.
        label: String,
        /// Source location of the duplicate definition.
        span: Span,
        /// Source location of the first definition.
        first_span: Span,
    },

    /// A local label (`.name`) used before any non-local parent label.
    MissingParentLabel {
        /// The local label name.
        label: String,
        /// Source location of the use.
        span: Span,
    },

    /// Referenced label was never defined.
    UnknownLabel {
        /// The undefined label name.
        label: String,
        /// Source location of the reference.
        span: Span,
    },

    /// A second `org` directive.
    OriginRedefined {
        /// Source location of the second `org`.
        span: Span,
    },

    /// An unsupported `bits`/`cpu` value, or an `org` outside the mode's range.
    UnsupportedCompilerMode {
        /// Description of the rejected mode parameter.
        detail: String,
        /// Source location of the directive.
        span: Span,
    },

    /// Layout did not reach a fixpoint within the pass budget.
    UnableToCompileFile {
        /// Number of passes that were attempted.
        passes: usize,
    },

    /// A node kind that may not appear while re-laying out expanded code.
    UnpermittedNodeInPostprocessMode {
        /// Source location of the node.
        span: Span,
    },

    /// `equ` with the wrong number of arguments.
    IncorrectEquArgsCount {
        /// Number of arguments that were given.
        count: usize,
        /// Source location of the directive.
        span: Span,
    },

    /// `times` with a negative or non-numeric repeat count.
    IncorrectTimesValue {
        /// The evaluated repeat count.
        value: i64,
        /// Source location of the count expression.
        span: Span,
    },

    // ── Ambient ─────────────────────────────────────────────

    /// A configurable resource limit was exceeded (defense against DoS).
    ResourceLimitExceeded {
        /// Human-readable name of the resource (e.g. "statements").
        resource: String,
        /// The configured limit that was exceeded.
        limit: usize,
    },

    /// Multiple errors collected during assembly.
    Multiple {
        /// The collected assembly errors.
        errors: Vec<AsmError>,
    },
}

impl AsmError {
    /// The stable mnemonic code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AsmError::UnknownToken { .. } => "UNKNOWN_TOKEN",
            AsmError::Syntax { .. } => "SYNTAX_ERROR",
            AsmError::IncorrectExpression { .. } => "INCORRECT_EXPRESSION",
            AsmError::OperandMustBeNumber { .. } => "OPERAND_MUST_BE_NUMBER",
            AsmError::OperandSizesMismatch { .. } => "OPERAND_SIZES_MISMATCH",
            AsmError::MissingMemOperandSize { .. } => "MISSING_MEM_OPERAND_SIZE",
            AsmError::InvalidInstructionOperand { .. } => "INVALID_INSTRUCTION_OPERAND",
            AsmError::UnknownOperation { .. } => "UNKNOWN_OPERATION",
            AsmError::RegisterIsNotSegmentReg { .. } => "REGISTER_IS_NOT_SEGMENT_REG",
            AsmError::ExceedingCastedNumberSize { .. } => "EXCEEDING_CASTED_NUMBER_SIZE",
            AsmError::ScaleIsAlreadyDefined { .. } => "SCALE_IS_ALREADY_DEFINED",
            AsmError::IncorrectScale { .. } => "INCORRECT_SCALE",
            AsmError::IncorrectScaleMemParams { .. } => "INCORRECT_SCALE_MEM_PARAMS",
            AsmError::IncorrectMemExpression { .. } => "INCORRECT_MEM_EXPRESSION",
            AsmError::DisplacementExceedingByteSize { .. } => "DISPLACEMENT_EXCEEDING_BYTE_SIZE",
            AsmError::ImpossibleMemReg { .. } => "IMPOSSIBLE_MEM_REG",
            AsmError::ScaleIndexUnsupportedInMode { .. } => "SCALE_INDEX_IS_UNSUPPORTED_IN_MODE",
            AsmError::IncorrectSegmentedMemFormat { .. } => "INCORRECT_SEGMENTED_MEM_FORMAT",
            AsmError::IncorrectSegmentMemArgSize { .. } => "INCORRECT_SEGMENT_MEM_ARG_SIZE",
            AsmError::IncorrectOffsetMemArgSize { .. } => "INCORRECT_OFFSET_MEM_ARG_SIZE",
            AsmError::OffsetMemArgSizeExceedingSize { .. } => "OFFSET_MEM_ARG_SIZE_EXCEEDING_SIZE",
            AsmError::InvalidAddressingMode { .. } => "INVALID_ADDRESSING_MODE",
            AsmError::MissingRmByteDef { .. } => "MISSING_RM_BYTE_DEF",
            AsmError::MissingMemArgDef { .. } => "MISSING_MEM_ARG_DEF",
            AsmError::MissingImmArgDef { .. } => "MISSING_IMM_ARG_DEF",
            AsmError::UnknownBinarySchemaDef { .. } => "UNKNOWN_BINARY_SCHEMA_DEF",
            AsmError::IncorrectSregOverride { .. } => "INCORRECT_SREG_OVERRIDE",
            AsmError::ConflictSregOverride { .. } => "CONFLICT_SREG_OVERRIDE",
            AsmError::LabelAlreadyDefined { .. } => "LABEL_ALREADY_DEFINED",
            AsmError::MissingParentLabel { .. } => "MISSING_PARENT_LABEL",
            AsmError::UnknownLabel { .. } => "UNKNOWN_LABEL",
            AsmError::OriginRedefined { .. } => "ORIGIN_REDEFINED",
            AsmError::UnsupportedCompilerMode { .. } => "UNSUPPORTED_COMPILER_MODE",
            AsmError::UnableToCompileFile { .. } => "UNABLE_TO_COMPILE_FILE",
            AsmError::UnpermittedNodeInPostprocessMode { .. } => {
                "UNPERMITTED_NODE_IN_POSTPROCESS_MODE"
            }
            AsmError::IncorrectEquArgsCount { .. } => "INCORRECT_EQU_ARGS_COUNT",
            AsmError::IncorrectTimesValue { .. } => "INCORRECT_TIMES_VALUE",
            AsmError::ResourceLimitExceeded { .. } => "RESOURCE_LIMIT_EXCEEDED",
            AsmError::Multiple { .. } => "MULTIPLE",
        }
    }

    /// The source span the error points at, if it has one.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            AsmError::UnknownToken { span, .. }
            | AsmError::Syntax { span, .. }
            | AsmError::IncorrectExpression { span, .. }
            | AsmError::OperandMustBeNumber { span }
            | AsmError::OperandSizesMismatch { span, .. }
            | AsmError::MissingMemOperandSize { span }
            | AsmError::InvalidInstructionOperand { span, .. }
            | AsmError::UnknownOperation { span, .. }
            | AsmError::RegisterIsNotSegmentReg { span, .. }
            | AsmError::ExceedingCastedNumberSize { span, .. }
            | AsmError::ScaleIsAlreadyDefined { span }
            | AsmError::IncorrectScale { span, .. }
            | AsmError::IncorrectScaleMemParams { span }
            | AsmError::IncorrectMemExpression { span }
            | AsmError::DisplacementExceedingByteSize { span, .. }
            | AsmError::ImpossibleMemReg { span, .. }
            | AsmError::ScaleIndexUnsupportedInMode { span }
            | AsmError::IncorrectSegmentedMemFormat { span }
            | AsmError::IncorrectSegmentMemArgSize { span, .. }
            | AsmError::IncorrectOffsetMemArgSize { span, .. }
            | AsmError::OffsetMemArgSizeExceedingSize { span, .. }
            | AsmError::InvalidAddressingMode { span }
            | AsmError::MissingRmByteDef { span, .. }
            | AsmError::MissingMemArgDef { span, .. }
            | AsmError::MissingImmArgDef { span, .. }
            | AsmError::UnknownBinarySchemaDef { span, .. }
            | AsmError::IncorrectSregOverride { span, .. }
            | AsmError::ConflictSregOverride { span }
            | AsmError::LabelAlreadyDefined { span, .. }
            | AsmError::MissingParentLabel { span, .. }
            | AsmError::UnknownLabel { span, .. }
            | AsmError::OriginRedefined { span }
            | AsmError::UnsupportedCompilerMode { span, .. }
            | AsmError::UnpermittedNodeInPostprocessMode { span }
            | AsmError::IncorrectEquArgsCount { span, .. }
            | AsmError::IncorrectTimesValue { span, .. } => Some(*span),
            AsmError::UnableToCompileFile { .. }
            | AsmError::ResourceLimitExceeded { .. }
            | AsmError::Multiple { .. } => None,
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::UnknownToken { text, span } => {
                write!(f, "{}: unknown token '{}'", span, text)
            }
            AsmError::Syntax { msg, span } => write!(f, "{}: {}", span, msg),
            AsmError::IncorrectExpression { detail, span } => {
                write!(f, "{}: incorrect expression: {}", span, detail)
            }
            AsmError::OperandMustBeNumber { span } => {
                write!(f, "{}: operand must be a number", span)
            }
            AsmError::OperandSizesMismatch { left, right, span } => {
                write!(
                    f,
                    "{}: operand sizes do not match ({} bytes vs {} bytes)",
                    span, left, right
                )
            }
            AsmError::MissingMemOperandSize { span } => {
                write!(f, "{}: operation size not specified for memory operand", span)
            }
            AsmError::InvalidInstructionOperand { mnemonic, span } => {
                write!(f, "{}: invalid combination of operands for '{}'", span, mnemonic)
            }
            AsmError::UnknownOperation { mnemonic, span } => {
                write!(f, "{}: unknown operation '{}'", span, mnemonic)
            }
            AsmError::RegisterIsNotSegmentReg { register, span } => {
                write!(f, "{}: register '{}' is not a segment register", span, register)
            }
            AsmError::ExceedingCastedNumberSize { value, size, span } => {
                write!(
                    f,
                    "{}: value {} exceeds the casted size ({} bytes)!",
                    span, value, size
                )
            }
            AsmError::ScaleIsAlreadyDefined { span } => {
                write!(f, "{}: scale is already defined for this memory operand", span)
            }
            AsmError::IncorrectScale { scale, span } => {
                write!(f, "{}: scale must be 1, 2, 4 or 8 (got {})", span, scale)
            }
            AsmError::IncorrectScaleMemParams { span } => {
                write!(f, "{}: incorrect scale multiplication operands", span)
            }
            AsmError::IncorrectMemExpression { span } => {
                write!(f, "{}: incorrect memory expression", span)
            }
            AsmError::DisplacementExceedingByteSize {
                displacement,
                size,
                span,
            } => {
                write!(
                    f,
                    "{}: displacement of {} exceeds arg byte size ({} bytes)!",
                    span, displacement, size
                )
            }
            AsmError::ImpossibleMemReg { register, span } => {
                write!(f, "{}: register '{}' cannot address memory", span, register)
            }
            AsmError::ScaleIndexUnsupportedInMode { span } => {
                write!(f, "{}: scaled index addressing is unsupported in 16-bit mode", span)
            }
            AsmError::IncorrectSegmentedMemFormat { span } => {
                write!(f, "{}: incorrect segment:offset format", span)
            }
            AsmError::IncorrectSegmentMemArgSize { size, span } => {
                write!(f, "{}: segment value size is invalid ({} bytes)", span, size)
            }
            AsmError::IncorrectOffsetMemArgSize { size, span } => {
                write!(f, "{}: offset value size is invalid ({} bytes)", span, size)
            }
            AsmError::OffsetMemArgSizeExceedingSize { size, max, span } => {
                write!(
                    f,
                    "{}: offset of {} bytes exceeds the encodable size ({} bytes)",
                    span, size, max
                )
            }
            AsmError::InvalidAddressingMode { span } => {
                write!(f, "{}: invalid effective address", span)
            }
            AsmError::MissingRmByteDef { mnemonic, span } => {
                write!(f, "{}: no r/m operand available for '{}'", span, mnemonic)
            }
            AsmError::MissingMemArgDef { mnemonic, span } => {
                write!(f, "{}: no memory operand available for '{}'", span, mnemonic)
            }
            AsmError::MissingImmArgDef { mnemonic, span } => {
                write!(f, "{}: no immediate operand available for '{}'", span, mnemonic)
            }
            AsmError::UnknownBinarySchemaDef { atom, span } => {
                write!(f, "{}: unknown binary template atom '{}'", span, atom)
            }
            AsmError::IncorrectSregOverride { register, span } => {
                write!(f, "{}: '{}' cannot be used as a segment override", span, register)
            }
            AsmError::ConflictSregOverride { span } => {
                write!(f, "{}: conflicting segment overrides", span)
            }
            AsmError::LabelAlreadyDefined {
                label,
                span,
                first_span,
            } => {
                write!(
                    f,
                    "{}: label '{}' already defined (first defined at {})",
                    span, label, first_span
                )
            }
            AsmError::MissingParentLabel { label, span } => {
                write!(
                    f,
                    "{}: local label '{}' has no preceding parent label",
                    span, label
                )
            }
            AsmError::UnknownLabel { label, span } => {
                write!(f, "{}: unknown label '{}'", span, label)
            }
            AsmError::OriginRedefined { span } => {
                write!(f, "{}: program origin is already defined", span)
            }
            AsmError::UnsupportedCompilerMode { detail, span } => {
                write!(f, "{}: unsupported mode: {}", span, detail)
            }
            AsmError::UnableToCompileFile { passes } => {
                write!(
                    f,
                    "layout did not stabilize within {} passes (possible oscillation)",
                    passes
                )
            }
            AsmError::UnpermittedNodeInPostprocessMode { span } => {
                write!(f, "{}: node is not permitted inside a repeated block", span)
            }
            AsmError::IncorrectEquArgsCount { count, span } => {
                write!(f, "{}: 'equ' expects exactly one expression (got {})", span, count)
            }
            AsmError::IncorrectTimesValue { value, span } => {
                write!(f, "{}: 'times' repeat count is invalid ({})", span, value)
            }
            AsmError::ResourceLimitExceeded { resource, limit } => {
                write!(f, "resource limit exceeded: {} (limit: {})", resource, limit)
            }
            AsmError::Multiple { errors } => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AsmError {}
