//! Layout-level integration tests: `times`, `org`, multi-pass shrinking,
//! and whole-file error behavior.

use nasm86::{assemble, assemble_full, AsmError};

/// `times` repeats data items, not just instructions.
#[test]
fn times_data() {
    assert_eq!(
        assemble("times 2 db 0xAB, 0xCD").unwrap(),
        vec![0xAB, 0xCD, 0xAB, 0xCD]
    );
    assert_eq!(
        assemble("times 2 dw 0x1234").unwrap(),
        vec![0x34, 0x12, 0x34, 0x12]
    );
}

/// Nested `times` multiplies.
#[test]
fn times_nested() {
    assert_eq!(
        assemble("times 2 times 3 db 1").unwrap(),
        vec![1, 1, 1, 1, 1, 1]
    );
}

/// The classic MBR padding idiom, with the byte count from constants.
#[test]
fn times_padding_to_fixed_size() {
    let src = "used equ 2\nnop\nnop\ntimes 8-used db 0\ndw 0xAA55\n";
    let bytes = assemble(src).unwrap();
    assert_eq!(bytes.len(), 10);
    assert_eq!(&bytes[..2], &[0x90, 0x90]);
    assert_eq!(&bytes[8..], &[0x55, 0xAA]);
}

/// `times 0` is legal and emits nothing.
#[test]
fn times_zero() {
    assert_eq!(assemble("times 0 nop\nhlt").unwrap(), vec![0xF4]);
}

/// A negative repeat count is rejected.
#[test]
fn times_negative_rejected() {
    let err = assemble("times 1-2 nop").unwrap_err();
    assert_eq!(err.code(), "INCORRECT_TIMES_VALUE");
}

/// `times` cannot repeat labels or directives.
#[test]
fn times_label_rejected() {
    let err = assemble("times 2 foo:").unwrap_err();
    assert_eq!(err.code(), "UNPERMITTED_NODE_IN_POSTPROCESS_MODE");
}

/// Repeated instructions with label operands resolve per copy.
#[test]
fn times_instruction_with_label() {
    let src = "times 2 call fn\nfn: ret\n";
    let result = assemble_full(src).unwrap();
    assert_eq!(result.label_address("fn"), Some(6));
    // call rel16: first at 0 (rel 3), second at 3 (rel 0).
    assert_eq!(
        result.bytes(),
        &[0xE8, 0x03, 0x00, 0xE8, 0x00, 0x00, 0xC3]
    );
}

/// Data words holding label addresses are patched on the second pass.
#[test]
fn data_label_references() {
    let src = "dw after, 7\nafter: db 1\n";
    let result = assemble_full(src).unwrap();
    assert_eq!(result.label_address("after"), Some(4));
    assert_eq!(result.bytes(), &[0x04, 0x00, 0x07, 0x00, 0x01]);
}

/// Shrinking one jump pulls later targets into range of another: the
/// cascade settles within the pass budget.
#[test]
fn cascading_shrink() {
    // Both jumps start pessimistic (3 bytes); once the first shrinks the
    // second's distance also shrinks.
    let mut src = String::from("jmp a\njmp b\n");
    src.push_str(&"nop\n".repeat(120));
    src.push_str("a: nop\nb: hlt\n");
    let result = assemble_full(&src).unwrap();
    // a = 124, b = 125 once both jumps are short.
    assert_eq!(&result.bytes()[..4], &[0xEB, 0x7A, 0xEB, 0x79]);
    assert!(result.passes() <= 4);
}

/// A stable single-pass program reports one pass.
#[test]
fn pass_counting() {
    let result = assemble_full("mov al, 1\nhlt").unwrap();
    assert_eq!(result.passes(), 1);
    let result = assemble_full("x: jmp x").unwrap();
    assert!(result.passes() >= 2);
}

/// All first-pass diagnostics surface together.
#[test]
fn multiple_errors_accumulate() {
    let err = assemble("blorp\nmov bx, al\nwibble ax\n").unwrap_err();
    let AsmError::Multiple { errors } = err else {
        panic!("expected aggregated errors")
    };
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0].code(), "UNKNOWN_OPERATION");
    assert_eq!(errors[1].code(), "OPERAND_SIZES_MISMATCH");
    assert_eq!(errors[2].code(), "UNKNOWN_OPERATION");
}

/// Duplicate labels carry both definition sites.
#[test]
fn duplicate_label_spans() {
    let err = assemble("x: nop\nx: nop\n").unwrap_err();
    let AsmError::LabelAlreadyDefined { span, first_span, .. } = err else {
        panic!("expected duplicate-label error")
    };
    assert_eq!(first_span.line, 1);
    assert_eq!(span.line, 2);
}

/// A label colliding with an `equ` constant is rejected.
#[test]
fn label_equ_collision() {
    let err = assemble("x equ 5\nx: nop\n").unwrap_err();
    assert_eq!(err.code(), "LABEL_ALREADY_DEFINED");
}

/// Undefined labels in jumps, moves, and data all fail.
#[test]
fn undefined_labels() {
    for src in ["jmp nowhere", "mov ax, nowhere", "dw nowhere"] {
        let err = assemble(src).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_LABEL", "source: {}", src);
    }
}

/// The preprocessor supplies `org` values through `%define`.
#[test]
fn preprocessor_define_feeds_org() {
    let src = "%define BOOT 0x7C00\n[org BOOT]\nstart: jmp start\n";
    let result = assemble_full(src).unwrap();
    assert_eq!(result.label_address("start"), Some(0x7C00));
}

/// A `%macro` body assembles like hand-written source.
#[test]
fn macro_body_assembles() {
    let src = "\
%macro outb 2
mov al, %2
out %1, al
%endmacro
outb 0x20, 0x11
";
    assert_eq!(assemble(src).unwrap(), vec![0xB0, 0x11, 0xE6, 0x20]);
}

/// `%rep` expands before layout, so labels after it shift correctly.
#[test]
fn rep_block_layout() {
    let src = "%rep 4\nnop\n%endrep\nend: hlt\n";
    let result = assemble_full(src).unwrap();
    assert_eq!(result.label_address("end"), Some(4));
}

/// Determinism: the same source always produces the same image.
#[test]
fn deterministic_output() {
    let src = "start: mov si, msg\n.l: lodsb\njnz .l\nmsg: db 'x', 0\n";
    let a = assemble_full(src).unwrap();
    let b = assemble_full(src).unwrap();
    assert_eq!(a, b);
}
