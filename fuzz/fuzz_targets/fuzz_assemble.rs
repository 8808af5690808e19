//! Fuzz the full pipeline: arbitrary text must never panic, only return
//! `Ok(bytes)` or a structured `AsmError`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nasm86::{Assembler, ResourceLimits};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = core::str::from_utf8(data) else {
        return;
    };
    let mut asm = Assembler::new();
    asm.limits(ResourceLimits {
        max_statements: 10_000,
        max_output_bytes: 1 << 20,
        max_errors: 16,
        max_passes: 4,
        max_source_bytes: 1 << 20,
    });
    if asm.emit(source).is_ok() {
        let _ = asm.finish();
    }
});
