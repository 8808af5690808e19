//! Fuzz the preprocessor in isolation: `%`-directive soup must never panic
//! or expand without bound.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nasm86::Preprocessor;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = core::str::from_utf8(data) else {
        return;
    };
    let mut pp = Preprocessor::new();
    let _ = pp.process(source);
});
