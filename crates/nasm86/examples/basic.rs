//! Minimal usage: assemble a few instructions and print the bytes.
//!
//! Run with: `cargo run --example basic`

use nasm86::assemble_full;

fn main() {
    let source = "\
mov ax, 0x1234
add ax, 5
loop_top: dec ax
jnz loop_top
hlt
";
    match assemble_full(source) {
        Ok(result) => {
            println!("{} bytes in {} pass(es)", result.len(), result.passes());
            print!("{}", result.listing());
        }
        Err(err) => eprintln!("error: {}", err),
    }
}
