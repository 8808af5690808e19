//! Assemble a bootable MBR image and write it to disk.
//!
//! Run with: `cargo run --example boot_sector -- boot.img`
//! Then: `qemu-system-i386 -drive format=raw,file=boot.img`

use std::env;
use std::fs;
use std::process::ExitCode;

use nasm86::assemble_full;

const SOURCE: &str = r"
[bits 16]
[org 0x7C00]

start:
    xor ax, ax
    mov ds, ax
    mov si, message
.print:
    lodsb
    test al, al
    jz .halt
    mov ah, 0x0E
    int 0x10
    jmp .print
.halt:
    hlt
    jmp .halt

message: db 'Hello from nasm86!', 13, 10, 0
";

fn main() -> ExitCode {
    let path = env::args().nth(1).unwrap_or_else(|| String::from("boot.img"));

    let result = match assemble_full(SOURCE) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // Pad to one sector and stamp the boot signature — the on-disk MBR
    // format is the caller's job, not the assembler's.
    let mut image = result.into_bytes();
    if image.len() > 510 {
        eprintln!("error: code does not fit a boot sector ({} bytes)", image.len());
        return ExitCode::FAILURE;
    }
    image.resize(510, 0);
    image.extend_from_slice(&[0x55, 0xAA]);

    if let Err(err) = fs::write(&path, &image) {
        eprintln!("error: cannot write {}: {}", path, err);
        return ExitCode::FAILURE;
    }
    println!("wrote {} ({} bytes)", path, image.len());
    ExitCode::SUCCESS
}
