//! Byte-exact instruction encodings, verified against NASM 2.16 output
//! (`nasm -f bin` + `xxd`).
//!
//! All tests run in the default 16-bit mode unless a `[bits 32]` directive
//! says otherwise.

use nasm86::assemble;

fn enc(src: &str) -> Vec<u8> {
    assemble(src).unwrap_or_else(|e| panic!("failed to assemble '{}': {}", src, e))
}

// --- Core data movement ---

/// MOV AL, imm8 — encoding: [0xB0, 0x12]
#[test]
fn mov_al_imm8() {
    assert_eq!(enc("mov al, 0x12"), vec![0xB0, 0x12]);
}

/// MOV AX, imm16 — encoding: [0xB8, 0x34, 0x12]
#[test]
fn mov_ax_imm16() {
    assert_eq!(enc("mov ax, 0x1234"), vec![0xB8, 0x34, 0x12]);
}

/// MOV BL, imm8 — encoding: [0xB3, 0x05]
#[test]
fn mov_bl_imm8() {
    assert_eq!(enc("mov bl, 5"), vec![0xB3, 0x05]);
}

/// Small immediates widen to the destination register's size.
#[test]
fn mov_ax_small_imm_is_16bit() {
    assert_eq!(enc("mov ax, 2"), vec![0xB8, 0x02, 0x00]);
}

/// MOV AX, BX — encoding: [0x89, 0xD8]
#[test]
fn mov_reg_reg() {
    assert_eq!(enc("mov ax, bx"), vec![0x89, 0xD8]);
}

/// MOV AL, [SI+0x5] — encoding: [0x8A, 0x44, 0x05]
#[test]
fn mov_al_mem_si_disp8() {
    assert_eq!(enc("mov al, [si+0x5]"), vec![0x8A, 0x44, 0x05]);
}

/// MOV [BX], AL — encoding: [0x88, 0x07]
#[test]
fn mov_mem_bx_al() {
    assert_eq!(enc("mov [bx], al"), vec![0x88, 0x07]);
}

/// MOV AL, [BX+SI] — encoding: [0x8A, 0x00]
#[test]
fn mov_al_mem_bx_si() {
    assert_eq!(enc("mov al, [bx+si]"), vec![0x8A, 0x00]);
}

/// MOV AX, [BP+DI+0x10] — encoding: [0x8B, 0x43, 0x10]
#[test]
fn mov_ax_mem_bp_di_disp8() {
    assert_eq!(enc("mov ax, [bp+di+0x10]"), vec![0x8B, 0x43, 0x10]);
}

/// Swapped base/index is normalized: [SI+BX] encodes like [BX+SI].
#[test]
fn mov_mem_swapped_base_index() {
    assert_eq!(enc("mov al, [si+bx]"), vec![0x8A, 0x00]);
}

/// [BP] with no displacement needs a zero disp8 (mod=00 rm=6 is [disp16]).
#[test]
fn mov_mem_bare_bp() {
    assert_eq!(enc("mov [bp], ax"), vec![0x89, 0x46, 0x00]);
}

/// Negative displacements use the signed byte form.
#[test]
fn mov_mem_negative_disp() {
    assert_eq!(enc("mov al, [bx-1]"), vec![0x8A, 0x47, 0xFF]);
}

/// 0xFF does not fit a signed byte: disp16 form.
#[test]
fn mov_mem_disp16() {
    assert_eq!(enc("mov al, [bx+0xFF]"), vec![0x8A, 0x87, 0xFF, 0x00]);
}

/// Accumulator absolute loads use the short moffset forms.
#[test]
fn mov_moffs_forms() {
    assert_eq!(enc("mov al, [0x1234]"), vec![0xA0, 0x34, 0x12]);
    assert_eq!(enc("mov ax, [0x1234]"), vec![0xA1, 0x34, 0x12]);
    assert_eq!(enc("mov [0x1234], al"), vec![0xA2, 0x34, 0x12]);
    assert_eq!(enc("mov [0x1234], ax"), vec![0xA3, 0x34, 0x12]);
}

/// MOV with an explicit memory size and an immediate.
#[test]
fn mov_mem_imm_forms() {
    assert_eq!(enc("mov byte [bx], 5"), vec![0xC6, 0x07, 0x05]);
    assert_eq!(enc("mov word [bx], 0x1234"), vec![0xC7, 0x07, 0x34, 0x12]);
}

/// Segment register moves.
#[test]
fn mov_sreg_forms() {
    assert_eq!(enc("mov ax, cs"), vec![0x8C, 0xC8]);
    assert_eq!(enc("mov ds, ax"), vec![0x8E, 0xD8]);
    assert_eq!(enc("mov [bx], es"), vec![0x8C, 0x07]);
}

/// Segment override prefixes (default-segment overrides are suppressed).
#[test]
fn segment_override_prefixes() {
    assert_eq!(enc("mov al, [es:di]"), vec![0x26, 0x8A, 0x05]);
    assert_eq!(enc("mov ax, [cs:si+2]"), vec![0x2E, 0x8B, 0x44, 0x02]);
    assert_eq!(enc("mov al, [ds:bx]"), vec![0x8A, 0x07]);
    assert_eq!(enc("mov al, [ss:bp+2]"), vec![0x8A, 0x46, 0x02]);
    assert_eq!(enc("mov al, [ds:bp+2]"), vec![0x3E, 0x8A, 0x46, 0x02]);
}

/// A quoted string packs little-endian into the immediate.
#[test]
fn mov_string_immediate() {
    assert_eq!(enc("mov ax, 'ab'"), vec![0xB8, 0x61, 0x62]);
}

// --- ALU ---

/// ADD AL, imm8 — encoding: [0x04, 0x05]
#[test]
fn add_al_imm8() {
    assert_eq!(enc("add al, 5"), vec![0x04, 0x05]);
}

/// Sign-extended imm8 form wins for small immediates: [0x83, 0xC0, 0x05]
#[test]
fn add_ax_small_imm_uses_83() {
    assert_eq!(enc("add ax, 5"), vec![0x83, 0xC0, 0x05]);
}

/// Wide immediates take the accumulator form: [0x05, 0x34, 0x12]
#[test]
fn add_ax_wide_imm() {
    assert_eq!(enc("add ax, 0x1234"), vec![0x05, 0x34, 0x12]);
}

/// SUB DI, 1 — encoding: [0x83, 0xEF, 0x01]
#[test]
fn sub_di_one_uses_83() {
    assert_eq!(enc("sub di, 1"), vec![0x83, 0xEF, 0x01]);
}

/// 0xFFFF equals the sign-extension of 0xFF, so the 0x83 form applies.
#[test]
fn sub_sign_extension_boundary() {
    assert_eq!(enc("sub di, 0xFFFF"), vec![0x83, 0xEF, 0xFF]);
    // 0x80 does not sign-extend to itself in 16 bits.
    assert_eq!(enc("sub di, 0x80"), vec![0x81, 0xEF, 0x80, 0x00]);
}

/// XOR AX, AX — encoding: [0x31, 0xC0]
#[test]
fn xor_ax_ax() {
    assert_eq!(enc("xor ax, ax"), vec![0x31, 0xC0]);
}

/// ALU register-memory forms.
#[test]
fn alu_mem_forms() {
    assert_eq!(enc("add [bx], ax"), vec![0x01, 0x07]);
    assert_eq!(enc("add ax, [bx]"), vec![0x03, 0x07]);
    assert_eq!(enc("cmp byte [bx], 0"), vec![0x80, 0x3F, 0x00]);
    assert_eq!(enc("add word [bx], 5"), vec![0x83, 0x07, 0x05]);
}

/// AND AL, imm8 / OR AX, imm16.
#[test]
fn and_or_forms() {
    assert_eq!(enc("and al, 0x0F"), vec![0x24, 0x0F]);
    assert_eq!(enc("or ax, 0x8000"), vec![0x0D, 0x00, 0x80]);
}

/// TEST forms.
#[test]
fn test_forms() {
    assert_eq!(enc("test al, 1"), vec![0xA8, 0x01]);
    assert_eq!(enc("test ax, bx"), vec![0x85, 0xD8]);
    assert_eq!(enc("test byte [bx], 0x80"), vec![0xF6, 0x07, 0x80]);
}

/// INC/DEC short register forms and rm forms.
#[test]
fn inc_dec_forms() {
    assert_eq!(enc("inc ax"), vec![0x40]);
    assert_eq!(enc("dec bx"), vec![0x4B]);
    assert_eq!(enc("inc byte [bx]"), vec![0xFE, 0x07]);
    assert_eq!(enc("dec word [si]"), vec![0xFF, 0x0C]);
}

/// Unary group.
#[test]
fn unary_forms() {
    assert_eq!(enc("not ax"), vec![0xF7, 0xD0]);
    assert_eq!(enc("neg bl"), vec![0xF6, 0xDB]);
    assert_eq!(enc("mul cx"), vec![0xF7, 0xE1]);
    assert_eq!(enc("div word [bx]"), vec![0xF7, 0x37]);
}

/// IMUL two-operand and three-operand forms.
#[test]
fn imul_forms() {
    assert_eq!(enc("imul ax, bx"), vec![0x0F, 0xAF, 0xC3]);
    assert_eq!(enc("imul ax, bx, 5"), vec![0x6B, 0xC3, 0x05]);
    assert_eq!(enc("imul ax, bx, 0x1234"), vec![0x69, 0xC3, 0x34, 0x12]);
}

// --- Shifts ---

/// Shift-by-one uses the D1 group.
#[test]
fn shift_by_one() {
    assert_eq!(enc("shl ax, 1"), vec![0xD1, 0xE0]);
    assert_eq!(enc("rol byte [bx], 1"), vec![0xD0, 0x07]);
}

/// Shift-by-CL uses the D3 group.
#[test]
fn shift_by_cl() {
    assert_eq!(enc("shr bl, cl"), vec![0xD2, 0xEB]);
    assert_eq!(enc("shl ax, cl"), vec![0xD3, 0xE0]);
}

/// Shift-by-imm8 uses the 186+ C1 group.
#[test]
fn shift_by_imm8() {
    assert_eq!(enc("sar ax, 3"), vec![0xC1, 0xF8, 0x03]);
}

// --- Stack ---

/// PUSH/POP register and segment forms.
#[test]
fn push_pop_forms() {
    assert_eq!(enc("push ax"), vec![0x50]);
    assert_eq!(enc("pop di"), vec![0x5F]);
    assert_eq!(enc("push es"), vec![0x06]);
    assert_eq!(enc("pop es"), vec![0x07]);
    assert_eq!(enc("push cs"), vec![0x0E]);
    assert_eq!(enc("push word [bx]"), vec![0xFF, 0x37]);
    assert_eq!(enc("pop word [bx]"), vec![0x8F, 0x07]);
}

/// PUSH immediate forms (80186+).
#[test]
fn push_imm_forms() {
    assert_eq!(enc("push 5"), vec![0x6A, 0x05]);
    assert_eq!(enc("push 0x1234"), vec![0x68, 0x34, 0x12]);
    assert_eq!(enc("push word 5"), vec![0x68, 0x05, 0x00]);
}

/// XCHG with the accumulator is a single byte.
#[test]
fn xchg_forms() {
    assert_eq!(enc("xchg ax, bx"), vec![0x93]);
    assert_eq!(enc("xchg cx, ax"), vec![0x91]);
    assert_eq!(enc("xchg bl, bh"), vec![0x86, 0xFB]);
    assert_eq!(enc("xchg [bx], al"), vec![0x86, 0x07]);
}

// --- Effective-address loads ---

/// LEA ignores the memory operand's data size.
#[test]
fn lea_forms() {
    assert_eq!(enc("lea ax, [bx+si+8]"), vec![0x8D, 0x40, 0x08]);
    assert_eq!(enc("lea di, [0x1234]"), vec![0x8D, 0x3E, 0x34, 0x12]);
}

/// LES/LDS load a pointer pair.
#[test]
fn les_lds_forms() {
    assert_eq!(enc("les ax, [bx]"), vec![0xC4, 0x07]);
    assert_eq!(enc("lds si, [bx]"), vec![0xC5, 0x37]);
}

// --- Control flow ---

/// Far absolute jump and call carry a segment:offset immediate.
#[test]
fn far_direct_forms() {
    assert_eq!(
        enc("jmp 0x1234:0x5678"),
        vec![0xEA, 0x78, 0x56, 0x34, 0x12]
    );
    assert_eq!(
        enc("call 0x1234:0x5678"),
        vec![0x9A, 0x78, 0x56, 0x34, 0x12]
    );
}

/// Indirect near and far branches.
#[test]
fn indirect_branch_forms() {
    assert_eq!(enc("jmp [bx]"), vec![0xFF, 0x27]);
    assert_eq!(enc("jmp far [bx]"), vec![0xFF, 0x2F]);
    assert_eq!(enc("call [bx]"), vec![0xFF, 0x17]);
    assert_eq!(enc("call far [bx]"), vec![0xFF, 0x1F]);
}

/// Near call to an absolute target is relative to the next instruction.
#[test]
fn call_near_absolute() {
    assert_eq!(enc("call 0x5"), vec![0xE8, 0x02, 0x00]);
}

/// RET family.
#[test]
fn ret_forms() {
    assert_eq!(enc("ret"), vec![0xC3]);
    assert_eq!(enc("ret 4"), vec![0xC2, 0x04, 0x00]);
    assert_eq!(enc("retf"), vec![0xCB]);
    assert_eq!(enc("retf 2"), vec![0xCA, 0x02, 0x00]);
    assert_eq!(enc("iret"), vec![0xCF]);
}

/// INT family.
#[test]
fn int_forms() {
    assert_eq!(enc("int 0x10"), vec![0xCD, 0x10]);
    assert_eq!(enc("int3"), vec![0xCC]);
    assert_eq!(enc("into"), vec![0xCE]);
}

// --- I/O and prefixes ---

/// IN/OUT forms.
#[test]
fn in_out_forms() {
    assert_eq!(enc("in al, 0x60"), vec![0xE4, 0x60]);
    assert_eq!(enc("in al, dx"), vec![0xEC]);
    assert_eq!(enc("in ax, dx"), vec![0xED]);
    assert_eq!(enc("out 0x20, al"), vec![0xE6, 0x20]);
    assert_eq!(enc("out dx, ax"), vec![0xEF]);
}

/// REP/LOCK prefixes precede the opcode.
#[test]
fn prefix_forms() {
    assert_eq!(enc("rep movsb"), vec![0xF3, 0xA4]);
    assert_eq!(enc("rep stosw"), vec![0xF3, 0xAB]);
    assert_eq!(enc("repne scasb"), vec![0xF2, 0xAE]);
    assert_eq!(enc("lock inc word [bx]"), vec![0xF0, 0xFF, 0x07]);
}

// --- Flags, strings, misc ---

/// Zero-operand instructions.
#[test]
fn fixed_forms() {
    assert_eq!(enc("nop"), vec![0x90]);
    assert_eq!(enc("hlt"), vec![0xF4]);
    assert_eq!(enc("cli"), vec![0xFA]);
    assert_eq!(enc("sti"), vec![0xFB]);
    assert_eq!(enc("cld"), vec![0xFC]);
    assert_eq!(enc("cbw"), vec![0x98]);
    assert_eq!(enc("cwd"), vec![0x99]);
    assert_eq!(enc("pusha"), vec![0x60]);
    assert_eq!(enc("popa"), vec![0x61]);
    assert_eq!(enc("pushf"), vec![0x9C]);
    assert_eq!(enc("lahf"), vec![0x9F]);
    assert_eq!(enc("xlatb"), vec![0xD7]);
    assert_eq!(enc("leave"), vec![0xC9]);
    assert_eq!(enc("salc"), vec![0xD6]);
}

/// AAM/AAD default to base 10.
#[test]
fn aam_aad_forms() {
    assert_eq!(enc("aam"), vec![0xD4, 0x0A]);
    assert_eq!(enc("aad"), vec![0xD5, 0x0A]);
    assert_eq!(enc("aam 16"), vec![0xD4, 0x10]);
}

// --- 386/486 extensions ---

/// MOVZX/MOVSX widen across sizes.
#[test]
fn movzx_movsx_forms() {
    assert_eq!(enc("movzx ax, bl"), vec![0x0F, 0xB6, 0xC3]);
    assert_eq!(enc("movsx ax, bl"), vec![0x0F, 0xBE, 0xC3]);
    assert_eq!(enc("movzx eax, bl"), vec![0x66, 0x0F, 0xB6, 0xC3]);
}

/// 32-bit operands in 16-bit mode carry the 0x66 prefix.
#[test]
fn dword_operands_in_bits16() {
    assert_eq!(
        enc("mov eax, 0x12345678"),
        vec![0x66, 0xB8, 0x78, 0x56, 0x34, 0x12]
    );
    assert_eq!(enc("add eax, 1"), vec![0x66, 0x83, 0xC0, 0x01]);
    assert_eq!(enc("inc eax"), vec![0x66, 0x40]);
}

/// 486 byte-swap and atomic forms.
#[test]
fn i486_forms() {
    assert_eq!(enc("bswap eax"), vec![0x66, 0x0F, 0xC8]);
    assert_eq!(enc("cmpxchg bx, cx"), vec![0x0F, 0xB1, 0xCB]);
    assert_eq!(enc("xadd al, bl"), vec![0x0F, 0xC0, 0xD8]);
}

// --- x87 ---

/// x87 register-stack forms.
#[test]
fn x87_register_forms() {
    assert_eq!(enc("fld st3"), vec![0xD9, 0xC3]);
    assert_eq!(enc("fstp st1"), vec![0xDD, 0xD9]);
    assert_eq!(enc("fxch st2"), vec![0xD9, 0xCA]);
    assert_eq!(enc("fadd st0, st1"), vec![0xD8, 0xC1]);
    assert_eq!(enc("fadd st1, st0"), vec![0xDC, 0xC1]);
    assert_eq!(enc("faddp st1"), vec![0xDE, 0xC1]);
    assert_eq!(enc("fchs"), vec![0xD9, 0xE0]);
    assert_eq!(enc("fsqrt"), vec![0xD9, 0xFA]);
}

/// x87 memory forms take their size from the override.
#[test]
fn x87_memory_forms() {
    assert_eq!(enc("fld dword [bx]"), vec![0xD9, 0x07]);
    assert_eq!(enc("fild word [bx]"), vec![0xDF, 0x07]);
    assert_eq!(enc("fistp word [si]"), vec![0xDF, 0x1C]);
}

// --- 32-bit mode ---

/// In `bits 32` the prefix logic inverts.
#[test]
fn bits32_operand_sizes() {
    assert_eq!(
        enc("[bits 32]\nmov eax, 1"),
        vec![0xB8, 0x01, 0x00, 0x00, 0x00]
    );
    assert_eq!(enc("[bits 32]\nmov ax, 1"), vec![0x66, 0xB8, 0x01, 0x00]);
}

/// SIB addressing with a scaled index.
#[test]
fn bits32_sib_addressing() {
    assert_eq!(
        enc("[bits 32]\nmov eax, [ebx+ecx*4+8]"),
        vec![0x8B, 0x44, 0x8B, 0x08]
    );
    assert_eq!(
        enc("[bits 32]\nmov eax, [0x11223344]"),
        vec![0xA1, 0x44, 0x33, 0x22, 0x11]
    );
}

/// 16-bit addressing inside `bits 32` needs the 0x67 prefix.
#[test]
fn bits32_legacy_addressing() {
    assert_eq!(enc("[bits 32]\nmov ax, [bx]"), vec![0x66, 0x67, 0x8B, 0x07]);
}

// --- Errors ---

/// 32-bit index registers are rejected in 16-bit mode.
#[test]
fn esi_rejected_in_bits16() {
    let err = assemble("mov ax, [esi]").unwrap_err();
    assert_eq!(err.code(), "SCALE_INDEX_IS_UNSUPPORTED_IN_MODE");
}

/// Scale factors are rejected in 16-bit mode.
#[test]
fn scale_rejected_in_bits16() {
    let err = assemble("mov ax, [bx+si*2]").unwrap_err();
    assert_eq!(err.code(), "SCALE_INDEX_IS_UNSUPPORTED_IN_MODE");
}

/// An unsized memory/immediate pair cannot be encoded.
#[test]
fn unsized_mem_imm_rejected() {
    let err = assemble("mov [0x0], 0x1").unwrap_err();
    assert_eq!(err.code(), "MISSING_MEM_OPERAND_SIZE");
}

/// ...but the register sibling supplies the size.
#[test]
fn mem_size_deduced_from_register() {
    assert_eq!(enc("mov [0x0], ax"), vec![0xA3, 0x00, 0x00]);
}

/// Register size mismatches are rejected.
#[test]
fn size_mismatch_rejected() {
    let err = assemble("mov bx, al").unwrap_err();
    assert_eq!(err.code(), "OPERAND_SIZES_MISMATCH");
}

/// Unknown mnemonics are rejected.
#[test]
fn unknown_mnemonic_rejected() {
    let err = assemble("blorp ax, 1").unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_OPERATION");
}
