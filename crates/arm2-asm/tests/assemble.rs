//! End-to-end assembly tests: source text in, encoded words out.

use arm2_asm::{AsmError, DEFAULT_ORIGIN, Program, assemble_str};

fn assemble(src: &str) -> Program {
    assemble_str(src, "test.s").expect("assembly should succeed")
}

fn word(program: &Program, index: u32) -> u32 {
    program
        .word_at(DEFAULT_ORIGIN + index * 4)
        .expect("word present")
}

#[test]
fn data_processing_encodings() {
    let p = assemble("MOV R0, #42\nADDS R3, R2, R1\nCMP R3, R2\nMVN R4, R5\n");
    assert_eq!(word(&p, 0), 0xE3A0_002A);
    assert_eq!(word(&p, 1), 0xE092_3001);
    assert_eq!(word(&p, 2), 0xE153_0002);
    assert_eq!(word(&p, 3), 0xE1E0_4005);
}

#[test]
fn condition_suffixes() {
    let p = assemble("MOVEQ R1, #2\nADDNE R2, R2, #1\nBICS R0, R0, #0xFF\n");
    assert_eq!(word(&p, 0), 0x03A0_1002);
    assert_eq!(word(&p, 1), 0x1282_2001);
    assert_eq!(word(&p, 2), 0xE3D0_00FF);
}

#[test]
fn shifted_operands() {
    let p = assemble("MOV R2, R0, LSL #4\nMOV R2, R0, LSL R1\nMOV R3, R1, RRX\nMOV R4, R1, LSR #32\n");
    assert_eq!(word(&p, 0), 0xE1A0_2200);
    assert_eq!(word(&p, 1), 0xE1A0_2110);
    assert_eq!(word(&p, 2), 0xE1A0_3061);
    assert_eq!(word(&p, 3), 0xE1A0_4021);
}

#[test]
fn memory_addressing_modes() {
    let p = assemble(
        "LDR R2, [R1, #4]\nSTR R2, [R1], #-8\nLDR R2, [R1, R3, LSL #2]\nSTR R2, [R1, #-4]!\nLDRB R0, [R1]\n",
    );
    assert_eq!(word(&p, 0), 0xE591_2004);
    assert_eq!(word(&p, 1), 0xE401_2008);
    assert_eq!(word(&p, 2), 0xE791_2103);
    assert_eq!(word(&p, 3), 0xE521_2004);
    assert_eq!(word(&p, 4), 0xE5D1_0000);
}

#[test]
fn halfword_transfers() {
    let p = assemble("LDRH R3, [R1]\nSTRH R2, [R1, #6]\nLDRSB R4, [R1]\nLDRSH R5, [R1], #2\n");
    assert_eq!(word(&p, 0), 0xE1D1_30B0);
    assert_eq!(word(&p, 1), 0xE1C1_20B6);
    assert_eq!(word(&p, 2), 0xE1D1_40D0);
    assert_eq!(word(&p, 3), 0xE0D1_50F2);
}

#[test]
fn block_transfers_and_stack_aliases() {
    let p = assemble("STMFD SP!, {R0, R1, LR}\nLDMFD SP!, {R0, R1, PC}\nSTMIA R2, {R0-R3}\n");
    assert_eq!(word(&p, 0), 0xE92D_4003);
    assert_eq!(word(&p, 1), 0xE8BD_8003);
    assert_eq!(word(&p, 2), 0xE882_000F);
}

#[test]
fn register_list_order_is_canonical() {
    // Source order does not matter; the mask is by register number.
    let a = assemble("STMFD SP!, {LR, R0, R5}\n");
    let b = assemble("STMFD SP!, {R0, R5, LR}\n");
    assert_eq!(word(&a, 0), word(&b, 0));
    assert_eq!(word(&a, 0) & 0xFFFF, 0x4021);
}

#[test]
fn branches_resolve_labels() {
    let p = assemble("_start: B skip\nMOV R0, #1\nskip: SWI #0\n");
    assert_eq!(word(&p, 0), 0xEA00_0000);
    assert_eq!(word(&p, 2), 0xEF00_0000);
    // Backward branch: B _start from the third word is offset -16 >> 2.
    let p = assemble("_start: MOV R0, #0\nMOV R1, #1\nB _start\n");
    assert_eq!(word(&p, 2), 0xEAFF_FFFC);
}

#[test]
fn bl_and_blt_disambiguate() {
    let p = assemble("x: BL x\nBLT x\nBLS x\nBLEQ x\n");
    assert_eq!(word(&p, 0) >> 24, 0xEB); // BL
    assert_eq!(word(&p, 1) >> 24, 0xBA); // B with LT
    assert_eq!(word(&p, 2) >> 24, 0x9A); // B with LS
    assert_eq!(word(&p, 3) >> 24, 0x0B); // BL with EQ
}

#[test]
fn negative_immediates_rewrite() {
    let p = assemble("MOV R0, #-1\nCMP R1, #-2\nADD R2, R2, #-4\n");
    assert_eq!(word(&p, 0), 0xE3E0_0000); // MVN R0, #0
    assert_eq!(word(&p, 1), 0xE371_0002); // CMN R1, #2
    assert_eq!(word(&p, 2), 0xE242_2004); // SUB R2, R2, #4
}

#[test]
fn psr_transfers() {
    let p = assemble("MRS R3, CPSR\nMSR CPSR, R4\nMSR CPSR_f, #0xF0000000\n");
    assert_eq!(word(&p, 0), 0xE10F_3000);
    assert_eq!(word(&p, 1), 0xE129_F004);
    assert_eq!(word(&p, 2), 0xE328_F20F);
}

#[test]
fn adr_and_nop() {
    let p = assemble("_start: ADR R0, msg\nNOP\nmsg: .asciz \"hi\"\n");
    assert_eq!(word(&p, 0), 0xE28F_0000); // ADD R0, PC, #0
    assert_eq!(word(&p, 1), 0xE1A0_0000); // MOV R0, R0
}

#[test]
fn data_directives() {
    let p = assemble(".word 0x11223344, 2\n.half 0x5566\n.byte 1, 2\n.asciz \"AB\"\n.byte 0\n");
    assert_eq!(word(&p, 0), 0x1122_3344);
    assert_eq!(word(&p, 1), 2);
    // .half + .byte + string lay out little-endian, byte by byte.
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 8), Some(0x0201_5566));
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 12), Some(0x0000_4241));
}

#[test]
fn equ_constants_and_expressions() {
    let p = assemble(".equ size, 4\n.equ total, size * 8\nMOV R0, #total\n.word total + 1\n");
    assert_eq!(word(&p, 0), 0xE3A0_0020);
    assert_eq!(word(&p, 1), 33);
}

#[test]
fn char_literals_as_immediates() {
    let p = assemble("MOV R0, #'A'\nMOV R1, #'\\n'\n");
    assert_eq!(word(&p, 0), 0xE3A0_0041);
    assert_eq!(word(&p, 1), 0xE3A0_100A);
}

#[test]
fn align_pads_to_boundary() {
    let p = assemble(".byte 1\n.align 2\nlab: .word 5\n");
    assert_eq!(p.symbols["lab"], DEFAULT_ORIGIN + 4);
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 4), Some(5));
    let p = assemble(".byte 1\n.balign 8\nlab: .word 5\n");
    assert_eq!(p.symbols["lab"], DEFAULT_ORIGIN + 8);
}

#[test]
fn org_relocates_code() {
    let p = assemble(".org 0x0000\n_start: MOV R0, #1\n");
    assert_eq!(p.entry, 0);
    assert_eq!(p.word_at(0), Some(0xE3A0_0001));
}

#[test]
fn entry_point_fallbacks() {
    let p = assemble("main: MOV R0, #1\n");
    assert_eq!(p.entry, DEFAULT_ORIGIN);
    let p = assemble("MOV R0, #1\n_start: MOV R0, #2\n");
    assert_eq!(p.entry, DEFAULT_ORIGIN + 4);
    let p = assemble("MOV R0, #1\n");
    assert_eq!(p.entry, DEFAULT_ORIGIN);
}

#[test]
fn preprocessor_and_macros_compose() {
    let src = "#define LIMIT 3\n\
               .macro load reg, val\n\
               MOV reg, #val\n\
               .endm\n\
               .if LIMIT > 2\n\
               load R0, LIMIT\n\
               .else\n\
               load R0, 0\n\
               .endif\n";
    let p = assemble(src);
    assert_eq!(word(&p, 0), 0xE3A0_0003);
}

#[test]
fn duplicate_label_is_an_error() {
    let err = assemble_str("x: MOV R0, #1\nx: MOV R1, #2\n", "t.s").unwrap_err();
    assert!(matches!(err, AsmError::DuplicateSymbol { .. }));
}

#[test]
fn undefined_symbol_is_an_error() {
    let err = assemble_str("B nowhere\n", "t.s").unwrap_err();
    assert!(matches!(err, AsmError::UndefinedSymbol { .. }));
}

#[test]
fn mul_rd_rm_constraint_is_an_assembly_error() {
    let err = assemble_str("MUL R0, R0, R1\n", "t.s").unwrap_err();
    assert!(matches!(err, AsmError::MultiplyConstraint { .. }));
    // The legal form assembles.
    assert!(assemble_str("MUL R2, R0, R1\n", "t.s").is_ok());
}

#[test]
fn branch_out_of_range_is_an_error() {
    let err = assemble_str("B 0x04000000\n", "t.s").unwrap_err();
    assert!(matches!(err, AsmError::BranchRange { .. }));
}

#[test]
fn unencodable_immediate_is_an_error() {
    let err = assemble_str("ADD R0, R0, #0x10001\n", "t.s").unwrap_err();
    assert!(matches!(err, AsmError::ImmediateRange { .. }));
}

#[test]
fn nv_condition_warns() {
    let p = assemble("MOVNV R0, #1\n");
    assert!(p.warnings.iter().any(|w| w.contains("NV")));
}
