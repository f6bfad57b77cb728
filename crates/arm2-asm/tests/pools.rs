//! Literal-pool behaviour: placement, dedup, reach, rightsizing, and the
//! forward-reference boundary case.

use arm2_asm::{AsmError, DEFAULT_ORIGIN, assemble_str};

#[test]
fn encodable_constants_become_mov_or_mvn() {
    let p = assemble_str("LDR R0, =42\nLDR R1, =0xFFFFFFFF\n", "t.s").unwrap();
    assert_eq!(p.word_at(DEFAULT_ORIGIN), Some(0xE3A0_002A)); // MOV R0, #42
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 4), Some(0xE3E0_1000)); // MVN R1, #0
}

#[test]
fn unencodable_constant_loads_from_pool() {
    let p = assemble_str("LDR R0, =0x12345678\nSWI #0\n.ltorg\n", "t.s").unwrap();
    // Pool at 0x8008; LDR at 0x8000 sees it at PC+8 exactly: offset 0.
    assert_eq!(p.word_at(DEFAULT_ORIGIN), Some(0xE59F_0000));
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 8), Some(0x1234_5678));
}

#[test]
fn pool_immediately_after_load_is_a_forward_reference() {
    // The boundary regression: the pool lands at the word right after the
    // load. A `poolLoc > pc` comparison would misclassify this and alias
    // the literal onto the next instruction.
    let p = assemble_str("LDR R0, =0x12345678\n.ltorg\nSWI #0\n", "t.s").unwrap();
    // Pool slot at 0x8004 = PC+8-4: LDR R0, [PC, #-4].
    assert_eq!(p.word_at(DEFAULT_ORIGIN), Some(0xE51F_0004));
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 4), Some(0x1234_5678));
    // The SWI must not be overwritten by the literal.
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 8), Some(0xEF00_0000));
}

#[test]
fn identical_values_share_a_slot() {
    let src = "LDR R0, =0xCAFEBABE\nLDR R1, =0xCAFEBABE\nLDR R2, =0xDEADBEEF\n.ltorg\n";
    let p = assemble_str(src, "t.s").unwrap();
    let pool_base = DEFAULT_ORIGIN + 12;
    // Two distinct values only.
    assert_eq!(p.word_at(pool_base), Some(0xCAFE_BABE));
    assert_eq!(p.word_at(pool_base + 4), Some(0xDEAD_BEEF));
    // Both loads of the shared value point at the same slot.
    let w0 = p.word_at(DEFAULT_ORIGIN).unwrap();
    let w1 = p.word_at(DEFAULT_ORIGIN + 4).unwrap();
    let slot0 = DEFAULT_ORIGIN + 8 + (w0 & 0xFFF);
    let slot1 = DEFAULT_ORIGIN + 4 + 8 + (w1 & 0xFFF);
    assert_eq!(slot0, pool_base);
    assert_eq!(slot1, pool_base);
}

#[test]
fn implicit_pool_is_appended_at_the_end() {
    let p = assemble_str("LDR R0, =0x00010001\nSWI #0\n", "t.s").unwrap();
    // No .ltorg: the literal lands after the last instruction.
    assert_eq!(p.word_at(DEFAULT_ORIGIN), Some(0xE59F_0000));
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 8), Some(0x0001_0001));
}

#[test]
fn rightsizing_shifts_following_labels() {
    // The pool holds two distinct literals (8 bytes), not the provisional
    // 64: the label after it must sit right behind the pool.
    let src = "LDR R0, =0x11111111\n\
               LDR R1, =0x22222222\n\
               .ltorg\n\
               mid: MOV R2, #0\n\
               after: .word after\n";
    let p = assemble_str(src, "t.s").unwrap();
    assert_eq!(p.symbols["mid"], DEFAULT_ORIGIN + 16);
    assert_eq!(p.symbols["after"], DEFAULT_ORIGIN + 20);
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 20), Some(DEFAULT_ORIGIN + 20));
}

#[test]
fn multiple_pools_take_their_nearest_loads() {
    let src = "LDR R0, =0x11111111\n\
               .ltorg\n\
               first: LDR R1, =0x22222222\n\
               .ltorg\n\
               second: SWI #0\n";
    let p = assemble_str(src, "t.s").unwrap();
    // Pool 1 at 0x8004 holds the first literal; pool 2 after `first`'s
    // load holds the second.
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 4), Some(0x1111_1111));
    assert_eq!(p.symbols["first"], DEFAULT_ORIGIN + 8);
    assert_eq!(p.word_at(DEFAULT_ORIGIN + 12), Some(0x2222_2222));
    assert_eq!(p.symbols["second"], DEFAULT_ORIGIN + 16);
}

#[test]
fn origin_zero_stress_resolves_within_reach() {
    // Thirty loads at .org 0 followed by one pool (scenario from the
    // original bug report). Every load must resolve within ±4095 bytes and
    // the pool must deduplicate repeated values.
    let mut src = String::from(".org 0x0000\n_start:\n");
    for i in 0..30 {
        // Ten distinct values, each used three times.
        src.push_str(&format!("LDR R{}, =0x000F{:04X}\n", i % 4, (i % 10) * 16 + 1));
    }
    src.push_str("SWI #0\n.ltorg\n");
    let p = assemble_str(&src, "t.s").unwrap();

    // 31 words of code, then the pool with ten deduplicated entries.
    let pool_base = 31 * 4;
    for slot in 0..10u32 {
        let value = p.word_at(pool_base + slot * 4).unwrap();
        assert_eq!(value & 0x000F_0000, 0x000F_0000, "slot {slot} holds a literal");
    }
    for i in 0..30u32 {
        let w = p.word_at(i * 4).unwrap();
        assert_eq!(w >> 24 & 0xF, 0x5, "word {i} is a PC-relative LDR");
        // Resolve the slot each load points at: it must land inside the
        // pool, never on an instruction.
        let off = w & 0xFFF;
        let slot = if w & 1 << 23 != 0 {
            i * 4 + 8 + off
        } else {
            i * 4 + 8 - off
        };
        assert!((pool_base..pool_base + 40).contains(&slot), "load {i} slot {slot:#X}");
    }
}

#[test]
fn no_reachable_pool_is_an_error() {
    // Pool pushed more than 4095 bytes away from the load.
    let src = "LDR R0, =0x12345678\n.space 8192\n.ltorg\n";
    let err = assemble_str(src, "t.s").unwrap_err();
    assert!(matches!(err, AsmError::NoReachablePool { .. }));
}

#[test]
fn oversized_pool_warns_beyond_the_estimate() {
    // More than 16 literals into a single pool: assembly succeeds but the
    // rightsizing pass flags the utilisation.
    let mut src = String::new();
    for i in 0..20 {
        src.push_str(&format!("LDR R0, =0x000F{:04X}\n", i * 16 + 1));
    }
    src.push_str(".ltorg\n");
    let p = assemble_str(&src, "t.s").unwrap();
    assert!(p.warnings.iter().any(|w| w.contains("estimate")));
}
