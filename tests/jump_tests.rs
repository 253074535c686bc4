//! Branch/jump distance-resolution tests.

use kiln::config::EmitConfig;
use kiln::emit::{Attr, Emitter, FrameInfo, Ins, RelocKind, RelocTarget};

fn emitter() -> Emitter {
    let _ = env_logger::builder().is_test(true).try_init();
    Emitter::new(EmitConfig::default(), FrameInfo::default())
}

fn pad(e: &mut Emitter, n: u32) {
    for _ in 0..n {
        e.ins_nop(1);
    }
}

#[test]
fn test_cascading_shrink_unlocks_outer_jump() {
    // A forward jump whose distance only fits the short form after three
    // jumps between it and the target shrink from long to short. On the
    // first layout pass it measures long; the cumulative 9-byte shrinkage
    // must still be discovered.
    let mut e = emitter();
    let end = e.reserve_label();
    e.ins_j(Ins::Jmp, end); // j0
    pad(&mut e, 50);
    e.ins_j(Ins::Jmp, end); // j1
    e.ins_j(Ins::Jmp, end); // j2
    e.ins_j(Ins::Jmp, end); // j3
    pad(&mut e, 60);
    e.bind_label(end);
    e.ins_none(Ins::Ret, Attr::DWORD);
    let blob = e.finalize().unwrap();

    // Final layout: all four jumps short.
    // j0@0, pad 2..52, j1@52, j2@54, j3@56, pad 58..118, ret@118.
    assert_eq!(blob.code.len(), 119);
    assert_eq!(blob.code[0], 0xEB);
    assert_eq!(blob.code[1], 116);
    assert_eq!(blob.code[52], 0xEB);
    assert_eq!(blob.code[53], 64);
    assert_eq!(blob.code[54], 0xEB);
    assert_eq!(blob.code[55], 62);
    assert_eq!(blob.code[56], 0xEB);
    assert_eq!(blob.code[57], 60);
    assert_eq!(blob.code[118], 0xC3);
}

#[test]
fn test_long_form_when_out_of_range() {
    let mut e = emitter();
    let end = e.reserve_label();
    e.ins_j(Ins::Je, end);
    pad(&mut e, 200);
    e.bind_label(end);
    e.ins_none(Ins::Ret, Attr::DWORD);
    let blob = e.finalize().unwrap();
    // je rel32: 0F 84 <200 as i32>
    assert_eq!(&blob.code[..6], &[0x0F, 0x84, 200, 0, 0, 0]);
    assert_eq!(blob.code.len(), 207);
}

#[test]
fn test_backward_short_jump() {
    let mut e = emitter();
    let top = e.new_group();
    pad(&mut e, 10);
    e.ins_j(Ins::Jne, top);
    let blob = e.finalize().unwrap();
    // jne rel8 back over 10 nops + itself: -12
    assert_eq!(blob.code[10], 0x75);
    assert_eq!(blob.code[11] as i8, -12);
}

#[test]
fn test_backward_long_jump() {
    let mut e = emitter();
    let top = e.new_group();
    pad(&mut e, 150);
    e.ins_j(Ins::Jmp, top);
    let blob = e.finalize().unwrap();
    // E9 rel32 = -(150 + 5)
    assert_eq!(blob.code[150], 0xE9);
    let rel = i32::from_le_bytes(blob.code[151..155].try_into().unwrap());
    assert_eq!(rel, -155);
}

#[test]
fn test_shrinking_disabled_keeps_long_forms() {
    let cfg = EmitConfig {
        shrink_jumps: false,
        ..EmitConfig::default()
    };
    let mut e = Emitter::new(cfg, FrameInfo::default());
    let end = e.reserve_label();
    e.ins_j(Ins::Jmp, end);
    pad(&mut e, 3);
    e.bind_label(end);
    e.ins_none(Ins::Ret, Attr::DWORD);
    let blob = e.finalize().unwrap();
    // Still the 5-byte encoding even though the distance fits a rel8.
    assert_eq!(blob.code[0], 0xE9);
    assert_eq!(blob.code.len(), 9);
}

#[test]
fn test_cross_region_jump_pinned_long_with_reloc() {
    let mut e = emitter();
    let cold_code = e.reserve_label();
    e.ins_j(Ins::Jmp, cold_code);
    e.ins_none(Ins::Ret, Attr::DWORD);
    e.begin_cold_region();
    e.bind_label(cold_code);
    e.ins_none(Ins::Ret, Attr::DWORD);
    let blob = e.finalize().unwrap();

    // The jump stays long despite the tiny distance, and carries a
    // relocation because the loader may place the regions far apart.
    assert_eq!(blob.code[0], 0xE9);
    assert_eq!(&blob.code[1..5], &[0, 0, 0, 0]);
    assert_eq!(blob.relocs.len(), 1);
    assert_eq!(blob.relocs[0].offset, 1);
    assert_eq!(blob.relocs[0].kind, RelocKind::Rel32);
    assert!(matches!(blob.relocs[0].target, RelocTarget::Label(_)));
    assert_eq!(blob.hot_size, 6);
    assert_eq!(blob.code.len(), 7);
}

// ---- oracle comparison ----

/// Item model for the brute-force oracle: NOP padding or an
/// unconditional jump to another item's start offset.
#[derive(Clone, Copy)]
enum Item {
    Pad(u32),
    Jmp(usize),
}

/// Lay the items out with the given short/long choice per jump and return
/// (consistent, total_size). A choice is consistent when every short jump
/// actually fits rel8.
fn oracle_layout(items: &[Item], short: &[bool]) -> (bool, u32) {
    let mut offsets = Vec::with_capacity(items.len());
    let mut off = 0u32;
    let mut ji = 0;
    for item in items {
        offsets.push(off);
        off += match item {
            Item::Pad(n) => *n,
            Item::Jmp(_) => {
                let s = short[ji];
                ji += 1;
                if s { 2 } else { 5 }
            }
        };
    }
    let total = off;
    let mut ji = 0;
    for (i, item) in items.iter().enumerate() {
        if let Item::Jmp(t) = item {
            let size = if short[ji] { 2 } else { 5 };
            if short[ji] {
                let target = if *t == items.len() { total } else { offsets[*t] };
                let rel = target as i64 - (offsets[i] + size) as i64;
                if i8::try_from(rel).is_err() {
                    return (false, total);
                }
            }
            ji += 1;
        }
    }
    (true, total)
}

/// Minimal total size over all consistent short/long assignments: the
/// layout a compiler with perfect foreknowledge would pick.
fn oracle_best(items: &[Item], jump_count: usize) -> u32 {
    let mut best = u32::MAX;
    for mask in 0..(1u32 << jump_count) {
        let short: Vec<bool> = (0..jump_count).map(|i| mask & (1 << i) != 0).collect();
        let (ok, total) = oracle_layout(items, &short);
        if ok {
            best = best.min(total);
        }
    }
    best
}

#[test]
fn test_resolution_matches_exhaustive_oracle() {
    // Mixed forward and backward jumps with padding in between; the
    // iterative relaxation must land on the same minimal layout as the
    // exhaustive oracle.
    let items = [
        Item::Pad(20),
        Item::Jmp(8), // -> end (the ret item)
        Item::Pad(30),
        Item::Jmp(8),
        Item::Pad(30),
        Item::Jmp(0), // backward -> top
        Item::Pad(40),
        Item::Jmp(8),
        Item::Pad(1), // the final ret
    ];

    let mut e = emitter();
    let top = e.new_group();
    let end = e.reserve_label();
    pad(&mut e, 20);
    e.ins_j(Ins::Jmp, end);
    pad(&mut e, 30);
    e.ins_j(Ins::Jmp, end);
    pad(&mut e, 30);
    e.ins_j(Ins::Jmp, top);
    pad(&mut e, 40);
    e.ins_j(Ins::Jmp, end);
    e.bind_label(end);
    e.ins_none(Ins::Ret, Attr::DWORD);
    let blob = e.finalize().unwrap();

    // Oracle target index 9 is the ret item, whose start is the "end"
    // label offset; jumps to 0 target the top.
    let expected = oracle_best(&items[..], 4);
    assert_eq!(blob.code.len() as u32, expected);
}
