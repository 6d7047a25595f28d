use kiln_core::InstructionSet;
use kiln_format::{BssKind, CompiledMethod, LinkerPatch};

use super::{ArmPatcher, BranchRange, MethodOffsetMap, ThunkKey};
use crate::WriteError;
use crate::test_utils::{BL, NOP, RET, method};

const CBNZ_W0: [u8; 4] = [0x00, 0x00, 0x00, 0x35];

fn narrow() -> ArmPatcher {
    ArmPatcher::new(InstructionSet::Arm64).with_call_range(BranchRange {
        max_positive: 128,
        max_negative: 128,
    })
}

fn word(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

#[test]
fn thunk_names() {
    assert_eq!(ThunkKey::MethodCall.to_string(), "MethodCallThunk");
    assert_eq!(ThunkKey::Entrypoint(0x200).to_string(), "EntrypointCallThunk_0x200");
    assert_eq!(ThunkKey::ReadBarrier(3).to_string(), "ReadBarrierThunk_0x3");
}

#[test]
fn arm64_thunk_code() {
    let patcher = ArmPatcher::new(InstructionSet::Arm64);
    let thunk = patcher.thunk(ThunkKey::MethodCall).unwrap();
    assert_eq!(word(&thunk.code, 0), 0xf940_1010);
    assert_eq!(word(&thunk.code, 4), 0xd61f_0200);
    assert_eq!(thunk.name, "MethodCallThunk");

    let err = patcher.thunk(ThunkKey::Entrypoint(0x201)).unwrap_err();
    assert!(matches!(err, WriteError::PatcherFailure(_)));
}

#[test]
fn thumb2_thunk_code() {
    let patcher = ArmPatcher::new(InstructionSet::Thumb2);
    let thunk = patcher.thunk(ThunkKey::Entrypoint(24)).unwrap();
    assert_eq!(thunk.code, [0xd9, 0xf8, 0x18, 0xf0]);
    assert!(patcher.thunk(ThunkKey::Entrypoint(4096)).is_err());
}

#[test]
fn direct_calls_in_range() {
    let patcher = ArmPatcher::new(InstructionSet::Arm64);
    let mut code = BL;
    patcher.patch_call(&mut code, 0, 0x1000, Some(0x1100)).unwrap();
    assert_eq!(word(&code, 0), 0x9400_0040);
    patcher.patch_call(&mut code, 0, 0x1000, Some(0x0f00)).unwrap();
    assert_eq!(word(&code, 0), 0x97ff_ffc0);
}

#[test]
fn thumb2_call_drops_thumb_bit() {
    let patcher = ArmPatcher::new(InstructionSet::Thumb2);
    let mut code = [0u8; 4];
    patcher.patch_call(&mut code, 0, 0x1000, Some(0x1101)).unwrap();
    assert_eq!(code, [0x00, 0xf0, 0x7e, 0xf8]);
}

#[test]
fn far_call_without_thunk_fails() {
    let patcher = narrow();
    let mut code = BL;
    let err = patcher.patch_call(&mut code, 0, 0, Some(0x1000)).unwrap_err();
    assert!(matches!(err, WriteError::PatcherFailure(msg) if msg.contains("MethodCallThunk")));
}

#[test]
fn island_precedes_method_that_would_overrun_deadline() {
    let mut patcher = narrow();
    let mut offsets = MethodOffsetMap::new();
    offsets.mark_compiled(method(2));

    let caller = CompiledMethod::new([BL, RET].concat()).with_patch(LinkerPatch::call(0, method(2)));
    assert_eq!(patcher.reserve_space(0, &caller, method(0), &offsets).unwrap(), 0);
    offsets.insert(method(0), 32);

    // The caller's code starts at 32, so a thunk must start by 160.
    let filler = CompiledMethod::new(NOP.repeat(64));
    let after = patcher.reserve_space(40, &filler, method(1), &offsets).unwrap();
    assert_eq!(after, 56);
    assert_eq!(patcher.thunk_offsets(), [(48, ThunkKey::MethodCall)]);
    offsets.insert(method(1), 80);

    let callee = CompiledMethod::new(RET);
    let end = 80 + 256;
    assert_eq!(patcher.reserve_space(end, &callee, method(2), &offsets).unwrap(), end);
    offsets.insert(method(2), end + 32);
    assert_eq!(patcher.reserve_space_end(end + 36, &offsets).unwrap(), end + 36);
    assert_eq!(patcher.thunk_count(), 1);

    let mut out = Vec::new();
    assert_eq!(patcher.write_thunks(&mut out, 40).unwrap(), 56);
    assert_eq!(out.len(), 16);
    assert!(out[..8].iter().all(|&b| b == 0));
    assert_eq!(word(&out, 8), 0xf940_1010);

    let mut code = caller.code.clone();
    patcher.patch_call(&mut code, 0, 32, offsets.get(method(2))).unwrap();
    assert_eq!(word(&code, 0), 0x9400_0004);
}

#[test]
fn call_to_uncompiled_method_uses_thunk() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let offsets = MethodOffsetMap::new();
    let caller = CompiledMethod::new([BL, RET].concat()).with_patch(LinkerPatch::call(0, method(7)));
    patcher.reserve_space(0, &caller, method(0), &offsets).unwrap();
    assert_eq!(patcher.reserve_space_end(40, &offsets).unwrap(), 56);
    assert_eq!(patcher.thunk_offsets(), [(48, ThunkKey::MethodCall)]);

    let mut code = caller.code.clone();
    patcher.patch_call(&mut code, 0, 32, None).unwrap();
    assert_eq!(word(&code, 0), 0x9400_0004);
}

#[test]
fn nothing_owed_places_nothing() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let mut offsets = MethodOffsetMap::new();
    offsets.insert(method(1), 0x20);
    let caller = CompiledMethod::new([BL, RET].concat()).with_patch(LinkerPatch::call(0, method(1)));
    assert_eq!(patcher.reserve_space(0x40, &caller, method(0), &offsets).unwrap(), 0x40);
    assert_eq!(patcher.reserve_space_end(0x80, &offsets).unwrap(), 0x80);
    assert_eq!(patcher.thunk_count(), 0);
}

#[test]
fn entrypoint_calls_share_one_thunk() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let offsets = MethodOffsetMap::new();
    let code = [BL, BL, RET].concat();
    let compiled = CompiledMethod::new(code)
        .with_patch(LinkerPatch::entrypoint_call(0, 0x200))
        .with_patch(LinkerPatch::entrypoint_call(4, 0x200));
    patcher.reserve_space(0, &compiled, method(0), &offsets).unwrap();
    assert_eq!(patcher.reserve_space_end(44, &offsets).unwrap(), 56);
    assert_eq!(patcher.thunk_offsets(), [(48, ThunkKey::Entrypoint(0x200))]);

    let mut code = compiled.code.clone();
    for patch in &compiled.patches {
        patcher
            .patch_entrypoint_call(&mut code, patch, 32 + patch.literal_offset)
            .unwrap();
    }
    assert_eq!(word(&code, 0), 0x9400_0004);
    assert_eq!(word(&code, 4), 0x9400_0003);
}

#[test]
fn unencodable_entrypoint_fails_reservation() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let compiled = CompiledMethod::new(BL).with_patch(LinkerPatch::entrypoint_call(0, 0x201));
    let err = patcher
        .reserve_space(0, &compiled, method(0), &MethodOffsetMap::new())
        .unwrap_err();
    assert!(matches!(err, WriteError::PatcherFailure(_)));
}

#[test]
fn read_barrier_branch_targets_thunk() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let offsets = MethodOffsetMap::new();
    let patch = LinkerPatch::read_barrier_branch(0, 3);
    let compiled = CompiledMethod::new([CBNZ_W0, RET].concat()).with_patch(patch);
    patcher.reserve_space(0, &compiled, method(0), &offsets).unwrap();
    patcher.reserve_space_end(40, &offsets).unwrap();

    let thunk = patcher.thunk(ThunkKey::ReadBarrier(3)).unwrap();
    assert_eq!(word(&thunk.code, 0), 0xf940_8e70);

    let mut code = compiled.code.clone();
    patcher.patch_read_barrier_branch(&mut code, &patch, 32).unwrap();
    assert_eq!(word(&code, 0), 0x3500_0080);

    let mut wrong = [NOP, RET].concat();
    let err = patcher.patch_read_barrier_branch(&mut wrong, &patch, 32).unwrap_err();
    assert!(matches!(err, WriteError::PatcherFailure(msg) if msg.contains("cbnz")));
}

/// Two read barrier branches separated by 256 bytes of code.
fn reserve_read_barrier_pair(patcher: &mut ArmPatcher) -> (CompiledMethod, MethodOffsetMap) {
    let mut offsets = MethodOffsetMap::new();
    let reader =
        CompiledMethod::new([CBNZ_W0, RET].concat()).with_patch(LinkerPatch::read_barrier_branch(0, 3));
    assert_eq!(patcher.reserve_space(0, &reader, method(0), &offsets).unwrap(), 0);
    offsets.insert(method(0), 32);

    let filler = CompiledMethod::new(NOP.repeat(64));
    let after = patcher.reserve_space(40, &filler, method(1), &offsets).unwrap();
    offsets.insert(method(1), if after == 40 { 64 } else { 80 });

    let end = offsets.get(method(1)).unwrap() + 256;
    assert_eq!(patcher.reserve_space(end, &reader, method(2), &offsets).unwrap(), end);
    offsets.insert(method(2), end + 32);
    patcher.reserve_space_end(end + 40, &offsets).unwrap();
    (reader, offsets)
}

#[test]
fn narrow_branch_range_places_a_read_barrier_thunk_per_island() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64).with_branch_range(BranchRange {
        max_positive: 128,
        max_negative: 128,
    });
    let (reader, offsets) = reserve_read_barrier_pair(&mut patcher);

    // The first branch sits at 32, so its thunk must start by 160.
    assert_eq!(
        patcher.thunk_offsets(),
        [(48, ThunkKey::ReadBarrier(3)), (384, ThunkKey::ReadBarrier(3))]
    );
    assert_eq!(offsets.get(method(2)), Some(368));

    for code_start in [32, 368] {
        let mut code = reader.code.clone();
        patcher
            .patch_read_barrier_branch(&mut code, &reader.patches[0], code_start)
            .unwrap();
        assert_eq!(word(&code, 0), 0x3500_0080);
    }
}

#[test]
fn default_branch_range_shares_one_read_barrier_thunk() {
    let mut patcher = ArmPatcher::new(InstructionSet::Arm64);
    let (reader, offsets) = reserve_read_barrier_pair(&mut patcher);
    assert_eq!(offsets.get(method(2)), Some(352));
    assert_eq!(patcher.thunk_offsets(), [(368, ThunkKey::ReadBarrier(3))]);

    let mut code = reader.code.clone();
    patcher
        .patch_read_barrier_branch(&mut code, &reader.patches[0], 32)
        .unwrap();
    // cbnz +336
    assert_eq!(word(&code, 0), 0x3500_0000 | (84 << 5));
}

#[test]
fn arm64_pc_relative_pair() {
    let patcher = ArmPatcher::new(InstructionSet::Arm64);
    let patch = LinkerPatch::boot_image_rel_ro(0, 0x1234);
    let mut code = [[0x00, 0x00, 0x00, 0x90], [0x00, 0x00, 0x00, 0x91]].concat();
    patcher.patch_pc_relative(&mut code, &patch, 0x1000, 0x3456).unwrap();
    assert_eq!(word(&code, 0), 0xd000_0000);
    assert_eq!(word(&code, 4), 0x9111_5800);

    let mut load = [[0x00, 0x00, 0x00, 0x90], [0x00, 0x00, 0x40, 0xb9]].concat();
    let err = patcher
        .patch_pc_relative(&mut load, &patch, 0x1000, 0x3455)
        .unwrap_err();
    assert!(matches!(err, WriteError::PatcherFailure(_)));

    let mut not_adrp = [NOP, NOP].concat();
    assert!(patcher.patch_pc_relative(&mut not_adrp, &patch, 0x1000, 0x3456).is_err());
}

#[test]
fn thumb2_pc_relative_triple() {
    let patcher = ArmPatcher::new(InstructionSet::Thumb2);
    let patch = LinkerPatch::bss_entry(0, BssKind::String, kiln_core::SymbolRef::new(kiln_core::ContainerIndex(0), 1));
    // movw r0, #0; movt r0, #0; add r0, pc
    let mut code = vec![0x40, 0xf2, 0x00, 0x00, 0xc0, 0xf2, 0x00, 0x00, 0x78, 0x44];
    patcher
        .patch_pc_relative(&mut code, &patch, 0x1000, 0x1234_5678)
        .unwrap();

    // Displacement from the add's PC (0x1008 + 4) is 0x1234_466c.
    assert_eq!(code[..4], [0x44, 0xf2, 0x6c, 0x60]);
    assert_eq!(code[4..8], [0xc1, 0xf2, 0x34, 0x20]);
    assert_eq!(code[8..], [0x78, 0x44]);
}
