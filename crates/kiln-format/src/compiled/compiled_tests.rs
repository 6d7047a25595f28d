use kiln_core::{ContainerIndex, MethodRef, SymbolRef};

use super::*;

fn method_ref(index: u32) -> MethodRef {
    MethodRef::new(ContainerIndex(0), index)
}

fn sample() -> CompiledMethod {
    CompiledMethod::new(vec![0u8; 24])
        .with_stackmap([1u8, 2, 3])
        .with_frame(48, 0x6000_0000, 0x0300)
        .with_patch(LinkerPatch::call(0, method_ref(7)))
        .with_patch(LinkerPatch::bss_entry(
            4,
            BssKind::String,
            SymbolRef::new(ContainerIndex(1), 12),
        ))
        .with_patch(LinkerPatch::boot_image_rel_ro(8, 0x40))
        .with_patch(LinkerPatch::read_barrier_branch(12, 0x21))
        .with_patch(LinkerPatch::entrypoint_call(16, 0x2a8))
        .with_patch(LinkerPatch::method_pc_relative(20, method_ref(3)))
}

#[test]
fn record_roundtrip() {
    let m = sample();
    let bytes = m.encode();
    assert_eq!(bytes.len(), 4 + 24 + 4 + 3 + 16 + 6 * PATCH_SIZE);
    assert_eq!(CompiledMethod::decode(&bytes), Ok(m));
}

#[test]
fn bss_tags_keep_kind() {
    for kind in BssKind::ALL {
        let m = CompiledMethod::new([0u8; 4]).with_patch(LinkerPatch::bss_entry(
            0,
            kind,
            SymbolRef::new(ContainerIndex(0), 1),
        ));
        let bytes = m.encode();
        let decoded = CompiledMethod::decode(&bytes).unwrap();
        assert_eq!(
            decoded.patches[0].kind,
            PatchKind::BssEntry {
                kind,
                target: SymbolRef::new(ContainerIndex(0), 1),
            }
        );
    }
}

#[test]
fn uncompiled_record() {
    let m = CompiledMethod::default();
    assert!(!m.is_compiled());
    assert_eq!(CompiledMethod::decode(&m.encode()), Ok(m));
}

#[test]
fn unknown_tag_rejected() {
    let m = CompiledMethod::new([0u8; 4]).with_patch(LinkerPatch::call(0, method_ref(1)));
    let mut bytes = m.encode();
    let tag_at = bytes.len() - PATCH_SIZE;
    bytes[tag_at] = 42;
    assert_eq!(
        CompiledMethod::decode(&bytes),
        Err(RecordError::UnknownPatchTag(42))
    );
}

#[test]
fn truncated_record_rejected() {
    let bytes = sample().encode();
    assert_eq!(
        CompiledMethod::decode(&bytes[..bytes.len() - 1]),
        Err(RecordError::Truncated("patch"))
    );
    assert_eq!(
        CompiledMethod::decode(&bytes[..2]),
        Err(RecordError::Truncated("code length"))
    );
}

#[test]
fn trailing_bytes_rejected() {
    let mut bytes = CompiledMethod::new([0u8; 4]).encode();
    bytes.push(0);
    assert_eq!(
        CompiledMethod::decode(&bytes),
        Err(RecordError::TrailingBytes(1))
    );
}

#[test]
fn patch_outside_code_rejected() {
    let m = CompiledMethod::new([0u8; 8]).with_patch(LinkerPatch::call(6, method_ref(1)));
    assert_eq!(
        m.validate(),
        Err(RecordError::PatchOutOfRange {
            literal_offset: 6,
            code_size: 8,
        })
    );
    assert!(CompiledMethod::decode(&m.encode()).is_err());
}
