use super::*;

pub(super) const CODE: [u8; 8] = [0xC0, 0x03, 0x5F, 0xD6, 0x1F, 0x20, 0x03, 0xD5];
pub(super) const CODE_OFFSET: u32 = 4096 + 32;

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// A small arm64 artifact with one container of two classes: `LA;` runs in
/// the interpreter, `LB;` has one compiled method.
pub(super) fn sample_artifact() -> Vec<u8> {
    let mut store = KeyValueStore::new();
    store.insert("class-path", "app.kdx").unwrap();
    store.insert("dex2oat-cmdline", "kiln --isa=arm64").unwrap();
    let kv = store.serialize();

    let mut out = vec![0u8; HEADER_SIZE as usize];
    out.extend_from_slice(&kv);
    pad4(&mut out);

    let lookup_tables_offset = out.len() as u32;
    TypeLookupTable::build(["LA;", "LB;"]).encode(&mut out);

    let class_offsets_offset = out.len() as u32;
    let class_entries_offset = class_offsets_offset + 8;
    out.extend_from_slice(&class_entries_offset.to_le_bytes());
    out.extend_from_slice(&(class_entries_offset + 4).to_le_bytes());
    ClassDescriptor::new(ClassStatus::Verified, vec![None]).encode(&mut out);
    ClassDescriptor::new(ClassStatus::Initialized, vec![Some(CODE_OFFSET)]).encode(&mut out);

    let maps_offset = out.len() as u32;
    out.extend_from_slice(&[1, 2, 3, 4]);

    let container_metadata_offset = out.len() as u32;
    let mut bss_mappings: [Option<BssMapping>; 6] = Default::default();
    bss_mappings[BssKind::String.index()] = Some(BssMapping {
        kind: BssKind::String,
        slot_size: 4,
        index_space: 8,
        first_offset: 12288,
        indices: vec![3],
    });
    let record = ContainerRecord {
        location: "app.kdx".into(),
        checksum: 0x1234_5678,
        va_offset: 120,
        lookup_table_offset: lookup_tables_offset,
        class_offsets_offset,
        class_count: 2,
        bss_mappings,
    };
    record.encode(container_metadata_offset, &mut out);

    out.resize(4096 + 12, 0);
    let method_header = MethodHeader {
        stackmap_offset: maps_offset,
        frame_size: 16,
        core_spill_mask: 0x4000_0000,
        fp_spill_mask: 0,
        code_size: CODE.len() as u32,
    };
    out.extend_from_slice(&method_header.to_bytes());
    out.extend_from_slice(&CODE);
    let code_size = out.len() as u32 - 4096;

    out.resize(8192, 0);
    out.extend_from_slice(&0xABCDu32.to_le_bytes());

    let mut header = Header {
        isa: 1,
        container_count: 1,
        key_value_store_size: kv.len() as u32,
        lookup_tables_offset,
        class_offsets_offset,
        class_entries_offset,
        maps_offset,
        maps_size: 4,
        container_metadata_offset,
        executable_offset: 4096,
        code_size,
        rel_ro_offset: 8192,
        rel_ro_size: 4,
        bss_offset: 12288,
        bss_size: 4,
        bss_methods_offset: 12288,
        bss_roots_offset: 12288,
        total_size: out.len() as u32,
        ..Header::default()
    };
    out[..HEADER_SIZE as usize].copy_from_slice(&header.to_bytes());
    header.checksum = compute_checksum(&out, &header, store.deterministic_len());
    out[..HEADER_SIZE as usize].copy_from_slice(&header.to_bytes());
    out
}

#[test]
fn parse_sample() {
    let artifact = Artifact::from_bytes(sample_artifact()).unwrap();

    assert_eq!(artifact.isa(), kiln_core::InstructionSet::Arm64);
    assert_eq!(artifact.containers().len(), 1);
    let record = &artifact.containers()[0];
    assert_eq!(record.location, "app.kdx");
    assert_eq!(record.checksum, 0x1234_5678);
    assert_eq!(record.va_offset, 120);
    assert_eq!(
        artifact.key_value_store().get("class-path"),
        Some("app.kdx")
    );
}

#[test]
fn class_descriptors_and_code() {
    let artifact = Artifact::from_bytes(sample_artifact()).unwrap();

    let a = artifact.class_descriptor(0, 0, 1).unwrap();
    assert_eq!(a.kind, ClassKind::NoneCompiled);
    let b = artifact.class_descriptor(0, 1, 1).unwrap();
    assert_eq!(b.status, ClassStatus::Initialized);
    assert_eq!(b.code_offsets, vec![Some(CODE_OFFSET)]);

    let header = artifact.method_header(CODE_OFFSET).unwrap();
    assert_eq!(header.frame_size, 16);
    assert_eq!(header.stackmap_offset, artifact.header().maps_offset);
    assert_eq!(artifact.method_code(CODE_OFFSET).unwrap(), &CODE);
    assert!(artifact.class_descriptor(0, 2, 1).is_err());
}

#[test]
fn lookup_table_resolves_descriptors() {
    let artifact = Artifact::from_bytes(sample_artifact()).unwrap();
    let table = artifact.lookup_table(0).unwrap();
    let names = ["LA;", "LB;"];
    assert_eq!(
        table.lookup("LB;", |i| names.get(i as usize).copied()),
        Some(1)
    );
}

#[test]
fn bss_and_rel_ro() {
    let artifact = Artifact::from_bytes(sample_artifact()).unwrap();
    assert_eq!(artifact.bss_slot(0, BssKind::String, 3), Some(12288));
    assert_eq!(artifact.bss_slot(0, BssKind::String, 4), None);
    assert_eq!(artifact.bss_slot(0, BssKind::Type, 3), None);
    assert_eq!(artifact.rel_ro_entries(), vec![0xABCD]);
}

#[test]
fn checksum_covers_code() {
    let mut bytes = sample_artifact();
    bytes[CODE_OFFSET as usize] ^= 0xFF;
    assert!(matches!(
        Artifact::from_bytes(bytes),
        Err(ArtifactError::ChecksumMismatch { .. })
    ));
}

#[test]
fn checksum_covers_deterministic_keys() {
    let mut bytes = sample_artifact();
    // First byte of the "app.kdx" value.
    let at = HEADER_SIZE as usize + "class-path\0".len();
    bytes[at] = b'b';
    assert!(matches!(
        Artifact::from_bytes(bytes),
        Err(ArtifactError::ChecksumMismatch { .. })
    ));
}

#[test]
fn checksum_ignores_non_deterministic_keys() {
    let original = Artifact::from_bytes(sample_artifact()).unwrap();
    let range = original.non_deterministic_range();

    let mut bytes = sample_artifact();
    let cmdline = bytes[range.clone()]
        .windows(4)
        .position(|w| w == b"kiln")
        .unwrap();
    bytes[range.start + cmdline] = b'K';

    let edited = Artifact::from_bytes(bytes).unwrap();
    assert_eq!(edited.header().checksum, original.header().checksum);
    assert_eq!(
        edited.key_value_store().get("dex2oat-cmdline"),
        Some("Kiln --isa=arm64")
    );
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = sample_artifact();
    bytes[0] = b'x';
    assert_eq!(
        Artifact::from_bytes(bytes).unwrap_err(),
        ArtifactError::InvalidMagic
    );
}

#[test]
fn rejects_size_mismatch() {
    let mut bytes = sample_artifact();
    bytes.push(0);
    assert!(matches!(
        Artifact::from_bytes(bytes),
        Err(ArtifactError::SizeMismatch { .. })
    ));
}

#[test]
fn rejects_short_input() {
    assert_eq!(
        Artifact::from_bytes(vec![0; 64]).unwrap_err(),
        ArtifactError::TooSmall(64)
    );
}

#[test]
fn container_record_size_matches_encoding() {
    let artifact = Artifact::from_bytes(sample_artifact()).unwrap();
    let record = &artifact.containers()[0];
    let mut out = Vec::new();
    record.encode(1000, &mut out);
    assert_eq!(out.len() as u32, record.encoded_size());
    assert_eq!(record.encoded_size(), METADATA_FIXED_SIZE + 8 + 20);
}
