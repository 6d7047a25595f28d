use kiln_core::{ContainerIndex, InstructionSet, SymbolRef};
use kiln_format::artifact::compute_checksum;
use kiln_format::{
    Artifact, BssKind, ClassStatus, CompiledMethod, Container, KeyValueStore, LinkerPatch,
    TrampolineKind,
};

use crate::test_utils::{BL, NOP, RET, build, builder, code_offset, container, key_values, method, write};
use crate::{CompiledMethods, ContainerSource, WriterConfig};

const ADRP: [u8; 4] = [0x00, 0x00, 0x00, 0x90];
const ADD: [u8; 4] = [0x00, 0x00, 0x00, 0x91];
const LDR: [u8; 4] = [0x00, 0x00, 0x40, 0xb9];

/// Two containers; the main method calls a helper, loads a string through
/// BSS, loads a boot image object through rel-ro and calls a runtime
/// entrypoint.
fn linked_input() -> (Vec<(&'static str, Vec<u8>)>, CompiledMethods) {
    let app = container(&[("LMain;", &["main", "helper"]), ("LUtil;", &["util"])]);
    let lib = container(&[("LLib;", &["run"])]);

    let main = CompiledMethod::new([BL, ADRP, ADD, ADRP, LDR, BL, RET].concat())
        .with_stackmap([7, 7, 7])
        .with_frame(48, 0x4000_0000, 0)
        .with_patch(LinkerPatch::call(0, method(1)))
        .with_patch(LinkerPatch::bss_entry(
            4,
            BssKind::String,
            SymbolRef::new(ContainerIndex(0), 0),
        ))
        .with_patch(LinkerPatch::boot_image_rel_ro(12, 0x1000))
        .with_patch(LinkerPatch::entrypoint_call(20, 0x200));
    let lib_method = kiln_core::MethodRef::new(ContainerIndex(1), 0);

    let mut compiled = CompiledMethods::new();
    compiled
        .insert(method(0), main)
        .insert(method(1), CompiledMethod::new(RET).with_stackmap([9, 9]))
        .insert(method(2), CompiledMethod::new([NOP, RET].concat()))
        .insert(lib_method, CompiledMethod::new([BL, RET].concat()).with_patch(LinkerPatch::call(0, method(2))));
    (vec![("app.kdx", app), ("lib.kdx", lib)], compiled)
}

fn linked_config() -> WriterConfig {
    WriterConfig::new(InstructionSet::Arm64).emit_trampolines(true)
}

#[test]
fn builds_are_deterministic() {
    let (containers, compiled) = linked_input();
    let a = build(linked_config(), &containers, &compiled, key_values("kiln --run=1"));
    let b = build(linked_config(), &containers, &compiled, key_values("kiln --run=2"));

    assert_eq!(a.header(), b.header());
    assert_eq!(a.code_segment(), b.code_segment());
    assert_eq!(a.rel_ro_segment(), b.rel_ro_segment());
    assert_eq!(a.rel_ro_entries(), vec![0x1000]);

    let again = build(linked_config(), &containers, &compiled, key_values("kiln --run=1"));
    assert_eq!(a.bytes(), again.bytes());
}

#[test]
fn checksum_covers_only_deterministic_keys() {
    let (containers, compiled) = linked_input();
    let checksum = |store: KeyValueStore| build(linked_config(), &containers, &compiled, store).header().checksum;

    let base = checksum(key_values("kiln"));
    assert_eq!(base, checksum(key_values("kiln --verbose")));

    let mut store = key_values("kiln");
    store.insert("apex-versions", "/1/2/3").unwrap();
    store.insert("dex2oat-host", "buildhost").unwrap();
    assert_eq!(base, checksum(store));

    let mut store = key_values("kiln");
    store.insert("compilation-reason", "boot").unwrap();
    assert_ne!(base, checksum(store));

    let mut store = key_values("kiln");
    store.insert("debuggable", "true").unwrap();
    assert_ne!(base, checksum(store));
}

#[test]
fn identical_blobs_and_entries_are_shared() {
    let bytes = container(&[("LA;", &["a", "b", "c", "d"])]);
    let map = [1, 2, 3, 4, 5];
    let same = || {
        CompiledMethod::new([NOP, RET].concat())
            .with_stackmap(map)
            .with_frame(16, 0x1, 0)
    };
    let mut compiled = CompiledMethods::new();
    compiled
        .insert(method(0), same())
        .insert(method(1), CompiledMethod::new([RET, RET].concat()).with_stackmap(map).with_frame(16, 0x1, 0))
        .insert(method(2), same())
        .insert(method(3), same().with_frame(16, 0x3, 0));
    let artifact = build(
        WriterConfig::new(InstructionSet::Arm64),
        &[("app.kdx", bytes)],
        &compiled,
        key_values("kiln"),
    );

    let offsets: Vec<u32> = (0..4).map(|i| code_offset(&artifact, 0, 4, i).unwrap()).collect();
    let maps: Vec<u32> = offsets
        .iter()
        .map(|&o| artifact.method_header(o).unwrap().stackmap_offset)
        .collect();

    assert!(maps.iter().all(|&m| m == maps[0]));
    assert_eq!(artifact.header().maps_size, map.len() as u32);
    assert_ne!(offsets[0], offsets[1]);
    assert_eq!(offsets[0], offsets[2]);
    // Same code, different spill mask.
    assert_ne!(offsets[0], offsets[3]);
}

#[test]
fn code_and_trampolines_are_aligned() {
    for isa in InstructionSet::ALL {
        let bytes = container(&[("LA;", &["a", "b", "c", "d"])]);
        let mut compiled = CompiledMethods::new();
        for (i, size) in [2usize, 6, 10, 14].into_iter().enumerate() {
            compiled.insert(method(i as u32), CompiledMethod::new(vec![0x90 + i as u8; size]));
        }
        let artifact = build(
            WriterConfig::new(isa).emit_trampolines(true),
            &[("app.kdx", bytes)],
            &compiled,
            key_values("kiln"),
        );

        let header = artifact.header();
        assert_eq!(header.executable_offset % 4096, 0, "{isa}");
        let aligned = |offset: u32| (offset - isa.entry_adjustment()) % isa.code_alignment() == 0;
        for kind in TrampolineKind::ALL {
            assert!(aligned(header.trampoline_offset(kind)), "{isa} {}", kind.name());
        }
        for i in 0..4 {
            let offset = code_offset(&artifact, 0, 4, i).unwrap();
            assert!(aligned(offset), "{isa} method {i} at {offset:#x}");
            assert_eq!(artifact.method_code(offset).unwrap(), compiled_code(&compiled, i), "{isa}");
        }
    }
}

fn compiled_code(compiled: &CompiledMethods, index: usize) -> Vec<u8> {
    use crate::CompiledMethodProvider;
    compiled.compiled_method(method(index as u32)).unwrap().code.clone()
}

#[test]
fn artifact_round_trips() {
    let app = container(&[("LA;", &["a", "b"]), ("LB;", &["c"])]);
    let lib = container(&[("LLib;", &["d"])]);
    let mut compiled = CompiledMethods::new();
    compiled
        .insert(method(0), CompiledMethod::new([NOP, NOP, RET].concat()))
        .insert(method(2), CompiledMethod::new(RET))
        .insert(
            kiln_core::MethodRef::new(ContainerIndex(1), 0),
            CompiledMethod::new([NOP, RET].concat()),
        );

    let mut builder = builder(WriterConfig::default(), &[]);
    builder
        .add_source_with_statuses(
            ContainerSource::memory("app.kdx", app.clone()),
            vec![ClassStatus::Verified, ClassStatus::Initialized],
        )
        .unwrap();
    builder
        .add_source(ContainerSource::memory("lib.kdx", lib.clone()))
        .unwrap();
    let artifact = Artifact::from_bytes(write(&mut builder, &compiled, key_values("kiln"), None)).unwrap();

    assert_eq!(artifact.containers().len(), 2);
    for (index, (record, bytes)) in artifact.containers().iter().zip([&app, &lib]).enumerate() {
        let source = Container::parse(bytes).unwrap();
        assert_eq!(record.checksum, source.checksum);
        let lookup = artifact.lookup_table(index).unwrap();
        for (class_index, class) in source.class_defs.iter().enumerate() {
            let descriptor = artifact
                .class_descriptor(index, class_index as u32, class.method_count())
                .unwrap();
            assert!(descriptor.status >= ClassStatus::Verified);
            let name = source.class_descriptor(class_index as u32).unwrap();
            assert_eq!(lookup.lookup(name, |i| source.class_descriptor(i)), Some(class_index as u32));

            for (def, offset) in class.methods().zip(&descriptor.code_offsets) {
                let m = kiln_core::MethodRef::new(ContainerIndex(index as u32), def.method_index);
                let expected = crate::CompiledMethodProvider::compiled_method(&compiled, m);
                match (expected, offset) {
                    (Some(c), Some(offset)) => assert_eq!(artifact.method_code(*offset).unwrap(), c.code),
                    (None, None) => {}
                    other => panic!("method {m}: {other:?}"),
                }
            }
        }
    }
    let b = artifact.class_descriptor(0, 1, 1).unwrap();
    assert_eq!(b.status, ClassStatus::Initialized);
}

#[test]
fn empty_build_is_valid() {
    let bytes = container(&[("LA;", &["a"])]);
    let mut builder = builder(WriterConfig::default(), &[("app.kdx", bytes)]);
    let out = write(&mut builder, &CompiledMethods::new(), key_values("kiln"), None);
    let artifact = Artifact::from_bytes(out).unwrap();
    let header = artifact.header();

    assert!(header.validate_magic());
    assert_eq!(artifact.key_value_store().get("class-path"), Some("app.kdx"));
    assert_eq!(header.code_size, 0);
    assert_eq!(header.executable_offset % 4096, 0);
    assert_eq!(header.total_size, header.executable_offset);
    let det = artifact.key_value_store().deterministic_len();
    assert_eq!(compute_checksum(artifact.bytes(), header, det), header.checksum);
}

#[test]
fn build_without_containers_is_valid() {
    let mut builder = builder(WriterConfig::new(InstructionSet::Thumb2), &[]);
    let out = write(&mut builder, &CompiledMethods::new(), KeyValueStore::new(), None);
    let artifact = Artifact::from_bytes(out).unwrap();
    assert_eq!(artifact.header().container_count, 0);
    assert_eq!(artifact.header().code_size, 0);
    assert_eq!(artifact.header().bss_size, 0);
}
