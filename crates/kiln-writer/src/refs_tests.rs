use kiln_core::{ContainerIndex, SymbolRef};
use kiln_format::{BssKind, Container};

use crate::refs::{BssTables, RelRoTable, index_space};
use crate::test_utils::container;

fn sym(container: u32, index: u32) -> SymbolRef {
    SymbolRef::new(ContainerIndex(container), index)
}

fn tables() -> BssTables {
    let mut bss = BssTables::new(2, 8);
    bss.record(BssKind::Method, sym(0, 5));
    bss.record(BssKind::Method, sym(0, 2));
    bss.record(BssKind::Method, sym(1, 0));
    bss.record(BssKind::String, sym(0, 3));
    bss.record(BssKind::String, sym(0, 3));
    bss.record(BssKind::Type, sym(1, 7));
    bss.layout().unwrap();
    bss
}

#[test]
fn method_slots_precede_gc_roots() {
    let bss = tables();
    assert_eq!(bss.slot_count(), 5);
    assert_eq!(bss.methods_size(), 24);
    assert_eq!(bss.roots_size(), 8);
    assert_eq!(bss.size(), 32);
}

#[test]
fn slots_follow_index_order() {
    let bss = tables();
    assert_eq!(bss.slot_offset(BssKind::Method, sym(0, 2), 1000), Some(1000));
    assert_eq!(bss.slot_offset(BssKind::Method, sym(0, 5), 1000), Some(1008));
    assert_eq!(bss.slot_offset(BssKind::Method, sym(1, 0), 1000), Some(1016));
    assert_eq!(bss.slot_offset(BssKind::String, sym(0, 3), 1000), Some(1024));
    assert_eq!(bss.slot_offset(BssKind::Type, sym(1, 7), 1000), Some(1028));
}

#[test]
fn slot_ranks_ignore_record_order() {
    let mut bss = BssTables::new(1, 4);
    for i in (0..2000).rev() {
        bss.record(BssKind::Method, sym(0, 2 * i + 1));
        bss.record(BssKind::String, sym(0, 2 * i));
    }
    bss.record(BssKind::Method, sym(0, 1));
    bss.layout().unwrap();

    assert_eq!(bss.slot_count(), 4000);
    assert_eq!(bss.methods_size(), 8000);
    for rank in [0u32, 1, 999, 1999] {
        assert_eq!(bss.slot_offset(BssKind::Method, sym(0, rank * 2 + 1), 0), Some(rank * 4));
        assert_eq!(bss.slot_offset(BssKind::String, sym(0, rank * 2), 0), Some(8000 + rank * 4));
    }
    assert_eq!(bss.slot_offset(BssKind::Method, sym(0, 2), 0), None);
}

#[test]
fn unreferenced_symbols_have_no_slot() {
    let bss = tables();
    assert_eq!(bss.slot_offset(BssKind::Method, sym(0, 3), 0), None);
    assert_eq!(bss.slot_offset(BssKind::Type, sym(0, 7), 0), None);
    assert_eq!(bss.slot_offset(BssKind::Method, sym(4, 0), 0), None);
    assert!(!bss.has_slots(ContainerIndex(1), BssKind::String));
    assert!(bss.has_slots(ContainerIndex(1), BssKind::Type));
}

#[test]
fn mapping_describes_slots() {
    let bss = tables();
    let mapping = bss
        .mapping(ContainerIndex(0), BssKind::Method, 40, 4096)
        .unwrap();
    assert_eq!(mapping.slot_size, 8);
    assert_eq!(mapping.indices, vec![2, 5]);
    assert_eq!(mapping.offset_of(5), Some(4104));

    let strings = bss
        .mapping(ContainerIndex(0), BssKind::String, 10, 4096)
        .unwrap();
    assert_eq!(strings.first_offset, 4096 + 24);
    assert_eq!(strings.slot_size, 4);
    assert!(bss.mapping(ContainerIndex(0), BssKind::Type, 10, 4096).is_none());
}

#[test]
fn rel_ro_entries_are_sorted_and_shared() {
    let mut rel_ro = RelRoTable::default();
    assert!(rel_ro.is_empty());
    for target in [0x300, 0x100, 0x300, 0x200] {
        rel_ro.record(target);
    }
    rel_ro.layout();

    assert_eq!(rel_ro.len(), 3);
    assert_eq!(rel_ro.size().unwrap(), 12);
    assert_eq!(rel_ro.targets().collect::<Vec<_>>(), vec![0x100, 0x200, 0x300]);
    assert_eq!(rel_ro.entry_offset(0x100, 64), Some(64));
    assert_eq!(rel_ro.entry_offset(0x300, 64), Some(72));
    assert_eq!(rel_ro.entry_offset(0x400, 64), None);
}

#[test]
fn index_space_follows_symbol_tables() {
    let bytes = container(&[("LA;", &["a", "b"])]);
    let parsed = Container::parse(&bytes).unwrap();
    assert_eq!(index_space(&parsed, BssKind::Method), 2);
    assert_eq!(index_space(&parsed, BssKind::String), parsed.strings.len() as u32);
    assert_eq!(index_space(&parsed, BssKind::Type), parsed.type_ids.len() as u32);
    assert_eq!(index_space(&parsed, BssKind::MethodType), parsed.proto_ids.len() as u32);
}
