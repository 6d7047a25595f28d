//! Fixtures shared by the builder, scenario and property tests.

use std::io::Cursor;

use kiln_core::{ContainerIndex, MethodRef};
use kiln_format::{Artifact, ContainerBuilder, KeyValueStore};

use crate::{Builder, CompiledMethods, ContainerSource, Profile, WriterConfig};

/// Arm64 `ret`.
pub(crate) const RET: [u8; 4] = [0xc0, 0x03, 0x5f, 0xd6];
/// Arm64 `nop`.
pub(crate) const NOP: [u8; 4] = [0x1f, 0x20, 0x03, 0xd5];
/// Arm64 `bl` with a zero displacement, rewritten by call patches.
pub(crate) const BL: [u8; 4] = [0x00, 0x00, 0x00, 0x94];

/// A method of container 0.
pub(crate) fn method(index: u32) -> MethodRef {
    MethodRef::new(ContainerIndex(0), index)
}

/// Serialized container with one direct method per listed name; method
/// indices follow the listing order.
pub(crate) fn container(classes: &[(&str, &[&str])]) -> Vec<u8> {
    let mut builder = ContainerBuilder::new();
    for (descriptor, methods) in classes {
        let class = builder.add_class(descriptor);
        for name in *methods {
            builder.add_method(class, name, "V", &[0x0e, 0x00], false);
        }
    }
    builder.build()
}

/// Key/value store with a class path and a command line.
pub(crate) fn key_values(cmdline: &str) -> KeyValueStore {
    let mut store = KeyValueStore::new();
    store.insert("class-path", "app.kdx").unwrap();
    store.insert("compilation-reason", "install").unwrap();
    store.insert("dex2oat-cmdline", cmdline).unwrap();
    store
}

/// Builder with every given container added from memory.
pub(crate) fn builder(config: WriterConfig, containers: &[(&str, Vec<u8>)]) -> Builder {
    let mut builder = Builder::new(config).unwrap();
    for (location, bytes) in containers {
        builder
            .add_source(ContainerSource::memory(*location, bytes.clone()))
            .unwrap();
    }
    builder
}

/// Run every phase into an in-memory stream.
pub(crate) fn write(
    builder: &mut Builder,
    compiled: &CompiledMethods,
    key_values: KeyValueStore,
    profile: Option<&Profile>,
) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    builder
        .write_artifact(&mut out, key_values, compiled, profile)
        .unwrap();
    out.into_inner()
}

/// Build and parse an artifact in one go.
pub(crate) fn build(
    config: WriterConfig,
    containers: &[(&str, Vec<u8>)],
    compiled: &CompiledMethods,
    key_values: KeyValueStore,
) -> Artifact {
    let mut builder = builder(config, containers);
    let bytes = write(&mut builder, compiled, key_values, None);
    Artifact::from_bytes(bytes).unwrap()
}

/// Code offset recorded for method `index` of class `class` in container 0.
pub(crate) fn code_offset(artifact: &Artifact, class: u32, method_count: usize, index: usize) -> Option<u32> {
    artifact
        .class_descriptor(0, class, method_count)
        .unwrap()
        .code_offsets[index]
}
