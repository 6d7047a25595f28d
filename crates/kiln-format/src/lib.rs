//! On-disk formats for the kiln artifact writer.
//!
//! This crate contains:
//! - Executable artifact layout (header, key/value store, class descriptors,
//!   method headers, BSS mappings, type lookup tables) and a reader for it
//! - The bytecode container format consumed as input, with a builder
//! - Compiled-method records and their linker patches
//! - The verification artifact reader

#![allow(clippy::comparison_chain)]

pub mod artifact;
mod bytes;
pub mod compiled;
pub mod container;
pub mod va;


pub use artifact::{
    Artifact, ArtifactError, BssKind, BssMapping, ClassDescriptor, ClassKind, ClassStatus,
    ContainerRecord, HEADER_SIZE, Header, KeyValueError, KeyValueStore, MAGIC, METADATA_FIXED_SIZE,
    METHOD_HEADER_SIZE, MethodHeader, TRAMPOLINE_COUNT, TrampolineKind, TypeLookupTable, VERSION,
    dump,
};
pub use compiled::{CompiledMethod, LinkerPatch, PatchKind, PcRelativeTarget, RecordError};
pub use container::{ClassDef, Container, ContainerBuilder, ContainerError, MethodDef, MethodId};
pub use va::{VaContainerEntry, VaError, VaFile, VaLayout};
