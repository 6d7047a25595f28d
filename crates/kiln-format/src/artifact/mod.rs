//! Executable artifact format.
//!
//! ```text
//! [header][key-value store][lookup tables]*[class-offset tables]*
//!   [class descriptors]*[maps region][container metadata]*
//!   [padding to page boundary]
//!   [trampolines][method header + code]*
//!   [rel-ro]
//! ```
//!
//! BSS follows the artifact at the next page boundary and occupies no file
//! bytes.

mod bss_mapping;
mod class_entry;
mod dump;
mod header;
mod key_value_store;
mod method_header;
mod reader;
mod type_lookup;

#[cfg(test)]
mod key_value_store_tests;
#[cfg(test)]
mod reader_tests;

pub use bss_mapping::{BssKind, BssMapping};
pub use class_entry::{ClassDescriptor, ClassKind, ClassStatus, peek_descriptor};
pub use dump::dump;
pub use header::{CHECKSUM_OFFSET, HEADER_SIZE, Header, TRAMPOLINE_COUNT, TrampolineKind};
pub use key_value_store::{
    DETERMINISTIC_KEYS, KeyValueError, KeyValueStore, NON_DETERMINISTIC_KEYS, is_deterministic_key,
};
pub use method_header::{METHOD_HEADER_SIZE, MethodHeader};
pub use reader::{Artifact, ArtifactError, ContainerRecord, METADATA_FIXED_SIZE, compute_checksum};
pub use type_lookup::TypeLookupTable;

/// Magic bytes at offset 0 of every executable artifact.
pub const MAGIC: [u8; 4] = *b"kea\n";

/// Format version tag: three decimal digits and a NUL.
pub const VERSION: [u8; 4] = *b"001\0";
