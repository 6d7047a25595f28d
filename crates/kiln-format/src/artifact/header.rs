//! Executable artifact header (128 bytes).
//!
//! Occupies offset 0 of the artifact but is written last, once every size,
//! offset and the checksum are final. The checksum is the last field so that
//! the checksummed prefix is simply `bytes[..CHECKSUM_OFFSET]`.

use crate::bytes::read_u32_le;

use super::{MAGIC, VERSION};

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: u32 = 128;

/// Byte offset of the checksum field inside the header.
pub const CHECKSUM_OFFSET: usize = 124;

/// Number of runtime trampolines recorded in the header.
pub const TRAMPOLINE_COUNT: usize = 6;

/// Runtime trampolines emitted at the start of the code segment.
///
/// Order matches the header fields and the emission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrampolineKind {
    InterpreterToInterpreterBridge,
    JniDlsymLookup,
    QuickGenericJniTrampoline,
    QuickImtConflictTrampoline,
    QuickResolutionTrampoline,
    QuickToInterpreterBridge,
}

impl TrampolineKind {
    pub const ALL: [TrampolineKind; TRAMPOLINE_COUNT] = [
        Self::InterpreterToInterpreterBridge,
        Self::JniDlsymLookup,
        Self::QuickGenericJniTrampoline,
        Self::QuickImtConflictTrampoline,
        Self::QuickResolutionTrampoline,
        Self::QuickToInterpreterBridge,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::InterpreterToInterpreterBridge => "interpreter_to_interpreter_bridge",
            Self::JniDlsymLookup => "jni_dlsym_lookup",
            Self::QuickGenericJniTrampoline => "quick_generic_jni_trampoline",
            Self::QuickImtConflictTrampoline => "quick_imt_conflict_trampoline",
            Self::QuickResolutionTrampoline => "quick_resolution_trampoline",
            Self::QuickToInterpreterBridge => "quick_to_interpreter_bridge",
        }
    }
}

/// Artifact header.
///
/// Layout (all u32 little-endian unless noted):
/// - 0-7: magic (4 bytes), version tag (4 bytes)
/// - 8-23: ISA id, ISA features, container count, key/value store size
/// - 24-47: read-only data section offsets and the maps region size
/// - 48-79: code segment offset/size and trampoline offsets
/// - 80-107: rel-ro and BSS layout, total size
/// - 108-123: reserved
/// - 124-127: checksum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: [u8; 4],
    pub isa: u32,
    pub isa_features: u32,
    pub container_count: u32,
    pub key_value_store_size: u32,

    pub lookup_tables_offset: u32,
    pub class_offsets_offset: u32,
    pub class_entries_offset: u32,
    pub maps_offset: u32,
    pub maps_size: u32,
    pub container_metadata_offset: u32,

    pub executable_offset: u32,
    pub code_size: u32,
    /// Entrypoints (code offset plus entry adjustment) of the runtime
    /// trampolines, indexed by [`TrampolineKind`]. Zero when not emitted.
    pub trampoline_offsets: [u32; TRAMPOLINE_COUNT],

    pub rel_ro_offset: u32,
    pub rel_ro_size: u32,
    pub bss_offset: u32,
    pub bss_size: u32,
    pub bss_methods_offset: u32,
    pub bss_roots_offset: u32,
    pub total_size: u32,

    pub checksum: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            isa: 0,
            isa_features: 0,
            container_count: 0,
            key_value_store_size: 0,
            lookup_tables_offset: 0,
            class_offsets_offset: 0,
            class_entries_offset: 0,
            maps_offset: 0,
            maps_size: 0,
            container_metadata_offset: 0,
            executable_offset: 0,
            code_size: 0,
            trampoline_offsets: [0; TRAMPOLINE_COUNT],
            rel_ro_offset: 0,
            rel_ro_size: 0,
            bss_offset: 0,
            bss_size: 0,
            bss_methods_offset: 0,
            bss_roots_offset: 0,
            total_size: 0,
            checksum: 0,
        }
    }
}

impl Header {
    /// Decode a header, or `None` if fewer than [`HEADER_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return None;
        }
        let word = |index: usize| read_u32_le(bytes, 8 + index * 4).unwrap_or(0);

        let mut trampoline_offsets = [0u32; TRAMPOLINE_COUNT];
        for (i, slot) in trampoline_offsets.iter_mut().enumerate() {
            *slot = word(12 + i);
        }

        Some(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: [bytes[4], bytes[5], bytes[6], bytes[7]],
            isa: word(0),
            isa_features: word(1),
            container_count: word(2),
            key_value_store_size: word(3),
            lookup_tables_offset: word(4),
            class_offsets_offset: word(5),
            class_entries_offset: word(6),
            maps_offset: word(7),
            maps_size: word(8),
            container_metadata_offset: word(9),
            executable_offset: word(10),
            code_size: word(11),
            trampoline_offsets,
            rel_ro_offset: word(18),
            rel_ro_size: word(19),
            bss_offset: word(20),
            bss_size: word(21),
            bss_methods_offset: word(22),
            bss_roots_offset: word(23),
            total_size: word(24),
            checksum: read_u32_le(bytes, CHECKSUM_OFFSET)?,
        })
    }

    /// Encode the header to its fixed-size form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version);

        let mut words: Vec<u32> = vec![
            self.isa,
            self.isa_features,
            self.container_count,
            self.key_value_store_size,
            self.lookup_tables_offset,
            self.class_offsets_offset,
            self.class_entries_offset,
            self.maps_offset,
            self.maps_size,
            self.container_metadata_offset,
            self.executable_offset,
            self.code_size,
        ];
        words.extend_from_slice(&self.trampoline_offsets);
        words.extend_from_slice(&[
            self.rel_ro_offset,
            self.rel_ro_size,
            self.bss_offset,
            self.bss_size,
            self.bss_methods_offset,
            self.bss_roots_offset,
            self.total_size,
        ]);

        for (i, w) in words.iter().enumerate() {
            let at = 8 + i * 4;
            bytes[at..at + 4].copy_from_slice(&w.to_le_bytes());
        }
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn validate_version(&self) -> bool {
        self.version == VERSION
    }

    /// Version number parsed from the decimal digits of the version tag.
    pub fn version_number(&self) -> Option<u32> {
        let digits = self.version.split(|&b| b == 0).next()?;
        std::str::from_utf8(digits).ok()?.parse().ok()
    }

    pub fn trampoline_offset(&self, kind: TrampolineKind) -> u32 {
        self.trampoline_offsets[kind.index()]
    }

    /// First byte after the key/value store.
    pub fn key_value_store_end(&self) -> u32 {
        HEADER_SIZE + self.key_value_store_size
    }
}
