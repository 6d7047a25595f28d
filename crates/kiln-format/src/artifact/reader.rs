//! Loader-side view of a finished executable artifact.
//!
//! [`Artifact`] validates the header and checksum, then decodes the
//! container metadata records. Class descriptors, method headers and code are
//! decoded on demand.

use kiln_core::InstructionSet;

use crate::bytes::{Cursor, pad_to, put_u32, read_u32_le};

use super::{
    BssKind, BssMapping, CHECKSUM_OFFSET, ClassDescriptor, HEADER_SIZE, Header, KeyValueError,
    KeyValueStore, METHOD_HEADER_SIZE, MethodHeader, TypeLookupTable,
};

/// Size of a container metadata record without its location string and
/// BSS mappings.
pub const METADATA_FIXED_SIZE: u32 = 4 + 5 * 4 + 6 * 4;

/// Artifact load error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact too small: {0} bytes (minimum 128)")]
    TooSmall(usize),
    #[error("invalid magic: expected kea")]
    InvalidMagic,
    #[error("unsupported version: {0:?}")]
    UnsupportedVersion([u8; 4]),
    #[error("size mismatch: header says {header} bytes, got {actual}")]
    SizeMismatch { header: u32, actual: usize },
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("unknown instruction set id {0}")]
    UnknownIsa(u32),
    #[error("truncated {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u32 },
    #[error(transparent)]
    KeyValue(#[from] KeyValueError),
}

/// Per-container metadata record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerRecord {
    pub location: String,
    pub checksum: u32,
    /// Offset of the container's bytes inside the verification artifact.
    pub va_offset: u32,
    pub lookup_table_offset: u32,
    pub class_offsets_offset: u32,
    pub class_count: u32,
    /// BSS mappings indexed by [`BssKind::index`].
    pub bss_mappings: [Option<BssMapping>; 6],
}

impl ContainerRecord {
    fn location_size(&self) -> u32 {
        (self.location.len() as u32).div_ceil(4) * 4
    }

    /// Encoded size, trailing BSS mappings included.
    pub fn encoded_size(&self) -> u32 {
        let mappings: usize = self
            .bss_mappings
            .iter()
            .flatten()
            .map(|m| BssMapping::encoded_size(m.index_space))
            .sum();
        METADATA_FIXED_SIZE + self.location_size() + mappings as u32
    }

    /// Encode the record as it will sit at artifact offset `at`.
    pub fn encode(&self, at: u32, out: &mut Vec<u8>) {
        put_u32(out, self.location.len() as u32);
        out.extend_from_slice(self.location.as_bytes());
        pad_to(out, 4);
        put_u32(out, self.checksum);
        put_u32(out, self.va_offset);
        put_u32(out, self.lookup_table_offset);
        put_u32(out, self.class_offsets_offset);
        put_u32(out, self.class_count);

        let mut next = at + METADATA_FIXED_SIZE + self.location_size();
        for mapping in &self.bss_mappings {
            match mapping {
                Some(m) => {
                    put_u32(out, next);
                    next += BssMapping::encoded_size(m.index_space) as u32;
                }
                None => put_u32(out, 0),
            }
        }
        for mapping in self.bss_mappings.iter().flatten() {
            mapping.encode(out);
        }
    }

    fn decode(bytes: &[u8], at: u32) -> Result<Self, ArtifactError> {
        let truncated = |what| ArtifactError::Truncated { what, offset: at };
        let mut cur = Cursor::at(bytes, at as usize);
        let len = cur.u32().ok_or(truncated("container record"))?;
        let location = cur
            .take(len as usize)
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or(truncated("container location"))?
            .to_string();
        cur.skip_to_alignment(4);

        let mut fields = [0u32; 11];
        for field in &mut fields {
            *field = cur.u32().ok_or(truncated("container record"))?;
        }
        let [checksum, va_offset, lookup_table_offset, class_offsets_offset, class_count, maps @ ..] =
            fields;

        let mut bss_mappings: [Option<BssMapping>; 6] = Default::default();
        for (kind, &offset) in BssKind::ALL.iter().zip(&maps) {
            if offset == 0 {
                continue;
            }
            let mapping = BssMapping::decode(bytes, offset as usize)
                .filter(|m| m.kind == *kind)
                .ok_or(ArtifactError::Truncated {
                    what: "bss mapping",
                    offset,
                })?;
            bss_mappings[kind.index()] = Some(mapping);
        }

        Ok(Self {
            location,
            checksum,
            va_offset,
            lookup_table_offset,
            class_offsets_offset,
            class_count,
            bss_mappings,
        })
    }

    pub fn bss_mapping(&self, kind: BssKind) -> Option<&BssMapping> {
        self.bss_mappings[kind.index()].as_ref()
    }
}

/// Compute the artifact checksum: the header without its checksum field, the
/// deterministic key/value prefix, then everything after the key/value store.
pub fn compute_checksum(bytes: &[u8], header: &Header, deterministic_len: usize) -> u32 {
    let kv_start = HEADER_SIZE as usize;
    let kv_end = header.key_value_store_end() as usize;
    let end = (header.total_size as usize).min(bytes.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..CHECKSUM_OFFSET.min(bytes.len())]);
    if let Some(prefix) = bytes.get(kv_start..kv_start + deterministic_len) {
        hasher.update(prefix);
    }
    if let Some(rest) = bytes.get(kv_end..end) {
        hasher.update(rest);
    }
    hasher.finalize()
}

/// A parsed executable artifact.
#[derive(Clone, Debug)]
pub struct Artifact {
    bytes: Vec<u8>,
    header: Header,
    isa: InstructionSet,
    key_value_store: KeyValueStore,
    containers: Vec<ContainerRecord>,
}

impl Artifact {
    /// Parse and validate an artifact.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ArtifactError> {
        let header = Header::from_bytes(&bytes).ok_or(ArtifactError::TooSmall(bytes.len()))?;
        if !header.validate_magic() {
            return Err(ArtifactError::InvalidMagic);
        }
        if !header.validate_version() {
            return Err(ArtifactError::UnsupportedVersion(header.version));
        }
        if header.total_size as usize != bytes.len() {
            return Err(ArtifactError::SizeMismatch {
                header: header.total_size,
                actual: bytes.len(),
            });
        }
        let isa =
            InstructionSet::from_id(header.isa).ok_or(ArtifactError::UnknownIsa(header.isa))?;

        let kv_bytes = bytes
            .get(HEADER_SIZE as usize..header.key_value_store_end() as usize)
            .ok_or(ArtifactError::Truncated {
                what: "key-value store",
                offset: HEADER_SIZE,
            })?;
        let key_value_store = KeyValueStore::parse(kv_bytes)?;

        let actual = compute_checksum(&bytes, &header, key_value_store.deterministic_len());
        if actual != header.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let mut containers = Vec::with_capacity(header.container_count as usize);
        let mut at = header.container_metadata_offset;
        for _ in 0..header.container_count {
            let record = ContainerRecord::decode(&bytes, at)?;
            at += record.encoded_size();
            containers.push(record);
        }

        Ok(Self {
            bytes,
            header,
            isa,
            key_value_store,
            containers,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn isa(&self) -> InstructionSet {
        self.isa
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn key_value_store(&self) -> &KeyValueStore {
        &self.key_value_store
    }

    pub fn containers(&self) -> &[ContainerRecord] {
        &self.containers
    }

    /// The code segment, trampolines included.
    pub fn code_segment(&self) -> &[u8] {
        self.slice(self.header.executable_offset, self.header.code_size)
            .unwrap_or_default()
    }

    pub fn rel_ro_segment(&self) -> &[u8] {
        self.slice(self.header.rel_ro_offset, self.header.rel_ro_size)
            .unwrap_or_default()
    }

    /// Boot-image offsets held by the rel-ro entries, in slot order.
    pub fn rel_ro_entries(&self) -> Vec<u32> {
        self.rel_ro_segment()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Byte range of the key/value store's non-deterministic partition.
    pub fn non_deterministic_range(&self) -> std::ops::Range<usize> {
        let start = HEADER_SIZE as usize + self.key_value_store.deterministic_len();
        start..self.header.key_value_store_end() as usize
    }

    fn slice(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let start = offset as usize;
        self.bytes.get(start..start.checked_add(len as usize)?)
    }

    pub fn lookup_table(&self, container: usize) -> Result<TypeLookupTable, ArtifactError> {
        let record = self.record(container)?;
        let offset = record.lookup_table_offset;
        self.bytes
            .get(offset as usize..)
            .and_then(|b| TypeLookupTable::decode(b, record.class_count as usize))
            .ok_or(ArtifactError::Truncated {
                what: "type lookup table",
                offset,
            })
    }

    /// Artifact offset of the descriptor of class `class_index`.
    pub fn class_descriptor_offset(
        &self,
        container: usize,
        class_index: u32,
    ) -> Result<u32, ArtifactError> {
        let record = self.record(container)?;
        let at = record.class_offsets_offset + 4 * class_index;
        if class_index >= record.class_count {
            return Err(ArtifactError::Truncated {
                what: "class offset",
                offset: at,
            });
        }
        read_u32_le(&self.bytes, at as usize).ok_or(ArtifactError::Truncated {
            what: "class offset",
            offset: at,
        })
    }

    /// Decode the descriptor of class `class_index`; `method_count` comes
    /// from the class definition in the source container.
    pub fn class_descriptor(
        &self,
        container: usize,
        class_index: u32,
        method_count: usize,
    ) -> Result<ClassDescriptor, ArtifactError> {
        let offset = self.class_descriptor_offset(container, class_index)?;
        ClassDescriptor::decode(&self.bytes, offset as usize, method_count).ok_or(
            ArtifactError::Truncated {
                what: "class descriptor",
                offset,
            },
        )
    }

    /// Method header preceding the code at `code_offset` (entry adjustment
    /// included, as recorded in class descriptors).
    pub fn method_header(&self, code_offset: u32) -> Result<MethodHeader, ArtifactError> {
        let at = self.code_start(code_offset) - METHOD_HEADER_SIZE;
        self.bytes
            .get(at as usize..)
            .and_then(MethodHeader::from_bytes)
            .ok_or(ArtifactError::Truncated {
                what: "method header",
                offset: at,
            })
    }

    /// Machine code at `code_offset`, sized by its method header.
    pub fn method_code(&self, code_offset: u32) -> Result<&[u8], ArtifactError> {
        let header = self.method_header(code_offset)?;
        let start = self.code_start(code_offset);
        self.slice(start, header.code_size)
            .ok_or(ArtifactError::Truncated {
                what: "method code",
                offset: start,
            })
    }

    fn code_start(&self, code_offset: u32) -> u32 {
        code_offset
            .saturating_sub(self.isa.entry_adjustment())
            .max(METHOD_HEADER_SIZE)
    }

    /// BSS offset of the slot for `index` of `kind` in `container`.
    pub fn bss_slot(&self, container: usize, kind: BssKind, index: u32) -> Option<u32> {
        self.containers
            .get(container)?
            .bss_mapping(kind)?
            .offset_of(index)
    }

    fn record(&self, container: usize) -> Result<&ContainerRecord, ArtifactError> {
        self.containers
            .get(container)
            .ok_or(ArtifactError::Truncated {
                what: "container record",
                offset: self.header.container_metadata_offset,
            })
    }
}
