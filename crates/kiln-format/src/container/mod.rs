//! Bytecode containers: the class files the writer takes as input.
//!
//! Header (64 bytes):
//! - 0-11: magic `kdx\n`, version `001\0`, crc32 of bytes `[12, file_size)`
//! - 12-15: file size
//! - 16-55: (count, offset) pairs for string ids, type ids, proto ids,
//!   method ids and class defs
//! - 56-63: data size and offset
//!
//! Tables:
//! - string id: u32 offset of `[u32 len][utf8]`
//! - type id: u32 descriptor string index
//! - proto id: u32 shorty string index
//! - method id: class type index, proto index, name string index (u32 each)
//! - class def: type index, access flags, direct count, virtual count,
//!   offset of `(direct ++ virtual)` method records
//! - method record: method index, access flags, code offset, code size

mod builder;


pub use builder::ContainerBuilder;

use crate::bytes::{Cursor, read_u32_le};

pub const CONTAINER_MAGIC: [u8; 4] = *b"kdx\n";
pub const CONTAINER_VERSION: [u8; 4] = *b"001\0";
pub const CONTAINER_HEADER_SIZE: usize = 64;

pub(crate) const METHOD_ID_SIZE: usize = 12;
pub(crate) const CLASS_DEF_SIZE: usize = 20;
pub(crate) const METHOD_RECORD_SIZE: usize = 16;

/// Container parse error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    #[error("container too small: {0} bytes (minimum 64)")]
    TooSmall(usize),
    #[error("invalid container magic")]
    InvalidMagic,
    #[error("unsupported container version")]
    UnsupportedVersion,
    #[error("size mismatch: header says {header} bytes, got {actual}")]
    SizeMismatch { header: u32, actual: usize },
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("{what} at offset {offset} is out of bounds")]
    OutOfBounds { what: &'static str, offset: usize },
    #[error("{what} index {index} is out of range")]
    InvalidIndex { what: &'static str, index: u32 },
    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodId {
    pub class_type_index: u32,
    pub proto_index: u32,
    pub name_index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodDef {
    pub method_index: u32,
    pub access_flags: u32,
    pub code_off: u32,
    pub code_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDef {
    pub type_index: u32,
    pub access_flags: u32,
    pub direct_methods: Vec<MethodDef>,
    pub virtual_methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Methods in visit order: direct methods, then virtual methods.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    pub fn method_count(&self) -> usize {
        self.direct_methods.len() + self.virtual_methods.len()
    }
}

/// Parsed container metadata. Bytecode stays in the caller's buffer and is
/// fetched with [`Container::method_code`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub checksum: u32,
    pub file_size: u32,
    pub strings: Vec<String>,
    pub type_ids: Vec<u32>,
    pub proto_ids: Vec<u32>,
    pub method_ids: Vec<MethodId>,
    pub class_defs: Vec<ClassDef>,
}

/// Compute the checksum stored at offset 8 of a container.
pub fn compute_checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes.get(12..).unwrap_or_default())
}

impl Container {
    /// Parse and validate a container.
    pub fn parse(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < CONTAINER_HEADER_SIZE {
            return Err(ContainerError::TooSmall(bytes.len()));
        }
        if bytes[0..4] != CONTAINER_MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        if bytes[4..8] != CONTAINER_VERSION {
            return Err(ContainerError::UnsupportedVersion);
        }

        let header = |offset: usize| read_u32_le(bytes, offset).unwrap_or(0);
        let checksum = header(8);
        let file_size = header(12);
        if file_size as usize != bytes.len() {
            return Err(ContainerError::SizeMismatch {
                header: file_size,
                actual: bytes.len(),
            });
        }
        let actual = compute_checksum(bytes);
        if actual != checksum {
            return Err(ContainerError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        let string_offsets = read_table(bytes, header(16), header(20), 4, "string ids")?;
        let strings = string_offsets
            .iter()
            .map(|&offset| read_string(bytes, offset as usize))
            .collect::<Result<Vec<_>, _>>()?;

        let type_ids = read_table(bytes, header(24), header(28), 4, "type ids")?;
        check_indices(&type_ids, strings.len(), "type descriptor")?;

        let proto_ids = read_table(bytes, header(32), header(36), 4, "proto ids")?;
        check_indices(&proto_ids, strings.len(), "proto shorty")?;

        let method_ids = read_method_ids(bytes, header(40), header(44))?;
        for id in &method_ids {
            check_index(id.class_type_index, type_ids.len(), "method class type")?;
            check_index(id.proto_index, proto_ids.len(), "method proto")?;
            check_index(id.name_index, strings.len(), "method name")?;
        }

        let class_defs = read_class_defs(bytes, header(48), header(52), method_ids.len())?;
        for class in &class_defs {
            check_index(class.type_index, type_ids.len(), "class type")?;
        }

        Ok(Self {
            checksum,
            file_size,
            strings,
            type_ids,
            proto_ids,
            method_ids,
            class_defs,
        })
    }

    pub fn class_count(&self) -> usize {
        self.class_defs.len()
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn type_descriptor(&self, type_index: u32) -> Option<&str> {
        let string_index = *self.type_ids.get(type_index as usize)?;
        self.string(string_index)
    }

    pub fn class_descriptor(&self, class_def_index: u32) -> Option<&str> {
        let class = self.class_defs.get(class_def_index as usize)?;
        self.type_descriptor(class.type_index)
    }

    pub fn method_name(&self, method_index: u32) -> Option<&str> {
        let id = self.method_ids.get(method_index as usize)?;
        self.string(id.name_index)
    }

    /// Class descriptors in class-def order.
    pub fn class_descriptors(&self) -> impl Iterator<Item = &str> {
        (0..self.class_defs.len() as u32).filter_map(|i| self.class_descriptor(i))
    }

    /// Bytecode of `method`, borrowed from the container's bytes.
    pub fn method_code<'b>(&self, bytes: &'b [u8], method: &MethodDef) -> &'b [u8] {
        let start = method.code_off as usize;
        bytes
            .get(start..start + method.code_size as usize)
            .unwrap_or_default()
    }
}

fn check_index(index: u32, len: usize, what: &'static str) -> Result<(), ContainerError> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(ContainerError::InvalidIndex { what, index })
    }
}

fn check_indices(indices: &[u32], len: usize, what: &'static str) -> Result<(), ContainerError> {
    indices.iter().try_for_each(|&i| check_index(i, len, what))
}

fn read_table(
    bytes: &[u8],
    count: u32,
    offset: u32,
    entry_size: usize,
    what: &'static str,
) -> Result<Vec<u32>, ContainerError> {
    let offset = offset as usize;
    let end = (count as usize)
        .checked_mul(entry_size)
        .and_then(|len| offset.checked_add(len));
    if end.is_none_or(|end| end > bytes.len()) {
        return Err(ContainerError::OutOfBounds { what, offset });
    }
    Ok((0..count as usize)
        .filter_map(|i| read_u32_le(bytes, offset + i * entry_size))
        .collect())
}

fn read_string(bytes: &[u8], offset: usize) -> Result<String, ContainerError> {
    let mut cur = Cursor::at(bytes, offset);
    let data = cur
        .u32()
        .and_then(|len| cur.take(len as usize))
        .ok_or(ContainerError::OutOfBounds {
            what: "string data",
            offset,
        })?;
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|_| ContainerError::InvalidUtf8(offset))
}

fn read_method_ids(bytes: &[u8], count: u32, offset: u32) -> Result<Vec<MethodId>, ContainerError> {
    let mut cur = Cursor::at(bytes, offset as usize);
    (0..count)
        .map(|_| {
            Some(MethodId {
                class_type_index: cur.u32()?,
                proto_index: cur.u32()?,
                name_index: cur.u32()?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .ok_or(ContainerError::OutOfBounds {
            what: "method ids",
            offset: offset as usize,
        })
}

fn read_class_defs(
    bytes: &[u8],
    count: u32,
    offset: u32,
    method_id_count: usize,
) -> Result<Vec<ClassDef>, ContainerError> {
    let mut defs = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let at = offset as usize + i * CLASS_DEF_SIZE;
        let mut cur = Cursor::at(bytes, at);
        let fields = (|| {
            Some((cur.u32()?, cur.u32()?, cur.u32()?, cur.u32()?, cur.u32()?))
        })();
        let Some((type_index, access_flags, direct, virtual_, methods_off)) = fields else {
            return Err(ContainerError::OutOfBounds {
                what: "class def",
                offset: at,
            });
        };

        let mut records = Cursor::at(bytes, methods_off as usize);
        let mut read_methods = |n: u32| -> Result<Vec<MethodDef>, ContainerError> {
            (0..n)
                .map(|_| {
                    let at = records.pos();
                    let method = (|| {
                        Some(MethodDef {
                            method_index: records.u32()?,
                            access_flags: records.u32()?,
                            code_off: records.u32()?,
                            code_size: records.u32()?,
                        })
                    })()
                    .ok_or(ContainerError::OutOfBounds {
                        what: "method record",
                        offset: at,
                    })?;
                    check_index(method.method_index, method_id_count, "method")?;
                    let code_end = method.code_off as usize + method.code_size as usize;
                    if code_end > bytes.len() {
                        return Err(ContainerError::OutOfBounds {
                            what: "method code",
                            offset: method.code_off as usize,
                        });
                    }
                    Ok(method)
                })
                .collect()
        };
        let direct_methods = read_methods(direct)?;
        let virtual_methods = read_methods(virtual_)?;

        defs.push(ClassDef {
            type_index,
            access_flags,
            direct_methods,
            virtual_methods,
        });
    }
    Ok(defs)
}
