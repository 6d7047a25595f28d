//! Builder for well-formed bytecode containers.

use std::collections::HashMap;

use crate::bytes::{pad_to, put_u32};

use super::{
    CLASS_DEF_SIZE, CONTAINER_HEADER_SIZE, CONTAINER_MAGIC, CONTAINER_VERSION, METHOD_ID_SIZE,
    METHOD_RECORD_SIZE, compute_checksum,
};

struct PendingMethod {
    method_index: u32,
    access_flags: u32,
    bytecode: Vec<u8>,
}

struct PendingClass {
    type_index: u32,
    access_flags: u32,
    direct: Vec<PendingMethod>,
    virtual_: Vec<PendingMethod>,
}

/// Assembles a container from classes and methods.
///
/// Strings, types and protos are interned; method ids are numbered in
/// insertion order.
#[derive(Default)]
pub struct ContainerBuilder {
    strings: Vec<String>,
    string_lookup: HashMap<String, u32>,
    type_ids: Vec<u32>,
    type_lookup: HashMap<u32, u32>,
    proto_ids: Vec<u32>,
    proto_lookup: HashMap<u32, u32>,
    method_ids: Vec<(u32, u32, u32)>,
    classes: Vec<PendingClass>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its string index.
    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.string_lookup.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_lookup.insert(s.to_string(), id);
        id
    }

    /// Intern a type descriptor, returning its type index.
    pub fn type_id(&mut self, descriptor: &str) -> u32 {
        let string_index = self.string(descriptor);
        if let Some(&id) = self.type_lookup.get(&string_index) {
            return id;
        }
        let id = self.type_ids.len() as u32;
        self.type_ids.push(string_index);
        self.type_lookup.insert(string_index, id);
        id
    }

    /// Intern a proto shorty, returning its proto index.
    pub fn proto(&mut self, shorty: &str) -> u32 {
        let string_index = self.string(shorty);
        if let Some(&id) = self.proto_lookup.get(&string_index) {
            return id;
        }
        let id = self.proto_ids.len() as u32;
        self.proto_ids.push(string_index);
        self.proto_lookup.insert(string_index, id);
        id
    }

    /// Add a class definition, returning its class-def index.
    pub fn add_class(&mut self, descriptor: &str) -> u32 {
        let type_index = self.type_id(descriptor);
        self.classes.push(PendingClass {
            type_index,
            access_flags: 0x0001,
            direct: Vec::new(),
            virtual_: Vec::new(),
        });
        (self.classes.len() - 1) as u32
    }

    /// Add a method to `class`, returning its method index.
    ///
    /// # Panics
    /// Panics if `class` was not returned by [`add_class`](Self::add_class).
    pub fn add_method(
        &mut self,
        class: u32,
        name: &str,
        shorty: &str,
        bytecode: &[u8],
        is_virtual: bool,
    ) -> u32 {
        let class_type = self.classes[class as usize].type_index;
        let proto_index = self.proto(shorty);
        let name_index = self.string(name);
        let method_index = self.method_ids.len() as u32;
        self.method_ids.push((class_type, proto_index, name_index));

        let method = PendingMethod {
            method_index,
            access_flags: if is_virtual { 0x0001 } else { 0x0009 },
            bytecode: bytecode.to_vec(),
        };
        let class = &mut self.classes[class as usize];
        if is_virtual {
            class.virtual_.push(method);
        } else {
            class.direct.push(method);
        }
        method_index
    }

    /// Serialize the container, checksum included.
    pub fn build(&self) -> Vec<u8> {
        let string_ids_off = CONTAINER_HEADER_SIZE;
        let type_ids_off = string_ids_off + 4 * self.strings.len();
        let proto_ids_off = type_ids_off + 4 * self.type_ids.len();
        let method_ids_off = proto_ids_off + 4 * self.proto_ids.len();
        let class_defs_off = method_ids_off + METHOD_ID_SIZE * self.method_ids.len();
        let data_off = class_defs_off + CLASS_DEF_SIZE * self.classes.len();

        // Data section: string payloads, then per-class method records, then bytecode.
        let mut data = Vec::new();
        let mut string_offsets = Vec::with_capacity(self.strings.len());
        for s in &self.strings {
            pad_to(&mut data, 4);
            string_offsets.push((data_off + data.len()) as u32);
            put_u32(&mut data, s.len() as u32);
            data.extend_from_slice(s.as_bytes());
        }
        pad_to(&mut data, 4);

        let records_start = data.len();
        let record_count: usize = self
            .classes
            .iter()
            .map(|c| c.direct.len() + c.virtual_.len())
            .sum();
        let mut code_cursor = data_off + records_start + record_count * METHOD_RECORD_SIZE;

        let mut class_methods_off = Vec::with_capacity(self.classes.len());
        let mut code_blobs: Vec<&[u8]> = Vec::new();
        for class in &self.classes {
            class_methods_off.push((data_off + data.len()) as u32);
            for method in class.direct.iter().chain(&class.virtual_) {
                put_u32(&mut data, method.method_index);
                put_u32(&mut data, method.access_flags);
                put_u32(&mut data, code_cursor as u32);
                put_u32(&mut data, method.bytecode.len() as u32);
                code_cursor += method.bytecode.len();
                code_blobs.push(&method.bytecode);
            }
        }
        for blob in code_blobs {
            data.extend_from_slice(blob);
        }

        let file_size = data_off + data.len();
        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(&CONTAINER_MAGIC);
        out.extend_from_slice(&CONTAINER_VERSION);
        put_u32(&mut out, 0); // checksum, patched below
        put_u32(&mut out, file_size as u32);
        for (count, offset) in [
            (self.strings.len(), string_ids_off),
            (self.type_ids.len(), type_ids_off),
            (self.proto_ids.len(), proto_ids_off),
            (self.method_ids.len(), method_ids_off),
            (self.classes.len(), class_defs_off),
            (data.len(), data_off),
        ] {
            put_u32(&mut out, count as u32);
            put_u32(&mut out, offset as u32);
        }
        debug_assert_eq!(out.len(), CONTAINER_HEADER_SIZE);

        for offset in string_offsets {
            put_u32(&mut out, offset);
        }
        for &t in &self.type_ids {
            put_u32(&mut out, t);
        }
        for &p in &self.proto_ids {
            put_u32(&mut out, p);
        }
        for &(class_type, proto, name) in &self.method_ids {
            put_u32(&mut out, class_type);
            put_u32(&mut out, proto);
            put_u32(&mut out, name);
        }
        for (class, methods_off) in self.classes.iter().zip(class_methods_off) {
            put_u32(&mut out, class.type_index);
            put_u32(&mut out, class.access_flags);
            put_u32(&mut out, class.direct.len() as u32);
            put_u32(&mut out, class.virtual_.len() as u32);
            put_u32(&mut out, methods_off);
        }
        out.extend_from_slice(&data);

        let checksum = compute_checksum(&out);
        out[8..12].copy_from_slice(&checksum.to_le_bytes());
        out
    }
}
