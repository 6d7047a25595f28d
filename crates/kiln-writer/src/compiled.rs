//! Compiler output as seen by the writer.

use std::collections::HashMap;

use kiln_core::MethodRef;
use kiln_format::CompiledMethod;

use crate::error::Result;

/// Source of compiled code, queried once per method during `initialize`.
///
/// Returning `None`, or a record with empty code, leaves the method to the
/// interpreter.
pub trait CompiledMethodProvider {
    fn compiled_method(&self, method: MethodRef) -> Option<&CompiledMethod>;
}

/// In-memory provider.
#[derive(Clone, Debug, Default)]
pub struct CompiledMethods {
    methods: HashMap<MethodRef, CompiledMethod>,
}

impl CompiledMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method: MethodRef, compiled: CompiledMethod) -> &mut Self {
        self.methods.insert(method, compiled);
        self
    }

    /// Decode a serialized compiled-method record and register it.
    pub fn insert_record(&mut self, method: MethodRef, record: &[u8]) -> Result<&mut Self> {
        let compiled = CompiledMethod::decode(record)?;
        Ok(self.insert(method, compiled))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl CompiledMethodProvider for CompiledMethods {
    fn compiled_method(&self, method: MethodRef) -> Option<&CompiledMethod> {
        self.methods.get(&method)
    }
}
