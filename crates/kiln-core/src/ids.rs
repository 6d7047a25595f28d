//! Identities used as edges between the build's arenas.
//!
//! Containers, classes and methods live in flat vectors owned by the source
//! collector; everything else refers to them through these 32-bit indexes.

use std::fmt;

/// Position of an input container in input order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ContainerIndex(pub u32);

impl ContainerIndex {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ContainerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of a class definition within its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClassIndex(pub u32);

impl ClassIndex {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A method, named by its container and its index in that container's
/// method-id table.
///
/// Ordering is (container, method index), which is also the order the
/// layout engine uses when it needs a canonical method order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct MethodRef {
    pub container: ContainerIndex,
    pub method_index: u32,
}

impl MethodRef {
    pub fn new(container: ContainerIndex, method_index: u32) -> Self {
        Self {
            container,
            method_index,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:m{}", self.container, self.method_index)
    }
}

/// A type, string or proto index in a container's symbol tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct SymbolRef {
    pub container: ContainerIndex,
    pub index: u32,
}

impl SymbolRef {
    pub fn new(container: ContainerIndex, index: u32) -> Self {
        Self { container, index }
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.index)
    }
}
