#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Shared building blocks for the kiln artifact writer.
//!
//! - Identities that name containers, methods and symbols across one build
//! - Target instruction-set parameters (alignment, entry adjustment, call range)
//! - Alignment and content-hash helpers
//! - Terminal colors for human-readable dumps

mod colors;
mod ids;
mod isa;
pub mod utils;

#[cfg(test)]
mod isa_tests;
#[cfg(test)]
mod utils_tests;

pub use colors::Colors;
pub use ids::{ClassIndex, ContainerIndex, MethodRef, SymbolRef};
pub use isa::{InstructionSet, IsaFeatures, UnknownIsa};
pub use utils::{PAGE_SIZE, align_up, fnv1a64, is_aligned, modified_utf8_hash};
