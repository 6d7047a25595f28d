//! Kiln artifact writer: lays out and streams executable artifacts.
//!
//! This crate provides the build pipeline:
//! - `source` - input containers from files, memory or zip archives
//! - `visitor` - ordered walks over every class and method
//! - `layout` - offset assignment for every section (L1 to L10)
//! - `patcher` - per-ISA relative patchers and thunks
//! - `builder` - the phase state machine
//! - `writer` - section emission and position checks
//! - `va` - the verification artifact writer

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod builder;
mod checksum;
mod compiled;
mod config;
mod dedup;
mod error;
mod layout;
pub mod patcher;
mod profile;
mod refs;
mod source;
mod trampolines;
mod va;
mod visitor;
mod writer;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod refs_tests;
#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{Builder, WriteState};
pub use compiled::{CompiledMethodProvider, CompiledMethods};
pub use config::WriterConfig;
pub use error::{Result, WriteError};
pub use patcher::RelativePatcher;
pub use profile::Profile;
pub use source::ContainerSource;
pub use va::VaWriter;
