//! Method arena and ordered walks over it.
//!
//! `MethodTable::collect` flattens every container's classes and methods into
//! arenas, asks the compiler for each method once, and fixes the code layout
//! order. Layout phases are [`Phase`] implementations that own their
//! accumulators; the walks themselves hold no state.

use std::collections::HashSet;
use std::ops::Range;

use kiln_core::{ClassIndex, ContainerIndex, MethodRef};
use kiln_format::{ClassStatus, CompiledMethod, PatchKind, PcRelativeTarget};

use crate::compiled::CompiledMethodProvider;
use crate::error::{Result, WriteError};
use crate::profile::Profile;
use crate::refs::index_space;
use crate::source::SourceSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ClassEntry {
    pub(crate) container: ContainerIndex,
    pub(crate) class: ClassIndex,
    pub(crate) status: ClassStatus,
    /// Range into [`MethodTable::methods`], direct methods first.
    pub(crate) methods: Range<usize>,
}

impl ClassEntry {
    pub(crate) fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MethodEntry {
    pub(crate) method: MethodRef,
    /// Index into [`MethodTable::classes`].
    pub(crate) class: usize,
    /// Index into [`MethodTable::compiled`] when the method has code.
    pub(crate) compiled: Option<usize>,
}

/// Flattened view of every class and method in the build.
#[derive(Debug, Default)]
pub(crate) struct MethodTable {
    pub(crate) classes: Vec<ClassEntry>,
    pub(crate) methods: Vec<MethodEntry>,
    pub(crate) compiled: Vec<CompiledMethod>,
    /// Method arena index of each compiled record.
    compiled_owner: Vec<usize>,
    /// Compiled indices in code layout order.
    pub(crate) order: Vec<usize>,
}

/// A layout phase driven by [`walk`].
pub(crate) trait Phase {
    fn start_class(&mut self, _class: &ClassEntry) -> Result<()> {
        Ok(())
    }

    fn visit_method(&mut self, method: &MethodEntry, compiled: Option<&CompiledMethod>) -> Result<()>;

    fn end_class(&mut self, _class: &ClassEntry) -> Result<()> {
        Ok(())
    }
}

/// Visit every class in container and class-def order, and every method in
/// direct-then-virtual order.
pub(crate) fn walk(table: &MethodTable, phase: &mut impl Phase) -> Result<()> {
    for class in &table.classes {
        phase.start_class(class)?;
        for method in &table.methods[class.methods.clone()] {
            phase.visit_method(method, method.compiled.map(|i| &table.compiled[i]))?;
        }
        phase.end_class(class)?;
    }
    Ok(())
}

/// Visit compiled methods in code layout order. Class hooks are not called.
pub(crate) fn walk_ordered(table: &MethodTable, phase: &mut impl Phase) -> Result<()> {
    for &index in &table.order {
        let method = &table.methods[table.compiled_owner[index]];
        phase.visit_method(method, Some(&table.compiled[index]))?;
    }
    Ok(())
}

impl MethodTable {
    /// Build the arenas, querying `provider` once per method.
    pub(crate) fn collect(
        sources: &SourceSet,
        provider: &dyn CompiledMethodProvider,
        profile: Option<&Profile>,
    ) -> Result<Self> {
        let mut table = Self::default();
        let mut seen = HashSet::new();

        for (container_index, loaded) in sources.iter() {
            for (class_def_index, class_def) in loaded.container.class_defs.iter().enumerate() {
                let class_slot = table.classes.len();
                let start = table.methods.len();

                for def in class_def.methods() {
                    let method = MethodRef::new(container_index, def.method_index);
                    if !seen.insert(method) {
                        return Err(WriteError::input(format!(
                            "{}: method {method} is defined twice",
                            loaded.location
                        )));
                    }

                    let compiled = match provider.compiled_method(method) {
                        Some(record) if record.is_compiled() => {
                            record.validate()?;
                            validate_targets(sources, method, record)?;
                            table.compiled.push(record.clone());
                            table.compiled_owner.push(table.methods.len());
                            Some(table.compiled.len() - 1)
                        }
                        _ => None,
                    };
                    table.methods.push(MethodEntry {
                        method,
                        class: class_slot,
                        compiled,
                    });
                }

                table.classes.push(ClassEntry {
                    container: container_index,
                    class: ClassIndex(class_def_index as u32),
                    status: loaded.statuses[class_def_index],
                    methods: start..table.methods.len(),
                });
            }
        }

        table.order = (0..table.compiled.len()).collect();
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            let methods = &table.methods;
            let owners = &table.compiled_owner;
            table
                .order
                .sort_by_key(|&i| (profile.tier(methods[owners[i]].method), i));
        }
        Ok(table)
    }

    pub(crate) fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    /// Method that owns compiled record `index`.
    pub(crate) fn compiled_method_ref(&self, index: usize) -> MethodRef {
        self.methods[self.compiled_owner[index]].method
    }
}

/// Reject patches whose targets name containers, methods or symbols that do
/// not exist.
fn validate_targets(sources: &SourceSet, owner: MethodRef, record: &CompiledMethod) -> Result<()> {
    let method_exists = |target: MethodRef| {
        sources
            .get(target.container)
            .is_some_and(|c| (target.method_index as usize) < c.container.method_ids.len())
    };

    for patch in &record.patches {
        let ok = match patch.kind {
            PatchKind::CallRelative { target }
            | PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::Method(target),
            } => method_exists(target),
            PatchKind::BssEntry { kind, target } => sources
                .get(target.container)
                .is_some_and(|c| target.index < index_space(&c.container, kind)),
            PatchKind::EntrypointCall { .. }
            | PatchKind::ReadBarrierBranch { .. }
            | PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(_),
            } => true,
        };
        if !ok {
            return Err(WriteError::input(format!(
                "method {owner}: patch at +{:#x} has an unknown target {:?}",
                patch.literal_offset, patch.kind
            )));
        }
    }
    Ok(())
}
