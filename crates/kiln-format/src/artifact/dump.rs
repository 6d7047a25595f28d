//! Human-readable artifact dump for debugging.

use std::fmt::Write as _;

use kiln_core::Colors;

use super::class_entry::peek_descriptor;
use super::{Artifact, BssKind, TrampolineKind};

/// Generate a human-readable dump of an artifact.
pub fn dump(artifact: &Artifact, colors: Colors) -> String {
    let mut out = String::new();
    let ctx = DumpContext { colors };

    dump_header(&mut out, artifact, &ctx);
    dump_key_values(&mut out, artifact, &ctx);
    dump_trampolines(&mut out, artifact, &ctx);
    dump_containers(&mut out, artifact, &ctx);
    dump_bss(&mut out, artifact, &ctx);
    dump_rel_ro(&mut out, artifact, &ctx);

    out
}

struct DumpContext {
    colors: Colors,
}

fn width_for_count(count: usize) -> usize {
    if count <= 1 {
        1
    } else {
        ((count - 1) as f64).log10().floor() as usize + 1
    }
}

fn section(out: &mut String, name: &str, ctx: &DumpContext) {
    let c = &ctx.colors;
    writeln!(out, "{}[{name}]{}", c.blue, c.reset).unwrap();
}

fn dump_header(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let h = artifact.header();
    section(out, "header", ctx);
    writeln!(out, "isa = {}", artifact.isa()).unwrap();
    writeln!(out, "isa_features = {:#010x}", h.isa_features).unwrap();
    writeln!(out, "containers = {}", h.container_count).unwrap();
    writeln!(out, "key_value_store = {}", h.key_value_store_size).unwrap();
    writeln!(out, "executable = {:#x} +{:#x}", h.executable_offset, h.code_size).unwrap();
    writeln!(out, "rel_ro = {:#x} +{:#x}", h.rel_ro_offset, h.rel_ro_size).unwrap();
    writeln!(
        out,
        "bss = {:#x} +{:#x} (methods {:#x}, roots {:#x})",
        h.bss_offset, h.bss_size, h.bss_methods_offset, h.bss_roots_offset
    )
    .unwrap();
    writeln!(out, "total_size = {:#x}", h.total_size).unwrap();
    writeln!(out, "checksum = {:#010x}", h.checksum).unwrap();
    out.push('\n');
}

fn dump_key_values(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let c = &ctx.colors;
    let store = artifact.key_value_store();
    section(out, "key_value", ctx);
    for (key, value) in store.deterministic() {
        writeln!(out, "{key} = {}{value:?}{}", c.green, c.reset).unwrap();
    }
    for (key, value) in store.non_deterministic() {
        writeln!(
            out,
            "{key} = {}{value:?}{}{}  ; non-deterministic{}",
            c.green, c.reset, c.dim, c.reset
        )
        .unwrap();
    }
    out.push('\n');
}

fn dump_trampolines(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let h = artifact.header();
    if h.trampoline_offsets.iter().all(|&o| o == 0) {
        return;
    }
    section(out, "trampolines", ctx);
    for kind in TrampolineKind::ALL {
        writeln!(out, "{} = {:#x}", kind.name(), h.trampoline_offset(kind)).unwrap();
    }
    out.push('\n');
}

fn dump_containers(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let c = &ctx.colors;
    let cw = width_for_count(artifact.containers().len());
    section(out, "containers", ctx);

    for (i, record) in artifact.containers().iter().enumerate() {
        writeln!(
            out,
            "C{i:0cw$} {}{:?}{}  checksum {:#010x}  classes {}",
            c.green, record.location, c.reset, record.checksum, record.class_count
        )
        .unwrap();

        let kw = width_for_count(record.class_count as usize);
        for class in 0..record.class_count {
            let described = artifact
                .class_descriptor_offset(i, class)
                .ok()
                .and_then(|offset| Some((offset, peek_descriptor(artifact.bytes(), offset as usize)?)));
            match described {
                Some((offset, (status, kind))) => writeln!(
                    out,
                    "  #{class:0kw$} {:<11} {}{}  ; @{offset:#x}{}",
                    status.name(),
                    kind.name(),
                    c.dim,
                    c.reset
                )
                .unwrap(),
                None => writeln!(out, "  #{class:0kw$} <malformed>").unwrap(),
            }
        }
    }
    out.push('\n');
}

fn dump_bss(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let c = &ctx.colors;
    let mappings: Vec<_> = artifact
        .containers()
        .iter()
        .enumerate()
        .flat_map(|(i, r)| BssKind::ALL.into_iter().filter_map(move |k| Some((i, r.bss_mapping(k)?))))
        .collect();
    if mappings.is_empty() {
        return;
    }

    let cw = width_for_count(artifact.containers().len());
    section(out, "bss", ctx);
    for (container, mapping) in mappings {
        let indices: Vec<String> = mapping.indices.iter().map(u32::to_string).collect();
        writeln!(
            out,
            "C{container:0cw$} {:<12} @{:#x} ×{}{}  ; [{}]{}",
            mapping.kind.name(),
            mapping.first_offset,
            mapping.slot_size,
            c.dim,
            indices.join(", "),
            c.reset
        )
        .unwrap();
    }
    out.push('\n');
}

fn dump_rel_ro(out: &mut String, artifact: &Artifact, ctx: &DumpContext) {
    let entries = artifact.rel_ro_entries();
    if entries.is_empty() {
        return;
    }
    let w = width_for_count(entries.len());
    section(out, "rel_ro", ctx);
    for (i, target) in entries.iter().enumerate() {
        writeln!(out, "R{i:0w$} {target:#010x}").unwrap();
    }
}
