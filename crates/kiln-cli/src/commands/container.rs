use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use kiln_core::Colors;
use kiln_format::{ClassDef, Container};

use super::fail;

pub struct ContainerArgs {
    pub container_path: PathBuf,
    pub color: bool,
}

pub fn run(args: ContainerArgs) {
    let path = args.container_path.display();
    let bytes = match fs::read(&args.container_path) {
        Ok(bytes) => bytes,
        Err(e) => fail(format!("failed to read {path}: {e}")),
    };
    match Container::parse(&bytes) {
        Ok(container) => print!("{}", render(&container, Colors::new(args.color))),
        Err(e) => fail(format!("{path}: {e}")),
    }
}

pub fn render(container: &Container, c: Colors) -> String {
    let mut out = String::new();
    writeln!(out, "{}[container]{}", c.blue, c.reset).unwrap();
    writeln!(out, "checksum = {}{:#010x}{}", c.dim, container.checksum, c.reset).unwrap();
    writeln!(out, "size     = {}{:#x}{}", c.dim, container.file_size, c.reset).unwrap();
    for (name, count) in [
        ("strings", container.strings.len()),
        ("types", container.type_ids.len()),
        ("protos", container.proto_ids.len()),
        ("methods", container.method_ids.len()),
        ("classes", container.class_defs.len()),
    ] {
        writeln!(out, "{name:<8} = {count}").unwrap();
    }

    if container.class_defs.is_empty() {
        return out;
    }
    out.push('\n');
    out.push_str(&render_classes(container, c));
    out
}

/// The `[classes]` section: one line per class, then its methods.
pub fn render_classes(container: &Container, c: Colors) -> String {
    let mut out = String::new();
    writeln!(out, "{}[classes]{}", c.blue, c.reset).unwrap();
    for (index, class) in container.class_defs.iter().enumerate() {
        let descriptor = container.class_descriptor(index as u32).unwrap_or("?");
        writeln!(
            out,
            "{index:>3} {}{descriptor}{} {}({} direct, {} virtual){}",
            c.green,
            c.reset,
            c.dim,
            class.direct_methods.len(),
            class.virtual_methods.len(),
            c.reset
        )
        .unwrap();
        render_methods(&mut out, container, class, c);
    }
    out
}

fn render_methods(out: &mut String, container: &Container, class: &ClassDef, c: Colors) {
    for method in class.methods() {
        let name = container.method_name(method.method_index).unwrap_or("?");
        writeln!(
            out,
            "      m{:<3} {name} {}code={}{}",
            method.method_index, c.dim, method.code_size, c.reset
        )
        .unwrap();
    }
}
