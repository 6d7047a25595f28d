use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use kiln_core::Colors;
use kiln_format::VaFile;

use super::fail;

pub struct VdexArgs {
    pub vdex_path: PathBuf,
    pub color: bool,
}

pub fn run(args: VdexArgs) {
    let path = args.vdex_path.display();
    let bytes = match fs::read(&args.vdex_path) {
        Ok(bytes) => bytes,
        Err(e) => fail(format!("failed to read {path}: {e}")),
    };
    match VaFile::parse(&bytes) {
        Ok(file) => print!("{}", render(&file, Colors::new(args.color))),
        Err(e) => fail(format!("{path}: {e}")),
    }
}

pub fn render(file: &VaFile<'_>, c: Colors) -> String {
    let mut out = String::new();
    writeln!(out, "{}[vdex]{}", c.blue, c.reset).unwrap();
    writeln!(out, "containers    = {}", file.container_count()).unwrap();
    writeln!(
        out,
        "verifier_deps = {}{} bytes{}",
        c.dim,
        file.verifier_deps().len(),
        c.reset
    )
    .unwrap();

    if file.entries().is_empty() {
        return out;
    }
    writeln!(out, "\n{}[containers]{}", c.blue, c.reset).unwrap();
    for (index, entry) in file.entries().iter().enumerate() {
        let classes = file.lookup_table(index).map_or(0, |t| t.len());
        writeln!(
            out,
            "{index:>3} {}{:#010x}{} {}{:#x}+{:#x} lookup {:#x}+{:#x}{} ({classes} classes)",
            c.green,
            entry.checksum,
            c.reset,
            c.dim,
            entry.offset,
            entry.size,
            entry.lookup_offset,
            entry.lookup_size,
            c.reset
        )
        .unwrap();
    }
    out
}
