use std::fs;
use std::path::PathBuf;

use kiln_core::Colors;
use kiln_format::{Artifact, dump};

use super::fail;

pub struct DumpArgs {
    pub artifact_path: PathBuf,
    pub color: bool,
}

pub fn run(args: DumpArgs) {
    match render(&args) {
        Ok(text) => print!("{text}"),
        Err(msg) => fail(msg),
    }
}

pub fn render(args: &DumpArgs) -> Result<String, String> {
    let path = args.artifact_path.display();
    let bytes = fs::read(&args.artifact_path).map_err(|e| format!("failed to read {path}: {e}"))?;
    let artifact = Artifact::from_bytes(bytes).map_err(|e| format!("{path}: {e}"))?;
    Ok(dump(&artifact, Colors::new(args.color)))
}
