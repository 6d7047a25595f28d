use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use kiln_core::InstructionSet;
use kiln_format::KeyValueStore;
use kiln_writer::{Builder, CompiledMethods, ContainerSource, WriterConfig};
use tracing::{debug, info};

use super::fail;

/// Member read when an archive is named without one.
const DEFAULT_MEMBER: &str = "classes.dex";
const ARCHIVE_EXTENSIONS: [&str; 3] = ["zip", "apk", "jar"];
/// Width reserved for `dex2oat-cmdline` in the key/value store.
const CMDLINE_MAX: usize = 2048;

/// One positional build input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildInput {
    File(PathBuf),
    ZipMember { archive: PathBuf, member: String },
}

impl BuildInput {
    /// `archive!member` names a zip member, a bare `.zip`/`.apk`/`.jar` path
    /// its primary member, anything else a container file.
    pub fn parse(s: &str) -> Self {
        if let Some((archive, member)) = s.split_once('!') {
            return Self::ZipMember {
                archive: archive.into(),
                member: member.to_string(),
            };
        }
        let path = PathBuf::from(s);
        let is_archive = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ARCHIVE_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)));
        if is_archive {
            Self::ZipMember {
                archive: path,
                member: DEFAULT_MEMBER.to_string(),
            }
        } else {
            Self::File(path)
        }
    }

    pub fn source(&self) -> ContainerSource {
        match self {
            Self::File(path) => ContainerSource::file(path),
            Self::ZipMember { archive, member } => {
                ContainerSource::zip_member(archive, member.as_str())
            }
        }
    }
}

impl fmt::Display for BuildInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::ZipMember { archive, member } => write!(f, "{}!{member}", archive.display()),
        }
    }
}

pub struct BuildArgs {
    pub inputs: Vec<BuildInput>,
    pub output: PathBuf,
    pub vdex: Option<PathBuf>,
    pub isa: InstructionSet,
    pub config: Option<PathBuf>,
    pub trampolines: bool,
}

pub fn run(args: BuildArgs) {
    match execute(&args) {
        Ok(checksum) => info!(checksum = format_args!("{checksum:#010x}"), "build finished"),
        Err(msg) => fail(msg),
    }
}

/// Write the artifacts described by `args`, returning the header checksum.
///
/// No compiler runs here: every method is left to the interpreter.
pub fn execute(args: &BuildArgs) -> Result<u32, String> {
    let config = load_config(args)?;
    debug!(isa = %config.isa(), trampolines = config.trampolines_enabled(), "writer config");

    let mut builder = Builder::new(config).map_err(|e| e.to_string())?;
    let mut locations = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let source = input.source();
        locations.push(source.location());
        builder
            .add_source(source)
            .map_err(|e| format!("{input}: {e}"))?;
    }

    let key_values = key_values(&locations)?;
    let file = File::create(&args.output)
        .map_err(|e| format!("failed to create {}: {e}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    let checksum = builder
        .write_artifact(&mut out, key_values, &CompiledMethods::new(), None)
        .map_err(|e| e.to_string())?;
    out.flush()
        .map_err(|e| format!("failed to write {}: {e}", args.output.display()))?;
    info!(path = %args.output.display(), containers = locations.len(), "wrote executable artifact");

    if let Some(path) = &args.vdex {
        let file = File::create(path)
            .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
        let mut out = BufWriter::new(file);
        builder
            .va_writer()
            .write(&mut out, &[])
            .map_err(|e| e.to_string())?;
        out.flush()
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        info!(path = %path.display(), "wrote verification artifact");
    }

    Ok(checksum)
}

fn load_config(args: &BuildArgs) -> Result<WriterConfig, String> {
    let config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            WriterConfig::from_json(&json).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => WriterConfig::new(args.isa),
    };
    if args.trampolines {
        return Ok(config.emit_trampolines(true));
    }
    Ok(config)
}

fn key_values(locations: &[String]) -> Result<KeyValueStore, String> {
    let mut store = KeyValueStore::new();
    let cmdline = truncate(std::env::args().collect::<Vec<_>>().join(" "), CMDLINE_MAX);
    for (key, value) in [
        ("class-path", locations.join(":")),
        ("compilation-reason", "verify".to_string()),
        ("dex2oat-cmdline", cmdline),
    ] {
        store.insert(key, value).map_err(|e| e.to_string())?;
    }
    Ok(store)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}
