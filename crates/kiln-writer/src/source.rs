//! Input containers and the collector that owns them.
//!
//! Every container is parsed and validated when it is added. File sources
//! are memory-mapped; archive members are inflated into owned buffers. The
//! backing bytes live as long as the builder.

use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use kiln_core::ContainerIndex;
use kiln_format::{ClassStatus, Container};
use memmap2::{Mmap, MmapOptions};

use crate::error::{Result, WriteError};

/// Archive member that is named by the bare archive path.
const PRIMARY_MEMBER: &str = "classes.dex";

/// Where a container's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerSource {
    /// A container file on disk, memory-mapped for the build.
    File(PathBuf),
    /// Bytes the caller already holds.
    Memory { location: String, bytes: Vec<u8> },
    /// A member of a zip archive.
    ZipMember { archive: PathBuf, member: String },
}

impl ContainerSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn memory(location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Memory {
            location: location.into(),
            bytes: bytes.into(),
        }
    }

    pub fn zip_member(archive: impl Into<PathBuf>, member: impl Into<String>) -> Self {
        Self::ZipMember {
            archive: archive.into(),
            member: member.into(),
        }
    }

    /// Location string recorded in the artifact.
    pub fn location(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory { location, .. } => location.clone(),
            Self::ZipMember { archive, member } if member == PRIMARY_MEMBER => {
                archive.display().to_string()
            }
            Self::ZipMember { archive, member } => format!("{}!{member}", archive.display()),
        }
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// A parsed input container together with its bytes.
pub(crate) struct LoadedContainer {
    pub(crate) location: String,
    pub(crate) container: Container,
    /// Verifier outcome per class definition.
    pub(crate) statuses: Vec<ClassStatus>,
    backing: Backing,
}

impl LoadedContainer {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.backing
    }

    pub(crate) fn size(&self) -> u32 {
        self.container.file_size
    }

    pub(crate) fn checksum(&self) -> u32 {
        self.container.checksum
    }

    pub(crate) fn class_count(&self) -> usize {
        self.container.class_defs.len()
    }
}

impl std::fmt::Debug for LoadedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedContainer")
            .field("location", &self.location)
            .field("size", &self.backing.len())
            .field("classes", &self.container.class_defs.len())
            .finish()
    }
}

/// Input containers in input order, keyed by location.
#[derive(Debug, Default)]
pub(crate) struct SourceSet {
    containers: IndexMap<String, LoadedContainer>,
}

impl SourceSet {
    /// Load, parse and register a container.
    ///
    /// `statuses` gives one verifier status per class definition; `None`
    /// marks every class verified.
    pub(crate) fn add(
        &mut self,
        source: ContainerSource,
        statuses: Option<Vec<ClassStatus>>,
    ) -> Result<ContainerIndex> {
        let location = source.location();
        if self.containers.contains_key(&location) {
            return Err(WriteError::input(format!("duplicate container location {location:?}")));
        }

        let backing = match source {
            ContainerSource::File(path) => map_file(&path)?,
            ContainerSource::Memory { bytes, .. } => Backing::Owned(bytes),
            ContainerSource::ZipMember { archive, member } => extract_member(&archive, &member)?,
        };
        let container = Container::parse(&backing)
            .map_err(|e| WriteError::input(format!("{location}: {e}")))?;

        let class_count = container.class_defs.len();
        let statuses = match statuses {
            None => vec![ClassStatus::Verified; class_count],
            Some(statuses) if statuses.len() == class_count => statuses,
            Some(statuses) => {
                return Err(WriteError::input(format!(
                    "{location}: {} class statuses for {class_count} classes",
                    statuses.len()
                )));
            }
        };

        let index = ContainerIndex(self.containers.len() as u32);
        self.containers.insert(
            location.clone(),
            LoadedContainer {
                location,
                container,
                statuses,
                backing,
            },
        );
        Ok(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.containers.len()
    }

    pub(crate) fn get(&self, index: ContainerIndex) -> Option<&LoadedContainer> {
        self.containers.get_index(index.as_usize()).map(|(_, c)| c)
    }

    /// Containers with their indices, in input order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (ContainerIndex, &LoadedContainer)> {
        self.containers
            .values()
            .enumerate()
            .map(|(i, c)| (ContainerIndex(i as u32), c))
    }
}

fn map_file(path: &Path) -> Result<Backing> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Backing::Owned(Vec::new()));
    }
    // The mapping is read-only; concurrent writers to the file are not supported.
    let map = unsafe { MmapOptions::new().map(&file)? };
    Ok(Backing::Mapped(map))
}

fn extract_member(archive: &Path, member: &str) -> Result<Backing> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    let mut entry = zip.by_name(member).map_err(|e| zip_error(archive, e))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(Backing::Owned(bytes))
}

fn zip_error(archive: &Path, e: zip::result::ZipError) -> WriteError {
    match e {
        zip::result::ZipError::Io(io) => WriteError::Io(io),
        other => WriteError::input(format!("{}: {other}", archive.display())),
    }
}
