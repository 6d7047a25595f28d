//! The build state machine.
//!
//! ```text
//! AddSources → StartRoData → Initialize → PrepareLayout →
//! WriteRoData → WriteCode → WriteRelRo → WriteHeader → Done
//! ```
//!
//! Each call checks the state before touching the stream. Any error other
//! than a misordered call leaves the builder in [`WriteState::Failed`].

use std::fmt;
use std::io::{Seek, SeekFrom, Write};

use crc32fast::Hasher;
use kiln_core::{ContainerIndex, MethodRef};
use kiln_format::artifact::CHECKSUM_OFFSET;
use kiln_format::{ClassStatus, HEADER_SIZE, KeyValueStore};
use tracing::{debug, info};

use crate::checksum::combine;
use crate::compiled::CompiledMethodProvider;
use crate::config::WriterConfig;
use crate::error::{Result, WriteError};
use crate::layout::Layout;
use crate::patcher::RelativePatcher;
use crate::profile::Profile;
use crate::source::{ContainerSource, SourceSet};
use crate::va::VaWriter;
use crate::visitor::MethodTable;
use crate::writer::{SectionWriter, write_code, write_rel_ro, write_ro_data};

/// Phase the builder most recently entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteState {
    AddSources,
    StartRoData,
    Initialize,
    PrepareLayout,
    WriteRoData,
    WriteCode,
    WriteRelRo,
    WriteHeader,
    Done,
    Failed,
}

impl WriteState {
    pub fn name(self) -> &'static str {
        match self {
            Self::AddSources => "AddSources",
            Self::StartRoData => "StartRoData",
            Self::Initialize => "Initialize",
            Self::PrepareLayout => "PrepareLayout",
            Self::WriteRoData => "WriteRoData",
            Self::WriteCode => "WriteCode",
            Self::WriteRelRo => "WriteRelRo",
            Self::WriteHeader => "WriteHeader",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writes one executable artifact.
///
/// The builder owns the input containers, the patcher and every layout
/// table; output streams are borrowed per call.
pub struct Builder {
    config: WriterConfig,
    state: WriteState,
    sources: SourceSet,
    patcher: RelativePatcher,
    key_value_store: KeyValueStore,
    /// Stream position of the artifact start.
    base: u64,
    /// Artifact offset the next write starts at.
    position: u32,
    table: MethodTable,
    layout: Option<Layout>,
    /// Hashes every byte after the key/value store.
    hasher: Hasher,
}

impl Builder {
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            patcher: RelativePatcher::for_isa(config.isa()),
            config,
            state: WriteState::AddSources,
            sources: SourceSet::default(),
            key_value_store: KeyValueStore::new(),
            base: 0,
            position: 0,
            table: MethodTable::default(),
            layout: None,
            hasher: Hasher::new(),
        })
    }

    /// Replace the patcher chosen from the configured ISA.
    pub fn with_patcher(mut self, patcher: RelativePatcher) -> Result<Self> {
        if patcher.isa() != self.config.isa() {
            return Err(WriteError::input(format!(
                "{} patcher cannot patch {} code",
                patcher.isa(),
                self.config.isa()
            )));
        }
        self.patcher = patcher;
        Ok(self)
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn patcher(&self) -> &RelativePatcher {
        &self.patcher
    }

    /// Run `phase` if the builder is in `from`, entering `to` first.
    fn step<T>(
        &mut self,
        from: WriteState,
        to: WriteState,
        phase: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.state != from {
            return Err(WriteError::StateMisuse {
                expected: from,
                actual: self.state,
            });
        }
        self.state = to;
        phase(self).inspect_err(|_| self.state = WriteState::Failed)
    }

    /// Add an input container whose classes are all verified.
    pub fn add_source(&mut self, source: ContainerSource) -> Result<ContainerIndex> {
        self.step(WriteState::AddSources, WriteState::AddSources, |b| {
            b.sources.add(source, None)
        })
    }

    /// Add an input container with the verifier's status for each class.
    pub fn add_source_with_statuses(
        &mut self,
        source: ContainerSource,
        statuses: Vec<ClassStatus>,
    ) -> Result<ContainerIndex> {
        self.step(WriteState::AddSources, WriteState::AddSources, |b| {
            b.sources.add(source, Some(statuses))
        })
    }

    /// Reserve the header and key/value store at the current stream position.
    pub fn start_ro_data<W: Write + Seek>(
        &mut self,
        out: &mut W,
        key_value_store: KeyValueStore,
    ) -> Result<()> {
        self.step(WriteState::AddSources, WriteState::StartRoData, |b| {
            let kv_size = u32::try_from(key_value_store.serialized_size())
                .map_err(|_| WriteError::overflow("key/value store"))?;
            let kv_end = HEADER_SIZE
                .checked_add(kv_size)
                .ok_or_else(|| WriteError::overflow("key/value store"))?;
            b.base = out.stream_position()?;
            out.write_all(&vec![0u8; kv_end as usize])?;
            b.position = kv_end;
            b.key_value_store = key_value_store;
            debug!(containers = b.sources.len(), kv_end, "started read-only data");
            Ok(())
        })
    }

    /// Ask the compiler for every method and fix the code order.
    pub fn initialize(
        &mut self,
        provider: &dyn CompiledMethodProvider,
        profile: Option<&Profile>,
    ) -> Result<()> {
        self.step(WriteState::StartRoData, WriteState::Initialize, |b| {
            b.table = MethodTable::collect(&b.sources, provider, profile)?;
            debug!(
                classes = b.table.classes.len(),
                methods = b.table.methods.len(),
                compiled = b.table.compiled_count(),
                "initialized"
            );
            Ok(())
        })
    }

    /// Assign every offset of the artifact.
    pub fn prepare_layout(&mut self) -> Result<()> {
        self.step(WriteState::Initialize, WriteState::PrepareLayout, |b| {
            let kv_size = b.position - HEADER_SIZE;
            let layout =
                Layout::compute(&b.table, &b.sources, &b.config, kv_size, &mut b.patcher)?;
            b.layout = Some(layout);
            Ok(())
        })
    }

    fn layout(&self) -> Result<&Layout> {
        self.layout
            .as_ref()
            .ok_or_else(|| WriteError::invariant("layout used before PrepareLayout"))
    }

    pub fn write_ro_data<W: Write + Seek>(&mut self, out: &mut W) -> Result<()> {
        self.step(WriteState::PrepareLayout, WriteState::WriteRoData, |b| {
            let layout = b.layout.as_ref().ok_or_else(|| WriteError::invariant("no layout"))?;
            let mut w = SectionWriter::new(out, &mut b.hasher, b.base, b.position);
            write_ro_data(&mut w, layout, &b.table, &b.sources)?;
            b.position = w.position();
            Ok(())
        })
    }

    pub fn write_code<W: Write + Seek>(&mut self, out: &mut W) -> Result<()> {
        self.step(WriteState::WriteRoData, WriteState::WriteCode, |b| {
            let layout = b.layout.as_ref().ok_or_else(|| WriteError::invariant("no layout"))?;
            let mut w = SectionWriter::new(out, &mut b.hasher, b.base, b.position);
            write_code(&mut w, layout, &b.table, &b.patcher, b.config.isa())?;
            b.position = w.position();
            Ok(())
        })
    }

    pub fn write_rel_ro<W: Write + Seek>(&mut self, out: &mut W) -> Result<()> {
        self.step(WriteState::WriteCode, WriteState::WriteRelRo, |b| {
            let layout = b.layout.as_ref().ok_or_else(|| WriteError::invariant("no layout"))?;
            let mut w = SectionWriter::new(out, &mut b.hasher, b.base, b.position);
            write_rel_ro(&mut w, layout)?;
            b.position = w.position();
            Ok(())
        })
    }

    /// Seek back, write the header and key/value store, and seek to the end.
    ///
    /// Returns the artifact checksum.
    pub fn write_header<W: Write + Seek>(&mut self, out: &mut W) -> Result<u32> {
        let checksum = self.step(WriteState::WriteRelRo, WriteState::WriteHeader, |b| {
            let mut header = b.layout()?.header;
            let kv = b.key_value_store.serialize();
            if HEADER_SIZE as usize + kv.len() != header.key_value_store_end() as usize {
                return Err(WriteError::invariant("key/value store changed size"));
            }
            let prefix = header.to_bytes();
            let deterministic = &kv[..b.key_value_store.deterministic_len()];
            header.checksum = combine(&prefix[..CHECKSUM_OFFSET], deterministic, &b.hasher);

            out.seek(SeekFrom::Start(b.base))?;
            out.write_all(&header.to_bytes())?;
            out.write_all(&kv)?;
            out.seek(SeekFrom::Start(b.base + header.total_size as u64))?;
            info!(
                checksum = format_args!("{:#010x}", header.checksum),
                total_size = header.total_size,
                code_size = header.code_size,
                thunks = b.patcher.thunk_count(),
                "wrote executable artifact"
            );
            Ok(header.checksum)
        })?;
        self.state = WriteState::Done;
        Ok(checksum)
    }

    /// Run every phase after the sources have been added.
    pub fn write_artifact<W: Write + Seek>(
        &mut self,
        out: &mut W,
        key_value_store: KeyValueStore,
        provider: &dyn CompiledMethodProvider,
        profile: Option<&Profile>,
    ) -> Result<u32> {
        self.start_ro_data(out, key_value_store)?;
        self.initialize(provider, profile)?;
        self.prepare_layout()?;
        self.write_ro_data(out)?;
        self.write_code(out)?;
        self.write_rel_ro(out)?;
        self.write_header(out)
    }

    /// Final code offset (entry adjustment included) of `method`, for an
    /// image writer placing objects that point at compiled code.
    ///
    /// Answerable from the end of `PrepareLayout` until `WriteHeader`.
    /// `None` when the method has no compiled code.
    pub fn method_code_offset(&self, method: MethodRef) -> Result<Option<u32>> {
        match self.state {
            WriteState::PrepareLayout
            | WriteState::WriteRoData
            | WriteState::WriteCode
            | WriteState::WriteRelRo => Ok(self.layout()?.method_offsets.get(method)),
            actual => Err(WriteError::StateMisuse {
                expected: WriteState::PrepareLayout,
                actual,
            }),
        }
    }

    /// Writer for the verification artifact paired with this build.
    pub fn va_writer(&self) -> VaWriter<'_> {
        VaWriter::new(&self.sources)
    }
}
