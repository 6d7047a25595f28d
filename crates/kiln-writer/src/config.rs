//! Writer configuration.

use kiln_core::{InstructionSet, IsaFeatures, PAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WriteError};

/// Default cap on the entries of each deduplication store.
pub const DEFAULT_MAX_DEDUP_ENTRIES: usize = 1 << 20;

/// Configuration for one artifact build.
///
/// Loadable from JSON; missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct WriterConfig {
    /// Target instruction set of the compiled code.
    pub(crate) isa: InstructionSet,
    /// Feature bits recorded verbatim in the header.
    pub(crate) isa_features: IsaFeatures,
    /// Emit the six runtime trampolines (boot image builds).
    pub(crate) emit_trampolines: bool,
    /// Capacity limit of the stackmap and method-code dedup stores.
    pub(crate) max_dedup_entries: usize,
    /// Alignment of the code and rel-ro segments and of BSS.
    pub(crate) page_size: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            isa: InstructionSet::Arm64,
            isa_features: IsaFeatures::NONE,
            emit_trampolines: false,
            max_dedup_entries: DEFAULT_MAX_DEDUP_ENTRIES,
            page_size: PAGE_SIZE,
        }
    }
}

impl WriterConfig {
    pub fn new(isa: InstructionSet) -> Self {
        Self {
            isa,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WriteError::input(format!("writer config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn isa_features(mut self, features: IsaFeatures) -> Self {
        self.isa_features = features;
        self
    }

    pub fn emit_trampolines(mut self, value: bool) -> Self {
        self.emit_trampolines = value;
        self
    }

    pub fn max_dedup_entries(mut self, value: usize) -> Self {
        self.max_dedup_entries = value;
        self
    }

    pub fn page_size(mut self, value: u32) -> Self {
        self.page_size = value;
        self
    }

    pub fn isa(&self) -> InstructionSet {
        self.isa
    }

    pub fn features(&self) -> IsaFeatures {
        self.isa_features
    }

    pub fn trampolines_enabled(&self) -> bool {
        self.emit_trampolines
    }

    pub fn dedup_limit(&self) -> usize {
        self.max_dedup_entries
    }

    pub fn page(&self) -> u32 {
        self.page_size
    }

    /// Reject page sizes the layout cannot honor.
    pub fn validate(&self) -> Result<()> {
        let code_alignment = self.isa.code_alignment();
        if !self.page_size.is_power_of_two() || self.page_size < code_alignment {
            return Err(WriteError::input(format!(
                "page size {} must be a power of two of at least {code_alignment}",
                self.page_size
            )));
        }
        if self.max_dedup_entries == 0 {
            return Err(WriteError::input("dedup store limit must be positive"));
        }
        Ok(())
    }
}
