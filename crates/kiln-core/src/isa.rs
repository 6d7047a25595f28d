//! Target instruction sets and their layout parameters.

use std::fmt;
use std::str::FromStr;

/// Target instruction set of the emitted machine code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructionSet {
    Arm64,
    Thumb2,
    X86_64,
}

impl InstructionSet {
    pub const ALL: [InstructionSet; 3] = [Self::Arm64, Self::Thumb2, Self::X86_64];

    /// Identifier stored in the artifact header.
    pub fn id(self) -> u32 {
        match self {
            Self::Arm64 => 1,
            Self::Thumb2 => 2,
            Self::X86_64 => 3,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|isa| isa.id() == id)
    }

    /// Alignment of every method's first instruction and of every thunk.
    pub fn code_alignment(self) -> u32 {
        match self {
            Self::Arm64 | Self::X86_64 => 16,
            Self::Thumb2 => 8,
        }
    }

    /// Bias added to a code address to form its entrypoint (Thumb mode bit).
    pub fn entry_adjustment(self) -> u32 {
        match self {
            Self::Thumb2 => 1,
            Self::Arm64 | Self::X86_64 => 0,
        }
    }

    /// Size of a runtime pointer, which is also the size of a method BSS slot.
    pub fn pointer_size(self) -> u32 {
        match self {
            Self::Arm64 | Self::X86_64 => 8,
            Self::Thumb2 => 4,
        }
    }

    /// Minimum alignment of a single instruction.
    pub fn instruction_alignment(self) -> u32 {
        match self {
            Self::Arm64 => 4,
            Self::Thumb2 => 2,
            Self::X86_64 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::Thumb2 => "thumb2",
            Self::X86_64 => "x86-64",
        }
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name that does not match any supported instruction set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownIsa(pub String);

impl fmt::Display for UnknownIsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown instruction set: {}", self.0)
    }
}

impl std::error::Error for UnknownIsa {}

impl FromStr for InstructionSet {
    type Err = UnknownIsa;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "thumb2" | "arm" => Ok(Self::Thumb2),
            "x86-64" | "x86_64" | "amd64" => Ok(Self::X86_64),
            _ => Err(UnknownIsa(s.to_string())),
        }
    }
}

/// Opaque ISA feature bits, carried verbatim into the artifact header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct IsaFeatures(pub u32);

impl IsaFeatures {
    pub const NONE: Self = Self(0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }
}
