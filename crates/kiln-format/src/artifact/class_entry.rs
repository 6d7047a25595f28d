//! Per-class dispatch descriptors.
//!
//! Format: `[u16 status][u16 kind]`, then for [`ClassKind::SomeCompiled`] a
//! bitmap `[u32 words][u32 × words]` marking compiled methods, then one u32
//! code offset per compiled method (every method for `AllCompiled`).

use crate::bytes::{Cursor, put_u16, put_u32};

/// Class status recorded for the runtime. Ordered by progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClassStatus {
    NotReady,
    Resolved,
    Verified,
    Initialized,
}

impl ClassStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::NotReady => "not-ready",
            Self::Resolved => "resolved",
            Self::Verified => "verified",
            Self::Initialized => "initialized",
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::NotReady => 0,
            Self::Resolved => 4,
            Self::Verified => 8,
            Self::Initialized => 12,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotReady),
            4 => Some(Self::Resolved),
            8 => Some(Self::Verified),
            12 => Some(Self::Initialized),
            _ => None,
        }
    }
}

/// Which of a class's methods have compiled code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassKind {
    AllCompiled,
    SomeCompiled,
    NoneCompiled,
}

impl ClassKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::AllCompiled => "all-compiled",
            Self::SomeCompiled => "some-compiled",
            Self::NoneCompiled => "none-compiled",
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::AllCompiled => 0,
            Self::SomeCompiled => 1,
            Self::NoneCompiled => 2,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::AllCompiled),
            1 => Some(Self::SomeCompiled),
            2 => Some(Self::NoneCompiled),
            _ => None,
        }
    }

    /// Classify a class from the number of compiled methods.
    pub fn classify(compiled: usize, total: usize) -> Self {
        if compiled == 0 {
            Self::NoneCompiled
        } else if compiled == total {
            Self::AllCompiled
        } else {
            Self::SomeCompiled
        }
    }
}

/// Decoded dispatch descriptor of one class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub status: ClassStatus,
    pub kind: ClassKind,
    /// Code offset (entry adjustment included) per method, `None` when the
    /// method runs in the interpreter.
    pub code_offsets: Vec<Option<u32>>,
}

impl ClassDescriptor {
    /// Build a descriptor from per-method code offsets.
    pub fn new(status: ClassStatus, code_offsets: Vec<Option<u32>>) -> Self {
        let compiled = code_offsets.iter().filter(|o| o.is_some()).count();
        Self {
            status,
            kind: ClassKind::classify(compiled, code_offsets.len()),
            code_offsets,
        }
    }

    /// Size of the encoded descriptor for a class with `method_count`
    /// methods of which `compiled` have code.
    pub fn encoded_size(method_count: usize, compiled: usize) -> usize {
        match ClassKind::classify(compiled, method_count) {
            ClassKind::NoneCompiled => 4,
            ClassKind::AllCompiled => 4 + 4 * method_count,
            ClassKind::SomeCompiled => 4 + 4 + 4 * bitmap_words(method_count) + 4 * compiled,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u16(out, self.status.to_u16());
        put_u16(out, self.kind.to_u16());

        if self.kind == ClassKind::SomeCompiled {
            let words = bitmap_words(self.code_offsets.len());
            let mut bitmap = vec![0u32; words];
            for (i, offset) in self.code_offsets.iter().enumerate() {
                if offset.is_some() {
                    bitmap[i / 32] |= 1 << (i % 32);
                }
            }
            put_u32(out, words as u32);
            for w in bitmap {
                put_u32(out, w);
            }
        }

        for offset in self.code_offsets.iter().flatten() {
            put_u32(out, *offset);
        }
    }

    /// Decode a descriptor at `offset`; `method_count` comes from the class
    /// definition in the container.
    pub fn decode(bytes: &[u8], offset: usize, method_count: usize) -> Option<Self> {
        let mut cur = Cursor::at(bytes, offset);
        let status = ClassStatus::from_u16(cur.u16()?)?;
        let kind = ClassKind::from_u16(cur.u16()?)?;

        let code_offsets = match kind {
            ClassKind::NoneCompiled => vec![None; method_count],
            ClassKind::AllCompiled => (0..method_count)
                .map(|_| cur.u32().map(Some))
                .collect::<Option<Vec<_>>>()?,
            ClassKind::SomeCompiled => {
                let words = cur.u32()? as usize;
                if words != bitmap_words(method_count) {
                    return None;
                }
                let bitmap = (0..words)
                    .map(|_| cur.u32())
                    .collect::<Option<Vec<_>>>()?;
                let mut offsets = Vec::with_capacity(method_count);
                for i in 0..method_count {
                    if bitmap[i / 32] & (1 << (i % 32)) != 0 {
                        offsets.push(Some(cur.u32()?));
                    } else {
                        offsets.push(None);
                    }
                }
                offsets
            }
        };

        Some(Self {
            status,
            kind,
            code_offsets,
        })
    }
}

fn bitmap_words(bits: usize) -> usize {
    bits.div_ceil(32)
}

/// Status and kind of the descriptor at `offset`, without decoding its
/// code offsets.
pub fn peek_descriptor(bytes: &[u8], offset: usize) -> Option<(ClassStatus, ClassKind)> {
    let mut cur = Cursor::at(bytes, offset);
    let status = ClassStatus::from_u16(cur.u16()?)?;
    let kind = ClassKind::from_u16(cur.u16()?)?;
    Some((status, kind))
}
