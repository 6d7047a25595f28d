//! Key/value store following the artifact header.
//!
//! Layout: `key\0value\0` entries sorted by key. The deterministic partition
//! comes first and is terminated by a single `\0`; the non-deterministic
//! partition follows. Only the deterministic prefix (sentinel included)
//! feeds the artifact checksum.
//!
//! Every non-deterministic key is always present and its value is NUL-padded
//! to a fixed length, so the store's size never depends on those values.

use std::collections::BTreeMap;

/// Keys whose values participate in the checksum.
pub const DETERMINISTIC_KEYS: [&str; 7] = [
    "boot-classpath-checksums",
    "class-path",
    "compilation-reason",
    "concurrent-copying",
    "debuggable",
    "has-patch-info",
    "requires-image",
];

/// Keys excluded from the checksum, with the fixed width of their value field.
pub const NON_DETERMINISTIC_KEYS: [(&str, usize); 3] = [
    ("apex-versions", 1024),
    ("dex2oat-cmdline", 2048),
    ("dex2oat-host", 64),
];

/// Key/value store error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyValueError {
    #[error("unknown key-value store key: {0}")]
    UnknownKey(String),
    #[error("key-value entry {0} contains a NUL byte")]
    EmbeddedNul(String),
    #[error("value for {key} is {len} bytes (max {max})")]
    ValueTooLong { key: String, len: usize, max: usize },
    #[error("malformed key-value store at byte {0}")]
    Malformed(usize),
}

pub fn is_deterministic_key(key: &str) -> bool {
    DETERMINISTIC_KEYS.contains(&key)
}

fn non_deterministic_width(key: &str) -> Option<usize> {
    NON_DETERMINISTIC_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|&(_, width)| width)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValueStore {
    deterministic: BTreeMap<String, String>,
    non_deterministic: BTreeMap<String, String>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, routing it to its partition.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), KeyValueError> {
        let key = key.into();
        let value = value.into();
        if value.contains('\0') || key.contains('\0') {
            return Err(KeyValueError::EmbeddedNul(key));
        }

        if is_deterministic_key(&key) {
            self.deterministic.insert(key, value);
            return Ok(());
        }

        let Some(max) = non_deterministic_width(&key) else {
            return Err(KeyValueError::UnknownKey(key));
        };
        if value.len() > max {
            return Err(KeyValueError::ValueTooLong {
                key,
                len: value.len(),
                max,
            });
        }
        self.non_deterministic.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.deterministic
            .get(key)
            .or_else(|| self.non_deterministic.get(key))
            .map(String::as_str)
    }

    pub fn deterministic(&self) -> impl Iterator<Item = (&str, &str)> {
        self.deterministic
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn non_deterministic(&self) -> impl Iterator<Item = (&str, &str)> {
        self.non_deterministic
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Length of the deterministic prefix, sentinel included.
    pub fn deterministic_len(&self) -> usize {
        self.deterministic
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>()
            + 1
    }

    /// Total serialized size.
    pub fn serialized_size(&self) -> usize {
        let tail: usize = NON_DETERMINISTIC_KEYS
            .iter()
            .map(|(k, width)| k.len() + 1 + width + 1)
            .sum();
        self.deterministic_len() + tail
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        for (key, value) in &self.deterministic {
            push_entry(&mut out, key, value.as_bytes());
        }
        out.push(0);

        for &(key, width) in &NON_DETERMINISTIC_KEYS {
            let value = self
                .non_deterministic
                .get(key)
                .map(String::as_bytes)
                .unwrap_or_default();
            let mut padded = value.to_vec();
            padded.resize(width, 0);
            push_entry(&mut out, key, &padded);
        }
        out
    }

    /// Parse a serialized store.
    pub fn parse(bytes: &[u8]) -> Result<Self, KeyValueError> {
        let mut store = Self::new();
        let mut pos = 0;

        loop {
            let key = read_cstr(bytes, &mut pos)?;
            if key.is_empty() {
                break;
            }
            let value = read_cstr(bytes, &mut pos)?;
            if !is_deterministic_key(key) {
                return Err(KeyValueError::UnknownKey(key.to_string()));
            }
            store.insert(key, value)?;
        }

        while pos < bytes.len() {
            let key = read_cstr(bytes, &mut pos)?;
            let width =
                non_deterministic_width(key).ok_or_else(|| KeyValueError::UnknownKey(key.into()))?;
            let field = bytes
                .get(pos..pos + width + 1)
                .ok_or(KeyValueError::Malformed(pos))?;
            pos += width + 1;
            let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            let value =
                std::str::from_utf8(&field[..len]).map_err(|_| KeyValueError::Malformed(pos))?;
            if !value.is_empty() {
                store.insert(key, value)?;
            }
        }

        Ok(store)
    }
}

fn push_entry(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    out.extend_from_slice(value);
    out.push(0);
}

fn read_cstr<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a str, KeyValueError> {
    let start = *pos;
    let rest = bytes.get(start..).ok_or(KeyValueError::Malformed(start))?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(KeyValueError::Malformed(start))?;
    *pos = start + len + 1;
    std::str::from_utf8(&rest[..len]).map_err(|_| KeyValueError::Malformed(start))
}
