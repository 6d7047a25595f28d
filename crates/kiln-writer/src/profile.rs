//! Optional method profile for hot/cold code ordering.

use std::collections::BTreeSet;

use kiln_core::MethodRef;
use serde::{Deserialize, Serialize};

/// Hot and startup method sets. Absent methods are laid out last.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    hot: BTreeSet<MethodRef>,
    startup: BTreeSet<MethodRef>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hot(mut self, method: MethodRef) -> Self {
        self.hot.insert(method);
        self
    }

    pub fn startup(mut self, method: MethodRef) -> Self {
        self.startup.insert(method);
        self
    }

    /// Layout tier: 0 for hot, 1 for startup-only, 2 for the rest.
    pub fn tier(&self, method: MethodRef) -> u8 {
        if self.hot.contains(&method) {
            0
        } else if self.startup.contains(&method) {
            1
        } else {
            2
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.startup.is_empty()
    }
}
