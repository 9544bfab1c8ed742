//! Offset pagination shared by list operations.

use serde::{Deserialize, Serialize};

/// A 1-based page request. A `size` of zero means "use the configured default".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self { number, size }
    }

    /// Clamp to `1..` for the page number and `1..=max` for the size.
    pub fn normalized(self, default_size: u32, max_size: u32) -> Self {
        let size = match self.size {
            0 => default_size,
            s => s,
        };
        Self {
            number: self.number.max(1),
            size: size.clamp(1, max_size.max(1)),
        }
    }

    pub fn offset(&self) -> usize {
        (self.number.saturating_sub(1) as usize) * self.size as usize
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { number: 1, size: 0 }
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}
