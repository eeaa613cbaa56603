//! Byte-size value object.

use serde::{Deserialize, Serialize};

/// A size in bytes, with the human formatting used in job error messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const KIB: u64 = 1024;
    pub const MIB: u64 = 1024 * 1024;

    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * Self::MIB)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Megabytes with one decimal, e.g. `200.0MB`.
    pub fn to_mb_string(self) -> String {
        format!("{:.1}MB", self.0 as f64 / Self::MIB as f64)
    }
}

impl core::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_mb_string())
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_megabytes() {
        assert_eq!(ByteSize::mib(200).to_mb_string(), "200.0MB");
        assert_eq!(ByteSize::bytes(1_572_864).to_string(), "1.5MB");
    }

    #[test]
    fn ordering_follows_byte_count() {
        assert!(ByteSize::mib(200) > ByteSize::mib(100));
    }
}
