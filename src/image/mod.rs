//! Base image cache and per-instance disk provisioning.

pub mod cache;
pub mod disk;

pub use cache::{CacheOutcome, ImageCache};
pub use disk::{provision_disk, DiskTool};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Requested disk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskSize {
    /// Grow to this many bytes if the image is smaller.
    Bytes(u64),
    /// Unrecognised unit: keep the image's own size.
    Keep,
}

impl DiskSize {
    /// Parse `<integer>G` or `<integer>M` (case-insensitive).
    ///
    /// Any other suffix yields [`DiskSize::Keep`]. A `G`/`M` size whose
    /// magnitude is not a non-negative integer is rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (digits, unit) = match text.char_indices().last() {
            Some((idx, c)) if c.eq_ignore_ascii_case(&'g') => (&text[..idx], GIB),
            Some((idx, c)) if c.eq_ignore_ascii_case(&'m') => (&text[..idx], MIB),
            _ => return Ok(DiskSize::Keep),
        };
        let magnitude: u64 = digits
            .parse()
            .map_err(|_| Error::invalid(format!("invalid disk size '{text}'")))?;
        magnitude
            .checked_mul(unit)
            .map(DiskSize::Bytes)
            .ok_or_else(|| Error::invalid(format!("disk size '{text}' is too large")))
    }

    /// Size in whole GiB, rounded up. `None` for [`DiskSize::Keep`].
    pub fn gib_ceil(self) -> Option<u64> {
        match self {
            DiskSize::Bytes(bytes) => Some(bytes.div_ceil(GIB)),
            DiskSize::Keep => None,
        }
    }
}
