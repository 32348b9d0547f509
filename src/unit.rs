//! Utilities for working with raw byte units.

use core::fmt;

/// `1 KiB`
pub const KIB: usize = 1 << 10;
/// `1 MiB`
pub const MIB: usize = 1 << 20;
/// `1 GiB`
pub const GIB: usize = 1 << 30;

/// Wrapper around a raw number of bytes that pretty-prints
/// them using the [`Display`](core::fmt::Display)
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteUnit(pub u64);

/// Wrap the given number of bytes into a [`ByteUnit`].
pub fn bytes(count: usize) -> ByteUnit {
    ByteUnit(count as u64)
}

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kib, mib, gib) = (KIB as u64, MIB as u64, GIB as u64);
        let tib = gib << 10;
        let count = self.0 as f32;

        match self.0 {
            n if n < kib => write!(f, "{} B", n),
            n if n < mib => write!(f, "{:.2} KiB", count / kib as f32),
            n if n < gib => write!(f, "{:.2} MiB", count / mib as f32),
            n if n < tib => write!(f, "{:.2} GiB", count / gib as f32),
            _ => write!(f, "{:.2} TiB", count / tib as f32),
        }
    }
}
