//! Eviction stamps for consumers that cache atlas coordinates.

/// Low-order snapshot of a font's eviction counter.
///
/// Text layouts that hold on to atlas UVs record a stamp when they are
/// built and compare it with the current counter before drawing. The high
/// bit is always set, so a zeroed stamp never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvictionStamp(u8);

impl EvictionStamp {
    /// Stamp for the given counter value.
    pub const fn from_counter(counter: u32) -> Self {
        Self(((counter & 0x7F) as u8) | 0x80)
    }

    /// Raw stamp byte.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Whether coordinates taken under this stamp are still valid.
    pub const fn is_current(self, counter: u32) -> bool {
        self.0 == Self::from_counter(counter).0
    }
}

impl From<EvictionStamp> for u8 {
    fn from(stamp: EvictionStamp) -> Self {
        stamp.0
    }
}
