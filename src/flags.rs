//! Bitmask flags controlling individual load and set operations.
//!
//! Flags passed to a call are OR-ed with the store's configured defaults.

use std::ops::{BitOr, BitOrAssign};

/// Flags for `load` / `load_all` / `load_thunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    /// Bypass the batcher and walk the cascade directly.
    pub const NO_BATCH: Self = Self(1);

    /// Reserved: skip result materialisation when the caller only wants the
    /// side effects of a load (priming).
    pub const NO_COLLECT_BATCH: Self = Self(1 << 1);

    /// Never join an in-flight batch that already owns this key; an open
    /// pending batch is still joined.
    pub const NO_SHARE_BATCH: Self = Self(1 << 2);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LoadFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags for `set` / `set_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetFlags(u32);

impl SetFlags {
    /// Write layers one at a time instead of fanning out in parallel.
    pub const SEQUENTIAL: Self = Self(1);

    /// With [`SetFlags::SEQUENTIAL`], iterate from the shallowest layer to
    /// the deepest. The default direction is deepest to shallowest.
    pub const ASCENDING: Self = Self(1 << 1);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SetFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SetFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        assert_eq!(LoadFlags::default(), LoadFlags::empty());
        assert_eq!(SetFlags::default(), SetFlags::empty());
        assert!(!LoadFlags::empty().contains(LoadFlags::NO_BATCH));
    }

    #[test]
    fn or_accumulates_flags() {
        let flags = LoadFlags::NO_BATCH | LoadFlags::NO_SHARE_BATCH;
        assert!(flags.contains(LoadFlags::NO_BATCH));
        assert!(flags.contains(LoadFlags::NO_SHARE_BATCH));
        assert!(!flags.contains(LoadFlags::NO_COLLECT_BATCH));
    }

    #[test]
    fn contains_requires_all_bits() {
        let flags = SetFlags::SEQUENTIAL;
        assert!(flags.contains(SetFlags::SEQUENTIAL));
        assert!(!flags.contains(SetFlags::SEQUENTIAL | SetFlags::ASCENDING));
    }
}
