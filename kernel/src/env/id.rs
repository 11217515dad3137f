//! Environment identifiers.
//!
//! An `EnvId` packs a slot index into its low bits and a generation counter
//! above [`ENVGENSHIFT`]. The generation changes every time a slot is
//! reused, so an identifier held by a peer after its target died can never
//! alias the slot's next occupant.

use core::fmt;

use crate::config::ENVGENSHIFT;

/// Opaque environment identifier.
///
/// The all-zero value never names an environment; lookups treat it as
/// "the current environment".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(i32);

impl EnvId {
    /// "No environment" / "the caller itself".
    pub const NONE: EnvId = EnvId(0);

    /// Smallest generation an allocated identifier can carry.
    pub const MIN_GENERATION: i32 = 1 << ENVGENSHIFT;

    /// Wrap a raw value received from the system call boundary.
    pub const fn from_raw(raw: i32) -> Self {
        EnvId(raw)
    }

    /// Raw value as handed to environments.
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Combine a generation and a slot index.
    ///
    /// `generation` must have no bits below `capacity`.
    pub const fn encode(generation: i32, slot: usize) -> Self {
        EnvId(generation | slot as i32)
    }

    /// Slot index for a table with `capacity` slots (a power of two).
    pub const fn slot(self, capacity: usize) -> usize {
        (self.0 as u32 as usize) & (capacity - 1)
    }

    /// Generation bits for a table with `capacity` slots.
    pub const fn generation(self, capacity: usize) -> i32 {
        self.0 & !((capacity - 1) as i32)
    }

    /// Whether this is the reserved zero identifier.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Generation for the next occupant of the slot last held by `prev`.
    ///
    /// Adds one generation stride and masks the slot bits off. If that
    /// overflows into a non-positive value it restarts at
    /// [`EnvId::MIN_GENERATION`], so no identifier is ever zero or negative.
    pub const fn next_generation(prev: EnvId, capacity: usize) -> i32 {
        let generation =
            prev.0.wrapping_add(Self::MIN_GENERATION) & !((capacity - 1) as i32);
        if generation <= 0 {
            Self::MIN_GENERATION
        } else {
            generation
        }
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NENV;

    #[test]
    fn test_encode_decode() {
        let id = EnvId::encode(3 << ENVGENSHIFT, 17);
        assert_eq!(id.slot(NENV), 17);
        assert_eq!(id.generation(NENV), 3 << ENVGENSHIFT);
        assert_eq!(id.as_raw(), (3 << ENVGENSHIFT) | 17);
    }

    #[test]
    fn test_first_generation_from_zero() {
        assert_eq!(EnvId::next_generation(EnvId::NONE, NENV), 1 << ENVGENSHIFT);
    }

    #[test]
    fn test_generation_strictly_increases() {
        let first = EnvId::encode(EnvId::next_generation(EnvId::NONE, NENV), 5);
        let second = EnvId::encode(EnvId::next_generation(first, NENV), 5);
        assert!(second.generation(NENV) > first.generation(NENV));
        assert_eq!(second.slot(NENV), 5);
        assert_ne!(first, second);
    }

    #[test]
    fn test_generation_wraps_to_minimum() {
        let last = EnvId::encode(i32::MAX & !((NENV - 1) as i32), NENV - 1);
        let generation = EnvId::next_generation(last, NENV);
        assert_eq!(generation, EnvId::MIN_GENERATION);
        assert!(EnvId::encode(generation, NENV - 1).as_raw() > 0);
    }

    #[test]
    fn test_display_is_hex() {
        let id = EnvId::from_raw(0x1001);
        assert_eq!(alloc::format!("{}", id), "00001001");
    }
}
