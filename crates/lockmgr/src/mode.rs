//! Lock modes and the conflict matrix.

/// Number of lock modes, including [`LockMode::None`].
pub const LOCK_MODES_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockMode {
    None = 0,
    IntentShared = 1,
    IntentExclusive = 2,
    Shared = 3,
    Exclusive = 4,
}

/// `CONFLICTS_TABLE[new] & existing != 0` means a new request in mode `new`
/// conflicts with an existing request whose mode bit is in `existing`.
const CONFLICTS_TABLE: [u32; LOCK_MODES_COUNT] = [
    // None
    0,
    // IntentShared
    1 << LockMode::Exclusive as u32,
    // IntentExclusive
    (1 << LockMode::Shared as u32) | (1 << LockMode::Exclusive as u32),
    // Shared
    (1 << LockMode::IntentExclusive as u32) | (1 << LockMode::Exclusive as u32),
    // Exclusive
    (1 << LockMode::Shared as u32)
        | (1 << LockMode::Exclusive as u32)
        | (1 << LockMode::IntentShared as u32)
        | (1 << LockMode::IntentExclusive as u32),
];

const MODE_NAMES: [&str; LOCK_MODES_COUNT] = ["NONE", "IS", "IX", "S", "X"];

const LEGACY_MODE_NAMES: [&str; LOCK_MODES_COUNT] = ["", "r", "w", "R", "W"];

/// Bit-mask of the intent modes, the only modes admitted on the fast path.
pub const INTENT_MODES: u32 =
    (1 << LockMode::IntentShared as u32) | (1 << LockMode::IntentExclusive as u32);

impl LockMode {
    pub const ALL: [LockMode; LOCK_MODES_COUNT] = [
        LockMode::None,
        LockMode::IntentShared,
        LockMode::IntentExclusive,
        LockMode::Shared,
        LockMode::Exclusive,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<LockMode> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        MODE_NAMES[self.index()]
    }

    /// Single-letter name used by older status reports.
    pub fn legacy_name(self) -> &'static str {
        LEGACY_MODE_NAMES[self.index()]
    }

    #[inline]
    pub fn is_intent(self) -> bool {
        mode_mask(self) & INTENT_MODES != 0
    }

    /// Bit-mask of the modes this mode cannot coexist with.
    #[inline]
    pub fn conflict_set(self) -> u32 {
        CONFLICTS_TABLE[self.index()]
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub const fn mode_mask(mode: LockMode) -> u32 {
    1 << mode as u32
}

/// True iff `new_mode` conflicts with any mode in `existing_modes_mask`.
#[inline]
pub fn conflicts(new_mode: LockMode, existing_modes_mask: u32) -> bool {
    new_mode.conflict_set() & existing_modes_mask != 0
}

/// True iff holding `covering_mode` already implies holding `mode`, that is
/// adding `mode`'s conflicts to `covering_mode`'s leaves the set unchanged.
#[inline]
pub fn is_mode_covered(mode: LockMode, covering_mode: LockMode) -> bool {
    (covering_mode.conflict_set() | mode.conflict_set()) == covering_mode.conflict_set()
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    fn conflicting(a: LockMode, b: LockMode) -> bool {
        conflicts(a, mode_mask(b))
    }

    #[test]
    fn conflict_matrix_matches_table() {
        let expected = [
            (IntentShared, IntentShared, false),
            (IntentShared, IntentExclusive, false),
            (IntentShared, Shared, false),
            (IntentShared, Exclusive, true),
            (IntentExclusive, IntentShared, false),
            (IntentExclusive, IntentExclusive, false),
            (IntentExclusive, Shared, true),
            (IntentExclusive, Exclusive, true),
            (Shared, IntentShared, false),
            (Shared, IntentExclusive, true),
            (Shared, Shared, false),
            (Shared, Exclusive, true),
            (Exclusive, IntentShared, true),
            (Exclusive, IntentExclusive, true),
            (Exclusive, Shared, true),
            (Exclusive, Exclusive, true),
        ];
        for (existing, new, conflict) in expected {
            assert_eq!(
                conflicting(new, existing),
                conflict,
                "{new} requested while {existing} is held"
            );
        }
    }

    #[test]
    fn matrix_is_symmetric() {
        for a in LockMode::ALL {
            for b in LockMode::ALL {
                assert_eq!(conflicting(a, b), conflicting(b, a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn none_never_conflicts() {
        for mode in LockMode::ALL {
            assert!(!conflicting(None, mode));
            assert!(!conflicting(mode, None));
        }
    }

    #[test]
    fn coverage() {
        assert!(is_mode_covered(IntentShared, Shared));
        assert!(is_mode_covered(IntentShared, IntentExclusive));
        assert!(is_mode_covered(Shared, Exclusive));
        assert!(is_mode_covered(IntentExclusive, Exclusive));
        assert!(is_mode_covered(None, IntentShared));
        assert!(!is_mode_covered(Shared, IntentExclusive));
        assert!(!is_mode_covered(IntentExclusive, Shared));
        assert!(!is_mode_covered(Exclusive, Shared));
        for mode in LockMode::ALL {
            assert!(is_mode_covered(mode, mode));
            assert!(is_mode_covered(mode, Exclusive));
        }
    }

    #[test]
    fn names() {
        let names: Vec<_> = LockMode::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["NONE", "IS", "IX", "S", "X"]);
        assert_eq!(Exclusive.legacy_name(), "W");
        assert_eq!(IntentShared.legacy_name(), "r");
        assert!(IntentShared.is_intent() && IntentExclusive.is_intent());
        assert!(!Shared.is_intent() && !None.is_intent());
        assert_eq!(LockMode::from_index(3), Some(Shared));
        assert_eq!(LockMode::from_index(5), Option::None);
    }
}
