//! Dense integer ids handed out by the [`crate::Pool`].

use crate::arena::ArenaId;

/// The id of an interned free-form string.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

/// The id of an interned package name.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(u32);

/// The id of an interned match spec (a *dependency* in pool terms).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecId(u32);

/// The id of a repo registered with the pool.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RepoId(u32);

/// The id of a solvable. Id 0 is reserved for the root solvable that carries
/// the user's request.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SolvableId(u32);

impl SolvableId {
    pub(crate) fn root() -> Self {
        Self(0)
    }

    pub(crate) fn is_root(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn null() -> Self {
        Self(u32::MAX)
    }

    pub(crate) fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

/// The id of a rule inside the solver.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RuleId(u32);

impl RuleId {
    pub(crate) fn install_root() -> Self {
        Self(0)
    }

    pub(crate) fn null() -> Self {
        Self(u32::MAX)
    }

    pub(crate) fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

macro_rules! arena_id {
    ($name:ident) => {
        impl ArenaId for $name {
            fn from_usize(x: usize) -> Self {
                debug_assert!(x < u32::MAX as usize);
                Self(x as u32)
            }

            fn to_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            #[allow(dead_code)]
            pub(crate) fn new(index: usize) -> Self {
                <Self as ArenaId>::from_usize(index)
            }

            #[allow(dead_code)]
            pub(crate) fn index(self) -> usize {
                <Self as ArenaId>::to_usize(self)
            }
        }
    };
}

arena_id!(StringId);
arena_id!(NameId);
arena_id!(SpecId);
arena_id!(RepoId);
arena_id!(SolvableId);
arena_id!(RuleId);
