//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use crate::handle::ArenaId;

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// A [`LacConfig`](crate::LacConfig) failed validation.
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },
    /// A handle issued before the arena's most recent reset.
    StaleHandle {
        /// The epoch encoded in the handle.
        handle_epoch: u64,
        /// The arena's current epoch.
        current_epoch: u64,
    },
    /// A handle issued by a different arena.
    ForeignHandle {
        /// The arena that issued the handle.
        handle_arena: ArenaId,
        /// The arena it was presented to.
        arena: ArenaId,
    },
    /// An operation that requires a single live handle was attempted while
    /// the arena was shared.
    Shared {
        /// Number of live handles.
        handles: i32,
    },
    /// The safety checker found a reference it cannot account for.
    Violation(CheckError),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
            Self::StaleHandle {
                handle_epoch,
                current_epoch,
            } => {
                write!(
                    f,
                    "stale handle: epoch {handle_epoch}, arena is at epoch {current_epoch}"
                )
            }
            Self::ForeignHandle {
                handle_arena,
                arena,
            } => {
                write!(f, "handle from arena {handle_arena} used with arena {arena}")
            }
            Self::Shared { handles } => {
                write!(f, "arena is shared by {handles} handles")
            }
            Self::Violation(err) => write!(f, "safety check failed: {err}"),
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Violation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CheckError> for ArenaError {
    fn from(err: CheckError) -> Self {
        Self::Violation(err)
    }
}

/// What kind of reference the checker could not account for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A pointer outside the arena and outside the pointer registry.
    ExternalPointer,
    /// A growable array backed by memory outside the arena and the array registry.
    ExternalArray,
    /// String bytes outside the arena, the string registry and static data.
    ExternalString,
    /// A map that was not created or attached through the arena.
    ExternalMap,
    /// A function value that was not attached through the arena.
    ExternalFunction,
    /// A handle of this arena issued in an earlier epoch.
    StaleHandle,
    /// A map that stayed write-locked for the whole check, so its values
    /// could not be inspected.
    LockedMap,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExternalPointer => "pointer",
            Self::ExternalArray => "array",
            Self::ExternalString => "string",
            Self::ExternalMap => "map",
            Self::ExternalFunction => "function",
            Self::StaleHandle => "stale handle",
            Self::LockedMap => "locked map",
        })
    }
}

/// A single safety-check failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckError {
    /// Field path from the root, e.g. `D.v[2]`.
    pub path: String,
    /// What was found.
    pub kind: ViolationKind,
    /// The offending address.
    pub addr: usize,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::StaleHandle => {
                write!(f, "{}: stale handle to {:#x}", self.path, self.addr)
            }
            ViolationKind::LockedMap => write!(
                f,
                "{}: map at {:#x} is write-locked; its values cannot be checked",
                self.path, self.addr
            ),
            kind => write!(
                f,
                "{}: unexpected external {kind} at {:#x}",
                self.path, self.addr
            ),
        }
    }
}

impl Error for CheckError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_error_names_path_and_kind() {
        let err = CheckError {
            path: "D.v[2]".into(),
            kind: ViolationKind::ExternalPointer,
            addr: 0x1000,
        };
        assert_eq!(err.to_string(), "D.v[2]: unexpected external pointer at 0x1000");
    }

    #[test]
    fn locked_map_display() {
        let err = CheckError {
            path: "L.table".into(),
            kind: ViolationKind::LockedMap,
            addr: 0x40,
        };
        assert_eq!(
            err.to_string(),
            "L.table: map at 0x40 is write-locked; its values cannot be checked"
        );
    }

    #[test]
    fn violation_wraps_check_error() {
        let err: ArenaError = CheckError {
            path: "S.name".into(),
            kind: ViolationKind::ExternalString,
            addr: 0x20,
        }
        .into();
        assert!(err.to_string().contains("S.name: unexpected external string"));
        assert!(err.source().is_some());
    }

    #[test]
    fn stale_handle_display() {
        let err = ArenaError::StaleHandle {
            handle_epoch: 3,
            current_epoch: 4,
        };
        assert_eq!(err.to_string(), "stale handle: epoch 3, arena is at epoch 4");
    }
}
