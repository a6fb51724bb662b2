//! Error types for the referral tree.

use crate::member::{MemberCode, MemberId, Side};
use serde::Serialize;
use thiserror::Error;

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for directory and sequence collaborators.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Failures reported by a [`MemberDirectory`](crate::MemberDirectory) or
/// [`SequenceGenerator`](crate::SequenceGenerator).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A unique field collided on create
    #[error("Duplicate {field}: {value}")]
    Duplicate { field: IdentityField, value: String },

    /// A second root was offered
    #[error("Root member already exists: {0}")]
    RootExists(MemberCode),

    /// A write targeted a member that does not exist
    #[error("Member not found: {0}")]
    NotFound(MemberId),

    /// Removal of a member that is part of the tree
    #[error("Member {0} is attached to the tree")]
    StillAttached(MemberCode),
}

/// Unique fields checked at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    Code,
    Email,
    Mobile,
}

impl std::fmt::Display for IdentityField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IdentityField::Code => "code",
            IdentityField::Email => "email",
            IdentityField::Mobile => "mobile",
        })
    }
}

/// The write a registration was performing when it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WriteStage {
    /// Conditional set of the parent's child pointer, or moving the
    /// reserved record to the slot about to be claimed
    ClaimSlot,
    /// Writing the new member record before any slot points at it
    CreateMember,
    /// Removing a reserved record that never got a slot
    ReleaseReservation,
    /// Upward count walk; `updated` ancestors were incremented before `at` failed
    Propagate { at: MemberCode, updated: usize },
}

impl std::fmt::Display for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStage::ClaimSlot => f.write_str("claim slot"),
            WriteStage::CreateMember => f.write_str("create member"),
            WriteStage::ReleaseReservation => f.write_str("release reservation"),
            WriteStage::Propagate { at, updated } => {
                write!(f, "propagate at {} after {} ancestor(s)", at, updated)
            }
        }
    }
}

/// Whether a failed call left anything behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing was written; safe to retry.
    NotApplied,
    /// Some writes may have landed; reconcile before retrying.
    MaybePartiallyApplied,
}

/// Errors from registration and tree queries.
#[derive(Debug, Error)]
pub enum Error {
    /// Sponsor code does not exist
    #[error("Invalid sponsor code: {0}")]
    InvalidSponsor(MemberCode),

    /// Email or mobile already registered
    #[error("{field} is already registered")]
    DuplicateIdentity { field: IdentityField },

    /// Slot contention did not settle within the retry budget
    #[error("Placement conflict under {sponsor} on the {side} side after {attempts} attempt(s)")]
    PlacementConflict {
        sponsor: MemberCode,
        side: Side,
        attempts: u32,
    },

    /// A write failed after the registration started mutating the tree
    #[error("Persistence failure during {stage} (parent {parent_code}, side {side}): {source}")]
    PersistenceFailure {
        stage: WriteStage,
        parent_code: MemberCode,
        side: Side,
        #[source]
        source: DirectoryError,
    },

    /// The stored tree shape disagrees with itself
    #[error("Count inconsistency at {at}: {detail}")]
    CountInconsistency {
        at: MemberCode,
        detail: String,
        /// Whether writes had already happened when this was detected
        partial: bool,
    },

    /// A root member already exists
    #[error("Root member already exists: {0}")]
    RootExists(MemberCode),

    /// No member with this id
    #[error("Unknown member: {0}")]
    UnknownMember(MemberId),

    /// Malformed registration fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A read failed before anything was written
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl Error {
    /// Classify the failure for callers deciding whether to retry.
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::PersistenceFailure { .. } => Outcome::MaybePartiallyApplied,
            Error::CountInconsistency { partial: true, .. } => Outcome::MaybePartiallyApplied,
            _ => Outcome::NotApplied,
        }
    }

    /// Terminal errors are reported as-is; nothing to reconcile.
    pub fn is_terminal(&self) -> bool {
        self.outcome() == Outcome::NotApplied
    }
}
