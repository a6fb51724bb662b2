//! Canopy Tree
//!
//! Binary referral tree with same-side spill placement and exact per-side
//! downline counts.
//!
//! # Placement
//!
//! A new member names a sponsor and a preferred side. If the sponsor's slot on
//! that side is free the member takes it. Otherwise the search descends into
//! the occupant and tries the same side again, until a free slot turns up
//! ([`placement::resolve`]).
//!
//! # Counts
//!
//! Every member stores `left_count` and `right_count`: the size of the subtree
//! under each child. Attaching a member increments one count on every ancestor
//! from the new parent up to the root ([`propagate::propagate`]). The side for
//! each level is read from the member's stored `side`, so the walk is one read
//! and one write per level.
//!
//! # Collaborators
//!
//! The tree lives in a [`MemberDirectory`]; codes come from a
//! [`SequenceGenerator`]. [`MemoryDirectory`] and [`AtomicSequence`] are the
//! in-process implementations; `canopy-store` provides a RocksDB one.
//!
//! # Example
//!
//! ```no_run
//! use canopy_tree::{AtomicSequence, MemberCode, MemoryDirectory, NewMember, Registrar, Side};
//! use std::sync::Arc;
//!
//! # async fn demo() -> canopy_tree::Result<()> {
//! let registrar = Registrar::new(Arc::new(MemoryDirectory::new()), Arc::new(AtomicSequence::default()));
//! registrar
//!     .bootstrap_root(NewMember::new("Company Root", "root@company.com", "0000000000"))
//!     .await?;
//!
//! let reg = registrar
//!     .register_member(&MemberCode::root(), Side::Left, NewMember::new("Ada", "ada@example.com", "5550001"))
//!     .await?;
//! assert_eq!(reg.code.as_str(), "M1001");
//! # Ok(())
//! # }
//! ```

pub mod audit;
mod directory;
mod error;
mod member;
mod memory;
pub mod placement;
pub mod propagate;
mod registrar;

pub use audit::{AuditReport, CountMismatch, LinkFault, RepairSummary};
pub use directory::{MemberDirectory, SequenceGenerator};
pub use error::{DirectoryError, DirectoryResult, Error, IdentityField, Outcome, Result, WriteStage};
pub use member::{Member, MemberCode, MemberId, NewMember, Position, Side, CODE_PREFIX, ROOT_SEQUENCE};
pub use memory::{AtomicSequence, MemoryDirectory};
pub use placement::Placement;
pub use propagate::Propagation;
pub use registrar::{
    ChildSummary, DownlineSummary, Registrar, RegistrarConfig, Registration,
    DEFAULT_MAX_PLACEMENT_ATTEMPTS,
};
