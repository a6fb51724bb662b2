//! Canopy Store
//!
//! RocksDB-backed [`MemberDirectory`](canopy_tree::MemberDirectory) and
//! [`SequenceGenerator`](canopy_tree::SequenceGenerator). One database holds
//! the members, their identity indexes and the code counter, so a node can
//! restart without losing its place in the sequence.

mod error;
mod storage;

pub use error::{Error, Result};
pub use storage::Storage;
