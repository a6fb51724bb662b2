//! Collaborator contracts: the member directory and the code sequence.

use crate::error::DirectoryResult;
use crate::member::{Member, MemberCode, MemberId, Side};
use std::sync::Arc;

/// Persistent store of members.
///
/// Reads return `Ok(None)` for absent members. Writes that target a missing
/// member return [`DirectoryError::NotFound`](crate::DirectoryError::NotFound).
pub trait MemberDirectory: Send + Sync {
    fn find_by_code(&self, code: &MemberCode) -> DirectoryResult<Option<Member>>;

    fn find_by_id(&self, id: &MemberId) -> DirectoryResult<Option<Member>>;

    /// Any member holding `email` or `mobile`.
    fn find_by_identity(&self, email: &str, mobile: &str) -> DirectoryResult<Option<Member>>;

    /// Reverse lookup: the member whose left or right child is `id`.
    ///
    /// Note: This is O(n) - fallback and consistency checks only.
    fn find_parent_of(&self, id: &MemberId) -> DirectoryResult<Option<Member>>;

    fn find_root(&self) -> DirectoryResult<Option<Member>>;

    /// Insert a new member. Rejects a duplicate code, email or mobile and a second root.
    fn create(&self, member: Member) -> DirectoryResult<Member>;

    /// Delete a member that no slot points at and that has no children.
    ///
    /// Drops a reservation whose slot claim never succeeded. Returns
    /// [`DirectoryError::StillAttached`](crate::DirectoryError::StillAttached)
    /// for the root or a member its parent points at.
    fn remove(&self, id: &MemberId) -> DirectoryResult<Member>;

    /// Persist an in-place mutation of an existing member.
    fn save(&self, member: &Member) -> DirectoryResult<()>;

    /// Set `parent.<side>_child = child` only if the slot is empty.
    ///
    /// Returns `false` when the slot is already taken.
    fn attach_child(&self, parent: &MemberId, side: Side, child: &MemberId) -> DirectoryResult<bool>;

    /// Atomically add one to the count on `side` and return the updated member.
    fn increment_count(&self, id: &MemberId, side: Side) -> DirectoryResult<Member>;

    fn list_members(&self) -> DirectoryResult<Vec<Member>>;

    fn member_count(&self) -> DirectoryResult<usize>;
}

/// Issues member codes.
pub trait SequenceGenerator: Send + Sync {
    /// Next code. Unique and strictly increasing across all callers.
    fn next_code(&self) -> DirectoryResult<MemberCode>;

    /// Ensure the next code is greater than `last_issued`. Never moves the sequence backwards.
    fn seed(&self, last_issued: u64) -> DirectoryResult<()>;
}

impl<T: MemberDirectory + ?Sized> MemberDirectory for Arc<T> {
    fn find_by_code(&self, code: &MemberCode) -> DirectoryResult<Option<Member>> {
        (**self).find_by_code(code)
    }

    fn find_by_id(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        (**self).find_by_id(id)
    }

    fn find_by_identity(&self, email: &str, mobile: &str) -> DirectoryResult<Option<Member>> {
        (**self).find_by_identity(email, mobile)
    }

    fn find_parent_of(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        (**self).find_parent_of(id)
    }

    fn find_root(&self) -> DirectoryResult<Option<Member>> {
        (**self).find_root()
    }

    fn create(&self, member: Member) -> DirectoryResult<Member> {
        (**self).create(member)
    }

    fn remove(&self, id: &MemberId) -> DirectoryResult<Member> {
        (**self).remove(id)
    }

    fn save(&self, member: &Member) -> DirectoryResult<()> {
        (**self).save(member)
    }

    fn attach_child(&self, parent: &MemberId, side: Side, child: &MemberId) -> DirectoryResult<bool> {
        (**self).attach_child(parent, side, child)
    }

    fn increment_count(&self, id: &MemberId, side: Side) -> DirectoryResult<Member> {
        (**self).increment_count(id, side)
    }

    fn list_members(&self) -> DirectoryResult<Vec<Member>> {
        (**self).list_members()
    }

    fn member_count(&self) -> DirectoryResult<usize> {
        (**self).member_count()
    }
}

impl<T: SequenceGenerator + ?Sized> SequenceGenerator for Arc<T> {
    fn next_code(&self) -> DirectoryResult<MemberCode> {
        (**self).next_code()
    }

    fn seed(&self, last_issued: u64) -> DirectoryResult<()> {
        (**self).seed(last_issued)
    }
}
