//! In-process directory and sequence.

use crate::directory::{MemberDirectory, SequenceGenerator};
use crate::error::{DirectoryError, DirectoryResult, IdentityField};
use crate::member::{Member, MemberCode, MemberId, Position, Side, ROOT_SEQUENCE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Indexed member table held in memory.
#[derive(Debug, Default)]
struct Table {
    members: HashMap<MemberId, Member>,
    by_code: HashMap<MemberCode, MemberId>,
    by_email: HashMap<String, MemberId>,
    by_mobile: HashMap<String, MemberId>,
    root: Option<MemberId>,
}

/// A [`MemberDirectory`] backed by hash maps.
///
/// Each call takes the table lock once, so conditional writes are atomic.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    table: RwLock<Table>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DirectoryResult<RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".into()))
    }

    fn write(&self) -> DirectoryResult<RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".into()))
    }
}

impl MemberDirectory for MemoryDirectory {
    fn find_by_code(&self, code: &MemberCode) -> DirectoryResult<Option<Member>> {
        let table = self.read()?;
        Ok(table
            .by_code
            .get(code)
            .and_then(|id| table.members.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        Ok(self.read()?.members.get(id).cloned())
    }

    fn find_by_identity(&self, email: &str, mobile: &str) -> DirectoryResult<Option<Member>> {
        let table = self.read()?;
        Ok(table
            .by_email
            .get(email)
            .or_else(|| table.by_mobile.get(mobile))
            .and_then(|id| table.members.get(id))
            .cloned())
    }

    fn find_parent_of(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        Ok(self
            .read()?
            .members
            .values()
            .find(|m| m.slot_of(id).is_some())
            .cloned())
    }

    fn find_root(&self) -> DirectoryResult<Option<Member>> {
        let table = self.read()?;
        Ok(table.root.as_ref().and_then(|id| table.members.get(id)).cloned())
    }

    fn create(&self, member: Member) -> DirectoryResult<Member> {
        let mut table = self.write()?;

        if table.members.contains_key(&member.id) || table.by_code.contains_key(&member.code) {
            return Err(DirectoryError::Duplicate {
                field: IdentityField::Code,
                value: member.code.to_string(),
            });
        }
        if table.by_email.contains_key(&member.email) {
            return Err(DirectoryError::Duplicate {
                field: IdentityField::Email,
                value: member.email,
            });
        }
        if table.by_mobile.contains_key(&member.mobile) {
            return Err(DirectoryError::Duplicate {
                field: IdentityField::Mobile,
                value: member.mobile,
            });
        }
        if member.side == Position::Root {
            if let Some(existing) = table.root.as_ref().and_then(|id| table.members.get(id)) {
                return Err(DirectoryError::RootExists(existing.code.clone()));
            }
            table.root = Some(member.id.clone());
        }

        table.by_code.insert(member.code.clone(), member.id.clone());
        table.by_email.insert(member.email.clone(), member.id.clone());
        table.by_mobile.insert(member.mobile.clone(), member.id.clone());
        table.members.insert(member.id.clone(), member.clone());
        Ok(member)
    }

    fn remove(&self, id: &MemberId) -> DirectoryResult<Member> {
        let mut table = self.write()?;

        let member = table
            .members
            .get(id)
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;
        let pointed_at = member
            .parent_code
            .as_ref()
            .and_then(|code| table.by_code.get(code))
            .and_then(|parent_id| table.members.get(parent_id))
            .map_or(false, |parent| parent.slot_of(id).is_some());
        if member.is_root() || member.has_children() || pointed_at {
            return Err(DirectoryError::StillAttached(member.code.clone()));
        }

        let member = table
            .members
            .remove(id)
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;
        table.by_code.remove(&member.code);
        table.by_email.remove(&member.email);
        table.by_mobile.remove(&member.mobile);
        Ok(member)
    }

    fn save(&self, member: &Member) -> DirectoryResult<()> {
        let mut table = self.write()?;
        match table.members.get_mut(&member.id) {
            Some(stored) => {
                *stored = member.clone();
                Ok(())
            }
            None => Err(DirectoryError::NotFound(member.id.clone())),
        }
    }

    fn attach_child(&self, parent: &MemberId, side: Side, child: &MemberId) -> DirectoryResult<bool> {
        let mut table = self.write()?;
        let parent = table
            .members
            .get_mut(parent)
            .ok_or_else(|| DirectoryError::NotFound(parent.clone()))?;
        Ok(parent.set_child(side, child.clone()))
    }

    fn increment_count(&self, id: &MemberId, side: Side) -> DirectoryResult<Member> {
        let mut table = self.write()?;
        let member = table
            .members
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;
        member.increment(side);
        Ok(member.clone())
    }

    fn list_members(&self) -> DirectoryResult<Vec<Member>> {
        let mut members: Vec<Member> = self.read()?.members.values().cloned().collect();
        members.sort_by_key(|m| m.code.sequence_number());
        Ok(members)
    }

    fn member_count(&self) -> DirectoryResult<usize> {
        Ok(self.read()?.members.len())
    }
}

/// Atomic counter issuing `M<n>` codes.
#[derive(Debug)]
pub struct AtomicSequence {
    last: AtomicU64,
}

impl AtomicSequence {
    /// Sequence whose first code is `last_issued + 1`.
    pub fn starting_after(last_issued: u64) -> Self {
        Self {
            last: AtomicU64::new(last_issued),
        }
    }

    /// Last issued sequence number.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for AtomicSequence {
    fn default() -> Self {
        Self::starting_after(ROOT_SEQUENCE)
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next_code(&self) -> DirectoryResult<MemberCode> {
        let seq = self.last.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemberCode::from_sequence(seq))
    }

    fn seed(&self, last_issued: u64) -> DirectoryResult<()> {
        self.last.fetch_max(last_issued, Ordering::SeqCst);
        Ok(())
    }
}
