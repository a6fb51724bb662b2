//! Persistent member directory using RocksDB.
//!
//! Key layout:
//!
//! | key                  | value                     |
//! |----------------------|---------------------------|
//! | `member:{id}`        | member JSON               |
//! | `code:{code}`        | member id                 |
//! | `email:{email}`      | member id                 |
//! | `mobile:{mobile}`    | member id                 |
//! | `meta:root`          | root member id            |
//! | `meta:member_count`  | u64, big endian           |
//! | `seq:member_code`    | last issued sequence, u64 |

use crate::error::{Error, Result};
use canopy_tree::{
    DirectoryError, DirectoryResult, IdentityField, Member, MemberCode, MemberDirectory, MemberId,
    Position, SequenceGenerator, Side, ROOT_SEQUENCE,
};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const MEMBER_PREFIX: &[u8] = b"member:";
const ROOT_KEY: &[u8] = b"meta:root";
const MEMBER_COUNT_KEY: &[u8] = b"meta:member_count";
const SEQUENCE_KEY: &[u8] = b"seq:member_code";

/// Storage backend for the member tree.
///
/// Read-modify-write operations hold `write_lock`, so conditional claims,
/// increments and sequence draws are atomic within the process.
pub struct Storage {
    db: DB,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Storage("write lock poisoned".into()))
    }

    // --- Members ---

    fn member_key(id: &MemberId) -> String {
        format!("member:{}", id.as_str())
    }

    /// Get a member by ID.
    pub fn get_member(&self, id: &MemberId) -> Result<Option<Member>> {
        match self.db.get(Self::member_key(id).as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn put_member(&self, member: &Member) -> Result<()> {
        let value = serde_json::to_vec(member)?;
        self.db.put(Self::member_key(&member.id).as_bytes(), value)?;
        Ok(())
    }

    /// List all members.
    pub fn list_members(&self) -> Result<Vec<Member>> {
        let mut members = Vec::new();

        let iter = self.db.prefix_iterator(MEMBER_PREFIX);
        for item in iter {
            let (key, value) = item?;
            if key.starts_with(MEMBER_PREFIX) {
                let member: Member = serde_json::from_slice(&value)?;
                members.push(member);
            } else {
                break;
            }
        }

        members.sort_by_key(|m| m.code.sequence_number());
        Ok(members)
    }

    // --- Indexes ---

    fn index_key(field: IdentityField, value: &str) -> String {
        format!("{}:{}", field, value)
    }

    fn lookup_index(&self, field: IdentityField, value: &str) -> Result<Option<MemberId>> {
        self.read_id(Self::index_key(field, value).as_bytes())
    }

    fn read_id(&self, key: &[u8]) -> Result<Option<MemberId>> {
        match self.db.get(key)? {
            Some(data) => String::from_utf8(data)
                .map(|id| Some(MemberId(id)))
                .map_err(|e| Error::Corrupt {
                    key: String::from_utf8_lossy(key).into_owned(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn member_by_index(&self, field: IdentityField, value: &str) -> Result<Option<Member>> {
        match self.lookup_index(field, value)? {
            Some(id) => self.get_member(&id),
            None => Ok(None),
        }
    }

    // --- Counters ---

    fn read_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.db.get(key)? {
            Some(data) => {
                let bytes: [u8; 8] = data.as_slice().try_into().map_err(|_| Error::Corrupt {
                    key: String::from_utf8_lossy(key).into_owned(),
                    reason: format!("expected 8 bytes, found {}", data.len()),
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Number of stored members.
    pub fn member_count(&self) -> Result<usize> {
        Ok(self.read_u64(MEMBER_COUNT_KEY)?.unwrap_or(0) as usize)
    }

    /// Last issued sequence number (the root's until the first registration).
    pub fn last_sequence(&self) -> Result<u64> {
        Ok(self.read_u64(SEQUENCE_KEY)?.unwrap_or(ROOT_SEQUENCE))
    }

    // --- Writes ---

    fn insert(&self, member: Member) -> DirectoryResult<Member> {
        let _guard = self.lock()?;

        let unique = [
            (IdentityField::Code, member.code.as_str()),
            (IdentityField::Email, member.email.as_str()),
            (IdentityField::Mobile, member.mobile.as_str()),
        ];
        for (field, value) in unique {
            if self.lookup_index(field, value)?.is_some() {
                return Err(DirectoryError::Duplicate {
                    field,
                    value: value.to_string(),
                });
            }
        }

        let mut batch = WriteBatch::default();
        if member.side == Position::Root {
            if let Some(root_id) = self.read_id(ROOT_KEY)? {
                let code = self
                    .get_member(&root_id)?
                    .map(|root| root.code)
                    .unwrap_or_else(MemberCode::root);
                return Err(DirectoryError::RootExists(code));
            }
            batch.put(ROOT_KEY, member.id.as_str().as_bytes());
        }

        let count = self.member_count()? as u64 + 1;
        batch.put(
            Self::member_key(&member.id).as_bytes(),
            serde_json::to_vec(&member).map_err(Error::from)?,
        );
        for (field, value) in unique {
            batch.put(Self::index_key(field, value).as_bytes(), member.id.as_str().as_bytes());
        }
        batch.put(MEMBER_COUNT_KEY, count.to_be_bytes());
        self.db.write(batch).map_err(Error::from)?;

        tracing::debug!("Stored member {} ({})", member.code, member.id);
        Ok(member)
    }

    fn delete_unattached(&self, id: &MemberId) -> DirectoryResult<Member> {
        let _guard = self.lock()?;
        let member = self
            .get_member(id)?
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;

        let pointed_at = match &member.parent_code {
            Some(code) => self
                .member_by_index(IdentityField::Code, code.as_str())?
                .map_or(false, |parent| parent.slot_of(id).is_some()),
            None => false,
        };
        if member.is_root() || member.has_children() || pointed_at {
            return Err(DirectoryError::StillAttached(member.code));
        }

        let mut batch = WriteBatch::default();
        batch.delete(Self::member_key(id).as_bytes());
        for (field, value) in [
            (IdentityField::Code, member.code.as_str()),
            (IdentityField::Email, member.email.as_str()),
            (IdentityField::Mobile, member.mobile.as_str()),
        ] {
            batch.delete(Self::index_key(field, value).as_bytes());
        }
        let count = (self.member_count()? as u64).saturating_sub(1);
        batch.put(MEMBER_COUNT_KEY, count.to_be_bytes());
        self.db.write(batch).map_err(Error::from)?;

        tracing::debug!("Removed unattached member {} ({})", member.code, member.id);
        Ok(member)
    }

    /// Load, mutate and store a member under the write lock.
    fn update<T>(&self, id: &MemberId, f: impl FnOnce(&mut Member) -> T) -> DirectoryResult<(Member, T)> {
        let _guard = self.lock()?;
        let mut member = self
            .get_member(id)?
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))?;
        let out = f(&mut member);
        self.put_member(&member)?;
        Ok((member, out))
    }
}

impl MemberDirectory for Storage {
    fn find_by_code(&self, code: &MemberCode) -> DirectoryResult<Option<Member>> {
        Ok(self.member_by_index(IdentityField::Code, code.as_str())?)
    }

    fn find_by_id(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        Ok(self.get_member(id)?)
    }

    fn find_by_identity(&self, email: &str, mobile: &str) -> DirectoryResult<Option<Member>> {
        if let Some(member) = self.member_by_index(IdentityField::Email, email)? {
            return Ok(Some(member));
        }
        Ok(self.member_by_index(IdentityField::Mobile, mobile)?)
    }

    fn find_parent_of(&self, id: &MemberId) -> DirectoryResult<Option<Member>> {
        Ok(self
            .list_members()?
            .into_iter()
            .find(|m| m.slot_of(id).is_some()))
    }

    fn find_root(&self) -> DirectoryResult<Option<Member>> {
        match self.read_id(ROOT_KEY)? {
            Some(id) => Ok(self.get_member(&id)?),
            None => Ok(None),
        }
    }

    fn create(&self, member: Member) -> DirectoryResult<Member> {
        self.insert(member)
    }

    fn remove(&self, id: &MemberId) -> DirectoryResult<Member> {
        self.delete_unattached(id)
    }

    fn save(&self, member: &Member) -> DirectoryResult<()> {
        let replacement = member.clone();
        self.update(&member.id, move |stored| *stored = replacement)?;
        Ok(())
    }

    fn attach_child(&self, parent: &MemberId, side: Side, child: &MemberId) -> DirectoryResult<bool> {
        let (_, claimed) = self.update(parent, |stored| stored.set_child(side, child.clone()))?;
        Ok(claimed)
    }

    fn increment_count(&self, id: &MemberId, side: Side) -> DirectoryResult<Member> {
        let (member, ()) = self.update(id, |stored| stored.increment(side))?;
        Ok(member)
    }

    fn list_members(&self) -> DirectoryResult<Vec<Member>> {
        Ok(Storage::list_members(self)?)
    }

    fn member_count(&self) -> DirectoryResult<usize> {
        Ok(Storage::member_count(self)?)
    }
}

impl SequenceGenerator for Storage {
    fn next_code(&self) -> DirectoryResult<MemberCode> {
        let _guard = self.lock()?;
        let next = self.last_sequence()? + 1;
        self.db
            .put(SEQUENCE_KEY, next.to_be_bytes())
            .map_err(Error::from)?;
        Ok(MemberCode::from_sequence(next))
    }

    fn seed(&self, last_issued: u64) -> DirectoryResult<()> {
        let _guard = self.lock()?;
        if self.read_u64(SEQUENCE_KEY)?.map_or(true, |current| current < last_issued) {
            self.db
                .put(SEQUENCE_KEY, last_issued.to_be_bytes())
                .map_err(Error::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_tree::{NewMember, Registrar};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn root() -> Member {
        Member::root(
            MemberCode::root(),
            NewMember::new("Company Root", "root@company.com", "0000000000"),
        )
    }

    fn child_of(parent: &Member, seq: u64, side: Side) -> Member {
        Member::placed(
            MemberCode::from_sequence(seq),
            NewMember::new(
                format!("Member {}", seq),
                format!("m{}@example.com", seq),
                format!("9{}", seq),
            ),
            parent.code.clone(),
            parent,
            side,
        )
    }

    #[test]
    fn storage_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let root = storage.create(root()).unwrap();
        assert_eq!(storage.find_by_id(&root.id).unwrap(), Some(root.clone()));
        assert_eq!(storage.find_by_code(&MemberCode::root()).unwrap(), Some(root.clone()));
        assert_eq!(storage.find_root().unwrap(), Some(root.clone()));
        assert_eq!(
            storage.find_by_identity("root@company.com", "x").unwrap(),
            Some(root.clone())
        );
        assert_eq!(
            storage.find_by_identity("x@example.com", "0000000000").unwrap(),
            Some(root)
        );
        assert_eq!(MemberDirectory::member_count(&storage).unwrap(), 1);
    }

    #[test]
    fn rejects_duplicates_and_second_root() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let root = storage.create(root()).unwrap();

        let mut dup = child_of(&root, 1001, Side::Left);
        dup.email = root.email.clone();
        assert!(matches!(
            storage.create(dup),
            Err(DirectoryError::Duplicate {
                field: IdentityField::Email,
                ..
            })
        ));

        let second = Member::root(
            MemberCode::from_sequence(5000),
            NewMember::new("Other", "other@company.com", "1"),
        );
        assert!(matches!(
            storage.create(second),
            Err(DirectoryError::RootExists(code)) if code == MemberCode::root()
        ));
        assert_eq!(MemberDirectory::member_count(&storage).unwrap(), 1);
    }

    #[test]
    fn conditional_attach_and_increment() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let root = storage.create(root()).unwrap();
        let a = child_of(&root, 1001, Side::Right);
        let b = child_of(&root, 1002, Side::Right);

        assert!(storage.attach_child(&root.id, Side::Right, &a.id).unwrap());
        assert!(!storage.attach_child(&root.id, Side::Right, &b.id).unwrap());
        storage.create(a.clone()).unwrap();

        let updated = storage.increment_count(&root.id, Side::Right).unwrap();
        assert_eq!(updated.right_count, 1);
        assert_eq!(updated.right_child, Some(a.id.clone()));
        assert_eq!(
            storage.find_parent_of(&a.id).unwrap().map(|m| m.code),
            Some(MemberCode::root())
        );
        assert!(matches!(
            storage.increment_count(&b.id, Side::Left),
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn remove_drops_member_and_indexes() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let root = storage.create(root()).unwrap();
        let reserved = storage.create(child_of(&root, 1001, Side::Left)).unwrap();

        assert!(matches!(
            storage.remove(&root.id),
            Err(DirectoryError::StillAttached(_))
        ));
        storage.remove(&reserved.id).unwrap();

        assert_eq!(storage.find_by_id(&reserved.id).unwrap(), None);
        assert_eq!(storage.find_by_code(&reserved.code).unwrap(), None);
        assert_eq!(
            storage.find_by_identity(&reserved.email, &reserved.mobile).unwrap(),
            None
        );
        assert_eq!(MemberDirectory::member_count(&storage).unwrap(), 1);
        assert!(matches!(
            storage.remove(&reserved.id),
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn sequence_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.seed(ROOT_SEQUENCE).unwrap();
            assert_eq!(storage.next_code().unwrap().as_str(), "M1001");
            assert_eq!(storage.next_code().unwrap().as_str(), "M1002");
        }
        let storage = Storage::open(dir.path()).unwrap();
        // Seeding lower never rewinds
        storage.seed(ROOT_SEQUENCE).unwrap();
        assert_eq!(storage.next_code().unwrap().as_str(), "M1003");
    }

    #[test]
    fn list_members_by_sequence() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let root = storage.create(root()).unwrap();
        for seq in [1010, 1002, 1001] {
            storage.create(child_of(&root, seq, Side::Left)).unwrap();
        }

        let codes: Vec<_> = Storage::list_members(&storage)
            .unwrap()
            .into_iter()
            .map(|m| m.code.to_string())
            .collect();
        assert_eq!(codes, ["M1000", "M1001", "M1002", "M1010"]);
    }

    #[tokio::test]
    async fn registrar_over_storage() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let registrar = Registrar::new(Arc::clone(&storage), Arc::clone(&storage));

        registrar
            .bootstrap_root(NewMember::new("Company Root", "root@company.com", "0000000000"))
            .await
            .unwrap();
        let a = registrar
            .register_member(&MemberCode::root(), Side::Left, NewMember::new("A", "a@example.com", "1"))
            .await
            .unwrap();
        let b = registrar
            .register_member(&MemberCode::root(), Side::Left, NewMember::new("B", "b@example.com", "2"))
            .await
            .unwrap();

        assert_eq!(a.code.as_str(), "M1001");
        assert_eq!(b.parent_code, a.code);
        assert_eq!(b.side, Side::Left);

        let root = storage.find_root().unwrap().unwrap();
        assert_eq!(root.left_count, 2);
        assert_eq!(storage.find_by_code(&a.code).unwrap().unwrap().left_count, 1);
        assert!(registrar.audit().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn tree_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = Arc::new(Storage::open(dir.path()).unwrap());
            let registrar = Registrar::new(Arc::clone(&storage), Arc::clone(&storage));
            registrar
                .bootstrap_root(NewMember::new("Root", "root@company.com", "0"))
                .await
                .unwrap();
            registrar
                .register_member(&MemberCode::root(), Side::Right, NewMember::new("A", "a@example.com", "1"))
                .await
                .unwrap();
        }

        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let registrar = Registrar::new(Arc::clone(&storage), Arc::clone(&storage));
        let c = registrar
            .register_member(&MemberCode::root(), Side::Right, NewMember::new("C", "c@example.com", "3"))
            .await
            .unwrap();
        assert_eq!(c.code.as_str(), "M1002");
        assert_eq!(c.parent_code.as_str(), "M1001");
        assert_eq!(storage.find_root().unwrap().unwrap().right_count, 2);
    }
}
