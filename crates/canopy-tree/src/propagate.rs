//! Upward count propagation.
//!
//! After a member attaches under `parent` on `side`, every ancestor from
//! `parent` to the root gains one descendant on the side the path arrives
//! from. The side for the next level up is read from the stored `side` of
//! the member just updated; it is not the side passed in.

use crate::directory::MemberDirectory;
use crate::error::{DirectoryError, Error, Result, WriteStage};
use crate::member::{Member, MemberCode, Side};

/// Members updated by one propagation, nearest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    pub updated: Vec<(MemberCode, Side)>,
}

impl Propagation {
    /// Number of ancestors touched (`depth(parent) + 1` on success).
    pub fn len(&self) -> usize {
        self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}

/// Increment `parent`'s count on `side`, then each ancestor's, up to the root.
///
/// Each increment is persisted on its own. A failure mid-walk leaves the
/// ancestors below it updated and the rest untouched; the error carries the
/// member where the walk stopped and how many were already done.
pub fn propagate<D>(directory: &D, parent: &Member, side: Side) -> Result<Propagation>
where
    D: MemberDirectory + ?Sized,
{
    let origin = parent.code.clone();
    let failure = |at: &MemberCode, updated: usize, source: DirectoryError| Error::PersistenceFailure {
        stage: WriteStage::Propagate {
            at: at.clone(),
            updated,
        },
        parent_code: origin.clone(),
        side,
        source,
    };

    let limit = directory
        .member_count()
        .map_err(|e| failure(&parent.code, 0, e))?;

    let mut updated = Vec::new();
    let mut current = parent.clone();
    let mut current_side = side;

    loop {
        let member = directory
            .increment_count(&current.id, current_side)
            .map_err(|e| failure(&current.code, updated.len(), e))?;
        updated.push((member.code.clone(), current_side));

        let Some(next_side) = member.side.slot() else {
            return Ok(Propagation { updated });
        };

        if updated.len() > limit {
            return Err(inconsistency(
                &member,
                format!("walked {} ancestors in a tree of {}", updated.len(), limit),
            ));
        }

        let (ancestor, arrival) = locate_parent(directory, &member, next_side)
            .map_err(|e| failure(&member.code, updated.len(), e))?
            .ok_or_else(|| {
                inconsistency(
                    &member,
                    format!(
                        "non-root member has no parent (parent_code {:?})",
                        member.parent_code.as_ref().map(MemberCode::as_str)
                    ),
                )
            })?;

        current = ancestor;
        current_side = arrival;
    }
}

/// Find the member `member` hangs under and the slot it occupies there.
///
/// Uses the stored `parent_code`; the reverse scan runs only when that
/// lookup fails or the parent does not point back.
fn locate_parent<D>(
    directory: &D,
    member: &Member,
    stored_side: Side,
) -> std::result::Result<Option<(Member, Side)>, DirectoryError>
where
    D: MemberDirectory + ?Sized,
{
    if let Some(code) = &member.parent_code {
        if let Some(parent) = directory.find_by_code(code)? {
            if parent.child(stored_side) == Some(&member.id) {
                return Ok(Some((parent, stored_side)));
            }
            tracing::warn!(
                "{} records parent {} ({}) but that slot does not point back; scanning",
                member.code,
                code,
                stored_side
            );
        }
    }

    let Some(parent) = directory.find_parent_of(&member.id)? else {
        return Ok(None);
    };
    let Some(arrival) = parent.slot_of(&member.id) else {
        return Ok(None);
    };
    if arrival != stored_side {
        tracing::warn!(
            "{} stored side {} but occupies {} under {}",
            member.code,
            stored_side,
            arrival,
            parent.code
        );
    }
    Ok(Some((parent, arrival)))
}

fn inconsistency(member: &Member, detail: String) -> Error {
    tracing::error!("Count inconsistency at {}: {}", member.code, detail);
    Error::CountInconsistency {
        at: member.code.clone(),
        detail,
        partial: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{NewMember, Position};
    use crate::memory::MemoryDirectory;

    fn fields(seq: u64) -> NewMember {
        NewMember::new(
            format!("Member {}", seq),
            format!("m{}@example.com", seq),
            format!("9{}", seq),
        )
    }

    fn attach(dir: &MemoryDirectory, parent_code: &str, seq: u64, side: Side) -> Member {
        let parent = dir.find_by_code(&MemberCode::from(parent_code)).unwrap().unwrap();
        let member = Member::placed(
            MemberCode::from_sequence(seq),
            fields(seq),
            parent.code.clone(),
            &parent,
            side,
        );
        assert!(dir.attach_child(&parent.id, side, &member.id).unwrap());
        dir.create(member).unwrap()
    }

    fn counts(dir: &MemoryDirectory, code: &str) -> (u64, u64) {
        let m = dir.find_by_code(&MemberCode::from(code)).unwrap().unwrap();
        (m.left_count, m.right_count)
    }

    /// M1000 -L-> M1001 -R-> M1002, counts not yet propagated for M1002.
    fn zigzag() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.create(Member::root(MemberCode::root(), fields(1000))).unwrap();
        attach(&dir, "M1000", 1001, Side::Left);
        dir.increment_count(&dir.find_root().unwrap().unwrap().id, Side::Left)
            .unwrap();
        attach(&dir, "M1001", 1002, Side::Right);
        dir
    }

    #[test]
    fn walks_to_root_using_stored_sides() {
        let dir = zigzag();
        let parent = dir.find_by_code(&MemberCode::from("M1001")).unwrap().unwrap();

        let result = propagate(&dir, &parent, Side::Right).unwrap();

        assert_eq!(
            result.updated,
            vec![
                (MemberCode::from("M1001"), Side::Right),
                (MemberCode::from("M1000"), Side::Left),
            ]
        );
        assert_eq!(counts(&dir, "M1001"), (0, 1));
        assert_eq!(counts(&dir, "M1000"), (2, 0));
        assert_eq!(counts(&dir, "M1002"), (0, 0));
    }

    #[test]
    fn root_parent_touches_only_root() {
        let dir = MemoryDirectory::new();
        let root = dir.create(Member::root(MemberCode::root(), fields(1000))).unwrap();
        attach(&dir, "M1000", 1001, Side::Right);

        let result = propagate(&dir, &root, Side::Right).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(counts(&dir, "M1000"), (0, 1));
        assert_eq!(counts(&dir, "M1001"), (0, 0));
    }

    #[test]
    fn falls_back_to_scan_when_parent_code_is_stale() {
        let dir = zigzag();
        let mut m1001 = dir.find_by_code(&MemberCode::from("M1001")).unwrap().unwrap();
        m1001.parent_code = Some(MemberCode::from("M9999"));
        dir.save(&m1001).unwrap();

        propagate(&dir, &m1001, Side::Right).unwrap();
        assert_eq!(counts(&dir, "M1000"), (2, 0));
    }

    #[test]
    fn scan_corrects_a_wrong_stored_side() {
        let dir = zigzag();
        let mut m1001 = dir.find_by_code(&MemberCode::from("M1001")).unwrap().unwrap();
        m1001.side = Position::Right;
        dir.save(&m1001).unwrap();

        let result = propagate(&dir, &m1001, Side::Right).unwrap();
        // The root really holds M1001 on the left
        assert_eq!(result.updated[1], (MemberCode::root(), Side::Left));
        assert_eq!(counts(&dir, "M1000"), (2, 0));
    }

    #[test]
    fn orphan_ancestor_is_partial_inconsistency() {
        let dir = MemoryDirectory::new();
        dir.create(Member::root(MemberCode::root(), fields(1000))).unwrap();
        let root = dir.find_root().unwrap().unwrap();
        // M1001 claims to hang under the root, but the root never pointed at it
        let orphan = dir
            .create(Member::placed(
                MemberCode::from_sequence(1001),
                fields(1001),
                root.code.clone(),
                &root,
                Side::Left,
            ))
            .unwrap();

        let err = propagate(&dir, &orphan, Side::Left).unwrap_err();
        assert!(matches!(err, Error::CountInconsistency { partial: true, .. }));
        // The write that exposed it stays in place
        assert_eq!(counts(&dir, "M1001"), (1, 0));
        assert_eq!(counts(&dir, "M1000"), (0, 0));
    }

    #[test]
    fn missing_parent_is_persistence_failure() {
        let dir = MemoryDirectory::new();
        let ghost = Member::root(MemberCode::root(), fields(1000));

        let err = propagate(&dir, &ghost, Side::Left).unwrap_err();
        match err {
            Error::PersistenceFailure { stage, parent_code, side, .. } => {
                assert_eq!(
                    stage,
                    WriteStage::Propagate {
                        at: MemberCode::root(),
                        updated: 0
                    }
                );
                assert_eq!(parent_code, MemberCode::root());
                assert_eq!(side, Side::Left);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
