//! Recount the tree from child pointers and compare with stored counts.
//!
//! Registration writes are not transactional, so a crash between the slot
//! claim and the last ancestor increment leaves stale counts. [`repair`]
//! recomputes every subtree size from scratch and overwrites what differs.
//! Running it twice is the same as running it once.

use crate::directory::MemberDirectory;
use crate::error::DirectoryResult;
use crate::member::{Member, MemberCode, MemberId, Side};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A stored count that disagrees with the recount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub code: MemberCode,
    pub side: Side,
    pub stored: u64,
    pub actual: u64,
}

/// A child pointer that breaks the tree shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum LinkFault {
    /// Pointer to a member that does not exist
    DanglingChild {
        parent: MemberCode,
        side: Side,
        child: MemberId,
    },
    /// Child exists but records a different parent or side
    BrokenBackLink {
        parent: MemberCode,
        side: Side,
        child: MemberCode,
    },
    /// Non-root member that no slot points at
    Unattached { code: MemberCode },
}

/// Result of a full recount.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub members: usize,
    pub roots: Vec<MemberCode>,
    pub count_mismatches: Vec<CountMismatch>,
    pub link_faults: Vec<LinkFault>,
}

impl AuditReport {
    /// Exactly one root, every count exact, every link sound.
    pub fn is_consistent(&self) -> bool {
        (self.members == 0 || self.roots.len() == 1)
            && self.count_mismatches.is_empty()
            && self.link_faults.is_empty()
    }
}

/// What a repair pass rewrote.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairSummary {
    pub examined: usize,
    pub corrected: Vec<CountMismatch>,
}

/// Recount every member's per-side downline and check the links.
pub fn audit<D>(directory: &D) -> DirectoryResult<AuditReport>
where
    D: MemberDirectory + ?Sized,
{
    let members = directory.list_members()?;
    let index: HashMap<&MemberId, &Member> = members.iter().map(|m| (&m.id, m)).collect();
    let sizes = subtree_sizes(&index);

    let mut report = AuditReport {
        members: members.len(),
        ..Default::default()
    };
    let mut pointed_at: HashSet<&MemberId> = HashSet::new();

    for member in &members {
        if member.is_root() {
            report.roots.push(member.code.clone());
        }

        for side in Side::BOTH {
            let actual = match member.child(side) {
                None => 0,
                Some(child_id) => {
                    pointed_at.insert(child_id);
                    match index.get(child_id) {
                        None => {
                            report.link_faults.push(LinkFault::DanglingChild {
                                parent: member.code.clone(),
                                side,
                                child: child_id.clone(),
                            });
                            0
                        }
                        Some(child) => {
                            if child.parent_code.as_ref() != Some(&member.code)
                                || child.side.slot() != Some(side)
                            {
                                report.link_faults.push(LinkFault::BrokenBackLink {
                                    parent: member.code.clone(),
                                    side,
                                    child: child.code.clone(),
                                });
                            }
                            sizes.get(child_id).copied().unwrap_or(0)
                        }
                    }
                }
            };

            let stored = member.count(side);
            if stored != actual {
                report.count_mismatches.push(CountMismatch {
                    code: member.code.clone(),
                    side,
                    stored,
                    actual,
                });
            }
        }
    }

    for member in &members {
        if !member.is_root() && !pointed_at.contains(&member.id) {
            report.link_faults.push(LinkFault::Unattached {
                code: member.code.clone(),
            });
        }
    }

    if !report.is_consistent() {
        tracing::warn!(
            "Audit of {} members: {} root(s), {} count mismatch(es), {} link fault(s)",
            report.members,
            report.roots.len(),
            report.count_mismatches.len(),
            report.link_faults.len()
        );
    }
    Ok(report)
}

/// Overwrite every stored count with its recounted value.
///
/// Link faults are reported by [`audit`] but not touched here.
pub fn repair<D>(directory: &D) -> DirectoryResult<RepairSummary>
where
    D: MemberDirectory + ?Sized,
{
    let report = audit(directory)?;
    let mut summary = RepairSummary {
        examined: report.members,
        corrected: Vec::new(),
    };

    for mismatch in report.count_mismatches {
        let Some(mut member) = directory.find_by_code(&mismatch.code)? else {
            continue;
        };
        member.set_count(mismatch.side, mismatch.actual);
        directory.save(&member)?;
        tracing::info!(
            "Repaired {} {} count: {} -> {}",
            mismatch.code,
            mismatch.side,
            mismatch.stored,
            mismatch.actual
        );
        summary.corrected.push(mismatch);
    }

    Ok(summary)
}

/// Size of the subtree rooted at each member (itself included).
///
/// Iterative post-order; spill legs can be as deep as the tree is large.
/// Members on a pointer cycle are sized once and the cycle edge counts as 0.
fn subtree_sizes(index: &HashMap<&MemberId, &Member>) -> HashMap<MemberId, u64> {
    let mut sizes: HashMap<MemberId, u64> = HashMap::with_capacity(index.len());
    let mut open: HashSet<&MemberId> = HashSet::new();

    for &start in index.keys() {
        if sizes.contains_key(start) {
            continue;
        }
        let mut stack: Vec<(&MemberId, bool)> = vec![(start, false)];

        while let Some((id, expanded)) = stack.pop() {
            if sizes.contains_key(id) {
                continue;
            }
            let Some(&member) = index.get(id) else {
                continue;
            };
            let children = Side::BOTH.into_iter().filter_map(move |side| member.child(side));

            if expanded {
                let below: u64 = children.map(|c| sizes.get(c).copied().unwrap_or(0)).sum();
                sizes.insert(id.clone(), 1 + below);
                open.remove(id);
            } else if open.insert(id) {
                stack.push((id, true));
                for child in children {
                    if !sizes.contains_key(child) && !open.contains(child) {
                        stack.push((child, false));
                    }
                }
            }
        }
    }

    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::NewMember;
    use crate::memory::MemoryDirectory;

    fn fields(seq: u64) -> NewMember {
        NewMember::new(
            format!("Member {}", seq),
            format!("m{}@example.com", seq),
            format!("9{}", seq),
        )
    }

    /// Attach and propagate by hand.
    fn place(dir: &MemoryDirectory, parent_code: &str, seq: u64, side: Side) -> Member {
        let parent = dir.find_by_code(&MemberCode::from(parent_code)).unwrap().unwrap();
        let member = Member::placed(
            MemberCode::from_sequence(seq),
            fields(seq),
            parent.code.clone(),
            &parent,
            side,
        );
        assert!(dir.attach_child(&parent.id, side, &member.id).unwrap());
        let member = dir.create(member).unwrap();
        crate::propagate::propagate(dir, &parent, side).unwrap();
        member
    }

    fn tree() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.create(Member::root(MemberCode::root(), fields(1000))).unwrap();
        place(&dir, "M1000", 1001, Side::Left);
        place(&dir, "M1000", 1002, Side::Right);
        place(&dir, "M1001", 1003, Side::Left);
        place(&dir, "M1003", 1004, Side::Right);
        dir
    }

    #[test]
    fn empty_directory_is_consistent() {
        let report = audit(&MemoryDirectory::new()).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.members, 0);
    }

    #[test]
    fn well_formed_tree_passes() {
        let report = audit(&tree()).unwrap();
        assert!(report.is_consistent(), "{:?}", report);
        assert_eq!(report.members, 5);
        assert_eq!(report.roots, vec![MemberCode::root()]);
    }

    #[test]
    fn detects_and_repairs_stale_counts() {
        let dir = tree();
        let mut root = dir.find_root().unwrap().unwrap();
        root.set_count(Side::Left, 1);
        dir.save(&root).unwrap();

        let report = audit(&dir).unwrap();
        assert_eq!(
            report.count_mismatches,
            vec![CountMismatch {
                code: MemberCode::root(),
                side: Side::Left,
                stored: 1,
                actual: 3,
            }]
        );

        let summary = repair(&dir).unwrap();
        assert_eq!(summary.examined, 5);
        assert_eq!(summary.corrected.len(), 1);
        assert_eq!(dir.find_root().unwrap().unwrap().left_count, 3);

        // Idempotent
        assert!(repair(&dir).unwrap().corrected.is_empty());
        assert!(audit(&dir).unwrap().is_consistent());
    }

    #[test]
    fn detects_dangling_child() {
        let dir = tree();
        let m1002 = dir.find_by_code(&MemberCode::from("M1002")).unwrap().unwrap();
        let ghost = MemberId::for_code(&MemberCode::from_sequence(9000));
        dir.attach_child(&m1002.id, Side::Left, &ghost).unwrap();

        let report = audit(&dir).unwrap();
        assert!(matches!(
            report.link_faults.as_slice(),
            [LinkFault::DanglingChild { side: Side::Left, .. }]
        ));
    }

    #[test]
    fn detects_unattached_member() {
        let dir = tree();
        let root = dir.find_root().unwrap().unwrap();
        let mut stray = Member::placed(
            MemberCode::from_sequence(1010),
            fields(1010),
            root.code.clone(),
            &root,
            Side::Left,
        );
        stray.parent_code = Some(MemberCode::from("M1004"));
        dir.create(stray).unwrap();

        let report = audit(&dir).unwrap();
        assert_eq!(
            report.link_faults,
            vec![LinkFault::Unattached {
                code: MemberCode::from("M1010")
            }]
        );
    }

    #[test]
    fn deep_spill_leg_does_not_overflow() {
        let dir = MemoryDirectory::new();
        dir.create(Member::root(MemberCode::root(), fields(1000))).unwrap();
        let mut parent = "M1000".to_string();
        for seq in 1001..2001 {
            let member = place(&dir, &parent, seq, Side::Left);
            parent = member.code.to_string();
        }

        let report = audit(&dir).unwrap();
        assert!(report.is_consistent());
        assert_eq!(dir.find_root().unwrap().unwrap().left_count, 1000);
    }
}
