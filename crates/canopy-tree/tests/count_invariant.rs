//! Randomized registration sequences against a brute-force recount.

use canopy_tree::audit;
use canopy_tree::{
    AtomicSequence, Member, MemberCode, MemberDirectory, MemoryDirectory, NewMember, Registrar,
    Side,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Count every member in the subtree under `id` by walking child pointers.
fn brute_force_size(members: &HashMap<String, Member>, id: Option<&canopy_tree::MemberId>) -> u64 {
    let mut total = 0;
    let mut stack: Vec<&canopy_tree::MemberId> = id.into_iter().collect();
    while let Some(id) = stack.pop() {
        let member = &members[id.as_str()];
        total += 1;
        stack.extend(member.left_child.iter());
        stack.extend(member.right_child.iter());
    }
    total
}

fn assert_counts_exact(directory: &MemoryDirectory) {
    let members: HashMap<String, Member> = directory
        .list_members()
        .unwrap()
        .into_iter()
        .map(|m| (m.id.as_str().to_string(), m))
        .collect();

    for member in members.values() {
        assert_eq!(
            member.left_count,
            brute_force_size(&members, member.left_child.as_ref()),
            "left count of {}",
            member.code
        );
        assert_eq!(
            member.right_count,
            brute_force_size(&members, member.right_child.as_ref()),
            "right count of {}",
            member.code
        );
        for side in Side::BOTH {
            if let Some(child) = member.child(side) {
                let child = &members[child.as_str()];
                assert_eq!(child.parent_code.as_ref(), Some(&member.code));
                assert_eq!(child.side.slot(), Some(side));
            }
        }
    }

    let roots = members.values().filter(|m| m.is_root()).count();
    assert_eq!(roots, 1);
}

/// `parent` and every member above it, found by following `parent_code`.
fn ancestors_from(members: &[Member], parent: &MemberCode) -> Vec<MemberCode> {
    let by_code: HashMap<&MemberCode, &Member> = members.iter().map(|m| (&m.code, m)).collect();
    let mut chain = Vec::new();
    let mut next = Some(parent);
    while let Some(code) = next {
        chain.push(code.clone());
        assert!(chain.len() <= members.len(), "parent chain loops at {}", code);
        next = by_code[code].parent_code.as_ref();
    }
    chain.sort();
    chain
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn counts_match_recount_after_every_registration(
        steps in prop::collection::vec((any::<prop::sample::Index>(), any::<bool>()), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let directory = Arc::new(MemoryDirectory::new());
            let registrar = Registrar::new(Arc::clone(&directory), Arc::new(AtomicSequence::default()));
            registrar
                .bootstrap_root(NewMember::new("Root", "root@company.com", "0"))
                .await
                .unwrap();

            let mut codes = vec![MemberCode::root()];
            for (i, (pick, left)) in steps.into_iter().enumerate() {
                let sponsor = pick.get(&codes).clone();
                let side = if left { Side::Left } else { Side::Right };
                let before = directory.list_members().unwrap();

                let reg = registrar
                    .register_member(
                        &sponsor,
                        side,
                        NewMember::new(format!("P{}", i), format!("p{}@example.com", i), format!("7{}", i)),
                    )
                    .await
                    .unwrap();

                // Side never changes during the spill walk
                assert_eq!(reg.side, side);
                assert_counts_exact(&directory);

                // Exactly depth(parent)+1 ancestors changed, each by one
                let expected = ancestors_from(&before, &reg.parent_code);
                let after = directory.list_members().unwrap();
                let mut changed = Vec::new();
                for old in &before {
                    let new = after.iter().find(|m| m.id == old.id).unwrap();
                    match new.downline() - old.downline() {
                        0 => {}
                        1 => changed.push(old.code.clone()),
                        delta => panic!("{} changed by {}", old.code, delta),
                    }
                }
                changed.sort();
                assert_eq!(changed, expected);
                assert_eq!(reg.ancestors_updated, expected.len());
                codes.push(reg.code);
            }

            assert!(audit::audit(&*directory).unwrap().is_consistent());
        });
    }

    #[test]
    fn codes_strictly_increase(count in 1usize..30) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let registrar = Registrar::new(Arc::new(MemoryDirectory::new()), Arc::new(AtomicSequence::default()));
            registrar
                .bootstrap_root(NewMember::new("Root", "root@company.com", "0"))
                .await
                .unwrap();

            let mut last = MemberCode::root().sequence_number().unwrap();
            for i in 0..count {
                let reg = registrar
                    .register_member(
                        &MemberCode::root(),
                        if i % 2 == 0 { Side::Left } else { Side::Right },
                        NewMember::new(format!("Q{}", i), format!("q{}@example.com", i), format!("8{}", i)),
                    )
                    .await
                    .unwrap();
                let seq = reg.code.sequence_number().unwrap();
                assert!(seq > last);
                last = seq;
            }
        });
    }
}
