//! Spill placement.
//!
//! A new member goes under its sponsor on the requested side. If that slot is
//! taken, the search follows the occupant and tries the **same** side again,
//! repeating until an empty slot turns up:
//!
//! ```text
//!        S            S            S
//!       /            /            /
//!      A     ->     A     ->     A
//!                  /            /
//!                 B            B
//!                             /
//!                            C
//! ```
//!
//! Left and right legs therefore fill independently, one edge at a time. The
//! walk never alternates sides and never goes breadth-first.

use crate::directory::MemberDirectory;
use crate::error::{Error, Result};
use crate::member::{Member, Side};

/// Where a new member will attach.
#[derive(Debug, Clone)]
pub struct Placement {
    /// The member the new one attaches under
    pub parent: Member,
    /// Free slot on `parent`
    pub side: Side,
    /// Number of occupied slots passed on the way down (0 = direct under sponsor)
    pub spill_depth: usize,
}

/// Find the first free slot reachable from `sponsor` by descending on `preferred`.
///
/// Cost is one directory read per spill hop. A child pointer that does not
/// resolve, or a walk longer than the directory, is reported as
/// [`Error::CountInconsistency`] before anything is written.
pub fn resolve<D>(directory: &D, sponsor: Member, preferred: Side) -> Result<Placement>
where
    D: MemberDirectory + ?Sized,
{
    let limit = directory.member_count()?;
    let mut current = sponsor;
    let mut spill_depth = 0;

    loop {
        let Some(child_id) = current.child(preferred).cloned() else {
            return Ok(Placement {
                parent: current,
                side: preferred,
                spill_depth,
            });
        };

        if spill_depth >= limit {
            return Err(Error::CountInconsistency {
                at: current.code,
                detail: format!("spill walk exceeded {} members; the {} leg loops", limit, preferred),
                partial: false,
            });
        }

        let next = directory
            .find_by_id(&child_id)?
            .ok_or_else(|| Error::CountInconsistency {
                at: current.code.clone(),
                detail: format!("{} child {} does not exist", preferred, child_id),
                partial: false,
            })?;

        tracing::debug!(
            "Slot {} of {} taken by {}, spilling down",
            preferred,
            current.code,
            next.code
        );
        current = next;
        spill_depth += 1;
    }
}
