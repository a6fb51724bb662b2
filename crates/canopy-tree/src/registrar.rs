//! Registration orchestration.
//!
//! ```text
//! lookup sponsor -> identity check -> resolve slot -> issue code
//!     -> create member (unattached) -> claim slot (conditional) -> propagate counts
//! ```
//!
//! Creating the member first reserves its code, email and mobile, so a rival
//! registering the same identity fails before any slot points anywhere. The
//! record is unattached until the claim succeeds; a lost claim moves it to the
//! next free slot, and giving up removes it again. No await point follows the
//! create, so a dropped future cannot strand a reservation.

use crate::audit::{self, AuditReport, RepairSummary};
use crate::directory::{MemberDirectory, SequenceGenerator};
use crate::error::{DirectoryError, Error, IdentityField, Result, WriteStage};
use crate::member::{Member, MemberCode, MemberId, NewMember, Side, ROOT_SEQUENCE};
use crate::placement::{self, Placement};
use crate::propagate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default number of resolve-and-claim rounds before giving up on a contended slot.
pub const DEFAULT_MAX_PLACEMENT_ATTEMPTS: u32 = 8;

/// Registrar tuning.
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// Resolve-and-claim rounds before reporting [`Error::PlacementConflict`]
    pub max_placement_attempts: u32,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            max_placement_attempts: DEFAULT_MAX_PLACEMENT_ATTEMPTS,
        }
    }
}

/// A completed registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: MemberId,
    pub code: MemberCode,
    pub sponsor_code: MemberCode,
    pub parent_code: MemberCode,
    pub side: Side,
    /// Occupied slots passed before landing (0 = directly under the sponsor)
    pub spill_depth: usize,
    /// Ancestors whose counts were incremented
    pub ancestors_updated: usize,
}

/// Public view of a direct child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub id: MemberId,
    pub code: MemberCode,
    pub name: String,
    pub joined_at: u64,
}

impl From<&Member> for ChildSummary {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.clone(),
            code: member.code.clone(),
            name: member.name.clone(),
            joined_at: member.joined_at,
        }
    }
}

/// Direct children and per-side downline sizes of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownlineSummary {
    pub left_child: Option<ChildSummary>,
    pub right_child: Option<ChildSummary>,
    pub left_count: u64,
    pub right_count: u64,
}

/// Places members into the tree and keeps ancestor counts exact.
///
/// Registrations through one registrar are serialized by a tree-wide lock.
/// Registrars sharing a directory stay correct through the conditional slot
/// claim and bounded retry.
pub struct Registrar<D, S> {
    directory: Arc<D>,
    sequence: Arc<S>,
    config: RegistrarConfig,
    tree_lock: Mutex<()>,
}

impl<D, S> Registrar<D, S>
where
    D: MemberDirectory,
    S: SequenceGenerator,
{
    pub fn new(directory: Arc<D>, sequence: Arc<S>) -> Self {
        Self::with_config(directory, sequence, RegistrarConfig::default())
    }

    pub fn with_config(directory: Arc<D>, sequence: Arc<S>, config: RegistrarConfig) -> Self {
        Self {
            directory,
            sequence,
            config,
            tree_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Create the single root member (`M1000`) and seed the sequence past it.
    pub async fn bootstrap_root(&self, fields: NewMember) -> Result<Member> {
        let fields = fields.normalized();
        fields.validate().map_err(Error::InvalidInput)?;

        let _guard = self.tree_lock.lock().await;

        if let Some(root) = self.directory.find_root()? {
            return Err(Error::RootExists(root.code));
        }
        self.check_identity(&fields)?;
        self.sequence.seed(ROOT_SEQUENCE)?;

        let root = self
            .directory
            .create(Member::root(MemberCode::root(), fields))
            .map_err(|e| match e {
                DirectoryError::RootExists(code) => Error::RootExists(code),
                DirectoryError::Duplicate { field, .. } => Error::DuplicateIdentity { field },
                other => Error::Directory(other),
            })?;

        tracing::info!("Created root member {}", root.code);
        Ok(root)
    }

    /// Register a new member under `sponsor_code`, spilling down `preferred` as needed.
    pub async fn register_member(
        &self,
        sponsor_code: &MemberCode,
        preferred: Side,
        fields: NewMember,
    ) -> Result<Registration> {
        let fields = fields.normalized();
        fields.validate().map_err(Error::InvalidInput)?;

        let _guard = self.tree_lock.lock().await;

        let sponsor = self.sponsor(sponsor_code)?;
        self.check_identity(&fields)?;

        let mut placement = placement::resolve(&*self.directory, sponsor, preferred)?;
        let code = self.sequence.next_code()?;
        let mut member = self.reserve(
            Member::placed(
                code,
                fields,
                sponsor_code.clone(),
                &placement.parent,
                placement.side,
            ),
            &placement,
        )?;

        for attempt in 1..=self.config.max_placement_attempts {
            if attempt > 1 {
                // Another writer changed the leg; start again from a fresh sponsor
                let next = self
                    .sponsor(sponsor_code)
                    .and_then(|sponsor| placement::resolve(&*self.directory, sponsor, preferred));
                placement = match next {
                    Ok(next) => next,
                    Err(e) => return Err(self.release(&member, &placement, e)),
                };

                member.parent_code = Some(placement.parent.code.clone());
                member.side = placement.side.into();
                if let Err(source) = self.directory.save(&member) {
                    let e = persistence_failure(WriteStage::ClaimSlot, &placement, source);
                    return Err(self.release(&member, &placement, e));
                }
            }

            let claimed = self
                .directory
                .attach_child(&placement.parent.id, placement.side, &member.id)
                .map_err(|source| {
                    tracing::error!(
                        "Slot claim for {} under {} ({}) failed: {}",
                        member.code,
                        placement.parent.code,
                        placement.side,
                        source
                    );
                    persistence_failure(WriteStage::ClaimSlot, &placement, source)
                })?;

            if claimed {
                return self.complete(member, placement, sponsor_code);
            }

            tracing::warn!(
                "Slot {} of {} was claimed concurrently (attempt {}/{})",
                placement.side,
                placement.parent.code,
                attempt,
                self.config.max_placement_attempts
            );
        }

        let conflict = Error::PlacementConflict {
            sponsor: sponsor_code.clone(),
            side: preferred,
            attempts: self.config.max_placement_attempts,
        };
        Err(self.release(&member, &placement, conflict))
    }

    fn sponsor(&self, code: &MemberCode) -> Result<Member> {
        self.directory
            .find_by_code(code)?
            .ok_or_else(|| Error::InvalidSponsor(code.clone()))
    }

    /// Write the member before any slot points at it, taking its code, email and mobile.
    fn reserve(&self, member: Member, placement: &Placement) -> Result<Member> {
        let code = member.code.clone();
        self.directory.create(member).map_err(|source| match source {
            DirectoryError::Duplicate {
                field: field @ (IdentityField::Email | IdentityField::Mobile),
                ..
            } => {
                tracing::warn!("{} lost a race for its {}", code, field);
                Error::DuplicateIdentity { field }
            }
            source => {
                tracing::error!("Writing {} failed: {}", code, source);
                persistence_failure(WriteStage::CreateMember, placement, source)
            }
        })
    }

    /// Drop a reserved member that never got a slot, then report `cause`.
    fn release(&self, member: &Member, placement: &Placement, cause: Error) -> Error {
        match self.directory.remove(&member.id) {
            Ok(_) => cause,
            Err(source) => {
                tracing::error!(
                    "{} stays reserved but unattached after {}: {}",
                    member.code,
                    cause,
                    source
                );
                persistence_failure(WriteStage::ReleaseReservation, placement, source)
            }
        }
    }

    /// Steps after the slot is ours: walk counts upward.
    fn complete(
        &self,
        member: Member,
        placement: Placement,
        sponsor_code: &MemberCode,
    ) -> Result<Registration> {
        let Placement {
            parent,
            side,
            spill_depth,
        } = placement;

        let propagation = propagate::propagate(&*self.directory, &parent, side).map_err(|e| {
            tracing::error!("Counts for {} only partly propagated: {}", member.code, e);
            e
        })?;

        tracing::info!(
            "Registered {} under {} ({}, sponsor {}, spill depth {})",
            member.code,
            parent.code,
            side,
            sponsor_code,
            spill_depth
        );

        Ok(Registration {
            id: member.id,
            code: member.code,
            sponsor_code: sponsor_code.clone(),
            parent_code: parent.code,
            side,
            spill_depth,
            ancestors_updated: propagation.len(),
        })
    }

    fn check_identity(&self, fields: &NewMember) -> Result<()> {
        match self.directory.find_by_identity(&fields.email, &fields.mobile)? {
            Some(existing) => {
                let field = if existing.email == fields.email {
                    IdentityField::Email
                } else {
                    IdentityField::Mobile
                };
                Err(Error::DuplicateIdentity { field })
            }
            None => Ok(()),
        }
    }

    /// Direct children and per-side counts of a member.
    pub fn downline_summary(&self, id: &MemberId) -> Result<DownlineSummary> {
        let member = self.profile(id)?;
        let child = |side: Side| -> Result<Option<ChildSummary>> {
            match member.child(side) {
                Some(child_id) => Ok(self
                    .directory
                    .find_by_id(child_id)?
                    .as_ref()
                    .map(ChildSummary::from)),
                None => Ok(None),
            }
        };

        Ok(DownlineSummary {
            left_child: child(Side::Left)?,
            right_child: child(Side::Right)?,
            left_count: member.left_count,
            right_count: member.right_count,
        })
    }

    /// A member by id.
    pub fn profile(&self, id: &MemberId) -> Result<Member> {
        self.directory
            .find_by_id(id)?
            .ok_or_else(|| Error::UnknownMember(id.clone()))
    }

    /// A member by code.
    pub fn lookup(&self, code: &MemberCode) -> Result<Option<Member>> {
        Ok(self.directory.find_by_code(code)?)
    }

    /// Recount the whole tree and report discrepancies.
    pub async fn audit(&self) -> Result<AuditReport> {
        let _guard = self.tree_lock.lock().await;
        Ok(audit::audit(&*self.directory)?)
    }

    /// Rewrite every count to its recounted value.
    pub async fn repair(&self) -> Result<RepairSummary> {
        let _guard = self.tree_lock.lock().await;
        Ok(audit::repair(&*self.directory)?)
    }
}

fn persistence_failure(stage: WriteStage, placement: &Placement, source: DirectoryError) -> Error {
    Error::PersistenceFailure {
        stage,
        parent_code: placement.parent.code.clone(),
        side: placement.side,
        source,
    }
}
