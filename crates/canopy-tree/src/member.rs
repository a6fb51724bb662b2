//! Member model - a node in the binary referral tree.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of every issued member code (`M1000`, `M1001`, ...).
pub const CODE_PREFIX: &str = "M";

/// Sequence number of the root member. The first registration receives `ROOT_SEQUENCE + 1`.
pub const ROOT_SEQUENCE: u64 = 1000;

/// Opaque member identifier (hex Blake3 hash of the member code).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    /// Derive the identifier for a member code.
    ///
    /// Codes are unique, so identifiers are too.
    pub fn for_code(code: &MemberCode) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"member:");
        hasher.update(code.as_str().as_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 hex chars
        f.write_str(self.0.get(..8).unwrap_or(&self.0))
    }
}

/// Human-readable member code issued by the sequence generator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberCode(pub String);

impl MemberCode {
    /// Render a sequence number as a code.
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("{}{}", CODE_PREFIX, seq))
    }

    /// Code of the tree root.
    pub fn root() -> Self {
        Self::from_sequence(ROOT_SEQUENCE)
    }

    /// Numeric part of the code, if it was issued by a sequence generator.
    ///
    /// Codes compare correctly by this value, not lexically (`M999` < `M1000`).
    pub fn sequence_number(&self) -> Option<u64> {
        self.0.strip_prefix(CODE_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A slot under a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(format!("unknown side '{}', expected left or right", other)),
        }
    }
}

/// Where a member sits relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
    Root,
}

impl Position {
    /// The slot this position occupies under a parent (`None` for the root).
    pub fn slot(&self) -> Option<Side> {
        match self {
            Position::Left => Some(Side::Left),
            Position::Right => Some(Side::Right),
            Position::Root => None,
        }
    }
}

impl From<Side> for Position {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Position::Left,
            Side::Right => Position::Right,
        }
    }
}

/// Profile fields supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub mobile: String,
}

impl NewMember {
    pub fn new(name: impl Into<String>, email: impl Into<String>, mobile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            mobile: mobile.into(),
        }
    }

    /// Trim whitespace and lowercase the email so identity checks are stable.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_ascii_lowercase(),
            mobile: self.mobile.trim().to_string(),
        }
    }

    /// Check required fields. Expects normalized input.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name is required".into());
        }
        if self.mobile.is_empty() {
            return Err("mobile is required".into());
        }
        if !is_valid_email(&self.email) {
            return Err(format!("'{}' is not a valid email", self.email));
        }
        Ok(())
    }
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|l| !l.is_empty())
        && labels.last().map_or(false, |tld| tld.len() >= 2)
}

/// A node in the binary tree.
///
/// `id`, `code` and `sponsor_code` are frozen at creation; `parent_code` and
/// `side` are frozen once a slot points at the member.
/// Child pointers are set once per side; counts only grow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub code: MemberCode,
    pub name: String,
    pub email: String,
    pub mobile: String,

    /// Member who referred this one (`None` only for the root)
    pub sponsor_code: Option<MemberCode>,

    /// Member this one is attached under after spill (`None` only for the root)
    pub parent_code: Option<MemberCode>,

    pub side: Position,

    pub left_child: Option<MemberId>,
    pub right_child: Option<MemberId>,

    pub left_count: u64,
    pub right_count: u64,

    /// Milliseconds since the Unix epoch
    pub joined_at: u64,
}

impl Member {
    /// Build the tree root.
    pub fn root(code: MemberCode, fields: NewMember) -> Self {
        Self::build(code, fields, None, None, Position::Root)
    }

    /// Build a member placed under `parent` on `side`.
    pub fn placed(
        code: MemberCode,
        fields: NewMember,
        sponsor_code: MemberCode,
        parent: &Member,
        side: Side,
    ) -> Self {
        Self::build(
            code,
            fields,
            Some(sponsor_code),
            Some(parent.code.clone()),
            side.into(),
        )
    }

    fn build(
        code: MemberCode,
        fields: NewMember,
        sponsor_code: Option<MemberCode>,
        parent_code: Option<MemberCode>,
        side: Position,
    ) -> Self {
        Self {
            id: MemberId::for_code(&code),
            code,
            name: fields.name,
            email: fields.email,
            mobile: fields.mobile,
            sponsor_code,
            parent_code,
            side,
            left_child: None,
            right_child: None,
            left_count: 0,
            right_count: 0,
            joined_at: now_millis(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.side == Position::Root
    }

    pub fn child(&self, side: Side) -> Option<&MemberId> {
        match side {
            Side::Left => self.left_child.as_ref(),
            Side::Right => self.right_child.as_ref(),
        }
    }

    pub fn has_children(&self) -> bool {
        self.left_child.is_some() || self.right_child.is_some()
    }

    /// Which slot holds `id`, if either.
    pub fn slot_of(&self, id: &MemberId) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.child(*side) == Some(id))
    }

    /// Claim an empty slot. Returns `false` if the slot is already taken.
    pub fn set_child(&mut self, side: Side, id: MemberId) -> bool {
        let slot = match side {
            Side::Left => &mut self.left_child,
            Side::Right => &mut self.right_child,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(id);
        true
    }

    pub fn count(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.left_count,
            Side::Right => self.right_count,
        }
    }

    pub fn increment(&mut self, side: Side) {
        match side {
            Side::Left => self.left_count += 1,
            Side::Right => self.right_count += 1,
        }
    }

    /// Overwrite a count. Only the repair pass does this.
    pub fn set_count(&mut self, side: Side, value: u64) {
        match side {
            Side::Left => self.left_count = value,
            Side::Right => self.right_count = value,
        }
    }

    /// Total downline size.
    pub fn downline(&self) -> u64 {
        self.left_count + self.right_count
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
