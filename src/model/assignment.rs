//! Assignments (chunks) and the groups they are claimed in.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceId;
use super::session::SessionCode;

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One chunk of a resource assigned to one participant slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub session_code: SessionCode,
    pub resource_id: ResourceId,
    /// 1-based participant slot.
    pub participant_index: u32,
    /// Emission order within the session. Sub-chunks of one share keep
    /// the order the allocator produced them in.
    pub seq: u32,
    pub start_unit: u32,
    pub end_unit: u32,
    /// Remaining count for counted variants; `None` when completion is binary.
    pub progress: Option<u32>,
    pub claimed_by: Option<String>,
    pub claimed: bool,
    pub completed: bool,
}

impl Assignment {
    /// Number of units in this chunk.
    pub fn unit_count(&self) -> u32 {
        self.end_unit - self.start_unit + 1
    }

    /// The group this chunk is claimed with.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            session: self.session_code.clone(),
            resource: self.resource_id,
            participant: self.participant_index,
        }
    }

    /// Progress value a fresh (or released) chunk starts from.
    pub fn initial_progress(&self) -> Option<u32> {
        self.progress.map(|_| self.unit_count())
    }

    /// Whether `caller` currently holds this chunk's group.
    pub fn is_held_by(&self, caller: &str) -> bool {
        self.claimed && self.claimed_by.as_deref() == Some(caller)
    }
}

/// Newtype for assignment IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AssignmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// Identity of an assignment group: every chunk of one resource held by one
/// participant slot in one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub session: SessionCode,
    pub resource: ResourceId,
    pub participant: u32,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.session, self.resource, self.participant)
    }
}

/// Claim state of an assignment group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Unclaimed,
    Claimed,
    Completed,
}

impl GroupState {
    /// Derive the state of a group from its rows.
    pub fn of(group: &[Assignment]) -> Self {
        if group.iter().any(|a| a.completed) {
            GroupState::Completed
        } else if group.iter().any(|a| a.claimed) {
            GroupState::Claimed
        } else {
            GroupState::Unclaimed
        }
    }

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: GroupState) -> bool {
        use GroupState::*;
        matches!(
            (self, to),
            (Unclaimed, Claimed)
                | (Claimed, Completed)
                | (Claimed, Unclaimed)   // cancel
                | (Completed, Unclaimed) // cancel after completion, or reset
        )
    }
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupState::Unclaimed => "unclaimed",
            GroupState::Claimed => "claimed",
            GroupState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}
