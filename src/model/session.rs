//! Sessions: one distribution event and the chunks it produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assignment::{Assignment, GroupKey};
use super::resource::ResourceId;

/// Short opaque code participants use to join a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(pub String);

impl SessionCode {
    /// Length of generated codes.
    pub const LEN: usize = 8;

    /// Generate a fresh code from the first characters of a v4 UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session header, without its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub code: SessionCode,
    pub creator_id: String,
    /// Fixed at creation; resources added later are split the same way.
    pub participant_count: u32,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A session together with every assignment it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub assignments: Vec<Assignment>,
}

impl Session {
    pub fn code(&self) -> &SessionCode {
        &self.info.code
    }

    pub fn is_creator(&self, caller: &str) -> bool {
        self.info.creator_id == caller
    }

    /// Whether any chunk of `resource` is already part of this session.
    pub fn has_resource(&self, resource: ResourceId) -> bool {
        self.assignments.iter().any(|a| a.resource_id == resource)
    }

    /// Chunks of one group, in emission order.
    pub fn group(&self, key: &GroupKey) -> Vec<&Assignment> {
        let mut chunks: Vec<&Assignment> = self
            .assignments
            .iter()
            .filter(|a| a.resource_id == key.resource && a.participant_index == key.participant)
            .collect();
        chunks.sort_by_key(|a| a.seq);
        chunks
    }
}
