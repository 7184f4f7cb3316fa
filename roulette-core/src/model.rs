//! Entity types for the reviewer directory.
//!
//! These are the types shared between the assignment engine and the
//! directory store. Identifiers are newtypes so that a user id, a team
//! name, and a pull request id cannot be mixed up at a call site.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype for an opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a team name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamName(pub String);

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TeamName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TeamName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a pull request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullRequestId(pub String);

impl fmt::Display for PullRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PullRequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PullRequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user belongs to exactly one team at a time. The activity flag and
/// the team affiliation are the only mutable parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub team_name: TeamName,
    pub is_active: bool,
}

/// A team and its members. Member order is preserved by the store but
/// carries no meaning for assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: TeamName,
    pub members: Vec<User>,
}

/// Pull request lifecycle status.
///
/// `Merged` is terminal: once reached, the reviewer set is frozen and no
/// further transition exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "MERGED")]
    Merged,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pull request and its currently assigned reviewers.
///
/// `reviewers` is an ordered set: ids are distinct from each other and
/// from `author_id`, and reassignment replaces an entry in place so the
/// set keeps its size and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    pub name: String,
    pub author_id: UserId,
    pub status: PrStatus,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub reviewers: Vec<UserId>,
}

impl PullRequest {
    /// Create a new open pull request with no reviewers assigned yet.
    pub fn new(
        id: impl Into<PullRequestId>,
        name: impl Into<String>,
        author_id: impl Into<UserId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author_id: author_id.into(),
            status: PrStatus::Open,
            created_at: Utc::now(),
            merged_at: None,
            reviewers: Vec::new(),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.status == PrStatus::Merged
    }

    pub fn has_reviewer(&self, id: &UserId) -> bool {
        self.reviewers.contains(id)
    }

    /// Replace `outgoing` with `incoming` in place, preserving the
    /// position of the replaced entry. Returns false if `outgoing` is
    /// not in the reviewer set.
    pub fn replace_reviewer(&mut self, outgoing: &UserId, incoming: UserId) -> bool {
        match self.reviewers.iter().position(|r| r == outgoing) {
            Some(idx) => {
                self.reviewers[idx] = incoming;
                true
            }
            None => false,
        }
    }
}
