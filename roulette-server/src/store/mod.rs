//! Directory store abstraction.
//!
//! The assignment engine and the HTTP layer only ever talk to the
//! directory through the `DirectoryStore` trait, so the backend can be
//! swapped: the in-memory store backs most tests, SQLite backs the
//! running service.

mod memory;
mod sqlite;

pub use memory::InMemoryDirectory;
pub use sqlite::SqliteDirectory;

use std::fmt;

use async_trait::async_trait;

use roulette_core::{PullRequest, PullRequestId, Team, TeamName, User, UserId};

/// Why a directory store operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A team with this name already exists.
    TeamExists(TeamName),
    /// A pull request with this id already exists.
    PullRequestExists(PullRequestId),
    /// The user id is unknown.
    UnknownUser(UserId),
    /// The pull request id is unknown.
    UnknownPullRequest(PullRequestId),
    /// A conditional reviewer-set update found the stored set no longer
    /// matching the expected one; a concurrent writer won.
    StaleReviewerSet(PullRequestId),
    /// A reviewer-set update was attempted on a merged pull request.
    MergedPullRequest(PullRequestId),
    /// The backend itself failed.
    Storage { op: String, message: String },
}

impl StoreError {
    pub fn storage(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            op: op.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TeamExists(name) => write!(f, "team {} already exists", name),
            Self::PullRequestExists(id) => write!(f, "pull request {} already exists", id),
            Self::UnknownUser(id) => write!(f, "user {} not found", id),
            Self::UnknownPullRequest(id) => write!(f, "pull request {} not found", id),
            Self::StaleReviewerSet(id) => {
                write!(f, "reviewer set of {} changed concurrently", id)
            }
            Self::MergedPullRequest(id) => {
                write!(f, "pull request {} is merged, reviewer set is frozen", id)
            }
            Self::Storage { op, message } => write!(f, "storage failure during {}: {}", op, message),
        }
    }
}

impl std::error::Error for StoreError {}

/// True if any id appears more than once.
pub(crate) fn has_duplicate_ids(ids: &[UserId]) -> bool {
    let mut seen = std::collections::HashSet::new();
    ids.iter().any(|id| !seen.insert(id))
}

/// Narrow data-access interface over teams, users, and pull requests.
///
/// Reads are plain lookups; the only writes with non-trivial semantics
/// are `replace_reviewer_set` (conditional, so concurrent reassignments
/// cannot double-replace) and `bulk_deactivate` (all-or-nothing).
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Create a team together with its initial members.
    async fn create_team(&self, team: Team) -> Result<(), StoreError>;

    async fn get_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    /// Flip a user's activity flag, returning the updated record.
    async fn set_user_active(&self, id: &UserId, active: bool) -> Result<User, StoreError>;

    /// Active members of a team, excluding the given user id.
    async fn active_team_members(
        &self,
        team_name: &TeamName,
        exclude: &UserId,
    ) -> Result<Vec<User>, StoreError>;

    async fn create_pull_request(&self, pr: PullRequest) -> Result<(), StoreError>;

    async fn get_pull_request(&self, id: &PullRequestId)
        -> Result<Option<PullRequest>, StoreError>;

    /// Mark a pull request merged, returning its current record.
    ///
    /// Idempotent: merging an already-merged PR succeeds without touching
    /// the original merge timestamp.
    async fn merge_pull_request(&self, id: &PullRequestId) -> Result<PullRequest, StoreError>;

    /// Conditionally replace a pull request's reviewer set.
    ///
    /// Commits only if the pull request is still open and the stored set
    /// still equals `expected`; otherwise fails with `MergedPullRequest`
    /// or `StaleReviewerSet` so the losing writer of a race observes a
    /// conflict instead of corrupting the set. A `new_set` containing
    /// duplicate ids is rejected outright.
    async fn replace_reviewer_set(
        &self,
        id: &PullRequestId,
        expected: &[UserId],
        new_set: Vec<UserId>,
    ) -> Result<PullRequest, StoreError>;

    /// All pull requests where the user is an assigned reviewer.
    async fn prs_by_reviewer(&self, user_id: &UserId) -> Result<Vec<PullRequest>, StoreError>;

    /// Open pull requests where the user is an assigned reviewer.
    async fn open_prs_with_reviewer(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequest>, StoreError>;

    /// Deactivate every listed user, or none of them. Fails with
    /// `UnknownUser` (and no changes) if any id is unknown.
    async fn bulk_deactivate(&self, user_ids: &[UserId]) -> Result<(), StoreError>;
}
