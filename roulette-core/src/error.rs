//! Failure taxonomy for the assignment engine.
//!
//! These are expected, enumerable business outcomes, so they are modelled
//! as data rather than as opaque error chains. The HTTP layer maps each
//! variant 1:1 to a user-facing response.

use std::fmt;

use crate::model::{PullRequestId, TeamName, UserId};

/// Why an assignment or reassignment could not be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    /// The pull request id is unknown.
    PullRequestNotFound { pr_id: PullRequestId },
    /// The outgoing reviewer's user id is unknown.
    ReviewerNotFound { user_id: UserId },
    /// The pull request is merged; its reviewer set is frozen.
    PullRequestMerged { pr_id: PullRequestId },
    /// The outgoing id is not in the pull request's reviewer set.
    ReviewerNotAssigned {
        pr_id: PullRequestId,
        user_id: UserId,
    },
    /// The team has no active member eligible as a replacement.
    NoReplacementCandidate { team_name: TeamName },
    /// A directory store call failed. The selection (if any) is discarded;
    /// retrying is safe because the engine never writes.
    Storage { op: &'static str, message: String },
}

impl AssignmentError {
    pub fn storage(op: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            op,
            message: message.into(),
        }
    }
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullRequestNotFound { pr_id } => {
                write!(f, "pull request {} not found", pr_id)
            }
            Self::ReviewerNotFound { user_id } => {
                write!(f, "reviewer {} not found", user_id)
            }
            Self::PullRequestMerged { pr_id } => {
                write!(f, "cannot reassign reviewers for merged PR {}", pr_id)
            }
            Self::ReviewerNotAssigned { pr_id, user_id } => {
                write!(f, "reviewer {} is not assigned to PR {}", user_id, pr_id)
            }
            Self::NoReplacementCandidate { team_name } => {
                write!(
                    f,
                    "no active replacement candidate in team {}",
                    team_name
                )
            }
            Self::Storage { op, message } => {
                write!(f, "storage failure during {}: {}", op, message)
            }
        }
    }
}

impl std::error::Error for AssignmentError {}
