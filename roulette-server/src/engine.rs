//! Reviewer assignment and reassignment.
//!
//! The engine is pure over directory state: it reads through the store,
//! decides, and returns. It never writes; callers commit the decision
//! via `DirectoryStore::replace_reviewer_set` (or by persisting the new
//! pull request). That keeps retry semantics trivial: a failed commit
//! discards the selection and the caller may simply ask again.

use std::sync::Arc;

use roulette_core::{
    AssignmentError, PullRequestId, ReviewerSelector, TeamName, UserId,
};

use crate::store::DirectoryStore;

/// How many reviewers a fresh pull request gets, pool permitting.
const INITIAL_REVIEWER_COUNT: usize = 2;

/// Selects reviewers for new pull requests and replacements for
/// outgoing reviewers.
///
/// Both the store and the selector are injected, so tests can run the
/// engine against an in-memory directory with a deterministic selector.
pub struct AssignmentEngine {
    store: Arc<dyn DirectoryStore>,
    selector: Arc<dyn ReviewerSelector>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn DirectoryStore>, selector: Arc<dyn ReviewerSelector>) -> Self {
        Self { store, selector }
    }

    /// Pick up to two reviewers for a new pull request.
    ///
    /// The pool is the active members of `team_name` other than the
    /// author. An empty pool is a valid outcome, not an error: the pull
    /// request simply starts with no reviewers.
    pub async fn assign_reviewers(
        &self,
        author_id: &UserId,
        team_name: &TeamName,
    ) -> Result<Vec<UserId>, AssignmentError> {
        let candidates = self
            .store
            .active_team_members(team_name, author_id)
            .await
            .map_err(|e| AssignmentError::storage("list team members", e.to_string()))?;

        let pool: Vec<UserId> = candidates.into_iter().map(|u| u.id).collect();
        Ok(self.selector.select(&pool, INITIAL_REVIEWER_COUNT))
    }

    /// Pick a replacement for a reviewer leaving a pull request.
    ///
    /// Preconditions are checked in a fixed order; the first failing one
    /// wins. The replacement pool is the active members of the outgoing
    /// reviewer's team, minus the outgoing reviewer, the author, and
    /// everyone already in the reviewer set, so the one-for-one swap can
    /// never introduce a duplicate.
    pub async fn reassign_reviewer(
        &self,
        pr_id: &PullRequestId,
        outgoing_id: &UserId,
    ) -> Result<UserId, AssignmentError> {
        let pr = self
            .store
            .get_pull_request(pr_id)
            .await
            .map_err(|e| AssignmentError::storage("get pull request", e.to_string()))?
            .ok_or_else(|| AssignmentError::PullRequestNotFound {
                pr_id: pr_id.clone(),
            })?;

        if pr.is_merged() {
            return Err(AssignmentError::PullRequestMerged {
                pr_id: pr_id.clone(),
            });
        }

        let outgoing = self
            .store
            .get_user(outgoing_id)
            .await
            .map_err(|e| AssignmentError::storage("get user", e.to_string()))?
            .ok_or_else(|| AssignmentError::ReviewerNotFound {
                user_id: outgoing_id.clone(),
            })?;

        if !pr.has_reviewer(outgoing_id) {
            return Err(AssignmentError::ReviewerNotAssigned {
                pr_id: pr_id.clone(),
                user_id: outgoing_id.clone(),
            });
        }

        let candidates = self
            .store
            .active_team_members(&outgoing.team_name, outgoing_id)
            .await
            .map_err(|e| AssignmentError::storage("list team members", e.to_string()))?;

        let pool: Vec<UserId> = candidates
            .into_iter()
            .map(|u| u.id)
            .filter(|id| id != &pr.author_id && !pr.has_reviewer(id))
            .collect();

        self.selector
            .select(&pool, 1)
            .into_iter()
            .next()
            .ok_or_else(|| AssignmentError::NoReplacementCandidate {
                team_name: outgoing.team_name,
            })
    }
}
