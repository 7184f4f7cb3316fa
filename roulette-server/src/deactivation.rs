//! Bulk user deactivation.
//!
//! Deactivating a batch of users has two halves with different
//! guarantees. Reassigning their open reviews is best-effort: each pull
//! request is handled independently and a failure on one (logged, then
//! skipped) never aborts the rest. The deactivation of the user records
//! themselves is atomic: either every listed user goes inactive or none
//! do.

use std::sync::Arc;

use tracing::{info, warn};

use roulette_core::UserId;

use crate::engine::AssignmentEngine;
use crate::store::{DirectoryStore, StoreError};

/// Outcome of a bulk deactivation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivationReport {
    /// How many users were deactivated.
    pub deactivated: usize,
    /// Reviews successfully handed to a replacement reviewer.
    pub reassigned: usize,
    /// Reviews that could not be reassigned and were left in place.
    pub failed_reassignments: usize,
}

/// Deactivate `user_ids`, optionally rotating their open reviews to
/// replacements first.
///
/// Fails with `StoreError::UnknownUser` (before any reassignment or
/// deactivation) if any listed id is unknown.
pub async fn deactivate_users(
    store: &Arc<dyn DirectoryStore>,
    engine: &AssignmentEngine,
    user_ids: &[UserId],
    reassign_open_prs: bool,
) -> Result<DeactivationReport, StoreError> {
    for id in user_ids {
        if store.get_user(id).await?.is_none() {
            return Err(StoreError::UnknownUser(id.clone()));
        }
    }

    let mut reassigned = 0usize;
    let mut failed_reassignments = 0usize;

    if reassign_open_prs {
        for user_id in user_ids {
            let open_prs = store.open_prs_with_reviewer(user_id).await?;
            for pr in open_prs {
                match rotate_reviewer(store, engine, &pr, user_id).await {
                    Ok(()) => reassigned += 1,
                    Err(e) => {
                        warn!(
                            pr_id = %pr.id,
                            outgoing = %user_id,
                            error = %e,
                            "failed to reassign review, leaving it in place"
                        );
                        failed_reassignments += 1;
                    }
                }
            }
        }
    }

    store.bulk_deactivate(user_ids).await?;
    info!(
        users = user_ids.len(),
        reassigned, failed_reassignments, "bulk deactivation complete"
    );

    Ok(DeactivationReport {
        deactivated: user_ids.len(),
        reassigned,
        failed_reassignments,
    })
}

/// Pick a replacement for `outgoing` on one pull request and commit the
/// one-for-one swap.
async fn rotate_reviewer(
    store: &Arc<dyn DirectoryStore>,
    engine: &AssignmentEngine,
    pr: &roulette_core::PullRequest,
    outgoing: &UserId,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let replacement = engine.reassign_reviewer(&pr.id, outgoing).await?;

    let mut updated = pr.clone();
    if !updated.replace_reviewer(outgoing, replacement) {
        // The set changed under us; treat it like any other lost race.
        return Err(Box::new(StoreError::StaleReviewerSet(pr.id.clone())));
    }
    store
        .replace_reviewer_set(&pr.id, &pr.reviewers, updated.reviewers)
        .await?;
    Ok(())
}
