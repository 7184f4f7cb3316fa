//! In-memory implementation of `DirectoryStore`.
//!
//! Everything lives behind a single `RwLock`, which makes the two
//! multi-entity writes (conditional reviewer-set replacement and bulk
//! deactivation) trivially atomic. All state is lost on restart; this
//! backend exists for tests and local experiments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use roulette_core::{PrStatus, PullRequest, PullRequestId, Team, TeamName, User, UserId};

use super::{DirectoryStore, StoreError};

#[derive(Default)]
struct Directory {
    users: HashMap<UserId, User>,
    /// Member ids per team, in insertion order.
    teams: HashMap<TeamName, Vec<UserId>>,
    prs: HashMap<PullRequestId, PullRequest>,
}

/// In-memory directory store.
#[derive(Default)]
pub struct InMemoryDirectory {
    inner: RwLock<Directory>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn create_team(&self, team: Team) -> Result<(), StoreError> {
        let mut dir = self.inner.write().await;
        if dir.teams.contains_key(&team.name) {
            return Err(StoreError::TeamExists(team.name));
        }

        // Validate the whole batch before touching anything; a member id
        // that already exists would otherwise be reparented while the
        // old team's member list still names it.
        let member_ids: Vec<UserId> = team.members.iter().map(|m| m.id.clone()).collect();
        if super::has_duplicate_ids(&member_ids) {
            return Err(StoreError::storage(
                "create team",
                format!("duplicate member id in team {}", team.name),
            ));
        }
        for id in &member_ids {
            if dir.users.contains_key(id) {
                return Err(StoreError::storage(
                    "create team",
                    format!("user {} already exists", id),
                ));
            }
        }

        for member in team.members {
            dir.users.insert(member.id.clone(), member);
        }
        dir.teams.insert(team.name, member_ids);
        Ok(())
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError> {
        let dir = self.inner.read().await;
        let Some(member_ids) = dir.teams.get(name) else {
            return Ok(None);
        };
        let members = member_ids
            .iter()
            .filter_map(|id| dir.users.get(id).cloned())
            .collect();
        Ok(Some(Team {
            name: name.clone(),
            members,
        }))
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let dir = self.inner.read().await;
        Ok(dir.users.get(id).cloned())
    }

    async fn set_user_active(&self, id: &UserId, active: bool) -> Result<User, StoreError> {
        let mut dir = self.inner.write().await;
        let user = dir
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownUser(id.clone()))?;
        user.is_active = active;
        Ok(user.clone())
    }

    async fn active_team_members(
        &self,
        team_name: &TeamName,
        exclude: &UserId,
    ) -> Result<Vec<User>, StoreError> {
        let dir = self.inner.read().await;
        let member_ids = dir.teams.get(team_name).map(Vec::as_slice).unwrap_or(&[]);
        Ok(member_ids
            .iter()
            .filter(|id| *id != exclude)
            .filter_map(|id| dir.users.get(id))
            .filter(|u| u.is_active)
            .cloned()
            .collect())
    }

    async fn create_pull_request(&self, pr: PullRequest) -> Result<(), StoreError> {
        let mut dir = self.inner.write().await;
        if dir.prs.contains_key(&pr.id) {
            return Err(StoreError::PullRequestExists(pr.id));
        }
        dir.prs.insert(pr.id.clone(), pr);
        Ok(())
    }

    async fn get_pull_request(
        &self,
        id: &PullRequestId,
    ) -> Result<Option<PullRequest>, StoreError> {
        let dir = self.inner.read().await;
        Ok(dir.prs.get(id).cloned())
    }

    async fn merge_pull_request(&self, id: &PullRequestId) -> Result<PullRequest, StoreError> {
        let mut dir = self.inner.write().await;
        let pr = dir
            .prs
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownPullRequest(id.clone()))?;
        // Repeat merges succeed without touching the original timestamp.
        if pr.status != PrStatus::Merged {
            pr.status = PrStatus::Merged;
            pr.merged_at = Some(Utc::now());
        }
        Ok(pr.clone())
    }

    async fn replace_reviewer_set(
        &self,
        id: &PullRequestId,
        expected: &[UserId],
        new_set: Vec<UserId>,
    ) -> Result<PullRequest, StoreError> {
        if super::has_duplicate_ids(&new_set) {
            return Err(StoreError::storage(
                "replace reviewer set",
                format!("duplicate reviewer id in new set for {}", id),
            ));
        }

        let mut dir = self.inner.write().await;
        let pr = dir
            .prs
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownPullRequest(id.clone()))?;
        if pr.is_merged() {
            return Err(StoreError::MergedPullRequest(id.clone()));
        }
        if pr.reviewers != expected {
            return Err(StoreError::StaleReviewerSet(id.clone()));
        }
        pr.reviewers = new_set;
        Ok(pr.clone())
    }

    async fn prs_by_reviewer(&self, user_id: &UserId) -> Result<Vec<PullRequest>, StoreError> {
        let dir = self.inner.read().await;
        Ok(dir
            .prs
            .values()
            .filter(|pr| pr.has_reviewer(user_id))
            .cloned()
            .collect())
    }

    async fn open_prs_with_reviewer(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequest>, StoreError> {
        let dir = self.inner.read().await;
        Ok(dir
            .prs
            .values()
            .filter(|pr| !pr.is_merged() && pr.has_reviewer(user_id))
            .cloned()
            .collect())
    }

    async fn bulk_deactivate(&self, user_ids: &[UserId]) -> Result<(), StoreError> {
        let mut dir = self.inner.write().await;
        // All-or-nothing: validate the whole batch before touching anyone.
        for id in user_ids {
            if !dir.users.contains_key(id) {
                return Err(StoreError::UnknownUser(id.clone()));
            }
        }
        for id in user_ids {
            if let Some(user) = dir.users.get_mut(id) {
                user.is_active = false;
            }
        }
        Ok(())
    }
}
