//! HTTP front end.
//!
//! Thin axum layer over the store and the assignment engine. Handlers
//! validate the request shape, call through, and map engine/store
//! outcomes 1:1 onto responses: not-found conditions become 404,
//! business conflicts become 409, storage failures become 500. Error
//! bodies are `{"error": {"code", "message"}}`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use roulette_core::{AssignmentError, PullRequest, PullRequestId, Team, TeamName, User, UserId};

use crate::deactivation::deactivate_users;
use crate::store::StoreError;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_reviews))
        .route("/users/bulk-deactivate", post(bulk_deactivate))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = json!({
        "error": {
            "code": code,
            "message": message.into(),
        }
    });
    (status, Json(body)).into_response()
}

/// Map an engine failure onto its response, per the failure taxonomy.
fn assignment_error_response(err: AssignmentError) -> Response {
    let message = err.to_string();
    match err {
        AssignmentError::PullRequestNotFound { .. } | AssignmentError::ReviewerNotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", message)
        }
        AssignmentError::PullRequestMerged { .. } => {
            error_response(StatusCode::CONFLICT, "PR_MERGED", message)
        }
        AssignmentError::ReviewerNotAssigned { .. } => {
            error_response(StatusCode::CONFLICT, "NOT_ASSIGNED", message)
        }
        AssignmentError::NoReplacementCandidate { .. } => {
            error_response(StatusCode::CONFLICT, "NO_CANDIDATE", message)
        }
        AssignmentError::Storage { .. } => {
            error!("assignment failed: {}", message);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
        }
    }
}

fn storage_error_response(err: &StoreError) -> Response {
    error!("store operation failed: {}", err);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
    )
}

fn iso8601(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn user_json(user: &User) -> Value {
    json!({
        "user_id": user.id,
        "username": user.username,
        "team_name": user.team_name,
        "is_active": user.is_active,
    })
}

fn team_member_json(user: &User) -> Value {
    json!({
        "user_id": user.id,
        "username": user.username,
        "is_active": user.is_active,
    })
}

fn pr_json(pr: &PullRequest) -> Value {
    json!({
        "pull_request_id": pr.id,
        "pull_request_name": pr.name,
        "author_id": pr.author_id,
        "status": pr.status.as_str(),
        "created_at": iso8601(&pr.created_at),
        "merged_at": pr.merged_at.as_ref().map(iso8601),
        "assigned_reviewers": pr.reviewers,
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

#[derive(Debug, Deserialize)]
struct AddTeamRequest {
    team_name: TeamName,
    #[serde(default)]
    members: Vec<MemberInput>,
}

#[derive(Debug, Deserialize)]
struct MemberInput {
    user_id: UserId,
    username: String,
    is_active: bool,
}

async fn add_team(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddTeamRequest>,
) -> Response {
    let members = req
        .members
        .into_iter()
        .map(|m| User {
            id: m.user_id,
            username: m.username,
            team_name: req.team_name.clone(),
            is_active: m.is_active,
        })
        .collect();
    let team = Team {
        name: req.team_name,
        members,
    };

    let name = team.name.clone();
    match state.store.create_team(team).await {
        Ok(()) => {}
        Err(StoreError::TeamExists(_)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "TEAM_EXISTS",
                "team_name already exists",
            )
        }
        Err(e) => return storage_error_response(&e),
    }

    match state.store.get_team(&name).await {
        Ok(Some(created)) => (
            StatusCode::CREATED,
            Json(json!({
                "team": {
                    "team_name": created.name,
                    "members": created.members.iter().map(team_member_json).collect::<Vec<_>>(),
                }
            })),
        )
            .into_response(),
        Ok(None) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Failed to retrieve created team",
        ),
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct TeamQuery {
    team_name: TeamName,
}

async fn get_team(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TeamQuery>,
) -> Response {
    match state.store.get_team(&query.team_name).await {
        Ok(Some(team)) => Json(json!({
            "team_name": team.name,
            "members": team.members.iter().map(team_member_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Team not found"),
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    user_id: UserId,
    is_active: bool,
}

async fn set_is_active(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetActiveRequest>,
) -> Response {
    match state.store.set_user_active(&req.user_id, req.is_active).await {
        Ok(user) => Json(json!({ "user": user_json(&user) })).into_response(),
        Err(StoreError::UnknownUser(_)) => {
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "User not found")
        }
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: UserId,
}

async fn get_reviews(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Response {
    match state.store.get_user(&query.user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "User not found"),
        Err(e) => return storage_error_response(&e),
    }

    match state.store.prs_by_reviewer(&query.user_id).await {
        Ok(prs) => Json(json!({
            "user_id": query.user_id,
            "pull_requests": prs
                .iter()
                .map(|pr| json!({
                    "pull_request_id": pr.id,
                    "pull_request_name": pr.name,
                    "author_id": pr.author_id,
                    "status": pr.status.as_str(),
                }))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CreatePrRequest {
    pull_request_id: PullRequestId,
    pull_request_name: String,
    author_id: UserId,
}

async fn create_pull_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePrRequest>,
) -> Response {
    match state.store.get_pull_request(&req.pull_request_id).await {
        Ok(Some(_)) => {
            return error_response(StatusCode::CONFLICT, "PR_EXISTS", "PR id already exists")
        }
        Ok(None) => {}
        Err(e) => return storage_error_response(&e),
    }

    let author = match state.store.get_user(&req.author_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Author not found"),
        Err(e) => return storage_error_response(&e),
    };

    let reviewers = match state
        .engine
        .assign_reviewers(&req.author_id, &author.team_name)
        .await
    {
        Ok(reviewers) => reviewers,
        Err(e) => return assignment_error_response(e),
    };

    let mut pr = PullRequest::new(req.pull_request_id, req.pull_request_name, req.author_id);
    pr.reviewers = reviewers;

    match state.store.create_pull_request(pr.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "pr": pr_json(&pr) }))).into_response(),
        Err(StoreError::PullRequestExists(_)) => {
            error_response(StatusCode::CONFLICT, "PR_EXISTS", "PR id already exists")
        }
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    pull_request_id: PullRequestId,
}

async fn merge_pull_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> Response {
    // Merging an already-merged PR is a no-op that reports current state.
    match state.store.merge_pull_request(&req.pull_request_id).await {
        Ok(pr) => Json(json!({ "pr": pr_json(&pr) })).into_response(),
        Err(StoreError::UnknownPullRequest(_)) => {
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "PR not found")
        }
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ReassignRequest {
    pull_request_id: PullRequestId,
    old_user_id: UserId,
}

async fn reassign_reviewer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReassignRequest>,
) -> Response {
    // Snapshot the reviewer set before selecting a replacement; the
    // conditional commit below is keyed on this snapshot, so a
    // reassignment that interleaves between selection and commit makes
    // us report a conflict rather than double-replace.
    let pr = match state.store.get_pull_request(&req.pull_request_id).await {
        Ok(Some(pr)) => pr,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "PR not found"),
        Err(e) => return storage_error_response(&e),
    };

    let replacement = match state
        .engine
        .reassign_reviewer(&req.pull_request_id, &req.old_user_id)
        .await
    {
        Ok(id) => id,
        Err(e) => return assignment_error_response(e),
    };

    let mut updated = pr.clone();
    if !updated.replace_reviewer(&req.old_user_id, replacement.clone()) {
        return error_response(
            StatusCode::CONFLICT,
            "STALE_REVIEWER_SET",
            "reviewer set changed concurrently",
        );
    }

    match state
        .store
        .replace_reviewer_set(&req.pull_request_id, &pr.reviewers, updated.reviewers)
        .await
    {
        Ok(committed) => Json(json!({
            "pr": pr_json(&committed),
            "replaced_by": replacement,
        }))
        .into_response(),
        Err(StoreError::StaleReviewerSet(_)) => error_response(
            StatusCode::CONFLICT,
            "STALE_REVIEWER_SET",
            "reviewer set changed concurrently",
        ),
        Err(StoreError::MergedPullRequest(_)) => {
            error_response(StatusCode::CONFLICT, "PR_MERGED", "PR is already merged")
        }
        Err(StoreError::UnknownPullRequest(_)) => {
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "PR not found")
        }
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct BulkDeactivateRequest {
    user_ids: Vec<UserId>,
    #[serde(default)]
    reassign_open_prs: bool,
}

async fn bulk_deactivate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkDeactivateRequest>,
) -> Response {
    let start = Instant::now();

    let report = match deactivate_users(
        &state.store,
        &state.engine,
        &req.user_ids,
        req.reassign_open_prs,
    )
    .await
    {
        Ok(report) => report,
        Err(StoreError::UnknownUser(id)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("User not found: {}", id),
            )
        }
        Err(e) => return storage_error_response(&e),
    };

    Json(json!({
        "status": "success",
        "deactivated_users": report.deactivated,
        "reassigned_reviews": report.reassigned,
        "failed_reassignments": report.failed_reassignments,
        "reassign_open_prs": req.reassign_open_prs,
        "processing_time_ms": start.elapsed().as_millis() as u64,
    }))
    .into_response()
}
