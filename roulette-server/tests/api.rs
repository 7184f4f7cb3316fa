//! End-to-end tests driving the HTTP API against the in-memory store.
//!
//! The deterministic selector makes exact selections assertable: it
//! always takes the pool prefix, and the in-memory store returns team
//! members in insertion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use roulette_core::{
    FixedSelector, PullRequest, PullRequestId, Team, TeamName, User, UserId,
};
use roulette_server::http;
use roulette_server::store::{DirectoryStore, InMemoryDirectory, StoreError};
use roulette_server::AppState;

fn app() -> Router {
    let state = Arc::new(AppState::new(
        Arc::new(InMemoryDirectory::new()),
        Arc::new(FixedSelector),
    ));
    http::router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn core_team_body() -> Value {
    json!({
        "team_name": "core",
        "members": [
            { "user_id": "alice", "username": "Alice", "is_active": true },
            { "user_id": "bob", "username": "Bob", "is_active": true },
            { "user_id": "carol", "username": "Carol", "is_active": true },
            { "user_id": "dave", "username": "Dave", "is_active": true },
        ]
    })
}

async fn create_core_team(app: &Router) {
    let (status, _) = send(app, "POST", "/team/add", Some(core_team_body())).await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn create_pr(app: &Router, id: &str, author: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/pullRequest/create",
        Some(json!({
            "pull_request_id": id,
            "pull_request_name": format!("PR {}", id),
            "author_id": author,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_team_add_and_get() {
    let app = app();
    create_core_team(&app).await;

    let (status, body) = send(&app, "GET", "/team/get?team_name=core", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["team_name"], "core");
    assert_eq!(body["members"].as_array().unwrap().len(), 4);

    let (status, body) = send(&app, "POST", "/team/add", Some(core_team_body())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "TEAM_EXISTS");

    let (status, body) = send(&app, "GET", "/team/get?team_name=ghosts", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_set_is_active() {
    let app = app();
    create_core_team(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/users/setIsActive",
        Some(json!({ "user_id": "bob", "is_active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["is_active"], false);

    let (status, body) = send(
        &app,
        "POST",
        "/users/setIsActive",
        Some(json!({ "user_id": "nobody", "is_active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_pr_assigns_two_reviewers() {
    let app = app();
    create_core_team(&app).await;

    let body = create_pr(&app, "pr-1", "alice").await;
    // FixedSelector takes the pool prefix: bob, carol.
    assert_eq!(body["pr"]["assigned_reviewers"], json!(["bob", "carol"]));
    assert_eq!(body["pr"]["status"], "OPEN");
    assert_eq!(body["pr"]["author_id"], "alice");

    // Duplicate id is a conflict.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/create",
        Some(json!({
            "pull_request_id": "pr-1",
            "pull_request_name": "Again",
            "author_id": "alice",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PR_EXISTS");

    // Unknown author is not found.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/create",
        Some(json!({
            "pull_request_id": "pr-2",
            "pull_request_name": "Ghost PR",
            "author_id": "nobody",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_reassign_swaps_in_place() {
    let app = app();
    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;

    // Reviewers are [bob, carol]; rotating bob out leaves dave as the
    // only candidate (alice authors, carol is already assigned).
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-1", "old_user_id": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replaced_by"], "dave");
    assert_eq!(body["pr"]["assigned_reviewers"], json!(["dave", "carol"]));

    // bob is gone now, so rotating him again is a conflict.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-1", "old_user_id": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NOT_ASSIGNED");
}

#[tokio::test]
async fn test_reassign_failure_modes() {
    let app = app();
    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-404", "old_user_id": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-1", "old_user_id": "nobody" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_merge_is_idempotent_and_freezes_reviewers() {
    let app = app();
    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/merge",
        Some(json!({ "pull_request_id": "pr-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pr"]["status"], "MERGED");
    let merged_at = body["pr"]["merged_at"].clone();
    assert!(merged_at.is_string());

    // Repeat merge: success, same timestamp.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/merge",
        Some(json!({ "pull_request_id": "pr-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pr"]["merged_at"], merged_at);

    // The merged-state check runs before any reviewer-membership check,
    // so even an unknown outgoing id reports PR_MERGED.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-1", "old_user_id": "nobody" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PR_MERGED");
}

/// Store wrapper that, once armed, commits a competing reviewer swap on
/// pr-1 the next time the candidate pool is listed, emulating a
/// reassignment that lands between this request's selection and its
/// commit.
struct RacingStore {
    inner: Arc<InMemoryDirectory>,
    armed: AtomicBool,
}

#[async_trait]
impl DirectoryStore for RacingStore {
    async fn create_team(&self, team: Team) -> Result<(), StoreError> {
        self.inner.create_team(team).await
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError> {
        self.inner.get_team(name).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }

    async fn set_user_active(&self, id: &UserId, active: bool) -> Result<User, StoreError> {
        self.inner.set_user_active(id, active).await
    }

    async fn active_team_members(
        &self,
        team_name: &TeamName,
        exclude: &UserId,
    ) -> Result<Vec<User>, StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            // The competing writer rotates carol out in favour of dave.
            self.inner
                .replace_reviewer_set(
                    &PullRequestId::from("pr-1"),
                    &[UserId::from("bob"), UserId::from("carol")],
                    vec![UserId::from("bob"), UserId::from("dave")],
                )
                .await?;
        }
        self.inner.active_team_members(team_name, exclude).await
    }

    async fn create_pull_request(&self, pr: PullRequest) -> Result<(), StoreError> {
        self.inner.create_pull_request(pr).await
    }

    async fn get_pull_request(
        &self,
        id: &PullRequestId,
    ) -> Result<Option<PullRequest>, StoreError> {
        self.inner.get_pull_request(id).await
    }

    async fn merge_pull_request(&self, id: &PullRequestId) -> Result<PullRequest, StoreError> {
        self.inner.merge_pull_request(id).await
    }

    async fn replace_reviewer_set(
        &self,
        id: &PullRequestId,
        expected: &[UserId],
        new_set: Vec<UserId>,
    ) -> Result<PullRequest, StoreError> {
        self.inner.replace_reviewer_set(id, expected, new_set).await
    }

    async fn prs_by_reviewer(&self, user_id: &UserId) -> Result<Vec<PullRequest>, StoreError> {
        self.inner.prs_by_reviewer(user_id).await
    }

    async fn open_prs_with_reviewer(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequest>, StoreError> {
        self.inner.open_prs_with_reviewer(user_id).await
    }

    async fn bulk_deactivate(&self, user_ids: &[UserId]) -> Result<(), StoreError> {
        self.inner.bulk_deactivate(user_ids).await
    }
}

#[tokio::test]
async fn test_reassign_lost_race_conflicts_without_duplicates() {
    let inner = Arc::new(InMemoryDirectory::new());
    let racing = Arc::new(RacingStore {
        inner: Arc::clone(&inner),
        armed: AtomicBool::new(false),
    });
    let state = Arc::new(AppState::new(racing.clone(), Arc::new(FixedSelector)));
    let app = http::router(state);

    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;
    racing.armed.store(true, Ordering::SeqCst);

    // Reviewers start as [bob, carol]. While this request is picking a
    // replacement for bob, the competing swap turns the set into
    // [bob, dave]. The commit is keyed on the pre-selection snapshot,
    // so this request must lose cleanly.
    let (status, body) = send(
        &app,
        "POST",
        "/pullRequest/reassign",
        Some(json!({ "pull_request_id": "pr-1", "old_user_id": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "STALE_REVIEWER_SET");

    // The competing writer's result stands; in particular the set never
    // ends up holding the same reviewer twice.
    let pr = inner
        .get_pull_request(&PullRequestId::from("pr-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pr.reviewers, vec![UserId::from("bob"), UserId::from("dave")]);
}

#[tokio::test]
async fn test_get_reviews_lists_assigned_prs() {
    let app = app();
    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;

    let (status, body) = send(&app, "GET", "/users/getReview?user_id=bob", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "bob");
    assert_eq!(body["pull_requests"].as_array().unwrap().len(), 1);
    assert_eq!(body["pull_requests"][0]["pull_request_id"], "pr-1");

    let (status, _) = send(&app, "GET", "/users/getReview?user_id=nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_deactivate_reassigns_and_reports() {
    let app = app();
    create_core_team(&app).await;
    create_pr(&app, "pr-1", "alice").await;

    // Reviewers are [bob, carol]; deactivating bob hands his review to
    // dave and marks him inactive.
    let (status, body) = send(
        &app,
        "POST",
        "/users/bulk-deactivate",
        Some(json!({ "user_ids": ["bob"], "reassign_open_prs": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["deactivated_users"], 1);
    assert_eq!(body["reassigned_reviews"], 1);
    assert_eq!(body["failed_reassignments"], 0);

    let (_, body) = send(&app, "GET", "/users/getReview?user_id=dave", None).await;
    assert_eq!(body["pull_requests"].as_array().unwrap().len(), 1);

    // Unknown users abort the whole batch.
    let (status, body) = send(
        &app,
        "POST",
        "/users/bulk-deactivate",
        Some(json!({ "user_ids": ["carol", "nobody"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (_, body) = send(&app, "GET", "/team/get?team_name=core", None).await;
    let carol = body["members"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["user_id"] == "carol")
        .unwrap();
    assert_eq!(carol["is_active"], true);
}
