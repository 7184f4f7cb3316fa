//! SQLite implementation of `DirectoryStore`.
//!
//! Persistent storage for the running service. Synchronous rusqlite
//! calls run under `tokio::task::spawn_blocking` so they never block the
//! async runtime; the connection sits behind a `Mutex` because
//! `rusqlite::Connection` is not `Sync`.
//!
//! # Schema versioning
//!
//! A `schema_version` table tracks the schema version. When the schema
//! changes, increment `CURRENT_SCHEMA_VERSION` and add a migration in
//! `run_migrations()`; migrations run sequentially from the stored
//! version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use roulette_core::{PrStatus, PullRequest, PullRequestId, Team, TeamName, User, UserId};

use super::{DirectoryStore, StoreError};

/// Current schema version. Increment when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed directory store.
pub struct SqliteDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDirectory {
    /// Open (or create) the database at the given path and run any
    /// pending migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?;

        if current > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "check schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    current, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if current < CURRENT_SCHEMA_VERSION {
            Self::run_migrations(conn, current)?;
            conn.execute("DELETE FROM schema_version", [])
                .map_err(|e| StoreError::storage("reset schema version", e.to_string()))?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![CURRENT_SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::storage("record schema version", e.to_string()))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }

        // Future migrations go here:
        // if from_version < 2 { Self::migrate_v1_to_v2(conn)?; }

        Ok(())
    }

    /// Migration v0 -> v1: initial schema.
    fn migrate_v0_to_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                team_name TEXT NOT NULL REFERENCES teams(name),
                is_active INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pull_requests (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                author_id TEXT NOT NULL REFERENCES users(id),
                status TEXT NOT NULL CHECK(status IN ('OPEN', 'MERGED')),
                created_at TEXT NOT NULL,
                merged_at TEXT
            );

            -- Reviewer set, ordered by position so reassignment can
            -- replace an entry in place.
            CREATE TABLE IF NOT EXISTS pr_reviewers (
                pr_id TEXT NOT NULL REFERENCES pull_requests(id),
                reviewer_id TEXT NOT NULL REFERENCES users(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (pr_id, reviewer_id)
            );

            CREATE INDEX IF NOT EXISTS idx_pr_reviewers_reviewer
            ON pr_reviewers(reviewer_id);
            "#,
        )
        .map_err(|e| StoreError::storage("create initial schema (v0 -> v1)", e.to_string()))?;

        Ok(())
    }

    /// Run a blocking closure against the connection on the blocking
    /// thread pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("mutex poisoned");
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::storage(op, e.to_string()))?
    }
}

fn storage(op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::storage(op, e.to_string())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        team_name: TeamName(row.get(2)?),
        is_active: row.get::<_, i64>(3)? != 0,
    })
}

fn parse_timestamp(op: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::storage(op, format!("bad timestamp {:?}: {}", raw, e)))
}

/// Load a full pull request (including its ordered reviewer set).
fn load_pr(
    conn: &Connection,
    op: &'static str,
    id: &PullRequestId,
) -> Result<Option<PullRequest>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, name, author_id, status, created_at, merged_at
             FROM pull_requests WHERE id = ?1",
            params![id.0],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()
        .map_err(storage(op))?;

    let Some((id, name, author_id, status, created_at, merged_at)) = row else {
        return Ok(None);
    };

    let status = match status.as_str() {
        "OPEN" => PrStatus::Open,
        "MERGED" => PrStatus::Merged,
        other => {
            return Err(StoreError::storage(
                op,
                format!("unexpected status {:?} for PR {}", other, id),
            ))
        }
    };

    let reviewers = load_reviewers(conn, op, &id)?;

    Ok(Some(PullRequest {
        id: PullRequestId(id),
        name,
        author_id: UserId(author_id),
        status,
        created_at: parse_timestamp(op, &created_at)?,
        merged_at: merged_at
            .as_deref()
            .map(|raw| parse_timestamp(op, raw))
            .transpose()?,
        reviewers,
    }))
}

fn load_reviewers(
    conn: &Connection,
    op: &'static str,
    pr_id: &str,
) -> Result<Vec<UserId>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT reviewer_id FROM pr_reviewers WHERE pr_id = ?1 ORDER BY position")
        .map_err(storage(op))?;
    let ids = stmt
        .query_map(params![pr_id], |row| row.get::<_, String>(0))
        .map_err(storage(op))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(storage(op))?;
    Ok(ids.into_iter().map(UserId).collect())
}

fn insert_reviewers(
    conn: &Connection,
    op: &'static str,
    pr_id: &str,
    reviewers: &[UserId],
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare("INSERT INTO pr_reviewers (pr_id, reviewer_id, position) VALUES (?1, ?2, ?3)")
        .map_err(storage(op))?;
    for (position, reviewer) in reviewers.iter().enumerate() {
        stmt.execute(params![pr_id, reviewer.0, position as i64])
            .map_err(storage(op))?;
    }
    Ok(())
}

#[async_trait]
impl DirectoryStore for SqliteDirectory {
    async fn create_team(&self, team: Team) -> Result<(), StoreError> {
        const OP: &str = "create team";
        self.with_conn(OP, move |conn| {
            let tx = conn.transaction().map_err(storage(OP))?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM teams WHERE name = ?1",
                    params![team.name.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage(OP))?;
            if exists.is_some() {
                return Err(StoreError::TeamExists(team.name));
            }

            tx.execute("INSERT INTO teams (name) VALUES (?1)", params![team.name.0])
                .map_err(storage(OP))?;
            for member in &team.members {
                tx.execute(
                    "INSERT INTO users (id, username, team_name, is_active)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        member.id.0,
                        member.username,
                        member.team_name.0,
                        member.is_active as i64
                    ],
                )
                .map_err(storage(OP))?;
            }

            tx.commit().map_err(storage(OP))
        })
        .await
    }

    async fn get_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError> {
        const OP: &str = "get team";
        let name = name.clone();
        self.with_conn(OP, move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM teams WHERE name = ?1",
                    params![name.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage(OP))?;
            if exists.is_none() {
                return Ok(None);
            }

            let mut stmt = conn
                .prepare(
                    "SELECT id, username, team_name, is_active
                     FROM users WHERE team_name = ?1 ORDER BY rowid",
                )
                .map_err(storage(OP))?;
            let members = stmt
                .query_map(params![name.0], row_to_user)
                .map_err(storage(OP))?
                .collect::<rusqlite::Result<Vec<User>>>()
                .map_err(storage(OP))?;

            Ok(Some(Team { name, members }))
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        const OP: &str = "get user";
        let id = id.clone();
        self.with_conn(OP, move |conn| {
            conn.query_row(
                "SELECT id, username, team_name, is_active FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .optional()
            .map_err(storage(OP))
        })
        .await
    }

    async fn set_user_active(&self, id: &UserId, active: bool) -> Result<User, StoreError> {
        const OP: &str = "set user activity";
        let id = id.clone();
        self.with_conn(OP, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET is_active = ?1 WHERE id = ?2",
                    params![active as i64, id.0],
                )
                .map_err(storage(OP))?;
            if changed == 0 {
                return Err(StoreError::UnknownUser(id));
            }
            conn.query_row(
                "SELECT id, username, team_name, is_active FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .map_err(storage(OP))
        })
        .await
    }

    async fn active_team_members(
        &self,
        team_name: &TeamName,
        exclude: &UserId,
    ) -> Result<Vec<User>, StoreError> {
        const OP: &str = "list active team members";
        let team_name = team_name.clone();
        let exclude = exclude.clone();
        self.with_conn(OP, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, username, team_name, is_active FROM users
                     WHERE team_name = ?1 AND is_active = 1 AND id <> ?2
                     ORDER BY rowid",
                )
                .map_err(storage(OP))?;
            let members = stmt
                .query_map(params![team_name.0, exclude.0], row_to_user)
                .map_err(storage(OP))?
                .collect::<rusqlite::Result<Vec<User>>>()
                .map_err(storage(OP))?;
            Ok(members)
        })
        .await
    }

    async fn create_pull_request(&self, pr: PullRequest) -> Result<(), StoreError> {
        const OP: &str = "create pull request";
        self.with_conn(OP, move |conn| {
            let tx = conn.transaction().map_err(storage(OP))?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM pull_requests WHERE id = ?1",
                    params![pr.id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage(OP))?;
            if exists.is_some() {
                return Err(StoreError::PullRequestExists(pr.id));
            }

            tx.execute(
                "INSERT INTO pull_requests (id, name, author_id, status, created_at, merged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    pr.id.0,
                    pr.name,
                    pr.author_id.0,
                    pr.status.as_str(),
                    pr.created_at.to_rfc3339(),
                    pr.merged_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(storage(OP))?;
            insert_reviewers(&tx, OP, &pr.id.0, &pr.reviewers)?;

            tx.commit().map_err(storage(OP))
        })
        .await
    }

    async fn get_pull_request(
        &self,
        id: &PullRequestId,
    ) -> Result<Option<PullRequest>, StoreError> {
        const OP: &str = "get pull request";
        let id = id.clone();
        self.with_conn(OP, move |conn| load_pr(conn, OP, &id)).await
    }

    async fn merge_pull_request(&self, id: &PullRequestId) -> Result<PullRequest, StoreError> {
        const OP: &str = "merge pull request";
        let id = id.clone();
        self.with_conn(OP, move |conn| {
            let tx = conn.transaction().map_err(storage(OP))?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM pull_requests WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage(OP))?;
            match status.as_deref() {
                None => return Err(StoreError::UnknownPullRequest(id)),
                Some("MERGED") => {
                    // Repeat merge: leave the original timestamp alone.
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE pull_requests SET status = 'MERGED', merged_at = ?1
                         WHERE id = ?2",
                        params![Utc::now().to_rfc3339(), id.0],
                    )
                    .map_err(storage(OP))?;
                }
            }

            let pr = load_pr(&tx, OP, &id)?.ok_or(StoreError::UnknownPullRequest(id))?;
            tx.commit().map_err(storage(OP))?;
            Ok(pr)
        })
        .await
    }

    async fn replace_reviewer_set(
        &self,
        id: &PullRequestId,
        expected: &[UserId],
        new_set: Vec<UserId>,
    ) -> Result<PullRequest, StoreError> {
        const OP: &str = "replace reviewer set";
        if super::has_duplicate_ids(&new_set) {
            return Err(StoreError::storage(
                OP,
                format!("duplicate reviewer id in new set for {}", id),
            ));
        }

        let id = id.clone();
        let expected = expected.to_vec();
        self.with_conn(OP, move |conn| {
            let tx = conn.transaction().map_err(storage(OP))?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM pull_requests WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage(OP))?;
            match status.as_deref() {
                None => return Err(StoreError::UnknownPullRequest(id)),
                // Merged is terminal; the reviewer set is frozen even if
                // the caller's expectation still matches.
                Some("MERGED") => return Err(StoreError::MergedPullRequest(id)),
                Some(_) => {}
            }

            // Conditional update: only the writer whose expectation still
            // matches the stored set may commit.
            let current = load_reviewers(&tx, OP, &id.0)?;
            if current != expected {
                return Err(StoreError::StaleReviewerSet(id));
            }

            tx.execute("DELETE FROM pr_reviewers WHERE pr_id = ?1", params![id.0])
                .map_err(storage(OP))?;
            insert_reviewers(&tx, OP, &id.0, &new_set)?;

            let pr = load_pr(&tx, OP, &id)?.ok_or(StoreError::UnknownPullRequest(id))?;
            tx.commit().map_err(storage(OP))?;
            Ok(pr)
        })
        .await
    }

    async fn prs_by_reviewer(&self, user_id: &UserId) -> Result<Vec<PullRequest>, StoreError> {
        const OP: &str = "list PRs by reviewer";
        let user_id = user_id.clone();
        self.with_conn(OP, move |conn| {
            prs_for_reviewer(conn, OP, &user_id, false)
        })
        .await
    }

    async fn open_prs_with_reviewer(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PullRequest>, StoreError> {
        const OP: &str = "list open PRs by reviewer";
        let user_id = user_id.clone();
        self.with_conn(OP, move |conn| {
            prs_for_reviewer(conn, OP, &user_id, true)
        })
        .await
    }

    async fn bulk_deactivate(&self, user_ids: &[UserId]) -> Result<(), StoreError> {
        const OP: &str = "bulk deactivate users";
        let user_ids = user_ids.to_vec();
        self.with_conn(OP, move |conn| {
            let tx = conn.transaction().map_err(storage(OP))?;

            // All-or-nothing: bail before any update if an id is unknown.
            for id in &user_ids {
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM users WHERE id = ?1",
                        params![id.0],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(storage(OP))?;
                if exists.is_none() {
                    return Err(StoreError::UnknownUser(id.clone()));
                }
            }

            for id in &user_ids {
                tx.execute(
                    "UPDATE users SET is_active = 0 WHERE id = ?1",
                    params![id.0],
                )
                .map_err(storage(OP))?;
            }

            tx.commit().map_err(storage(OP))
        })
        .await
    }
}

fn prs_for_reviewer(
    conn: &Connection,
    op: &'static str,
    user_id: &UserId,
    open_only: bool,
) -> Result<Vec<PullRequest>, StoreError> {
    let sql = if open_only {
        "SELECT p.id FROM pull_requests p
         JOIN pr_reviewers r ON r.pr_id = p.id
         WHERE r.reviewer_id = ?1 AND p.status = 'OPEN'
         ORDER BY p.created_at"
    } else {
        "SELECT p.id FROM pull_requests p
         JOIN pr_reviewers r ON r.pr_id = p.id
         WHERE r.reviewer_id = ?1
         ORDER BY p.created_at"
    };

    let mut stmt = conn.prepare(sql).map_err(storage(op))?;
    let ids = stmt
        .query_map(params![user_id.0], |row| row.get::<_, String>(0))
        .map_err(storage(op))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(storage(op))?;

    let mut prs = Vec::with_capacity(ids.len());
    for id in ids {
        let pr_id = PullRequestId(id);
        if let Some(pr) = load_pr(conn, op, &pr_id)? {
            prs.push(pr);
        }
    }
    Ok(prs)
}
