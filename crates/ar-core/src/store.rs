use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::types::{ActivityEntry, ActivityKind, Issue, IssueSignals, IssueState, Project};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The single error value every store operation returns.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict: concurrent update won")]
    Conflict,
    #[error("store error: {0}")]
    Internal(String),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        StoreError::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a unique-constraint violation to `AlreadyExists`.
fn map_insert_err(e: tokio_rusqlite::Error) -> StoreError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _)) = &e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::AlreadyExists;
        }
    }
    StoreError::Internal(e.to_string())
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Optional narrowing for [`Store::list_issues`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueFilter {
    pub project_id: Option<Uuid>,
    pub state: Option<IssueState>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Async SQLite-backed store for projects, issues, and the activity log.
///
/// Every call is its own transaction; composite updates (issue + activity)
/// are two calls and are not globally atomic — the activity log is advisory.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS projects (
                        id                   TEXT PRIMARY KEY,
                        name                 TEXT NOT NULL UNIQUE,
                        local_path           TEXT NOT NULL,
                        tracker_team_id      TEXT NOT NULL,
                        tracker_assignee_id  TEXT NOT NULL,
                        host_owner           TEXT NOT NULL,
                        host_repo            TEXT NOT NULL,
                        default_branch       TEXT NOT NULL,
                        branch_prefix        TEXT NOT NULL,
                        max_build_iterations INTEGER NOT NULL,
                        credential_profile   TEXT NOT NULL,
                        created_at           TEXT NOT NULL,
                        updated_at           TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS issues (
                        id                 TEXT PRIMARY KEY,
                        project_id         TEXT NOT NULL,
                        external_id        TEXT NOT NULL,
                        identifier         TEXT NOT NULL,
                        title              TEXT NOT NULL,
                        description        TEXT NOT NULL DEFAULT '',
                        state              TEXT NOT NULL,
                        error_message      TEXT,
                        check_fix_attempts INTEGER NOT NULL DEFAULT 0,
                        last_review_id     TEXT,
                        last_check_sha     TEXT,
                        last_comment_id    TEXT,
                        workspace_name     TEXT NOT NULL DEFAULT '',
                        branch_name        TEXT NOT NULL DEFAULT '',
                        pr_number          INTEGER NOT NULL DEFAULT 0,
                        pr_url             TEXT,
                        plan_text          TEXT,
                        signals            TEXT NOT NULL DEFAULT '{}',
                        created_at         TEXT NOT NULL,
                        updated_at         TEXT NOT NULL,
                        UNIQUE(project_id, external_id)
                    );

                    CREATE INDEX IF NOT EXISTS idx_issues_state   ON issues(state);
                    CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);

                    CREATE TABLE IF NOT EXISTS activity (
                        id         INTEGER PRIMARY KEY AUTOINCREMENT,
                        issue_id   TEXT NOT NULL,
                        kind       TEXT NOT NULL,
                        from_state TEXT,
                        to_state   TEXT,
                        detail     TEXT NOT NULL DEFAULT '',
                        created_at TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_activity_issue ON activity(issue_id, id);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn create_project(&self, project: &Project) -> Result<()> {
        let p = project.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, local_path, tracker_team_id,
                        tracker_assignee_id, host_owner, host_repo, default_branch,
                        branch_prefix, max_build_iterations, credential_profile,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                    rusqlite::params![
                        p.id.to_string(),
                        p.name,
                        p.local_path,
                        p.tracker_team_id,
                        p.tracker_assignee_id,
                        p.host_owner,
                        p.host_repo,
                        p.default_branch,
                        p.branch_prefix,
                        p.max_build_iterations,
                        p.credential_profile,
                        p.created_at.to_rfc3339(),
                        p.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_insert_err)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project> {
        let id_str = id.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_project(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        found.ok_or(StoreError::NotFound)
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLS} FROM projects WHERE name = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_project(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn update_project(&self, project: &Project) -> Result<()> {
        let mut p = project.clone();
        p.updated_at = Utc::now();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE projects SET name=?2, local_path=?3, tracker_team_id=?4,
                        tracker_assignee_id=?5, host_owner=?6, host_repo=?7,
                        default_branch=?8, branch_prefix=?9, max_build_iterations=?10,
                        credential_profile=?11, updated_at=?12
                     WHERE id=?1",
                    rusqlite::params![
                        p.id.to_string(),
                        p.name,
                        p.local_path,
                        p.tracker_team_id,
                        p.tracker_assignee_id,
                        p.host_owner,
                        p.host_repo,
                        p.default_branch,
                        p.branch_prefix,
                        p.max_build_iterations,
                        p.credential_profile,
                        p.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLS} FROM projects ORDER BY name"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_project(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Issues
    // -----------------------------------------------------------------------

    /// Insert a new issue. Fails with `AlreadyExists` when the external id
    /// collides within the project.
    pub async fn create_issue(&self, issue: &Issue) -> Result<()> {
        let i = issue.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO issues ({ISSUE_COLS})
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)"
                    ),
                    rusqlite::params![
                        i.id.to_string(),
                        i.project_id.to_string(),
                        i.external_id,
                        i.identifier,
                        i.title,
                        i.description,
                        i.state.as_str(),
                        i.error_message,
                        i.check_fix_attempts,
                        i.last_review_id,
                        i.last_check_sha,
                        i.last_comment_id,
                        i.workspace_name,
                        i.branch_name,
                        i.pr_number as i64,
                        i.pr_url,
                        i.plan_text,
                        serde_json::to_string(&i.signals).expect("serialize signals"),
                        i.created_at.to_rfc3339(),
                        i.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_insert_err)
    }

    pub async fn get_issue(&self, id: Uuid) -> Result<Issue> {
        let id_str = id.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {ISSUE_COLS} FROM issues WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_issue(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        found.ok_or(StoreError::NotFound)
    }

    /// Full-row replace under optimistic semantics on `updated_at`.
    ///
    /// The caller's snapshot must still match the stored row; otherwise the
    /// update is lost and `Conflict` is returned. On success the stored issue
    /// (with its refreshed, strictly increasing `updated_at`) is returned.
    pub async fn update_issue(&self, issue: &Issue) -> Result<Issue> {
        let mut updated = issue.clone();
        let now = Utc::now();
        updated.updated_at = if now > issue.updated_at {
            now
        } else {
            // Wall clock did not move; keep updated_at strictly increasing.
            issue.updated_at + chrono::Duration::milliseconds(1)
        };

        let expected = issue.updated_at.to_rfc3339();
        let row = updated.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE issues SET
                        project_id=?2, external_id=?3, identifier=?4, title=?5,
                        description=?6, state=?7, error_message=?8,
                        check_fix_attempts=?9, last_review_id=?10, last_check_sha=?11,
                        last_comment_id=?12, workspace_name=?13, branch_name=?14,
                        pr_number=?15, pr_url=?16, plan_text=?17, signals=?18,
                        created_at=?19, updated_at=?20
                     WHERE id=?1 AND updated_at=?21",
                    rusqlite::params![
                        row.id.to_string(),
                        row.project_id.to_string(),
                        row.external_id,
                        row.identifier,
                        row.title,
                        row.description,
                        row.state.as_str(),
                        row.error_message,
                        row.check_fix_attempts,
                        row.last_review_id,
                        row.last_check_sha,
                        row.last_comment_id,
                        row.workspace_name,
                        row.branch_name,
                        row.pr_number as i64,
                        row.pr_url,
                        row.plan_text,
                        serde_json::to_string(&row.signals).expect("serialize signals"),
                        row.created_at.to_rfc3339(),
                        row.updated_at.to_rfc3339(),
                        expected,
                    ],
                )?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            // Distinguish a stale snapshot from a deleted row.
            return match self.get_issue(issue.id).await {
                Ok(_) => Err(StoreError::Conflict),
                Err(e) => Err(e),
            };
        }
        Ok(updated)
    }

    pub async fn delete_issue(&self, id: Uuid) -> Result<()> {
        let id_str = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                conn.execute("DELETE FROM activity WHERE issue_id = ?1", [&id_str])?;
                let n = conn.execute("DELETE FROM issues WHERE id = ?1", [&id_str])?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>> {
        self.conn
            .call(move |conn| {
                let mut sql = format!("SELECT {ISSUE_COLS} FROM issues");
                let mut clauses: Vec<&str> = Vec::new();
                let mut params: Vec<String> = Vec::new();
                if let Some(project_id) = filter.project_id {
                    clauses.push("project_id = ?");
                    params.push(project_id.to_string());
                }
                if let Some(state) = filter.state {
                    clauses.push("state = ?");
                    params.push(state.as_str().to_string());
                }
                if !clauses.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&clauses.join(" AND "));
                }
                sql.push_str(" ORDER BY id");

                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Every non-terminal issue, in deterministic (id) order. The set the
    /// orchestrator walks each tick.
    pub async fn list_open_issues(&self) -> Result<Vec<Issue>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ISSUE_COLS} FROM issues WHERE state != 'completed' ORDER BY id"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Issues persisted in a given state (recovery uses `building`).
    pub async fn list_issues_in_state(&self, state: IssueState) -> Result<Vec<Issue>> {
        self.list_issues(IssueFilter {
            project_id: None,
            state: Some(state),
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Activity log
    // -----------------------------------------------------------------------

    pub async fn log_activity(
        &self,
        issue_id: Uuid,
        kind: ActivityKind,
        from_state: Option<IssueState>,
        to_state: Option<IssueState>,
        detail: impl Into<String>,
    ) -> Result<ActivityEntry> {
        let entry = ActivityEntry {
            id: 0,
            issue_id,
            kind,
            from_state,
            to_state,
            detail: detail.into(),
            created_at: Utc::now(),
        };
        let e = entry.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO activity (issue_id, kind, from_state, to_state, detail, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![
                        e.issue_id.to_string(),
                        e.kind.as_str(),
                        e.from_state.map(|s| s.as_str()),
                        e.to_state.map(|s| s.as_str()),
                        e.detail,
                        e.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(ActivityEntry { id, ..entry })
    }

    pub async fn list_activity(
        &self,
        issue_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActivityEntry>> {
        self.query_activity(
            "SELECT {COLS} FROM activity WHERE issue_id = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            issue_id,
            limit,
            offset,
        )
        .await
    }

    /// Newest-first, restricted to `build_event` entries.
    pub async fn list_build_activity(
        &self,
        issue_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActivityEntry>> {
        self.query_activity(
            "SELECT {COLS} FROM activity WHERE issue_id = ?1 AND kind = 'build_event'
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            issue_id,
            limit,
            offset,
        )
        .await
    }

    /// Newest-first, everything except `build_event` entries.
    pub async fn list_timeline_activity(
        &self,
        issue_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActivityEntry>> {
        self.query_activity(
            "SELECT {COLS} FROM activity WHERE issue_id = ?1 AND kind != 'build_event'
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            issue_id,
            limit,
            offset,
        )
        .await
    }

    async fn query_activity(
        &self,
        template: &'static str,
        issue_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ActivityEntry>> {
        let sql = template.replace("{COLS}", ACTIVITY_COLS);
        let id_str = issue_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![id_str, limit, offset])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_activity(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Cross-issue tail of recent activity, newest first.
    pub async fn list_recent_activity(&self, limit: u32) -> Result<Vec<ActivityEntry>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ACTIVITY_COLS} FROM activity ORDER BY id DESC LIMIT ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_activity(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// The most recent `state_change` that entered `into`, if any.
    ///
    /// Resume and retry use this to restore the pre-pause / pre-failure state.
    pub async fn last_transition_into(
        &self,
        issue_id: Uuid,
        into: IssueState,
    ) -> Result<Option<ActivityEntry>> {
        let id_str = issue_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ACTIVITY_COLS} FROM activity
                     WHERE issue_id = ?1 AND kind = 'state_change' AND to_state = ?2
                     ORDER BY id DESC LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str, into.as_str()])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_activity(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// In-flight issue counts per project (everything except completed,
    /// failed, and paused).
    pub async fn count_active_issues_by_project(&self) -> Result<HashMap<Uuid, u64>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT project_id, COUNT(*) FROM issues
                     WHERE state NOT IN ('completed', 'failed', 'paused')
                     GROUP BY project_id",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = HashMap::new();
                while let Some(row) = rows.next()? {
                    let id_str: String = row.get(0)?;
                    let count: u64 = row.get(1)?;
                    out.insert(Uuid::parse_str(&id_str).expect("valid uuid"), count);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn count_issues_by_state_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<HashMap<IssueState, u64>> {
        let id_str = project_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT state, COUNT(*) FROM issues WHERE project_id = ?1 GROUP BY state",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                let mut out = HashMap::new();
                while let Some(row) = rows.next()? {
                    let state_str: String = row.get(0)?;
                    let count: u64 = row.get(1)?;
                    out.insert(parse_state_tag(&state_str), count);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Column lists + row mapping helpers
// ---------------------------------------------------------------------------

const PROJECT_COLS: &str = "id, name, local_path, tracker_team_id, tracker_assignee_id, \
     host_owner, host_repo, default_branch, branch_prefix, max_build_iterations, \
     credential_profile, created_at, updated_at";

const ISSUE_COLS: &str = "id, project_id, external_id, identifier, title, description, state, \
     error_message, check_fix_attempts, last_review_id, last_check_sha, last_comment_id, \
     workspace_name, branch_name, pr_number, pr_url, plan_text, signals, created_at, updated_at";

const ACTIVITY_COLS: &str = "id, issue_id, kind, from_state, to_state, detail, created_at";

fn parse_date(raw: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .expect("valid date")
        .with_timezone(&Utc)
}

// Only tags this store wrote can come back out of these columns.
fn parse_state_tag(raw: &str) -> IssueState {
    IssueState::parse(raw).expect("valid state tag")
}

fn parse_kind_tag(raw: &str) -> ActivityKind {
    ActivityKind::parse(raw).expect("valid activity tag")
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let id_str: String = row.get(0)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(Project {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        name: row.get(1)?,
        local_path: row.get(2)?,
        tracker_team_id: row.get(3)?,
        tracker_assignee_id: row.get(4)?,
        host_owner: row.get(5)?,
        host_repo: row.get(6)?,
        default_branch: row.get(7)?,
        branch_prefix: row.get(8)?,
        max_build_iterations: row.get(9)?,
        credential_profile: row.get(10)?,
        created_at: parse_date(&created_at),
        updated_at: parse_date(&updated_at),
    })
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let id_str: String = row.get(0)?;
    let project_id_str: String = row.get(1)?;
    let state_str: String = row.get(6)?;
    let pr_number: i64 = row.get(14)?;
    let signals_str: String = row.get(17)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(Issue {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_id_str).expect("valid uuid"),
        external_id: row.get(2)?,
        identifier: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        state: parse_state_tag(&state_str),
        error_message: row.get(7)?,
        check_fix_attempts: row.get(8)?,
        last_review_id: row.get(9)?,
        last_check_sha: row.get(10)?,
        last_comment_id: row.get(11)?,
        workspace_name: row.get(12)?,
        branch_name: row.get(13)?,
        pr_number: pr_number as u64,
        pr_url: row.get(15)?,
        plan_text: row.get(16)?,
        signals: serde_json::from_str::<IssueSignals>(&signals_str).expect("valid signals json"),
        created_at: parse_date(&created_at),
        updated_at: parse_date(&updated_at),
    })
}

fn row_to_activity(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let issue_id_str: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let from_state: Option<String> = row.get(3)?;
    let to_state: Option<String> = row.get(4)?;
    let created_at: String = row.get(6)?;

    Ok(ActivityEntry {
        id: row.get(0)?,
        issue_id: Uuid::parse_str(&issue_id_str).expect("valid uuid"),
        kind: parse_kind_tag(&kind_str),
        from_state: from_state.map(|s| parse_state_tag(&s)),
        to_state: to_state.map(|s| parse_state_tag(&s)),
        detail: row.get(5)?,
        created_at: parse_date(&created_at),
    })
}
