//! CRUD, bug management, and execution telemetry for the tool catalog.
//!
//! [`ToolStore`] is the async surface used by the agent and the web layer.
//! [`SyncCatalog`] exposes the subset of operations the sandbox needs while
//! already running on the blocking pool (chained tool resolution and
//! telemetry recording). Both views share the same row-level helpers so a
//! mutation is one transaction regardless of the entry point.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{Database, SyncHandle};
use crate::error::{StoreError, StoreResult};
use crate::search::{SearchConfig, SearchHit, rank};
use crate::tool::{BUG_LOG_CAP, BugReport, NewTool, Tool, ToolPatch};

/// Default failure count at which a tool is considered bugged.
pub const DEFAULT_BUG_THRESHOLD: i64 = 3;

/// Filter options for [`ToolStore::list`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub active_only: bool,
    pub exclude_bugged: bool,
    pub category: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            active_only: true,
            exclude_bugged: true,
            category: None,
        }
    }
}

/// The durable tool catalog.
#[derive(Clone)]
pub struct ToolStore {
    db: Database,
    bug_threshold: i64,
    search: SearchConfig,
}

impl ToolStore {
    /// Create a store over `db` with default bug threshold and search config.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            bug_threshold: DEFAULT_BUG_THRESHOLD,
            search: SearchConfig::default(),
        }
    }

    /// Override the bug threshold.
    pub fn with_bug_threshold(mut self, threshold: i64) -> Self {
        self.bug_threshold = threshold.max(1);
        self
    }

    /// Override the search configuration (weights, synonyms, threshold).
    pub fn with_search_config(mut self, config: SearchConfig) -> Self {
        self.search = config;
        self
    }

    /// The default score cutoff used when a search caller passes no threshold.
    pub fn search_threshold(&self) -> f64 {
        self.search.threshold
    }

    /// Return a synchronous catalog view for blocking-pool callers.
    pub fn sync_catalog(&self) -> SyncCatalog {
        SyncCatalog {
            handle: self.db.sync_handle(),
            bug_threshold: self.bug_threshold,
        }
    }

    // ── CRUD ─────────────────────────────────────────────────────────

    /// Register a new tool. Fails with [`StoreError::NameConflict`] if the
    /// name is taken and [`StoreError::Validation`] on an invalid spec.
    #[instrument(skip(self, spec), fields(tool_name = %spec.name))]
    pub async fn create(&self, spec: NewTool) -> StoreResult<Tool> {
        spec.validate()?;

        let now = Utc::now().timestamp();
        let tool = Tool {
            id: Uuid::now_v7().to_string(),
            name: spec.name,
            description: spec.description,
            category: spec.category,
            tags: spec.tags,
            parameters: spec.parameters,
            return_schema: spec.return_schema,
            code: spec.code,
            is_active: true,
            is_bugged: false,
            bug_count: 0,
            bug_log: Vec::new(),
            execution_count: 0,
            last_executed_at: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        };

        let insert = tool.clone();
        self.db
            .execute(move |conn| {
                let tags = serde_json::to_string(&insert.tags)?;
                let params = serde_json::to_string(&insert.parameters)?;
                let return_schema = insert
                    .return_schema
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let result = conn.execute(
                    "INSERT INTO tools (id, name, description, category, tags, parameters, \
                     return_schema, code, is_active, is_bugged, bug_count, bug_log, \
                     execution_count, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 0, 0, '[]', 0, ?9, ?9)",
                    rusqlite::params![
                        insert.id,
                        insert.name,
                        insert.description,
                        insert.category,
                        tags,
                        params,
                        return_schema,
                        insert.code,
                        insert.created_at,
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::NameConflict(insert.name.clone()))
                    }
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await?;

        debug!(tool_id = %tool.id, "tool created");
        Ok(tool)
    }

    /// Fetch a tool by its opaque id.
    pub async fn get_by_id(&self, id: &str) -> StoreResult<Tool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                fetch_by_id(conn, &id)?.ok_or(StoreError::NotFound(id))
            })
            .await
    }

    /// Fetch a tool by its unique name.
    pub async fn get_by_name(&self, name: &str) -> StoreResult<Tool> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                fetch_by_name(conn, &name)?.ok_or(StoreError::NotFound(name))
            })
            .await
    }

    /// List tools, newest-updated first, ties broken by name ascending.
    #[instrument(skip(self))]
    pub async fn list(&self, opts: ListOptions) -> StoreResult<Vec<Tool>> {
        self.db
            .execute(move |conn| {
                let mut sql = format!("SELECT {COLUMNS} FROM tools WHERE 1=1");
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if opts.active_only {
                    sql.push_str(" AND is_active = 1");
                }
                if opts.exclude_bugged {
                    sql.push_str(" AND is_bugged = 0");
                }
                if let Some(cat) = opts.category {
                    sql.push_str(" AND category = ?1");
                    params.push(Box::new(cat));
                }
                sql.push_str(" ORDER BY updated_at DESC, name ASC");

                let mut stmt = conn.prepare(&sql)?;
                let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
                let rows = stmt
                    .query_map(refs.as_slice(), map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RowData::into_tool).collect()
            })
            .await
    }

    /// Apply a partial update. Bumps `updated_at` whenever anything changes.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: ToolPatch) -> StoreResult<Tool> {
        patch.validate()?;
        let id = id.to_string();

        self.db
            .execute(move |conn| {
                let mut tool = fetch_by_id(conn, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;

                if let Some(name) = patch.name {
                    if name != tool.name {
                        let taken: Option<String> = conn
                            .query_row(
                                "SELECT id FROM tools WHERE name = ?1 AND id != ?2",
                                rusqlite::params![name, id],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if taken.is_some() {
                            return Err(StoreError::NameConflict(name));
                        }
                    }
                    tool.name = name;
                }
                if let Some(description) = patch.description {
                    tool.description = description;
                }
                if let Some(category) = patch.category {
                    tool.category = category;
                }
                if let Some(tags) = patch.tags {
                    tool.tags = tags;
                }
                if let Some(parameters) = patch.parameters {
                    tool.parameters = parameters;
                }
                if let Some(return_schema) = patch.return_schema {
                    tool.return_schema = return_schema;
                }
                if let Some(code) = patch.code {
                    tool.code = code;
                }
                if let Some(is_active) = patch.is_active {
                    tool.is_active = is_active;
                }
                tool.updated_at = Utc::now().timestamp();

                let tags = serde_json::to_string(&tool.tags)?;
                let params = serde_json::to_string(&tool.parameters)?;
                let return_schema = tool
                    .return_schema
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                conn.execute(
                    "UPDATE tools SET name = ?2, description = ?3, category = ?4, tags = ?5, \
                     parameters = ?6, return_schema = ?7, code = ?8, is_active = ?9, \
                     updated_at = ?10 WHERE id = ?1",
                    rusqlite::params![
                        tool.id,
                        tool.name,
                        tool.description,
                        tool.category,
                        tags,
                        params,
                        return_schema,
                        tool.code,
                        tool.is_active,
                        tool.updated_at,
                    ],
                )?;

                Ok(tool)
            })
            .await
    }

    /// Delete a tool. Idempotent: a missing id is a success.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let removed = conn.execute("DELETE FROM tools WHERE id = ?1", rusqlite::params![id])?;
                debug!(tool_id = %id, removed, "tool delete");
                Ok(())
            })
            .await
    }

    /// Mark a tool inactive. Idempotent.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: &str) -> StoreResult<Tool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let now = Utc::now().timestamp();
                let changed = conn.execute(
                    "UPDATE tools SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
                    rusqlite::params![id, now],
                )?;
                debug!(tool_id = %id, changed, "tool deactivated");
                fetch_by_id(conn, &id)?.ok_or(StoreError::NotFound(id))
            })
            .await
    }

    // ── bug management ───────────────────────────────────────────────

    /// Record a failure against a tool: appends to the bounded bug log,
    /// increments `bug_count`, stamps `last_error_at`, and flips
    /// `is_bugged` once the threshold is crossed.
    #[instrument(skip(self, message, stack))]
    pub async fn report_bug(
        &self,
        id: &str,
        error_kind: &str,
        message: &str,
        stack: &str,
    ) -> StoreResult<Tool> {
        let id = id.to_string();
        let report = BugReport {
            ts: Utc::now().timestamp(),
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            stack: stack.to_string(),
        };
        let threshold = self.bug_threshold;
        self.db
            .execute(move |conn| apply_bug_report(conn, threshold, &id, report))
            .await
    }

    /// Reset a tool's bug state: zero count, empty log, not bugged.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn clear_bugs(&self, id: &str) -> StoreResult<Tool> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let now = Utc::now().timestamp();
                conn.execute(
                    "UPDATE tools SET bug_count = 0, bug_log = '[]', is_bugged = 0, updated_at = ?2 \
                     WHERE id = ?1",
                    rusqlite::params![id, now],
                )?;
                fetch_by_id(conn, &id)?.ok_or(StoreError::NotFound(id))
            })
            .await
    }

    /// List all tools currently flagged as bugged.
    pub async fn list_bugged(&self) -> StoreResult<Vec<Tool>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM tools WHERE is_bugged = 1 ORDER BY updated_at DESC, name ASC"
                ))?;
                let rows = stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RowData::into_tool).collect()
            })
            .await
    }

    // ── telemetry ────────────────────────────────────────────────────

    /// Record one successful execution: increments `execution_count` and
    /// stamps `last_executed_at`, in a single transaction.
    pub async fn record_success(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db.execute(move |conn| apply_success(conn, &id)).await
    }

    /// Record one failed execution: telemetry plus a bug report, in a single
    /// transaction.
    pub async fn record_failure(
        &self,
        id: &str,
        error_kind: &str,
        message: &str,
        stack: &str,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let report = BugReport {
            ts: Utc::now().timestamp(),
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            stack: stack.to_string(),
        };
        let threshold = self.bug_threshold;
        self.db
            .execute(move |conn| apply_failure(conn, threshold, &id, report).map(|_| ()))
            .await
    }

    // ── search ───────────────────────────────────────────────────────

    /// Multi-signal semantic search over the catalog.
    ///
    /// Candidates are read in one connection access and scored in memory;
    /// results below `threshold` are dropped, ordered by score descending
    /// with ties broken by `execution_count` then `updated_at`.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
        exclude_bugged: bool,
    ) -> StoreResult<Vec<SearchHit>> {
        let candidates = self
            .db
            .execute(move |conn| {
                let mut sql = format!("SELECT {COLUMNS} FROM tools WHERE is_active = 1");
                if exclude_bugged {
                    sql.push_str(" AND is_bugged = 0");
                }
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RowData::into_tool).collect::<StoreResult<Vec<_>>>()
            })
            .await?;

        let threshold = threshold.unwrap_or(self.search.threshold);
        let hits = rank(query, &candidates, &self.search, threshold, limit);
        debug!(query, hits = hits.len(), "search completed");
        Ok(hits)
    }
}

// ── synchronous view ─────────────────────────────────────────────────

/// Blocking-pool view of the catalog used by the sandbox for chained tool
/// resolution and execution accounting.
#[derive(Clone)]
pub struct SyncCatalog {
    handle: SyncHandle,
    bug_threshold: i64,
}

impl SyncCatalog {
    /// Resolve a tool by name or id.
    pub fn get(&self, name_or_id: &str) -> StoreResult<Tool> {
        let key = name_or_id.to_string();
        self.handle.with_conn(|conn| {
            if let Some(tool) = fetch_by_name(conn, &key)? {
                return Ok(tool);
            }
            fetch_by_id(conn, &key)?.ok_or(StoreError::NotFound(key))
        })
    }

    /// Record one successful execution.
    pub fn record_success(&self, id: &str) -> StoreResult<()> {
        self.handle.with_conn(|conn| apply_success(conn, id))
    }

    /// Record one failed execution (telemetry plus bug report).
    pub fn record_failure(
        &self,
        id: &str,
        error_kind: &str,
        message: &str,
        stack: &str,
    ) -> StoreResult<()> {
        let report = BugReport {
            ts: Utc::now().timestamp(),
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            stack: stack.to_string(),
        };
        self.handle
            .with_conn(|conn| apply_failure(conn, self.bug_threshold, id, report).map(|_| ()))
    }
}

// ── row helpers ──────────────────────────────────────────────────────

const COLUMNS: &str = "id, name, description, category, tags, parameters, return_schema, code, \
                       is_active, is_bugged, bug_count, bug_log, execution_count, \
                       last_executed_at, last_error_at, created_at, updated_at";

/// Raw row as stored, with JSON columns still serialized.
struct RowData {
    id: String,
    name: String,
    description: String,
    category: Option<String>,
    tags: String,
    parameters: String,
    return_schema: Option<String>,
    code: String,
    is_active: bool,
    is_bugged: bool,
    bug_count: i64,
    bug_log: String,
    execution_count: i64,
    last_executed_at: Option<i64>,
    last_error_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RowData {
    fn into_tool(self) -> StoreResult<Tool> {
        Ok(Tool {
            id: self.id,
            name: self.name,
            description: self.description,
            category: self.category,
            tags: serde_json::from_str(&self.tags)?,
            parameters: serde_json::from_str(&self.parameters)?,
            return_schema: self
                .return_schema
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            code: self.code,
            is_active: self.is_active,
            is_bugged: self.is_bugged,
            bug_count: self.bug_count,
            bug_log: serde_json::from_str(&self.bug_log)?,
            execution_count: self.execution_count,
            last_executed_at: self.last_executed_at,
            last_error_at: self.last_error_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowData> {
    Ok(RowData {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        tags: row.get(4)?,
        parameters: row.get(5)?,
        return_schema: row.get(6)?,
        code: row.get(7)?,
        is_active: row.get(8)?,
        is_bugged: row.get(9)?,
        bug_count: row.get(10)?,
        bug_log: row.get(11)?,
        execution_count: row.get(12)?,
        last_executed_at: row.get(13)?,
        last_error_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn fetch_by_id(conn: &Connection, id: &str) -> StoreResult<Option<Tool>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tools WHERE id = ?1"),
            rusqlite::params![id],
            map_row,
        )
        .optional()?;
    row.map(RowData::into_tool).transpose()
}

fn fetch_by_name(conn: &Connection, name: &str) -> StoreResult<Option<Tool>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tools WHERE name = ?1"),
            rusqlite::params![name],
            map_row,
        )
        .optional()?;
    row.map(RowData::into_tool).transpose()
}

fn apply_success(conn: &Connection, id: &str) -> StoreResult<()> {
    let now = Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE tools SET execution_count = execution_count + 1, last_executed_at = ?2 \
         WHERE id = ?1",
        rusqlite::params![id, now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

fn apply_bug_report(
    conn: &Connection,
    threshold: i64,
    id: &str,
    report: BugReport,
) -> StoreResult<Tool> {
    let tool = fetch_by_id(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let mut log = tool.bug_log;
    log.push(report.clone());
    if log.len() > BUG_LOG_CAP {
        let excess = log.len() - BUG_LOG_CAP;
        log.drain(..excess);
    }
    let bug_count = tool.bug_count + 1;
    let is_bugged = bug_count >= threshold;
    let log_json = serde_json::to_string(&log)?;
    let now = Utc::now().timestamp();

    conn.execute(
        "UPDATE tools SET bug_count = ?2, bug_log = ?3, is_bugged = ?4, last_error_at = ?5, \
         updated_at = ?6 WHERE id = ?1",
        rusqlite::params![id, bug_count, log_json, is_bugged, report.ts, now],
    )?;

    fetch_by_id(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn apply_failure(
    conn: &Connection,
    threshold: i64,
    id: &str,
    report: BugReport,
) -> StoreResult<Tool> {
    apply_success(conn, id)?;
    apply_bug_report(conn, threshold, id, report)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParamKind, ToolParam};

    async fn store() -> ToolStore {
        let db = Database::open_in_memory_and_migrate().await.unwrap();
        ToolStore::new(db)
    }

    fn spec(name: &str) -> NewTool {
        NewTool {
            name: name.into(),
            description: format!("the {name} tool"),
            category: Some("math".into()),
            tags: vec!["test".into()],
            parameters: vec![ToolParam {
                name: "a".into(),
                kind: ParamKind::Number,
                required: true,
                description: "first operand".into(),
            }],
            return_schema: Some(serde_json::json!({"type": "number"})),
            code: "function run(args) return args.a end".into(),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();

        let by_id = store.get_by_id(&created.id).await.unwrap();
        let by_name = store.get_by_name("add").await.unwrap();
        assert_eq!(by_id.id, by_name.id);
        assert_eq!(by_id.parameters.len(), 1);
        assert_eq!(by_id.parameters[0].kind, ParamKind::Number);
        assert_eq!(by_id.return_schema, Some(serde_json::json!({"type": "number"})));
        assert!(by_id.is_active);
        assert!(!by_id.is_bugged);
    }

    #[tokio::test]
    async fn create_duplicate_name_conflicts() {
        let store = store().await;
        store.create(spec("add")).await.unwrap();
        let err = store.create(spec("add")).await.unwrap_err();
        assert!(matches!(err, StoreError::NameConflict(_)));
    }

    #[tokio::test]
    async fn update_noop_preserves_record() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();
        let updated = store.update(&created.id, ToolPatch::default()).await.unwrap();

        assert_eq!(updated.name, created.name);
        assert_eq!(updated.code, created.code);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn update_can_set_and_clear_return_schema() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();
        assert!(created.return_schema.is_some());

        // Explicit null clears the schema.
        let patch: ToolPatch = serde_json::from_str(r#"{"return_schema": null}"#).unwrap();
        let updated = store.update(&created.id, patch).await.unwrap();
        assert_eq!(updated.return_schema, None);

        let patch: ToolPatch =
            serde_json::from_str(r#"{"return_schema": {"type": "string"}}"#).unwrap();
        let updated = store.update(&created.id, patch).await.unwrap();
        assert_eq!(
            updated.return_schema,
            Some(serde_json::json!({"type": "string"}))
        );
    }

    #[tokio::test]
    async fn update_rename_to_taken_name_conflicts() {
        let store = store().await;
        store.create(spec("add")).await.unwrap();
        let other = store.create(spec("sub")).await.unwrap();

        let patch = ToolPatch {
            name: Some("add".into()),
            ..Default::default()
        };
        let err = store.update(&other.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::NameConflict(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();
        store.delete(&created.id).await.unwrap();
        store.delete(&created.id).await.unwrap();
        store.delete("no-such-id").await.unwrap();
        assert!(matches!(
            store.get_by_id(&created.id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();
        let once = store.deactivate(&created.id).await.unwrap();
        let twice = store.deactivate(&created.id).await.unwrap();
        assert!(!once.is_active);
        assert!(!twice.is_active);
        assert_eq!(once.updated_at, twice.updated_at);
    }

    #[tokio::test]
    async fn bug_threshold_flips_and_clears() {
        let store = store().await;
        let created = store.create(spec("div")).await.unwrap();

        for i in 0..2 {
            let t = store
                .report_bug(&created.id, "RuntimeError", "divide by zero", "")
                .await
                .unwrap();
            assert_eq!(t.bug_count, i + 1);
            assert!(!t.is_bugged);
        }
        let t = store
            .report_bug(&created.id, "RuntimeError", "divide by zero", "")
            .await
            .unwrap();
        assert_eq!(t.bug_count, 3);
        assert!(t.is_bugged);
        assert_eq!(t.bug_log.len(), 3);
        assert!(t.last_error_at.is_some());

        let bugged = store.list_bugged().await.unwrap();
        assert_eq!(bugged.len(), 1);

        let cleared = store.clear_bugs(&created.id).await.unwrap();
        assert_eq!(cleared.bug_count, 0);
        assert!(cleared.bug_log.is_empty());
        assert!(!cleared.is_bugged);

        // clear_bugs ∘ clear_bugs = clear_bugs
        let again = store.clear_bugs(&created.id).await.unwrap();
        assert_eq!(again.bug_count, 0);
        assert!(!again.is_bugged);
    }

    #[tokio::test]
    async fn bug_log_ring_is_bounded() {
        let store = store().await;
        let created = store.create(spec("flaky")).await.unwrap();
        for i in 0..40 {
            store
                .report_bug(&created.id, "RuntimeError", &format!("failure {i}"), "")
                .await
                .unwrap();
        }
        let t = store.get_by_id(&created.id).await.unwrap();
        assert_eq!(t.bug_log.len(), BUG_LOG_CAP);
        assert_eq!(t.bug_count, 40);
        // Oldest entries were evicted; the last one kept is failure 39.
        assert_eq!(t.bug_log.last().unwrap().message, "failure 39");
        assert_eq!(t.bug_log.first().unwrap().message, "failure 8");
    }

    #[tokio::test]
    async fn telemetry_counts_exactly() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();

        for _ in 0..5 {
            store.record_success(&created.id).await.unwrap();
        }
        let t = store.get_by_id(&created.id).await.unwrap();
        assert_eq!(t.execution_count, 5);
        assert!(t.last_executed_at.is_some());

        store
            .record_failure(&created.id, "Timeout", "took too long", "")
            .await
            .unwrap();
        let t = store.get_by_id(&created.id).await.unwrap();
        assert_eq!(t.execution_count, 6);
        assert_eq!(t.bug_count, 1);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let store = store().await;
        let a = store.create(spec("alpha")).await.unwrap();
        let _b = store.create(spec("beta")).await.unwrap();
        store.deactivate(&a.id).await.unwrap();

        let active = store.list(ListOptions::default()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "beta");

        let all = store
            .list(ListOptions {
                active_only: false,
                exclude_bugged: false,
                category: None,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let math = store
            .list(ListOptions {
                active_only: false,
                exclude_bugged: false,
                category: Some("math".into()),
            })
            .await
            .unwrap();
        assert_eq!(math.len(), 2);

        let none = store
            .list(ListOptions {
                active_only: false,
                exclude_bugged: false,
                category: Some("text".into()),
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn sync_catalog_resolves_and_records() {
        let store = store().await;
        let created = store.create(spec("add")).await.unwrap();
        let catalog = store.sync_catalog();

        let store2 = store.clone();
        let id = created.id.clone();
        tokio::task::spawn_blocking(move || {
            let by_name = catalog.get("add").unwrap();
            assert_eq!(by_name.id, id);
            let by_id = catalog.get(&id).unwrap();
            assert_eq!(by_id.name, "add");
            catalog.record_success(&id).unwrap();
        })
        .await
        .unwrap();

        let t = store2.get_by_id(&created.id).await.unwrap();
        assert_eq!(t.execution_count, 1);
    }
}
