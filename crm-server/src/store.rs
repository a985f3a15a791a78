use chrono::{DateTime, Utc};
use crm_core::backend::merge_patch;
use crm_core::Filter;
use crm_schema::{
    Activity, ActivityAction, Campaign, Contact, Deal, Draft, EntityKind, Pipeline, Record,
    StageConfig, Task, ValidationError,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

/// Records, pipeline stages and the activity feed in one sqlite file.
///
/// Records are stored as JSON bodies keyed by `(kind, id)`. A connection is
/// opened per call.
#[derive(Clone)]
pub struct RecordStore {
    db_path: Arc<PathBuf>,
    org_id: Arc<str>,
}

impl RecordStore {
    pub fn open(path: &str, org_id: &str) -> Result<Self, StoreError> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind, created_at);
            CREATE TABLE IF NOT EXISTS activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                action TEXT NOT NULL,
                description TEXT NOT NULL,
                details TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stages (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                position INTEGER NOT NULL
            );
            ",
        )?;

        let store = Self {
            db_path: Arc::new(db_path),
            org_id: Arc::from(org_id),
        };
        if store.pipeline()?.is_empty() {
            store.replace_pipeline(&Pipeline::standard())?;
            tracing::info!(path, "seeded default pipeline");
        }
        Ok(store)
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&*self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    // ── stages ───────────────────────────────────────────────────────────

    pub fn pipeline(&self) -> Result<Pipeline, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, name, color, position FROM stages")?;
        let rows = stmt.query_map([], |row| {
            Ok(StageConfig {
                id: row.get(0)?,
                name: row.get(1)?,
                color: row.get(2)?,
                position: row.get(3)?,
            })
        })?;
        let mut stages = Vec::new();
        for row in rows {
            stages.push(row?);
        }
        Ok(Pipeline::new(stages))
    }

    pub fn replace_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM stages", [])?;
        for stage in pipeline.stages() {
            tx.execute(
                "INSERT INTO stages (id, name, color, position) VALUES (?1, ?2, ?3, ?4)",
                params![stage.id, stage.name, stage.color, stage.position],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── records ──────────────────────────────────────────────────────────

    /// Validate the draft and store the record it builds. The store assigns
    /// id, org and timestamps.
    pub fn create<D: Draft>(&self, draft: D) -> Result<D::Output, StoreError> {
        draft.validate(&self.pipeline()?)?;
        let kind = <D::Output as Record>::KIND;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let record = draft.into_record(id.clone(), self.org_id.to_string(), now);
        let body = serde_json::to_string(&record)?;

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO records (kind, id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![kind.as_str(), id, body, now.to_rfc3339()],
        )?;
        append_activity(&conn, kind, &id, ActivityAction::Created, None)?;
        tracing::debug!(%kind, %id, "record created");
        Ok(record)
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Result<serde_json::Value, StoreError> {
        let conn = self.connect()?;
        load_body(&conn, kind, id)?.ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })
    }

    /// One page of `kind`, oldest first, after applying `filter`.
    pub fn list(
        &self,
        kind: EntityKind,
        filter: Option<&Filter>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM records WHERE kind = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?;

        let mut matched = Vec::new();
        for row in rows {
            let body: serde_json::Value = serde_json::from_str(&row?)?;
            if filter.map_or(true, |f| f.matches(&body)) {
                matched.push(body);
            }
        }

        let size = page_size.max(1) as usize;
        Ok(matched
            .into_iter()
            .skip((page as usize).saturating_mul(size))
            .take(size)
            .collect())
    }

    /// Merge `patch` into the stored record. Server-owned keys in the patch
    /// are ignored; the result must still decode as a record of `kind`.
    pub fn patch(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        if !patch.is_object() {
            return Err(StoreError::Invalid("patch body must be a JSON object".into()));
        }
        let new_stage = patch
            .get("stage")
            .and_then(serde_json::Value::as_str)
            .filter(|_| kind == EntityKind::Deal);
        if let Some(stage) = new_stage {
            if !self.pipeline()?.contains(stage) {
                return Err(StoreError::UnknownStage(stage.to_string()));
            }
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut body = load_body(&tx, kind, id)?.ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })?;
        let old_stage = body
            .get("stage")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        merge_patch(&mut body, patch);
        let now = Utc::now();
        if let Some(object) = body.as_object_mut() {
            object.insert("updatedAt".into(), serde_json::to_value(now)?);
        }
        check_shape(kind, &body)?;

        tx.execute(
            "UPDATE records SET body = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4",
            params![serde_json::to_string(&body)?, now.to_rfc3339(), kind.as_str(), id],
        )?;
        match new_stage {
            Some(to) if old_stage.as_deref() != Some(to) => {
                let details = serde_json::json!({ "from": old_stage, "to": to });
                append_activity(&tx, kind, id, ActivityAction::StageChanged, Some(details))?;
            }
            _ => {
                append_activity(&tx, kind, id, ActivityAction::Updated, None)?;
            }
        }
        tx.commit()?;
        Ok(body)
    }

    pub fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        append_activity(&conn, kind, id, ActivityAction::Deleted, None)?;
        Ok(())
    }

    // ── activity ─────────────────────────────────────────────────────────

    pub fn activity_after(&self, after_id: i64) -> Result<Vec<Activity>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, record_id, action, description, details, timestamp
             FROM activity
             WHERE id > ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![after_id], map_activity)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn latest_activity_id(&self) -> Result<Option<i64>, StoreError> {
        let conn = self.connect()?;
        let latest = conn
            .query_row("SELECT MAX(id) FROM activity", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?;
        Ok(latest.flatten())
    }
}

fn load_body(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
) -> Result<Option<serde_json::Value>, StoreError> {
    let body = conn
        .query_row(
            "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

fn check_shape(kind: EntityKind, body: &serde_json::Value) -> Result<(), StoreError> {
    fn decode<R: Record>(body: &serde_json::Value) -> Result<(), StoreError> {
        serde_json::from_value::<R>(body.clone())
            .map(|_| ())
            .map_err(|err| StoreError::Invalid(err.to_string()))
    }
    match kind {
        EntityKind::Contact => decode::<Contact>(body),
        EntityKind::Deal => decode::<Deal>(body),
        EntityKind::Task => decode::<Task>(body),
        EntityKind::Campaign => decode::<Campaign>(body),
    }
}

fn append_activity(
    conn: &Connection,
    kind: EntityKind,
    record_id: &str,
    action: ActivityAction,
    details: Option<serde_json::Value>,
) -> Result<i64, StoreError> {
    let verb = match action {
        ActivityAction::Created => "created",
        ActivityAction::Updated => "updated",
        ActivityAction::Deleted => "deleted",
        ActivityAction::StageChanged => "moved to a new stage",
    };
    let details = details.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO activity (kind, record_id, action, description, details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            kind.as_str(),
            record_id,
            serde_json::to_string(&action)?,
            format!("{kind} {record_id} {verb}"),
            details,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn map_activity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    let kind_str: String = row.get(1)?;
    let action_str: String = row.get(3)?;
    let details_str: Option<String> = row.get(5)?;
    let timestamp_str: String = row.get(6)?;

    let conversion = |index: usize, err: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err)
    };

    let kind = EntityKind::ALL
        .into_iter()
        .find(|k| k.as_str() == kind_str)
        .ok_or_else(|| conversion(1, format!("unknown kind '{kind_str}'").into()))?;
    let action: ActivityAction =
        serde_json::from_str(&action_str).map_err(|err| conversion(3, Box::new(err)))?;
    let details = details_str
        .map(|s| serde_json::from_str(&s).map_err(|err| conversion(5, Box::new(err))))
        .transpose()?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map_err(|err| conversion(6, Box::new(err)))?
        .with_timezone(&Utc);

    Ok(Activity {
        id: row.get(0)?,
        kind,
        record_id: row.get(2)?,
        action,
        description: row.get(4)?,
        details,
        timestamp,
    })
}
