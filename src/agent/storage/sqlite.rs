use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, error};

use crate::context::Dimension;

use super::{
    entities::{ActivityRecord, CounterSnapshot, Segment, Session, SessionId, StorageId},
    error::{StorageError, StorageResult},
    migrations::run_migrations,
    sink::{SegmentSink, SessionStore},
};

pub const DATABASE_FILE: &str = "activity.db";

/// SQLite backed store. Every call runs on the blocking pool and holds the connection for the
/// duration of one transaction, which serializes writes across dimensions.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) => debug!("Journal mode is {mode}"),
            Err(e) => error!("Failed to enable WAL mode: {e}"),
        }
        Self::init(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> StorageResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    pub async fn session(&self, id: SessionId) -> StorageResult<Session> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, start_time, end_time, is_active FROM sessions WHERE id = ?1",
                params![id.0],
                |row| Ok(session_row(row)),
            )
            .optional()?
            .ok_or(StorageError::SessionNotFound(id))?
        })
        .await
    }

    pub async fn segments_for_session(&self, id: SessionId) -> StorageResult<Vec<Segment>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, dimension, identity_key, display_fields, start_time, duration_ms, context_window_id
                 FROM segments WHERE session_id = ?1 ORDER BY id",
            )?;
            let mut segments = vec![];
            for row in stmt.query_map(params![id.0], |row| Ok(segment_row(row)))? {
                segments.push(row??);
            }
            Ok(segments)
        })
        .await
    }

    pub async fn counter_snapshots_for_session(
        &self,
        id: SessionId,
    ) -> StorageResult<Vec<CounterSnapshot>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, dimension, start_time, duration_ms, counts, context_window_id
                 FROM counter_snapshots WHERE session_id = ?1 ORDER BY id",
            )?;
            let mut snapshots = vec![];
            for row in stmt.query_map(params![id.0], |row| Ok(counter_row(row)))? {
                snapshots.push(row??);
            }
            Ok(snapshots)
        })
        .await
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|v| v.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("invalid datetime '{value}': {e}")))
}

fn parse_dimension(value: &str) -> StorageResult<Dimension> {
    value
        .parse()
        .map_err(|e: anyhow::Error| StorageError::InvalidData(e.to_string()))
}

fn session_row(row: &Row<'_>) -> StorageResult<Session> {
    let end_time: Option<String> = row.get(2)?;
    Ok(Session {
        id: SessionId(row.get(0)?),
        start_time: parse_time(&row.get::<_, String>(1)?)?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
        is_active: row.get(3)?,
    })
}

fn segment_row(row: &Row<'_>) -> StorageResult<Segment> {
    Ok(Segment {
        session_id: SessionId(row.get(0)?),
        dimension: parse_dimension(&row.get::<_, String>(1)?)?,
        identity_key: row.get::<_, String>(2)?.into(),
        display_fields: serde_json::from_str(&row.get::<_, String>(3)?)?,
        start_time: parse_time(&row.get::<_, String>(4)?)?,
        duration: chrono::Duration::milliseconds(row.get(5)?),
        context_window_id: row.get::<_, Option<i64>>(6)?.map(StorageId),
    })
}

fn counter_row(row: &Row<'_>) -> StorageResult<CounterSnapshot> {
    Ok(CounterSnapshot {
        session_id: SessionId(row.get(0)?),
        dimension: parse_dimension(&row.get::<_, String>(1)?)?,
        start_time: parse_time(&row.get::<_, String>(2)?)?,
        duration: chrono::Duration::milliseconds(row.get(3)?),
        counts: serde_json::from_str(&row.get::<_, String>(4)?)?,
        context_window_id: row.get::<_, Option<i64>>(5)?.map(StorageId),
    })
}

fn insert_record(conn: &mut Connection, record: &ActivityRecord) -> StorageResult<StorageId> {
    let tx = conn.transaction()?;
    match record {
        ActivityRecord::Segment(segment) => {
            tx.execute(
                "INSERT INTO segments (session_id, dimension, identity_key, display_fields, start_time, duration_ms, context_window_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    segment.session_id.0,
                    segment.dimension.as_str(),
                    segment.identity_key.as_ref(),
                    serde_json::to_string(&segment.display_fields)?,
                    format_time(segment.start_time),
                    segment.duration.num_milliseconds(),
                    segment.context_window_id.map(|v| v.0),
                ],
            )?;
        }
        ActivityRecord::Counters(snapshot) => {
            tx.execute(
                "INSERT INTO counter_snapshots (session_id, dimension, start_time, duration_ms, counts, context_window_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.session_id.0,
                    snapshot.dimension.as_str(),
                    format_time(snapshot.start_time),
                    snapshot.duration.num_milliseconds(),
                    serde_json::to_string(&snapshot.counts)?,
                    snapshot.context_window_id.map(|v| v.0),
                ],
            )?;
        }
    }
    let id = tx.last_insert_rowid();
    // Dropping the transaction on any error above rolls it back.
    tx.commit()?;
    Ok(StorageId(id))
}

#[async_trait]
impl SegmentSink for SqliteStore {
    async fn persist(&self, record: &ActivityRecord) -> StorageResult<StorageId> {
        let record = record.clone();
        self.with_conn(move |conn| insert_record(conn, &record)).await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn open_session(&self, start_time: DateTime<Utc>) -> StorageResult<SessionId> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (start_time, is_active) VALUES (?1, 1)",
                params![format_time(start_time)],
            )?;
            Ok(SessionId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn close_session(&self, id: SessionId, end_time: DateTime<Utc>) -> StorageResult<()> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET end_time = ?1, is_active = 0 WHERE id = ?2",
                params![format_time(end_time), id.0],
            )?;
            if updated == 0 {
                return Err(StorageError::SessionNotFound(id));
            }
            Ok(())
        })
        .await
    }
}
