use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entities::{ActivityRecord, SessionId, StorageId};
use error::StorageResult;
use jsonl::JsonlStore;
use sink::{SegmentSink, SessionStore};
use sqlite::{SqliteStore, DATABASE_FILE};

use crate::{config::StorageBackend, utils::clock::Clock};

pub mod entities;
pub mod error;
pub mod jsonl;
mod migrations;
pub mod sink;
pub mod sqlite;

/// The configured persistence backend.
pub enum ActivityStore {
    Sqlite(SqliteStore),
    Jsonl(JsonlStore),
}

impl ActivityStore {
    pub async fn open(
        backend: StorageBackend,
        dir: &Path,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        Ok(match backend {
            StorageBackend::Sqlite => Self::Sqlite(SqliteStore::open(&dir.join(DATABASE_FILE))?),
            StorageBackend::Jsonl => Self::Jsonl(JsonlStore::open(dir.to_path_buf(), clock).await?),
        })
    }
}

#[async_trait]
impl SegmentSink for ActivityStore {
    async fn persist(&self, record: &ActivityRecord) -> StorageResult<StorageId> {
        match self {
            ActivityStore::Sqlite(v) => v.persist(record).await,
            ActivityStore::Jsonl(v) => v.persist(record).await,
        }
    }
}

#[async_trait]
impl SessionStore for ActivityStore {
    async fn open_session(&self, start_time: DateTime<Utc>) -> StorageResult<SessionId> {
        match self {
            ActivityStore::Sqlite(v) => v.open_session(start_time).await,
            ActivityStore::Jsonl(v) => v.open_session(start_time).await,
        }
    }

    async fn close_session(&self, id: SessionId, end_time: DateTime<Utc>) -> StorageResult<()> {
        match self {
            ActivityStore::Sqlite(v) => v.close_session(id, end_time).await,
            ActivityStore::Jsonl(v) => v.close_session(id, end_time).await,
        }
    }
}
