use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom},
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::{
    fs::operations::read_last_line,
    utils::{clock::Clock, time::date_to_record_name},
};

use super::{
    entities::{ActivityRecord, Session, SessionId, StorageId},
    error::{StorageError, StorageResult},
    sink::{SegmentSink, SessionStore},
};

pub const RECORDS_DIR: &str = "records";
pub const SESSIONS_FILE: &str = "sessions";

/// One line of a record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: StorageId,
    pub record: ActivityRecord,
}

struct JsonlState {
    next_id: i64,
    next_session_id: i64,
    current: Option<(NaiveDate, File)>,
}

/// Append only JSON lines store: one record file per UTC day plus a sessions log.
///
/// Every line is written under an exclusive file lock and synced before the id is handed out.
/// A failed write truncates the file back to its previous length, so readers never see half a
/// record produced by this process. Lines cut by a crash are skipped on read.
pub struct JsonlStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<JsonlState>,
}

impl JsonlStore {
    pub async fn open(dir: PathBuf, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        tokio::fs::create_dir_all(dir.join(RECORDS_DIR)).await?;

        let next_id = match newest_record_file(&dir.join(RECORDS_DIR)).await? {
            Some(path) => last_record_id(&path).await?.map_or(1, |v| v.0 + 1),
            None => 1,
        };
        let next_session_id = read_lines::<Session>(&dir.join(SESSIONS_FILE))
            .await?
            .iter()
            .map(|v| v.id.0 + 1)
            .max()
            .unwrap_or(1);
        debug!("Opened record store at {dir:?}, next id {next_id}");

        Ok(Self {
            dir,
            clock,
            state: Mutex::new(JsonlState {
                next_id,
                next_session_id,
                current: None,
            }),
        })
    }

    /// Records persisted on the given UTC day, in write order.
    pub async fn records_for(&self, date: NaiveDate) -> StorageResult<Vec<StoredRecord>> {
        read_lines(&self.record_path(date)).await
    }

    /// Latest state of every session.
    pub async fn sessions(&self) -> StorageResult<Vec<Session>> {
        let mut latest = BTreeMap::new();
        for session in read_lines::<Session>(&self.dir.join(SESSIONS_FILE)).await? {
            latest.insert(session.id, session);
        }
        Ok(latest.into_values().collect())
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(RECORDS_DIR).join(date_to_record_name(date))
    }

    async fn append_session(&self, session: &Session) -> StorageResult<()> {
        let mut line = serde_json::to_vec(session)?;
        line.push(b'\n');
        let mut file = open_append(&self.dir.join(SESSIONS_FILE)).await?;
        append_line(&mut file, &line).await
    }
}

async fn open_append(path: &Path) -> StorageResult<File> {
    Ok(File::options()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?)
}

async fn append_line(file: &mut File, line: &[u8]) -> StorageResult<()> {
    file.lock_exclusive()?;
    let result = write_or_truncate(file, line).await;
    file.unlock_async().await?;
    result
}

async fn write_or_truncate(file: &mut File, line: &[u8]) -> StorageResult<()> {
    let len = file.seek(SeekFrom::End(0)).await?;
    let mut needs_separator = false;
    if len > 0 {
        let mut last = [0u8];
        file.seek(SeekFrom::End(-1)).await?;
        file.read_exact(&mut last).await?;
        needs_separator = last[0] != b'\n';
    }
    let written = async {
        if needs_separator {
            file.write_all(b"\n").await?;
        }
        file.write_all(line).await?;
        file.flush().await?;
        file.sync_data().await
    }
    .await;

    if let Err(e) = written {
        warn!("Append failed, truncating back to {len} bytes: {e}");
        file.set_len(len).await?;
        return Err(e.into());
    }
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    let file = match File::open(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;
    let mut lines = BufReader::new(file).lines();
    let mut values = vec![];
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(v) => values.push(v),
            // Might happen when the agent got killed mid write.
            Err(e) => warn!("Skipping corrupt line in {path:?}: {e}"),
        }
    }
    lines.into_inner().into_inner().unlock_async().await?;
    Ok(values)
}

async fn newest_record_file(records_dir: &Path) -> StorageResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(records_dir).await?;
    let mut newest: Option<(NaiveDate, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Ok(date) = NaiveDate::parse_from_str(&name.to_string_lossy(), "%Y-%m-%d") else {
            continue;
        };
        if newest.as_ref().map_or(true, |(v, _)| *v < date) {
            newest = Some((date, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

async fn last_record_id(path: &Path) -> StorageResult<Option<StorageId>> {
    let mut file = File::open(path).await?;
    let Some(line) = read_last_line(&mut file, &mut vec![0; 1024]).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<StoredRecord>(&line) {
        Ok(v) => Ok(Some(v.id)),
        Err(e) => {
            // Fall back to scanning the whole file when the tail got cut off.
            warn!("Last record in {path:?} is corrupt: {e}");
            Ok(read_lines::<StoredRecord>(path)
                .await?
                .iter()
                .map(|v| v.id)
                .max())
        }
    }
}

#[async_trait]
impl SegmentSink for JsonlStore {
    async fn persist(&self, record: &ActivityRecord) -> StorageResult<StorageId> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let today = self.clock.time().date_naive();

        let file = match &mut state.current {
            Some((date, file)) if *date == today => file,
            current => {
                let file = open_append(&self.record_path(today)).await?;
                &mut current.insert((today, file)).1
            }
        };

        let id = StorageId(state.next_id);
        let mut line = serde_json::to_vec(&StoredRecord {
            id,
            record: record.clone(),
        })?;
        line.push(b'\n');
        append_line(file, &line).await?;

        state.next_id += 1;
        Ok(id)
    }
}

#[async_trait]
impl SessionStore for JsonlStore {
    async fn open_session(&self, start_time: DateTime<Utc>) -> StorageResult<SessionId> {
        let mut state = self.state.lock().await;
        let id = SessionId(state.next_session_id);
        self.append_session(&Session {
            id,
            start_time,
            end_time: None,
            is_active: true,
        })
        .await?;
        state.next_session_id += 1;
        Ok(id)
    }

    async fn close_session(&self, id: SessionId, end_time: DateTime<Utc>) -> StorageResult<()> {
        let _state = self.state.lock().await;
        let session = self
            .sessions()
            .await?
            .into_iter()
            .find(|v| v.id == id)
            .ok_or(StorageError::SessionNotFound(id))?;
        self.append_session(&Session {
            end_time: Some(end_time),
            is_active: false,
            ..session
        })
        .await
    }
}
