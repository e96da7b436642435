use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    entities::{ActivityRecord, SessionId, StorageId},
    error::StorageResult,
};

/// Durable, append only persistence of completed records.
///
/// A persist is transactional: either the whole record is stored and an id is returned, or
/// nothing is stored. Callers never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentSink: Send + Sync {
    async fn persist(&self, record: &ActivityRecord) -> StorageResult<StorageId>;
}

/// Session boundaries, called once at agent start and once at agent stop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn open_session(&self, start_time: DateTime<Utc>) -> StorageResult<SessionId>;

    async fn close_session(&self, id: SessionId, end_time: DateTime<Utc>) -> StorageResult<()>;
}

#[async_trait]
impl<T> SegmentSink for T
where
    T: Deref + Send + Sync,
    T::Target: SegmentSink,
{
    async fn persist(&self, record: &ActivityRecord) -> StorageResult<StorageId> {
        self.deref().persist(record).await
    }
}

#[async_trait]
impl<T> SessionStore for T
where
    T: Deref + Send + Sync,
    T::Target: SessionStore,
{
    async fn open_session(&self, start_time: DateTime<Utc>) -> StorageResult<SessionId> {
        self.deref().open_session(start_time).await
    }

    async fn close_session(&self, id: SessionId, end_time: DateTime<Utc>) -> StorageResult<()> {
        self.deref().close_session(id, end_time).await
    }
}
