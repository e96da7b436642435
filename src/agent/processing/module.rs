use std::future::Future;

use crate::agent::{
    error::TrackingError,
    storage::entities::{ActivityRecord, StorageId},
};

/// Final stage of the pipeline: consumes every completed record exactly once.
pub trait RecordProcessor {
    fn process_next(
        &mut self,
        record: ActivityRecord,
    ) -> impl Future<Output = Result<StorageId, TrackingError>> + Send;

    /// Called once after the last record, when every tracker has let go of the channel.
    fn finalize(&mut self) -> impl Future<Output = ()> + Send;
}
