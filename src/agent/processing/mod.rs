use module::RecordProcessor;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info_span, Instrument};

use super::storage::entities::ActivityRecord;

pub mod module;
pub mod persist;

/// The single sink writer. Records from every tracker funnel through here one at a time, so the
/// store never sees concurrent writes from this process.
pub struct ProcessingModule<Processor> {
    receiver: Receiver<ActivityRecord>,
    processor: Processor,
}

impl<P: RecordProcessor> ProcessingModule<P> {
    pub fn new(receiver: Receiver<ActivityRecord>, processor: P) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    /// Runs until every sender is dropped. A failed record is logged and dropped, never retried.
    pub async fn run(mut self) {
        while let Some(record) = self.receiver.recv().await {
            let span = info_span!("persist", dimension = %record.dimension());
            match self.processor.process_next(record).instrument(span).await {
                Ok(id) => debug!("Stored record {id}"),
                Err(e) => error!("Dropping record: {e}"),
            }
        }
        self.processor.finalize().await;
    }
}
