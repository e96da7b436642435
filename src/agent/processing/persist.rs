use tracing::{info, trace};

use crate::{
    agent::{
        error::TrackingError,
        registry::ActiveContextRegistry,
        storage::{
            entities::{ActivityRecord, StorageId},
            sink::SegmentSink,
        },
    },
    context::Dimension,
};

use super::module::RecordProcessor;

/// Bridges the pipeline and a [SegmentSink]. Publishes window segments to the
/// [ActiveContextRegistry] only once they are durably stored.
pub struct PersistingProcessor<S> {
    sink: S,
    registry: ActiveContextRegistry,
    persisted: usize,
    dropped: usize,
}

impl<S: SegmentSink> PersistingProcessor<S> {
    pub fn new(sink: S, registry: ActiveContextRegistry) -> Self {
        Self {
            sink,
            registry,
            persisted: 0,
            dropped: 0,
        }
    }
}

impl<S: SegmentSink> RecordProcessor for PersistingProcessor<S> {
    async fn process_next(&mut self, record: ActivityRecord) -> Result<StorageId, TrackingError> {
        let dimension = record.dimension();
        match self.sink.persist(&record).await {
            Ok(id) => {
                self.persisted += 1;
                if let (Dimension::Window, ActivityRecord::Segment(_)) = (dimension, &record) {
                    self.registry.register(Dimension::Window, id);
                }
                trace!("Persisted {dimension} record as {id}");
                Ok(id)
            }
            Err(source) => {
                self.dropped += 1;
                Err(TrackingError::SinkWrite { dimension, source })
            }
        }
    }

    async fn finalize(&mut self) {
        info!(
            "Persisted {} records, dropped {} on sink failures",
            self.persisted, self.dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone, Utc};
    use mockall::Sequence;

    use crate::agent::storage::{
        entities::{Segment, SessionId},
        error::StorageError,
        sink::MockSegmentSink,
    };

    use super::*;

    fn record(dimension: Dimension, key: &str) -> ActivityRecord {
        ActivityRecord::Segment(Segment {
            session_id: SessionId(1),
            dimension,
            identity_key: key.into(),
            display_fields: BTreeMap::new(),
            start_time: Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap(),
            duration: Duration::seconds(5),
            context_window_id: None,
        })
    }

    #[tokio::test]
    async fn test_registry_only_sees_persisted_windows() {
        let mut sink = MockSegmentSink::new();
        let mut sequence = Sequence::new();
        sink.expect_persist()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(StorageId(1)));
        sink.expect_persist()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(StorageError::InvalidData("disk full".into())));
        sink.expect_persist()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(StorageId(3)));

        let registry = ActiveContextRegistry::new();
        let mut processor = PersistingProcessor::new(sink, registry.clone());

        assert!(processor.process_next(record(Dimension::Window, "a")).await.is_ok());
        assert_eq!(registry.last_window_id(), Some(StorageId(1)));

        let failed = processor.process_next(record(Dimension::Window, "b")).await;
        assert!(matches!(
            failed,
            Err(TrackingError::SinkWrite {
                dimension: Dimension::Window,
                ..
            })
        ));
        assert_eq!(registry.last_window_id(), Some(StorageId(1)));

        processor.process_next(record(Dimension::Game, "c")).await.ok();
        assert_eq!(registry.last_window_id(), Some(StorageId(1)));
        processor.finalize().await;
    }
}
