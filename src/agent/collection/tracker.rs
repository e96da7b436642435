use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    agent::{error::TrackingError, storage::entities::ActivityRecord},
    context::{ContextProvider, CounterSource, Dimension},
    utils::clock::Clock,
};

use super::{counter::CounterSegmenter, segmenter::Segmenter};

/// One dimension's provider paired with its segmenter.
pub trait Sampler: Send {
    fn dimension(&self) -> Dimension;

    /// Takes one sample. Errors cost only this sample, the segmenter state is left untouched.
    fn sample(&mut self, now: DateTime<Utc>) -> Result<Option<ActivityRecord>, TrackingError>;

    /// Emits the trailing record and stops accepting samples. Idempotent.
    fn flush(&mut self, now: DateTime<Utc>) -> Option<ActivityRecord>;
}

/// Survives restarts of the tracker loop that drives it.
pub type SharedSampler = Arc<Mutex<Box<dyn Sampler>>>;

pub fn shared(sampler: impl Sampler + 'static) -> SharedSampler {
    Arc::new(Mutex::new(Box::new(sampler)))
}

/// A panicking provider poisons the lock, the segmenter inside is still consistent.
pub(super) fn lock(sampler: &SharedSampler) -> MutexGuard<'_, Box<dyn Sampler>> {
    sampler.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ContextSampler {
    provider: Box<dyn ContextProvider>,
    segmenter: Segmenter,
    probe_interval: chrono::Duration,
    last_probe: Option<DateTime<Utc>>,
}

impl ContextSampler {
    pub fn new(
        provider: Box<dyn ContextProvider>,
        segmenter: Segmenter,
        probe_interval: chrono::Duration,
    ) -> Self {
        Self {
            provider,
            segmenter,
            probe_interval,
            last_probe: None,
        }
    }

    fn probe_due(&self, now: DateTime<Utc>) -> bool {
        self.last_probe
            .map_or(true, |last| now - last >= self.probe_interval)
    }

    fn provider_error(&self, source: anyhow::Error) -> TrackingError {
        TrackingError::Provider {
            dimension: self.segmenter.dimension(),
            source,
        }
    }
}

impl Sampler for ContextSampler {
    fn dimension(&self) -> Dimension {
        self.segmenter.dimension()
    }

    fn sample(&mut self, now: DateTime<Utc>) -> Result<Option<ActivityRecord>, TrackingError> {
        if self.segmenter.is_flushed() {
            return Ok(None);
        }
        let polled = self.provider.poll().map_err(|e| self.provider_error(e))?;
        let context = match polled {
            None if self.segmenter.is_idle() && self.probe_due(now) => {
                self.last_probe = Some(now);
                trace!("Probing {}", self.dimension());
                self.provider.probe().map_err(|e| self.provider_error(e))?
            }
            v => v,
        };
        Ok(self.segmenter.sample(context, now).map(ActivityRecord::from))
    }

    fn flush(&mut self, now: DateTime<Utc>) -> Option<ActivityRecord> {
        self.segmenter.flush(now).map(ActivityRecord::from)
    }
}

pub struct CounterSampler {
    source: Arc<dyn CounterSource>,
    segmenter: CounterSegmenter,
}

impl CounterSampler {
    pub fn new(source: Arc<dyn CounterSource>, segmenter: CounterSegmenter) -> Self {
        Self { source, segmenter }
    }
}

impl Sampler for CounterSampler {
    fn dimension(&self) -> Dimension {
        self.segmenter.dimension()
    }

    fn sample(&mut self, now: DateTime<Utc>) -> Result<Option<ActivityRecord>, TrackingError> {
        Ok(self
            .segmenter
            .sample(self.source.as_ref(), now)
            .map(ActivityRecord::from))
    }

    fn flush(&mut self, now: DateTime<Utc>) -> Option<ActivityRecord> {
        self.segmenter
            .flush(self.source.as_ref(), now)
            .map(ActivityRecord::from)
    }
}

/// Sampling loop of one dimension.
pub struct Tracker {
    dimension: Dimension,
    sampler: SharedSampler,
    next: mpsc::Sender<ActivityRecord>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Tracker {
    pub fn new(
        sampler: SharedSampler,
        next: mpsc::Sender<ActivityRecord>,
        interval: Duration,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        let dimension = lock(&sampler).dimension();
        Self {
            dimension,
            sampler,
            next,
            interval,
            clock,
            shutdown,
        }
    }

    /// Providers may block, so they run on the blocking pool. Only this loop touches the
    /// sampler while it runs, which keeps samples of one dimension strictly sequential.
    async fn sample(&self) -> Option<ActivityRecord> {
        let sampler = self.sampler.clone();
        let now = self.clock.time();
        match tokio::task::spawn_blocking(move || lock(&sampler).sample(now)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                error!("Skipping sample: {e}");
                None
            }
            Err(e) => {
                error!("{} sampler panicked: {e}", self.dimension);
                None
            }
        }
    }

    fn forward(&self, record: ActivityRecord) {
        match self.next.try_send(record) {
            Ok(()) => trace!("Handed over {} record", self.dimension),
            Err(TrySendError::Full(record)) => {
                warn!("Sink is backed up, dropping {:?}", record)
            }
            Err(TrySendError::Closed(record)) => {
                error!("Sink is gone, dropping {:?}", record)
            }
        }
    }

    /// Executes the sampling loop until cancelled, then flushes the open segment.
    pub async fn run(self) {
        debug!("Started {} tracker every {:?}", self.dimension, self.interval);
        let mut collection_point = self.clock.instant();
        loop {
            // Missed ticks are skipped rather than replayed in a burst.
            collection_point = (collection_point + self.interval).max(self.clock.instant());

            if let Some(record) = self.sample().await {
                self.forward(record);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(collection_point) => ()
            }
        }

        let flushed = lock(&self.sampler).flush(self.clock.time());
        if let Some(record) = flushed {
            debug!("Flushing {} record", self.dimension);
            if let Err(e) = self.next.send(record).await {
                error!("Sink is gone, lost final {} record: {:?}", self.dimension, e.0);
            }
        }
        debug!("Stopped {} tracker", self.dimension);
    }
}
