use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    agent::{error::TrackingError, storage::entities::ActivityRecord},
    context::Dimension,
    utils::clock::Clock,
};

use super::tracker::{lock, shared, Sampler, SharedSampler, Tracker};

struct RunningTracker {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

struct TrackerSlot {
    sampler: SharedSampler,
    interval: Duration,
    running: Option<RunningTracker>,
    stopped: bool,
}

/// What is left to await once a tracker was asked to stop.
struct PendingStop {
    dimension: Dimension,
    task: Option<JoinHandle<()>>,
    sampler: SharedSampler,
}

/// Owns one tracker loop per registered dimension.
pub struct Scheduler {
    slots: BTreeMap<Dimension, TrackerSlot>,
    next: mpsc::Sender<ActivityRecord>,
    clock: Arc<dyn Clock>,
    stop_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        next: mpsc::Sender<ActivityRecord>,
        clock: Arc<dyn Clock>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            slots: BTreeMap::new(),
            next,
            clock,
            stop_timeout,
        }
    }

    pub fn register(&mut self, sampler: impl Sampler + 'static, interval: Duration) {
        let dimension = sampler.dimension();
        self.slots.insert(
            dimension,
            TrackerSlot {
                sampler: shared(sampler),
                interval,
                running: None,
                stopped: false,
            },
        );
    }

    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.slots.keys().copied()
    }

    pub fn is_running(&self, dimension: Dimension) -> bool {
        self.slots
            .get(&dimension)
            .and_then(|v| v.running.as_ref())
            .is_some_and(|v| !v.task.is_finished())
    }

    /// Spawns the tracker loop unless it is already running. Returns whether the dimension is
    /// running afterwards; a stopped dimension stays stopped for the rest of the session.
    pub fn start(&mut self, dimension: Dimension) -> bool {
        if self.is_running(dimension) {
            return true;
        }
        let Some(slot) = self.slots.get_mut(&dimension) else {
            warn!("No tracker registered for {dimension}");
            return false;
        };
        if slot.stopped {
            warn!("Refusing to start {dimension} after it was stopped");
            return false;
        }

        let shutdown = CancellationToken::new();
        let tracker = Tracker::new(
            slot.sampler.clone(),
            self.next.clone(),
            slot.interval,
            self.clock.clone(),
            shutdown.clone(),
        );
        slot.running = Some(RunningTracker {
            task: tokio::spawn(tracker.run()),
            shutdown,
        });
        true
    }

    pub fn start_all(&mut self) {
        let dimensions: Vec<_> = self.dimensions().collect();
        for dimension in dimensions {
            self.start(dimension);
        }
    }

    /// Restarts every tracker whose loop exited without being stopped. Returns how many were
    /// restarted.
    pub fn restart_exited(&mut self) -> usize {
        let exited: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, v)| !v.stopped)
            .filter(|(_, v)| v.running.as_ref().is_some_and(|v| v.task.is_finished()))
            .map(|(k, _)| *k)
            .collect();
        for dimension in &exited {
            warn!("{dimension} tracker exited unexpectedly, restarting");
            self.start(*dimension);
        }
        exited.len()
    }

    /// Watchdog: checks tracker liveness every `period` until `shutdown` fires.
    pub async fn supervise(&mut self, shutdown: CancellationToken, period: Duration) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.clock.sleep(period) => {
                    self.restart_exited();
                }
            }
        }
    }

    fn begin_stop(&mut self, dimension: Dimension) -> Option<PendingStop> {
        let slot = self.slots.get_mut(&dimension)?;
        slot.stopped = true;
        let task = slot.running.take().map(|v| {
            v.shutdown.cancel();
            v.task
        });
        Some(PendingStop {
            dimension,
            task,
            sampler: slot.sampler.clone(),
        })
    }

    async fn finish_stop(&self, pending: PendingStop) -> Result<(), TrackingError> {
        let PendingStop {
            dimension,
            task,
            sampler,
        } = pending;

        if let Some(mut task) = task {
            match tokio::time::timeout(self.stop_timeout, &mut task).await {
                Err(_) => {
                    task.abort();
                    warn!("{dimension} tracker did not stop in {:?}", self.stop_timeout);
                    return Err(TrackingError::ShutdownTimeout {
                        dimension,
                        timeout: self.stop_timeout,
                    });
                }
                Ok(Err(e)) => error!("{dimension} tracker failed: {e}"),
                Ok(Ok(())) => {}
            }
        }

        // A no-op when the loop already flushed on its way out.
        let flushed = lock(&sampler).flush(self.clock.time());
        if let Some(record) = flushed {
            if let Err(e) = self.next.send(record).await {
                error!("Sink is gone, lost final {dimension} record: {:?}", e.0);
            }
        }
        info!("Stopped {dimension} tracker");
        Ok(())
    }

    /// Cancels the tracker, waits up to the stop timeout for its final flush, then reclaims it.
    pub async fn stop(&mut self, dimension: Dimension) -> Result<(), TrackingError> {
        match self.begin_stop(dimension) {
            Some(pending) => self.finish_stop(pending).await,
            None => Ok(()),
        }
    }

    /// Stops every tracker concurrently, so the whole shutdown is bounded by one stop timeout.
    pub async fn stop_all(&mut self) -> Vec<TrackingError> {
        let dimensions: Vec<_> = self.dimensions().collect();
        let pending: Vec<_> = dimensions
            .into_iter()
            .filter_map(|v| self.begin_stop(v))
            .collect();
        join_all(pending.into_iter().map(|v| self.finish_stop(v)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}
