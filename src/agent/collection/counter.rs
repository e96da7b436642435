use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::{
    agent::{
        registry::ActiveContextRegistry,
        storage::entities::{CounterSnapshot, SessionId, StorageId},
    },
    context::{CounterSource, Counts, Dimension},
};

#[derive(Debug, Clone)]
pub struct CounterRules {
    pub flush_interval: Duration,
    /// A snapshot is cut early as soon as any listed counter reaches its threshold.
    pub thresholds: Counts,
}

/// Counting-mode counterpart of [super::segmenter::Segmenter]: cuts the tallies of a
/// [CounterSource] into [CounterSnapshot]s on a time or count trigger, whichever fires first.
pub struct CounterSegmenter {
    dimension: Dimension,
    session_id: SessionId,
    rules: CounterRules,
    registry: ActiveContextRegistry,
    start: DateTime<Utc>,
    window_id: Option<StorageId>,
    flushed: bool,
}

impl CounterSegmenter {
    pub fn new(
        dimension: Dimension,
        session_id: SessionId,
        rules: CounterRules,
        registry: ActiveContextRegistry,
        now: DateTime<Utc>,
    ) -> Self {
        let window_id = registry.last_window_id();
        Self {
            dimension,
            session_id,
            rules,
            registry,
            start: now,
            window_id,
            flushed: false,
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    fn threshold_reached(&self, counts: &Counts) -> bool {
        self.rules
            .thresholds
            .iter()
            .any(|(name, threshold)| counts.get(name).is_some_and(|v| v >= threshold))
    }

    pub fn sample(&mut self, source: &dyn CounterSource, now: DateTime<Utc>) -> Option<CounterSnapshot> {
        if self.flushed {
            return None;
        }
        let elapsed = now - self.start;
        if elapsed < self.rules.flush_interval && !self.threshold_reached(&source.peek()) {
            return None;
        }
        self.cut(source, now)
    }

    /// Emits whatever accumulated since the last snapshot regardless of triggers. Idempotent.
    pub fn flush(&mut self, source: &dyn CounterSource, now: DateTime<Utc>) -> Option<CounterSnapshot> {
        if std::mem::replace(&mut self.flushed, true) {
            return None;
        }
        self.cut(source, now)
    }

    fn cut(&mut self, source: &dyn CounterSource, now: DateTime<Utc>) -> Option<CounterSnapshot> {
        let counts = source.take();
        let start = std::mem::replace(&mut self.start, now);
        let window_id = std::mem::replace(&mut self.window_id, self.registry.last_window_id());

        if counts.values().all(|v| *v == 0) {
            trace!("No {} activity since {start}", self.dimension);
            return None;
        }
        debug!("Emitting {} snapshot {counts:?}", self.dimension);
        Some(CounterSnapshot {
            session_id: self.session_id,
            dimension: self.dimension,
            start_time: start,
            duration: (now - start).max(Duration::zero()),
            counts,
            context_window_id: window_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::{
        config::AgentConfig,
        context::counters::{KeyboardCounter, MouseCounter, KEY_COUNT, MOVEMENT_PIXELS},
    };

    use super::*;

    fn t(millis: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap() + Duration::milliseconds(millis)
    }

    fn keyboard_segmenter(registry: ActiveContextRegistry) -> CounterSegmenter {
        CounterSegmenter::new(
            Dimension::Keyboard,
            SessionId(1),
            CounterRules {
                flush_interval: Duration::seconds(10),
                thresholds: Counts::from([(KEY_COUNT.into(), 10)]),
            },
            registry,
            t(0),
        )
    }

    #[test]
    fn test_count_threshold_cuts_early() {
        let counter = KeyboardCounter::new();
        let mut segmenter = keyboard_segmenter(ActiveContextRegistry::new());

        for i in 0..11 {
            counter.record_key_press();
            if i == 5 {
                assert_eq!(segmenter.sample(&counter, t(1_500)), None);
            }
        }
        let snapshot = segmenter.sample(&counter, t(3_000)).unwrap();
        assert_eq!(snapshot.counts[KEY_COUNT], 11);
        assert_eq!(snapshot.start_time, t(0));
        assert_eq!(snapshot.duration, Duration::seconds(3));
        assert_eq!(counter.peek()[KEY_COUNT], 0);

        assert_eq!(segmenter.sample(&counter, t(4_000)), None);
    }

    #[test]
    fn test_interval_cuts_and_skips_empty_windows() {
        let counter = KeyboardCounter::new();
        let mut segmenter = keyboard_segmenter(ActiveContextRegistry::new());

        assert_eq!(segmenter.sample(&counter, t(10_000)), None);
        counter.record_key_press();
        assert_eq!(segmenter.sample(&counter, t(15_000)), None);

        let snapshot = segmenter.sample(&counter, t(20_000)).unwrap();
        assert_eq!(snapshot.start_time, t(10_000));
        assert_eq!(snapshot.counts[KEY_COUNT], 1);
    }

    #[test]
    fn test_flush_ignores_triggers_once() {
        let counter = MouseCounter::new();
        let mut segmenter = CounterSegmenter::new(
            Dimension::Mouse,
            SessionId(1),
            CounterRules {
                flush_interval: Duration::seconds(10),
                thresholds: Counts::from([(MOVEMENT_PIXELS.into(), 100)]),
            },
            ActiveContextRegistry::new(),
            t(0),
        );
        counter.record_position(0., 0.);
        counter.record_position(30., 40.);

        assert_eq!(segmenter.sample(&counter, t(2_000)), None);
        let snapshot = segmenter.flush(&counter, t(2_500)).unwrap();
        assert_eq!(snapshot.counts[MOVEMENT_PIXELS], 50);

        counter.record_position(300., 400.);
        assert_eq!(segmenter.flush(&counter, t(3_000)), None);
        assert_eq!(segmenter.sample(&counter, t(30_000)), None);
    }

    #[test]
    fn test_default_mouse_rules_cut_past_100_pixels() {
        let counter = MouseCounter::new();
        let rules = AgentConfig::default().counter_rules(Dimension::Mouse).unwrap();
        let mut segmenter = CounterSegmenter::new(
            Dimension::Mouse,
            SessionId(1),
            rules,
            ActiveContextRegistry::new(),
            t(0),
        );

        counter.record_position(0., 0.);
        counter.record_position(60., 80.);
        assert_eq!(segmenter.sample(&counter, t(1_000)), None);

        counter.record_position(60., 81.);
        let snapshot = segmenter.sample(&counter, t(2_000)).unwrap();
        assert_eq!(snapshot.counts[MOVEMENT_PIXELS], 101);
    }

    #[test]
    fn test_window_reference_follows_snapshot_start() {
        let registry = ActiveContextRegistry::new();
        registry.register(Dimension::Window, StorageId(1));
        let counter = KeyboardCounter::new();
        let mut segmenter = keyboard_segmenter(registry.clone());

        counter.record_key_press();
        registry.register(Dimension::Window, StorageId(2));
        let first = segmenter.sample(&counter, t(10_000)).unwrap();
        assert_eq!(first.context_window_id, Some(StorageId(1)));

        counter.record_key_press();
        let second = segmenter.flush(&counter, t(12_000)).unwrap();
        assert_eq!(second.context_window_id, Some(StorageId(2)));
    }
}
