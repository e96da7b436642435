use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::{
    agent::{
        registry::ActiveContextRegistry,
        storage::entities::{Segment, SessionId, StorageId},
    },
    context::{ActivityContext, Dimension},
};

use super::exclusion::ExclusionList;

/// Per dimension noise filters applied when a segment closes.
#[derive(Debug, Clone)]
pub struct SegmentRules {
    /// Segments must last strictly longer than this to be emitted.
    pub min_duration: Duration,
    pub exclusions: ExclusionList,
}

impl Default for SegmentRules {
    fn default() -> Self {
        Self {
            min_duration: Duration::seconds(1),
            exclusions: ExclusionList::default(),
        }
    }
}

#[derive(Debug)]
enum SegmenterState {
    Idle,
    Tracking {
        context: ActivityContext,
        start: DateTime<Utc>,
        window_id: Option<StorageId>,
    },
    Flushed,
}

/// Turns a stream of context samples of one dimension into completed [Segment]s.
///
/// At most one segment is open at a time. A segment closes when the sampled context changes
/// (including to nothing) or on [Segmenter::flush], and is emitted only if it outlived
/// [SegmentRules::min_duration] and is not excluded. After a flush every further call is a no-op.
pub struct Segmenter {
    dimension: Dimension,
    session_id: SessionId,
    rules: SegmentRules,
    registry: ActiveContextRegistry,
    state: SegmenterState,
}

impl Segmenter {
    pub fn new(
        dimension: Dimension,
        session_id: SessionId,
        rules: SegmentRules,
        registry: ActiveContextRegistry,
    ) -> Self {
        Self {
            dimension,
            session_id,
            rules,
            registry,
            state: SegmenterState::Idle,
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SegmenterState::Idle)
    }

    pub fn is_flushed(&self) -> bool {
        matches!(self.state, SegmenterState::Flushed)
    }

    pub fn sample(&mut self, input: Option<ActivityContext>, now: DateTime<Utc>) -> Option<Segment> {
        let unchanged = match (&self.state, &input) {
            (SegmenterState::Flushed, _) => {
                trace!("Ignoring {} sample after flush", self.dimension);
                true
            }
            (SegmenterState::Idle, None) => true,
            (SegmenterState::Tracking { context, .. }, Some(input)) => context == input,
            _ => false,
        };
        if unchanged {
            return None;
        }

        let segment = self.close(now);
        if let Some(context) = input {
            self.open(context, now);
        }
        segment
    }

    /// Closes the open segment, if any, and stops accepting samples. Idempotent.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<Segment> {
        let segment = self.close(now);
        self.state = SegmenterState::Flushed;
        segment
    }

    fn open(&mut self, context: ActivityContext, now: DateTime<Utc>) {
        // The window dimension is the one being referenced, it never references itself.
        let window_id = match self.dimension {
            Dimension::Window => None,
            _ => self.registry.last_window_id(),
        };
        trace!("Opened {} segment {}", self.dimension, context.identity_key);
        self.state = SegmenterState::Tracking {
            context,
            start: now,
            window_id,
        };
    }

    fn close(&mut self, now: DateTime<Utc>) -> Option<Segment> {
        let SegmenterState::Tracking {
            context,
            start,
            window_id,
        } = std::mem::replace(&mut self.state, SegmenterState::Idle)
        else {
            return None;
        };

        let duration = (now - start).max(Duration::zero());
        if duration <= self.rules.min_duration {
            debug!(
                "Discarded {} segment {} lasting {}ms",
                self.dimension,
                context.identity_key,
                duration.num_milliseconds()
            );
            return None;
        }
        if self.rules.exclusions.is_excluded(&context) {
            debug!("Excluded {} segment {}", self.dimension, context.identity_key);
            return None;
        }

        debug!(
            "Emitting {} segment {} lasting {}ms",
            self.dimension,
            context.identity_key,
            duration.num_milliseconds()
        );
        Some(Segment {
            session_id: self.session_id,
            dimension: self.dimension,
            identity_key: context.identity_key,
            display_fields: context.display_fields,
            start_time: start,
            duration,
            context_window_id: window_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::context::ContextKind;

    use super::*;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn window(key: &str) -> Option<ActivityContext> {
        Some(ActivityContext::new(ContextKind::Window, key).with_field("title", key))
    }

    fn segmenter(dimension: Dimension, rules: SegmentRules) -> Segmenter {
        Segmenter::new(dimension, SessionId(1), rules, ActiveContextRegistry::new())
    }

    /// Feeds one sample per second starting at t(0), then flushes one second after the last.
    fn run(segmenter: &mut Segmenter, samples: Vec<Option<ActivityContext>>) -> Vec<Segment> {
        let len = samples.len() as i64;
        let mut emitted: Vec<_> = samples
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| segmenter.sample(v, t(i as i64)))
            .collect();
        emitted.extend(segmenter.flush(t(len)));
        emitted
    }

    #[test]
    fn test_change_then_idle() {
        let mut segmenter = segmenter(Dimension::Window, SegmentRules::default());
        let emitted = run(
            &mut segmenter,
            vec![
                window("A"),
                window("A"),
                window("A"),
                window("B"),
                window("B"),
                None,
                None,
            ],
        );

        assert_eq!(emitted.len(), 2);
        assert_eq!(&*emitted[0].identity_key, "A");
        assert_eq!(emitted[0].start_time, t(0));
        assert_eq!(emitted[0].duration, Duration::seconds(3));
        assert_eq!(&*emitted[1].identity_key, "B");
        assert_eq!(emitted[1].start_time, t(3));
        assert_eq!(emitted[1].duration, Duration::seconds(2));
        assert!(segmenter.is_flushed());
    }

    #[test]
    fn test_short_dwell_is_discarded() {
        let mut segmenter = segmenter(Dimension::Window, SegmentRules::default());
        let start = t(0);
        assert_eq!(segmenter.sample(window("A"), start), None);
        assert_eq!(
            segmenter.sample(None, start + Duration::milliseconds(500)),
            None
        );
        assert_eq!(segmenter.flush(t(5)), None);

        // Exactly the threshold is still noise.
        let mut segmenter = segmenter_with_min(1);
        segmenter.sample(window("A"), t(0));
        assert_eq!(segmenter.sample(window("B"), t(1)), None);
    }

    fn segmenter_with_min(seconds: i64) -> Segmenter {
        segmenter(
            Dimension::Game,
            SegmentRules {
                min_duration: Duration::seconds(seconds),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_flush_covers_whole_session() {
        let mut segmenter = segmenter_with_min(30);
        for i in 0..600 {
            assert_eq!(segmenter.sample(window("Factorio"), t(i)), None);
        }
        let segment = segmenter.flush(t(600)).unwrap();
        assert_eq!(segment.start_time, t(0));
        assert_eq!(segment.duration, Duration::seconds(600));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut segmenter = segmenter(Dimension::Window, SegmentRules::default());
        segmenter.sample(window("A"), t(0));
        assert!(segmenter.flush(t(10)).is_some());
        assert!(segmenter.flush(t(20)).is_none());
        assert!(segmenter.sample(window("B"), t(21)).is_none());
        assert!(segmenter.flush(t(30)).is_none());
    }

    #[test]
    fn test_excluded_context_is_never_emitted() {
        let mut segmenter = segmenter(
            Dimension::Window,
            SegmentRules {
                min_duration: Duration::seconds(1),
                exclusions: ExclusionList::new(["keepass"]),
            },
        );
        let emitted = run(
            &mut segmenter,
            vec![
                window("KeePassXC:vault"),
                window("KeePassXC:vault"),
                window("code:main.rs"),
                window("code:main.rs"),
                window("code:main.rs"),
            ],
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(&*emitted[0].identity_key, "code:main.rs");
    }

    #[test]
    fn test_durations_are_counted_once() {
        let keys = ["A", "A", "B", "C", "C", "C", "A", "B", "B"];
        let samples: Vec<_> = keys
            .iter()
            .map(|v| window(v))
            .chain([None, None, window("D")])
            .collect();
        let mut segmenter = segmenter(Dimension::Window, SegmentRules::default());
        let emitted = run(&mut segmenter, samples);

        // B at 2s, A at 6s and the trailing D lasted exactly 1s each and were discarded.
        let total: i64 = emitted.iter().map(|v| v.duration.num_seconds()).sum();
        assert_eq!(emitted.len(), 3);
        assert_eq!(total, 2 + 3 + 2);
        for pair in emitted.windows(2) {
            assert!(pair[0].end() <= pair[1].start_time);
        }
    }

    #[test]
    fn test_window_reference_is_captured_at_open() {
        let registry = ActiveContextRegistry::new();
        let mut segmenter = Segmenter::new(
            Dimension::BrowserTab,
            SessionId(1),
            SegmentRules::default(),
            registry.clone(),
        );

        registry.register(Dimension::Window, StorageId(7));
        let tab = Some(ActivityContext::new(ContextKind::BrowserTab, "docs.rs:https://docs.rs"));
        segmenter.sample(tab, t(0));
        registry.register(Dimension::Window, StorageId(8));

        let segment = segmenter.flush(t(10)).unwrap();
        assert_eq!(segment.context_window_id, Some(StorageId(7)));
    }

    #[test]
    fn test_window_segments_do_not_reference_themselves() {
        let registry = ActiveContextRegistry::new();
        registry.register(Dimension::Window, StorageId(7));
        let mut segmenter =
            Segmenter::new(Dimension::Window, SessionId(1), SegmentRules::default(), registry);
        segmenter.sample(window("A"), t(0));
        assert_eq!(segmenter.flush(t(10)).unwrap().context_window_id, None);
    }
}
