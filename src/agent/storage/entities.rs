use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{Counts, Dimension};

/// Identifier a sink assigned to a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageId(pub i64);

impl Display for StorageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// One continuous dwell interval on one activity context. Immutable once persisted.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct Segment {
    pub session_id: SessionId,
    pub dimension: Dimension,
    pub identity_key: Arc<str>,
    pub display_fields: BTreeMap<String, String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: Duration,
    /// Window segment that was in the foreground when this segment opened. A lookup, not an
    /// ownership relation: the referenced segment may be gone.
    pub context_window_id: Option<StorageId>,
}

impl Segment {
    pub fn end(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }
}

/// Tallies of a counting dimension over one flush window.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct CounterSnapshot {
    pub session_id: SessionId,
    pub dimension: Dimension,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: Duration,
    pub counts: Counts,
    pub context_window_id: Option<StorageId>,
}

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: SessionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Everything trackers hand over to the sink.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityRecord {
    Segment(Segment),
    Counters(CounterSnapshot),
}

impl ActivityRecord {
    pub fn dimension(&self) -> Dimension {
        match self {
            ActivityRecord::Segment(v) => v.dimension,
            ActivityRecord::Counters(v) => v.dimension,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            ActivityRecord::Segment(v) => v.start_time,
            ActivityRecord::Counters(v) => v.start_time,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ActivityRecord::Segment(v) => v.duration,
            ActivityRecord::Counters(v) => v.duration,
        }
    }
}

impl From<Segment> for ActivityRecord {
    fn from(value: Segment) -> Self {
        ActivityRecord::Segment(value)
    }
}

impl From<CounterSnapshot> for ActivityRecord {
    fn from(value: CounterSnapshot) -> Self {
        ActivityRecord::Counters(value)
    }
}

mod duration_ser {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(ms))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_record_json_shape() -> anyhow::Result<()> {
        let record = ActivityRecord::Segment(Segment {
            session_id: SessionId(1),
            dimension: Dimension::BrowserTab,
            identity_key: "rust-lang.org:https://rust-lang.org".into(),
            display_fields: BTreeMap::from([("domain".into(), "rust-lang.org".into())]),
            start_time: Utc.timestamp_millis_opt(1_530_662_400_250).unwrap(),
            duration: Duration::milliseconds(3_500),
            context_window_id: Some(StorageId(4)),
        });

        let value = serde_json::to_value(&record)?;
        assert_eq!(value["kind"], "segment");
        assert_eq!(value["dimension"], "browser_tab");
        assert_eq!(value["duration"], 3_500);
        assert_eq!(value["start_time"], 1_530_662_400_250i64);
        assert_eq!(serde_json::from_value::<ActivityRecord>(value)?, record);
        Ok(())
    }
}
