//! Describes "what is currently active" for every tracked dimension.
//! [ContextProvider] and [CounterSource] are the two capabilities the agent polls; everything
//! OS specific lives behind them.

pub mod browser;
pub mod counters;
pub mod files;
pub mod game;
pub mod identity;
pub mod window;

use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A tracked activity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Window,
    BrowserTab,
    Game,
    File,
    Keyboard,
    Mouse,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Window,
        Dimension::BrowserTab,
        Dimension::Game,
        Dimension::File,
        Dimension::Keyboard,
        Dimension::Mouse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Window => "window",
            Dimension::BrowserTab => "browser_tab",
            Dimension::Game => "game",
            Dimension::File => "file",
            Dimension::Keyboard => "keyboard",
            Dimension::Mouse => "mouse",
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown dimension {s}"))
    }
}

/// Kind of an identity based context. Every kind maps onto exactly one [Dimension].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Window,
    BrowserTab,
    Game,
    File,
}

impl ContextKind {
    pub fn dimension(&self) -> Dimension {
        match self {
            ContextKind::Window => Dimension::Window,
            ContextKind::BrowserTab => Dimension::BrowserTab,
            ContextKind::Game => Dimension::Game,
            ContextKind::File => Dimension::File,
        }
    }
}

/// One sample of the current activity. Two contexts are the same activity iff their kind and
/// identity key match, display fields are informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityContext {
    pub kind: ContextKind,
    /// For example 'code:main.rs - dwell' or 'github.com:https://github.com/rust-lang'
    pub identity_key: Arc<str>,
    pub display_fields: BTreeMap<String, String>,
}

impl ActivityContext {
    pub fn new(kind: ContextKind, identity_key: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            identity_key: identity_key.into(),
            display_fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.display_fields.insert(name.to_owned(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.display_fields.get("title").map(String::as_str)
    }
}

impl PartialEq for ActivityContext {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.identity_key == other.identity_key
    }
}

impl Eq for ActivityContext {}

/// Polled source of the current activity for one dimension.
///
/// Returning `Ok(None)` means nothing is active, which is an expected state. Errors are
/// reserved for unexpected failures and only cost the current sample.
#[cfg_attr(test, mockall::automock)]
pub trait ContextProvider: Send {
    fn poll(&mut self) -> Result<Option<ActivityContext>>;

    /// A more expensive lookup used to recover a context while the dimension is idle. Called
    /// at most once per probe interval.
    fn probe(&mut self) -> Result<Option<ActivityContext>> {
        Ok(None)
    }
}

/// Named tallies, e.g. `{key_count: 12}` or `{click_count: 3, movement_pixels: 840}`.
pub type Counts = BTreeMap<String, u64>;

/// Monotonically increasing counters fed by input hooks.
pub trait CounterSource: Send + Sync {
    /// Current tallies since the last [CounterSource::take].
    fn peek(&self) -> Counts;

    /// Returns the current tallies and resets all of them to zero.
    fn take(&self) -> Counts;
}
