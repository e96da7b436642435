//! Agent configuration: built-in defaults, overlaid by an optional TOML file, overlaid by
//! `DWELL__*` environment variables (e.g. `DWELL__GAME__MIN_DURATION_SECS=45`).

use std::{collections::BTreeMap, env, path::{Path, PathBuf}, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    agent::collection::{counter::CounterRules, exclusion::ExclusionList, segmenter::SegmentRules},
    context::{
        counters::{CLICK_COUNT, KEY_COUNT, MOVEMENT_PIXELS},
        identity::{TitleNormalizer, DEFAULT_VOLATILE_TITLE_PATTERNS},
        Dimension,
    },
};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "DWELL";
/// Upper bound of every interval and duration setting, one week.
pub const MAX_SECONDS: f64 = 7. * 24. * 60. * 60.;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{name} must be a positive number of seconds up to {MAX_SECONDS}, got {value}")]
    InvalidInterval { name: String, value: f64 },

    #[error("{name} must be a non-negative number of seconds up to {MAX_SECONDS}, got {value}")]
    InvalidThreshold { name: String, value: f64 },

    #[error("count threshold {name} must be greater than zero")]
    ZeroCountThreshold { name: String },

    #[error("invalid title pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Jsonl,
}

/// Settings of an identity based dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentDimensionConfig {
    pub enabled: bool,
    /// Overrides [AgentConfig::poll_interval_secs].
    pub poll_interval_secs: Option<f64>,
    pub min_duration_secs: f64,
    /// Case-insensitive substrings of identity keys or titles that are never persisted.
    pub excluded: Vec<String>,
}

impl Default for SegmentDimensionConfig {
    fn default() -> Self {
        Self::with_min_duration(1.)
    }
}

impl SegmentDimensionConfig {
    fn with_min_duration(min_duration_secs: f64) -> Self {
        Self {
            enabled: true,
            poll_interval_secs: None,
            min_duration_secs,
            excluded: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDimensionConfig {
    pub enabled: bool,
    pub poll_interval_secs: Option<f64>,
    pub min_duration_secs: f64,
    /// Path substrings, e.g. a build directory.
    pub excluded: Vec<String>,
    pub watch_dirs: Vec<PathBuf>,
    pub max_depth: usize,
}

impl Default for FileDimensionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: None,
            min_duration_secs: 1.,
            excluded: vec![],
            watch_dirs: default_watch_dirs(),
            max_depth: 4,
        }
    }
}

fn default_watch_dirs() -> Vec<PathBuf> {
    let Some(home) = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) else {
        return vec![];
    };
    let home = PathBuf::from(home);
    ["Desktop", "Documents", "Downloads"]
        .into_iter()
        .map(|v| home.join(v))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterDimensionConfig {
    pub enabled: bool,
    pub poll_interval_secs: Option<f64>,
    pub flush_interval_secs: f64,
    pub count_thresholds: BTreeMap<String, u64>,
}

impl Default for CounterDimensionConfig {
    fn default() -> Self {
        Self::with_thresholds(&[])
    }
}

impl CounterDimensionConfig {
    fn with_thresholds(thresholds: &[(&str, u64)]) -> Self {
        Self {
            enabled: true,
            poll_interval_secs: None,
            flush_interval_secs: 10.,
            count_thresholds: thresholds
                .iter()
                .map(|(k, v)| ((*k).to_owned(), *v))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub poll_interval_secs: f64,
    /// How often an idle dimension may run its expensive recovery lookup.
    pub probe_interval_secs: f64,
    pub stop_timeout_secs: f64,
    pub storage: StorageBackend,
    pub normalize_titles: bool,
    pub volatile_title_patterns: Vec<String>,
    pub window: SegmentDimensionConfig,
    pub browser: SegmentDimensionConfig,
    pub game: SegmentDimensionConfig,
    pub file: FileDimensionConfig,
    pub keyboard: CounterDimensionConfig,
    pub mouse: CounterDimensionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1.,
            probe_interval_secs: 60.,
            stop_timeout_secs: 5.,
            storage: StorageBackend::default(),
            normalize_titles: true,
            volatile_title_patterns: DEFAULT_VOLATILE_TITLE_PATTERNS
                .iter()
                .map(|v| (*v).to_owned())
                .collect(),
            window: SegmentDimensionConfig::with_min_duration(1.),
            browser: SegmentDimensionConfig::with_min_duration(3.),
            // Launchers flicker through short lived processes.
            game: SegmentDimensionConfig::with_min_duration(30.),
            file: FileDimensionConfig::default(),
            keyboard: CounterDimensionConfig::with_thresholds(&[(KEY_COUNT, 10)]),
            // Thresholds fire at `>=`, so this cuts once the pointer travelled more than 100px.
            mouse: CounterDimensionConfig::with_thresholds(&[
                (MOVEMENT_PIXELS, 101),
                (CLICK_COUNT, 1),
            ]),
        }
    }
}

/// Clamped into `0..=MAX_SECONDS`, so an unvalidated config can't panic here. NaN maps to the
/// upper bound.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_SECONDS).max(0.))
        .unwrap_or(Duration::from_secs_f64(MAX_SECONDS))
}

fn chrono_seconds(value: f64) -> chrono::Duration {
    chrono::Duration::from_std(seconds(value)).unwrap_or(chrono::Duration::zero())
}

fn in_range(value: f64) -> bool {
    value <= MAX_SECONDS && Duration::try_from_secs_f64(value).is_ok()
}

fn check_interval(name: &str, value: f64) -> Result<(), ConfigurationError> {
    if value > 0. && in_range(value) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidInterval {
            name: name.to_owned(),
            value,
        })
    }
}

fn check_threshold(name: &str, value: f64) -> Result<(), ConfigurationError> {
    if in_range(value) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidThreshold {
            name: name.to_owned(),
            value,
        })
    }
}

impl AgentConfig {
    /// Loads the configuration. An explicit `config_file` must exist, otherwise
    /// `<data_dir>/config.toml` is used when present.
    pub fn load(config_file: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigurationError> {
        let file = match config_file {
            Some(path) => File::from(path).required(true),
            None => File::from(data_dir.join(CONFIG_FILE)).required(false),
        };
        let config = Self::builder()?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(config)
    }

    /// Same layering without the environment, mostly for tests.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigurationError> {
        let config = Self::builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::finish(config)
    }

    /// Seeds the defaults key by key, so a partial table such as `[game] enabled = false` keeps
    /// the remaining game defaults.
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigurationError> {
        Ok(Config::builder().add_source(Config::try_from(&AgentConfig::default())?))
    }

    fn finish(config: Config) -> Result<Self, ConfigurationError> {
        let config: AgentConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_interval("poll_interval_secs", self.poll_interval_secs)?;
        check_interval("probe_interval_secs", self.probe_interval_secs)?;
        check_interval("stop_timeout_secs", self.stop_timeout_secs)?;

        for (name, config) in [
            ("window", &self.window),
            ("browser", &self.browser),
            ("game", &self.game),
        ] {
            if let Some(v) = config.poll_interval_secs {
                check_interval(&format!("{name}.poll_interval_secs"), v)?;
            }
            check_threshold(&format!("{name}.min_duration_secs"), config.min_duration_secs)?;
        }
        if let Some(v) = self.file.poll_interval_secs {
            check_interval("file.poll_interval_secs", v)?;
        }
        check_threshold("file.min_duration_secs", self.file.min_duration_secs)?;

        for (name, config) in [("keyboard", &self.keyboard), ("mouse", &self.mouse)] {
            if let Some(v) = config.poll_interval_secs {
                check_interval(&format!("{name}.poll_interval_secs"), v)?;
            }
            check_interval(&format!("{name}.flush_interval_secs"), config.flush_interval_secs)?;
            if let Some((counter, _)) = config.count_thresholds.iter().find(|(_, v)| **v == 0) {
                return Err(ConfigurationError::ZeroCountThreshold {
                    name: format!("{name}.count_thresholds.{counter}"),
                });
            }
        }

        self.title_normalizer().map(|_| ())
    }

    pub fn title_normalizer(&self) -> Result<TitleNormalizer, ConfigurationError> {
        if !self.normalize_titles {
            return Ok(TitleNormalizer::disabled());
        }
        for pattern in &self.volatile_title_patterns {
            if let Err(source) = regex::Regex::new(pattern) {
                return Err(ConfigurationError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                });
            }
        }
        TitleNormalizer::new(&self.volatile_title_patterns).map_err(|source| {
            ConfigurationError::InvalidPattern {
                pattern: self.volatile_title_patterns.join(" | "),
                source,
            }
        })
    }

    pub fn is_enabled(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Window => self.window.enabled,
            Dimension::BrowserTab => self.browser.enabled,
            Dimension::Game => self.game.enabled,
            Dimension::File => self.file.enabled,
            Dimension::Keyboard => self.keyboard.enabled,
            Dimension::Mouse => self.mouse.enabled,
        }
    }

    /// Polling interval of a dimension, falling back to the global one.
    pub fn interval_for(&self, dimension: Dimension) -> Duration {
        let overridden = match dimension {
            Dimension::Window => self.window.poll_interval_secs,
            Dimension::BrowserTab => self.browser.poll_interval_secs,
            Dimension::Game => self.game.poll_interval_secs,
            Dimension::File => self.file.poll_interval_secs,
            Dimension::Keyboard => self.keyboard.poll_interval_secs,
            Dimension::Mouse => self.mouse.poll_interval_secs,
        };
        seconds(overridden.unwrap_or(self.poll_interval_secs))
    }

    /// Noise filters of an identity dimension. `None` for counting dimensions.
    pub fn segment_rules(&self, dimension: Dimension) -> Option<SegmentRules> {
        let (min_duration_secs, excluded) = match dimension {
            Dimension::Window => (self.window.min_duration_secs, &self.window.excluded),
            Dimension::BrowserTab => (self.browser.min_duration_secs, &self.browser.excluded),
            Dimension::Game => (self.game.min_duration_secs, &self.game.excluded),
            Dimension::File => (self.file.min_duration_secs, &self.file.excluded),
            Dimension::Keyboard | Dimension::Mouse => return None,
        };
        Some(SegmentRules {
            min_duration: chrono_seconds(min_duration_secs),
            exclusions: ExclusionList::new(excluded),
        })
    }

    /// Snapshot triggers of a counting dimension. `None` for identity dimensions.
    pub fn counter_rules(&self, dimension: Dimension) -> Option<CounterRules> {
        let config = match dimension {
            Dimension::Keyboard => &self.keyboard,
            Dimension::Mouse => &self.mouse,
            _ => return None,
        };
        Some(CounterRules {
            flush_interval: chrono_seconds(config.flush_interval_secs),
            thresholds: config.count_thresholds.clone(),
        })
    }

    pub fn probe_interval(&self) -> chrono::Duration {
        chrono_seconds(self.probe_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        seconds(self.stop_timeout_secs)
    }
}
