use std::{path::{Path, PathBuf}, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use collection::{
    counter::CounterSegmenter,
    scheduler::Scheduler,
    segmenter::Segmenter,
    tracker::{ContextSampler, CounterSampler},
};
use processing::{persist::PersistingProcessor, ProcessingModule};
use registry::ActiveContextRegistry;
use storage::{
    entities::{ActivityRecord, SessionId},
    sink::{SegmentSink, SessionStore},
    ActivityStore,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::AgentConfig,
    context::{
        browser::{BrowserTabProvider, KnownBrowsers},
        files::FileWatchProvider,
        game::{GameProvider, KnownGames, SysinfoProcessSource},
        window::{
            platform_window_source, SharedWindowSource, WindowContextProvider, WindowSource,
        },
        ContextProvider, CounterSource, Dimension,
    },
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod collection;
pub mod error;
pub mod processing;
pub mod registry;
pub mod shutdown;
pub mod storage;

/// Records buffered between the trackers and the sink before new ones get dropped.
const RECORD_BUFFER: usize = 64;
const WATCHDOG_PERIOD: Duration = Duration::from_secs(10);

/// The capabilities the agent polls, one per tracked dimension.
#[derive(Default)]
pub struct ProviderSet {
    contexts: Vec<(Dimension, Box<dyn ContextProvider>)>,
    counters: Vec<(Dimension, Arc<dyn CounterSource>)>,
}

impl ProviderSet {
    pub fn with_context(mut self, dimension: Dimension, provider: Box<dyn ContextProvider>) -> Self {
        self.contexts.push((dimension, provider));
        self
    }

    /// Counters are fed by input hooks owned by the caller, which keeps its own handle to
    /// `source`.
    pub fn with_counter(mut self, dimension: Dimension, source: Arc<dyn CounterSource>) -> Self {
        self.counters.push((dimension, source));
        self
    }

    /// Providers available on this machine for every enabled dimension. Dimensions without a
    /// backend are skipped with a warning.
    pub fn for_platform(config: &AgentConfig, data_dir: &Path) -> Result<Self> {
        let normalizer = Arc::new(config.title_normalizer()?);
        let mut providers = ProviderSet::default();

        let needs_window = [Dimension::Window, Dimension::BrowserTab, Dimension::Game]
            .into_iter()
            .any(|v| config.is_enabled(v));
        let shared_window = if needs_window {
            platform_window_source().map(SharedWindowSource::new)
        } else {
            None
        };
        let window_source = || shared_window.clone().map(|v| Box::new(v) as Box<dyn WindowSource>);

        if config.is_enabled(Dimension::Window) {
            match window_source() {
                Some(source) => {
                    providers = providers.with_context(
                        Dimension::Window,
                        Box::new(WindowContextProvider::new(source, normalizer.clone())),
                    )
                }
                None => warn!("Window tracking is unavailable"),
            }
        }

        if config.is_enabled(Dimension::BrowserTab) {
            match window_source() {
                Some(source) => {
                    let provider = BrowserTabProvider::new(
                        source,
                        Box::new(KnownBrowsers::default()),
                        normalizer.clone(),
                    )?;
                    providers = providers.with_context(Dimension::BrowserTab, Box::new(provider))
                }
                None => warn!("Browser tab tracking is unavailable"),
            }
        }

        if config.is_enabled(Dimension::Game) {
            // Falls back to process scanning without a window backend.
            let provider = GameProvider::new(
                window_source(),
                Box::new(SysinfoProcessSource::new()),
                Box::new(KnownGames::default()),
            );
            providers = providers.with_context(Dimension::Game, Box::new(provider));
        }

        if config.is_enabled(Dimension::File) {
            // The agent's own store and logs change constantly.
            let provider = FileWatchProvider::new(
                config.file.watch_dirs.clone(),
                vec![data_dir.to_path_buf()],
                config.file.max_depth,
            )?;
            providers = providers.with_context(Dimension::File, Box::new(provider));
        }

        for dimension in [Dimension::Keyboard, Dimension::Mouse] {
            if config.is_enabled(dimension) {
                warn!("No input hook available, {dimension} is not tracked");
            }
        }

        Ok(providers)
    }
}

/// Represents the starting point for the agent. Runs one session until ctrl-c or SIGTERM.
pub async fn start_agent(config: AgentConfig, data_dir: PathBuf, providers: ProviderSet) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let store = ActivityStore::open(config.storage, &data_dir, clock.clone())
        .await
        .with_context(|| format!("Failed to open the store in {data_dir:?}"))?;
    let store = Arc::new(store);
    info!("Storing activity in {data_dir:?} using {:?}", config.storage);

    let shutdown_token = CancellationToken::new();
    let (_, session) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        run_session(&config, providers, store, clock, shutdown_token.clone()),
    );
    session?;
    Ok(())
}

/// Opens a session, tracks every provided dimension until `shutdown` fires, flushes what is
/// still open and closes the session.
pub async fn run_session<S>(
    config: &AgentConfig,
    providers: ProviderSet,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<SessionId>
where
    S: SegmentSink + SessionStore + 'static,
{
    let session_id = store.open_session(clock.time()).await?;
    info!("Opened {session_id}");

    let registry = ActiveContextRegistry::new();
    let (sender, receiver) = mpsc::channel(RECORD_BUFFER);
    let mut scheduler = create_scheduler(
        config,
        providers,
        session_id,
        &registry,
        sender,
        clock.clone(),
    );
    let processing = tokio::spawn(create_processor(receiver, store.clone(), &registry).run());

    info!(
        "Tracking {:?}",
        scheduler.dimensions().map(|v| v.as_str()).collect::<Vec<_>>()
    );
    scheduler.start_all();
    scheduler.supervise(shutdown, WATCHDOG_PERIOD).await;

    for e in scheduler.stop_all().await {
        error!("{e}");
    }
    // The last sender goes with the scheduler, letting the sink drain and exit.
    drop(scheduler);
    if let Err(e) = processing.await {
        error!("Processing module failed {e:?}");
    }

    store.close_session(session_id, clock.time()).await?;
    registry.clear();
    info!("Closed {session_id}");
    Ok(session_id)
}

fn create_scheduler(
    config: &AgentConfig,
    providers: ProviderSet,
    session_id: SessionId,
    registry: &ActiveContextRegistry,
    sender: mpsc::Sender<ActivityRecord>,
    clock: Arc<dyn Clock>,
) -> Scheduler {
    let mut scheduler = Scheduler::new(sender, clock.clone(), config.stop_timeout());

    for (dimension, provider) in providers.contexts {
        let Some(rules) = config.segment_rules(dimension) else {
            warn!("{dimension} is a counting dimension, ignoring its context provider");
            continue;
        };
        let segmenter = Segmenter::new(dimension, session_id, rules, registry.clone());
        scheduler.register(
            ContextSampler::new(provider, segmenter, config.probe_interval()),
            config.interval_for(dimension),
        );
    }

    for (dimension, source) in providers.counters {
        let Some(rules) = config.counter_rules(dimension) else {
            warn!("{dimension} is not a counting dimension, ignoring its counter");
            continue;
        };
        let segmenter =
            CounterSegmenter::new(dimension, session_id, rules, registry.clone(), clock.time());
        scheduler.register(
            CounterSampler::new(source, segmenter),
            config.interval_for(dimension),
        );
    }

    scheduler
}

fn create_processor<S: SegmentSink>(
    receiver: mpsc::Receiver<ActivityRecord>,
    sink: S,
    registry: &ActiveContextRegistry,
) -> ProcessingModule<PersistingProcessor<S>> {
    ProcessingModule::new(receiver, PersistingProcessor::new(sink, registry.clone()))
}

#[cfg(test)]
mod agent_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use crate::{
        agent::storage::sqlite::SqliteStore,
        context::{
            counters::{KeyboardCounter, KEY_COUNT},
            ActivityContext, ContextKind, MockContextProvider,
        },
        utils::{clock::TestClock, logging::TEST_LOGGING},
    };

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap()
    }

    /// Reports window "A" for the first three polls and "B" afterwards.
    fn switching_window() -> MockContextProvider {
        let polls = AtomicUsize::new(0);
        let mut provider = MockContextProvider::new();
        provider.expect_poll().returning(move || {
            let key = match polls.fetch_add(1, Ordering::SeqCst) {
                0..=2 => "code:A",
                _ => "code:B",
            };
            Ok(Some(
                ActivityContext::new(ContextKind::Window, key).with_field("title", key),
            ))
        });
        provider
    }

    #[tokio::test(start_paused = true)]
    async fn smoke_test_session() -> Result<()> {
        *TEST_LOGGING;
        let store = Arc::new(SqliteStore::open_in_memory()?);
        let keyboard = Arc::new(KeyboardCounter::new());
        for _ in 0..3 {
            keyboard.record_key_press();
        }
        let providers = ProviderSet::default()
            .with_context(Dimension::Window, Box::new(switching_window()))
            .with_counter(Dimension::Keyboard, keyboard.clone());

        let config = AgentConfig::default();
        let shutdown = CancellationToken::new();
        let (session, _) = tokio::join!(
            run_session(
                &config,
                providers,
                store.clone(),
                Arc::new(TestClock::new(start())),
                shutdown.clone(),
            ),
            async {
                tokio::time::sleep(Duration::from_millis(6500)).await;
                shutdown.cancel();
            }
        );
        let session = session?;

        let segments = store.segments_for_session(session).await?;
        assert_eq!(segments.len(), 2);
        assert_eq!(&*segments[0].identity_key, "code:A");
        assert_eq!(segments[0].duration, chrono::Duration::seconds(3));
        assert_eq!(&*segments[1].identity_key, "code:B");
        assert_eq!(segments[1].duration, chrono::Duration::milliseconds(3500));

        let snapshots = store.counter_snapshots_for_session(session).await?;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].counts[KEY_COUNT], 3);

        let session = store.session(session).await?;
        assert!(!session.is_active);
        assert!(session
            .end_time
            .is_some_and(|v| v >= start() + chrono::Duration::milliseconds(6500)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_counting_dimension_rejects_context_provider() -> Result<()> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        let providers = ProviderSet::default()
            .with_context(Dimension::Keyboard, Box::new(MockContextProvider::new()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let session = run_session(
            &AgentConfig::default(),
            providers,
            store.clone(),
            Arc::new(TestClock::new(start())),
            shutdown,
        )
        .await?;

        assert_eq!(session, SessionId(1));
        assert!(store.segments_for_session(session).await?.is_empty());
        assert_ne!(store.session(session).await?.end_time, None);
        Ok(())
    }
}
