use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, TryRecvError},
};

use anyhow::{anyhow, Context, Result};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{debug, info, trace, warn};

use super::{ActivityContext, ContextKind, ContextProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTouch {
    pub path: PathBuf,
    pub action: &'static str,
    /// Previous location of a moved file.
    pub source: Option<PathBuf>,
}

/// Reports the most recent file system event under a set of directories.
///
/// Events are collected by a recursive `notify` watcher in the background. Each poll drains
/// them and returns the last touched file, so a segment covers the time a file kept being
/// written to.
pub struct FileWatchProvider {
    _watcher: Option<RecommendedWatcher>,
    events: Receiver<notify::Result<Event>>,
    watch_dirs: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
    max_depth: usize,
}

impl FileWatchProvider {
    /// Watches every existing directory of `watch_dirs`. Directories that can't be watched are
    /// skipped with a warning.
    pub fn new(watch_dirs: Vec<PathBuf>, ignored: Vec<PathBuf>, max_depth: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| {
                // Fails only once the provider is gone.
                let _ = sender.send(event);
            },
            notify::Config::default(),
        )
        .context("Failed to create the file watcher")?;

        let mut watched = Vec::new();
        for dir in watch_dirs {
            if !dir.is_dir() {
                debug!("{dir:?} does not exist, skipping");
                continue;
            }
            match watcher.watch(&dir, RecursiveMode::Recursive) {
                Ok(()) => {
                    info!("Watching {dir:?}");
                    watched.push(dir);
                }
                Err(e) => warn!("Failed to watch {dir:?}: {e}"),
            }
        }

        let mut provider = Self::from_events(receiver, watched, ignored, max_depth);
        provider._watcher = Some(watcher);
        Ok(provider)
    }

    fn from_events(
        events: Receiver<notify::Result<Event>>,
        watch_dirs: Vec<PathBuf>,
        ignored: Vec<PathBuf>,
        max_depth: usize,
    ) -> Self {
        Self {
            _watcher: None,
            events,
            watch_dirs: with_canonical(watch_dirs),
            ignored: with_canonical(ignored),
            max_depth,
        }
    }

    fn touch(&self, event: &Event) -> Option<FileTouch> {
        let (path, action, source) = match event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                return None
            }
            EventKind::Create(_) => (event.paths.first()?, "created", None),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                (event.paths.get(1)?, "moved", event.paths.first().cloned())
            }
            // The destination half of a split rename carries the new path.
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return None,
            EventKind::Modify(ModifyKind::Name(_)) => (event.paths.first()?, "moved", None),
            EventKind::Modify(_) => (event.paths.first()?, "modified", None),
            EventKind::Remove(_) => (event.paths.first()?, "deleted", None),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
        };

        if action != "deleted" && path.is_dir() {
            return None;
        }
        if !self.is_tracked(path) {
            trace!("Ignoring {action} {path:?}");
            return None;
        }
        Some(FileTouch {
            path: path.clone(),
            action,
            source,
        })
    }

    fn is_tracked(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|v| path.starts_with(v)) {
            return false;
        }
        let Some(relative) = self
            .watch_dirs
            .iter()
            .find_map(|dir| path.strip_prefix(dir).ok())
        else {
            return false;
        };
        let hidden = relative
            .components()
            .any(|v| v.as_os_str().to_string_lossy().starts_with('.'));
        let depth = relative.components().count().saturating_sub(1);
        !hidden && depth <= self.max_depth
    }
}

/// Some backends report resolved paths, so symlinked directories are matched both ways.
fn with_canonical(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut all = paths.clone();
    for path in paths {
        if let Ok(canonical) = path.canonicalize() {
            if canonical != path {
                all.push(canonical);
            }
        }
    }
    all
}

pub fn file_context(touch: &FileTouch) -> ActivityContext {
    let path = touch.path.to_string_lossy();
    let file_type = touch
        .path
        .extension()
        .map(|v| v.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let context = ActivityContext::new(ContextKind::File, path.as_ref())
        .with_field("path", path.as_ref())
        .with_field("action", touch.action)
        .with_field("file_type", file_type);
    match &touch.source {
        Some(source) => context.with_field("src_path", source.to_string_lossy()),
        None => context,
    }
}

impl ContextProvider for FileWatchProvider {
    fn poll(&mut self) -> Result<Option<ActivityContext>> {
        let mut last = None;
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => {
                    if let Some(touch) = self.touch(&event) {
                        last = Some(touch);
                    }
                }
                Ok(Err(e)) => warn!("File watcher error: {e}"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(anyhow!("File watcher stopped"));
                }
            }
        }
        Ok(last.as_ref().map(file_context))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::mpsc::Sender, time::Duration};

    use notify::event::DataChange;
    use tempfile::tempdir;

    use super::*;

    fn provider(
        root: &Path,
        ignored: Vec<PathBuf>,
        max_depth: usize,
    ) -> (Sender<notify::Result<Event>>, FileWatchProvider) {
        let (sender, receiver) = mpsc::channel();
        let provider =
            FileWatchProvider::from_events(receiver, vec![root.to_path_buf()], ignored, max_depth);
        (sender, provider)
    }

    fn event(kind: EventKind, paths: &[&Path]) -> notify::Result<Event> {
        Ok(paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(path.to_path_buf())))
    }

    #[test]
    fn test_reports_last_event_of_each_poll() -> Result<()> {
        let root = PathBuf::from("/home/user/Documents");
        let (events, mut provider) = provider(&root, vec![], 4);
        let notes = root.join("notes").join("Plan.MD");
        let draft = root.join("draft.txt");

        events.send(event(EventKind::Create(CreateKind::File), &[&draft]))?;
        events.send(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[&notes],
        ))?;
        let context = provider.poll()?.unwrap();
        assert_eq!(context.kind, ContextKind::File);
        assert_eq!(&*context.identity_key, notes.to_string_lossy());
        assert_eq!(context.display_fields["action"], "modified");
        assert_eq!(context.display_fields["file_type"], "md");

        assert!(provider.poll()?.is_none());

        events.send(event(EventKind::Remove(RemoveKind::File), &[&draft]))?;
        assert_eq!(provider.poll()?.unwrap().display_fields["action"], "deleted");
        Ok(())
    }

    #[test]
    fn test_moves_keep_the_source_path() -> Result<()> {
        let root = PathBuf::from("/home/user/Downloads");
        let (events, mut provider) = provider(&root, vec![], 4);
        let from = root.join("report.pdf.part");
        let to = root.join("report.pdf");

        events.send(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&from, &to],
        ))?;
        let context = provider.poll()?.unwrap();
        assert_eq!(&*context.identity_key, to.to_string_lossy());
        assert_eq!(context.display_fields["action"], "moved");
        assert_eq!(context.display_fields["src_path"], from.to_string_lossy());

        events.send(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &[&to],
        ))?;
        assert!(provider.poll()?.is_none());
        Ok(())
    }

    #[test]
    fn test_filters_ignored_hidden_and_deep_paths() -> Result<()> {
        let root = PathBuf::from("/home/user/Desktop");
        let data = root.join("dwell");
        let (events, mut provider) = provider(&root, vec![data.clone()], 1);

        for path in [
            data.join("activity.db"),
            root.join(".git").join("index"),
            root.join("a").join("b").join("deep.txt"),
            PathBuf::from("/elsewhere/file.txt"),
        ] {
            events.send(event(EventKind::Create(CreateKind::File), &[&path]))?;
        }
        events.send(event(EventKind::Create(CreateKind::Folder), &[&root.join("new")]))?;
        events.send(event(EventKind::Access(notify::event::AccessKind::Any), &[&root.join("x")]))?;
        assert!(provider.poll()?.is_none());

        let shallow = root.join("a").join("shallow.txt");
        events.send(event(EventKind::Create(CreateKind::File), &[&shallow]))?;
        assert!(provider.poll()?.is_some());
        Ok(())
    }

    #[test]
    fn test_closed_channel_is_an_error() {
        let (events, mut provider) = provider(Path::new("/tmp"), vec![], 4);
        drop(events);
        assert!(provider.poll().is_err());
    }

    #[test]
    fn test_watches_real_directory() -> Result<()> {
        let dir = tempdir()?;
        let ignored = dir.path().join("data");
        fs::create_dir_all(&ignored)?;
        let mut provider =
            FileWatchProvider::new(vec![dir.path().to_path_buf()], vec![ignored.clone()], 4)?;

        fs::write(ignored.join("activity.db"), "ignored")?;
        fs::write(dir.path().join("notes.txt"), "hello")?;

        let mut context = None;
        for _ in 0..100 {
            context = provider.poll()?;
            if context.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let context = context.unwrap();
        assert!(context.identity_key.ends_with("notes.txt"));
        Ok(())
    }
}
