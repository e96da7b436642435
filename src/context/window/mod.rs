//! Foreground window lookups. OS backends are compiled in with the `x11` and `win` features.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::warn;

use super::{
    identity::{window_key, TitleNormalizer},
    ActivityContext, ContextKind, ContextProvider,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindow {
    /// Name of the application owning the window. For example 'firefox' or 'Code'
    pub app_name: Arc<str>,
    /// Name of the window. For example 'bash in hello' or 'Document 1' or 'Vibing in YouTube -
    /// Chrome'
    pub title: Arc<str>,
    pub pid: Option<u32>,
}

/// Contract a foreground window enumeration backend must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSource: Send {
    /// Returns the foreground window, or `None` when nothing has focus (locked screen, empty
    /// desktop).
    fn active_window(&mut self) -> Result<Option<ActiveWindow>>;
}

/// Returns the window backend selected at build time, or `None` when none was compiled in or
/// it failed to connect. Embedders can pass their own [WindowSource] to the providers instead.
pub fn platform_window_source() -> Option<Box<dyn WindowSource>> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "win")] {
            Some(Box::new(win::WinWindowSource::new()))
        } else if #[cfg(feature = "x11")] {
            match x11::XcbWindowSource::new() {
                Ok(source) => Some(Box::new(source)),
                Err(e) => {
                    warn!("Failed to connect to the X server {e:?}");
                    None
                }
            }
        } else {
            warn!("No foreground window backend was compiled in");
            None
        }
    }
}

/// One backend shared by every dimension that looks at the foreground window.
#[derive(Clone)]
pub struct SharedWindowSource(Arc<Mutex<Box<dyn WindowSource>>>);

impl SharedWindowSource {
    pub fn new(source: Box<dyn WindowSource>) -> Self {
        Self(Arc::new(Mutex::new(source)))
    }
}

impl WindowSource for SharedWindowSource {
    fn active_window(&mut self) -> Result<Option<ActiveWindow>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active_window()
    }
}

pub fn window_context(window: &ActiveWindow, normalizer: &TitleNormalizer) -> ActivityContext {
    let key = window_key(&window.app_name, &normalizer.normalize(&window.title));
    let context = ActivityContext::new(ContextKind::Window, key)
        .with_field("app_name", window.app_name.as_ref())
        .with_field("title", window.title.as_ref());
    match window.pid {
        Some(pid) => context.with_field("pid", pid.to_string()),
        None => context,
    }
}

/// Turns the foreground window into a [ContextKind::Window] context.
pub struct WindowContextProvider {
    source: Box<dyn WindowSource>,
    normalizer: Arc<TitleNormalizer>,
}

impl WindowContextProvider {
    pub fn new(source: Box<dyn WindowSource>, normalizer: Arc<TitleNormalizer>) -> Self {
        Self { source, normalizer }
    }
}

impl ContextProvider for WindowContextProvider {
    fn poll(&mut self) -> Result<Option<ActivityContext>> {
        Ok(self
            .source
            .active_window()?
            .map(|window| window_context(&window, &self.normalizer)))
    }
}
