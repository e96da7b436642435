//! Browser tab detection on top of the foreground window. Browsers don't expose the current URL
//! through the window title reliably, so the URL is only extracted when it is visible.

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

use super::{
    identity::{browser_key, TitleNormalizer},
    window::{ActiveWindow, WindowSource},
    ActivityContext, ContextKind, ContextProvider,
};

pub const DEFAULT_BROWSERS: &[&str] = &[
    "chrome", "chromium", "firefox", "msedge", "edge", "safari", "opera", "brave", "vivaldi", "arc",
];

const UNKNOWN_DOMAIN: &str = "unknown";

/// Decides whether a window belongs to a browser.
pub trait BrowserClassifier: Send + Sync {
    /// Returns the matched browser name.
    fn browser_name(&self, window: &ActiveWindow) -> Option<String>;
}

pub struct KnownBrowsers {
    names: Vec<String>,
}

impl KnownBrowsers {
    pub fn new(names: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            names: names
                .into_iter()
                .map(|v| v.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KnownBrowsers {
    fn default() -> Self {
        Self::new(DEFAULT_BROWSERS)
    }
}

impl BrowserClassifier for KnownBrowsers {
    fn browser_name(&self, window: &ActiveWindow) -> Option<String> {
        let app_name = window.app_name.to_lowercase();
        let app_name = app_name.trim_end_matches(".exe");
        // Whole words only, 'Archive Utility' is not the Arc browser.
        let words = app_name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>();
        self.names
            .iter()
            .find(|name| words.contains(&name.as_str()))
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserTab {
    pub title: String,
    pub url: Option<String>,
    pub domain: Option<String>,
}

impl BrowserTab {
    pub fn identity_key(&self) -> String {
        match (&self.domain, &self.url) {
            (Some(domain), Some(url)) => browser_key(domain, url),
            // Without a visible URL the page title is the best identity we have.
            _ => browser_key(UNKNOWN_DOMAIN, &self.title),
        }
    }
}

pub struct BrowserTabProvider {
    source: Box<dyn WindowSource>,
    classifier: Box<dyn BrowserClassifier>,
    normalizer: Arc<TitleNormalizer>,
    url_pattern: Regex,
}

impl BrowserTabProvider {
    pub fn new(
        source: Box<dyn WindowSource>,
        classifier: Box<dyn BrowserClassifier>,
        normalizer: Arc<TitleNormalizer>,
    ) -> Result<Self> {
        Ok(Self {
            source,
            classifier,
            normalizer,
            url_pattern: Regex::new(
                r"(?i)\b(?:(https?)://)?((?:[a-z0-9-]+\.)+[a-z]{2,})(?::\d+)?(/[^\s|]*)?",
            )?,
        })
    }

    /// Splits a browser window title into page title and URL.
    pub fn parse_tab(&self, title: &str, browser_name: &str) -> BrowserTab {
        let title = strip_browser_suffix(title, browser_name);

        for captures in self.url_pattern.captures_iter(&title) {
            let has_scheme = captures.get(1).is_some();
            let path = captures.get(3).map(|v| v.as_str());
            let host = captures[2].to_lowercase();
            // 'main.rs' looks like a host as well, so bare words need some URL-ish evidence.
            if !has_scheme && path.is_none() && !host.starts_with("www.") {
                continue;
            }

            let whole = &captures[0];
            let url = if has_scheme {
                whole.to_owned()
            } else {
                format!("https://{whole}")
            };
            let domain = host.trim_start_matches("www.").to_owned();
            let page_title = title
                .replace(whole, "")
                .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '|')
                .to_owned();

            return BrowserTab {
                title: if page_title.is_empty() {
                    domain.clone()
                } else {
                    page_title
                },
                url: Some(url),
                domain: Some(domain),
            };
        }

        BrowserTab {
            title: self.normalizer.normalize(&title),
            url: None,
            domain: None,
        }
    }
}

/// 'Rust - Google Chrome' -> 'Rust'
fn strip_browser_suffix(title: &str, browser_name: &str) -> String {
    for separator in [" - ", " — ", " – "] {
        if let Some((head, tail)) = title.rsplit_once(separator) {
            let tail = tail.to_lowercase();
            if tail.contains(browser_name) || (browser_name == "msedge" && tail.contains("edge")) {
                return head.trim().to_owned();
            }
        }
    }
    title.trim().to_owned()
}

impl ContextProvider for BrowserTabProvider {
    fn poll(&mut self) -> Result<Option<ActivityContext>> {
        let Some(window) = self.source.active_window()? else {
            return Ok(None);
        };
        let Some(browser_name) = self.classifier.browser_name(&window) else {
            return Ok(None);
        };

        let tab = self.parse_tab(&window.title, &browser_name);
        let mut context = ActivityContext::new(ContextKind::BrowserTab, tab.identity_key())
            .with_field("title", tab.title)
            .with_field("browser", browser_name)
            .with_field("domain", tab.domain.as_deref().unwrap_or(UNKNOWN_DOMAIN));
        if let Some(url) = tab.url {
            context = context.with_field("url", url);
        }
        Ok(Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{identity::DEFAULT_VOLATILE_TITLE_PATTERNS, window::MockWindowSource};

    fn provider(source: MockWindowSource) -> BrowserTabProvider {
        BrowserTabProvider::new(
            Box::new(source),
            Box::<KnownBrowsers>::default(),
            Arc::new(TitleNormalizer::new(DEFAULT_VOLATILE_TITLE_PATTERNS).unwrap()),
        )
        .unwrap()
    }

    fn window(app_name: &str, title: &str) -> ActiveWindow {
        ActiveWindow {
            app_name: app_name.into(),
            title: title.into(),
            pid: None,
        }
    }

    #[test]
    fn test_parse_tab_with_url() {
        let provider = provider(MockWindowSource::new());
        let tab = provider.parse_tab(
            "Rust Programming Language - https://www.rust-lang.org/learn - Mozilla Firefox",
            "firefox",
        );
        assert_eq!(tab.domain.as_deref(), Some("rust-lang.org"));
        assert_eq!(tab.url.as_deref(), Some("https://www.rust-lang.org/learn"));
        assert_eq!(tab.title, "Rust Programming Language");
        assert_eq!(
            tab.identity_key(),
            "rust-lang.org:https://www.rust-lang.org/learn"
        );
    }

    #[test]
    fn test_parse_tab_without_url() {
        let provider = provider(MockWindowSource::new());
        let tab = provider.parse_tab("(2) main.rs - Google Chrome", "chrome");
        assert_eq!(tab.url, None);
        assert_eq!(tab.title, "main.rs");
        assert_eq!(tab.identity_key(), "unknown:main.rs");
    }

    #[test]
    fn test_bare_path_is_a_url() {
        let provider = provider(MockWindowSource::new());
        let tab = provider.parse_tab("github.com/rust-lang/rust - Brave", "brave");
        assert_eq!(tab.domain.as_deref(), Some("github.com"));
        assert_eq!(tab.url.as_deref(), Some("https://github.com/rust-lang/rust"));
    }

    #[test]
    fn test_non_browser_windows_are_ignored() -> Result<()> {
        let mut source = MockWindowSource::new();
        let mut windows = vec![
            window("code", "main.rs - dwell"),
            window("firefox.exe", "Docs - Mozilla Firefox"),
        ]
        .into_iter();
        source
            .expect_active_window()
            .times(2)
            .returning(move || Ok(windows.next()));

        let mut provider = provider(source);
        assert!(provider.poll()?.is_none());

        let context = provider.poll()?.unwrap();
        assert_eq!(context.kind, ContextKind::BrowserTab);
        assert_eq!(&*context.identity_key, "unknown:Docs");
        assert_eq!(
            context.display_fields.get("browser").map(String::as_str),
            Some("firefox")
        );
        Ok(())
    }
}
