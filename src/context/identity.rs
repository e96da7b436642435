//! Identity key construction. Keys must be deterministic and stable across polls, otherwise
//! every poll would start a new segment.

use regex::Regex;

/// Substrings that change while the user keeps doing the same thing: unsaved markers,
/// notification counters and progress percentages.
pub const DEFAULT_VOLATILE_TITLE_PATTERNS: &[&str] = &[
    r"^[●•*]\s*",
    r"\s*[●•*]$",
    r"^[(\[]\d+[)\]]\s*",
    r"\s*\(?\d{1,3}(?:[.,]\d+)?\s?%\)?",
];

pub fn window_key(app_name: &str, title: &str) -> String {
    format!("{app_name}:{title}")
}

pub fn browser_key(domain: &str, url: &str) -> String {
    format!("{domain}:{url}")
}

pub fn game_key(game_name: &str) -> String {
    game_name.trim().to_owned()
}

/// Strips volatile substrings from window titles before they become part of a key.
#[derive(Debug, Clone, Default)]
pub struct TitleNormalizer {
    patterns: Vec<Regex>,
}

impl TitleNormalizer {
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, regex::Error> {
        let patterns = patterns
            .into_iter()
            .map(|v| Regex::new(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Normalizer that keeps titles as they are.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn normalize(&self, title: &str) -> String {
        if self.patterns.is_empty() {
            return title.to_owned();
        }
        let mut value = title.to_owned();
        for pattern in &self.patterns {
            value = pattern.replace_all(&value, "").into_owned();
        }
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            // Title consisted only of volatile parts, keep it rather than merging unrelated windows.
            title.trim().to_owned()
        } else {
            collapsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TitleNormalizer {
        TitleNormalizer::new(DEFAULT_VOLATILE_TITLE_PATTERNS).unwrap()
    }

    #[test]
    fn test_strips_unsaved_markers() {
        let normalizer = normalizer();
        assert_eq!(
            normalizer.normalize("● main.rs - dwell - Visual Studio Code"),
            "main.rs - dwell - Visual Studio Code"
        );
        assert_eq!(normalizer.normalize("report.docx *"), "report.docx");
    }

    #[test]
    fn test_strips_counters_and_progress() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("(3) Inbox - Mail"), "Inbox - Mail");
        assert_eq!(normalizer.normalize("Installing (45%)"), "Installing");
        assert_eq!(
            normalizer.normalize("Downloading 7.5% - Firefox"),
            "Downloading - Firefox"
        );
    }

    #[test]
    fn test_loading_titles_share_a_key() {
        let normalizer = normalizer();
        let a = window_key("setup", &normalizer.normalize("Installing (10%)"));
        let b = window_key("setup", &normalizer.normalize("Installing (95%)"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fully_volatile_title_is_kept() {
        assert_eq!(normalizer().normalize(" 100% "), "100%");
    }

    #[test]
    fn test_disabled_keeps_title() {
        assert_eq!(TitleNormalizer::disabled().normalize("(3) Inbox"), "(3) Inbox");
    }
}
