use crate::context::ActivityContext;

/// Case-insensitive substring blocklist over a context's identity key and display title.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    entries: Vec<String>,
}

impl ExclusionList {
    pub fn new(entries: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_excluded(&self, context: &ActivityContext) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let key = context.identity_key.to_lowercase();
        let title = context.title().map(str::to_lowercase);
        self.entries.iter().any(|entry| {
            key.contains(entry.as_str()) || title.as_ref().is_some_and(|v| v.contains(entry.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ContextKind;

    use super::*;

    #[test]
    fn test_matches_key_or_title_ignoring_case() {
        let list = ExclusionList::new(["KeePass", "  ", "private browsing"]);
        let by_key = ActivityContext::new(ContextKind::Window, "keepassxc:Passwords.kdbx");
        let by_title = ActivityContext::new(ContextKind::BrowserTab, "unknown:news")
            .with_field("title", "News - Private Browsing");
        let allowed = ActivityContext::new(ContextKind::Window, "code:main.rs")
            .with_field("title", "main.rs");

        assert!(list.is_excluded(&by_key));
        assert!(list.is_excluded(&by_title));
        assert!(!list.is_excluded(&allowed));
        assert!(!ExclusionList::default().is_excluded(&by_key));
    }
}
