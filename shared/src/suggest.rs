use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

use crate::api::Suggestion;
use crate::config::{SyncConfig, DEFAULT_SUGGEST_CACHE_CAPACITY};
use crate::error::SyncResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestIntent {
    /// Input too short; suggestions were cleared.
    Cleared,
    /// Answered from the cache.
    Cached,
    Fetch(String),
}

#[derive(Debug)]
pub struct SuggestState {
    cache: LruCache<String, Vec<Suggestion>>,
    min_chars: usize,
    current: String,
    results: Vec<Suggestion>,
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl SuggestState {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        let capacity = NonZeroUsize::new(config.suggest_cache_capacity)
            .or(NonZeroUsize::new(DEFAULT_SUGGEST_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            min_chars: config.suggest_min_chars,
            current: String::new(),
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn results(&self) -> &[Suggestion] {
        &self.results
    }

    #[must_use]
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn input(&mut self, raw: &str) -> SuggestIntent {
        let query = normalize(raw);
        self.current.clone_from(&query);

        if query.chars().count() < self.min_chars {
            self.results.clear();
            return SuggestIntent::Cleared;
        }
        if let Some(hit) = self.cache.get(&query) {
            self.results = hit.clone();
            return SuggestIntent::Cached;
        }
        SuggestIntent::Fetch(query)
    }

    /// Stores a response. Results for anything but the current input are
    /// cached but not shown.
    pub fn apply(&mut self, query: &str, result: SyncResult<Vec<Suggestion>>) -> bool {
        let suggestions = match result {
            Ok(s) => s,
            Err(e) => {
                debug!(query, error = %e, "suggest failed");
                return false;
            }
        };
        self.cache.put(query.to_string(), suggestions.clone());
        if query != self.current {
            debug!(query, current = %self.current, "dropping suggestions for old input");
            return false;
        }
        self.results = suggestions;
        true
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Suggestion> {
        self.results.get(index)
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn suggestion(value: &str) -> Suggestion {
        Suggestion {
            field: "town".into(),
            value: value.into(),
            description: None,
            label: value.into(),
        }
    }

    #[test]
    fn short_input_clears() {
        let mut s = SuggestState::new(&SyncConfig::default());
        assert_eq!(s.input("a"), SuggestIntent::Cleared);
        assert!(s.results().is_empty());
    }

    #[test]
    fn second_lookup_hits_cache() {
        let mut s = SuggestState::new(&SyncConfig::default());
        assert_eq!(s.input("  Act "), SuggestIntent::Fetch("act".into()));
        assert!(s.apply("act", Ok(vec![suggestion("Acton")])));
        s.input("acto");
        assert_eq!(s.input("ACT"), SuggestIntent::Cached);
        assert_eq!(s.results()[0].value, "Acton");
    }

    #[test]
    fn stale_query_is_not_shown() {
        let mut s = SuggestState::new(&SyncConfig::default());
        s.input("bo");
        s.input("box");
        assert!(!s.apply("bo", Ok(vec![suggestion("Boston")])));
        assert!(s.results().is_empty());
        assert_eq!(s.input("bo"), SuggestIntent::Cached);
    }

    #[test]
    fn failure_keeps_previous_results() {
        let mut s = SuggestState::new(&SyncConfig::default());
        s.input("ac");
        s.apply("ac", Ok(vec![suggestion("Acton")]));
        s.input("acx");
        assert!(!s.apply("acx", Err(SyncError::transport("offline"))));
        assert_eq!(s.results().len(), 1);
    }
}
