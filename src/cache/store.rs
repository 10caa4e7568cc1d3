//! Anime store and preference map
//!
//! Both are bounded FIFO registries without expiry, independent of the two
//! named cache namespaces.

use super::bounded::BoundedMap;
use crate::core::models::{anime_id_of_episode, AnimeEntry, EpisodeEntry};
use std::sync::Mutex;
use tracing::debug;

/// Registry of resolved program metadata, keyed by anime id
pub struct AnimeStore {
    inner: Mutex<BoundedMap<u32, AnimeEntry>>,
}

impl AnimeStore {
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedMap::new(max_items, None)),
        }
    }

    /// Store an entry. Re-storing an existing id moves it to the newest position.
    pub fn insert(&self, entry: AnimeEntry) {
        let mut store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for (anime_id, evicted) in store.insert(entry.anime_id, entry) {
            debug!(anime_id, title = %evicted.title, "Evicted anime from store");
        }
    }

    pub fn get(&self, anime_id: u32) -> Option<AnimeEntry> {
        let mut store = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        store.get(&anime_id).cloned()
    }

    /// Resolve an episode id to its anime and episode
    pub fn find_episode(&self, episode_id: u64) -> Option<(AnimeEntry, EpisodeEntry)> {
        let anime = self.get(anime_id_of_episode(episode_id))?;
        let episode = anime.episode_by_id(episode_id)?.clone();
        Some((anime, episode))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remembered manual selections: normalized query -> chosen anime id
pub struct PreferenceMap {
    inner: Mutex<BoundedMap<String, u32>>,
}

impl PreferenceMap {
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedMap::new(max_items, None)),
        }
    }

    pub fn remember(&self, normalized_query: &str, anime_id: u32) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(normalized_query.to_string(), anime_id);
    }

    pub fn preferred(&self, normalized_query: &str) -> Option<u32> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(normalized_query).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Candidate, RemoteEpisode};

    fn entry(source: &str, id: &str) -> AnimeEntry {
        let candidate = Candidate {
            id: id.to_string(),
            title: format!("title {}", id),
            type_description: "tv".to_string(),
            year: None,
            episode_count: None,
            platform: None,
        };
        let episodes = vec![RemoteEpisode {
            id: format!("{}-ep1", id),
            title: "ep1".to_string(),
            order: Some(1),
        }];
        AnimeEntry::from_candidate(source, &candidate, &episodes)
    }

    #[test]
    fn test_store_is_fifo_bounded() {
        let store = AnimeStore::new(2);
        let a = entry("s", "a");
        let b = entry("s", "b");
        let c = entry("s", "c");
        store.insert(a.clone());
        store.insert(b.clone());
        store.insert(c.clone());

        assert_eq!(store.len(), 2);
        assert!(store.get(a.anime_id).is_none());
        assert!(store.get(c.anime_id).is_some());
    }

    #[test]
    fn test_find_episode() {
        let store = AnimeStore::new(0);
        let a = entry("s", "a");
        let episode_id = a.episodes[0].episode_id;
        store.insert(a);

        let (anime, episode) = store.find_episode(episode_id).unwrap();
        assert_eq!(anime.remote_id, "a");
        assert_eq!(episode.remote_url, "a-ep1");
        assert!(store.find_episode(episode_id + 1).is_none());
    }

    #[test]
    fn test_preferences_bounded() {
        let prefs = PreferenceMap::new(1);
        prefs.remember("one", 1);
        prefs.remember("two", 2);
        assert_eq!(prefs.preferred("one"), None);
        assert_eq!(prefs.preferred("two"), Some(2));
        assert_eq!(prefs.len(), 1);
    }
}
