//! Cache layer
//!
//! Two independent bounded, TTL-based namespaces:
//! - `search`: normalized query -> ordered anime ids
//! - `comment`: episode id -> merged canonical comment stream
//!
//! plus the anime store and preference map, which use the same bounded FIFO
//! discipline. Successful writes are copied to an optional remote mirror.

pub mod bounded;
pub mod mirror;
pub mod store;

pub use bounded::BoundedMap;
pub use mirror::{spawn_mirror_write, HttpMirror, RemoteMirror};
pub use store::{AnimeStore, PreferenceMap};

use crate::core::config::CacheConfig;
use crate::core::models::Comment;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Search,
    Comment,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Search => write!(f, "search"),
            Namespace::Comment => write!(f, "comment"),
        }
    }
}

/// Size and limits of one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub namespace: Namespace,
    pub entries: usize,
    pub max_items: usize,
    pub ttl: Option<Duration>,
}

/// The two named caches plus the optional mirror
pub struct CacheLayer {
    search: Mutex<BoundedMap<String, Vec<u32>>>,
    comments: Mutex<BoundedMap<u64, Vec<Comment>>>,
    mirror: Option<Arc<dyn RemoteMirror>>,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig, mirror: Option<Arc<dyn RemoteMirror>>) -> Self {
        Self {
            search: Mutex::new(BoundedMap::with_ttl_minutes(
                config.search_max_items,
                config.search_ttl_minutes,
            )),
            comments: Mutex::new(BoundedMap::with_ttl_minutes(
                config.comment_max_items,
                config.comment_ttl_minutes,
            )),
            mirror,
        }
    }

    /// Anime ids cached for a normalized query, in ranked order
    pub fn get_search(&self, normalized_query: &str) -> Option<Vec<u32>> {
        self.get_search_at(normalized_query, Instant::now())
    }

    pub(crate) fn get_search_at(&self, normalized_query: &str, now: Instant) -> Option<Vec<u32>> {
        let mut cache = self.search.lock().unwrap_or_else(|e| e.into_inner());
        let hit = cache.get_at(normalized_query, now).cloned();
        debug!(
            namespace = %Namespace::Search,
            key = normalized_query,
            hit = hit.is_some(),
            "Cache lookup"
        );
        hit
    }

    pub fn set_search(&self, normalized_query: &str, anime_ids: Vec<u32>) {
        let ttl = {
            let mut cache = self.search.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(normalized_query.to_string(), anime_ids.clone());
            cache.ttl()
        };
        self.mirror(Namespace::Search, normalized_query, &anime_ids, ttl);
    }

    /// Merged comment stream cached for an episode
    pub fn get_comments(&self, episode_id: u64) -> Option<Vec<Comment>> {
        self.get_comments_at(episode_id, Instant::now())
    }

    pub(crate) fn get_comments_at(&self, episode_id: u64, now: Instant) -> Option<Vec<Comment>> {
        let mut cache = self.comments.lock().unwrap_or_else(|e| e.into_inner());
        let hit = cache.get_at(&episode_id, now).cloned();
        debug!(
            namespace = %Namespace::Comment,
            episode_id,
            hit = hit.is_some(),
            "Cache lookup"
        );
        hit
    }

    pub fn set_comments(&self, episode_id: u64, comments: Vec<Comment>) {
        let ttl = {
            let mut cache = self.comments.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(episode_id, comments.clone());
            cache.ttl()
        };
        self.mirror(Namespace::Comment, &episode_id.to_string(), &comments, ttl);
    }

    pub fn stats(&self, namespace: Namespace) -> CacheStats {
        match namespace {
            Namespace::Search => {
                let cache = self.search.lock().unwrap_or_else(|e| e.into_inner());
                CacheStats {
                    namespace,
                    entries: cache.len(),
                    max_items: cache.max_items(),
                    ttl: cache.ttl(),
                }
            }
            Namespace::Comment => {
                let cache = self.comments.lock().unwrap_or_else(|e| e.into_inner());
                CacheStats {
                    namespace,
                    entries: cache.len(),
                    max_items: cache.max_items(),
                    ttl: cache.ttl(),
                }
            }
        }
    }

    /// Drop expired entries from both namespaces
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let search = self
            .search
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .purge_expired(now);
        let comments = self
            .comments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .purge_expired(now);
        search + comments
    }

    fn mirror<T: serde::Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        match serde_json::to_string(value) {
            Ok(json) => spawn_mirror_write(
                mirror.clone(),
                format!("{}:{}", namespace, key),
                json,
                ttl,
            ),
            Err(e) => tracing::warn!(%namespace, key, "Failed to serialize cache entry for mirror: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::core::models::CommentMode;
    use async_trait::async_trait;

    fn config(max: usize, ttl: u64) -> CacheConfig {
        CacheConfig {
            search_ttl_minutes: ttl,
            search_max_items: max,
            comment_ttl_minutes: ttl,
            comment_max_items: max,
            max_animes: 0,
            max_preferences: 0,
            mirror_url: None,
            mirror_token: String::new(),
            sweep_interval_secs: 0,
        }
    }

    struct RecordingMirror {
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteMirror for RecordingMirror {
        async fn set(&self, key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
            self.writes.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    struct FailingMirror;

    #[async_trait]
    impl RemoteMirror for FailingMirror {
        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
            Err(crate::core::error::AggregatorError::MirrorError("down".into()))
        }
    }

    #[test]
    fn test_namespaces_are_independent() {
        let cache = CacheLayer::new(&config(1, 5), None);
        cache.set_search("a", vec![1]);
        cache.set_comments(7, vec![Comment::new(1.0, CommentMode::Scroll, 0xFFFFFF, "x")]);
        cache.set_search("b", vec![2]);

        assert_eq!(cache.get_search("a"), None);
        assert_eq!(cache.get_search("b"), Some(vec![2]));
        assert_eq!(cache.get_comments(7).map(|c| c.len()), Some(1));
        assert_eq!(cache.stats(Namespace::Search).entries, 1);
        assert_eq!(cache.stats(Namespace::Comment).entries, 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = CacheLayer::new(&config(0, 1), None);
        cache.set_search("q", vec![1]);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.get_search_at("q", later), None);
        assert_eq!(cache.stats(Namespace::Search).entries, 0);
    }

    #[test]
    fn test_purge_drops_expired_from_both_namespaces() {
        let cache = CacheLayer::new(&config(0, 1), None);
        cache.set_search("q", vec![1]);
        cache.set_comments(9, Vec::new());

        assert_eq!(cache.purge_expired_at(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.purge_expired_at(later), 2);
        assert_eq!(cache.stats(Namespace::Search).entries, 0);
        assert_eq!(cache.stats(Namespace::Comment).entries, 0);
    }

    #[test]
    fn test_unbounded_when_zero() {
        let cache = CacheLayer::new(&config(0, 0), None);
        for i in 0..500u64 {
            cache.set_comments(i, Vec::new());
        }
        assert_eq!(cache.stats(Namespace::Comment).entries, 500);
    }

    #[tokio::test]
    async fn test_writes_are_mirrored() {
        let mirror = Arc::new(RecordingMirror {
            writes: Mutex::new(Vec::new()),
        });
        let cache = CacheLayer::new(&config(10, 5), Some(mirror.clone()));
        cache.set_search("太空杀", vec![1, 2]);
        cache.set_comments(42, Vec::new());

        for _ in 0..50 {
            if mirror.writes.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut writes = mirror.writes.lock().unwrap().clone();
        writes.sort();
        assert_eq!(writes, vec!["comment:42".to_string(), "search:太空杀".to_string()]);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_affect_local_cache() {
        let cache = CacheLayer::new(&config(10, 5), Some(Arc::new(FailingMirror)));
        cache.set_search("q", vec![3]);
        tokio::task::yield_now().await;
        assert_eq!(cache.get_search("q"), Some(vec![3]));
    }
}
