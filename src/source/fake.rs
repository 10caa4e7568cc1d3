//! In-memory source adapter for tests

use super::adapter::{RawComment, SourceAdapter};
use crate::core::error::{AggregatorError, Result};
use crate::core::models::{Candidate, RemoteEpisode};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FakeSource {
    name: String,
    animes: Vec<Candidate>,
    episodes: HashMap<String, Vec<RemoteEpisode>>,
    danmu: HashMap<String, Vec<RawComment>>,
    delay: Option<Duration>,
    failing: bool,
    search_calls: Arc<AtomicUsize>,
    danmu_calls: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            animes: Vec::new(),
            episodes: HashMap::new(),
            danmu: HashMap::new(),
            delay: None,
            failing: false,
            search_calls: Arc::new(AtomicUsize::new(0)),
            danmu_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a program with `episodes` numbered episodes whose ids are `{id}-{n}`
    pub fn with_anime(mut self, id: &str, title: &str, type_description: &str, episodes: u32) -> Self {
        let list = (1..=episodes)
            .map(|n| RemoteEpisode {
                id: format!("{}-{}", id, n),
                title: format!("第{}集", n),
                order: Some(n),
            })
            .collect();
        self.push(id, title, type_description, list);
        self
    }

    /// Add a series whose episodes carry the given titles and no explicit order
    pub fn with_episode_titles(mut self, id: &str, title: &str, titles: &[&str]) -> Self {
        let list = titles
            .iter()
            .enumerate()
            .map(|(idx, t)| RemoteEpisode {
                id: format!("{}-{}", id, idx + 1),
                title: t.to_string(),
                order: None,
            })
            .collect();
        self.push(id, title, "TV", list);
        self
    }

    /// Serve `texts` as dandanplay-style danmaku for an episode, one per second
    pub fn with_danmu(mut self, episode_id: &str, texts: &[&str]) -> Self {
        let raw = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| json!({ "p": format!("{},1,16777215", idx + 1), "m": text }))
            .collect();
        self.danmu.insert(episode_id.to_string(), raw);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call fails
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn search_calls(&self) -> Arc<AtomicUsize> {
        self.search_calls.clone()
    }

    pub fn danmu_calls(&self) -> Arc<AtomicUsize> {
        self.danmu_calls.clone()
    }

    fn push(&mut self, id: &str, title: &str, type_description: &str, episodes: Vec<RemoteEpisode>) {
        self.animes.push(Candidate {
            id: id.to_string(),
            title: title.to_string(),
            type_description: type_description.to_string(),
            year: None,
            episode_count: Some(episodes.len() as u32),
            platform: None,
        });
        self.episodes.insert(id.to_string(), episodes);
    }

    async fn pause(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(AggregatorError::SourceError(format!("{} is down", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Candidate>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self
            .animes
            .iter()
            .filter(|c| c.title.contains(keyword) || keyword.contains(&c.title))
            .cloned()
            .collect())
    }

    async fn get_episodes(&self, id: &str) -> Result<Vec<RemoteEpisode>> {
        self.pause().await?;
        Ok(self.episodes.get(id).cloned().unwrap_or_default())
    }

    async fn get_episode_danmu(&self, id: &str) -> Result<Vec<RawComment>> {
        self.danmu_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self.danmu.get(id).cloned().unwrap_or_default())
    }
}
