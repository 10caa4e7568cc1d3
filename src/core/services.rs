//! Business logic services
//!
//! `DanmakuService` coordinates the matcher, the merge engine, the comment
//! cache and the normalization pipeline for the HTTP layer.

use crate::core::error::{AggregatorError, Result};
use crate::core::matcher::{MatchOutcome, Matcher};
use crate::core::merge::MergeEngine;
use crate::core::models::{AnimeEntry, Comment};
use crate::core::output::{render, OutputFormat};
use crate::core::state::AggregatorState;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Serialized comments ready to be sent to a client
#[derive(Debug, Clone)]
pub struct RenderedComments {
    pub format: OutputFormat,
    pub count: usize,
    pub body: String,
}

pub struct DanmakuService {
    state: Arc<AggregatorState>,
    matcher: Matcher,
    merge: MergeEngine,
}

impl DanmakuService {
    pub fn new(state: Arc<AggregatorState>) -> Self {
        Self {
            matcher: Matcher::new(state.clone()),
            merge: MergeEngine::new(state.clone()),
            state,
        }
    }

    pub fn state(&self) -> &Arc<AggregatorState> {
        &self.state
    }

    /// Every candidate for a keyword, best-first
    pub async fn search_anime(&self, keyword: &str) -> Result<Vec<AnimeEntry>> {
        self.matcher.search(keyword).await
    }

    /// Resolve a video filename to one episode
    pub async fn match_file(&self, file_name: &str) -> Result<MatchOutcome> {
        if file_name.trim().is_empty() {
            return Err(AggregatorError::InvalidRequest("fileName cannot be empty".to_string()));
        }
        self.matcher.match_file(file_name).await
    }

    /// Resolve a free-text query such as `太空杀 S01E02`
    pub async fn match_query(&self, query: &str) -> Result<MatchOutcome> {
        self.matcher.match_query(query).await
    }

    pub fn get_bangumi(&self, anime_id: u32) -> Result<AnimeEntry> {
        self.state
            .animes
            .get(anime_id)
            .ok_or_else(|| AggregatorError::NotFound(format!("Anime {} not found", anime_id)))
    }

    pub fn record_selection(&self, query: &str, anime_id: u32) -> Result<()> {
        self.matcher.record_selection(query, anime_id)
    }

    /// Normalized comments for an episode
    ///
    /// The merged stream is cached per episode; the offset and the
    /// normalization pipeline run on every request.
    pub async fn comments(&self, episode_id: u64) -> Result<Vec<Comment>> {
        let (anime, episode) = self
            .state
            .animes
            .find_episode(episode_id)
            .ok_or_else(|| AggregatorError::NotFound(format!("Episode {} not found", episode_id)))?;

        let merged = match self.state.cache.get_comments(episode_id) {
            Some(cached) => {
                debug!(episode_id, count = cached.len(), "Comment cache hit");
                cached
            }
            None => {
                let start = Instant::now();
                let merged = self.merge.fetch(&anime, &episode).await;
                info!(
                    episode_id,
                    source = %anime.source,
                    count = merged.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Fetched comments"
                );
                if !merged.is_empty() {
                    self.state.cache.set_comments(episode_id, merged.clone());
                }
                merged
            }
        };

        let offsets = self.state.source_offsets(&anime, &merged);
        Ok(self.state.pipeline.apply(&merged, &offsets))
    }

    /// Normalized comments serialized in `format`, or the configured default
    pub async fn get_comments(&self, episode_id: u64, format: Option<OutputFormat>) -> Result<RenderedComments> {
        let format = match format {
            Some(format) => format,
            None => self.state.config.danmu.output_format.parse()?,
        };

        let comments = self.comments(episode_id).await?;
        let body = render(&comments, format)?;

        Ok(RenderedComments {
            format,
            count: comments.len(),
            body,
        })
    }
}
