//! Request and response bodies for the HTTP API
//!
//! Field names follow the dandanplay-style camelCase the players expect.

use crate::core::matcher::{MatchOutcome, Resolution};
use crate::core::models::{AnimeEntry, EpisodeEntry, MediaKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keyword: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub query: String,
    pub anime_id: u32,
}

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeSummary {
    pub anime_id: u32,
    pub anime_title: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub type_description: String,
    pub year: Option<i32>,
    pub episode_count: u32,
    pub source: String,
    pub platform: String,
}

impl From<&AnimeEntry> for AnimeSummary {
    fn from(anime: &AnimeEntry) -> Self {
        Self {
            anime_id: anime.anime_id,
            anime_title: anime.title.clone(),
            kind: anime.kind,
            type_description: anime.type_description.clone(),
            year: anime.year,
            episode_count: anime.episode_count,
            source: anime.source.clone(),
            platform: anime.platform.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub animes: Vec<AnimeSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSummary {
    pub episode_id: u64,
    pub episode_title: String,
    pub episode_number: u32,
}

impl From<&EpisodeEntry> for EpisodeSummary {
    fn from(episode: &EpisodeEntry) -> Self {
        Self {
            episode_id: episode.episode_id,
            episode_title: episode.title.clone(),
            episode_number: episode.order,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BangumiDetail {
    #[serde(flatten)]
    pub anime: AnimeSummary,
    pub episodes: Vec<EpisodeSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BangumiResponse {
    pub success: bool,
    pub bangumi: BangumiDetail,
}

impl From<&AnimeEntry> for BangumiResponse {
    fn from(anime: &AnimeEntry) -> Self {
        Self {
            success: true,
            bangumi: BangumiDetail {
                anime: AnimeSummary::from(anime),
                episodes: anime.episodes.iter().map(EpisodeSummary::from).collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchItem {
    pub episode_id: u64,
    pub anime_id: u32,
    pub anime_title: String,
    pub episode_title: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub type_description: String,
    pub shift: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub is_matched: bool,
    pub matches: Vec<MatchItem>,
    /// "ranked", "preference" or "ai"; absent when nothing matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<&'static str>,
}

impl MatchResponse {
    pub fn unmatched() -> Self {
        Self {
            is_matched: false,
            matches: Vec::new(),
            resolution: None,
        }
    }
}

impl From<&MatchOutcome> for MatchResponse {
    fn from(outcome: &MatchOutcome) -> Self {
        let matches = outcome
            .episode
            .iter()
            .map(|episode| MatchItem {
                episode_id: episode.episode_id,
                anime_id: outcome.anime.anime_id,
                anime_title: outcome.anime.title.clone(),
                episode_title: episode.title.clone(),
                kind: outcome.anime.kind,
                type_description: outcome.anime.type_description.clone(),
                shift: 0.0,
            })
            .collect::<Vec<_>>();

        let resolution = match outcome.resolution {
            Resolution::Ranked => "ranked",
            Resolution::Preference => "preference",
            Resolution::Ai => "ai",
        };

        Self {
            is_matched: !matches.is_empty(),
            matches,
            resolution: Some(resolution),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SelectResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: i64,
    pub sources: Vec<String>,
    pub cache: Vec<CacheSummary>,
}

#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub namespace: String,
    pub entries: usize,
    pub max_items: usize,
}
