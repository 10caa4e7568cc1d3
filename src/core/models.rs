//! Domain models shared by the matcher, merge engine and formatter

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::warn;

/// Episode ids are `anime_id * EPISODE_ID_STRIDE + order`, so orders must
/// stay in `1..EPISODE_ID_STRIDE`
pub const EPISODE_ID_STRIDE: u64 = 10_000;

/// Display mode of a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentMode {
    Scroll,
    Top,
    Bottom,
}

impl CommentMode {
    /// Numeric code used by dandanplay/bilibili style clients
    pub fn code(self) -> u8 {
        match self {
            CommentMode::Scroll => 1,
            CommentMode::Bottom => 4,
            CommentMode::Top => 5,
        }
    }

    /// Parse a numeric mode code. Unknown codes (reverse, positioned, ...) scroll.
    pub fn from_code(code: i64) -> Self {
        match code {
            4 => CommentMode::Bottom,
            5 => CommentMode::Top,
            _ => CommentMode::Scroll,
        }
    }
}

/// Canonical comment, the unit every source is normalized into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub cid: u64,
    /// Seconds from the start of the episode
    pub time: f64,
    pub mode: CommentMode,
    /// 0xRRGGBB
    pub color: u32,
    pub text: String,
    pub source_tag: String,
}

impl Comment {
    pub fn new(time: f64, mode: CommentMode, color: u32, text: impl Into<String>) -> Self {
        Self {
            cid: 0,
            time: time.max(0.0),
            mode,
            color: color & 0xFF_FF_FF,
            text: text.into(),
            source_tag: String::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_tag = source.into();
        self
    }
}

/// Movie vs series, as reported by a source or inferred from a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
    Unknown,
}

impl MediaKind {
    /// Guess the kind from a free-form type description ("电影", "TV动画", "movie" ...)
    pub fn from_description(desc: &str) -> Self {
        let lower = desc.to_lowercase();
        if lower.contains("movie") || lower.contains("film") || desc.contains("电影") || desc.contains("剧场版") {
            MediaKind::Movie
        } else if lower.is_empty() {
            MediaKind::Unknown
        } else {
            MediaKind::Series
        }
    }

    /// Unknown is compatible with everything
    pub fn compatible_with(self, other: MediaKind) -> bool {
        self == MediaKind::Unknown || other == MediaKind::Unknown || self == other
    }
}

/// One search hit returned by a source adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Identifier on the source platform
    pub id: String,
    pub title: String,
    /// Free-form type description from the platform
    #[serde(default)]
    pub type_description: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub episode_count: Option<u32>,
    /// Platform the content actually lives on, when the source is itself an aggregator
    #[serde(default)]
    pub platform: Option<String>,
}

/// Episode as listed by a source adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEpisode {
    /// Identifier (or URL) the adapter needs to fetch comments
    pub id: String,
    pub title: String,
    /// 1-based position, when the source provides one
    #[serde(default)]
    pub order: Option<u32>,
}

/// Optional extended information for a search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub episode_count: Option<u32>,
    #[serde(default)]
    pub intro: Option<String>,
}

/// Episode of a resolved anime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeEntry {
    pub episode_id: u64,
    pub order: u32,
    pub remote_url: String,
    pub title: String,
}

/// A program accepted from a source, owned by the anime store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeEntry {
    pub anime_id: u32,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub type_description: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode_count: u32,
    pub source: String,
    /// Platform the stream comes from (defaults to the source name)
    pub platform: String,
    pub remote_id: String,
    pub episodes: Vec<EpisodeEntry>,
}

impl AnimeEntry {
    /// Build an entry from an adapter candidate and its episode list
    pub fn from_candidate(source: &str, candidate: &Candidate, episodes: &[RemoteEpisode]) -> Self {
        let anime_id = anime_id_for(source, &candidate.id);
        let episodes: Vec<EpisodeEntry> = assign_orders(source, &candidate.id, episodes)
            .into_iter()
            .zip(episodes)
            .filter_map(|(order, ep)| {
                let order = order?;
                Some(EpisodeEntry {
                    episode_id: episode_id_for(anime_id, order),
                    order,
                    remote_url: ep.id.clone(),
                    title: ep.title.clone(),
                })
            })
            .collect();

        let episode_count = candidate
            .episode_count
            .unwrap_or(0)
            .max(episodes.len() as u32);

        Self {
            anime_id,
            title: candidate.title.clone(),
            kind: MediaKind::from_description(&candidate.type_description),
            type_description: candidate.type_description.clone(),
            year: candidate.year,
            season: crate::core::matcher::season_of_title(&candidate.title),
            episode_count,
            source: source.to_string(),
            platform: candidate.platform.clone().unwrap_or_else(|| source.to_string()),
            remote_id: candidate.id.clone(),
            episodes,
        }
    }

    /// Find an episode by its 1-based order, falling back to position
    pub fn episode_by_order(&self, order: u32) -> Option<&EpisodeEntry> {
        self.episodes
            .iter()
            .find(|ep| ep.order == order)
            .or_else(|| self.episodes.get(order.checked_sub(1)? as usize))
    }

    pub fn episode_by_id(&self, episode_id: u64) -> Option<&EpisodeEntry> {
        self.episodes.iter().find(|ep| ep.episode_id == episode_id)
    }
}

/// Stable anime id: the first 31 bits of SHA-256(`source:remote_id`)
pub fn anime_id_for(source: &str, remote_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(remote_id.as_bytes());
    let digest = hasher.finalize();
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF;
    // 0 is reserved for "no anime"
    id.max(1)
}

/// `order` must be below [`EPISODE_ID_STRIDE`]; [`AnimeEntry::from_candidate`]
/// only hands out such orders
pub fn episode_id_for(anime_id: u32, order: u32) -> u64 {
    debug_assert!((order as u64) < EPISODE_ID_STRIDE, "episode order {} overflows the id stride", order);
    anime_id as u64 * EPISODE_ID_STRIDE + order as u64
}

/// Give every episode a distinct order in `1..EPISODE_ID_STRIDE`
///
/// Usable remote orders are kept. Missing, out-of-range and duplicate ones
/// take the first free order at or after their 1-based position. `None` means
/// no order is left and the episode is dropped.
fn assign_orders(source: &str, remote_id: &str, episodes: &[RemoteEpisode]) -> Vec<Option<u32>> {
    let max_order = (EPISODE_ID_STRIDE - 1) as u32;
    let mut used = HashSet::new();
    let mut orders: Vec<Option<u32>> = episodes
        .iter()
        .map(|ep| match ep.order {
            Some(order) if (1..=max_order).contains(&order) && used.insert(order) => Some(order),
            Some(order) => {
                warn!(source, remote_id, episode = %ep.id, order, "Unusable episode order, deriving one");
                None
            }
            None => None,
        })
        .collect();

    for (idx, slot) in orders.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let start = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        *slot = (start..=max_order).find(|order| !used.contains(order));
        match slot {
            Some(order) => {
                used.insert(*order);
            }
            None => warn!(source, remote_id, position = idx + 1, "No episode order left, dropping episode"),
        }
    }
    orders
}

/// Recover the anime id encoded in an episode id
pub fn anime_id_of_episode(episode_id: u64) -> u32 {
    (episode_id / EPISODE_ID_STRIDE) as u32
}
