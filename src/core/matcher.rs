//! Title and episode matcher
//!
//! Resolves a free-text query or a video filename to one anime entry:
//! 1. Split season/episode/year hints off the query and normalize the title
//! 2. Check the search cache; on a miss fan out to every enabled source
//! 3. Drop blacklisted titles and episodes
//! 4. Rank, then let a remembered selection or an AI verdict pick the winner

use crate::core::error::{AggregatorError, Result};
use crate::core::fanout::{fan_out, Branch, FanoutStrategy};
use crate::core::models::{AnimeEntry, EpisodeEntry, MediaKind};
use crate::core::state::AggregatorState;
use crate::source::SourceAdapter;
use ferrous_opencc::config::BuiltinConfig;
use ferrous_opencc::OpenCC;
use futures::future::join_all;
use futures::FutureExt;
use regex::Regex;
use std::cmp::Reverse;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d{1,2})\s*E(\d{1,4})").expect("valid regex"));
static CN_SEASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*([0-9零〇一二两三四五六七八九十百]+)\s*[季部]").expect("valid regex"));
static CN_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*([0-9零〇一二两三四五六七八九十百]+)\s*[集话話]").expect("valid regex"));
static SEASON_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:season\s*(\d{1,2})|(\d{1,2})(?:st|nd|rd|th)\s+season|(?:^|\s)S(\d{1,2})(?:\s|$))")
        .expect("valid regex")
});
static EPISODE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[\s\-_])(?:EP|E|Episode)\s*\.?\s*(\d{1,4})(?:\s|$|v\d)").expect("valid regex"));
static DASH_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s-\s*(\d{1,4})(?:v\d)?(?:\s|$)").expect("valid regex"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[(（\[]((?:19|20)\d{2})[)）\]]").expect("valid regex"));
static BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|【[^】]*】").expect("valid regex"));
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(?:mkv|mp4|avi|flv|rmvb|ts|m4v|webm|mov|wmv)$").expect("valid regex")
});
static RELEASE_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:2160p|1080p|720p|480p|4k|x26[45]|h\.?26[45]|hevc|avc|aac|flac|web-?dl|webrip|bluray|bdrip|hdtv|10bit|8bit)\b",
    )
    .expect("valid regex")
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Optional hints narrowing a resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHints {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,
    /// Set when the query came from a video filename
    pub filename: Option<String>,
}

/// A query split into its bare title and hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub title: String,
    pub hints: QueryHints,
}

/// Split `S01E02`, `第2季`, `第3集`, `EP05`, ` - 05`, `(2023)` and similar
/// markers off a query
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut text = raw.to_string();
    let mut hints = QueryHints::default();

    if let Some(groups) = extract(&SEASON_EPISODE, &mut text) {
        hints.season = groups.first().and_then(|s| s.parse().ok());
        hints.episode = groups.get(1).and_then(|s| s.parse().ok());
    }
    if let Some(groups) = extract(&CN_SEASON, &mut text) {
        hints.season = hints.season.or_else(|| groups.first().and_then(|s| parse_number(s)));
    }
    if let Some(groups) = extract(&CN_EPISODE, &mut text) {
        hints.episode = hints.episode.or_else(|| groups.first().and_then(|s| parse_number(s)));
    }
    if let Some(groups) = extract(&SEASON_WORD, &mut text) {
        hints.season = hints.season.or_else(|| groups.first().and_then(|s| s.parse().ok()));
    }
    if hints.episode.is_none() {
        for pattern in [&*EPISODE_WORD, &*DASH_EPISODE] {
            if let Some(groups) = extract(pattern, &mut text) {
                hints.episode = groups.first().and_then(|s| s.parse().ok());
                break;
            }
        }
    }
    if let Some(groups) = extract(&YEAR, &mut text) {
        hints.year = groups.first().and_then(|s| s.parse().ok());
    }

    ParsedQuery {
        title: clean_title(&text),
        hints,
    }
}

/// Parse a video filename such as `[Group] Title - 05 [1080p].mkv`
pub fn parse_filename(file_name: &str) -> ParsedQuery {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let base = EXTENSION.replace(base, "");
    let base = BRACKETS.replace_all(&base, " ");
    // Dotted release names: Title.S01E02.1080p
    let base = if base.contains(' ') {
        base.into_owned()
    } else {
        base.replace(['.', '_'], " ")
    };
    let base = RELEASE_TAGS.replace_all(&base, " ");

    let mut parsed = parse_query(&base);
    parsed.hints.filename = Some(file_name.to_string());
    parsed
}

/// Season number carried in a program title (`第二季`, `Season 2`, `2nd Season`)
pub fn season_of_title(title: &str) -> Option<u32> {
    if let Some(caps) = CN_SEASON.captures(title) {
        return caps.get(1).and_then(|m| parse_number(m.as_str()));
    }
    SEASON_WORD
        .captures(title)
        .and_then(|caps| caps.iter().skip(1).flatten().next().map(|m| m.as_str().to_string()))
        .and_then(|s| s.parse().ok())
}

/// Title with season markers removed, for title comparison
fn base_title(title: &str) -> String {
    let stripped = CN_SEASON.replace_all(title, " ");
    let stripped = SEASON_WORD.replace_all(&stripped, " ");
    clean_title(&stripped).to_lowercase()
}

/// Remove the first match of `pattern` from `text`, returning its capture groups
fn extract(pattern: &Regex, text: &mut String) -> Option<Vec<String>> {
    let (range, groups) = {
        let caps = pattern.captures(text)?;
        let whole = caps.get(0)?;
        let groups = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect::<Vec<_>>();
        (whole.range(), groups)
    };
    text.replace_range(range, " ");
    Some(groups)
}

fn clean_title(text: &str) -> String {
    WHITESPACE
        .replace_all(text, " ")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '·'))
        .to_string()
}

/// Arabic or Chinese numerals up to the hundreds
fn parse_number(text: &str) -> Option<u32> {
    if let Ok(n) = text.parse::<u32>() {
        return Some(n);
    }

    let mut total: u32 = 0;
    let mut current: u32 = 0;
    for c in text.chars() {
        match c {
            '十' => {
                total += current.max(1) * 10;
                current = 0;
            }
            '百' => {
                total += current.max(1) * 100;
                current = 0;
            }
            _ => {
                current = match c {
                    '零' | '〇' => 0,
                    '一' => 1,
                    '二' | '两' => 2,
                    '三' => 3,
                    '四' => 4,
                    '五' => 5,
                    '六' => 6,
                    '七' => 7,
                    '八' => 8,
                    '九' => 9,
                    _ => return None,
                }
            }
        }
    }
    Some(total + current).filter(|n| *n > 0)
}

/// Query normalization shared by the matcher and the offset table
pub struct TitleNormalizer {
    mappings: Vec<(String, String)>,
    converter: Option<OpenCC>,
}

impl TitleNormalizer {
    /// Build from a `orig->mapped;orig2->mapped2` table. Malformed rules are
    /// dropped with a warning.
    pub fn new(mapping_table: &str) -> Self {
        let converter = match OpenCC::from_config(BuiltinConfig::T2s) {
            Ok(converter) => Some(converter),
            Err(e) => {
                warn!("Traditional-to-simplified converter unavailable: {}", e);
                None
            }
        };

        Self {
            mappings: parse_title_mappings(mapping_table),
            converter,
        }
    }

    /// Collapse whitespace, convert to simplified script and apply the first
    /// matching title mapping
    pub fn normalize(&self, title: &str) -> String {
        let collapsed = clean_title(title);
        let simplified = match &self.converter {
            Some(converter) => converter.convert(&collapsed),
            None => collapsed,
        };

        for (orig, mapped) in &self.mappings {
            if simplified.contains(orig.as_str()) {
                return simplified.replace(orig.as_str(), mapped);
            }
        }
        simplified
    }
}

fn parse_title_mappings(table: &str) -> Vec<(String, String)> {
    table
        .split(';')
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .filter_map(|rule| match rule.split_once("->") {
            Some((orig, mapped)) if !orig.trim().is_empty() && !mapped.trim().is_empty() => {
                Some((orig.trim().to_string(), mapped.trim().to_string()))
            }
            _ => {
                warn!(rule, "Dropping malformed title mapping rule");
                None
            }
        })
        .collect()
}

/// Compile an optional filter regex; an invalid pattern disables the filter
pub fn compile_filter(name: &str, pattern: &str) -> Option<Regex> {
    if pattern.trim().is_empty() {
        return None;
    }
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(filter = name, "Ignoring invalid filter regex: {}", e);
            None
        }
    }
}

/// Order candidates best-first, dropping those that cannot satisfy the hints
///
/// Hard requirements: an explicit season must match exactly, an episode hint
/// requires a series that has that episode. Ties are broken by title
/// exactness, movie preference for episode-less filenames, year proximity,
/// platform preference and then episode count.
pub fn rank_entries(
    entries: Vec<AnimeEntry>,
    title: &str,
    hints: &QueryHints,
    platform_order: &[String],
) -> Vec<AnimeEntry> {
    let wanted_kind = if hints.episode.is_some() {
        MediaKind::Series
    } else {
        MediaKind::Unknown
    };
    let query_title = base_title(title);
    let prefer_movie = hints.filename.is_some() && hints.episode.is_none();

    let mut ranked: Vec<(usize, AnimeEntry)> = entries
        .into_iter()
        .enumerate()
        .filter(|(_, entry)| {
            let season_ok = match hints.season {
                Some(season) => entry.kind != MediaKind::Movie && entry.season.unwrap_or(1) == season,
                None => true,
            };
            let episode_ok = match hints.episode {
                Some(episode) => entry.episode_by_order(episode).is_some(),
                None => true,
            };
            season_ok && episode_ok && entry.kind.compatible_with(wanted_kind)
        })
        .collect();

    ranked.sort_by_cached_key(|(position, entry)| {
        let candidate_title = base_title(&entry.title);
        let title_score = if candidate_title == query_title {
            0
        } else if candidate_title.contains(&query_title) || query_title.contains(&candidate_title) {
            1
        } else {
            2
        };
        let kind_score = u8::from(prefer_movie && entry.kind != MediaKind::Movie);
        let year_distance = match (hints.year, entry.year) {
            (Some(wanted), Some(year)) => (wanted - year).unsigned_abs(),
            (Some(_), None) => u32::MAX,
            (None, _) => 0,
        };
        let platform_rank = platform_order
            .iter()
            .position(|p| p == &entry.platform || p == &entry.source)
            .unwrap_or(platform_order.len());

        (
            title_score,
            kind_score,
            year_distance,
            platform_rank,
            Reverse(entry.episode_count),
            *position,
        )
    });

    ranked.into_iter().map(|(_, entry)| entry).collect()
}

/// What decided a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ranked,
    Preference,
    Ai,
}

/// A resolved query
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub normalized_query: String,
    pub anime: AnimeEntry,
    /// The hinted episode, or the first one when no episode was given
    pub episode: Option<EpisodeEntry>,
    pub resolution: Resolution,
    pub from_cache: bool,
}

/// Resolves queries against the enabled sources
pub struct Matcher {
    state: Arc<AggregatorState>,
}

impl Matcher {
    pub fn new(state: Arc<AggregatorState>) -> Self {
        Self { state }
    }

    /// Resolve a free-text query such as `太空杀 S01E02`
    pub async fn match_query(&self, query: &str) -> Result<MatchOutcome> {
        let parsed = parse_query(query);
        self.resolve(&parsed.title, &parsed.hints).await
    }

    /// Resolve a video filename
    pub async fn match_file(&self, file_name: &str) -> Result<MatchOutcome> {
        let parsed = parse_filename(file_name);
        self.resolve(&parsed.title, &parsed.hints).await
    }

    /// All candidates for a keyword, best-first
    pub async fn search(&self, keyword: &str) -> Result<Vec<AnimeEntry>> {
        let parsed = parse_query(keyword);
        if parsed.title.is_empty() {
            return Err(AggregatorError::InvalidRequest("keyword cannot be empty".to_string()));
        }

        let (normalized, entries, _) = self.candidates(&parsed.title).await;
        Ok(rank_entries(
            entries,
            &normalized,
            &parsed.hints,
            &self.state.config.sources.platform_order,
        ))
    }

    /// Resolve a bare title plus hints to a single entry
    pub async fn resolve(&self, title: &str, hints: &QueryHints) -> Result<MatchOutcome> {
        if title.trim().is_empty() {
            return Err(AggregatorError::InvalidRequest("query cannot be empty".to_string()));
        }

        let (normalized, entries, from_cache) = self.candidates(title).await;
        let ranked = rank_entries(
            entries,
            &normalized,
            hints,
            &self.state.config.sources.platform_order,
        );

        let Some(head) = ranked.first() else {
            info!(query = %normalized, "No candidate matched");
            return Err(AggregatorError::NotFound(format!("No match for '{}'", normalized)));
        };

        let verdict = self.ai_verdict(&normalized, &ranked).await;
        let preferred = self
            .state
            .preferences
            .preferred(&normalized)
            .and_then(|anime_id| ranked.iter().position(|e| e.anime_id == anime_id));

        let (index, resolution) = match (verdict, preferred) {
            (Some(index), _) if self.state.config.ai.trust => (index, Resolution::Ai),
            (_, Some(index)) => (index, Resolution::Preference),
            (Some(index), None) => (index, Resolution::Ai),
            (None, None) => (0, Resolution::Ranked),
        };

        let (anime, resolution) = match ranked.get(index) {
            Some(entry) => (entry.clone(), resolution),
            None => {
                warn!(
                    query = %normalized,
                    index,
                    candidates = ranked.len(),
                    resolution = ?resolution,
                    "Chosen index is out of range, using the top-ranked candidate"
                );
                (head.clone(), Resolution::Ranked)
            }
        };
        let episode = match hints.episode {
            Some(order) => anime.episode_by_order(order).cloned(),
            None => anime.episodes.first().cloned(),
        };

        info!(
            query = %normalized,
            anime_id = anime.anime_id,
            source = %anime.source,
            title = %anime.title,
            resolution = ?resolution,
            "Query resolved"
        );

        Ok(MatchOutcome {
            normalized_query: normalized,
            anime,
            episode,
            resolution,
            from_cache,
        })
    }

    /// Remember a manual choice for future resolutions of the same query
    pub fn record_selection(&self, query: &str, anime_id: u32) -> Result<()> {
        let parsed = parse_query(query);
        let normalized = self.state.titles.normalize(&parsed.title);
        if normalized.is_empty() {
            return Err(AggregatorError::InvalidRequest("query cannot be empty".to_string()));
        }
        if self.state.animes.get(anime_id).is_none() {
            return Err(AggregatorError::NotFound(format!("Anime {} not found", anime_id)));
        }

        self.state.preferences.remember(&normalized, anime_id);
        info!(query = %normalized, anime_id, "Recorded manual selection");
        Ok(())
    }

    /// Candidates for a title from the search cache or a live fan-out
    async fn candidates(&self, title: &str) -> (String, Vec<AnimeEntry>, bool) {
        let normalized = self.state.titles.normalize(title);

        if let Some(ids) = self.state.cache.get_search(&normalized) {
            let cached: Option<Vec<AnimeEntry>> =
                ids.iter().map(|id| self.state.animes.get(*id)).collect();
            match cached {
                Some(entries) => {
                    debug!(query = %normalized, count = entries.len(), "Search cache hit");
                    return (normalized, entries, true);
                }
                None => debug!(query = %normalized, "Cached search refers to evicted anime, refetching"),
            }
        }

        let strategy = FanoutStrategy::from_config(&self.state.config.sources.search_strategy);
        let branches = self
            .state
            .registry
            .enabled()
            .into_iter()
            .map(|adapter| {
                let timeout = self.state.config.sources.timeout_for(adapter.name());
                let label = adapter.name().to_string();
                Branch::new(label, timeout, self.search_source(adapter, normalized.clone()).boxed())
            })
            .collect();

        let entries: Vec<AnimeEntry> = fan_out(strategy, branches)
            .await
            .into_iter()
            .flat_map(|outcome| outcome.items)
            .collect();

        if !entries.is_empty() {
            for entry in &entries {
                self.state.animes.insert(entry.clone());
            }
            self.state
                .cache
                .set_search(&normalized, entries.iter().map(|e| e.anime_id).collect());
        }

        (normalized, entries, false)
    }

    /// Search one source and expand every surviving hit with its episodes
    async fn search_source(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        keyword: String,
    ) -> Result<Vec<AnimeEntry>> {
        let candidates: Vec<_> = adapter
            .search(&keyword)
            .await?
            .into_iter()
            .filter(|candidate| match &self.state.title_filter {
                Some(filter) if filter.is_match(&candidate.title) => {
                    debug!(source = adapter.name(), title = %candidate.title, "Candidate filtered by title");
                    false
                }
                _ => true,
            })
            .collect();

        let episode_lists = join_all(candidates.iter().map(|c| adapter.get_episodes(&c.id))).await;

        let mut entries = Vec::with_capacity(candidates.len());
        for (candidate, episodes) in candidates.iter().zip(episode_lists) {
            match episodes {
                Ok(episodes) => {
                    let episodes: Vec<_> = episodes
                        .into_iter()
                        .filter(|ep| match &self.state.episode_filter {
                            Some(filter) => !filter.is_match(&ep.title),
                            None => true,
                        })
                        .collect();
                    if episodes.is_empty() {
                        debug!(source = adapter.name(), title = %candidate.title, "Candidate has no episodes");
                        continue;
                    }
                    entries.push(AnimeEntry::from_candidate(adapter.name(), candidate, &episodes));
                }
                Err(e) => warn!(
                    source = adapter.name(),
                    id = %candidate.id,
                    "Failed to list episodes: {}", e
                ),
            }
        }
        Ok(entries)
    }

    async fn ai_verdict(&self, query: &str, ranked: &[AnimeEntry]) -> Option<usize> {
        if !self.state.config.ai.enabled {
            return None;
        }
        let ai = self.state.ai.as_ref()?;

        match ai.choose(query, ranked).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(query, "AI match failed, using ranking: {}", e);
                None
            }
        }
    }
}
