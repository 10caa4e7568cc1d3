//! Merge engine
//!
//! Merge groups are configured as `primary&secondary&secondary,primary2&...`.
//! A resolved episode whose source is a group's primary gets the secondaries'
//! comments appended to its own. If the primary's stream is empty the next
//! member is promoted. Sources in single-member groups or in no group pass
//! through unchanged.

use crate::core::error::{AggregatorError, Result};
use crate::core::fanout::{fan_out, Branch, FanoutStrategy};
use crate::core::matcher::{rank_entries, QueryHints};
use crate::core::models::{AnimeEntry, Comment, EpisodeEntry};
use crate::core::state::AggregatorState;
use crate::source::{fetch_episode_comments, SourceAdapter};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many search hits are expanded when locating a counterpart episode
const COUNTERPART_CANDIDATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    members: Vec<String>,
}

impl MergeGroup {
    pub fn new(members: Vec<String>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        Some(Self { members })
    }

    /// Parse a group list, dropping malformed groups with a warning
    pub fn parse_list(pairs: &str) -> Vec<MergeGroup> {
        pairs.split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .filter_map(|group| {
                let members: Vec<String> = group.split('&').map(|m| m.trim().to_string()).collect();
                let mut seen = HashSet::new();
                let well_formed = members.iter().all(|m| !m.is_empty() && seen.insert(m.as_str()));
                if !well_formed {
                    warn!(group, "Dropping malformed merge group");
                    return None;
                }
                MergeGroup::new(members)
            })
            .collect()
    }

    pub fn primary(&self) -> &str {
        &self.members[0]
    }

    pub fn secondaries(&self) -> &[String] {
        &self.members[1..]
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}

pub struct MergeEngine {
    state: Arc<AggregatorState>,
}

impl MergeEngine {
    pub fn new(state: Arc<AggregatorState>) -> Self {
        Self { state }
    }

    /// Fetch the merged comment stream for an episode
    ///
    /// Comment ids are renumbered `0..n` in stream order.
    pub async fn fetch(&self, anime: &AnimeEntry, episode: &EpisodeEntry) -> Vec<Comment> {
        let group = self
            .state
            .merge_groups
            .iter()
            .find(|group| group.primary() == anime.source && !group.secondaries().is_empty());

        let mut comments = match group {
            Some(group) => self.fetch_group(group, anime, episode).await,
            None => self.fetch_member(&anime.source, anime, episode).await,
        };

        for (cid, comment) in comments.iter_mut().enumerate() {
            comment.cid = cid as u64;
        }
        comments
    }

    async fn fetch_group(&self, group: &MergeGroup, anime: &AnimeEntry, episode: &EpisodeEntry) -> Vec<Comment> {
        let members = group.members();

        let mut primary = None;
        for (idx, member) in members.iter().enumerate() {
            let stream = self.fetch_member(member, anime, episode).await;
            if !stream.is_empty() {
                primary = Some((idx, stream));
                break;
            }
            info!(source = %member, episode_id = episode.episode_id, "Primary stream empty, failing over");
        }

        let Some((idx, mut merged)) = primary else {
            warn!(episode_id = episode.episode_id, "Every member of the merge group is empty");
            return Vec::new();
        };

        let secondaries = &members[idx + 1..];
        if secondaries.is_empty() {
            return merged;
        }

        let strategy = if self
            .state
            .config
            .danmu
            .race_merge_groups
            .iter()
            .any(|p| p == group.primary())
        {
            FanoutStrategy::Race
        } else {
            FanoutStrategy::WaitAll
        };

        let branches = secondaries
            .iter()
            .map(|member| self.branch(member, anime, episode))
            .collect();

        for outcome in fan_out(strategy, branches).await {
            debug!(
                source = %outcome.label,
                count = outcome.items.len(),
                "Appending secondary comments"
            );
            merged.extend(outcome.items);
        }

        info!(
            episode_id = episode.episode_id,
            primary = %members[idx],
            total = merged.len(),
            "Merged comment stream"
        );
        merged
    }

    /// One member's stream under its timeout; failures yield nothing
    async fn fetch_member(&self, member: &str, anime: &AnimeEntry, episode: &EpisodeEntry) -> Vec<Comment> {
        fan_out(FanoutStrategy::WaitAll, vec![self.branch(member, anime, episode)])
            .await
            .into_iter()
            .flat_map(|outcome| outcome.items)
            .collect()
    }

    fn branch<'a>(&'a self, member: &'a str, anime: &'a AnimeEntry, episode: &'a EpisodeEntry) -> Branch<'a, Comment> {
        Branch::new(
            member,
            self.state.config.sources.timeout_for(member),
            self.member_comments(member, anime, episode).boxed(),
        )
    }

    async fn member_comments(&self, member: &str, anime: &AnimeEntry, episode: &EpisodeEntry) -> Result<Vec<Comment>> {
        let adapter = self
            .state
            .registry
            .get(member)
            .ok_or_else(|| AggregatorError::SourceNotFound(member.to_string()))?;

        let remote_id = if member == anime.source {
            Some(episode.remote_url.clone())
        } else {
            self.locate_counterpart(adapter.as_ref(), anime, episode.order).await?
        };

        match remote_id {
            Some(id) => fetch_episode_comments(adapter.as_ref(), &id).await,
            None => {
                debug!(source = member, title = %anime.title, order = episode.order, "No counterpart episode");
                Ok(Vec::new())
            }
        }
    }

    /// Find the same episode of the same program on another source
    async fn locate_counterpart(
        &self,
        adapter: &dyn SourceAdapter,
        anime: &AnimeEntry,
        order: u32,
    ) -> Result<Option<String>> {
        let keyword = self.state.titles.normalize(&anime.title);
        let candidates: Vec<_> = adapter
            .search(&keyword)
            .await?
            .into_iter()
            .filter(|c| match &self.state.title_filter {
                Some(filter) => !filter.is_match(&c.title),
                None => true,
            })
            .take(COUNTERPART_CANDIDATES)
            .collect();

        let episode_lists = join_all(candidates.iter().map(|c| adapter.get_episodes(&c.id))).await;
        let entries: Vec<AnimeEntry> = candidates
            .iter()
            .zip(episode_lists)
            .filter_map(|(candidate, episodes)| {
                let episodes: Vec<_> = episodes
                    .ok()?
                    .into_iter()
                    .filter(|ep| match &self.state.episode_filter {
                        Some(filter) => !filter.is_match(&ep.title),
                        None => true,
                    })
                    .collect();
                Some(AnimeEntry::from_candidate(adapter.name(), candidate, &episodes))
            })
            .collect();

        let hints = QueryHints {
            season: anime.season,
            episode: Some(order),
            year: anime.year,
            filename: None,
        };
        let ranked = rank_entries(entries, &keyword, &hints, &[]);

        Ok(ranked
            .first()
            .and_then(|entry| entry.episode_by_order(order))
            .map(|ep| ep.remote_url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::models::{Candidate, RemoteEpisode};
    use crate::source::fake::FakeSource;
    use crate::source::SourceRegistry;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn state(pairs: &str, race: &[&str], sources: Vec<FakeSource>) -> Arc<AggregatorState> {
        let mut config = Config::from_toml_str("").unwrap();
        config.danmu.merge_source_pairs = pairs.to_string();
        config.danmu.race_merge_groups = race.iter().map(|s| s.to_string()).collect();
        config.sources.timeout_ms = 1000;
        let available = sources
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn SourceAdapter>)
            .collect();
        let registry = SourceRegistry::from_order(&[], available);
        Arc::new(AggregatorState::new(config, registry, None, None))
    }

    fn entry(source: &str, id: &str) -> (AnimeEntry, EpisodeEntry) {
        let candidate = Candidate {
            id: id.to_string(),
            title: "太空杀".to_string(),
            type_description: "TV".to_string(),
            year: None,
            episode_count: None,
            platform: None,
        };
        let episodes = vec![
            RemoteEpisode { id: format!("{}-1", id), title: "第1集".into(), order: Some(1) },
            RemoteEpisode { id: format!("{}-2", id), title: "第2集".into(), order: Some(2) },
        ];
        let anime = AnimeEntry::from_candidate(source, &candidate, &episodes);
        let episode = anime.episodes[0].clone();
        (anime, episode)
    }

    fn sources() -> Vec<FakeSource> {
        vec![
            FakeSource::new("dandan")
                .with_anime("d1", "太空杀", "TV", 2)
                .with_danmu("d1-1", &["d-a", "d-b"]),
            FakeSource::new("animeko")
                .with_anime("k1", "太空杀", "TV", 2)
                .with_danmu("k1-1", &["k"]),
            FakeSource::new("bahamut")
                .with_anime("h1", "太空杀", "TV", 2)
                .with_danmu("h1-1", &["h1", "h2"]),
            FakeSource::new("renren")
                .with_anime("r1", "太空杀", "TV", 2)
                .with_danmu("r1-1", &["r"]),
        ]
    }

    fn texts(comments: &[Comment]) -> Vec<(&str, &str)> {
        comments
            .iter()
            .map(|c| (c.source_tag.as_str(), c.text.as_str()))
            .collect()
    }

    #[test]
    fn test_parse_groups() {
        let groups = MergeGroup::parse_list("dandan&animeko&bahamut,renren");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].primary(), "dandan");
        assert_eq!(groups[0].secondaries(), &["animeko".to_string(), "bahamut".to_string()]);
        assert!(groups[1].secondaries().is_empty());
    }

    #[test]
    fn test_malformed_groups_dropped() {
        let groups = MergeGroup::parse_list("a&&b, ,c&d,e&e, f ");
        let primaries: Vec<_> = groups.iter().map(|g| g.primary()).collect();
        assert_eq!(primaries, vec!["c", "f"]);
    }

    #[tokio::test]
    async fn test_primary_enriched_with_secondaries() {
        let state = state("dandan&animeko&bahamut,renren", &[], sources());
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("dandan", "d1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(
            texts(&merged),
            vec![
                ("dandan", "d-a"),
                ("dandan", "d-b"),
                ("animeko", "k"),
                ("bahamut", "h1"),
                ("bahamut", "h2"),
            ]
        );
        let cids: Vec<_> = merged.iter().map(|c| c.cid).collect();
        assert_eq!(cids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_single_source_group_passes_through() {
        let sources = sources();
        let animeko_calls = sources[1].danmu_calls();
        let state = state("dandan&animeko&bahamut,renren", &[], sources);
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("renren", "r1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(texts(&merged), vec![("renren", "r")]);
        assert_eq!(animeko_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_primary_fails_over() {
        let mut sources = sources();
        sources[0] = FakeSource::new("dandan").with_anime("d1", "太空杀", "TV", 2);
        let state = state("dandan&animeko&bahamut", &[], sources);
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("dandan", "d1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(
            texts(&merged),
            vec![("animeko", "k"), ("bahamut", "h1"), ("bahamut", "h2")]
        );
    }

    #[tokio::test]
    async fn test_failing_secondary_is_skipped() {
        let mut sources = sources();
        sources[1] = FakeSource::new("animeko").failing();
        let state = state("dandan&animeko&bahamut", &[], sources);
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("dandan", "d1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(merged.len(), 4);
        assert!(merged.iter().all(|c| c.source_tag != "animeko"));
    }

    #[tokio::test]
    async fn test_raced_secondaries_take_first() {
        let mut sources = sources();
        sources[1] = FakeSource::new("animeko")
            .with_delay(Duration::from_millis(300))
            .with_anime("k1", "太空杀", "TV", 2)
            .with_danmu("k1-1", &["k"]);
        let state = state("dandan&animeko&bahamut", &["dandan"], sources);
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("dandan", "d1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(
            texts(&merged),
            vec![("dandan", "d-a"), ("dandan", "d-b"), ("bahamut", "h1"), ("bahamut", "h2")]
        );
    }

    #[tokio::test]
    async fn test_ungrouped_source_passes_through() {
        let state = state("", &[], sources());
        let engine = MergeEngine::new(state);
        let (anime, episode) = entry("dandan", "d1");

        let merged = engine.fetch(&anime, &episode).await;
        assert_eq!(texts(&merged), vec![("dandan", "d-a"), ("dandan", "d-b")]);
    }
}
