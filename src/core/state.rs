//! Process-wide aggregator state
//!
//! Built once at startup and shared through `Arc`. Holds the configuration
//! snapshot, the parsed rule tables and every in-process store.

use crate::cache::{AnimeStore, CacheLayer, HttpMirror, PreferenceMap, RemoteMirror};
use crate::core::ai::{AiMatcher, OpenAiMatcher};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::matcher::{compile_filter, TitleNormalizer};
use crate::core::merge::MergeGroup;
use crate::core::models::{AnimeEntry, Comment};
use crate::core::normalizer::CommentPipeline;
use crate::core::offset::{OffsetTable, SourceOffsets};
use crate::source::{HttpSource, SourceAdapter, SourceRegistry};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct AggregatorState {
    pub config: Config,
    pub registry: SourceRegistry,
    pub cache: CacheLayer,
    pub animes: AnimeStore,
    pub preferences: PreferenceMap,
    pub titles: TitleNormalizer,
    pub title_filter: Option<Regex>,
    pub episode_filter: Option<Regex>,
    pub merge_groups: Vec<MergeGroup>,
    pub offsets: OffsetTable,
    pub pipeline: CommentPipeline,
    pub ai: Option<Arc<dyn AiMatcher>>,
}

impl AggregatorState {
    /// Assemble state around an existing registry, mirror and AI client
    ///
    /// Malformed rule tables and filters degrade to "rule skipped"; this never fails.
    pub fn new(
        config: Config,
        registry: SourceRegistry,
        mirror: Option<Arc<dyn RemoteMirror>>,
        ai: Option<Arc<dyn AiMatcher>>,
    ) -> Self {
        let titles = TitleNormalizer::new(&config.matching.title_mapping_table);
        let offsets = OffsetTable::parse(&config.danmu.title_platform_offset_table, &titles);
        let merge_groups = MergeGroup::parse_list(&config.danmu.merge_source_pairs);

        info!(
            sources = registry.len(),
            merge_groups = merge_groups.len(),
            offset_rules = offsets.rules().len(),
            mirror = mirror.is_some(),
            ai = ai.is_some(),
            "Aggregator state initialized"
        );

        Self {
            cache: CacheLayer::new(&config.cache, mirror),
            animes: AnimeStore::new(config.cache.max_animes),
            preferences: PreferenceMap::new(config.cache.max_preferences),
            title_filter: compile_filter("title_filter", &config.matching.title_filter),
            episode_filter: compile_filter("episode_title_filter", &config.matching.episode_title_filter),
            pipeline: CommentPipeline::new(&config.danmu),
            titles,
            offsets,
            merge_groups,
            registry,
            ai,
            config,
        }
    }

    /// Build everything from configuration: HTTP sources, remote mirror and AI client
    pub fn from_config(config: Config) -> Result<Self> {
        let mut available: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        for remote in &config.sources.remote {
            let timeout = config.sources.timeout_for(&remote.name);
            available.push(Arc::new(HttpSource::new(&remote.name, &remote.base_url, timeout)?));
        }
        let registry = SourceRegistry::from_order(&config.sources.order, available);

        let mirror: Option<Arc<dyn RemoteMirror>> = match &config.cache.mirror_url {
            Some(url) => Some(Arc::new(HttpMirror::new(url.as_str(), config.cache.mirror_token.as_str())?)),
            None => None,
        };

        let ai: Option<Arc<dyn AiMatcher>> = if config.ai.enabled {
            Some(Arc::new(OpenAiMatcher::new(&config.ai)?))
        } else {
            None
        };

        Ok(Self::new(config, registry, mirror, ai))
    }

    /// Offsets for every source present in a merged stream of `anime`
    ///
    /// Comments from the anime's own source also match rules on its content
    /// platform; merged-in sources match on their source name.
    pub fn source_offsets(&self, anime: &AnimeEntry, comments: &[Comment]) -> SourceOffsets {
        let tags: BTreeSet<&str> = comments.iter().map(|c| c.source_tag.as_str()).collect();

        let mut offsets = SourceOffsets::default();
        for tag in tags {
            let offset = if tag == anime.source {
                self.offsets.resolve(&anime.title, &[anime.platform.as_str(), tag], &self.titles)
            } else {
                self.offsets.resolve(&anime.title, &[tag], &self.titles)
            };
            if offset != 0.0 {
                offsets.insert(tag, offset);
            }
        }
        offsets
    }
}

/// Periodically drop expired cache entries for as long as the runtime lives
pub fn spawn_cache_sweeper(state: Arc<AggregatorState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = state.cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired cache entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Candidate, CommentMode};

    #[test]
    fn test_from_config_builds_remote_sources() {
        let config = Config::from_toml_str(
            r#"
            [sources]
            order = ["b", "a"]

            [[sources.remote]]
            name = "a"
            base_url = "http://127.0.0.1:1"

            [[sources.remote]]
            name = "b"
            base_url = "http://127.0.0.1:2"

            [danmu]
            merge_source_pairs = "a&b,broken&&"
            title_platform_offset_table = "庆余年@qq&youku@-5;nonsense"
            "#,
        )
        .unwrap();

        let state = AggregatorState::from_config(config).unwrap();
        assert_eq!(state.registry.names(), &["b".to_string(), "a".to_string()]);
        assert_eq!(state.merge_groups.len(), 1);
        assert_eq!(state.offsets.rules().len(), 1);
        assert!(state.ai.is_none());
    }

    #[test]
    fn test_source_offsets_per_tag() {
        let mut config = Config::from_toml_str("").unwrap();
        config.danmu.title_platform_offset_table = "庆余年@youku@-5;庆余年@b@2".to_string();
        let state = AggregatorState::new(config, SourceRegistry::new(), None, None);

        let candidate = Candidate {
            id: "1".to_string(),
            title: "庆余年".to_string(),
            type_description: "TV".to_string(),
            year: None,
            episode_count: None,
            platform: Some("youku".to_string()),
        };
        let anime = AnimeEntry::from_candidate("a", &candidate, &[]);
        let comments = vec![
            Comment::new(1.0, CommentMode::Scroll, 0, "x").with_source("a"),
            Comment::new(1.0, CommentMode::Scroll, 0, "y").with_source("b"),
            Comment::new(1.0, CommentMode::Scroll, 0, "z").with_source("c"),
        ];

        let offsets = state.source_offsets(&anime, &comments);
        assert_eq!(offsets.for_source("a"), -5.0);
        assert_eq!(offsets.for_source("b"), 2.0);
        assert_eq!(offsets.for_source("c"), 0.0);
    }

    #[test]
    fn test_invalid_filter_is_ignored() {
        let mut config = Config::from_toml_str("").unwrap();
        config.matching.title_filter = "(unclosed".to_string();
        let state = AggregatorState::new(config, SourceRegistry::new(), None, None);
        assert!(state.title_filter.is_none());
    }

    #[tokio::test]
    async fn test_cache_sweeper_keeps_live_entries() {
        let config = Config::from_toml_str("").unwrap();
        let state = Arc::new(AggregatorState::new(config, SourceRegistry::default(), None, None));
        state.cache.set_search("太空杀", vec![1]);

        let sweeper = spawn_cache_sweeper(state.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!sweeper.is_finished());
        assert_eq!(state.cache.get_search("太空杀"), Some(vec![1]));
        sweeper.abort();
    }
}
