//! Source adapter interface
//!
//! A source adapter is a thin client for one external video platform. The
//! aggregator only ever talks to platforms through this trait:
//! - Searching for programs by keyword
//! - Retrieving optional extended detail
//! - Listing the episodes of a program
//! - Fetching the raw danmaku of an episode, whole or in segments
//! - Converting raw danmaku into canonical comments

use crate::core::error::{AggregatorError, Result};
use crate::core::models::{Candidate, Comment, CommentMode, Detail, RemoteEpisode};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Raw danmaku item as returned by a platform
pub type RawComment = Value;

/// Source adapter trait
///
/// Only `search`, `get_episodes` and `get_episode_danmu` are required. The
/// remaining operations have defaults for platforms without them.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Identifier used in configuration (`sources.order`, merge groups, offsets)
    fn name(&self) -> &str;

    /// Search for programs by keyword
    ///
    /// # Arguments
    /// * `keyword` - Normalized title to search for
    ///
    /// # Errors
    /// Returns an error if the platform request fails
    async fn search(&self, keyword: &str) -> Result<Vec<Candidate>>;

    /// Get extended information about a search hit
    ///
    /// # Returns
    /// `None` when the platform has no detail endpoint or the id is unknown
    async fn get_detail(&self, _id: &str) -> Result<Option<Detail>> {
        Ok(None)
    }

    /// Get the episode list of a program
    ///
    /// # Arguments
    /// * `id` - Program identifier from a [`Candidate`]
    async fn get_episodes(&self, id: &str) -> Result<Vec<RemoteEpisode>>;

    /// Fetch all raw danmaku of an episode in one call
    ///
    /// # Arguments
    /// * `id` - Episode identifier from a [`RemoteEpisode`]
    async fn get_episode_danmu(&self, id: &str) -> Result<Vec<RawComment>>;

    /// List the time segments of an episode's danmaku
    ///
    /// # Returns
    /// `None` when the platform does not serve danmaku in segments
    async fn get_episode_danmu_segments(&self, _id: &str) -> Result<Option<SegmentList>> {
        Ok(None)
    }

    /// Fetch the raw danmaku of one segment
    async fn get_episode_segment_danmu(&self, segment: &Segment) -> Result<Vec<RawComment>> {
        Err(AggregatorError::SourceError(format!(
            "{} does not support segment {}",
            self.name(),
            segment.id
        )))
    }

    /// Convert raw danmaku into canonical comments
    ///
    /// The default understands the dandanplay shape (`{"p": "time,mode,color,..", "m": text}`)
    /// and the flat shape (`{"time", "mode", "color", "text"}`). Items in neither
    /// shape are skipped.
    fn format_comments(&self, raw: &[RawComment]) -> Vec<Comment> {
        raw.iter().filter_map(parse_raw_comment).collect()
    }
}

/// One time slice of an episode's danmaku
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

/// Segment listing for an episode, in playback order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentList {
    pub segments: Vec<Segment>,
}

/// Fetch and format every comment of an episode from one adapter
///
/// Prefers the segmented API when the adapter offers a non-empty segment list.
/// Segments are fetched concurrently and concatenated in segment order; a
/// failed segment contributes nothing. Every comment is tagged with the
/// adapter's name.
pub async fn fetch_episode_comments(adapter: &dyn SourceAdapter, id: &str) -> Result<Vec<Comment>> {
    let raw = match adapter.get_episode_danmu_segments(id).await? {
        Some(list) if !list.segments.is_empty() => {
            debug!(
                source = adapter.name(),
                segments = list.segments.len(),
                "Fetching segmented danmaku"
            );
            let fetches = list
                .segments
                .iter()
                .map(|segment| adapter.get_episode_segment_danmu(segment));
            let mut raw = Vec::new();
            for (segment, result) in list.segments.iter().zip(join_all(fetches).await) {
                match result {
                    Ok(items) => raw.extend(items),
                    Err(e) => warn!(
                        source = adapter.name(),
                        segment = %segment.id,
                        "Segment fetch failed: {}", e
                    ),
                }
            }
            raw
        }
        _ => adapter.get_episode_danmu(id).await?,
    };

    let name = adapter.name().to_string();
    Ok(adapter
        .format_comments(&raw)
        .into_iter()
        .map(|comment| comment.with_source(name.clone()))
        .collect())
}

/// Parse one raw item in either of the two common shapes
pub fn parse_raw_comment(raw: &RawComment) -> Option<Comment> {
    if let (Some(p), Some(m)) = (raw.get("p").and_then(Value::as_str), raw.get("m")) {
        let text = m.as_str()?;
        let mut fields = p.split(',');
        let time = fields.next()?.trim().parse::<f64>().ok()?;
        let mode = fields
            .next()
            .and_then(|f| f.trim().parse::<i64>().ok())
            .unwrap_or(1);
        let color = fields
            .next()
            .and_then(|f| f.trim().parse::<u32>().ok())
            .unwrap_or(0xFFFFFF);
        return valid(time).then(|| Comment::new(time, CommentMode::from_code(mode), color, text));
    }

    let time = number(raw.get("time")?)?;
    let text = raw.get("text").and_then(Value::as_str)?;
    let mode = raw
        .get("mode")
        .and_then(number)
        .map(|m| m as i64)
        .unwrap_or(1);
    let color = raw.get("color").and_then(parse_color).unwrap_or(0xFFFFFF);

    valid(time).then(|| Comment::new(time, CommentMode::from_code(mode), color, text))
}

fn valid(time: f64) -> bool {
    time.is_finite()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Colors arrive as decimal numbers or `#RRGGBB` strings
fn parse_color(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|c| c as u32),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix('#') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct SegmentedSource {
        segments: HashMap<String, Vec<RawComment>>,
    }

    #[async_trait]
    impl SourceAdapter for SegmentedSource {
        fn name(&self) -> &str {
            "seg"
        }

        async fn search(&self, _keyword: &str) -> Result<Vec<Candidate>> {
            Ok(Vec::new())
        }

        async fn get_episodes(&self, _id: &str) -> Result<Vec<RemoteEpisode>> {
            Ok(Vec::new())
        }

        async fn get_episode_danmu(&self, _id: &str) -> Result<Vec<RawComment>> {
            Ok(vec![json!({"p": "99,1,0", "m": "whole"})])
        }

        async fn get_episode_danmu_segments(&self, _id: &str) -> Result<Option<SegmentList>> {
            Ok(Some(SegmentList {
                segments: ["s1", "s2", "broken"]
                    .iter()
                    .map(|id| Segment { id: id.to_string(), start: 0.0, end: 0.0 })
                    .collect(),
            }))
        }

        async fn get_episode_segment_danmu(&self, segment: &Segment) -> Result<Vec<RawComment>> {
            self.segments
                .get(&segment.id)
                .cloned()
                .ok_or_else(|| AggregatorError::SourceError("gone".into()))
        }
    }

    #[test]
    fn test_parse_dandan_shape() {
        let c = parse_raw_comment(&json!({"p": "12.5,5,16711680,uid", "m": "前方高能"})).unwrap();
        assert_eq!(c.time, 12.5);
        assert_eq!(c.mode, CommentMode::Top);
        assert_eq!(c.color, 0xFF0000);
        assert_eq!(c.text, "前方高能");
    }

    #[test]
    fn test_parse_flat_shape() {
        let c = parse_raw_comment(&json!({"time": "3", "mode": 4, "color": "#00FF00", "text": "hi"}))
            .unwrap();
        assert_eq!(c.time, 3.0);
        assert_eq!(c.mode, CommentMode::Bottom);
        assert_eq!(c.color, 0x00FF00);
    }

    #[test]
    fn test_unknown_shape_is_skipped() {
        assert!(parse_raw_comment(&json!({"content": "x"})).is_none());
        assert!(parse_raw_comment(&json!({"p": "abc,1,0", "m": "x"})).is_none());
    }

    #[tokio::test]
    async fn test_segments_preferred_and_ordered() {
        let mut segments = HashMap::new();
        segments.insert("s1".to_string(), vec![json!({"p": "1,1,0", "m": "a"})]);
        segments.insert("s2".to_string(), vec![json!({"p": "400,1,0", "m": "b"})]);
        let source = SegmentedSource { segments };

        let comments = fetch_episode_comments(&source, "ep").await.unwrap();
        let texts: Vec<_> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(comments.iter().all(|c| c.source_tag == "seg"));
    }
}
