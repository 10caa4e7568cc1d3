//! Generic out-of-process source adapter
//!
//! Talks to a platform adapter running as a separate service over a small
//! JSON protocol:
//!
//! | Operation        | Request                        | Response                 |
//! |------------------|--------------------------------|--------------------------|
//! | search           | `GET {base}/search?keyword=..` | `[Candidate]`            |
//! | get_detail       | `GET {base}/detail/{id}`       | `Detail`, 404 if unknown |
//! | get_episodes     | `GET {base}/episodes/{id}`     | `[RemoteEpisode]`        |
//! | get_episode_danmu| `GET {base}/danmu/{id}`        | `[RawComment]`           |
//! | segments         | `GET {base}/segments/{id}`     | `SegmentList`, 404 if none |
//! | segment danmu    | `GET {base}/segment/{id}`      | `[RawComment]`           |

use super::adapter::{RawComment, Segment, SegmentList, SourceAdapter};
use crate::core::error::{AggregatorError, Result};
use crate::core::models::{Candidate, Detail, RemoteEpisode};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    /// # Errors
    ///
    /// `ConfigError` when `base_url` is not an absolute http(s) URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.into();
        match reqwest::Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(AggregatorError::ConfigError(format!(
                    "source {} has invalid base_url '{}'",
                    name, base_url
                )))
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("danmu-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            name,
            client,
        })
    }

    fn url(&self, endpoint: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, endpoint, urlencoding::encode(id))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        self.get_optional(url).await?.ok_or_else(|| {
            AggregatorError::SourceError(format!("{} returned 404", self.name))
        })
    }

    /// GET and decode, mapping 404 to `None`
    async fn get_optional<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>> {
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                AggregatorError::Timeout(format!("{} did not answer {}", self.name, url))
            } else {
                AggregatorError::NetworkError(e)
            }
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AggregatorError::SourceError(format!(
                "{} returned HTTP {} for {}",
                self.name,
                response.status(),
                url
            )));
        }

        let value = response.json::<T>().await.map_err(|e| {
            AggregatorError::DeserializationError(format!("{}: {}", self.name, e))
        })?;
        Ok(Some(value))
    }
}

#[async_trait]
impl SourceAdapter for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Candidate>> {
        let url = format!(
            "{}/search?keyword={}",
            self.base_url,
            urlencoding::encode(keyword)
        );
        self.get_json(url).await
    }

    async fn get_detail(&self, id: &str) -> Result<Option<Detail>> {
        self.get_optional(self.url("detail", id)).await
    }

    async fn get_episodes(&self, id: &str) -> Result<Vec<RemoteEpisode>> {
        self.get_json(self.url("episodes", id)).await
    }

    async fn get_episode_danmu(&self, id: &str) -> Result<Vec<RawComment>> {
        self.get_json(self.url("danmu", id)).await
    }

    async fn get_episode_danmu_segments(&self, id: &str) -> Result<Option<SegmentList>> {
        self.get_optional(self.url("segments", id)).await
    }

    async fn get_episode_segment_danmu(&self, segment: &Segment) -> Result<Vec<RawComment>> {
        self.get_json(self.url("segment", &segment.id)).await
    }
}
