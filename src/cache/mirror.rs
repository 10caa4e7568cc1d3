//! Best-effort remote mirror for cache writes
//!
//! The mirror is write-behind only: the local cache is authoritative and the
//! mirror is never consulted ahead of it.

use crate::core::error::{AggregatorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote key-value store receiving copies of cache writes
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl` when given
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
}

/// Mirror speaking an Upstash-style REST protocol
///
/// `POST {base_url}/set/{key}?EX={seconds}` with the value as the request body
/// and a bearer token.
pub struct HttpMirror {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpMirror {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn set_url(&self, key: &str, ttl: Option<Duration>) -> String {
        let mut url = format!("{}/set/{}", self.base_url, urlencoding::encode(key));
        if let Some(ttl) = ttl {
            url.push_str(&format!("?EX={}", ttl.as_secs().max(1)));
        }
        url
    }
}

#[async_trait]
impl RemoteMirror for HttpMirror {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let response = self
            .client
            .post(self.set_url(key, ttl))
            .bearer_auth(&self.token)
            .body(value)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AggregatorError::MirrorError(format!(
                "mirror rejected {}: HTTP {}",
                key,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Send a write to the mirror without making the caller wait
///
/// Outside a Tokio runtime the write is skipped.
pub fn spawn_mirror_write(
    mirror: Arc<dyn RemoteMirror>,
    key: String,
    value: String,
    ttl: Option<Duration>,
) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!(key = %key, "No runtime available, skipping mirror write");
        return;
    };

    handle.spawn(async move {
        if let Err(e) = mirror.set(&key, value, ttl).await {
            warn!(key = %key, "Remote mirror write failed: {}", e);
        } else {
            debug!(key = %key, "Mirrored cache entry");
        }
    });
}
