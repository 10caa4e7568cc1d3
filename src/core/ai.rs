//! AI-assisted candidate selection
//!
//! One chat completion per resolution: the model sees the query and the ranked
//! candidates and answers with a candidate index or `null`.

use crate::core::config::AiConfig;
use crate::core::error::{AggregatorError, Result};
use crate::core::models::AnimeEntry;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const DEFAULT_PROMPT: &str = "You match a user's video query to one entry of a candidate list. \
Reply with only the 0-based index of the best candidate, or null if none fits.";

static INDEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("valid index regex"));

#[async_trait]
pub trait AiMatcher: Send + Sync {
    /// Pick a candidate for `query`
    ///
    /// # Returns
    /// The index into `candidates`, or `None` when the model declines
    async fn choose(&self, query: &str, candidates: &[AnimeEntry]) -> Result<Option<usize>>;
}

/// Client for any OpenAI-compatible chat completion endpoint
pub struct OpenAiMatcher {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    prompt: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiMatcher {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let prompt = if config.prompt.trim().is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            config.prompt.clone()
        };

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            prompt,
        })
    }
}

#[async_trait]
impl AiMatcher for OpenAiMatcher {
    async fn choose(&self, query: &str, candidates: &[AnimeEntry]) -> Result<Option<usize>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: describe_candidates(query, candidates),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AggregatorError::AiError(format!(
                "endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AggregatorError::AiError(format!("malformed completion: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AggregatorError::AiError("completion has no content".to_string()))?;

        debug!(reply = %content, "AI verdict received");
        parse_verdict(&content, candidates.len())
    }
}

/// Render the query and candidate list as the user message
fn describe_candidates(query: &str, candidates: &[AnimeEntry]) -> String {
    let mut lines = vec![format!("Query: {}", query), "Candidates:".to_string()];
    for (idx, entry) in candidates.iter().enumerate() {
        lines.push(format!(
            "{}. {} | type: {} | year: {} | episodes: {} | source: {}",
            idx,
            entry.title,
            entry.type_description,
            entry
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            entry.episode_count,
            entry.source
        ));
    }
    lines.join("\n")
}

/// Interpret a model reply as a candidate index
///
/// Accepts a bare number, `null`, a JSON object with an `index` field, or
/// free text containing a number. Indices outside the candidate list are an
/// error.
pub fn parse_verdict(reply: &str, candidate_count: usize) -> Result<Option<usize>> {
    let reply = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let index = match serde_json::from_str::<Value>(reply) {
        Ok(Value::Null) => return Ok(None),
        Ok(Value::Number(n)) => n.as_i64(),
        Ok(Value::Object(map)) => match map.get("index") {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value.as_i64(),
        },
        _ if reply.eq_ignore_ascii_case("null") || reply.eq_ignore_ascii_case("none") => {
            return Ok(None)
        }
        _ => INDEX_PATTERN
            .find(reply)
            .and_then(|m| m.as_str().parse::<i64>().ok()),
    };

    match index {
        Some(i) if i >= 0 && (i as usize) < candidate_count => Ok(Some(i as usize)),
        Some(i) => Err(AggregatorError::AiError(format!(
            "index {} outside {} candidates",
            i, candidate_count
        ))),
        None => Err(AggregatorError::AiError(format!("unparseable reply: {}", reply))),
    }
}
