//! Route handlers
//!
//! Each handler is a thin translation between HTTP and `DanmakuService`.

use crate::api::models::{
    BangumiResponse, CacheSummary, CommentQuery, HealthResponse, MatchRequest, MatchResponse,
    SearchQuery, SearchResponse, SelectRequest, SelectResponse,
};
use crate::cache::Namespace;
use crate::core::error::{AggregatorError, Result};
use crate::core::output::OutputFormat;
use crate::core::services::DanmakuService;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DanmakuService>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let aggregator = state.service.state();
    let cache = [Namespace::Search, Namespace::Comment]
        .into_iter()
        .map(|ns| {
            let stats = aggregator.cache.stats(ns);
            CacheSummary {
                namespace: ns.to_string(),
                entries: stats.entries,
                max_items: stats.max_items,
            }
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
        sources: aggregator.registry.names().to_vec(),
        cache,
    })
}

/// GET /api/v2/search/anime?keyword=
pub async fn search_anime(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse> {
    let keyword = query.keyword.trim();
    if keyword.is_empty() {
        return Err(AggregatorError::InvalidRequest("keyword cannot be empty".to_string()));
    }

    let animes = state.service.search_anime(keyword).await?;
    info!(keyword = %keyword, results = animes.len(), "Anime search");

    Ok(Json(SearchResponse {
        success: true,
        animes: animes.iter().map(Into::into).collect(),
    }))
}

/// POST /api/v2/match
///
/// An unresolvable filename is a normal outcome and answers `isMatched: false`.
pub async fn match_file(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<impl IntoResponse> {
    match state.service.match_file(&request.file_name).await {
        Ok(outcome) => Ok(Json(MatchResponse::from(&outcome))),
        Err(AggregatorError::NotFound(reason)) => {
            info!(file_name = %request.file_name, %reason, "No match");
            Ok(Json(MatchResponse::unmatched()))
        }
        Err(e) => Err(e),
    }
}

/// GET /api/v2/bangumi/:anime_id
pub async fn get_bangumi(
    State(state): State<AppState>,
    Path(anime_id): Path<u32>,
) -> Result<impl IntoResponse> {
    let anime = state.service.get_bangumi(anime_id)?;
    Ok(Json(BangumiResponse::from(&anime)))
}

/// GET /api/v2/comment/:episode_id?format=json|xml
pub async fn get_comments(
    State(state): State<AppState>,
    Path(episode_id): Path<u64>,
    Query(query): Query<CommentQuery>,
) -> Result<impl IntoResponse> {
    let format = query
        .format
        .as_deref()
        .map(str::parse::<OutputFormat>)
        .transpose()?;

    let rendered = state.service.get_comments(episode_id, format).await?;
    Ok(([(header::CONTENT_TYPE, rendered.format.content_type())], rendered.body))
}

/// POST /api/v2/select
pub async fn select_anime(
    State(state): State<AppState>,
    Json(request): Json<SelectRequest>,
) -> Result<impl IntoResponse> {
    if request.query.trim().is_empty() {
        return Err(AggregatorError::InvalidRequest("query cannot be empty".to_string()));
    }
    state.service.record_selection(&request.query, request.anime_id)?;
    info!(query = %request.query, anime_id = request.anime_id, "Selection recorded");
    Ok(Json(SelectResponse { success: true }))
}
