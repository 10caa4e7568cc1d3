//! API routes

use crate::api::handlers::{
    get_bangumi, get_comments, health_check, match_file, search_anime, select_anime, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the API routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v2/search/anime", get(search_anime))
        .route("/api/v2/match", post(match_file))
        .route("/api/v2/bangumi/:anime_id", get(get_bangumi))
        .route("/api/v2/comment/:episode_id", get(get_comments))
        .route("/api/v2/select", post(select_anime))
        .with_state(state)
}
