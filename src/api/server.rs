//! HTTP Server implementation
//!
//! Axum router with trace-id, request tracing, timeout and CORS layers,
//! plus graceful shutdown on Ctrl+C / SIGTERM.

use crate::api::handlers::AppState;
use crate::api::middleware::trace_id_middleware;
use crate::api::routes::build_api_routes;
use crate::core::config::ServerConfig;
use crate::core::services::DanmakuService;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// HTTP API Server
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(config: ServerConfig, service: Arc<DanmakuService>) -> Self {
        let router = Self::build_router(&config, service);
        Self { router, config }
    }

    fn build_router(config: &ServerConfig, service: Arc<DanmakuService>) -> Router {
        build_api_routes(AppState { service }).layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
                .layer(Self::build_cors_layer(&config.allowed_origins)),
        )
    }

    fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        if allowed_origins.iter().any(|o| o == "*") {
            return cors.allow_origin(Any);
        }

        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(origins)
    }

    /// Bind and serve until a shutdown signal arrives
    pub async fn serve(self) -> anyhow::Result<()> {
        let socket_addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(socket_addr).await?;

        info!(
            addr = %socket_addr,
            request_timeout = self.config.request_timeout,
            "HTTP server listening"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::TRACE_ID_HEADER;
    use crate::core::config::Config;
    use crate::core::state::AggregatorState;
    use crate::source::fake::FakeSource;
    use crate::source::{SourceAdapter, SourceRegistry};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(sources: Vec<FakeSource>) -> Router {
        let config = Config::from_toml_str("").unwrap();
        let available = sources
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn SourceAdapter>)
            .collect();
        let registry = SourceRegistry::from_order(&config.sources.order, available);
        let server_config = config.server.clone();
        let state = Arc::new(AggregatorState::new(config, registry, None, None));
        ApiServer::new(server_config, Arc::new(DanmakuService::new(state))).router
    }

    fn sample() -> Router {
        router(vec![FakeSource::new("a")
            .with_anime("a1", "太空杀", "TV", 2)
            .with_danmu("a1-2", &["hello", "world"])])
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(app: &Router, uri: &str, body: Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = sample();
        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));

        let value = body_json(response).await;
        assert_eq!(value["status"], "ok");
        assert_eq!(value["sources"], json!(["a"]));
        assert_eq!(value["cache"][0]["namespace"], "search");
    }

    #[tokio::test]
    async fn test_match_then_comments() {
        let app = sample();
        let response = post(&app, "/api/v2/match", json!({"fileName": "[Group] 太空杀 S01E02 [1080p].mkv"})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = body_json(response).await;
        assert_eq!(value["isMatched"], true);
        assert_eq!(value["resolution"], "ranked");
        let episode_id = value["matches"][0]["episodeId"].as_u64().unwrap();

        let response = get(&app, &format!("/api/v2/comment/{}?format=json", episode_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        let value = body_json(response).await;
        assert_eq!(value["count"], 2);
        assert_eq!(value["comments"][0]["m"], "hello");

        let response = get(&app, &format!("/api/v2/comment/{}?format=xml", episode_id)).await;
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/xml; charset=utf-8"
        );
        assert!(body_text(response).await.contains("<d p="));
    }

    #[tokio::test]
    async fn test_unmatched_file_is_not_an_error() {
        let app = sample();
        let response = post(&app, "/api/v2/match", json!({"fileName": "完全不存在的节目.mp4"})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = body_json(response).await;
        assert_eq!(value["isMatched"], false);
        assert_eq!(value["matches"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_file_name_is_bad_request() {
        let response = post(&sample(), "/api/v2/match", json!({"fileName": "  "})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_and_bangumi() {
        let app = sample();
        let value = body_json(get(&app, "/api/v2/search/anime?keyword=%E5%A4%AA%E7%A9%BA%E6%9D%80").await).await;
        assert_eq!(value["success"], true);
        assert_eq!(value["animes"][0]["animeTitle"], "太空杀");
        let anime_id = value["animes"][0]["animeId"].as_u64().unwrap();

        let response = get(&app, &format!("/api/v2/bangumi/{}", anime_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["bangumi"]["animeId"].as_u64().unwrap(), anime_id);
        assert_eq!(value["bangumi"]["episodes"].as_array().unwrap().len(), 2);
        assert_eq!(value["bangumi"]["episodes"][1]["episodeNumber"], 2);
    }

    #[tokio::test]
    async fn test_search_requires_keyword() {
        let response = get(&sample(), "/api/v2/search/anime").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let app = sample();
        assert_eq!(get(&app, "/api/v2/bangumi/7").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&app, "/api/v2/comment/70001").await.status(), StatusCode::NOT_FOUND);

        let response = post(&app, "/api/v2/select", json!({"query": "太空杀", "animeId": 7})).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_format_is_bad_request() {
        let response = get(&sample(), "/api/v2/comment/1?format=yaml").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_select_records_preference() {
        let app = router(vec![FakeSource::new("a")
            .with_anime("a1", "太空杀", "TV", 1)
            .with_anime("a2", "太空杀 特别篇", "TV", 1)]);

        let value = body_json(get(&app, "/api/v2/search/anime?keyword=%E5%A4%AA%E7%A9%BA%E6%9D%80").await).await;
        let special = value["animes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["animeTitle"] == "太空杀 特别篇")
            .unwrap()["animeId"]
            .as_u64()
            .unwrap();

        let response = post(&app, "/api/v2/select", json!({"query": "太空杀", "animeId": special})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = body_json(post(&app, "/api/v2/match", json!({"fileName": "太空杀.mp4"})).await).await;
        assert_eq!(value["matches"][0]["animeId"].as_u64().unwrap(), special);
        assert_eq!(value["resolution"], "preference");
    }
}
