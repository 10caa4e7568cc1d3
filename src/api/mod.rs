//! REST API module
//!
//! A thin HTTP boundary over `DanmakuService`:
//! - routing and request handling
//! - trace-id propagation
//! - error responses via `AggregatorError`'s `IntoResponse`

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
pub use server::ApiServer;
