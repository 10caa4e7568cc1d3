//! Danmaku aggregator
//!
//! Resolves a title or video filename to an episode across several danmaku
//! sources, merges their comment streams and serves them as JSON or XML.

pub mod api;
pub mod cache;
pub mod core;
pub mod source;

pub use api::ApiServer;
pub use crate::core::{AggregatorError, AggregatorState, Config, DanmakuService, Logger};
pub use source::{SourceAdapter, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
