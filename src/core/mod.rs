//! Core aggregation logic
//!
//! This module provides:
//! - Configuration management and structured logging
//! - Error handling and the shared domain models
//! - The title/episode matcher with its fan-out and AI helpers
//! - The merge engine, offset resolver and comment pipeline
//! - Output serialization and the service facade used by the API

pub mod ai;
pub mod config;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod matcher;
pub mod merge;
pub mod models;
pub mod normalizer;
pub mod offset;
pub mod output;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AggregatorError, ErrorResponse, Result};
pub use logging::Logger;
pub use services::{DanmakuService, RenderedComments};
pub use state::{spawn_cache_sweeper, AggregatorState};
