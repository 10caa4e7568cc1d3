//! Source adapters and their registry

pub mod adapter;
pub mod http;
pub mod registry;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{fetch_episode_comments, RawComment, Segment, SegmentList, SourceAdapter};
pub use http::HttpSource;
pub use registry::SourceRegistry;
