//! Comment normalization pipeline
//!
//! Applied per request to the merged comment stream, in order:
//! offset shift, blocked words, time-window grouping, script conversion,
//! top/bottom remap, color remap, volume cap.

use crate::core::config::DanmuConfig;
use crate::core::models::{Comment, CommentMode};
use crate::core::offset::SourceOffsets;
use ferrous_opencc::config::BuiltinConfig;
use ferrous_opencc::OpenCC;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

const WHITE: u32 = 0xFF_FF_FF;

#[derive(Debug, Clone, PartialEq)]
pub enum ColorMode {
    Keep,
    White,
    /// Ordinary comments take the first color; popular ones one of the rest
    Palette(Vec<u32>),
}

/// Configured comment pipeline
pub struct CommentPipeline {
    blocked_words: Vec<String>,
    group_window_secs: f64,
    converter: Option<OpenCC>,
    top_bottom_to_scroll: bool,
    color: ColorMode,
    hot_threshold: usize,
    limit: usize,
}

impl CommentPipeline {
    pub fn new(config: &DanmuConfig) -> Self {
        let converter = match config.convert.as_str() {
            "simplified" => load_converter(BuiltinConfig::T2s),
            "traditional" => load_converter(BuiltinConfig::S2t),
            _ => None,
        };

        let color = match config.color_mode.as_str() {
            "white" => ColorMode::White,
            "palette" => {
                let palette = parse_palette(&config.palette);
                if palette.is_empty() {
                    warn!("Palette color mode without usable colors, keeping source colors");
                    ColorMode::Keep
                } else {
                    ColorMode::Palette(palette)
                }
            }
            _ => ColorMode::Keep,
        };

        Self {
            blocked_words: config
                .blocked_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            group_window_secs: config.group_minutes as f64 * 60.0,
            converter,
            top_bottom_to_scroll: config.top_bottom_to_scroll,
            color,
            hot_threshold: config.hot_threshold.max(1),
            limit: config.limit_thousands.saturating_mul(1000),
        }
    }

    /// Run every step over `comments`, shifting each by its source's offset
    pub fn apply(&self, comments: &[Comment], offsets: &SourceOffsets) -> Vec<Comment> {
        let total = comments.len();

        let shifted = comments.iter().map(|c| {
            let mut c = c.clone();
            c.time = (c.time + offsets.for_source(&c.source_tag)).max(0.0);
            c
        });

        let kept: Vec<Comment> = shifted.filter(|c| !self.is_blocked(&c.text)).collect();

        let mut popularity: HashMap<&str, usize> = HashMap::new();
        for c in &kept {
            *popularity.entry(c.text.as_str()).or_insert(0) += 1;
        }
        let styled: Vec<Comment> = self
            .group(&kept)
            .into_iter()
            .map(|(mut c, original_text)| {
                let count = popularity.get(original_text.as_str()).copied().unwrap_or(1);
                if let Some(converter) = &self.converter {
                    c.text = converter.convert(&c.text);
                }
                if self.top_bottom_to_scroll {
                    c.mode = CommentMode::Scroll;
                }
                c.color = self.color_for(&original_text, c.color, count);
                c
            })
            .collect();

        let result = self.cap(styled);
        debug!(input = total, output = result.len(), "Comments normalized");
        result
    }

    fn is_blocked(&self, text: &str) -> bool {
        if self.blocked_words.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.blocked_words.iter().any(|w| lower.contains(w.as_str()))
    }

    /// Collapse identical text within one time bucket, keeping the first
    /// occurrence and suffixing ` x{count}`. Returns each comment with its
    /// pre-grouping text.
    fn group(&self, comments: &[Comment]) -> Vec<(Comment, String)> {
        if self.group_window_secs <= 0.0 {
            return comments.iter().map(|c| (c.clone(), c.text.clone())).collect();
        }

        let mut slots: HashMap<(u64, &str), usize> = HashMap::new();
        let mut groups: Vec<(Comment, usize)> = Vec::new();
        for c in comments {
            let bucket = (c.time / self.group_window_secs).floor() as u64;
            match slots.get(&(bucket, c.text.as_str())) {
                Some(&idx) => groups[idx].1 += 1,
                None => {
                    slots.insert((bucket, c.text.as_str()), groups.len());
                    groups.push((c.clone(), 1));
                }
            }
        }

        groups
            .into_iter()
            .map(|(mut c, count)| {
                let original = c.text.clone();
                if count > 1 {
                    c.text = format!("{} x{}", c.text, count);
                }
                (c, original)
            })
            .collect()
    }

    fn color_for(&self, text: &str, color: u32, count: usize) -> u32 {
        match &self.color {
            ColorMode::Keep => color,
            ColorMode::White => WHITE,
            ColorMode::Palette(palette) => {
                if count < self.hot_threshold || palette.len() == 1 {
                    palette[0]
                } else {
                    let accents = &palette[1..];
                    accents[(text_hash(text) % accents.len() as u64) as usize]
                }
            }
        }
    }

    /// Evenly down-sample to the configured limit, preserving temporal spread
    fn cap(&self, mut comments: Vec<Comment>) -> Vec<Comment> {
        let n = comments.len();
        if self.limit == 0 || n <= self.limit {
            return comments;
        }

        comments.sort_by(|a, b| a.time.total_cmp(&b.time));
        let limit = self.limit;
        let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
        (0..limit)
            .filter_map(|i| slots[i * n / limit].take())
            .collect()
    }
}

fn load_converter(config: BuiltinConfig) -> Option<OpenCC> {
    match OpenCC::from_config(config) {
        Ok(converter) => Some(converter),
        Err(e) => {
            warn!("Script converter unavailable, skipping conversion: {}", e);
            None
        }
    }
}

/// Parse `#RRGGBB`, `RRGGBB` or decimal colors, skipping invalid entries
pub fn parse_palette(entries: &[String]) -> Vec<u32> {
    entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.trim();
            let parsed = match entry.strip_prefix('#') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None if entry.len() == 6 && entry.chars().all(|c| c.is_ascii_hexdigit()) => {
                    u32::from_str_radix(entry, 16).ok()
                }
                None => entry.parse().ok(),
            };
            match parsed {
                Some(color) if color <= WHITE => Some(color),
                _ => {
                    warn!(color = entry, "Ignoring invalid palette color");
                    None
                }
            }
        })
        .collect()
}

fn text_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
