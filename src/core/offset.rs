//! Per-title, per-platform timeline offsets
//!
//! Rules come from a `title@platform1&platform2@seconds;...` table. `all` or
//! `*` in the platform position matches every platform. The first rule in
//! declared order whose title and platform match wins.

use crate::core::matcher::TitleNormalizer;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformSet {
    All,
    Only(Vec<String>),
}

impl PlatformSet {
    fn contains(&self, platform: &str) -> bool {
        match self {
            PlatformSet::All => true,
            PlatformSet::Only(platforms) => platforms.iter().any(|p| p.eq_ignore_ascii_case(platform)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetRule {
    /// Normalized title
    pub title: String,
    pub platforms: PlatformSet,
    pub offset_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    rules: Vec<OffsetRule>,
}

impl OffsetTable {
    /// Parse the offset table, dropping malformed rules with a warning
    pub fn parse(table: &str, titles: &TitleNormalizer) -> Self {
        let rules = table
            .split(';')
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .filter_map(|rule| match parse_rule(rule, titles) {
                Some(parsed) => Some(parsed),
                None => {
                    warn!(rule, "Dropping malformed offset rule");
                    None
                }
            })
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> &[OffsetRule] {
        &self.rules
    }

    /// Offset for `title` as served by any of `platforms`; 0 when nothing matches
    ///
    /// `platforms` usually holds the content platform and the source name.
    pub fn resolve(&self, title: &str, platforms: &[&str], titles: &TitleNormalizer) -> f64 {
        let title = titles.normalize(title);
        self.rules
            .iter()
            .find(|rule| rule.title == title && platforms.iter().any(|p| rule.platforms.contains(p)))
            .map(|rule| rule.offset_seconds)
            .unwrap_or(0.0)
    }
}

/// Offsets keyed by a comment's `source_tag`
///
/// Merged streams mix sources, so each comment is shifted by the rule for
/// the source it came from. Tags without an entry use `fallback`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOffsets {
    by_source: HashMap<String, f64>,
    fallback: f64,
}

impl SourceOffsets {
    /// The same offset for every comment
    pub fn uniform(offset_seconds: f64) -> Self {
        Self {
            by_source: HashMap::new(),
            fallback: offset_seconds,
        }
    }

    pub fn insert(&mut self, source: impl Into<String>, offset_seconds: f64) {
        self.by_source.insert(source.into(), offset_seconds);
    }

    pub fn for_source(&self, source: &str) -> f64 {
        self.by_source.get(source).copied().unwrap_or(self.fallback)
    }
}

fn parse_rule(rule: &str, titles: &TitleNormalizer) -> Option<OffsetRule> {
    let mut parts = rule.split('@');
    let (title, platforms, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let title = titles.normalize(title);
    if title.is_empty() {
        return None;
    }

    let platforms = match platforms.trim() {
        "all" | "*" => PlatformSet::All,
        list => {
            let names: Vec<String> = list
                .split('&')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if names.is_empty() {
                return None;
            }
            PlatformSet::Only(names)
        }
    };

    let offset_seconds = seconds.trim().parse::<f64>().ok().filter(|s| s.is_finite())?;

    Some(OffsetRule {
        title,
        platforms,
        offset_seconds,
    })
}
