//! Concurrent fan-out over source adapters
//!
//! Every branch runs under its own timeout. A branch that fails or times out
//! contributes an empty result and never blocks its siblings.

use crate::core::error::Result;
use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How branch results are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanoutStrategy {
    /// Wait for every branch; results keep declared branch order
    #[default]
    WaitAll,
    /// Take the first branch to produce a non-empty result
    Race,
}

impl FanoutStrategy {
    /// `"race"` selects [`FanoutStrategy::Race`], anything else waits for all
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("race") {
            FanoutStrategy::Race
        } else {
            FanoutStrategy::WaitAll
        }
    }
}

/// One unit of concurrent work, usually one source adapter call chain
pub struct Branch<'a, T> {
    pub label: String,
    pub timeout: Duration,
    pub task: BoxFuture<'a, Result<Vec<T>>>,
}

impl<'a, T> Branch<'a, T> {
    pub fn new(label: impl Into<String>, timeout: Duration, task: BoxFuture<'a, Result<Vec<T>>>) -> Self {
        Self {
            label: label.into(),
            timeout,
            task,
        }
    }
}

/// Settled result of one branch
#[derive(Debug, Clone, PartialEq)]
pub struct BranchOutcome<T> {
    pub label: String,
    pub items: Vec<T>,
}

/// Run every branch concurrently under `strategy`
///
/// With [`FanoutStrategy::WaitAll`] one outcome is returned per branch, in
/// declared order. With [`FanoutStrategy::Race`] at most one outcome is
/// returned: the first non-empty one to settle.
pub async fn fan_out<'a, T: Send + 'a>(
    strategy: FanoutStrategy,
    branches: Vec<Branch<'a, T>>,
) -> Vec<BranchOutcome<T>> {
    match strategy {
        FanoutStrategy::WaitAll => join_all(branches.into_iter().map(settle)).await,
        FanoutStrategy::Race => {
            let mut pending: FuturesUnordered<_> = branches.into_iter().map(settle).collect();
            while let Some(outcome) = pending.next().await {
                if !outcome.items.is_empty() {
                    return vec![outcome];
                }
            }
            Vec::new()
        }
    }
}

/// Await one branch, collapsing errors and timeouts to an empty result
async fn settle<T>(branch: Branch<'_, T>) -> BranchOutcome<T> {
    let start = Instant::now();
    let items = match tokio::time::timeout(branch.timeout, branch.task).await {
        Ok(Ok(items)) => {
            debug!(
                source = %branch.label,
                count = items.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Fan-out branch completed"
            );
            items
        }
        Ok(Err(e)) => {
            warn!(source = %branch.label, "Fan-out branch failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!(
                source = %branch.label,
                timeout_ms = branch.timeout.as_millis() as u64,
                "Fan-out branch timed out"
            );
            Vec::new()
        }
    };

    BranchOutcome {
        label: branch.label,
        items,
    }
}
