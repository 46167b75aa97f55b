use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::FeedConfig;
use crate::error::StoreError;
use crate::post::Post;
use crate::store::{FeedState, StateStore};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
    pub total_posts: usize,
    pub unread_posts: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub publications: Vec<String>,
}

impl FeedStats {
    pub fn of(state: &FeedState) -> Self {
        let publications: BTreeSet<&str> = state
            .posts
            .iter()
            .map(|p| p.publication.as_str())
            .collect();
        Self {
            total_posts: state.posts.len(),
            unread_posts: state.posts.iter().filter(|p| !p.is_read).count(),
            last_updated: state.last_updated,
            publications: publications.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    #[serde(flatten)]
    pub feed: FeedStats,
    pub bytes_used: u64,
    pub bytes_max: u64,
    pub percent_used: f64,
    pub is_near_limit: bool,
}

/// Bounds staleness and bytes after each merge; the merge cap only bounds
/// count.
#[derive(Debug, Clone)]
pub struct StorageGuardian {
    high_water_ratio: f64,
    retention: TimeDelta,
}

impl StorageGuardian {
    pub fn new(high_water_ratio: f64, retention: TimeDelta) -> Self {
        Self {
            high_water_ratio,
            retention,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.high_water_ratio, config.retention())
    }

    fn is_near_limit(&self, bytes_used: u64, bytes_max: u64) -> bool {
        bytes_max > 0 && bytes_used as f64 >= bytes_max as f64 * self.high_water_ratio
    }

    /// Runs age-based eviction when usage has reached the high-water mark.
    /// Returns how many posts were removed.
    pub async fn enforce(&self, store: &dyn StateStore, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let bytes_used = store.bytes_in_use().await?;
        let bytes_max = store.quota_bytes();
        if !self.is_near_limit(bytes_used, bytes_max) {
            return Ok(0);
        }

        let mut state = store.load().await?;
        let before = state.posts.len();
        state.posts = evict_older_than(state.posts, now - self.retention);
        let evicted = before - state.posts.len();
        if evicted > 0 {
            store.save(&state).await?;
        }
        info!(
            bytes_used,
            bytes_max,
            evicted,
            remaining = state.posts.len(),
            "storage high-water mark reached"
        );
        Ok(evicted)
    }

    pub async fn stats(&self, store: &dyn StateStore) -> Result<StorageStats, StoreError> {
        let state = store.load().await?;
        let bytes_used = store.bytes_in_use().await?;
        let bytes_max = store.quota_bytes();
        let percent_used = if bytes_max == 0 {
            0.0
        } else {
            bytes_used as f64 / bytes_max as f64 * 100.0
        };
        Ok(StorageStats {
            feed: FeedStats::of(&state),
            bytes_used,
            bytes_max,
            percent_used,
            is_near_limit: self.is_near_limit(bytes_used, bytes_max),
        })
    }
}

/// Keeps posts whose effective date is at or after `cutoff`. Posts with no
/// date at all count as oldest and go.
pub fn evict_older_than(posts: Vec<Post>, cutoff: DateTime<Utc>) -> Vec<Post> {
    posts
        .into_iter()
        .filter(|p| p.effective_date().is_some_and(|date| date >= cutoff))
        .collect()
}
