//! Request/response messages exchanged between page contexts and the
//! background context that owns the store.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::guardian::{FeedStats, StorageStats};
use crate::post::Post;
use crate::service::IngestSummary;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    PostsExtracted {
        #[serde(deserialize_with = "lenient_posts")]
        posts: Vec<Post>,
    },
    GetPosts,
    MarkRead {
        url: String,
    },
    ClearPosts,
    GetStats,
    GetStorageStats,
    RefreshFeed,
    /// Background to page direction; page contexts answer it.
    TriggerExtraction,
}

/// Drops individual malformed posts instead of failing the whole batch.
fn lenient_posts<'de, D>(deserializer: D) -> Result<Vec<Post>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    let total = raw.len();
    let posts: Vec<Post> = raw
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();
    if posts.len() < total {
        debug!(dropped = total - posts.len(), "dropped malformed posts from batch");
    }
    Ok(posts)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Ingested {
        success: bool,
        added: usize,
        updated: usize,
        total: usize,
    },
    Posts {
        success: bool,
        posts: Vec<Post>,
    },
    Stats {
        success: bool,
        #[serde(flatten)]
        stats: FeedStats,
    },
    StorageStats {
        success: bool,
        #[serde(flatten)]
        stats: StorageStats,
    },
    Ack {
        success: bool,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack { success: true }
    }

    pub fn failure(error: impl ToString) -> Self {
        Response::Failure {
            success: false,
            error: error.to_string(),
        }
    }

    pub fn ingested(summary: IngestSummary) -> Self {
        Response::Ingested {
            success: true,
            added: summary.added,
            updated: summary.updated,
            total: summary.total,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::Ingested { success, .. }
            | Response::Posts { success, .. }
            | Response::Stats { success, .. }
            | Response::StorageStats { success, .. }
            | Response::Ack { success }
            | Response::Failure { success, .. } => *success,
        }
    }
}
