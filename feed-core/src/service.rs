use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::{RefreshError, ServiceError, StoreError};
use crate::guardian::{FeedStats, StorageGuardian, StorageStats};
use crate::merge::merge_posts;
use crate::messages::{Request, Response};
use crate::post::Post;
use crate::refresh::{Reconciler, RefreshOptions, RefreshOrchestrator};
use crate::store::{FeedState, StateStore, StoreChange};
use crate::surface::FetchSurfaces;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub added: usize,
    pub updated: usize,
    pub total: usize,
}

/// The background context: owns the store and serializes every
/// read-modify-write against it.
pub struct FeedService {
    store: Arc<dyn StateStore>,
    guardian: StorageGuardian,
    orchestrator: RefreshOrchestrator,
    max_posts: usize,
    write_lock: Mutex<()>,
}

impl FeedService {
    pub fn new(
        store: Arc<dyn StateStore>,
        surfaces: Arc<dyn FetchSurfaces>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            store,
            guardian: StorageGuardian::from_config(config),
            orchestrator: RefreshOrchestrator::new(surfaces, RefreshOptions::from_config(config)),
            max_posts: config.max_posts,
            write_lock: Mutex::new(()),
        }
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Merges a batch into the store, persists it, then lets the guardian
    /// trim if storage is running hot.
    pub async fn ingest(&self, posts: Vec<Post>) -> Result<IngestSummary, ServiceError> {
        let _write = self.write_lock.lock().await;
        let now = Utc::now();

        let state = self.store.load().await?;
        let outcome = merge_posts(state.posts, posts, self.max_posts, now);
        let mut total = outcome.posts.len();
        self.store
            .save(&FeedState {
                posts: outcome.posts,
                last_updated: Some(now),
            })
            .await?;

        let evicted = self.guardian.enforce(self.store.as_ref(), now).await?;
        total -= evicted;

        info!(
            added = outcome.added,
            updated = outcome.updated,
            total,
            "merged extracted posts"
        );
        Ok(IngestSummary {
            added: outcome.added,
            updated: outcome.updated,
            total,
        })
    }

    pub async fn posts(&self) -> Result<Vec<Post>, StoreError> {
        Ok(self.store.load().await?.posts)
    }

    /// Returns whether a post with `url` was found.
    pub async fn mark_read(&self, url: &str) -> Result<bool, StoreError> {
        let _write = self.write_lock.lock().await;
        let mut state = self.store.load().await?;
        let Some(post) = state.posts.iter_mut().find(|p| p.url == url) else {
            debug!(%url, "mark read for unknown post");
            return Ok(false);
        };
        if !post.is_read {
            post.is_read = true;
            self.store.save(&state).await?;
        }
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        self.store.save(&FeedState::default()).await?;
        info!("cleared all posts");
        Ok(())
    }

    pub async fn stats(&self) -> Result<FeedStats, StoreError> {
        Ok(FeedStats::of(&self.store.load().await?))
    }

    pub async fn storage_stats(&self) -> Result<StorageStats, StoreError> {
        self.guardian.stats(self.store.as_ref()).await
    }

    pub async fn refresh(&self) -> Result<IngestSummary, RefreshError> {
        self.orchestrator.refresh(self).await
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::PostsExtracted { posts } => match self.ingest(posts).await {
                Ok(summary) => Response::ingested(summary),
                Err(e) => Response::failure(e),
            },
            Request::GetPosts => match self.posts().await {
                Ok(posts) => Response::Posts {
                    success: true,
                    posts,
                },
                Err(e) => Response::failure(e),
            },
            Request::MarkRead { url } => match self.mark_read(&url).await {
                Ok(_) => Response::ok(),
                Err(e) => Response::failure(e),
            },
            Request::ClearPosts => match self.clear().await {
                Ok(()) => Response::ok(),
                Err(e) => Response::failure(e),
            },
            Request::GetStats => match self.stats().await {
                Ok(stats) => Response::Stats {
                    success: true,
                    stats,
                },
                Err(e) => Response::failure(e),
            },
            Request::GetStorageStats => match self.storage_stats().await {
                Ok(stats) => Response::StorageStats {
                    success: true,
                    stats,
                },
                Err(e) => Response::failure(e),
            },
            Request::RefreshFeed => match self.refresh().await {
                Ok(summary) => Response::ingested(summary),
                Err(e) => Response::failure(e),
            },
            Request::TriggerExtraction => {
                Response::failure("TRIGGER_EXTRACTION is answered by page contexts")
            }
        }
    }
}

#[async_trait]
impl Reconciler for FeedService {
    async fn reconcile(&self, posts: Vec<Post>) -> Result<IngestSummary, ServiceError> {
        self.ingest(posts).await
    }
}
