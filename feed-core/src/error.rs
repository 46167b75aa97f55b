use std::time::Duration;

use thiserror::Error;

use crate::surface::SurfaceId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unknown fetch surface {0}")]
    UnknownSurface(SurfaceId),
    #[error("fetch surface {0} has not finished loading")]
    NotLoaded(SurfaceId),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to open hidden feed page: {0}")]
    Open(#[source] SurfaceError),
    #[error("failed to trigger extraction: {0}")]
    Trigger(#[source] SurfaceError),
    #[error("hidden feed page failed to load: {0}")]
    PageFailed(String),
    #[error("refresh timed out after {0:?} waiting for the feed page")]
    Timeout(Duration),
    #[error("refresh superseded by a newer refresh")]
    Superseded,
    #[error("fetch surface event channel closed")]
    EventsClosed,
    #[error("failed to store refreshed posts: {0}")]
    Reconcile(#[source] Box<ServiceError>),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}
