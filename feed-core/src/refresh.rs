//! Single-flight background refresh: open a hidden surface on the inbox,
//! wait for it to load, trigger extraction there, and fold the result into
//! the store. Each call resolves or rejects exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::{RefreshError, ServiceError};
use crate::post::Post;
use crate::service::IngestSummary;
use crate::surface::{FetchSurfaces, SurfaceEvent, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    TabOpening,
    AwaitingReady,
    Extracting,
    Reconciling,
}

/// The merge-and-persist step a refresh hands its posts to.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, posts: Vec<Post>) -> Result<IngestSummary, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub feed_url: String,
    /// Measured from when the surface is opened until extraction results
    /// arrive.
    pub timeout: Duration,
    /// Pause between the load event and triggering extraction, for pages
    /// that keep rendering client-side after load.
    pub settle_delay: Duration,
}

impl RefreshOptions {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            feed_url: config.feed_url.clone(),
            timeout: config.refresh_timeout(),
            settle_delay: config.settle_delay(),
        }
    }
}

struct Pending {
    attempt: u64,
    state: RefreshState,
    surface: Option<SurfaceId>,
    supersede: Option<oneshot::Sender<()>>,
}

type PendingSlot = Arc<Mutex<Option<Pending>>>;

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<Pending>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Takes the pending entry only if it still belongs to `attempt`.
fn take_if_current(slot: &PendingSlot, attempt: u64) -> Option<Pending> {
    let mut pending = lock(slot);
    if pending.as_ref().is_some_and(|p| p.attempt == attempt) {
        pending.take()
    } else {
        None
    }
}

pub struct RefreshOrchestrator {
    surfaces: Arc<dyn FetchSurfaces>,
    options: RefreshOptions,
    next_attempt: AtomicU64,
    pending: PendingSlot,
}

impl RefreshOrchestrator {
    pub fn new(surfaces: Arc<dyn FetchSurfaces>, options: RefreshOptions) -> Self {
        Self {
            surfaces,
            options,
            next_attempt: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> RefreshState {
        lock(&self.pending)
            .as_ref()
            .map_or(RefreshState::Idle, |p| p.state)
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.pending).is_none()
    }

    pub fn pending_surface(&self) -> Option<SurfaceId> {
        lock(&self.pending).as_ref().and_then(|p| p.surface)
    }

    /// Runs one refresh. A refresh already in flight is superseded: its
    /// surface is discarded and, unless it has already started reconciling,
    /// its caller gets [`RefreshError::Superseded`].
    pub async fn refresh(&self, reconciler: &dyn Reconciler) -> Result<IngestSummary, RefreshError> {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (supersede_tx, mut superseded) = oneshot::channel();

        let previous = lock(&self.pending).replace(Pending {
            attempt,
            state: RefreshState::TabOpening,
            surface: None,
            supersede: Some(supersede_tx),
        });
        // Armed before the first await so a dropped call never strands its
        // pending entry.
        let mut guard = AttemptGuard {
            pending: self.pending.clone(),
            surfaces: self.surfaces.clone(),
            attempt,
            armed: true,
        };

        if let Some(previous) = previous {
            info!(attempt, previous = previous.attempt, "superseding in-flight refresh");
            if let Some(tx) = previous.supersede {
                let _ = tx.send(());
            }
            if let Some(surface) = previous.surface {
                self.discard(surface).await;
            }
        }

        // Listen before opening so the load event cannot slip past.
        let mut events = self.surfaces.events();
        let deadline = Instant::now() + self.options.timeout;

        let waited = tokio::select! {
            biased;
            _ = &mut superseded => Err(RefreshError::Superseded),
            result = tokio::time::timeout_at(deadline, self.await_posts(attempt, &mut events)) => {
                result.unwrap_or(Err(RefreshError::Timeout(self.options.timeout)))
            }
        };

        let outcome = match waited {
            Ok(posts) => {
                self.set_state(attempt, RefreshState::Reconciling);
                info!(attempt, posts = posts.len(), "reconciling refreshed posts");
                reconciler
                    .reconcile(posts)
                    .await
                    .map_err(|e| RefreshError::Reconcile(Box::new(e)))
            }
            Err(e) => Err(e),
        };

        if let Some(surface) = take_if_current(&self.pending, attempt).and_then(|p| p.surface) {
            self.discard(surface).await;
        }
        guard.armed = false;

        match &outcome {
            Ok(summary) => info!(
                attempt,
                added = summary.added,
                updated = summary.updated,
                total = summary.total,
                "refresh finished"
            ),
            Err(e) => warn!(attempt, error = %e, "refresh failed"),
        }
        outcome
    }

    async fn await_posts(
        &self,
        attempt: u64,
        events: &mut broadcast::Receiver<SurfaceEvent>,
    ) -> Result<Vec<Post>, RefreshError> {
        let surface = self
            .surfaces
            .open(&self.options.feed_url)
            .await
            .map_err(RefreshError::Open)?;

        if !self.record_surface(attempt, surface) {
            self.discard(surface).await;
            return Err(RefreshError::Superseded);
        }
        debug!(attempt, %surface, "waiting for hidden feed page");

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "surface event listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => return Err(RefreshError::EventsClosed),
            };
            if event.surface() != surface {
                debug!(expected = %surface, got = %event.surface(), "ignoring event from another surface");
                continue;
            }
            match event {
                SurfaceEvent::Loaded { .. } => {
                    self.set_state(attempt, RefreshState::Extracting);
                    tokio::time::sleep(self.options.settle_delay).await;
                    self.surfaces
                        .trigger_extraction(surface)
                        .await
                        .map_err(RefreshError::Trigger)?;
                }
                SurfaceEvent::Failed { error, .. } => return Err(RefreshError::PageFailed(error)),
                SurfaceEvent::Extracted { posts, .. } => return Ok(posts),
            }
        }
    }

    /// Records the opened surface; false when this attempt was superseded
    /// while the surface was opening.
    fn record_surface(&self, attempt: u64, surface: SurfaceId) -> bool {
        match lock(&self.pending).as_mut() {
            Some(pending) if pending.attempt == attempt => {
                pending.surface = Some(surface);
                pending.state = RefreshState::AwaitingReady;
                true
            }
            _ => false,
        }
    }

    fn set_state(&self, attempt: u64, state: RefreshState) {
        if let Some(pending) = lock(&self.pending).as_mut() {
            if pending.attempt == attempt {
                pending.state = state;
            }
        }
    }

    /// Best effort; the surface may already be gone.
    async fn discard(&self, surface: SurfaceId) {
        if let Err(e) = self.surfaces.close(surface).await {
            debug!(%surface, error = %e, "ignoring failure to close surface");
        }
    }
}

/// Releases the pending slot and surface if the refresh future is dropped
/// before it finishes.
struct AttemptGuard {
    pending: PendingSlot,
    surfaces: Arc<dyn FetchSurfaces>,
    attempt: u64,
    armed: bool,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(surface) = take_if_current(&self.pending, self.attempt).and_then(|p| p.surface) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let surfaces = self.surfaces.clone();
            handle.spawn(async move {
                let _ = surfaces.close(surface).await;
            });
        }
    }
}
