//! Hidden fetch surfaces: the page contexts a refresh loads the inbox in
//! and runs the extractor against.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SurfaceError;
use crate::extract::Extractor;
use crate::post::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages a surface sends back to the background context. Every event
/// names its origin so listeners can ignore surfaces they did not open.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Loaded { surface: SurfaceId },
    Failed { surface: SurfaceId, error: String },
    Extracted { surface: SurfaceId, posts: Vec<Post> },
}

impl SurfaceEvent {
    pub fn surface(&self) -> SurfaceId {
        match self {
            SurfaceEvent::Loaded { surface }
            | SurfaceEvent::Failed { surface, .. }
            | SurfaceEvent::Extracted { surface, .. } => *surface,
        }
    }
}

#[async_trait]
pub trait FetchSurfaces: Send + Sync {
    /// Opens a hidden, non-focused surface on `url`.
    async fn open(&self, url: &str) -> Result<SurfaceId, SurfaceError>;
    /// Asks the surface to run extraction; results arrive as
    /// [`SurfaceEvent::Extracted`].
    async fn trigger_extraction(&self, surface: SurfaceId) -> Result<(), SurfaceError>;
    async fn close(&self, surface: SurfaceId) -> Result<(), SurfaceError>;
    fn events(&self) -> broadcast::Receiver<SurfaceEvent>;
}

enum PageState {
    Loading(JoinHandle<()>),
    Loaded(Arc<str>),
}

type PageMap = Arc<Mutex<HashMap<SurfaceId, PageState>>>;

/// Surfaces backed by plain HTTP fetches; the fetched markup stays in memory
/// until the surface is closed.
pub struct HttpSurfaces {
    client: Client,
    extractor: Arc<Extractor>,
    next_id: AtomicU64,
    pages: PageMap,
    events: broadcast::Sender<SurfaceEvent>,
}

impl HttpSurfaces {
    pub fn new(client: Client, extractor: Extractor) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            client,
            extractor: Arc::new(extractor),
            next_id: AtomicU64::new(1),
            pages: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn open_count(&self) -> usize {
        self.pages.lock().map(|pages| pages.len()).unwrap_or_default()
    }
}

async fn fetch_page(client: &Client, url: &str) -> Result<String, SurfaceError> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

#[async_trait]
impl FetchSurfaces for HttpSurfaces {
    async fn open(&self, url: &str) -> Result<SurfaceId, SurfaceError> {
        let surface = SurfaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = self.client.clone();
        let pages = self.pages.clone();
        let events = self.events.clone();
        let url = url.to_string();

        // Hold the map lock while spawning so the task cannot finish before
        // its Loading entry exists.
        let mut guard = self
            .pages
            .lock()
            .map_err(|_| SurfaceError::UnknownSurface(surface))?;
        let task = tokio::spawn(async move {
            let event = match fetch_page(&client, &url).await {
                Ok(html) => {
                    let mut pages = match pages.lock() {
                        Ok(pages) => pages,
                        Err(_) => return,
                    };
                    if !pages.contains_key(&surface) {
                        debug!(%surface, "surface closed before load finished");
                        return;
                    }
                    pages.insert(surface, PageState::Loaded(Arc::from(html)));
                    SurfaceEvent::Loaded { surface }
                }
                Err(e) => {
                    warn!(%surface, %url, error = %e, "hidden feed page failed to load");
                    SurfaceEvent::Failed {
                        surface,
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
        guard.insert(surface, PageState::Loading(task));
        debug!(%surface, "opened hidden surface");
        Ok(surface)
    }

    async fn trigger_extraction(&self, surface: SurfaceId) -> Result<(), SurfaceError> {
        let html = {
            let pages = self
                .pages
                .lock()
                .map_err(|_| SurfaceError::UnknownSurface(surface))?;
            match pages.get(&surface) {
                Some(PageState::Loaded(html)) => html.clone(),
                Some(PageState::Loading(_)) => return Err(SurfaceError::NotLoaded(surface)),
                None => return Err(SurfaceError::UnknownSurface(surface)),
            }
        };
        let extractor = self.extractor.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let posts = extractor.extract_html(&html, Utc::now());
            let _ = events.send(SurfaceEvent::Extracted { surface, posts });
        });
        Ok(())
    }

    async fn close(&self, surface: SurfaceId) -> Result<(), SurfaceError> {
        let removed = self
            .pages
            .lock()
            .map_err(|_| SurfaceError::UnknownSurface(surface))?
            .remove(&surface);
        match removed {
            Some(PageState::Loading(task)) => {
                task.abort();
                Ok(())
            }
            Some(PageState::Loaded(_)) => Ok(()),
            None => Err(SurfaceError::UnknownSurface(surface)),
        }
    }

    fn events(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}
