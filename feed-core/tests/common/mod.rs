#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use feed_core::{post_id, FetchSurfaces, Post, SurfaceError, SurfaceEvent, SurfaceId};

/// Scriptable stand-in for hidden pages.
pub struct FakeSurfaces {
    events: broadcast::Sender<SurfaceEvent>,
    next: AtomicU64,
    pub auto_load: AtomicBool,
    pub fail_open: AtomicBool,
    /// When set, `close` records the surface and then never returns.
    pub hang_on_close: AtomicBool,
    pub batch: Mutex<Vec<Post>>,
    opened: Mutex<Vec<SurfaceId>>,
    closed: Mutex<Vec<SurfaceId>>,
}

impl FakeSurfaces {
    pub fn new(auto_load: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            events,
            next: AtomicU64::new(1),
            auto_load: AtomicBool::new(auto_load),
            fail_open: AtomicBool::new(false),
            hang_on_close: AtomicBool::new(false),
            batch: Mutex::new(vec![post("alpha"), post("beta")]),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(&self, event: SurfaceEvent) {
        let _ = self.events.send(event);
    }

    pub fn opened(&self) -> Vec<SurfaceId> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<SurfaceId> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchSurfaces for FakeSurfaces {
    async fn open(&self, _url: &str) -> Result<SurfaceId, SurfaceError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SurfaceError::UnknownSurface(SurfaceId(0)));
        }
        let surface = SurfaceId(self.next.fetch_add(1, Ordering::SeqCst));
        self.opened.lock().unwrap().push(surface);
        if self.auto_load.load(Ordering::SeqCst) {
            self.emit(SurfaceEvent::Loaded { surface });
        }
        Ok(surface)
    }

    async fn trigger_extraction(&self, surface: SurfaceId) -> Result<(), SurfaceError> {
        let posts = self.batch.lock().unwrap().clone();
        self.emit(SurfaceEvent::Extracted { surface, posts });
        Ok(())
    }

    async fn close(&self, surface: SurfaceId) -> Result<(), SurfaceError> {
        self.closed.lock().unwrap().push(surface);
        if self.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}

pub fn post(slug: &str) -> Post {
    let url = format!("https://pub.substack.com/p/{slug}");
    Post {
        id: post_id(&url),
        title: format!("Post {slug}"),
        subtitle: None,
        publication: "Pub".into(),
        publication_logo: None,
        author: None,
        cover_image: None,
        url,
        published_at: None,
        extracted_at: Some(Utc::now()),
        is_read: false,
    }
}
