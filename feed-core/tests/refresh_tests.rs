mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use common::{post, FakeSurfaces};
use feed_core::{
    FeedConfig, FeedService, IngestSummary, MemoryStore, Post, Reconciler, RefreshError,
    RefreshOptions, RefreshOrchestrator, RefreshState, ServiceError, StoreError, SurfaceEvent,
    SurfaceId,
};

struct FailingReconciler;

#[async_trait]
impl Reconciler for FailingReconciler {
    async fn reconcile(&self, _posts: Vec<Post>) -> Result<IngestSummary, ServiceError> {
        Err(ServiceError::Store(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ))))
    }
}

/// Counts the batch without storing it.
struct CountingReconciler;

#[async_trait]
impl Reconciler for CountingReconciler {
    async fn reconcile(&self, posts: Vec<Post>) -> Result<IngestSummary, ServiceError> {
        Ok(IngestSummary {
            added: posts.len(),
            updated: 0,
            total: posts.len(),
        })
    }
}

/// Parks inside reconcile until released.
#[derive(Default)]
struct ParkedReconciler {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Reconciler for ParkedReconciler {
    async fn reconcile(&self, posts: Vec<Post>) -> Result<IngestSummary, ServiceError> {
        self.entered.notify_one();
        self.release.notified().await;
        CountingReconciler.reconcile(posts).await
    }
}

fn config() -> FeedConfig {
    FeedConfig {
        refresh_timeout_secs: 30,
        settle_delay_ms: 2000,
        ..FeedConfig::default()
    }
}

fn orchestrator(surfaces: Arc<FakeSurfaces>) -> Arc<RefreshOrchestrator> {
    Arc::new(RefreshOrchestrator::new(
        surfaces,
        RefreshOptions::from_config(&config()),
    ))
}

fn service(surfaces: Arc<FakeSurfaces>) -> Arc<FeedService> {
    Arc::new(FeedService::new(
        Arc::new(MemoryStore::default()),
        surfaces,
        &config(),
    ))
}

async fn wait_for_surface(service: &FeedService) -> SurfaceId {
    loop {
        if let Some(surface) = service.orchestrator().pending_surface() {
            return surface;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_merges_posts_and_discards_the_surface() {
    let surfaces = Arc::new(FakeSurfaces::new(true));
    let service = service(surfaces.clone());

    let summary = service.refresh().await.expect("refresh succeeds");
    assert_eq!(
        summary,
        IngestSummary {
            added: 2,
            updated: 0,
            total: 2
        }
    );
    assert_eq!(service.posts().await.unwrap().len(), 2);
    assert_eq!(surfaces.opened(), surfaces.closed());
    assert!(service.orchestrator().is_idle());

    let again = service.refresh().await.expect("second refresh succeeds");
    assert_eq!((again.added, again.updated, again.total), (0, 2, 2));
}

#[tokio::test(start_paused = true)]
async fn settle_delay_runs_before_extraction() {
    let surfaces = Arc::new(FakeSurfaces::new(true));
    let service = service(surfaces);
    let started = Instant::now();
    service.refresh().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn page_that_never_loads_times_out_and_leaves_no_pending_state() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let started = Instant::now();
    let err = service.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::Timeout(_)), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(service.orchestrator().is_idle());
    assert_eq!(service.orchestrator().state(), RefreshState::Idle);
    assert_eq!(surfaces.opened(), surfaces.closed());

    surfaces.auto_load.store(true, Ordering::SeqCst);
    let summary = service.refresh().await.expect("next refresh succeeds cleanly");
    assert_eq!(summary.added, 2);
}

#[tokio::test(start_paused = true)]
async fn results_from_other_surfaces_are_ignored() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let task = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    let surface = wait_for_surface(&service).await;
    assert_eq!(service.orchestrator().state(), RefreshState::AwaitingReady);

    surfaces.emit(SurfaceEvent::Extracted {
        surface: SurfaceId(surface.0 + 100),
        posts: vec![post("stray")],
    });
    surfaces.emit(SurfaceEvent::Loaded {
        surface: SurfaceId(surface.0 + 100),
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!task.is_finished());
    assert!(service.posts().await.unwrap().is_empty());
    assert_eq!(service.orchestrator().pending_surface(), Some(surface));

    surfaces.emit(SurfaceEvent::Loaded { surface });
    let summary = task.await.unwrap().expect("matching surface completes the refresh");
    assert_eq!(summary.added, 2);
    let urls: Vec<String> = service.posts().await.unwrap().into_iter().map(|p| p.url).collect();
    assert!(!urls.iter().any(|u| u.ends_with("/stray")));
}

#[tokio::test(start_paused = true)]
async fn new_refresh_supersedes_and_rejects_the_old_one() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    let first_surface = wait_for_surface(&service).await;

    surfaces.auto_load.store(true, Ordering::SeqCst);
    let second = service.refresh().await.expect("superseding refresh succeeds");
    assert_eq!(second.added, 2);

    let first = first.await.unwrap();
    assert!(matches!(first, Err(RefreshError::Superseded)), "got {first:?}");
    assert!(surfaces.closed().contains(&first_surface));
    assert!(service.orchestrator().is_idle());
}

#[tokio::test(start_paused = true)]
async fn reconcile_failure_rejects_and_cleans_up() {
    let surfaces = Arc::new(FakeSurfaces::new(true));
    let orchestrator = orchestrator(surfaces.clone());

    let err = orchestrator.refresh(&FailingReconciler).await.unwrap_err();
    assert!(matches!(err, RefreshError::Reconcile(_)), "got {err:?}");
    assert!(err.to_string().contains("disk full"));
    assert!(orchestrator.is_idle());
    assert_eq!(surfaces.opened(), surfaces.closed());
}

#[tokio::test(start_paused = true)]
async fn open_failure_rejects_without_waiting_for_timeout() {
    let surfaces = Arc::new(FakeSurfaces::new(true));
    surfaces.fail_open.store(true, Ordering::SeqCst);
    let service = service(surfaces.clone());

    let started = Instant::now();
    let err = service.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::Open(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(service.orchestrator().is_idle());
}

#[tokio::test(start_paused = true)]
async fn load_failure_reported_by_the_surface_rejects() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let task = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    let surface = wait_for_surface(&service).await;
    surfaces.emit(SurfaceEvent::Failed {
        surface,
        error: "503 Service Unavailable".into(),
    });

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, RefreshError::PageFailed(_)), "got {err:?}");
    assert!(service.orchestrator().is_idle());
    assert!(surfaces.closed().contains(&surface));
}

#[tokio::test(start_paused = true)]
async fn refresh_already_reconciling_finishes_when_superseded() {
    let surfaces = Arc::new(FakeSurfaces::new(true));
    let orchestrator = orchestrator(surfaces.clone());
    let parked = Arc::new(ParkedReconciler::default());

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let parked = parked.clone();
        async move { orchestrator.refresh(parked.as_ref()).await }
    });
    parked.entered.notified().await;
    assert_eq!(orchestrator.state(), RefreshState::Reconciling);
    let first_surface = surfaces.opened()[0];

    let second = orchestrator
        .refresh(&CountingReconciler)
        .await
        .expect("superseding refresh succeeds");
    assert_eq!(second.added, 2);
    assert!(surfaces.closed().contains(&first_surface));
    assert!(!first.is_finished());

    parked.release.notify_one();
    let first = first.await.unwrap().expect("reconciling refresh is not rejected");
    assert_eq!(first.added, 2);
    assert!(orchestrator.is_idle());
}

#[tokio::test(start_paused = true)]
async fn dropped_refresh_releases_its_slot_and_surface() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let task = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    let surface = wait_for_surface(&service).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert!(service.orchestrator().is_idle());
    while !surfaces.closed().contains(&surface) {
        tokio::task::yield_now().await;
    }

    surfaces.auto_load.store(true, Ordering::SeqCst);
    let summary = service.refresh().await.expect("next refresh is not blocked");
    assert_eq!(summary.added, 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_dropped_while_closing_the_previous_surface_leaves_no_pending_entry() {
    let surfaces = Arc::new(FakeSurfaces::new(false));
    let service = service(surfaces.clone());

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    let first_surface = wait_for_surface(&service).await;

    surfaces.hang_on_close.store(true, Ordering::SeqCst);
    let second = tokio::spawn({
        let service = service.clone();
        async move { service.refresh().await }
    });
    while !surfaces.closed().contains(&first_surface) {
        tokio::task::yield_now().await;
    }
    assert!(!service.orchestrator().is_idle());

    second.abort();
    assert!(second.await.unwrap_err().is_cancelled());
    assert!(service.orchestrator().is_idle());

    let first = first.await.unwrap();
    assert!(matches!(first, Err(RefreshError::Superseded)), "got {first:?}");
}
