pub mod config;
pub mod dates;
pub mod error;
pub mod extract;
pub mod guardian;
pub mod host;
pub mod merge;
pub mod messages;
pub mod post;
pub mod refresh;
pub mod service;
pub mod store;
pub mod surface;

pub use config::FeedConfig;
pub use dates::{normalize_date, normalize_date_at};
pub use error::{RefreshError, ServiceError, StoreError, SurfaceError};
pub use extract::{Extractor, SiteProfile};
pub use guardian::{FeedStats, StorageGuardian, StorageStats};
pub use host::serve_lines;
pub use merge::{merge_posts, MergeOutcome};
pub use messages::{Request, Response};
pub use post::{canonical_url, is_valid_article_url, post_id, Post};
pub use refresh::{Reconciler, RefreshOptions, RefreshOrchestrator, RefreshState};
pub use service::{FeedService, IngestSummary};
pub use store::{FeedState, JsonFileStore, MemoryStore, StateStore, StoreChange};
pub use surface::{FetchSurfaces, HttpSurfaces, SurfaceEvent, SurfaceId};
