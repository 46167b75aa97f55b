use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::post::{canonical_url, post_id, Post};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub posts: Vec<Post>,
    pub added: usize,
    pub updated: usize,
}

/// Folds `incoming` into `persisted`: one post per canonical url, read flags
/// never revert, newest first, at most `max_posts` kept. Incoming posts with
/// no `extracted_at` are stamped with `now`. Pure; the caller owns I/O.
pub fn merge_posts(
    persisted: Vec<Post>,
    incoming: Vec<Post>,
    max_posts: usize,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut by_url: HashMap<String, Post> = HashMap::with_capacity(persisted.len());
    for post in persisted {
        by_url.insert(post.url.clone(), post);
    }

    let mut added = 0usize;
    let mut updated = 0usize;
    let mut rejected = 0usize;

    for mut post in incoming {
        // Batches cross a message boundary, so validity is checked again here.
        let canonical = match Url::parse(&post.url) {
            Ok(parsed) if post.has_valid_url() => canonical_url(parsed),
            _ => {
                rejected += 1;
                continue;
            }
        };
        post.url = canonical;
        post.id = post_id(&post.url);
        post.extracted_at.get_or_insert(now);
        match by_url.get_mut(&post.url) {
            Some(existing) => {
                post.is_read = existing.is_read || post.is_read;
                *existing = post;
                updated += 1;
            }
            None => {
                by_url.insert(post.url.clone(), post);
                added += 1;
            }
        }
    }

    if rejected > 0 {
        debug!(rejected, "dropped incoming posts with invalid urls");
    }

    let mut posts: Vec<Post> = by_url.into_values().collect();
    sort_newest_first(&mut posts);
    posts.truncate(max_posts);

    MergeOutcome {
        posts,
        added,
        updated,
    }
}

/// Effective date descending; undated posts last; url breaks ties.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| match b.effective_date().cmp(&a.effective_date()) {
        Ordering::Equal => a.url.cmp(&b.url),
        other => other,
    });
}
