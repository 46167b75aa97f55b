use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// One scraped inbox item. `url` is the identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub publication: String,
    #[serde(default)]
    pub publication_logo: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Always stamped by the extractor, but posts arriving over the message
    /// boundary are not trusted to carry it.
    #[serde(default)]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
}

impl Post {
    /// `published_at` if known, else `extracted_at`. `None` sorts as oldest.
    pub fn effective_date(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.extracted_at)
    }

    pub fn has_valid_url(&self) -> bool {
        is_valid_article_url(&self.url)
    }
}

/// Deterministic id derived from the post url (hex SHA-256).
pub fn post_id(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Drops the fragment and `utm_*` tracking parameters so the same article
/// reached from different mailings keeps one identity.
pub fn canonical_url(mut url: Url) -> String {
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !key.to_ascii_lowercase().starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

const REJECTED_SEGMENTS: &[&str] = &[
    "comments",
    "comment",
    "subscribe",
    "about",
    "archive",
    "discussion",
];

/// True when `url` points at an article rather than a comment thread, a
/// subscription page or a share action.
pub fn is_valid_article_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| segments.map(str::to_ascii_lowercase).collect())
        .unwrap_or_default();

    let has_post_segment = segments
        .windows(2)
        .any(|pair| pair[0] == "p" && !pair[1].is_empty());
    if !has_post_segment {
        return false;
    }
    if segments
        .iter()
        .any(|segment| REJECTED_SEGMENTS.contains(&segment.as_str()))
    {
        return false;
    }
    if parsed.query_pairs().any(|(key, _)| {
        let key = key.to_ascii_lowercase();
        key == "action" || key.starts_with("comment")
    }) {
        return false;
    }
    !parsed
        .fragment()
        .is_some_and(|fragment| fragment.to_ascii_lowercase().starts_with("comment"))
}
