use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use tracing::warn;
use url::Url;

/// Everything the extractor knows about the inbox markup. Swapping the
/// profile is the only change needed when the source site reshuffles its
/// classes; merge, storage and refresh never look at markup.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Relative `href`s and image paths resolve against this.
    pub base_url: Url,
    pub candidates: Vec<Selector>,
    /// Candidates below any of these tags are skipped.
    pub excluded_ancestor_tags: Vec<String>,
    /// Candidates below an element with a class token starting with one of
    /// these are skipped.
    pub excluded_ancestor_classes: Vec<String>,
    /// The ancestor walk for exclusions stops at the first element matching
    /// one of these; page chrome above the feed is never inspected.
    pub feed_container: Vec<Selector>,
    pub title: Vec<Selector>,
    pub subtitle: Vec<Selector>,
    pub publication: Vec<Selector>,
    pub publication_logo: Vec<Selector>,
    pub cover_image: Vec<Selector>,
    pub meta: Vec<Selector>,
    pub timestamp: Vec<Selector>,
    pub unread_marker: Vec<Selector>,
    /// Attributes tried in order on image elements; lazy loaders park the
    /// real url in the `data-*` variants.
    pub image_attributes: Vec<String>,
    pub meta_separators: Vec<char>,
    pub unknown_publication: String,
    pub min_title_chars: usize,
    pub read_more: Regex,
    pub comment_count: Regex,
    pub reply_notification: Regex,
}

pub const SUBSTACK_BASE_URL: &str = "https://substack.com";

static READ_MORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^read\s+more$").unwrap());
static COMMENT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d[\d,.]*k?\s+(comments?|replies|reply)$").unwrap());
// A short name-like lead followed by the activity verb. Mid-sentence uses
// ("what the senator commented on") never start the text.
static REPLY_NOTIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:[A-Z][\w.'’-]*\s+){1,4}(?i:replied to (?:your|a)\b|commented on\b|mentioned you\b|liked your comment\b)|(?i:new repl(?:y|ies)\b))",
    )
    .unwrap()
});

impl SiteProfile {
    /// Selector cascades for the Substack reader inbox.
    pub fn substack() -> Self {
        Self {
            base_url: Url::parse(SUBSTACK_BASE_URL).expect("constant base url"),
            candidates: compile(&[r#"a[href*="/p/"]"#]),
            excluded_ancestor_tags: strings(&["table", "thead", "tbody", "tr", "td"]),
            excluded_ancestor_classes: strings(&["comment", "thread", "reply"]),
            feed_container: compile(&[
                r#"[role="feed"]"#,
                "main",
                r#"[class*="inbox"]"#,
                r#"[class*="reader-feed"]"#,
            ]),
            title: compile(&[
                r#"[data-testid="post-preview-title"]"#,
                r#"[class*="post-title"]"#,
                r#"[class*="title"]:not([class*="subtitle"])"#,
                "h3",
                "h2",
                "h4",
                "strong",
            ]),
            subtitle: compile(&[
                r#"[data-testid="post-preview-subtitle"]"#,
                r#"[class*="subtitle"]"#,
                r#"[class*="preview-text"]"#,
                r#"[class*="description"]"#,
                "p",
            ]),
            publication: compile(&[
                r#"[data-testid="publication-name"]"#,
                r#"[class*="publication-name"]"#,
                r#"[class*="pub-name"]"#,
                r#"[class*="publication"]:not(img)"#,
            ]),
            publication_logo: compile(&[
                r#"img[class*="pub-logo"]"#,
                r#"img[class*="publication-logo"]"#,
                r#"[class*="publication"] img"#,
                r#"[class*="avatar"] img"#,
            ]),
            cover_image: compile(&[
                r#"[class*="cover"] img"#,
                r#"img[class*="cover"]"#,
                r#"[class*="thumbnail"] img"#,
                r#"[class*="post-image"] img"#,
                "picture img",
            ]),
            meta: compile(&[r#"[class*="meta"]"#, r#"[class*="byline"]"#]),
            timestamp: compile(&[
                "time",
                r#"[class*="timestamp"]"#,
                r#"[class*="date"]"#,
            ]),
            unread_marker: compile(&[
                r#"[data-testid="unread-indicator"]"#,
                r#"[class*="unread"]"#,
            ]),
            image_attributes: strings(&["src", "data-src", "data-lazy-src", "srcset", "data-srcset"]),
            meta_separators: vec!['·', '•', '∙'],
            unknown_publication: "Unknown Publication".to_string(),
            min_title_chars: 5,
            read_more: READ_MORE.clone(),
            comment_count: COMMENT_COUNT.clone(),
            reply_notification: REPLY_NOTIFICATION.clone(),
        }
    }

    /// True when the visible text of a candidate marks it as navigation or a
    /// comment notification rather than an article.
    pub fn is_noise_text(&self, text: &str) -> bool {
        self.read_more.is_match(text)
            || self.comment_count.is_match(text)
            || self.reply_notification.is_match(text)
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::substack()
    }
}

/// Parses selectors, dropping (and logging) any that fail so one bad entry
/// does not take the whole cascade down.
pub fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|raw| match Selector::parse(raw) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(selector = %raw, error = ?e, "ignoring invalid selector");
                None
            }
        })
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substack_profile_compiles_every_selector() {
        let profile = SiteProfile::substack();
        assert_eq!(profile.title.len(), 7);
        assert_eq!(profile.publication.len(), 4);
        assert_eq!(profile.cover_image.len(), 5);
    }

    #[test]
    fn noise_text_patterns() {
        let profile = SiteProfile::substack();
        assert!(profile.is_noise_text("Read more"));
        assert!(profile.is_noise_text("READ MORE"));
        assert!(profile.is_noise_text("12 Comments"));
        assert!(profile.is_noise_text("1 reply"));
        assert!(profile.is_noise_text("Alex replied to your comment on Weekly Notes"));
        assert!(profile.is_noise_text("Weekly Notes Alex Kim commented on your post"));
        assert!(profile.is_noise_text("New replies to your comment"));
        assert!(!profile.is_noise_text("Why read more books this year"));
    }

    #[test]
    fn activity_verbs_inside_prose_are_not_notifications() {
        let profile = SiteProfile::substack();
        assert!(!profile.is_noise_text("What the senator commented on last night"));
        assert!(!profile.is_noise_text("the speech nobody expected, and who replied to a critic"));
        assert!(!profile.is_noise_text("Pub The speech nobody expected What the senator commented on"));
    }
}
