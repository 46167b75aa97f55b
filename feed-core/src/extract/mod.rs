//! Heuristic inbox-page to [`Post`] extraction.
//!
//! All markup knowledge lives in [`SiteProfile`]; this module only walks the
//! cascades it describes. A candidate that fails any check is skipped and the
//! pass carries on.

mod profile;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::dates::normalize_date_at;
use crate::post::{canonical_url, is_valid_article_url, post_id, Post};

pub use profile::{compile, SiteProfile, SUBSTACK_BASE_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SkipReason {
    MissingHref,
    UnresolvableUrl,
    InvalidUrl,
    InsideCommentThread,
    NoiseText,
    MissingTitle,
    ShortTitle,
    CommentCountTitle,
    UnknownPublication,
    Duplicate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingHref => "no href",
            SkipReason::UnresolvableUrl => "href does not resolve to an absolute url",
            SkipReason::InvalidUrl => "not an article url",
            SkipReason::InsideCommentThread => "nested in a table or comment thread",
            SkipReason::NoiseText => "read-more or comment notification",
            SkipReason::MissingTitle => "no title",
            SkipReason::ShortTitle => "title too short",
            SkipReason::CommentCountTitle => "title is a comment count",
            SkipReason::UnknownPublication => "unknown publication",
            SkipReason::Duplicate => "already extracted in this pass",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    profile: SiteProfile,
}

impl Extractor {
    pub fn new(profile: SiteProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Parses `html` and extracts posts from it.
    pub fn extract_html(&self, html: &str, now: DateTime<Utc>) -> Vec<Post> {
        let document = Html::parse_document(html);
        self.extract(&document, now)
    }

    /// Posts in document order, at most one per url.
    pub fn extract(&self, document: &Html, now: DateTime<Utc>) -> Vec<Post> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut posts = Vec::new();
        let mut skipped = 0usize;

        for selector in &self.profile.candidates {
            for candidate in document.select(selector) {
                match self.extract_candidate(candidate, now, &seen) {
                    Ok(post) => {
                        seen.insert(post.url.clone());
                        posts.push(post);
                    }
                    Err(reason) => {
                        skipped += 1;
                        debug!(
                            href = candidate.value().attr("href").unwrap_or_default(),
                            %reason,
                            "skipping candidate"
                        );
                    }
                }
            }
        }

        info!(extracted = posts.len(), skipped, "extraction pass finished");
        posts
    }

    fn extract_candidate(
        &self,
        candidate: ElementRef<'_>,
        now: DateTime<Utc>,
        seen: &HashSet<String>,
    ) -> Result<Post, SkipReason> {
        let profile = &self.profile;

        if self.inside_excluded_ancestor(candidate) {
            return Err(SkipReason::InsideCommentThread);
        }
        // Subtitles are free prose; only the rest of the card can read as a
        // notification.
        let subtitle_element = first_element(candidate, &profile.subtitle);
        if profile.is_noise_text(&text_outside(candidate, subtitle_element)) {
            return Err(SkipReason::NoiseText);
        }

        let href = candidate.value().attr("href").ok_or(SkipReason::MissingHref)?;
        let resolved = profile
            .base_url
            .join(href.trim())
            .map_err(|_| SkipReason::UnresolvableUrl)?;
        if !is_valid_article_url(resolved.as_str()) {
            return Err(SkipReason::InvalidUrl);
        }
        let url = canonical_url(resolved);
        if seen.contains(&url) {
            return Err(SkipReason::Duplicate);
        }

        let title = first_text(candidate, &profile.title).ok_or(SkipReason::MissingTitle)?;
        if title.chars().count() < profile.min_title_chars {
            return Err(SkipReason::ShortTitle);
        }
        if profile.comment_count.is_match(&title) {
            return Err(SkipReason::CommentCountTitle);
        }
        if profile.reply_notification.is_match(&title) {
            return Err(SkipReason::NoiseText);
        }

        let subtitle = subtitle_element.map(visible_text).filter(|s| *s != title);

        let publication = first_text(candidate, &profile.publication)
            .unwrap_or_else(|| profile.unknown_publication.clone());
        if publication == profile.unknown_publication {
            return Err(SkipReason::UnknownPublication);
        }

        let meta = first_text(candidate, &profile.meta);
        let author = meta.as_deref().and_then(|m| self.author_from_meta(m));

        Ok(Post {
            id: post_id(&url),
            title,
            subtitle,
            publication,
            publication_logo: self.first_image(candidate, &profile.publication_logo),
            author,
            cover_image: self.first_image(candidate, &profile.cover_image),
            published_at: self.published_at(candidate, meta.as_deref(), now),
            extracted_at: Some(now),
            is_read: !has_match(candidate, &profile.unread_marker),
            url,
        })
    }

    /// Walks up to, but not including, the feed container.
    fn inside_excluded_ancestor(&self, element: ElementRef<'_>) -> bool {
        let profile = &self.profile;
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|ancestor| !matches_any(*ancestor, &profile.feed_container))
            .any(|ancestor| {
                let value = ancestor.value();
                profile
                    .excluded_ancestor_tags
                    .iter()
                    .any(|tag| value.name().eq_ignore_ascii_case(tag))
                    || value.classes().any(|class| {
                        let class = class.to_ascii_lowercase();
                        profile
                            .excluded_ancestor_classes
                            .iter()
                            .any(|prefix| class.starts_with(prefix.as_str()))
                    })
            })
    }

    fn author_from_meta(&self, meta: &str) -> Option<String> {
        let first = meta
            .split(|c| self.profile.meta_separators.contains(&c))
            .next()?
            .trim();
        (!first.is_empty()).then(|| first.to_string())
    }

    /// `time[datetime]` wins when it is RFC 3339; otherwise the timestamp
    /// label, then the trailing segments of the meta block, go through the
    /// date normalizer.
    fn published_at(
        &self,
        candidate: ElementRef<'_>,
        meta: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let local_now = now.with_timezone(&Local);
        let stamp = self
            .profile
            .timestamp
            .iter()
            .find_map(|selector| candidate.select(selector).next());

        if let Some(element) = stamp {
            if let Some(parsed) = element
                .value()
                .attr("datetime")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            {
                return Some(parsed.with_timezone(&Utc));
            }
            return normalize_date_at(&visible_text(element), local_now);
        }

        meta?
            .split(|c| self.profile.meta_separators.contains(&c))
            .skip(1)
            .find_map(|segment| normalize_date_at(segment, local_now))
    }

    fn first_image(&self, candidate: ElementRef<'_>, cascade: &[Selector]) -> Option<String> {
        cascade.iter().find_map(|selector| {
            candidate
                .select(selector)
                .find_map(|img| self.image_url(img))
        })
    }

    fn image_url(&self, img: ElementRef<'_>) -> Option<String> {
        self.profile.image_attributes.iter().find_map(|attr| {
            let raw = img.value().attr(attr)?;
            let candidate = if attr.ends_with("srcset") {
                first_srcset_entry(raw)?
            } else {
                raw.trim()
            };
            resolve_image(&self.profile.base_url, candidate)
        })
    }
}

/// Whitespace-collapsed text content.
fn visible_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Visible text of `scope` with the subtree of `skip` left out.
fn text_outside(scope: ElementRef<'_>, skip: Option<ElementRef<'_>>) -> String {
    scope
        .descendants()
        .filter(|node| {
            skip.map_or(true, |skip| {
                node.id() != skip.id() && !node.ancestors().any(|a| a.id() == skip.id())
            })
        })
        .filter_map(|node| node.value().as_text())
        .flat_map(|text| text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First element in the cascade with non-empty text.
fn first_element<'a>(scope: ElementRef<'a>, cascade: &[Selector]) -> Option<ElementRef<'a>> {
    cascade.iter().find_map(|selector| {
        scope
            .select(selector)
            .find(|element| element.text().any(|t| !t.trim().is_empty()))
    })
}

fn matches_any(element: ElementRef<'_>, cascade: &[Selector]) -> bool {
    cascade.iter().any(|selector| selector.matches(&element))
}

fn first_text(scope: ElementRef<'_>, cascade: &[Selector]) -> Option<String> {
    cascade.iter().find_map(|selector| {
        scope
            .select(selector)
            .map(visible_text)
            .find(|text| !text.is_empty())
    })
}

fn has_match(scope: ElementRef<'_>, cascade: &[Selector]) -> bool {
    cascade
        .iter()
        .any(|selector| scope.select(selector).next().is_some())
}

fn first_srcset_entry(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()?
        .split_whitespace()
        .next()
}

fn resolve_image(base: &Url, raw: &str) -> Option<String> {
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}
