//! Feed paging and filtering.
//!
//! Posts are keyed by `created_at`, a negated microsecond timestamp, so the
//! store's ascending order is newest first. Pages are cut by the store and
//! then filtered in memory; `next_start_after` always refers to the
//! unfiltered page so a client can keep walking.

use crate::models::{Post, PostPage};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

/// Page size when `limit` is absent or unusable
pub const DEFAULT_PAGE_LIMIT: usize = 4;

/// Largest accepted page size
pub const MAX_PAGE_LIMIT: usize = 100;

/// Issues strictly decreasing post sort keys.
///
/// Keys are `-(unix micros)`; when two posts land in the same microsecond
/// the later one is pushed one below the last issued key. Magnitudes stay
/// well under 2^53 so the key survives a round trip through a double.
#[derive(Debug, Default)]
pub struct SortKeyClock {
    last: AtomicI64,
}

impl SortKeyClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sort key, strictly below every key issued before it
    pub fn next_key(&self) -> i64 {
        let now = -Utc::now().timestamp_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if last == 0 { now } else { now.min(last - 1) };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Parsed paging parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub limit: usize,
    pub start_after: Option<i64>,
}

impl PageParams {
    /// Parse raw `limit` and `startAfter` query values.
    ///
    /// Unusable values fall back (with a warning) instead of failing the
    /// request.
    pub fn parse(limit: Option<&str>, start_after: Option<&str>) -> Self {
        let limit = match limit.map(str::trim).filter(|s| !s.is_empty()) {
            None => DEFAULT_PAGE_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n > 0 => (n as usize).min(MAX_PAGE_LIMIT),
                _ => {
                    warn!(limit = raw, "Unusable page limit, using default");
                    DEFAULT_PAGE_LIMIT
                }
            },
        };

        let start_after = match start_after.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => match raw.parse::<i64>() {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(start_after = raw, "Unparsable startAfter ignored");
                    None
                }
            },
        };

        Self { limit, start_after }
    }

    /// First key the store should return (exclusive of `start_after`)
    pub fn start_at(&self) -> Option<i64> {
        self.start_after.map(|key| key.saturating_add(1))
    }
}

/// Build a page from the posts the store returned for `params`.
///
/// `keep` filters after the cut; the cursor comes from the unfiltered
/// page and is only set when the store filled the page.
pub fn page_of(posts: Vec<Post>, params: &PageParams, keep: impl Fn(&Post) -> bool) -> PostPage {
    let next_start_after = if posts.len() >= params.limit {
        posts.last().map(|p| p.created_at)
    } else {
        None
    };
    PostPage {
        posts: posts.into_iter().filter(|p| keep(p)).collect(),
        next_start_after,
    }
}

/// Trim tags and drop empties, keeping first-seen order
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Parse a `tags=a,b` query value
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(','))
}

/// True when the post carries any of `tags`
pub fn has_any_tag(post: &Post, tags: &[String]) -> bool {
    post.tags.iter().any(|t| tags.contains(t))
}
