//! Data model shared across the fetch pipeline and crawl strategies (spec §3).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A URL string that has been through [`crate::url_canon::canonicalize`].
///
/// This is a thin wrapper rather than a bare `String` so call sites can't
/// accidentally compare a raw and a canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalUrl(pub String);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw result of a successful fetch, before conversion.
#[derive(Debug, Clone)]
pub struct FetchedPageRaw {
    /// Final URL after following redirects.
    pub url: String,
    pub html: String,
    pub status_code: u16,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

/// A successfully converted and recorded page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub fetched_at: DateTime<Utc>,
    pub markdown: String,
    pub title: Option<String>,
    pub depth: u32,
}

impl FetchedPage {
    pub fn from_raw(raw: FetchedPageRaw, markdown: String, title: Option<String>, depth: u32) -> Self {
        Self {
            url: raw.url,
            html: raw.html,
            status_code: raw.status_code,
            headers: raw.headers,
            fetched_at: raw.fetched_at,
            markdown,
            title,
            depth,
        }
    }
}

/// A page that was not fetched, converted, or stored, with a reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPage {
    pub url: String,
    pub reason: String,
}

/// Aggregate statistics for a completed crawl.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total_pages: usize,
    pub total_skipped: usize,
    pub duration: Duration,
}

/// The return value of a crawl.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub pages: Vec<FetchedPage>,
    pub skipped: Vec<SkippedPage>,
    pub output_path: std::path::PathBuf,
    pub stats: CrawlStats,
    pub index_path: Option<std::path::PathBuf>,
    pub single_file_path: Option<std::path::PathBuf>,
}

/// A link extracted from a page (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub text: String,
    pub context: String,
}

/// Per-origin robots.txt policy, cached for the fetcher's lifetime (spec §4.3).
pub struct RobotsEntry {
    pub robot: texting_robots::Robot,
    pub crawl_delay: Option<Duration>,
}

/// A single cookie parsed from a Netscape cookie file (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix seconds; 0 means session cookie.
    pub expiry: i64,
    pub name: String,
    pub value: String,
}

/// A queued URL awaiting fetch, with its BFS depth (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: CanonicalUrl,
    pub depth: u32,
}
