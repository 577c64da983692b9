//! Robots Policy Cache (spec §4.3).
//!
//! One entry per origin, fetched at most once per fetcher lifetime. Fetch
//! failures, non-2xx responses, timeouts, and parse errors all yield an
//! allow-all sentinel rather than propagating an error — a broken
//! robots.txt must never block a crawl.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::RobotsEntry;

/// Cached robots.txt policies, keyed by origin (`scheme://host[:port]`).
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    respect_robots: bool,
    entries: RwLock<HashMap<String, Arc<RobotsEntry>>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: impl Into<String>, respect_robots: bool) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            respect_robots,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns whether `url` may be fetched. Always true when robots
    /// enforcement is disabled.
    pub async fn is_allowed(&self, url: &str) -> bool {
        if !self.respect_robots {
            return true;
        }
        let Some(origin) = origin_of(url) else {
            return true;
        };
        let entry = self.entry_for(&origin).await;
        entry.robot.allowed(url)
    }

    /// Cached `Crawl-delay` for `origin`, or `None` if no entry has been
    /// populated yet. Callers must not assume a delay before the first
    /// request to that origin (spec §4.3).
    pub async fn crawl_delay(&self, origin: &str) -> Option<Duration> {
        self.entries.read().await.get(origin).and_then(|e| e.crawl_delay)
    }

    async fn entry_for(&self, origin: &str) -> Arc<RobotsEntry> {
        if let Some(existing) = self.entries.read().await.get(origin) {
            return Arc::clone(existing);
        }

        let entry = Arc::new(self.fetch_and_parse(origin).await);
        let mut write = self.entries.write().await;
        // Another task may have raced us; keep whichever landed first so
        // `crawlDelay` callers always see the entry that `isAllowed` used.
        Arc::clone(write.entry(origin.to_string()).or_insert(entry))
    }

    async fn fetch_and_parse(&self, origin: &str) -> RobotsEntry {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let body = self.fetch_body(&robots_url).await.unwrap_or_default();

        let robot = match texting_robots::Robot::new(&self.user_agent, body.as_bytes()) {
            Ok(robot) => robot,
            Err(err) => {
                warn!(origin, error = %err, "failed to parse robots.txt, allowing all");
                texting_robots::Robot::new(&self.user_agent, b"").expect("empty robots.txt always parses")
            }
        };

        let crawl_delay = robot.delay.map(|secs| Duration::from_secs(u64::from(secs)));
        RobotsEntry { robot, crawl_delay }
    }

    async fn fetch_body(&self, robots_url: &str) -> Option<String> {
        let response = match self.client.get(robots_url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(url = robots_url, error = %err, "robots.txt fetch failed, allowing all");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url = robots_url, status = %response.status(), "robots.txt non-2xx, allowing all");
            return None;
        }
        match response.text().await {
            Ok(body) => Some(body),
            Err(err) => {
                debug!(url = robots_url, error = %err, "robots.txt body read failed, allowing all");
                None
            }
        }
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let scheme = parsed.scheme();
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}
