//! Shared BFS frontier scaffolding for the Simple and Smart crawlers
//! (spec §4.8, §4.9, §9 design notes: "shared frontier driver parameterized
//! by a LinkGate interface"). The Agent crawler does not use this driver —
//! its frontier is the model's tool calls (spec §4.10), implemented in
//! `agent.rs`.

pub mod agent;
pub mod simple;
pub mod smart;

use std::collections::VecDeque;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tracing::{info, warn};
use url::Url;

use crate::converter::Converter;
use crate::errors::WebFetchError;
use crate::fetcher::Fetcher;
use crate::link_extract::{self, LinkExtractOptions};
use crate::model::{CrawlStats, FetchResult, FetchedPage, FrontierEntry, Link, SkippedPage};
use crate::output::OutputWriter;
use crate::url_canon::{self, GlobSet};
use crate::visited::VisitedSet;

/// Budgets and filters shared by every BFS-based strategy.
pub struct CrawlOptions {
    pub max_depth: u32,
    pub max_pages: usize,
    pub same_domain_only: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// `--prefix`: restrict discovered links to paths under this prefix.
    pub prefix: Option<String>,
}

impl CrawlOptions {
    fn link_extract_options(&self) -> LinkExtractOptions {
        LinkExtractOptions {
            same_domain_only: self.same_domain_only,
            include: GlobSet::new(&self.include),
            exclude: GlobSet::new(&self.exclude),
            prefix: self.prefix.clone(),
        }
    }
}

/// Approves or rejects candidate links discovered on a page before they
/// are enqueued. The Simple crawler admits everything; the Smart crawler
/// gates through an LLM classifier (spec §4.9).
#[async_trait]
pub trait LinkGate: Send + Sync {
    async fn gate(&self, parent_url: &str, description: &str, links: Vec<Link>) -> Vec<Link>;
}

pub struct AllowAllGate;

#[async_trait]
impl LinkGate for AllowAllGate {
    async fn gate(&self, _parent_url: &str, _description: &str, links: Vec<Link>) -> Vec<Link> {
        links
    }
}

/// Progress/telemetry hook, fired as the crawl proceeds (spec §6 progress
/// reporting; §7 `onError`/`onPageSkipped`/`onPageFetched`).
pub trait CrawlObserver: Send + Sync {
    fn on_page_fetched(&self, _page: &FetchedPage) {}
    fn on_page_skipped(&self, _skipped: &SkippedPage) {}
    fn on_error(&self, _url: &str, _message: &str) {}
}

pub struct NoopObserver;
impl CrawlObserver for NoopObserver {}

/// Runs the shared BFS loop described in spec §4.8, generalized with a
/// `LinkGate` so Simple and Smart differ only in which links survive to be
/// enqueued.
///
/// Up to `fetcher.concurrency()` frontier entries are in flight at once
/// (spec §2/§5: the fetch queue runs bounded-concurrency HTTP operations).
/// Frontier mutation — visited-marking, pushing discovered links — only ever
/// happens on this task between `.await` points, so it stays single-threaded
/// even while the fetches themselves run concurrently.
pub async fn run_bfs(
    root_url: &str,
    description: &str,
    options: &CrawlOptions,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
    gate: &dyn LinkGate,
    observer: &dyn CrawlObserver,
) -> FetchResult {
    let started_at = Instant::now();
    let root_canonical = url_canon::canonicalize(root_url);

    let mut frontier: VecDeque<FrontierEntry> = VecDeque::new();
    frontier.push_back(FrontierEntry { url: root_canonical.clone(), depth: 0 });

    let mut visited = VisitedSet::new();
    let mut pages: Vec<FetchedPage> = Vec::new();
    let mut skipped: Vec<SkippedPage> = Vec::new();
    let link_opts = options.link_extract_options();
    let window = fetcher.concurrency().max(1);

    let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();

    loop {
        while in_flight.len() < window && pages.len() + in_flight.len() < options.max_pages {
            let Some(entry) = frontier.pop_front() else { break };

            if visited.contains(entry.url.as_str()) {
                continue;
            }

            if entry.depth > options.max_depth {
                let skip = SkippedPage { url: entry.url.to_string(), reason: "exceeds max depth".to_string() };
                observer.on_page_skipped(&skip);
                skipped.push(skip);
                continue;
            }

            visited.insert(entry.url.as_str());

            let url = entry.url.clone();
            let depth = entry.depth;
            in_flight.push(async move {
                let result = fetch_convert_write(url.as_str(), depth, fetcher, converter, writer).await;
                (url, result)
            });
        }

        let Some((url, result)) = in_flight.next().await else {
            break;
        };

        match result {
            Ok(page) => {
                observer.on_page_fetched(&page);
                let links = extract_links_for(&page, &link_opts);
                let depth = page.depth;
                pages.push(page);

                if pages.len() >= options.max_pages {
                    // Budget hit: current page is kept, no further links enqueued.
                    continue;
                }

                let approved = gate.gate(url.as_str(), description, links).await;
                for link in approved {
                    if !visited.contains(&link.url) {
                        frontier.push_back(FrontierEntry {
                            url: url_canon::canonicalize(&link.url),
                            depth: depth + 1,
                        });
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(url = url.as_str(), error = %message, "fetch failed");
                observer.on_error(url.as_str(), &message);
                let skip = SkippedPage { url: url.to_string(), reason: message };
                observer.on_page_skipped(&skip);
                skipped.push(skip);
            }
        }
    }

    let stats = CrawlStats {
        total_pages: pages.len(),
        total_skipped: skipped.len(),
        duration: started_at.elapsed(),
    };
    info!(pages = stats.total_pages, skipped = stats.total_skipped, "crawl finished");

    FetchResult {
        pages,
        skipped,
        output_path: std::path::PathBuf::new(),
        stats,
        index_path: None,
        single_file_path: None,
    }
}

async fn fetch_convert_write(
    url: &str,
    depth: u32,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
) -> Result<FetchedPage, WebFetchError> {
    let raw = fetcher.fetch(url).await?;
    let converted = converter
        .convert(&raw.html, &raw.url)
        .await
        .map_err(|e| WebFetchError::Other(e.to_string()))?;
    let page = FetchedPage::from_raw(raw, converted.markdown, converted.title, depth);
    writer
        .write_page(&page)
        .await
        .map_err(|e| WebFetchError::Other(format!("write page: {e}")))?;
    Ok(page)
}

fn extract_links_for(page: &FetchedPage, opts: &LinkExtractOptions) -> Vec<Link> {
    let Ok(base) = Url::parse(&page.url) else {
        return Vec::new();
    };
    link_extract::extract_links(&page.html, &base, opts)
}
