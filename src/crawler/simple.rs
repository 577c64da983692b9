//! Simple Crawler: exhaustive BFS (spec §4.8).

use crate::converter::Converter;
use crate::fetcher::Fetcher;
use crate::model::FetchResult;
use crate::output::OutputWriter;

use super::{run_bfs, AllowAllGate, CrawlObserver, CrawlOptions, NoopObserver};

pub async fn crawl(
    root_url: &str,
    options: &CrawlOptions,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
) -> FetchResult {
    crawl_with_observer(root_url, options, fetcher, converter, writer, &NoopObserver).await
}

pub async fn crawl_with_observer(
    root_url: &str,
    options: &CrawlOptions,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
    observer: &dyn CrawlObserver,
) -> FetchResult {
    run_bfs(root_url, "", options, fetcher, converter, writer, &AllowAllGate, observer).await
}
