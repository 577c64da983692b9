//! Smart Crawler: LLM-gated BFS (spec §4.9).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::converter::Converter;
use crate::fetcher::Fetcher;
use crate::llm::{InvokeOptions, LLMProvider, CALL_SITE_LINK_CLASSIFIER, CALL_SITE_LINK_CLASSIFIER_PER_LINK};
use crate::model::{FetchResult, Link};
use crate::output::OutputWriter;

use super::{run_bfs, CrawlObserver, CrawlOptions, LinkGate, NoopObserver};

const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClassification {
    Batch,
    PerLink,
}

struct LlmGate {
    provider: Arc<dyn LLMProvider>,
    mode: LinkClassification,
}

#[derive(Deserialize)]
struct BatchClassification {
    relevant: Vec<usize>,
}

#[derive(Deserialize)]
struct PerLinkClassification {
    relevant: bool,
}

#[async_trait]
impl LinkGate for LlmGate {
    async fn gate(&self, parent_url: &str, description: &str, links: Vec<Link>) -> Vec<Link> {
        match self.mode {
            LinkClassification::Batch => self.gate_batch(parent_url, description, links).await,
            LinkClassification::PerLink => self.gate_per_link(parent_url, description, links).await,
        }
    }
}

impl LlmGate {
    async fn gate_batch(&self, parent_url: &str, description: &str, links: Vec<Link>) -> Vec<Link> {
        let mut approved = Vec::new();
        for chunk in links.chunks(BATCH_SIZE) {
            let prompt = batch_prompt(parent_url, description, chunk);
            let schema = json!({
                "type": "object",
                "properties": { "relevant": { "type": "array", "items": { "type": "integer" } } },
                "required": ["relevant"],
            });
            let opts = InvokeOptions { call_site: CALL_SITE_LINK_CLASSIFIER };

            match self.provider.invoke_structured(&prompt, &schema, &opts).await {
                Ok(value) => match serde_json::from_value::<BatchClassification>(value) {
                    Ok(parsed) => {
                        for idx in parsed.relevant {
                            // 1-indexed into the chunk; invalid/out-of-range indices are dropped.
                            if idx >= 1 && idx <= chunk.len() {
                                approved.push(chunk[idx - 1].clone());
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "link classifier returned unparseable output, fail-open");
                        approved.extend(chunk.iter().cloned());
                    }
                },
                Err(e) => {
                    warn!(error = %e, "link classifier failed, fail-open admitting chunk");
                    approved.extend(chunk.iter().cloned());
                }
            }
        }
        approved
    }

    async fn gate_per_link(&self, parent_url: &str, description: &str, links: Vec<Link>) -> Vec<Link> {
        let mut approved = Vec::new();
        for link in links {
            let prompt = per_link_prompt(parent_url, description, &link);
            let schema = json!({
                "type": "object",
                "properties": { "relevant": { "type": "boolean" } },
                "required": ["relevant"],
            });
            let opts = InvokeOptions { call_site: CALL_SITE_LINK_CLASSIFIER_PER_LINK };

            match self.provider.invoke_structured(&prompt, &schema, &opts).await {
                Ok(value) => match serde_json::from_value::<PerLinkClassification>(value) {
                    Ok(parsed) if parsed.relevant => approved.push(link),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "per-link classifier returned unparseable output, fail-open");
                        approved.push(link);
                    }
                },
                Err(e) => {
                    warn!(error = %e, url = %link.url, "per-link classifier failed, fail-open admitting link");
                    approved.push(link);
                }
            }
        }
        approved
    }
}

fn batch_prompt(parent_url: &str, description: &str, links: &[Link]) -> String {
    let mut prompt = format!(
        "Crawl goal: {description}\nParent page: {parent_url}\n\nCandidate links:\n"
    );
    for (idx, link) in links.iter().enumerate() {
        prompt.push_str(&format!("{}. {} — \"{}\" ({})\n", idx + 1, link.url, link.text, link.context));
    }
    prompt.push_str("\nReturn the 1-indexed list of links relevant to the crawl goal.");
    prompt
}

fn per_link_prompt(parent_url: &str, description: &str, link: &Link) -> String {
    format!(
        "Crawl goal: {description}\nParent page: {parent_url}\n\nCandidate link: {} — \"{}\" ({})\n\nIs this link relevant to the crawl goal?",
        link.url, link.text, link.context
    )
}

pub async fn crawl(
    root_url: &str,
    description: &str,
    mode: LinkClassification,
    provider: Arc<dyn LLMProvider>,
    options: &CrawlOptions,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
) -> FetchResult {
    crawl_with_observer(root_url, description, mode, provider, options, fetcher, converter, writer, &NoopObserver).await
}

#[allow(clippy::too_many_arguments)]
pub async fn crawl_with_observer(
    root_url: &str,
    description: &str,
    mode: LinkClassification,
    provider: Arc<dyn LLMProvider>,
    options: &CrawlOptions,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
    observer: &dyn CrawlObserver,
) -> FetchResult {
    let gate = LlmGate { provider, mode };
    run_bfs(root_url, description, options, fetcher, converter, writer, &gate, observer).await
}
